use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub name: String,
    pub url: String,
    pub default_branch: String,
}

#[allow(async_fn_in_trait)]
pub trait RepositoryLister {
    async fn list_team_repositories(&self, team: &str) -> Result<Vec<Repository>>;
    /// `full_name` is `owner/name`; a missing repository yields an empty list.
    async fn list_single_repository(&self, full_name: &str) -> Result<Vec<Repository>>;
}

const TEAM_REPOSITORIES_QUERY: &str = r#"
query($org: String!, $team: String!, $cursor: String) {
  organization(login: $org) {
    team(slug: $team) {
      repositories(first: 100, after: $cursor) {
        pageInfo { hasNextPage endCursor }
        nodes { name url isArchived defaultBranchRef { name } }
      }
    }
  }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphqlResponse {
    data: Option<TeamData>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct TeamData {
    organization: Option<Organization>,
}

#[derive(Debug, Deserialize)]
struct Organization {
    team: Option<Team>,
}

#[derive(Debug, Deserialize)]
struct Team {
    repositories: RepositoryPage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryPage {
    page_info: PageInfo,
    nodes: Vec<RepositoryNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RepositoryNode {
    name: String,
    url: String,
    #[serde(default)]
    is_archived: bool,
    default_branch_ref: Option<BranchRef>,
}

#[derive(Debug, Deserialize)]
struct BranchRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RestRepository {
    name: String,
    html_url: String,
    default_branch: String,
}

/// Lists repositories through the `gh` CLI so its stored credentials are used.
pub struct GhLister {
    org: String,
}

impl GhLister {
    pub fn new(org: impl Into<String>) -> Self {
        Self { org: org.into() }
    }

    async fn fetch_page(&self, team: &str, cursor: Option<&str>) -> Result<RepositoryPage> {
        let mut command = Command::new("gh");
        command
            .args(["api", "graphql"])
            .arg("-f")
            .arg(format!("query={TEAM_REPOSITORIES_QUERY}"))
            .arg("-f")
            .arg(format!("org={}", self.org))
            .arg("-f")
            .arg(format!("team={team}"));
        if let Some(cursor) = cursor {
            command.arg("-f").arg(format!("cursor={cursor}"));
        }
        let output = command.output().await.context("running gh api graphql")?;
        if !output.status.success() {
            bail!(
                "gh api graphql failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        parse_team_page(&output.stdout, &self.org, team)
    }
}

impl RepositoryLister for GhLister {
    async fn list_team_repositories(&self, team: &str) -> Result<Vec<Repository>> {
        let mut repositories = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.fetch_page(team, cursor.as_deref()).await?;
            debug!("fetched {} repositories of {team}", page.nodes.len());
            repositories.extend(
                page.nodes
                    .into_iter()
                    .filter(|node| !node.is_archived)
                    .map(Repository::from),
            );
            match page.page_info.end_cursor {
                Some(next) if page.page_info.has_next_page => cursor = Some(next),
                _ => break,
            }
        }
        repositories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(repositories)
    }

    async fn list_single_repository(&self, full_name: &str) -> Result<Vec<Repository>> {
        let full_name = if full_name.contains('/') {
            full_name.to_string()
        } else {
            format!("{}/{full_name}", self.org)
        };
        let output = Command::new("gh")
            .args(["api", &format!("repos/{full_name}")])
            .output()
            .await
            .context("running gh api")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("404") {
                return Ok(Vec::new());
            }
            bail!("gh api repos/{full_name} failed: {}", stderr.trim());
        }
        let repo: RestRepository = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("parsing repository {full_name}"))?;
        Ok(vec![Repository {
            name: repo.name,
            url: repo.html_url,
            default_branch: repo.default_branch,
        }])
    }
}

impl From<RepositoryNode> for Repository {
    fn from(node: RepositoryNode) -> Self {
        Self {
            name: node.name,
            url: node.url,
            default_branch: node
                .default_branch_ref
                .map(|branch| branch.name)
                .unwrap_or_else(|| "main".to_string()),
        }
    }
}

fn parse_team_page(body: &[u8], org: &str, team: &str) -> Result<RepositoryPage> {
    let response: GraphqlResponse =
        serde_json::from_slice(body).context("parsing team repositories response")?;
    if let Some(error) = response.errors.first() {
        bail!("GitHub rejected the query: {}", error.message);
    }
    response
        .data
        .and_then(|data| data.organization)
        .ok_or_else(|| anyhow!("organization {org} not found"))?
        .team
        .map(|team| team.repositories)
        .ok_or_else(|| anyhow!("team {team} not found in {org}"))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_team_page() {
        let body = br#"{"data":{"organization":{"team":{"repositories":{
            "pageInfo":{"hasNextPage":true,"endCursor":"Y3Vy"},
            "nodes":[
              {"name":"api","url":"https://github.com/acme/api","isArchived":false,
               "defaultBranchRef":{"name":"develop"}},
              {"name":"empty","url":"https://github.com/acme/empty","isArchived":false,
               "defaultBranchRef":null}
            ]}}}}}"#;
        let page = parse_team_page(body, "acme", "core").expect("page");
        assert!(page.page_info.has_next_page);
        assert_eq!(page.page_info.end_cursor.as_deref(), Some("Y3Vy"));
        let repos: Vec<Repository> = page.nodes.into_iter().map(Repository::from).collect();
        assert_eq!(repos[0].default_branch, "develop");
        assert_eq!(repos[1].default_branch, "main");
    }

    #[test]
    fn missing_team_is_an_error() {
        let body = br#"{"data":{"organization":{"team":null}}}"#;
        let err = parse_team_page(body, "acme", "ghosts").expect_err("missing team");
        assert!(err.to_string().contains("team ghosts not found"));
    }

    #[test]
    fn graphql_errors_are_reported() {
        let body = br#"{"data":null,"errors":[{"message":"Bad credentials"}]}"#;
        let err = parse_team_page(body, "acme", "core").expect_err("error");
        assert!(err.to_string().contains("Bad credentials"));
    }

    #[test]
    fn unexpected_shape_fails_fast() {
        let body = br#"{"data":{"organization":{"team":{"repositories":{"nodes":[]}}}}}"#;
        assert!(parse_team_page(body, "acme", "core").is_err());
    }
}
