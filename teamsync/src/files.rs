use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use globset::{GlobBuilder, GlobMatcher};
use time::OffsetDateTime;
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::encoding::{self, DecodedText};

const BINARY_CHECK_BYTES: usize = 4096;

/// Version-control metadata and dependency-manager directories never scanned.
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "bower_components",
    "vendor",
    ".venv",
    "venv",
    "__pycache__",
    "target",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Path relative to the repository root, `/`-separated.
    pub relative: String,
}

pub fn build_matcher(pattern: &str) -> Result<GlobMatcher> {
    let glob = GlobBuilder::new(pattern.trim())
        .literal_separator(true)
        .build()
        .map_err(|err| anyhow!("invalid file pattern '{pattern}': {err}"))?;
    Ok(glob.compile_matcher())
}

/// Lists files under `root` whose repository-relative path matches `pattern`.
pub fn select_files(root: &Path, pattern: &str) -> Result<Vec<FileEntry>> {
    let matcher = build_matcher(pattern)?;
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_skipped_dir(entry));

    let mut entries = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("skipping unreadable entry under {}: {err}", root.display());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(stripped) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = normalize_slashes(stripped);
        if matcher.is_match(relative.as_str()) {
            entries.push(FileEntry {
                path: entry.into_path(),
                relative,
            });
        }
    }
    Ok(entries)
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIPPED_DIRS.contains(&name))
            .unwrap_or(false)
}

fn normalize_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn detect_binary(path: &Path) -> Result<bool> {
    let mut file = fs::File::open(path)
        .with_context(|| format!("opening '{}' for binary detection", path.display()))?;
    let mut buf = [0u8; BINARY_CHECK_BYTES];
    let read = file.read(&mut buf)?;
    Ok(buf[..read].contains(&0))
}

/// Reads a file as text; `Ok(None)` for files that look binary.
pub fn read_text(path: &Path) -> Result<Option<DecodedText>> {
    if detect_binary(path)? {
        return Ok(None);
    }
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Some(encoding::decode(&bytes)))
}

/// Writes `data` next to `path` first and renames it into place.
pub fn write_via_temp(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = parent {
        fs::create_dir_all(dir).with_context(|| format!("creating directory {}", dir.display()))?;
    }
    let base_dir = parent.unwrap_or_else(|| Path::new("."));
    let unique = format!(
        ".teamsync-tmp-{}-{}",
        std::process::id(),
        OffsetDateTime::now_utc().unix_timestamp_nanos()
    );
    let temp_path = base_dir.join(unique);
    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("creating temp file {}", temp_path.display()))?;
        file.write_all(data)
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("syncing temp file {}", temp_path.display()))?;
    }
    if let Ok(existing) = fs::metadata(path)
        && let Err(err) = fs::set_permissions(&temp_path, existing.permissions())
    {
        let _ = fs::remove_file(&temp_path);
        return Err(err).with_context(|| format!("copying permissions of {}", path.display()));
    }
    fs::rename(&temp_path, path).or_else(|err| {
        let _ = fs::remove_file(&temp_path);
        Err(err).with_context(|| format!("replacing {}", path.display()))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(root: &Path, relative: &str, body: &[u8]) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("parent")).expect("create dirs");
        fs::write(path, body).expect("write file");
    }

    #[test]
    fn recursive_glob_skips_dependency_directories() {
        let temp = tempdir().expect("temp dir");
        touch(temp.path(), "Dockerfile", b"FROM node:18\n");
        touch(temp.path(), "services/api/Dockerfile", b"FROM node:18\n");
        touch(temp.path(), "node_modules/pkg/Dockerfile", b"FROM node:18\n");
        touch(temp.path(), ".git/Dockerfile", b"FROM node:18\n");

        let found = select_files(temp.path(), "**/Dockerfile").expect("select");
        let relative: Vec<_> = found.iter().map(|entry| entry.relative.as_str()).collect();
        assert_eq!(relative, ["Dockerfile", "services/api/Dockerfile"]);
    }

    #[test]
    fn single_star_does_not_cross_directories() {
        let temp = tempdir().expect("temp dir");
        touch(temp.path(), "ci.yml", b"a: 1\n");
        touch(temp.path(), ".github/workflows/ci.yml", b"a: 1\n");

        let found = select_files(temp.path(), "*.yml").expect("select");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].relative, "ci.yml");
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let temp = tempdir().expect("temp dir");
        assert!(select_files(temp.path(), "[unterminated").is_err());
    }

    #[test]
    fn binary_files_read_as_none() {
        let temp = tempdir().expect("temp dir");
        touch(temp.path(), "logo.png", &[0x89, b'P', b'N', b'G', 0x00, 0x01]);
        touch(temp.path(), "notes.txt", b"hello\n");
        assert!(read_text(&temp.path().join("logo.png")).expect("read").is_none());
        let text = read_text(&temp.path().join("notes.txt"))
            .expect("read")
            .expect("text");
        assert_eq!(text.text, "hello\n");
    }

    #[test]
    fn write_via_temp_replaces_content() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("a/b/state.json");
        write_via_temp(&path, b"one").expect("first write");
        write_via_temp(&path, b"two").expect("second write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "two");
    }

    #[cfg(unix)]
    #[test]
    fn write_via_temp_keeps_the_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("gradlew");
        fs::write(&path, "#!/bin/sh\necho old\n").expect("write");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");

        write_via_temp(&path, b"#!/bin/sh\necho new\n").expect("rewrite");

        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(fs::read_to_string(&path).expect("read"), "#!/bin/sh\necho new\n");
    }
}
