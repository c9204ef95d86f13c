use std::fmt;

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8, UTF_16BE, UTF_16LE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingSource {
    Bom,
    Detector,
    AssumedUtf8,
}

impl fmt::Display for EncodingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EncodingSource::Bom => "bom",
            EncodingSource::Detector => "detector",
            EncodingSource::AssumedUtf8 => "assumed-utf8",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EncodingDecision {
    pub encoding: &'static Encoding,
    pub source: EncodingSource,
}

/// File content decoded to UTF-8 together with the encoding it must be
/// written back in.
#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub had_errors: bool,
    pub decision: EncodingDecision,
}

impl DecodedText {
    /// Re-encodes `text` with the encoding this file was read with.
    /// A byte order mark found on read is written back.
    pub fn encode(&self, text: &str) -> (Vec<u8>, bool) {
        let encoding = self.decision.encoding;
        let with_bom = self.decision.source == EncodingSource::Bom;
        if encoding == UTF_16LE || encoding == UTF_16BE {
            // encoding_rs only encodes to UTF-8 for these
            let little = encoding == UTF_16LE;
            let mut bytes = Vec::with_capacity(text.len() * 2 + 2);
            let units = with_bom.then_some('\u{feff}' as u16).into_iter();
            for unit in units.chain(text.encode_utf16()) {
                let pair = if little { unit.to_le_bytes() } else { unit.to_be_bytes() };
                bytes.extend_from_slice(&pair);
            }
            return (bytes, false);
        }
        let (bytes, _, had_errors) = encoding.encode(text);
        let mut out = Vec::with_capacity(bytes.len() + 3);
        if with_bom && encoding == UTF_8 {
            out.extend_from_slice(&[0xEF, 0xBB, 0xBF]);
        }
        out.extend_from_slice(&bytes);
        (out, had_errors)
    }
}

pub fn decode(bytes: &[u8]) -> DecodedText {
    let decision = detect(bytes);
    let (cow, _encoding_used, had_errors) = decision.encoding.decode(bytes);
    DecodedText {
        text: cow.into_owned(),
        had_errors,
        decision,
    }
}

fn detect(bytes: &[u8]) -> EncodingDecision {
    if let Some(encoding) = detect_bom(bytes) {
        return EncodingDecision {
            encoding,
            source: EncodingSource::Bom,
        };
    }

    if std::str::from_utf8(bytes).is_ok() {
        return EncodingDecision {
            encoding: UTF_8,
            source: EncodingSource::AssumedUtf8,
        };
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);

    EncodingDecision {
        encoding,
        source: EncodingSource::Detector,
    }
}

fn detect_bom(bytes: &[u8]) -> Option<&'static Encoding> {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return Some(UTF_8);
    }
    if bytes.starts_with(&[0xFF, 0xFE]) {
        return Some(UTF_16LE);
    }
    if bytes.starts_with(&[0xFE, 0xFF]) {
        return Some(UTF_16BE);
    }

    None
}
