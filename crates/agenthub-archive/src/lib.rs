//! Decoder for the gzip-compressed tar artifact a completed run produces.
//!
//! The archive carries exactly one newline-delimited JSON transcript at
//! `./chat.txt` plus the run's user-visible output files. Decoding is
//! all-or-nothing: a bad gzip frame, a bad tar header, or a single bad
//! transcript line fails the whole decode so callers never see a silently
//! truncated transcript.

use std::collections::BTreeMap;
use std::io::Read;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};

use agenthub_types::{FileArtifact, MessageContent, MessageRole};

/// Transcript file at the archive root, by convention.
pub const TRANSCRIPT_PATH: &str = "chat.txt";
/// Internal run-engine iteration marker. Opaque; never surfaced to callers.
pub const CONTROL_MARKER_PATH: &str = ".next_action";

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("corrupt archive: {message}")]
    CorruptArchive { message: String },
    #[error("corrupt transcript: {message}")]
    CorruptTranscript { message: String },
}

impl ArchiveError {
    fn corrupt_archive(error: &std::io::Error) -> Self {
        Self::CorruptArchive {
            message: error.to_string(),
        }
    }
}

/// One line of the transcript. The hub writes `role` and `content`; content
/// is either a plain string or a structured payload carried verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: MessageRole,
    pub content: MessageContent,
}

/// Decoded artifact: the ordered transcript plus the file tree keyed by path.
/// `BTreeMap` keeps iteration deterministic for identical archive bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedArchive {
    pub transcript: Vec<TranscriptEntry>,
    pub files: BTreeMap<String, FileArtifact>,
}

/// Decodes a gzip+tar run artifact into its transcript and file tree.
///
/// Only regular-file entries are meaningful; directories and other entry
/// types are skipped. Entry paths are keyed with any leading `./` stripped.
/// The transcript file and the control marker are excluded from the file map.
pub fn decode(bytes: &[u8]) -> Result<DecodedArchive, ArchiveError> {
    let mut archive = tar::Archive::new(GzDecoder::new(bytes));

    let mut transcript_raw: Option<String> = None;
    let mut files = BTreeMap::new();

    let entries = archive
        .entries()
        .map_err(|error| ArchiveError::corrupt_archive(&error))?;

    // The whole entry stream is consumed before anything is returned, so a
    // corruption anywhere in the archive fails the decode as a unit.
    for entry in entries {
        let mut entry = entry.map_err(|error| ArchiveError::corrupt_archive(&error))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry
            .path()
            .map_err(|error| ArchiveError::corrupt_archive(&error))?;
        let name = normalize_entry_path(&path.to_string_lossy());

        let mut raw = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut raw)
            .map_err(|error| ArchiveError::corrupt_archive(&error))?;

        if name == TRANSCRIPT_PATH {
            transcript_raw = Some(String::from_utf8_lossy(&raw).into_owned());
            continue;
        }
        if name == CONTROL_MARKER_PATH {
            continue;
        }

        let size = raw.len() as u64;
        files.insert(
            name.clone(),
            FileArtifact {
                name,
                size,
                content: String::from_utf8_lossy(&raw).into_owned(),
            },
        );
    }

    let transcript_raw = transcript_raw.ok_or_else(|| ArchiveError::CorruptTranscript {
        message: format!("archive has no {TRANSCRIPT_PATH} transcript"),
    })?;
    let transcript = parse_transcript(&transcript_raw)?;

    Ok(DecodedArchive { transcript, files })
}

/// Parses a newline-delimited JSON transcript. Empty lines are skipped; a
/// line that fails to parse fails the whole transcript.
pub fn parse_transcript(raw: &str) -> Result<Vec<TranscriptEntry>, ArchiveError> {
    let mut entries = Vec::new();
    for (index, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str::<TranscriptEntry>(line).map_err(|error| {
            ArchiveError::CorruptTranscript {
                message: format!("line {}: {error}", index + 1),
            }
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

fn normalize_entry_path(path: &str) -> String {
    path.strip_prefix("./").unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    fn build_archive(entries: &[(&str, &str)]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, content.as_bytes())
                .expect("append entry");
        }
        builder
            .into_inner()
            .expect("finish tar")
            .finish()
            .expect("finish gzip")
    }

    const TRANSCRIPT: &str = concat!(
        r#"{"role":"user","content":"plan a trip"}"#,
        "\n",
        r#"{"role":"assistant","content":"done, see output.txt"}"#,
        "\n",
    );

    #[test]
    fn decodes_transcript_and_file_tree() {
        let bytes = build_archive(&[
            ("./chat.txt", TRANSCRIPT),
            ("./output.txt", "1234567890"),
            ("./reports/summary.md", "# summary"),
            ("./.next_action", "iterate"),
        ]);

        let decoded = decode(&bytes).expect("decode");
        assert_eq!(decoded.transcript.len(), 2);
        assert_eq!(decoded.transcript[0].role, MessageRole::User);
        assert_eq!(
            decoded.transcript[1].content.as_text(),
            Some("done, see output.txt")
        );

        assert_eq!(decoded.files.len(), 2);
        let output = decoded.files.get("output.txt").expect("output.txt");
        assert_eq!(output.size, 10);
        assert_eq!(output.content, "1234567890");
        assert!(decoded.files.contains_key("reports/summary.md"));
        assert!(!decoded.files.contains_key("chat.txt"));
        assert!(!decoded.files.contains_key(".next_action"));
    }

    #[test]
    fn decode_is_deterministic_for_identical_bytes() {
        let bytes = build_archive(&[
            ("./chat.txt", TRANSCRIPT),
            ("./b.txt", "bbb"),
            ("./a.txt", "aaa"),
        ]);

        let first = decode(&bytes).expect("first decode");
        let second = decode(&bytes).expect("second decode");
        assert_eq!(first, second);
        assert_eq!(
            first.files.keys().collect::<Vec<_>>(),
            vec!["a.txt", "b.txt"]
        );
    }

    #[test]
    fn missing_transcript_is_corrupt_transcript() {
        let bytes = build_archive(&[("./output.txt", "data")]);
        match decode(&bytes) {
            Err(ArchiveError::CorruptTranscript { message }) => {
                assert!(message.contains("chat.txt"), "unexpected: {message}");
            }
            other => panic!("expected CorruptTranscript, got {other:?}"),
        }
    }

    #[test]
    fn invalid_transcript_line_fails_without_partial_output() {
        let transcript = concat!(
            r#"{"role":"user","content":"first"}"#,
            "\n",
            "not json at all\n",
            r#"{"role":"assistant","content":"third"}"#,
            "\n",
        );
        let bytes = build_archive(&[("./chat.txt", transcript)]);
        match decode(&bytes) {
            Err(ArchiveError::CorruptTranscript { message }) => {
                assert!(message.starts_with("line 2:"), "unexpected: {message}");
            }
            other => panic!("expected CorruptTranscript, got {other:?}"),
        }
    }

    #[test]
    fn blank_transcript_lines_are_skipped() {
        let transcript = concat!(
            r#"{"role":"user","content":"only"}"#,
            "\n",
            "\n",
            "   \n",
        );
        let bytes = build_archive(&[("./chat.txt", transcript)]);
        let decoded = decode(&bytes).expect("decode");
        assert_eq!(decoded.transcript.len(), 1);
    }

    #[test]
    fn structured_transcript_content_is_preserved_verbatim() {
        let transcript = concat!(
            r#"{"role":"assistant","content":{"$schema":"https://aitp.dev/v1/payments/schema.json","quote_id":"q1"}}"#,
            "\n",
        );
        let bytes = build_archive(&[("./chat.txt", transcript)]);
        let decoded = decode(&bytes).expect("decode");
        match &decoded.transcript[0].content {
            MessageContent::Json(value) => {
                assert_eq!(
                    value.get("quote_id").and_then(serde_json::Value::as_str),
                    Some("q1")
                );
            }
            MessageContent::Text(text) => panic!("expected structured content, got `{text}`"),
        }
    }

    #[test]
    fn garbage_bytes_are_corrupt_archive() {
        let result = decode(b"definitely not a gzip stream");
        assert!(matches!(result, Err(ArchiveError::CorruptArchive { .. })));
    }

    #[test]
    fn truncated_gzip_stream_is_corrupt_archive() {
        let mut bytes = build_archive(&[("./chat.txt", TRANSCRIPT), ("./big.txt", "payload")]);
        bytes.truncate(bytes.len() / 2);
        assert!(matches!(
            decode(&bytes),
            Err(ArchiveError::CorruptArchive { .. })
        ));
    }
}
