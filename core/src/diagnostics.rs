use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;
use serde::Serialize;

use crate::models::ExtractionIssue;

const LOG_FILE: &str = "import-diagnostics.log";
const MAX_LOG_BYTES: u64 = 1_500_000;

#[derive(Debug, Serialize)]
pub struct LogEvent<'a> {
    pub ts: String,
    pub kind: &'a str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
}

fn sanitize(input: &str) -> String {
    let mut out = input.to_string();
    // home and temp paths leak user names
    for prefix in ["/Users/", "/home/", "/var/", "/private/", "C:\\", "D:\\"] {
        if let Some(idx) = out.find(prefix) {
            out.replace_range(idx.., "[redacted]");
            break;
        }
    }
    let mut redact_next = false;
    out.split_whitespace()
        .map(|token| {
            if redact_next {
                redact_next = false;
                return "[redacted]".to_string();
            }
            if token.eq_ignore_ascii_case("bearer") {
                redact_next = true;
                return token.to_string();
            }
            // account ids, phone numbers
            let digits = token.chars().filter(|c| c.is_ascii_digit()).count();
            if digits >= 10 {
                "[redacted]".to_string()
            } else {
                token.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn append(log_dir: &Path, events: &[LogEvent<'_>]) -> io::Result<()> {
    fs::create_dir_all(log_dir)?;
    let path = log_dir.join(LOG_FILE);
    trim_log(&path)?;
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    for event in events {
        let line = serde_json::to_string(event).map_err(io::Error::other)?;
        writeln!(file, "{}", line)?;
    }
    Ok(())
}

pub fn log_event(log_dir: &Path, kind: &str, message: &str) -> io::Result<()> {
    append(
        log_dir,
        &[LogEvent {
            ts: Utc::now().to_rfc3339(),
            kind,
            message: sanitize(message),
            entry: None,
        }],
    )
}

/// Records every skipped export document, one line each.
pub fn log_issues(log_dir: &Path, issues: &[ExtractionIssue]) -> io::Result<()> {
    if issues.is_empty() {
        return Ok(());
    }
    let ts = Utc::now().to_rfc3339();
    let events: Vec<LogEvent<'_>> = issues
        .iter()
        .map(|issue| LogEvent {
            ts: ts.clone(),
            kind: "extraction_issue",
            message: sanitize(&issue.reason),
            entry: Some(issue.entry.clone()),
        })
        .collect();
    append(log_dir, &events)
}

fn trim_log(path: &Path) -> io::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if fs::metadata(path)?.len() <= MAX_LOG_BYTES {
        return Ok(());
    }
    let data = fs::read(path)?;
    let mut keep_from = data.len().saturating_sub((MAX_LOG_BYTES / 2) as usize);
    // restart on a line boundary
    if let Some(newline) = data[keep_from..].iter().position(|b| *b == b'\n') {
        keep_from += newline + 1;
    }
    fs::write(path, &data[keep_from..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sanitize_redacts_paths_tokens_and_digits() {
        let cleaned = sanitize("upload to /Users/ana/export failed");
        assert_eq!(cleaned, "upload to [redacted]");

        let cleaned = sanitize("header Bearer abc.def rejected for 5511987654321");
        assert_eq!(cleaned, "header Bearer [redacted] rejected for [redacted]");
    }

    #[test]
    fn issues_are_written_as_json_lines() {
        let dir = tempdir().expect("temp");
        let issues = vec![
            ExtractionIssue {
                entry: "posts/album/1.json".to_string(),
                reason: "invalid json".to_string(),
            },
            ExtractionIssue {
                entry: "posts/album/2.json".to_string(),
                reason: "media read failed".to_string(),
            },
        ];
        log_issues(dir.path(), &issues).expect("log");
        log_event(dir.path(), "upload", "finished").expect("log");

        let text = fs::read_to_string(dir.path().join(LOG_FILE)).expect("read");
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["kind"], "extraction_issue");
        assert_eq!(lines[1]["entry"], "posts/album/2.json");
        assert!(lines[2].get("entry").is_none());
    }

    #[test]
    fn oversized_log_is_trimmed() {
        let dir = tempdir().expect("temp");
        let path = dir.path().join(LOG_FILE);
        let line = format!("{}\n", "x".repeat(999));
        fs::write(&path, line.repeat(2_000)).expect("seed");
        log_event(dir.path(), "test", "hello").expect("log");
        let len = fs::metadata(&path).expect("meta").len();
        assert!(len <= MAX_LOG_BYTES);
        let text = fs::read_to_string(&path).expect("read");
        assert!(text.lines().all(|l| l.len() == 999 || l.starts_with('{')));
    }
}
