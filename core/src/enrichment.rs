use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::CoreError;
use crate::matching::AnnotationIndex;
use crate::models::{Comment, MediaRecord, MergeCounts, Reaction};

const SUPPORTED_VERSION: u64 = 1;

#[derive(Debug, Deserialize)]
struct EnrichmentDocument {
    #[serde(default)]
    items: BTreeMap<String, EnrichmentItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EnrichmentItem {
    comments: Vec<EnrichmentComment>,
    reactions: Vec<EnrichmentReaction>,
}

#[derive(Debug, Deserialize)]
struct EnrichmentComment {
    #[serde(alias = "from")]
    author: String,
    #[serde(alias = "message")]
    text: String,
    #[serde(default, alias = "created_time")]
    timestamp: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct EnrichmentReaction {
    #[serde(alias = "name")]
    author: String,
    #[serde(default, alias = "id")]
    author_id: Option<Value>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    timestamp: Option<Value>,
}

/// Accepts RFC 3339, the `+0000` offset form, or integer epoch seconds.
fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::Number(n) => n
            .as_i64()
            .filter(|secs| *secs > 0)
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z"))
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_document(bytes: &[u8]) -> Result<EnrichmentDocument, CoreError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| CoreError::InvalidEnrichment(format!("not a json document: {}", e)))?;
    let version = value.get("version").and_then(Value::as_u64);
    if version != Some(SUPPORTED_VERSION) {
        return Err(CoreError::InvalidEnrichment(format!(
            "unsupported version {}",
            value.get("version").map(|v| v.to_string()).unwrap_or_else(|| "(missing)".to_string())
        )));
    }
    serde_json::from_value(value).map_err(|e| CoreError::InvalidEnrichment(e.to_string()))
}

/// Merges an enrichment file into `records`.
///
/// Matched records have their comment list replaced by the file's and gain any
/// reaction whose (author, type) they do not already carry. The document is
/// fully validated first, so a rejected file leaves every record untouched.
pub fn merge_enrichment(records: &mut [MediaRecord], bytes: &[u8]) -> Result<MergeCounts, CoreError> {
    let document = parse_document(bytes)?;
    let index = AnnotationIndex::build(records, Duration::zero());
    let mut counts = MergeCounts::default();

    for (id, item) in document.items {
        let pos = match index.lookup_id(&id) {
            Some(pos) => pos,
            None => continue,
        };
        counts.matched += 1;
        let record = &mut records[pos];

        let comments: Vec<Comment> = item
            .comments
            .into_iter()
            .filter_map(|c| {
                let timestamp = parse_timestamp(c.timestamp.as_ref()).or(record.created_at)?;
                Some(Comment {
                    author: c.author,
                    text: c.text,
                    timestamp,
                })
            })
            .collect();
        // nothing usable survived, keep what the archive had
        if !comments.is_empty() {
            counts.comments_added += comments.len() as u64;
            record.comments = comments;
        }

        for r in item.reactions {
            let timestamp = match parse_timestamp(r.timestamp.as_ref()).or(record.created_at) {
                Some(ts) => ts,
                None => continue,
            };
            let added = record.add_reaction(Reaction {
                author: r.author,
                kind: r.kind,
                timestamp,
                author_id: id_string(r.author_id.as_ref()),
            });
            if added {
                counts.reactions_added += 1;
            }
        }
    }
    info!(
        matched = counts.matched,
        comments = counts.comments_added,
        reactions = counts.reactions_added,
        "enrichment merged"
    );
    Ok(counts)
}
