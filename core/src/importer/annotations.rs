use serde::de::IgnoredAny;
use serde::Deserialize;
use serde_json::Value;

use crate::matching::{RawComment, RawReaction};
use crate::models::{Comment, Reaction};
use crate::text::{fix_mojibake, fix_optional};

use super::{epoch_to_utc, is_annotation_document, ExtractionContext};

#[derive(Debug, Default)]
pub(super) struct ExtractedAnnotations {
    pub comments: Vec<RawComment>,
    pub reactions: Vec<RawReaction>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommentEntry {
    timestamp: Option<f64>,
    title: Option<String>,
    data: Vec<CommentData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommentData {
    comment: Option<CommentBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommentBody {
    timestamp: Option<f64>,
    comment: Option<String>,
    author: Option<String>,
}

/// Older exports nest the reaction inside `data`.
#[derive(Debug, Deserialize)]
struct NestedReaction {
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    title: Option<String>,
    data: Vec<NestedReactionData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NestedReactionData {
    reaction: Option<NestedReactionBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct NestedReactionBody {
    reaction: Option<String>,
    actor: Option<String>,
}

/// Newer exports store one flat object per reaction.
#[derive(Debug, Deserialize)]
struct FlatReaction {
    reaction: String,
    #[serde(default)]
    timestamp: Option<f64>,
    #[serde(default)]
    actor: Option<String>,
    #[serde(default)]
    actor_id: Option<Value>,
    #[serde(default)]
    target_id: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReactionEntry {
    Nested(NestedReaction),
    Flat(FlatReaction),
    Other(IgnoredAny),
}

#[derive(Debug)]
enum AnnotationDocument {
    Comments(Vec<CommentEntry>),
    Reactions(Vec<ReactionEntry>),
}

fn detect_annotation_shape(value: Value) -> Result<Option<AnnotationDocument>, serde_json::Error> {
    match value {
        Value::Array(_) => Ok(Some(AnnotationDocument::Reactions(serde_json::from_value(value)?))),
        Value::Object(mut map) => {
            let key = map
                .keys()
                .find(|k| {
                    let k = k.to_lowercase();
                    k.contains("comment") || k.contains("reaction") || k.contains("like")
                })
                .cloned();
            let key = match key {
                Some(key) => key,
                None => return Ok(None),
            };
            let items = match map.remove(&key) {
                Some(items @ Value::Array(_)) => items,
                _ => return Ok(None),
            };
            if key.to_lowercase().contains("comment") {
                Ok(Some(AnnotationDocument::Comments(serde_json::from_value(items)?)))
            } else {
                Ok(Some(AnnotationDocument::Reactions(serde_json::from_value(items)?)))
            }
        }
        _ => Ok(None),
    }
}

/// Identifiers arrive as strings in some vintages and numbers in others.
fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Author implied by a title such as "Ana Lima commented on your photo.".
fn author_from_title(title: Option<&str>) -> Option<String> {
    let title = fix_mojibake(title?);
    for verb in [" commented", " replied", " reacted", " liked"] {
        if let Some(idx) = title.find(verb) {
            let name = title[..idx].trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

fn collect_comments(entries: Vec<CommentEntry>, out: &mut Vec<RawComment>) {
    for entry in entries {
        let title_author = author_from_title(entry.title.as_deref());
        for data in entry.data {
            let body = match data.comment {
                Some(body) => body,
                None => continue,
            };
            let timestamp = match body.timestamp.or(entry.timestamp).and_then(epoch_to_utc) {
                Some(ts) => ts,
                None => continue,
            };
            let text = match fix_optional(body.comment.as_deref()) {
                Some(text) => text,
                None => continue,
            };
            let author = fix_optional(body.author.as_deref())
                .or_else(|| title_author.clone())
                .unwrap_or_else(|| "Unknown".to_string());
            out.push(RawComment {
                comment: Comment {
                    author,
                    text,
                    timestamp,
                },
                target_id: None,
            });
        }
    }
}

fn collect_reactions(entries: Vec<ReactionEntry>, out: &mut Vec<RawReaction>) {
    for entry in entries {
        match entry {
            ReactionEntry::Nested(nested) => {
                let timestamp = match nested.timestamp.and_then(epoch_to_utc) {
                    Some(ts) => ts,
                    None => continue,
                };
                let title_author = author_from_title(nested.title.as_deref());
                for data in nested.data {
                    let body = match data.reaction {
                        Some(body) => body,
                        None => continue,
                    };
                    let kind = match fix_optional(body.reaction.as_deref()) {
                        Some(kind) => kind,
                        None => continue,
                    };
                    let author = fix_optional(body.actor.as_deref())
                        .or_else(|| title_author.clone())
                        .unwrap_or_else(|| "Unknown".to_string());
                    out.push(RawReaction {
                        reaction: Reaction {
                            author,
                            kind,
                            timestamp,
                            author_id: None,
                        },
                        target_id: None,
                    });
                }
            }
            ReactionEntry::Flat(flat) => {
                let timestamp = match flat.timestamp.and_then(epoch_to_utc) {
                    Some(ts) => ts,
                    None => continue,
                };
                let kind = match fix_optional(Some(flat.reaction.as_str())) {
                    Some(kind) => kind,
                    None => continue,
                };
                out.push(RawReaction {
                    reaction: Reaction {
                        author: fix_optional(flat.actor.as_deref()).unwrap_or_else(|| "Unknown".to_string()),
                        kind,
                        timestamp,
                        author_id: id_string(flat.actor_id.as_ref()),
                    },
                    target_id: id_string(flat.target_id.as_ref()),
                });
            }
            ReactionEntry::Other(_) => {}
        }
    }
}

/// Gathers every comment and reaction the export stores, unlinked.
pub(super) fn extract_annotations(ctx: &mut ExtractionContext<'_>) -> ExtractedAnnotations {
    let prefix_len = ctx.root().prefix.len();
    let documents: Vec<String> = ctx
        .documents(&["json"])
        .into_iter()
        .filter(|name| is_annotation_document(&name[prefix_len..]))
        .collect();
    let mut found = ExtractedAnnotations::default();
    for entry in &documents {
        let bytes = match ctx.read_document(entry) {
            Some(bytes) => bytes,
            None => continue,
        };
        let value: Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(err) => {
                ctx.skip(entry, &format!("invalid json: {}", err));
                continue;
            }
        };
        match detect_annotation_shape(value) {
            Ok(Some(AnnotationDocument::Comments(entries))) => collect_comments(entries, &mut found.comments),
            Ok(Some(AnnotationDocument::Reactions(entries))) => collect_reactions(entries, &mut found.reactions),
            Ok(None) => {}
            Err(err) => ctx.skip(entry, &format!("unexpected annotation shape: {}", err)),
        }
    }
    found
}
