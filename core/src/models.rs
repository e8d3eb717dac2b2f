use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

/// Where in the export a record was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaOrigin {
    Post,
    Album,
    Uncategorized,
    Story,
    Markup,
    Untagged,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub author: String,
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub author_id: Option<String>,
}

impl Reaction {
    pub fn same_as(&self, other: &Reaction) -> bool {
        self.author == other.author && self.kind == other.kind
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRecord {
    #[serde(skip)]
    pub content: Vec<u8>,
    pub filename: String,
    pub entry_path: String,
    pub sha256: String,
    pub source_identity: String,
    pub created_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub kind: MediaKind,
    pub origin: MediaOrigin,
    pub album: Option<String>,
    pub geo: Option<GeoPoint>,
    pub comments: Vec<Comment>,
    pub reactions: Vec<Reaction>,
}

impl MediaRecord {
    /// Numeric filename stem, which the source platform uses as its object id.
    pub fn stable_id(&self) -> Option<&str> {
        let stem = match self.filename.rsplit_once('.') {
            Some((stem, _)) => stem,
            None => self.filename.as_str(),
        };
        if !stem.is_empty() && stem.chars().all(|c| c.is_ascii_digit()) {
            Some(stem)
        } else {
            None
        }
    }

    pub fn has_annotations(&self) -> bool {
        !self.comments.is_empty() || !self.reactions.is_empty()
    }

    /// Appends a reaction unless one with the same author and type is present.
    pub fn add_reaction(&mut self, reaction: Reaction) -> bool {
        if self.reactions.iter().any(|r| r.same_as(&reaction)) {
            return false;
        }
        self.reactions.push(reaction);
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub photos: u64,
    pub videos: u64,
    pub stories: u64,
    pub comments: u64,
    pub reactions: u64,
    pub albums: BTreeSet<String>,
}

impl ImportSummary {
    pub fn from_records(records: &[MediaRecord], comments: u64, reactions: u64) -> Self {
        let mut summary = ImportSummary {
            comments,
            reactions,
            ..ImportSummary::default()
        };
        for record in records {
            match record.kind {
                MediaKind::Photo => summary.photos += 1,
                MediaKind::Video => summary.videos += 1,
            }
            if record.origin == MediaOrigin::Story {
                summary.stories += 1;
            }
            if let Some(album) = &record.album {
                summary.albums.insert(album.clone());
            }
        }
        summary
    }

    pub fn absorb(&mut self, counts: &MergeCounts) {
        self.comments += counts.comments_added;
        self.reactions += counts.reactions_added;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeCounts {
    pub matched: u64,
    pub comments_added: u64,
    pub reactions_added: u64,
}

/// A document or section that could not be used during extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionIssue {
    pub entry: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(filename: &str) -> MediaRecord {
        MediaRecord {
            content: vec![1],
            filename: filename.to_string(),
            entry_path: filename.to_string(),
            sha256: String::new(),
            source_identity: format!("media:{}", filename),
            created_at: None,
            description: None,
            kind: MediaKind::Photo,
            origin: MediaOrigin::Album,
            album: None,
            geo: None,
            comments: Vec::new(),
            reactions: Vec::new(),
        }
    }

    #[test]
    fn stable_id_requires_numeric_stem() {
        assert_eq!(record("10157891234567.jpg").stable_id(), Some("10157891234567"));
        assert_eq!(record("123_456_n.jpg").stable_id(), None);
        assert_eq!(record(".jpg").stable_id(), None);
    }

    #[test]
    fn add_reaction_skips_same_author_and_type() {
        let mut rec = record("1.jpg");
        let ts = Utc::now();
        let like = Reaction {
            author: "Ana".to_string(),
            kind: "LIKE".to_string(),
            timestamp: ts,
            author_id: None,
        };
        assert!(rec.add_reaction(like.clone()));
        assert!(!rec.add_reaction(Reaction {
            author_id: Some("42".to_string()),
            ..like.clone()
        }));
        assert!(rec.add_reaction(Reaction {
            kind: "LOVE".to_string(),
            ..like
        }));
        assert_eq!(rec.reactions.len(), 2);
    }
}
