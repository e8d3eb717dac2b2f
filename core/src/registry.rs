use std::collections::HashMap;

use crate::models::MediaRecord;

/// Collapses records that share a source identity.
///
/// The first record seen for an identity is kept. A later duplicate only fills
/// in a missing album label or description, and each annotation list is taken
/// from whichever copy has more entries.
#[derive(Debug, Default)]
pub struct AssetRegistry {
    records: Vec<MediaRecord>,
    index: HashMap<String, usize>,
    merged: u64,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: MediaRecord) {
        let existing = match self.index.get(&record.source_identity) {
            Some(pos) => *pos,
            None => {
                self.index
                    .insert(record.source_identity.clone(), self.records.len());
                self.records.push(record);
                return;
            }
        };
        self.merged += 1;
        let kept = &mut self.records[existing];
        if kept.album.is_none() && record.album.is_some() {
            kept.album = record.album;
        }
        if kept.description.is_none() && record.description.is_some() {
            kept.description = record.description;
        }
        if record.comments.len() > kept.comments.len() {
            kept.comments = record.comments;
        }
        if record.reactions.len() > kept.reactions.len() {
            kept.reactions = record.reactions;
        }
    }

    pub fn extend<I: IntoIterator<Item = MediaRecord>>(&mut self, records: I) {
        for record in records {
            self.insert(record);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn merged(&self) -> u64 {
        self.merged
    }

    pub fn into_records(self) -> Vec<MediaRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Comment, MediaKind, MediaOrigin};
    use chrono::Utc;

    fn record(identity: &str) -> MediaRecord {
        MediaRecord {
            content: vec![9],
            filename: "x.jpg".to_string(),
            entry_path: "posts/media/x.jpg".to_string(),
            sha256: String::new(),
            source_identity: identity.to_string(),
            created_at: None,
            description: None,
            kind: MediaKind::Photo,
            origin: MediaOrigin::Post,
            album: None,
            geo: None,
            comments: Vec::new(),
            reactions: Vec::new(),
        }
    }

    fn comment(text: &str) -> Comment {
        Comment {
            author: "Ana".to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn later_duplicate_fills_gaps_only() {
        let mut first = record("media:x");
        first.description = Some("first".to_string());
        let mut second = record("media:x");
        second.description = Some("second".to_string());
        second.album = Some("Trip".to_string());

        let mut registry = AssetRegistry::new();
        registry.extend([first, second]);
        let records = registry.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].description.as_deref(), Some("first"));
        assert_eq!(records[0].album.as_deref(), Some("Trip"));
    }

    #[test]
    fn complementary_duplicates_merge_the_same_in_either_order() {
        let mut a = record("media:x");
        a.album = Some("Trip".to_string());
        a.comments = vec![comment("one")];
        let mut b = record("media:x");
        b.description = Some("beach".to_string());

        let mut forward = AssetRegistry::new();
        forward.extend([a.clone(), b.clone()]);
        forward.extend([a.clone(), b.clone()]);
        let mut backward = AssetRegistry::new();
        backward.extend([b.clone(), a.clone()]);
        backward.extend([b, a]);

        let forward = forward.into_records();
        let backward = backward.into_records();
        assert_eq!(forward.len(), 1);
        assert_eq!(backward.len(), 1);
        assert_eq!(forward[0].album, backward[0].album);
        assert_eq!(forward[0].description, backward[0].description);
        assert_eq!(forward[0].comments, backward[0].comments);
    }

    #[test]
    fn annotation_lists_are_chosen_independently() {
        let mut a = record("media:x");
        a.comments = vec![comment("one"), comment("two")];
        let mut b = record("media:x");
        b.comments = vec![comment("only")];
        b.reactions = vec![crate::models::Reaction {
            author: "Bo".to_string(),
            kind: "LIKE".to_string(),
            timestamp: Utc::now(),
            author_id: None,
        }];
        let mut registry = AssetRegistry::new();
        registry.extend([a, b]);
        let records = registry.into_records();
        assert_eq!(records[0].comments.len(), 2);
        assert_eq!(records[0].reactions.len(), 1);
    }

    #[test]
    fn distinct_identities_survive_in_any_order() {
        let mut registry = AssetRegistry::new();
        registry.extend([record("b"), record("a"), record("b")]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.merged(), 1);
    }
}
