use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::models::{Comment, MediaRecord, Reaction};

pub const DEFAULT_MATCH_WINDOW_DAYS: i64 = 7;

/// A comment as extracted, before it is linked to a record.
#[derive(Debug, Clone, PartialEq)]
pub struct RawComment {
    pub comment: Comment,
    pub target_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawReaction {
    pub reaction: Reaction,
    pub target_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchStats {
    pub by_identifier: u64,
    pub by_time: u64,
    pub unmatched: u64,
}

pub struct AnnotationIndex {
    by_id: HashMap<String, usize>,
    by_time: Vec<(DateTime<Utc>, usize)>,
    window: Duration,
}

impl AnnotationIndex {
    pub fn build(records: &[MediaRecord], window: Duration) -> Self {
        let mut by_id = HashMap::new();
        let mut by_time = Vec::new();
        for (pos, record) in records.iter().enumerate() {
            if let Some(id) = record.stable_id() {
                by_id.entry(id.to_string()).or_insert(pos);
            }
            if let Some(ts) = record.created_at {
                by_time.push((ts, pos));
            }
        }
        by_time.sort();
        Self {
            by_id,
            by_time,
            window,
        }
    }

    pub fn lookup_id(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }

    /// Record with the latest timestamp at or before `ts`, if within the window.
    pub fn nearest_prior(&self, ts: DateTime<Utc>) -> Option<usize> {
        let idx = self.by_time.partition_point(|(t, _)| *t <= ts);
        if idx == 0 {
            return None;
        }
        let (candidate_ts, pos) = self.by_time[idx - 1];
        if ts - candidate_ts <= self.window {
            Some(pos)
        } else {
            None
        }
    }

    fn locate(&self, target_id: Option<&str>, ts: DateTime<Utc>, stats: &mut MatchStats) -> Option<usize> {
        if let Some(pos) = target_id.and_then(|id| self.lookup_id(id)) {
            stats.by_identifier += 1;
            return Some(pos);
        }
        match self.nearest_prior(ts) {
            Some(pos) => {
                stats.by_time += 1;
                Some(pos)
            }
            None => {
                stats.unmatched += 1;
                None
            }
        }
    }
}

/// Links extracted annotations to records. Anything that matches nothing is dropped.
pub fn attach_annotations(
    records: &mut [MediaRecord],
    comments: &[RawComment],
    reactions: &[RawReaction],
    window: Duration,
) -> MatchStats {
    let index = AnnotationIndex::build(records, window);
    let mut stats = MatchStats::default();
    for raw in comments {
        if let Some(pos) = index.locate(raw.target_id.as_deref(), raw.comment.timestamp, &mut stats) {
            records[pos].comments.push(raw.comment.clone());
        }
    }
    for raw in reactions {
        if let Some(pos) = index.locate(raw.target_id.as_deref(), raw.reaction.timestamp, &mut stats) {
            records[pos].add_reaction(raw.reaction.clone());
        }
    }
    debug!(
        by_identifier = stats.by_identifier,
        by_time = stats.by_time,
        unmatched = stats.unmatched,
        "annotations attached"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaKind, MediaOrigin};
    use chrono::TimeZone;

    fn record(filename: &str, created_at: Option<DateTime<Utc>>) -> MediaRecord {
        MediaRecord {
            content: vec![0],
            filename: filename.to_string(),
            entry_path: format!("posts/media/{}", filename),
            sha256: String::new(),
            source_identity: format!("media:{}", filename),
            created_at,
            description: None,
            kind: MediaKind::Photo,
            origin: MediaOrigin::Post,
            album: None,
            geo: None,
            comments: Vec::new(),
            reactions: Vec::new(),
        }
    }

    fn comment_at(ts: DateTime<Utc>) -> RawComment {
        RawComment {
            comment: Comment {
                author: "Ana".to_string(),
                text: "nice".to_string(),
                timestamp: ts,
            },
            target_id: None,
        }
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn matches_within_seven_days() {
        let t = base();
        let mut records = vec![record("a.jpg", Some(t - Duration::days(6) - Duration::hours(23)))];
        let stats = attach_annotations(&mut records, &[comment_at(t)], &[], Duration::days(7));
        assert_eq!(records[0].comments.len(), 1);
        assert_eq!(stats.by_time, 1);
    }

    #[test]
    fn drops_when_gap_exceeds_window() {
        let t = base();
        let mut records = vec![record("a.jpg", Some(t - Duration::days(7) - Duration::hours(1)))];
        let stats = attach_annotations(&mut records, &[comment_at(t)], &[], Duration::days(7));
        assert!(records[0].comments.is_empty());
        assert_eq!(stats.unmatched, 1);
    }

    #[test]
    fn picks_latest_prior_record_and_ignores_later_ones() {
        let t = base();
        let mut records = vec![
            record("old.jpg", Some(t - Duration::days(3))),
            record("later.jpg", Some(t + Duration::hours(1))),
            record("recent.jpg", Some(t - Duration::hours(2))),
            record("undated.jpg", None),
        ];
        attach_annotations(&mut records, &[comment_at(t)], &[], Duration::days(7));
        assert_eq!(records[2].comments.len(), 1);
        assert!(records[0].comments.is_empty());
        assert!(records[1].comments.is_empty());
    }

    #[test]
    fn identifier_match_wins_over_time() {
        let t = base();
        let mut records = vec![
            record("1015.jpg", Some(t - Duration::days(300))),
            record("recent.jpg", Some(t - Duration::hours(1))),
        ];
        let reaction = RawReaction {
            reaction: Reaction {
                author: "Bo".to_string(),
                kind: "LIKE".to_string(),
                timestamp: t,
                author_id: Some("77".to_string()),
            },
            target_id: Some("1015".to_string()),
        };
        let stats = attach_annotations(&mut records, &[], &[reaction.clone(), reaction], Duration::days(7));
        assert_eq!(records[0].reactions.len(), 1);
        assert!(records[1].reactions.is_empty());
        assert_eq!(stats.by_identifier, 2);
    }

    #[test]
    fn failed_identifier_lookup_falls_back_to_time() {
        let t = base();
        let mut records = vec![record("recent.jpg", Some(t - Duration::hours(1)))];
        let mut raw = comment_at(t);
        raw.target_id = Some("999".to_string());
        attach_annotations(&mut records, &[raw], &[], Duration::days(7));
        assert_eq!(records[0].comments.len(), 1);
    }
}
