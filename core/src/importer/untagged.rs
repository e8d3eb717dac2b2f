use tracing::debug;

use crate::archive::MEDIA_DIRS;
use crate::models::{MediaOrigin, MediaRecord};

use super::{album_from_path, media_kind_for, ExtractionContext, RecordDraft};

/// Asset folders that hold stickers, GIF pickers and similar non-content files.
const SKIP_DIRS: &[&str] = &["stickers_used", "stickers", "gifs", "emoji", "thumbnails"];

fn in_media_dir(relative: &str) -> bool {
    let lower = relative.to_lowercase();
    MEDIA_DIRS.iter().any(|dir| lower.starts_with(&format!("{}/", dir)))
}

fn in_skipped_dir(relative: &str) -> bool {
    let mut parts: Vec<&str> = relative.split('/').collect();
    parts.pop();
    parts.iter().any(|part| {
        let normalized = part.to_lowercase().replace(' ', "_");
        SKIP_DIRS.contains(&normalized.as_str())
    })
}

/// Picks up media files that sit in the export's media folders but that no
/// document referenced.
pub(super) fn sweep_untagged(ctx: &mut ExtractionContext<'_>) -> Vec<MediaRecord> {
    let root = ctx.root().clone();
    let candidates: Vec<String> = ctx
        .names()
        .iter()
        .filter(|name| !ctx.is_consumed(name))
        .filter(|name| media_kind_for(name).is_some())
        .filter_map(|name| {
            let relative = root.relative(name)?;
            if in_media_dir(relative) && !in_skipped_dir(relative) {
                Some(name.clone())
            } else {
                None
            }
        })
        .collect();

    let mut records = Vec::with_capacity(candidates.len());
    for entry in candidates {
        let mut draft = RecordDraft::new(MediaOrigin::Untagged);
        draft.album = root.relative(&entry).and_then(album_from_path);
        let identity = format!("untagged:{}", entry);
        records.extend(ctx.materialize_as(&entry, identity, draft));
    }
    debug!(records = records.len(), "untagged media collected");
    records
}
