use std::collections::HashSet;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::archive::{file_name, locate_root, EntrySource, ExportArchive, LocatedRoot, MediaResolver};
use crate::config::ImportConfig;
use crate::diagnostics;
use crate::enrichment;
use crate::error::CoreError;
use crate::matching::{attach_annotations, MatchStats};
use crate::models::{ExtractionIssue, GeoPoint, ImportSummary, MediaKind, MediaOrigin, MediaRecord, MergeCounts};
use crate::registry::AssetRegistry;

#[path = "importer/annotations.rs"]
mod annotations;
#[path = "importer/markup.rs"]
mod markup;
#[path = "importer/structured.rs"]
mod structured;
#[path = "importer/untagged.rs"]
mod untagged;

pub use markup::MarkupExtractor;
pub use structured::StructuredExtractor;

const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "heic", "heif", "webp", "bmp", "tif", "tiff"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "avi", "3gp", "mkv", "webm"];

/// Directory names that describe export plumbing rather than an album.
const NON_ALBUM_DIRS: &[&str] = &[
    "media",
    "your_posts",
    "posts",
    "photos_and_videos",
    "photos",
    "videos",
    "your_photos",
    "your_videos",
    "uncategorized_photos",
    "uncategorized",
    "stories",
    "archived_stories",
    "thumbnails",
];

#[derive(Debug, Clone)]
pub struct ImportPlan {
    pub session_id: String,
    pub source_path: String,
    pub source_filename: String,
    pub source_hash: String,
    pub size_bytes: u64,
}

pub fn plan_import(source_path: &Path) -> Result<ImportPlan, CoreError> {
    plan_import_with_progress(source_path, |_| {})
}

pub fn plan_import_with_progress<F>(source_path: &Path, progress: F) -> Result<ImportPlan, CoreError>
where
    F: Fn(&str),
{
    if !source_path.exists() {
        return Err(CoreError::InvalidArgument("export file not found".to_string()));
    }
    let is_zip = source_path
        .extension()
        .and_then(|s| s.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false);
    if !is_zip {
        return Err(CoreError::InvalidArgument("file must have .zip extension".to_string()));
    }
    let metadata = fs::metadata(source_path)?;
    if metadata.len() == 0 {
        return Err(CoreError::InvalidArgument("export file is empty".to_string()));
    }
    progress(&format!("Preparing import ({})...", format_bytes(metadata.len())));
    let source_hash = hash_file_sha256_with_progress(source_path, &progress)?;
    let source_filename = source_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("export.zip")
        .to_string();
    Ok(ImportPlan {
        session_id: Uuid::new_v4().to_string(),
        source_path: source_path.display().to_string(),
        source_filename,
        source_hash,
        size_bytes: metadata.len(),
    })
}

fn hash_file_sha256_with_progress<F>(path: &Path, progress: F) -> Result<String, CoreError>
where
    F: Fn(&str),
{
    let mut file = fs::File::open(path)?;
    let total = fs::metadata(path)?.len().max(1);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    let mut processed: u64 = 0;
    let mut last_percent: u64 = 0;
    loop {
        let n = std::io::Read::read(&mut file, &mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        processed = processed.saturating_add(n as u64);
        let percent = (processed * 100) / total;
        if percent > last_percent {
            last_percent = percent;
            if percent <= 100 {
                progress(&format!("Preparing import... {}%", percent));
            }
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;
    const GB: u64 = 1024 * 1024 * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub records: Vec<MediaRecord>,
    pub summary: ImportSummary,
    pub strategy: &'static str,
    pub root: LocatedRoot,
    pub issues: Vec<ExtractionIssue>,
    pub match_stats: MatchStats,
}

impl ImportOutcome {
    /// Folds an enrichment file into the records. Nothing changes if the file is rejected.
    pub fn merge_enrichment(&mut self, bytes: &[u8]) -> Result<MergeCounts, CoreError> {
        let counts = enrichment::merge_enrichment(&mut self.records, bytes)?;
        self.summary.absorb(&counts);
        Ok(counts)
    }
}

pub fn import_archive(plan: &ImportPlan, config: &ImportConfig) -> Result<ImportOutcome, CoreError> {
    import_archive_with_progress(plan, config, |_| {})
}

pub fn import_archive_with_progress<F>(
    plan: &ImportPlan,
    config: &ImportConfig,
    progress: F,
) -> Result<ImportOutcome, CoreError>
where
    F: Fn(&str),
{
    progress("Opening archive...");
    let mut archive = ExportArchive::open(&plan.source_path)?;
    let outcome = import_from_source(&mut archive, config, &progress)?;
    info!(
        session = %plan.session_id,
        source = %plan.source_filename,
        strategy = outcome.strategy,
        records = outcome.records.len(),
        issues = outcome.issues.len(),
        "import extracted"
    );
    if let Some(dir) = config.log_dir.as_deref() {
        write_diagnostics(dir, plan, &outcome);
    }
    Ok(outcome)
}

/// Best effort: a log that cannot be written never fails the import.
fn write_diagnostics(dir: &Path, plan: &ImportPlan, outcome: &ImportOutcome) {
    let message = format!(
        "{} via {}: {} records, {} skipped documents",
        plan.source_filename,
        outcome.strategy,
        outcome.records.len(),
        outcome.issues.len()
    );
    let written = diagnostics::log_issues(dir, &outcome.issues)
        .and_then(|_| diagnostics::log_event(dir, "import", &message));
    if let Err(err) = written {
        warn!(dir = %dir.display(), error = %err, "diagnostics log not written");
    }
}

pub fn import_from_source<F>(
    source: &mut dyn EntrySource,
    config: &ImportConfig,
    progress: F,
) -> Result<ImportOutcome, CoreError>
where
    F: Fn(&str),
{
    progress("Locating export content...");
    let mut ctx = ExtractionContext::new(source, &progress);
    let root = ctx.root().clone();

    let (records, strategy) = run_extraction(&mut ctx, &StructuredExtractor, &MarkupExtractor)?;
    progress("Collecting untagged media...");
    let untagged = untagged::sweep_untagged(&mut ctx);
    let mut records = records;
    records.extend(untagged);
    if records.is_empty() {
        return Err(CoreError::NoMedia);
    }

    progress("Reading comments and reactions...");
    let found = annotations::extract_annotations(&mut ctx);
    let match_stats = attach_annotations(
        &mut records,
        &found.comments,
        &found.reactions,
        config.match_window(),
    );

    let mut registry = AssetRegistry::new();
    registry.extend(records);
    let merged = registry.merged();
    let records = registry.into_records();
    let summary = ImportSummary::from_records(
        &records,
        found.comments.len() as u64,
        found.reactions.len() as u64,
    );
    progress(&format!(
        "Found {} photos and {} videos ({} duplicates merged)",
        summary.photos, summary.videos, merged
    ));

    Ok(ImportOutcome {
        records,
        summary,
        strategy,
        root,
        issues: ctx.into_issues(),
        match_stats,
    })
}

/// One way of turning export documents into media records.
pub trait ExtractionStrategy {
    fn name(&self) -> &'static str;
    fn extract(&self, ctx: &mut ExtractionContext<'_>) -> Result<Vec<MediaRecord>, CoreError>;
}

/// Runs `primary`; only if it finds nothing is `fallback` tried.
pub fn run_extraction(
    ctx: &mut ExtractionContext<'_>,
    primary: &dyn ExtractionStrategy,
    fallback: &dyn ExtractionStrategy,
) -> Result<(Vec<MediaRecord>, &'static str), CoreError> {
    let records = primary.extract(ctx)?;
    if !records.is_empty() {
        return Ok((records, primary.name()));
    }
    info!(primary = primary.name(), fallback = fallback.name(), "primary extraction empty, falling back");
    let records = fallback.extract(ctx)?;
    Ok((records, fallback.name()))
}

/// Metadata gathered for one media reference before its bytes are read.
#[derive(Debug, Clone)]
pub struct RecordDraft {
    pub origin: MediaOrigin,
    pub created_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub album: Option<String>,
    pub geo: Option<GeoPoint>,
}

impl RecordDraft {
    pub fn new(origin: MediaOrigin) -> Self {
        Self {
            origin,
            created_at: None,
            description: None,
            album: None,
            geo: None,
        }
    }
}

pub struct ExtractionContext<'a> {
    source: &'a mut dyn EntrySource,
    resolver: MediaResolver,
    consumed: HashSet<String>,
    issues: Vec<ExtractionIssue>,
    progress: &'a dyn Fn(&str),
}

impl<'a> ExtractionContext<'a> {
    pub fn new(source: &'a mut dyn EntrySource, progress: &'a dyn Fn(&str)) -> Self {
        let root = locate_root(source.names());
        info!(prefix = %root.prefix, rule = ?root.rule, "located export root");
        let resolver = MediaResolver::new(source.names(), root);
        Self {
            source,
            resolver,
            consumed: HashSet::new(),
            issues: Vec::new(),
            progress,
        }
    }

    pub fn root(&self) -> &LocatedRoot {
        self.resolver.root()
    }

    pub fn resolver(&self) -> &MediaResolver {
        &self.resolver
    }

    pub fn progress(&self, message: &str) {
        (self.progress)(message);
    }

    /// Entries under the located root with one of the given extensions.
    pub fn documents(&self, extensions: &[&str]) -> Vec<String> {
        let prefix = self.root().prefix.clone();
        self.source
            .names()
            .iter()
            .filter(|name| name.starts_with(&prefix))
            .filter(|name| extension_of(name).map(|ext| extensions.contains(&ext.as_str())).unwrap_or(false))
            .cloned()
            .collect()
    }

    pub fn names(&self) -> &[String] {
        self.source.names()
    }

    pub fn is_consumed(&self, entry: &str) -> bool {
        self.consumed.contains(entry)
    }

    pub fn read_document(&mut self, entry: &str) -> Option<Vec<u8>> {
        match self.source.read_entry(entry) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                self.skip(entry, &format!("read failed: {}", err));
                None
            }
        }
    }

    pub fn skip(&mut self, entry: &str, reason: &str) {
        warn!(entry, reason, "skipping export document");
        self.issues.push(ExtractionIssue {
            entry: entry.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Reads the entry's bytes and builds a record with a `media:` identity.
    pub fn materialize(&mut self, entry: &str, draft: RecordDraft) -> Option<MediaRecord> {
        let identity = format!("media:{}", entry);
        self.materialize_as(entry, identity, draft)
    }

    pub fn materialize_as(&mut self, entry: &str, identity: String, draft: RecordDraft) -> Option<MediaRecord> {
        let content = match self.source.read_entry(entry) {
            Ok(content) => content,
            Err(err) => {
                self.skip(entry, &format!("media read failed: {}", err));
                return None;
            }
        };
        self.consumed.insert(entry.to_string());
        let filename = file_name(entry).to_string();
        let kind = media_kind_for(&filename).unwrap_or(MediaKind::Photo);
        let mut hasher = Sha256::new();
        hasher.update(&content);
        Some(MediaRecord {
            sha256: hex::encode(hasher.finalize()),
            content,
            filename,
            entry_path: entry.to_string(),
            source_identity: identity,
            created_at: draft.created_at,
            description: draft.description,
            kind,
            origin: draft.origin,
            album: draft.album,
            geo: draft.geo,
            comments: Vec::new(),
            reactions: Vec::new(),
        })
    }

    pub fn into_issues(self) -> Vec<ExtractionIssue> {
        self.issues
    }
}

pub(crate) fn extension_of(name: &str) -> Option<String> {
    let base = file_name(name);
    base.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

pub fn media_kind_for(name: &str) -> Option<MediaKind> {
    let ext = extension_of(name)?;
    if PHOTO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Photo)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

pub(crate) fn epoch_to_utc(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp(secs.trunc() as i64, 0)
}

/// Album label implied by the directory a media reference lives in.
pub(crate) fn album_from_path(reference: &str) -> Option<String> {
    let trimmed = reference.trim_end_matches('/');
    let (parent, _) = trimmed.rsplit_once('/')?;
    let dir = file_name(parent).trim();
    if dir.is_empty() {
        return None;
    }
    let normalized = dir.to_lowercase().replace(' ', "_");
    if NON_ALBUM_DIRS.contains(&normalized.as_str()) {
        return None;
    }
    Some(dir.to_string())
}

pub(crate) fn is_annotation_document(relative: &str) -> bool {
    let lower = relative.to_lowercase();
    lower.ends_with(".json")
        && (lower.contains("comments") || lower.contains("reactions") || lower.contains("likes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn plan_rejects_missing_and_wrong_extension() {
        let dir = tempdir().expect("temp");
        let missing = dir.path().join("nope.zip");
        assert!(matches!(plan_import(&missing), Err(CoreError::InvalidArgument(_))));

        let wrong = dir.path().join("export.tar");
        fs::write(&wrong, b"data").expect("write");
        assert!(matches!(plan_import(&wrong), Err(CoreError::InvalidArgument(_))));

        let empty = dir.path().join("empty.zip");
        fs::File::create(&empty).expect("create");
        assert!(matches!(plan_import(&empty), Err(CoreError::InvalidArgument(_))));
    }

    #[test]
    fn plan_hashes_source() {
        let dir = tempdir().expect("temp");
        let path = dir.path().join("export.ZIP");
        let mut file = fs::File::create(&path).expect("create");
        file.write_all(b"abc").expect("write");
        let plan = plan_import(&path).expect("plan");
        assert_eq!(
            plan.source_hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(plan.source_filename, "export.ZIP");
        assert_eq!(plan.size_bytes, 3);
    }

    #[test]
    fn album_from_path_suppresses_technical_dirs() {
        assert_eq!(album_from_path("posts/media/Trip2019_abc/1.jpg").as_deref(), Some("Trip2019_abc"));
        assert_eq!(album_from_path("posts/media/your_posts/1.jpg"), None);
        assert_eq!(album_from_path("photos_and_videos/Uncategorized Photos/1.jpg"), None);
        assert_eq!(album_from_path("1.jpg"), None);
    }

    #[test]
    fn epoch_conversion_rejects_zero() {
        assert_eq!(epoch_to_utc(0.0), None);
        let ts = epoch_to_utc(1_600_000_000.0).expect("ts");
        assert_eq!(ts.to_rfc3339(), "2020-09-13T12:26:40+00:00");
    }

    #[test]
    fn media_kind_by_extension() {
        assert_eq!(media_kind_for("a/b.JPG"), Some(MediaKind::Photo));
        assert_eq!(media_kind_for("clip.mp4"), Some(MediaKind::Video));
        assert_eq!(media_kind_for("notes.json"), None);
        assert_eq!(format_bytes(2048), "2.0 KB");
    }
}
