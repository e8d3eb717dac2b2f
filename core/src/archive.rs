use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use zip::ZipArchive;

use crate::error::CoreError;

const MAX_PREALLOC: usize = 16 * 1024 * 1024;

const ACTIVITY_MARKERS: &[&str] = &["your_facebook_activity", "your_activity_across_facebook"];

pub const DATA_FOLDERS: &[&str] = &[
    "posts",
    "photos_and_videos",
    "albums",
    "comments_and_reactions",
    "likes_and_reactions",
    "stories",
];

/// Directories, relative to the located root, where exports keep media files.
pub const MEDIA_DIRS: &[&str] = &[
    "posts/media",
    "photos_and_videos",
    "media",
    "photos",
    "videos",
    "your_photos",
    "your_videos",
];

/// Anything that can list entry names and hand back entry bytes.
pub trait EntrySource {
    fn names(&self) -> &[String];
    fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, CoreError>;
}

pub struct ExportArchive<R: Read + Seek> {
    zip: ZipArchive<R>,
    names: Vec<String>,
}

impl ExportArchive<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(file)
    }
}

impl<R: Read + Seek> ExportArchive<R> {
    pub fn from_reader(reader: R) -> Result<Self, CoreError> {
        let mut zip = ZipArchive::new(reader)?;
        let mut names = Vec::with_capacity(zip.len());
        for idx in 0..zip.len() {
            let entry = zip.by_index_raw(idx)?;
            if entry.is_dir() {
                continue;
            }
            names.push(entry.name().to_string());
        }
        names.sort();
        Ok(Self { zip, names })
    }
}

impl<R: Read + Seek> EntrySource for ExportArchive<R> {
    fn names(&self) -> &[String] {
        &self.names
    }

    fn read_entry(&mut self, name: &str) -> Result<Vec<u8>, CoreError> {
        let mut entry = self.zip.by_name(name)?;
        // the declared size comes from the zip header and is not trusted
        let mut buf = Vec::with_capacity((entry.size() as usize).min(MAX_PREALLOC));
        entry.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootRule {
    ActivityDir,
    WrapperWithData,
    NestedDataDir,
    Wrapper,
    ArchiveRoot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedRoot {
    pub prefix: String,
    pub rule: RootRule,
}

impl LocatedRoot {
    pub fn at_root() -> Self {
        Self {
            prefix: String::new(),
            rule: RootRule::ArchiveRoot,
        }
    }

    /// First path component of the prefix, with its trailing slash.
    pub fn outer(&self) -> &str {
        match self.prefix.find('/') {
            Some(idx) => &self.prefix[..=idx],
            None => "",
        }
    }

    /// The entry name below the root, or `None` if it lies outside it.
    pub fn relative<'a>(&self, name: &'a str) -> Option<&'a str> {
        name.strip_prefix(self.prefix.as_str())
    }
}

fn normalize_dir(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

fn is_activity_dir(name: &str) -> bool {
    let normalized = normalize_dir(name);
    ACTIVITY_MARKERS.iter().any(|m| normalized.contains(m))
}

fn is_data_folder(name: &str) -> bool {
    let normalized = normalize_dir(name);
    DATA_FOLDERS.iter().any(|f| normalized == *f)
}

fn pick_longest(candidates: &BTreeSet<String>) -> Option<String> {
    // BTreeSet iterates in order, so the first of equal length wins
    let mut best: Option<&String> = None;
    for candidate in candidates {
        if best.map(|b| candidate.len() > b.len()).unwrap_or(true) {
            best = Some(candidate);
        }
    }
    best.cloned()
}

/// Works out where the export content starts from entry names alone.
pub fn locate_root<S: AsRef<str>>(names: &[S]) -> LocatedRoot {
    let mut top_dirs: BTreeSet<String> = BTreeSet::new();
    let mut files_at_root = false;
    let mut activity_at: [BTreeSet<String>; 2] = [BTreeSet::new(), BTreeSet::new()];
    let mut data_at_root = false;
    // prefixes whose direct child is a data folder, by prefix depth
    let mut data_under: [BTreeSet<String>; 2] = [BTreeSet::new(), BTreeSet::new()];

    for name in names {
        let name = name.as_ref();
        if name.ends_with('/') || name.starts_with("__MACOSX") {
            continue;
        }
        let parts: Vec<&str> = name.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() < 2 {
            files_at_root = true;
            continue;
        }
        top_dirs.insert(parts[0].to_string());
        if is_activity_dir(parts[0]) {
            activity_at[0].insert(format!("{}/", parts[0]));
        }
        if is_data_folder(parts[0]) {
            data_at_root = true;
        }
        if parts.len() >= 3 {
            if is_activity_dir(parts[1]) {
                activity_at[1].insert(format!("{}/{}/", parts[0], parts[1]));
            }
            if is_data_folder(parts[1]) {
                data_under[0].insert(format!("{}/", parts[0]));
            }
        }
        if parts.len() >= 4 && is_data_folder(parts[2]) {
            data_under[1].insert(format!("{}/{}/", parts[0], parts[1]));
        }
    }

    let wrapper = if !files_at_root && top_dirs.len() == 1 {
        top_dirs.iter().next().map(|d| format!("{}/", d))
    } else {
        None
    };

    match wrapper {
        Some(wrapper) => {
            if activity_at[0].contains(&wrapper) {
                return LocatedRoot {
                    prefix: wrapper,
                    rule: RootRule::ActivityDir,
                };
            }
            if let Some(prefix) = pick_longest(&activity_at[1]) {
                return LocatedRoot {
                    prefix,
                    rule: RootRule::ActivityDir,
                };
            }
            if data_under[0].contains(&wrapper) {
                return LocatedRoot {
                    prefix: wrapper,
                    rule: RootRule::WrapperWithData,
                };
            }
            if let Some(prefix) = pick_longest(&data_under[1]) {
                return LocatedRoot {
                    prefix,
                    rule: RootRule::NestedDataDir,
                };
            }
            LocatedRoot {
                prefix: wrapper,
                rule: RootRule::Wrapper,
            }
        }
        None => {
            if let Some(prefix) = pick_longest(&activity_at[0]) {
                return LocatedRoot {
                    prefix,
                    rule: RootRule::ActivityDir,
                };
            }
            if data_at_root {
                return LocatedRoot::at_root();
            }
            if let Some(prefix) = pick_longest(&data_under[0]) {
                return LocatedRoot {
                    prefix,
                    rule: RootRule::NestedDataDir,
                };
            }
            LocatedRoot::at_root()
        }
    }
}

pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn normalize_reference(reference: &str) -> String {
    let mut cleaned = reference.trim().replace('\\', "/");
    while let Some(stripped) = cleaned.strip_prefix("./") {
        cleaned = stripped.to_string();
    }
    cleaned.trim_start_matches('/').to_string()
}

/// Maps the loose media references found in export documents to entries.
pub struct MediaResolver {
    entries: HashSet<String>,
    root: LocatedRoot,
}

impl MediaResolver {
    pub fn new<S: AsRef<str>>(names: &[S], root: LocatedRoot) -> Self {
        let entries = names.iter().map(|n| n.as_ref().to_string()).collect();
        Self { entries, root }
    }

    pub fn root(&self) -> &LocatedRoot {
        &self.root
    }

    pub fn resolve(&self, reference: &str) -> Option<String> {
        let reference = normalize_reference(reference);
        if reference.is_empty() {
            return None;
        }
        let prefix = self.root.prefix.as_str();
        let outer = self.root.outer();
        let base = file_name(&reference);

        let mut candidates = vec![format!("{}{}", prefix, reference), reference.clone()];
        if !outer.is_empty() && outer != prefix {
            candidates.push(format!("{}{}", outer, reference));
        }
        for dir in MEDIA_DIRS {
            candidates.push(format!("{}{}/{}", prefix, dir, base));
        }
        if !outer.is_empty() && outer != prefix {
            for dir in MEDIA_DIRS {
                candidates.push(format!("{}{}/{}", outer, dir, base));
            }
        }
        candidates.into_iter().find(|c| self.entries.contains(c))
    }
}
