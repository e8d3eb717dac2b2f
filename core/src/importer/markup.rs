use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use tracing::debug;

use crate::archive::file_name;
use crate::error::CoreError;
use crate::models::{MediaOrigin, MediaRecord};
use crate::text::decode_html_entities;

use super::{album_from_path, ExtractionContext, ExtractionStrategy, RecordDraft};

/// Fallback for legacy exports that only ship HTML pages.
pub struct MarkupExtractor;

fn img_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?is)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["'][^>]*>"#).expect("img regex"))
}

fn title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title regex"))
}

fn paragraph_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<p\b[^>]*>(.*?)</p>").expect("paragraph regex"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex"))
}

fn timestamp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b([A-Z][a-z]{2}) (\d{1,2}), (\d{4}),? (\d{1,2}):(\d{2})(?::(\d{2}))? ?([AaPp][Mm])\b")
            .expect("timestamp regex")
    })
}

fn month_number(abbrev: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = ["Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec"];
    MONTHS.iter().position(|m| *m == abbrev).map(|idx| idx as u32 + 1)
}

/// Parses the page timestamp format, e.g. `Jan 05, 2019, 3:15 PM`, as UTC.
pub(crate) fn parse_page_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let caps = timestamp_re().captures(text)?;
    let month = month_number(&caps[1])?;
    let day: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    let hour12: u32 = caps[4].parse().ok()?;
    let minute: u32 = caps[5].parse().ok()?;
    let second: u32 = caps.get(6).map(|m| m.as_str().parse().ok()).unwrap_or(Some(0))?;
    if !(1..=12).contains(&hour12) {
        return None;
    }
    let pm = caps[7].eq_ignore_ascii_case("pm");
    let hour = match (hour12, pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, false) => h,
        (h, true) => h + 12,
    };
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    Some(naive.and_utc())
}

fn plain_text(fragment: &str) -> String {
    let stripped = tag_re().replace_all(fragment, " ");
    let decoded = decode_html_entities(&stripped);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One `<img>` and the markup that follows it up to the next image.
struct Section<'a> {
    src: String,
    body: &'a str,
}

fn sections(html: &str) -> Vec<Section<'_>> {
    let matches: Vec<_> = img_re().captures_iter(html).collect();
    let mut out = Vec::with_capacity(matches.len());
    for (idx, caps) in matches.iter().enumerate() {
        let whole = match caps.get(0) {
            Some(m) => m,
            None => continue,
        };
        let end = matches
            .get(idx + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(html.len());
        out.push(Section {
            src: decode_html_entities(&caps[1]),
            body: &html[whole.end()..end],
        });
    }
    out
}

fn page_title(html: &str) -> Option<String> {
    let caps = title_re().captures(html)?;
    let title = plain_text(&caps[1]);
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

#[derive(Debug, Default)]
struct Caption {
    text: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

fn is_caption_page(relative: &str) -> bool {
    relative.to_lowercase().contains("caption")
}

fn caption_entries(html: &str) -> Vec<(String, Caption)> {
    sections(html)
        .into_iter()
        .map(|section| {
            let text = plain_text(section.body);
            let text = timestamp_re().replace_all(&text, "").trim().to_string();
            let caption = Caption {
                text: if text.is_empty() { None } else { Some(text) },
                timestamp: parse_page_timestamp(section.body),
            };
            (file_name(&section.src).to_string(), caption)
        })
        .collect()
}

impl MarkupExtractor {
    fn extract_page(&self, ctx: &mut ExtractionContext<'_>, entry: &str, html: &str) -> Vec<MediaRecord> {
        let title = page_title(html);
        let mut records = Vec::new();
        for section in sections(html) {
            let resolved = match ctx.resolver().resolve(&section.src) {
                Some(resolved) => resolved,
                None => {
                    debug!(entry, src = %section.src, "image reference not found in archive");
                    continue;
                }
            };
            let mut draft = RecordDraft::new(MediaOrigin::Markup);
            draft.created_at = parse_page_timestamp(section.body);
            draft.description = paragraph_re()
                .captures(section.body)
                .map(|caps| plain_text(&caps[1]))
                .filter(|text| !text.is_empty());
            draft.album = title.clone().or_else(|| album_from_path(&section.src));
            records.extend(ctx.materialize(&resolved, draft));
        }
        records
    }
}

impl ExtractionStrategy for MarkupExtractor {
    fn name(&self) -> &'static str {
        "markup"
    }

    fn extract(&self, ctx: &mut ExtractionContext<'_>) -> Result<Vec<MediaRecord>, CoreError> {
        let prefix_len = ctx.root().prefix.len();
        let pages = ctx.documents(&["html", "htm"]);
        let mut records = Vec::new();
        let mut captions: HashMap<String, Caption> = HashMap::new();
        for entry in &pages {
            let bytes = match ctx.read_document(entry) {
                Some(bytes) => bytes,
                None => continue,
            };
            let html = match String::from_utf8(bytes) {
                Ok(html) => html,
                Err(_) => {
                    ctx.skip(entry, "page is not valid utf-8");
                    continue;
                }
            };
            if is_caption_page(&entry[prefix_len..]) {
                for (name, caption) in caption_entries(&html) {
                    captions.entry(name).or_insert(caption);
                }
            } else {
                records.extend(self.extract_page(ctx, entry, &html));
            }
        }

        for record in records.iter_mut() {
            let caption = match captions.get(&record.filename) {
                Some(caption) => caption,
                None => continue,
            };
            if record.description.is_none() {
                record.description = caption.text.clone();
            }
            if record.created_at.is_none() {
                record.created_at = caption.timestamp;
            }
        }
        Ok(records)
    }
}
