use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::CoreError;
use crate::models::{GeoPoint, MediaOrigin, MediaRecord};
use crate::text::{fix_mojibake, fix_optional};

use super::{album_from_path, epoch_to_utc, is_annotation_document, ExtractionContext, ExtractionStrategy, RecordDraft};

/// Walks the export's JSON documents (posts, albums, flat media collections).
pub struct StructuredExtractor;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMedia {
    uri: String,
    creation_timestamp: Option<f64>,
    description: Option<String>,
    media_metadata: Option<RawMediaMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMediaMetadata {
    photo_metadata: Option<RawExifHolder>,
    video_metadata: Option<RawExifHolder>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawExifHolder {
    exif_data: Vec<RawCoordinate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCoordinate {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPlace {
    coordinate: Option<RawCoordinate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPost {
    timestamp: Option<f64>,
    data: Vec<RawPostData>,
    attachments: Vec<RawAttachment>,
    place: Option<RawPlace>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPostData {
    post: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAttachment {
    data: Vec<RawAttachmentData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAttachmentData {
    media: Option<RawMedia>,
    place: Option<RawPlace>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawAlbum {
    name: Option<String>,
    photos: Vec<RawMedia>,
}

/// The document shapes the export uses for media.
#[derive(Debug)]
enum MediaDocument {
    Posts(Vec<RawPost>),
    Album(RawAlbum),
    Collection(Vec<RawMedia>),
}

fn looks_like_media(item: &Value) -> bool {
    item.get("uri").map(Value::is_string).unwrap_or(false)
}

fn looks_like_post(item: &Value) -> bool {
    item.get("attachments").is_some() || item.get("data").is_some()
}

fn detect_array(items: Value) -> Result<Option<MediaDocument>, serde_json::Error> {
    let list = match items.as_array() {
        Some(list) if !list.is_empty() => list,
        _ => return Ok(None),
    };
    // a text-only post can come first, so look at every item
    if list.iter().any(looks_like_media) {
        return Ok(Some(MediaDocument::Collection(serde_json::from_value(items)?)));
    }
    if list.iter().any(looks_like_post) {
        return Ok(Some(MediaDocument::Posts(serde_json::from_value(items)?)));
    }
    Ok(None)
}

/// Classifies a parsed document. `Ok(None)` means it carries no media.
fn detect_shape(value: Value) -> Result<Option<MediaDocument>, serde_json::Error> {
    match value {
        Value::Array(_) => detect_array(value),
        Value::Object(map) => {
            if map.get("photos").map(Value::is_array).unwrap_or(false) {
                return Ok(Some(MediaDocument::Album(serde_json::from_value(Value::Object(map))?)));
            }
            for (_, items) in map.into_iter().filter(|(_, v)| v.is_array()) {
                if let Some(document) = detect_array(items)? {
                    return Ok(Some(document));
                }
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}

fn geo_from(coordinate: Option<&RawCoordinate>) -> Option<GeoPoint> {
    let coordinate = coordinate?;
    match (coordinate.latitude, coordinate.longitude) {
        (Some(latitude), Some(longitude)) => Some(GeoPoint { latitude, longitude }),
        _ => None,
    }
}

fn media_geo(media: &RawMedia) -> Option<GeoPoint> {
    let metadata = media.media_metadata.as_ref()?;
    let holder = metadata
        .photo_metadata
        .as_ref()
        .or(metadata.video_metadata.as_ref())?;
    holder.exif_data.iter().find_map(|exif| geo_from(Some(exif)))
}

impl StructuredExtractor {
    fn media_record(
        &self,
        ctx: &mut ExtractionContext<'_>,
        media: &RawMedia,
        mut draft: RecordDraft,
    ) -> Option<MediaRecord> {
        let entry = match ctx.resolver().resolve(&media.uri) {
            Some(entry) => entry,
            None => {
                debug!(uri = %media.uri, "media reference not found in archive");
                return None;
            }
        };
        if let Some(ts) = media.creation_timestamp.and_then(epoch_to_utc) {
            draft.created_at = Some(ts);
        }
        if let Some(description) = fix_optional(media.description.as_deref()) {
            draft.description = Some(description);
        }
        if draft.album.is_none() {
            draft.album = album_from_path(&media.uri).map(|a| fix_mojibake(&a));
        }
        if let Some(geo) = media_geo(media) {
            draft.geo = Some(geo);
        }
        ctx.materialize(&entry, draft)
    }

    fn extract_document(
        &self,
        ctx: &mut ExtractionContext<'_>,
        entry: &str,
        document: MediaDocument,
        is_story: bool,
    ) -> Vec<MediaRecord> {
        let mut records = Vec::new();
        match document {
            MediaDocument::Posts(posts) => {
                for post in posts {
                    let text = post.data.iter().find_map(|d| fix_optional(d.post.as_deref()));
                    let post_geo = geo_from(post.place.as_ref().and_then(|p| p.coordinate.as_ref()));
                    for data in post.attachments.iter().flat_map(|a| a.data.iter()) {
                        let media = match &data.media {
                            Some(media) => media,
                            None => continue,
                        };
                        let mut draft = RecordDraft::new(if is_story { MediaOrigin::Story } else { MediaOrigin::Post });
                        draft.created_at = post.timestamp.and_then(epoch_to_utc);
                        draft.description = text.clone();
                        draft.geo = geo_from(data.place.as_ref().and_then(|p| p.coordinate.as_ref())).or(post_geo);
                        records.extend(self.media_record(ctx, media, draft));
                    }
                }
            }
            MediaDocument::Album(album) => {
                let name = fix_optional(album.name.as_deref());
                for media in &album.photos {
                    let mut draft = RecordDraft::new(if is_story { MediaOrigin::Story } else { MediaOrigin::Album });
                    draft.album = name.clone();
                    records.extend(self.media_record(ctx, media, draft));
                }
            }
            MediaDocument::Collection(items) => {
                for media in &items {
                    let origin = if is_story { MediaOrigin::Story } else { MediaOrigin::Uncategorized };
                    records.extend(self.media_record(ctx, media, RecordDraft::new(origin)));
                }
            }
        }
        debug!(entry, records = records.len(), "structured document extracted");
        records
    }
}

impl ExtractionStrategy for StructuredExtractor {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn extract(&self, ctx: &mut ExtractionContext<'_>) -> Result<Vec<MediaRecord>, CoreError> {
        let prefix = ctx.root().prefix.clone();
        let documents: Vec<String> = ctx
            .documents(&["json"])
            .into_iter()
            .filter(|name| !is_annotation_document(&name[prefix.len()..]))
            .collect();
        let total = documents.len();
        let mut records = Vec::new();
        for (idx, entry) in documents.iter().enumerate() {
            if idx % 50 == 0 {
                ctx.progress(&format!("Reading export documents... {}/{}", idx, total));
            }
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
            let document = match detect_shape(value) {
                Ok(Some(document)) => document,
                Ok(None) => continue,
                Err(err) => {
                    ctx.skip(entry, &format!("unexpected document shape: {}", err));
                    continue;
                }
            };
            let is_story = entry[prefix.len()..].to_lowercase().contains("stories");
            records.extend(self.extract_document(ctx, entry, document, is_story));
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detects_three_media_shapes() {
        let posts = json!([{ "timestamp": 1, "attachments": [] }]);
        assert!(matches!(detect_shape(posts), Ok(Some(MediaDocument::Posts(_)))));

        let album = json!({ "name": "Trip", "photos": [{ "uri": "a.jpg" }] });
        assert!(matches!(detect_shape(album), Ok(Some(MediaDocument::Album(_)))));

        let collection = json!({ "other_photos_v2": [{ "uri": "a.jpg", "creation_timestamp": 5 }] });
        assert!(matches!(detect_shape(collection), Ok(Some(MediaDocument::Collection(_)))));

        let wrapped_posts = json!({ "posts_v2": [{ "data": [{ "post": "hi" }] }] });
        assert!(matches!(detect_shape(wrapped_posts), Ok(Some(MediaDocument::Posts(_)))));
    }

    #[test]
    fn text_only_first_post_still_detects_posts() {
        let posts = json!([
            { "timestamp": 1, "title": "status update" },
            { "timestamp": 2, "attachments": [{ "data": [{ "media": { "uri": "a.jpg" } }] }] }
        ]);
        match detect_shape(posts) {
            Ok(Some(MediaDocument::Posts(posts))) => assert_eq!(posts.len(), 2),
            other => panic!("unexpected {:?}", other.map(|d| d.is_some())),
        }

        let collection = json!([{ "title": "no uri" }, { "uri": "b.jpg" }]);
        assert!(matches!(detect_shape(collection), Ok(Some(MediaDocument::Collection(_)))));
    }

    #[test]
    fn later_media_array_wins_over_earlier_non_media_one() {
        let doc = json!({
            "a_labels": [{ "label": "x" }],
            "videos_v2": [{ "uri": "v.mp4", "creation_timestamp": 5 }]
        });
        match detect_shape(doc) {
            Ok(Some(MediaDocument::Collection(items))) => assert_eq!(items.len(), 1),
            other => panic!("unexpected {:?}", other.map(|d| d.is_some())),
        }
    }

    #[test]
    fn non_media_documents_are_ignored() {
        assert!(matches!(detect_shape(json!({ "profile_v2": { "name": "x" } })), Ok(None)));
        assert!(matches!(detect_shape(json!([])), Ok(None)));
        assert!(matches!(detect_shape(json!("text")), Ok(None)));
    }

    #[test]
    fn wrong_field_types_are_errors() {
        let bad = json!({ "name": "Trip", "photos": [{ "uri": 5 }] });
        assert!(detect_shape(bad).is_err());
    }

    #[test]
    fn geo_from_exif() {
        let media: RawMedia = serde_json::from_value(json!({
            "uri": "a.jpg",
            "media_metadata": { "photo_metadata": { "exif_data": [{ "iso": 100 }, { "latitude": 1.5, "longitude": -2.0 }] } }
        }))
        .expect("media");
        assert_eq!(media_geo(&media), Some(GeoPoint { latitude: 1.5, longitude: -2.0 }));
    }
}
