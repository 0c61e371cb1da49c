//! Tag file I/O through `lofty`.
//!
//! Reading translates every native item through [`TagSchema::canonical`]; writing goes
//! through [`TagSchema::native`]. Track and disc numbers use lofty's accessors since each
//! format splits "n of m" differently (`TRCK`, `TRACKNUMBER`/`TRACKTOTAL`, `trkn`).

use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use lofty::{
    Accessor, AudioFile, ItemKey, ItemValue, Picture, PictureType, Probe, Tag, TagItem,
    TaggedFile, TaggedFileExt,
};

use super::{CanonicalKey, FieldError, MetaValue, MetadataContainer, TagReport, TagSchema};
use crate::diagnostics::{Diagnostics, Level};
use crate::types::CodecKind;

const COMPONENT: &str = "tags";

/// Encoded image plus a sniffed MIME type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Artwork {
    pub data: Vec<u8>,
    pub mime: &'static str,
}

impl Artwork {
    pub fn new(data: Vec<u8>) -> Self {
        let mime = sniff_mime(&data);
        Self { data, mime }
    }
}

/// MIME type from image magic bytes.
pub fn sniff_mime(data: &[u8]) -> &'static str {
    if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if data.starts_with(b"GIF8") {
        "image/gif"
    } else if data.starts_with(b"BM") {
        "image/bmp"
    } else {
        "application/octet-stream"
    }
}

fn open_tagged(path: &Path) -> Result<TaggedFile> {
    Probe::open(path)
        .with_context(|| format!("open {:?}", path))?
        .guess_file_type()
        .with_context(|| format!("probe {:?}", path))?
        .read()
        .with_context(|| format!("read tags {:?}", path))
}

fn is_number_key(key: &ItemKey) -> bool {
    matches!(
        key,
        ItemKey::TrackNumber | ItemKey::TrackTotal | ItemKey::DiscNumber | ItemKey::DiscTotal
    )
}

/// Read the codec-native tag of `path` into canonical form.
///
/// Best effort: an unreadable file or tag yields an empty container plus a diagnostic.
pub fn read_metadata(path: &Path, kind: CodecKind, diag: &Diagnostics) -> MetadataContainer {
    let Some(preferred) = TagSchema::for_kind(kind) else {
        return MetadataContainer::new();
    };
    let tagged = match open_tagged(path) {
        Ok(t) => t,
        Err(err) => {
            diag.warn(COMPONENT, format!("{err:#}"));
            return MetadataContainer::new();
        }
    };

    let tag = tagged
        .tag(preferred.tag_type())
        .or_else(|| tagged.primary_tag())
        .or_else(|| tagged.first_tag());
    tag.map(|t| tag_to_container(t, diag)).unwrap_or_default()
}

/// Translate every item of `tag` through the schema of its tag type.
fn tag_to_container(tag: &Tag, diag: &Diagnostics) -> MetadataContainer {
    let mut container = MetadataContainer::new();
    let tag_type = tag.tag_type();
    let Some(schema) = TagSchema::from_tag_type(tag_type) else {
        diag.warn(COMPONENT, format!("no translation table for {tag_type:?}"));
        return container;
    };

    for item in tag.items() {
        if is_number_key(item.key()) {
            continue;
        }
        let Some(native) = item.key().map_key(tag_type, true) else {
            continue;
        };
        let Some(key) = schema.canonical(native) else {
            continue;
        };
        if schema.is_reserved(native) && container.contains(key) {
            continue;
        }
        match item.value() {
            ItemValue::Text(text) | ItemValue::Locator(text) => {
                container.insert_parsed(key, text);
            }
            ItemValue::Binary(_) => {
                diag.record(
                    Level::Debug,
                    COMPONENT,
                    format!("{native}: binary value skipped"),
                );
            }
        }
    }

    let numbers = [
        (CanonicalKey::Track, tag.track()),
        (CanonicalKey::Tracks, tag.track_total()),
        (CanonicalKey::Disc, tag.disk()),
        (CanonicalKey::Discs, tag.disk_total()),
    ];
    for (key, value) in numbers {
        if let Some(v) = value {
            container.insert(key, i64::from(v));
        }
    }

    container
}

fn number_value(value: &MetaValue) -> Result<u32, String> {
    value
        .as_int()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| format!("'{value}' is not a non-negative integer"))
}

/// Write every field of `container` into the codec-native tag of `path`.
///
/// Synthesized keys are skipped, keys with no native mapping are reported as unmapped,
/// and per-field failures are collected without aborting the remaining fields.
/// Only failing to open or save the file is an error.
pub fn write_metadata(
    path: &Path,
    kind: CodecKind,
    container: &MetadataContainer,
    diag: &Diagnostics,
) -> Result<TagReport> {
    let schema =
        TagSchema::for_kind(kind).ok_or_else(|| anyhow!("{kind} files carry no tags"))?;
    let tag_type = schema.tag_type();
    let mut tagged = open_tagged(path)?;
    if tagged.tag(tag_type).is_none() {
        tagged.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged
        .tag_mut(tag_type)
        .context("create tag container")?;

    let report = fill_tag(tag, schema, container, diag);

    tagged
        .save_to_path(path)
        .with_context(|| format!("write tags {:?}", path))?;
    tracing::debug!(
        path = %path.display(),
        written = report.written.len(),
        failed = report.failed.len(),
        "tags written"
    );
    Ok(report)
}

/// Write every field of `container` into `tag` through `schema`.
fn fill_tag(
    tag: &mut Tag,
    schema: TagSchema,
    container: &MetadataContainer,
    diag: &Diagnostics,
) -> TagReport {
    let tag_type = schema.tag_type();
    let mut report = TagReport::default();
    for (key, value) in container.iter() {
        if key.is_synthesized() {
            continue;
        }
        let outcome = match key {
            CanonicalKey::Track => number_value(value).map(|n| tag.set_track(n)),
            CanonicalKey::Tracks => number_value(value).map(|n| tag.set_track_total(n)),
            CanonicalKey::Disc => number_value(value).map(|n| tag.set_disk(n)),
            CanonicalKey::Discs => number_value(value).map(|n| tag.set_disk_total(n)),
            _ => {
                let Some(native) = schema.native(key) else {
                    report.unmapped.push(key);
                    continue;
                };
                let item_key = ItemKey::from_key(tag_type, native);
                let text = value.to_string();
                if tag.insert_text(item_key.clone(), text.clone())
                    || tag.insert(TagItem::new(item_key, ItemValue::Text(text)))
                {
                    Ok(())
                } else {
                    Err(format!("{native} rejected by {tag_type:?} tag"))
                }
            }
        };
        match outcome {
            Ok(()) => report.written.push(key),
            Err(reason) => {
                diag.warn(COMPONENT, format!("{key}: {reason}"));
                report.failed.push(FieldError {
                    key: key.to_string(),
                    reason,
                });
            }
        }
    }
    report
}

/// Front cover (or first picture) from the native tag.
pub fn read_artwork(path: &Path, kind: CodecKind, diag: &Diagnostics) -> Option<Artwork> {
    if kind.is_pcm() {
        return None;
    }
    let schema = TagSchema::for_kind(kind)?;
    let tagged = match open_tagged(path) {
        Ok(t) => t,
        Err(err) => {
            diag.warn(COMPONENT, format!("{err:#}"));
            return None;
        }
    };
    let tag = tagged
        .tag(schema.tag_type())
        .or_else(|| tagged.primary_tag())?;
    let pictures = tag.pictures();
    let picture = pictures
        .iter()
        .find(|p| p.pic_type() == PictureType::CoverFront)
        .or_else(|| pictures.first())?;
    Some(Artwork::new(picture.data().to_vec()))
}

/// Replace the front cover. Uncompressed PCM containers ignore artwork.
pub fn write_artwork(path: &Path, kind: CodecKind, art: &Artwork, diag: &Diagnostics) -> Result<()> {
    if kind.is_pcm() {
        return Ok(());
    }
    let schema =
        TagSchema::for_kind(kind).ok_or_else(|| anyhow!("{kind} files carry no artwork"))?;
    let tag_type = schema.tag_type();
    let mut picture = Picture::from_reader(&mut Cursor::new(art.data.as_slice()))
        .with_context(|| format!("artwork is not a supported image ({})", art.mime))?;
    picture.set_pic_type(PictureType::CoverFront);

    let mut tagged = open_tagged(path)?;
    if tagged.tag(tag_type).is_none() {
        tagged.insert_tag(Tag::new(tag_type));
    }
    let tag = tagged
        .tag_mut(tag_type)
        .context("create tag container")?;
    tag.remove_picture_type(PictureType::CoverFront);
    tag.push_picture(picture);
    tagged
        .save_to_path(path)
        .with_context(|| format!("write artwork {:?}", path))?;
    diag.record(
        Level::Debug,
        COMPONENT,
        format!("artwork written to {}", path.display()),
    );
    Ok(())
}

/// Track loudness normalization value in dB, falling back to the album value.
///
/// Scans every tag in the file; the key match is a case-insensitive substring test so
/// `REPLAYGAIN_TRACK_GAIN`, `TXXX:replaygain_track_gain` and iTunes freeform atoms all hit.
pub fn read_replay_gain(path: &Path, diag: &Diagnostics) -> Option<f32> {
    let tagged = match open_tagged(path) {
        Ok(t) => t,
        Err(err) => {
            diag.record(Level::Debug, COMPONENT, format!("{err:#}"));
            return None;
        }
    };
    let mut album = None;
    for tag in tagged.tags() {
        let tag_type = tag.tag_type();
        for item in tag.items() {
            let label = match item.key() {
                ItemKey::ReplayGainTrackGain => "replaygain_track_gain".to_string(),
                ItemKey::ReplayGainAlbumGain => "replaygain_album_gain".to_string(),
                other => other
                    .map_key(tag_type, true)
                    .unwrap_or_default()
                    .to_ascii_lowercase(),
            };
            let Some(text) = item.value().text() else {
                continue;
            };
            if label.contains("replaygain_track_gain") {
                if let Some(gain) = parse_gain_token(text) {
                    return Some(gain);
                }
            } else if label.contains("replaygain_album_gain") && album.is_none() {
                album = parse_gain_token(text);
            }
        }
    }
    album
}

/// First floating-point token in `text` (`"-7.03 dB"`, `"+1.5"`, `"gain 2"`).
pub fn parse_gain_token(text: &str) -> Option<f32> {
    let normalized = text.replace('\u{2212}', "-");
    let bytes = normalized.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        let starts_number = c.is_ascii_digit()
            || ((c == b'-' || c == b'+' || c == b'.')
                && bytes.get(i + 1).is_some_and(|n| n.is_ascii_digit()));
        if starts_number {
            let mut end = i + 1;
            let mut seen_dot = c == b'.';
            while end < bytes.len() {
                let b = bytes[end];
                if b.is_ascii_digit() {
                    end += 1;
                } else if b == b'.' && !seen_dot {
                    seen_dot = true;
                    end += 1;
                } else {
                    break;
                }
            }
            return normalized[i..end].trim_end_matches('.').parse().ok();
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gain_tokens() {
        assert_eq!(parse_gain_token("-7.03 dB"), Some(-7.03));
        assert_eq!(parse_gain_token("+1.50 dB"), Some(1.5));
        assert_eq!(parse_gain_token("gain: 2"), Some(2.0));
        assert_eq!(parse_gain_token("\u{2212}3.5 dB"), Some(-3.5));
        assert_eq!(parse_gain_token(".5"), Some(0.5));
        assert_eq!(parse_gain_token("3. dB"), Some(3.0));
        assert_eq!(parse_gain_token("dB"), None);
        assert_eq!(parse_gain_token("- dB"), None);
    }

    #[test]
    fn mime_sniffing() {
        assert_eq!(sniff_mime(&[0x89, b'P', b'N', b'G', 0x0D]), "image/png");
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(sniff_mime(b"GIF89a"), "image/gif");
        assert_eq!(sniff_mime(b"????"), "application/octet-stream");
    }

    #[test]
    fn unreadable_file_yields_empty_container() {
        let diag = Diagnostics::new();
        let path = Path::new("/nonexistent/tonearm/missing.flac");
        let meta = read_metadata(path, CodecKind::Flac, &diag);
        assert!(meta.is_empty());
        assert!(!diag.is_empty());
        assert_eq!(read_replay_gain(path, &diag), None);
        assert!(read_artwork(path, CodecKind::Flac, &diag).is_none());
    }

    #[test]
    fn year_forms_survive_every_schema() {
        let diag = Diagnostics::new();
        let forms = [
            ("1959-08-17", MetaValue::Int(1959)),
            ("1987", MetaValue::Int(1987)),
            ("circa 1970", MetaValue::Text("circa 1970".to_string())),
        ];
        for schema in TagSchema::ALL {
            for (raw, expected) in &forms {
                let mut container = MetadataContainer::new();
                container.insert(CanonicalKey::Year, *raw);
                let mut tag = Tag::new(schema.tag_type());
                let report = fill_tag(&mut tag, schema, &container, &diag);
                assert_eq!(report.written, vec![CanonicalKey::Year], "{schema:?} {raw}");

                let back = tag_to_container(&tag, &diag);
                assert_eq!(back.get(CanonicalKey::Year), Some(expected), "{schema:?} {raw}");
            }
        }
    }

    #[test]
    fn pcm_artwork_is_a_no_op() {
        let diag = Diagnostics::new();
        let art = Artwork::new(vec![0x89, b'P', b'N', b'G']);
        let path = Path::new("/nonexistent/tonearm/missing.wav");
        assert!(write_artwork(path, CodecKind::Wav, &art, &diag).is_ok());
        assert!(read_artwork(path, CodecKind::Aiff, &diag).is_none());
    }
}
