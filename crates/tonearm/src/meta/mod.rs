//! Codec-independent metadata.
//!
//! A [`MetadataContainer`] maps [`CanonicalKey`]s to typed values. Decoders fill it from
//! whatever tag format their container uses (see [`schema`]) and encoders write it back
//! through the reverse tables. Tag file I/O lives in [`tags`].

pub mod schema;
pub mod tags;
pub mod vbr;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};

pub use schema::TagSchema;
pub use tags::Artwork;
pub use vbr::VbrFlag;

/// Identifier written into the `Encoder` field of every converted file.
pub const ENCODER_ID: &str = "Tonearm";

/// The single key vocabulary the rest of the system understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CanonicalKey {
    Title,
    Artist,
    Album,
    AlbumArtist,
    Track,
    Tracks,
    Disc,
    Discs,
    Year,
    GenreString,
    Comment,
    Lyrics,
    Composer,
    Publisher,
    Copyright,
    Encoder,
    Producer,
    Bpm,
    Rating,
    Arranger,
    IsCompilation,
    TitleSort,
    ArtistSort,
    AlbumSort,
    AlbumArtistSort,
    ComposerSort,
    /// Synthesized from header inspection: `yes`, `no` or `unknown`.
    Vbr,
    /// Synthesized: average bit rate in kbit/s.
    BitRate,
    /// Synthesized: sample rate in Hz.
    SampleRate,
}

impl CanonicalKey {
    pub const ALL: [CanonicalKey; 29] = [
        CanonicalKey::Title,
        CanonicalKey::Artist,
        CanonicalKey::Album,
        CanonicalKey::AlbumArtist,
        CanonicalKey::Track,
        CanonicalKey::Tracks,
        CanonicalKey::Disc,
        CanonicalKey::Discs,
        CanonicalKey::Year,
        CanonicalKey::GenreString,
        CanonicalKey::Comment,
        CanonicalKey::Lyrics,
        CanonicalKey::Composer,
        CanonicalKey::Publisher,
        CanonicalKey::Copyright,
        CanonicalKey::Encoder,
        CanonicalKey::Producer,
        CanonicalKey::Bpm,
        CanonicalKey::Rating,
        CanonicalKey::Arranger,
        CanonicalKey::IsCompilation,
        CanonicalKey::TitleSort,
        CanonicalKey::ArtistSort,
        CanonicalKey::AlbumSort,
        CanonicalKey::AlbumArtistSort,
        CanonicalKey::ComposerSort,
        CanonicalKey::Vbr,
        CanonicalKey::BitRate,
        CanonicalKey::SampleRate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalKey::Title => "Title",
            CanonicalKey::Artist => "Artist",
            CanonicalKey::Album => "Album",
            CanonicalKey::AlbumArtist => "AlbumArtist",
            CanonicalKey::Track => "Track",
            CanonicalKey::Tracks => "Tracks",
            CanonicalKey::Disc => "Disc",
            CanonicalKey::Discs => "Discs",
            CanonicalKey::Year => "Year",
            CanonicalKey::GenreString => "GenreString",
            CanonicalKey::Comment => "Comment",
            CanonicalKey::Lyrics => "Lyrics",
            CanonicalKey::Composer => "Composer",
            CanonicalKey::Publisher => "Publisher",
            CanonicalKey::Copyright => "Copyright",
            CanonicalKey::Encoder => "Encoder",
            CanonicalKey::Producer => "Producer",
            CanonicalKey::Bpm => "BPM",
            CanonicalKey::Rating => "Rating",
            CanonicalKey::Arranger => "Arranger",
            CanonicalKey::IsCompilation => "IsCompilation",
            CanonicalKey::TitleSort => "TitleSort",
            CanonicalKey::ArtistSort => "ArtistSort",
            CanonicalKey::AlbumSort => "AlbumSort",
            CanonicalKey::AlbumArtistSort => "AlbumArtistSort",
            CanonicalKey::ComposerSort => "ComposerSort",
            CanonicalKey::Vbr => "VBR",
            CanonicalKey::BitRate => "bitRate",
            CanonicalKey::SampleRate => "sampleRate",
        }
    }

    /// Case-insensitive lookup by canonical name.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(name))
    }

    /// Keys whose values are stored as integers.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            CanonicalKey::Track
                | CanonicalKey::Tracks
                | CanonicalKey::Disc
                | CanonicalKey::Discs
                | CanonicalKey::Bpm
                | CanonicalKey::Rating
                | CanonicalKey::BitRate
                | CanonicalKey::SampleRate
        )
    }

    /// Keys computed from the stream rather than read from tags; never written back.
    pub fn is_synthesized(self) -> bool {
        matches!(
            self,
            CanonicalKey::Vbr | CanonicalKey::BitRate | CanonicalKey::SampleRate
        )
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metadata value: integer or string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MetaValue {
    Int(i64),
    Text(String),
}

impl MetaValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetaValue::Int(v) => Some(*v),
            MetaValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Int(v) => write!(f, "{v}"),
            MetaValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self {
        MetaValue::Int(v)
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self {
        MetaValue::Text(v.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self {
        MetaValue::Text(v)
    }
}

/// Typed canonical-key map.
///
/// Empty strings are never stored: inserting one removes the key, so "absent" and
/// "empty" cannot be told apart by consumers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetadataContainer {
    entries: BTreeMap<CanonicalKey, MetaValue>,
}

impl MetadataContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: CanonicalKey, value: impl Into<MetaValue>) {
        match value.into() {
            MetaValue::Text(s) if s.trim().is_empty() => {
                self.entries.remove(&key);
            }
            value => {
                self.entries.insert(key, value);
            }
        }
    }

    /// Insert a raw textual value, coercing it the way `key` expects.
    ///
    /// Integer keys accept `n` or `n/m`; `Year` goes through [`normalize_year`].
    /// Returns the value that was stored (if any).
    pub fn insert_parsed(&mut self, key: CanonicalKey, raw: &str) -> Option<MetaValue> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let value = if key == CanonicalKey::Year {
            normalize_year(raw)
        } else if key.is_integer() {
            match parse_number_pair(raw) {
                Some((n, total)) => {
                    if let (Some(total), Some(total_key)) = (total, pair_total_key(key)) {
                        if !self.contains(total_key) {
                            self.entries.insert(total_key, MetaValue::Int(total));
                        }
                    }
                    MetaValue::Int(n)
                }
                None => MetaValue::Text(raw.to_string()),
            }
        } else {
            MetaValue::Text(raw.to_string())
        };
        self.entries.insert(key, value.clone());
        Some(value)
    }

    pub fn get(&self, key: CanonicalKey) -> Option<&MetaValue> {
        self.entries.get(&key)
    }

    pub fn text(&self, key: CanonicalKey) -> Option<String> {
        self.get(key).map(|v| v.to_string())
    }

    pub fn int(&self, key: CanonicalKey) -> Option<i64> {
        self.get(key).and_then(MetaValue::as_int)
    }

    pub fn contains(&self, key: CanonicalKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn remove(&mut self, key: CanonicalKey) -> Option<MetaValue> {
        self.entries.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CanonicalKey, &MetaValue)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }
}

fn pair_total_key(key: CanonicalKey) -> Option<CanonicalKey> {
    match key {
        CanonicalKey::Track => Some(CanonicalKey::Tracks),
        CanonicalKey::Disc => Some(CanonicalKey::Discs),
        _ => None,
    }
}

/// Parse `n` or `n/m`. Returns `None` when `n` is not an integer.
pub fn parse_number_pair(raw: &str) -> Option<(i64, Option<i64>)> {
    let raw = raw.trim();
    match raw.split_once('/') {
        Some((n, m)) => {
            let n = n.trim().parse().ok()?;
            let m = m.trim().parse().ok();
            Some((n, m))
        }
        None => raw.parse().ok().map(|n| (n, None)),
    }
}

/// Year-like field normalization.
///
/// A full timestamp yields its 4-digit year; otherwise an integer parse is attempted;
/// otherwise the raw string is kept.
pub fn normalize_year(raw: &str) -> MetaValue {
    let raw = raw.trim();
    if let Some(year) = timestamp_year(raw) {
        return MetaValue::Int(i64::from(year));
    }
    match raw.parse::<i64>() {
        Ok(v) => MetaValue::Int(v),
        Err(_) => MetaValue::Text(raw.to_string()),
    }
}

fn timestamp_year(raw: &str) -> Option<i32> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.year());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(dt.year());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.year())
}

/// Outcome of a single failed tag field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub key: String,
    pub reason: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.reason)
    }
}

/// Aggregate result of a metadata write.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagReport {
    /// Canonical keys that were written to the native tag.
    pub written: Vec<CanonicalKey>,
    /// Keys dropped because the target schema has no mapping for them.
    pub unmapped: Vec<CanonicalKey>,
    pub failed: Vec<FieldError>,
}

impl TagReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_never_stored() {
        let mut c = MetadataContainer::new();
        c.insert(CanonicalKey::Title, "Song");
        c.insert(CanonicalKey::Title, "  ");
        assert!(!c.contains(CanonicalKey::Title));
        assert_eq!(c.insert_parsed(CanonicalKey::Artist, ""), None);
        assert!(c.is_empty());
    }

    #[test]
    fn year_timestamp_path() {
        assert_eq!(normalize_year("2004-05-06T07:08:09Z"), MetaValue::Int(2004));
        assert_eq!(normalize_year("1999-12-31T23:59:59"), MetaValue::Int(1999));
        assert_eq!(normalize_year("2011-02-03"), MetaValue::Int(2011));
    }

    #[test]
    fn year_integer_path() {
        assert_eq!(normalize_year("1987"), MetaValue::Int(1987));
        assert_eq!(normalize_year(" 2020 "), MetaValue::Int(2020));
    }

    #[test]
    fn year_raw_string_path() {
        assert_eq!(
            normalize_year("circa 1970"),
            MetaValue::Text("circa 1970".to_string())
        );
        assert_eq!(normalize_year("2004-13"), MetaValue::Text("2004-13".into()));
    }

    #[test]
    fn number_pairs_fill_totals() {
        let mut c = MetadataContainer::new();
        c.insert_parsed(CanonicalKey::Track, "3/12");
        assert_eq!(c.int(CanonicalKey::Track), Some(3));
        assert_eq!(c.int(CanonicalKey::Tracks), Some(12));

        c.insert(CanonicalKey::Discs, 4i64);
        c.insert_parsed(CanonicalKey::Disc, "1/2");
        assert_eq!(c.int(CanonicalKey::Disc), Some(1));
        assert_eq!(c.int(CanonicalKey::Discs), Some(4));
    }

    #[test]
    fn non_numeric_integer_field_stays_text() {
        let mut c = MetadataContainer::new();
        c.insert_parsed(CanonicalKey::Bpm, "fast");
        assert_eq!(c.get(CanonicalKey::Bpm), Some(&MetaValue::Text("fast".into())));
        assert_eq!(c.int(CanonicalKey::Bpm), None);
    }

    #[test]
    fn canonical_names_parse_case_insensitively() {
        assert_eq!(CanonicalKey::parse("albumartist"), Some(CanonicalKey::AlbumArtist));
        assert_eq!(CanonicalKey::parse("bpm"), Some(CanonicalKey::Bpm));
        assert_eq!(CanonicalKey::parse("VBR"), Some(CanonicalKey::Vbr));
        assert_eq!(CanonicalKey::parse("Mood"), None);
        for key in CanonicalKey::ALL {
            assert_eq!(CanonicalKey::parse(key.as_str()), Some(key));
        }
    }
}
