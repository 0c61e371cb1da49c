//! Native tag vocabularies and their canonical-key translation tables.
//!
//! Each schema has a static forward table (native key -> canonical key). The reverse
//! table used for writing is built once by inverting the forward table, skipping the
//! schema's reserved keys so that, for example, an ID3 copyright URL or a Vorbis
//! `ENCODED-BY` is never overwritten by a value that came from another tag format.

use std::collections::HashMap;
use std::sync::OnceLock;

use lofty::TagType;

use super::{CanonicalKey, CanonicalKey as K};
use crate::types::CodecKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TagSchema {
    Id3v2,
    VorbisComments,
    Mp4Ilst,
    RiffInfo,
}

const ID3V2_FORWARD: &[(&str, CanonicalKey)] = &[
    ("TIT2", K::Title),
    ("TPE1", K::Artist),
    ("TALB", K::Album),
    ("TPE2", K::AlbumArtist),
    ("TRCK", K::Track),
    ("TPOS", K::Disc),
    ("TDRC", K::Year),
    ("TYER", K::Year),
    ("TCON", K::GenreString),
    ("COMM", K::Comment),
    ("USLT", K::Lyrics),
    ("TCOM", K::Composer),
    ("TPUB", K::Publisher),
    ("TCOP", K::Copyright),
    ("WCOP", K::Copyright),
    ("TSSE", K::Encoder),
    ("TENC", K::Encoder),
    ("TBPM", K::Bpm),
    ("POPM", K::Rating),
    ("TPE4", K::Arranger),
    ("TCMP", K::IsCompilation),
    ("TSOT", K::TitleSort),
    ("TSOP", K::ArtistSort),
    ("TSOA", K::AlbumSort),
    ("TSO2", K::AlbumArtistSort),
    ("TSOC", K::ComposerSort),
];
const ID3V2_RESERVED: &[&str] = &["TYER", "WCOP", "TENC"];

const VORBIS_FORWARD: &[(&str, CanonicalKey)] = &[
    ("TITLE", K::Title),
    ("ARTIST", K::Artist),
    ("ALBUM", K::Album),
    ("ALBUMARTIST", K::AlbumArtist),
    ("TRACKNUMBER", K::Track),
    ("TRACKTOTAL", K::Tracks),
    ("DISCNUMBER", K::Disc),
    ("DISCTOTAL", K::Discs),
    ("DATE", K::Year),
    ("YEAR", K::Year),
    ("GENRE", K::GenreString),
    ("COMMENT", K::Comment),
    ("DESCRIPTION", K::Comment),
    ("LYRICS", K::Lyrics),
    ("COMPOSER", K::Composer),
    ("ORGANIZATION", K::Publisher),
    ("LABEL", K::Publisher),
    ("COPYRIGHT", K::Copyright),
    ("ENCODER", K::Encoder),
    ("ENCODED-BY", K::Encoder),
    ("PRODUCER", K::Producer),
    ("BPM", K::Bpm),
    ("RATING", K::Rating),
    ("ARRANGER", K::Arranger),
    ("COMPILATION", K::IsCompilation),
    ("TITLESORT", K::TitleSort),
    ("ARTISTSORT", K::ArtistSort),
    ("ALBUMSORT", K::AlbumSort),
    ("ALBUMARTISTSORT", K::AlbumArtistSort),
    ("COMPOSERSORT", K::ComposerSort),
];
const VORBIS_RESERVED: &[&str] = &["YEAR", "DESCRIPTION", "LABEL", "ENCODED-BY"];

const MP4_FORWARD: &[(&str, CanonicalKey)] = &[
    ("\u{a9}nam", K::Title),
    ("\u{a9}ART", K::Artist),
    ("\u{a9}alb", K::Album),
    ("aART", K::AlbumArtist),
    ("trkn", K::Track),
    ("disk", K::Disc),
    ("\u{a9}day", K::Year),
    ("\u{a9}gen", K::GenreString),
    ("\u{a9}cmt", K::Comment),
    ("\u{a9}lyr", K::Lyrics),
    ("\u{a9}wrt", K::Composer),
    ("----:com.apple.iTunes:LABEL", K::Publisher),
    ("cprt", K::Copyright),
    ("\u{a9}too", K::Encoder),
    ("\u{a9}enc", K::Encoder),
    ("----:com.apple.iTunes:PRODUCER", K::Producer),
    ("tmpo", K::Bpm),
    ("----:com.apple.iTunes:RATING", K::Rating),
    ("----:com.apple.iTunes:ARRANGER", K::Arranger),
    ("cpil", K::IsCompilation),
    ("sonm", K::TitleSort),
    ("soar", K::ArtistSort),
    ("soal", K::AlbumSort),
    ("soaa", K::AlbumArtistSort),
    ("soco", K::ComposerSort),
];
const MP4_RESERVED: &[&str] = &["\u{a9}enc"];

const RIFF_FORWARD: &[(&str, CanonicalKey)] = &[
    ("INAM", K::Title),
    ("IART", K::Artist),
    ("IPRD", K::Album),
    ("ITRK", K::Track),
    ("IPRT", K::Track),
    ("ICRD", K::Year),
    ("IGNR", K::GenreString),
    ("ICMT", K::Comment),
    ("IMUS", K::Composer),
    ("ICOP", K::Copyright),
    ("ISFT", K::Encoder),
];
const RIFF_RESERVED: &[&str] = &["IPRT"];

impl TagSchema {
    pub const ALL: [TagSchema; 4] = [
        TagSchema::Id3v2,
        TagSchema::VorbisComments,
        TagSchema::Mp4Ilst,
        TagSchema::RiffInfo,
    ];

    /// Tag schema a codec's container carries.
    pub fn for_kind(kind: CodecKind) -> Option<Self> {
        match kind {
            CodecKind::Wav => Some(TagSchema::RiffInfo),
            CodecKind::Aiff | CodecKind::Mp3 | CodecKind::Mp2 => Some(TagSchema::Id3v2),
            CodecKind::Flac | CodecKind::Vorbis => Some(TagSchema::VorbisComments),
            CodecKind::Aac | CodecKind::Alac => Some(TagSchema::Mp4Ilst),
            CodecKind::Unsupported | CodecKind::Unknown => None,
        }
    }

    pub fn tag_type(self) -> TagType {
        match self {
            TagSchema::Id3v2 => TagType::Id3v2,
            TagSchema::VorbisComments => TagType::VorbisComments,
            TagSchema::Mp4Ilst => TagType::Mp4Ilst,
            TagSchema::RiffInfo => TagType::RiffInfo,
        }
    }

    pub fn from_tag_type(tag_type: TagType) -> Option<Self> {
        match tag_type {
            TagType::Id3v2 => Some(TagSchema::Id3v2),
            TagType::VorbisComments => Some(TagSchema::VorbisComments),
            TagType::Mp4Ilst => Some(TagSchema::Mp4Ilst),
            TagType::RiffInfo => Some(TagSchema::RiffInfo),
            _ => None,
        }
    }

    pub fn forward_table(self) -> &'static [(&'static str, CanonicalKey)] {
        match self {
            TagSchema::Id3v2 => ID3V2_FORWARD,
            TagSchema::VorbisComments => VORBIS_FORWARD,
            TagSchema::Mp4Ilst => MP4_FORWARD,
            TagSchema::RiffInfo => RIFF_FORWARD,
        }
    }

    pub fn reserved(self) -> &'static [&'static str] {
        match self {
            TagSchema::Id3v2 => ID3V2_RESERVED,
            TagSchema::VorbisComments => VORBIS_RESERVED,
            TagSchema::Mp4Ilst => MP4_RESERVED,
            TagSchema::RiffInfo => RIFF_RESERVED,
        }
    }

    fn case_insensitive(self) -> bool {
        self == TagSchema::VorbisComments
    }

    /// Translate a native key to its canonical key.
    pub fn canonical(self, native: &str) -> Option<CanonicalKey> {
        let native = native.trim();
        self.forward_table()
            .iter()
            .find(|(n, _)| {
                if self.case_insensitive() {
                    n.eq_ignore_ascii_case(native)
                } else {
                    *n == native
                }
            })
            .map(|(_, k)| *k)
    }

    /// Native key a canonical key is written to, if this schema has a writable one.
    pub fn native(self, key: CanonicalKey) -> Option<&'static str> {
        reverse_table(self).get(&key).copied()
    }

    /// Whether `native` must never be written by translation.
    pub fn is_reserved(self, native: &str) -> bool {
        self.reserved().iter().any(|r| {
            if self.case_insensitive() {
                r.eq_ignore_ascii_case(native)
            } else {
                *r == native
            }
        })
    }
}

fn reverse_table(schema: TagSchema) -> &'static HashMap<CanonicalKey, &'static str> {
    static TABLES: OnceLock<HashMap<TagSchema, HashMap<CanonicalKey, &'static str>>> =
        OnceLock::new();
    let tables = TABLES.get_or_init(|| {
        TagSchema::ALL
            .into_iter()
            .map(|schema| (schema, invert(schema)))
            .collect()
    });
    // every schema is inserted above
    &tables[&schema]
}

fn invert(schema: TagSchema) -> HashMap<CanonicalKey, &'static str> {
    let mut reverse = HashMap::new();
    for (native, key) in schema.forward_table() {
        if schema.is_reserved(native) || key.is_synthesized() {
            continue;
        }
        reverse.entry(*key).or_insert(*native);
    }
    reverse
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverse_skips_reserved_keys() {
        assert_eq!(TagSchema::Id3v2.native(K::Copyright), Some("TCOP"));
        assert_eq!(TagSchema::Id3v2.native(K::Year), Some("TDRC"));
        assert_eq!(TagSchema::Id3v2.native(K::Encoder), Some("TSSE"));
        assert_eq!(TagSchema::VorbisComments.native(K::Comment), Some("COMMENT"));
        assert_eq!(TagSchema::VorbisComments.native(K::Publisher), Some("ORGANIZATION"));
        assert_eq!(TagSchema::Mp4Ilst.native(K::Encoder), Some("\u{a9}too"));
        assert_eq!(TagSchema::RiffInfo.native(K::Track), Some("ITRK"));
    }

    #[test]
    fn reserved_natives_still_read() {
        assert_eq!(TagSchema::Id3v2.canonical("WCOP"), Some(K::Copyright));
        assert_eq!(TagSchema::Id3v2.canonical("TYER"), Some(K::Year));
        assert_eq!(TagSchema::Mp4Ilst.canonical("\u{a9}enc"), Some(K::Encoder));
    }

    #[test]
    fn reverse_never_targets_a_reserved_key() {
        for schema in TagSchema::ALL {
            for key in CanonicalKey::ALL {
                if let Some(native) = schema.native(key) {
                    assert!(!schema.is_reserved(native), "{schema:?} {key} -> {native}");
                    assert_eq!(schema.canonical(native), Some(key));
                }
            }
        }
    }

    #[test]
    fn vorbis_lookup_ignores_case() {
        assert_eq!(TagSchema::VorbisComments.canonical("title"), Some(K::Title));
        assert_eq!(TagSchema::VorbisComments.canonical("AlbumArtist"), Some(K::AlbumArtist));
        assert_eq!(TagSchema::Id3v2.canonical("tit2"), None);
    }

    #[test]
    fn unmapped_keys_have_no_native() {
        assert_eq!(TagSchema::RiffInfo.native(K::AlbumArtist), None);
        assert_eq!(TagSchema::Id3v2.native(K::Producer), None);
        for schema in TagSchema::ALL {
            assert_eq!(schema.native(K::Vbr), None);
            assert_eq!(schema.native(K::BitRate), None);
        }
    }

    #[test]
    fn schema_per_codec() {
        assert_eq!(TagSchema::for_kind(CodecKind::Wav), Some(TagSchema::RiffInfo));
        assert_eq!(TagSchema::for_kind(CodecKind::Aiff), Some(TagSchema::Id3v2));
        assert_eq!(TagSchema::for_kind(CodecKind::Vorbis), Some(TagSchema::VorbisComments));
        assert_eq!(TagSchema::for_kind(CodecKind::Alac), Some(TagSchema::Mp4Ilst));
        assert_eq!(TagSchema::for_kind(CodecKind::Unknown), None);
    }
}
