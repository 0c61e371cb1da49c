//! File classification.
//!
//! [`classify`] maps a path to a [`CodecKind`]. Most extensions decide the codec on
//! their own; `.ogg`/`.oga` and `.m4a`/`.mp4`/`.m4b` are containers that can hold
//! several codecs, so the file header is read to find the payload. Classification is
//! total: missing files, unreadable headers and unknown extensions all come back as
//! [`CodecKind::Unknown`] rather than an error.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::types::CodecKind;

/// Upper bound on boxes visited per container level while sniffing MP4 files.
const MAX_BOXES: usize = 4096;

/// Classify `path` by extension, sniffing content for ambiguous containers.
pub fn classify(path: &Path) -> CodecKind {
    let Some(ext) = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
    else {
        return CodecKind::Unknown;
    };

    match ext.as_str() {
        "wav" | "wave" => CodecKind::Wav,
        "aif" | "aiff" | "aifc" => CodecKind::Aiff,
        "mp3" => CodecKind::Mp3,
        "mp2" | "mpa" => CodecKind::Mp2,
        "flac" => CodecKind::Flac,
        "ogg" | "oga" => sniff_file(path, sniff_ogg),
        "m4a" | "mp4" | "m4b" => sniff_file(path, sniff_mp4),
        "opus" | "wma" | "ape" | "wv" | "dsf" | "mpc" => CodecKind::Unsupported,
        _ => CodecKind::Unknown,
    }
}

fn sniff_file(path: &Path, sniff: fn(&mut File) -> io::Result<CodecKind>) -> CodecKind {
    let result = File::open(path).and_then(|mut file| sniff(&mut file));
    match result {
        Ok(kind) => kind,
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "header sniff failed");
            CodecKind::Unknown
        }
    }
}

/// Identify the codec of the first logical Ogg stream from its first packet.
fn sniff_ogg(file: &mut File) -> io::Result<CodecKind> {
    let mut header = [0u8; 27];
    file.read_exact(&mut header)?;
    if &header[..4] != b"OggS" {
        return Ok(CodecKind::Unknown);
    }
    let segments = header[26] as usize;
    let mut lacing = vec![0u8; segments];
    file.read_exact(&mut lacing)?;

    let mut magic = [0u8; 8];
    let n = read_up_to(file, &mut magic)?;
    Ok(classify_ogg_packet(&magic[..n]))
}

fn classify_ogg_packet(packet: &[u8]) -> CodecKind {
    if packet.starts_with(b"\x01vorbis") {
        CodecKind::Vorbis
    } else if packet.starts_with(b"OpusHead")
        || packet.starts_with(b"\x7fFLAC")
        || packet.starts_with(b"Speex   ")
    {
        CodecKind::Unsupported
    } else {
        CodecKind::Unknown
    }
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// One ISO-BMFF box: type plus body range in the file.
#[derive(Clone, Copy, Debug)]
struct BoxRange {
    kind: [u8; 4],
    body_start: u64,
    body_end: u64,
}

fn list_boxes(file: &mut File, start: u64, end: u64) -> io::Result<Vec<BoxRange>> {
    let mut out = Vec::new();
    let mut pos = start;
    while pos.checked_add(8).is_some_and(|p| p <= end) && out.len() < MAX_BOXES {
        file.seek(SeekFrom::Start(pos))?;
        let mut head = [0u8; 8];
        file.read_exact(&mut head)?;
        let mut size = u64::from(u32::from_be_bytes([head[0], head[1], head[2], head[3]]));
        let kind = [head[4], head[5], head[6], head[7]];
        let mut header_len = 8;
        if size == 1 {
            let mut large = [0u8; 8];
            file.read_exact(&mut large)?;
            size = u64::from_be_bytes(large);
            header_len = 16;
        } else if size == 0 {
            size = end - pos;
        }
        // a box that claims to run past its parent is malformed
        let Some(box_end) = pos.checked_add(size).filter(|&e| e <= end) else {
            break;
        };
        if size < header_len {
            break;
        }
        out.push(BoxRange {
            kind,
            body_start: pos + header_len,
            body_end: box_end,
        });
        pos = box_end;
    }
    Ok(out)
}

fn find_box(file: &mut File, parent: (u64, u64), kind: &[u8; 4]) -> io::Result<Option<BoxRange>> {
    Ok(list_boxes(file, parent.0, parent.1)?
        .into_iter()
        .find(|b| &b.kind == kind))
}

fn read_at(file: &mut File, pos: u64, buf: &mut [u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(pos))?;
    file.read_exact(buf)
}

/// Walk `moov/trak/mdia/minf/stbl/stsd` and classify by the first audio sample entry.
fn sniff_mp4(file: &mut File) -> io::Result<CodecKind> {
    let len = file.metadata()?.len();
    let top = list_boxes(file, 0, len)?;
    if !top.first().is_some_and(|b| &b.kind == b"ftyp") {
        return Ok(CodecKind::Unknown);
    }
    let Some(moov) = top.iter().find(|b| &b.kind == b"moov") else {
        return Ok(CodecKind::Unknown);
    };

    let mut other_audio = false;
    for trak in list_boxes(file, moov.body_start, moov.body_end)?
        .into_iter()
        .filter(|b| &b.kind == b"trak")
    {
        let Some(mdia) = find_box(file, (trak.body_start, trak.body_end), b"mdia")? else {
            continue;
        };
        let Some(hdlr) = find_box(file, (mdia.body_start, mdia.body_end), b"hdlr")? else {
            continue;
        };
        // version/flags, pre_defined, handler_type
        let mut handler = [0u8; 12];
        read_at(file, hdlr.body_start, &mut handler)?;
        if &handler[8..12] != b"soun" {
            continue;
        }
        let Some(minf) = find_box(file, (mdia.body_start, mdia.body_end), b"minf")? else {
            continue;
        };
        let Some(stbl) = find_box(file, (minf.body_start, minf.body_end), b"stbl")? else {
            continue;
        };
        let Some(stsd) = find_box(file, (stbl.body_start, stbl.body_end), b"stsd")? else {
            continue;
        };
        // version/flags, entry_count, first entry size + format
        let mut entry = [0u8; 16];
        read_at(file, stsd.body_start, &mut entry)?;
        match &entry[12..16] {
            b"mp4a" => return Ok(CodecKind::Aac),
            b"alac" => return Ok(CodecKind::Alac),
            _ => other_audio = true,
        }
    }

    Ok(if other_audio {
        CodecKind::Unsupported
    } else {
        CodecKind::Unknown
    })
}
