//! Media probing for library files.
//!
//! A file is accepted as a video only when its extension and its leading
//! container signature agree. ISO-BMFF files (mp4/m4v/mov) additionally have
//! their iTunes-style metadata atoms read, which is where the transcoder
//! stores the title and description handed to it at ingest time.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Upper bound on the size of a `moov` atom we are willing to load.
const MAX_MOOV_BYTES: u64 = 64 * 1024 * 1024;

/// Number of leading bytes inspected for container signatures.
const SIGNATURE_LEN: usize = 12;

/// Errors that can occur while probing a media file.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Extension is not one of the supported video extensions.
    #[error("Unsupported video extension: {0}")]
    UnsupportedExtension(PathBuf),

    /// Path is not a regular file.
    #[error("Not a regular file: {0}")]
    NotAFile(PathBuf),

    /// File has no content.
    #[error("Empty file: {0}")]
    Empty(PathBuf),

    /// Leading bytes do not match the container implied by the extension.
    #[error("Container signature mismatch: {0}")]
    BadSignature(PathBuf),

    /// An atom header or payload is truncated or inconsistent.
    #[error("Malformed container: {0}")]
    Malformed(&'static str),

    /// IO error while reading the file.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Container family implied by a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// mp4, m4v, mov
    IsoBmff,
    /// mkv, webm
    Matroska,
    /// avi
    Avi,
    /// ts, m2ts
    MpegTs,
}

impl Container {
    /// Determine the container family from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "mp4" | "m4v" | "mov" => Some(Container::IsoBmff),
            "mkv" | "webm" => Some(Container::Matroska),
            "avi" => Some(Container::Avi),
            "ts" | "m2ts" => Some(Container::MpegTs),
            _ => None,
        }
    }

    /// Check whether the leading bytes of a file carry this container's signature.
    pub fn matches_signature(&self, head: &[u8]) -> bool {
        match self {
            Container::IsoBmff => {
                head.len() >= 8
                    && matches!(
                        &head[4..8],
                        b"ftyp" | b"moov" | b"mdat" | b"wide" | b"free" | b"skip"
                    )
            }
            Container::Matroska => head.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]),
            Container::Avi => head.len() >= 12 && &head[0..4] == b"RIFF" && &head[8..12] == b"AVI ",
            Container::MpegTs => {
                head.first() == Some(&0x47) || (head.len() > 4 && head[4] == 0x47)
            }
        }
    }
}

/// Embedded or sidecar thumbnail image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    /// Raw image bytes
    pub data: Vec<u8>,
    /// MIME type (`image/jpeg`, `image/png`)
    pub mime: String,
}

/// Metadata read from a media file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaInfo {
    /// Container family
    pub container: Option<Container>,
    /// `©nam` tag
    pub title: Option<String>,
    /// `©cmt` or `desc` tag
    pub description: Option<String>,
    /// `©alb` tag
    pub album: Option<String>,
    /// `covr` tag
    pub cover: Option<Thumbnail>,
    /// File size in bytes
    pub size_bytes: u64,
}

/// Probe a media file.
///
/// # Returns
/// * `Ok(MediaInfo)` - The file is a supported, well-formed video container
/// * `Err(ProbeError)` - The file should not be indexed
pub fn probe_file(path: &Path) -> Result<MediaInfo, ProbeError> {
    let container = Container::from_path(path)
        .ok_or_else(|| ProbeError::UnsupportedExtension(path.to_path_buf()))?;

    let metadata = std::fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(ProbeError::NotAFile(path.to_path_buf()));
    }
    if metadata.len() == 0 {
        return Err(ProbeError::Empty(path.to_path_buf()));
    }

    let mut file = File::open(path)?;
    let mut head = Vec::with_capacity(SIGNATURE_LEN);
    (&mut file).take(SIGNATURE_LEN as u64).read_to_end(&mut head)?;
    if !container.matches_signature(&head) {
        return Err(ProbeError::BadSignature(path.to_path_buf()));
    }

    let mut info = MediaInfo {
        container: Some(container),
        size_bytes: metadata.len(),
        ..MediaInfo::default()
    };

    if container == Container::IsoBmff {
        file.seek(SeekFrom::Start(0))?;
        if let Some(moov) = read_moov(&mut file, metadata.len())? {
            read_ilst_tags(&moov, &mut info)?;
        }
    }

    Ok(info)
}

/// Read an atom header, returning (fourcc, header length, total atom length).
///
/// A total length of `None` means the atom extends to the end of the file.
fn read_atom_header<R: Read>(reader: &mut R) -> io::Result<Option<([u8; 4], u64, Option<u64>)>> {
    let mut header = [0u8; 8];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let kind = [header[4], header[5], header[6], header[7]];

    match size32 {
        0 => Ok(Some((kind, 8, None))),
        1 => {
            let mut large = [0u8; 8];
            reader.read_exact(&mut large)?;
            Ok(Some((kind, 16, Some(u64::from_be_bytes(large)))))
        }
        n => Ok(Some((kind, 8, Some(n as u64)))),
    }
}

/// Walk top-level atoms and load the body of `moov`, if present.
fn read_moov(file: &mut File, file_len: u64) -> Result<Option<Vec<u8>>, ProbeError> {
    let mut offset = 0u64;

    while offset < file_len {
        file.seek(SeekFrom::Start(offset))?;
        let Some((kind, header_len, total)) = read_atom_header(file)? else {
            break;
        };
        let total = total.unwrap_or(file_len - offset);
        let end = offset
            .checked_add(total)
            .filter(|&end| total >= header_len && end <= file_len);
        let Some(end) = end else {
            return Err(ProbeError::Malformed("top-level atom overruns file"));
        };

        if &kind == b"moov" {
            let body_len = total - header_len;
            if body_len > MAX_MOOV_BYTES {
                return Err(ProbeError::Malformed("moov atom too large"));
            }
            let mut body = vec![0u8; body_len as usize];
            file.read_exact(&mut body)?;
            return Ok(Some(body));
        }

        offset = end;
    }

    Ok(None)
}

/// Split an in-memory atom body into its child atoms.
fn child_atoms(mut buf: &[u8]) -> Result<Vec<([u8; 4], &[u8])>, ProbeError> {
    let mut children = Vec::new();

    while !buf.is_empty() {
        if buf.len() < 8 {
            return Err(ProbeError::Malformed("truncated atom header"));
        }
        let size32 = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as u64;
        let kind = [buf[4], buf[5], buf[6], buf[7]];

        let (header_len, total) = match size32 {
            0 => (8u64, buf.len() as u64),
            1 => {
                if buf.len() < 16 {
                    return Err(ProbeError::Malformed("truncated large atom header"));
                }
                let mut large = [0u8; 8];
                large.copy_from_slice(&buf[8..16]);
                (16u64, u64::from_be_bytes(large))
            }
            n => (8u64, n),
        };

        if total < header_len || total > buf.len() as u64 {
            return Err(ProbeError::Malformed("atom overruns parent"));
        }

        children.push((kind, &buf[header_len as usize..total as usize]));
        buf = &buf[total as usize..];
    }

    Ok(children)
}

fn find_child<'a>(buf: &'a [u8], kind: &[u8; 4]) -> Result<Option<&'a [u8]>, ProbeError> {
    Ok(child_atoms(buf)?
        .into_iter()
        .find(|(k, _)| k == kind)
        .map(|(_, body)| body))
}

/// Locate `udta/meta/ilst` inside a `moov` body and copy the known tags.
fn read_ilst_tags(moov: &[u8], info: &mut MediaInfo) -> Result<(), ProbeError> {
    let Some(udta) = find_child(moov, b"udta")? else {
        return Ok(());
    };
    let Some(meta) = find_child(udta, b"meta")? else {
        return Ok(());
    };
    // meta is a full box: version and flags precede its children
    if meta.len() < 4 {
        return Err(ProbeError::Malformed("truncated meta atom"));
    }
    let Some(ilst) = find_child(&meta[4..], b"ilst")? else {
        return Ok(());
    };

    for (kind, item) in child_atoms(ilst)? {
        let Some((data_type, payload)) = item_data(item)? else {
            continue;
        };
        match &kind {
            b"\xa9nam" => info.title = Some(text(payload)),
            b"\xa9cmt" => info.description = Some(text(payload)),
            b"desc" if info.description.is_none() => info.description = Some(text(payload)),
            b"\xa9alb" => info.album = Some(text(payload)),
            b"covr" => {
                let mime = match data_type {
                    14 => "image/png",
                    _ => "image/jpeg",
                };
                info.cover = Some(Thumbnail {
                    data: payload.to_vec(),
                    mime: mime.to_string(),
                });
            }
            _ => {}
        }
    }

    Ok(())
}

/// Extract the type indicator and payload of an ilst item's `data` atom.
fn item_data(item: &[u8]) -> Result<Option<(u32, &[u8])>, ProbeError> {
    let Some(data) = find_child(item, b"data")? else {
        return Ok(None);
    };
    if data.len() < 8 {
        return Err(ProbeError::Malformed("truncated data atom"));
    }
    let data_type = u32::from_be_bytes([0, data[1], data[2], data[3]]);
    Ok(Some((data_type, &data[8..])))
}

fn text(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).trim().to_string()
}
