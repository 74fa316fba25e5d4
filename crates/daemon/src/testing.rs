//! Test fixtures: a minimal MP4 writer and a scripted transcoder.

use crate::encode::{Metadata, TranscodeError, Transcoder};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Tags written into the `ilst` of a generated MP4.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mp4Tags<'a> {
    pub title: Option<&'a str>,
    pub description: Option<&'a str>,
    pub album: Option<&'a str>,
    pub cover: Option<&'a [u8]>,
}

fn atom(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(&((body.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out
}

fn item(kind: &[u8; 4], data_type: u32, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(payload.len() + 8);
    data.extend_from_slice(&data_type.to_be_bytes());
    data.extend_from_slice(&[0, 0, 0, 0]);
    data.extend_from_slice(payload);
    atom(kind, &atom(b"data", &data))
}

/// Build an ISO-BMFF file: `ftyp`, a small `mdat`, then `moov` last.
pub fn mp4_bytes(tags: &Mp4Tags<'_>) -> Vec<u8> {
    let mut ilst = Vec::new();
    if let Some(title) = tags.title {
        ilst.extend(item(b"\xa9nam", 1, title.as_bytes()));
    }
    if let Some(description) = tags.description {
        ilst.extend(item(b"\xa9cmt", 1, description.as_bytes()));
    }
    if let Some(album) = tags.album {
        ilst.extend(item(b"\xa9alb", 1, album.as_bytes()));
    }
    if let Some(cover) = tags.cover {
        ilst.extend(item(b"covr", 13, cover));
    }

    let mut meta = vec![0u8; 4];
    meta.extend(atom(b"hdlr", &[0u8; 25]));
    meta.extend(atom(b"ilst", &ilst));

    let mut moov = atom(b"mvhd", &[0u8; 100]);
    moov.extend(atom(b"udta", &atom(b"meta", &meta)));

    let mut out = atom(b"ftyp", b"isom\0\0\x02\0isomiso2avc1mp41");
    out.extend(atom(b"mdat", &[0u8; 64]));
    out.extend(atom(b"moov", &moov));
    out
}

/// Write an MP4 with an optional title to `path`.
pub fn write_mp4(path: &Path, title: Option<&str>) {
    let bytes = mp4_bytes(&Mp4Tags {
        title,
        ..Mp4Tags::default()
    });
    std::fs::write(path, bytes).unwrap();
}

/// Bytes the fake transcoder writes for thumbnails.
pub const FAKE_JPEG: &[u8] = b"\xff\xd8\xff\xe0fake-jpeg\xff\xd9";

/// A recorded transcoder invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Transcode { input: PathBuf, output: PathBuf },
    Thumbnail { input: PathBuf, output: PathBuf },
    Resize { output: PathBuf, size: String },
}

/// Transcoder that writes fixture files instead of running a process.
#[derive(Debug, Default)]
pub struct FakeTranscoder {
    pub fail_transcode: bool,
    pub fail_thumbnail: bool,
    /// Transcode never finishes within its budget
    pub hang_transcode: bool,
    /// Sizes whose resize writes a partial output and then fails
    pub failing_sizes: HashSet<String>,
    pub(crate) calls: Mutex<Vec<Call>>,
}

impl FakeTranscoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn write_output(output: &Path, bytes: &[u8]) -> Result<(), TranscodeError> {
    std::fs::write(output, bytes)?;
    Ok(())
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        metadata: &Metadata,
    ) -> Result<(), TranscodeError> {
        self.record(Call::Transcode {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
        });
        if self.hang_transcode {
            return Err(TranscodeError::TimedOut(Duration::from_secs(1)));
        }
        if self.fail_transcode {
            write_output(output, b"partial")?;
            return Err(TranscodeError::Failed(1));
        }
        write_output(
            output,
            &mp4_bytes(&Mp4Tags {
                title: Some(&metadata.title),
                description: Some(&metadata.comment),
                ..Mp4Tags::default()
            }),
        )
    }

    async fn thumbnail(
        &self,
        input: &Path,
        output: &Path,
        _offset_secs: u32,
    ) -> Result<(), TranscodeError> {
        self.record(Call::Thumbnail {
            input: input.to_path_buf(),
            output: output.to_path_buf(),
        });
        if self.fail_thumbnail {
            return Err(TranscodeError::Failed(1));
        }
        write_output(output, FAKE_JPEG)
    }

    async fn resize(
        &self,
        _input: &Path,
        output: &Path,
        size: &str,
        metadata: &Metadata,
    ) -> Result<(), TranscodeError> {
        self.record(Call::Resize {
            output: output.to_path_buf(),
            size: size.to_string(),
        });
        if self.failing_sizes.contains(size) {
            write_output(output, b"partial")?;
            return Err(TranscodeError::Failed(1));
        }
        write_output(
            output,
            &mp4_bytes(&Mp4Tags {
                title: Some(&metadata.title),
                ..Mp4Tags::default()
            }),
        )
    }
}
