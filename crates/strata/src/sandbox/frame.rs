//! Demultiplexing of container output streams
//!
//! Container runtimes that attach without a TTY wrap output in 8-byte
//! headers: `[stream, 0, 0, 0, len_be32]` followed by `len` payload bytes,
//! where stream 0/1/2 is stdin/stdout/stderr. Processes started directly
//! produce plain bytes. [`StreamDemuxer`] detects which one it is looking at
//! from the first bytes and decodes accordingly.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

pub const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StreamKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(StreamKind::Stdin),
            1 => Some(StreamKind::Stdout),
            2 => Some(StreamKind::Stderr),
            _ => None,
        }
    }
}

/// A run of bytes from one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub stream: StreamKind,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Framing {
    Detect,
    Multiplexed,
    Raw,
}

#[derive(Debug, Clone)]
pub struct StreamDemuxer {
    framing: Framing,
}

impl StreamDemuxer {
    /// Decide the framing from the first bytes seen
    pub fn detect() -> Self {
        Self {
            framing: Framing::Detect,
        }
    }

    pub fn multiplexed() -> Self {
        Self {
            framing: Framing::Multiplexed,
        }
    }

    pub fn raw() -> Self {
        Self {
            framing: Framing::Raw,
        }
    }

    pub fn is_multiplexed(&self) -> bool {
        self.framing == Framing::Multiplexed
    }
}

/// Whether `prefix` could still be the start of a frame header
fn could_be_header(prefix: &[u8]) -> bool {
    match prefix.split_first() {
        None => true,
        Some((first, rest)) => {
            StreamKind::from_byte(*first).is_some()
                && rest.iter().take(3).all(|b| *b == 0)
        }
    }
}

impl Decoder for StreamDemuxer {
    type Item = OutputChunk;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        if self.framing == Framing::Detect {
            let head = &src[..src.len().min(HEADER_LEN)];
            if !could_be_header(head) {
                self.framing = Framing::Raw;
            } else if src.len() < HEADER_LEN {
                return Ok(None);
            } else {
                self.framing = Framing::Multiplexed;
            }
        }

        match self.framing {
            Framing::Raw => {
                let data = src.split_to(src.len()).freeze();
                Ok(Some(OutputChunk {
                    stream: StreamKind::Stdout,
                    data,
                }))
            }
            Framing::Multiplexed => {
                if src.len() < HEADER_LEN {
                    return Ok(None);
                }
                let stream = StreamKind::from_byte(src[0]).ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("invalid stream type {}", src[0]),
                    )
                })?;
                let len = u32::from_be_bytes([src[4], src[5], src[6], src[7]]) as usize;
                if src.len() < HEADER_LEN + len {
                    src.reserve(HEADER_LEN + len - src.len());
                    return Ok(None);
                }
                src.advance(HEADER_LEN);
                let data = src.split_to(len).freeze();
                Ok(Some(OutputChunk { stream, data }))
            }
            Framing::Detect => Ok(None),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(chunk) = self.decode(src)? {
            return Ok(Some(chunk));
        }
        if src.is_empty() {
            return Ok(None);
        }
        match self.framing {
            Framing::Multiplexed => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "truncated output frame",
            )),
            // A short tail that only looked like a header prefix
            Framing::Detect | Framing::Raw => {
                self.framing = Framing::Raw;
                let data = src.split_to(src.len()).freeze();
                Ok(Some(OutputChunk {
                    stream: StreamKind::Stdout,
                    data,
                }))
            }
        }
    }
}
