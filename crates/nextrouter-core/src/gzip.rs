//! Gzip handling for response bodies: whole-buffer decompression for the
//! buffered path, and an incremental decoder for SSE streams (gzip header
//! parsed by hand, raw-deflate inflated member by member).

use std::io::{self, Read};

use flate2::read::MultiGzDecoder;
use flate2::{Decompress, FlushDecompress};

pub fn is_gzip(content_encoding: Option<&str>) -> bool {
    content_encoding
        .map(|v| v.to_ascii_lowercase().contains("gzip"))
        .unwrap_or(false)
}

pub fn gunzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 3);
    MultiGzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

const FHCRC: u8 = 1 << 1;
const FEXTRA: u8 = 1 << 2;
const FNAME: u8 = 1 << 3;
const FCOMMENT: u8 = 1 << 4;

enum State {
    Header,
    Body,
    Trailer,
}

/// Push-style gzip decoder: feed whatever bytes arrived, get whatever
/// plaintext is decodable so far. Supports concatenated members.
pub struct GzStreamDecoder {
    state: State,
    input: Vec<u8>,
    inflater: Decompress,
}

impl GzStreamDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Header,
            input: Vec::new(),
            inflater: Decompress::new(false),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> io::Result<Vec<u8>> {
        self.input.extend_from_slice(chunk);
        let mut out = Vec::new();
        loop {
            match self.state {
                State::Header => {
                    let Some(header_len) = parse_header_len(&self.input)? else {
                        return Ok(out);
                    };
                    self.input.drain(..header_len);
                    self.inflater = Decompress::new(false);
                    self.state = State::Body;
                }
                State::Body => {
                    if self.input.is_empty() {
                        return Ok(out);
                    }
                    let before_in = self.inflater.total_in();
                    let before_out = self.inflater.total_out();
                    let mut buf = vec![0u8; 16 * 1024];
                    let status = self
                        .inflater
                        .decompress(&self.input, &mut buf, FlushDecompress::None)
                        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
                    let consumed = (self.inflater.total_in() - before_in) as usize;
                    let produced = (self.inflater.total_out() - before_out) as usize;
                    self.input.drain(..consumed);
                    out.extend_from_slice(&buf[..produced]);
                    match status {
                        flate2::Status::StreamEnd => {
                            self.state = State::Trailer;
                        }
                        _ if consumed == 0 && produced == 0 => return Ok(out),
                        _ => {}
                    }
                }
                State::Trailer => {
                    // CRC32 + ISIZE; another member may follow.
                    if self.input.len() < 8 {
                        return Ok(out);
                    }
                    self.input.drain(..8);
                    self.state = State::Header;
                    if self.input.is_empty() {
                        return Ok(out);
                    }
                }
            }
        }
    }
}

impl Default for GzStreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Total gzip header length once enough bytes are buffered, else `None`.
fn parse_header_len(input: &[u8]) -> io::Result<Option<usize>> {
    if input.len() < 10 {
        return Ok(None);
    }
    if input[0] != 0x1f || input[1] != 0x8b {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "invalid gzip magic",
        ));
    }
    if input[2] != 8 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "unsupported gzip compression method",
        ));
    }
    let flags = input[3];
    let mut pos = 10usize;

    if flags & FEXTRA != 0 {
        if input.len() < pos + 2 {
            return Ok(None);
        }
        let xlen = u16::from_le_bytes([input[pos], input[pos + 1]]) as usize;
        pos += 2 + xlen;
        if input.len() < pos {
            return Ok(None);
        }
    }
    for flag in [FNAME, FCOMMENT] {
        if flags & flag != 0 {
            match input[pos..].iter().position(|&b| b == 0) {
                Some(end) => pos += end + 1,
                None => return Ok(None),
            }
        }
    }
    if flags & FHCRC != 0 {
        pos += 2;
        if input.len() < pos {
            return Ok(None);
        }
    }
    Ok(Some(pos))
}
