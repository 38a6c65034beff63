//! Serial framing: `<PREFIX><topic>~<base64 payload><SUFFIX>`.
//!
//! There is no escaping. The payload is always base64 so it can never contain the suffix
//! byte; any prefix byte seen inside a frame is ordinary content. Bytes outside a frame
//! are device log text and are handed back line by line.

use crate::FrameError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, warn};

/// device -> client
pub const PREFIX_IN: u8 = b'<';
/// client -> device
pub const PREFIX_OUT: u8 = b'>';
pub const SEPARATOR: u8 = b'~';
pub const SUFFIX: u8 = 0x00;

pub const MAX_FRAME_LEN: usize = 16 * 1024;
pub const MAX_LINE_LEN: usize = 1024;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FrameEvent {
    /// A complete frame with its payload already base64-decoded.
    Packet { topic: Vec<u8>, payload: Vec<u8> },
    /// One line of out-of-band text.
    LogLine(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    SeekingPrefix,
    Accumulating,
}

#[derive(Debug)]
pub struct FrameDecoder {
    prefix: u8,
    state: State,
    packet: Vec<u8>,
    line: Vec<u8>,
    dropped: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Decoder for device output (frames start with `'<'`).
    pub fn new() -> Self {
        Self::with_prefix(PREFIX_IN)
    }

    pub fn with_prefix(prefix: u8) -> Self {
        Self {
            prefix,
            state: State::SeekingPrefix,
            packet: Vec::with_capacity(256),
            line: Vec::with_capacity(128),
            dropped: 0,
        }
    }

    /// Frames discarded so far (bad separator count, bad base64, overflow).
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<FrameEvent> {
        let mut out = Vec::new();
        for &b in bytes {
            match self.state {
                State::SeekingPrefix => self.out_of_band(b, &mut out),
                State::Accumulating => {
                    if b == SUFFIX {
                        self.state = State::SeekingPrefix;
                        let raw = core::mem::take(&mut self.packet);
                        match split_packet(&raw) {
                            Ok((topic, payload)) => {
                                debug!(topic = %String::from_utf8_lossy(&topic), len = payload.len(), "frame");
                                out.push(FrameEvent::Packet { topic, payload });
                            }
                            Err(e) => {
                                self.dropped += 1;
                                warn!(error = %e, "dropping frame");
                            }
                        }
                    } else if self.packet.len() >= MAX_FRAME_LEN {
                        self.dropped += 1;
                        warn!(error = %FrameError::Overflow(MAX_FRAME_LEN), "dropping frame");
                        self.packet.clear();
                        self.state = State::SeekingPrefix;
                    } else {
                        self.packet.push(b);
                    }
                }
            }
        }
        out
    }

    fn out_of_band(&mut self, b: u8, out: &mut Vec<FrameEvent>) {
        if b == self.prefix {
            self.state = State::Accumulating;
            self.packet.clear();
            return;
        }
        match b {
            b'\n' => self.flush_line(out),
            SUFFIX => {}
            _ => {
                self.line.push(b);
                if self.line.len() >= MAX_LINE_LEN {
                    self.flush_line(out);
                }
            }
        }
    }

    fn flush_line(&mut self, out: &mut Vec<FrameEvent>) {
        let line = core::mem::take(&mut self.line);
        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end_matches('\r');
        if !text.trim().is_empty() {
            out.push(FrameEvent::LogLine(text.to_string()));
        }
    }
}

/// Split a completed frame body into topic and decoded payload.
pub fn split_packet(raw: &[u8]) -> Result<(Vec<u8>, Vec<u8>), FrameError> {
    let parts: Vec<&[u8]> = raw.split(|&b| b == SEPARATOR).collect();
    if parts.len() != 2 {
        return Err(FrameError::Separators(parts.len().saturating_sub(1)));
    }
    let payload = STANDARD
        .decode(parts[1])
        .map_err(|e| FrameError::Base64(e.to_string()))?;
    Ok((parts[0].to_vec(), payload))
}

/// Bytes for one client -> device frame, ready for a single write.
pub fn encode_frame(topic: &str, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    encode_frame_with_prefix(PREFIX_OUT, topic, payload)
}

pub fn encode_frame_with_prefix(prefix: u8, topic: &str, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if let Some(&b) = topic.as_bytes().iter().find(|&&b| b == SEPARATOR || b == SUFFIX) {
        return Err(FrameError::ReservedByte(b));
    }
    let encoded = STANDARD.encode(payload);
    let mut out = Vec::with_capacity(topic.len() + encoded.len() + 3);
    out.push(prefix);
    out.extend_from_slice(topic.as_bytes());
    out.push(SEPARATOR);
    out.extend_from_slice(encoded.as_bytes());
    out.push(SUFFIX);
    Ok(out)
}
