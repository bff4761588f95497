//! Wire format for the framed command channel and the block file transport.
//!
//! Integers on the wire are native endian; the protocol is a same-architecture
//! LAN contract and deliberately carries no magic, version, or handshake.

use thiserror::Error;

/// TCP port the server listens on.
pub const PORT: u16 = 34000;

/// Uncompressed payload size of one file-transport block.
pub const BLOCK_SIZE: usize = 8 * 1024;

/// Width of the NUL-padded command-name field in a command header.
pub const COMMAND_LEN: usize = 128;

/// Encoded size of a command header: length + count + command name.
pub const HEADER_SIZE: usize = 8 + 8 + COMMAND_LEN;

/// Encoded size of a file-transport block header (17 meaningful octets,
/// padded out to a fixed record).
pub const TRANS_HEADER_SIZE: usize = 128;

/// Ceiling on a command frame's body length - prevents memory exhaustion
/// from a corrupt or hostile length field.
pub const MAX_PAYLOAD_SIZE: u64 = 16 * 1024 * 1024;

/// Command vocabulary (keep spellings stable, they are the wire contract).
pub mod command {
    pub const REQUEST: &str = "request";
    pub const FILEREQ: &str = "filereq";
    pub const FINISH: &str = "finish";
    pub const FILELIST: &str = "filelist";
    pub const FILECOPY: &str = "filecopy";
    /// Synthesized locally on read failure; never sent on the wire.
    pub const ERROR: &str = "error";
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("payload length {0} exceeds maximum {MAX_PAYLOAD_SIZE}")]
    PayloadTooLarge(u64),

    #[error("command name of {0} bytes does not fit the {COMMAND_LEN}-octet field")]
    CommandTooLong(usize),

    #[error("command name contains a NUL or invalid UTF-8")]
    BadCommand,

    #[error("string {0} contains an embedded NUL")]
    EmbeddedNul(usize),

    #[error("body truncated: expected {expected} strings, found {found}")]
    BodyTruncated { expected: u64, found: usize },
}

/// Decoded command header. `length` counts body octets, `count` the
/// NUL-terminated strings the body carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u64,
    pub count: u64,
    pub command: String,
}

impl FrameHeader {
    pub fn new(command: &str, length: u64, count: u64) -> Result<Self, ProtocolError> {
        // One octet stays reserved for the terminating NUL.
        if command.len() >= COMMAND_LEN {
            return Err(ProtocolError::CommandTooLong(command.len()));
        }
        if command.as_bytes().contains(&0) {
            return Err(ProtocolError::BadCommand);
        }
        Ok(Self {
            length,
            count,
            command: command.to_string(),
        })
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.length.to_ne_bytes());
        buf[8..16].copy_from_slice(&self.count.to_ne_bytes());
        let name = self.command.as_bytes();
        buf[16..16 + name.len()].copy_from_slice(name);
        buf
    }

    /// Decodes a header record. The payload ceiling is NOT enforced here;
    /// message-mode readers call [`validate_payload_size`] before allocating,
    /// while file-mode readers ignore the length field entirely (it carries
    /// the total file size there, which may legitimately be huge).
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self, ProtocolError> {
        let length = read_u64(&buf[0..8]);
        let count = read_u64(&buf[8..16]);
        let name = &buf[16..];
        let end = name.iter().position(|&b| b == 0).unwrap_or(COMMAND_LEN);
        let command = std::str::from_utf8(&name[..end])
            .map_err(|_| ProtocolError::BadCommand)?
            .to_string();
        Ok(Self {
            length,
            count,
            command,
        })
    }
}

/// Rejects body lengths beyond [`MAX_PAYLOAD_SIZE`].
pub fn validate_payload_size(length: u64) -> Result<(), ProtocolError> {
    if length > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge(length));
    }
    Ok(())
}

/// Per-block header of the file transport. A transfer is a sequence of
/// (header, compressed body) pairs ending with the pair whose `eof` is set;
/// that final pair may still carry data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransHeader {
    pub size: u64,
    pub comp_size: u64,
    pub eof: bool,
}

impl TransHeader {
    pub fn encode(&self) -> [u8; TRANS_HEADER_SIZE] {
        let mut buf = [0u8; TRANS_HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.size.to_ne_bytes());
        buf[8..16].copy_from_slice(&self.comp_size.to_ne_bytes());
        buf[16] = u8::from(self.eof);
        buf
    }

    pub fn decode(buf: &[u8; TRANS_HEADER_SIZE]) -> Self {
        Self {
            size: read_u64(&buf[0..8]),
            comp_size: read_u64(&buf[8..16]),
            eof: buf[16] != 0,
        }
    }
}

/// Concatenates each string with a terminating NUL. Strings are opaque byte
/// sequences to the codec; embedded NULs are the one thing it forbids.
pub fn encode_body<S: AsRef<str>>(strings: &[S]) -> Result<Vec<u8>, ProtocolError> {
    let total: usize = strings.iter().map(|s| s.as_ref().len() + 1).sum();
    let mut body = Vec::with_capacity(total);
    for (i, s) in strings.iter().enumerate() {
        let bytes = s.as_ref().as_bytes();
        if bytes.contains(&0) {
            return Err(ProtocolError::EmbeddedNul(i));
        }
        body.extend_from_slice(bytes);
        body.push(0);
    }
    Ok(body)
}

/// Splits a body on NULs; `count` is authoritative for how many strings
/// the body carries.
pub fn decode_body(body: &[u8], count: u64) -> Result<Vec<String>, ProtocolError> {
    let mut out = Vec::with_capacity(count as usize);
    let mut rest = body;
    for found in 0..count {
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(ProtocolError::BodyTruncated {
                expected: count,
                found: found as usize,
            })?;
        out.push(String::from_utf8_lossy(&rest[..nul]).into_owned());
        rest = &rest[nul + 1..];
    }
    Ok(out)
}

fn read_u64(b: &[u8]) -> u64 {
    u64::from_ne_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}
