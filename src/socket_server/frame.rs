//! WebSocket frame codec (RFC 6455 §5.2)
//!
//! Pure encode/decode of the binary frame format. The blocking helpers
//! [`read_frame`] and [`write_frame`] drive the codec over any
//! `Read`/`Write`; everything else works on byte slices.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::error::ServerError;

/// Largest payload a 7-bit length field can carry directly.
pub const MAX_SHORT_LEN: usize = 125;

/// Control frames may never carry more than this many bytes.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Default cap on a single frame's payload (16 MiB).
pub const DEFAULT_MAX_PAYLOAD: u64 = 16 * 1024 * 1024;

const FIN_BIT: u8 = 0x80;
const RSV_BITS: u8 = 0x70;
const OPCODE_BITS: u8 = 0x0F;
const MASK_BIT: u8 = 0x80;
const LEN_BITS: u8 = 0x7F;
const LEN_16: u8 = 126;
const LEN_64: u8 = 127;

/// Frame opcode (4 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Parse an opcode nibble. 0x3-0x7 and 0xB-0xF are reserved.
    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(FrameError::InvalidOpcode(other)),
        }
    }

    /// Close, Ping and Pong.
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// Frame-level codec failures.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("reserved bits set without a negotiated extension")]
    ReservedBitsSet,

    #[error("invalid opcode: 0x{0:X}")]
    InvalidOpcode(u8),

    #[error("64-bit payload length has its most significant bit set")]
    LengthOverflow,

    #[error("payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("control frame cannot be fragmented")]
    FragmentedControlFrame,

    #[error("control frame payload too large: {0} bytes (max: 125)")]
    ControlFrameTooLarge(u64),

    #[error("connection closed after {received} of {expected} bytes")]
    Truncated { expected: usize, received: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<FrameError> for ServerError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => ServerError::Transport(e),
            FrameError::Truncated { .. } => ServerError::Transport(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                err.to_string(),
            )),
            other => ServerError::protocol(other.to_string()),
        }
    }
}

/// One unit of wire transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Last frame of a logical message.
    pub fin: bool,
    pub opcode: Opcode,
    /// Present only on frames travelling client to server.
    pub mask_key: Option<[u8; 4]>,
    /// Unmasked application bytes.
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: Opcode, fin: bool, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin,
            opcode,
            mask_key: None,
            payload: payload.into(),
        }
    }

    pub fn text(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Text, true, payload)
    }

    pub fn binary(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Binary, true, payload)
    }

    pub fn continuation(payload: impl Into<Vec<u8>>, fin: bool) -> Self {
        Self::new(Opcode::Continuation, fin, payload)
    }

    pub fn ping(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Ping, true, payload)
    }

    pub fn pong(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Pong, true, payload)
    }

    /// Close frame with an optional status code and reason (RFC 6455 §5.5.1).
    ///
    /// A reason without a code is dropped: the reason may only follow a code.
    pub fn close(code: Option<u16>, reason: Option<&str>) -> Self {
        let payload = match code {
            Some(code) => {
                let reason = reason.unwrap_or_default();
                let mut buf = Vec::with_capacity(2 + reason.len());
                buf.extend_from_slice(&code.to_be_bytes());
                buf.extend_from_slice(reason.as_bytes());
                buf
            }
            None => Vec::new(),
        };
        Self::new(Opcode::Close, true, payload)
    }

    /// Attach a mask key; [`encode`] will mask the payload with it.
    pub fn masked(mut self, key: [u8; 4]) -> Self {
        self.mask_key = Some(key);
        self
    }

    /// Status code and reason carried by a close frame, if any.
    pub fn close_reason(&self) -> Option<(u16, String)> {
        if self.opcode != Opcode::Close || self.payload.len() < 2 {
            return None;
        }
        let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
        let reason = String::from_utf8_lossy(&self.payload[2..]).into_owned();
        Some((code, reason))
    }
}

/// Whether `code` may appear in a close frame on the wire (RFC 6455 §7.4).
///
/// 1004 is reserved; 1005, 1006 and 1015 are local-only.
pub const fn is_valid_close_code(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
}

/// Decoded header; everything before the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
    pub mask_key: Option<[u8; 4]>,
    /// Length as declared on the wire; the payload may not be read yet.
    pub declared_len: u64,
}

impl FrameHeader {
    /// Validate the first two header bytes and return how many more header
    /// bytes (0 to 12) follow them.
    ///
    /// Reserved bits and opcodes are checked here so that a bad frame is
    /// rejected before any further bytes are read.
    pub fn extra_len(b0: u8, b1: u8) -> Result<usize, FrameError> {
        if b0 & RSV_BITS != 0 {
            return Err(FrameError::ReservedBitsSet);
        }
        Opcode::from_u8(b0 & OPCODE_BITS)?;

        let ext = match b1 & LEN_BITS {
            LEN_16 => 2,
            LEN_64 => 8,
            _ => 0,
        };
        let mask = if b1 & MASK_BIT != 0 { 4 } else { 0 };
        Ok(ext + mask)
    }

    /// Parse a complete header from `reader`.
    pub fn parse(reader: &mut FrameReader<'_>) -> Result<Self, FrameError> {
        let b0 = reader.read_u8()?;
        let b1 = reader.read_u8()?;
        Self::extra_len(b0, b1)?;

        let fin = b0 & FIN_BIT != 0;
        let opcode = Opcode::from_u8(b0 & OPCODE_BITS)?;
        let masked = b1 & MASK_BIT != 0;

        let declared_len = match b1 & LEN_BITS {
            LEN_16 => u64::from(reader.read_u16_be()?),
            LEN_64 => {
                let len = reader.read_u64_be()?;
                if len & (1 << 63) != 0 {
                    return Err(FrameError::LengthOverflow);
                }
                len
            }
            short => u64::from(short),
        };

        let mask_key = if masked {
            Some(reader.read_array::<4>()?)
        } else {
            None
        };

        if opcode.is_control() {
            if !fin {
                return Err(FrameError::FragmentedControlFrame);
            }
            if declared_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(FrameError::ControlFrameTooLarge(declared_len));
            }
        }

        Ok(Self {
            fin,
            opcode,
            mask_key,
            declared_len,
        })
    }

    /// Reject lengths above `max` before any payload is read.
    pub fn check_len(&self, max: u64) -> Result<usize, FrameError> {
        if self.declared_len > max {
            return Err(FrameError::PayloadTooLarge {
                size: self.declared_len,
                max,
            });
        }
        usize::try_from(self.declared_len).map_err(|_| FrameError::PayloadTooLarge {
            size: self.declared_len,
            max,
        })
    }
}

/// Bounds-checked cursor over a byte buffer.
#[derive(Debug)]
pub struct FrameReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], FrameError> {
        if self.remaining() < n {
            return Err(FrameError::Truncated {
                expected: n,
                received: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], FrameError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, FrameError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16_be(&mut self) -> Result<u16, FrameError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64_be(&mut self) -> Result<u64, FrameError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }
}

/// XOR `payload` in place with the cycled 4-byte key. Self-inverse.
pub fn apply_mask(payload: &mut [u8], mask_key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
}

/// Decode one frame from the front of `buf`.
///
/// Returns the frame and the number of bytes consumed.
pub fn decode(buf: &[u8], max_payload: u64) -> Result<(Frame, usize), FrameError> {
    let mut reader = FrameReader::new(buf);
    let header = FrameHeader::parse(&mut reader)?;
    let len = header.check_len(max_payload)?;
    let mut payload = reader.read_bytes(len)?.to_vec();
    if let Some(key) = header.mask_key {
        apply_mask(&mut payload, key);
    }
    let frame = Frame {
        fin: header.fin,
        opcode: header.opcode,
        mask_key: header.mask_key,
        payload,
    };
    Ok((frame, reader.position()))
}

/// Encode a frame using the minimal length representation.
///
/// Frames without a mask key are sent unmasked, which is what the server
/// side always does.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, FrameError> {
    let len = frame.payload.len();
    if frame.opcode.is_control() {
        if !frame.fin {
            return Err(FrameError::FragmentedControlFrame);
        }
        if len > MAX_CONTROL_PAYLOAD {
            return Err(FrameError::ControlFrameTooLarge(len as u64));
        }
    }

    let ext = if len > u16::MAX as usize {
        8
    } else if len > MAX_SHORT_LEN {
        2
    } else {
        0
    };
    let mask_len = if frame.mask_key.is_some() { 4 } else { 0 };
    let mut out = Vec::with_capacity(2 + ext + mask_len + len);

    let mut b0 = frame.opcode as u8;
    if frame.fin {
        b0 |= FIN_BIT;
    }
    out.push(b0);

    let mask_bit = if frame.mask_key.is_some() { MASK_BIT } else { 0 };
    match ext {
        0 => out.push(mask_bit | len as u8),
        2 => {
            out.push(mask_bit | LEN_16);
            out.extend_from_slice(&(len as u16).to_be_bytes());
        }
        _ => {
            out.push(mask_bit | LEN_64);
            out.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }

    match frame.mask_key {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(&frame.payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(&frame.payload),
    }
    Ok(out)
}

/// Fill `buf` completely, looping over short reads.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(FrameError::Truncated {
                    expected: buf.len(),
                    received: filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Block until one whole frame has been read from `reader`.
///
/// Reads the two fixed header bytes, then the 0-12 extension bytes they
/// announce, then exactly the declared payload.
pub fn read_frame<R: Read>(reader: &mut R, max_payload: u64) -> Result<Frame, FrameError> {
    let mut head = [0u8; 14];
    read_full(reader, &mut head[..2])?;
    let extra = FrameHeader::extra_len(head[0], head[1])?;
    read_full(reader, &mut head[2..2 + extra])?;

    let header = FrameHeader::parse(&mut FrameReader::new(&head[..2 + extra]))?;
    let len = header.check_len(max_payload)?;

    let mut payload = vec![0u8; len];
    read_full(reader, &mut payload)?;
    if let Some(key) = header.mask_key {
        apply_mask(&mut payload, key);
    }

    Ok(Frame {
        fin: header.fin,
        opcode: header.opcode,
        mask_key: header.mask_key,
        payload,
    })
}

/// Encode and write one frame, flushing afterwards.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> Result<(), FrameError> {
    let bytes = encode(frame)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}
