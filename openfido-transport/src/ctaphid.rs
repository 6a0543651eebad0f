//! CTAPHID framing
//!
//! A logical message travels as one initialization frame and up to 128
//! continuation frames over fixed-size HID reports:
//!
//! - INIT: `CID(4) || CMD|0x80(1) || BCNT(2, big-endian) || DATA(57)`
//! - CONT: `CID(4) || SEQ(1, 0..=127) || DATA(59)`
//!
//! The last frame is zero-padded to the report size.
//!
//! Spec: <https://fidoalliance.org/specs/fido-v2.1-ps-20210615/fido-client-to-authenticator-protocol-v2.1-ps-20210615.html#usb-message-and-packet-structure>

use smallvec::SmallVec;

use crate::error::{Error, Result};

/// HID report size; FIDO authenticators use 64-byte reports.
pub const REPORT_SIZE: usize = 64;

/// INIT frame payload capacity (report minus cid, cmd, bcnt).
pub const INIT_PAYLOAD: usize = REPORT_SIZE - 7;

/// CONT frame payload capacity (report minus cid, seq).
pub const CONT_PAYLOAD: usize = REPORT_SIZE - 5;

/// Largest logical message: one INIT frame plus 128 continuations.
pub const MAX_MESSAGE_SIZE: usize = INIT_PAYLOAD + 128 * CONT_PAYLOAD;

/// Channel id used before one has been allocated.
pub const BROADCAST_CID: u32 = 0xffff_ffff;

/// CTAPHID commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cmd {
    /// Echo transaction
    Ping = 0x01,

    /// Encapsulated CTAP1/U2F APDU
    Msg = 0x03,

    /// Exclusive channel lock
    Lock = 0x04,

    /// Channel allocation handshake
    Init = 0x06,

    /// Visual/audible identification
    Wink = 0x08,

    /// Encapsulated CTAP2 message; the CBOR carrier
    Cbor = 0x10,

    /// Cancel the outstanding request on this channel
    Cancel = 0x11,

    /// Device is still processing; not part of any message
    Keepalive = 0x3b,

    /// Framing-level error report
    Error = 0x3f,
}

impl Cmd {
    /// Decode a command byte, ignoring the frame-type bit.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value & 0x7f {
            0x01 => Some(Cmd::Ping),
            0x03 => Some(Cmd::Msg),
            0x04 => Some(Cmd::Lock),
            0x06 => Some(Cmd::Init),
            0x08 => Some(Cmd::Wink),
            0x10 => Some(Cmd::Cbor),
            0x11 => Some(Cmd::Cancel),
            0x3b => Some(Cmd::Keepalive),
            0x3f => Some(Cmd::Error),
            _ => None,
        }
    }

    /// Command byte with the INIT frame-type bit set.
    pub fn to_init_byte(self) -> u8 {
        self as u8 | 0x80
    }
}

/// One HID report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: [u8; REPORT_SIZE],
}

impl Frame {
    pub fn from_bytes(data: [u8; REPORT_SIZE]) -> Self {
        Self { data }
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let data = data.try_into().map_err(|_| Error::InvalidFrame)?;
        Ok(Self { data })
    }

    pub fn as_bytes(&self) -> &[u8; REPORT_SIZE] {
        &self.data
    }

    pub fn cid(&self) -> u32 {
        u32::from_be_bytes(self.data[..4].try_into().unwrap())
    }

    pub fn is_init(&self) -> bool {
        self.data[4] & 0x80 != 0
    }

    /// Command, for INIT frames.
    pub fn cmd(&self) -> Option<Cmd> {
        if !self.is_init() {
            return None;
        }
        Cmd::from_u8(self.data[4])
    }

    /// Declared payload length, for INIT frames.
    pub fn payload_len(&self) -> Option<u16> {
        if !self.is_init() {
            return None;
        }
        Some(u16::from_be_bytes([self.data[5], self.data[6]]))
    }

    /// Sequence number, for CONT frames.
    pub fn seq(&self) -> Option<u8> {
        if self.is_init() {
            return None;
        }
        Some(self.data[4])
    }

    pub fn payload(&self) -> &[u8] {
        if self.is_init() {
            &self.data[7..]
        } else {
            &self.data[5..]
        }
    }
}

/// A logical CTAPHID message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub cid: u32,
    pub cmd: Cmd,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(cid: u32, cmd: Cmd, payload: Vec<u8>) -> Self {
        Self { cid, cmd, payload }
    }

    /// Fragment into zero-padded report frames.
    pub fn fragment(&self) -> Result<SmallVec<[Frame; 4]>> {
        if self.payload.len() > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge);
        }

        let mut frames = SmallVec::new();

        let mut init = [0u8; REPORT_SIZE];
        init[..4].copy_from_slice(&self.cid.to_be_bytes());
        init[4] = self.cmd.to_init_byte();
        init[5..7].copy_from_slice(&(self.payload.len() as u16).to_be_bytes());
        let head = self.payload.len().min(INIT_PAYLOAD);
        init[7..7 + head].copy_from_slice(&self.payload[..head]);
        frames.push(Frame::from_bytes(init));

        let mut remaining = &self.payload[head..];
        let mut seq = 0u8;
        while !remaining.is_empty() {
            let mut cont = [0u8; REPORT_SIZE];
            cont[..4].copy_from_slice(&self.cid.to_be_bytes());
            cont[4] = seq;
            let n = remaining.len().min(CONT_PAYLOAD);
            cont[5..5 + n].copy_from_slice(&remaining[..n]);
            frames.push(Frame::from_bytes(cont));
            remaining = &remaining[n..];
            seq += 1;
        }

        Ok(frames)
    }
}

/// Incremental message reassembly.
///
/// Feed frames as they arrive; frames for foreign channels and KEEPALIVE
/// frames are the caller's concern (they never reach the assembler).
#[derive(Debug)]
pub struct Assembler {
    cid: u32,
    cmd: Cmd,
    expected: usize,
    payload: Vec<u8>,
    next_seq: u8,
}

impl Assembler {
    /// Start reassembly from an INIT frame.
    pub fn start(frame: &Frame) -> Result<Self> {
        if !frame.is_init() {
            return Err(Error::InvalidFrame);
        }
        let cmd = frame.cmd().ok_or(Error::InvalidCommand)?;
        let expected = usize::from(frame.payload_len().ok_or(Error::InvalidFrame)?);
        if expected > MAX_MESSAGE_SIZE {
            return Err(Error::MessageTooLarge);
        }

        let head = expected.min(INIT_PAYLOAD);
        let mut payload = Vec::with_capacity(expected);
        payload.extend_from_slice(&frame.payload()[..head]);

        Ok(Self {
            cid: frame.cid(),
            cmd,
            expected,
            payload,
            next_seq: 0,
        })
    }

    pub fn cid(&self) -> u32 {
        self.cid
    }

    pub fn is_complete(&self) -> bool {
        self.payload.len() >= self.expected
    }

    /// Add a continuation frame. The channel must match and sequence
    /// numbers must arrive in order starting at zero.
    pub fn push(&mut self, frame: &Frame) -> Result<()> {
        if frame.is_init() {
            return Err(Error::InvalidSequence);
        }
        if frame.cid() != self.cid {
            return Err(Error::InvalidFrame);
        }
        let seq = frame.seq().ok_or(Error::InvalidFrame)?;
        if seq != self.next_seq {
            return Err(Error::InvalidSequence);
        }
        self.next_seq = self.next_seq.wrapping_add(1);

        let want = (self.expected - self.payload.len()).min(CONT_PAYLOAD);
        self.payload.extend_from_slice(&frame.payload()[..want]);
        Ok(())
    }

    /// Finish reassembly, yielding the logical message.
    pub fn finish(self) -> Result<Message> {
        if !self.is_complete() {
            return Err(Error::Incomplete);
        }
        Ok(Message {
            cid: self.cid,
            cmd: self.cmd,
            payload: self.payload,
        })
    }
}

/// One-shot reassembly of an in-order frame sequence.
pub fn reassemble(frames: &[Frame]) -> Result<Message> {
    let first = frames.first().ok_or(Error::InvalidFrame)?;
    let mut assembler = Assembler::start(first)?;
    for frame in &frames[1..] {
        if assembler.is_complete() {
            break;
        }
        assembler.push(frame)?;
    }
    assembler.finish()
}
