//! Device session
//!
//! A [`Device`] owns one authenticator: the opened I/O handle, the CTAPHID
//! channel negotiated by the INIT handshake, the capability bytes, and the
//! cached pinUvAuthToken. All traffic is routed through it, one command at
//! a time; a second command while one is in flight fails with
//! [`Error::Busy`].

use std::time::{Duration, Instant};

use log::{debug, trace};
use rand::RngCore;

use openfido_ctap::cbor::{self, Value};
use openfido_ctap::{AuthenticatorInfo, CtapCommand, StatusCode};
use openfido_transport::{
    Assembler, Backend, Cmd, DeviceInfo, DeviceIo, Frame, Message, BROADCAST_CID, REPORT_SIZE,
};

use crate::error::{Error, Result};
use crate::manifest;
use crate::token::PinToken;

/// Capability bits reported by the INIT handshake.
pub mod caps {
    pub const WINK: u8 = 0x01;
    pub const CBOR: u8 = 0x04;
    pub const NMSG: u8 = 0x08;
}

/// Bytes the INIT handshake reports, kept for the attribute readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAttr {
    pub protocol: u8,
    pub major: u8,
    pub minor: u8,
    pub build: u8,
    pub flags: u8,
}

/// Session with one authenticator.
pub struct Device {
    io: Option<Box<dyn DeviceIo>>,
    backend: Option<std::sync::Arc<dyn Backend>>,
    dev_info: Option<DeviceInfo>,
    cid: u32,
    attr: Option<DeviceAttr>,
    info: Option<AuthenticatorInfo>,
    token: Option<PinToken>,
    in_flight: bool,
    timeout_ms: i32,
    fixed_nonce: Option<[u8; 8]>,
}

impl Device {
    /// A session with the registered transport providers as its opener.
    pub fn new() -> Self {
        Self {
            io: None,
            backend: None,
            dev_info: None,
            cid: BROADCAST_CID,
            attr: None,
            info: None,
            token: None,
            in_flight: false,
            timeout_ms: -1,
            fixed_nonce: None,
        }
    }

    /// A session bound to a manifest entry; [`Device::open_with_info`]
    /// opens its path.
    pub fn new_with_info(info: DeviceInfo) -> Self {
        let mut dev = Self::new();
        dev.dev_info = Some(info);
        dev
    }

    /// Replace the transport capability. Rejected while a handle is open.
    pub fn set_io(&mut self, backend: std::sync::Arc<dyn Backend>) -> Result<()> {
        if self.io.is_some() {
            return Err(Error::InvalidState);
        }
        self.backend = Some(backend);
        Ok(())
    }

    /// Default timeout for operations without a caller-supplied one.
    /// `-1` blocks indefinitely, `0` polls once.
    pub fn set_timeout(&mut self, timeout_ms: i32) {
        self.timeout_ms = timeout_ms;
    }

    pub(crate) fn timeout(&self) -> i32 {
        self.timeout_ms
    }

    /// Pin the INIT nonce. Test hook replacing randomness so scripted
    /// devices can be driven deterministically; not for production use.
    #[doc(hidden)]
    pub fn set_init_nonce(&mut self, nonce: [u8; 8]) {
        self.fixed_nonce = Some(nonce);
    }

    /// Open the device at `path` and perform the INIT handshake.
    pub fn open(&mut self, path: &str) -> Result<()> {
        if self.io.is_some() {
            return Err(Error::InvalidState);
        }

        let io = match &self.backend {
            Some(backend) => backend.open(path).map_err(|e| {
                debug!("open {path}: {e}");
                Error::Internal
            })?,
            None => manifest::open_path(path)?,
        };
        self.io = Some(io);

        if let Err(e) = self.handshake() {
            self.io = None;
            return Err(e);
        }
        Ok(())
    }

    /// Open the device named by the manifest entry this session was
    /// created with.
    pub fn open_with_info(&mut self) -> Result<()> {
        let path = self
            .dev_info
            .as_ref()
            .map(|info| info.path.clone())
            .ok_or(Error::InvalidArgument)?;
        self.open(&path)
    }

    /// Release the handle and wipe session secrets.
    pub fn close(&mut self) {
        self.io = None;
        self.token = None;
        self.info = None;
        self.attr = None;
        self.cid = BROADCAST_CID;
    }

    /// Send a CANCEL frame on the current channel (broadcast if none has
    /// been negotiated). Best effort: no reply is awaited; the outstanding
    /// operation fails with [`Error::UserCanceled`] once the authenticator
    /// reacts.
    pub fn cancel(&mut self) -> Result<()> {
        let cid = self.cid;
        self.tx(Cmd::Cancel, Vec::new(), cid)
    }

    pub fn is_open(&self) -> bool {
        self.io.is_some()
    }

    /// CBOR capability: the device speaks CTAP2.
    pub fn is_fido2(&self) -> bool {
        self.flags() & caps::CBOR != 0
    }

    pub fn supports_wink(&self) -> bool {
        self.flags() & caps::WINK != 0
    }

    /// Route subsequent workflows down the legacy U2F path.
    pub fn force_u2f(&mut self) {
        if let Some(attr) = &mut self.attr {
            attr.flags &= !caps::CBOR;
        }
        self.info = None;
    }

    /// Re-enable the CTAP2 path after [`Device::force_u2f`].
    pub fn force_fido2(&mut self) {
        if let Some(attr) = &mut self.attr {
            attr.flags |= caps::CBOR;
        }
    }

    pub fn protocol(&self) -> u8 {
        self.attr.map(|a| a.protocol).unwrap_or(0)
    }

    pub fn major(&self) -> u8 {
        self.attr.map(|a| a.major).unwrap_or(0)
    }

    pub fn minor(&self) -> u8 {
        self.attr.map(|a| a.minor).unwrap_or(0)
    }

    pub fn build(&self) -> u8 {
        self.attr.map(|a| a.build).unwrap_or(0)
    }

    pub fn flags(&self) -> u8 {
        self.attr.map(|a| a.flags).unwrap_or(0)
    }

    /// Negotiated channel id; broadcast until `open` succeeds.
    pub fn channel(&self) -> u32 {
        self.cid
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.dev_info.as_ref()
    }

    /// Identify the device visually. Requires the wink capability.
    pub fn wink(&mut self) -> Result<()> {
        if !self.supports_wink() {
            return Err(Error::UnsupportedOption);
        }
        let timeout = self.timeout_ms;
        self.transaction(Cmd::Wink, Vec::new(), timeout)?;
        Ok(())
    }

    /// Hold an exclusive channel lock for up to `seconds` (0 releases).
    pub fn lock(&mut self, seconds: u8) -> Result<()> {
        if seconds > 10 {
            return Err(Error::InvalidArgument);
        }
        let timeout = self.timeout_ms;
        self.transaction(Cmd::Lock, vec![seconds], timeout)?;
        Ok(())
    }

    /// Fetch and cache the authenticatorGetInfo reply.
    pub fn get_info(&mut self) -> Result<&AuthenticatorInfo> {
        if self.info.is_none() {
            let timeout = self.timeout_ms;
            let value = self
                .cbor_transaction(CtapCommand::GetInfo, None, timeout)?
                .ok_or(Error::RxNotCbor)?;
            let info =
                AuthenticatorInfo::from_value(&value).ok_or(Error::RxInvalidCbor)?;
            self.info = Some(info);
        }
        Ok(self.info.as_ref().unwrap())
    }

    /// Factory-reset the authenticator. Must be issued shortly after
    /// power-up; the authenticator asks for user presence.
    pub fn reset(&mut self) -> Result<()> {
        let timeout = self.timeout_ms;
        self.cbor_transaction(CtapCommand::Reset, None, timeout)?;
        self.token = None;
        Ok(())
    }

    /// Ask the device to signal selection (user tap). Distinguishes one of
    /// several plugged-in authenticators.
    pub fn selection(&mut self) -> Result<()> {
        let timeout = self.timeout_ms;
        self.cbor_transaction(CtapCommand::Selection, None, timeout)?;
        Ok(())
    }

    /// Whether a pinUvAuthToken is currently cached on this session.
    pub fn has_pin_token(&self) -> bool {
        self.token.is_some()
    }

    // ------------------------------------------------------------ internals

    pub(crate) fn cache_token(&mut self, token: PinToken) {
        self.token = Some(token);
    }

    pub(crate) fn cached_token(&self) -> Option<&PinToken> {
        self.token.as_ref()
    }

    pub(crate) fn drop_token(&mut self) {
        self.token = None;
    }

    fn handshake(&mut self) -> Result<()> {
        let nonce: [u8; 8] = match self.fixed_nonce {
            Some(n) => n,
            None => {
                let mut n = [0u8; 8];
                rand::rngs::OsRng.fill_bytes(&mut n);
                n
            }
        };

        self.tx(Cmd::Init, nonce.to_vec(), BROADCAST_CID)?;
        let timeout = self.timeout_ms;
        let reply = self.rx(Cmd::Init, BROADCAST_CID, timeout)?;

        // nonce(8) || cid(4) || protocol || major || minor || build || flags
        if reply.payload.len() < 17 {
            return Err(Error::NotFidoDevice);
        }
        if reply.payload[..8] != nonce {
            debug!("INIT nonce mismatch");
            return Err(Error::Rx);
        }

        self.cid = u32::from_be_bytes(reply.payload[8..12].try_into().unwrap());
        self.attr = Some(DeviceAttr {
            protocol: reply.payload[12],
            major: reply.payload[13],
            minor: reply.payload[14],
            build: reply.payload[15],
            flags: reply.payload[16],
        });
        debug!(
            "INIT ok: cid=0x{:08x} protocol={} flags=0x{:02x}",
            self.cid,
            self.protocol(),
            self.flags()
        );
        Ok(())
    }

    /// One framed request/response exchange on this session's channel.
    pub(crate) fn transaction(
        &mut self,
        cmd: Cmd,
        payload: Vec<u8>,
        timeout_ms: i32,
    ) -> Result<Message> {
        if self.in_flight {
            return Err(Error::Busy);
        }
        self.in_flight = true;
        let result = self.transaction_inner(cmd, payload, timeout_ms);
        self.in_flight = false;
        result
    }

    fn transaction_inner(
        &mut self,
        cmd: Cmd,
        payload: Vec<u8>,
        timeout_ms: i32,
    ) -> Result<Message> {
        let cid = self.cid;
        self.tx(cmd, payload, cid)?;
        self.rx(cmd, cid, timeout_ms)
    }

    fn tx(&mut self, cmd: Cmd, payload: Vec<u8>, cid: u32) -> Result<()> {
        let io = self.io.as_mut().ok_or(Error::InvalidState)?;

        let message = Message::new(cid, cmd, payload);
        let frames = message.fragment().map_err(|_| Error::InvalidArgument)?;
        for frame in &frames {
            let written = io.write(frame.as_bytes()).map_err(|e| {
                debug!("tx: {e}");
                Error::Tx
            })?;
            if written != REPORT_SIZE {
                return Err(Error::Tx);
            }
        }
        trace!("tx {:?}: {} frame(s)", cmd, frames.len());
        Ok(())
    }

    /// Read frames until the expected reply reassembles. KEEPALIVE frames
    /// are skipped without consuming the wall-clock budget beyond the time
    /// they actually took; frames for foreign channels are dropped.
    fn rx(&mut self, expect: Cmd, cid: u32, timeout_ms: i32) -> Result<Message> {
        let io = self.io.as_mut().ok_or(Error::InvalidState)?;

        let deadline = (timeout_ms > 0)
            .then(|| Instant::now() + Duration::from_millis(timeout_ms as u64));
        let mut assembler: Option<Assembler> = None;

        loop {
            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(Error::Timeout);
                    }
                    d.duration_since(now).as_millis().min(i32::MAX as u128) as i32
                }
                None => timeout_ms,
            };

            let mut buf = [0u8; REPORT_SIZE];
            let n = io.read(&mut buf, remaining).map_err(|e| {
                debug!("rx: {e}");
                Error::Rx
            })?;
            if n == 0 {
                return Err(Error::Timeout);
            }
            if n != REPORT_SIZE {
                return Err(Error::Rx);
            }

            let frame = Frame::from_bytes(buf);
            if frame.cid() != cid {
                trace!("rx: dropping frame for cid 0x{:08x}", frame.cid());
                continue;
            }

            match &mut assembler {
                None => {
                    if !frame.is_init() {
                        // continuation with no transaction in progress
                        return Err(Error::Rx);
                    }
                    match frame.cmd() {
                        Some(Cmd::Keepalive) => {
                            trace!("rx: keepalive 0x{:02x}", frame.payload()[0]);
                            continue;
                        }
                        Some(Cmd::Error) => {
                            return Err(ctaphid_error(frame.payload()[0]));
                        }
                        Some(c) if c == expect => {
                            assembler =
                                Some(Assembler::start(&frame).map_err(|_| Error::Rx)?);
                        }
                        _ => return Err(Error::Rx),
                    }
                }
                Some(asm) => {
                    if frame.is_init() {
                        if frame.cmd() == Some(Cmd::Keepalive) {
                            continue;
                        }
                        return Err(Error::Rx);
                    }
                    asm.push(&frame).map_err(|_| Error::Rx)?;
                }
            }

            if assembler.as_ref().is_some_and(Assembler::is_complete) {
                return assembler
                    .take()
                    .expect("assembler checked above")
                    .finish()
                    .map_err(|_| Error::Rx);
            }
        }
    }

    /// CTAP2 dispatcher: `cmd_byte || canonical map` out, raw body back.
    /// Non-zero status bytes map onto the error taxonomy; statuses that
    /// invalidate the cached token drop it.
    pub(crate) fn cbor_transaction_raw(
        &mut self,
        cmd: CtapCommand,
        params: Option<&Value>,
        timeout_ms: i32,
    ) -> Result<Vec<u8>> {
        if !self.is_fido2() {
            return Err(Error::UnsupportedOption);
        }

        let mut payload = vec![cmd.to_u8()];
        if let Some(params) = params {
            payload.extend_from_slice(&cbor::encode(params));
        }

        let reply = self.transaction(Cmd::Cbor, payload, timeout_ms)?;
        let Some((&status, body)) = reply.payload.split_first() else {
            return Err(Error::RxInvalidLen);
        };

        let status = StatusCode::from_u8(status);
        if !status.is_ok() {
            debug!("{cmd:?}: {status}");
            // The token is tied to an authenticator power cycle the host
            // cannot observe; treat these refusals as staleness signals.
            if matches!(
                status,
                StatusCode::PinAuthInvalid
                    | StatusCode::PinRequired
                    | StatusCode::PinTokenExpired
            ) {
                self.token = None;
            }
            return Err(status.into());
        }
        Ok(body.to_vec())
    }

    /// CTAP2 dispatcher with a decoded reply body. Lenient decoding:
    /// deployed authenticators emit non-canonical CBOR.
    pub(crate) fn cbor_transaction(
        &mut self,
        cmd: CtapCommand,
        params: Option<&Value>,
        timeout_ms: i32,
    ) -> Result<Option<Value>> {
        let body = self.cbor_transaction_raw(cmd, params, timeout_ms)?;
        if body.is_empty() {
            return Ok(None);
        }
        let (value, used) = cbor::decode(&body)?;
        if used != body.len() {
            return Err(Error::RxInvalidLen);
        }
        Ok(Some(value))
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("open", &self.is_open())
            .field("cid", &format_args!("0x{:08x}", self.cid))
            .field("attr", &self.attr)
            .finish()
    }
}

/// CTAPHID-level error bytes carried by ERROR frames.
fn ctaphid_error(code: u8) -> Error {
    match code {
        0x05 => Error::Timeout,
        0x06 => Error::Busy,
        0x0b => Error::InvalidChannel,
        _ => Error::Rx,
    }
}
