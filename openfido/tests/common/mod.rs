#![allow(dead_code)]

//! Scripted in-memory authenticator for integration tests
//!
//! Implements `DeviceIo` directly: writes are reassembled into CTAPHID
//! messages, handled, and the reply frames queued for subsequent reads.
//! CTAP2 semantics come from a per-test handler closure; the CTAPHID layer
//! (INIT handshake, keepalives, foreign-channel noise) is built in.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use openfido::{Backend, Device, DeviceInfo, DeviceIo};
use openfido_crypto::pin_protocol::v2;
use openfido_crypto::PlatformKeyAgreement;
use openfido_ctap::cbor::{self, MapBuilder, Value};
use openfido_transport::{Assembler, Cmd, Frame, Message, BROADCAST_CID, REPORT_SIZE};

pub const DEFAULT_CID: u32 = 0xcafe_babe;

/// CTAP2 command dispatch: `(command_byte, raw_params) -> status || body`.
pub type CborHandler = Box<dyn FnMut(u8, &[u8]) -> Vec<u8> + Send>;

/// Build a success reply with an optional CBOR body.
pub fn ok_reply(body: Option<Value>) -> Vec<u8> {
    let mut out = vec![0x00];
    if let Some(body) = body {
        out.extend_from_slice(&cbor::encode(&body));
    }
    out
}

/// Build an error reply.
pub fn status_reply(status: u8) -> Vec<u8> {
    vec![status]
}

/// A getInfo body with the fields the client consults.
pub fn info_body(versions: &[&str], max_msg_size: u64) -> Value {
    MapBuilder::new()
        .insert(
            0x01,
            Value::Array(versions.iter().map(|v| Value::from(*v)).collect()),
        )
        .insert(0x03, vec![0u8; 16])
        .insert(0x05, max_msg_size)
        .insert(
            0x06,
            Value::Array(vec![Value::Unsigned(2), Value::Unsigned(1)]),
        )
        .build()
}

pub struct VirtualAuthenticator {
    cid: u32,
    flags: u8,
    protocol: u8,
    reads: VecDeque<[u8; REPORT_SIZE]>,
    assembler: Option<Assembler>,
    handler: CborHandler,

    /// Echo a corrupted nonce in the INIT reply
    pub wrong_nonce: bool,

    /// Keepalive frames injected before every CBOR reply
    pub keepalives_before_reply: usize,

    /// Frames on an unrelated channel injected before every reply
    pub foreign_frames_before_reply: usize,

    /// Swallow CBOR replies entirely, leaving the client to time out
    pub drop_replies: bool,

    /// Every CTAP2 command byte the client sent, in order
    pub commands: Arc<Mutex<Vec<u8>>>,

    /// Every CTAPHID command observed, in order
    pub hid_commands: Arc<Mutex<Vec<Cmd>>>,
}

impl VirtualAuthenticator {
    pub fn new(handler: CborHandler) -> Self {
        Self {
            cid: DEFAULT_CID,
            // wink | cbor
            flags: 0x05,
            protocol: 2,
            reads: VecDeque::new(),
            assembler: None,
            handler,
            wrong_nonce: false,
            keepalives_before_reply: 0,
            foreign_frames_before_reply: 0,
            drop_replies: false,
            commands: Arc::new(Mutex::new(Vec::new())),
            hid_commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn queue_message(&mut self, cid: u32, cmd: Cmd, payload: Vec<u8>) {
        let frames = Message::new(cid, cmd, payload).fragment().unwrap();
        for frame in frames {
            self.reads.push_back(*frame.as_bytes());
        }
    }

    fn queue_noise(&mut self) {
        for _ in 0..self.foreign_frames_before_reply {
            let mut frame = [0u8; REPORT_SIZE];
            frame[..4].copy_from_slice(&0x1111_2222u32.to_be_bytes());
            frame[4] = Cmd::Cbor.to_init_byte();
            frame[6] = 1;
            self.reads.push_back(frame);
        }
        for _ in 0..self.keepalives_before_reply {
            let mut frame = [0u8; REPORT_SIZE];
            frame[..4].copy_from_slice(&self.cid.to_be_bytes());
            frame[4] = Cmd::Keepalive.to_init_byte();
            frame[6] = 1;
            // 0x01 = processing
            frame[7] = 0x01;
            self.reads.push_back(frame);
        }
    }

    fn handle_message(&mut self, message: Message) {
        self.hid_commands.lock().unwrap().push(message.cmd);

        match message.cmd {
            Cmd::Init => {
                let mut payload = message.payload[..8].to_vec();
                if self.wrong_nonce {
                    payload[0] ^= 0xff;
                }
                payload.extend_from_slice(&self.cid.to_be_bytes());
                payload.push(self.protocol);
                payload.extend_from_slice(&[1, 0, 0]);
                payload.push(self.flags);
                self.queue_message(BROADCAST_CID, Cmd::Init, payload);
            }
            Cmd::Cbor => {
                let cmd_byte = message.payload[0];
                self.commands.lock().unwrap().push(cmd_byte);
                let reply = (self.handler)(cmd_byte, &message.payload[1..]);
                self.queue_noise();
                if self.drop_replies {
                    return;
                }
                let cid = self.cid;
                self.queue_message(cid, Cmd::Cbor, reply);
            }
            Cmd::Wink | Cmd::Lock => {
                let cid = self.cid;
                self.queue_message(cid, message.cmd, Vec::new());
            }
            // CANCEL gets no reply of its own
            Cmd::Cancel => {}
            other => panic!("unexpected CTAPHID command {other:?}"),
        }
    }
}

impl DeviceIo for VirtualAuthenticator {
    fn read(&mut self, buf: &mut [u8], _timeout_ms: i32) -> openfido_transport::Result<usize> {
        match self.reads.pop_front() {
            Some(frame) => {
                buf[..REPORT_SIZE].copy_from_slice(&frame);
                Ok(REPORT_SIZE)
            }
            None => Ok(0),
        }
    }

    fn write(&mut self, data: &[u8]) -> openfido_transport::Result<usize> {
        assert_eq!(data.len(), REPORT_SIZE, "client must write whole reports");
        let frame = Frame::from_slice(data).unwrap();

        if frame.is_init() {
            let assembler = Assembler::start(&frame).unwrap();
            if assembler.is_complete() {
                self.handle_message(assembler.finish().unwrap());
            } else {
                self.assembler = Some(assembler);
            }
        } else {
            let mut assembler = self.assembler.take().expect("continuation without init");
            assembler.push(&frame).unwrap();
            if assembler.is_complete() {
                self.handle_message(assembler.finish().unwrap());
            } else {
                self.assembler = Some(assembler);
            }
        }
        Ok(REPORT_SIZE)
    }
}

/// Backend handing out one prepared virtual authenticator.
pub struct VirtualBackend {
    device: Mutex<Option<VirtualAuthenticator>>,
}

impl VirtualBackend {
    pub fn new(device: VirtualAuthenticator) -> Self {
        Self {
            device: Mutex::new(Some(device)),
        }
    }
}

impl Backend for VirtualBackend {
    fn manifest(&self) -> openfido_transport::Result<Vec<DeviceInfo>> {
        Ok(vec![DeviceInfo {
            path: "virtual".into(),
            vendor_id: 0x1234,
            product_id: 0x5678,
            manufacturer: Some("openfido".into()),
            product: Some("virtual authenticator".into()),
        }])
    }

    fn open(&self, _path: &str) -> openfido_transport::Result<Box<dyn DeviceIo>> {
        let device = self
            .device
            .lock()
            .unwrap()
            .take()
            .ok_or(openfido_transport::Error::DeviceNotFound)?;
        Ok(Box::new(device))
    }
}

/// Open a session against a virtual authenticator, returning the session
/// and the observation handles.
pub fn open_device(
    authenticator: VirtualAuthenticator,
) -> (Device, Arc<Mutex<Vec<u8>>>, Arc<Mutex<Vec<Cmd>>>) {
    let commands = authenticator.commands.clone();
    let hid_commands = authenticator.hid_commands.clone();

    let mut dev = Device::new();
    dev.set_io(Arc::new(VirtualBackend::new(authenticator)))
        .unwrap();
    dev.set_timeout(1000);
    dev.open("virtual").unwrap();
    (dev, commands, hid_commands)
}

/// Authenticator-side PIN protocol 2 state: answers getKeyAgreement and
/// token requests, and checks MACs the way a real device would.
pub struct PinAuthenticator {
    keypair: PlatformKeyAgreement,
    pub pin: String,
    pub token: [u8; 32],
    /// Shared secret derived from the platform key in the last request
    pub secret: Option<[u8; 64]>,
}

impl PinAuthenticator {
    pub fn new(pin: &str) -> Self {
        Self {
            keypair: PlatformKeyAgreement::generate(),
            pin: pin.into(),
            token: [0x5a; 32],
            secret: None,
        }
    }

    /// Derive the shared secret from the platform key at map key 3.
    pub fn derive_secret(&mut self, params: &Value) -> [u8; 64] {
        let platform_key = params.map_get(0x03).expect("keyAgreement present");
        let x = platform_key.map_get(-2).unwrap().as_bytes().unwrap();
        let y = platform_key.map_get(-3).unwrap().as_bytes().unwrap();
        let mut point = vec![0x04];
        point.extend_from_slice(x);
        point.extend_from_slice(y);

        let ecdh_x = self.keypair.shared_point_x(&point).unwrap();
        let secret = v2::kdf(&ecdh_x);
        self.secret = Some(secret);
        secret
    }

    /// Handle a clientPIN request, or panic on malformed input.
    pub fn handle(&mut self, params: &[u8]) -> Vec<u8> {
        let (params, _) = cbor::decode(params).unwrap();
        let sub = params.map_get(0x02).unwrap().as_unsigned().unwrap();

        match sub {
            // getKeyAgreement
            0x02 => {
                let (x, y) = self.keypair.public_coordinates();
                let key = MapBuilder::new()
                    .insert(1, 2i64)
                    .insert(3, -25i64)
                    .insert(-1, 1i64)
                    .insert(-2, x.to_vec())
                    .insert(-3, y.to_vec())
                    .build();
                ok_reply(Some(MapBuilder::new().insert(0x01, key).build()))
            }
            // getPinUvAuthTokenUsingPinWithPermissions
            0x09 => {
                let secret = self.derive_secret(&params);
                let pin_hash_enc = params.map_get(0x06).unwrap().as_bytes().unwrap();
                let pin_hash = v2::decrypt(&secret, pin_hash_enc).unwrap();

                use sha2::{Digest, Sha256};
                let expected = Sha256::digest(self.pin.as_bytes());
                if pin_hash != expected[..16] {
                    return status_reply(0x31);
                }

                let token_enc = v2::encrypt(&secret, &self.token).unwrap();
                ok_reply(Some(MapBuilder::new().insert(0x02, token_enc).build()))
            }
            other => panic!("unhandled clientPIN sub-command {other}"),
        }
    }

    /// Validate a pinUvAuthParam computed with the issued token.
    pub fn check_token_mac(&self, data: &[u8], mac: &[u8]) -> bool {
        v2::authenticate(&self.token, data).as_slice() == mac
    }
}
