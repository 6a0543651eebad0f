//! Large-blob array transfers

mod common;

use std::sync::{Arc, Mutex};

use common::{ok_reply, open_device, PinAuthenticator, VirtualAuthenticator};
use openfido_ctap::cbor::{self, MapBuilder, Value};
use sha2::{Digest, Sha256};

/// Serialized array: `body || LEFT16(SHA-256(body))`.
fn serialized_array(body: &[u8]) -> Vec<u8> {
    let mut out = body.to_vec();
    let digest = Sha256::digest(body);
    out.extend_from_slice(&digest[..16]);
    out
}

fn info_with_blob_support() -> Value {
    // maxMsgSize 128 gives maxFragmentLength 64
    MapBuilder::new()
        .insert(0x01, Value::Array(vec![Value::from("FIDO_2_1")]))
        .insert(0x03, vec![0u8; 16])
        .insert(0x05, 128u64)
        .insert(
            0x06,
            Value::Array(vec![Value::Unsigned(2), Value::Unsigned(1)]),
        )
        .insert(0x0b, 1024u64)
        .build()
}

#[test]
fn read_fetches_fragments_and_verifies_checksum() {
    // 134-byte body + 16-byte checksum = 150 bytes on the device
    let body: Vec<u8> = (0..134u8).collect();
    let stored = serialized_array(&body);
    assert_eq!(stored.len(), 150);

    let observed = Arc::new(Mutex::new(Vec::new()));
    let handler_observed = observed.clone();
    let handler_stored = stored.clone();
    let handler = Box::new(move |cmd: u8, params: &[u8]| match cmd {
        0x04 => ok_reply(Some(info_with_blob_support())),
        0x0c => {
            let (map, _) = cbor::decode(params).unwrap();
            let get = map.map_get(0x01).unwrap().as_unsigned().unwrap() as usize;
            let offset = map.map_get(0x03).unwrap().as_unsigned().unwrap() as usize;
            handler_observed.lock().unwrap().push((offset, get));

            let end = (offset + get).min(handler_stored.len());
            ok_reply(Some(
                MapBuilder::new()
                    .insert(0x01, handler_stored[offset..end].to_vec())
                    .build(),
            ))
        }
        other => panic!("unexpected command 0x{other:02x}"),
    });

    let (mut dev, _, _) = open_device(VirtualAuthenticator::new(handler));
    let read = dev.read_large_blob_array().unwrap();
    assert_eq!(read, body);

    // Three gets at offsets 0, 64, 128, yielding 64 + 64 + 22 bytes
    assert_eq!(
        observed.lock().unwrap().as_slice(),
        &[(0, 64), (64, 64), (128, 64)]
    );
}

#[test]
fn corrupted_checksum_is_rejected() {
    let mut stored = serialized_array(&[0x42; 40]);
    let last = stored.len() - 1;
    stored[last] ^= 0xff;

    let handler = Box::new(move |cmd: u8, _params: &[u8]| match cmd {
        0x04 => ok_reply(Some(info_with_blob_support())),
        0x0c => ok_reply(Some(MapBuilder::new().insert(0x01, stored.clone()).build())),
        other => panic!("unexpected command 0x{other:02x}"),
    });

    let (mut dev, _, _) = open_device(VirtualAuthenticator::new(handler));
    assert_eq!(
        dev.read_large_blob_array(),
        Err(openfido::Error::RxInvalidSig)
    );
}

#[test]
fn write_fragments_with_authenticated_offsets() {
    let pin_state = Arc::new(Mutex::new(PinAuthenticator::new("123456")));
    let written = Arc::new(Mutex::new(Vec::new()));

    let handler_state = pin_state.clone();
    let handler_written = written.clone();
    let handler = Box::new(move |cmd: u8, params: &[u8]| match cmd {
        0x04 => ok_reply(Some(info_with_blob_support())),
        0x06 => handler_state.lock().unwrap().handle(params),
        0x0c => {
            let (map, _) = cbor::decode(params).unwrap();
            let fragment = map.map_get(0x02).unwrap().as_bytes().unwrap().to_vec();
            let offset = map.map_get(0x03).unwrap().as_unsigned().unwrap();
            let total = map.map_get(0x04).and_then(Value::as_unsigned);
            let mac = map.map_get(0x05).unwrap().as_bytes().unwrap();

            // MAC preimage fixed by CTAP 2.1
            let mut message = vec![0xff; 32];
            message.extend_from_slice(&[0x0c, 0x00]);
            message.extend_from_slice(&(offset as u32).to_le_bytes());
            message.extend_from_slice(&Sha256::digest(&fragment));
            assert!(handler_state.lock().unwrap().check_token_mac(&message, mac));

            handler_written
                .lock()
                .unwrap()
                .push((offset, total, fragment));
            ok_reply(None)
        }
        other => panic!("unexpected command 0x{other:02x}"),
    });

    let (mut dev, _, _) = open_device(VirtualAuthenticator::new(handler));
    let body: Vec<u8> = (0..100u8).collect();
    dev.write_large_blob_array(&body, Some("123456")).unwrap();

    let written = written.lock().unwrap();
    // 100 + 16 checksum = 116 bytes in fragments of 64
    assert_eq!(written.len(), 2);
    assert_eq!(written[0].0, 0);
    assert_eq!(written[0].1, Some(116));
    assert_eq!(written[0].2.len(), 64);
    assert_eq!(written[1].0, 64);
    assert_eq!(written[1].1, None);
    assert_eq!(written[1].2.len(), 52);

    // Device-side reassembly must checksum cleanly
    let mut reassembled = Vec::new();
    for (_, _, fragment) in written.iter() {
        reassembled.extend_from_slice(fragment);
    }
    assert_eq!(reassembled, serialized_array(&body));
}

#[test]
fn oversized_write_fails_before_touching_the_device() {
    let handler = Box::new(move |cmd: u8, _params: &[u8]| match cmd {
        0x04 => ok_reply(Some(info_with_blob_support())),
        other => panic!("unexpected command 0x{other:02x}"),
    });

    let (mut dev, _, _) = open_device(VirtualAuthenticator::new(handler));
    assert_eq!(
        dev.write_large_blob_array(&[0u8; 2000], None),
        Err(openfido::Error::LargeBlobStorageFull)
    );
}
