//! Credential management pagination and authentication

mod common;

use std::sync::{Arc, Mutex};

use common::{info_body, ok_reply, open_device, PinAuthenticator, VirtualAuthenticator};
use openfido_ctap::cbor::{self, MapBuilder, Value};
use openfido_ctap::{RelyingParty, User};

fn rp_reply(id: &str, total: Option<u64>) -> Vec<u8> {
    let mut builder = MapBuilder::new()
        .insert(0x03, RelyingParty::new(id).to_value())
        .insert(0x04, vec![0xaa; 32]);
    if let Some(total) = total {
        builder = builder.insert(0x05, total);
    }
    ok_reply(Some(builder.build()))
}

fn cose_key() -> Value {
    MapBuilder::new()
        .insert(1, 2i64)
        .insert(3, -7i64)
        .insert(-1, 1i64)
        .insert(-2, vec![0u8; 32])
        .insert(-3, vec![0u8; 32])
        .build()
}

fn credential_reply(id: u8, total: Option<u64>) -> Vec<u8> {
    let mut builder = MapBuilder::new()
        .insert(0x06, User::new(vec![id]).to_value())
        .insert(
            0x07,
            openfido_ctap::CredentialDescriptor::public_key(vec![id]).to_value(),
        )
        .insert(0x08, cose_key());
    if let Some(total) = total {
        builder = builder.insert(0x09, total);
    }
    ok_reply(Some(builder.build()))
}

/// Driver implementing getInfo, clientPIN, and credentialManagement with a
/// MAC check on every authenticated sub-command.
fn mgmt_handler(
    pin_state: Arc<Mutex<PinAuthenticator>>,
    rps: Vec<&'static str>,
    creds: Vec<u8>,
) -> common::CborHandler {
    let mut rp_queue: Vec<&'static str> = rps.iter().rev().cloned().collect();
    let mut cred_queue: Vec<u8> = creds.iter().rev().cloned().collect();
    let rp_total = rps.len() as u64;
    let cred_total = creds.len() as u64;

    Box::new(move |cmd: u8, params: &[u8]| match cmd {
        0x04 => ok_reply(Some(info_body(&["FIDO_2_1"], 1200))),
        0x06 => pin_state.lock().unwrap().handle(params),
        0x0a => {
            let (map, _) = cbor::decode(params).unwrap();
            let sub = map.map_get(0x01).unwrap().as_unsigned().unwrap() as u8;

            // Authenticated sub-commands carry a MAC over
            // subCommand || subCommandParams
            if matches!(sub, 0x01 | 0x02 | 0x04 | 0x06 | 0x07) {
                let mac = map.map_get(0x04).unwrap().as_bytes().unwrap();
                let mut message = vec![sub];
                if let Some(sub_params) = map.map_get(0x02) {
                    message.extend_from_slice(&cbor::encode(sub_params));
                }
                assert!(
                    pin_state.lock().unwrap().check_token_mac(&message, mac),
                    "bad pinUvAuthParam on sub-command 0x{sub:02x}"
                );
            }

            match sub {
                0x01 => ok_reply(Some(
                    MapBuilder::new().insert(0x01, 5u64).insert(0x02, 20u64).build(),
                )),
                0x02 => rp_reply(rp_queue.pop().unwrap(), Some(rp_total)),
                0x03 => rp_reply(rp_queue.pop().unwrap(), None),
                0x04 => credential_reply(cred_queue.pop().unwrap(), Some(cred_total)),
                0x05 => credential_reply(cred_queue.pop().unwrap(), None),
                0x06 | 0x07 => ok_reply(None),
                other => panic!("unexpected sub-command 0x{other:02x}"),
            }
        }
        other => panic!("unexpected command 0x{other:02x}"),
    })
}

#[test]
fn metadata_is_authenticated() {
    let pin_state = Arc::new(Mutex::new(PinAuthenticator::new("123456")));
    let handler = mgmt_handler(pin_state.clone(), vec![], vec![]);

    let (mut dev, _, _) = open_device(VirtualAuthenticator::new(handler));
    let metadata = dev.credential_metadata(Some("123456")).unwrap();
    assert_eq!(metadata.existing, 5);
    assert_eq!(metadata.remaining, 20);
}

#[test]
fn rp_enumeration_pages_through_all_entries() {
    let pin_state = Arc::new(Mutex::new(PinAuthenticator::new("123456")));
    let handler = mgmt_handler(
        pin_state.clone(),
        vec!["a.example", "b.example", "c.example"],
        vec![],
    );

    let (mut dev, commands, _) = open_device(VirtualAuthenticator::new(handler));
    let rps = dev.enumerate_rps(Some("123456")).unwrap();

    let ids: Vec<&str> = rps.iter().map(|r| r.rp.id.as_str()).collect();
    assert_eq!(ids, ["a.example", "b.example", "c.example"]);

    // getInfo, two clientPIN exchanges, then one begin + two getNext
    let mgmt_count = commands
        .lock()
        .unwrap()
        .iter()
        .filter(|&&c| c == 0x0a)
        .count();
    assert_eq!(mgmt_count, 3);
}

#[test]
fn credential_enumeration_pages_through_all_entries() {
    let pin_state = Arc::new(Mutex::new(PinAuthenticator::new("123456")));
    let handler = mgmt_handler(pin_state.clone(), vec![], vec![1, 2]);

    let (mut dev, _, _) = open_device(VirtualAuthenticator::new(handler));
    let creds = dev
        .enumerate_credentials(&[0xaa; 32], Some("123456"))
        .unwrap();

    assert_eq!(creds.len(), 2);
    assert_eq!(creds[0].credential_id, [1]);
    assert_eq!(creds[1].credential_id, [2]);
    assert_eq!(creds[0].user.id, [1]);
}

#[test]
fn delete_and_update_round_trip() {
    let pin_state = Arc::new(Mutex::new(PinAuthenticator::new("123456")));
    let handler = mgmt_handler(pin_state.clone(), vec![], vec![]);

    let (mut dev, _, _) = open_device(VirtualAuthenticator::new(handler));
    dev.delete_credential(&[9, 8, 7], Some("123456")).unwrap();
    dev.update_user_info(&[9, 8, 7], &User::new(vec![1]).with_name("alice"), None)
        .unwrap();
}

#[test]
fn enumeration_without_credentials_is_empty() {
    let pin_state = Arc::new(Mutex::new(PinAuthenticator::new("123456")));

    let handler_state = pin_state.clone();
    let handler = Box::new(move |cmd: u8, params: &[u8]| match cmd {
        0x04 => ok_reply(Some(info_body(&["FIDO_2_1"], 1200))),
        0x06 => handler_state.lock().unwrap().handle(params),
        // CTAP2_ERR_NO_CREDENTIALS
        0x0a => vec![0x2e],
        other => panic!("unexpected command 0x{other:02x}"),
    });

    let (mut dev, _, _) = open_device(VirtualAuthenticator::new(handler));
    assert!(dev.enumerate_rps(Some("123456")).unwrap().is_empty());
}
