//! CTAPHID INIT handshake behaviour

mod common;

use common::{ok_reply, open_device, VirtualAuthenticator, VirtualBackend, DEFAULT_CID};
use openfido::{Device, Error};
use std::sync::Arc;

fn no_ctap2() -> common::CborHandler {
    Box::new(|_, _| panic!("no CTAP2 command expected"))
}

#[test]
fn open_negotiates_channel_and_capabilities() {
    let authenticator = VirtualAuthenticator::new(no_ctap2());

    let mut dev = Device::new();
    dev.set_io(Arc::new(VirtualBackend::new(authenticator)))
        .unwrap();
    dev.set_timeout(1000);
    dev.set_init_nonce([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);

    dev.open("virtual").unwrap();

    assert!(dev.is_open());
    assert!(dev.is_fido2());
    assert!(dev.supports_wink());
    assert_eq!(dev.channel(), DEFAULT_CID);
    assert_eq!(dev.protocol(), 2);
    assert_eq!(dev.major(), 1);
    assert_eq!(dev.minor(), 0);
    assert_eq!(dev.build(), 0);
    assert_eq!(dev.flags(), 0x05);
}

#[test]
fn mismatched_nonce_fails_open_and_closes_handle() {
    let mut authenticator = VirtualAuthenticator::new(no_ctap2());
    authenticator.wrong_nonce = true;

    let mut dev = Device::new();
    dev.set_io(Arc::new(VirtualBackend::new(authenticator)))
        .unwrap();
    dev.set_timeout(1000);

    assert_eq!(dev.open("virtual"), Err(Error::Rx));
    assert!(!dev.is_open());
    assert!(!dev.is_fido2());
}

#[test]
fn second_open_is_rejected() {
    let (mut dev, _, _) = open_device(VirtualAuthenticator::new(no_ctap2()));
    assert_eq!(dev.open("virtual"), Err(Error::InvalidState));
}

#[test]
fn close_resets_session_state() {
    let (mut dev, _, _) = open_device(VirtualAuthenticator::new(no_ctap2()));
    assert!(dev.is_open());

    dev.close();
    assert!(!dev.is_open());
    assert_eq!(dev.channel(), 0xffff_ffff);
    assert_eq!(dev.flags(), 0);
}

#[test]
fn set_io_rejected_while_open() {
    let (mut dev, _, _) = open_device(VirtualAuthenticator::new(no_ctap2()));
    let spare = VirtualAuthenticator::new(Box::new(|_, _| ok_reply(None)));
    assert_eq!(
        dev.set_io(Arc::new(VirtualBackend::new(spare))),
        Err(Error::InvalidState)
    );
}

#[test]
fn force_u2f_gates_ctap2_and_force_fido2_restores() {
    let (mut dev, _, _) = open_device(VirtualAuthenticator::new(Box::new(|cmd, _| {
        assert_eq!(cmd, 0x0b);
        ok_reply(None)
    })));

    dev.force_u2f();
    assert!(!dev.is_fido2());
    assert_eq!(dev.selection(), Err(Error::UnsupportedOption));

    dev.force_fido2();
    assert!(dev.is_fido2());
    dev.selection().unwrap();
}

#[test]
fn wink_round_trip() {
    let (mut dev, _, hid) = open_device(VirtualAuthenticator::new(no_ctap2()));
    dev.wink().unwrap();
    assert!(hid
        .lock()
        .unwrap()
        .contains(&openfido_transport::Cmd::Wink));
}

#[test]
fn unanswered_command_times_out() {
    let mut authenticator = VirtualAuthenticator::new(Box::new(|_, _| ok_reply(None)));
    authenticator.drop_replies = true;

    let (mut dev, _, _) = open_device(authenticator);
    assert_eq!(dev.selection(), Err(Error::Timeout));
}

#[test]
fn cancel_sends_cancel_frame_without_waiting() {
    let (mut dev, _, hid) = open_device(VirtualAuthenticator::new(no_ctap2()));
    dev.cancel().unwrap();
    assert_eq!(
        hid.lock().unwrap().last(),
        Some(&openfido_transport::Cmd::Cancel)
    );
}
