//! Transport provider registry
//!
//! Providers register process-wide, in order; enumeration walks them in
//! insertion order and concatenates their device listings. [`crate::init`]
//! registers the built-in HID backend; embedders can append their own
//! (NFC bridges, virtual devices for tests).

use std::sync::{Arc, Mutex, OnceLock};

use log::debug;

use openfido_transport::{Backend, DeviceInfo, HidBackend};

use crate::error::{Error, Result};

fn providers() -> &'static Mutex<Vec<Arc<dyn Backend>>> {
    static PROVIDERS: OnceLock<Mutex<Vec<Arc<dyn Backend>>>> = OnceLock::new();
    PROVIDERS.get_or_init(|| Mutex::new(Vec::new()))
}

/// Append a transport provider. Registration is additive; duplicates are
/// the caller's responsibility.
pub fn register_provider(backend: Arc<dyn Backend>) {
    providers().lock().expect("provider registry poisoned").push(backend);
}

/// Register the built-in hidapi backend, once.
pub(crate) fn register_hid_backend() {
    match HidBackend::new() {
        Ok(backend) => register_provider(Arc::new(backend)),
        Err(e) => debug!("hid backend unavailable: {e}"),
    }
}

/// Drop all registered providers.
pub(crate) fn clear() {
    providers().lock().expect("provider registry poisoned").clear();
}

/// List devices from every provider, in registration order, up to `max`
/// entries.
pub fn manifest(max: usize) -> Result<Vec<DeviceInfo>> {
    let providers = providers().lock().expect("provider registry poisoned");

    let mut devices = Vec::new();
    for provider in providers.iter() {
        if devices.len() >= max {
            break;
        }
        let listed = provider.manifest().map_err(|e| {
            debug!("manifest: {e}");
            Error::Internal
        })?;
        devices.extend(listed.into_iter().take(max - devices.len()));
    }
    Ok(devices)
}

/// Open `path` with the first provider that accepts it.
pub(crate) fn open_path(path: &str) -> Result<Box<dyn openfido_transport::DeviceIo>> {
    let providers = providers().lock().expect("provider registry poisoned");
    if providers.is_empty() {
        return Err(Error::InvalidState);
    }

    for provider in providers.iter() {
        match provider.open(path) {
            Ok(io) => return Ok(io),
            Err(e) => debug!("open {path}: {e}"),
        }
    }
    Err(Error::NotFidoDevice)
}
