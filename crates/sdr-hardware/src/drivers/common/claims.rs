//! Exclusive device ownership.
//!
//! Opening a device claims it until the backend is released, so two boards
//! (or two sessions) cannot drive the same dongle.

use parking_lot::Mutex;
use sdr_core::error::{DriverError, DriverErrorKind};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Set of currently claimed device keys (`rtl:00000001`, `uhd:30A1F9B`, ...).
#[derive(Debug, Clone, Default)]
pub struct DeviceClaims {
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl DeviceClaims {
    /// Empty claim set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `serial` for `backend`.
    pub fn claim(&self, backend: &str, serial: &str) -> Result<ClaimGuard, DriverError> {
        let key = format!("{}:{}", backend, serial);
        let mut claimed = self.claimed.lock();
        if !claimed.insert(key.clone()) {
            return Err(DriverError::new(
                backend,
                DriverErrorKind::Initialization,
                format!("device {} is already in use", serial),
            ));
        }
        tracing::debug!(device = %key, "claimed device");
        Ok(ClaimGuard {
            key,
            claims: self.clone(),
        })
    }

    /// Whether `serial` is currently claimed.
    pub fn is_claimed(&self, backend: &str, serial: &str) -> bool {
        self.claimed.lock().contains(&format!("{}:{}", backend, serial))
    }
}

/// Releases its claim when dropped.
#[derive(Debug)]
pub struct ClaimGuard {
    key: String,
    claims: DeviceClaims,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.claims.claimed.lock().remove(&self.key);
        tracing::debug!(device = %self.key, "released device");
    }
}

/// Open/released state of one backend.
#[derive(Debug)]
pub struct DeviceHandle {
    backend: &'static str,
    open: AtomicBool,
    guard: Mutex<Option<ClaimGuard>>,
}

impl DeviceHandle {
    /// Open handle owning `guard`. Devices without a claim (files) pass `None`.
    pub fn new(backend: &'static str, guard: Option<ClaimGuard>) -> Self {
        Self {
            backend,
            open: AtomicBool::new(true),
            guard: Mutex::new(guard),
        }
    }

    /// Fail with a communication error once the device was released.
    pub fn ensure_open(&self) -> Result<(), DriverError> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(DriverError::new(
                self.backend,
                DriverErrorKind::Communication,
                "device has been released",
            ))
        }
    }

    /// Whether the device is still open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Drop the claim. Idempotent.
    pub fn release(&self) {
        self.open.store(false, Ordering::Release);
        self.guard.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_fails_until_release() {
        let claims = DeviceClaims::new();
        let guard = claims.claim("rtl", "00000001").unwrap();
        let err = claims.claim("rtl", "00000001").unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Initialization);
        assert!(claims.claim("rtl", "00000002").is_ok());
        drop(guard);
        assert!(!claims.is_claimed("rtl", "00000001"));
        assert!(claims.claim("rtl", "00000001").is_ok());
    }

    #[test]
    fn handle_release_frees_claim() {
        let claims = DeviceClaims::new();
        let handle = DeviceHandle::new("uhd", Some(claims.claim("uhd", "30A1").unwrap()));
        assert!(handle.ensure_open().is_ok());
        handle.release();
        handle.release();
        assert!(!handle.is_open());
        assert!(handle.ensure_open().is_err());
        assert!(!claims.is_claimed("uhd", "30A1"));
    }
}
