//! TLS root-certificate selection.
//!
//! The backend may sit behind any of several public CAs and may rotate
//! between them.  [`AdaptiveCertManager`] walks a fixed, compiled-in list
//! of root certificates, remembers (in NVS) the one that last produced a
//! successful handshake, and retries it a few times before falling back to
//! iterating the list again.
//!
//! ```text
//!  certificate() ─▶ remembered & failures < 5 ? remembered : current
//!
//!  mark_failure():
//!    current == remembered ──▶ failures += 1
//!         failures < 5      ──▶ retry same
//!         failures == 5     ──▶ reset(), advance
//!    otherwise             ──▶ advance
//!    past end of list      ──▶ reset() (wrap to 0, forget remembered)
//! ```
//!
//! The candidate list is generated by `build.rs` from `certs/*.pem` in the
//! order given by `certs/priority.txt`.

use log::{error, info, warn};

use crate::app::ports::{StorageError, StoragePort};

/// One compiled-in root certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaCertificate {
    pub name: &'static str,
    /// PEM text, NUL-terminated for mbedTLS.
    pub pem: &'static str,
}

impl CaCertificate {
    /// PEM text without the trailing NUL.
    pub fn pem_text(&self) -> &'static str {
        self.pem.trim_end_matches('\0')
    }
}

include!(concat!(env!("OUT_DIR"), "/ca_bundle.rs"));

const NAMESPACE: &str = "cert_mgr";
const SUCCESS_KEY: &str = "success_cert";

/// Retries granted to the remembered certificate before it is abandoned.
pub const MAX_REMEMBERED_FAILURES: u8 = 5;

pub struct AdaptiveCertManager<S: StoragePort> {
    storage: S,
    candidates: &'static [CaCertificate],
    current: usize,
    remembered: Option<usize>,
    remembered_failures: u8,
}

impl<S: StoragePort> AdaptiveCertManager<S> {
    /// Manager over the compiled-in [`CA_CERTIFICATES`].
    pub fn new(storage: S) -> Self {
        Self::with_candidates(storage, CA_CERTIFICATES)
    }

    /// Manager over an explicit candidate list.  The remembered index is
    /// loaded from storage; an out-of-range value is ignored.
    pub fn with_candidates(storage: S, candidates: &'static [CaCertificate]) -> Self {
        let mut mgr = Self {
            storage,
            candidates,
            current: 0,
            remembered: None,
            remembered_failures: 0,
        };
        mgr.remembered = mgr.load_remembered();
        info!(
            "CertManager: {} candidates, remembered {:?}",
            candidates.len(),
            mgr.remembered
        );
        mgr
    }

    /// Certificate to use for the next handshake, or `None` if the list is
    /// empty.
    pub fn certificate(&mut self) -> Option<&'static CaCertificate> {
        match self.remembered {
            Some(idx) if idx < self.candidates.len() => {
                if self.remembered_failures < MAX_REMEMBERED_FAILURES {
                    self.current = idx;
                } else {
                    self.current = 0;
                    self.remembered_failures = 0;
                }
            }
            _ => {}
        }

        if self.current >= self.candidates.len() {
            self.current = 0;
            self.remembered_failures = 0;
        }

        let cert = self.candidates.get(self.current);
        match cert {
            Some(c) => info!(
                "CertManager: using {} ({}/{})",
                c.name,
                self.current,
                self.candidates.len()
            ),
            None => error!("CertManager: no certificates available"),
        }
        cert
    }

    /// The current certificate completed a handshake.
    pub fn mark_success(&mut self) {
        if self.current >= self.candidates.len() {
            return;
        }
        info!("CertManager: {} succeeded", self.current_name());
        self.remembered = Some(self.current);
        self.remembered_failures = 0;

        let bytes = (self.current as i32).to_le_bytes();
        if let Err(e) = self.storage.write(NAMESPACE, SUCCESS_KEY, &bytes) {
            warn!("CertManager: failed to persist index: {}", e);
        }
    }

    /// The current certificate failed a handshake; pick what to try next.
    pub fn mark_failure(&mut self) {
        if self.remembered == Some(self.current) {
            self.remembered_failures += 1;
            if self.remembered_failures < MAX_REMEMBERED_FAILURES {
                info!(
                    "CertManager: remembered {} failed ({}/{}), retrying",
                    self.current_name(),
                    self.remembered_failures,
                    MAX_REMEMBERED_FAILURES
                );
                return;
            }
            warn!(
                "CertManager: remembered {} abandoned after {} failures",
                self.current_name(),
                MAX_REMEMBERED_FAILURES
            );
            self.reset();
        } else {
            info!("CertManager: {} failed", self.current_name());
        }

        self.current += 1;
        if self.current >= self.candidates.len() {
            warn!("CertManager: candidate list exhausted, wrapping");
            self.reset();
        }
    }

    /// Forget everything, including the persisted index.
    pub fn reset(&mut self) {
        self.current = 0;
        self.remembered = None;
        self.remembered_failures = 0;
        match self.storage.delete(NAMESPACE, SUCCESS_KEY) {
            Ok(()) | Err(StorageError::NotFound) => {}
            Err(e) => warn!("CertManager: failed to clear index: {}", e),
        }
    }

    pub fn current_name(&self) -> &'static str {
        self.candidates
            .get(self.current)
            .map_or("Invalid", |c| c.name)
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn remembered_index(&self) -> Option<usize> {
        self.remembered
    }

    pub fn remembered_failures(&self) -> u8 {
        self.remembered_failures
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    fn load_remembered(&self) -> Option<usize> {
        let mut buf = [0u8; 4];
        match self.storage.read(NAMESPACE, SUCCESS_KEY, &mut buf) {
            Ok(4) => {
                let idx = i32::from_le_bytes(buf);
                usize::try_from(idx)
                    .ok()
                    .filter(|&i| i < self.candidates.len())
            }
            Ok(_) => {
                warn!("CertManager: stored index has wrong size, ignoring");
                None
            }
            Err(_) => None,
        }
    }
}
