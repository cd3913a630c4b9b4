//! The certificate a server presents, fixed or regenerated from an ephemeral source.
//!
//! Ephemeral certificates are only valid for an hour on either side of their issue time, so the
//! identity reissues one once it is half that old. rustls reads it through
//! [`ResolvesServerCert`] and the hand-rolled server asks for the current key per handshake.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;

use crate::mkcert::{TimeFunc, generate_certificate};
use crate::rustls_util::load_certified_key;

const REISSUE_AFTER: Duration = Duration::from_secs(30 * 60);

struct Issued {
    key: Arc<CertifiedKey>,
    at: SystemTime,
}

enum Source {
    Fixed(Arc<CertifiedKey>),
    Ephemeral {
        server_name: String,
        time_fn: TimeFunc,
        issued: Mutex<Issued>,
    },
}

pub struct ServerIdentity {
    source: Source,
}

impl std::fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.source {
            Source::Fixed(_) => f.write_str("ServerIdentity::Fixed"),
            Source::Ephemeral { server_name, .. } => f
                .debug_struct("ServerIdentity::Ephemeral")
                .field("server_name", server_name)
                .finish_non_exhaustive(),
        }
    }
}

fn issue(time_fn: &TimeFunc, server_name: &str) -> std::io::Result<Issued> {
    let at = time_fn();
    let certificate = generate_certificate(time_fn, server_name)?;
    let key = load_certified_key(certificate.cert_chain(), certificate.private_key_der())?;
    Ok(Issued { key, at })
}

impl ServerIdentity {
    pub fn fixed(
        cert_chain: Vec<CertificateDer<'static>>,
        private_key: PrivateKeyDer<'static>,
    ) -> std::io::Result<Self> {
        Ok(Self {
            source: Source::Fixed(load_certified_key(cert_chain, private_key)?),
        })
    }

    /// Issues the first certificate right away so a bad name fails at startup.
    pub fn ephemeral(server_name: String, time_fn: TimeFunc) -> std::io::Result<Self> {
        let issued = issue(&time_fn, &server_name)?;
        Ok(Self {
            source: Source::Ephemeral {
                server_name,
                time_fn,
                issued: Mutex::new(issued),
            },
        })
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self.source, Source::Ephemeral { .. })
    }

    pub fn certified_key(&self) -> std::io::Result<Arc<CertifiedKey>> {
        let (server_name, time_fn, issued) = match &self.source {
            Source::Fixed(key) => return Ok(key.clone()),
            Source::Ephemeral {
                server_name,
                time_fn,
                issued,
            } => (server_name, time_fn, issued),
        };

        let mut issued = issued.lock().unwrap_or_else(PoisonError::into_inner);
        let stale = match time_fn().duration_since(issued.at) {
            Ok(age) => age >= REISSUE_AFTER,
            // clock moved backwards
            Err(_) => true,
        };
        if stale {
            *issued = issue(time_fn, server_name)?;
            log::info!("Reissued ephemeral certificate for {server_name}");
        }
        Ok(issued.key.clone())
    }
}

impl ResolvesServerCert for ServerIdentity {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        match self.certified_key() {
            Ok(key) => Some(key),
            Err(e) => {
                log::error!("no server certificate available: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    fn movable_clock(start_secs: u64) -> (TimeFunc, Arc<AtomicU64>) {
        let now = Arc::new(AtomicU64::new(start_secs));
        let clock = now.clone();
        let time_fn: TimeFunc = Arc::new(move || {
            SystemTime::UNIX_EPOCH + Duration::from_secs(clock.load(Ordering::SeqCst))
        });
        (time_fn, now)
    }

    fn validity(key: &CertifiedKey) -> (i64, i64) {
        let (_, cert) = x509_parser::parse_x509_certificate(key.cert[0].as_ref()).unwrap();
        (
            cert.validity().not_before.timestamp(),
            cert.validity().not_after.timestamp(),
        )
    }

    #[test]
    fn test_fixed_identity_never_changes() {
        let (time_fn, _) = movable_clock(1_700_000_000);
        let cert = generate_certificate(&time_fn, "cover.example").unwrap();
        let identity = ServerIdentity::fixed(cert.cert_chain(), cert.private_key_der()).unwrap();
        assert!(!identity.is_ephemeral());
        let first = identity.certified_key().unwrap();
        let second = identity.certified_key().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_ephemeral_certificate_stays_valid_as_clock_advances() {
        let start = 1_700_000_000u64;
        let (time_fn, now) = movable_clock(start);
        let identity = ServerIdentity::ephemeral("cover.example".to_string(), time_fn).unwrap();

        let first = identity.certified_key().unwrap();
        now.store(start + 10 * 60, Ordering::SeqCst);
        assert!(Arc::ptr_eq(&first, &identity.certified_key().unwrap()));

        // past the original not_after
        let later = start + 3 * 60 * 60;
        now.store(later, Ordering::SeqCst);
        let current = identity.certified_key().unwrap();
        assert!(!Arc::ptr_eq(&first, &current));
        let (not_before, not_after) = validity(&current);
        assert!(not_before < later as i64);
        assert!(not_after > later as i64);
    }

    #[test]
    fn test_ephemeral_reissues_when_clock_moves_back() {
        let start = 1_700_000_000u64;
        let (time_fn, now) = movable_clock(start);
        let identity = ServerIdentity::ephemeral("cover.example".to_string(), time_fn).unwrap();
        let first = identity.certified_key().unwrap();

        now.store(start - 2 * 60 * 60, Ordering::SeqCst);
        let current = identity.certified_key().unwrap();
        assert!(!Arc::ptr_eq(&first, &current));
        let (not_before, _) = validity(&current);
        assert!(not_before < (start - 2 * 60 * 60) as i64);
    }

    #[test]
    fn test_ephemeral_rejects_bad_name() {
        let (time_fn, _) = movable_clock(1_700_000_000);
        assert!(ServerIdentity::ephemeral("b\u{e4}d.example".to_string(), time_fn).is_err());
    }
}
