use std::fmt::Debug;
use std::io;

/// Hook for embedding and checking a token in the random field of a
/// ClientHello or ServerHello handshake message.
///
/// Messages passed in include their 4-byte handshake header, so the random
/// field is at bytes 6..38.
pub trait HelloAuthenticator: Debug + Send + Sync {
    /// Overwrite the random field of `message` with a fresh token.
    fn stamp(&self, message: &mut [u8]) -> io::Result<()>;

    /// Whether the random field of `message` carries a valid token.
    fn check(&self, message: &[u8]) -> bool;
}

/// Outcome of checking the peer's hello random.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelloAuth {
    /// The peer's hello has not been received yet.
    Pending,
    Verified,
    Rejected,
    /// No authenticator is configured.
    Unchecked,
}

impl HelloAuth {
    pub fn is_rejected(&self) -> bool {
        matches!(self, HelloAuth::Rejected)
    }
}
