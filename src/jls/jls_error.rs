use std::fmt;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// The peer's hello random did not carry a valid token.
///
/// Carried inside an `io::Error` of kind `PermissionDenied`, see [`is_authentication_failure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CamouflageAuthError {
    pub role: Role,
    pub server_name: String,
}

impl fmt::Display for CamouflageAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "camouflage authentication failed ({} side, server name {})",
            self.role, self.server_name
        )
    }
}

impl std::error::Error for CamouflageAuthError {}

pub fn authentication_failure(role: Role, server_name: impl Into<String>) -> io::Error {
    io::Error::new(
        io::ErrorKind::PermissionDenied,
        CamouflageAuthError {
            role,
            server_name: server_name.into(),
        },
    )
}

pub fn is_authentication_failure(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::PermissionDenied
        && error
            .get_ref()
            .is_some_and(|inner| inner.is::<CamouflageAuthError>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_wrapped_error() {
        let err = authentication_failure(Role::Client, "cover.example");
        assert!(is_authentication_failure(&err));
        assert_eq!(
            err.to_string(),
            "camouflage authentication failed (client side, server name cover.example)"
        );

        let inner = err
            .get_ref()
            .and_then(|e| e.downcast_ref::<CamouflageAuthError>())
            .unwrap();
        assert_eq!(inner.role, Role::Client);
    }

    #[test]
    fn test_plain_permission_denied_is_not_auth_failure() {
        let err = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert!(!is_authentication_failure(&err));
        let err = io::Error::other(CamouflageAuthError {
            role: Role::Server,
            server_name: String::new(),
        });
        assert!(!is_authentication_failure(&err));
    }
}
