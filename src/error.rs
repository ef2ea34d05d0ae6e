//! Client-facing error kinds and the response-code mapping (§7).

use core::fmt;

/// Schema/parse failures in an inbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    MissingField(&'static str),
    WrongType(&'static str),
    UnknownRequest(String),
    Oversize,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::MissingField(name) => write!(f, "missing field: {}", name),
            ProtocolError::WrongType(name) => write!(f, "wrong type for field: {}", name),
            ProtocolError::UnknownRequest(kind) => write!(f, "unknown request kind: {}", kind),
            ProtocolError::Oversize => write!(f, "packet exceeds maximum size"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Bad credentials or missing permission. Deliberately featureless: the
/// client must never be able to distinguish "wrong password" from "no
/// such user" from "user exists, no permission" (§4.4, §8 property 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthError;

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "authentication failed")
    }
}

impl std::error::Error for AuthError {}

/// A bounded wait on an external resource (transport I/O, DB, HSM) was
/// exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutError;

impl fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation timed out")
    }
}

impl std::error::Error for TimeoutError {}

/// Everything a request handler can fail with, aggregated for the
/// response-code mapping in `protocol::respond`. Each stage below keeps
/// its own fine-grained error type; this only carries enough to pick a
/// wire code and a server-side log line.
#[derive(Debug)]
pub enum RequestError {
    Protocol(ProtocolError),
    Auth(AuthError),
    Store(cm_store::StoreError),
    Cipher(cm_crypto::CipherError),
    Hsm(cm_crypto::HsmError),
    Timeout(TimeoutError),
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Protocol(e) => write!(f, "{}", e),
            RequestError::Auth(e) => write!(f, "{}", e),
            RequestError::Store(e) => write!(f, "{}", e),
            RequestError::Cipher(e) => write!(f, "{}", e),
            RequestError::Hsm(e) => write!(f, "{}", e),
            RequestError::Timeout(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RequestError {}

impl From<ProtocolError> for RequestError {
    fn from(e: ProtocolError) -> Self {
        RequestError::Protocol(e)
    }
}

impl From<AuthError> for RequestError {
    fn from(e: AuthError) -> Self {
        RequestError::Auth(e)
    }
}

impl From<cm_store::StoreError> for RequestError {
    fn from(e: cm_store::StoreError) -> Self {
        RequestError::Store(e)
    }
}

impl From<cm_crypto::CipherError> for RequestError {
    fn from(e: cm_crypto::CipherError) -> Self {
        RequestError::Cipher(e)
    }
}

impl From<cm_crypto::HsmError> for RequestError {
    fn from(e: cm_crypto::HsmError) -> Self {
        RequestError::Hsm(e)
    }
}

impl From<TimeoutError> for RequestError {
    fn from(e: TimeoutError) -> Self {
        RequestError::Timeout(e)
    }
}

/// ASCII response-code prefix (§4.6, §7). `ProtocolError → 500`,
/// `AuthError → 400`, everything else → `500` (never leaks which
/// internal subsystem failed).
impl RequestError {
    pub fn response_code(&self) -> u16 {
        match self {
            RequestError::Auth(_) => 400,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_error_maps_to_400() {
        let err = RequestError::from(AuthError);
        assert_eq!(err.response_code(), 400);
    }

    #[test]
    fn protocol_error_maps_to_500() {
        let err = RequestError::from(ProtocolError::Oversize);
        assert_eq!(err.response_code(), 500);
    }

    #[test]
    fn store_error_maps_to_500() {
        let err = RequestError::from(cm_store::StoreError::NotFound);
        assert_eq!(err.response_code(), 500);
    }
}
