//! Error taxonomy (§7). The core never surfaces raw device error codes
//! without classifying them first.

use std::fmt;

use crate::oid::Oid;
use crate::target::Target;

/// Coarse classification bucket from §7's taxonomy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    SecurityError,
    ResourceError,
    DeviceError,
    ProtocolError,
    TransientError,
    ConfigurationError,
    ServiceError,
}

/// Device-reported PDU error-status atoms (RFC 1157 / RFC 1905 error-status,
/// plus the security extensions SNMPv2c agents commonly report).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorAtom {
    NoSuchName,
    BadValue,
    ReadOnly,
    WrongType,
    WrongValue,
    NoAccess,
    NotWritable,
    AuthorizationError,
    BadCommunity,
    TooBig,
    ResourceUnavailable,
    GenErr,
    CommitFailed,
    UndoFailed,
}

impl DeviceErrorAtom {
    /// Maps a PDU `error-status` integer to its atom (§6, `error_code ↔ error_atom`).
    pub fn from_code(code: i64) -> Option<Self> {
        use DeviceErrorAtom::*;
        Some(match code {
            1 => TooBig,
            2 => NoSuchName,
            3 => BadValue,
            4 => ReadOnly,
            5 => GenErr,
            6 => NoAccess,
            7 => WrongType,
            8 => WrongValue,
            9 => ResourceUnavailable,
            10 => CommitFailed,
            11 => UndoFailed,
            12 => AuthorizationError,
            13 => NotWritable,
            14 => BadCommunity,
            _ => return None,
        })
    }

    pub fn kind(&self) -> ErrorKind {
        use DeviceErrorAtom::*;
        match self {
            NoSuchName | BadValue | ReadOnly | WrongType | WrongValue => ErrorKind::UserError,
            NoAccess | NotWritable | AuthorizationError | BadCommunity => ErrorKind::SecurityError,
            TooBig | ResourceUnavailable => ErrorKind::ResourceError,
            GenErr | CommitFailed | UndoFailed => ErrorKind::DeviceError,
        }
    }
}

/// The crate's public error type.
#[derive(thiserror::Error, Debug)]
pub enum SnmpError {
    #[error("invalid OID: {0}")]
    InvalidOid(String),

    #[error("MIB resolution error: {1}")]
    Mib(ErrorKind, String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("PDU encode/decode failed: {0}")]
    Protocol(String),

    #[error("device returned {atom:?} for {oid} on {target}")]
    Device {
        target: Target,
        oid: Oid,
        atom: DeviceErrorAtom,
    },

    #[error("timed out waiting for response from {target} (request {request_id})")]
    Timeout { target: Target, request_id: u32 },

    #[error("network error talking to {target}: {source}")]
    Network {
        target: Target,
        #[source]
        source: std::io::Error,
    },

    #[error("host/network unreachable: {target}")]
    Unreachable { target: Target },

    #[error("connection refused by {target}")]
    ConnectionRefused { target: Target },

    #[error("get_bulk requires SNMPv2c")]
    GetBulkRequiresV2c,

    #[error("circuit breaker open for {0}")]
    CircuitBreakerOpen(Target),

    #[error("no available engine in router")]
    NoAvailableConnections,

    #[error("duplicate request id {0}")]
    DuplicateRequestId(u32),

    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SnmpError {
    /// Coarse classification, per §7.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SnmpError::InvalidOid(_) | SnmpError::InvalidTarget(_) | SnmpError::GetBulkRequiresV2c => {
                ErrorKind::UserError
            }
            SnmpError::Mib(k, _) => *k,
            SnmpError::Protocol(_) => ErrorKind::ProtocolError,
            SnmpError::Device { atom, .. } => atom.kind(),
            SnmpError::Timeout { .. } => ErrorKind::TransientError,
            SnmpError::Network { .. } => ErrorKind::ServiceError,
            SnmpError::Unreachable { .. } => ErrorKind::ConfigurationError,
            SnmpError::ConnectionRefused { .. } => ErrorKind::ServiceError,
            SnmpError::CircuitBreakerOpen(_) => ErrorKind::TransientError,
            SnmpError::NoAvailableConnections => ErrorKind::TransientError,
            SnmpError::DuplicateRequestId(_) => ErrorKind::ProtocolError,
            SnmpError::TaskFailed(_) => ErrorKind::DeviceError,
            SnmpError::Config(_) => ErrorKind::ConfigurationError,
        }
    }

    /// Retriability rule from §7: `timeout`, `too_big`, `gen_err` retriable;
    /// `user_error`/`security_error`/`configuration_error` are not. Circuit
    /// breaker rejections are never retried (§7: "NOT retried").
    pub fn is_retriable(&self) -> bool {
        match self {
            SnmpError::Timeout { .. } => true,
            SnmpError::Device { atom, .. } => {
                matches!(atom, DeviceErrorAtom::TooBig | DeviceErrorAtom::GenErr)
            }
            SnmpError::CircuitBreakerOpen(_) => false,
            _ => false,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::UserError => "user_error",
            ErrorKind::SecurityError => "security_error",
            ErrorKind::ResourceError => "resource_error",
            ErrorKind::DeviceError => "device_error",
            ErrorKind::ProtocolError => "protocol_error",
            ErrorKind::TransientError => "transient_error",
            ErrorKind::ConfigurationError => "configuration_error",
            ErrorKind::ServiceError => "service_error",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriability_matches_taxonomy() {
        let target: Target = "127.0.0.1:161".parse().unwrap();
        let timeout = SnmpError::Timeout { target: target.clone(), request_id: 1 };
        assert!(timeout.is_retriable());

        let too_big = SnmpError::Device {
            target: target.clone(),
            oid: "1.3.6.1.2.1.1.1.0".parse().unwrap(),
            atom: DeviceErrorAtom::TooBig,
        };
        assert!(too_big.is_retriable());

        let bad_value = SnmpError::Device {
            target,
            oid: "1.3.6.1.2.1.1.1.0".parse().unwrap(),
            atom: DeviceErrorAtom::BadValue,
        };
        assert!(!bad_value.is_retriable());
        assert_eq!(bad_value.kind(), ErrorKind::UserError);
    }

    #[test]
    fn breaker_open_not_retriable() {
        let target: Target = "127.0.0.1:161".parse().unwrap();
        let e = SnmpError::CircuitBreakerOpen(target);
        assert!(!e.is_retriable());
    }
}
