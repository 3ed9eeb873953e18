//! `Varbind = (oid, type, value)` (§3). Type information flows through the
//! engine unchanged — the core never infers or discards it.

use std::fmt;

use crate::oid::Oid;

/// The tag set from §3: the twelve wire types plus the three v2c exceptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Integer,
    Unsigned32,
    Counter32,
    Counter64,
    Gauge32,
    TimeTicks,
    OctetString,
    ObjectIdentifier,
    IpAddress,
    Boolean,
    Null,
    Opaque,
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl VarType {
    /// v2c exceptions are carried as values, not operation failures, unless
    /// the entire GET returns only these (§7).
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            VarType::NoSuchObject | VarType::NoSuchInstance | VarType::EndOfMibView
        )
    }
}

/// The typed payload. `var_type()` always recovers the exact tag the codec
/// decoded, so nothing downstream has to keep a parallel `VarType` in sync.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Unsigned32(u32),
    Counter32(u32),
    Counter64(u64),
    Gauge32(u32),
    TimeTicks(u32),
    OctetString(Vec<u8>),
    ObjectIdentifier(Oid),
    IpAddress([u8; 4]),
    Boolean(bool),
    Null,
    Opaque(Vec<u8>),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl Value {
    pub fn var_type(&self) -> VarType {
        match self {
            Value::Integer(_) => VarType::Integer,
            Value::Unsigned32(_) => VarType::Unsigned32,
            Value::Counter32(_) => VarType::Counter32,
            Value::Counter64(_) => VarType::Counter64,
            Value::Gauge32(_) => VarType::Gauge32,
            Value::TimeTicks(_) => VarType::TimeTicks,
            Value::OctetString(_) => VarType::OctetString,
            Value::ObjectIdentifier(_) => VarType::ObjectIdentifier,
            Value::IpAddress(_) => VarType::IpAddress,
            Value::Boolean(_) => VarType::Boolean,
            Value::Null => VarType::Null,
            Value::Opaque(_) => VarType::Opaque,
            Value::NoSuchObject => VarType::NoSuchObject,
            Value::NoSuchInstance => VarType::NoSuchInstance,
            Value::EndOfMibView => VarType::EndOfMibView,
        }
    }

    pub fn is_exception(&self) -> bool {
        self.var_type().is_exception()
    }

    /// Best-effort display string, mirroring what the reference clients in
    /// the corpus do for octet strings / integers; no locale formatting.
    pub fn display_string(&self) -> String {
        match self {
            Value::Integer(v) => v.to_string(),
            Value::Unsigned32(v) | Value::Counter32(v) | Value::Gauge32(v) => v.to_string(),
            Value::Counter64(v) => v.to_string(),
            Value::TimeTicks(v) => v.to_string(),
            Value::OctetString(b) => String::from_utf8_lossy(b).into_owned(),
            Value::ObjectIdentifier(o) => o.to_string(),
            Value::IpAddress(ip) => format!("{}.{}.{}.{}", ip[0], ip[1], ip[2], ip[3]),
            Value::Boolean(b) => b.to_string(),
            Value::Null => "null".to_string(),
            Value::Opaque(b) => format!("opaque({} bytes)", b.len()),
            Value::NoSuchObject => "noSuchObject".to_string(),
            Value::NoSuchInstance => "noSuchInstance".to_string(),
            Value::EndOfMibView => "endOfMibView".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: Value,
}

impl VarBind {
    pub fn new(oid: Oid, value: Value) -> Self {
        VarBind { oid, value }
    }

    pub fn var_type(&self) -> VarType {
        self.value.var_type()
    }
}

impl fmt::Display for VarBind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {:?}: {}", self.oid, self.var_type(), self.value.display_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn var_type_matches_value_tag() {
        let vb = VarBind::new(Oid::from_str("1.3.6.1.2.1.1.1.0").unwrap(), Value::OctetString(b"Test Device".to_vec()));
        assert_eq!(vb.var_type(), VarType::OctetString);
        assert_eq!(vb.value.display_string(), "Test Device");
    }

    #[test]
    fn exceptions_are_flagged() {
        assert!(Value::EndOfMibView.is_exception());
        assert!(!Value::Null.is_exception());
    }
}
