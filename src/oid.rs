//! Object identifiers.
//!
//! Canonical representation is the integer sequence. String and symbolic
//! forms exist only at the boundary (`OidSource`); nothing downstream of
//! `normalize()` ever branches on representation again.

use std::fmt;
use std::str::FromStr;

use crate::error::{ErrorKind, SnmpError};
use crate::mib::MibResolver;

/// An OID: a non-empty ordered sequence of unsigned integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Oid(Vec<u32>);

impl Oid {
    /// Builds an `Oid` from a non-empty sequence of arcs.
    pub fn new(arcs: Vec<u32>) -> Result<Self, SnmpError> {
        if arcs.is_empty() {
            return Err(SnmpError::InvalidOid("OID must not be empty".into()));
        }
        Ok(Oid(arcs))
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    pub fn into_arcs(self) -> Vec<u32> {
        self.0
    }

    /// True if `self` is a prefix of `other` and strictly shorter than it
    /// (`self ⊑ other` and `self != other`, per §4.5's scope predicate).
    pub fn is_strict_prefix_of(&self, other: &Oid) -> bool {
        self.0.len() < other.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// True if `self` is a prefix of `other`, including equality
    /// (`root ⊑ oid`, used by the GETBULK scope filter in §4.6).
    pub fn is_prefix_of(&self, other: &Oid) -> bool {
        self.0.len() <= other.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// Appends further arcs, yielding a child OID.
    pub fn child(&self, tail: &[u32]) -> Oid {
        let mut arcs = self.0.clone();
        arcs.extend_from_slice(tail);
        Oid(arcs)
    }

    /// Strips `prefix` from `self`, returning the remaining tail arcs.
    /// Used by `TableShape` to recover `[column, index...]`.
    pub fn strip_prefix(&self, prefix: &Oid) -> Option<&[u32]> {
        if prefix.is_prefix_of(self) {
            Some(&self.0[prefix.0.len()..])
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `lt | eq | gt`, per the `Codec::oid_compare` contract in §6.
    pub fn compare(&self, other: &Oid) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u32::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl FromStr for Oid {
    type Err = SnmpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches('.');
        if s.is_empty() {
            return Err(SnmpError::InvalidOid("empty OID string".into()));
        }
        let mut arcs = Vec::new();
        for part in s.split('.') {
            let arc: u32 = part
                .parse()
                .map_err(|_| SnmpError::InvalidOid(format!("not a numeric OID: {}", s)))?;
            arcs.push(arc);
        }
        Oid::new(arcs)
    }
}

/// Boundary-only OID form: either a numeric string, or a symbolic MIB name
/// (optionally with an instance suffix, e.g. `"sysDescr.0"`). Internal code
/// never sees this type; `normalize()` is the single place that resolves it.
#[derive(Debug, Clone)]
pub enum OidSource<'a> {
    Numeric(&'a str),
    Named(&'a str),
    Resolved(Oid),
}

impl<'a> From<&'a str> for OidSource<'a> {
    /// Heuristic: a leading digit (after an optional '.') means numeric form;
    /// otherwise treat it as a symbolic name for `MibResolver`.
    fn from(s: &'a str) -> Self {
        let probe = s.trim().trim_start_matches('.');
        match probe.chars().next() {
            Some(c) if c.is_ascii_digit() => OidSource::Numeric(s),
            _ => OidSource::Named(s),
        }
    }
}

impl<'a> From<Oid> for OidSource<'a> {
    fn from(oid: Oid) -> Self {
        OidSource::Resolved(oid)
    }
}

/// The single normalisation function: numeric string, symbolic name, or an
/// already-resolved `Oid`, all become the canonical integer sequence here.
/// Idempotent: `normalize(normalize(x).into()) == normalize(x)`.
pub fn normalize<'a>(src: impl Into<OidSource<'a>>, mib: &dyn MibResolver) -> Result<Oid, SnmpError> {
    match src.into() {
        OidSource::Resolved(oid) => Ok(oid),
        OidSource::Numeric(s) => Oid::from_str(s),
        OidSource::Named(s) => mib.resolve(s).map_err(|_| {
            SnmpError::Mib(ErrorKind::UserError, format!("unresolvable MIB name: {}", s))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mib::BuiltinMibResolver;

    #[test]
    fn display_round_trips_numeric_form() {
        let oid = Oid::from_str("1.3.6.1.2.1.1.1.0").unwrap();
        assert_eq!(oid.to_string(), "1.3.6.1.2.1.1.1.0");
    }

    #[test]
    fn strict_prefix_excludes_equality() {
        let root = Oid::from_str("1.3.6.1.2.1.1").unwrap();
        let same = Oid::from_str("1.3.6.1.2.1.1").unwrap();
        let child = Oid::from_str("1.3.6.1.2.1.1.1.0").unwrap();
        assert!(!root.is_strict_prefix_of(&same));
        assert!(root.is_strict_prefix_of(&child));
    }

    #[test]
    fn normalize_is_idempotent() {
        let mib = BuiltinMibResolver::new();
        let once = normalize(OidSource::Named("sysDescr.0"), &mib).unwrap();
        let twice = normalize(once.clone(), &mib).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_empty_oid() {
        assert!(Oid::from_str("").is_err());
        assert!(Oid::new(vec![]).is_err());
    }
}
