//! MIB symbolic-name resolution (§6's `MibResolver` contract): a static
//! built-in registry plus optional user-loaded MIBs. Names are case-sensitive.

use std::collections::HashMap;
use std::str::FromStr;

use once_cell::sync::Lazy;

use crate::error::SnmpError;
use crate::oid::Oid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MibErrorAtom {
    NotFound,
    InvalidInstance,
    InvalidName,
}

pub trait MibResolver: Send + Sync {
    /// Resolves a symbolic name, optionally with a dotted instance suffix
    /// (e.g. `"sysDescr.0"`, `"ifDescr.1.2"`), to an integer OID.
    fn resolve(&self, name: &str) -> Result<Oid, MibErrorAtom>;

    /// Reverse lookup: the longest known symbolic prefix for an OID, if any.
    fn reverse_lookup(&self, oid: &Oid) -> Result<String, MibErrorAtom>;
}

/// `sysDescr`, `ifDescr`, and friends, plus the MIB-II group roots and a
/// handful of major enterprise roots (§6).
static REGISTRY: Lazy<HashMap<&'static str, &'static [u32]>> = Lazy::new(|| {
    let mut m = HashMap::new();

    // MIB-II groups (1.3.6.1.2.1.x)
    m.insert("system", &[1, 3, 6, 1, 2, 1, 1][..]);
    m.insert("interfaces", &[1, 3, 6, 1, 2, 1, 2][..]);
    m.insert("if", &[1, 3, 6, 1, 2, 1, 2, 2][..]);
    m.insert("ifX", &[1, 3, 6, 1, 2, 1, 31][..]);
    m.insert("ip", &[1, 3, 6, 1, 2, 1, 4][..]);
    m.insert("icmp", &[1, 3, 6, 1, 2, 1, 5][..]);
    m.insert("tcp", &[1, 3, 6, 1, 2, 1, 6][..]);
    m.insert("udp", &[1, 3, 6, 1, 2, 1, 7][..]);
    m.insert("snmp", &[1, 3, 6, 1, 2, 1, 11][..]);

    // system scalars
    m.insert("sysDescr", &[1, 3, 6, 1, 2, 1, 1, 1][..]);
    m.insert("sysObjectID", &[1, 3, 6, 1, 2, 1, 1, 2][..]);
    m.insert("sysUpTime", &[1, 3, 6, 1, 2, 1, 1, 3][..]);
    m.insert("sysContact", &[1, 3, 6, 1, 2, 1, 1, 4][..]);
    m.insert("sysName", &[1, 3, 6, 1, 2, 1, 1, 5][..]);
    m.insert("sysLocation", &[1, 3, 6, 1, 2, 1, 1, 6][..]);
    m.insert("sysServices", &[1, 3, 6, 1, 2, 1, 1, 7][..]);

    // ifTable columns
    m.insert("ifIndex", &[1, 3, 6, 1, 2, 1, 2, 2, 1, 1][..]);
    m.insert("ifDescr", &[1, 3, 6, 1, 2, 1, 2, 2, 1, 2][..]);
    m.insert("ifType", &[1, 3, 6, 1, 2, 1, 2, 2, 1, 3][..]);
    m.insert("ifMtu", &[1, 3, 6, 1, 2, 1, 2, 2, 1, 4][..]);
    m.insert("ifSpeed", &[1, 3, 6, 1, 2, 1, 2, 2, 1, 5][..]);
    m.insert("ifPhysAddress", &[1, 3, 6, 1, 2, 1, 2, 2, 1, 6][..]);
    m.insert("ifAdminStatus", &[1, 3, 6, 1, 2, 1, 2, 2, 1, 7][..]);
    m.insert("ifOperStatus", &[1, 3, 6, 1, 2, 1, 2, 2, 1, 8][..]);
    m.insert("ifInOctets", &[1, 3, 6, 1, 2, 1, 2, 2, 1, 10][..]);
    m.insert("ifOutOctets", &[1, 3, 6, 1, 2, 1, 2, 2, 1, 16][..]);

    // ifXTable (high-capacity counters)
    m.insert("ifName", &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 1][..]);
    m.insert("ifHCInOctets", &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 6][..]);
    m.insert("ifHCOutOctets", &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 10][..]);
    m.insert("ifHighSpeed", &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 15][..]);
    m.insert("ifAlias", &[1, 3, 6, 1, 2, 1, 31, 1, 1, 1, 18][..]);

    // enterprise roots
    m.insert("enterprises", &[1, 3, 6, 1, 4, 1][..]);
    m.insert("cisco", &[1, 3, 6, 1, 4, 1, 9][..]);
    m.insert("mikrotik", &[1, 3, 6, 1, 4, 1, 14988][..]);
    m.insert("netSnmp", &[1, 3, 6, 1, 4, 1, 8072][..]);
    m.insert("juniper", &[1, 3, 6, 1, 4, 1, 2636][..]);
    m.insert("hp", &[1, 3, 6, 1, 4, 1, 11][..]);

    m
});

/// Built-in static registry. Callers that need loaded-MIB support layer a
/// resolver over this one; the core only ever depends on the trait.
pub struct BuiltinMibResolver {
    extra: HashMap<String, Vec<u32>>,
}

impl BuiltinMibResolver {
    pub fn new() -> Self {
        BuiltinMibResolver { extra: HashMap::new() }
    }

    /// Registers an additional symbolic name, e.g. loaded from a user MIB
    /// file by a caller-supplied parser (parsing itself is out of scope, §1).
    pub fn register(&mut self, name: impl Into<String>, oid: Vec<u32>) {
        self.extra.insert(name.into(), oid);
    }

    fn lookup_base(&self, name: &str) -> Option<Vec<u32>> {
        if let Some(arcs) = self.extra.get(name) {
            return Some(arcs.clone());
        }
        REGISTRY.get(name).map(|s| s.to_vec())
    }
}

impl Default for BuiltinMibResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl MibResolver for BuiltinMibResolver {
    fn resolve(&self, name: &str) -> Result<Oid, MibErrorAtom> {
        let (base_name, instance) = match name.split_once('.') {
            Some((b, rest)) => (b, Some(rest)),
            None => (name, None),
        };

        let mut arcs = self.lookup_base(base_name).ok_or(MibErrorAtom::NotFound)?;

        if let Some(rest) = instance {
            for part in rest.split('.') {
                let arc: u32 = part.parse().map_err(|_| MibErrorAtom::InvalidInstance)?;
                arcs.push(arc);
            }
        }

        Oid::new(arcs).map_err(|_| MibErrorAtom::InvalidName)
    }

    fn reverse_lookup(&self, oid: &Oid) -> Result<String, MibErrorAtom> {
        let target = oid.arcs();
        let mut best: Option<(&str, &[u32])> = None;

        let mut consider = |name: &'static str, arcs: &'static [u32]| {
            if target.len() >= arcs.len() && &target[..arcs.len()] == arcs {
                if best.map(|(_, b)| arcs.len() > b.len()).unwrap_or(true) {
                    best = Some((name, arcs));
                }
            }
        };
        for (&name, &arcs) in REGISTRY.iter() {
            consider(name, arcs);
        }

        match best {
            Some((name, arcs)) => {
                let suffix = &target[arcs.len()..];
                if suffix.is_empty() {
                    Ok(name.to_string())
                } else {
                    let tail: Vec<String> = suffix.iter().map(u32::to_string).collect();
                    Ok(format!("{}.{}", name, tail.join(".")))
                }
            }
            None => Err(MibErrorAtom::NotFound),
        }
    }
}

/// Convenience wrapper matching the `Oid`-based normalisation helper in
/// `oid.rs`; kept here since resolution is this module's concern.
pub fn resolve_str(resolver: &dyn MibResolver, name: &str) -> Result<Oid, SnmpError> {
    resolver.resolve(name).map_err(|e| {
        let msg = match e {
            MibErrorAtom::NotFound => format!("MIB name not found: {}", name),
            MibErrorAtom::InvalidInstance => format!("invalid instance suffix in: {}", name),
            MibErrorAtom::InvalidName => format!("invalid MIB name: {}", name),
        };
        SnmpError::Mib(crate::error::ErrorKind::UserError, msg)
    })
}

impl FromStr for MibErrorAtom {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_found" => Ok(MibErrorAtom::NotFound),
            "invalid_instance" => Ok(MibErrorAtom::InvalidInstance),
            "invalid_name" => Ok(MibErrorAtom::InvalidName),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_scalar_with_instance() {
        let mib = BuiltinMibResolver::new();
        let oid = mib.resolve("sysDescr.0").unwrap();
        assert_eq!(oid.to_string(), "1.3.6.1.2.1.1.1.0");
    }

    #[test]
    fn resolves_without_instance() {
        let mib = BuiltinMibResolver::new();
        let oid = mib.resolve("sysUpTime").unwrap();
        assert_eq!(oid.to_string(), "1.3.6.1.2.1.1.3");
    }

    #[test]
    fn unknown_name_is_not_found() {
        let mib = BuiltinMibResolver::new();
        assert_eq!(mib.resolve("totallyMadeUp"), Err(MibErrorAtom::NotFound));
    }

    #[test]
    fn case_sensitive() {
        let mib = BuiltinMibResolver::new();
        assert!(mib.resolve("SysDescr").is_err());
    }

    #[test]
    fn reverse_lookup_finds_longest_prefix() {
        let mib = BuiltinMibResolver::new();
        let oid = Oid::from_str("1.3.6.1.2.1.2.2.1.2.5").unwrap();
        let name = mib.reverse_lookup(&oid).unwrap();
        assert_eq!(name, "ifDescr.5");
    }

    #[test]
    fn enterprise_roots_present() {
        let mib = BuiltinMibResolver::new();
        assert_eq!(mib.resolve("mikrotik").unwrap().to_string(), "1.3.6.1.4.1.14988");
        assert_eq!(mib.resolve("cisco").unwrap().to_string(), "1.3.6.1.4.1.9");
    }

    #[test]
    fn registered_extra_name_resolves() {
        let mut mib = BuiltinMibResolver::new();
        mib.register("myCustomScalar", vec![1, 3, 6, 1, 4, 1, 99999, 1]);
        assert_eq!(mib.resolve("myCustomScalar.0").unwrap().to_string(), "1.3.6.1.4.1.99999.1.0");
    }
}
