//! `Target { host, port }`, parsed once at the boundary (§3).

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::SnmpError;

pub const DEFAULT_PORT: u16 = 161;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetHost {
    Ip(IpAddr),
    Name(String),
}

impl fmt::Display for TargetHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetHost::Ip(ip) => write!(f, "{}", ip),
            TargetHost::Name(n) => write!(f, "{}", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub host: TargetHost,
    pub port: u16,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Target {
    type Err = SnmpError;

    /// Parses `"host"`, `"host:port"`, `"ipv4"`, `"ipv4:port"`, or a bracketed
    /// `"[ipv6]:port"`; an absent port defaults to 161.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SnmpError::InvalidTarget("empty target".into()));
        }

        if let Some(rest) = s.strip_prefix('[') {
            // [ipv6]:port or [ipv6]
            let close = rest
                .find(']')
                .ok_or_else(|| SnmpError::InvalidTarget(format!("unterminated [ in {}", s)))?;
            let (ip_part, tail) = rest.split_at(close);
            let ip: IpAddr = ip_part
                .parse()
                .map_err(|_| SnmpError::InvalidTarget(format!("invalid ipv6 in {}", s)))?;
            let tail = tail.trim_start_matches(']');
            let port = parse_port_suffix(tail)?;
            return Ok(Target { host: TargetHost::Ip(ip), port: port.unwrap_or(DEFAULT_PORT) });
        }

        // Plain IPv6 without brackets/port (e.g. "::1").
        if s.matches(':').count() > 1 {
            let ip: IpAddr = s
                .parse()
                .map_err(|_| SnmpError::InvalidTarget(format!("invalid target: {}", s)))?;
            return Ok(Target { host: TargetHost::Ip(ip), port: DEFAULT_PORT });
        }

        match s.rsplit_once(':') {
            Some((host, port_str)) => {
                let port: u16 = port_str
                    .parse()
                    .map_err(|_| SnmpError::InvalidTarget(format!("invalid port in {}", s)))?;
                Ok(Target { host: parse_host(host), port })
            }
            None => Ok(Target { host: parse_host(s), port: DEFAULT_PORT }),
        }
    }
}

fn parse_port_suffix(tail: &str) -> Result<Option<u16>, SnmpError> {
    match tail.strip_prefix(':') {
        Some(p) => p
            .parse()
            .map(Some)
            .map_err(|_| SnmpError::InvalidTarget(format!("invalid port: {}", p))),
        None if tail.is_empty() => Ok(None),
        None => Err(SnmpError::InvalidTarget(format!("unexpected suffix: {}", tail))),
    }
}

fn parse_host(s: &str) -> TargetHost {
    match s.parse::<IpAddr>() {
        Ok(ip) => TargetHost::Ip(ip),
        Err(_) => TargetHost::Name(s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_port_161() {
        let t: Target = "device.example.com".parse().unwrap();
        assert_eq!(t.port, 161);
        assert_eq!(t.host, TargetHost::Name("device.example.com".into()));
    }

    #[test]
    fn parses_ipv4_with_port() {
        let t: Target = "127.0.0.1:1161".parse().unwrap();
        assert_eq!(t.port, 1161);
        assert_eq!(t.host, TargetHost::Ip("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn parses_bracketed_ipv6() {
        let t: Target = "[::1]:1161".parse().unwrap();
        assert_eq!(t.port, 1161);
    }

    #[test]
    fn rejects_empty() {
        assert!("".parse::<Target>().is_err());
    }
}
