//! Iterative GETNEXT walk (§4.5): `init → running → done`, bounded by scope
//! and `max_iterations`.

use crate::config::Options;
use crate::error::SnmpError;
use crate::oid::OidSource;
use crate::ops::Ops;
use crate::target::Target;
use crate::varbind::VarBind;

/// Walks `root` with repeated GETNEXT calls. `endOfMibView`/`noSuchName` end
/// the walk normally (§4.5); any other error aborts it. Per the Design Notes
/// §9 open question on partial-accumulator behavior, this returns the
/// accumulator gathered so far *alongside* the error rather than discarding
/// it — a caller mid-walk has already paid for those round trips and the
/// spec explicitly allows either choice as long as it's documented.
pub async fn walk(
    ops: &Ops,
    target: &Target,
    root: OidSource<'_>,
    opts: &Options,
) -> Result<Vec<VarBind>, (Vec<VarBind>, SnmpError)> {
    let root = crate::oid::normalize(root, ops.mib.as_ref()).map_err(|e| (Vec::new(), e))?;
    let mut cursor = root.clone();
    let mut acc = Vec::new();
    let mut remaining = opts.max_iterations;

    loop {
        if remaining == 0 {
            return Ok(acc);
        }

        match ops.get_next(target, OidSource::Resolved(cursor.clone()), opts).await {
            Ok(vb) => {
                if is_normal_termination(&vb) {
                    return Ok(acc);
                }
                if !root.is_strict_prefix_of(&vb.oid) {
                    return Ok(acc);
                }
                cursor = vb.oid.clone();
                acc.push(vb);
                remaining -= 1;
            }
            // v1 agents signal end-of-tree via a NoSuchName error-status
            // rather than a v2c exception value; both mean the same thing
            // to a walk (§4.5: "endOfMibView and noSuchName are treated as
            // normal termination, not error").
            Err(SnmpError::Device { atom: crate::error::DeviceErrorAtom::NoSuchName, .. }) => {
                return Ok(acc);
            }
            Err(e) => return Err((acc, e)),
        }
    }
}

fn is_normal_termination(vb: &VarBind) -> bool {
    matches!(
        vb.value,
        crate::varbind::Value::EndOfMibView
            | crate::varbind::Value::NoSuchObject
            | crate::varbind::Value::NoSuchInstance
    )
}

/// Convenience wrapper for table walks: `walk_table` is `walk` rooted at the
/// table OID; the flat result is reshaped by `table.rs`.
pub async fn walk_table(
    ops: &Ops,
    target: &Target,
    table_oid: OidSource<'_>,
    opts: &Options,
) -> Result<Vec<VarBind>, (Vec<VarBind>, SnmpError)> {
    walk(ops, target, table_oid, opts).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, Message, Pdu, PduKind, Version};
    use crate::engine::Engine;
    use crate::mib::BuiltinMibResolver;
    use crate::oid::Oid;
    use crate::target::TargetHost;
    use crate::varbind::Value;
    use std::net::SocketAddr;
    use std::str::FromStr;
    use std::sync::Arc;

    /// A minimal fake agent that serves GETNEXT over a fixed in-memory tree,
    /// mirroring S3's scope-check scenario.
    async fn spawn_fake_tree_agent(tree: Vec<(&'static str, Value)>) -> SocketAddr {
        let sock = tokio::net::UdpSocket::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap())
            .await
            .unwrap();
        let addr = sock.local_addr().unwrap();
        tokio::spawn(async move {
            let tree: Vec<(Oid, Value)> =
                tree.into_iter().map(|(s, v)| (Oid::from_str(s).unwrap(), v)).collect();
            let mut buf = vec![0u8; 65535];
            loop {
                let (len, src) = match sock.recv_from(&mut buf).await {
                    Ok(v) => v,
                    Err(_) => break,
                };
                let Ok(req) = codec::decode(&buf[..len]) else { continue };
                let asked = &req.pdu.varbinds[0].oid;
                let next = tree.iter().find(|(oid, _)| oid.compare(asked) == std::cmp::Ordering::Greater);
                let (kind, field_a, field_b, vbs) = match next {
                    Some((oid, value)) => (
                        PduKind::GetResponse,
                        0,
                        0,
                        vec![VarBind::new(oid.clone(), value.clone())],
                    ),
                    None => (
                        PduKind::GetResponse,
                        0,
                        0,
                        vec![VarBind::new(asked.clone(), Value::EndOfMibView)],
                    ),
                };
                let resp = Message {
                    version: Version::V2c,
                    community: "public".into(),
                    pdu: Pdu {
                        kind,
                        request_id: req.pdu.request_id,
                        error_status_or_non_repeaters: field_a,
                        error_index_or_max_repetitions: field_b,
                        varbinds: vbs,
                    },
                };
                let _ = sock.send_to(&codec::encode(&resp), src).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn walk_stays_in_scope_and_excludes_out_of_scope_sibling() {
        let tree = vec![
            ("1.3.6.1.2.1.1.1.0", Value::OctetString(b"a".to_vec())),
            ("1.3.6.1.2.1.1.2.0", Value::OctetString(b"b".to_vec())),
            ("1.3.6.1.2.1.1.3.0", Value::OctetString(b"c".to_vec())),
            ("1.3.6.1.2.1.1.4.0", Value::OctetString(b"d".to_vec())),
            ("1.3.6.1.2.1.1.5.0", Value::OctetString(b"e".to_vec())),
            ("1.3.6.1.2.1.1.6.0", Value::OctetString(b"f".to_vec())),
            ("1.3.6.1.2.1.1.7.0", Value::OctetString(b"g".to_vec())),
            ("1.3.6.1.2.1.2.1.0", Value::OctetString(b"out-of-scope".to_vec())),
        ];
        let addr = spawn_fake_tree_agent(tree).await;

        let engine = Engine::spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mib: Arc<dyn crate::mib::MibResolver> = Arc::new(BuiltinMibResolver::new());
        let ops = Ops::new(engine, mib);
        let target = Target { host: TargetHost::Ip(addr.ip()), port: addr.port() };
        let opts = Options { timeout_ms: 200, ..Options::default() };

        let result = walk(&ops, &target, OidSource::Numeric("1.3.6.1.2.1.1"), &opts).await.unwrap();
        assert_eq!(result.len(), 7);
        for vb in &result {
            assert!(Oid::from_str("1.3.6.1.2.1.1").unwrap().is_strict_prefix_of(&vb.oid));
        }
        for pair in result.windows(2) {
            assert_eq!(pair[0].oid.compare(&pair[1].oid), std::cmp::Ordering::Less);
        }
    }
}
