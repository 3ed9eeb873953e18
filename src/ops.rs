//! GET / GET-NEXT / GET-BULK / SET (§4.4): the operations every higher-level
//! component (`Walk`, `BulkWalk`, `Multi`) is ultimately built from.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;

use crate::codec::{self, Message, Pdu, PduKind, Version};
use crate::config::Options;
use crate::engine::Engine;
use crate::error::SnmpError;
use crate::idgen::IdGen;
use crate::mib::MibResolver;
use crate::oid::{normalize, Oid, OidSource};
use crate::socket::Socket;
use crate::target::{Target, TargetHost};
use crate::varbind::{Value, VarBind};

/// A single decoded varbind result, the `{oid, type, value}` shape §4.4 names.
pub type OpResult = VarBind;

/// Bundles what every `SingleOps` call needs so call sites don't thread five
/// separate arguments through `Multi`/`Walk`/`BulkWalk`.
pub struct Ops {
    pub engine: Arc<Engine>,
    pub idgen: IdGen,
    pub mib: Arc<dyn MibResolver>,
}

impl Ops {
    pub fn new(engine: Arc<Engine>, mib: Arc<dyn MibResolver>) -> Self {
        Ops { engine, idgen: IdGen::new(), mib }
    }

    fn socket(&self) -> &Socket {
        self.engine.socket()
    }

    async fn resolve_dst(&self, target: &Target, port: u16) -> Result<SocketAddr, SnmpError> {
        let ip = match &target.host {
            TargetHost::Ip(ip) => *ip,
            TargetHost::Name(name) => {
                // DNS resolution is explicitly an external collaborator's job
                // (§1); std's resolver is the only thing available at this
                // boundary and is used strictly for turning an already-parsed
                // name into a socket address, never for OID/value work.
                let addr_str = format!("{}:{}", name, port);
                tokio::net::lookup_host(addr_str)
                    .await
                    .map_err(|_| SnmpError::Unreachable { target: target.clone() })?
                    .next()
                    .map(|a| a.ip())
                    .ok_or_else(|| SnmpError::Unreachable { target: target.clone() })?
            }
        };
        Ok(SocketAddr::new(ip, port))
    }

    /// One request/response round trip: allocate id, register, send, await,
    /// unregistering on any early return so a cancelled caller never leaks a
    /// `PendingEntry` (§5 cancellation contract).
    async fn round_trip(
        &self,
        target: &Target,
        version: Version,
        community: &str,
        kind: PduKind,
        field_a: i32,
        field_b: i32,
        varbinds: Vec<VarBind>,
        timeout: Duration,
    ) -> Result<Message, SnmpError> {
        let dst = self.resolve_dst(target, target.port).await?;
        let id = self.idgen.next(&self.engine) as i32;
        let deadline = Instant::now() + timeout;

        let msg = Message {
            version,
            community: community.to_string(),
            pdu: Pdu {
                kind,
                request_id: id,
                error_status_or_non_repeaters: field_a,
                error_index_or_max_repetitions: field_b,
                varbinds,
            },
        };
        let bytes = codec::encode(&msg);

        let rx = self.engine.register(id as u32, target.clone(), deadline)?;

        if let Err(e) = self.socket().send(&bytes, dst).await {
            self.engine.unregister(id as u32);
            return Err(e);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => {
                // sender half dropped without a send: engine died underneath us.
                self.engine.unregister(id as u32);
                Err(SnmpError::TaskFailed("engine waiter channel closed".into()))
            }
        }
    }

    /// Shared retry loop (§4.4 step 5): only `timeout` is retried, up to
    /// `opts.retries` additional attempts, each with a freshly issued id.
    async fn with_retries<F, Fut>(&self, retries: u32, mut attempt: F) -> Result<Message, SnmpError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Message, SnmpError>>,
    {
        let mut tries_left = retries + 1;
        loop {
            match attempt().await {
                Ok(msg) => return Ok(msg),
                Err(e) => {
                    tries_left -= 1;
                    let retriable_timeout = matches!(e, SnmpError::Timeout { .. });
                    if !retriable_timeout || tries_left == 0 {
                        return Err(e);
                    }
                    debug!("ops: retrying after timeout, {} attempt(s) left", tries_left);
                }
            }
        }
    }

    fn single_result(msg: Message, oid_hint: &Oid, target: &Target) -> Result<VarBind, SnmpError> {
        let vb = msg
            .pdu
            .varbinds
            .into_iter()
            .next()
            .ok_or_else(|| SnmpError::Protocol("empty response PDU".into()))?;

        if msg.pdu.error_status_or_non_repeaters != 0 {
            let atom = codec::decode_error_status(msg.pdu.error_status_or_non_repeaters)
                .ok_or_else(|| SnmpError::Protocol("unrecognised error-status".into()))?;
            return Err(SnmpError::Device { target: target.clone(), oid: oid_hint.clone(), atom });
        }

        Ok(vb)
    }

    pub async fn get(&self, target: &Target, oid: OidSource<'_>, opts: &Options) -> Result<VarBind, SnmpError> {
        let oid = normalize(oid, self.mib.as_ref())?;
        let timeout = Duration::from_millis(opts.timeout_ms);
        let vb_req = VarBind::new(oid.clone(), Value::Null);

        let msg = self
            .with_retries(opts.retries, || {
                self.round_trip(
                    target,
                    opts.version,
                    &opts.community,
                    PduKind::GetRequest,
                    0,
                    0,
                    vec![vb_req.clone()],
                    timeout,
                )
            })
            .await?;

        Self::single_result(msg, &oid, target)
    }

    pub async fn get_next(&self, target: &Target, oid: OidSource<'_>, opts: &Options) -> Result<VarBind, SnmpError> {
        let oid = normalize(oid, self.mib.as_ref())?;
        let timeout = Duration::from_millis(opts.timeout_ms);
        let vb_req = VarBind::new(oid.clone(), Value::Null);

        let msg = self
            .with_retries(opts.retries, || {
                self.round_trip(
                    target,
                    opts.version,
                    &opts.community,
                    PduKind::GetNextRequest,
                    0,
                    0,
                    vec![vb_req.clone()],
                    timeout,
                )
            })
            .await?;

        Self::single_result(msg, &oid, target)
    }

    /// `get_bulk` rewrites an unspecified version to v2c and rejects any
    /// explicit non-v2c version (§4.4 step 6 / S2).
    pub async fn get_bulk(
        &self,
        target: &Target,
        oid: OidSource<'_>,
        opts: &Options,
    ) -> Result<Vec<VarBind>, SnmpError> {
        if opts.version != Version::V2c {
            return Err(SnmpError::GetBulkRequiresV2c);
        }
        let oid = normalize(oid, self.mib.as_ref())?;
        let timeout = Duration::from_millis(opts.timeout_ms);
        let vb_req = VarBind::new(oid.clone(), Value::Null);

        let msg = self
            .with_retries(opts.retries, || {
                self.round_trip(
                    target,
                    Version::V2c,
                    &opts.community,
                    PduKind::GetBulkRequest,
                    opts.non_repeaters as i32,
                    opts.max_repetitions as i32,
                    vec![vb_req.clone()],
                    timeout,
                )
            })
            .await?;

        if msg.pdu.error_status_or_non_repeaters != 0 {
            if let Some(atom) = codec::decode_error_status(msg.pdu.error_status_or_non_repeaters) {
                return Err(SnmpError::Device { target: target.clone(), oid, atom });
            }
        }
        Ok(msg.pdu.varbinds)
    }

    pub async fn set(
        &self,
        target: &Target,
        oid: OidSource<'_>,
        value: Value,
        opts: &Options,
    ) -> Result<VarBind, SnmpError> {
        let oid = normalize(oid, self.mib.as_ref())?;
        let timeout = Duration::from_millis(opts.timeout_ms);
        let vb_req = VarBind::new(oid.clone(), value);

        let msg = self
            .with_retries(opts.retries, || {
                self.round_trip(
                    target,
                    opts.version,
                    &opts.community,
                    PduKind::SetRequest,
                    0,
                    0,
                    vec![vb_req.clone()],
                    timeout,
                )
            })
            .await?;

        Self::single_result(msg, &oid, target)
    }
}

/// Surfaces a send/recv failure kind suitable for `{network_error, r}` in
/// `Multi`'s error surface (§4.9) without re-classifying timeouts as network
/// errors.
pub fn is_network_error(e: &SnmpError) -> bool {
    matches!(e, SnmpError::Network { .. } | SnmpError::Unreachable { .. } | SnmpError::ConnectionRefused { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mib::BuiltinMibResolver;
    use std::net::SocketAddr;

    fn encode_get_response(request_id: i32, oid: &str, value: Value) -> Vec<u8> {
        let msg = Message {
            version: Version::V2c,
            community: "public".into(),
            pdu: Pdu {
                kind: PduKind::GetResponse,
                request_id,
                error_status_or_non_repeaters: 0,
                error_index_or_max_repetitions: 0,
                varbinds: vec![VarBind::new(oid.parse().unwrap(), value)],
            },
        };
        codec::encode(&msg)
    }

    #[tokio::test]
    async fn get_scalar_round_trips_against_fake_agent() {
        let engine = Engine::spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mib: Arc<dyn MibResolver> = Arc::new(BuiltinMibResolver::new());
        let ops = Ops::new(engine, mib);

        // Stand up a one-shot fake agent that answers whatever id it is sent.
        let agent_sock = tokio::net::UdpSocket::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap())
            .await
            .unwrap();
        let agent_addr = agent_sock.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 65535];
            if let Ok((len, src)) = agent_sock.recv_from(&mut buf).await {
                let decoded = codec::decode(&buf[..len]).unwrap();
                let resp = encode_get_response(
                    decoded.pdu.request_id,
                    "1.3.6.1.2.1.1.1.0",
                    Value::OctetString(b"Test Device".to_vec()),
                );
                let _ = agent_sock.send_to(&resp, src).await;
            }
        });

        let target = Target { host: TargetHost::Ip(agent_addr.ip()), port: agent_addr.port() };
        let opts = Options { timeout_ms: 200, ..Options::default() };
        let result = ops.get(&target, OidSource::Numeric("1.3.6.1.2.1.1.1.0"), &opts).await.unwrap();
        assert_eq!(result.value, Value::OctetString(b"Test Device".to_vec()));
    }

    #[tokio::test]
    async fn get_bulk_rejects_v1() {
        let engine = Engine::spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mib: Arc<dyn MibResolver> = Arc::new(BuiltinMibResolver::new());
        let ops = Ops::new(engine, mib);
        let target: Target = "127.0.0.1:1161".parse().unwrap();
        let opts = Options { version: Version::V1, ..Options::default() };
        let err = ops.get_bulk(&target, OidSource::Numeric("1.3.6.1.2.1.2.2"), &opts).await.unwrap_err();
        assert!(matches!(err, SnmpError::GetBulkRequiresV2c));
    }

    #[tokio::test]
    async fn get_against_unreachable_target_times_out() {
        let engine = Engine::spawn("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mib: Arc<dyn MibResolver> = Arc::new(BuiltinMibResolver::new());
        let ops = Ops::new(engine, mib);
        // Nothing is listening on this loopback port.
        let target: Target = "127.0.0.1:1".parse().unwrap();
        let opts = Options { timeout_ms: 50, retries: 0, ..Options::default() };
        let err = ops.get(&target, OidSource::Numeric("1.3.6.1.2.1.1.1.0"), &opts).await.unwrap_err();
        assert!(matches!(err, SnmpError::Timeout { .. }));
    }
}
