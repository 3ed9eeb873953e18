//! BER/DER encode and decode for SNMPv1/v2c messages (§6's `Codec` contract).
//!
//! `Codec` is treated as a collaborator whose wire-level *contract* with the
//! core matters most — but the crate has to actually talk to agents, so this
//! module is a complete, from-scratch BER codec rather than a stub. The
//! varint OID encoding and SEQUENCE/INTEGER/OCTET STRING tag layout follow
//! the send-only PDU builders found in reference SNMP client sketches;
//! decode, the v2c exception tags, and the full application-tag set are
//! added here since those only ever send.

use crate::error::{DeviceErrorAtom, ErrorKind, SnmpError};
use crate::oid::Oid;
use crate::varbind::{VarBind, Value};
use std::str::FromStr;

pub const VERSION_V1: i64 = 0;
pub const VERSION_V2C: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Version {
    V1,
    V2c,
}

impl Version {
    fn to_wire(self) -> i64 {
        match self {
            Version::V1 => VERSION_V1,
            Version::V2c => VERSION_V2C,
        }
    }

    fn from_wire(v: i64) -> Result<Self, SnmpError> {
        match v {
            VERSION_V1 => Ok(Version::V1),
            VERSION_V2C => Ok(Version::V2c),
            _ => Err(SnmpError::Protocol(format!("unsupported SNMP version {}", v))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduKind {
    GetRequest,
    GetNextRequest,
    GetResponse,
    SetRequest,
    GetBulkRequest,
}

impl PduKind {
    fn tag(self) -> u8 {
        match self {
            PduKind::GetRequest => 0xa0,
            PduKind::GetNextRequest => 0xa1,
            PduKind::GetResponse => 0xa2,
            PduKind::SetRequest => 0xa3,
            PduKind::GetBulkRequest => 0xa5,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, SnmpError> {
        Ok(match tag {
            0xa0 => PduKind::GetRequest,
            0xa1 => PduKind::GetNextRequest,
            0xa2 => PduKind::GetResponse,
            0xa3 => PduKind::SetRequest,
            0xa5 => PduKind::GetBulkRequest,
            other => return Err(SnmpError::Protocol(format!("unknown PDU tag 0x{:02x}", other))),
        })
    }
}

#[derive(Debug, Clone)]
pub struct Pdu {
    pub kind: PduKind,
    pub request_id: i32,
    /// error-status for GetResponse; non_repeaters for GetBulkRequest.
    pub error_status_or_non_repeaters: i32,
    /// error-index for GetResponse; max_repetitions for GetBulkRequest.
    pub error_index_or_max_repetitions: i32,
    pub varbinds: Vec<VarBind>,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub version: Version,
    pub community: String,
    pub pdu: Pdu,
}

/// Encodes a PDU error-status into its `DeviceErrorAtom`, when non-zero.
pub fn decode_error_status(code: i32) -> Option<DeviceErrorAtom> {
    if code == 0 {
        None
    } else {
        DeviceErrorAtom::from_code(code as i64)
    }
}

pub fn valid_error_status(code: i32) -> bool {
    code == 0 || DeviceErrorAtom::from_code(code as i64).is_some()
}

pub fn oid_string_to_list(s: &str) -> Result<Vec<u32>, SnmpError> {
    Oid::from_str(s).map(Oid::into_arcs)
}

pub fn oid_list_to_string(seq: &[u32]) -> String {
    seq.iter().map(u32::to_string).collect::<Vec<_>>().join(".")
}

pub fn oid_compare(a: &[u32], b: &[u32]) -> std::cmp::Ordering {
    a.cmp(b)
}

// ---------------------------------------------------------------------
// BER primitives
// ---------------------------------------------------------------------

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OBJECT_IDENTIFIER: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_COUNTER32: u8 = 0x41;
const TAG_GAUGE32: u8 = 0x42;
const TAG_TIMETICKS: u8 = 0x43;
const TAG_OPAQUE: u8 = 0x44;
const TAG_COUNTER64: u8 = 0x46;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;
const TAG_BOOLEAN: u8 = 0x01;

fn encode_length(buf: &mut Vec<u8>, len: usize) {
    if len < 128 {
        buf.push(len as u8);
    } else {
        let mut bytes = Vec::new();
        let mut v = len;
        while v > 0 {
            bytes.push((v & 0xff) as u8);
            v >>= 8;
        }
        bytes.reverse();
        buf.push(0x80 | bytes.len() as u8);
        buf.extend_from_slice(&bytes);
    }
}

fn encode_tlv(buf: &mut Vec<u8>, tag: u8, content: &[u8]) {
    buf.push(tag);
    encode_length(buf, content.len());
    buf.extend_from_slice(content);
}

fn encode_integer_bytes(value: i64) -> Vec<u8> {
    if value == 0 {
        return vec![0];
    }
    let mut bytes = value.to_be_bytes().to_vec();
    // Strip redundant leading sign-extension bytes, keeping one sign byte.
    while bytes.len() > 1
        && ((bytes[0] == 0x00 && bytes[1] & 0x80 == 0) || (bytes[0] == 0xff && bytes[1] & 0x80 != 0))
    {
        bytes.remove(0);
    }
    bytes
}

fn encode_unsigned_bytes(value: u64) -> Vec<u8> {
    let mut bytes = value.to_be_bytes().to_vec();
    while bytes.len() > 1 && bytes[0] == 0 {
        bytes.remove(0);
    }
    if bytes[0] & 0x80 != 0 {
        bytes.insert(0, 0); // keep it unsigned
    }
    bytes
}

fn encode_integer(buf: &mut Vec<u8>, value: i64) {
    encode_tlv(buf, TAG_INTEGER, &encode_integer_bytes(value));
}

fn encode_oid_value(oid: &Oid) -> Vec<u8> {
    let arcs = oid.arcs();
    let mut out = Vec::new();
    if arcs.len() >= 2 {
        out.push((arcs[0] * 40 + arcs[1]) as u8);
        for &arc in &arcs[2..] {
            push_varint(&mut out, arc);
        }
    } else if arcs.len() == 1 {
        out.push((arcs[0] * 40) as u8);
    }
    out
}

fn push_varint(out: &mut Vec<u8>, value: u32) {
    if value < 128 {
        out.push(value as u8);
        return;
    }
    let mut parts = Vec::new();
    let mut v = value;
    parts.push((v & 0x7f) as u8);
    v >>= 7;
    while v > 0 {
        parts.push((v & 0x7f) as u8 | 0x80);
        v >>= 7;
    }
    parts.reverse();
    out.extend_from_slice(&parts);
}

fn encode_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(v) => encode_integer(buf, *v),
        Value::Unsigned32(v) => encode_tlv(buf, TAG_INTEGER, &encode_unsigned_bytes(*v as u64)),
        Value::Counter32(v) => encode_tlv(buf, TAG_COUNTER32, &encode_unsigned_bytes(*v as u64)),
        Value::Counter64(v) => encode_tlv(buf, TAG_COUNTER64, &encode_unsigned_bytes(*v)),
        Value::Gauge32(v) => encode_tlv(buf, TAG_GAUGE32, &encode_unsigned_bytes(*v as u64)),
        Value::TimeTicks(v) => encode_tlv(buf, TAG_TIMETICKS, &encode_unsigned_bytes(*v as u64)),
        Value::OctetString(v) => encode_tlv(buf, TAG_OCTET_STRING, v),
        Value::ObjectIdentifier(o) => encode_tlv(buf, TAG_OBJECT_IDENTIFIER, &encode_oid_value(o)),
        Value::IpAddress(ip) => encode_tlv(buf, TAG_IP_ADDRESS, ip),
        Value::Boolean(b) => encode_tlv(buf, TAG_BOOLEAN, &[if *b { 1 } else { 0 }]),
        Value::Null => encode_tlv(buf, TAG_NULL, &[]),
        Value::Opaque(v) => encode_tlv(buf, TAG_OPAQUE, v),
        Value::NoSuchObject => encode_tlv(buf, TAG_NO_SUCH_OBJECT, &[]),
        Value::NoSuchInstance => encode_tlv(buf, TAG_NO_SUCH_INSTANCE, &[]),
        Value::EndOfMibView => encode_tlv(buf, TAG_END_OF_MIB_VIEW, &[]),
    }
}

fn encode_varbind(buf: &mut Vec<u8>, vb: &VarBind) {
    let mut content = Vec::new();
    encode_tlv(&mut content, TAG_OBJECT_IDENTIFIER, &encode_oid_value(&vb.oid));
    encode_value(&mut content, &vb.value);
    encode_tlv(buf, TAG_SEQUENCE, &content);
}

/// Encodes a full SNMP message to its wire bytes.
pub fn encode(msg: &Message) -> Vec<u8> {
    let mut varbind_list = Vec::new();
    for vb in &msg.pdu.varbinds {
        encode_varbind(&mut varbind_list, vb);
    }
    let mut varbind_list_tlv = Vec::new();
    encode_tlv(&mut varbind_list_tlv, TAG_SEQUENCE, &varbind_list);

    let mut pdu_content = Vec::new();
    encode_integer(&mut pdu_content, msg.pdu.request_id as i64);
    encode_integer(&mut pdu_content, msg.pdu.error_status_or_non_repeaters as i64);
    encode_integer(&mut pdu_content, msg.pdu.error_index_or_max_repetitions as i64);
    pdu_content.extend_from_slice(&varbind_list_tlv);

    let mut pdu_tlv = Vec::new();
    encode_tlv(&mut pdu_tlv, msg.pdu.kind.tag(), &pdu_content);

    let mut message_content = Vec::new();
    encode_integer(&mut message_content, msg.version.to_wire());
    encode_tlv(&mut message_content, TAG_OCTET_STRING, msg.community.as_bytes());
    message_content.extend_from_slice(&pdu_tlv);

    let mut out = Vec::new();
    encode_tlv(&mut out, TAG_SEQUENCE, &message_content);
    out
}

// ---------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, SnmpError> {
        let b = *self.buf.get(self.pos).ok_or_else(truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_len(&mut self) -> Result<usize, SnmpError> {
        let first = self.read_u8()?;
        if first & 0x80 == 0 {
            Ok(first as usize)
        } else {
            let n = (first & 0x7f) as usize;
            if n == 0 || n > 4 {
                return Err(SnmpError::Protocol("unsupported BER length form".into()));
            }
            let mut len = 0usize;
            for _ in 0..n {
                len = (len << 8) | self.read_u8()? as usize;
            }
            Ok(len)
        }
    }

    /// Reads a tag/length header and returns `(tag, content_slice)`, advancing past the content.
    fn read_tlv(&mut self) -> Result<(u8, &'a [u8]), SnmpError> {
        let tag = self.read_u8()?;
        let len = self.read_len()?;
        let start = self.pos;
        let end = start
            .checked_add(len)
            .filter(|&e| e <= self.buf.len())
            .ok_or_else(truncated)?;
        self.pos = end;
        Ok((tag, &self.buf[start..end]))
    }
}

fn truncated() -> SnmpError {
    SnmpError::Protocol("truncated BER message".into())
}

fn decode_integer_bytes(bytes: &[u8]) -> Result<i64, SnmpError> {
    if bytes.is_empty() {
        return Err(SnmpError::Protocol("empty INTEGER".into()));
    }
    let negative = bytes[0] & 0x80 != 0;
    let mut value: i64 = if negative { -1 } else { 0 };
    for &b in bytes {
        value = (value << 8) | b as i64;
    }
    Ok(value)
}

fn decode_unsigned_bytes(bytes: &[u8]) -> Result<u64, SnmpError> {
    if bytes.is_empty() {
        return Err(SnmpError::Protocol("empty unsigned value".into()));
    }
    let mut value: u64 = 0;
    for &b in bytes {
        value = (value << 8) | b as u64;
    }
    Ok(value)
}

fn decode_oid_value(bytes: &[u8]) -> Result<Oid, SnmpError> {
    if bytes.is_empty() {
        return Err(SnmpError::Protocol("empty OID".into()));
    }
    let mut arcs = vec![(bytes[0] / 40) as u32, (bytes[0] % 40) as u32];
    let mut value: u32 = 0;
    for &b in &bytes[1..] {
        value = (value << 7) | (b & 0x7f) as u32;
        if b & 0x80 == 0 {
            arcs.push(value);
            value = 0;
        }
    }
    Oid::new(arcs)
}

fn decode_value(tag: u8, content: &[u8]) -> Result<Value, SnmpError> {
    Ok(match tag {
        TAG_INTEGER => Value::Integer(decode_integer_bytes(content)?),
        TAG_OCTET_STRING => Value::OctetString(content.to_vec()),
        TAG_NULL => Value::Null,
        TAG_OBJECT_IDENTIFIER => Value::ObjectIdentifier(decode_oid_value(content)?),
        TAG_IP_ADDRESS => {
            if content.len() != 4 {
                return Err(SnmpError::Protocol("IpAddress must be 4 bytes".into()));
            }
            Value::IpAddress([content[0], content[1], content[2], content[3]])
        }
        TAG_COUNTER32 => Value::Counter32(decode_unsigned_bytes(content)? as u32),
        TAG_GAUGE32 => Value::Gauge32(decode_unsigned_bytes(content)? as u32),
        TAG_TIMETICKS => Value::TimeTicks(decode_unsigned_bytes(content)? as u32),
        TAG_OPAQUE => Value::Opaque(content.to_vec()),
        TAG_COUNTER64 => Value::Counter64(decode_unsigned_bytes(content)?),
        TAG_BOOLEAN => Value::Boolean(content.first().copied().unwrap_or(0) != 0),
        TAG_NO_SUCH_OBJECT => Value::NoSuchObject,
        TAG_NO_SUCH_INSTANCE => Value::NoSuchInstance,
        TAG_END_OF_MIB_VIEW => Value::EndOfMibView,
        other => return Err(SnmpError::Protocol(format!("unknown value tag 0x{:02x}", other))),
    })
}

fn decode_varbind(bytes: &[u8]) -> Result<VarBind, SnmpError> {
    let mut r = Reader::new(bytes);
    let (oid_tag, oid_content) = r.read_tlv()?;
    if oid_tag != TAG_OBJECT_IDENTIFIER {
        return Err(SnmpError::Protocol("varbind missing OID".into()));
    }
    let oid = decode_oid_value(oid_content)?;
    let (value_tag, value_content) = r.read_tlv()?;
    let value = decode_value(value_tag, value_content)?;
    Ok(VarBind::new(oid, value))
}

/// Decodes a full SNMP message, extracting `{version, community, pdu}` per §6.
/// Never panics on malformed input; always returns `Err` instead.
pub fn decode(bytes: &[u8]) -> Result<Message, SnmpError> {
    let mut top = Reader::new(bytes);
    let (seq_tag, seq_content) = top.read_tlv()?;
    if seq_tag != TAG_SEQUENCE {
        return Err(SnmpError::Protocol("message is not a SEQUENCE".into()));
    }

    let mut r = Reader::new(seq_content);
    let (version_tag, version_content) = r.read_tlv()?;
    if version_tag != TAG_INTEGER {
        return Err(SnmpError::Protocol("missing version INTEGER".into()));
    }
    let version = Version::from_wire(decode_integer_bytes(version_content)?)?;

    let (community_tag, community_content) = r.read_tlv()?;
    if community_tag != TAG_OCTET_STRING {
        return Err(SnmpError::Protocol("missing community string".into()));
    }
    let community = String::from_utf8_lossy(community_content).into_owned();

    let (pdu_tag, pdu_content) = r.read_tlv()?;
    let kind = PduKind::from_tag(pdu_tag)?;

    let mut pr = Reader::new(pdu_content);
    let (rid_tag, rid_content) = pr.read_tlv()?;
    if rid_tag != TAG_INTEGER {
        return Err(SnmpError::Protocol("missing request-id".into()));
    }
    let request_id = decode_integer_bytes(rid_content)? as i32;

    let (a_tag, a_content) = pr.read_tlv()?;
    if a_tag != TAG_INTEGER {
        return Err(SnmpError::Protocol("missing error-status/non-repeaters".into()));
    }
    let a = decode_integer_bytes(a_content)? as i32;

    let (b_tag, b_content) = pr.read_tlv()?;
    if b_tag != TAG_INTEGER {
        return Err(SnmpError::Protocol("missing error-index/max-repetitions".into()));
    }
    let b = decode_integer_bytes(b_content)? as i32;

    let (vbl_tag, vbl_content) = pr.read_tlv()?;
    if vbl_tag != TAG_SEQUENCE {
        return Err(SnmpError::Protocol("missing varbind list".into()));
    }
    let mut vbr = Reader::new(vbl_content);
    let mut varbinds = Vec::new();
    while vbr.pos < vbr.buf.len() {
        let (vb_tag, vb_content) = vbr.read_tlv()?;
        if vb_tag != TAG_SEQUENCE {
            return Err(SnmpError::Protocol("varbind entry is not a SEQUENCE".into()));
        }
        varbinds.push(decode_varbind(vb_content)?);
    }

    Ok(Message {
        version,
        community,
        pdu: Pdu {
            kind,
            request_id,
            error_status_or_non_repeaters: a,
            error_index_or_max_repetitions: b,
            varbinds,
        },
    })
}

/// Extracts just the request-id from a raw datagram, without fully decoding
/// the PDU body. Used by the engine's socket reader to dispatch without
/// blocking on varbind parsing (§5).
pub fn peek_request_id(bytes: &[u8]) -> Option<i32> {
    let mut top = Reader::new(bytes);
    let (_, seq_content) = top.read_tlv().ok()?;
    let mut r = Reader::new(seq_content);
    let _version = r.read_tlv().ok()?;
    let _community = r.read_tlv().ok()?;
    let (_, pdu_content) = r.read_tlv().ok()?;
    let mut pr = Reader::new(pdu_content);
    let (rid_tag, rid_content) = pr.read_tlv().ok()?;
    if rid_tag != TAG_INTEGER {
        return None;
    }
    decode_integer_bytes(rid_content).ok().map(|v| v as i32)
}

pub fn error_atom_from_status(status: i32) -> Option<DeviceErrorAtom> {
    decode_error_status(status)
}

pub fn error_kind_for_atom(atom: DeviceErrorAtom) -> ErrorKind {
    atom.kind()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_get(request_id: i32, oid: &str) -> Message {
        Message {
            version: Version::V2c,
            community: "public".into(),
            pdu: Pdu {
                kind: PduKind::GetRequest,
                request_id,
                error_status_or_non_repeaters: 0,
                error_index_or_max_repetitions: 0,
                varbinds: vec![VarBind::new(Oid::from_str(oid).unwrap(), Value::Null)],
            },
        }
    }

    #[test]
    fn round_trips_get_request() {
        let msg = sample_get(42, "1.3.6.1.2.1.1.1.0");
        let bytes = encode(&msg);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.version, Version::V2c);
        assert_eq!(decoded.community, "public");
        assert_eq!(decoded.pdu.request_id, 42);
        assert_eq!(decoded.pdu.varbinds.len(), 1);
        assert_eq!(decoded.pdu.varbinds[0].oid.to_string(), "1.3.6.1.2.1.1.1.0");
    }

    #[test]
    fn round_trips_octet_string_response() {
        let mut msg = sample_get(7, "1.3.6.1.2.1.1.1.0");
        msg.pdu.kind = PduKind::GetResponse;
        msg.pdu.varbinds[0].value = Value::OctetString(b"Test Device".to_vec());
        let bytes = encode(&msg);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.pdu.varbinds[0].value, Value::OctetString(b"Test Device".to_vec()));
    }

    #[test]
    fn round_trips_large_oid_arcs() {
        let msg = sample_get(1, "1.3.6.1.4.1.2021.10.1.3.1");
        let bytes = encode(&msg);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.pdu.varbinds[0].oid.to_string(), "1.3.6.1.4.1.2021.10.1.3.1");
    }

    #[test]
    fn peek_request_id_matches_full_decode() {
        let msg = sample_get(987, "1.3.6.1.2.1.1.1.0");
        let bytes = encode(&msg);
        assert_eq!(peek_request_id(&bytes), Some(987));
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let msg = sample_get(1, "1.3.6.1.2.1.1.1.0");
        let mut bytes = encode(&msg);
        bytes.truncate(bytes.len() - 3);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn decode_v1_rejects_malformed_version() {
        let bytes = vec![0x30, 0x03, 0x02, 0x01, 0x09];
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn error_status_maps_to_atom() {
        assert_eq!(error_atom_from_status(2), Some(DeviceErrorAtom::NoSuchName));
        assert_eq!(error_atom_from_status(0), None);
        assert!(valid_error_status(0));
        assert!(valid_error_status(1));
        assert!(!valid_error_status(255));
    }
}
