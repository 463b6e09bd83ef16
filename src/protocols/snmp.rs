//! SNMP message model
//!
//! Decoding and encoding of the SNMP v1/v2c message envelope:
//! SEQUENCE { version INTEGER, community OCTET STRING, pdu }. The PDU is a
//! context-tagged constructed value whose tag selects the operation.

use bytes::BytesMut;

use crate::protocols::ber::{self, Decoder, Value, TAG_SEQUENCE};
use crate::protocols::oid::Oid;
use crate::{Error, Result};

/// Protocol versions the agent answers. Anything else is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V1,
    V2c,
}

impl Version {
    pub fn from_wire(v: i32) -> Option<Self> {
        match v {
            0 => Some(Version::V1),
            1 => Some(Version::V2c),
            _ => None,
        }
    }

    pub fn wire(self) -> i32 {
        match self {
            Version::V1 => 0,
            Version::V2c => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    GetRequest,
    GetNextRequest,
    GetResponse,
    SetRequest,
    GetBulkRequest,
}

impl PduType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0xa0 => Some(PduType::GetRequest),
            0xa1 => Some(PduType::GetNextRequest),
            0xa2 => Some(PduType::GetResponse),
            0xa3 => Some(PduType::SetRequest),
            0xa5 => Some(PduType::GetBulkRequest),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            PduType::GetRequest => 0xa0,
            PduType::GetNextRequest => 0xa1,
            PduType::GetResponse => 0xa2,
            PduType::SetRequest => 0xa3,
            PduType::GetBulkRequest => 0xa5,
        }
    }
}

/// PDU-level error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    NoError = 0,
    TooBig = 1,
    NoSuchName = 2,
    BadValue = 3,
    ReadOnly = 4,
    GenErr = 5,
    NoAccess = 6,
}

impl ErrorStatus {
    pub fn wire(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: Value,
}

impl VarBind {
    pub fn new(oid: Oid, value: Value) -> Self {
        Self { oid, value }
    }

    pub fn unbound(oid: Oid) -> Self {
        Self {
            oid,
            value: Value::Null,
        }
    }
}

/// A decoded SNMP message.
///
/// `error_status` and `error_index` are kept as raw integers because
/// GETBULK reuses the same two slots for non-repeaters and
/// max-repetitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub version: Version,
    pub community: Vec<u8>,
    pub pdu_type: PduType,
    pub request_id: i32,
    pub error_status: i32,
    pub error_index: i32,
    pub bindings: Vec<VarBind>,
}

impl Message {
    /// GETBULK non-repeaters view of the error-status slot.
    pub fn non_repeaters(&self) -> usize {
        self.error_status.max(0) as usize
    }

    /// GETBULK max-repetitions view of the error-index slot.
    pub fn max_repetitions(&self) -> usize {
        self.error_index.max(0) as usize
    }

    /// Starts a GetResponse preserving version, community and request-id.
    pub fn response(&self) -> Message {
        Message {
            version: self.version,
            community: self.community.clone(),
            pdu_type: PduType::GetResponse,
            request_id: self.request_id,
            error_status: ErrorStatus::NoError.wire(),
            error_index: 0,
            bindings: Vec::new(),
        }
    }

    /// A GetResponse carrying a PDU-level error and the request bindings
    /// unchanged, as both v1 and v2c error surfaces require.
    pub fn error_response(&self, status: ErrorStatus, index: i32) -> Message {
        Message {
            version: self.version,
            community: self.community.clone(),
            pdu_type: PduType::GetResponse,
            request_id: self.request_id,
            error_status: status.wire(),
            error_index: index,
            bindings: self.bindings.clone(),
        }
    }
}

/// Decodes one complete SNMP message.
///
/// Unsupported versions and PDU tags are decode errors: the caller drops
/// the packet without answering.
pub fn decode(packet: &[u8]) -> Result<Message> {
    let mut dec = Decoder::new(packet);
    dec.expect(TAG_SEQUENCE)?;

    let wire_version = dec.read_i32()?;
    let version = Version::from_wire(wire_version)
        .ok_or_else(|| Error::malformed(format!("unsupported SNMP version {}", wire_version)))?;
    let community = dec.read_octet_string()?;

    let (tag, _pdu_len) = dec.read_header()?;
    let pdu_type = PduType::from_tag(tag)
        .ok_or_else(|| Error::malformed(format!("unsupported PDU tag {:#04x}", tag)))?;

    let request_id = dec.read_i32()?;
    let error_status = dec.read_i32()?;
    let error_index = dec.read_i32()?;

    let list_len = dec.expect(TAG_SEQUENCE)?;
    let list_end = dec.position() + list_len;
    let mut bindings = Vec::new();
    while dec.position() < list_end {
        dec.expect(TAG_SEQUENCE)?;
        let oid = dec.read_oid()?;
        let value = dec.read_value()?;
        bindings.push(VarBind::new(oid, value));
    }

    Ok(Message {
        version,
        community,
        pdu_type,
        request_id,
        error_status,
        error_index,
        bindings,
    })
}

/// Encodes a message, innermost structures first.
pub fn encode(msg: &Message) -> Result<BytesMut> {
    let mut list_body = BytesMut::new();
    for vb in &msg.bindings {
        let mut vb_body = BytesMut::new();
        ber::push_oid(&mut vb_body, &vb.oid)?;
        ber::push_value(&mut vb_body, &vb.value)?;
        list_body.extend_from_slice(&ber::encode_envelope(TAG_SEQUENCE, &vb_body));
    }
    let list = ber::encode_envelope(TAG_SEQUENCE, &list_body);

    let mut pdu_body = BytesMut::new();
    ber::push_integer(&mut pdu_body, ber::TAG_INTEGER, msg.request_id as i64);
    ber::push_integer(&mut pdu_body, ber::TAG_INTEGER, msg.error_status as i64);
    ber::push_integer(&mut pdu_body, ber::TAG_INTEGER, msg.error_index as i64);
    pdu_body.extend_from_slice(&list);
    let pdu = ber::encode_envelope(msg.pdu_type.tag(), &pdu_body);

    let mut msg_body = BytesMut::new();
    ber::push_integer(&mut msg_body, ber::TAG_INTEGER, msg.version.wire() as i64);
    ber::push_octets(&mut msg_body, ber::TAG_OCTET_STRING, &msg.community);
    msg_body.extend_from_slice(&pdu);

    Ok(ber::encode_envelope(TAG_SEQUENCE, &msg_body))
}
