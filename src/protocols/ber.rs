//! BER (ASN.1 Basic Encoding Rules) codec
//!
//! Implements the subset of BER that SNMP v1/v2c uses: primitive universal
//! types, the SNMP application types, context-tagged exception markers and
//! constructed SEQUENCE/PDU envelopes. Lengths are always definite; the
//! decoder rejects indefinite and non-minimal forms outright.

use bytes::{BufMut, BytesMut};

use crate::protocols::oid::{Oid, MAX_OID_LEN};
use crate::{Error, Result};

// Universal tags
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_SEQUENCE: u8 = 0x30;

// SNMP application tags
pub const TAG_IP_ADDRESS: u8 = 0x40;
pub const TAG_COUNTER32: u8 = 0x41;
pub const TAG_GAUGE32: u8 = 0x42;
pub const TAG_TIMETICKS: u8 = 0x43;
pub const TAG_COUNTER64: u8 = 0x46;

// v2c per-binding exception markers (context class, primitive)
pub const TAG_NO_SUCH_OBJECT: u8 = 0x80;
pub const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
pub const TAG_END_OF_MIB_VIEW: u8 = 0x82;

/// A typed SNMP value, one arm per wire kind.
///
/// The v2c exception markers are modelled as values so that variable
/// bindings stay a plain (OID, value) pair everywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i32),
    OctetString(Vec<u8>),
    Null,
    Oid(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl Value {
    pub fn tag(&self) -> u8 {
        match self {
            Value::Integer(_) => TAG_INTEGER,
            Value::OctetString(_) => TAG_OCTET_STRING,
            Value::Null => TAG_NULL,
            Value::Oid(_) => TAG_OID,
            Value::IpAddress(_) => TAG_IP_ADDRESS,
            Value::Counter32(_) => TAG_COUNTER32,
            Value::Gauge32(_) => TAG_GAUGE32,
            Value::TimeTicks(_) => TAG_TIMETICKS,
            Value::Counter64(_) => TAG_COUNTER64,
            Value::NoSuchObject => TAG_NO_SUCH_OBJECT,
            Value::NoSuchInstance => TAG_NO_SUCH_INSTANCE,
            Value::EndOfMibView => TAG_END_OF_MIB_VIEW,
        }
    }

    /// True for the v2c exception markers.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
        )
    }
}

/// Streaming decoder over a received packet.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn byte(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| Error::malformed("truncated"))?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::malformed("truncated"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// Reads a tag-length header and returns (tag byte, content length).
    ///
    /// Multi-byte tag numbers (low bits all set) are consumed but reported
    /// as the leading byte; the agent never accepts such tags anywhere a
    /// specific tag is required. The content is guaranteed to fit in the
    /// remaining input.
    pub fn read_header(&mut self) -> Result<(u8, usize)> {
        let tag = self.byte()?;
        if tag & 0x1f == 0x1f {
            // High tag number form: skip continuation bytes.
            loop {
                if self.byte()? & 0x80 == 0 {
                    break;
                }
            }
        }

        let len = self.read_length()?;
        if len > self.remaining() {
            return Err(Error::malformed("content length exceeds input"));
        }
        Ok((tag, len))
    }

    fn read_length(&mut self) -> Result<usize> {
        let first = self.byte()?;
        if first & 0x80 == 0 {
            return Ok(first as usize);
        }
        let n = (first & 0x7f) as usize;
        if n == 0 {
            return Err(Error::malformed("indefinite length"));
        }
        if n > 4 {
            return Err(Error::malformed("length field too wide"));
        }

        let mut len: usize = 0;
        for (i, b) in self.take(n)?.iter().enumerate() {
            if i == 0 && *b == 0 {
                return Err(Error::malformed("non-minimal length"));
            }
            len = (len << 8) | *b as usize;
        }
        if len < 0x80 {
            return Err(Error::malformed("non-minimal length"));
        }
        Ok(len)
    }

    /// Reads a header and requires the given tag.
    pub fn expect(&mut self, tag: u8) -> Result<usize> {
        let (got, len) = self.read_header()?;
        if got != tag {
            return Err(Error::malformed(format!(
                "expected tag {:#04x}, got {:#04x}",
                tag, got
            )));
        }
        Ok(len)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let len = self.expect(TAG_INTEGER)?;
        let v = signed_from_bytes(self.take(len)?)?;
        i32::try_from(v).map_err(|_| Error::malformed("INTEGER exceeds 32 bits"))
    }

    pub fn read_octet_string(&mut self) -> Result<Vec<u8>> {
        let len = self.expect(TAG_OCTET_STRING)?;
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_oid(&mut self) -> Result<Oid> {
        let len = self.expect(TAG_OID)?;
        decode_oid(self.take(len)?)
    }

    /// Reads any supported value, dispatching on its tag.
    pub fn read_value(&mut self) -> Result<Value> {
        let (tag, len) = self.read_header()?;
        let body = self.take(len)?;
        match tag {
            TAG_INTEGER => {
                let v = signed_from_bytes(body)?;
                let v =
                    i32::try_from(v).map_err(|_| Error::malformed("INTEGER exceeds 32 bits"))?;
                Ok(Value::Integer(v))
            }
            TAG_OCTET_STRING => Ok(Value::OctetString(body.to_vec())),
            TAG_NULL => {
                if !body.is_empty() {
                    return Err(Error::malformed("NULL with content"));
                }
                Ok(Value::Null)
            }
            TAG_OID => Ok(Value::Oid(decode_oid(body)?)),
            TAG_IP_ADDRESS => {
                let octets: [u8; 4] = body
                    .try_into()
                    .map_err(|_| Error::malformed("IpAddress is not 4 octets"))?;
                Ok(Value::IpAddress(octets))
            }
            TAG_COUNTER32 => Ok(Value::Counter32(unsigned_from_bytes(body, 4)? as u32)),
            TAG_GAUGE32 => Ok(Value::Gauge32(unsigned_from_bytes(body, 4)? as u32)),
            TAG_TIMETICKS => Ok(Value::TimeTicks(unsigned_from_bytes(body, 4)? as u32)),
            TAG_COUNTER64 => Ok(Value::Counter64(unsigned_from_bytes(body, 8)?)),
            TAG_NO_SUCH_OBJECT | TAG_NO_SUCH_INSTANCE | TAG_END_OF_MIB_VIEW => {
                if !body.is_empty() {
                    return Err(Error::malformed("exception marker with content"));
                }
                Ok(match tag {
                    TAG_NO_SUCH_OBJECT => Value::NoSuchObject,
                    TAG_NO_SUCH_INSTANCE => Value::NoSuchInstance,
                    _ => Value::EndOfMibView,
                })
            }
            other => Err(Error::malformed(format!("unsupported tag {:#04x}", other))),
        }
    }
}

fn signed_from_bytes(body: &[u8]) -> Result<i64> {
    if body.is_empty() {
        return Err(Error::malformed("empty INTEGER"));
    }
    if body.len() > 8 {
        return Err(Error::malformed("INTEGER too wide"));
    }
    let mut v: i64 = if body[0] & 0x80 != 0 { -1 } else { 0 };
    for b in body {
        v = (v << 8) | *b as i64;
    }
    Ok(v)
}

/// Unsigned SNMP application integers are non-negative INTEGERs and may
/// carry one leading zero octet beyond their natural width.
fn unsigned_from_bytes(body: &[u8], width: usize) -> Result<u64> {
    if body.is_empty() {
        return Err(Error::malformed("empty INTEGER"));
    }
    if body.len() > width + 1 || (body.len() == width + 1 && body[0] != 0) {
        return Err(Error::malformed("unsigned INTEGER exceeds declared width"));
    }
    let mut v: u64 = 0;
    for b in body {
        v = (v << 8) | *b as u64;
    }
    Ok(v)
}

fn decode_oid(body: &[u8]) -> Result<Oid> {
    if body.is_empty() {
        return Err(Error::malformed("empty OID"));
    }

    let mut groups = Vec::new();
    let mut pos = 0;
    while pos < body.len() {
        let mut v: u64 = 0;
        let start = pos;
        loop {
            let b = *body
                .get(pos)
                .ok_or_else(|| Error::malformed("truncated OID sub-identifier"))?;
            pos += 1;
            if pos - start == 1 && b == 0x80 {
                return Err(Error::malformed("non-minimal OID sub-identifier"));
            }
            v = (v << 7) | (b & 0x7f) as u64;
            if v > u32::MAX as u64 {
                return Err(Error::malformed("OID sub-identifier overflow"));
            }
            if b & 0x80 == 0 {
                break;
            }
        }
        groups.push(v as u32);
        if groups.len() > MAX_OID_LEN {
            return Err(Error::malformed("OID too long"));
        }
    }

    // The first group packs two arcs: 40*a + b, with a capped at 2.
    let first = groups[0];
    let (a, b) = if first < 80 {
        (first / 40, first % 40)
    } else {
        (2, first - 80)
    };

    let mut components = Vec::with_capacity(groups.len() + 1);
    components.push(a);
    components.push(b);
    components.extend_from_slice(&groups[1..]);
    Oid::new(components).map_err(|e| Error::malformed(e.to_string()))
}

/// Wraps an already-encoded body in a tag-length envelope.
pub fn encode_envelope(tag: u8, body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(body.len() + 6);
    buf.put_u8(tag);
    push_length(&mut buf, body.len());
    buf.extend_from_slice(body);
    buf
}

pub fn push_length(buf: &mut BytesMut, len: usize) {
    if len < 0x80 {
        buf.put_u8(len as u8);
        return;
    }
    let bits = usize::BITS as usize - len.leading_zeros() as usize;
    let n = (bits + 7) / 8;
    buf.put_u8(0x80 | n as u8);
    for i in (0..n).rev() {
        buf.put_u8((len >> (8 * i)) as u8);
    }
}

fn signed_len(v: i64) -> usize {
    let mut n = 1;
    while n < 8 {
        let rest = v >> (8 * n);
        let sign = (v >> (8 * n - 1)) & 1;
        if (rest == 0 && sign == 0) || (rest == -1 && sign == 1) {
            return n;
        }
        n += 1;
    }
    8
}

/// Minimal two's complement INTEGER under an arbitrary tag.
pub fn push_integer(buf: &mut BytesMut, tag: u8, value: i64) {
    let n = signed_len(value);
    buf.put_u8(tag);
    push_length(buf, n);
    for i in (0..n).rev() {
        buf.put_u8((value >> (8 * i)) as u8);
    }
}

/// Non-negative INTEGER form used by Counter/Gauge/TimeTicks/Counter64: a
/// leading zero octet is emitted when the top content bit would be set.
pub fn push_unsigned(buf: &mut BytesMut, tag: u8, value: u64) {
    let bits = u64::BITS as usize - value.leading_zeros() as usize;
    let n = std::cmp::max(1, (bits + 8) / 8);
    buf.put_u8(tag);
    push_length(buf, n);
    if n == 9 {
        buf.put_u8(0);
        buf.put_u64(value);
        return;
    }
    for i in (0..n).rev() {
        buf.put_u8((value >> (8 * i)) as u8);
    }
}

pub fn push_octets(buf: &mut BytesMut, tag: u8, body: &[u8]) {
    buf.put_u8(tag);
    push_length(buf, body.len());
    buf.extend_from_slice(body);
}

pub fn push_empty(buf: &mut BytesMut, tag: u8) {
    buf.put_u8(tag);
    buf.put_u8(0);
}

fn push_subid(buf: &mut BytesMut, v: u32) {
    let mut groups = [0u8; 5];
    let mut n = 0;
    let mut v = v;
    loop {
        groups[n] = (v & 0x7f) as u8;
        n += 1;
        v >>= 7;
        if v == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        let cont = if i == 0 { 0 } else { 0x80 };
        buf.put_u8(groups[i] | cont);
    }
}

pub fn push_oid(buf: &mut BytesMut, oid: &Oid) -> Result<()> {
    let arcs = oid.components();
    if arcs.len() < 2 {
        return Err(Error::malformed("OID needs at least two sub-identifiers"));
    }
    if arcs[0] > 2 || (arcs[0] < 2 && arcs[1] > 39) {
        return Err(Error::malformed("OID first arcs out of range"));
    }

    let mut body = BytesMut::with_capacity(arcs.len() + 4);
    push_subid(&mut body, 40 * arcs[0] + arcs[1]);
    for arc in &arcs[2..] {
        push_subid(&mut body, *arc);
    }

    buf.put_u8(TAG_OID);
    push_length(buf, body.len());
    buf.extend_from_slice(&body);
    Ok(())
}

pub fn push_value(buf: &mut BytesMut, value: &Value) -> Result<()> {
    match value {
        Value::Integer(v) => push_integer(buf, TAG_INTEGER, *v as i64),
        Value::OctetString(v) => push_octets(buf, TAG_OCTET_STRING, v),
        Value::Null => push_empty(buf, TAG_NULL),
        Value::Oid(v) => push_oid(buf, v)?,
        Value::IpAddress(v) => push_octets(buf, TAG_IP_ADDRESS, v),
        Value::Counter32(v) => push_unsigned(buf, TAG_COUNTER32, *v as u64),
        Value::Gauge32(v) => push_unsigned(buf, TAG_GAUGE32, *v as u64),
        Value::TimeTicks(v) => push_unsigned(buf, TAG_TIMETICKS, *v as u64),
        Value::Counter64(v) => push_unsigned(buf, TAG_COUNTER64, *v),
        Value::NoSuchObject => push_empty(buf, TAG_NO_SUCH_OBJECT),
        Value::NoSuchInstance => push_empty(buf, TAG_NO_SUCH_INSTANCE),
        Value::EndOfMibView => push_empty(buf, TAG_END_OF_MIB_VIEW),
    }
    Ok(())
}

/// Checks a TCP receive buffer for a complete outer SEQUENCE.
///
/// Returns the total frame length once the declared content is fully
/// buffered, `None` while more bytes are needed, and an error for anything
/// that can never become a valid frame.
pub fn frame_length(buf: &[u8]) -> Result<Option<usize>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    if buf[0] != TAG_SEQUENCE {
        return Err(Error::malformed("frame does not start with SEQUENCE"));
    }

    let first = buf[1];
    if first & 0x80 == 0 {
        let total = 2 + first as usize;
        return Ok(if buf.len() >= total { Some(total) } else { None });
    }

    let n = (first & 0x7f) as usize;
    if n == 0 {
        return Err(Error::malformed("indefinite length"));
    }
    if n > 4 {
        return Err(Error::malformed("length field too wide"));
    }
    if buf.len() < 2 + n {
        return Ok(None);
    }

    let mut len: usize = 0;
    for (i, b) in buf[2..2 + n].iter().enumerate() {
        if i == 0 && *b == 0 {
            return Err(Error::malformed("non-minimal length"));
        }
        len = (len << 8) | *b as usize;
    }
    if len < 0x80 {
        return Err(Error::malformed("non-minimal length"));
    }

    let total = 2 + n + len;
    Ok(if buf.len() >= total { Some(total) } else { None })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    fn round_trip(value: Value) {
        let mut buf = BytesMut::new();
        push_value(&mut buf, &value).unwrap();
        let mut dec = Decoder::new(&buf);
        assert_eq!(dec.read_value().unwrap(), value);
        assert!(dec.is_empty());
    }

    #[test]
    fn value_round_trips() {
        round_trip(Value::Integer(0));
        round_trip(Value::Integer(127));
        round_trip(Value::Integer(128));
        round_trip(Value::Integer(-1));
        round_trip(Value::Integer(i32::MIN));
        round_trip(Value::Integer(i32::MAX));
        round_trip(Value::OctetString(b"mini agent".to_vec()));
        round_trip(Value::OctetString(Vec::new()));
        round_trip(Value::Null);
        round_trip(Value::Oid(oid("1.3.6.1.4.1.2021.10.1.5.2")));
        round_trip(Value::IpAddress([192, 168, 1, 1]));
        round_trip(Value::Counter32(0));
        round_trip(Value::Counter32(u32::MAX));
        round_trip(Value::Gauge32(4_000_000_000));
        round_trip(Value::TimeTicks(8640000));
        round_trip(Value::Counter64(u64::MAX));
        round_trip(Value::NoSuchObject);
        round_trip(Value::NoSuchInstance);
        round_trip(Value::EndOfMibView);
    }

    #[test]
    fn unsigned_high_bit_takes_five_bytes() {
        let mut buf = BytesMut::new();
        push_unsigned(&mut buf, TAG_COUNTER32, 0xdead_beef);
        // tag, length, leading zero, then the four value octets
        assert_eq!(&buf[..], &[0x41, 0x05, 0x00, 0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn integer_is_minimal() {
        let mut buf = BytesMut::new();
        push_integer(&mut buf, TAG_INTEGER, 127);
        assert_eq!(&buf[..], &[0x02, 0x01, 0x7f]);

        buf.clear();
        push_integer(&mut buf, TAG_INTEGER, 128);
        assert_eq!(&buf[..], &[0x02, 0x02, 0x00, 0x80]);

        buf.clear();
        push_integer(&mut buf, TAG_INTEGER, -129);
        assert_eq!(&buf[..], &[0x02, 0x02, 0xff, 0x7f]);
    }

    #[test]
    fn oid_first_byte_packs_two_arcs() {
        let mut buf = BytesMut::new();
        push_oid(&mut buf, &oid("1.3.6.1.2.1")).unwrap();
        assert_eq!(&buf[..], &[0x06, 0x05, 0x2b, 0x06, 0x01, 0x02, 0x01]);
    }

    #[test]
    fn oid_multi_byte_sub_identifier() {
        let mut buf = BytesMut::new();
        push_oid(&mut buf, &oid("1.3.6.1.4.1.2021")).unwrap();
        // 2021 = 0x8f 0x65 in base-128 with continuation
        assert_eq!(
            &buf[..],
            &[0x06, 0x07, 0x2b, 0x06, 0x01, 0x04, 0x01, 0x8f, 0x65]
        );

        let mut dec = Decoder::new(&buf);
        assert_eq!(dec.read_oid().unwrap(), oid("1.3.6.1.4.1.2021"));
    }

    #[test]
    fn oid_zero_arc() {
        let mut buf = BytesMut::new();
        push_oid(&mut buf, &oid("0.0")).unwrap();
        assert_eq!(&buf[..], &[0x06, 0x01, 0x00]);
        let mut dec = Decoder::new(&buf);
        assert_eq!(dec.read_oid().unwrap(), oid("0.0"));
    }

    #[test]
    fn oid_rejects_out_of_range_first_arcs() {
        let mut buf = BytesMut::new();
        assert!(push_oid(&mut buf, &oid("3.1")).is_err());
        assert!(push_oid(&mut buf, &oid("1.40")).is_err());
    }

    #[test]
    fn long_form_length_round_trips() {
        let body = vec![0xaa; 300];
        let framed = encode_envelope(TAG_OCTET_STRING, &body);
        assert_eq!(&framed[..4], &[0x04, 0x82, 0x01, 0x2c]);

        let mut dec = Decoder::new(&framed);
        assert_eq!(dec.read_octet_string().unwrap(), body);
    }

    #[test]
    fn rejects_indefinite_length() {
        let mut dec = Decoder::new(&[0x04, 0x80, 0x00, 0x00]);
        assert!(dec.read_header().is_err());
    }

    #[test]
    fn rejects_non_minimal_length() {
        // 0x05 must be encoded in short form.
        let mut dec = Decoder::new(&[0x04, 0x81, 0x05, 1, 2, 3, 4, 5]);
        assert!(dec.read_header().is_err());
        // Leading zero in a long-form length.
        let data = [0x04, 0x82, 0x00, 0x90];
        let mut dec = Decoder::new(&data);
        assert!(dec.read_header().is_err());
    }

    #[test]
    fn rejects_truncation() {
        let mut buf = BytesMut::new();
        push_octets(&mut buf, TAG_OCTET_STRING, b"hello");
        for cut in 1..buf.len() {
            let mut dec = Decoder::new(&buf[..cut]);
            assert!(dec.read_octet_string().is_err(), "cut at {}", cut);
        }
    }

    #[test]
    fn rejects_wide_integer() {
        let mut dec = Decoder::new(&[0x02, 0x05, 0x01, 0x00, 0x00, 0x00, 0x00]);
        assert!(dec.read_i32().is_err());
        // Counter64 with a non-zero ninth octet is out of range.
        let mut dec = Decoder::new(&[0x46, 0x09, 0x01, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(dec.read_value().is_err());
    }

    #[test]
    fn tolerates_high_tag_number_form() {
        // Tag 31 in multi-byte form is consumed as a header, then rejected
        // as an unsupported value kind rather than misparsed.
        let mut dec = Decoder::new(&[0x1f, 0x22, 0x01, 0x00]);
        let (tag, len) = dec.read_header().unwrap();
        assert_eq!(tag, 0x1f);
        assert_eq!(len, 1);
    }

    #[test]
    fn frame_detection() {
        let body = vec![0u8; 10];
        let framed = encode_envelope(TAG_SEQUENCE, &body);
        for cut in 0..framed.len() {
            assert_eq!(frame_length(&framed[..cut]).unwrap(), None);
        }
        assert_eq!(frame_length(&framed).unwrap(), Some(framed.len()));

        // Trailing bytes beyond the frame do not change the result.
        let mut extra = framed.to_vec();
        extra.push(0xff);
        assert_eq!(frame_length(&extra).unwrap(), Some(framed.len()));

        assert!(frame_length(&[0x04, 0x02]).is_err());
        assert!(frame_length(&[0x30, 0x80]).is_err());
    }
}
