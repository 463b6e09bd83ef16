//! SNMP request dispatcher
//!
//! Turns one decoded request into one encoded GetResponse, or into
//! nothing at all: malformed input, bad versions, wrong communities and
//! unsupported PDU types are dropped without an answer. Everything here
//! is a pure function of (policy, MIB, packet bytes), which is what makes
//! the protocol semantics testable without sockets.

use bytes::BytesMut;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::mib::Mib;
use crate::protocols::snmp::{self, ErrorStatus, Message, PduType, VarBind, Version};
use crate::protocols::Value;

/// Compile-time ceiling on variable bindings per request.
pub const MAX_NR_VBS: usize = 32;

/// Per-transport response size cap in bytes, matching the receive buffer.
pub const MAX_PACKET_SIZE: usize = 2048;

/// Stateless request handler; holds only the authentication policy.
pub struct Dispatcher {
    community: Vec<u8>,
    auth: bool,
}

impl Dispatcher {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            community: config.community.clone().into_bytes(),
            auth: config.auth,
        }
    }

    /// Handles one request packet. `None` means drop: no response bytes
    /// may be sent for it.
    pub fn handle(&self, mib: &Mib, packet: &[u8]) -> Option<BytesMut> {
        let msg = match snmp::decode(packet) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("dropping malformed request: {}", e);
                return None;
            }
        };

        if self.auth && msg.community != self.community {
            warn!("dropping request with mismatched community");
            return None;
        }

        let response = match msg.pdu_type {
            PduType::GetResponse => {
                warn!("dropping inbound GetResponse");
                return None;
            }
            PduType::GetBulkRequest if msg.version == Version::V1 => {
                warn!("dropping GETBULK from a v1 requester");
                return None;
            }
            _ if msg.bindings.len() > MAX_NR_VBS => {
                debug!(
                    "request carries {} bindings, limit is {}",
                    msg.bindings.len(),
                    MAX_NR_VBS
                );
                msg.error_response(ErrorStatus::TooBig, 0)
            }
            PduType::SetRequest => {
                let status = match msg.version {
                    Version::V1 => ErrorStatus::ReadOnly,
                    Version::V2c => ErrorStatus::NoAccess,
                };
                msg.error_response(status, 1)
            }
            PduType::GetRequest => self.do_get(&msg, mib),
            PduType::GetNextRequest => self.do_getnext(&msg, mib),
            PduType::GetBulkRequest => return self.do_getbulk(&msg, mib),
        };

        finish(response, &msg)
    }

    fn do_get(&self, msg: &Message, mib: &Mib) -> Message {
        let mut response = msg.response();
        for (pos, vb) in msg.bindings.iter().enumerate() {
            match mib.get(&vb.oid) {
                Some(entry) => {
                    response
                        .bindings
                        .push(VarBind::new(entry.oid.clone(), entry.value.clone()));
                }
                None => match msg.version {
                    Version::V1 => {
                        return msg.error_response(ErrorStatus::NoSuchName, pos as i32 + 1);
                    }
                    Version::V2c => {
                        let marker = if mib.has_sibling_instance(&vb.oid) {
                            Value::NoSuchInstance
                        } else {
                            Value::NoSuchObject
                        };
                        response.bindings.push(VarBind::new(vb.oid.clone(), marker));
                    }
                },
            }
        }
        response
    }

    fn do_getnext(&self, msg: &Message, mib: &Mib) -> Message {
        let mut response = msg.response();
        for (pos, vb) in msg.bindings.iter().enumerate() {
            match mib.next_after(&vb.oid) {
                Some(entry) => {
                    response
                        .bindings
                        .push(VarBind::new(entry.oid.clone(), entry.value.clone()));
                }
                None => match msg.version {
                    Version::V1 => {
                        return msg.error_response(ErrorStatus::NoSuchName, pos as i32 + 1);
                    }
                    Version::V2c => {
                        response
                            .bindings
                            .push(VarBind::new(vb.oid.clone(), Value::EndOfMibView));
                    }
                },
            }
        }
        response
    }

    /// GETBULK: the first `non-repeaters` bindings step once, the rest
    /// step up to `max-repetitions` times. Oversized responses shed whole
    /// trailing repetition rounds before giving up with tooBig.
    fn do_getbulk(&self, msg: &Message, mib: &Mib) -> Option<BytesMut> {
        let n = msg.non_repeaters().min(msg.bindings.len());
        let max_repetitions = msg.max_repetitions();
        let mut response = msg.response();

        for vb in &msg.bindings[..n] {
            match mib.next_after(&vb.oid) {
                Some(entry) => response
                    .bindings
                    .push(VarBind::new(entry.oid.clone(), entry.value.clone())),
                None => response
                    .bindings
                    .push(VarBind::new(vb.oid.clone(), Value::EndOfMibView)),
            }
        }

        let repeaters: Vec<_> = msg.bindings[n..].iter().map(|vb| vb.oid.clone()).collect();
        let width = repeaters.len();
        let mut rounds = 0usize;
        if width > 0 {
            let mut cursors = repeaters;
            let mut done = vec![false; width];
            for _ in 0..max_repetitions {
                if done.iter().all(|d| *d) {
                    break;
                }
                for (i, cursor) in cursors.iter_mut().enumerate() {
                    if done[i] {
                        response
                            .bindings
                            .push(VarBind::new(cursor.clone(), Value::EndOfMibView));
                        continue;
                    }
                    match mib.next_after(cursor) {
                        Some(entry) => {
                            response
                                .bindings
                                .push(VarBind::new(entry.oid.clone(), entry.value.clone()));
                            *cursor = entry.oid.clone();
                        }
                        None => {
                            done[i] = true;
                            response
                                .bindings
                                .push(VarBind::new(cursor.clone(), Value::EndOfMibView));
                        }
                    }
                }
                rounds += 1;
            }
        }

        loop {
            let buf = match snmp::encode(&response) {
                Ok(buf) => buf,
                Err(e) => {
                    warn!("failed encoding GETBULK response: {}", e);
                    return None;
                }
            };
            if buf.len() <= MAX_PACKET_SIZE {
                return Some(buf);
            }
            if rounds > 0 && width > 0 {
                response.bindings.truncate(response.bindings.len() - width);
                rounds -= 1;
            } else {
                return finish(msg.error_response(ErrorStatus::TooBig, 0), msg);
            }
        }
    }
}

/// Encodes a response, falling back to a tooBig error PDU (with the
/// request bindings unchanged) when the encoding exceeds the size cap.
fn finish(response: Message, request: &Message) -> Option<BytesMut> {
    let buf = match snmp::encode(&response) {
        Ok(buf) => buf,
        Err(e) => {
            warn!("failed encoding response: {}", e);
            return None;
        }
    };
    if buf.len() <= MAX_PACKET_SIZE {
        return Some(buf);
    }

    debug!(
        "response of {} bytes exceeds the {} byte cap",
        buf.len(),
        MAX_PACKET_SIZE
    );
    let too_big = request.error_response(ErrorStatus::TooBig, 0);
    match snmp::encode(&too_big) {
        Ok(buf) => Some(buf),
        Err(e) => {
            warn!("failed encoding tooBig response: {}", e);
            None
        }
    }
}
