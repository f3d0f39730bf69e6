#![forbid(unsafe_code)]

//! Binary multiaddr decoding, limited to what is needed to recover the thread
//! id carried by a `/thread/<id>` component.

use crate::thread::ThreadId;
use crate::ContractViolation;

pub const PROTOCOL_IP4: u64 = 4;
pub const PROTOCOL_TCP: u64 = 6;
pub const PROTOCOL_IP6: u64 = 41;
pub const PROTOCOL_DNS4: u64 = 54;
pub const PROTOCOL_UDP: u64 = 273;
pub const PROTOCOL_THREAD: u64 = 406;
pub const PROTOCOL_P2P: u64 = 421;
pub const PROTOCOL_QUIC_V1: u64 = 461;

/// Multiformats caps unsigned varints at 9 bytes (63 bits).
const MAX_UVARINT_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueSize {
    Fixed(usize),
    LengthPrefixed,
}

fn value_size(code: u64) -> Option<ValueSize> {
    use ValueSize::{Fixed, LengthPrefixed};
    let size = match code {
        4 => Fixed(4),                                       // ip4
        6 | 33 | 132 | 273 => Fixed(2),                      // tcp, dccp, sctp, udp
        41 => Fixed(16),                                     // ip6
        43 => Fixed(1),                                      // ipcidr
        444 => Fixed(12),                                    // onion
        445 => Fixed(37),                                    // onion3
        777 => Fixed(8),                                     // memory
        42 | 53 | 54 | 55 | 56 | 400 | 406 | 421 | 446 | 447 | 449 | 466 => LengthPrefixed,
        275 | 276 | 280 | 281 | 290 | 301 | 302 | 443 | 448 | 454 | 460 | 461 | 465 | 477
        | 478 | 479 | 480 => Fixed(0),
        _ => return None,
    };
    Some(size)
}

pub fn read_uvarint(field: &'static str, bytes: &[u8]) -> Result<(u64, usize), ContractViolation> {
    let mut value: u64 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if i >= MAX_UVARINT_LEN {
            break;
        }
        value |= u64::from(b & 0x7f) << (7 * i);
        if b & 0x80 == 0 {
            if b == 0 && i > 0 {
                return Err(ContractViolation::InvalidValue {
                    field,
                    reason: "varint is not minimally encoded",
                });
            }
            return Ok((value, i + 1));
        }
    }
    Err(ContractViolation::InvalidValue {
        field,
        reason: "varint is truncated or too long",
    })
}

pub fn write_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrComponent {
    pub code: u64,
    pub value: Vec<u8>,
}

impl AddrComponent {
    pub fn ip4(octets: [u8; 4]) -> Self {
        Self {
            code: PROTOCOL_IP4,
            value: octets.to_vec(),
        }
    }

    pub fn tcp(port: u16) -> Self {
        Self {
            code: PROTOCOL_TCP,
            value: port.to_be_bytes().to_vec(),
        }
    }

    pub fn p2p(peer_id: &[u8]) -> Self {
        Self {
            code: PROTOCOL_P2P,
            value: peer_id.to_vec(),
        }
    }

    pub fn thread(id: &ThreadId) -> Self {
        Self {
            code: PROTOCOL_THREAD,
            value: id.as_bytes().to_vec(),
        }
    }
}

pub fn parse_components(bytes: &[u8]) -> Result<Vec<AddrComponent>, ContractViolation> {
    if bytes.is_empty() {
        return Err(ContractViolation::InvalidValue {
            field: "thread_addr",
            reason: "must be non-empty",
        });
    }
    let mut components = Vec::new();
    let mut rest = bytes;
    while !rest.is_empty() {
        let (code, n) = read_uvarint("thread_addr.protocol", rest)?;
        rest = &rest[n..];
        let Some(size) = value_size(code) else {
            return Err(ContractViolation::InvalidValue {
                field: "thread_addr.protocol",
                reason: "unknown multiaddr protocol code",
            });
        };
        let len = match size {
            ValueSize::Fixed(len) => len,
            ValueSize::LengthPrefixed => {
                let (len, n) = read_uvarint("thread_addr.length", rest)?;
                rest = &rest[n..];
                usize::try_from(len).map_err(|_| ContractViolation::InvalidValue {
                    field: "thread_addr.length",
                    reason: "component length overflows",
                })?
            }
        };
        if rest.len() < len {
            return Err(ContractViolation::InvalidValue {
                field: "thread_addr.value",
                reason: "component value is truncated",
            });
        }
        components.push(AddrComponent {
            code,
            value: rest[..len].to_vec(),
        });
        rest = &rest[len..];
    }
    Ok(components)
}

pub fn encode_components(components: &[AddrComponent]) -> Vec<u8> {
    let mut out = Vec::new();
    for component in components {
        write_uvarint(&mut out, component.code);
        if value_size(component.code) == Some(ValueSize::LengthPrefixed) {
            write_uvarint(&mut out, component.value.len() as u64);
        }
        out.extend_from_slice(&component.value);
    }
    out
}

/// Recovers the thread id from the first `/thread` component of a binary multiaddr.
pub fn thread_id_from_addr(bytes: &[u8]) -> Result<ThreadId, ContractViolation> {
    let components = parse_components(bytes)?;
    let Some(thread) = components.iter().find(|c| c.code == PROTOCOL_THREAD) else {
        return Err(ContractViolation::InvalidValue {
            field: "thread_addr",
            reason: "must contain a /thread component",
        });
    };
    ThreadId::cast(&thread.value)
}
