#![forbid(unsafe_code)]

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::thread_addr::{read_uvarint, write_uvarint};
use crate::ContractViolation;

pub const THREAD_ID_VERSION_V1: u64 = 0x01;
pub const THREAD_ID_MIN_RANDOM_LEN: usize = 16;
pub const THREAD_ID_DEFAULT_RANDOM_LEN: usize = 32;

/// Multibase prefix for lowercase base16.
const MULTIBASE_BASE16_LOWER: char = 'f';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThreadVariant {
    Raw,
    AccessControlled,
}

impl ThreadVariant {
    pub fn code(self) -> u64 {
        match self {
            ThreadVariant::Raw => 0x55,
            ThreadVariant::AccessControlled => 0x70,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0x55 => Some(ThreadVariant::Raw),
            0x70 => Some(ThreadVariant::AccessControlled),
            _ => None,
        }
    }
}

/// Binary identifier of a distributed thread.
///
/// Layout: `varint(version) || varint(variant) || random`. A value of this type
/// is always well formed; "no id" is expressed as `Option<ThreadId>`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ThreadId(Vec<u8>);

impl ThreadId {
    /// Validates raw bytes taken off the wire.
    pub fn cast(bytes: &[u8]) -> Result<Self, ContractViolation> {
        if bytes.is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "thread_id",
                reason: "must be non-empty",
            });
        }
        let (version, n) = read_uvarint("thread_id.version", bytes)?;
        if version != THREAD_ID_VERSION_V1 {
            return Err(ContractViolation::InvalidValue {
                field: "thread_id.version",
                reason: "must be 1",
            });
        }
        let (variant, m) = read_uvarint("thread_id.variant", &bytes[n..])?;
        if ThreadVariant::from_code(variant).is_none() {
            return Err(ContractViolation::InvalidValue {
                field: "thread_id.variant",
                reason: "must be raw (0x55) or access-controlled (0x70)",
            });
        }
        if bytes.len() - n - m < THREAD_ID_MIN_RANDOM_LEN {
            return Err(ContractViolation::InvalidValue {
                field: "thread_id.random",
                reason: "must be at least 16 bytes",
            });
        }
        Ok(Self(bytes.to_vec()))
    }

    pub fn v1(variant: ThreadVariant, random: &[u8]) -> Result<Self, ContractViolation> {
        let mut bytes = Vec::with_capacity(2 + random.len());
        write_uvarint(&mut bytes, THREAD_ID_VERSION_V1);
        write_uvarint(&mut bytes, variant.code());
        bytes.extend_from_slice(random);
        Self::cast(&bytes)
    }

    pub fn random_v1(variant: ThreadVariant) -> Self {
        let mut random = [0_u8; THREAD_ID_DEFAULT_RANDOM_LEN];
        rand::thread_rng().fill_bytes(&mut random);
        let mut bytes = Vec::with_capacity(2 + random.len());
        write_uvarint(&mut bytes, THREAD_ID_VERSION_V1);
        write_uvarint(&mut bytes, variant.code());
        bytes.extend_from_slice(&random);
        Self(bytes)
    }

    /// Parses the multibase text form produced by [`ThreadId::encode`].
    pub fn decode(text: &str) -> Result<Self, ContractViolation> {
        let Some(hex_part) = text.strip_prefix(MULTIBASE_BASE16_LOWER) else {
            return Err(ContractViolation::InvalidValue {
                field: "thread_id",
                reason: "must use multibase base16 ('f') encoding",
            });
        };
        let bytes = hex::decode(hex_part).map_err(|_| ContractViolation::InvalidValue {
            field: "thread_id",
            reason: "must be lowercase hex after the multibase prefix",
        })?;
        Self::cast(&bytes)
    }

    pub fn encode(&self) -> String {
        format!("{MULTIBASE_BASE16_LOWER}{}", hex::encode(&self.0))
    }

    pub fn variant(&self) -> ThreadVariant {
        // Both varints were checked in `cast`; a version of 1 is a single byte.
        let variant = read_uvarint("thread_id.variant", &self.0[1..])
            .ok()
            .and_then(|(code, _)| ThreadVariant::from_code(code));
        variant.unwrap_or(ThreadVariant::Raw)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({})", self.encode())
    }
}

impl TryFrom<String> for ThreadId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::decode(&value)
    }
}

impl From<ThreadId> for String {
    fn from(value: ThreadId) -> Self {
        value.encode()
    }
}
