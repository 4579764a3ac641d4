//! Encrypted envelope wire format
//!
//! ```text
//! offset  size  field
//! 0       2     magic "AE"
//! 2       1     format version (1)
//! 3       1     algorithm id (1 = AES-256-GCM)
//! 4       2     context length, big endian
//! 6       n     context name, UTF-8
//! 6+n     16    key id (UUID bytes)
//! 22+n    8     created-at, milliseconds since epoch, big endian
//! 30+n    12    nonce
//! 42+n    16    authentication tag
//! 58+n    ..    ciphertext
//! ```
//!
//! Everything before the nonce is bound into the tag as associated data.

use aegis_common::crypto::aead::{NONCE_LEN, TAG_LEN};
use aegis_common::{impl_status_conversions, SealedPayload};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{IntegrityFailure, PrivacyError, PrivacyResult};
use crate::keys::EncryptionContext;

const MAGIC: &[u8; 2] = b"AE";
/// Current wire format version
pub const ENVELOPE_VERSION: u8 = 1;
const FIXED_HEADER_LEN: usize = 2 + 1 + 1 + 2;

/// Authenticated cipher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionAlgorithm {
    /// AES-256 in Galois/Counter mode
    #[default]
    Aes256Gcm,
}

impl_status_conversions!(EncryptionAlgorithm {
    Aes256Gcm => "aes256gcm",
});

impl EncryptionAlgorithm {
    fn id(self) -> u8 {
        match self {
            Self::Aes256Gcm => 1,
        }
    }

    fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Self::Aes256Gcm),
            _ => None,
        }
    }
}

/// Ciphertext plus everything needed to find its key and verify it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    /// Wire format version
    pub version: u8,
    /// Cipher that sealed the payload
    pub algorithm: EncryptionAlgorithm,
    /// Key scope; part of the associated data
    pub context: EncryptionContext,
    /// Key that sealed the payload
    pub key_id: Uuid,
    /// Seal time, millisecond precision
    pub created_at: DateTime<Utc>,
    /// Unique per envelope
    pub nonce: [u8; NONCE_LEN],
    /// AEAD authentication tag
    pub tag: [u8; TAG_LEN],
    /// Encrypted payload
    pub ciphertext: Vec<u8>,
}

fn malformed(reason: impl Into<String>) -> PrivacyError {
    PrivacyError::Integrity(IntegrityFailure::MalformedEnvelope(reason.into()))
}

/// Cursor over envelope bytes that fails with `MalformedEnvelope`
struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize, field: &str) -> PrivacyResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| malformed(format!("truncated at {field}")))?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, field: &str) -> PrivacyResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.bytes[self.offset..];
        self.offset = self.bytes.len();
        rest
    }
}

impl EncryptedEnvelope {
    pub(crate) fn new(
        context: EncryptionContext,
        key_id: Uuid,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            algorithm: EncryptionAlgorithm::Aes256Gcm,
            context,
            key_id,
            // Millisecond precision survives the round trip
            created_at: Utc
                .timestamp_millis_opt(created_at.timestamp_millis())
                .single()
                .unwrap_or(created_at),
            nonce: [0u8; NONCE_LEN],
            tag: [0u8; TAG_LEN],
            ciphertext: Vec::new(),
        }
    }

    pub(crate) fn with_sealed(mut self, sealed: SealedPayload) -> Self {
        self.nonce = sealed.nonce;
        self.tag = sealed.tag;
        self.ciphertext = sealed.ciphertext;
        self
    }

    pub(crate) fn sealed(&self) -> SealedPayload {
        SealedPayload { nonce: self.nonce, ciphertext: self.ciphertext.clone(), tag: self.tag }
    }

    /// Header bytes bound into the authentication tag
    pub fn associated_data(&self) -> Vec<u8> {
        let context = self.context.as_str().as_bytes();
        let mut aad = Vec::with_capacity(FIXED_HEADER_LEN + context.len() + 16 + 8);
        aad.extend_from_slice(MAGIC);
        aad.push(self.version);
        aad.push(self.algorithm.id());
        // Context names are at most 64 bytes
        aad.extend_from_slice(&(context.len() as u16).to_be_bytes());
        aad.extend_from_slice(context);
        aad.extend_from_slice(self.key_id.as_bytes());
        aad.extend_from_slice(&self.created_at.timestamp_millis().to_be_bytes());
        aad
    }

    /// Header, nonce, tag and ciphertext
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.associated_data();
        out.reserve(NONCE_LEN + TAG_LEN + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse an envelope; any structural problem is an integrity failure
    pub fn from_bytes(bytes: &[u8]) -> PrivacyResult<Self> {
        let mut reader = Reader { bytes, offset: 0 };

        if reader.take(2, "magic")? != MAGIC {
            return Err(malformed("bad magic"));
        }
        let version = reader.array::<1>("version")?[0];
        if version != ENVELOPE_VERSION {
            return Err(malformed(format!("unsupported version {version}")));
        }
        let algorithm_id = reader.array::<1>("algorithm")?[0];
        let algorithm = EncryptionAlgorithm::from_id(algorithm_id)
            .ok_or_else(|| malformed(format!("unknown algorithm {algorithm_id}")))?;

        let context_len = u16::from_be_bytes(reader.array("context length")?) as usize;
        let context_bytes = reader.take(context_len, "context")?;
        let context_name =
            std::str::from_utf8(context_bytes).map_err(|_| malformed("context is not UTF-8"))?;
        let context =
            EncryptionContext::new(context_name).map_err(|_| malformed("invalid context name"))?;

        let key_id = Uuid::from_bytes(reader.array("key id")?);
        let millis = i64::from_be_bytes(reader.array("timestamp")?);
        let created_at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| malformed("timestamp out of range"))?;

        let nonce = reader.array("nonce")?;
        let tag = reader.array("tag")?;
        let ciphertext = reader.rest().to_vec();

        Ok(Self { version, algorithm, context, key_id, created_at, nonce, tag, ciphertext })
    }

    /// Standard base64 of [`Self::to_bytes`]
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// Parse the output of [`to_base64`](Self::to_base64)
    pub fn from_base64(encoded: &str) -> PrivacyResult<Self> {
        let bytes = BASE64.decode(encoded.trim()).map_err(|e| malformed(format!("base64: {e}")))?;
        Self::from_bytes(&bytes)
    }
}
