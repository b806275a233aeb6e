//! ECHConfig / ECHConfigList binary codec per draft-ietf-tls-esni-18.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! ECHConfig := version(u16 = 0xfe0d)
//!            ‖ length(u16 of remaining content)
//!            ‖ config_id(u8)
//!            ‖ kem_id(u16 = 0x0020)
//!            ‖ public_key_len(u16) ‖ public_key
//!            ‖ cipher_suites_len(u16) ‖ (kdf_id:u16, aead_id:u16)*
//!            ‖ maximum_name_length(u8 = 255)
//!            ‖ public_name_len(u8) ‖ public_name
//!            ‖ extensions_len(u16 = 0)
//! ECHConfigList := total_len(u16) ‖ ECHConfig*
//! ```
//!
//! The emitted suite list is fixed: (HKDF-SHA256, AES-128-GCM) then
//! (HKDF-SHA256, ChaCha20-Poly1305), in that order.

use thiserror::Error;

/// ECH version for draft-ietf-tls-esni-18.
pub const ECH_VERSION: u16 = 0xfe0d;

/// DHKEM(X25519, HKDF-SHA256).
pub const KEM_X25519_HKDF_SHA256: u16 = 0x0020;

/// HPKE KDF identifiers.
pub const KDF_HKDF_SHA256: u16 = 0x0001;

/// HPKE AEAD identifiers.
pub const AEAD_AES_128_GCM: u16 = 0x0001;
pub const AEAD_CHACHA20_POLY1305: u16 = 0x0003;

/// Camouflage host published as the public_name.
pub const PUBLIC_NAME: &str = "cloudflare-ech.com";

/// maximum_name_length emitted in every config.
pub const MAX_NAME_LENGTH: u8 = 255;

/// The two suites every config advertises, in wire order.
pub const CIPHER_SUITES: [(u16, u16); 2] = [
    (KDF_HKDF_SHA256, AEAD_AES_128_GCM),
    (KDF_HKDF_SHA256, AEAD_CHACHA20_POLY1305),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("truncated input while reading {0}")]
    Truncated(&'static str),

    #[error("unsupported ECH version {0:#06x}")]
    UnsupportedVersion(u16),

    #[error("invalid cipher_suites length {0}")]
    BadSuitesLength(usize),

    #[error("public_name is not valid UTF-8")]
    BadPublicName,

    #[error("trailing bytes after ECHConfigList")]
    TrailingBytes,
}

/// A parsed (or to-be-encoded) ECHConfig.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchConfig {
    pub config_id: u8,
    pub kem_id: u16,
    pub public_key: Vec<u8>,
    pub cipher_suites: Vec<(u16, u16)>,
    pub maximum_name_length: u8,
    pub public_name: String,
}

impl EchConfig {
    /// Build the standard config for an X25519 public key.
    pub fn for_public_key(config_id: u8, public_key: [u8; 32]) -> Self {
        Self {
            config_id,
            kem_id: KEM_X25519_HKDF_SHA256,
            public_key: public_key.to_vec(),
            cipher_suites: CIPHER_SUITES.to_vec(),
            maximum_name_length: MAX_NAME_LENGTH,
            public_name: PUBLIC_NAME.to_string(),
        }
    }

    /// Encode to wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(80);
        buf.extend_from_slice(&ECH_VERSION.to_be_bytes());

        // Reserve the content length slot.
        let length_offset = buf.len();
        buf.extend_from_slice(&[0u8; 2]);
        let contents_start = buf.len();

        buf.push(self.config_id);
        buf.extend_from_slice(&self.kem_id.to_be_bytes());

        buf.extend_from_slice(&(self.public_key.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.public_key);

        let suites_len = self.cipher_suites.len() * 4;
        buf.extend_from_slice(&(suites_len as u16).to_be_bytes());
        for (kdf_id, aead_id) in &self.cipher_suites {
            buf.extend_from_slice(&kdf_id.to_be_bytes());
            buf.extend_from_slice(&aead_id.to_be_bytes());
        }

        buf.push(self.maximum_name_length);

        let name = self.public_name.as_bytes();
        buf.push(name.len() as u8);
        buf.extend_from_slice(name);

        // extensions: empty
        buf.extend_from_slice(&0u16.to_be_bytes());

        let contents_len = (buf.len() - contents_start) as u16;
        buf[length_offset..length_offset + 2].copy_from_slice(&contents_len.to_be_bytes());
        buf
    }

    /// Decode a single ECHConfig, returning it and the bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), WireError> {
        let mut r = Reader::new(data);
        let version = r.u16("version")?;
        if version != ECH_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        let length = r.u16("length")? as usize;
        let body_end = r.pos + length;
        if data.len() < body_end {
            return Err(WireError::Truncated("contents"));
        }

        let config_id = r.u8("config_id")?;
        let kem_id = r.u16("kem_id")?;

        let pk_len = r.u16("public_key length")? as usize;
        let public_key = r.bytes(pk_len, "public_key")?.to_vec();

        let suites_len = r.u16("cipher_suites length")? as usize;
        if suites_len < 4 || suites_len % 4 != 0 {
            return Err(WireError::BadSuitesLength(suites_len));
        }
        let suites_raw = r.bytes(suites_len, "cipher_suites")?;
        let cipher_suites = suites_raw
            .chunks_exact(4)
            .map(|c| {
                (
                    u16::from_be_bytes([c[0], c[1]]),
                    u16::from_be_bytes([c[2], c[3]]),
                )
            })
            .collect();

        let maximum_name_length = r.u8("maximum_name_length")?;

        let name_len = r.u8("public_name length")? as usize;
        let public_name = String::from_utf8(r.bytes(name_len, "public_name")?.to_vec())
            .map_err(|_| WireError::BadPublicName)?;

        let ext_len = r.u16("extensions length")? as usize;
        r.bytes(ext_len, "extensions")?;

        if r.pos != body_end {
            return Err(WireError::Truncated("contents"));
        }

        Ok((
            Self {
                config_id,
                kem_id,
                public_key,
                cipher_suites,
                maximum_name_length,
                public_name,
            },
            r.pos,
        ))
    }
}

/// Encode an ECHConfigList: `total_len(u16) ‖ concat(configs)`.
///
/// Accepts pre-encoded config blobs so stored configs are passed through
/// bit-exact.
pub fn encode_config_list(configs: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = configs.iter().map(Vec::len).sum();
    let mut buf = Vec::with_capacity(2 + total);
    buf.extend_from_slice(&(total as u16).to_be_bytes());
    for config in configs {
        buf.extend_from_slice(config);
    }
    buf
}

/// Decode an ECHConfigList into its configs.
pub fn decode_config_list(data: &[u8]) -> Result<Vec<EchConfig>, WireError> {
    if data.len() < 2 {
        return Err(WireError::Truncated("list length"));
    }
    let total = u16::from_be_bytes([data[0], data[1]]) as usize;
    if data.len() != 2 + total {
        return Err(WireError::TrailingBytes);
    }

    let mut configs = Vec::new();
    let mut rest = &data[2..];
    while !rest.is_empty() {
        let (config, consumed) = EchConfig::decode(rest)?;
        configs.push(config);
        rest = &rest[consumed..];
    }
    Ok(configs)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, WireError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(WireError::Truncated(what))?;
        self.pos += 1;
        Ok(b)
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, WireError> {
        if self.data.len() < self.pos + 2 {
            return Err(WireError::Truncated(what));
        }
        let v = u16::from_be_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    fn bytes(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], WireError> {
        if self.data.len() < self.pos + len {
            return Err(WireError::Truncated(what));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }
}
