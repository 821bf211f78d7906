//! Encrypted field handling
//!
//! The actual homomorphic encryption lives outside this crate behind
//! [`FheBackend`]. This module owns the handle callers initialize and reset
//! explicitly, and the opaque ciphertext type that flows into contract calls.

use ethers::types::Bytes;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Bit width of an encrypted integer field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldWidth {
    W8,
    W32,
}

impl FieldWidth {
    pub fn bits(&self) -> u32 {
        match self {
            FieldWidth::W8 => 8,
            FieldWidth::W32 => 32,
        }
    }

    /// Largest plaintext representable at this width
    pub fn max_value(&self) -> u64 {
        (1u64 << self.bits()) - 1
    }
}

/// Opaque encrypted value, never interpreted by this crate
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Ciphertext(Bytes);

impl Ciphertext {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_ref()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a `0x`-prefixed or bare hex blob
    pub fn from_hex(input: &str) -> Result<Self, EncryptionError> {
        let trimmed = input
            .strip_prefix("0x")
            .or_else(|| input.strip_prefix("0X"))
            .unwrap_or(input);
        let bytes = hex::decode(trimmed)
            .map_err(|e| EncryptionError::MalformedCiphertext(e.to_string()))?;
        if bytes.is_empty() {
            return Err(EncryptionError::MalformedCiphertext(
                "empty ciphertext".to_string(),
            ));
        }
        Ok(Self(Bytes::from(bytes)))
    }
}

impl From<Vec<u8>> for Ciphertext {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<Bytes> for Ciphertext {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

// Ciphertexts can be large; keep logs readable
impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = hex::encode(self.as_bytes());
        if encoded.len() <= 16 {
            write!(f, "Ciphertext(0x{})", encoded)
        } else {
            write!(f, "Ciphertext(0x{}.., {} bytes)", &encoded[..16], self.len())
        }
    }
}

/// Result of asking for a plaintext
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decryption {
    Value(u64),
    /// No private key is available to this process; distinct from a real zero
    Unavailable,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("encryption handle is not initialized")]
    NotInitialized,

    #[error("value {value} does not fit in {bits} bits")]
    ValueOutOfRange { value: u64, bits: u32 },

    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("decryption key unavailable")]
    KeyUnavailable,

    #[error("encryption backend error: {0}")]
    Backend(String),
}

/// External encryption collaborator
pub trait FheBackend: Send + Sync {
    fn encrypt(&self, value: u64, width: FieldWidth) -> Result<Ciphertext, EncryptionError>;

    /// Returns `KeyUnavailable` when this process holds no private key
    fn decrypt(&self, ciphertext: &Ciphertext) -> Result<u64, EncryptionError>;
}

/// Caller-owned handle to the encryption backend
///
/// Starts uninitialized. Pass it by reference to whatever needs to encrypt or
/// decrypt; there is no process-wide instance.
#[derive(Default)]
pub struct EncryptionHandle {
    backend: Option<Arc<dyn FheBackend>>,
}

impl EncryptionHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a backend, replacing any previous one
    pub fn initialize(&mut self, backend: Arc<dyn FheBackend>) {
        if self.backend.replace(backend).is_some() {
            info!("Encryption handle re-initialized");
        } else {
            info!("Encryption handle initialized");
        }
    }

    /// Drop the backend; subsequent encryption fails until re-initialized
    pub fn reset(&mut self) {
        if self.backend.take().is_some() {
            info!("Encryption handle reset");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.is_some()
    }

    /// Encrypt a plaintext field at the given width
    pub fn encrypt_field(&self, value: u64, width: FieldWidth) -> Result<Ciphertext, EncryptionError> {
        let backend = self.backend.as_ref().ok_or(EncryptionError::NotInitialized)?;
        if value > width.max_value() {
            return Err(EncryptionError::ValueOutOfRange {
                value,
                bits: width.bits(),
            });
        }
        let ciphertext = backend.encrypt(value, width)?;
        debug!(bits = width.bits(), size = ciphertext.len(), "Encrypted field");
        Ok(ciphertext)
    }

    /// Decrypt a ciphertext, reporting a missing key as `Unavailable`
    pub fn decrypt(&self, ciphertext: &Ciphertext) -> Result<Decryption, EncryptionError> {
        let Some(backend) = self.backend.as_ref() else {
            return Ok(Decryption::Unavailable);
        };
        match backend.decrypt(ciphertext) {
            Ok(value) => Ok(Decryption::Value(value)),
            Err(EncryptionError::KeyUnavailable) => {
                debug!("Decryption key unavailable");
                Ok(Decryption::Unavailable)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Reversible stand-in backend: a width tag byte followed by the value bytes xor'd
    pub struct XorBackend {
        pub key: u8,
        pub has_private_key: bool,
    }

    impl FheBackend for XorBackend {
        fn encrypt(&self, value: u64, width: FieldWidth) -> Result<Ciphertext, EncryptionError> {
            let mut bytes = vec![width.bits() as u8];
            bytes.extend(value.to_be_bytes().iter().map(|b| b ^ self.key));
            Ok(Ciphertext::from(bytes))
        }

        fn decrypt(&self, ciphertext: &Ciphertext) -> Result<u64, EncryptionError> {
            if !self.has_private_key {
                return Err(EncryptionError::KeyUnavailable);
            }
            let raw = ciphertext.as_bytes();
            if raw.len() != 9 {
                return Err(EncryptionError::MalformedCiphertext(format!(
                    "expected 9 bytes, got {}",
                    raw.len()
                )));
            }
            let mut value = [0u8; 8];
            for (out, b) in value.iter_mut().zip(&raw[1..]) {
                *out = b ^ self.key;
            }
            Ok(u64::from_be_bytes(value))
        }
    }

    pub fn initialized_handle(has_private_key: bool) -> EncryptionHandle {
        let mut handle = EncryptionHandle::new();
        handle.initialize(Arc::new(XorBackend {
            key: 0x5a,
            has_private_key,
        }));
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_uninitialized_handle_refuses_to_encrypt() {
        let handle = EncryptionHandle::new();
        assert_eq!(
            handle.encrypt_field(7, FieldWidth::W8),
            Err(EncryptionError::NotInitialized)
        );
    }

    #[test]
    fn test_reset_returns_to_uninitialized() {
        let mut handle = initialized_handle(true);
        assert!(handle.encrypt_field(7, FieldWidth::W8).is_ok());

        handle.reset();
        assert!(!handle.is_initialized());
        assert_eq!(
            handle.encrypt_field(7, FieldWidth::W8),
            Err(EncryptionError::NotInitialized)
        );
    }

    #[test]
    fn test_width_bounds() {
        let handle = initialized_handle(true);
        assert!(handle.encrypt_field(255, FieldWidth::W8).is_ok());
        assert_eq!(
            handle.encrypt_field(256, FieldWidth::W8),
            Err(EncryptionError::ValueOutOfRange { value: 256, bits: 8 })
        );
        assert!(handle.encrypt_field(u32::MAX as u64, FieldWidth::W32).is_ok());
        assert!(handle
            .encrypt_field(u32::MAX as u64 + 1, FieldWidth::W32)
            .is_err());
    }

    #[test]
    fn test_decrypt_with_key() {
        let handle = initialized_handle(true);
        let ciphertext = handle.encrypt_field(720, FieldWidth::W32).unwrap();
        assert_eq!(handle.decrypt(&ciphertext), Ok(Decryption::Value(720)));
    }

    #[test]
    fn test_missing_key_is_not_zero() {
        let encrypting = initialized_handle(true);
        let ciphertext = encrypting.encrypt_field(0, FieldWidth::W8).unwrap();

        let without_key = initialized_handle(false);
        assert_eq!(without_key.decrypt(&ciphertext), Ok(Decryption::Unavailable));
        assert_eq!(EncryptionHandle::new().decrypt(&ciphertext), Ok(Decryption::Unavailable));
    }

    #[test]
    fn test_ciphertext_from_hex() {
        let c = Ciphertext::from_hex("0xdeadbeef").unwrap();
        assert_eq!(c.as_bytes(), &[0xde, 0xad, 0xbe, 0xef]);
        assert!(Ciphertext::from_hex("0x").is_err());
        assert!(Ciphertext::from_hex("zz").is_err());
    }
}
