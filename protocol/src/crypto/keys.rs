//! # Key Management
//!
//! Ed25519 keys for the two roles a znode operator holds:
//!
//! - the **collateral key**, which owns the collateral output and signs
//!   announcements, and
//! - the **operating key** (the "znode key"), which lives on the service
//!   host and signs liveness pings.
//!
//! Public keys travel over gossip as raw bytes and are *not* validated on
//! deserialization. Whether a key is usable is decided by
//! [`ZnodePublicKey::script_pubkey`], which is exactly the check the
//! announcement validator needs: a key that does not resolve to a standard
//! output script is a structural defect of the message.
//!
//! Key bytes are never logged. Only key IDs are.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::hash::blake3_hash;

/// Length of a [`KeyId`] in bytes.
pub const KEY_ID_LENGTH: usize = 20;

/// Length of a standard pay-to-key-id output script.
pub const STANDARD_SCRIPT_LENGTH: usize = 25;

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;

/// Errors that can occur during key operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid secret key bytes")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a usable Ed25519 point")]
    InvalidPublicKey,

    #[error("signing failed")]
    SigningFailed,
}

/// An Ed25519 keypair.
///
/// Deliberately not `Serialize`. Exporting a secret should be a conscious
/// call to [`secret_key_bytes`](Self::secret_key_bytes), never a side
/// effect of dumping a struct to JSON.
pub struct ZnodeKeypair {
    signing_key: SigningKey,
}

/// The public half of a keypair, as carried inside announcements.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZnodePublicKey {
    bytes: [u8; 32],
}

/// Short identifier of a public key: the first 20 bytes of its BLAKE3 hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyId([u8; KEY_ID_LENGTH]);

/// An Ed25519 signature as received off the wire.
///
/// Stored as `Vec<u8>` because peers may send anything. A signature that is
/// not exactly 64 bytes simply fails verification.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZnodeSignature {
    bytes: Vec<u8>,
}

// ---------------------------------------------------------------------------
// ZnodeKeypair
// ---------------------------------------------------------------------------

impl ZnodeKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed. Test fixtures use this.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Load a keypair from a hex-encoded 32-byte secret.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    /// The public key of this pair.
    pub fn public_key(&self) -> ZnodePublicKey {
        ZnodePublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Result<ZnodeSignature, KeyError> {
        let sig = self
            .signing_key
            .try_sign(message)
            .map_err(|_| KeyError::SigningFailed)?;
        Ok(ZnodeSignature {
            bytes: sig.to_bytes().to_vec(),
        })
    }

    /// Raw secret key material. Handle with care.
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl Clone for ZnodeKeypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes())
    }
}

impl fmt::Debug for ZnodeKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ZnodeKeypair(id={})", self.public_key().key_id())
    }
}

// ---------------------------------------------------------------------------
// ZnodePublicKey
// ---------------------------------------------------------------------------

impl ZnodePublicKey {
    /// Wrap raw bytes without validating them.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// The key's identifier.
    pub fn key_id(&self) -> KeyId {
        let digest = blake3_hash(&self.bytes);
        let mut id = [0u8; KEY_ID_LENGTH];
        id.copy_from_slice(&digest[..KEY_ID_LENGTH]);
        KeyId(id)
    }

    /// Parse the bytes into a usable verifying key.
    ///
    /// Small-order points are rejected along with undecodable ones: a weak
    /// key would let anyone forge "valid" signatures for it.
    pub fn to_verifying_key(&self) -> Result<VerifyingKey, KeyError> {
        let key = VerifyingKey::from_bytes(&self.bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        if key.is_weak() {
            return Err(KeyError::InvalidPublicKey);
        }
        Ok(key)
    }

    /// Resolve the key to its standard pay-to-key-id output script.
    ///
    /// Always [`STANDARD_SCRIPT_LENGTH`] bytes when it succeeds.
    pub fn script_pubkey(&self) -> Result<Vec<u8>, KeyError> {
        self.to_verifying_key()?;
        let mut script = Vec::with_capacity(STANDARD_SCRIPT_LENGTH);
        script.extend_from_slice(&[OP_DUP, OP_HASH160, KEY_ID_LENGTH as u8]);
        script.extend_from_slice(self.key_id().as_bytes());
        script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        Ok(script)
    }

    /// Verify a signature over `message`. Any malformed input is just `false`.
    ///
    /// Strict verification: a message has exactly one valid encoding of
    /// each signature, so signatures can be part of gossip ids.
    pub fn verify(&self, message: &[u8], signature: &ZnodeSignature) -> bool {
        let Ok(verifying_key) = self.to_verifying_key() else {
            return false;
        };
        let Some(sig) = signature.to_dalek_signature() else {
            return false;
        };
        verifying_key.verify_strict(message, &sig).is_ok()
    }

    /// Hex-encoded key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Display for ZnodePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ZnodePublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ZnodePublicKey({})", &self.to_hex()[..16])
    }
}

// ---------------------------------------------------------------------------
// KeyId
// ---------------------------------------------------------------------------

impl KeyId {
    /// Raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_ID_LENGTH] {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({})", self)
    }
}

// ---------------------------------------------------------------------------
// ZnodeSignature
// ---------------------------------------------------------------------------

impl ZnodeSignature {
    /// Wrap arbitrary bytes received from a peer.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw signature bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// `true` when no signature has been attached yet.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn to_dalek_signature(&self) -> Option<DalekSignature> {
        let arr: [u8; 64] = self.bytes.as_slice().try_into().ok()?;
        Some(DalekSignature::from_bytes(&arr))
    }

    /// Hex-encoded signature.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Debug for ZnodeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ZnodeSignature({} bytes)", self.bytes.len())
    }
}
