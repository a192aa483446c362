//! # Cryptographic Primitives
//!
//! Everything the znode core signs or hashes flows through here:
//!
//! - **Ed25519** for collateral and operating keys.
//! - **BLAKE3** for key identifiers.
//! - **Double SHA-256** for message hashes.
//!
//! These are thin, typed wrappers around audited crates. Nothing in here
//! implements a primitive by hand.

pub mod hash;
pub mod keys;

pub use hash::{blake3_hash, double_sha256, sha256};
pub use keys::{
    KeyError, KeyId, ZnodeKeypair, ZnodePublicKey, ZnodeSignature, KEY_ID_LENGTH,
    STANDARD_SCRIPT_LENGTH,
};
