//! Canonical byte strings that znode keys sign, and the ids gossip uses
//! to recognize messages it has already seen.
//!
//! ```text
//! ping:      txid(32) || index(u32 LE) || anchor(32) || sig_time(i64 LE)
//! broadcast: len(u8) || addr utf-8 || sig_time(i64 LE)
//!            || collateral key id(20) || znode key id(20) || version(u32 LE)
//! ```
//!
//! Signing these instead of a serde encoding keeps signatures stable when
//! the in-memory structs gain fields.
//!
//! A gossip id covers every field a peer can send, signatures included. A
//! copy that differs anywhere gets its own id and cannot shadow the
//! original in the seen caches.

use std::net::SocketAddr;

use crate::chain::{BlockHash, OutPoint};
use crate::crypto::{double_sha256, KeyId};

pub fn ping_message(outpoint: &OutPoint, anchor: &BlockHash, sig_time: i64) -> Vec<u8> {
    let mut msg = Vec::with_capacity(32 + 4 + 32 + 8);
    msg.extend_from_slice(&outpoint.txid);
    msg.extend_from_slice(&outpoint.index.to_le_bytes());
    msg.extend_from_slice(&anchor.0);
    msg.extend_from_slice(&sig_time.to_le_bytes());
    msg
}

pub fn broadcast_message(
    addr: &SocketAddr,
    sig_time: i64,
    collateral_key: &KeyId,
    znode_key: &KeyId,
    protocol_version: u32,
) -> Vec<u8> {
    let addr = addr.to_string();
    let mut msg = Vec::with_capacity(1 + addr.len() + 8 + 20 + 20 + 4);
    // Socket address strings are at most 47 bytes.
    msg.push(addr.len() as u8);
    msg.extend_from_slice(addr.as_bytes());
    msg.extend_from_slice(&sig_time.to_le_bytes());
    msg.extend_from_slice(collateral_key.as_bytes());
    msg.extend_from_slice(znode_key.as_bytes());
    msg.extend_from_slice(&protocol_version.to_le_bytes());
    msg
}

/// Double SHA-256 over `parts`, each prefixed with its length so that
/// bytes cannot shift from one part into the next.
pub fn message_hash(parts: &[&[u8]]) -> [u8; 32] {
    let len = parts.iter().map(|p| 4 + p.len()).sum();
    let mut buf = Vec::with_capacity(len);
    for part in parts {
        buf.extend_from_slice(&(part.len() as u32).to_le_bytes());
        buf.extend_from_slice(part);
    }
    double_sha256(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ZnodeKeypair;

    #[test]
    fn ping_message_layout() {
        let op = OutPoint::new([7; 32], 3);
        let msg = ping_message(&op, &BlockHash([9; 32]), 0x0102);
        assert_eq!(msg.len(), 76);
        assert_eq!(&msg[32..36], &3u32.to_le_bytes());
        assert_eq!(&msg[36..68], &[9u8; 32]);
        assert_eq!(&msg[68..], &0x0102i64.to_le_bytes());
    }

    #[test]
    fn broadcast_message_covers_every_field() {
        let addr: SocketAddr = "1.2.3.4:8168".parse().unwrap();
        let c = ZnodeKeypair::generate().public_key().key_id();
        let z = ZnodeKeypair::generate().public_key().key_id();
        let base = broadcast_message(&addr, 100, &c, &z, 90_026);

        assert_ne!(base, broadcast_message(&addr, 101, &c, &z, 90_026));
        assert_ne!(base, broadcast_message(&addr, 100, &z, &c, 90_026));
        assert_ne!(base, broadcast_message(&addr, 100, &c, &z, 90_025));
        let other: SocketAddr = "1.2.3.5:8168".parse().unwrap();
        assert_ne!(base, broadcast_message(&other, 100, &c, &z, 90_026));
    }

    #[test]
    fn message_hash_separates_parts() {
        let part = |b: &'static [u8]| b;
        let a = message_hash(&[part(b"ab"), part(b"c")]);
        assert_eq!(a, message_hash(&[part(b"ab"), part(b"c")]));
        assert_ne!(a, message_hash(&[part(b"a"), part(b"bc")]));
        assert_ne!(a, message_hash(&[part(b"abc")]));
        assert_ne!(message_hash(&[part(b""), part(b"x")]), message_hash(&[part(b"x")]));
    }
}
