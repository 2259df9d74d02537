//! Content digests, used to identify client requests and consensus
//! payloads without carrying the full payload around.
//!
//! This crate does not sign or MAC messages: authentication of the
//! replica set is assumed to be handled by the surrounding deployment
//! (e.g. a private network or a transport-level secret), consistent
//! with the protocol core this crate implements not specifying a
//! signature scheme. Two interchangeable backends are available,
//! selected at compile time by feature flag: `blake3` (default) and
//! SHA-256 via `ring`.

#[cfg(feature = "crypto_hash_blake3_blake3")]
mod blake3;
#[cfg(feature = "crypto_hash_ring_sha2")]
mod ring_sha2;

#[cfg(feature = "crypto_hash_blake3_blake3")]
pub use self::blake3::{Context, Digest};
#[cfg(all(feature = "crypto_hash_ring_sha2", not(feature = "crypto_hash_blake3_blake3")))]
pub use self::ring_sha2::{Context, Digest};

/// Hashes a single byte slice in one shot.
pub fn digest_bytes(data: &[u8]) -> Digest {
    let mut ctx = Context::new();
    ctx.update(data);
    ctx.finish()
}
