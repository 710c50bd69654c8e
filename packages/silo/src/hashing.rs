//! Rendezvous (highest random weight) hashing over silos.
//!
//! Scores come from SHA-256 so every silo in the cluster computes the same
//! owner for a key, independent of process or platform.

use sha2::{Digest, Sha256};
use silo_core::SiloAddress;

/// Score of `silo` for `key`; the highest score owns the key.
pub fn rendezvous_score(key: &str, silo: &SiloAddress) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update([0u8]);
    hasher.update(silo.to_string().as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}

/// The silo that owns `key` among `silos`.
///
/// Ties fall to the smaller address so the choice does not depend on input order.
pub fn rendezvous_owner<'a>(key: &str, silos: &'a [SiloAddress]) -> Option<&'a SiloAddress> {
    silos
        .iter()
        .map(|silo| (rendezvous_score(key, silo), silo))
        .max_by(|(score_a, silo_a), (score_b, silo_b)| {
            score_a.cmp(score_b).then_with(|| silo_b.cmp(silo_a))
        })
        .map(|(_, silo)| silo)
}
