use std::hash::{BuildHasher, Hash, Hasher};

use ahash::RandomState;

/// Seeds shared by every stable hash, so hashes agree between processes.
const SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

pub fn stable_hasher() -> RandomState {
    RandomState::with_seeds(SEEDS[0], SEEDS[1], SEEDS[2], SEEDS[3])
}

/// A 64-bit hash with fixed seeds.
pub fn stable_hash<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = stable_hasher().build_hasher();
    value.hash(&mut hasher);
    hasher.finish()
}
