//! Ring arithmetic over the DHT address space.
//!
//! A hash maps to a position in `[0, MODULUS)` by reading its first ten
//! characters as a 60-bit number and shifting it into the top of a 63-bit
//! space. The projection preserves order and can be inverted, which is what
//! lets a new peer turn a point inside an empty arc back into an identifier.

use rand::Rng;

use crate::hash::{decode_char, encode_char, Hash, HASH_LEN};

/// Size of the ring.
pub const MODULUS: u64 = 1 << 63;

/// Characters that contribute to a position.
const POSITION_CHARS: usize = 10;

/// Upper bound for the vertical partition exponent.
pub const MAX_PARTITION_EXPONENT: u32 = 8;

/// Ring position of a hash.
pub fn position(hash: &Hash) -> u64 {
    let mut c = 0u64;
    for &b in &hash.as_bytes()[..POSITION_CHARS] {
        c = (c << 6) | decode_char(b).unwrap_or(0) as u64;
    }
    c << 3
}

/// The smallest hash at `pos`. Characters beyond the positional prefix are `A`.
pub fn hash_at(pos: u64) -> Hash {
    let mut c = (pos % MODULUS) >> 3;
    let mut raw = [b'A'; HASH_LEN];
    for i in (0..POSITION_CHARS).rev() {
        raw[i] = encode_char((c & 0x3f) as u8);
        c >>= 6;
    }
    Hash::from_raw(raw)
}

/// Clockwise distance from `from` to `to`.
pub fn forward_distance(from: u64, to: u64) -> u64 {
    let (from, to) = (from % MODULUS, to % MODULUS);
    if to >= from {
        to - from
    } else {
        MODULUS - from + to
    }
}

/// Shortest way around the ring between two positions.
pub fn distance(a: u64, b: u64) -> u64 {
    let fwd = forward_distance(a, b);
    fwd.min(MODULUS - fwd)
}

/// Circular distance between two hashes.
pub fn hash_distance(a: &Hash, b: &Hash) -> u64 {
    distance(position(a), position(b))
}

/// `a + b` on the ring.
pub fn add(a: u64, b: u64) -> u64 {
    ((a % MODULUS) + (b % MODULUS)) % MODULUS
}

/// Number of vertical partitions for an exponent.
pub fn partitions(exponent: u32) -> u32 {
    1 << exponent.min(MAX_PARTITION_EXPONENT)
}

/// Position of `key` inside vertical partition `partition`.
///
/// The partition number occupies the top `exponent` bits; the key keeps its
/// low bits, so one word is spread over `2^exponent` evenly spaced targets.
pub fn vertical_position(key: &Hash, partition: u32, exponent: u32) -> u64 {
    let exponent = exponent.min(MAX_PARTITION_EXPONENT);
    let shift = 63 - exponent;
    let mask = (1u64 << shift) - 1;
    let partition = (partition as u64) & ((1u64 << exponent) - 1);
    (position(key) & mask) | (partition << shift)
}

// ── Gaps ──────────────────────────────────────────────────────────────────────

/// An unoccupied arc between two neighbouring positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub left: u64,
    pub right: u64,
    pub size: u64,
}

/// All gaps between the given positions, largest first.
///
/// Duplicate positions collapse. A single position leaves one gap spanning
/// the whole ring.
pub fn gaps(positions: &[u64]) -> Vec<Gap> {
    let mut sorted: Vec<u64> = positions.iter().map(|p| p % MODULUS).collect();
    sorted.sort_unstable();
    sorted.dedup();
    match sorted.len() {
        0 => Vec::new(),
        1 => vec![Gap {
            left: sorted[0],
            right: sorted[0],
            size: MODULUS,
        }],
        n => {
            let mut out: Vec<Gap> = (0..n)
                .map(|i| {
                    let left = sorted[i];
                    let right = sorted[(i + 1) % n];
                    Gap {
                        left,
                        right,
                        size: forward_distance(left, right),
                    }
                })
                .collect();
            out.sort_by(|a, b| b.size.cmp(&a.size).then(a.left.cmp(&b.left)));
            out
        }
    }
}

/// The largest gap, if there are any positions.
pub fn largest_gap(positions: &[u64]) -> Option<Gap> {
    gaps(positions).into_iter().next()
}

/// Pick a point inside an under-populated arc.
///
/// Gaps are visited from the largest down; at each one the walk stops with
/// probability one half, so the largest gap is preferred without always being
/// chosen. Inside the gap the point lands in the middle three quarters.
pub fn pick_gap_position<R: Rng + ?Sized>(positions: &[u64], rng: &mut R) -> Option<u64> {
    let all = gaps(positions);
    let last = all.len().checked_sub(1)?;
    let mut chosen = all[last];
    for (i, gap) in all.iter().enumerate() {
        if i == last || rng.gen_bool(0.5) {
            chosen = *gap;
            break;
        }
    }
    Some(jitter(&chosen, rng))
}

fn jitter<R: Rng + ?Sized>(gap: &Gap, rng: &mut R) -> u64 {
    let eighth = gap.size / 8;
    let span = eighth.saturating_mul(6);
    let offset = if span == 0 { 0 } else { rng.gen_range(0..span) };
    add(gap.left, eighth + offset)
}
