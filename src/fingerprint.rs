//! 64-bit simhash fingerprints, prefix tiers and near-duplicate grouping.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use sha2::{Digest, Sha256};

/// Number of bits in a fingerprint.
pub const FINGERPRINT_BITS: usize = 64;

/// Hex length of a full fingerprint.
pub const FINGERPRINT_HEX_LEN: usize = FINGERPRINT_BITS / 4;

/// Prefix lengths (hex chars) of the fingerprint index tiers, longest first.
pub const PREFIX_TIERS: [usize; 3] = [16, 12, 8];

/// Default Hamming threshold for near-duplicate reporting.
pub const DEFAULT_NEAR_DUPLICATE_DISTANCE: u32 = 3;

/// A 64-bit simhash. Bit `i` of the value is bit `i` of the rendered integer,
/// so the hex form's leading characters carry the high bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Simhash over a token → weight map.
    ///
    /// Each token's SHA-256 digest decides its vote per bit: bit `i` reads bit
    /// `i % 8` of digest byte `i / 8`. A set bit adds the weight, a clear bit
    /// subtracts it. The output bit is set iff the accumulator ends positive.
    pub fn compute<'a, I>(weights: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, u32)>,
    {
        let mut acc = [0i64; FINGERPRINT_BITS];
        for (token, weight) in weights {
            let digest = Sha256::digest(token.as_bytes());
            let w = i64::from(weight);
            for (i, slot) in acc.iter_mut().enumerate() {
                if (digest[i / 8] >> (i % 8)) & 1 == 1 {
                    *slot += w;
                } else {
                    *slot -= w;
                }
            }
        }
        let mut value = 0u64;
        for (i, &slot) in acc.iter().enumerate() {
            if slot > 0 {
                value |= 1 << i;
            }
        }
        Fingerprint(value)
    }

    pub fn from_frequencies(freq: &BTreeMap<String, u32>) -> Self {
        Self::compute(freq.iter().map(|(t, &w)| (t.as_str(), w)))
    }

    /// Lowercase hex, zero-padded to 16 chars.
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != FINGERPRINT_HEX_LEN {
            return None;
        }
        u64::from_str_radix(s, 16).ok().map(Fingerprint)
    }

    pub fn hamming(&self, other: &Fingerprint) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// One key per tier, in [`PREFIX_TIERS`] order.
    pub fn prefixes(&self) -> Vec<String> {
        let hex = self.to_hex();
        PREFIX_TIERS.iter().map(|&n| hex[..n].to_string()).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Hamming distance between two hex fingerprints; `None` if either is malformed.
pub fn hamming_hex(a: &str, b: &str) -> Option<u32> {
    Some(Fingerprint::from_hex(a)?.hamming(&Fingerprint::from_hex(b)?))
}

/// A pair of files whose fingerprints are within the reporting threshold.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct NearDuplicate {
    pub a: String,
    pub b: String,
    pub distance: u32,
}

/// Group files by the shortest prefix tier and report pairs within each bucket
/// whose distance is at most `max_distance`. Sorted by distance, then paths.
///
/// Pairs that differ inside the shortest prefix are never compared, so this
/// trades recall for avoiding the all-pairs scan.
pub fn near_duplicates<'a, I>(files: I, max_distance: u32) -> Vec<NearDuplicate>
where
    I: IntoIterator<Item = (&'a str, Fingerprint)>,
{
    let shortest = PREFIX_TIERS[PREFIX_TIERS.len() - 1];
    let mut buckets: BTreeMap<String, BTreeSet<(&'a str, Fingerprint)>> = BTreeMap::new();
    for (path, fp) in files {
        buckets
            .entry(fp.to_hex()[..shortest].to_string())
            .or_default()
            .insert((path, fp));
    }

    let mut pairs = Vec::new();
    for members in buckets.values() {
        let members: Vec<_> = members.iter().collect();
        for (i, (path_a, fp_a)) in members.iter().enumerate() {
            for (path_b, fp_b) in &members[i + 1..] {
                let distance = fp_a.hamming(fp_b);
                if distance <= max_distance {
                    pairs.push(NearDuplicate {
                        a: (*path_a).to_string(),
                        b: (*path_b).to_string(),
                        distance,
                    });
                }
            }
        }
    }
    pairs.sort_by(|x, y| x.distance.cmp(&y.distance).then_with(|| x.a.cmp(&y.a)).then_with(|| x.b.cmp(&y.b)));
    pairs
}
