//! Content Hashing
//!
//! Every plug has a [`Hash`]: a 256-bit BLAKE3 digest over all of the state
//! that determines its value. Two plugs with the same hash are, by contract,
//! interchangeable, which is what lets the compute cache share one entry
//! between unrelated nodes.
//!
//! [`Hasher`] is a thin wrapper around `blake3::Hasher` that adds typed,
//! length-prefixed appends so that adjacent fields cannot run into each
//! other (`"ab" + "c"` must not hash like `"a" + "bc"`).

use std::fmt;

use serde::{Deserialize, Serialize};

/// A fixed-width content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Wrap raw digest bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash a single byte string.
    pub fn of(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).into())
    }

    /// Lowercase hexadecimal form.
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The first eight bytes are plenty to tell digests apart in logs.
        write!(f, "Hash(")?;
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Incremental builder for [`Hash`] values.
#[derive(Clone, Default)]
pub struct Hasher {
    inner: blake3::Hasher,
}

impl Hasher {
    /// Create an empty hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes, prefixed with their length.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.inner.update(&(bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
        self
    }

    /// Append a string.
    pub fn append_str(&mut self, s: &str) -> &mut Self {
        self.append_bytes(s.as_bytes())
    }

    pub fn append_u8(&mut self, v: u8) -> &mut Self {
        self.inner.update(&[v]);
        self
    }

    pub fn append_u64(&mut self, v: u64) -> &mut Self {
        self.inner.update(&v.to_le_bytes());
        self
    }

    pub fn append_i64(&mut self, v: i64) -> &mut Self {
        self.inner.update(&v.to_le_bytes());
        self
    }

    /// Append a float.
    ///
    /// `-0.0` is folded into `0.0` and every NaN hashes alike, so values that
    /// compare as the same quantity share a digest.
    pub fn append_f64(&mut self, v: f64) -> &mut Self {
        let canonical = if v == 0.0 {
            0.0f64
        } else if v.is_nan() {
            f64::NAN
        } else {
            v
        };
        self.inner.update(&canonical.to_bits().to_le_bytes());
        self
    }

    /// Append another digest.
    pub fn append_hash(&mut self, h: &Hash) -> &mut Self {
        self.inner.update(h.as_bytes());
        self
    }

    /// Finish and return the digest. The hasher may keep being used.
    pub fn finish(&self) -> Hash {
        Hash(self.inner.finalize().into())
    }
}

impl fmt::Debug for Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hasher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_input_equal_digest() {
        let mut a = Hasher::new();
        a.append_str("frame").append_f64(1.0);
        let mut b = Hasher::new();
        b.append_str("frame").append_f64(1.0);
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn appends_are_length_prefixed() {
        let mut a = Hasher::new();
        a.append_str("ab").append_str("c");
        let mut b = Hasher::new();
        b.append_str("a").append_str("bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn negative_zero_and_nan_are_canonical() {
        let mut a = Hasher::new();
        a.append_f64(0.0);
        let mut b = Hasher::new();
        b.append_f64(-0.0);
        assert_eq!(a.finish(), b.finish());

        let mut c = Hasher::new();
        c.append_f64(f64::NAN);
        let mut d = Hasher::new();
        d.append_f64(-f64::NAN);
        assert_eq!(c.finish(), d.finish());
    }

    #[test]
    fn hex_is_sixty_four_chars() {
        let h = Hash::of(b"trellis");
        assert_eq!(h.to_hex().len(), 64);
        assert_eq!(h.to_string(), h.to_hex());
        assert_eq!(h.to_hex(), blake3::hash(b"trellis").to_hex().as_str());
        assert_eq!(Hash::from_bytes([0xab; 32]).to_hex(), "ab".repeat(32));
    }
}
