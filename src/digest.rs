//! Content digests and the pod-key convention built on top of them.

use std::fmt;

use anyhow::{bail, Result};

/// SHA-256 content digest width, in bytes.
pub const DIGEST_SIZE: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; DIGEST_SIZE]);

impl Digest {
    pub const ZERO: Digest = Digest([0u8; DIGEST_SIZE]);

    /// Hash `data` and return its digest.
    pub fn of(data: &[u8]) -> Self {
        Digest(openssl::sha::sha256(data))
    }

    pub fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Digest(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(DIGEST_SIZE * 2);
        for b in &self.0 {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        if s.len() != DIGEST_SIZE * 2 {
            bail!("invalid digest hex length: {}", s.len());
        }
        let mut out = [0u8; DIGEST_SIZE];
        for i in 0..DIGEST_SIZE {
            out[i] = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)?;
        }
        Ok(Digest(out))
    }

    /// Split the hex digest into the bounded-fan-out pod key convention:
    /// `"<prefix>/aa/bb/<rest>"`.
    pub fn pod_key(&self, prefix: &str) -> String {
        let hex = self.to_hex();
        format!("{}/{}/{}/{}", prefix, &hex[0..2], &hex[2..4], &hex[4..])
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_addressing_is_deterministic() {
        let a = Digest::of(b"hello world");
        let b = Digest::of(b"hello world");
        assert_eq!(a, b);
        let c = Digest::of(b"hello worlD");
        assert_ne!(a, c);
    }

    #[test]
    fn hex_round_trips() {
        let d = Digest::of(b"lakota");
        let hex = d.to_hex();
        assert_eq!(Digest::from_hex(&hex).unwrap(), d);
    }

    #[test]
    fn pod_key_has_bounded_fan_out() {
        let d = Digest::of(b"lakota");
        let key = d.pod_key("blobs");
        let hex = d.to_hex();
        assert_eq!(
            key,
            format!("blobs/{}/{}/{}", &hex[0..2], &hex[2..4], &hex[4..])
        );
    }
}
