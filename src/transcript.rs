//! Running transcript hash over broadcast material.
//!
//! Every participant absorbs each broadcast message it sends or receives,
//! in protocol order. Equal digests at the end of a session prove that all
//! participants saw the same broadcasts.

use blake2::{Blake2b512, Digest};

/// Byte length of a transcript digest.
pub const TRANSCRIPT_BYTES: usize = 64;

const TRANSCRIPT_DST: &[u8] = b"threshold-oprf dkg transcript v1";

/// A running hash over broadcast bytes.
#[derive(Clone)]
pub struct Transcript {
	hasher: Blake2b512,
}

impl Transcript {
	/// Start a transcript.
	pub fn new() -> Self {
		let mut hasher = Blake2b512::new();
		hasher.update(TRANSCRIPT_DST);
		Self { hasher }
	}

	/// Absorb one broadcast message, length-prefixed so message boundaries
	/// are unambiguous.
	pub fn absorb(&mut self, bytes: &[u8]) {
		self.hasher.update((bytes.len() as u32).to_be_bytes());
		self.hasher.update(bytes);
	}

	/// Current digest. The transcript itself keeps running.
	pub fn digest(&self) -> [u8; TRANSCRIPT_BYTES] {
		let mut out = [0u8; TRANSCRIPT_BYTES];
		out.copy_from_slice(&self.hasher.clone().finalize());
		out
	}
}

impl Default for Transcript {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_same_inputs_same_digest() {
		let mut a = Transcript::new();
		let mut b = Transcript::new();
		for msg in [b"one".as_slice(), b"two", b"three"] {
			a.absorb(msg);
			b.absorb(msg);
			assert_eq!(a.digest(), b.digest());
		}
	}

	#[test]
	fn test_order_matters() {
		let mut a = Transcript::new();
		a.absorb(b"one");
		a.absorb(b"two");
		let mut b = Transcript::new();
		b.absorb(b"two");
		b.absorb(b"one");
		assert_ne!(a.digest(), b.digest());
	}

	#[test]
	fn test_boundaries_matter() {
		let mut a = Transcript::new();
		a.absorb(b"onetwo");
		let mut b = Transcript::new();
		b.absorb(b"one");
		b.absorb(b"two");
		assert_ne!(a.digest(), b.digest());
	}
}
