//! Shamir secret sharing over the ristretto255 scalar field.
//!
//! A secret scalar is split into n shares with threshold t by sampling a
//! random polynomial of degree t−1 whose constant term is the secret.
//! Share i is (i, f(i)) for i = 1..=n; index 0 stands for the secret itself
//! and never appears on the wire.

use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{DkgResult, Error};
use crate::group::{decode_scalar, random_scalar, scalar_from_index};
use crate::lagrange::coeff;

/// Byte length of a share on the wire: one index byte followed by the
/// scalar value.
pub const SHARE_BYTES: usize = 33;

/// One Shamir share: an index in 1..=255 and the polynomial value at that
/// index.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Share {
	index: u8,
	value: Scalar,
}

impl Share {
	/// Assemble a share from its parts. Index 0 is reserved for the secret.
	pub fn new(index: u8, value: Scalar) -> DkgResult<Self> {
		if index == 0 {
			return Err(Error::Domain { reason: "share index 0 is reserved" });
		}
		Ok(Self { index, value })
	}

	/// The share index.
	pub fn index(&self) -> u8 {
		self.index
	}

	/// The share value.
	pub fn value(&self) -> &Scalar {
		&self.value
	}

	/// Serialize to the 33-byte wire form.
	pub fn to_bytes(&self) -> [u8; SHARE_BYTES] {
		let mut out = [0u8; SHARE_BYTES];
		out[0] = self.index;
		out[1..].copy_from_slice(&self.value.to_bytes());
		out
	}

	/// Deserialize from the 33-byte wire form, rejecting non-canonical
	/// scalar encodings and the reserved index 0.
	pub fn from_bytes(bytes: &[u8]) -> DkgResult<Self> {
		if bytes.len() != SHARE_BYTES {
			return Err(Error::BufferSize { expected: SHARE_BYTES, actual: bytes.len() });
		}
		let mut value = [0u8; 32];
		value.copy_from_slice(&bytes[1..]);
		Self::new(bytes[0], decode_scalar(&value)?)
	}
}

impl core::fmt::Debug for Share {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		// The value is a secret; only the index is shown.
		f.debug_struct("Share").field("index", &self.index).finish_non_exhaustive()
	}
}

/// Evaluate a polynomial given by its coefficients (constant term first)
/// at x, using Horner's rule.
pub(crate) fn eval_poly(coeffs: &[Scalar], x: &Scalar) -> Scalar {
	let mut acc = Scalar::ZERO;
	for c in coeffs.iter().rev() {
		acc = acc * x + c;
	}
	acc
}

/// Split a secret into n shares with threshold t.
///
/// Any t distinct-index shares determine the secret; t−1 shares reveal
/// nothing. Valid parameters are 1 ≤ t ≤ n ≤ 255.
pub fn create_shares<R: RngCore + CryptoRng>(
	secret: &Scalar,
	n: u8,
	t: u8,
	rng: &mut R,
) -> DkgResult<Vec<Share>> {
	if t == 0 || n == 0 || t > n {
		return Err(Error::InvalidParameters {
			threshold: t,
			peers: n,
			reason: "need 1 <= t <= n",
		});
	}
	let mut coeffs = Vec::with_capacity(t as usize);
	coeffs.push(*secret);
	for _ in 1..t {
		coeffs.push(random_scalar(rng));
	}
	let shares = (1..=n)
		.map(|i| Share { index: i, value: eval_poly(&coeffs, &scalar_from_index(i)) })
		.collect();
	coeffs.zeroize();
	Ok(shares)
}

/// Reconstruct the secret from t or more shares by Lagrange interpolation
/// in the scalar field.
///
/// Protocol code never calls this; reconstruction happens in the exponent.
/// It exists for callers that hold plain shares, and for tests.
pub fn reconstruct(shares: &[Share]) -> DkgResult<Scalar> {
	if shares.is_empty() {
		return Err(Error::Domain { reason: "no shares to reconstruct from" });
	}
	let indexes: Vec<u8> = shares.iter().map(|s| s.index).collect();
	let mut acc = Scalar::ZERO;
	for share in shares {
		acc += coeff(share.index, &indexes)? * share.value;
	}
	Ok(acc)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	#[test]
	fn test_split_and_reconstruct() {
		let mut rng = StdRng::from_seed([3u8; 32]);
		let secret = random_scalar(&mut rng);
		let shares = create_shares(&secret, 5, 3, &mut rng).unwrap();
		assert_eq!(shares.len(), 5);

		// Any three shares recover the secret.
		assert_eq!(reconstruct(&shares[..3]).unwrap(), secret);
		assert_eq!(reconstruct(&shares[2..]).unwrap(), secret);
		assert_eq!(
			reconstruct(&[shares[0].clone(), shares[2].clone(), shares[4].clone()]).unwrap(),
			secret
		);
	}

	#[test]
	fn test_all_shares_reconstruct() {
		let mut rng = StdRng::from_seed([4u8; 32]);
		let secret = random_scalar(&mut rng);
		let shares = create_shares(&secret, 7, 4, &mut rng).unwrap();
		assert_eq!(reconstruct(&shares).unwrap(), secret);
	}

	#[test]
	fn test_threshold_one_is_constant() {
		let mut rng = StdRng::from_seed([5u8; 32]);
		let secret = random_scalar(&mut rng);
		let shares = create_shares(&secret, 3, 1, &mut rng).unwrap();
		for s in &shares {
			assert_eq!(*s.value(), secret);
		}
	}

	#[test]
	fn test_invalid_params() {
		let mut rng = StdRng::from_seed([6u8; 32]);
		let secret = random_scalar(&mut rng);
		assert!(create_shares(&secret, 3, 0, &mut rng).is_err());
		assert!(create_shares(&secret, 3, 4, &mut rng).is_err());
	}

	#[test]
	fn test_wire_round_trip() {
		let mut rng = StdRng::from_seed([8u8; 32]);
		let share = Share::new(17, random_scalar(&mut rng)).unwrap();
		let bytes = share.to_bytes();
		assert_eq!(Share::from_bytes(&bytes).unwrap(), share);
	}

	#[test]
	fn test_wire_rejects_reserved_index() {
		let mut bytes = [0u8; SHARE_BYTES];
		bytes[1] = 1;
		assert!(Share::from_bytes(&bytes).is_err());
	}

	#[test]
	fn test_wire_rejects_non_canonical_scalar() {
		let mut bytes = [0xffu8; SHARE_BYTES];
		bytes[0] = 1;
		assert_eq!(Share::from_bytes(&bytes), Err(Error::MalformedScalar));
	}
}
