//! Threshold OPRF evaluation.
//!
//! The evaluation key k is Shamir-shared across n servers. A client sends
//! the same blinded element α to any t servers; each returns a partial
//! evaluation, and the client combines them into α^k by Lagrange
//! interpolation in the exponent, without anyone reconstructing k.
//!
//! Each server folds its Lagrange coefficient into its own exponentiation
//! (β_i = α^{k_i·λ_i}), which moves one scalar multiplication from the
//! client to the servers and lets the combiner use plain point addition.

use curve25519_dalek::ristretto::RistrettoPoint;

use crate::error::{DkgResult, Error};
use crate::group::{decode_point, encode_point, mul_point};
use crate::lagrange::coeff;
use crate::sharing::Share;

/// Byte length of a partial evaluation on the wire: one index byte
/// followed by the group element.
pub const PARTIAL_BYTES: usize = 33;

/// A single server's contribution to a threshold evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partial {
	index: u8,
	value: RistrettoPoint,
}

impl Partial {
	/// Assemble a partial from its parts. Index 0 is reserved.
	pub fn new(index: u8, value: RistrettoPoint) -> DkgResult<Self> {
		if index == 0 {
			return Err(Error::Domain { reason: "partial index 0 is reserved" });
		}
		Ok(Self { index, value })
	}

	/// The contributing server's share index.
	pub fn index(&self) -> u8 {
		self.index
	}

	/// The partial evaluation.
	pub fn value(&self) -> &RistrettoPoint {
		&self.value
	}

	/// Serialize to the 33-byte wire form.
	pub fn to_bytes(&self) -> [u8; PARTIAL_BYTES] {
		let mut out = [0u8; PARTIAL_BYTES];
		out[0] = self.index;
		out[1..].copy_from_slice(&encode_point(&self.value));
		out
	}

	/// Deserialize from the 33-byte wire form.
	pub fn from_bytes(bytes: &[u8]) -> DkgResult<Self> {
		if bytes.len() != PARTIAL_BYTES {
			return Err(Error::BufferSize { expected: PARTIAL_BYTES, actual: bytes.len() });
		}
		let mut value = [0u8; 32];
		value.copy_from_slice(&bytes[1..]);
		Self::new(bytes[0], decode_point(&value)?)
	}
}

/// Server-side partial evaluation of a blinded element.
///
/// `indexes` is the set of share indexes answering this query; it must
/// contain the server's own index. The Lagrange coefficient for that set
/// is folded into the exponent: β_i = α^{k_i·λ_i}.
pub fn partial_evaluate(
	share: &Share,
	blinded: &RistrettoPoint,
	indexes: &[u8],
) -> DkgResult<Partial> {
	let lambda = coeff(share.index(), indexes)?;
	let exponent = share.value() * lambda;
	Ok(Partial { index: share.index(), value: mul_point(&exponent, blinded)? })
}

/// Combine pre-weighted partials into α^k by point addition.
///
/// All partials must come from the same index set that was passed to
/// [`partial_evaluate`]; the sum then telescopes to α^k.
pub fn threshold_combine(partials: &[Partial]) -> RistrettoPoint {
	partials.iter().map(|p| p.value).sum()
}

/// Combine unweighted partials γ_i = α^{k_i}: each is raised to its
/// Lagrange coefficient here before summing. Fails if any exponentiation
/// yields the identity.
pub fn threshold_mult(partials: &[Partial]) -> DkgResult<RistrettoPoint> {
	let indexes: Vec<u8> = partials.iter().map(|p| p.index).collect();
	let mut acc = Vec::with_capacity(partials.len());
	for p in partials {
		let lambda = coeff(p.index, &indexes)?;
		acc.push(mul_point(&lambda, &p.value)?);
	}
	Ok(acc.iter().sum())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::group::random_scalar;
	use crate::oprf::hash_to_group;
	use crate::sharing::create_shares;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	#[test]
	fn test_combine_equals_direct_evaluation() {
		let mut rng = StdRng::from_seed([21u8; 32]);
		let key = random_scalar(&mut rng);
		let shares = create_shares(&key, 5, 3, &mut rng).unwrap();
		let alpha = hash_to_group(b"query");

		let indexes = [1u8, 3, 5];
		let partials: Vec<Partial> = [0usize, 2, 4]
			.iter()
			.map(|&i| partial_evaluate(&shares[i], &alpha, &indexes).unwrap())
			.collect();

		assert_eq!(threshold_combine(&partials), mul_point(&key, &alpha).unwrap());
	}

	#[test]
	fn test_disjoint_subsets_agree() {
		let mut rng = StdRng::from_seed([22u8; 32]);
		let key = random_scalar(&mut rng);
		let shares = create_shares(&key, 6, 3, &mut rng).unwrap();
		let alpha = hash_to_group(b"query");

		let combine = |picks: &[usize]| {
			let indexes: Vec<u8> = picks.iter().map(|&i| shares[i].index()).collect();
			let partials: Vec<Partial> = picks
				.iter()
				.map(|&i| partial_evaluate(&shares[i], &alpha, &indexes).unwrap())
				.collect();
			threshold_combine(&partials)
		};

		assert_eq!(combine(&[0, 1, 2]), combine(&[3, 4, 5]));
	}

	#[test]
	fn test_threshold_mult_matches_combine() {
		let mut rng = StdRng::from_seed([23u8; 32]);
		let key = random_scalar(&mut rng);
		let shares = create_shares(&key, 4, 2, &mut rng).unwrap();
		let alpha = hash_to_group(b"query");

		// Unweighted responses γ_i = α^{k_i}.
		let unweighted: Vec<Partial> = shares[..2]
			.iter()
			.map(|s| Partial::new(s.index(), mul_point(s.value(), &alpha).unwrap()).unwrap())
			.collect();

		assert_eq!(threshold_mult(&unweighted).unwrap(), mul_point(&key, &alpha).unwrap());
	}

	#[test]
	fn test_wire_round_trip() {
		let mut rng = StdRng::from_seed([24u8; 32]);
		let p = Partial::new(9, hash_to_group(b"p") * random_scalar(&mut rng)).unwrap();
		assert_eq!(Partial::from_bytes(&p.to_bytes()).unwrap(), p);
	}
}
