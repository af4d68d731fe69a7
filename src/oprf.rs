//! Base two-hash OPRF over ristretto255.
//!
//! The PRF is f_k(x) = H2(x, H1(x)^k). A client blinds H1(x) with a random
//! scalar r, the server raises the blinded element to its key k, and the
//! client strips r and hashes the result. The threshold wrapper in
//! [`crate::toprf`] replaces the single server evaluation with per-share
//! partial evaluations.

use blake2::{Blake2b512, Digest};
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};
use sha2::Sha512;

use crate::error::DkgResult;
use crate::group::{invert, mul_point, random_scalar};

/// Byte length of the final PRF output.
pub const OUTPUT_BYTES: usize = 64;

const HASH_TO_GROUP_DST: &[u8] = b"threshold-oprf ristretto255 hash-to-group";
const FINALIZE_DST: &[u8] = b"threshold-oprf ristretto255 finalize";

/// H1: hash an arbitrary input to a group element.
pub fn hash_to_group(input: &[u8]) -> RistrettoPoint {
	let mut hasher = Sha512::new();
	hasher.update(HASH_TO_GROUP_DST);
	hasher.update(input);
	let mut wide = [0u8; 64];
	wide.copy_from_slice(&hasher.finalize());
	RistrettoPoint::from_uniform_bytes(&wide)
}

/// Blind an input for evaluation.
///
/// Returns the blinding factor, needed later by [`unblind`], and the
/// blinded element α = H1(x)^r to send to the evaluator.
pub fn blind<R: RngCore + CryptoRng>(
	input: &[u8],
	rng: &mut R,
) -> DkgResult<(Scalar, RistrettoPoint)> {
	let r = random_scalar(rng);
	let alpha = mul_point(&r, &hash_to_group(input))?;
	Ok((r, alpha))
}

/// Single-server evaluation: β = α^k. Fails if the result is the identity.
pub fn evaluate(key: &Scalar, blinded: &RistrettoPoint) -> DkgResult<RistrettoPoint> {
	mul_point(key, blinded)
}

/// Strip the blinding factor: β^(1/r) = H1(x)^k.
pub fn unblind(r: &Scalar, evaluated: &RistrettoPoint) -> DkgResult<RistrettoPoint> {
	mul_point(&invert(r)?, evaluated)
}

/// H2: derive the final PRF output from the input and the unblinded
/// element.
pub fn finalize(input: &[u8], unblinded: &RistrettoPoint) -> [u8; OUTPUT_BYTES] {
	let mut hasher = Blake2b512::new();
	hasher.update(FINALIZE_DST);
	hasher.update((input.len() as u16).to_be_bytes());
	hasher.update(input);
	hasher.update(unblinded.compress().to_bytes());
	let mut out = [0u8; OUTPUT_BYTES];
	out.copy_from_slice(&hasher.finalize());
	out
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	#[test]
	fn test_blind_evaluate_unblind_matches_direct() {
		let mut rng = StdRng::from_seed([11u8; 32]);
		let key = random_scalar(&mut rng);
		let input = b"test input";

		let (r, alpha) = blind(input, &mut rng).unwrap();
		let beta = evaluate(&key, &alpha).unwrap();
		let unblinded = unblind(&r, &beta).unwrap();

		// The protocol result must equal the direct evaluation H1(x)^k.
		let direct = evaluate(&key, &hash_to_group(input)).unwrap();
		assert_eq!(unblinded, direct);
		assert_eq!(finalize(input, &unblinded), finalize(input, &direct));
	}

	#[test]
	fn test_different_inputs_different_outputs() {
		let mut rng = StdRng::from_seed([12u8; 32]);
		let key = random_scalar(&mut rng);

		let out1 = evaluate(&key, &hash_to_group(b"input1")).unwrap();
		let out2 = evaluate(&key, &hash_to_group(b"input2")).unwrap();
		assert_ne!(finalize(b"input1", &out1), finalize(b"input2", &out2));
	}

	#[test]
	fn test_evaluate_rejects_zero_key() {
		let alpha = hash_to_group(b"x");
		assert!(evaluate(&Scalar::ZERO, &alpha).is_err());
	}
}
