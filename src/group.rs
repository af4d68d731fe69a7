//! Ristretto255 scalar and group-element helpers.
//!
//! Thin wrappers around `curve25519-dalek` that enforce the encodings used
//! on the wire: scalars must be canonical, group elements must decompress,
//! and scalar multiplications that land on the identity are rejected.

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand_core::{CryptoRng, RngCore};

use crate::error::{DkgResult, Error};

/// Byte length of a serialized scalar.
pub const SCALAR_BYTES: usize = 32;

/// Byte length of a serialized group element.
pub const POINT_BYTES: usize = 32;

/// Draw a uniformly random scalar.
pub fn random_scalar<R: RngCore + CryptoRng>(rng: &mut R) -> Scalar {
	Scalar::random(rng)
}

/// Embed a share index into the scalar field, byte value in the
/// least-significant position. This matches the one-byte index encoding
/// used on the wire.
pub fn scalar_from_index(index: u8) -> Scalar {
	Scalar::from(index as u64)
}

/// Invert a scalar. Zero has no inverse.
pub fn invert(scalar: &Scalar) -> DkgResult<Scalar> {
	if *scalar == Scalar::ZERO {
		return Err(Error::Domain { reason: "inversion of zero scalar" });
	}
	Ok(scalar.invert())
}

/// Multiply a group element by a scalar, rejecting an identity result.
pub fn mul_point(scalar: &Scalar, point: &RistrettoPoint) -> DkgResult<RistrettoPoint> {
	let out = scalar * point;
	if out == RistrettoPoint::identity() {
		return Err(Error::Domain { reason: "scalar multiplication yields identity" });
	}
	Ok(out)
}

/// Decode a scalar, rejecting non-canonical encodings.
pub fn decode_scalar(bytes: &[u8; 32]) -> DkgResult<Scalar> {
	match Scalar::from_canonical_bytes(*bytes).into() {
		Some(s) => Ok(s),
		None => Err(Error::MalformedScalar),
	}
}

/// Decode a group element.
pub fn decode_point(bytes: &[u8; 32]) -> DkgResult<RistrettoPoint> {
	CompressedRistretto::from_slice(bytes)
		.map_err(|_| Error::MalformedPoint)?
		.decompress()
		.ok_or(Error::MalformedPoint)
}

/// Serialize a group element.
pub fn encode_point(point: &RistrettoPoint) -> [u8; 32] {
	point.compress().to_bytes()
}

#[cfg(test)]
mod tests {
	use super::*;
	use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	#[test]
	fn test_scalar_from_index_round_trip() {
		for i in [1u8, 2, 127, 255] {
			let s = scalar_from_index(i);
			assert_eq!(s.to_bytes()[0], i);
			assert!(s.to_bytes()[1..].iter().all(|&b| b == 0));
		}
	}

	#[test]
	fn test_invert_zero_fails() {
		assert!(matches!(invert(&Scalar::ZERO), Err(Error::Domain { .. })));
	}

	#[test]
	fn test_invert_round_trip() {
		let mut rng = StdRng::from_seed([7u8; 32]);
		let s = random_scalar(&mut rng);
		let inv = invert(&s).unwrap();
		assert_eq!(s * inv, Scalar::ONE);
	}

	#[test]
	fn test_mul_point_rejects_identity() {
		let res = mul_point(&Scalar::ZERO, &RISTRETTO_BASEPOINT_POINT);
		assert!(matches!(res, Err(Error::Domain { .. })));
	}

	#[test]
	fn test_decode_scalar_rejects_non_canonical() {
		// The group order minus one is canonical, all-ones is not.
		let bad = [0xffu8; 32];
		assert_eq!(decode_scalar(&bad), Err(Error::MalformedScalar));
	}

	#[test]
	fn test_point_round_trip() {
		let mut rng = StdRng::from_seed([9u8; 32]);
		let p = RISTRETTO_BASEPOINT_POINT * random_scalar(&mut rng);
		let bytes = encode_point(&p);
		assert_eq!(decode_point(&bytes).unwrap(), p);
	}

	#[test]
	fn test_decode_point_rejects_non_canonical() {
		// All-ones exceeds the field prime and cannot decompress.
		let bad = [0xffu8; 32];
		assert_eq!(decode_point(&bad), Err(Error::MalformedPoint));
	}
}
