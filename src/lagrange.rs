//! Lagrange coefficients over the ristretto255 scalar field.

use curve25519_dalek::scalar::Scalar;

use crate::error::DkgResult;
use crate::group::{invert, scalar_from_index};

/// Compute the Lagrange coefficient λ_index for interpolation at zero over
/// the given index set:
///
/// λ_index = ∏_{j ∈ indexes, j ≠ index} j · (j − index)⁻¹
///
/// Indexes are share indexes (1..=255) embedded into the scalar field with
/// the byte value in the least-significant position. The caller must pass
/// distinct indexes containing `index`; a duplicate index makes one of the
/// denominators zero and the inversion fails.
pub fn coeff(index: u8, indexes: &[u8]) -> DkgResult<Scalar> {
	let xi = scalar_from_index(index);
	let mut dividend = Scalar::ONE;
	let mut divisor = Scalar::ONE;
	for &j in indexes {
		if j == index {
			continue;
		}
		let xj = scalar_from_index(j);
		dividend *= xj;
		divisor *= xj - xi;
	}
	Ok(dividend * invert(&divisor)?)
}

/// Compute the coefficients for every index in the set, in set order.
pub fn coefficients(indexes: &[u8]) -> DkgResult<Vec<Scalar>> {
	indexes.iter().map(|&i| coeff(i, indexes)).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_singleton_coefficient_is_one() {
		assert_eq!(coeff(1, &[1]).unwrap(), Scalar::ONE);
		assert_eq!(coeff(42, &[42]).unwrap(), Scalar::ONE);
	}

	#[test]
	fn test_coefficients_sum_to_one() {
		for indexes in [&[1u8, 2, 3][..], &[2, 5, 7, 11][..], &[1, 254, 255][..]] {
			let sum: Scalar = coefficients(indexes).unwrap().iter().sum();
			assert_eq!(sum, Scalar::ONE, "sum over {:?}", indexes);
		}
	}

	#[test]
	fn test_duplicate_index_fails() {
		assert!(coeff(1, &[1, 2, 2]).is_err());
	}

	#[test]
	fn test_two_point_interpolation() {
		// f(x) = 3 + 4x, shares at x=1 and x=2; λ weights recover f(0)=3.
		let three = Scalar::from(3u64);
		let four = Scalar::from(4u64);
		let f1 = three + four;
		let f2 = three + four + four;
		let l1 = coeff(1, &[1, 2]).unwrap();
		let l2 = coeff(2, &[1, 2]).unwrap();
		assert_eq!(l1 * f1 + l2 * f2, three);
	}
}
