//! # Threshold OPRF over ristretto255
//!
//! This crate implements a (t, n)-threshold oblivious pseudo-random
//! function together with the trusted-party distributed key generation
//! that establishes its secret-shared evaluation key.
//!
//! ## Overview
//!
//! The PRF is f_k(x) = H2(x, H1(x)^k). The key k is Shamir-shared across
//! n servers; a client that contacts any t of them can evaluate the
//! function, while fewer than t servers learn nothing about k and no
//! server ever learns x:
//!
//! - Each server holds a [`Share`] of k and answers a blinded query with
//!   [`partial_evaluate`].
//! - The client combines t answers with [`threshold_combine`]; Lagrange
//!   interpolation happens in the exponent, so k itself is never
//!   reconstructed anywhere.
//!
//! The shares come either from [`create_shares`] (a trusted dealer) or
//! from the DKG in [`dkg`], where n mutually suspicious peers generate a
//! fresh sharing under the eyes of a trusted party that relays all
//! traffic, judges complaints, and still learns nothing about the secret.
//!
//! ## Quick start: threshold evaluation
//!
//! ```ignore
//! use threshold_oprf::{create_shares, partial_evaluate, threshold_combine, oprf};
//!
//! // Dealer: split a fresh key among 5 servers, any 3 can evaluate.
//! let key = threshold_oprf::group::random_scalar(&mut rng);
//! let shares = create_shares(&key, 5, 3, &mut rng)?;
//!
//! // Client: blind the input.
//! let (r, alpha) = oprf::blind(b"password", &mut rng)?;
//!
//! // Servers 1, 3, 5 answer.
//! let indexes = [1, 3, 5];
//! let partials: Vec<_> = [0, 2, 4]
//!     .iter()
//!     .map(|&i| partial_evaluate(&shares[i], &alpha, &indexes))
//!     .collect::<Result<_, _>>()?;
//!
//! // Client: combine, unblind, finalize.
//! let combined = threshold_combine(&partials);
//! let unblinded = oprf::unblind(&r, &combined)?;
//! let output = oprf::finalize(b"password", &unblinded);
//! ```
//!
//! ## Quick start: distributed key generation
//!
//! Each engine is a non-blocking state machine; the caller does all I/O
//! between [`TpState::next`] / [`PeerState::next`] calls. See [`dkg`] for
//! the driving loop, and [`dkg::run_local_dkg`] for an in-process run.
//!
//! ## Security notes
//!
//! - All scalar arithmetic is performed by `curve25519-dalek` in constant
//!   time; scalar encodings are checked for canonicity at every boundary.
//! - Pairwise share delivery runs over mutually authenticated channels
//!   with a key-committing MAC, so a forced key reveal binds to exactly
//!   one recorded ciphertext.
//! - A failed run leaves a [`CheaterRecord`] trail attributing each
//!   violation to a peer; the generated shares must then be discarded.
//!
//! This implementation has not been independently audited.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

mod channel;
pub mod cheater;
pub mod dkg;
mod error;
pub mod group;
pub mod lagrange;
pub mod message;
pub mod oprf;
pub mod sharing;
pub mod toprf;
pub mod transcript;

pub use cheater::{CheaterLedger, CheaterRecord};
pub use dkg::{run_local_dkg, Clock, DkgParams, PeerState, SystemClock, TpState};
pub use error::{validate_dkg_params, DkgResult, Error, MAX_PEERS, MIN_THRESHOLD};
pub use sharing::{create_shares, reconstruct, Share, SHARE_BYTES};
pub use toprf::{partial_evaluate, threshold_combine, threshold_mult, Partial, PARTIAL_BYTES};

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_constants() {
		assert!(MAX_PEERS >= MIN_THRESHOLD);
		assert_eq!(SHARE_BYTES, PARTIAL_BYTES);
	}
}
