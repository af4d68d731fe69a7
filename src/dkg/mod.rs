//! Trusted-party distributed key generation.
//!
//! A trusted party (TP) orchestrates n mutually suspicious peers through a
//! fixed schedule of protocol steps. The TP relays every message, acts as
//! the broadcast medium, and adjudicates complaints, but never sees a
//! share in the clear and does not learn the generated secret.
//!
//! Both engines expose the same driving loop: the caller asks for
//! [`input_size`](tp::TpState::input_size) bytes, performs the network
//! reads itself, calls [`next`](tp::TpState::next), and sends the returned
//! output. The engines never block and never perform I/O; any transport
//! works.
//!
//! ```text
//! let (mut tp, msg0) = TpState::new(&params, b"my-app", peer_keys)?;
//! send_to_all(msg0);
//! while tp.not_done() {
//!     let input = read_exact(tp.input_size());
//!     let output = tp.next(&input)?;
//!     for peer in 1..=n {
//!         send(peer, tp.peer_msg(&output, peer)?);
//!     }
//! }
//! ```
//!
//! At the end of a run the TP holds a [`CheaterLedger`](crate::CheaterLedger);
//! if it is non-empty the generated shares must be discarded. Each peer
//! holds its final share of the group secret.
//!
//! ## Schedule
//!
//! Steps are numbered globally; the TP acts on one set, the peers on the
//! complement, and every message type is tied to the step that emits it.
//! The run opens with the TP's parameter broadcast and session setup,
//! continues through key announcement, commitment broadcast, the pairwise
//! handshake rounds, encrypted share delivery, the complaint round, forced
//! key reveals with a public audit, and closes with a transcript
//! comparison across all participants.

use std::time::{SystemTime, UNIX_EPOCH};

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::traits::Identity;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::channel::{HANDSHAKE1_BYTES, HANDSHAKE3_BYTES, WRAPPED_SHARE_BYTES};
use crate::error::{validate_dkg_params, DkgResult};
use crate::group::scalar_from_index;
use crate::message::HEADER_BYTES;
use crate::sharing::Share;
use crate::transcript::TRANSCRIPT_BYTES;

pub mod peer;
pub mod tp;

pub use peer::PeerState;
pub use tp::TpState;

// Message types, one per emitting step. The final handshake message has no
// type of its own: it rides inside the share-delivery message.
pub(crate) const MSG_PARAMS: u8 = 0;
pub(crate) const MSG_PEER_KEYS: u8 = 1;
pub(crate) const MSG_KEY_LIST: u8 = 2;
pub(crate) const MSG_COMMITMENTS: u8 = 3;
pub(crate) const MSG_COMMITMENT_LIST: u8 = 4;
pub(crate) const MSG_HANDSHAKE1: u8 = 5;
pub(crate) const MSG_HANDSHAKE2: u8 = 6;
pub(crate) const MSG_SHARE: u8 = 8;
pub(crate) const MSG_COMPLAINTS: u8 = 9;
pub(crate) const MSG_COMPLAINT_LIST: u8 = 10;
pub(crate) const MSG_REVEAL: u8 = 11;
pub(crate) const MSG_REVEAL_LIST: u8 = 12;
pub(crate) const MSG_REVEAL_ACK: u8 = 13;
pub(crate) const MSG_TRANSCRIPT: u8 = 14;
pub(crate) const MSG_TRANSCRIPT_CONFIRM: u8 = 15;
pub(crate) const MSG_DONE: u8 = 16;

// TP-active steps.
pub(crate) const TP_STEP_KEYS: u8 = 2;
pub(crate) const TP_STEP_COMMITMENTS: u8 = 4;
pub(crate) const TP_STEP_ROUTE_HS1: u8 = 6;
pub(crate) const TP_STEP_ROUTE_HS2: u8 = 8;
pub(crate) const TP_STEP_ROUTE_SHARES: u8 = 10;
pub(crate) const TP_STEP_COMPLAINTS: u8 = 12;
pub(crate) const TP_STEP_COLLECT_REVEALS: u8 = 15;
pub(crate) const TP_STEP_PUBLISH_REVEALS: u8 = 16;
pub(crate) const TP_STEP_ADJUDICATE: u8 = 18;
pub(crate) const TP_STEP_CONFIRM: u8 = 20;
pub(crate) const TP_STEP_DONE: u8 = 21;

// Peer-active steps.
pub(crate) const PEER_STEP_ENROLL: u8 = 1;
pub(crate) const PEER_STEP_COMMIT: u8 = 3;
pub(crate) const PEER_STEP_HS1: u8 = 5;
pub(crate) const PEER_STEP_HS2: u8 = 7;
pub(crate) const PEER_STEP_SHARES: u8 = 9;
pub(crate) const PEER_STEP_COMPLAIN: u8 = 11;
pub(crate) const PEER_STEP_COMPLAINT_LIST: u8 = 13;
pub(crate) const PEER_STEP_REVEAL: u8 = 14;
pub(crate) const PEER_STEP_AUDIT: u8 = 17;
pub(crate) const PEER_STEP_TRANSCRIPT: u8 = 19;
pub(crate) const PEER_STEP_FINISH: u8 = 21;
pub(crate) const PEER_STEP_DONE: u8 = 22;

/// Copy the first 32 bytes of a slice into an array. Callers have already
/// bounds-checked the slice.
pub(crate) fn arr32(bytes: &[u8]) -> [u8; 32] {
	let mut out = [0u8; 32];
	out.copy_from_slice(&bytes[..32]);
	out
}

/// A clock source, injected so that engines never read ambient time
/// directly. The protocol only needs seconds since the Unix epoch.
pub trait Clock {
	/// Current time in seconds since the Unix epoch.
	fn now(&self) -> u64;
}

/// The system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> u64 {
		SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
	}
}

/// Validated session parameters: peer count, threshold and the freshness
/// window applied to message timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DkgParams {
	n: u8,
	t: u8,
	ts_epsilon: u64,
}

impl DkgParams {
	/// Create session parameters.
	///
	/// `ts_epsilon` is the freshness window in seconds: a message whose
	/// timestamp differs from the receiver's clock by more than this is
	/// rejected. Small local runs work with a few seconds; large
	/// deployments over slow transports may need much more.
	pub fn new(n: u8, t: u8, ts_epsilon: u64) -> DkgResult<Self> {
		validate_dkg_params(t, n)?;
		Ok(Self { n, t, ts_epsilon })
	}

	/// Total number of peers.
	pub fn peers(&self) -> u8 {
		self.n
	}

	/// Threshold needed to use the generated secret.
	pub fn threshold(&self) -> u8 {
		self.t
	}

	/// Freshness window in seconds.
	pub fn ts_epsilon(&self) -> u64 {
		self.ts_epsilon
	}
}

#[cfg(feature = "serde")]
impl Serialize for DkgParams {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		use serde::ser::SerializeStruct;
		let mut state = serializer.serialize_struct("DkgParams", 3)?;
		state.serialize_field("peers", &self.n)?;
		state.serialize_field("threshold", &self.t)?;
		state.serialize_field("ts_epsilon", &self.ts_epsilon)?;
		state.end()
	}
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for DkgParams {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		#[derive(Deserialize)]
		struct ParamsData {
			peers: u8,
			threshold: u8,
			ts_epsilon: u64,
		}
		let data = ParamsData::deserialize(deserializer)?;
		DkgParams::new(data.peers, data.threshold, data.ts_epsilon)
			.map_err(serde::de::Error::custom)
	}
}

// Wire sizes. Every step's input and output size is computable from the
// session parameters plus, late in the run, the complaint matrix.

pub(crate) fn bitset_bytes(n: u8) -> usize {
	(n as usize + 7) / 8
}

pub(crate) fn msg0_size() -> usize {
	HEADER_BYTES + TRANSCRIPT_BYTES + 2 + 32
}

pub(crate) fn msg1_size() -> usize {
	HEADER_BYTES + 64
}

pub(crate) fn msg2_size(n: u8) -> usize {
	HEADER_BYTES + n as usize * 64
}

pub(crate) fn msg3_size(t: u8) -> usize {
	HEADER_BYTES + t as usize * 32
}

pub(crate) fn msg4_size(n: u8, t: u8) -> usize {
	HEADER_BYTES + n as usize * t as usize * 32
}

pub(crate) fn hs_msg_size() -> usize {
	// Handshake messages one and two have equal size.
	HEADER_BYTES + HANDSHAKE1_BYTES
}

pub(crate) fn share_msg_size() -> usize {
	HEADER_BYTES + HANDSHAKE3_BYTES + WRAPPED_SHARE_BYTES
}

pub(crate) fn msg9_size(n: u8) -> usize {
	HEADER_BYTES + bitset_bytes(n)
}

pub(crate) fn msg10_size(n: u8) -> usize {
	HEADER_BYTES + n as usize * bitset_bytes(n)
}

/// Size of one reveal entry: the accuser's index and the channel key.
pub(crate) const REVEAL_ENTRY_BYTES: usize = 33;

pub(crate) fn msg11_size(reveal_count: usize) -> usize {
	HEADER_BYTES + reveal_count * REVEAL_ENTRY_BYTES
}

pub(crate) fn ack_size() -> usize {
	HEADER_BYTES
}

pub(crate) fn transcript_msg_size() -> usize {
	HEADER_BYTES + TRANSCRIPT_BYTES
}

/// Position of `recipient` within `sender`'s ordered list of the other
/// peers (both 1-based).
pub(crate) fn routed_rank(sender: u8, recipient: u8) -> usize {
	debug_assert_ne!(sender, recipient);
	if recipient < sender {
		recipient as usize - 1
	} else {
		recipient as usize - 2
	}
}

/// Read a complaint bit: does `accuser` accuse `accused`? Rows are indexed
/// by accuser, bits within a row by accused (both 1-based).
pub(crate) fn complaint_bit(matrix: &[u8], n: u8, accuser: u8, accused: u8) -> bool {
	let row = (accuser as usize - 1) * bitset_bytes(n);
	let idx = accused as usize - 1;
	matrix[row + idx / 8] & (1 << (idx % 8)) != 0
}

/// Set a complaint bit in a single row.
pub(crate) fn set_bit(row: &mut [u8], accused: u8) {
	let idx = accused as usize - 1;
	row[idx / 8] |= 1 << (idx % 8);
}

/// Check a share against a dealer's commitment row: g^s must equal the
/// commitment polynomial evaluated at the share index.
pub(crate) fn verify_share(commitment_row: &[RistrettoPoint], share: &Share) -> bool {
	let x = scalar_from_index(share.index());
	let mut acc = RistrettoPoint::identity();
	for c in commitment_row.iter().rev() {
		acc = acc * x + c;
	}
	RISTRETTO_BASEPOINT_POINT * share.value() == acc
}

/// Drive a TP and its peers to completion in process, relaying every
/// message faithfully. The peers must already have consumed the TP's
/// parameter broadcast during construction. Intended for tests and
/// examples; real deployments put a network between the engines instead.
pub fn run_local_dkg(tp: &mut TpState, peers: &mut [PeerState]) -> DkgResult<()> {
	// The first peer step consumes no input; peers were initialized from
	// the parameter broadcast already.
	let mut to_peers: Vec<u8> = Vec::new();
	loop {
		let mut from_peers = Vec::new();
		for (i, peer) in peers.iter_mut().enumerate() {
			let msg = tp.peer_msg(&to_peers, i as u8 + 1)?;
			from_peers.extend_from_slice(&peer.next(msg)?);
		}
		// Consume-only peer steps are followed by an emit-only step.
		while from_peers.is_empty()
			&& peers.iter().any(|p| p.not_done())
			&& peers.iter().all(|p| p.input_size() == 0)
		{
			for peer in peers.iter_mut() {
				from_peers.extend_from_slice(&peer.next(&[])?);
			}
		}
		if !tp.not_done() {
			break;
		}
		let mut out = tp.next(&from_peers)?;
		// Collection-only TP steps likewise pair with an emission step
		// that consumes nothing.
		while tp.not_done() && tp.input_size() == 0 {
			out = tp.next(&[])?;
		}
		to_peers = out;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_params_validation() {
		assert!(DkgParams::new(3, 2, 10).is_ok());
		assert!(DkgParams::new(3, 1, 10).is_err());
		assert!(DkgParams::new(2, 3, 10).is_err());
	}

	#[test]
	fn test_bitset_round_trip() {
		let n = 11u8;
		let mut matrix = vec![0u8; n as usize * bitset_bytes(n)];
		let row = bitset_bytes(n);
		set_bit(&mut matrix[2 * row..3 * row], 9);
		assert!(complaint_bit(&matrix, n, 3, 9));
		assert!(!complaint_bit(&matrix, n, 3, 10));
		assert!(!complaint_bit(&matrix, n, 4, 9));
	}

	#[test]
	fn test_routed_rank_is_dense() {
		let n = 5u8;
		for sender in 1..=n {
			let ranks: Vec<usize> =
				(1..=n).filter(|&r| r != sender).map(|r| routed_rank(sender, r)).collect();
			let expect: Vec<usize> = (0..n as usize - 1).collect();
			assert_eq!(ranks, expect);
		}
	}

	#[test]
	fn test_verify_share_accepts_honest_rejects_tampered() {
		use crate::group::random_scalar;
		use crate::sharing::eval_poly;
		use curve25519_dalek::scalar::Scalar;
		use rand::rngs::StdRng;
		use rand::SeedableRng;

		let mut rng = StdRng::from_seed([41u8; 32]);
		let coeffs: Vec<Scalar> = (0..3).map(|_| random_scalar(&mut rng)).collect();
		let row: Vec<RistrettoPoint> =
			coeffs.iter().map(|c| RISTRETTO_BASEPOINT_POINT * c).collect();

		let share =
			Share::new(4, eval_poly(&coeffs, &scalar_from_index(4))).unwrap();
		assert!(verify_share(&row, &share));

		let bad = Share::new(4, share.value() + Scalar::ONE).unwrap();
		assert!(!verify_share(&row, &bad));
	}
}
