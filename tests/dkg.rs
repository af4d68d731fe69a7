//! End-to-end DKG runs: the happy path, cheater attribution, and the
//! freshness window.

use ed25519_dalek::SigningKey;
use rand::rngs::StdRng;
use rand::SeedableRng;

use threshold_oprf::cheater::{CHEAT_FALSE_COMPLAINT, CHEAT_PROVEN, REVEAL_MSG_ERR};
use threshold_oprf::{
	reconstruct, run_local_dkg, Clock, DkgParams, Error, PeerState, Share, TpState,
};

const DST: &[u8] = b"threshold-oprf test suite";
const EPSILON: u64 = 3600;

struct FixedClock(u64);

impl Clock for FixedClock {
	fn now(&self) -> u64 {
		self.0
	}
}

fn longterm_keys(n: u8, seed: u8) -> Vec<SigningKey> {
	let mut rng = StdRng::from_seed([seed; 32]);
	(0..n).map(|_| SigningKey::generate(&mut rng)).collect()
}

/// Set up a TP and its peers, ready to run.
fn setup(n: u8, t: u8, seed: u8) -> (TpState, Vec<PeerState>) {
	let params = DkgParams::new(n, t, EPSILON).unwrap();
	let lt_keys = longterm_keys(n, seed);
	let lt_pks = lt_keys.iter().map(|k| k.verifying_key()).collect();
	let (tp, msg0) = TpState::new(&params, DST, lt_pks).unwrap();
	let peers = lt_keys
		.into_iter()
		.enumerate()
		.map(|(i, lt_sk)| PeerState::new(EPSILON, i as u8 + 1, lt_sk, &msg0).unwrap())
		.collect();
	(tp, peers)
}

/// Set up a TP and its peers with every clock frozen at `t0`.
fn setup_frozen(n: u8, t: u8, epsilon: u64, seed: u8, t0: u64) -> (TpState, Vec<PeerState>) {
	let params = DkgParams::new(n, t, epsilon).unwrap();
	let lt_keys = longterm_keys(n, seed);
	let lt_pks = lt_keys.iter().map(|k| k.verifying_key()).collect();
	let (tp, msg0) =
		TpState::with_clock(&params, DST, lt_pks, Box::new(FixedClock(t0))).unwrap();
	let peers = lt_keys
		.into_iter()
		.enumerate()
		.map(|(i, lt_sk)| {
			PeerState::with_clock(epsilon, i as u8 + 1, lt_sk, &msg0, Box::new(FixedClock(t0)))
				.unwrap()
		})
		.collect();
	(tp, peers)
}

fn final_shares(peers: &[PeerState]) -> Vec<Share> {
	peers.iter().map(|p| p.share().expect("peer finished").clone()).collect()
}

#[test]
fn test_happy_path_5_of_3() {
	let (mut tp, mut peers) = setup(5, 3, 10);
	run_local_dkg(&mut tp, &mut peers).unwrap();

	assert!(!tp.not_done());
	assert!(tp.succeeded(), "unexpected cheaters: {:?}", tp.cheaters());
	assert!(peers.iter().all(|p| !p.not_done()));

	// Every threshold subset of final shares interpolates to the same
	// group secret.
	let shares = final_shares(&peers);
	let secret = reconstruct(&shares[..3]).unwrap();
	assert_eq!(reconstruct(&shares[2..]).unwrap(), secret);
	assert_eq!(
		reconstruct(&[shares[0].clone(), shares[2].clone(), shares[4].clone()]).unwrap(),
		secret
	);

	// A common transcript on every participant.
	let digest = tp.transcript_digest();
	for peer in &peers {
		assert_eq!(peer.transcript_digest(), digest);
	}
}

#[test]
fn test_happy_path_minimal_session() {
	let (mut tp, mut peers) = setup(2, 2, 11);
	run_local_dkg(&mut tp, &mut peers).unwrap();
	assert!(tp.succeeded());

	let shares = final_shares(&peers);
	assert_eq!(shares.len(), 2);
	reconstruct(&shares).unwrap();
}

#[test]
fn test_corrupted_share_convicts_the_dealer() {
	let (mut tp, mut peers) = setup(5, 3, 12);
	// Peer 4 delivers a share to peer 2 whose value is off by one.
	peers[3].corrupt_share_for(2);
	run_local_dkg(&mut tp, &mut peers).unwrap();

	assert!(!tp.succeeded());
	let records = tp.cheaters();
	assert_eq!(records.len(), 1, "records: {:?}", records);
	let r = records[0];
	assert_eq!(r.step, 18);
	assert_eq!(r.code, CHEAT_PROVEN);
	assert_eq!(r.peer, 4);
	assert_eq!(r.other_peer, 2);

	// Honest participants still agree on the transcript.
	let digest = tp.transcript_digest();
	for peer in &peers {
		assert_eq!(peer.transcript_digest(), digest);
	}
}

#[test]
fn test_false_complaint_convicts_the_accuser() {
	let (mut tp, mut peers) = setup(5, 3, 13);
	// Peer 2 accuses honest peer 4.
	peers[1].force_complaint_against(4);
	run_local_dkg(&mut tp, &mut peers).unwrap();

	assert!(!tp.succeeded());
	let records = tp.cheaters();
	assert_eq!(records.len(), 1, "records: {:?}", records);
	let r = records[0];
	assert_eq!(r.step, 18);
	assert_eq!(r.code, CHEAT_FALSE_COMPLAINT);
	assert_eq!(r.peer, 2);
	assert_eq!(r.other_peer, 4);
}

#[test]
fn test_multiple_cheaters_all_recorded() {
	let (mut tp, mut peers) = setup(5, 3, 14);
	peers[0].corrupt_share_for(3);
	peers[4].force_complaint_against(1);
	run_local_dkg(&mut tp, &mut peers).unwrap();

	assert!(!tp.succeeded());
	// Peer 1 is convicted for the bad share to peer 3; peer 5's
	// complaint about peer 1's honest share to it is judged false.
	let codes: Vec<(u8, u8, u8)> =
		tp.cheaters().iter().map(|r| (r.code, r.peer, r.other_peer)).collect();
	assert!(codes.contains(&(CHEAT_PROVEN, 1, 3)), "records: {:?}", tp.cheaters());
	assert!(codes.contains(&(CHEAT_FALSE_COMPLAINT, 5, 1)), "records: {:?}", tp.cheaters());
}

#[test]
fn test_stale_parameter_broadcast_rejected() {
	let n = 3u8;
	let params = DkgParams::new(n, 2, 5).unwrap();
	let lt_keys = longterm_keys(n, 15);
	let lt_pks = lt_keys.iter().map(|k| k.verifying_key()).collect();
	let (_tp, msg0) =
		TpState::with_clock(&params, DST, lt_pks, Box::new(FixedClock(1_000_000))).unwrap();

	// A peer whose clock is far ahead of the message timestamp refuses
	// the session before any state exists.
	let lt_sk = lt_keys.into_iter().next().unwrap();
	let err = PeerState::with_clock(5, 1, lt_sk, &msg0, Box::new(FixedClock(1_000_100)))
		.unwrap_err();
	assert!(matches!(err, Error::MessageExpired { .. }));
}

#[test]
fn test_stale_key_announcements_rejected_mid_run() {
	let t0 = 1_000_000u64;
	let (mut tp, mut peers) = setup_frozen(3, 2, 5, 18, t0);

	let mut from_peers = Vec::new();
	for peer in peers.iter_mut() {
		from_peers.extend_from_slice(&peer.next(&[]).unwrap());
	}

	// The key announcements are replayed long after their timestamps;
	// the TP rejects them without consuming any state.
	tp.set_clock(Box::new(FixedClock(t0 + 100)));
	let err = tp.next(&from_peers).unwrap_err();
	assert!(matches!(err, Error::MessageExpired { .. }));

	// With the clock back inside the window the very same input is
	// accepted, and only then does the engine move on.
	tp.set_clock(Box::new(FixedClock(t0)));
	let msg2 = tp.next(&from_peers).unwrap();
	let err = tp.next(&from_peers).unwrap_err();
	assert!(matches!(err, Error::MessageType { .. }));
	peers[0].next(&msg2).unwrap();
}

#[test]
fn test_timestamp_regression_rejected_mid_run() {
	let t0 = 1_000_000u64;
	let (mut tp, mut peers) = setup_frozen(3, 2, EPSILON, 19, t0);

	let mut from_peers = Vec::new();
	for peer in peers.iter_mut() {
		from_peers.extend_from_slice(&peer.next(&[]).unwrap());
	}

	// The TP's clock runs backwards before the key-list broadcast, so
	// its timestamp regresses behind the parameter broadcast every peer
	// has already accepted. Well within the freshness window, but a
	// regression nonetheless.
	tp.set_clock(Box::new(FixedClock(t0 - 10)));
	let msg2 = tp.next(&from_peers).unwrap();
	let err = peers[0].next(&msg2).unwrap_err();
	assert!(matches!(err, Error::MessageExpired { .. }));

	// The rejection leaves the peer where it was: the same stale
	// broadcast is refused again instead of tripping a state error.
	let err = peers[0].next(&msg2).unwrap_err();
	assert!(matches!(err, Error::MessageExpired { .. }));
}

#[test]
fn test_stale_reveal_messages_recorded_against_senders() {
	let t0 = 1_000_000u64;
	let (mut tp, mut peers) = setup_frozen(3, 2, 5, 20, t0);

	// Six exchanges bring the session to the complaint broadcast: key
	// announcements, commitments, both handshake rounds, share
	// delivery, complaints.
	let mut to_peers: Vec<u8> = Vec::new();
	for _ in 0..6 {
		let mut from_peers = Vec::new();
		for (i, peer) in peers.iter_mut().enumerate() {
			let msg = tp.peer_msg(&to_peers, i as u8 + 1).unwrap();
			from_peers.extend_from_slice(&peer.next(msg).unwrap());
		}
		to_peers = tp.next(&from_peers).unwrap();
	}
	for (i, peer) in peers.iter_mut().enumerate() {
		let msg = tp.peer_msg(&to_peers, i as u8 + 1).unwrap();
		peer.next(msg).unwrap();
	}
	let mut reveals = Vec::new();
	for peer in peers.iter_mut() {
		reveals.extend_from_slice(&peer.next(&[]).unwrap());
	}

	// The reveal messages arrive outside the freshness window. Each one
	// is recorded against its sender and the run carries on to a failed
	// verdict instead of aborting.
	tp.set_clock(Box::new(FixedClock(t0 + 100)));
	tp.next(&reveals).unwrap();
	let records = tp.cheaters();
	assert_eq!(records.len(), 3, "records: {:?}", records);
	assert!(records.iter().all(|r| r.step == 15 && r.code == REVEAL_MSG_ERR + 5));
	assert_eq!(records.iter().map(|r| r.peer).collect::<Vec<_>>(), vec![1, 2, 3]);
}

#[test]
fn test_engines_reject_out_of_order_driving() {
	let (mut tp, mut peers) = setup(3, 2, 16);

	// The TP expects the peers' key announcements first; garbage sizes
	// are refused without advancing the engine.
	let err = tp.next(&[]).unwrap_err();
	assert!(matches!(err, Error::BufferSize { .. }));

	run_local_dkg(&mut tp, &mut peers).unwrap();
	assert!(tp.succeeded());

	// A finished engine refuses further driving.
	let err = tp.next(&[]).unwrap_err();
	assert!(matches!(err, Error::InvalidState { .. }));
	let err = peers[0].next(&[]).unwrap_err();
	assert!(matches!(err, Error::InvalidState { .. }));
}

#[test]
fn test_dkg_shares_evaluate_as_threshold_oprf_key() {
	use threshold_oprf::group::mul_point;
	use threshold_oprf::{oprf, partial_evaluate, threshold_combine, Partial};

	let (mut tp, mut peers) = setup(4, 2, 17);
	run_local_dkg(&mut tp, &mut peers).unwrap();
	assert!(tp.succeeded());

	let shares = final_shares(&peers);
	let secret = reconstruct(&shares[..2]).unwrap();

	// The distributed key evaluates like a dealer-generated one.
	let alpha = oprf::hash_to_group(b"distributed");
	let indexes = [1u8, 3];
	let partials: Vec<Partial> = [0usize, 2]
		.iter()
		.map(|&i| partial_evaluate(&shares[i], &alpha, &indexes).unwrap())
		.collect();
	assert_eq!(threshold_combine(&partials), mul_point(&secret, &alpha).unwrap());
}
