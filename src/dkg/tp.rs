//! Trusted-party DKG engine.
//!
//! The TP relays all traffic between the peers, re-broadcasts their
//! public material, aggregates complaints, forces key reveals, and
//! adjudicates every complaint against the recorded evidence. It never
//! holds a share in the clear: the pairwise channels pass through it
//! encrypted, and only a complaint makes one of them auditable.

use blake2::{Blake2b512, Digest};
use curve25519_dalek::ristretto::RistrettoPoint;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::channel::{self, HANDSHAKE3_BYTES};
use crate::cheater::{
	CheaterLedger, CheaterRecord, CHEAT_BAD_REVEAL, CHEAT_DECRYPT, CHEAT_FALSE_COMPLAINT,
	CHEAT_INDEX, CHEAT_MAC, CHEAT_NO_REVEAL, CHEAT_PROVEN, CHEAT_UNSOLICITED_REVEAL,
	REVEAL_MSG_ERR, SHARE_MSG_ERR,
};
use crate::error::{DkgResult, Error};
use crate::group::decode_point;
use crate::message::{self, Expect, Freshness, BROADCAST, HEADER_BYTES, SESSION_ID_BYTES, TP_ID};
use crate::sharing::Share;
use crate::transcript::{Transcript, TRANSCRIPT_BYTES};

use super::{
	ack_size, arr32, bitset_bytes, complaint_bit, hs_msg_size, msg10_size, msg11_size, msg1_size,
	msg2_size, msg3_size, msg4_size, msg9_size, routed_rank, set_bit, share_msg_size,
	transcript_msg_size, verify_share, Clock, DkgParams, SystemClock, MSG_COMMITMENTS,
	MSG_COMMITMENT_LIST, MSG_COMPLAINTS, MSG_COMPLAINT_LIST, MSG_DONE, MSG_HANDSHAKE1,
	MSG_HANDSHAKE2, MSG_KEY_LIST, MSG_PARAMS, MSG_PEER_KEYS, MSG_REVEAL, MSG_REVEAL_ACK,
	MSG_REVEAL_LIST, MSG_SHARE, MSG_TRANSCRIPT, MSG_TRANSCRIPT_CONFIRM, REVEAL_ENTRY_BYTES,
	TP_STEP_ADJUDICATE, TP_STEP_COLLECT_REVEALS, TP_STEP_COMMITMENTS, TP_STEP_COMPLAINTS,
	TP_STEP_CONFIRM, TP_STEP_DONE, TP_STEP_KEYS, TP_STEP_PUBLISH_REVEALS, TP_STEP_ROUTE_HS1,
	TP_STEP_ROUTE_HS2, TP_STEP_ROUTE_SHARES,
};

/// How the last produced output maps onto per-peer messages.
enum OutLayout {
	/// Every peer receives the whole output.
	Broadcast(usize),
	/// Peer i receives its own (offset, length) slice.
	PerPeer(Vec<(usize, usize)>),
}

/// The trusted party's protocol engine.
pub struct TpState {
	step: u8,
	prev: u8,
	session_id: [u8; SESSION_ID_BYTES],
	n: u8,
	t: u8,
	ts_epsilon: u64,
	clock: Box<dyn Clock>,
	sig_sk: SigningKey,
	/// Last accepted timestamp per peer.
	last_ts: Vec<u64>,
	peer_lt_pks: Vec<VerifyingKey>,
	peer_sig_pks: Vec<VerifyingKey>,
	/// Commitment matrix, dealer-major: row i holds dealer i's t points.
	commitments: Vec<RistrettoPoint>,
	/// Recorded share-delivery messages, indexed sender-major by
	/// (sender − 1) · n + recipient − 1. Kept solely as audit evidence.
	share_msgs: Vec<Vec<u8>>,
	complaint_matrix: Vec<u8>,
	/// Raw reveal messages, one per peer, validated during adjudication.
	reveal_msgs: Vec<Vec<u8>>,
	cheaters: CheaterLedger,
	transcript: Transcript,
	out_layout: OutLayout,
}

impl TpState {
	/// Open a session: generate the session id and session signing key
	/// and produce the parameter broadcast for the peers.
	///
	/// `dst` is an application-chosen domain-separation tag; its hash is
	/// broadcast so every peer binds its transcript to the same
	/// application. `peer_lt_pks` fixes the peer indices: the key at
	/// position i − 1 belongs to peer i.
	pub fn new(
		params: &DkgParams,
		dst: &[u8],
		peer_lt_pks: Vec<VerifyingKey>,
	) -> DkgResult<(Self, Vec<u8>)> {
		Self::with_clock(params, dst, peer_lt_pks, Box::new(SystemClock))
	}

	/// [`TpState::new`] with a caller-provided randomness seed instead of
	/// OS entropy. Deterministic; for tests.
	pub fn seeded(
		params: &DkgParams,
		dst: &[u8],
		peer_lt_pks: Vec<VerifyingKey>,
		seed: [u8; 32],
	) -> DkgResult<(Self, Vec<u8>)> {
		Self::init(params, dst, peer_lt_pks, Box::new(SystemClock), StdRng::from_seed(seed))
	}

	/// [`TpState::new`] with an explicit clock source.
	pub fn with_clock(
		params: &DkgParams,
		dst: &[u8],
		peer_lt_pks: Vec<VerifyingKey>,
		clock: Box<dyn Clock>,
	) -> DkgResult<(Self, Vec<u8>)> {
		Self::init(params, dst, peer_lt_pks, clock, StdRng::from_entropy())
	}

	fn init(
		params: &DkgParams,
		dst: &[u8],
		peer_lt_pks: Vec<VerifyingKey>,
		clock: Box<dyn Clock>,
		mut rng: StdRng,
	) -> DkgResult<(Self, Vec<u8>)> {
		let n = params.peers();
		let t = params.threshold();
		if peer_lt_pks.len() != n as usize {
			return Err(Error::InvalidParameters {
				threshold: t,
				peers: n,
				reason: "one long-term key per peer required",
			});
		}

		let mut session_id = [0u8; SESSION_ID_BYTES];
		rng.fill_bytes(&mut session_id);
		let sig_sk = SigningKey::generate(&mut rng);

		let mut payload = Vec::with_capacity(TRANSCRIPT_BYTES + 2 + 32);
		let mut dst_hash = Blake2b512::new();
		dst_hash.update(dst);
		payload.extend_from_slice(&dst_hash.finalize());
		payload.push(n);
		payload.push(t);
		payload.extend_from_slice(sig_sk.verifying_key().as_bytes());
		let msg0 = message::seal(
			MSG_PARAMS,
			TP_ID,
			BROADCAST,
			clock.now(),
			&session_id,
			&payload,
			&sig_sk,
		);

		let mut transcript = Transcript::new();
		transcript.absorb(&msg0);

		let nn = n as usize;
		let capacity = t as usize * t as usize - 1;
		let state = Self {
			step: TP_STEP_KEYS,
			prev: 0,
			session_id,
			n,
			t,
			ts_epsilon: params.ts_epsilon(),
			clock,
			sig_sk,
			last_ts: vec![0u64; nn],
			peer_lt_pks,
			peer_sig_pks: Vec::new(),
			commitments: Vec::new(),
			share_msgs: vec![Vec::new(); nn * nn],
			complaint_matrix: Vec::new(),
			reveal_msgs: Vec::new(),
			cheaters: CheaterLedger::new(capacity),
			transcript,
			out_layout: OutLayout::Broadcast(0),
		};
		Ok((state, msg0))
	}

	/// Total number of peers in the session.
	pub fn peers(&self) -> u8 {
		self.n
	}

	/// Threshold of the generated sharing.
	pub fn threshold(&self) -> u8 {
		self.t
	}

	/// Whether more [`TpState::next`] calls are outstanding.
	pub fn not_done(&self) -> bool {
		self.step < TP_STEP_DONE
	}

	/// All protocol violations recorded so far.
	pub fn cheaters(&self) -> &[CheaterRecord] {
		self.cheaters.records()
	}

	/// Whether violations were dropped because the ledger was full.
	pub fn ledger_overflowed(&self) -> bool {
		self.cheaters.overflowed()
	}

	/// Whether the completed run produced usable shares: the protocol
	/// finished with an empty, non-overflowed ledger.
	pub fn succeeded(&self) -> bool {
		!self.not_done() && self.cheaters.is_empty() && !self.cheaters.overflowed()
	}

	/// The TP's transcript digest over all broadcast material so far.
	pub fn transcript_digest(&self) -> [u8; TRANSCRIPT_BYTES] {
		self.transcript.digest()
	}

	/// Total bytes of peer output expected for the current step: the
	/// concatenation, in peer order, of every peer's message.
	pub fn input_size(&self) -> usize {
		self.input_sizes().0.iter().sum()
	}

	/// Expected inbound byte count per peer, and whether all peers send
	/// the same amount.
	pub fn input_sizes(&self) -> (Vec<usize>, bool) {
		let n = self.n as usize;
		let uniform = |size: usize| (vec![size; n], true);
		match self.step {
			TP_STEP_KEYS => uniform(msg1_size()),
			TP_STEP_COMMITMENTS => uniform(msg3_size(self.t)),
			TP_STEP_ROUTE_HS1 | TP_STEP_ROUTE_HS2 => uniform((n - 1) * hs_msg_size()),
			TP_STEP_ROUTE_SHARES => uniform((n - 1) * share_msg_size()),
			TP_STEP_COMPLAINTS => uniform(msg9_size(self.n)),
			TP_STEP_COLLECT_REVEALS => {
				let sizes: Vec<usize> =
					(1..=self.n).map(|i| msg11_size(self.reveals_expected_from(i))).collect();
				let all_equal = sizes.windows(2).all(|w| w[0] == w[1]);
				(sizes, all_equal)
			},
			TP_STEP_PUBLISH_REVEALS => uniform(0),
			TP_STEP_ADJUDICATE => uniform(ack_size()),
			TP_STEP_CONFIRM => uniform(transcript_msg_size()),
			_ => uniform(0),
		}
	}

	/// Bytes of output the next [`TpState::next`] call will produce.
	pub fn output_size(&self) -> usize {
		let n = self.n as usize;
		match self.step {
			TP_STEP_KEYS => msg2_size(self.n),
			TP_STEP_COMMITMENTS => msg4_size(self.n, self.t),
			TP_STEP_ROUTE_HS1 | TP_STEP_ROUTE_HS2 => n * (n - 1) * hs_msg_size(),
			TP_STEP_ROUTE_SHARES => n * (n - 1) * share_msg_size(),
			TP_STEP_COMPLAINTS => msg10_size(self.n),
			TP_STEP_COLLECT_REVEALS => 0,
			TP_STEP_PUBLISH_REVEALS => HEADER_BYTES + self.reveal_list_size(),
			TP_STEP_ADJUDICATE => transcript_msg_size(),
			TP_STEP_CONFIRM => ack_size(),
			_ => 0,
		}
	}

	/// Execute the current step. `input` must hold exactly
	/// [`TpState::input_size`] bytes: the peers' messages for this step,
	/// concatenated in peer order.
	pub fn next(&mut self, input: &[u8]) -> DkgResult<Vec<u8>> {
		if !self.not_done() {
			return Err(Error::InvalidState { current: self.step, expected: self.prev });
		}
		let expected = self.input_size();
		if input.len() != expected {
			return Err(Error::BufferSize { expected, actual: input.len() });
		}
		let out = match self.step {
			TP_STEP_KEYS => self.step_keys(input),
			TP_STEP_COMMITMENTS => self.step_commitments(input),
			TP_STEP_ROUTE_HS1 => self.step_route(input, MSG_HANDSHAKE1, hs_msg_size()),
			TP_STEP_ROUTE_HS2 => self.step_route(input, MSG_HANDSHAKE2, hs_msg_size()),
			TP_STEP_ROUTE_SHARES => self.step_route(input, MSG_SHARE, share_msg_size()),
			TP_STEP_COMPLAINTS => self.step_complaints(input),
			TP_STEP_COLLECT_REVEALS => self.step_collect_reveals(input),
			TP_STEP_PUBLISH_REVEALS => self.step_publish_reveals(),
			TP_STEP_ADJUDICATE => self.step_adjudicate(input),
			TP_STEP_CONFIRM => self.step_confirm(input),
			step => return Err(Error::InvalidState { current: step, expected: TP_STEP_KEYS }),
		}?;
		self.prev = self.step;
		self.step = match self.step {
			TP_STEP_KEYS => TP_STEP_COMMITMENTS,
			TP_STEP_COMMITMENTS => TP_STEP_ROUTE_HS1,
			TP_STEP_ROUTE_HS1 => TP_STEP_ROUTE_HS2,
			TP_STEP_ROUTE_HS2 => TP_STEP_ROUTE_SHARES,
			TP_STEP_ROUTE_SHARES => TP_STEP_COMPLAINTS,
			TP_STEP_COMPLAINTS => TP_STEP_COLLECT_REVEALS,
			TP_STEP_COLLECT_REVEALS => TP_STEP_PUBLISH_REVEALS,
			TP_STEP_PUBLISH_REVEALS => TP_STEP_ADJUDICATE,
			TP_STEP_ADJUDICATE => TP_STEP_CONFIRM,
			_ => TP_STEP_DONE,
		};
		Ok(out)
	}

	/// Slice the last produced output into the message for one peer.
	pub fn peer_msg<'a>(&self, base: &'a [u8], peer: u8) -> DkgResult<&'a [u8]> {
		if peer == 0 || peer > self.n {
			return Err(Error::PeerIndex { index: peer, max: self.n });
		}
		match &self.out_layout {
			OutLayout::Broadcast(len) => {
				if base.len() != *len {
					return Err(Error::BufferSize { expected: *len, actual: base.len() });
				}
				Ok(base)
			},
			OutLayout::PerPeer(slices) => {
				let total: usize = slices.iter().map(|(_, len)| len).sum();
				if base.len() != total {
					return Err(Error::BufferSize { expected: total, actual: base.len() });
				}
				let (offset, len) = slices[peer as usize - 1];
				Ok(&base[offset..offset + len])
			},
		}
	}

	// ------------------------------------------------------------------
	// Step handlers
	// ------------------------------------------------------------------

	/// Collect every peer's session keys and re-broadcast the list.
	fn step_keys(&mut self, input: &[u8]) -> DkgResult<Vec<u8>> {
		let mut list = Vec::with_capacity(self.n as usize * 64);
		for i in 1..=self.n {
			let frame = per_peer_frame(input, i, msg1_size());
			let payload = self.open_peer(frame, MSG_PEER_KEYS, i, true)?;
			let sig_pk = VerifyingKey::from_bytes(&arr32(&payload[..32]))
				.map_err(|_| Error::Signature { peer: i })?;
			self.peer_sig_pks.push(sig_pk);
			list.extend_from_slice(payload);
		}
		Ok(self.broadcast(MSG_KEY_LIST, &list))
	}

	/// Collect every peer's commitment vector and re-broadcast the
	/// matrix.
	fn step_commitments(&mut self, input: &[u8]) -> DkgResult<Vec<u8>> {
		let mut matrix = Vec::with_capacity(self.n as usize * self.t as usize * 32);
		for i in 1..=self.n {
			let frame = per_peer_frame(input, i, msg3_size(self.t));
			let payload = self.open_peer(frame, MSG_COMMITMENTS, i, false)?.to_vec();
			for chunk in payload.chunks_exact(32) {
				self.commitments.push(decode_point(&arr32(chunk))?);
			}
			matrix.extend_from_slice(&payload);
		}
		Ok(self.broadcast(MSG_COMMITMENT_LIST, &matrix))
	}

	/// Re-order a batch of peer-to-peer messages from sender-major to
	/// recipient-major and pass them through unchanged. Invalid frames
	/// are recorded against their sender but still forwarded: the
	/// recipient reaches the same verdict and the complaint machinery
	/// attributes the failure.
	fn step_route(&mut self, input: &[u8], msg_type: u8, size: usize) -> DkgResult<Vec<u8>> {
		let n = self.n;
		let per = n as usize - 1;
		let store = msg_type == MSG_SHARE;
		for i in 1..=n {
			for j in (1..=n).filter(|&j| j != i) {
				let slot = (i as usize - 1) * per + routed_rank(i, j);
				let frame = &input[slot * size..(slot + 1) * size];
				if store {
					self.share_msgs[(i as usize - 1) * n as usize + (j as usize - 1)] =
						frame.to_vec();
				}
				let expect =
					Expect { msg_type, from: i, to: j, session_id: self.session_id };
				let now = self.clock.now();
				let fresh = Freshness {
					now,
					epsilon: self.ts_epsilon,
					last_ts: &mut self.last_ts[i as usize - 1],
				};
				if let Err(e) =
					message::open(frame, &expect, Some(fresh), &self.peer_sig_pks[i as usize - 1])
				{
					let code = e.recv_code().unwrap_or(6);
					let code = if store { SHARE_MSG_ERR + code } else { code };
					self.cheaters.record_reported(self.step, code, i, j);
				}
			}
		}

		let mut out = Vec::with_capacity(input.len());
		let mut layout = Vec::with_capacity(n as usize);
		for j in 1..=n {
			let start = out.len();
			for i in (1..=n).filter(|&i| i != j) {
				let slot = (i as usize - 1) * per + routed_rank(i, j);
				out.extend_from_slice(&input[slot * size..(slot + 1) * size]);
			}
			layout.push((start, out.len() - start));
		}
		self.out_layout = OutLayout::PerPeer(layout);
		Ok(out)
	}

	/// Aggregate the complaint bitsets and re-broadcast the matrix.
	fn step_complaints(&mut self, input: &[u8]) -> DkgResult<Vec<u8>> {
		let row_len = bitset_bytes(self.n);
		let mut matrix = vec![0u8; self.n as usize * row_len];
		for i in 1..=self.n {
			let frame = per_peer_frame(input, i, msg9_size(self.n));
			let payload = self.open_peer(frame, MSG_COMPLAINTS, i, false)?.to_vec();
			let row = &mut matrix[(i as usize - 1) * row_len..i as usize * row_len];
			for j in (1..=self.n).filter(|&j| j != i) {
				let idx = j as usize - 1;
				if payload[idx / 8] & (1 << (idx % 8)) != 0 {
					set_bit(row, j);
				}
			}
		}
		self.complaint_matrix = matrix.clone();
		Ok(self.broadcast(MSG_COMPLAINT_LIST, &matrix))
	}

	/// Store every peer's reveal message, validating framing and
	/// freshness on receipt. A failure indicts the sender instead of
	/// aborting the run, and the frame is kept regardless so the
	/// published reveal list stays aligned across participants.
	fn step_collect_reveals(&mut self, input: &[u8]) -> DkgResult<Vec<u8>> {
		let (sizes, _) = self.input_sizes();
		let mut offset = 0;
		for (idx, size) in sizes.into_iter().enumerate() {
			let i = idx as u8 + 1;
			let frame = &input[offset..offset + size];
			offset += size;
			let expect = Expect {
				msg_type: MSG_REVEAL,
				from: i,
				to: TP_ID,
				session_id: self.session_id,
			};
			let now = self.clock.now();
			let fresh = Freshness {
				now,
				epsilon: self.ts_epsilon,
				last_ts: &mut self.last_ts[idx],
			};
			if let Err(e) = message::open(frame, &expect, Some(fresh), &self.peer_sig_pks[idx]) {
				let code = REVEAL_MSG_ERR + e.recv_code().unwrap_or(6);
				self.cheaters.record(self.step, code, i);
			}
			self.reveal_msgs.push(frame.to_vec());
		}
		self.out_layout = OutLayout::Broadcast(0);
		Ok(Vec::new())
	}

	/// Publish every reveal message together with the recorded
	/// share-delivery message for each complained-about pair, so the
	/// peers can run the same audit the TP runs.
	fn step_publish_reveals(&mut self) -> DkgResult<Vec<u8>> {
		let mut payload = Vec::with_capacity(self.reveal_list_size());
		for frame in &self.reveal_msgs {
			payload.extend_from_slice(frame);
		}
		for (accused, accuser) in self.complaint_pairs() {
			let idx = (accused as usize - 1) * self.n as usize + (accuser as usize - 1);
			payload.extend_from_slice(&self.share_msgs[idx]);
		}
		Ok(self.broadcast(MSG_REVEAL_LIST, &payload))
	}

	/// Collect the audit acknowledgements, judge every complaint against
	/// the revealed keys and the recorded evidence, and broadcast the
	/// final transcript digest.
	fn step_adjudicate(&mut self, input: &[u8]) -> DkgResult<Vec<u8>> {
		for i in 1..=self.n {
			let frame = per_peer_frame(input, i, ack_size());
			self.open_peer(frame, MSG_REVEAL_ACK, i, false)?;
		}
		self.judge_complaints();
		let digest = self.transcript.digest();
		Ok(self.broadcast_unrecorded(MSG_TRANSCRIPT, &digest))
	}

	/// Check every peer's transcript digest against the TP's own and
	/// close the session.
	fn step_confirm(&mut self, input: &[u8]) -> DkgResult<Vec<u8>> {
		let digest = self.transcript.digest();
		for i in 1..=self.n {
			let frame = per_peer_frame(input, i, transcript_msg_size());
			let payload = self.open_peer(frame, MSG_TRANSCRIPT_CONFIRM, i, false)?;
			if payload != &digest[..] {
				return Err(Error::TranscriptMismatch { peer: i });
			}
		}
		Ok(self.broadcast_unrecorded(MSG_DONE, &[]))
	}

	// ------------------------------------------------------------------
	// Adjudication
	// ------------------------------------------------------------------

	/// The step-18 verdicts. Every complained-about pair must have been
	/// answered with a key reveal; each reveal, already framing- and
	/// freshness-checked on receipt, is re-verified here and then checked
	/// against the recorded share-delivery message and the accused
	/// dealer's commitments.
	fn judge_complaints(&mut self) {
		let n = self.n as usize;
		let step = self.step;
		let mut keys: Vec<Option<[u8; 32]>> = vec![None; n * n];

		let reveal_msgs = std::mem::take(&mut self.reveal_msgs);
		for (idx, frame) in reveal_msgs.iter().enumerate() {
			let i = idx as u8 + 1;
			let expect = Expect {
				msg_type: MSG_REVEAL,
				from: i,
				to: TP_ID,
				session_id: self.session_id,
			};
			let entries = match message::open(
				frame,
				&expect,
				None,
				&self.peer_sig_pks[idx],
			) {
				Ok(p) => p,
				Err(e) => {
					let code = REVEAL_MSG_ERR + e.recv_code().unwrap_or(6);
					self.cheaters.record(step, code, i);
					continue;
				},
			};
			for entry in entries.chunks_exact(REVEAL_ENTRY_BYTES) {
				let accuser = entry[0];
				if accuser == 0 || accuser > self.n || accuser == i {
					self.cheaters.record(step, CHEAT_BAD_REVEAL, i);
					continue;
				}
				if !complaint_bit(&self.complaint_matrix, self.n, accuser, i) {
					self.cheaters.record_reported(step, CHEAT_UNSOLICITED_REVEAL, i, accuser);
					continue;
				}
				let slot = (i as usize - 1) * n + (accuser as usize - 1);
				if keys[slot].is_some() {
					self.cheaters.record(step, CHEAT_BAD_REVEAL, i);
					continue;
				}
				keys[slot] = Some(arr32(&entry[1..]));
			}
		}
		self.reveal_msgs = reveal_msgs;

		for (accused, accuser) in self.complaint_pairs() {
			let key = match keys[(accused as usize - 1) * n + (accuser as usize - 1)] {
				Some(k) => k,
				None => {
					self.cheaters.record_reported(step, CHEAT_NO_REVEAL, accused, accuser);
					continue;
				},
			};
			let frame = &self.share_msgs[(accused as usize - 1) * n + (accuser as usize - 1)];
			let expect = Expect {
				msg_type: MSG_SHARE,
				from: accused,
				to: accuser,
				session_id: self.session_id,
			};
			let payload = match message::open(
				frame,
				&expect,
				None,
				&self.peer_sig_pks[accused as usize - 1],
			) {
				Ok(p) => p,
				Err(e) => {
					let code = SHARE_MSG_ERR + e.recv_code().unwrap_or(6);
					self.cheaters.record_reported(step, code, accused, accuser);
					continue;
				},
			};
			let wrapped = &payload[HANDSHAKE3_BYTES..];
			let share = match channel::unwrap_share(&key, wrapped) {
				Ok(s) => s,
				Err(Error::MacMismatch) => {
					self.cheaters.record_reported(step, CHEAT_MAC, accused, accuser);
					continue;
				},
				Err(Error::Domain { .. }) => {
					self.cheaters.record_index(step, CHEAT_INDEX, accused, accuser, 0);
					continue;
				},
				Err(_) => {
					self.cheaters.record_reported(step, CHEAT_DECRYPT, accused, accuser);
					continue;
				},
			};
			if share.index() != accuser {
				self.cheaters.record_index(step, CHEAT_INDEX, accused, accuser, share.index());
				continue;
			}
			if self.share_matches_commitments(accused, &share) {
				self.cheaters.record_reported(step, CHEAT_FALSE_COMPLAINT, accuser, accused);
			} else {
				self.cheaters.record_reported(step, CHEAT_PROVEN, accused, accuser);
			}
		}
	}

	fn share_matches_commitments(&self, dealer: u8, share: &Share) -> bool {
		let t = self.t as usize;
		let row = &self.commitments[(dealer as usize - 1) * t..dealer as usize * t];
		verify_share(row, share)
	}

	// ------------------------------------------------------------------
	// Helpers
	// ------------------------------------------------------------------

	fn broadcast(&mut self, msg_type: u8, payload: &[u8]) -> Vec<u8> {
		let msg = self.broadcast_unrecorded(msg_type, payload);
		self.transcript.absorb(&msg);
		msg
	}

	/// A broadcast that does not enter the transcript: the transcript
	/// digest itself and the closing acknowledgement.
	fn broadcast_unrecorded(&mut self, msg_type: u8, payload: &[u8]) -> Vec<u8> {
		let msg = message::seal(
			msg_type,
			TP_ID,
			BROADCAST,
			self.clock.now(),
			&self.session_id,
			payload,
			&self.sig_sk,
		);
		self.out_layout = OutLayout::Broadcast(msg.len());
		msg
	}

	fn open_peer<'a>(
		&mut self,
		bytes: &'a [u8],
		msg_type: u8,
		from: u8,
		longterm: bool,
	) -> DkgResult<&'a [u8]> {
		let expect = Expect { msg_type, from, to: TP_ID, session_id: self.session_id };
		let now = self.clock.now();
		let vk = if longterm {
			self.peer_lt_pks[from as usize - 1]
		} else {
			self.peer_sig_pks[from as usize - 1]
		};
		let fresh = Freshness {
			now,
			epsilon: self.ts_epsilon,
			last_ts: &mut self.last_ts[from as usize - 1],
		};
		message::open(bytes, &expect, Some(fresh), &vk)
	}

	fn reveals_expected_from(&self, peer: u8) -> usize {
		if self.complaint_matrix.is_empty() {
			return 0;
		}
		(1..=self.n)
			.filter(|&a| a != peer && complaint_bit(&self.complaint_matrix, self.n, a, peer))
			.count()
	}

	/// Complained-about pairs in canonical audit order: by accused, then
	/// by accuser.
	fn complaint_pairs(&self) -> Vec<(u8, u8)> {
		let mut pairs = Vec::new();
		if self.complaint_matrix.is_empty() {
			return pairs;
		}
		for accused in 1..=self.n {
			for accuser in 1..=self.n {
				if accuser != accused
					&& complaint_bit(&self.complaint_matrix, self.n, accuser, accused)
				{
					pairs.push((accused, accuser));
				}
			}
		}
		pairs
	}

	fn reveal_list_size(&self) -> usize {
		let reveals: usize =
			(1..=self.n).map(|i| msg11_size(self.reveals_expected_from(i))).sum();
		reveals + self.complaint_pairs().len() * share_msg_size()
	}

	#[doc(hidden)]
	pub fn set_clock(&mut self, clock: Box<dyn Clock>) {
		self.clock = clock;
	}
}

/// The i-th peer's frame within an input of uniformly sized messages.
fn per_peer_frame(input: &[u8], peer: u8, size: usize) -> &[u8] {
	&input[(peer as usize - 1) * size..peer as usize * size]
}

impl core::fmt::Debug for TpState {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("TpState")
			.field("n", &self.n)
			.field("t", &self.t)
			.field("step", &self.step)
			.field("cheaters", &self.cheaters.len())
			.finish_non_exhaustive()
	}
}
