//! Peer-side DKG engine.
//!
//! A peer mirrors the trusted party's schedule: it consumes the TP's
//! output for the current step, performs its local computation, and emits
//! its messages for the step back to the TP. All networking is left to
//! the caller, which sizes its reads with [`PeerState::input_size`],
//! drives the engine with [`PeerState::next`] until
//! [`PeerState::not_done`] reports false, and then takes the final share
//! from [`PeerState::share`].

use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::StdRng;
use rand::SeedableRng;
use x25519_dalek::{PublicKey as NoisePublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::channel::{
	self, ChannelInitiator, ChannelResponder, SessionKey, HANDSHAKE2_BYTES, HANDSHAKE3_BYTES,
	WRAPPED_SHARE_BYTES,
};
use crate::error::{validate_dkg_params, DkgResult, Error};
use crate::group::{decode_point, encode_point, random_scalar, scalar_from_index};
use crate::message::{self, Expect, Freshness, BROADCAST, HEADER_BYTES, TP_ID};
use crate::sharing::{eval_poly, Share};
use crate::transcript::{Transcript, TRANSCRIPT_BYTES};

use super::{
	ack_size, arr32, bitset_bytes, complaint_bit, hs_msg_size, msg0_size, msg10_size, msg11_size,
	msg1_size, msg2_size, msg3_size, msg4_size, msg9_size, set_bit, share_msg_size,
	transcript_msg_size, verify_share, Clock, SystemClock, MSG_COMMITMENTS, MSG_COMMITMENT_LIST,
	MSG_COMPLAINTS, MSG_COMPLAINT_LIST, MSG_DONE, MSG_HANDSHAKE1, MSG_HANDSHAKE2, MSG_KEY_LIST,
	MSG_PARAMS, MSG_PEER_KEYS, MSG_REVEAL, MSG_REVEAL_ACK, MSG_REVEAL_LIST, MSG_SHARE,
	MSG_TRANSCRIPT, MSG_TRANSCRIPT_CONFIRM, PEER_STEP_AUDIT, PEER_STEP_COMMIT,
	PEER_STEP_COMPLAIN, PEER_STEP_COMPLAINT_LIST, PEER_STEP_DONE, PEER_STEP_ENROLL,
	PEER_STEP_FINISH, PEER_STEP_HS1, PEER_STEP_HS2, PEER_STEP_REVEAL, PEER_STEP_SHARES,
	PEER_STEP_TRANSCRIPT, REVEAL_ENTRY_BYTES,
};

/// One peer's protocol engine.
pub struct PeerState {
	step: u8,
	prev: u8,
	session_id: [u8; 32],
	n: u8,
	t: u8,
	index: u8,
	ts_epsilon: u64,
	clock: Box<dyn Clock>,
	rng: StdRng,
	lt_sk: SigningKey,
	sig_sk: SigningKey,
	noise_sk: StaticSecret,
	tp_sig_pk: VerifyingKey,
	/// Last accepted timestamp per sender; slot 0 is the TP.
	last_ts: Vec<u64>,
	peer_sig_pks: Vec<VerifyingKey>,
	peer_noise_pks: Vec<[u8; 32]>,
	/// Own polynomial coefficients, constant term first. Zeroized once
	/// every dealt share has been computed.
	poly: Vec<Scalar>,
	/// Commitment matrix, dealer-major: row i holds dealer i's t points.
	commitments: Vec<RistrettoPoint>,
	outgoing: Vec<Option<ChannelInitiator>>,
	incoming: Vec<Option<ChannelResponder>>,
	/// Send keys of the outbound channels, kept for forced reveals.
	send_keys: Vec<Option<SessionKey>>,
	/// Shares received from each dealer, own contribution included.
	received: Vec<Option<Share>>,
	my_complaints: Vec<bool>,
	complaint_matrix: Vec<u8>,
	qualified: Vec<bool>,
	transcript: Transcript,
	final_share: Option<Share>,
	corrupt_victim: Option<u8>,
	forced_complaint: Option<u8>,
}

impl PeerState {
	/// Initialize a peer from the TP's parameter broadcast.
	///
	/// `index` is this peer's 1-based position, matching the order of the
	/// long-term keys registered with the TP. The parameter broadcast is
	/// self-certifying: it announces the TP's session signing key and is
	/// signed with it.
	pub fn new(ts_epsilon: u64, index: u8, lt_sk: SigningKey, msg0: &[u8]) -> DkgResult<Self> {
		Self::with_clock(ts_epsilon, index, lt_sk, msg0, Box::new(SystemClock))
	}

	/// [`PeerState::new`] with a caller-provided randomness seed instead
	/// of OS entropy. Deterministic; for tests.
	pub fn seeded(
		ts_epsilon: u64,
		index: u8,
		lt_sk: SigningKey,
		msg0: &[u8],
		seed: [u8; 32],
	) -> DkgResult<Self> {
		Self::init(ts_epsilon, index, lt_sk, msg0, Box::new(SystemClock), StdRng::from_seed(seed))
	}

	/// [`PeerState::new`] with an explicit clock source.
	pub fn with_clock(
		ts_epsilon: u64,
		index: u8,
		lt_sk: SigningKey,
		msg0: &[u8],
		clock: Box<dyn Clock>,
	) -> DkgResult<Self> {
		Self::init(ts_epsilon, index, lt_sk, msg0, clock, StdRng::from_entropy())
	}

	fn init(
		ts_epsilon: u64,
		index: u8,
		lt_sk: SigningKey,
		msg0: &[u8],
		clock: Box<dyn Clock>,
		mut rng: StdRng,
	) -> DkgResult<Self> {
		let raw = message::parse(msg0)?;
		if msg0.len() != msg0_size() {
			return Err(Error::MessageLength { expected: msg0_size(), actual: msg0.len() });
		}
		if raw.msg_type != MSG_PARAMS {
			return Err(Error::MessageType { expected: MSG_PARAMS, actual: raw.msg_type });
		}
		if raw.from != TP_ID {
			return Err(Error::MessageSender { expected: TP_ID, actual: raw.from });
		}
		if raw.to != BROADCAST {
			return Err(Error::MessageRecipient { expected: BROADCAST, actual: raw.to });
		}
		let now = clock.now();
		if now.abs_diff(raw.ts) > ts_epsilon {
			return Err(Error::MessageExpired { ts: raw.ts, now });
		}

		let payload = raw.payload;
		let n = payload[TRANSCRIPT_BYTES];
		let t = payload[TRANSCRIPT_BYTES + 1];
		validate_dkg_params(t, n)?;
		if index == 0 || index > n {
			return Err(Error::PeerIndex { index, max: n });
		}
		let tp_sig_pk = VerifyingKey::from_bytes(&arr32(&payload[TRANSCRIPT_BYTES + 2..]))
			.map_err(|_| Error::Signature { peer: TP_ID })?;
		message::verify_sig(msg0, &raw.session_id, &tp_sig_pk, TP_ID)?;

		let sig_sk = SigningKey::generate(&mut rng);
		let noise_sk = StaticSecret::random_from_rng(&mut rng);

		let mut transcript = Transcript::new();
		transcript.absorb(msg0);

		let mut last_ts = vec![0u64; n as usize + 1];
		last_ts[TP_ID as usize] = raw.ts;

		let nn = n as usize;
		Ok(Self {
			step: PEER_STEP_ENROLL,
			prev: 0,
			session_id: raw.session_id,
			n,
			t,
			index,
			ts_epsilon,
			clock,
			rng,
			lt_sk,
			sig_sk,
			noise_sk,
			tp_sig_pk,
			last_ts,
			peer_sig_pks: Vec::new(),
			peer_noise_pks: Vec::new(),
			poly: Vec::new(),
			commitments: Vec::new(),
			outgoing: (0..nn).map(|_| None).collect(),
			incoming: (0..nn).map(|_| None).collect(),
			send_keys: (0..nn).map(|_| None).collect(),
			received: vec![None; nn],
			my_complaints: vec![false; nn],
			complaint_matrix: Vec::new(),
			qualified: vec![true; nn],
			transcript,
			final_share: None,
			corrupt_victim: None,
			forced_complaint: None,
		})
	}

	/// This peer's 1-based index.
	pub fn index(&self) -> u8 {
		self.index
	}

	/// Total number of peers in the session.
	pub fn peers(&self) -> u8 {
		self.n
	}

	/// Threshold of the generated sharing.
	pub fn threshold(&self) -> u8 {
		self.t
	}

	/// Whether more [`PeerState::next`] calls are outstanding.
	pub fn not_done(&self) -> bool {
		self.step < PEER_STEP_DONE
	}

	/// The final share, available once the run has completed.
	pub fn share(&self) -> Option<&Share> {
		self.final_share.as_ref()
	}

	/// This peer's transcript digest over all broadcast material so far.
	pub fn transcript_digest(&self) -> [u8; TRANSCRIPT_BYTES] {
		self.transcript.digest()
	}

	/// Bytes of TP output this peer expects for its current step.
	pub fn input_size(&self) -> usize {
		let n = self.n as usize;
		match self.step {
			PEER_STEP_ENROLL => 0,
			PEER_STEP_COMMIT => msg2_size(self.n),
			PEER_STEP_HS1 => msg4_size(self.n, self.t),
			PEER_STEP_HS2 => (n - 1) * hs_msg_size(),
			PEER_STEP_SHARES => (n - 1) * hs_msg_size(),
			PEER_STEP_COMPLAIN => (n - 1) * share_msg_size(),
			PEER_STEP_COMPLAINT_LIST => msg10_size(self.n),
			PEER_STEP_REVEAL => 0,
			PEER_STEP_AUDIT => HEADER_BYTES + self.reveal_list_size(),
			PEER_STEP_TRANSCRIPT => transcript_msg_size(),
			PEER_STEP_FINISH => ack_size(),
			_ => 0,
		}
	}

	/// Bytes of output the next [`PeerState::next`] call will produce.
	pub fn output_size(&self) -> usize {
		let n = self.n as usize;
		match self.step {
			PEER_STEP_ENROLL => msg1_size(),
			PEER_STEP_COMMIT => msg3_size(self.t),
			PEER_STEP_HS1 => (n - 1) * hs_msg_size(),
			PEER_STEP_HS2 => (n - 1) * hs_msg_size(),
			PEER_STEP_SHARES => (n - 1) * share_msg_size(),
			PEER_STEP_COMPLAIN => msg9_size(self.n),
			PEER_STEP_COMPLAINT_LIST => 0,
			PEER_STEP_REVEAL => msg11_size(self.reveals_expected_from(self.index)),
			PEER_STEP_AUDIT => ack_size(),
			PEER_STEP_TRANSCRIPT => transcript_msg_size(),
			_ => 0,
		}
	}

	/// Execute the current step. `input` must hold exactly
	/// [`PeerState::input_size`] bytes of the TP's output for this step.
	pub fn next(&mut self, input: &[u8]) -> DkgResult<Vec<u8>> {
		if !self.not_done() {
			return Err(Error::InvalidState { current: self.step, expected: self.prev });
		}
		let expected = self.input_size();
		if input.len() != expected {
			return Err(Error::BufferSize { expected, actual: input.len() });
		}
		let out = match self.step {
			PEER_STEP_ENROLL => self.step_enroll(),
			PEER_STEP_COMMIT => self.step_commit(input),
			PEER_STEP_HS1 => self.step_handshake1(input),
			PEER_STEP_HS2 => self.step_handshake2(input),
			PEER_STEP_SHARES => self.step_shares(input),
			PEER_STEP_COMPLAIN => self.step_complain(input),
			PEER_STEP_COMPLAINT_LIST => self.step_complaint_list(input),
			PEER_STEP_REVEAL => self.step_reveal(),
			PEER_STEP_AUDIT => self.step_audit(input),
			PEER_STEP_TRANSCRIPT => self.step_transcript(input),
			PEER_STEP_FINISH => self.step_finish(input),
			step => return Err(Error::InvalidState { current: step, expected: PEER_STEP_ENROLL }),
		}?;
		self.prev = self.step;
		self.step = match self.step {
			PEER_STEP_ENROLL => PEER_STEP_COMMIT,
			PEER_STEP_COMMIT => PEER_STEP_HS1,
			PEER_STEP_HS1 => PEER_STEP_HS2,
			PEER_STEP_HS2 => PEER_STEP_SHARES,
			PEER_STEP_SHARES => PEER_STEP_COMPLAIN,
			PEER_STEP_COMPLAIN => PEER_STEP_COMPLAINT_LIST,
			PEER_STEP_COMPLAINT_LIST => PEER_STEP_REVEAL,
			PEER_STEP_REVEAL => PEER_STEP_AUDIT,
			PEER_STEP_AUDIT => PEER_STEP_TRANSCRIPT,
			PEER_STEP_TRANSCRIPT => PEER_STEP_FINISH,
			_ => PEER_STEP_DONE,
		};
		Ok(out)
	}

	// ------------------------------------------------------------------
	// Step handlers
	// ------------------------------------------------------------------

	/// Announce the session signing key and the handshake key, under the
	/// long-term identity.
	fn step_enroll(&mut self) -> DkgResult<Vec<u8>> {
		let mut payload = Vec::with_capacity(64);
		payload.extend_from_slice(self.sig_sk.verifying_key().as_bytes());
		payload.extend_from_slice(NoisePublicKey::from(&self.noise_sk).as_bytes());
		Ok(message::seal(
			MSG_PEER_KEYS,
			self.index,
			TP_ID,
			self.clock.now(),
			&self.session_id,
			&payload,
			&self.lt_sk,
		))
	}

	/// Store everyone's session keys, sample the secret polynomial and
	/// send the commitment vector.
	fn step_commit(&mut self, input: &[u8]) -> DkgResult<Vec<u8>> {
		let payload = self.open_from_tp(input, MSG_KEY_LIST)?.to_vec();
		self.transcript.absorb(input);

		for i in 0..self.n as usize {
			let off = i * 64;
			let sig_pk = VerifyingKey::from_bytes(&arr32(&payload[off..off + 32]))
				.map_err(|_| Error::Signature { peer: i as u8 + 1 })?;
			self.peer_sig_pks.push(sig_pk);
			self.peer_noise_pks.push(arr32(&payload[off + 32..off + 64]));
		}
		let me = (self.index as usize - 1) * 64;
		if payload[me..me + 32] != self.sig_sk.verifying_key().as_bytes()[..]
			|| payload[me + 32..me + 64] != NoisePublicKey::from(&self.noise_sk).as_bytes()[..]
		{
			return Err(Error::Domain { reason: "own session keys misreported in broadcast" });
		}

		self.poly = (0..self.t).map(|_| random_scalar(&mut self.rng)).collect();
		let mut out = Vec::with_capacity(self.t as usize * 32);
		for a in &self.poly {
			out.extend_from_slice(&encode_point(&(RISTRETTO_BASEPOINT_POINT * a)));
		}
		Ok(self.seal_session(MSG_COMMITMENTS, TP_ID, &out))
	}

	/// Store the commitment matrix and open a channel toward every other
	/// peer.
	fn step_handshake1(&mut self, input: &[u8]) -> DkgResult<Vec<u8>> {
		let payload = self.open_from_tp(input, MSG_COMMITMENT_LIST)?.to_vec();
		self.transcript.absorb(input);

		for chunk in payload.chunks_exact(32) {
			self.commitments.push(decode_point(&arr32(chunk))?);
		}
		let t = self.t as usize;
		let own = &self.commitments[(self.index as usize - 1) * t..self.index as usize * t];
		for (c, a) in own.iter().zip(self.poly.iter()) {
			if *c != RISTRETTO_BASEPOINT_POINT * a {
				return Err(Error::Domain { reason: "own commitments misreported in broadcast" });
			}
		}

		let mut out = Vec::with_capacity(self.output_size());
		let noise_sk = self.noise_sk.to_bytes();
		for j in self.others() {
			let (init, hs1) =
				ChannelInitiator::start(&noise_sk, &self.peer_noise_pks[j as usize - 1])?;
			self.outgoing[j as usize - 1] = Some(init);
			out.extend_from_slice(&self.seal_session(MSG_HANDSHAKE1, j, &hs1));
		}
		Ok(out)
	}

	/// Answer every incoming handshake.
	fn step_handshake2(&mut self, input: &[u8]) -> DkgResult<Vec<u8>> {
		let mut out = Vec::with_capacity(self.output_size());
		let noise_sk = self.noise_sk.to_bytes();
		for (slot, i) in self.others().enumerate() {
			let frame = &input[slot * hs_msg_size()..(slot + 1) * hs_msg_size()];
			let response = match self.open_from_peer(frame, MSG_HANDSHAKE1, i) {
				Ok(payload) => match ChannelResponder::start(&noise_sk, payload) {
					Ok((responder, hs2)) => {
						self.incoming[i as usize - 1] = Some(responder);
						hs2
					},
					Err(_) => {
						self.complain(i);
						[0u8; HANDSHAKE2_BYTES]
					},
				},
				Err(_) => {
					self.complain(i);
					[0u8; HANDSHAKE2_BYTES]
				},
			};
			out.extend_from_slice(&self.seal_session(MSG_HANDSHAKE2, i, &response));
		}
		Ok(out)
	}

	/// Finish the outbound handshakes and deliver an encrypted share to
	/// every other peer.
	fn step_shares(&mut self, input: &[u8]) -> DkgResult<Vec<u8>> {
		let mut out = Vec::with_capacity(self.output_size());
		for (slot, j) in self.others().enumerate() {
			let frame = &input[slot * hs_msg_size()..(slot + 1) * hs_msg_size()];
			let opened = self.open_from_peer(frame, MSG_HANDSHAKE2, j).map(|p| p.to_vec());
			let payload = match (opened, self.outgoing[j as usize - 1].take()) {
				(Ok(hs2), Some(init)) => match init.finish(&hs2) {
					Ok((hs3, key)) => {
						let mut value = eval_poly(&self.poly, &scalar_from_index(j));
						if self.corrupt_victim == Some(j) {
							value += Scalar::ONE;
						}
						let share = Share::new(j, value)?;
						let wrapped = channel::wrap_share(&key, &share)?;
						self.send_keys[j as usize - 1] = Some(key);
						let mut payload = Vec::with_capacity(HANDSHAKE3_BYTES + wrapped.len());
						payload.extend_from_slice(&hs3);
						payload.extend_from_slice(&wrapped);
						payload
					},
					// A dead channel still gets a well-formed message so
					// everyone stays in lock step; the recipient will
					// complain and the audit sorts out attribution.
					Err(_) => vec![0u8; HANDSHAKE3_BYTES + WRAPPED_SHARE_BYTES],
				},
				_ => vec![0u8; HANDSHAKE3_BYTES + WRAPPED_SHARE_BYTES],
			};
			out.extend_from_slice(&self.seal_session(MSG_SHARE, j, &payload));
		}
		// Own contribution to the own final share never touches the wire.
		self.received[self.index as usize - 1] =
			Some(Share::new(self.index, eval_poly(&self.poly, &scalar_from_index(self.index)))?);
		self.poly.zeroize();
		Ok(out)
	}

	/// Decrypt and verify every received share; complain about the ones
	/// that fail.
	fn step_complain(&mut self, input: &[u8]) -> DkgResult<Vec<u8>> {
		for (slot, i) in self.others().enumerate() {
			let frame = &input[slot * share_msg_size()..(slot + 1) * share_msg_size()];
			let payload = match self.open_from_peer(frame, MSG_SHARE, i) {
				Ok(p) => p,
				Err(_) => {
					self.complain(i);
					continue;
				},
			};
			let (hs3, wrapped) = payload.split_at(HANDSHAKE3_BYTES);
			let responder = match self.incoming[i as usize - 1].take() {
				Some(r) => r,
				None => {
					self.complain(i);
					continue;
				},
			};
			let key = match responder.finish(hs3, &self.peer_noise_pks[i as usize - 1]) {
				Ok(k) => k,
				Err(_) => {
					self.complain(i);
					continue;
				},
			};
			let share = match channel::unwrap_share(key.as_bytes(), wrapped) {
				Ok(s) => s,
				Err(_) => {
					self.complain(i);
					continue;
				},
			};
			if share.index() != self.index || !self.share_verifies(i, &share) {
				self.complain(i);
				continue;
			}
			self.received[i as usize - 1] = Some(share);
		}
		if let Some(accused) = self.forced_complaint {
			if accused != 0 && accused <= self.n && accused != self.index {
				self.my_complaints[accused as usize - 1] = true;
			}
		}

		let mut bits = vec![0u8; bitset_bytes(self.n)];
		for i in 1..=self.n {
			if self.my_complaints[i as usize - 1] {
				set_bit(&mut bits, i);
			}
		}
		Ok(self.seal_session(MSG_COMPLAINTS, TP_ID, &bits))
	}

	/// Store the aggregated complaint matrix.
	fn step_complaint_list(&mut self, input: &[u8]) -> DkgResult<Vec<u8>> {
		let payload = self.open_from_tp(input, MSG_COMPLAINT_LIST)?.to_vec();
		self.transcript.absorb(input);
		self.complaint_matrix = payload;
		Ok(Vec::new())
	}

	/// Reveal the channel key for every complaint raised against this
	/// peer.
	fn step_reveal(&mut self) -> DkgResult<Vec<u8>> {
		let mut entries = Vec::new();
		for a in 1..=self.n {
			if a != self.index && complaint_bit(&self.complaint_matrix, self.n, a, self.index) {
				entries.push(a);
				match &self.send_keys[a as usize - 1] {
					Some(key) => entries.extend_from_slice(key.as_bytes()),
					// The channel never produced a key; a zero key lets
					// the audit run and fail on the committing MAC.
					None => entries.extend_from_slice(&[0u8; 32]),
				}
			}
		}
		Ok(self.seal_session(MSG_REVEAL, TP_ID, &entries))
	}

	/// Re-run the audit the TP performs, against the published reveals,
	/// to converge on the same set of qualified dealers.
	fn step_audit(&mut self, input: &[u8]) -> DkgResult<Vec<u8>> {
		let payload = self.open_from_tp(input, MSG_REVEAL_LIST)?.to_vec();
		self.transcript.absorb(input);
		self.audit_reveals(&payload);
		Ok(self.seal_session(MSG_REVEAL_ACK, TP_ID, &[]))
	}

	/// Compare transcripts with the TP and send back the local digest.
	fn step_transcript(&mut self, input: &[u8]) -> DkgResult<Vec<u8>> {
		let payload = self.open_from_tp(input, MSG_TRANSCRIPT)?;
		let digest = self.transcript.digest();
		if payload != &digest[..] {
			return Err(Error::TranscriptMismatch { peer: TP_ID });
		}
		Ok(self.seal_session(MSG_TRANSCRIPT_CONFIRM, TP_ID, &digest))
	}

	/// Accumulate the final share from every qualified dealer.
	fn step_finish(&mut self, input: &[u8]) -> DkgResult<Vec<u8>> {
		self.open_from_tp(input, MSG_DONE)?;
		let mut acc = Scalar::ZERO;
		for i in 1..=self.n as usize {
			if !self.qualified[i - 1] {
				continue;
			}
			match &self.received[i - 1] {
				Some(share) => acc += share.value(),
				None => return Err(Error::Domain { reason: "missing share from qualified peer" }),
			}
		}
		self.final_share = Some(Share::new(self.index, acc)?);
		Ok(Vec::new())
	}

	// ------------------------------------------------------------------
	// Helpers
	// ------------------------------------------------------------------

	fn others(&self) -> impl Iterator<Item = u8> {
		let index = self.index;
		(1..=self.n).filter(move |&j| j != index)
	}

	fn complain(&mut self, accused: u8) {
		self.my_complaints[accused as usize - 1] = true;
	}

	fn share_verifies(&self, dealer: u8, share: &Share) -> bool {
		let t = self.t as usize;
		let row = &self.commitments[(dealer as usize - 1) * t..dealer as usize * t];
		verify_share(row, share)
	}

	fn seal_session(&self, msg_type: u8, to: u8, payload: &[u8]) -> Vec<u8> {
		message::seal(
			msg_type,
			self.index,
			to,
			self.clock.now(),
			&self.session_id,
			payload,
			&self.sig_sk,
		)
	}

	fn open_from_tp<'a>(&mut self, bytes: &'a [u8], msg_type: u8) -> DkgResult<&'a [u8]> {
		let expect = Expect { msg_type, from: TP_ID, to: BROADCAST, session_id: self.session_id };
		let now = self.clock.now();
		let fresh = Freshness {
			now,
			epsilon: self.ts_epsilon,
			last_ts: &mut self.last_ts[TP_ID as usize],
		};
		message::open(bytes, &expect, Some(fresh), &self.tp_sig_pk)
	}

	fn open_from_peer<'a>(
		&mut self,
		bytes: &'a [u8],
		msg_type: u8,
		from: u8,
	) -> DkgResult<&'a [u8]> {
		let expect = Expect { msg_type, from, to: self.index, session_id: self.session_id };
		let now = self.clock.now();
		let vk = self.peer_sig_pks[from as usize - 1];
		let fresh = Freshness {
			now,
			epsilon: self.ts_epsilon,
			last_ts: &mut self.last_ts[from as usize],
		};
		message::open(bytes, &expect, Some(fresh), &vk)
	}

	/// Expected number of reveal entries in `peer`'s reveal message, per
	/// the complaint matrix.
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

	/// Walk the published reveal list exactly like the adjudicator does
	/// and disqualify every dealer whose complaint could not be cleared.
	///
	/// The reveal messages are first received here, so they get the full
	/// freshness check; the recorded share-delivery evidence is archived
	/// material and is exempt from the window.
	fn audit_reveals(&mut self, payload: &[u8]) {
		// Revealed keys, indexed by (accused, accuser).
		let n = self.n as usize;
		let mut keys: Vec<Option<[u8; 32]>> = vec![None; n * n];
		let mut offset = 0;
		for i in 1..=self.n {
			let size = msg11_size(self.reveals_expected_from(i));
			let frame = &payload[offset..offset + size];
			offset += size;
			let expect =
				Expect { msg_type: MSG_REVEAL, from: i, to: TP_ID, session_id: self.session_id };
			let now = self.clock.now();
			let fresh = Freshness {
				now,
				epsilon: self.ts_epsilon,
				last_ts: &mut self.last_ts[i as usize],
			};
			let entries = match message::open(
				frame,
				&expect,
				Some(fresh),
				&self.peer_sig_pks[i as usize - 1],
			) {
				Ok(p) => p,
				Err(_) => {
					self.qualified[i as usize - 1] = false;
					continue;
				},
			};
			for entry in entries.chunks_exact(REVEAL_ENTRY_BYTES) {
				let accuser = entry[0];
				let valid = accuser != 0
					&& accuser <= self.n
					&& accuser != i
					&& complaint_bit(&self.complaint_matrix, self.n, accuser, i);
				if !valid {
					self.qualified[i as usize - 1] = false;
					continue;
				}
				keys[(i as usize - 1) * n + (accuser as usize - 1)] = Some(arr32(&entry[1..]));
			}
		}

		for (accused, accuser) in self.complaint_pairs() {
			let frame = &payload[offset..offset + share_msg_size()];
			offset += share_msg_size();
			let key = match keys[(accused as usize - 1) * n + (accuser as usize - 1)] {
				Some(k) => k,
				None => {
					self.qualified[accused as usize - 1] = false;
					continue;
				},
			};
			let expect = Expect {
				msg_type: MSG_SHARE,
				from: accused,
				to: accuser,
				session_id: self.session_id,
			};
			let opened = match message::open(
				frame,
				&expect,
				None,
				&self.peer_sig_pks[accused as usize - 1],
			) {
				Ok(p) => p,
				Err(_) => {
					self.qualified[accused as usize - 1] = false;
					continue;
				},
			};
			let wrapped = &opened[HANDSHAKE3_BYTES..];
			let share = match channel::unwrap_share(&key, wrapped) {
				Ok(s) => s,
				Err(_) => {
					self.qualified[accused as usize - 1] = false;
					continue;
				},
			};
			if share.index() != accuser || !self.share_verifies(accused, &share) {
				self.qualified[accused as usize - 1] = false;
				continue;
			}
			// The share was good all along; the complaint was false. If
			// this peer was the accuser, it can finally use the share.
			if accuser == self.index {
				self.received[accused as usize - 1] = Some(share);
			}
		}
	}

	// ------------------------------------------------------------------
	// Test hooks: runtime misbehavior injection for cheater-detection
	// tests.
	// ------------------------------------------------------------------

	/// Deliver a share with its value incremented by one to `victim`.
	#[doc(hidden)]
	pub fn corrupt_share_for(&mut self, victim: u8) {
		self.corrupt_victim = Some(victim);
	}

	/// Raise a complaint against `accused` regardless of what it sent.
	#[doc(hidden)]
	pub fn force_complaint_against(&mut self, accused: u8) {
		self.forced_complaint = Some(accused);
	}

	/// Replace the clock source.
	#[doc(hidden)]
	pub fn set_clock(&mut self, clock: Box<dyn Clock>) {
		self.clock = clock;
	}
}

impl Drop for PeerState {
	fn drop(&mut self) {
		self.poly.zeroize();
	}
}

impl core::fmt::Debug for PeerState {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("PeerState")
			.field("index", &self.index)
			.field("n", &self.n)
			.field("t", &self.t)
			.field("step", &self.step)
			.field("has_share", &self.final_share.is_some())
			.finish_non_exhaustive()
	}
}
