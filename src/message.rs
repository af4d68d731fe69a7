//! Signed message framing for the DKG protocol.
//!
//! Every protocol message is a packed record: a 64-byte signature, a
//! 1-byte type tag, the 4-byte big-endian length of the whole message, a
//! 1-byte sender id, a 1-byte recipient id, an 8-byte timestamp in seconds,
//! and the 32-byte session id, followed by the payload. The signature
//! covers everything after itself plus a fixed domain-separation suffix.
//!
//! Reception validates in a fixed order (length, type, sender, recipient,
//! freshness, signature) and each failure maps to a wire code 1..=6 via
//! [`Error::recv_code`].

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::{DkgResult, Error};

/// Byte length of the message header.
pub const HEADER_BYTES: usize = 111;

/// Sender/recipient id of the trusted party.
pub const TP_ID: u8 = 0;

/// Recipient id addressing all peers.
pub const BROADCAST: u8 = 0xff;

/// Byte length of the session identifier.
pub const SESSION_ID_BYTES: usize = 32;

const SIG_BYTES: usize = 64;
const SIGN_DST: &[u8] = b"threshold-oprf dkg message v1";

/// A parsed but not yet verified message.
pub(crate) struct RawMessage<'a> {
	pub msg_type: u8,
	pub from: u8,
	pub to: u8,
	pub ts: u64,
	pub session_id: [u8; SESSION_ID_BYTES],
	pub payload: &'a [u8],
}

/// Expected header fields for [`open`].
pub(crate) struct Expect {
	pub msg_type: u8,
	pub from: u8,
	pub to: u8,
	pub session_id: [u8; SESSION_ID_BYTES],
}

/// Freshness context for [`open`]. Nested or archived messages are opened
/// without one; their timestamps were checked on first receipt.
pub(crate) struct Freshness<'a> {
	pub now: u64,
	pub epsilon: u64,
	pub last_ts: &'a mut u64,
}

/// Build a signed message.
pub(crate) fn seal(
	msg_type: u8,
	from: u8,
	to: u8,
	ts: u64,
	session_id: &[u8; SESSION_ID_BYTES],
	payload: &[u8],
	key: &SigningKey,
) -> Vec<u8> {
	let len = (HEADER_BYTES + payload.len()) as u32;
	let mut out = Vec::with_capacity(HEADER_BYTES + payload.len());
	out.extend_from_slice(&[0u8; SIG_BYTES]);
	out.push(msg_type);
	out.extend_from_slice(&len.to_be_bytes());
	out.push(from);
	out.push(to);
	out.extend_from_slice(&ts.to_be_bytes());
	out.extend_from_slice(session_id);
	out.extend_from_slice(payload);
	let sig = key.sign(&signed_portion(&out, session_id));
	out[..SIG_BYTES].copy_from_slice(&sig.to_bytes());
	out
}

/// The byte string covered by the signature: header minus signature, the
/// payload, and the domain-separation suffix. The session id is taken from
/// the caller, not the message, so a message for a different session never
/// verifies.
fn signed_portion(bytes: &[u8], session_id: &[u8; SESSION_ID_BYTES]) -> Vec<u8> {
	let mut buf = Vec::with_capacity(bytes.len() - SIG_BYTES + SIGN_DST.len());
	buf.extend_from_slice(&bytes[SIG_BYTES..SIG_BYTES + 15]);
	buf.extend_from_slice(session_id);
	buf.extend_from_slice(&bytes[HEADER_BYTES..]);
	buf.extend_from_slice(SIGN_DST);
	buf
}

/// Parse a message header, checking only that the length field matches the
/// received byte count.
pub(crate) fn parse(bytes: &[u8]) -> DkgResult<RawMessage<'_>> {
	if bytes.len() < HEADER_BYTES {
		return Err(Error::MessageLength { expected: HEADER_BYTES, actual: bytes.len() });
	}
	let mut len = [0u8; 4];
	len.copy_from_slice(&bytes[65..69]);
	let len = u32::from_be_bytes(len) as usize;
	if len != bytes.len() {
		return Err(Error::MessageLength { expected: len, actual: bytes.len() });
	}
	let mut ts = [0u8; 8];
	ts.copy_from_slice(&bytes[71..79]);
	let mut session_id = [0u8; SESSION_ID_BYTES];
	session_id.copy_from_slice(&bytes[79..HEADER_BYTES]);
	Ok(RawMessage {
		msg_type: bytes[64],
		from: bytes[69],
		to: bytes[70],
		ts: u64::from_be_bytes(ts),
		session_id,
		payload: &bytes[HEADER_BYTES..],
	})
}

/// Verify a message's signature against the given session id.
pub(crate) fn verify_sig(
	bytes: &[u8],
	session_id: &[u8; SESSION_ID_BYTES],
	key: &VerifyingKey,
	from: u8,
) -> DkgResult<()> {
	let mut sig = [0u8; SIG_BYTES];
	sig.copy_from_slice(&bytes[..SIG_BYTES]);
	let sig = Signature::from_bytes(&sig);
	key.verify(&signed_portion(bytes, session_id), &sig)
		.map_err(|_| Error::Signature { peer: from })
}

/// Validate a received message and return its payload.
///
/// Checks run in wire-code order; the sender's last-timestamp slot is
/// updated only after every check has passed, so a rejected message leaves
/// no trace.
pub(crate) fn open<'a>(
	bytes: &'a [u8],
	expect: &Expect,
	fresh: Option<Freshness<'_>>,
	key: &VerifyingKey,
) -> DkgResult<&'a [u8]> {
	let raw = parse(bytes)?;
	if raw.msg_type != expect.msg_type {
		return Err(Error::MessageType { expected: expect.msg_type, actual: raw.msg_type });
	}
	if raw.from != expect.from {
		return Err(Error::MessageSender { expected: expect.from, actual: raw.from });
	}
	if raw.to != expect.to {
		return Err(Error::MessageRecipient { expected: expect.to, actual: raw.to });
	}
	if let Some(fresh) = &fresh {
		let skew = fresh.now.abs_diff(raw.ts);
		if skew > fresh.epsilon || raw.ts < *fresh.last_ts {
			return Err(Error::MessageExpired { ts: raw.ts, now: fresh.now });
		}
	}
	verify_sig(bytes, &expect.session_id, key, expect.from)?;
	if let Some(fresh) = fresh {
		*fresh.last_ts = raw.ts;
	}
	Ok(raw.payload)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	fn keypair(seed: u8) -> SigningKey {
		SigningKey::generate(&mut StdRng::from_seed([seed; 32]))
	}

	fn expect(session_id: [u8; 32]) -> Expect {
		Expect { msg_type: 3, from: 2, to: 0, session_id }
	}

	#[test]
	fn test_seal_open_round_trip() {
		let key = keypair(1);
		let sid = [5u8; 32];
		let msg = seal(3, 2, 0, 1000, &sid, b"hello", &key);
		assert_eq!(msg.len(), HEADER_BYTES + 5);

		let mut last_ts = 0;
		let payload = open(
			&msg,
			&expect(sid),
			Some(Freshness { now: 1001, epsilon: 10, last_ts: &mut last_ts }),
			&key.verifying_key(),
		)
		.unwrap();
		assert_eq!(payload, b"hello");
		assert_eq!(last_ts, 1000);
	}

	#[test]
	fn test_validation_order_and_codes() {
		let key = keypair(2);
		let sid = [6u8; 32];
		let msg = seal(3, 2, 0, 1000, &sid, b"payload", &key);
		let vk = key.verifying_key();
		let mut last_ts = 0;

		// Truncated: length mismatch, code 1.
		let err = open(&msg[..msg.len() - 1], &expect(sid), None, &vk).unwrap_err();
		assert_eq!(err.recv_code(), Some(1));

		// Wrong type, code 2.
		let e = Expect { msg_type: 4, ..expect(sid) };
		assert_eq!(open(&msg, &e, None, &vk).unwrap_err().recv_code(), Some(2));

		// Wrong sender, code 3.
		let e = Expect { from: 3, ..expect(sid) };
		assert_eq!(open(&msg, &e, None, &vk).unwrap_err().recv_code(), Some(3));

		// Wrong recipient, code 4.
		let e = Expect { to: 7, ..expect(sid) };
		assert_eq!(open(&msg, &e, None, &vk).unwrap_err().recv_code(), Some(4));

		// Expired, code 5.
		let err = open(
			&msg,
			&expect(sid),
			Some(Freshness { now: 5000, epsilon: 10, last_ts: &mut last_ts }),
			&vk,
		)
		.unwrap_err();
		assert_eq!(err.recv_code(), Some(5));
		assert_eq!(last_ts, 0, "rejected message must not advance the timestamp");

		// Wrong key, code 6.
		let other = keypair(3).verifying_key();
		assert_eq!(open(&msg, &expect(sid), None, &other).unwrap_err().recv_code(), Some(6));
	}

	#[test]
	fn test_session_id_is_bound_by_signature() {
		let key = keypair(4);
		let msg = seal(3, 2, 0, 1000, &[7u8; 32], b"x", &key);
		let err = open(&msg, &expect([8u8; 32]), None, &key.verifying_key()).unwrap_err();
		assert_eq!(err.recv_code(), Some(6));
	}

	#[test]
	fn test_timestamp_regression_rejected() {
		let key = keypair(5);
		let sid = [9u8; 32];
		let vk = key.verifying_key();
		let mut last_ts = 0;

		let first = seal(3, 2, 0, 1000, &sid, b"a", &key);
		open(&first, &expect(sid), Some(Freshness { now: 1000, epsilon: 10, last_ts: &mut last_ts }), &vk)
			.unwrap();
		assert_eq!(last_ts, 1000);

		// A replay with an older timestamp is rejected and leaves state
		// untouched, even though it is within the freshness window.
		let replay = seal(3, 2, 0, 995, &sid, b"a", &key);
		let err = open(
			&replay,
			&expect(sid),
			Some(Freshness { now: 1000, epsilon: 10, last_ts: &mut last_ts }),
			&vk,
		)
		.unwrap_err();
		assert_eq!(err.recv_code(), Some(5));
		assert_eq!(last_ts, 1000);

		// Equal timestamps are fine: monotonically non-decreasing.
		let next = seal(3, 2, 0, 1000, &sid, b"b", &key);
		open(&next, &expect(sid), Some(Freshness { now: 1001, epsilon: 10, last_ts: &mut last_ts }), &vk)
			.unwrap();
	}

	#[test]
	fn test_tampered_payload_rejected() {
		let key = keypair(6);
		let sid = [10u8; 32];
		let mut msg = seal(3, 2, 0, 1000, &sid, b"honest", &key);
		let last = msg.len() - 1;
		msg[last] ^= 1;
		let err = open(&msg, &expect(sid), None, &key.verifying_key()).unwrap_err();
		assert_eq!(err.recv_code(), Some(6));
	}
}
