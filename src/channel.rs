//! Pairwise secure channels for share delivery.
//!
//! For every ordered peer pair (i, j), peer i opens an authenticated
//! channel to j with a three-message XK handshake: the initiator already
//! knows the responder's static handshake key from the key broadcast, and
//! proves its own identity in the final message. The share travels under
//! the channel's send key as an XChaCha20-Poly1305 ciphertext plus a
//! key-committing HMAC-SHA256 under a key derived from the same send key.
//!
//! The committing MAC is what makes the complaint machinery sound: an AEAD
//! ciphertext alone can decrypt validly under more than one key, so a peer
//! forced to reveal its channel key could otherwise exhibit a key that
//! opens the recorded ciphertext to an innocent share. The MAC binds the
//! recorded bytes to exactly one key.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{DkgResult, Error};
use crate::sharing::{Share, SHARE_BYTES};

type HmacSha256 = Hmac<Sha256>;

/// Size of the first handshake message (initiator ephemeral).
pub const HANDSHAKE1_BYTES: usize = 48;
/// Size of the second handshake message (responder ephemeral).
pub const HANDSHAKE2_BYTES: usize = 48;
/// Size of the final handshake message (encrypted initiator static).
pub const HANDSHAKE3_BYTES: usize = 64;

const AEAD_TAG_BYTES: usize = 16;
const MAC_BYTES: usize = 32;

/// Size of a wrapped share: ciphertext, AEAD tag, committing MAC.
pub const WRAPPED_SHARE_BYTES: usize = SHARE_BYTES + AEAD_TAG_BYTES + MAC_BYTES;

const NOISE_PATTERN: &str = "Noise_XK_25519_ChaChaPoly_BLAKE2b";
const MAC_KEY_INFO: &[u8] = b"threshold-oprf share commitment mac";

fn noise_builder(local_sk: &[u8; 32]) -> DkgResult<snow::Builder<'_>> {
	let params = NOISE_PATTERN
		.parse()
		.map_err(|e: snow::Error| Error::Handshake(e.to_string()))?;
	Ok(snow::Builder::new(params).local_private_key(local_sk))
}

fn hs_err(e: snow::Error) -> Error {
	Error::Handshake(e.to_string())
}

/// The send key of an established channel, kept so it can later be
/// revealed when a complaint forces a public audit of the wrapped share.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
	/// Raw key bytes, for wrapping and for forced reveals.
	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.0
	}
}

/// Initiator half of a channel, between the first and the final handshake
/// message.
pub struct ChannelInitiator {
	hs: snow::HandshakeState,
}

impl ChannelInitiator {
	/// Begin a handshake toward a responder whose static handshake key is
	/// already known. Returns the first handshake message.
	pub fn start(
		local_sk: &[u8; 32],
		remote_pk: &[u8; 32],
	) -> DkgResult<(Self, [u8; HANDSHAKE1_BYTES])> {
		let mut hs = noise_builder(local_sk)?
			.remote_public_key(remote_pk)
			.build_initiator()
			.map_err(hs_err)?;
		let mut buf = [0u8; 128];
		let n = hs.write_message(&[], &mut buf).map_err(hs_err)?;
		if n != HANDSHAKE1_BYTES {
			return Err(Error::Handshake("unexpected handshake message size".into()));
		}
		let mut out = [0u8; HANDSHAKE1_BYTES];
		out.copy_from_slice(&buf[..n]);
		Ok((Self { hs }, out))
	}

	/// Consume the responder's reply and produce the final handshake
	/// message together with the channel's send key.
	pub fn finish(mut self, response: &[u8]) -> DkgResult<([u8; HANDSHAKE3_BYTES], SessionKey)> {
		let mut payload = [0u8; 0];
		self.hs.read_message(response, &mut payload).map_err(hs_err)?;
		let mut buf = [0u8; 128];
		let n = hs_write(&mut self.hs, &mut buf)?;
		if n != HANDSHAKE3_BYTES {
			return Err(Error::Handshake("unexpected handshake message size".into()));
		}
		let mut out = [0u8; HANDSHAKE3_BYTES];
		out.copy_from_slice(&buf[..n]);
		// First split key: initiator-to-responder traffic.
		let (send, _recv) = self.hs.dangerously_get_raw_split();
		Ok((out, SessionKey(send)))
	}
}

fn hs_write(hs: &mut snow::HandshakeState, buf: &mut [u8]) -> DkgResult<usize> {
	hs.write_message(&[], buf).map_err(hs_err)
}

/// Responder half of a channel, between the first and the final handshake
/// message.
pub struct ChannelResponder {
	hs: snow::HandshakeState,
}

impl ChannelResponder {
	/// Consume an initiator's first message and produce the reply.
	pub fn start(
		local_sk: &[u8; 32],
		first: &[u8],
	) -> DkgResult<(Self, [u8; HANDSHAKE2_BYTES])> {
		let mut hs = noise_builder(local_sk)?.build_responder().map_err(hs_err)?;
		let mut payload = [0u8; 0];
		hs.read_message(first, &mut payload).map_err(hs_err)?;
		let mut buf = [0u8; 128];
		let n = hs_write(&mut hs, &mut buf)?;
		if n != HANDSHAKE2_BYTES {
			return Err(Error::Handshake("unexpected handshake message size".into()));
		}
		let mut out = [0u8; HANDSHAKE2_BYTES];
		out.copy_from_slice(&buf[..n]);
		Ok((Self { hs }, out))
	}

	/// Consume the final handshake message, check that the authenticated
	/// initiator matches the expected peer, and return the channel's
	/// receive key (the initiator's send key).
	pub fn finish(mut self, last: &[u8], expected_remote: &[u8; 32]) -> DkgResult<SessionKey> {
		let mut payload = [0u8; 0];
		self.hs.read_message(last, &mut payload).map_err(hs_err)?;
		match self.hs.get_remote_static() {
			Some(remote) if remote == &expected_remote[..] => {},
			_ => return Err(Error::Handshake("initiator identity mismatch".into())),
		}
		let (send, _recv) = self.hs.dangerously_get_raw_split();
		Ok(SessionKey(send))
	}
}

fn commitment_mac_key(key: &[u8; 32]) -> DkgResult<[u8; 32]> {
	let hk = Hkdf::<Sha256>::new(None, key);
	let mut mac_key = [0u8; 32];
	hk.expand(MAC_KEY_INFO, &mut mac_key)
		.map_err(|_| Error::Domain { reason: "mac key derivation" })?;
	Ok(mac_key)
}

fn commitment_mac(key: &[u8; 32], ciphertext: &[u8]) -> DkgResult<[u8; MAC_BYTES]> {
	let mac_key = commitment_mac_key(key)?;
	let mut mac = <HmacSha256 as Mac>::new_from_slice(&mac_key)
		.map_err(|_| Error::Domain { reason: "mac key length" })?;
	mac.update(ciphertext);
	Ok(mac.finalize().into_bytes().into())
}

/// Encrypt a share under the channel key and append the key-committing
/// MAC. The key wraps exactly one message, so a fixed nonce is safe.
pub fn wrap_share(key: &SessionKey, share: &Share) -> DkgResult<Vec<u8>> {
	let cipher = XChaCha20Poly1305::new(Key::from_slice(&key.0));
	let nonce = XNonce::default();
	let mut out = cipher
		.encrypt(&nonce, share.to_bytes().as_ref())
		.map_err(|_| Error::Domain { reason: "share encryption" })?;
	let mac = commitment_mac(&key.0, &out)?;
	out.extend_from_slice(&mac);
	Ok(out)
}

/// Check the committing MAC, decrypt, and decode a wrapped share.
///
/// Takes raw key bytes so the same routine serves both the receiving peer
/// and any auditor holding a revealed key.
pub fn unwrap_share(key: &[u8; 32], wrapped: &[u8]) -> DkgResult<Share> {
	if wrapped.len() != WRAPPED_SHARE_BYTES {
		return Err(Error::BufferSize { expected: WRAPPED_SHARE_BYTES, actual: wrapped.len() });
	}
	let (ciphertext, mac) = wrapped.split_at(SHARE_BYTES + AEAD_TAG_BYTES);
	let mac_key = commitment_mac_key(key)?;
	let mut expected = <HmacSha256 as Mac>::new_from_slice(&mac_key)
		.map_err(|_| Error::Domain { reason: "mac key length" })?;
	expected.update(ciphertext);
	expected.verify_slice(mac).map_err(|_| Error::MacMismatch)?;

	let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
	let plaintext = cipher
		.decrypt(&XNonce::default(), ciphertext)
		.map_err(|_| Error::Decryption)?;
	Share::from_bytes(&plaintext)
}
