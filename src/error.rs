//! Error types for threshold OPRF and DKG operations.

use core::fmt;

/// Result type for all fallible operations in this crate.
pub type DkgResult<T> = Result<T, Error>;

/// Errors reported by the OPRF primitives, the message layer and the
/// protocol engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
	/// Invalid threshold parameters (t, n).
	InvalidParameters {
		/// Threshold value.
		threshold: u8,
		/// Total number of peers.
		peers: u8,
		/// Description of the validation error.
		reason: &'static str,
	},
	/// A message's length field does not match the received byte count.
	MessageLength {
		/// Expected length in bytes.
		expected: usize,
		/// Actual length in bytes.
		actual: usize,
	},
	/// A message carries a type tag that does not match the current step.
	MessageType {
		/// Expected type tag.
		expected: u8,
		/// Actual type tag.
		actual: u8,
	},
	/// A message claims a sender other than the expected one.
	MessageSender {
		/// Expected sender id.
		expected: u8,
		/// Actual sender id.
		actual: u8,
	},
	/// A message is addressed to somebody else.
	MessageRecipient {
		/// Expected recipient id.
		expected: u8,
		/// Actual recipient id.
		actual: u8,
	},
	/// A message's timestamp is outside the freshness window or regresses
	/// behind an earlier message from the same sender.
	MessageExpired {
		/// Timestamp carried by the message.
		ts: u64,
		/// Receiver clock at validation time.
		now: u64,
	},
	/// Signature verification failed.
	Signature {
		/// Id of the claimed sender.
		peer: u8,
	},
	/// A scalar encoding is not canonical.
	MalformedScalar,
	/// A group element encoding is invalid.
	MalformedPoint,
	/// A scalar-field or group operation left its domain, e.g. inverting
	/// zero or a scalar multiplication yielding the identity.
	Domain {
		/// Description of the violated precondition.
		reason: &'static str,
	},
	/// AEAD decryption failed.
	Decryption,
	/// The key-committing MAC over a wrapped share did not verify.
	MacMismatch,
	/// The authenticated handshake failed.
	Handshake(String),
	/// A decrypted share carries an unexpected index.
	ShareIndex {
		/// Index the share should carry.
		expected: u8,
		/// Index it actually carries.
		actual: u8,
	},
	/// A state engine was driven out of order.
	InvalidState {
		/// Step the engine is currently in.
		current: u8,
		/// Step the call expected.
		expected: u8,
	},
	/// A peer index is outside 1..=n.
	PeerIndex {
		/// The offending index.
		index: u8,
		/// The number of peers in this session.
		max: u8,
	},
	/// An input or output buffer has the wrong size for the current step.
	BufferSize {
		/// Expected size in bytes.
		expected: usize,
		/// Actual size in bytes.
		actual: usize,
	},
	/// The final transcript comparison failed.
	TranscriptMismatch {
		/// Peer whose transcript diverges (0 for the trusted party's own).
		peer: u8,
	},
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::InvalidParameters { threshold, peers, reason } => {
				write!(f, "invalid threshold parameters: t={}, n={}: {}", threshold, peers, reason)
			},
			Error::MessageLength { expected, actual } => {
				write!(f, "invalid message length: expected {}, got {}", expected, actual)
			},
			Error::MessageType { expected, actual } => {
				write!(f, "unexpected message type: expected {}, got {}", expected, actual)
			},
			Error::MessageSender { expected, actual } => {
				write!(f, "unexpected sender: expected {}, got {}", expected, actual)
			},
			Error::MessageRecipient { expected, actual } => {
				write!(f, "message addressed to {}, expected {}", actual, expected)
			},
			Error::MessageExpired { ts, now } => {
				write!(f, "message expired: ts={}, now={}", ts, now)
			},
			Error::Signature { peer } => {
				write!(f, "signature verification failed for sender {}", peer)
			},
			Error::MalformedScalar => write!(f, "non-canonical scalar encoding"),
			Error::MalformedPoint => write!(f, "invalid group element encoding"),
			Error::Domain { reason } => write!(f, "domain error: {}", reason),
			Error::Decryption => write!(f, "share decryption failed"),
			Error::MacMismatch => write!(f, "key-committing MAC mismatch"),
			Error::Handshake(msg) => write!(f, "handshake failed: {}", msg),
			Error::ShareIndex { expected, actual } => {
				write!(f, "invalid share index: expected {}, got {}", expected, actual)
			},
			Error::InvalidState { current, expected } => {
				write!(f, "engine driven out of order: at step {}, expected {}", current, expected)
			},
			Error::PeerIndex { index, max } => {
				write!(f, "peer index {} outside 1..={}", index, max)
			},
			Error::BufferSize { expected, actual } => {
				write!(f, "buffer size mismatch: expected {}, got {}", expected, actual)
			},
			Error::TranscriptMismatch { peer } => {
				write!(f, "transcript hash mismatch for participant {}", peer)
			},
		}
	}
}

impl std::error::Error for Error {}

impl Error {
	/// Wire code of a receive-validation failure, 1..=6, in validation
	/// order: length, type, sender, recipient, expiry, signature.
	/// `None` for errors outside the framing layer.
	pub fn recv_code(&self) -> Option<u8> {
		match self {
			Error::MessageLength { .. } => Some(1),
			Error::MessageType { .. } => Some(2),
			Error::MessageSender { .. } => Some(3),
			Error::MessageRecipient { .. } => Some(4),
			Error::MessageExpired { .. } => Some(5),
			Error::Signature { .. } => Some(6),
			_ => None,
		}
	}
}

/// Maximum number of peers supported by a DKG session.
pub const MAX_PEERS: u8 = 127;

/// Minimum threshold for a DKG session.
pub const MIN_THRESHOLD: u8 = 2;

/// Validate DKG threshold parameters.
pub fn validate_dkg_params(t: u8, n: u8) -> DkgResult<()> {
	if t < MIN_THRESHOLD {
		return Err(Error::InvalidParameters {
			threshold: t,
			peers: n,
			reason: "threshold must be at least 2",
		});
	}
	if n > MAX_PEERS {
		return Err(Error::InvalidParameters {
			threshold: t,
			peers: n,
			reason: "too many peers (max 127)",
		});
	}
	if t > n {
		return Err(Error::InvalidParameters {
			threshold: t,
			peers: n,
			reason: "threshold cannot exceed number of peers",
		});
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_valid_dkg_params() {
		assert!(validate_dkg_params(2, 3).is_ok());
		assert!(validate_dkg_params(3, 5).is_ok());
		assert!(validate_dkg_params(127, 127).is_ok());
	}

	#[test]
	fn test_invalid_dkg_params() {
		assert!(validate_dkg_params(1, 3).is_err());
		assert!(validate_dkg_params(4, 3).is_err());
		assert!(validate_dkg_params(64, 128).is_err());
	}

	#[test]
	fn test_recv_codes_follow_validation_order() {
		let errs = [
			Error::MessageLength { expected: 1, actual: 2 },
			Error::MessageType { expected: 1, actual: 2 },
			Error::MessageSender { expected: 1, actual: 2 },
			Error::MessageRecipient { expected: 1, actual: 2 },
			Error::MessageExpired { ts: 0, now: 100 },
			Error::Signature { peer: 1 },
		];
		for (i, e) in errs.iter().enumerate() {
			assert_eq!(e.recv_code(), Some(i as u8 + 1));
		}
		assert_eq!(Error::MalformedScalar.recv_code(), None);
	}
}
