//! Cheater ledger: typed protocol violations attributed to peers.
//!
//! The trusted party records every detected violation in a bounded ledger.
//! A non-empty ledger at the end of a run means the generated shares must
//! not be used; the records say who misbehaved and how.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Reporter value meaning "no reporting peer".
pub const NO_REPORTER: u8 = 0xfe;

/// Invalid-index value meaning "not applicable".
pub const NO_INDEX: u8 = 0;

// Adjudication codes. Nested receive-validation failures are embedded as
// SHARE_MSG_ERR + code for the recorded share-delivery message and
// REVEAL_MSG_ERR + code for the key-reveal message.

/// Committing MAC over the recorded ciphertext did not verify.
pub const CHEAT_MAC: u8 = 3;
/// The recorded ciphertext did not decrypt or decode under the revealed key.
pub const CHEAT_DECRYPT: u8 = 4;
/// The decrypted share carries the wrong index.
pub const CHEAT_INDEX: u8 = 5;
/// A key was revealed for a pair nobody complained about.
pub const CHEAT_UNSOLICITED_REVEAL: u8 = 6;
/// A complaint was left unanswered by the accused.
pub const CHEAT_NO_REVEAL: u8 = 7;
/// Base code for an invalid recorded share-delivery message.
pub const SHARE_MSG_ERR: u8 = 16;
/// Base code for an invalid key-reveal message.
pub const REVEAL_MSG_ERR: u8 = 32;
/// Malformed reveal parameters.
pub const CHEAT_BAD_REVEAL: u8 = 127;
/// The complained-about share verified; the complaint was false.
pub const CHEAT_FALSE_COMPLAINT: u8 = 128;
/// The complained-about share failed verification.
pub const CHEAT_PROVEN: u8 = 129;

/// One detected protocol violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CheaterRecord {
	/// Protocol step in which the violation was detected.
	pub step: u8,
	/// Violation code.
	pub code: u8,
	/// The peer the violation is attributed to.
	pub peer: u8,
	/// The peer that reported it, or [`NO_REPORTER`].
	pub other_peer: u8,
	/// The offending share index, or [`NO_INDEX`].
	pub invalid_index: u8,
}

impl fmt::Display for CheaterRecord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "step {}, peer {}: ", self.step, self.peer)?;
		// Codes 1..=6 outside adjudication are plain receive-validation
		// failures recorded while relaying.
		if (1..=6).contains(&self.code) && self.step != 18 {
			return write!(f, "message failed validation (code {})", self.code);
		}
		match self.code {
			CHEAT_MAC => write!(f, "committing MAC mismatch on share for peer {}", self.other_peer),
			CHEAT_DECRYPT => {
				write!(f, "share for peer {} failed to decrypt under revealed key", self.other_peer)
			},
			CHEAT_INDEX => write!(
				f,
				"share for peer {} carries invalid index {}",
				self.other_peer, self.invalid_index
			),
			CHEAT_UNSOLICITED_REVEAL => write!(f, "revealed a key nobody complained about"),
			CHEAT_NO_REVEAL => {
				write!(f, "did not answer the complaint raised by peer {}", self.other_peer)
			},
			CHEAT_BAD_REVEAL => write!(f, "malformed reveal parameters"),
			CHEAT_FALSE_COMPLAINT => {
				write!(f, "false complaint against peer {}", self.other_peer)
			},
			CHEAT_PROVEN => {
				write!(f, "delivered an invalid share to peer {}", self.other_peer)
			},
			c if (SHARE_MSG_ERR..SHARE_MSG_ERR + 7).contains(&c) => {
				write!(f, "invalid share-delivery message (code {})", c - SHARE_MSG_ERR)
			},
			c if (REVEAL_MSG_ERR..REVEAL_MSG_ERR + 7).contains(&c) => {
				write!(f, "invalid key-reveal message (code {})", c - REVEAL_MSG_ERR)
			},
			c => write!(f, "protocol violation (code {})", c),
		}
	}
}

/// Bounded append-only log of protocol violations.
///
/// On overflow further records are dropped, but the overflow itself is
/// remembered and fails the run.
#[derive(Clone, Debug)]
pub struct CheaterLedger {
	records: Vec<CheaterRecord>,
	capacity: usize,
	overflowed: bool,
}

impl CheaterLedger {
	/// Create a ledger with the given capacity.
	pub fn new(capacity: usize) -> Self {
		Self { records: Vec::with_capacity(capacity), capacity, overflowed: false }
	}

	/// Append a record without a reporter or invalid index.
	pub fn record(&mut self, step: u8, code: u8, peer: u8) {
		self.push(CheaterRecord {
			step,
			code,
			peer,
			other_peer: NO_REPORTER,
			invalid_index: NO_INDEX,
		});
	}

	/// Append a record naming the reporting peer.
	pub fn record_reported(&mut self, step: u8, code: u8, peer: u8, other_peer: u8) {
		self.push(CheaterRecord { step, code, peer, other_peer, invalid_index: NO_INDEX });
	}

	/// Append a record naming the reporting peer and an offending index.
	pub fn record_index(&mut self, step: u8, code: u8, peer: u8, other_peer: u8, index: u8) {
		self.push(CheaterRecord { step, code, peer, other_peer, invalid_index: index });
	}

	fn push(&mut self, record: CheaterRecord) {
		if self.records.len() >= self.capacity {
			self.overflowed = true;
			return;
		}
		self.records.push(record);
	}

	/// All recorded violations.
	pub fn records(&self) -> &[CheaterRecord] {
		&self.records
	}

	/// Whether the ledger holds no records.
	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	/// Number of records.
	pub fn len(&self) -> usize {
		self.records.len()
	}

	/// Whether records were dropped because the ledger was full.
	pub fn overflowed(&self) -> bool {
		self.overflowed
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_record_and_read_back() {
		let mut ledger = CheaterLedger::new(8);
		ledger.record_reported(18, CHEAT_PROVEN, 4, 2);
		assert_eq!(ledger.len(), 1);
		let r = ledger.records()[0];
		assert_eq!(r.step, 18);
		assert_eq!(r.code, CHEAT_PROVEN);
		assert_eq!(r.peer, 4);
		assert_eq!(r.other_peer, 2);
	}

	#[test]
	fn test_overflow_drops_but_fails() {
		let mut ledger = CheaterLedger::new(2);
		for i in 0..5 {
			ledger.record(18, CHEAT_NO_REVEAL, i);
		}
		assert_eq!(ledger.len(), 2);
		assert!(ledger.overflowed());
	}

	#[test]
	fn test_display_by_code() {
		let r = CheaterRecord {
			step: 18,
			code: CHEAT_FALSE_COMPLAINT,
			peer: 2,
			other_peer: 4,
			invalid_index: NO_INDEX,
		};
		assert_eq!(r.to_string(), "step 18, peer 2: false complaint against peer 4");

		let r = CheaterRecord {
			step: 18,
			code: REVEAL_MSG_ERR + 1,
			peer: 3,
			other_peer: NO_REPORTER,
			invalid_index: NO_INDEX,
		};
		assert_eq!(r.to_string(), "step 18, peer 3: invalid key-reveal message (code 1)");
	}
}
