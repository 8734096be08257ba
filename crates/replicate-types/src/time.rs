//! Millisecond-resolution wall-clock timestamp, the unit the wire protocol
//! orders deltas by.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Unix time in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
	pub const ZERO: Timestamp = Timestamp(0);

	pub fn now() -> Timestamp {
		let since_epoch =
			SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
		Timestamp(since_epoch.as_millis() as i64)
	}

	/// `now` nudged forward/back by `delta_ms`, mainly for tests that need a
	/// reproducible "N days ago" timestamp.
	pub fn from_now(delta_ms: i64) -> Timestamp {
		Timestamp(Self::now().0 + delta_ms)
	}

	pub fn add_millis(&self, millis: i64) -> Timestamp {
		Timestamp(self.0 + millis)
	}

	pub fn add_days(&self, days: i64) -> Timestamp {
		self.add_millis(days * 24 * 3600 * 1000)
	}

	/// Strictly-monotonic successor of `self`, used by the dual-write helpers:
	/// `timestamp = max(server_now_ms, current.timestamp + 1)`.
	pub fn max_or_successor_of(server_now: Timestamp, current: Timestamp) -> Timestamp {
		std::cmp::max(server_now, current.add_millis(1))
	}
}

impl std::fmt::Display for Timestamp {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<i64> for Timestamp {
	fn from(value: i64) -> Self {
		Timestamp(value)
	}
}


// vim: ts=4
