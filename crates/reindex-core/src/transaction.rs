//! Run-scoped transaction keys

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Field every indexed document carries its transaction key in.
pub const TRANSACTION_FIELD: &str = "tsk";

/// Identifier minted once per reindex run and stamped on every document it writes.
///
/// Millisecond timestamp; never zero. Keys minted in one process are strictly
/// increasing even when two runs start inside the same millisecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct TransactionKey(u64);

impl TransactionKey {
    /// Mint a fresh key from the wall clock.
    pub fn mint() -> Self {
        static LAST: AtomicU64 = AtomicU64::new(0);
        let now = Utc::now().timestamp_millis().max(1) as u64;
        let prev = LAST
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(0);
        Self(now.max(prev + 1))
    }

    /// Wrap a raw key. `0` is the "no key" sentinel and yields `None`.
    pub fn new(raw: u64) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    /// Parse an operator-supplied key. Empty, `0` and garbage all mean "absent".
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse::<u64>().ok().and_then(Self::new)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid transaction key: {s:?}"))
    }
}

impl TryFrom<u64> for TransactionKey {
    type Error = String;

    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or_else(|| "transaction key must be non-zero".to_string())
    }
}

impl From<TransactionKey> for u64 {
    fn from(key: TransactionKey) -> Self {
        key.0
    }
}
