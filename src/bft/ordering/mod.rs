//! Sequence numbers attributed by the primary to client requests, and
//! view numbers identifying the current primary's epoch.
//!
//! The teacher indexes an out-of-order timed-buffer queue via a
//! windowed offset computed from two `SeqNo`s. This crate enforces
//! strict contiguity instead (no out-of-order buffering), so `SeqNo`
//! is reduced to a plain, totally ordered counter with an explicit
//! `UNSET` sentinel; the admission window itself is tracked separately
//! by `crate::bft::gc`.

use std::fmt;

#[cfg(feature = "serialize_serde")]
use serde::{Deserialize, Serialize};

/// Represents a sequence number attributed to a client request
/// during a consensus instance.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SeqNo(i32);

impl SeqNo {
    /// Sentinel value meaning "no sequence number assigned yet", used
    /// for `lastPrePrepareSeq`/`lastPrepareSeq`/`lastCommitSeq`/
    /// `initCommitSeq`/`lastStableCheckpoint` before their first update.
    pub const UNSET: SeqNo = SeqNo(-1);

    pub const ZERO: SeqNo = SeqNo(0);

    /// Creates a `SeqNo` from a raw `i32`.
    pub const fn new(n: i32) -> Self {
        SeqNo(n)
    }

    /// Returns the following sequence number.
    pub fn next(self) -> SeqNo {
        SeqNo(self.0.wrapping_add(1))
    }

    /// Returns the raw integer value.
    pub fn into_inner(self) -> i32 {
        self.0
    }

    /// Whether this is the `UNSET` sentinel.
    pub fn is_unset(self) -> bool {
        self == Self::UNSET
    }
}

impl From<i32> for SeqNo {
    fn from(n: i32) -> Self {
        SeqNo(n)
    }
}

impl From<SeqNo> for i32 {
    fn from(s: SeqNo) -> i32 {
        s.0
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the current primary's epoch. The primary of view `v` is
/// `addresses[v mod N]`.
#[cfg_attr(feature = "serialize_serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ViewNo(i64);

impl ViewNo {
    pub const ZERO: ViewNo = ViewNo(0);

    pub const fn new(n: i64) -> Self {
        ViewNo(n)
    }

    pub fn next(self) -> ViewNo {
        ViewNo(self.0 + 1)
    }

    pub fn into_inner(self) -> i64 {
        self.0
    }
}

impl From<i64> for ViewNo {
    fn from(n: i64) -> Self {
        ViewNo(n)
    }
}

impl From<ViewNo> for i64 {
    fn from(v: ViewNo) -> i64 {
        v.0
    }
}

impl fmt::Display for ViewNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An object that can report its own sequence number.
pub trait Orderable {
    fn sequence_number(&self) -> SeqNo;
}

/// True iff `next` immediately follows `prev`, or `prev` is `UNSET` and
/// `next` is the very first sequence number, `ZERO`.
pub fn is_contiguous(prev: SeqNo, next: SeqNo) -> bool {
    (prev != SeqNo::UNSET && next.0 == prev.0.wrapping_add(1))
        || (prev == SeqNo::UNSET && next == SeqNo::ZERO)
}
