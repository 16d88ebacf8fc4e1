//! Request/response correlation tags.
//!
//! Tags live in `[MIN_TAG, MAX_TAG]` and wrap to `MIN_TAG`. [`NO_TAG`] marks
//! a message that expects no correlated reply.

use std::sync::atomic::{AtomicU16, Ordering};

pub type Tag = u16;

pub const NO_TAG: Tag = 0;
pub const MIN_TAG: Tag = 1;
pub const MAX_TAG: Tag = 1023;

#[inline]
pub fn is_valid_tag(tag: Tag) -> bool {
    (MIN_TAG..=MAX_TAG).contains(&tag)
}

/// Lock-free cyclic tag counter. Each side of a connection owns one.
#[derive(Debug)]
pub struct TagGenerator {
    next: AtomicU16,
}

impl Default for TagGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl TagGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU16::new(MIN_TAG),
        }
    }

    /// Returns the current tag and advances the counter.
    pub fn next_tag(&self) -> Tag {
        let advance = |tag: Tag| Some(if tag >= MAX_TAG { MIN_TAG } else { tag + 1 });
        // The closure never declines, so both arms carry the previous value.
        match self.next.fetch_update(Ordering::AcqRel, Ordering::Acquire, advance) {
            Ok(tag) | Err(tag) => tag,
        }
    }
}
