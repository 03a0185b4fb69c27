//! Tag allocation and wire formatting.
//!
//! Tags are client-assigned integers identifying an outstanding command. `*` and `+` are
//! reserved sentinels for untagged and continuation responses and are never allocated here.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A client-assigned identifier correlating a command with its completion response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(u64);

impl Tag {
  /// The first tag a fresh [`TagGenerator`] hands out.
  pub const ORIGIN: Tag = Tag(0);

  pub fn value(self) -> u64 {
    self.0
  }
}

impl fmt::Display for Tag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "a{}", self.0)
  }
}

/// Parses a tag off the wire in the `a<N>` form. Returns `None` if `text` isn't of that shape.
pub fn parse(text: &str) -> Option<Tag> {
  let digits = text.strip_prefix('a')?;
  if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  digits.parse().ok().map(Tag)
}

/// Monotonic tag allocator, shared under the correlator's mutex. Starts at [`Tag::ORIGIN`] and
/// increments by one per allocation for the lifetime of the session.
#[derive(Debug, Default)]
pub struct TagGenerator {
  next: AtomicU64,
}

impl TagGenerator {
  pub fn new() -> Self {
    Self {
      next: AtomicU64::new(Tag::ORIGIN.0),
    }
  }

  /// Allocates the next tag, logging the allocation at `debug` level (§10.A).
  pub fn next(&self) -> Tag {
    let tag = Tag(self.next.fetch_add(1, Ordering::SeqCst));
    log::debug!("allocated tag {tag}");
    tag
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display() {
    assert_eq!("a0", Tag(0).to_string());
    assert_eq!("a42", Tag(42).to_string());
  }

  #[test]
  fn parse_roundtrip() {
    assert_eq!(Some(Tag(0)), parse("a0"));
    assert_eq!(Some(Tag(42)), parse("a42"));
    assert_eq!(None, parse("*"));
    assert_eq!(None, parse("+"));
    assert_eq!(None, parse("a"));
    assert_eq!(None, parse("aX"));
    assert_eq!(None, parse("b1"));
  }

  #[test]
  fn monotonic() {
    let generator = TagGenerator::new();
    let tags: Vec<_> = (0..5).map(|_| generator.next()).collect();
    assert_eq!(
      vec![Tag(0), Tag(1), Tag(2), Tag(3), Tag(4)],
      tags
    );
    for window in tags.windows(2) {
      assert!(window[0] < window[1]);
    }
  }
}
