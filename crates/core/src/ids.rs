//! Opaque identifier generation.
//!
//! Mount and wrapper ids are handed to peers in `Session` headers, so they
//! must be unique for the process lifetime and hard to guess. The low half
//! is a process-wide counter (uniqueness), the high half is random (opacity).

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;

static COUNTER: AtomicU64 = AtomicU64::new(1);

/// 16-hex-char id for `Session` headers.
pub(crate) fn next_id() -> String {
    let noise = rand::rng().random::<u32>();
    format!("{:08X}{:08X}", noise, next_raw() as u32)
}

/// Raw monotonic id for in-process keys (stream client maps).
pub(crate) fn next_raw() -> u64 {
    COUNTER.fetch_add(1, Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_fixed_width() {
        let a = next_id();
        let b = next_id();
        assert_eq!(a.len(), 16);
        assert_eq!(b.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn raw_ids_increase() {
        let a = next_raw();
        let b = next_raw();
        assert!(b > a);
    }
}
