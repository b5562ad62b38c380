//! Process-wide identifiers for axes and columns.
//!
//! IDs come from one atomic counter seeded from the wall clock at first use
//! (milliseconds shifted left 16 bits). Allocation is strictly monotonic and
//! collision-free across threads; hydrated IDs are folded back in through
//! [`observe`] so freshly minted IDs never reuse them.

use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub type ColumnId = u64;
pub type AxisId = u64;

static NEXT_ID: Lazy<AtomicU64> = Lazy::new(|| {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    AtomicU64::new((millis & 0x0000_FFFF_FFFF_FFFF) << 16)
});

/// Allocate the next unique ID.
pub fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Record an externally supplied ID so later allocations stay above it.
pub fn observe(id: u64) {
    NEXT_ID.fetch_max(id.saturating_add(1), Ordering::Relaxed);
}
