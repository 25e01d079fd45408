//! A destructor that panics still retires its control block.
//!
//! Kept as a single test in its own binary so the process-wide metrics see
//! no other blocks.

use shared_ptr::{global_metrics, SharedPtr};
use std::panic::{self, AssertUnwindSafe};

struct Exploding(u8);

impl Drop for Exploding {
    fn drop(&mut self) {
        panic!("exploding value {} dropped", self.0);
    }
}

#[test]
fn test_panicking_destructor_still_counts_block_destroyed() {
    let live = global_metrics().live_blocks();
    let destroyed = global_metrics().blocks_destroyed();

    let sp = SharedPtr::new(Exploding(3));
    let copy = SharedPtr::clone(&sp);
    assert_eq!(global_metrics().live_blocks(), live + 1);

    drop(sp);
    assert_eq!(global_metrics().live_blocks(), live + 1);

    let result = panic::catch_unwind(AssertUnwindSafe(|| drop(copy)));
    assert!(result.is_err());
    assert_eq!(global_metrics().live_blocks(), live);
    assert_eq!(global_metrics().blocks_destroyed(), destroyed + 1);

    let boxed = SharedPtr::from_box(Box::new(Exploding(4)));
    let result = panic::catch_unwind(AssertUnwindSafe(|| drop(boxed)));
    assert!(result.is_err());
    assert_eq!(global_metrics().live_blocks(), live);
    assert_eq!(global_metrics().blocks_destroyed(), destroyed + 2);
}
