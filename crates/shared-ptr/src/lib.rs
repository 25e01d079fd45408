//! A thread-safe shared-ownership pointer for Rust.
//!
//! `shared-ptr` provides `SharedPtr<T>`, a reference-counted handle in the
//! spirit of `Arc<T>` that separates *what a handle points at* from *what it
//! keeps alive*. That separation gives:
//!
//! - **Aliasing construction**: a handle to a field, or to any address tied to
//!   the managed object, that shares the object's lifetime.
//! - **Type-erased destruction**: the control block remembers the concrete type
//!   it was created from, so handles cast to a trait object or a base field
//!   still drop the right thing.
//! - **Checked casts**: [`static_pointer_cast`] for compile-time checked
//!   conversions and [`dynamic_pointer_cast`] for run-time checked ones.
//!
//! # Quick Start
//!
//! ```
//! use shared_ptr::{dynamic_pointer_cast, AsAny, SharedPtr, Upcast};
//!
//! trait Shape: AsAny + Send + Sync {
//!     fn sides(&self) -> u32;
//! }
//!
//! #[derive(Upcast)]
//! #[upcast(dyn Shape)]
//! struct Triangle {
//!     label: String,
//! }
//!
//! impl Shape for Triangle {
//!     fn sides(&self) -> u32 {
//!         3
//!     }
//! }
//!
//! let shape: SharedPtr<dyn Shape> = SharedPtr::new(Triangle { label: "t".into() }).upcast();
//! assert_eq!(shape.sides(), 3);
//!
//! // Back to the concrete type, checked at run time.
//! let triangle = dynamic_pointer_cast::<Triangle, _>(&shape);
//! assert_eq!(triangle.label, "t");
//!
//! // A handle to one field keeps the whole triangle alive.
//! let label = SharedPtr::map(&triangle, |t| t.label.as_str());
//! drop((shape, triangle));
//! assert_eq!(&*label, "t");
//! ```
//!
//! # Thread Safety
//!
//! `SharedPtr<T>` is `Send + Sync` when `T: Send + Sync`. Managed objects must
//! be `Send + Sync + 'static`, since the last handle may be dropped on any
//! thread.
//!
//! # Features
//!
//! - `derive` (default): re-exports `#[derive(Upcast)]`.
//! - `tracing`: emits `tracing` events for control block creation and
//!   destruction.
//! - `test-util`: exposes the `test_util` helpers used by the test suite.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod block;
mod cast;
mod error;
mod metrics;
mod ptr;
mod tracing;

// Re-export public API
pub use cast::{dynamic_pointer_cast, static_pointer_cast, AsAny, Upcast};
pub use error::AllocError;
pub use metrics::{global_metrics, GlobalMetrics};
pub use ptr::{Null, SharedPtr};

// Re-export derive macro when feature is enabled
#[cfg(feature = "derive")]
pub use shared_ptr_derive::Upcast;

/// Helpers for observing control blocks and destruction in tests.
#[cfg(any(test, feature = "test-util"))]
#[doc(hidden)]
pub mod test_util {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Get the address of a handle's control block, if it has one.
    pub fn block_addr<T: ?Sized>(sp: &crate::SharedPtr<T>) -> Option<*const ()> {
        sp.block_addr()
    }

    /// Counts how many [`DropProbe`]s created from it have been dropped.
    #[derive(Debug, Clone, Default)]
    pub struct DropCounter(Arc<AtomicUsize>);

    impl DropCounter {
        /// Create a counter at zero.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Create a probe that bumps this counter when dropped.
        #[must_use]
        pub fn probe(&self, value: i32) -> DropProbe {
            DropProbe {
                value,
                counter: Arc::clone(&self.0),
            }
        }

        /// Number of probes dropped so far.
        #[must_use]
        pub fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// A value that records its own drop in a [`DropCounter`].
    #[derive(Debug)]
    pub struct DropProbe {
        /// Payload, for identifying the probe.
        pub value: i32,
        counter: Arc<AtomicUsize>,
    }

    impl Drop for DropProbe {
        fn drop(&mut self) {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}
