//! Control block tracing support.
//!
//! When the `tracing` feature is enabled, this module emits structured
//! events for control block lifecycle transitions. Without the feature the
//! hooks are empty and compile away.

#[cfg(feature = "tracing")]
pub mod internal {
    /// Log the allocation of a control block.
    pub fn log_block_created(block: *const (), type_name: &'static str) {
        tracing::debug!(block = ?block, type_name, "block_created");
    }

    /// Log the terminal decrement of a control block.
    pub fn log_block_destroyed(block: *const (), type_name: &'static str) {
        tracing::debug!(block = ?block, type_name, "block_destroyed");
    }

    /// Log a reference count overflow right before aborting.
    pub fn log_ref_count_overflow(block: *const (), count: usize) {
        tracing::error!(block = ?block, count, "ref_count_overflow");
    }
}

#[cfg(not(feature = "tracing"))]
pub mod internal {
    /// Stub function when tracing is disabled.
    #[inline]
    pub const fn log_block_created(_block: *const (), _type_name: &'static str) {}

    /// Stub function when tracing is disabled.
    #[inline]
    pub const fn log_block_destroyed(_block: *const (), _type_name: &'static str) {}

    /// Stub function when tracing is disabled.
    #[inline]
    pub const fn log_ref_count_overflow(_block: *const (), _count: usize) {}
}
