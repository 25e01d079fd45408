//! Errors reported by the fallible constructors.

use std::fmt;

/// A control block could not be allocated.
///
/// No ownership transfer has happened: the value (or box) the caller passed
/// in is carried back unchanged and can be recovered with
/// [`AllocError::into_inner`].
#[derive(thiserror::Error)]
#[error("failed to allocate a control block for `{type_name}`")]
pub struct AllocError<V> {
    value: V,
    type_name: &'static str,
}

impl<V> AllocError<V> {
    pub(crate) const fn new(value: V, type_name: &'static str) -> Self {
        Self { value, type_name }
    }

    /// Name of the type that would have been managed.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Recover the value that was not adopted.
    pub fn into_inner(self) -> V {
        self.value
    }
}

impl<V> fmt::Debug for AllocError<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocError")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_error_returns_value() {
        let err = AllocError::new(vec![1, 2, 3], "alloc::vec::Vec<i32>");
        assert_eq!(
            err.to_string(),
            "failed to allocate a control block for `alloc::vec::Vec<i32>`"
        );
        assert_eq!(err.into_inner(), vec![1, 2, 3]);
    }
}
