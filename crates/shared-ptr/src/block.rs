//! The shared control block behind every owning `SharedPtr`.
//!
//! A control block owns the reference count and a type-erased destroyer for
//! exactly one managed object. The destroyer is chosen at construction time,
//! so a block created from a `Widget` still drops a `Widget` after every
//! surviving handle has been cast to `dyn Shape` or to a field of it.

use std::alloc::{alloc, Layout};
use std::any::{Any, TypeId};
use std::cell::UnsafeCell;
use std::mem::ManuallyDrop;
use std::ptr::{addr_of, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::metrics::global_metrics;
use crate::tracing::internal::{log_block_created, log_block_destroyed, log_ref_count_overflow};

/// Counts above this are treated as a leak of handles and abort the process.
const MAX_REF_COUNT: usize = isize::MAX as usize;

// ============================================================================
// Destroyers
// ============================================================================

/// Type-erased destruction capability for one managed object.
///
/// One implementation exists per concrete managed type; the block stores it
/// behind `dyn Destroy` so destruction never switches on a run-time type.
pub(crate) trait Destroy: Send + Sync {
    /// Drop the managed object.
    ///
    /// # Safety
    ///
    /// Must be called at most once, after the last handle referencing the
    /// owning block has been released.
    unsafe fn destroy(&mut self);

    /// Name of the managed type.
    fn type_name(&self) -> &'static str;

    /// `TypeId` of the managed type.
    fn managed_type_id(&self) -> TypeId;

    /// Address and size in bytes of the managed object.
    fn managed_bytes(&self) -> (NonNull<()>, usize);
}

/// Destroyer for an object adopted from an existing `Box<U>` allocation.
pub(crate) struct BoxedValue<U: ?Sized> {
    ptr: NonNull<U>,
}

impl<U: ?Sized> BoxedValue<U> {
    pub(crate) fn new(boxed: Box<U>) -> Self {
        // SAFETY: `Box::into_raw` never returns null.
        let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(boxed)) };
        Self { ptr }
    }

    /// Address of the adopted object.
    pub(crate) const fn ptr(&self) -> NonNull<U> {
        self.ptr
    }

    /// Give the allocation back to the caller.
    pub(crate) fn into_box(self) -> Box<U> {
        // SAFETY: `ptr` came from `Box::into_raw` and was never destroyed.
        unsafe { Box::from_raw(self.ptr.as_ptr()) }
    }
}

impl<U: ?Sized + Send + Sync + 'static> Destroy for BoxedValue<U> {
    unsafe fn destroy(&mut self) {
        // SAFETY: `ptr` came from `Box::into_raw` and the caller guarantees
        // this runs once.
        drop(unsafe { Box::from_raw(self.ptr.as_ptr()) });
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<U>()
    }

    fn managed_type_id(&self) -> TypeId {
        TypeId::of::<U>()
    }

    fn managed_bytes(&self) -> (NonNull<()>, usize) {
        // SAFETY: only called while a handle keeps the object alive.
        let size = std::mem::size_of_val(unsafe { self.ptr.as_ref() });
        (self.ptr.cast(), size)
    }
}

// SAFETY: `BoxedValue` is a unique owner of its `U`.
unsafe impl<U: ?Sized + Send + Sync> Send for BoxedValue<U> {}
// SAFETY: the block only exposes `&U` through handles, which require `U: Sync`.
unsafe impl<U: ?Sized + Send + Sync> Sync for BoxedValue<U> {}

/// Destroyer for an object stored inside the control block allocation.
pub(crate) struct InlineValue<U> {
    value: UnsafeCell<ManuallyDrop<U>>,
}

impl<U> InlineValue<U> {
    pub(crate) const fn new(value: U) -> Self {
        Self {
            value: UnsafeCell::new(ManuallyDrop::new(value)),
        }
    }

    /// Give the value back to the caller.
    pub(crate) fn into_inner(self) -> U {
        ManuallyDrop::into_inner(self.value.into_inner())
    }
}

impl<U: Send + Sync + 'static> Destroy for InlineValue<U> {
    unsafe fn destroy(&mut self) {
        // SAFETY: the caller guarantees this runs once; the value is never
        // touched again afterwards.
        unsafe { ManuallyDrop::drop(self.value.get_mut()) };
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<U>()
    }

    fn managed_type_id(&self) -> TypeId {
        TypeId::of::<U>()
    }

    fn managed_bytes(&self) -> (NonNull<()>, usize) {
        // SAFETY: `UnsafeCell::get` never returns null.
        let ptr = unsafe { NonNull::new_unchecked(self.value.get()) };
        (ptr.cast(), std::mem::size_of::<U>())
    }
}

// SAFETY: shared access goes through `&U` only, which requires `U: Sync`.
unsafe impl<U: Send + Sync> Sync for InlineValue<U> {}

// ============================================================================
// ControlBlock
// ============================================================================

/// Reference count, terminal lock and destroyer for one managed object.
///
/// The block is allocated with its concrete destroyer and then unsized to
/// `ControlBlock<dyn Destroy>`, so count and destroyer share one allocation.
pub(crate) struct ControlBlock<D: ?Sized + Destroy = dyn Destroy> {
    /// Number of live handles resolving to this block.
    ref_count: AtomicUsize,
    /// Serializes the transition from count 1 to count 0.
    terminal_lock: Mutex<()>,
    /// Type-erased destruction capability. Must stay the last field.
    destroyer: D,
}

impl<D: Destroy + 'static> ControlBlock<D> {
    /// Allocate a block with a count of 1.
    ///
    /// On allocation failure the destroyer is handed back untouched, so the
    /// caller still owns the managed object.
    pub(crate) fn allocate(destroyer: D) -> Result<NonNull<Self>, D> {
        let layout = Layout::new::<Self>();
        // SAFETY: the layout is never zero-sized, the block holds an atomic.
        let raw = unsafe { alloc(layout) }.cast::<Self>();
        let Some(ptr) = NonNull::new(raw) else {
            return Err(destroyer);
        };
        // SAFETY: `ptr` is freshly allocated with the layout of `Self`.
        unsafe {
            ptr.as_ptr().write(Self {
                ref_count: AtomicUsize::new(1),
                terminal_lock: Mutex::new(()),
                destroyer,
            });
        }

        let erased: NonNull<ControlBlock> = ptr;
        // SAFETY: just initialized.
        let type_name = unsafe { erased.as_ref() }.destroyer.type_name();
        global_metrics().record_created();
        log_block_created(erased.cast::<()>().as_ptr(), type_name);

        Ok(ptr)
    }
}

impl<U: Send + Sync + 'static> ControlBlock<InlineValue<U>> {
    /// Address of the value stored in this block.
    ///
    /// The pointer is derived without creating a reference to the block, so
    /// it stays valid alongside the shared references taken by `acquire` and
    /// `release`.
    pub(crate) fn value_ptr(this: NonNull<Self>) -> NonNull<U> {
        // SAFETY: `this` points to an initialized block; projecting a field
        // of a non-null pointer is non-null.
        unsafe {
            let cell = addr_of!((*this.as_ptr()).destroyer.value);
            NonNull::new_unchecked(UnsafeCell::raw_get(cell).cast::<U>())
        }
    }
}

impl ControlBlock {
    /// Current number of handles sharing this block.
    ///
    /// Uses `Acquire` so a caller observing 1 also observes the effects of
    /// every handle released before it.
    pub(crate) fn use_count(this: NonNull<Self>) -> usize {
        // SAFETY: the caller holds a live handle, so the block is alive.
        unsafe { this.as_ref() }.ref_count.load(Ordering::Acquire)
    }

    /// Register one more handle.
    ///
    /// # Safety
    ///
    /// `this` must be reachable through a handle that stays alive for the
    /// duration of the call.
    pub(crate) unsafe fn acquire(this: NonNull<Self>) {
        // SAFETY: guaranteed by the caller.
        let block = unsafe { this.as_ref() };
        // Relaxed: a new handle can only be made from an existing one, which
        // already keeps the block alive.
        let old = block.ref_count.fetch_add(1, Ordering::Relaxed);
        if old > MAX_REF_COUNT {
            log_ref_count_overflow(this.cast::<()>().as_ptr(), old);
            std::process::abort();
        }
    }

    /// Unregister one handle, destroying the managed object and freeing the
    /// block when it was the last one. Returns `true` if it was.
    ///
    /// Takes a raw pointer so that no reference to the block outlives a
    /// non-terminal decrement, after which another thread may free it.
    ///
    /// # Safety
    ///
    /// Each handle may release its share exactly once, and must not touch
    /// the block afterwards.
    pub(crate) unsafe fn release(this: NonNull<Self>) -> bool {
        {
            // SAFETY: the caller's share keeps the block alive until the
            // decrement below succeeds.
            let block = unsafe { this.as_ref() };
            let mut count = block.ref_count.load(Ordering::Relaxed);
            while count > 1 {
                match block.ref_count.compare_exchange_weak(
                    count,
                    count - 1,
                    Ordering::Release,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return false,
                    Err(actual) => count = actual,
                }
            }
            debug_assert_eq!(count, 1, "released a control block with no live handles");

            // The caller holds the only handle, so no increment can race
            // with this transition.
            let _guard = block.terminal_lock.lock();
            let previous = block.ref_count.fetch_sub(1, Ordering::AcqRel);
            debug_assert_eq!(previous, 1);
        }

        // SAFETY: the count reached zero through this call only; the block
        // was allocated with the global allocator and the layout of its
        // concrete type, which `Box` recovers from the vtable.
        let mut block = unsafe { Box::from_raw(this.as_ptr()) };
        global_metrics().record_destroyed();
        log_block_destroyed(this.cast::<()>().as_ptr(), block.destroyer.type_name());

        // A panicking destructor still frees the block: dropping the box
        // never touches the destroyed value again.
        // SAFETY: runs once, on the terminal transition.
        unsafe { block.destroyer.destroy() };
        true
    }

    /// Address of the managed object as a `V`, if it is one and `addr`
    /// lies inside it.
    pub(crate) fn managed_containing<V: Any>(
        this: NonNull<Self>,
        addr: *const (),
    ) -> Option<NonNull<V>> {
        // SAFETY: the caller holds a live handle.
        let destroyer = &unsafe { this.as_ref() }.destroyer;
        if destroyer.managed_type_id() != TypeId::of::<V>() {
            return None;
        }
        let (start, size) = destroyer.managed_bytes();
        let offset = addr.addr().wrapping_sub(start.as_ptr().addr());
        (offset < size.max(1)).then_some(start.cast::<V>())
    }

    /// Name of the managed type.
    pub(crate) fn type_name(this: NonNull<Self>) -> &'static str {
        // SAFETY: the caller holds a live handle.
        unsafe { this.as_ref() }.destroyer.type_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Tracked(Arc<AtomicUsize>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_inline_block_destroys_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let Ok(typed) = ControlBlock::allocate(InlineValue::new(Tracked(Arc::clone(&drops))))
        else {
            panic!("allocation failed");
        };
        let block: NonNull<ControlBlock> = typed;

        unsafe { ControlBlock::acquire(block) };
        assert_eq!(ControlBlock::use_count(block), 2);

        assert!(!unsafe { ControlBlock::release(block) });
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert!(unsafe { ControlBlock::release(block) });
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_boxed_block_destroys_adopted_allocation() {
        let drops = Arc::new(AtomicUsize::new(0));
        let boxed = Box::new(Tracked(Arc::clone(&drops)));
        let Ok(typed) = ControlBlock::allocate(BoxedValue::new(boxed)) else {
            panic!("allocation failed");
        };
        let block: NonNull<ControlBlock> = typed;
        assert!(ControlBlock::type_name(block).ends_with("Tracked"));

        assert!(unsafe { ControlBlock::release(block) });
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_inline_value_ptr_points_at_value() {
        let Ok(typed) = ControlBlock::allocate(InlineValue::new(0xABCD_u32)) else {
            panic!("allocation failed");
        };
        let value = ControlBlock::value_ptr(typed);
        assert_eq!(unsafe { *value.as_ref() }, 0xABCD);
        let block: NonNull<ControlBlock> = typed;
        assert!(unsafe { ControlBlock::release(block) });
    }

    #[test]
    fn test_managed_containing_checks_type_and_range() {
        let Ok(typed) = ControlBlock::allocate(InlineValue::new([1_u32, 2, 3])) else {
            panic!("allocation failed");
        };
        let value = ControlBlock::value_ptr(typed);
        let block: NonNull<ControlBlock> = typed;
        let second = unsafe { value.cast::<u32>().as_ptr().add(1) }.cast::<()>();

        let found = ControlBlock::managed_containing::<[u32; 3]>(block, second);
        assert_eq!(found, Some(value));
        assert!(ControlBlock::managed_containing::<u32>(block, second).is_none());

        let elsewhere = 0_u64;
        let outside = std::ptr::addr_of!(elsewhere).cast::<()>();
        assert!(ControlBlock::managed_containing::<[u32; 3]>(block, outside).is_none());

        assert!(unsafe { ControlBlock::release(block) });
    }

    #[test]
    fn test_returned_destroyers_give_values_back() {
        let inline = InlineValue::new(String::from("kept"));
        assert_eq!(inline.into_inner(), "kept");

        let boxed = BoxedValue::new(Box::new(7_u8));
        assert_eq!(*boxed.into_box(), 7);
    }
}
