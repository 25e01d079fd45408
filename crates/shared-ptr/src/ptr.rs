//! The `SharedPtr<T>` smart pointer implementation.
//!
//! This module provides the primary user-facing type: a thread-safe,
//! reference-counted handle whose reported pointee may differ from the object
//! its control block will eventually destroy.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::NonNull;

use crate::block::{BoxedValue, ControlBlock, Destroy, InlineValue};
use crate::cast::Upcast;
use crate::error::AllocError;

// ============================================================================
// SharedPtr<T> - Shared-ownership handle
// ============================================================================

/// A thread-safe shared-ownership pointer to a value of type `T`.
///
/// A `SharedPtr` is made of two independent parts:
///
/// - the **pointee**, the address reported by [`Deref`] and used for
///   comparisons, and
/// - the **owner**, a control block counting the handles that keep one
///   managed object alive.
///
/// They usually coincide, but aliasing construction ([`SharedPtr::map`],
/// [`SharedPtr::aliasing`]) and the cast helpers produce handles that point
/// into, or at a different view of, the object their block owns. The block
/// always destroys the object with the concrete type it was created from.
///
/// # Thread Safety
///
/// `SharedPtr<T>` implements `Send` and `Sync` when `T: Send + Sync`. Clone
/// is a lock-free atomic increment; only the final drop of a block takes
/// that block's own lock.
///
/// # Empty handles
///
/// A handle without a pointee is *empty*. Dereferencing it is a precondition
/// violation: it is only checked by a debug assertion. Use
/// [`SharedPtr::get`] or [`SharedPtr::is_some`] when emptiness is possible.
///
/// # Examples
///
/// ```
/// use shared_ptr::{Null, SharedPtr};
///
/// let a = SharedPtr::new(42);
/// let b = SharedPtr::clone(&a);
/// assert_eq!(*b, 42);
/// assert_eq!(a.use_count(), 2);
///
/// let empty = SharedPtr::<i32>::null();
/// assert!(empty == Null);
/// assert!(Null != a);
/// ```
pub struct SharedPtr<T: ?Sized> {
    /// Reported address. `None` for empty and null-aliased handles.
    ptr: Option<NonNull<T>>,
    /// Lifetime owner. `None` implies `ptr` is `None`.
    block: Option<NonNull<ControlBlock>>,
    /// Marker to convey that the handle gives out `&T`.
    _marker: PhantomData<T>,
}

impl<T: ?Sized> SharedPtr<T> {
    /// Create an empty handle. Does not allocate.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            ptr: None,
            block: None,
            _marker: PhantomData,
        }
    }

    const fn from_parts(ptr: Option<NonNull<T>>, block: Option<NonNull<ControlBlock>>) -> Self {
        Self {
            ptr,
            block,
            _marker: PhantomData,
        }
    }

    /// Take both parts out of `self` without releasing its share.
    fn into_parts(self) -> (Option<NonNull<T>>, Option<NonNull<ControlBlock>>) {
        let this = ManuallyDrop::new(self);
        (this.ptr, this.block)
    }

    /// Adopt a boxed value.
    ///
    /// The value stays in its existing allocation; a separate control block
    /// is allocated for the count. `T` may be unsized, so a `Box<dyn Trait>`
    /// becomes a `SharedPtr<dyn Trait>` that still drops the right concrete
    /// type.
    ///
    /// The block only knows the type of the box it was given: for a box
    /// already erased to `dyn Trait`, [`SharedPtr::managed_type_name`]
    /// reports the trait object and [`dynamic_pointer_cast`] can only check
    /// the pointee. Use [`SharedPtr::adopt`] with the concrete box to keep
    /// both.
    ///
    /// [`dynamic_pointer_cast`]: crate::dynamic_pointer_cast
    ///
    /// # Examples
    ///
    /// ```
    /// use std::fmt::Display;
    /// use shared_ptr::SharedPtr;
    ///
    /// let shown: SharedPtr<dyn Display + Send + Sync> = SharedPtr::from_box(Box::new(7));
    /// assert_eq!(shown.to_string(), "7");
    /// ```
    #[must_use]
    pub fn from_box(boxed: Box<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self::adopt(boxed)
    }

    /// Adopt a boxed value, reporting control block allocation failure.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] carrying the untouched box when the control
    /// block cannot be allocated.
    pub fn try_from_box(boxed: Box<T>) -> Result<Self, AllocError<Box<T>>>
    where
        T: Send + Sync + 'static,
    {
        Self::try_adopt(boxed)
    }

    /// Adopt a boxed `U` and report it as a `T`.
    ///
    /// The control block remembers `U`, so the object is dropped as a `U`
    /// even though every handle to it may only ever see a `T`.
    ///
    /// # Panics
    ///
    /// Aborts through [`std::alloc::handle_alloc_error`] if the control block
    /// cannot be allocated, like `Box::new`.
    #[must_use]
    pub fn adopt<U>(boxed: Box<U>) -> Self
    where
        U: ?Sized + Upcast<T> + Send + Sync + 'static,
    {
        match Self::try_adopt(boxed) {
            Ok(sp) => sp,
            Err(_) => std::alloc::handle_alloc_error(block_layout::<BoxedValue<U>>()),
        }
    }

    /// Fallible form of [`SharedPtr::adopt`].
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] carrying the untouched box when the control
    /// block cannot be allocated.
    pub fn try_adopt<U>(boxed: Box<U>) -> Result<Self, AllocError<Box<U>>>
    where
        U: ?Sized + Upcast<T> + Send + Sync + 'static,
    {
        let destroyer = BoxedValue::new(boxed);
        let value = destroyer.ptr();
        match ControlBlock::allocate(destroyer) {
            Ok(block) => {
                let block: NonNull<ControlBlock> = block;
                let ptr = <U as Upcast<T>>::upcast_ptr(value);
                Ok(Self::from_parts(Some(ptr), Some(block)))
            }
            Err(destroyer) => Err(AllocError::new(
                destroyer.into_box(),
                std::any::type_name::<U>(),
            )),
        }
    }

    /// Adopt a raw pointer obtained from [`Box::into_raw`], reporting it as
    /// a `T`.
    ///
    /// A null pointer yields an empty handle.
    ///
    /// # Safety
    ///
    /// `raw` must be null or come from `Box::into_raw`, and ownership is
    /// transferred irrevocably: it must not be adopted by a second,
    /// independently constructed handle, nor freed anywhere else.
    #[must_use]
    pub unsafe fn from_raw<U>(raw: *mut U) -> Self
    where
        U: ?Sized + Upcast<T> + Send + Sync + 'static,
    {
        if raw.is_null() {
            return Self::null();
        }
        // SAFETY: non-null and from `Box::into_raw` per the caller's contract.
        Self::adopt(unsafe { Box::from_raw(raw) })
    }

    /// Create a handle that shares ownership with `owner` but reports `ptr`
    /// as its pointee.
    ///
    /// `ptr` may be null: the result then keeps the owner's object alive but
    /// is empty for every other purpose. Aliasing an empty `owner` yields an
    /// empty handle regardless of `ptr`.
    ///
    /// # Safety
    ///
    /// If non-null, `ptr` must stay valid for reads as `T` for as long as the
    /// control block of `owner` is alive, typically because it points into
    /// the object that block owns.
    #[must_use]
    pub unsafe fn aliasing<U: ?Sized>(owner: &SharedPtr<U>, ptr: *const T) -> Self {
        let Some(block) = owner.block else {
            return Self::null();
        };
        // SAFETY: `owner` is alive for the duration of this call.
        unsafe { ControlBlock::acquire(block) };
        Self::from_parts(NonNull::new(ptr.cast_mut()), Some(block))
    }

    /// Create a handle to a part of the pointee that shares ownership with
    /// `this`.
    ///
    /// Mapping an empty handle yields an empty handle.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared_ptr::SharedPtr;
    ///
    /// struct Config {
    ///     name: String,
    ///     retries: u32,
    /// }
    ///
    /// let config = SharedPtr::new(Config { name: "primary".into(), retries: 3 });
    /// let name = SharedPtr::map(&config, |c| &c.name);
    /// drop(config);
    /// // The projection keeps the whole `Config` alive.
    /// assert_eq!(*name, "primary");
    /// ```
    #[must_use]
    pub fn map<V, F>(this: &Self, f: F) -> SharedPtr<V>
    where
        V: ?Sized,
        F: FnOnce(&T) -> &V,
    {
        match this.get() {
            // SAFETY: the projection borrows from the pointee, which lives as
            // long as the block `this` shares.
            Some(value) => unsafe { SharedPtr::aliasing(this, std::ptr::from_ref(f(value))) },
            None => SharedPtr::null(),
        }
    }

    /// Convert into a handle to `V`, keeping the same share of ownership.
    ///
    /// The use count is unchanged.
    #[must_use]
    pub fn upcast<V: ?Sized>(self) -> SharedPtr<V>
    where
        T: Upcast<V>,
    {
        let (ptr, block) = self.into_parts();
        SharedPtr::from_parts(ptr.map(<T as Upcast<V>>::upcast_ptr), block)
    }

    /// Make `self` a copy of `source`.
    ///
    /// When both handles already share a control block this is a no-op:
    /// the count is untouched and `self` keeps its own pointee, so an alias
    /// stays an alias.
    pub fn assign_from<U>(&mut self, source: &SharedPtr<U>)
    where
        U: ?Sized + Upcast<T>,
    {
        if same_block(self.block, source.block) {
            return;
        }
        *self = source.clone().upcast();
    }

    /// Move `source` into `self`, releasing the share `self` held.
    pub fn assign<U>(&mut self, source: SharedPtr<U>)
    where
        U: ?Sized + Upcast<T>,
    {
        *self = source.upcast();
    }

    /// Release this handle's share and make it empty.
    ///
    /// If this was the last handle of its block, the managed object is
    /// destroyed before `reset` returns.
    pub fn reset(&mut self) {
        drop(std::mem::take(self));
    }

    /// Release this handle's share, then adopt `boxed`.
    pub fn reset_with_box<U>(&mut self, boxed: Box<U>)
    where
        U: ?Sized + Upcast<T> + Send + Sync + 'static,
    {
        self.reset();
        *self = Self::adopt(boxed);
    }

    /// Borrow the pointee, or `None` for an empty handle.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        // SAFETY: a reported pointee stays valid while the block is alive,
        // and `self` keeps it alive.
        self.ptr.map(|ptr| unsafe { ptr.as_ref() })
    }

    /// The reported pointee address.
    #[must_use]
    pub const fn as_non_null(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    /// Returns `true` if the handle has a pointee.
    #[must_use]
    pub const fn is_some(&self) -> bool {
        self.ptr.is_some()
    }

    /// Returns `true` if the handle has no pointee.
    ///
    /// A null-aliased handle is null even though it keeps an object alive;
    /// see [`SharedPtr::use_count`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// Number of handles sharing this handle's control block, or 0 when it
    /// has none.
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.block.map_or(0, ControlBlock::use_count)
    }

    /// Returns `true` if both handles share the same control block.
    ///
    /// Unlike `==`, this compares owners rather than reported pointees. Two
    /// handles without a block are considered to share one.
    #[must_use]
    pub fn owner_eq<U: ?Sized>(&self, other: &SharedPtr<U>) -> bool {
        same_block(self.block, other.block)
    }

    /// Name of the type the control block will destroy, if there is a block.
    ///
    /// This is the type the block was constructed from: the concrete type
    /// for [`SharedPtr::new`] and [`SharedPtr::adopt`], the static type of
    /// the box for [`SharedPtr::from_box`].
    #[must_use]
    pub fn managed_type_name(&self) -> Option<&'static str> {
        self.block.map(ControlBlock::type_name)
    }

    /// Address of the pointee data, ignoring any pointer metadata.
    fn addr(&self) -> *const () {
        self.ptr
            .map_or(std::ptr::null(), |ptr| ptr.cast::<()>().as_ptr().cast_const())
    }

    /// The object managed by this handle's block, if it is a `V` and the
    /// reported pointee lies inside it.
    pub(crate) fn managed_object<V: Any>(&self) -> Option<NonNull<V>> {
        let block = self.block?;
        self.ptr?;
        ControlBlock::managed_containing(block, self.addr())
    }

    /// Address of the control block, for tests.
    #[cfg(any(test, feature = "test-util"))]
    pub(crate) fn block_addr(&self) -> Option<*const ()> {
        self.block.map(|block| block.cast::<()>().as_ptr().cast_const())
    }
}

impl<T: Send + Sync + 'static> SharedPtr<T> {
    /// Create a handle owning `value`.
    ///
    /// The value is stored in the same allocation as its control block.
    ///
    /// # Panics
    ///
    /// Aborts through [`std::alloc::handle_alloc_error`] if the allocation
    /// fails, like `Box::new`.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared_ptr::SharedPtr;
    ///
    /// let x = SharedPtr::new(42);
    /// assert_eq!(*x, 42);
    /// ```
    #[must_use]
    pub fn new(value: T) -> Self {
        match Self::try_new(value) {
            Ok(sp) => sp,
            Err(_) => std::alloc::handle_alloc_error(block_layout::<InlineValue<T>>()),
        }
    }

    /// Create a handle owning `value`, reporting allocation failure.
    ///
    /// # Errors
    ///
    /// Returns [`AllocError`] carrying `value` back when the allocation
    /// fails.
    pub fn try_new(value: T) -> Result<Self, AllocError<T>> {
        match ControlBlock::allocate(InlineValue::new(value)) {
            Ok(block) => {
                let ptr = ControlBlock::value_ptr(block);
                let block: NonNull<ControlBlock> = block;
                Ok(Self::from_parts(Some(ptr), Some(block)))
            }
            Err(destroyer) => Err(AllocError::new(
                destroyer.into_inner(),
                std::any::type_name::<T>(),
            )),
        }
    }

    /// Release this handle's share, then own `value`.
    ///
    /// The old object, if this was its last handle, is destroyed before the
    /// new one is allocated.
    pub fn reset_with(&mut self, value: T) {
        self.reset();
        *self = Self::new(value);
    }
}

impl<T> SharedPtr<T> {
    /// The reported pointee as a raw pointer, null for an empty handle.
    #[must_use]
    pub fn as_ptr(&self) -> *const T {
        self.ptr
            .map_or(std::ptr::null(), |ptr| ptr.as_ptr().cast_const())
    }
}

impl SharedPtr<dyn Any + Send + Sync> {
    /// Attempt to downcast the pointee to a concrete type.
    ///
    /// On success the share of ownership moves into the returned handle. On
    /// failure the original handle is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `self` when the pointee is not a `T` or the handle is empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::any::Any;
    /// use shared_ptr::SharedPtr;
    ///
    /// let any: SharedPtr<dyn Any + Send + Sync> = SharedPtr::from_box(Box::new(5_u8));
    /// let any = any.downcast::<u16>().unwrap_err();
    /// let byte = any.downcast::<u8>().unwrap();
    /// assert_eq!(*byte, 5);
    /// ```
    pub fn downcast<T: Any + Send + Sync>(self) -> Result<SharedPtr<T>, Self> {
        let target = self
            .get()
            .and_then(<dyn Any + Send + Sync>::downcast_ref::<T>)
            .map(NonNull::from);
        match target {
            Some(target) => {
                let (_, block) = self.into_parts();
                Ok(SharedPtr::from_parts(Some(target), block))
            }
            None => Err(self),
        }
    }
}

/// Layout of a control block holding destroyer `D`.
fn block_layout<D: Destroy>() -> std::alloc::Layout {
    std::alloc::Layout::new::<ControlBlock<D>>()
}

fn same_block(a: Option<NonNull<ControlBlock>>, b: Option<NonNull<ControlBlock>>) -> bool {
    a.map(NonNull::cast::<()>) == b.map(NonNull::cast::<()>)
}

impl<T: ?Sized> Deref for SharedPtr<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        debug_assert!(self.ptr.is_some(), "dereferenced an empty SharedPtr");
        // SAFETY: dereferencing requires a non-null pointee (see the type
        // docs); the pointee stays valid while `self` keeps its block alive.
        unsafe { self.ptr.unwrap_unchecked().as_ref() }
    }
}

impl<T: ?Sized> Clone for SharedPtr<T> {
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            // SAFETY: `self` is alive for the duration of the call.
            unsafe { ControlBlock::acquire(block) };
        }
        Self::from_parts(self.ptr, self.block)
    }

    fn clone_from(&mut self, source: &Self) {
        self.assign_from(source);
    }
}

impl<T: ?Sized> Drop for SharedPtr<T> {
    fn drop(&mut self) {
        if let Some(block) = self.block {
            // SAFETY: each handle owns one share and releases it once here.
            unsafe { ControlBlock::release(block) };
        }
    }
}

impl<T: ?Sized> Default for SharedPtr<T> {
    /// Constructs an empty handle.
    fn default() -> Self {
        Self::null()
    }
}

impl<T: Send + Sync + 'static> From<T> for SharedPtr<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized + Send + Sync + 'static> From<Box<T>> for SharedPtr<T> {
    fn from(boxed: Box<T>) -> Self {
        Self::from_box(boxed)
    }
}

impl<T: ?Sized> AsRef<T> for SharedPtr<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

// ============================================================================
// Comparison
// ============================================================================

/// Handles compare by reported pointee address, not by owner, so aliases of
/// the same address are equal however they were built.
impl<T: ?Sized, U: ?Sized> PartialEq<SharedPtr<U>> for SharedPtr<T> {
    fn eq(&self, other: &SharedPtr<U>) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: ?Sized> Eq for SharedPtr<T> {}

impl<T: ?Sized> Hash for SharedPtr<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

/// The null sentinel: compares equal to every handle without a pointee.
///
/// ```
/// use shared_ptr::{Null, SharedPtr};
///
/// let sp = SharedPtr::<String>::default();
/// assert!(sp == Null && Null == sp);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Null;

impl<T: ?Sized> PartialEq<Null> for SharedPtr<T> {
    fn eq(&self, _other: &Null) -> bool {
        self.is_null()
    }
}

impl<T: ?Sized> PartialEq<SharedPtr<T>> for Null {
    fn eq(&self, other: &SharedPtr<T>) -> bool {
        other.is_null()
    }
}

// ============================================================================
// Formatting
// ============================================================================

impl<T: ?Sized + fmt::Debug> fmt::Debug for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("SharedPtr").field(&value).finish(),
            None => write!(f, "SharedPtr(<null>)"),
        }
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Display::fmt(value, f),
            None => f.write_str("null"),
        }
    }
}

impl<T: ?Sized> fmt::Pointer for SharedPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.addr(), f)
    }
}

// ============================================================================
// Send + Sync trait implementations
// ============================================================================

// SAFETY: the count is atomic and the managed object is `Send + Sync` by
// construction; handing out `&T` across threads requires `T: Sync`.
unsafe impl<T: ?Sized + Send + Sync> Send for SharedPtr<T> {}
// SAFETY: see above.
unsafe impl<T: ?Sized + Send + Sync> Sync for SharedPtr<T> {}
