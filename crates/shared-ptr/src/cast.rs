//! Conversions between handles to related pointee types.
//!
//! Two kinds of cast are supported, both built on aliasing construction so the
//! result always shares the source's control block:
//!
//! - [`static_pointer_cast`] uses a compile-time checked [`Upcast`]
//!   conversion and cannot fail.
//! - [`dynamic_pointer_cast`] checks the actual type of the pointee at run
//!   time through [`AsAny`] and returns an empty handle on mismatch.

use std::any::Any;
use std::ptr::NonNull;

use crate::ptr::SharedPtr;

/// A compile-time checked pointer conversion from `Self` to `T`.
///
/// Typical implementations are an unsizing coercion (`Widget` to
/// `dyn Shape`) or a projection to an embedded base field. Both are generated
/// by `#[derive(Upcast)]`. Every type converts to itself.
///
/// # Safety
///
/// `upcast_ptr` must return an address derived from `ptr` that is valid for
/// as long as the allocation `ptr` points into. Returning an address that
/// outlives it, or one that is misaligned for `T`, is undefined behavior once
/// a handle dereferences it.
///
/// # Examples
///
/// ```
/// use shared_ptr::{SharedPtr, Upcast};
///
/// trait Shape: Send + Sync {
///     fn area(&self) -> f64;
/// }
///
/// #[derive(Upcast)]
/// #[upcast(dyn Shape)]
/// struct Square(f64);
///
/// impl Shape for Square {
///     fn area(&self) -> f64 {
///         self.0 * self.0
///     }
/// }
///
/// let shape: SharedPtr<dyn Shape> = SharedPtr::new(Square(2.0)).upcast();
/// assert_eq!(shape.area(), 4.0);
/// ```
pub unsafe trait Upcast<T: ?Sized> {
    /// Convert a pointer to `Self` into a pointer to `T`.
    fn upcast_ptr(ptr: NonNull<Self>) -> NonNull<T>;
}

// SAFETY: the identity conversion returns its input.
unsafe impl<T: ?Sized> Upcast<T> for T {
    #[inline]
    fn upcast_ptr(ptr: NonNull<Self>) -> NonNull<T> {
        ptr
    }
}

/// Run-time type query used by [`dynamic_pointer_cast`].
///
/// Every `'static` type implements it. Make it a supertrait of a trait to
/// allow dynamic casts out of that trait's objects:
///
/// ```
/// use shared_ptr::{dynamic_pointer_cast, AsAny, SharedPtr};
///
/// trait Animal: AsAny + Send + Sync {}
///
/// struct Cat;
/// impl Animal for Cat {}
///
/// let animal: SharedPtr<dyn Animal> = SharedPtr::from_box(Box::new(Cat));
/// let cat = dynamic_pointer_cast::<Cat, _>(&animal);
/// assert!(cat.is_some());
/// ```
pub trait AsAny {
    /// View the concrete value as `dyn Any`.
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Create a handle to `T` sharing ownership with `sp`.
///
/// The conversion is checked at compile time and always succeeds. The use
/// count of the shared block grows by one.
///
/// # Examples
///
/// ```
/// use shared_ptr::{static_pointer_cast, SharedPtr, Upcast};
///
/// struct Base {
///     id: u32,
/// }
///
/// #[derive(Upcast)]
/// struct Derived {
///     #[upcast]
///     base: Base,
///     extra: u64,
/// }
///
/// let derived = SharedPtr::new(Derived { base: Base { id: 7 }, extra: 0 });
/// let base = static_pointer_cast::<Base, _>(&derived);
/// assert_eq!(base.id, 7);
/// assert_eq!(derived.use_count(), 2);
/// ```
#[must_use]
pub fn static_pointer_cast<T, U>(sp: &SharedPtr<U>) -> SharedPtr<T>
where
    T: ?Sized,
    U: ?Sized + Upcast<T>,
{
    sp.clone().upcast()
}

/// Create a handle to `T` sharing ownership with `sp`, if the pointee of `sp`
/// really is a `T`.
///
/// The pointee is checked first. If it is not a `T` but lies inside the
/// object the control block manages, and that object is a `T`, the result
/// points at the managed object: a handle to an embedded base can be cast
/// back to the type it was constructed from.
///
/// On a type mismatch, or when `sp` is empty, an empty handle is returned.
/// The source handle is never modified and a failed cast never destroys
/// anything.
///
/// # Examples
///
/// ```
/// use shared_ptr::{dynamic_pointer_cast, SharedPtr, Upcast};
///
/// struct Base {
///     id: u32,
/// }
///
/// #[derive(Upcast)]
/// struct Derived {
///     #[upcast]
///     base: Base,
///     name: &'static str,
/// }
///
/// let base: SharedPtr<Base> = SharedPtr::new(Derived { base: Base { id: 1 }, name: "d" }).upcast();
/// let derived = dynamic_pointer_cast::<Derived, _>(&base);
/// assert_eq!(derived.name, "d");
/// assert_eq!(base.use_count(), 2);
/// ```
#[must_use]
pub fn dynamic_pointer_cast<T, U>(sp: &SharedPtr<U>) -> SharedPtr<T>
where
    T: Any,
    U: ?Sized + AsAny,
{
    let Some(value) = sp.get() else {
        return SharedPtr::null();
    };
    let target = AsAny::as_any(value)
        .downcast_ref::<T>()
        .map(NonNull::from)
        .or_else(|| sp.managed_object::<T>());
    match target {
        // SAFETY: `target` is the pointee of `sp` or the object its block
        // manages, both valid for as long as that block is alive.
        Some(target) => unsafe { SharedPtr::aliasing(sp, target.as_ptr().cast_const()) },
        None => SharedPtr::null(),
    }
}
