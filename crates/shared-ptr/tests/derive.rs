//! Tests for `#[derive(Upcast)]`.

use shared_ptr::{static_pointer_cast, AsAny, SharedPtr, Upcast};
use std::fmt::Debug;

trait Named: Send + Sync {
    fn name(&self) -> String;
}

trait Tagged: AsAny + Send + Sync {
    fn tag(&self) -> u8;
}

#[derive(Debug)]
struct Base {
    id: u32,
}

#[derive(Upcast)]
#[upcast(dyn Named, dyn Tagged)]
struct Derived {
    extra: u64,
    #[upcast]
    base: Base,
}

impl Named for Derived {
    fn name(&self) -> String {
        format!("derived-{}", self.base.id)
    }
}

impl Tagged for Derived {
    fn tag(&self) -> u8 {
        7
    }
}

#[derive(Upcast)]
struct Wrapper(u8, #[upcast] Derived);

#[derive(Upcast)]
#[upcast(dyn Debug + Send + Sync)]
struct Generic<T: Debug + Send + Sync> {
    #[upcast]
    inner: T,
}

impl<T: Debug + Send + Sync> Debug for Generic<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Generic({:?})", self.inner)
    }
}

#[derive(Upcast)]
#[upcast(dyn Named)]
enum Shape {
    Circle,
    Square,
}

impl Named for Shape {
    fn name(&self) -> String {
        match self {
            Self::Circle => "circle".to_owned(),
            Self::Square => "square".to_owned(),
        }
    }
}

mod renamed {
    pub use ::shared_ptr as sp;
}

#[derive(Upcast)]
#[shared_ptr(crate = renamed::sp)]
#[upcast(dyn Named)]
struct Renamed;

impl Named for Renamed {
    fn name(&self) -> String {
        "renamed".to_owned()
    }
}

#[test]
fn test_field_upcast_points_into_object() {
    let derived = SharedPtr::new(Derived {
        extra: 1,
        base: Base { id: 10 },
    });
    let base: SharedPtr<Base> = static_pointer_cast(&derived);

    assert_eq!(base.id, 10);
    assert_eq!(derived.extra, 1);
    assert!(std::ptr::eq(base.as_ptr(), &derived.base));
    assert!(base.owner_eq(&derived));
}

#[test]
fn test_multiple_trait_objects() {
    let derived = SharedPtr::new(Derived {
        extra: 0,
        base: Base { id: 2 },
    });
    let named: SharedPtr<dyn Named> = static_pointer_cast(&derived);
    let tagged: SharedPtr<dyn Tagged> = static_pointer_cast(&derived);

    assert_eq!(named.name(), "derived-2");
    assert_eq!(tagged.tag(), 7);
    assert!(named == tagged);
    assert_eq!(derived.use_count(), 3);
}

#[test]
fn test_tuple_struct_field() {
    let wrapper = SharedPtr::new(Wrapper(
        3,
        Derived {
            extra: 4,
            base: Base { id: 5 },
        },
    ));
    assert_eq!(wrapper.0, 3);

    let derived: SharedPtr<Derived> = wrapper.upcast();
    assert_eq!(derived.extra, 4);

    // Upcasts chain through intermediate handles.
    let base: SharedPtr<Base> = derived.upcast();
    assert_eq!(base.id, 5);
    assert_eq!(base.use_count(), 1);
}

#[test]
fn test_generic_struct() {
    let generic = SharedPtr::new(Generic { inner: 11_i64 });
    let shown: SharedPtr<dyn Debug + Send + Sync> = static_pointer_cast(&generic);
    let inner: SharedPtr<i64> = static_pointer_cast(&generic);

    assert_eq!(format!("{shown:?}"), "SharedPtr(Generic(11))");
    assert_eq!(*inner, 11);
}

#[test]
fn test_enum_trait_object() {
    let shapes: Vec<SharedPtr<dyn Named>> = vec![
        SharedPtr::new(Shape::Circle).upcast(),
        SharedPtr::new(Shape::Square).upcast(),
    ];
    let names: Vec<String> = shapes.iter().map(|s| s.name()).collect();
    assert_eq!(names, ["circle", "square"]);
}

#[test]
fn test_crate_path_override() {
    let named: SharedPtr<dyn Named> = SharedPtr::new(Renamed).upcast();
    assert_eq!(named.name(), "renamed");
}

#[test]
fn test_adopt_through_derived_upcast() {
    let named: SharedPtr<dyn Named> = SharedPtr::adopt(Box::new(Derived {
        extra: 0,
        base: Base { id: 8 },
    }));
    assert_eq!(named.name(), "derived-8");
    assert!(named
        .managed_type_name()
        .is_some_and(|n| n.ends_with("Derived")));
}
