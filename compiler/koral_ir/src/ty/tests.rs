use pretty_assertions::assert_eq;

use super::*;
use crate::StringInterner;

#[test]
fn display_nested_types() {
    let interner = StringInterner::new();
    let shape = interner.intern("Shape");
    let eq = interner.intern("Eq");

    let ty = Type::function(
        vec![Type::reference(Type::Struct(shape)), Type::INT],
        Type::TraitObject {
            trait_name: eq,
            args: vec![Type::pointer(Type::Scalar(ScalarKind::UInt8))],
        },
    );
    assert_eq!(
        ty.display(&interner).to_string(),
        "(Shape ref, Int) -> Eq[Pointer[UInt8]]"
    );
}

#[test]
fn substitute_replaces_only_matching_params() {
    let interner = StringInterner::new();
    let t = interner.intern("T");
    let u = interner.intern("U");

    let ty = Type::function(
        vec![Type::GenericParam(t), Type::GenericParam(u)],
        Type::reference(Type::GenericParam(t)),
    );
    let out = ty.substitute(&[t], &[Type::BOOL]);
    assert_eq!(
        out,
        Type::function(
            vec![Type::BOOL, Type::GenericParam(u)],
            Type::reference(Type::BOOL),
        )
    );
}

#[test]
fn reference_like_classification() {
    assert!(Type::reference(Type::INT).is_reference_like());
    assert!(Type::function(vec![], Type::VOID).is_reference_like());
    assert!(!Type::INT.is_reference_like());
    assert!(Type::NEVER.is_unit_like());
    assert!(Type::VOID.is_unit_like());
    assert!(!Type::BOOL.is_unit_like());
}
