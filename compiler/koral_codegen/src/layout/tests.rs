use pretty_assertions::assert_eq;

use koral_ir::{Field, UnionCase};

use super::*;
use crate::error::InternalError;

fn program_with(names: &StringInterner) -> Program {
    let point = names.intern("geo.Point");
    let line = names.intern("geo.Line");
    let shape = names.intern("Shape");
    let x = names.intern("x");
    let y = names.intern("y");
    let a = names.intern("a");
    let b = names.intern("b");

    Program {
        // `Line` is declared before `Point` although it contains it by value.
        structs: vec![
            StructDecl {
                name: line,
                fields: vec![
                    Field { name: a, ty: Type::Struct(point) },
                    Field { name: b, ty: Type::Struct(point) },
                ],
                equality: None,
            },
            StructDecl {
                name: point,
                fields: vec![
                    Field { name: x, ty: Type::INT },
                    Field { name: y, ty: Type::INT },
                ],
                equality: None,
            },
        ],
        unions: vec![UnionDecl {
            name: shape,
            cases: vec![
                UnionCase {
                    name: names.intern("Segment"),
                    fields: vec![Field { name: a, ty: Type::Struct(line) }],
                },
                UnionCase {
                    name: names.intern("Empty"),
                    fields: vec![],
                },
            ],
            equality: None,
        }],
        ..Program::default()
    }
}

// ── Classification ──────────────────────────────────────────

#[test]
fn scalars_and_pointers_are_trivial() {
    let names = StringInterner::new();
    let program = program_with(&names);
    let layout = TypeLayout::new(&program, &names);

    for ty in [
        Type::INT,
        Type::BOOL,
        Type::Scalar(ScalarKind::Float64),
        Type::pointer(Type::Struct(names.intern("geo.Point"))),
    ] {
        assert_eq!(layout.classify(&ty).unwrap(), ValueClass::Trivial);
        assert!(!layout.needs_copy(&ty).unwrap());
        assert!(!layout.needs_drop(&ty).unwrap());
    }
}

#[test]
fn aggregates_always_need_copy_and_drop() {
    let names = StringInterner::new();
    let program = program_with(&names);
    let layout = TypeLayout::new(&program, &names);

    // All-scalar fields still get generated routines.
    let point = Type::Struct(names.intern("geo.Point"));
    assert_eq!(layout.classify(&point).unwrap(), ValueClass::Aggregate);
    assert!(layout.needs_copy(&point).unwrap());
    assert!(layout.needs_drop(&point).unwrap());
}

#[test]
fn handles_are_counted() {
    let names = StringInterner::new();
    let program = program_with(&names);
    let layout = TypeLayout::new(&program, &names);

    assert_eq!(
        layout.classify(&Type::reference(Type::INT)).unwrap(),
        ValueClass::Handle(HandleKind::Ref)
    );
    assert_eq!(
        layout.classify(&Type::function(vec![], Type::VOID)).unwrap(),
        ValueClass::Handle(HandleKind::Closure)
    );
    let dyn_ty = Type::TraitObject {
        trait_name: names.intern("Drawable"),
        args: vec![],
    };
    assert_eq!(
        layout.classify(&dyn_ty).unwrap(),
        ValueClass::Handle(HandleKind::TraitRef)
    );
}

#[test]
fn generics_are_fatal() {
    let names = StringInterner::new();
    let program = program_with(&names);
    let layout = TypeLayout::new(&program, &names);

    let err = layout
        .representation_of(&Type::reference(Type::GenericParam(names.intern("T"))))
        .unwrap_err();
    assert_eq!(err.kind(), &InternalError::UnresolvedGeneric("T".to_owned()));

    let err = layout
        .needs_drop(&Type::GenericInstance {
            template: names.intern("List"),
            args: vec![Type::INT],
        })
        .unwrap_err();
    assert_eq!(
        err.kind(),
        &InternalError::UnresolvedInstance("List[Int]".to_owned())
    );
}

#[test]
fn unknown_aggregate_is_fatal() {
    let names = StringInterner::new();
    let program = program_with(&names);
    let layout = TypeLayout::new(&program, &names);

    let err = layout
        .classify(&Type::Struct(names.intern("Missing")))
        .unwrap_err();
    assert_eq!(err.kind(), &InternalError::UnknownType("Missing".to_owned()));
}

// ── Representation ──────────────────────────────────────────

#[test]
fn representations() {
    let names = StringInterner::new();
    let program = program_with(&names);
    let layout = TypeLayout::new(&program, &names);
    let point = Type::Struct(names.intern("geo.Point"));

    assert_eq!(layout.representation_of(&Type::INT).unwrap(), "intptr_t");
    assert_eq!(layout.representation_of(&point).unwrap(), "struct geo_Point");
    assert_eq!(
        layout.representation_of(&Type::reference(point.clone())).unwrap(),
        "struct Ref"
    );
    assert_eq!(
        layout.representation_of(&Type::pointer(point.clone())).unwrap(),
        "struct geo_Point*"
    );
    assert_eq!(
        layout.representation_of(&Type::pointer(Type::VOID)).unwrap(),
        "void*"
    );
    assert_eq!(
        layout
            .fn_pointer_type(&[Type::INT, point], &Type::BOOL, true)
            .unwrap(),
        "bool (*)(void*, intptr_t, struct geo_Point)"
    );
    assert_eq!(
        layout.fn_pointer_type(&[], &Type::VOID, false).unwrap(),
        "void (*)(void)"
    );
}

#[test]
fn copy_and_drop_statements() {
    let names = StringInterner::new();
    let program = program_with(&names);
    let layout = TypeLayout::new(&program, &names);
    let point = Type::Struct(names.intern("geo.Point"));
    let r = Type::reference(point.clone());

    assert_eq!(layout.copy_expr("p", &point).unwrap(), "__koral_geo_Point_copy(&p)");
    assert_eq!(layout.retain_stmt("p", &point).unwrap(), None);
    assert_eq!(layout.copy_expr("r", &r).unwrap(), "r");
    assert_eq!(
        layout.retain_stmt("r", &r).unwrap().as_deref(),
        Some("__koral_retain(r.control);")
    );
    assert_eq!(
        layout.drop_stmt("p", &point).unwrap().as_deref(),
        Some("__koral_geo_Point_drop(&p);")
    );
    assert_eq!(
        layout
            .drop_stmt("f", &Type::function(vec![], Type::VOID))
            .unwrap()
            .as_deref(),
        Some("__koral_release(f.env);")
    );
    assert_eq!(layout.drop_stmt("n", &Type::INT).unwrap(), None);
    assert_eq!(layout.dtor_expr(&Type::INT).unwrap(), "NULL");
    assert_eq!(layout.dtor_expr(&r).unwrap(), "__koral_Ref_drop");
}

// ── Ordering ────────────────────────────────────────────────

#[test]
fn definition_order_puts_fields_first() {
    let names = StringInterner::new();
    let program = program_with(&names);
    let layout = TypeLayout::new(&program, &names);

    let order: Vec<&str> = layout
        .definition_order()
        .unwrap()
        .iter()
        .map(|a| names.lookup(a.name()))
        .collect();
    assert_eq!(order, vec!["geo.Point", "geo.Line", "Shape"]);
}

#[test]
fn by_value_cycle_is_fatal() {
    let names = StringInterner::new();
    let node = names.intern("Node");
    let program = Program {
        structs: vec![StructDecl {
            name: node,
            fields: vec![Field {
                name: names.intern("next"),
                ty: Type::Struct(node),
            }],
            equality: None,
        }],
        ..Program::default()
    };
    let layout = TypeLayout::new(&program, &names);
    assert!(matches!(
        layout.definition_order().unwrap_err().kind(),
        InternalError::Malformed { what: "type", .. }
    ));
}
