use pretty_assertions::assert_eq;

use koral_ir::{BinaryOp, CaptureMode, GlobalDecl, Intrinsic, Stmt, StringInterner, Type};

use super::*;
use crate::test_helpers::*;

fn int_ref() -> Type {
    Type::reference(Type::INT)
}

fn reason(results: &EscapeResults, owner: Name, local: Name) -> Option<EscapeReason> {
    results.locals(owner).and_then(|l| l.reason(local))
}

// ── Local escape rules ──────────────────────────────────────

#[test]
fn conditionally_returned_refs_escape() {
    let names = StringInterner::new();
    let (f, c, a, b) = (
        names.intern("pick"),
        names.intern("c"),
        names.intern("a"),
        names.intern("b"),
    );
    let body = block(
        vec![let_(a, int(1)), let_(b, int(2))],
        Some(if_else(
            var(c, Type::BOOL),
            block(vec![], Some(reference(var(a, Type::INT)))),
            Some(block(vec![], Some(reference(var(b, Type::INT))))),
        )),
    );
    let program = Program {
        functions: vec![func(f, vec![param(c, Type::BOOL)], int_ref(), body)],
        ..Program::default()
    };

    let results = analyze_program(&program);
    assert_eq!(reason(&results, f, a), Some(EscapeReason::Returned));
    assert_eq!(reason(&results, f, b), Some(EscapeReason::Returned));
    assert!(!results.is_stack_safe(f, a));
}

#[test]
fn ref_used_locally_stays_on_stack() {
    let names = StringInterner::new();
    let (f, a, r) = (names.intern("local"), names.intern("a"), names.intern("r"));
    let body = block(
        vec![let_(a, int(1)), let_(r, reference(var(a, Type::INT)))],
        Some(deref(var(r, int_ref()))),
    );
    let program = Program {
        functions: vec![func(f, vec![], Type::INT, body)],
        ..Program::default()
    };

    let results = analyze_program(&program);
    assert!(results.is_stack_safe(f, a));
    assert!(results.locals(f).is_some_and(LocalEscapes::is_empty));
}

#[test]
fn ref_stored_in_struct_field_escapes() {
    let names = StringInterner::new();
    let (f, holder, slot, a) = (
        names.intern("store"),
        names.intern("Holder"),
        names.intern("slot"),
        names.intern("a"),
    );
    let body = block(
        vec![
            let_(a, int(1)),
            let_(
                names.intern("h"),
                struct_lit(holder, vec![(slot, reference(var(a, Type::INT)))]),
            ),
        ],
        None,
    );
    let program = Program {
        functions: vec![func(f, vec![], Type::VOID, body)],
        ..Program::default()
    };

    let results = analyze_program(&program);
    assert_eq!(reason(&results, f, a), Some(EscapeReason::StoredToField));
}

#[test]
fn captured_binding_escapes() {
    let names = StringInterner::new();
    let (f, a, k) = (names.intern("make"), names.intern("a"), names.intern("k"));
    let body = block(
        vec![
            let_(a, int(1)),
            let_(
                k,
                closure(
                    vec![],
                    Type::INT,
                    vec![capture(a, Type::INT, CaptureMode::ByReference)],
                    var(a, Type::INT),
                ),
            ),
        ],
        None,
    );
    let program = Program {
        functions: vec![func(f, vec![], Type::VOID, body)],
        ..Program::default()
    };

    let results = analyze_program(&program);
    assert_eq!(reason(&results, f, a), Some(EscapeReason::CapturedByClosure));
    assert!(results.is_stack_safe(f, k));
}

#[test]
fn pointer_write_escapes_through_constructor() {
    let names = StringInterner::new();
    let (f, p, holder, slot, a, b) = (
        names.intern("put"),
        names.intern("p"),
        names.intern("Holder"),
        names.intern("slot"),
        names.intern("a"),
        names.intern("b"),
    );
    let ptr_ty = Type::pointer(Type::Struct(holder));
    let body = block(
        vec![
            let_(a, int(1)),
            let_(b, int(2)),
            Stmt::Expr(intrinsic(
                Intrinsic::Write,
                vec![
                    var(p, ptr_ty.clone()),
                    struct_lit(holder, vec![(slot, reference(var(a, Type::INT)))]),
                ],
                Type::VOID,
            )),
            Stmt::Expr(intrinsic(
                Intrinsic::Write,
                vec![
                    var(names.intern("q"), Type::pointer(int_ref())),
                    reference(var(b, Type::INT)),
                ],
                Type::VOID,
            )),
        ],
        None,
    );
    let program = Program {
        functions: vec![func(
            f,
            vec![
                param(p, ptr_ty),
                param(names.intern("q"), Type::pointer(int_ref())),
            ],
            Type::VOID,
            body,
        )],
        ..Program::default()
    };

    let results = analyze_program(&program);
    assert!(!results.is_stack_safe(f, a));
    assert_eq!(reason(&results, f, b), Some(EscapeReason::StoredThroughPointer));
}

#[test]
fn assignment_to_outer_binding_outlives_scope() {
    let names = StringInterner::new();
    let (f, a, r, b) = (
        names.intern("swap"),
        names.intern("a"),
        names.intern("r"),
        names.intern("b"),
    );
    let inner = block(
        vec![
            let_(b, int(2)),
            assign(var(r, int_ref()), reference(var(b, Type::INT))),
        ],
        None,
    );
    let body = block(
        vec![
            let_(a, int(1)),
            let_(r, reference(var(a, Type::INT))),
            Stmt::Expr(inner),
        ],
        Some(deref(var(r, int_ref()))),
    );
    let program = Program {
        functions: vec![func(f, vec![], Type::INT, body)],
        ..Program::default()
    };

    let results = analyze_program(&program);
    assert_eq!(reason(&results, f, b), Some(EscapeReason::OutlivesScope));
    assert!(results.is_stack_safe(f, a));
}

#[test]
fn global_initializer_locals_are_analyzed() {
    let names = StringInterner::new();
    let (g, a) = (names.intern("CELL"), names.intern("a"));
    let program = Program {
        globals: vec![GlobalDecl {
            name: g,
            ty: int_ref(),
            init: block(vec![let_(a, int(7))], Some(reference(var(a, Type::INT)))),
        }],
        ..Program::default()
    };

    let results = analyze_program(&program);
    assert_eq!(reason(&results, g, a), Some(EscapeReason::Returned));
}

// ── Interprocedural summaries ───────────────────────────────

#[test]
fn escaping_param_propagates_through_call_chain() {
    let names = StringInterner::new();
    let (outer, middle, inner, peek) = (
        names.intern("outer"),
        names.intern("middle"),
        names.intern("inner"),
        names.intern("peek"),
    );
    let (p, x, y, r) = (names.intern("p"), names.intern("x"), names.intern("y"), names.intern("r"));

    let program = Program {
        functions: vec![
            func(
                outer,
                vec![],
                Type::INT,
                block(
                    vec![
                        let_(x, int(1)),
                        let_(y, int(2)),
                        let_(r, call(middle, vec![reference(var(x, Type::INT))], int_ref())),
                        Stmt::Expr(call(peek, vec![reference(var(y, Type::INT))], Type::INT)),
                    ],
                    Some(deref(var(r, int_ref()))),
                ),
            ),
            func(
                middle,
                vec![param(p, int_ref())],
                int_ref(),
                call(inner, vec![var(p, int_ref())], int_ref()),
            ),
            func(inner, vec![param(p, int_ref())], int_ref(), var(p, int_ref())),
            func(peek, vec![param(p, int_ref())], Type::INT, deref(var(p, int_ref()))),
        ],
        ..Program::default()
    };

    let results = analyze_program(&program);
    let escapes = |f| results.summary(f).map(|s| s.param_escapes(0));
    assert_eq!(escapes(inner), Some(true));
    assert_eq!(escapes(middle), Some(true));
    assert_eq!(escapes(peek), Some(false));
    assert_eq!(reason(&results, outer, x), Some(EscapeReason::PassedToEscapingParam));
    assert!(results.is_stack_safe(outer, y));
}

#[test]
fn mutual_recursion_reaches_fixpoint() {
    let names = StringInterner::new();
    let (even, odd, sink) = (names.intern("even"), names.intern("odd"), names.intern("sink"));
    let (p, n) = (names.intern("p"), names.intern("n"));
    let params = || vec![param(p, int_ref()), param(n, Type::INT)];
    let recurse = |callee| {
        call(
            callee,
            vec![var(p, int_ref()), binary(BinaryOp::Sub, var(n, Type::INT), int(1))],
            Type::VOID,
        )
    };
    let is_zero = || binary(BinaryOp::Eq, var(n, Type::INT), int(0));

    // `even` is visited first and only escapes `p` through `odd`.
    let program = Program {
        functions: vec![
            func(
                even,
                params(),
                Type::VOID,
                if_else(is_zero(), block(vec![], None), Some(recurse(odd))),
            ),
            func(
                odd,
                params(),
                Type::VOID,
                if_else(
                    is_zero(),
                    call(sink, vec![var(p, int_ref())], Type::VOID),
                    Some(recurse(even)),
                ),
            ),
            extern_func(sink, vec![param(p, int_ref())], Type::VOID),
        ],
        ..Program::default()
    };

    let results = analyze_program(&program);
    for f in [even, odd] {
        let summary = results.summary(f).cloned().unwrap_or_default();
        assert_eq!(summary.params, vec![EscapeState::Escapes, EscapeState::NoEscape]);
    }
    assert_eq!(
        results.summary(sink),
        Some(&EscapeSummary::all_escaping(1))
    );
}

#[test]
fn unknown_and_indirect_callees_escape_arguments() {
    let names = StringInterner::new();
    let (f, k, a, b) = (
        names.intern("f"),
        names.intern("k"),
        names.intern("a"),
        names.intern("b"),
    );
    let k_ty = Type::function(vec![int_ref()], Type::VOID);
    let body = block(
        vec![
            let_(a, int(1)),
            let_(b, int(2)),
            Stmt::Expr(call(
                names.intern("nowhere"),
                vec![reference(var(a, Type::INT))],
                Type::VOID,
            )),
            Stmt::Expr(call_indirect(
                var(k, k_ty.clone()),
                vec![reference(var(b, Type::INT))],
            )),
        ],
        None,
    );
    let program = Program {
        functions: vec![func(f, vec![param(k, k_ty)], Type::VOID, body)],
        ..Program::default()
    };

    let results = analyze_program(&program);
    assert!(!results.is_stack_safe(f, a));
    assert!(!results.is_stack_safe(f, b));
    assert_eq!(
        results.summary(f).map(|s| s.params.clone()),
        Some(vec![EscapeState::Escapes])
    );
}

// ── Call graph ──────────────────────────────────────────────

#[test]
fn components_come_out_callees_first() {
    let names = StringInterner::new();
    let (main, a, b, leaf) = (
        names.intern("main"),
        names.intern("a"),
        names.intern("b"),
        names.intern("leaf"),
    );
    let program = Program {
        functions: vec![
            func(main, vec![], Type::VOID, call(a, vec![], Type::VOID)),
            func(b, vec![], Type::VOID, call(a, vec![], Type::VOID)),
            func(
                a,
                vec![],
                Type::VOID,
                block(
                    vec![Stmt::Expr(call(leaf, vec![], Type::VOID))],
                    Some(call(b, vec![], Type::VOID)),
                ),
            ),
            func(leaf, vec![], Type::VOID, block(vec![], None)),
        ],
        ..Program::default()
    };

    let sccs = CallGraph::build(&program).sccs();
    assert_eq!(sccs, vec![vec![leaf], vec![b, a], vec![main]]);
}

// ── Report ──────────────────────────────────────────────────

#[test]
fn report_lists_heap_locals_with_resolved_names() {
    let names = StringInterner::new();
    let (pick, c, a, b) = (
        names.intern("pick"),
        names.intern("c"),
        names.intern("a"),
        names.intern("b"),
    );
    let (store, holder, slot, h) = (
        names.intern("store"),
        names.intern("Holder"),
        names.intern("slot"),
        names.intern("h"),
    );
    let pick_body = block(
        vec![let_(a, int(1)), let_(b, int(2))],
        Some(if_else(
            var(c, Type::BOOL),
            block(vec![], Some(reference(var(a, Type::INT)))),
            Some(block(vec![], Some(reference(var(b, Type::INT))))),
        )),
    );
    let store_body = block(
        vec![
            let_(a, int(1)),
            let_(h, struct_lit(holder, vec![(slot, reference(var(a, Type::INT)))])),
        ],
        None,
    );
    let program = Program {
        functions: vec![
            func(pick, vec![param(c, Type::BOOL)], int_ref(), pick_body),
            func(store, vec![], Type::VOID, store_body),
        ],
        ..Program::default()
    };

    let lines: Vec<String> = analyze_program(&program)
        .report(&program, &names)
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(
        lines,
        vec![
            "[escape-analysis] Variable 'a' escapes to return value in function 'pick'",
            "[escape-analysis] Variable 'b' escapes to return value in function 'pick'",
            "[escape-analysis] Variable 'a' escapes to struct field in function 'store'",
        ]
    );
}

#[test]
fn report_is_empty_when_nothing_escapes() {
    let names = StringInterner::new();
    let (f, a, r) = (names.intern("local"), names.intern("a"), names.intern("r"));
    let body = block(
        vec![let_(a, int(1)), let_(r, reference(var(a, Type::INT)))],
        Some(deref(var(r, int_ref()))),
    );
    let program = Program {
        functions: vec![func(f, vec![], Type::INT, body)],
        ..Program::default()
    };

    assert!(analyze_program(&program).report(&program, &names).is_empty());
}
