//! Runtime prelude emitted at the top of every translation unit.
//!
//! Defines the handle types every other piece of generated code relies on:
//!
//! - `struct Ref`: pointer to a value plus its control block (`NULL` for
//!   values living in a stack slot)
//! - `struct __koral_TraitRef`: a `Ref` plus a vtable pointer
//! - `struct __koral_Closure`: function pointer plus environment control
//!   block (`NULL` when nothing is captured)
//! - `struct __koral_Control`: atomic count, destructor, payload pointer
//!
//! `__koral_retain` and `__koral_release` accept `NULL` and do nothing with
//! it, so stack references flow through the same copy/drop paths as heap
//! ones. Releasing the last count runs the destructor on the payload, then
//! frees the payload and the control block.

use std::fmt::Write as _;

const HEADER: &str = r#"#include <math.h>
#include <stdatomic.h>
#include <stdbool.h>
#include <stddef.h>
#include <stdint.h>
#include <stdio.h>
#include <stdlib.h>

typedef void (*__koral_Dtor)(void*);

struct Ref {
    void* ptr;
    void* control;
};

struct __koral_TraitRef {
    void* ptr;
    void* control;
    const void* vtable;
};

struct __koral_Closure {
    void* fn;
    void* env;
};

struct __koral_Control {
    _Atomic intptr_t count;
    __koral_Dtor dtor;
    void* ptr;
};

static void __koral_panic(const char* message) {
    fprintf(stderr, "panic: %s\n", message);
    abort();
}

static void __koral_retain(void* raw_control) {
    if (raw_control == NULL) {
        return;
    }
    struct __koral_Control* control = (struct __koral_Control*)raw_control;
    atomic_fetch_add_explicit(&control->count, 1, memory_order_relaxed);
}

static void __koral_release(void* raw_control) {
    if (raw_control == NULL) {
        return;
    }
    struct __koral_Control* control = (struct __koral_Control*)raw_control;
    if (atomic_fetch_sub_explicit(&control->count, 1, memory_order_acq_rel) == 1) {
        if (control->dtor != NULL) {
            control->dtor(control->ptr);
        }
        free(control->ptr);
        free(control);
    }
}

static struct Ref __koral_new_ref(size_t size, __koral_Dtor dtor) {
    struct __koral_Control* control = (struct __koral_Control*)malloc(sizeof(struct __koral_Control));
    void* ptr = malloc(size == 0 ? 1 : size);
    if (control == NULL || ptr == NULL) {
        __koral_panic("out of memory");
    }
    atomic_init(&control->count, 1);
    control->dtor = dtor;
    control->ptr = ptr;
    struct Ref result = { .ptr = ptr, .control = control };
    return result;
}

static void __koral_Ref_drop(void* raw) {
    __koral_release(((struct Ref*)raw)->control);
}

static void __koral_TraitRef_drop(void* raw) {
    __koral_release(((struct __koral_TraitRef*)raw)->control);
}

static void __koral_Closure_drop(void* raw) {
    __koral_release(((struct __koral_Closure*)raw)->env);
}
"#;

const CHECKED_MACROS: &str = r#"
#define KORAL_DEFINE_CHECKED_ARITH(type, suffix) \
    static inline type __koral_checked_add_##suffix(type a, type b) { \
        type result; \
        if (__builtin_add_overflow(a, b, &result)) { __koral_panic("integer overflow in add"); } \
        return result; \
    } \
    static inline type __koral_checked_sub_##suffix(type a, type b) { \
        type result; \
        if (__builtin_sub_overflow(a, b, &result)) { __koral_panic("integer overflow in sub"); } \
        return result; \
    } \
    static inline type __koral_checked_mul_##suffix(type a, type b) { \
        type result; \
        if (__builtin_mul_overflow(a, b, &result)) { __koral_panic("integer overflow in mul"); } \
        return result; \
    }

#define KORAL_DEFINE_CHECKED_DIV(type, suffix, is_signed, min) \
    static inline type __koral_checked_div_##suffix(type a, type b) { \
        if (b == 0) { __koral_panic("division by zero"); } \
        if ((is_signed) && b == (type)-1 && a == (min)) { __koral_panic("integer overflow in div"); } \
        return a / b; \
    } \
    static inline type __koral_checked_rem_##suffix(type a, type b) { \
        if (b == 0) { __koral_panic("division by zero"); } \
        if ((is_signed) && b == (type)-1 && a == (min)) { return 0; } \
        return a % b; \
    }
"#;

/// `(C type, helper suffix, signed, minimum)` for every integer kind.
const INTEGER_TYPES: &[(&str, &str, bool, &str)] = &[
    ("intptr_t", "isize", true, "INTPTR_MIN"),
    ("int8_t", "i8", true, "INT8_MIN"),
    ("int16_t", "i16", true, "INT16_MIN"),
    ("int32_t", "i32", true, "INT32_MIN"),
    ("int64_t", "i64", true, "INT64_MIN"),
    ("uintptr_t", "usize", false, "0"),
    ("uint8_t", "u8", false, "0"),
    ("uint16_t", "u16", false, "0"),
    ("uint32_t", "u32", false, "0"),
    ("uint64_t", "u64", false, "0"),
];

/// Render the prelude.
pub(crate) fn prelude(checked_arithmetic: bool) -> String {
    let mut out = String::from(HEADER);
    if checked_arithmetic {
        out.push_str(CHECKED_MACROS);
        out.push('\n');
        for (ty, suffix, signed, min) in INTEGER_TYPES {
            let _ = writeln!(out, "KORAL_DEFINE_CHECKED_ARITH({ty}, {suffix})");
            let _ = writeln!(
                out,
                "KORAL_DEFINE_CHECKED_DIV({ty}, {suffix}, {}, {min})",
                u8::from(*signed)
            );
        }
    }
    out
}
