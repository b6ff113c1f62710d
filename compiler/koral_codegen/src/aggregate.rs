//! Struct and union definitions with their copy and drop routines.
//!
//! ```text
//! struct Pair { struct Ref a; intptr_t b; };
//! struct Pair __koral_Pair_copy(const struct Pair* src);
//! void __koral_Pair_drop(void* raw);
//! ```
//!
//! Copy starts from a bitwise copy and then deep-copies aggregate fields
//! and retains handle fields. Drop takes `void*` so it can serve as the
//! destructor of a heap cell holding the type.

use koral_ir::{Field, Type, UnionDecl};

use crate::context::CodeBuffer;
use crate::error::CodegenResult;
use crate::layout::{Aggregate, TypeLayout};
use crate::names::c_ident;

/// Rendered aggregate text.
pub(crate) struct Parts {
    /// Forward declarations, type definitions and routine prototypes.
    pub(crate) declarations: String,
    /// Copy and drop routine bodies.
    pub(crate) definitions: String,
}

/// Render every aggregate in `order`, which must define field types first.
pub(crate) fn render(layout: &TypeLayout<'_>, order: &[Aggregate<'_>], indent_width: usize) -> CodegenResult<Parts> {
    let mut decls = CodeBuffer::new(indent_width);
    let mut defs = CodeBuffer::new(indent_width);
    if order.is_empty() {
        return Ok(Parts {
            declarations: String::new(),
            definitions: String::new(),
        });
    }

    for agg in order {
        decls.line(&format!("{};", repr(layout, agg)?));
    }
    decls.blank();
    for agg in order {
        match agg {
            Aggregate::Struct(s) => define_struct(layout, &repr(layout, agg)?, &s.fields, &mut decls)?,
            Aggregate::Union(u) => define_union(layout, &repr(layout, agg)?, u, &mut decls)?,
        }
    }
    for agg in order {
        let ty = repr(layout, agg)?;
        decls.line(&format!("{ty} {}(const {ty}* src);", layout.copy_fn(agg.name())));
        decls.line(&format!("void {}(void* raw);", layout.drop_fn(agg.name())));
    }
    decls.blank();

    for agg in order {
        render_copy(layout, agg, &mut defs)?;
        render_drop(layout, agg, &mut defs)?;
    }
    Ok(Parts {
        declarations: decls.take(),
        definitions: defs.take(),
    })
}

fn repr(layout: &TypeLayout<'_>, agg: &Aggregate<'_>) -> CodegenResult<String> {
    match agg {
        Aggregate::Struct(s) => layout.representation_of(&Type::Struct(s.name)),
        Aggregate::Union(u) => layout.representation_of(&Type::Union(u.name)),
    }
}

/// Fields that occupy storage.
fn stored(fields: &[Field]) -> impl Iterator<Item = &Field> {
    fields.iter().filter(|f| !f.ty.is_unit_like())
}

fn field_ident(layout: &TypeLayout<'_>, field: &Field) -> String {
    c_ident(layout.names().lookup(field.name))
}

fn define_struct(layout: &TypeLayout<'_>, ty: &str, fields: &[Field], out: &mut CodeBuffer) -> CodegenResult<()> {
    out.line(&format!("{ty} {{"));
    out.indent();
    write_fields(layout, fields, out)?;
    out.dedent();
    out.line("};");
    out.blank();
    Ok(())
}

fn write_fields(layout: &TypeLayout<'_>, fields: &[Field], out: &mut CodeBuffer) -> CodegenResult<()> {
    let mut any = false;
    for field in stored(fields) {
        out.line(&format!(
            "{} {};",
            layout.representation_of(&field.ty)?,
            field_ident(layout, field)
        ));
        any = true;
    }
    // C forbids empty structs.
    if !any {
        out.line("char _empty;");
    }
    Ok(())
}

fn define_union(layout: &TypeLayout<'_>, ty: &str, decl: &UnionDecl, out: &mut CodeBuffer) -> CodegenResult<()> {
    out.line(&format!("{ty} {{"));
    out.indent();
    out.line("int32_t tag;");
    let cases: Vec<_> = decl.cases.iter().filter(|c| stored(&c.fields).next().is_some()).collect();
    if !cases.is_empty() {
        out.line("union {");
        out.indent();
        for case in cases {
            out.line("struct {");
            out.indent();
            write_fields(layout, &case.fields, out)?;
            out.dedent();
            out.line(&format!("}} {};", c_ident(layout.names().lookup(case.name))));
        }
        out.dedent();
        out.line("} data;");
    }
    out.dedent();
    out.line("};");
    out.blank();
    Ok(())
}

/// Statements fixing up `dst` after a bitwise copy from `src`.
fn copy_fixups(layout: &TypeLayout<'_>, fields: &[Field], dst: &str, src: &str) -> CodegenResult<Vec<String>> {
    let mut out = Vec::new();
    for field in stored(fields) {
        let name = field_ident(layout, field);
        let (to, from) = (format!("{dst}.{name}"), format!("{src}.{name}"));
        if let Type::Struct(_) | Type::Union(_) = field.ty {
            out.push(format!("{to} = {};", layout.copy_expr(&from, &field.ty)?));
        } else if let Some(retain) = layout.retain_stmt(&to, &field.ty)? {
            out.push(retain);
        }
    }
    Ok(out)
}

fn drops(layout: &TypeLayout<'_>, fields: &[Field], base: &str) -> CodegenResult<Vec<String>> {
    let mut out = Vec::new();
    for field in stored(fields) {
        let place = format!("{base}.{}", field_ident(layout, field));
        if let Some(drop) = layout.drop_stmt(&place, &field.ty)? {
            out.push(drop);
        }
    }
    Ok(out)
}

fn render_copy(layout: &TypeLayout<'_>, agg: &Aggregate<'_>, out: &mut CodeBuffer) -> CodegenResult<()> {
    let ty = repr(layout, agg)?;
    out.line(&format!("{ty} {}(const {ty}* src) {{", layout.copy_fn(agg.name())));
    out.indent();
    out.line(&format!("{ty} result = *src;"));
    match agg {
        Aggregate::Struct(s) => out.lines(copy_fixups(layout, &s.fields, "result", "(*src)")?),
        Aggregate::Union(u) => {
            let arms = per_case(layout, u, |fields, case| {
                copy_fixups(
                    layout,
                    fields,
                    &format!("result.data.{case}"),
                    &format!("src->data.{case}"),
                )
            })?;
            write_switch(out, "src->tag", arms);
        }
    }
    out.line("return result;");
    out.dedent();
    out.line("}");
    out.blank();
    Ok(())
}

fn render_drop(layout: &TypeLayout<'_>, agg: &Aggregate<'_>, out: &mut CodeBuffer) -> CodegenResult<()> {
    let ty = repr(layout, agg)?;
    out.line(&format!("void {}(void* raw) {{", layout.drop_fn(agg.name())));
    out.indent();
    out.line(&format!("{ty}* self = ({ty}*)raw;"));
    let body = match agg {
        Aggregate::Struct(s) => drops(layout, &s.fields, "(*self)")?,
        Aggregate::Union(u) => {
            let arms = per_case(layout, u, |fields, case| {
                drops(layout, fields, &format!("self->data.{case}"))
            })?;
            let mut sub = CodeBuffer::new(out.width());
            write_switch(&mut sub, "self->tag", arms);
            sub.take().lines().map(str::to_owned).collect()
        }
    };
    if body.is_empty() {
        out.line("(void)self;");
    }
    out.lines(body);
    out.dedent();
    out.line("}");
    out.blank();
    Ok(())
}

/// `(tag, statements)` for every case with something to do.
fn per_case(
    layout: &TypeLayout<'_>,
    decl: &UnionDecl,
    mut f: impl FnMut(&[Field], &str) -> CodegenResult<Vec<String>>,
) -> CodegenResult<Vec<(usize, Vec<String>)>> {
    let mut arms = Vec::new();
    for (tag, case) in decl.cases.iter().enumerate() {
        let stmts = f(&case.fields, &c_ident(layout.names().lookup(case.name)))?;
        if !stmts.is_empty() {
            arms.push((tag, stmts));
        }
    }
    Ok(arms)
}

fn write_switch(out: &mut CodeBuffer, scrutinee: &str, arms: Vec<(usize, Vec<String>)>) {
    if arms.is_empty() {
        return;
    }
    out.line(&format!("switch ({scrutinee}) {{"));
    for (tag, stmts) in arms {
        out.line(&format!("case {tag}:"));
        out.indent();
        out.lines(stmts);
        out.line("break;");
        out.dedent();
    }
    out.line("default:");
    out.indent();
    out.line("break;");
    out.dedent();
    out.line("}");
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use koral_ir::{Program, StringInterner, UnionCase};

    use super::*;

    fn field(names: &StringInterner, name: &str, ty: Type) -> Field {
        Field {
            name: names.intern(name),
            ty,
        }
    }

    #[test]
    fn struct_routines_copy_deep_and_release_handles() {
        let names = StringInterner::new();
        let inner = names.intern("Inner");
        let outer = names.intern("Outer");
        let program = Program {
            structs: vec![
                koral_ir::StructDecl {
                    name: outer,
                    fields: vec![
                        field(&names, "inner", Type::Struct(inner)),
                        field(&names, "shared", Type::reference(Type::INT)),
                        field(&names, "count", Type::INT),
                        field(&names, "nothing", Type::VOID),
                    ],
                    equality: None,
                },
                koral_ir::StructDecl {
                    name: inner,
                    fields: vec![],
                    equality: None,
                },
            ],
            ..Program::default()
        };
        let layout = TypeLayout::new(&program, &names);
        let order = layout.definition_order().unwrap_or_default();
        let parts = render(&layout, &order, 4).unwrap_or_else(|e| panic!("{e}"));

        assert!(parts.declarations.starts_with("struct Inner;\nstruct Outer;\n"));
        assert!(parts.declarations.contains("struct Inner {\n    char _empty;\n};"));
        assert!(parts.declarations.contains(
            "struct Outer {\n    struct Inner inner;\n    struct Ref shared;\n    intptr_t count;\n};"
        ));
        assert!(parts
            .declarations
            .contains("struct Outer __koral_Outer_copy(const struct Outer* src);"));
        assert_eq!(
            parts.definitions.split("\n\n").find(|f| f.contains("__koral_Outer_copy(const")),
            Some(
                "struct Outer __koral_Outer_copy(const struct Outer* src) {\n    struct Outer result = *src;\n    result.inner = __koral_Inner_copy(&(*src).inner);\n    __koral_retain(result.shared.control);\n    return result;\n}"
            )
        );
        assert!(parts.definitions.contains(
            "void __koral_Outer_drop(void* raw) {\n    struct Outer* self = (struct Outer*)raw;\n    __koral_Inner_drop(&(*self).inner);\n    __koral_release((*self).shared.control);\n}"
        ));
        assert!(parts.definitions.contains(
            "void __koral_Inner_drop(void* raw) {\n    struct Inner* self = (struct Inner*)raw;\n    (void)self;\n}"
        ));
    }

    #[test]
    fn union_routines_switch_on_tag() {
        let names = StringInterner::new();
        let option = names.intern("Option");
        let program = Program {
            unions: vec![UnionDecl {
                name: option,
                cases: vec![
                    UnionCase {
                        name: names.intern("None"),
                        fields: vec![],
                    },
                    UnionCase {
                        name: names.intern("Some"),
                        fields: vec![field(&names, "value", Type::reference(Type::INT))],
                    },
                ],
                equality: None,
            }],
            ..Program::default()
        };
        let layout = TypeLayout::new(&program, &names);
        let order = layout.definition_order().unwrap_or_default();
        let parts = render(&layout, &order, 4).unwrap_or_else(|e| panic!("{e}"));

        assert!(parts.declarations.contains(
            "struct Option {\n    int32_t tag;\n    union {\n        struct {\n            struct Ref value;\n        } Some;\n    } data;\n};"
        ));
        assert!(parts.definitions.contains(
            "    switch (src->tag) {\n    case 1:\n        __koral_retain(result.data.Some.value.control);\n        break;\n    default:\n        break;\n    }\n"
        ));
        assert!(parts
            .definitions
            .contains("case 1:\n        __koral_release(self->data.Some.value.control);"));
    }

    #[test]
    fn no_aggregates_render_nothing() {
        let names = StringInterner::new();
        let program = Program::default();
        let layout = TypeLayout::new(&program, &names);
        let parts = render(&layout, &[], 4).unwrap_or_else(|e| panic!("{e}"));
        assert!(parts.declarations.is_empty());
        assert!(parts.definitions.is_empty());
    }
}
