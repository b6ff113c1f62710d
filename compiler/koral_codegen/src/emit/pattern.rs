//! `match` lowering.
//!
//! ```text
//! T __tR;
//! {
//!     <subject>
//!     if (<tests of arm 1>) {
//!         <bindings>
//!         <body>; __tR = ...;
//!         <drops>
//!         goto __mN_end;
//!     }
//!     ...
//!     __koral_panic("no match arm matched");
//! __mN_end:;
//!     <subject drop>
//! }
//! ```
//!
//! Bindings copy out of the subject, except in move mode: an owned
//! subject whose arms are all flat and unguarded is taken apart instead,
//! each matching arm moving the bound parts out and dropping the rest.

use koral_ir::{Expr, MatchArm, Name, Pattern, Type};

use super::{Access, Emitter, Value};
use crate::error::{CodegenResult, InternalError};
use crate::names::c_ident;

enum Test {
    Cond(String),
    /// Constant text, compared with the type's equality routine.
    Text { place: String, ty: Type, text: String },
}

#[derive(Default)]
struct Destructure {
    tests: Vec<Test>,
    binds: Vec<(Name, String, Type)>,
    /// Parts of the subject no binding takes.
    rest: Vec<(String, Type)>,
}

impl Emitter<'_> {
    pub(super) fn emit_match(&mut self, subject: &Expr, arms: &[MatchArm], ty: &Type) -> CodegenResult<Value> {
        let id = self.label_id();
        let end = format!("__m{id}_end");
        let result = if ty.is_unit_like() {
            None
        } else {
            let repr = self.layout.representation_of(ty)?;
            let t = self.temp();
            self.buf.line(&format!("{repr} {t};"));
            Some(t)
        };

        let value = self.emit_expr(subject)?;
        let droppable = self.layout.needs_drop(&subject.ty)?;
        let move_mode = droppable
            && matches!(value, Value::Owned(_))
            && arms
                .iter()
                .all(|a| a.guard.is_none() && a.pattern.is_flat());

        self.buf.line("{");
        self.buf.indent();
        self.frame.scopes.enter_scope();
        let place = match value {
            Value::Void => String::new(),
            Value::Owned(v) if move_mode => v,
            Value::Owned(v) if !droppable => self.into_temp(Value::Owned(v), &subject.ty)?,
            other => self.place_of(other, &subject.ty)?,
        };

        for (i, arm) in arms.iter().enumerate() {
            self.emit_arm(arm, &place, &subject.ty, move_mode, result.as_deref(), ty, &end)
                .map_err(|e| e.within(format!("lowering match arm {i}")))?;
        }

        self.buf.line("__koral_panic(\"no match arm matched\");");
        self.buf.label(&end);
        self.leave_scope()?;
        self.buf.dedent();
        self.buf.line("}");
        Ok(result.map_or(Value::Void, Value::Owned))
    }

    #[expect(
        clippy::too_many_arguments,
        reason = "one arm needs the whole lowering context of its match"
    )]
    fn emit_arm(
        &mut self,
        arm: &MatchArm,
        subject: &str,
        subject_ty: &Type,
        move_mode: bool,
        result: Option<&str>,
        ty: &Type,
        end: &str,
    ) -> CodegenResult<()> {
        let mut parts = Destructure::default();
        self.destructure(&arm.pattern, subject, subject_ty, &mut parts)?;
        let cond = self.emit_tests(&parts.tests)?;

        self.buf.line(&format!("if ({cond}) {{"));
        self.buf.indent();
        let arm_scope = self.frame.scopes.enter_scope();

        for (name, place, bind_ty) in &parts.binds {
            if bind_ty.is_unit_like() {
                self.frame
                    .bindings
                    .insert(*name, (Access::Unit, bind_ty.clone()));
                continue;
            }
            let init = if move_mode {
                place.clone()
            } else {
                self.into_owned(Value::Place(place.clone()), bind_ty)?
            };
            self.bind_value(*name, bind_ty, &init)?;
        }
        if move_mode {
            for (place, rest_ty) in &parts.rest {
                if rest_ty.is_unit_like() {
                    continue;
                }
                if let Some(drop) = self.layout.drop_stmt(place, rest_ty)? {
                    self.buf.line(&drop);
                }
            }
        }

        if let Some(guard) = &arm.guard {
            let g = self.emit_expr(guard)?;
            let g = self.place_of(g, &guard.ty)?;
            self.buf.line(&format!("if ({g}) {{"));
            self.buf.indent();
            self.frame.scopes.enter_scope();
        }

        let value = self.emit_inline(&arm.body)?;
        self.store_result(value, result, ty, &arm.body.ty)?;
        self.cleanup_to(arm_scope, None)?;
        self.buf.line(&format!("goto {end};"));

        if arm.guard.is_some() {
            self.leave_scope_unreachable();
            self.buf.dedent();
            self.buf.line("}");
            // Guard failed: drop the bindings and try the next arm.
            self.leave_scope()?;
        } else {
            self.leave_scope_unreachable();
        }
        self.buf.dedent();
        self.buf.line("}");
        Ok(())
    }

    fn destructure(&self, pattern: &Pattern, place: &str, ty: &Type, out: &mut Destructure) -> CodegenResult<()> {
        match pattern {
            Pattern::Wildcard => out.rest.push((place.to_owned(), ty.clone())),
            Pattern::Binding { name, .. } => out.binds.push((*name, place.to_owned(), ty.clone())),
            Pattern::Int(v) => {
                let literal = self.int_literal(*v, ty)?;
                out.tests.push(Test::Cond(format!("{place} == {literal}")));
            }
            Pattern::Bool(b) => out.tests.push(Test::Cond(if *b {
                place.to_owned()
            } else {
                format!("!{place}")
            })),
            Pattern::Str(text) => {
                out.tests.push(Test::Text {
                    place: place.to_owned(),
                    ty: ty.clone(),
                    text: text.clone(),
                });
                out.rest.push((place.to_owned(), ty.clone()));
            }
            Pattern::Case { case, fields } => {
                let Type::Union(name) = ty else {
                    return Err(self.malformed("case pattern", ty));
                };
                let decl = self.layout.union_decl(*name)?;
                let (tag, case_decl) = decl.case(*case).ok_or_else(|| InternalError::UnknownCase {
                    ty: self.layout.display(ty),
                    case: self.lookup(*case).to_owned(),
                })?;
                if case_decl.fields.len() != fields.len() {
                    return Err(InternalError::Malformed {
                        what: "case pattern",
                        detail: format!(
                            "case `{}` has {} fields, pattern has {}",
                            self.lookup(*case),
                            case_decl.fields.len(),
                            fields.len()
                        ),
                    }
                    .into());
                }
                out.tests.push(Test::Cond(format!("{place}.tag == {tag}")));
                let case_ident = c_ident(self.lookup(*case));
                for (sub, field) in fields.iter().zip(&case_decl.fields) {
                    let sub_place = if field.ty.is_unit_like() {
                        String::new()
                    } else {
                        format!("{place}.data.{case_ident}.{}", c_ident(self.lookup(field.name)))
                    };
                    self.destructure(sub, &sub_place, &field.ty, out)?;
                }
            }
            Pattern::Struct { fields } => {
                let Type::Struct(name) = ty else {
                    return Err(self.malformed("struct pattern", ty));
                };
                let decl = self.layout.struct_decl(*name)?;
                for (field_name, sub) in fields {
                    let Some(field) = decl.fields.iter().find(|f| f.name == *field_name) else {
                        return Err(InternalError::UnknownField {
                            ty: self.layout.display(ty),
                            field: self.lookup(*field_name).to_owned(),
                        }
                        .into());
                    };
                    let sub_place = format!("{place}.{}", c_ident(self.lookup(field.name)));
                    self.destructure(sub, &sub_place, &field.ty, out)?;
                }
                for field in &decl.fields {
                    if !fields.iter().any(|(n, _)| *n == field.name) {
                        out.rest.push((
                            format!("{place}.{}", c_ident(self.lookup(field.name))),
                            field.ty.clone(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Emit the statements a test list needs and return its condition.
    fn emit_tests(&mut self, tests: &[Test]) -> CodegenResult<String> {
        if tests.iter().all(|t| matches!(t, Test::Cond(_))) {
            let conds: Vec<&str> = tests
                .iter()
                .filter_map(|t| match t {
                    Test::Cond(c) => Some(c.as_str()),
                    Test::Text { .. } => None,
                })
                .collect();
            if conds.is_empty() {
                return Ok("true".to_owned());
            }
            return Ok(conds.join(" && "));
        }

        let ok = self.temp();
        self.buf.line(&format!("bool {ok} = true;"));
        for test in tests {
            match test {
                Test::Cond(c) => self.buf.line(&format!("{ok} = {ok} && ({c});")),
                Test::Text { place, ty, text } => {
                    let equality = self.equality_of(ty)?;
                    self.buf.line(&format!("if ({ok}) {{"));
                    self.buf.indent();
                    let copy = self.into_owned(Value::Place(place.clone()), ty)?;
                    let literal = self.string_value(text, ty)?;
                    self.buf.line(&format!("{ok} = {equality}({copy}, {literal});"));
                    self.buf.dedent();
                    self.buf.line("}");
                }
            }
        }
        Ok(ok)
    }

    fn equality_of(&self, ty: &Type) -> CodegenResult<String> {
        let equality = match ty {
            Type::Struct(name) => self.layout.struct_decl(*name)?.equality,
            Type::Union(name) => self.layout.union_decl(*name)?.equality,
            _ => None,
        };
        equality
            .map(|name| self.symbol(name))
            .ok_or_else(|| InternalError::MissingEquality(self.layout.display(ty)).into())
    }
}
