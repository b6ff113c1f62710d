//! Trait-object dispatch tables.
//!
//! A vtable type is shared by every implementation of one trait
//! instantiation. Its slots are the trait's methods plus every parent
//! trait's methods, parents first, each taking the receiver as a
//! `struct Ref`:
//!
//! ```text
//! struct __koral_vtable_Show {
//!     struct String (*show)(struct Ref);
//! };
//! static const struct __koral_vtable_Show __koral_vtable_Show_for_Point = {
//!     .show = __koral_wrapper_Point_Show_show,
//! };
//! ```
//!
//! Methods that take their receiver by reference are installed directly.
//! By-value methods go through a wrapper that copies the value out of the
//! reference, releases the reference and forwards the call.
//!
//! Instances are created on demand while lowering conversions to trait
//! objects, plus every instance the program requests up front.

use rustc_hash::FxHashMap;

use koral_ir::{Expr, Name, Receiver, TraitBound, Type, VtableRequest};

use crate::context::CodeBuffer;
use crate::emit::{is_simple, Emitter, Value};
use crate::error::{CodegenResult, InternalError};
use crate::layout::{TypeLayout, REF_TYPE, TRAIT_REF_TYPE};
use crate::names::{c_ident, symbol_fragment};

/// One slot of a vtable, with trait parameters substituted.
#[derive(Clone, Debug, PartialEq)]
struct Slot {
    method: Name,
    /// Trait that declares the method.
    declared_in: Name,
    receiver: Receiver,
    params: Vec<Type>,
    ret: Type,
}

#[derive(Clone, Debug)]
struct VtableLayout {
    /// `struct` tag of the table type.
    type_name: String,
    slots: Vec<Slot>,
}

type LayoutKey = (Name, Vec<Type>);

/// Rendered vtable text, in the order the translation unit needs it.
pub(crate) struct VtableParts {
    pub(crate) types: String,
    pub(crate) instances: String,
}

/// Every vtable type and instance used by the program.
pub(crate) struct VtableRegistry {
    indent_width: usize,
    layouts: FxHashMap<LayoutKey, VtableLayout>,
    /// Rendered table types, in creation order.
    types: Vec<String>,
    instances: FxHashMap<VtableRequest, String>,
    /// Rendered wrappers and instances, in creation order.
    instance_defs: Vec<String>,
}

impl VtableRegistry {
    pub(crate) fn new(indent_width: usize) -> Self {
        VtableRegistry {
            indent_width,
            layouts: FxHashMap::default(),
            types: Vec::new(),
            instances: FxHashMap::default(),
            instance_defs: Vec::new(),
        }
    }

    /// Layout of a trait instantiation, built on first use.
    fn layout(&mut self, layout: &TypeLayout<'_>, trait_name: Name, args: &[Type]) -> CodegenResult<&VtableLayout> {
        let key = (trait_name, args.to_vec());
        if !self.layouts.contains_key(&key) {
            let mut slots = Vec::new();
            collect_slots(layout, trait_name, args, &mut slots)?;
            let type_name = type_name(layout, trait_name, args)?;
            self.types
                .push(render_type(layout, &type_name, &slots, self.indent_width)?);
            self.layouts.insert(key.clone(), VtableLayout { type_name, slots });
        }
        self.layouts
            .get(&key)
            .ok_or_else(|| InternalError::UnknownTrait(layout.names().lookup(trait_name).to_owned()).into())
    }

    /// Symbol of the vtable instance for `request`, rendering it on first use.
    pub(crate) fn instance(&mut self, layout: &TypeLayout<'_>, request: &VtableRequest) -> CodegenResult<String> {
        if let Some(symbol) = self.instances.get(request) {
            return Ok(symbol.clone());
        }
        let table = self
            .layout(layout, request.trait_name, &request.trait_args)?
            .clone();
        let symbol = format!(
            "{}_for_{}",
            table.type_name,
            layout.c_name(&request.concrete)?
        );
        tracing::trace!(vtable = %symbol, "instantiating");

        let mut out = CodeBuffer::new(self.indent_width);
        let table_frag = table
            .type_name
            .trim_start_matches("__koral_vtable_")
            .to_owned();
        let mut inits = Vec::with_capacity(table.slots.len());
        for slot in &table.slots {
            let target = resolve_method(layout, &request.concrete, slot)?;
            let entry = match slot.receiver {
                Receiver::Reference => target,
                Receiver::Value => {
                    render_wrapper(layout, &request.concrete, &table_frag, slot, &target, &mut out)?
                }
            };
            inits.push(format!(".{} = {entry},", c_ident(layout.names().lookup(slot.method))));
        }
        out.line(&format!(
            "static const struct {} {symbol} = {{",
            table.type_name
        ));
        out.indent();
        if inits.is_empty() {
            out.line("0");
        }
        out.lines(&inits);
        out.dedent();
        out.line("};");
        out.blank();

        self.instance_defs.push(out.take());
        self.instances.insert(request.clone(), symbol.clone());
        Ok(symbol)
    }

    pub(crate) fn render(&self) -> VtableParts {
        VtableParts {
            types: self.types.concat(),
            instances: self.instance_defs.concat(),
        }
    }
}

fn type_name(layout: &TypeLayout<'_>, trait_name: Name, args: &[Type]) -> CodegenResult<String> {
    let mut name = format!(
        "__koral_vtable_{}",
        symbol_fragment(layout.names().lookup(trait_name))
    );
    for arg in args {
        name.push('_');
        name.push_str(&layout.c_name(arg)?);
    }
    Ok(name)
}

/// Parents' slots first, then the trait's own; the first slot of a name wins.
fn collect_slots(
    layout: &TypeLayout<'_>,
    trait_name: Name,
    args: &[Type],
    out: &mut Vec<Slot>,
) -> CodegenResult<()> {
    let decl = layout
        .program()
        .find_trait(trait_name)
        .ok_or_else(|| InternalError::UnknownTrait(layout.names().lookup(trait_name).to_owned()))?;
    if decl.type_params.len() != args.len() {
        return Err(InternalError::Malformed {
            what: "trait instantiation",
            detail: format!(
                "`{}` takes {} type arguments, got {}",
                layout.names().lookup(trait_name),
                decl.type_params.len(),
                args.len()
            ),
        }
        .into());
    }
    for TraitBound { name, args: parent_args } in &decl.parents {
        let parent_args: Vec<Type> = parent_args
            .iter()
            .map(|a| a.substitute(&decl.type_params, args))
            .collect();
        collect_slots(layout, *name, &parent_args, out)?;
    }
    for method in &decl.methods {
        if out.iter().any(|s| s.method == method.name) {
            continue;
        }
        out.push(Slot {
            method: method.name,
            declared_in: trait_name,
            receiver: method.receiver,
            params: method
                .params
                .iter()
                .map(|p| p.substitute(&decl.type_params, args))
                .collect(),
            ret: method.ret.substitute(&decl.type_params, args),
        });
    }
    Ok(())
}

/// C parameter types of a slot after the receiver.
fn slot_params(layout: &TypeLayout<'_>, slot: &Slot) -> CodegenResult<Vec<String>> {
    slot.params
        .iter()
        .filter(|p| !p.is_unit_like())
        .map(|p| layout.representation_of(p))
        .collect()
}

fn render_type(
    layout: &TypeLayout<'_>,
    type_name: &str,
    slots: &[Slot],
    indent_width: usize,
) -> CodegenResult<String> {
    let mut out = CodeBuffer::new(indent_width);
    out.line(&format!("struct {type_name} {{"));
    out.indent();
    if slots.is_empty() {
        out.line("char _empty;");
    }
    for slot in slots {
        let mut params = vec![REF_TYPE.to_owned()];
        params.extend(slot_params(layout, slot)?);
        out.line(&format!(
            "{} (*{})({});",
            layout.representation_of(&slot.ret)?,
            c_ident(layout.names().lookup(slot.method)),
            params.join(", ")
        ));
    }
    out.dedent();
    out.line("};");
    out.blank();
    Ok(out.take())
}

fn resolve_method(layout: &TypeLayout<'_>, concrete: &Type, slot: &Slot) -> CodegenResult<String> {
    layout
        .program()
        .find_method(concrete, slot.method)
        .map(|f| c_ident(layout.names().lookup(f.name)))
        .ok_or_else(|| {
            InternalError::UnresolvedTraitMethod {
                trait_name: layout.names().lookup(slot.declared_in).to_owned(),
                method: layout.names().lookup(slot.method).to_owned(),
                ty: layout.display(concrete),
            }
            .into()
        })
}

/// Adapter from the reference calling convention to a by-value method.
fn render_wrapper(
    layout: &TypeLayout<'_>,
    concrete: &Type,
    table_frag: &str,
    slot: &Slot,
    target: &str,
    out: &mut CodeBuffer,
) -> CodegenResult<String> {
    let method_frag = symbol_fragment(layout.names().lookup(slot.method));
    let symbol = format!(
        "__koral_wrapper_{}_{table_frag}_{method_frag}",
        layout.c_name(concrete)?
    );

    let mut params = vec![format!("{REF_TYPE} self_ref")];
    let mut args = Vec::new();
    if !concrete.is_unit_like() {
        args.push("self".to_owned());
    }
    for (i, repr) in slot_params(layout, slot)?.into_iter().enumerate() {
        params.push(format!("{repr} __a{i}"));
        args.push(format!("__a{i}"));
    }
    let ret = layout.representation_of(&slot.ret)?;

    out.line(&format!("static {ret} {symbol}({}) {{", params.join(", ")));
    out.indent();
    if !concrete.is_unit_like() {
        let repr = layout.representation_of(concrete)?;
        let copy = layout.copy_expr(&format!("(*({repr}*)self_ref.ptr)"), concrete)?;
        out.line(&format!("{repr} self = {copy};"));
        if let Some(retain) = layout.retain_stmt("self", concrete)? {
            out.line(&retain);
        }
    }
    out.line("__koral_release(self_ref.control);");
    let call = format!("{target}({})", args.join(", "));
    if slot.ret.is_unit_like() {
        out.line(&format!("{call};"));
    } else {
        out.line(&format!("return {call};"));
    }
    out.dedent();
    out.line("}");
    out.blank();
    Ok(symbol)
}

impl Emitter<'_> {
    /// `recv.method(args)` through the receiver's vtable.
    ///
    /// The callee owns its receiver: a borrowed object is passed as a
    /// retained copy of its reference, an owned one is moved.
    pub(crate) fn emit_trait_call(
        &mut self,
        receiver: &Expr,
        trait_name: Name,
        trait_args: &[Type],
        method: Name,
        args: &[Expr],
        ty: &Type,
    ) -> CodegenResult<Value> {
        if !matches!(&receiver.ty, Type::TraitObject { .. }) {
            return Err(self.malformed("trait call receiver", &receiver.ty));
        }
        let table = self.vtables.layout(&self.layout, trait_name, trait_args)?;
        let (type_name, has_slot) = (
            table.type_name.clone(),
            table.slots.iter().any(|s| s.method == method),
        );
        if !has_slot {
            return Err(InternalError::UnresolvedTraitMethod {
                trait_name: self.lookup(trait_name).to_owned(),
                method: self.lookup(method).to_owned(),
                ty: self.layout.display(&receiver.ty),
            }
            .into());
        }

        // An owned object is held while the arguments run, then its count
        // moves into the receiver. A place is shared and needs a retain.
        let value = self.emit_expr(receiver)?;
        let (object, held) = match value {
            Value::Owned(t) => {
                let binding = self.hold(&t, &receiver.ty)?;
                (t, Some(binding))
            }
            Value::Place(p) if args.iter().any(|a| !is_simple(a)) => {
                let t = self.into_owned(Value::Place(p), &receiver.ty)?;
                let binding = self.hold(&t, &receiver.ty)?;
                (t, Some(binding))
            }
            other => (self.place_of(other, &receiver.ty)?, None),
        };
        let args = self.emit_args(args)?;

        let this = self.temp();
        self.buf.line(&format!(
            "{REF_TYPE} {this} = {{ .ptr = {object}.ptr, .control = {object}.control }};"
        ));
        match held {
            Some(binding) => {
                self.frame.scopes.consume(binding);
            }
            None => self.buf.line(&format!("__koral_retain({this}.control);")),
        }
        let mut call_args = vec![this];
        call_args.extend(args);
        let call = format!(
            "((const struct {type_name}*){object}.vtable)->{}({})",
            c_ident(self.lookup(method)),
            call_args.join(", ")
        );
        self.finish_call(&call, ty)
    }

    /// Wrap a shared reference to a concrete value as a trait object.
    pub(crate) fn emit_to_trait_object(
        &mut self,
        value: &Expr,
        trait_name: Name,
        trait_args: &[Type],
    ) -> CodegenResult<Value> {
        let Type::Reference(concrete) = &value.ty else {
            return Err(self.malformed("trait object source", &value.ty));
        };
        let request = VtableRequest {
            concrete: (**concrete).clone(),
            trait_name,
            trait_args: trait_args.to_vec(),
        };
        let instance = self.vtables.instance(&self.layout, &request)?;

        let v = self.emit_expr(value)?;
        let handle = self.into_owned(v, &value.ty)?;
        let t = self.temp();
        self.buf.line(&format!(
            "{TRAIT_REF_TYPE} {t} = {{ .ptr = {handle}.ptr, .control = {handle}.control, .vtable = &{instance} }};"
        ));
        Ok(Value::Owned(t))
    }
}
