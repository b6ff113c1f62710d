//! Top-level declarations and the whole-program container.

use rustc_hash::FxHashMap;

use crate::{Expr, Name, Param, Type};

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub name: Name,
    pub ty: Type,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StructDecl {
    pub name: Name,
    pub fields: Vec<Field>,
    /// Equality routine `(Self, Self) -> Bool` that consumes both operands.
    /// Required for constant patterns on this type.
    pub equality: Option<Name>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UnionCase {
    pub name: Name,
    pub fields: Vec<Field>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UnionDecl {
    pub name: Name,
    pub cases: Vec<UnionCase>,
    pub equality: Option<Name>,
}

impl UnionDecl {
    /// Tag value and declaration of a case.
    pub fn case(&self, name: Name) -> Option<(usize, &UnionCase)> {
        self.cases.iter().enumerate().find(|(_, c)| c.name == name)
    }
}

/// A global function or a given method. Methods take their receiver as the
/// first parameter.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDecl {
    pub name: Name,
    pub params: Vec<Param>,
    pub ret: Type,
    /// `None` for functions provided by the runtime or foreign code.
    pub body: Option<Expr>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Receiver {
    /// The method takes `self` by value.
    Value,
    /// The method takes `self` as a shared reference.
    Reference,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TraitMethod {
    pub name: Name,
    pub receiver: Receiver,
    /// Parameters after the receiver. May mention the trait's type parameters.
    pub params: Vec<Type>,
    pub ret: Type,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TraitBound {
    pub name: Name,
    pub args: Vec<Type>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TraitDecl {
    pub name: Name,
    pub type_params: Vec<Name>,
    pub parents: Vec<TraitBound>,
    pub methods: Vec<TraitMethod>,
}

/// A `given` block: methods attached to a concrete type, optionally
/// implementing a trait.
#[derive(Clone, Debug, PartialEq)]
pub struct GivenDecl {
    pub target: Type,
    pub implements: Option<TraitBound>,
    pub methods: Vec<GivenMethod>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GivenMethod {
    /// Method name as written in the trait or given block.
    pub method: Name,
    pub function: FunctionDecl,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GlobalDecl {
    pub name: Name,
    pub ty: Type,
    pub init: Expr,
}

/// One `(concrete type, trait, trait arguments)` combination that needs a vtable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VtableRequest {
    pub concrete: Type,
    pub trait_name: Name,
    pub trait_args: Vec<Type>,
}

/// Symbols the backend needs to lower built-in syntax.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LangItems {
    /// Struct type of text literals.
    pub string_type: Option<Name>,
    /// `(const uint8_t*, intptr_t) -> String` constructor for text literals.
    pub string_from_literal: Option<Name>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    pub structs: Vec<StructDecl>,
    pub unions: Vec<UnionDecl>,
    pub traits: Vec<TraitDecl>,
    pub functions: Vec<FunctionDecl>,
    pub givens: Vec<GivenDecl>,
    pub globals: Vec<GlobalDecl>,
    pub vtable_requests: Vec<VtableRequest>,
    pub lang: LangItems,
}

impl Program {
    pub fn find_struct(&self, name: Name) -> Option<&StructDecl> {
        self.structs.iter().find(|s| s.name == name)
    }

    pub fn find_union(&self, name: Name) -> Option<&UnionDecl> {
        self.unions.iter().find(|u| u.name == name)
    }

    pub fn find_trait(&self, name: Name) -> Option<&TraitDecl> {
        self.traits.iter().find(|t| t.name == name)
    }

    /// Every callable with a symbol: global functions followed by given methods.
    pub fn callables(&self) -> impl Iterator<Item = &FunctionDecl> {
        self.functions
            .iter()
            .chain(self.givens.iter().flat_map(|g| g.methods.iter().map(|m| &m.function)))
    }

    /// Index from symbol to callable declaration.
    pub fn callable_index(&self) -> FxHashMap<Name, &FunctionDecl> {
        self.callables().map(|f| (f.name, f)).collect()
    }

    /// Resolve the implementation of `method` for a concrete type.
    ///
    /// Trait-implementing givens win over inherent ones so dynamic dispatch
    /// always finds the trait's version.
    pub fn find_method(&self, target: &Type, method: Name) -> Option<&FunctionDecl> {
        let mut inherent = None;
        for given in self.givens.iter().filter(|g| &g.target == target) {
            if let Some(m) = given.methods.iter().find(|m| m.method == method) {
                if given.implements.is_some() {
                    return Some(&m.function);
                }
                inherent.get_or_insert(&m.function);
            }
        }
        inherent
    }
}
