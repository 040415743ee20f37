//! Symbols, scopes, modules and scope contexts.
//!
//! A `Sym` is anything the compiler knows by name: variables, types, procs,
//! iterators, generic parameters and overload choices. Symbols are shared
//! through `Rc<RefCell<_>>` handles; type identity is handle identity, so
//! two types are equal exactly when they are the same symbol.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::parser::ast::Node;

pub type SymRef = Rc<RefCell<Sym>>;

/// Identity key of a symbol, used by instantiation caches.
pub type SymId = usize;

pub fn sym_id(sym: &SymRef) -> SymId {
    Rc::as_ptr(sym) as SymId
}

pub fn ty_eq(a: &SymRef, b: &SymRef) -> bool {
    Rc::ptr_eq(a, b)
}

/// Tag distinguishing the caller's scopes from scopes created by an
/// iterator body being spliced into a `for` loop. Lookups and flow-block
/// searches only see scopes of the current context.
pub type ContextId = u32;

pub struct ContextAllocator {
    next: ContextId,
    free: Vec<ContextId>,
}

impl ContextAllocator {
    pub fn new() -> Self {
        Self { next: 0, free: Vec::new() }
    }

    pub fn alloc(&mut self) -> ContextId {
        if let Some(id) = self.free.pop() {
            id
        } else {
            let id = self.next;
            self.next += 1;
            id
        }
    }

    /// A context must only be freed once no live scope or flow block still
    /// carries it.
    pub fn free(&mut self, id: ContextId) {
        self.free.push(id);
    }
}

impl Default for ContextAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub id: u8,
    pub ty: SymRef,
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    Void,
    Bool,
    Number,
    Str,
    Object { object_id: u16, fields: Vec<FieldDef> },
}

#[derive(Debug, Clone)]
pub struct VarSym {
    pub ty: SymRef,
    pub is_let: bool,
    pub set: bool,
    pub local: bool,
    pub stack_pos: u8,
}

#[derive(Debug, Clone)]
pub struct ProcSym {
    pub proc_id: u16,
    pub params: Vec<(String, SymRef)>,
    pub ret: Option<SymRef>,
}

#[derive(Debug, Clone)]
pub struct IterSym {
    pub params: Vec<(String, SymRef)>,
    pub yield_ty: SymRef,
    pub body: Node,
}

#[derive(Debug, Clone)]
pub enum SymKind {
    Var(VarSym),
    Type(TypeKind),
    Proc(ProcSym),
    Iter(IterSym),
    GenericParam { constraint: Option<SymRef> },
    Choice(Vec<SymRef>),
}

#[derive(Debug)]
pub struct Sym {
    pub name: String,
    pub kind: SymKind,
    /// Present iff the symbol is a generic template.
    pub generic_params: Option<Vec<SymRef>>,
    /// Present only on templates; maps argument identity vectors to the
    /// cached instantiation.
    pub inst_cache: Option<HashMap<Vec<SymId>, SymRef>>,
    /// Present iff the symbol is an instantiation of a template.
    pub inst_args: Option<Vec<SymRef>>,
    /// Declaration AST, kept on templates so instantiation can recompile.
    pub decl: Option<Node>,
}

impl Sym {
    pub fn new(name: impl Into<String>, kind: SymKind) -> SymRef {
        Rc::new(RefCell::new(Sym {
            name: name.into(),
            kind,
            generic_params: None,
            inst_cache: None,
            inst_args: None,
            decl: None,
        }))
    }
}

/// Human-readable name of a type symbol, for diagnostics.
pub fn type_name(sym: &SymRef) -> String {
    let s = sym.borrow();
    match &s.kind {
        SymKind::Type(TypeKind::Void) => "void".to_string(),
        SymKind::Type(TypeKind::Bool) => "bool".to_string(),
        SymKind::Type(TypeKind::Number) => "number".to_string(),
        SymKind::Type(TypeKind::Str) => "string".to_string(),
        SymKind::Type(TypeKind::Object { .. }) => match &s.inst_args {
            Some(args) => {
                let args: Vec<String> = args.iter().map(type_name).collect();
                format!("{}[{}]", s.name, args.join(", "))
            }
            None => s.name.clone(),
        },
        SymKind::GenericParam { .. } => s.name.clone(),
        _ => s.name.clone(),
    }
}

/// Render a callable's signature, for overload listings.
pub fn sig_string(sym: &SymRef) -> String {
    let s = sym.borrow();
    match &s.kind {
        SymKind::Proc(p) => {
            let params: Vec<String> = p.params.iter().map(|(_, ty)| type_name(ty)).collect();
            match &p.ret {
                Some(ret) => format!("proc {}({}) -> {}", s.name, params.join(", "), type_name(ret)),
                None => format!("proc {}({})", s.name, params.join(", ")),
            }
        }
        SymKind::Iter(i) => {
            let params: Vec<String> = i.params.iter().map(|(_, ty)| type_name(ty)).collect();
            format!(
                "iterator {}({}) -> {}",
                s.name,
                params.join(", "),
                type_name(&i.yield_ty)
            )
        }
        _ => s.name.clone(),
    }
}

pub fn is_callable(sym: &SymRef) -> bool {
    matches!(sym.borrow().kind, SymKind::Proc(_) | SymKind::Iter(_))
}

/// Parameter types of a callable, or `None` for other kinds.
pub fn callable_params(sym: &SymRef) -> Option<Vec<SymRef>> {
    let s = sym.borrow();
    match &s.kind {
        SymKind::Proc(p) => Some(p.params.iter().map(|(_, ty)| Rc::clone(ty)).collect()),
        SymKind::Iter(i) => Some(i.params.iter().map(|(_, ty)| Rc::clone(ty)).collect()),
        _ => None,
    }
}

#[derive(Debug)]
pub struct Scope {
    pub syms: HashMap<String, SymRef>,
    pub ctx: ContextId,
    /// Number of stack variables this scope declared.
    pub vars: u8,
}

impl Scope {
    pub fn new(ctx: ContextId) -> Self {
        Self { syms: HashMap::new(), ctx, vars: 0 }
    }
}

#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub scope: Scope,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), scope: Scope::new(0) }
    }
}

/// The primitive types every compilation shares, owned by the `system`
/// module.
pub struct SystemTypes {
    pub void: SymRef,
    pub boolean: SymRef,
    pub number: SymRef,
    pub string: SymRef,
}

pub fn system_module() -> (Module, SystemTypes) {
    let mut module = Module::new("system");
    let void = Sym::new("void", SymKind::Type(TypeKind::Void));
    let boolean = Sym::new("bool", SymKind::Type(TypeKind::Bool));
    let number = Sym::new("number", SymKind::Type(TypeKind::Number));
    let string = Sym::new("string", SymKind::Type(TypeKind::Str));
    for sym in [&void, &boolean, &number, &string] {
        let name = sym.borrow().name.clone();
        module.scope.syms.insert(name, Rc::clone(sym));
    }
    (module, SystemTypes { void, boolean, number, string })
}

/// Outcome of trying to add a symbol under an already-taken name.
#[derive(Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Redeclaration,
}

/// Add `sym` to `scope` under `name`, wrapping colliding symbols in an
/// overload choice where the overload rules allow it.
pub fn insert(scope: &mut Scope, name: &str, sym: SymRef) -> InsertOutcome {
    let existing = scope.syms.get(name).map(Rc::clone);
    match existing {
        None => {
            scope.syms.insert(name.to_string(), sym);
            InsertOutcome::Inserted
        }
        Some(existing) => {
            let is_choice = matches!(existing.borrow().kind, SymKind::Choice(_));
            if is_choice {
                let mut e = existing.borrow_mut();
                if let SymKind::Choice(members) = &mut e.kind {
                    if can_add(members, &sym) {
                        members.push(sym);
                        return InsertOutcome::Inserted;
                    }
                }
                InsertOutcome::Redeclaration
            } else {
                let members = vec![Rc::clone(&existing)];
                if !can_add(&members, &sym) {
                    return InsertOutcome::Redeclaration;
                }
                let choice = Sym::new(name, SymKind::Choice(vec![existing, sym]));
                scope.syms.insert(name.to_string(), choice);
                InsertOutcome::Inserted
            }
        }
    }
}

/// A var may not join a choice that already has a var; same for types.
/// Callables may coexist unless their parameter-type signatures are
/// identical (arity plus per-position type identity).
fn can_add(members: &[SymRef], new: &SymRef) -> bool {
    match &new.borrow().kind {
        SymKind::Var(_) => !members.iter().any(|m| matches!(m.borrow().kind, SymKind::Var(_))),
        SymKind::Type(_) => !members.iter().any(|m| matches!(m.borrow().kind, SymKind::Type(_))),
        SymKind::Proc(_) | SymKind::Iter(_) => {
            let new_sig = match callable_params(new) {
                Some(sig) => sig,
                None => return false,
            };
            !members.iter().any(|m| {
                callable_params(m).is_some_and(|sig| {
                    sig.len() == new_sig.len()
                        && sig.iter().zip(&new_sig).all(|(a, b)| ty_eq(a, b))
                })
            })
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_ids_are_reused_after_free() {
        let mut alloc = ContextAllocator::new();
        let a = alloc.alloc();
        let b = alloc.alloc();
        assert_ne!(a, b);
        alloc.free(a);
        assert_eq!(alloc.alloc(), a);
    }

    #[test]
    fn second_var_under_same_name_is_a_redeclaration() {
        let (_, tys) = system_module();
        let mut scope = Scope::new(0);
        let make_var = || {
            Sym::new(
                "x",
                SymKind::Var(VarSym {
                    ty: Rc::clone(&tys.number),
                    is_let: false,
                    set: true,
                    local: false,
                    stack_pos: 0,
                }),
            )
        };
        assert_eq!(insert(&mut scope, "x", make_var()), InsertOutcome::Inserted);
        assert_eq!(insert(&mut scope, "x", make_var()), InsertOutcome::Redeclaration);
    }

    #[test]
    fn procs_overload_unless_signatures_match() {
        let (_, tys) = system_module();
        let mut scope = Scope::new(0);
        let make_proc = |id: u16, ty: &SymRef| {
            Sym::new(
                "f",
                SymKind::Proc(ProcSym {
                    proc_id: id,
                    params: vec![("a".to_string(), Rc::clone(ty))],
                    ret: None,
                }),
            )
        };
        assert_eq!(insert(&mut scope, "f", make_proc(0, &tys.number)), InsertOutcome::Inserted);
        assert_eq!(insert(&mut scope, "f", make_proc(1, &tys.string)), InsertOutcome::Inserted);
        assert_eq!(
            insert(&mut scope, "f", make_proc(2, &tys.number)),
            InsertOutcome::Redeclaration
        );
        let choice = scope.syms.get("f").unwrap();
        match &choice.borrow().kind {
            SymKind::Choice(members) => assert_eq!(members.len(), 2),
            other => panic!("expected a choice, got {:?}", other),
        };
    }
}
