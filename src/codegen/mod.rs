//! The code generator: walks the AST, resolves symbols, checks types and
//! emits opcodes into a chunk.
//!
//! One generator instance compiles the whole script. Procedure bodies are
//! emitted by saving the generator's chunk and scope state, emitting into a
//! fresh chunk, and restoring; `for` loops splice iterator bodies into the
//! current chunk under a fresh scope context (see `iter.rs`).

mod expr;
mod generics;
mod iter;

use std::mem;
use std::rc::Rc;

use crate::error::{CompileError, CompileErrorKind};
use crate::parser::ast::{GenericParamDecl, Node, NodeKind, Pos, ProcDecl};
use crate::sym::{
    self, ContextAllocator, ContextId, FieldDef, IterSym, Module, ProcSym, Scope, Sym, SymKind,
    SymRef, SystemTypes, TypeKind, VarSym,
};
use crate::vm::chunk::{Chunk, Op, TY_FIRST_OBJECT};
use crate::vm::script::{Proc, ProcKind, Script};

/// Instantiation depth at which a self-recursive template is reported
/// instead of followed further.
const MAX_INST_DEPTH: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GenKind {
    Script,
    Proc,
    Iter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlowKind {
    /// `break` target.
    Outer,
    /// `continue` target.
    Iter,
}

/// Stack entry created around loops: where the stack was on entry, which
/// context the block belongs to, and the forward-jump holes to patch when
/// the block is popped.
pub(crate) struct FlowBlock {
    kind: FlowKind,
    ctx: ContextId,
    var_base: u8,
    holes: Vec<usize>,
}

/// State of the innermost `for`-loop splice.
#[derive(Clone)]
pub(crate) struct Splice {
    pub for_var: String,
    pub for_body: Node,
    pub for_ctx: ContextId,
    pub yield_ty: SymRef,
}

pub struct Gen<'a> {
    pub(crate) script: &'a mut Script,
    pub(crate) system: &'a Module,
    pub(crate) tys: &'a SystemTypes,
    pub(crate) module: &'a mut Module,
    pub(crate) chunk: Chunk,
    pub(crate) kind: GenKind,
    ret_ty: Option<SymRef>,
    result_pos: Option<u8>,
    scopes: Vec<Scope>,
    /// Scopes below this index belong to enclosing frames; their stack
    /// variables are not addressable from the chunk being emitted.
    frame_base: usize,
    flow: Vec<FlowBlock>,
    pub(crate) ctx: ContextId,
    pub(crate) ctx_alloc: ContextAllocator,
    pub(crate) splice: Option<Splice>,
    pub(crate) inst_depth: u32,
    file: Rc<str>,
}

/// Compile a parsed script into the top-level chunk, appending procs to
/// `script` and symbols to `module` as declarations are met.
pub fn generate(
    script: &mut Script,
    system: &Module,
    tys: &SystemTypes,
    module: &mut Module,
    ast: &Node,
) -> Result<Chunk, CompileError> {
    let file = Rc::clone(&ast.pos.file);
    let mut ctx_alloc = ContextAllocator::new();
    let ctx = ctx_alloc.alloc();
    let mut gen = Gen {
        script,
        system,
        tys,
        module,
        chunk: Chunk::new(&file),
        kind: GenKind::Script,
        ret_ty: None,
        result_pos: None,
        scopes: Vec::new(),
        frame_base: 0,
        flow: Vec::new(),
        ctx,
        ctx_alloc,
        splice: None,
        inst_depth: 0,
        file,
    };
    if let NodeKind::Script(stmts) = &ast.kind {
        for stmt in stmts {
            gen.gen_stmt(stmt)?;
        }
    } else {
        gen.gen_stmt(ast)?;
    }
    gen.chunk.emit(Op::Halt);
    tracing::debug!(
        procs = gen.script.procs.len(),
        bytes = gen.chunk.len(),
        "code generation finished"
    );
    Ok(gen.chunk)
}

impl<'a> Gen<'a> {
    pub(crate) fn err(&self, pos: &Pos, kind: CompileErrorKind) -> CompileError {
        CompileError::new(pos, kind)
    }

    pub(crate) fn is_void(&self, ty: &SymRef) -> bool {
        sym::ty_eq(ty, &self.tys.void)
    }

    // --- Scopes and variables --------------------------------------------

    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(Scope::new(self.ctx));
    }

    pub(crate) fn push_scope_in(&mut self, ctx: ContextId) {
        self.scopes.push(Scope::new(ctx));
    }

    /// Pop a scope in statement position, discarding its stack variables.
    pub(crate) fn pop_scope_stmt(&mut self) {
        let Some(scope) = self.scopes.pop() else { return };
        match scope.vars {
            0 => {}
            1 => self.chunk.emit(Op::Discard),
            n => {
                self.chunk.emit(Op::NDiscard);
                self.chunk.emit_u8(n);
            }
        }
    }

    /// Pop a scope in expression position. The block's value sits on top of
    /// the scope's stack variables, so it is stored into the scope's first
    /// slot and the remaining slots are discarded, leaving the value where
    /// the stack shrinks to.
    pub(crate) fn pop_scope_expr(&mut self) {
        let Some(scope) = self.scopes.pop() else { return };
        let n = scope.vars;
        if n == 0 {
            return;
        }
        let base = self.stack_vars();
        self.chunk.emit(Op::PopL);
        self.chunk.emit_u8(base);
        if n > 1 {
            self.chunk.emit(Op::NDiscard);
            self.chunk.emit_u8(n - 1);
        }
    }

    /// Pop a scope without emitting anything (proc frames are torn down by
    /// `returnVal`/`returnVoid`).
    pub(crate) fn pop_scope_silent(&mut self) {
        self.scopes.pop();
    }

    /// Stack variables live in the current frame.
    pub(crate) fn stack_vars(&self) -> u8 {
        self.scopes[self.frame_base..].iter().map(|s| s.vars).sum()
    }

    fn local_vars(&self) -> bool {
        self.kind != GenKind::Script
    }

    /// Walk enclosing scopes, most recent first, skipping scopes of other
    /// contexts. Stack variables of enclosing frames are invisible; the
    /// module and the system module are always consulted last.
    pub(crate) fn lookup(&self, name: &str) -> Option<SymRef> {
        for (i, scope) in self.scopes.iter().enumerate().rev() {
            if scope.ctx != self.ctx {
                continue;
            }
            if let Some(found) = scope.syms.get(name) {
                let foreign_local = i < self.frame_base
                    && matches!(&found.borrow().kind, SymKind::Var(v) if v.local);
                if foreign_local {
                    continue;
                }
                return Some(Rc::clone(found));
            }
        }
        self.module
            .scope
            .syms
            .get(name)
            .or_else(|| self.system.scope.syms.get(name))
            .map(Rc::clone)
    }

    /// Declare a variable in the innermost scope. Inside a proc or iterator
    /// the variable is a stack local whose slot is the count of variables
    /// declared by the current frame so far; at top level it is a global.
    pub(crate) fn declare_var(
        &mut self,
        name: &str,
        ty: SymRef,
        is_let: bool,
        pos: &Pos,
    ) -> Result<SymRef, CompileError> {
        if self.kind != GenKind::Script && name == "result" {
            return Err(self.err(pos, CompileErrorKind::ShadowResult));
        }
        self.declare_var_unchecked(name, ty, is_let, pos)
    }

    fn declare_var_unchecked(
        &mut self,
        name: &str,
        ty: SymRef,
        is_let: bool,
        pos: &Pos,
    ) -> Result<SymRef, CompileError> {
        let local = self.local_vars();
        let stack_pos = if local { self.stack_vars() } else { 0 };
        let var = Sym::new(
            name,
            SymKind::Var(VarSym { ty, is_let, set: true, local, stack_pos }),
        );
        let global_scope = self.scopes.is_empty();
        let scope = if global_scope {
            &mut self.module.scope
        } else {
            self.scopes.last_mut().expect("scope stack")
        };
        if sym::insert(scope, name, Rc::clone(&var)) == sym::InsertOutcome::Redeclaration {
            let kind = if global_scope {
                CompileErrorKind::GlobalRedeclaration(name.to_string())
            } else {
                CompileErrorKind::LocalRedeclaration(name.to_string())
            };
            return Err(self.err(pos, kind));
        }
        if local {
            scope.vars += 1;
        }
        Ok(var)
    }

    /// Register a proc, iterator, type or template under `name` in the
    /// innermost scope, honoring the overload rules.
    pub(crate) fn register_sym(
        &mut self,
        name: &str,
        sym: SymRef,
        pos: &Pos,
    ) -> Result<(), CompileError> {
        let global_scope = self.scopes.is_empty();
        let scope = if global_scope {
            &mut self.module.scope
        } else {
            self.scopes.last_mut().expect("scope stack")
        };
        if sym::insert(scope, name, sym) == sym::InsertOutcome::Redeclaration {
            let kind = if global_scope {
                CompileErrorKind::GlobalRedeclaration(name.to_string())
            } else {
                CompileErrorKind::LocalRedeclaration(name.to_string())
            };
            return Err(self.err(pos, kind));
        }
        Ok(())
    }

    // --- Flow blocks ------------------------------------------------------

    pub(crate) fn push_flow(&mut self, kind: FlowKind, ctx: ContextId) {
        self.flow.push(FlowBlock { kind, ctx, var_base: self.stack_vars(), holes: Vec::new() });
    }

    /// Pop the innermost flow block, patching its recorded jumps to the
    /// current position.
    pub(crate) fn pop_flow(&mut self) {
        let Some(block) = self.flow.pop() else { return };
        for hole in block.holes {
            self.chunk.patch_hole_u16(hole);
        }
    }

    /// Emit the break/continue sequence: discard stack variables above the
    /// target block, then a forward jump recorded in the block.
    fn gen_flow_jump(&mut self, want: FlowKind, pos: &Pos, what: &str) -> Result<(), CompileError> {
        let Some(idx) = self
            .flow
            .iter()
            .rposition(|b| b.kind == want && b.ctx == self.ctx)
        else {
            let kind = match want {
                FlowKind::Outer => CompileErrorKind::OnlyUsableInABlock(what.to_string()),
                FlowKind::Iter => CompileErrorKind::OnlyUsableInALoop(what.to_string()),
            };
            return Err(self.err(pos, kind));
        };
        let above = self.stack_vars() - self.flow[idx].var_base;
        match above {
            0 => {}
            1 => self.chunk.emit(Op::Discard),
            n => {
                self.chunk.emit(Op::NDiscard);
                self.chunk.emit_u8(n);
            }
        }
        self.chunk.emit(Op::JumpFwd);
        let hole = self.chunk.emit_hole(2);
        self.flow[idx].holes.push(hole);
        Ok(())
    }

    // --- Statements -------------------------------------------------------

    pub(crate) fn gen_stmt(&mut self, node: &Node) -> Result<(), CompileError> {
        self.chunk.set_pos(&node.pos);
        match &node.kind {
            NodeKind::Block(_) => {
                self.gen_block(node, false)?;
                Ok(())
            }
            NodeKind::VarDecl { .. } => self.gen_var_decl(node),
            NodeKind::ProcDecl(decl) => self.gen_proc_decl(decl, &node.pos),
            NodeKind::IterDecl(_) => self.gen_iter_decl(node),
            NodeKind::ObjectDecl(_) => self.gen_object_decl(node),
            NodeKind::If { .. } => {
                self.gen_if(node, false)?;
                Ok(())
            }
            NodeKind::While { .. } => self.gen_while(node),
            NodeKind::For { .. } => self.gen_for(node),
            NodeKind::Break => self.gen_flow_jump(FlowKind::Outer, &node.pos, "break"),
            NodeKind::Continue => self.gen_flow_jump(FlowKind::Iter, &node.pos, "continue"),
            NodeKind::Return(value) => self.gen_return(value.as_deref(), &node.pos),
            NodeKind::Yield(value) => self.gen_yield(value, &node.pos),
            NodeKind::Infix { op, lhs, rhs } if op == "=" => self.gen_assign(lhs, rhs, &node.pos),
            _ => {
                let ty = self.gen_expr(node)?;
                if !self.is_void(&ty) {
                    self.chunk.emit(Op::Discard);
                }
                Ok(())
            }
        }
    }

    /// Generate a block body. In expression mode the final child is
    /// generated as an expression and its type returned; otherwise the
    /// block's type is void.
    pub(crate) fn gen_block(&mut self, node: &Node, expr_mode: bool) -> Result<SymRef, CompileError> {
        let stmts: &[Node] = match &node.kind {
            NodeKind::Block(stmts) => stmts,
            _ => std::slice::from_ref(node),
        };
        self.push_scope();
        let mut ty = Rc::clone(&self.tys.void);
        let last = stmts.len().wrapping_sub(1);
        for (i, stmt) in stmts.iter().enumerate() {
            if expr_mode && i == last && stmt.is_expr() {
                self.chunk.set_pos(&stmt.pos);
                ty = self.gen_expr(stmt)?;
            } else {
                self.gen_stmt(stmt)?;
            }
        }
        if expr_mode && !self.is_void(&ty) {
            self.pop_scope_expr();
        } else {
            self.pop_scope_stmt();
        }
        Ok(ty)
    }

    fn gen_var_decl(&mut self, node: &Node) -> Result<(), CompileError> {
        let NodeKind::VarDecl { is_let, names, ty, value } = &node.kind else {
            return Ok(());
        };
        let Some(value) = value else {
            return Err(self.err(
                &node.pos,
                CompileErrorKind::VarMustHaveValue(names.first().cloned().unwrap_or_default()),
            ));
        };
        let annotated = match ty {
            Some(ty) => Some(self.resolve_type(ty)?),
            None => None,
        };
        for name in names {
            self.chunk.set_pos(&node.pos);
            let vty = self.gen_expr_value(value)?;
            if let Some(ann) = &annotated {
                if !sym::ty_eq(&vty, ann) {
                    return Err(self.err(
                        &value.pos,
                        CompileErrorKind::TypeMismatch {
                            got: sym::type_name(&vty),
                            expected: sym::type_name(ann),
                        },
                    ));
                }
            }
            let var = self.declare_var(name, vty, *is_let, &node.pos)?;
            let is_local = matches!(&var.borrow().kind, SymKind::Var(v) if v.local);
            if !is_local {
                let id = self.chunk.intern(name);
                self.chunk.emit(Op::PopG);
                self.chunk.emit_u16(id);
            }
        }
        Ok(())
    }

    /// `if` in statement or expression mode. In expression mode every
    /// branch must produce the same type and an `else` branch is required.
    pub(crate) fn gen_if(&mut self, node: &Node, expr_mode: bool) -> Result<SymRef, CompileError> {
        let NodeKind::If { branches, else_body } = &node.kind else {
            return Ok(Rc::clone(&self.tys.void));
        };
        let mut end_holes = Vec::new();
        let mut result_ty: Option<SymRef> = None;
        for branch in branches {
            self.chunk.set_pos(&branch.cond.pos);
            let cond_ty = self.gen_expr(&branch.cond)?;
            self.check_bool(&cond_ty, &branch.cond.pos)?;
            self.chunk.emit(Op::JumpFwdF);
            let skip = self.chunk.emit_hole(2);
            self.chunk.emit(Op::Discard);
            let ty = self.gen_block(&branch.body, expr_mode)?;
            if expr_mode {
                self.unify_branch(&mut result_ty, &ty, &branch.body.pos)?;
            }
            self.chunk.emit(Op::JumpFwd);
            end_holes.push(self.chunk.emit_hole(2));
            self.chunk.patch_hole_u16(skip);
            self.chunk.emit(Op::Discard);
        }
        match else_body {
            Some(body) => {
                let ty = self.gen_block(body, expr_mode)?;
                if expr_mode {
                    self.unify_branch(&mut result_ty, &ty, &body.pos)?;
                }
            }
            None if expr_mode => {
                let expected = result_ty
                    .as_ref()
                    .map(sym::type_name)
                    .unwrap_or_else(|| "void".to_string());
                return Err(self.err(
                    &node.pos,
                    CompileErrorKind::TypeMismatch { got: "void".to_string(), expected },
                ));
            }
            None => {}
        }
        for hole in end_holes {
            self.chunk.patch_hole_u16(hole);
        }
        Ok(match result_ty {
            Some(ty) if expr_mode => ty,
            _ => Rc::clone(&self.tys.void),
        })
    }

    fn unify_branch(
        &self,
        result_ty: &mut Option<SymRef>,
        ty: &SymRef,
        pos: &Pos,
    ) -> Result<(), CompileError> {
        match result_ty {
            None => {
                *result_ty = Some(Rc::clone(ty));
                Ok(())
            }
            Some(expected) if sym::ty_eq(expected, ty) => Ok(()),
            Some(expected) => Err(self.err(
                pos,
                CompileErrorKind::TypeMismatch {
                    got: sym::type_name(ty),
                    expected: sym::type_name(expected),
                },
            )),
        }
    }

    pub(crate) fn check_bool(&self, ty: &SymRef, pos: &Pos) -> Result<(), CompileError> {
        if sym::ty_eq(ty, &self.tys.boolean) {
            Ok(())
        } else {
            Err(self.err(
                pos,
                CompileErrorKind::TypeMismatch {
                    got: sym::type_name(ty),
                    expected: "bool".to_string(),
                },
            ))
        }
    }

    fn gen_while(&mut self, node: &Node) -> Result<(), CompileError> {
        let NodeKind::While { cond, body } = &node.kind else {
            return Ok(());
        };
        let top = self.chunk.len();
        self.push_flow(FlowKind::Outer, self.ctx);
        match &cond.kind {
            // `while false` contributes nothing.
            NodeKind::False => {}
            // `while true` needs no condition test.
            NodeKind::True => {
                self.push_flow(FlowKind::Iter, self.ctx);
                self.gen_stmt(body)?;
                self.pop_flow();
                self.emit_jump_back(top);
            }
            _ => {
                let cond_ty = self.gen_expr(cond)?;
                self.check_bool(&cond_ty, &cond.pos)?;
                self.chunk.emit(Op::JumpFwdF);
                let exit = self.chunk.emit_hole(2);
                self.chunk.emit(Op::Discard);
                self.push_flow(FlowKind::Iter, self.ctx);
                self.gen_stmt(body)?;
                self.pop_flow();
                self.emit_jump_back(top);
                self.chunk.patch_hole_u16(exit);
                self.chunk.emit(Op::Discard);
            }
        }
        self.pop_flow();
        Ok(())
    }

    pub(crate) fn emit_jump_back(&mut self, target: usize) {
        self.chunk.emit(Op::JumpBack);
        let dist = (self.chunk.len() + 2 - target) as u16;
        self.chunk.emit_u16(dist);
    }

    fn gen_return(&mut self, value: Option<&Node>, pos: &Pos) -> Result<(), CompileError> {
        if self.kind != GenKind::Proc {
            return Err(self.err(pos, CompileErrorKind::OnlyUsableInAProc("return".to_string())));
        }
        match value {
            Some(value) => {
                let ty = self.gen_expr_value(value)?;
                let expected = self.ret_ty.clone();
                match expected {
                    Some(ret) if sym::ty_eq(&ty, &ret) => {}
                    Some(ret) => {
                        return Err(self.err(
                            &value.pos,
                            CompileErrorKind::TypeMismatch {
                                got: sym::type_name(&ty),
                                expected: sym::type_name(&ret),
                            },
                        ))
                    }
                    None => {
                        return Err(self.err(
                            &value.pos,
                            CompileErrorKind::TypeMismatch {
                                got: sym::type_name(&ty),
                                expected: "void".to_string(),
                            },
                        ))
                    }
                }
                self.chunk.emit(Op::ReturnVal);
            }
            None => match self.result_pos {
                Some(slot) => {
                    self.chunk.emit(Op::PushL);
                    self.chunk.emit_u8(slot);
                    self.chunk.emit(Op::ReturnVal);
                }
                None => self.chunk.emit(Op::ReturnVoid),
            },
        }
        Ok(())
    }

    // --- Types ------------------------------------------------------------

    /// Resolve a type expression to a type symbol. Generic templates must
    /// be instantiated through the index form `Name[...]`.
    pub(crate) fn resolve_type(&mut self, node: &Node) -> Result<SymRef, CompileError> {
        match &node.kind {
            NodeKind::Ident(name) => {
                let sym = self
                    .lookup(name)
                    .ok_or_else(|| {
                        self.err(&node.pos, CompileErrorKind::UndefinedReference(name.clone()))
                    })?;
                let resolved = self.unwrap_type_choice(sym, name, &node.pos)?;
                if resolved.borrow().generic_params.is_some() {
                    return Err(
                        self.err(&node.pos, CompileErrorKind::CouldNotInferGeneric(name.clone()))
                    );
                }
                match &resolved.borrow().kind {
                    SymKind::Type(_) | SymKind::GenericParam { .. } => {}
                    other => {
                        return Err(self.err(
                            &node.pos,
                            CompileErrorKind::SymKindMismatch {
                                expected: "a type".to_string(),
                                got: kind_name(other).to_string(),
                            },
                        ))
                    }
                }
                Ok(resolved)
            }
            NodeKind::Index { callee, args } => {
                let NodeKind::Ident(name) = &callee.kind else {
                    return Err(self.err(
                        &node.pos,
                        CompileErrorKind::SymKindMismatch {
                            expected: "a type".to_string(),
                            got: "an expression".to_string(),
                        },
                    ));
                };
                let template = self.lookup(name).ok_or_else(|| {
                    self.err(&callee.pos, CompileErrorKind::UndefinedReference(name.clone()))
                })?;
                let template = self.unwrap_template_choice(template, name, &callee.pos)?;
                let mut resolved_args = Vec::with_capacity(args.len());
                for arg in args {
                    resolved_args.push(self.resolve_type(arg)?);
                }
                self.instantiate(&template, &resolved_args, &node.pos)
            }
            NodeKind::ProcTy { .. } => Err(self.err(
                &node.pos,
                CompileErrorKind::SymKindMismatch {
                    expected: "a type".to_string(),
                    got: "a proc type".to_string(),
                },
            )),
            _ => Err(self.err(
                &node.pos,
                CompileErrorKind::SymKindMismatch {
                    expected: "a type".to_string(),
                    got: "an expression".to_string(),
                },
            )),
        }
    }

    /// Pick the type member out of an overload choice.
    fn unwrap_type_choice(
        &self,
        sym: SymRef,
        name: &str,
        pos: &Pos,
    ) -> Result<SymRef, CompileError> {
        let member = match &sym.borrow().kind {
            SymKind::Choice(members) => {
                match members
                    .iter()
                    .find(|m| matches!(m.borrow().kind, SymKind::Type(_)))
                {
                    Some(m) => Rc::clone(m),
                    None => {
                        return Err(self.err(
                            pos,
                            CompileErrorKind::SymKindMismatch {
                                expected: "a type".to_string(),
                                got: format!("the overloads of '{}'", name),
                            },
                        ))
                    }
                }
            }
            _ => Rc::clone(&sym),
        };
        Ok(member)
    }

    /// Pick the template member out of an overload choice.
    pub(crate) fn unwrap_template_choice(
        &self,
        sym: SymRef,
        name: &str,
        pos: &Pos,
    ) -> Result<SymRef, CompileError> {
        let member = match &sym.borrow().kind {
            SymKind::Choice(members) => {
                match members.iter().find(|m| m.borrow().generic_params.is_some()) {
                    Some(m) => Rc::clone(m),
                    None => {
                        return Err(self.err(pos, CompileErrorKind::NotGeneric(name.to_string())))
                    }
                }
            }
            _ => Rc::clone(&sym),
        };
        Ok(member)
    }

    // --- Procedures -------------------------------------------------------

    pub(crate) fn gen_proc_decl(&mut self, decl: &ProcDecl, pos: &Pos) -> Result<(), CompileError> {
        if decl.generics.is_empty() {
            let sym = self.declare_proc_sym(decl, pos, true)?;
            return self.emit_proc_body(&sym, decl, pos);
        }
        // Template declaration: resolve the signature under a transient
        // scope binding each generic parameter, but emit nothing.
        self.push_scope();
        let gparams = self.declare_generic_params(&decl.generics, pos)?;
        let (params, ret) = self.resolve_signature(&decl.params, decl.ret.as_ref())?;
        self.pop_scope_silent();
        let proc_id = self.script.procs.len() as u16;
        let sym = Sym::new(&decl.name, SymKind::Proc(ProcSym { proc_id, params, ret }));
        {
            let mut s = sym.borrow_mut();
            s.generic_params = Some(gparams);
            s.inst_cache = Some(Default::default());
            s.decl = Some(Node::new(NodeKind::ProcDecl(Box::new(decl.clone())), pos.clone()));
        }
        self.register_sym(&decl.name, sym, pos)
    }

    pub(crate) fn declare_generic_params(
        &mut self,
        generics: &[GenericParamDecl],
        pos: &Pos,
    ) -> Result<Vec<SymRef>, CompileError> {
        let mut out = Vec::with_capacity(generics.len());
        for g in generics {
            let constraint = match &g.constraint {
                Some(c) => Some(self.resolve_type(c)?),
                None => None,
            };
            let sym = Sym::new(&g.name, SymKind::GenericParam { constraint });
            self.register_sym(&g.name, Rc::clone(&sym), pos)?;
            out.push(sym);
        }
        Ok(out)
    }

    pub(crate) fn resolve_signature(
        &mut self,
        params: &[crate::parser::ast::Param],
        ret: Option<&Node>,
    ) -> Result<(Vec<(String, SymRef)>, Option<SymRef>), CompileError> {
        let mut resolved = Vec::with_capacity(params.len());
        for p in params {
            let ty = self.resolve_type(&p.ty)?;
            if self.is_void(&ty) {
                return Err(self.err(&p.ty.pos, CompileErrorKind::ValueIsVoid));
            }
            resolved.push((p.name.clone(), ty));
        }
        let ret = match ret {
            Some(node) => {
                let ty = self.resolve_type(node)?;
                if self.is_void(&ty) {
                    None
                } else {
                    Some(ty)
                }
            }
            None => None,
        };
        Ok((resolved, ret))
    }

    /// Resolve the signature, reserve a dense proc id, and (optionally)
    /// register the symbol. Instantiations skip registration so the
    /// template stays the only symbol under its name.
    pub(crate) fn declare_proc_sym(
        &mut self,
        decl: &ProcDecl,
        pos: &Pos,
        register: bool,
    ) -> Result<SymRef, CompileError> {
        let (params, ret) = self.resolve_signature(&decl.params, decl.ret.as_ref())?;
        if params.iter().any(|(name, _)| name == "result") {
            return Err(self.err(pos, CompileErrorKind::ShadowResult));
        }
        let proc_id = self.script.procs.len() as u16;
        self.script.procs.push(Proc {
            name: decl.name.clone(),
            param_count: params.len() as u8,
            has_result: ret.is_some(),
            kind: ProcKind::Native(Rc::new(Chunk::new(&self.file))),
        });
        let sym = Sym::new(&decl.name, SymKind::Proc(ProcSym { proc_id, params, ret }));
        if register {
            self.register_sym(&decl.name, Rc::clone(&sym), pos)?;
        }
        Ok(sym)
    }

    /// Emit the proc's chunk: parameters as set `let`s, a synthetic
    /// `result` local when the return type is non-void, the body, and the
    /// trailing return.
    pub(crate) fn emit_proc_body(
        &mut self,
        sym: &SymRef,
        decl: &ProcDecl,
        pos: &Pos,
    ) -> Result<(), CompileError> {
        let (proc_id, params, ret) = match &sym.borrow().kind {
            SymKind::Proc(p) => (p.proc_id, p.params.clone(), p.ret.clone()),
            _ => return Ok(()),
        };
        let saved_chunk = mem::replace(&mut self.chunk, Chunk::new(&self.file));
        let saved_kind = mem::replace(&mut self.kind, GenKind::Proc);
        let saved_ret = mem::replace(&mut self.ret_ty, ret.clone());
        let saved_result = self.result_pos.take();
        let saved_flow = mem::take(&mut self.flow);
        let saved_splice = self.splice.take();
        let saved_frame = self.frame_base;
        self.frame_base = self.scopes.len();
        self.chunk.set_pos(pos);

        let outcome = (|| -> Result<(), CompileError> {
            self.push_scope();
            for (name, ty) in &params {
                self.declare_var(name, Rc::clone(ty), true, pos)?;
            }
            if let Some(ret) = &ret {
                let slot = self.stack_vars();
                self.emit_default_value(ret);
                self.declare_var_unchecked("result", Rc::clone(ret), false, pos)?;
                self.result_pos = Some(slot);
            }
            self.gen_block(&decl.body, false)?;
            match self.result_pos {
                Some(slot) => {
                    self.chunk.emit(Op::PushL);
                    self.chunk.emit_u8(slot);
                    self.chunk.emit(Op::ReturnVal);
                }
                None => self.chunk.emit(Op::ReturnVoid),
            }
            self.pop_scope_silent();
            Ok(())
        })();

        let chunk = mem::replace(&mut self.chunk, saved_chunk);
        self.kind = saved_kind;
        self.ret_ty = saved_ret;
        self.result_pos = saved_result;
        self.flow = saved_flow;
        self.splice = saved_splice;
        self.frame_base = saved_frame;
        outcome?;

        tracing::debug!(name = %decl.name, id = proc_id, bytes = chunk.len(), "emitted proc");
        self.script.procs[proc_id as usize].kind = ProcKind::Native(Rc::new(chunk));
        Ok(())
    }

    /// Push the default value of a type: zero, false, the empty string, or
    /// a typed nil for objects.
    fn emit_default_value(&mut self, ty: &SymRef) {
        match &ty.borrow().kind {
            SymKind::Type(TypeKind::Number) => {
                self.chunk.emit(Op::PushN);
                self.chunk.emit_f64(0.0);
            }
            SymKind::Type(TypeKind::Bool) => self.chunk.emit(Op::PushFalse),
            SymKind::Type(TypeKind::Str) => {
                let id = self.chunk.intern("");
                self.chunk.emit(Op::PushS);
                self.chunk.emit_u16(id);
            }
            SymKind::Type(TypeKind::Object { object_id, .. }) => {
                let id = TY_FIRST_OBJECT + *object_id;
                self.chunk.emit(Op::PushNil);
                self.chunk.emit_u16(id);
            }
            _ => self.chunk.emit(Op::PushFalse),
        }
    }

    // --- Objects ----------------------------------------------------------

    fn gen_object_decl(&mut self, node: &Node) -> Result<(), CompileError> {
        let NodeKind::ObjectDecl(decl) = &node.kind else {
            return Ok(());
        };
        if decl.generics.is_empty() {
            let sym = self.create_object_sym(&decl.name);
            self.fill_object_fields(&sym, decl)?;
            return self.register_sym(&decl.name, sym, &node.pos);
        }
        self.push_scope();
        let gparams = self.declare_generic_params(&decl.generics, &node.pos)?;
        let sym = self.create_object_sym(&decl.name);
        self.fill_object_fields(&sym, decl)?;
        self.pop_scope_silent();
        {
            let mut s = sym.borrow_mut();
            s.generic_params = Some(gparams);
            s.inst_cache = Some(Default::default());
            s.decl = Some(Node::new(
                NodeKind::ObjectDecl(Box::new((**decl).clone())),
                node.pos.clone(),
            ));
        }
        self.register_sym(&decl.name, sym, &node.pos)
    }

    /// Allocate the object id before the fields are registered, so a later
    /// extension to forward self-reference needs no renumbering.
    pub(crate) fn create_object_sym(&mut self, name: &str) -> SymRef {
        let object_id = self.script.next_object_id();
        Sym::new(name, SymKind::Type(TypeKind::Object { object_id, fields: Vec::new() }))
    }

    pub(crate) fn fill_object_fields(
        &mut self,
        sym: &SymRef,
        decl: &crate::parser::ast::ObjectDecl,
    ) -> Result<(), CompileError> {
        let mut fields: Vec<FieldDef> = Vec::new();
        for group in &decl.fields {
            let ty = self.resolve_type(&group.ty)?;
            if self.is_void(&ty) {
                return Err(self.err(&group.ty.pos, CompileErrorKind::ValueIsVoid));
            }
            for name in &group.names {
                if fields.iter().any(|f| &f.name == name) {
                    return Err(self.err(
                        &group.ty.pos,
                        CompileErrorKind::LocalRedeclaration(name.clone()),
                    ));
                }
                let id = fields.len() as u8;
                fields.push(FieldDef { name: name.clone(), id, ty: Rc::clone(&ty) });
            }
        }
        if let SymKind::Type(TypeKind::Object { fields: slot, .. }) = &mut sym.borrow_mut().kind {
            *slot = fields;
        }
        Ok(())
    }

    // --- Iterators --------------------------------------------------------

    /// An iterator declaration only registers a symbol carrying its body;
    /// no code is emitted until a `for` loop splices it.
    fn gen_iter_decl(&mut self, node: &Node) -> Result<(), CompileError> {
        let NodeKind::IterDecl(decl) = &node.kind else {
            return Ok(());
        };
        let generic = !decl.generics.is_empty();
        if generic {
            self.push_scope();
        }
        let gparams = if generic {
            Some(self.declare_generic_params(&decl.generics, &node.pos)?)
        } else {
            None
        };
        let (params, yield_ty) = self.resolve_signature(&decl.params, decl.yield_ty.as_ref())?;
        if generic {
            self.pop_scope_silent();
        }
        let Some(yield_ty) = yield_ty else {
            return Err(self.err(
                &node.pos,
                CompileErrorKind::IterMustHaveYieldType(decl.name.clone()),
            ));
        };
        let sym = Sym::new(
            &decl.name,
            SymKind::Iter(IterSym { params, yield_ty, body: decl.body.clone() }),
        );
        if generic {
            let mut s = sym.borrow_mut();
            s.generic_params = gparams;
            s.inst_cache = Some(Default::default());
        }
        self.register_sym(&decl.name, sym, &node.pos)
    }
}

pub(crate) fn kind_name(kind: &SymKind) -> &'static str {
    match kind {
        SymKind::Var(_) => "a variable",
        SymKind::Type(_) => "a type",
        SymKind::Proc(_) => "a proc",
        SymKind::Iter(_) => "an iterator",
        SymKind::GenericParam { .. } => "a generic parameter",
        SymKind::Choice(_) => "an overload set",
    }
}
