//! `for`-loop lowering by iterator splicing.
//!
//! There is no iterator object at runtime: the iterator's body is generated
//! straight into the surrounding chunk, and every `yield` site re-generates
//! the loop body with the loop variable bound to the yielded value. Scope
//! hygiene rests on contexts: the splice runs under a fresh context so the
//! iterator's internals are invisible to the loop body and vice versa,
//! while `break` targets the outer flow block stamped with the caller's
//! context.

use std::mem;
use std::rc::Rc;

use crate::error::{CompileError, CompileErrorKind};
use crate::parser::ast::{Node, NodeKind, Pos};
use crate::sym::{self, Scope, SymKind, SymRef};

use super::expr::CalleeKind;
use super::{FlowKind, Gen, GenKind, Splice};

impl<'a> Gen<'a> {
    pub(crate) fn gen_for(&mut self, node: &Node) -> Result<(), CompileError> {
        let NodeKind::For { var, call, body } = &node.kind else {
            return Ok(());
        };
        let NodeKind::Call { callee, args } = &call.kind else {
            return Err(self.err(&call.pos, CompileErrorKind::NotAProc("for".to_string())));
        };
        let candidates = self.resolve_callee(callee)?;

        let caller_ctx = self.ctx;
        self.push_flow(FlowKind::Outer, caller_ctx);
        let iter_ctx = self.ctx_alloc.alloc();
        tracing::debug!(ctx = iter_ctx, "splicing iterator");
        self.scopes.push(Scope::new(iter_ctx));
        let saved_kind = mem::replace(&mut self.kind, GenKind::Iter);
        let saved_splice = self.splice.take();
        self.ctx = iter_ctx;

        let outcome = self.gen_for_inner(var, args, &candidates, body, caller_ctx, &node.pos);

        self.splice = saved_splice;
        self.pop_scope_stmt();
        self.kind = saved_kind;
        self.ctx = caller_ctx;
        self.ctx_alloc.free(iter_ctx);
        self.pop_flow();
        outcome
    }

    fn gen_for_inner(
        &mut self,
        var: &str,
        args: &[Node],
        candidates: &SymRef,
        body: &Node,
        caller_ctx: sym::ContextId,
        pos: &Pos,
    ) -> Result<(), CompileError> {
        // Arguments and overload resolution run under the iterator's
        // context; the param scope then binds the values left on the stack.
        let mut arg_tys = Vec::with_capacity(args.len());
        for arg in args {
            arg_tys.push(self.gen_expr_value(arg)?);
        }
        let iter_sym = self.find_overload(candidates, &arg_tys, CalleeKind::Iter, pos)?;
        let (params, yield_ty, iter_body) = match &iter_sym.borrow().kind {
            SymKind::Iter(i) => (i.params.clone(), Rc::clone(&i.yield_ty), i.body.clone()),
            _ => {
                return Err(self.err(
                    pos,
                    CompileErrorKind::SymKindMismatch {
                        expected: "an iterator".to_string(),
                        got: "a proc".to_string(),
                    },
                ))
            }
        };
        for (name, ty) in &params {
            self.declare_var(name, Rc::clone(ty), true, pos)?;
        }
        self.splice = Some(Splice {
            for_var: var.to_string(),
            for_body: body.clone(),
            for_ctx: caller_ctx,
            yield_ty,
        });
        self.gen_stmt(&iter_body)
    }

    /// `yield v`: only valid inside an iterator body, and only when the
    /// current context differs from the for-loop's context (a `yield`
    /// written in the loop body itself would splice forever).
    pub(crate) fn gen_yield(&mut self, value: &Node, pos: &Pos) -> Result<(), CompileError> {
        let Some(splice) = self.splice.clone() else {
            return Err(self.err(pos, CompileErrorKind::OnlyUsableInAnIterator("yield".to_string())));
        };
        if self.kind != GenKind::Iter || self.ctx == splice.for_ctx {
            return Err(self.err(pos, CompileErrorKind::OnlyUsableInAnIterator("yield".to_string())));
        }
        let ty = self.gen_expr_value(value)?;
        if !sym::ty_eq(&ty, &splice.yield_ty) {
            return Err(self.err(
                &value.pos,
                CompileErrorKind::TypeMismatch {
                    got: sym::type_name(&ty),
                    expected: sym::type_name(&splice.yield_ty),
                },
            ));
        }
        // Re-enter the caller's context and generate the loop body with the
        // loop variable bound to the value already on the stack.
        let saved_ctx = mem::replace(&mut self.ctx, splice.for_ctx);
        self.push_flow(FlowKind::Iter, splice.for_ctx);
        self.push_scope_in(splice.for_ctx);
        let outcome = (|gen: &mut Self| -> Result<(), CompileError> {
            gen.declare_var(&splice.for_var, Rc::clone(&splice.yield_ty), true, pos)?;
            gen.gen_stmt(&splice.for_body)
        })(self);
        self.pop_scope_stmt();
        self.pop_flow();
        self.ctx = saved_ctx;
        outcome
    }
}
