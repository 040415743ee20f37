//! Expression lowering: literals, variables, operators with their builtin
//! lowerings, short-circuit logic, field access, calls, object constructors
//! and assignment.

use std::rc::Rc;

use crate::error::{CompileError, CompileErrorKind};
use crate::parser::ast::{Node, NodeKind, Pos};
use crate::sym::{self, SymKind, SymRef, TypeKind};
use crate::vm::chunk::{Op, TY_FIRST_OBJECT};

use super::{kind_name, Gen};

/// Which callable kind a call site requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CalleeKind {
    Proc,
    Iter,
}

impl<'a> Gen<'a> {
    /// Generate an expression and return its type symbol.
    pub(crate) fn gen_expr(&mut self, node: &Node) -> Result<SymRef, CompileError> {
        self.chunk.set_pos(&node.pos);
        match &node.kind {
            NodeKind::True => {
                self.chunk.emit(Op::PushTrue);
                Ok(Rc::clone(&self.tys.boolean))
            }
            NodeKind::False => {
                self.chunk.emit(Op::PushFalse);
                Ok(Rc::clone(&self.tys.boolean))
            }
            NodeKind::Number(n) => {
                self.chunk.emit(Op::PushN);
                self.chunk.emit_f64(*n);
                Ok(Rc::clone(&self.tys.number))
            }
            NodeKind::Str(s) => {
                let id = self.chunk.intern(s);
                self.chunk.emit(Op::PushS);
                self.chunk.emit_u16(id);
                Ok(Rc::clone(&self.tys.string))
            }
            NodeKind::Null => Err(self.err(&node.pos, CompileErrorKind::CouldNotInferNull)),
            NodeKind::Ident(name) => self.gen_ident(name, &node.pos),
            NodeKind::Prefix { op, operand } => self.gen_prefix(op, operand, &node.pos),
            NodeKind::Infix { op, .. } if op == "=" => {
                Err(self.err(&node.pos, CompileErrorKind::InvalidAssignment))
            }
            NodeKind::Infix { op, lhs, rhs } => self.gen_infix(op, lhs, rhs, &node.pos),
            NodeKind::Dot { lhs, name } => self.gen_dot(lhs, name, &node.pos),
            NodeKind::Call { .. } => self.gen_call(node),
            NodeKind::Index { .. } => self.gen_index_expr(node),
            NodeKind::If { .. } => self.gen_if(node, true),
            NodeKind::Colon { .. } => Err(self.err(
                &node.pos,
                CompileErrorKind::SymKindMismatch {
                    expected: "an expression".to_string(),
                    got: "a colon expression".to_string(),
                },
            )),
            _ => Err(self.err(
                &node.pos,
                CompileErrorKind::SymKindMismatch {
                    expected: "an expression".to_string(),
                    got: "a statement".to_string(),
                },
            )),
        }
    }

    /// Like `gen_expr` but rejects void-typed expressions.
    pub(crate) fn gen_expr_value(&mut self, node: &Node) -> Result<SymRef, CompileError> {
        let ty = self.gen_expr(node)?;
        if self.is_void(&ty) {
            return Err(self.err(&node.pos, CompileErrorKind::ValueIsVoid));
        }
        Ok(ty)
    }

    fn gen_ident(&mut self, name: &str, pos: &Pos) -> Result<SymRef, CompileError> {
        let sym = self
            .lookup(name)
            .ok_or_else(|| self.err(pos, CompileErrorKind::UndefinedReference(name.to_string())))?;
        let var = match &sym.borrow().kind {
            SymKind::Choice(members) => {
                match members
                    .iter()
                    .find(|m| matches!(m.borrow().kind, SymKind::Var(_)))
                {
                    Some(m) => Rc::clone(m),
                    None => {
                        return Err(self.err(
                            pos,
                            CompileErrorKind::SymKindMismatch {
                                expected: "a variable".to_string(),
                                got: "an overload set".to_string(),
                            },
                        ))
                    }
                }
            }
            _ => Rc::clone(&sym),
        };
        if var.borrow().generic_params.is_some() {
            return Err(self.err(pos, CompileErrorKind::CouldNotInferGeneric(name.to_string())));
        }
        let sym_ref = var.borrow();
        match &sym_ref.kind {
            SymKind::Var(v) => {
                if v.local {
                    self.chunk.emit(Op::PushL);
                    self.chunk.emit_u8(v.stack_pos);
                } else {
                    let id = self.chunk.intern(name);
                    self.chunk.emit(Op::PushG);
                    self.chunk.emit_u16(id);
                }
                Ok(Rc::clone(&v.ty))
            }
            other => Err(self.err(
                pos,
                CompileErrorKind::SymKindMismatch {
                    expected: "a variable".to_string(),
                    got: kind_name(other).to_string(),
                },
            )),
        }
    }

    /// A prefix operator lowers to a builtin when the operand type has one,
    /// otherwise to a call of the resolved operator overload.
    fn gen_prefix(&mut self, op: &str, operand: &Node, pos: &Pos) -> Result<SymRef, CompileError> {
        let ty = self.gen_expr_value(operand)?;
        if op == "-" && sym::ty_eq(&ty, &self.tys.number) {
            self.chunk.emit(Op::NegN);
            return Ok(Rc::clone(&self.tys.number));
        }
        if (op == "not" || op == "!") && sym::ty_eq(&ty, &self.tys.boolean) {
            self.chunk.emit(Op::InvB);
            return Ok(Rc::clone(&self.tys.boolean));
        }
        self.gen_op_call(op, &[ty], pos)
    }

    fn gen_infix(
        &mut self,
        op: &str,
        lhs: &Node,
        rhs: &Node,
        pos: &Pos,
    ) -> Result<SymRef, CompileError> {
        // `and`/`or` short-circuit over a discard and the right operand.
        if op == "and" || op == "&&" {
            let lty = self.gen_expr(lhs)?;
            self.check_bool(&lty, &lhs.pos)?;
            self.chunk.emit(Op::JumpFwdF);
            let end = self.chunk.emit_hole(2);
            self.chunk.emit(Op::Discard);
            let rty = self.gen_expr(rhs)?;
            self.check_bool(&rty, &rhs.pos)?;
            self.chunk.patch_hole_u16(end);
            return Ok(Rc::clone(&self.tys.boolean));
        }
        if op == "or" || op == "||" {
            let lty = self.gen_expr(lhs)?;
            self.check_bool(&lty, &lhs.pos)?;
            self.chunk.emit(Op::JumpFwdT);
            let end = self.chunk.emit_hole(2);
            self.chunk.emit(Op::Discard);
            let rty = self.gen_expr(rhs)?;
            self.check_bool(&rty, &rhs.pos)?;
            self.chunk.patch_hole_u16(end);
            return Ok(Rc::clone(&self.tys.boolean));
        }

        let lty = self.gen_expr_value(lhs)?;
        let rty = self.gen_expr_value(rhs)?;
        let number = sym::ty_eq(&lty, &self.tys.number) && sym::ty_eq(&rty, &self.tys.number);
        let boolean = sym::ty_eq(&lty, &self.tys.boolean) && sym::ty_eq(&rty, &self.tys.boolean);
        if number {
            match op {
                "+" => {
                    self.chunk.emit(Op::AddN);
                    return Ok(Rc::clone(&self.tys.number));
                }
                "-" => {
                    self.chunk.emit(Op::SubN);
                    return Ok(Rc::clone(&self.tys.number));
                }
                "*" => {
                    self.chunk.emit(Op::MultN);
                    return Ok(Rc::clone(&self.tys.number));
                }
                "/" => {
                    self.chunk.emit(Op::DivN);
                    return Ok(Rc::clone(&self.tys.number));
                }
                "==" => {
                    self.chunk.emit(Op::EqN);
                    return Ok(Rc::clone(&self.tys.boolean));
                }
                "!=" => {
                    self.chunk.emit(Op::EqN);
                    self.chunk.emit(Op::InvB);
                    return Ok(Rc::clone(&self.tys.boolean));
                }
                "<" => {
                    self.chunk.emit(Op::LessN);
                    return Ok(Rc::clone(&self.tys.boolean));
                }
                ">" => {
                    self.chunk.emit(Op::GreaterN);
                    return Ok(Rc::clone(&self.tys.boolean));
                }
                "<=" => {
                    self.chunk.emit(Op::GreaterN);
                    self.chunk.emit(Op::InvB);
                    return Ok(Rc::clone(&self.tys.boolean));
                }
                ">=" => {
                    self.chunk.emit(Op::LessN);
                    self.chunk.emit(Op::InvB);
                    return Ok(Rc::clone(&self.tys.boolean));
                }
                _ => {}
            }
        }
        if boolean {
            match op {
                "==" => {
                    self.chunk.emit(Op::EqB);
                    return Ok(Rc::clone(&self.tys.boolean));
                }
                "!=" => {
                    self.chunk.emit(Op::EqB);
                    self.chunk.emit(Op::InvB);
                    return Ok(Rc::clone(&self.tys.boolean));
                }
                _ => {}
            }
        }
        self.gen_op_call(op, &[lty, rty], pos)
    }

    /// Resolve an operator to a proc overload; the operands are already on
    /// the stack in call order.
    fn gen_op_call(
        &mut self,
        op: &str,
        arg_tys: &[SymRef],
        pos: &Pos,
    ) -> Result<SymRef, CompileError> {
        let sym = self
            .lookup(op)
            .ok_or_else(|| self.err(pos, CompileErrorKind::UndefinedReference(op.to_string())))?;
        let target = self.find_overload(&sym, arg_tys, CalleeKind::Proc, pos)?;
        self.emit_call(&target)
    }

    fn gen_dot(&mut self, lhs: &Node, name: &str, pos: &Pos) -> Result<SymRef, CompileError> {
        let lty = self.gen_expr_value(lhs)?;
        let field = self.object_field(&lty, name, pos)?;
        self.chunk.emit(Op::PushF);
        self.chunk.emit_u8(field.0);
        Ok(field.1)
    }

    /// Look up a field `(id, ty)` on an object type.
    fn object_field(
        &self,
        ty: &SymRef,
        name: &str,
        pos: &Pos,
    ) -> Result<(u8, SymRef), CompileError> {
        match &ty.borrow().kind {
            SymKind::Type(TypeKind::Object { fields, .. }) => {
                match fields.iter().find(|f| f.name == name) {
                    Some(f) => Ok((f.id, Rc::clone(&f.ty))),
                    None => Err(self.err(
                        pos,
                        CompileErrorKind::NonExistentField {
                            field: name.to_string(),
                            ty: sym::type_name(ty),
                        },
                    )),
                }
            }
            _ => Err(self.err(pos, CompileErrorKind::InvalidField(name.to_string()))),
        }
    }

    /// `null[T]` pushes a typed nil; any other index form in value position
    /// resolves to a symbol that is not a value.
    fn gen_index_expr(&mut self, node: &Node) -> Result<SymRef, CompileError> {
        let NodeKind::Index { callee, args } = &node.kind else {
            return Err(self.err(&node.pos, CompileErrorKind::CouldNotInferNull));
        };
        if matches!(callee.kind, NodeKind::Null) {
            if args.len() != 1 {
                return Err(self.err(&node.pos, CompileErrorKind::CouldNotInferNull));
            }
            let ty = self.resolve_type(&args[0])?;
            let object_id = match &ty.borrow().kind {
                SymKind::Type(TypeKind::Object { object_id, .. }) => *object_id,
                _ => {
                    return Err(self.err(
                        &args[0].pos,
                        CompileErrorKind::TypeIsNotAnObject(sym::type_name(&ty)),
                    ))
                }
            };
            self.chunk.emit(Op::PushNil);
            self.chunk.emit_u16(TY_FIRST_OBJECT + object_id);
            return Ok(ty);
        }
        Err(self.err(
            &node.pos,
            CompileErrorKind::SymKindMismatch {
                expected: "a value".to_string(),
                got: "a generic instantiation".to_string(),
            },
        ))
    }

    // --- Calls and constructors ------------------------------------------

    /// Resolve a call's callee: a plain name, or a generic instantiation in
    /// index form.
    pub(crate) fn resolve_callee(&mut self, node: &Node) -> Result<SymRef, CompileError> {
        match &node.kind {
            NodeKind::Ident(name) => {
                let sym = self.lookup(name).ok_or_else(|| {
                    self.err(&node.pos, CompileErrorKind::UndefinedReference(name.clone()))
                })?;
                let is_template = sym.borrow().generic_params.is_some();
                if is_template {
                    return Err(
                        self.err(&node.pos, CompileErrorKind::CouldNotInferGeneric(name.clone()))
                    );
                }
                Ok(sym)
            }
            NodeKind::Index { callee, args } => {
                let NodeKind::Ident(name) = &callee.kind else {
                    return Err(self.err(&node.pos, CompileErrorKind::NotAProc(callee_name(node))));
                };
                let sym = self.lookup(name).ok_or_else(|| {
                    self.err(&callee.pos, CompileErrorKind::UndefinedReference(name.clone()))
                })?;
                let template = self.unwrap_template_choice(sym, name, &callee.pos)?;
                let mut resolved = Vec::with_capacity(args.len());
                for arg in args {
                    resolved.push(self.resolve_type(arg)?);
                }
                self.instantiate(&template, &resolved, &node.pos)
            }
            _ => Err(self.err(&node.pos, CompileErrorKind::NotAProc(callee_name(node)))),
        }
    }

    /// A call is an object construction when the callee resolves to a type,
    /// a direct call otherwise.
    pub(crate) fn gen_call(&mut self, node: &Node) -> Result<SymRef, CompileError> {
        let NodeKind::Call { callee, args } = &node.kind else {
            return Err(self.err(&node.pos, CompileErrorKind::NotAProc(callee_name(node))));
        };
        let target = self.resolve_callee(callee)?;
        let is_type = {
            let t = target.borrow();
            matches!(t.kind, SymKind::Type(_))
                || matches!(&t.kind, SymKind::Choice(members)
                    if members.iter().all(|m| matches!(m.borrow().kind, SymKind::Type(_))))
        };
        if is_type {
            let ty = self.unwrap_type_member(&target);
            return self.gen_constructor(&ty, args, &node.pos);
        }
        let mut arg_tys = Vec::with_capacity(args.len());
        for arg in args {
            arg_tys.push(self.gen_expr_value(arg)?);
        }
        self.chunk.set_pos(&node.pos);
        let resolved = self.find_overload(&target, &arg_tys, CalleeKind::Proc, &node.pos)?;
        self.emit_call(&resolved)
    }

    fn unwrap_type_member(&self, sym: &SymRef) -> SymRef {
        match &sym.borrow().kind {
            SymKind::Choice(members) => members
                .iter()
                .find(|m| matches!(m.borrow().kind, SymKind::Type(_)))
                .map(Rc::clone)
                .unwrap_or_else(|| Rc::clone(sym)),
            _ => Rc::clone(sym),
        }
    }

    fn emit_call(&mut self, target: &SymRef) -> Result<SymRef, CompileError> {
        let (proc_id, ret) = match &target.borrow().kind {
            SymKind::Proc(p) => (p.proc_id, p.ret.clone()),
            _ => return Ok(Rc::clone(&self.tys.void)),
        };
        self.chunk.emit(Op::CallD);
        self.chunk.emit_u16(proc_id);
        Ok(ret.unwrap_or_else(|| Rc::clone(&self.tys.void)))
    }

    /// Overload selection: arity plus per-position type identity. On a
    /// choice the first declared match wins; a miss lists every callable
    /// overload with its signature.
    pub(crate) fn find_overload(
        &self,
        callee: &SymRef,
        arg_tys: &[SymRef],
        want: CalleeKind,
        pos: &Pos,
    ) -> Result<SymRef, CompileError> {
        let name = callee.borrow().name.clone();
        let members: Vec<SymRef> = match &callee.borrow().kind {
            SymKind::Choice(members) => members.clone(),
            _ => vec![Rc::clone(callee)],
        };
        let mut any_wanted = false;
        for member in &members {
            let kind_matches = match (&member.borrow().kind, want) {
                (SymKind::Proc(_), CalleeKind::Proc) => true,
                (SymKind::Iter(_), CalleeKind::Iter) => true,
                _ => false,
            };
            if !kind_matches {
                continue;
            }
            any_wanted = true;
            let params = sym::callable_params(member).unwrap_or_default();
            if params.len() == arg_tys.len()
                && params.iter().zip(arg_tys).all(|(p, a)| sym::ty_eq(p, a))
            {
                return Ok(Rc::clone(member));
            }
        }
        if !any_wanted {
            let got = kind_name(&callee.borrow().kind).to_string();
            return Err(match want {
                CalleeKind::Iter => self.err(
                    pos,
                    CompileErrorKind::SymKindMismatch { expected: "an iterator".to_string(), got },
                ),
                CalleeKind::Proc => self.err(pos, CompileErrorKind::NotAProc(name)),
            });
        }
        let got: Vec<String> = arg_tys.iter().map(sym::type_name).collect();
        if members.len() == 1 {
            let params = sym::callable_params(&members[0]).unwrap_or_default();
            let expected: Vec<String> = params.iter().map(sym::type_name).collect();
            return Err(self.err(
                pos,
                CompileErrorKind::TypeMismatch {
                    got: format!("({})", got.join(", ")),
                    expected: format!("({})", expected.join(", ")),
                },
            ));
        }
        let choices: Vec<String> = members
            .iter()
            .filter(|m| sym::is_callable(m))
            .map(|m| format!("  {}", sym::sig_string(m)))
            .collect();
        Err(self.err(
            pos,
            CompileErrorKind::TypeMismatchChoice {
                got: format!("({})", got.join(", ")),
                choices: choices.join("\n"),
            },
        ))
    }

    /// `T(field: v, ...)`: every field initialized exactly once, values
    /// evaluated in field-declaration order regardless of source order.
    fn gen_constructor(
        &mut self,
        ty: &SymRef,
        args: &[Node],
        pos: &Pos,
    ) -> Result<SymRef, CompileError> {
        let (object_id, fields) = match &ty.borrow().kind {
            SymKind::Type(TypeKind::Object { object_id, fields }) => (*object_id, fields.clone()),
            _ => {
                return Err(self.err(pos, CompileErrorKind::TypeIsNotAnObject(sym::type_name(ty))))
            }
        };
        let mut inits: Vec<Option<&Node>> = vec![None; fields.len()];
        for arg in args {
            let NodeKind::Colon { lhs, rhs } = &arg.kind else {
                return Err(self.err(&arg.pos, CompileErrorKind::FieldInitMustBeAColonExpr));
            };
            let NodeKind::Ident(fname) = &lhs.kind else {
                return Err(self.err(&lhs.pos, CompileErrorKind::FieldInitMustBeAColonExpr));
            };
            let Some(field) = fields.iter().find(|f| &f.name == fname) else {
                return Err(self.err(
                    &lhs.pos,
                    CompileErrorKind::NoSuchField {
                        ty: sym::type_name(ty),
                        field: fname.clone(),
                    },
                ));
            };
            if inits[field.id as usize].is_some() {
                return Err(self.err(
                    &arg.pos,
                    CompileErrorKind::ObjectFieldsMustBeInitialized(sym::type_name(ty)),
                ));
            }
            inits[field.id as usize] = Some(rhs);
        }
        for (field, init) in fields.iter().zip(&inits) {
            let Some(init) = init else {
                return Err(self.err(
                    pos,
                    CompileErrorKind::ObjectFieldsMustBeInitialized(sym::type_name(ty)),
                ));
            };
            let vty = self.gen_expr_value(init)?;
            if !sym::ty_eq(&vty, &field.ty) {
                return Err(self.err(
                    &init.pos,
                    CompileErrorKind::TypeMismatch {
                        got: sym::type_name(&vty),
                        expected: sym::type_name(&field.ty),
                    },
                ));
            }
        }
        self.chunk.set_pos(pos);
        self.chunk.emit(Op::ConstrObj);
        self.chunk.emit_u16(TY_FIRST_OBJECT + object_id);
        self.chunk.emit_u8(fields.len() as u8);
        Ok(Rc::clone(ty))
    }

    // --- Assignment -------------------------------------------------------

    /// Assignment is a statement. Accepted left-hand sides: a variable name
    /// or an object field.
    pub(crate) fn gen_assign(
        &mut self,
        lhs: &Node,
        rhs: &Node,
        pos: &Pos,
    ) -> Result<(), CompileError> {
        match &lhs.kind {
            NodeKind::Ident(name) => {
                let sym = self.lookup(name).ok_or_else(|| {
                    self.err(&lhs.pos, CompileErrorKind::UndefinedReference(name.clone()))
                })?;
                let var = match &sym.borrow().kind {
                    SymKind::Choice(members) => members
                        .iter()
                        .find(|m| matches!(m.borrow().kind, SymKind::Var(_)))
                        .map(Rc::clone)
                        .unwrap_or_else(|| Rc::clone(&sym)),
                    _ => Rc::clone(&sym),
                };
                let (ty, is_let, set, local, stack_pos) = match &var.borrow().kind {
                    SymKind::Var(v) => {
                        (Rc::clone(&v.ty), v.is_let, v.set, v.local, v.stack_pos)
                    }
                    other => {
                        return Err(self.err(
                            &lhs.pos,
                            CompileErrorKind::SymKindMismatch {
                                expected: "a variable".to_string(),
                                got: kind_name(other).to_string(),
                            },
                        ))
                    }
                };
                if is_let && set {
                    return Err(
                        self.err(pos, CompileErrorKind::LetReassignment(name.clone()))
                    );
                }
                let rty = self.gen_expr_value(rhs)?;
                if !sym::ty_eq(&rty, &ty) {
                    return Err(self.err(
                        &rhs.pos,
                        CompileErrorKind::TypeMismatch {
                            got: sym::type_name(&rty),
                            expected: sym::type_name(&ty),
                        },
                    ));
                }
                if let SymKind::Var(v) = &mut var.borrow_mut().kind {
                    v.set = true;
                }
                self.chunk.set_pos(pos);
                if local {
                    self.chunk.emit(Op::PopL);
                    self.chunk.emit_u8(stack_pos);
                } else {
                    let id = self.chunk.intern(name);
                    self.chunk.emit(Op::PopG);
                    self.chunk.emit_u16(id);
                }
                Ok(())
            }
            NodeKind::Dot { lhs: receiver, name } => {
                let rty = self.gen_expr_value(receiver)?;
                let (field_id, field_ty) = self.object_field(&rty, name, &lhs.pos)?;
                let vty = self.gen_expr_value(rhs)?;
                if !sym::ty_eq(&vty, &field_ty) {
                    return Err(self.err(
                        &rhs.pos,
                        CompileErrorKind::TypeMismatch {
                            got: sym::type_name(&vty),
                            expected: sym::type_name(&field_ty),
                        },
                    ));
                }
                self.chunk.set_pos(pos);
                self.chunk.emit(Op::PopF);
                self.chunk.emit_u8(field_id);
                Ok(())
            }
            _ => Err(self.err(pos, CompileErrorKind::InvalidAssignment)),
        }
    }
}

fn callee_name(node: &Node) -> String {
    match &node.kind {
        NodeKind::Ident(name) => name.clone(),
        NodeKind::Call { callee, .. } => callee_name(callee),
        NodeKind::Dot { name, .. } => name.clone(),
        _ => "<expression>".to_string(),
    }
}
