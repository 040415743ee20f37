//! Generic instantiation: cache-first, then recompile the template's
//! declaration under a transient scope binding each generic parameter to
//! its argument symbol.

use std::rc::Rc;

use crate::error::{CompileError, CompileErrorKind};
use crate::parser::ast::{Node, NodeKind, Pos};
use crate::sym::{self, Sym, SymKind, SymRef};

use super::{Gen, MAX_INST_DEPTH};

impl<'a> Gen<'a> {
    /// Instantiate `template` with `args`. Repeated calls with the same
    /// argument vector return the cached symbol; a proc instantiation is
    /// cached before its body is emitted so self-recursion with the same
    /// arguments resolves to the reserved proc id instead of looping.
    pub(crate) fn instantiate(
        &mut self,
        template: &SymRef,
        args: &[SymRef],
        pos: &Pos,
    ) -> Result<SymRef, CompileError> {
        let name = template.borrow().name.clone();
        let key: Vec<sym::SymId> = args.iter().map(sym::sym_id).collect();
        let (gparams, decl) = {
            let t = template.borrow();
            let Some(gparams) = &t.generic_params else {
                return Err(self.err(pos, CompileErrorKind::NotGeneric(name)));
            };
            if gparams.len() != args.len() {
                return Err(self.err(
                    pos,
                    CompileErrorKind::GenericArgLenMismatch {
                        name,
                        expected: gparams.len(),
                        got: args.len(),
                    },
                ));
            }
            for (gp, arg) in gparams.iter().zip(args) {
                if let SymKind::GenericParam { constraint: Some(c) } = &gp.borrow().kind {
                    if !sym::ty_eq(arg, c) {
                        return Err(self.err(
                            pos,
                            CompileErrorKind::TypeMismatch {
                                got: sym::type_name(arg),
                                expected: sym::type_name(c),
                            },
                        ));
                    }
                }
            }
            if let Some(cache) = &t.inst_cache {
                if let Some(hit) = cache.get(&key) {
                    return Ok(Rc::clone(hit));
                }
            }
            (gparams.clone(), t.decl.clone())
        };
        if self.inst_depth >= MAX_INST_DEPTH {
            return Err(self.err(pos, CompileErrorKind::RecursiveInstantiation(name)));
        }
        self.inst_depth += 1;
        tracing::debug!(template = %name, depth = self.inst_depth, "instantiating");

        // Transient scope: each generic parameter name binds directly to
        // its argument symbol while the template recompiles.
        self.push_scope();
        for (gp, arg) in gparams.iter().zip(args) {
            let pname = gp.borrow().name.clone();
            if let Some(scope) = self.scopes.last_mut() {
                scope.syms.insert(pname, Rc::clone(arg));
            }
        }

        let result = self.instantiate_dispatch(template, &name, args, &key, decl, pos);

        self.pop_scope_silent();
        self.inst_depth -= 1;
        result
    }

    fn instantiate_dispatch(
        &mut self,
        template: &SymRef,
        name: &str,
        args: &[SymRef],
        key: &[sym::SymId],
        decl: Option<Node>,
        pos: &Pos,
    ) -> Result<SymRef, CompileError> {
        let template_kind_is_proc = matches!(template.borrow().kind, SymKind::Proc(_));
        let template_kind_is_type = matches!(template.borrow().kind, SymKind::Type(_));

        if template_kind_is_proc {
            let Some(Node { kind: NodeKind::ProcDecl(pdecl), .. }) = decl else {
                return Err(self.err(pos, CompileErrorKind::NotGeneric(name.to_string())));
            };
            let sym = self.declare_proc_sym(&pdecl, pos, false)?;
            sym.borrow_mut().inst_args = Some(args.to_vec());
            cache_insert(template, key, &sym);
            self.emit_proc_body(&sym, &pdecl, pos)?;
            return Ok(sym);
        }
        if template_kind_is_type {
            if let Some(Node { kind: NodeKind::ObjectDecl(odecl), .. }) = decl {
                let sym = self.create_object_sym(name);
                sym.borrow_mut().inst_args = Some(args.to_vec());
                cache_insert(template, key, &sym);
                self.fill_object_fields(&sym, &odecl)?;
                return Ok(sym);
            }
            // A non-object type template instantiates to a shallow clone
            // carrying the argument vector.
            let kind = template.borrow().kind.clone();
            let sym = Sym::new(name, kind);
            sym.borrow_mut().inst_args = Some(args.to_vec());
            cache_insert(template, key, &sym);
            return Ok(sym);
        }
        Err(self.err(pos, CompileErrorKind::NotGeneric(name.to_string())))
    }
}

fn cache_insert(template: &SymRef, key: &[sym::SymId], sym: &SymRef) {
    if let Some(cache) = &mut template.borrow_mut().inst_cache {
        cache.insert(key.to_vec(), Rc::clone(sym));
    }
}
