//! The compilation unit: a procedure table plus the object-type id counter.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{CompileError, CompileErrorKind};
use crate::parser::ast::Pos;
use crate::sym::{self, Module, ProcSym, Sym, SymKind, SymRef};

use super::chunk::Chunk;
use super::Value;

/// Callback of a foreign (embedder-registered) procedure. Receives the
/// argument values in declaration order.
pub type ForeignFn = Box<dyn FnMut(&[Value]) -> Value>;

pub enum ProcKind {
    Native(Rc<Chunk>),
    Foreign(RefCell<ForeignFn>),
}

pub struct Proc {
    pub name: String,
    pub param_count: u8,
    pub has_result: bool,
    pub kind: ProcKind,
}

impl std::fmt::Debug for Proc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            ProcKind::Native(_) => "native",
            ProcKind::Foreign(_) => "foreign",
        };
        f.debug_struct("Proc")
            .field("name", &self.name)
            .field("param_count", &self.param_count)
            .field("has_result", &self.has_result)
            .field("kind", &kind)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct Script {
    pub procs: Vec<Proc>,
    pub type_count: u16,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next object-type id.
    pub fn next_object_id(&mut self) -> u16 {
        let id = self.type_count;
        self.type_count += 1;
        id
    }

    /// Register a foreign procedure in `module`. Parameter and return types
    /// are already-resolved type symbols; overload rules apply as for any
    /// other proc.
    pub fn add_proc(
        &mut self,
        module: &mut Module,
        name: &str,
        params: Vec<(String, SymRef)>,
        ret: Option<SymRef>,
        callback: ForeignFn,
    ) -> Result<u16, CompileError> {
        let pos = Pos { file: Rc::from("<native>"), line: 0, col: 0 };
        if name.is_empty() {
            return Err(CompileError::new(
                &pos,
                CompileErrorKind::InvalidSymName(name.to_string()),
            ));
        }
        let proc_id = self.procs.len() as u16;
        let has_result = ret.is_some();
        let sym = Sym::new(
            name,
            SymKind::Proc(ProcSym { proc_id, params: params.clone(), ret }),
        );
        if sym::insert(&mut module.scope, name, sym) == sym::InsertOutcome::Redeclaration {
            return Err(CompileError::new(
                &pos,
                CompileErrorKind::GlobalRedeclaration(name.to_string()),
            ));
        }
        self.procs.push(Proc {
            name: name.to_string(),
            param_count: params.len() as u8,
            has_result,
            kind: ProcKind::Foreign(RefCell::new(callback)),
        });
        Ok(proc_id)
    }
}
