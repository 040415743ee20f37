//! # ember — a small statically-typed scripting language
//!
//! ember compiles source text to stack-machine bytecode:
//! - line-sensitive statement grammar with a Pratt expression parser and
//!   user-definable operators
//! - static types with overloading and generics (instantiation is cached
//!   per argument vector)
//! - iterators spliced into `for` loops at compile time, so loops cost no
//!   allocation at runtime
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! ember::run("hello.em", "print(\"hello\")").unwrap();
//! ```
//!
//! ## Compile and Run Separately
//!
//! ```rust,no_run
//! use ember::{compile, Vm};
//! let compiled = compile("main.em", "let x = 41 + 1").unwrap();
//! let mut vm = Vm::new(&compiled.script);
//! vm.run(&compiled.chunk).unwrap();
//! ```

pub mod codegen;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod sym;
pub mod vm;

use std::rc::Rc;

pub use error::{CompileError, CompileErrorKind, Error, SyntaxError};
pub use parser::ast::{render, Node};
pub use vm::chunk::Chunk;
pub use vm::script::{ForeignFn, Script};
pub use vm::{Value, Vm, VmError};

use parser::ast::Pos;
use sym::{Module, SymKind, SymRef, SystemTypes};

/// Output of a compilation: the procedure table and the top-level chunk.
pub struct Compiled {
    pub script: Script,
    pub chunk: Chunk,
}

/// A compilation session: the script being built, the module the source
/// populates, and the system module with the primitive types. Foreign
/// procedures are registered here before `compile` consumes the session.
pub struct Compiler {
    script: Script,
    system: Module,
    tys: SystemTypes,
    module: Module,
}

impl Compiler {
    pub fn new(module_name: &str) -> Self {
        let (system, tys) = sym::system_module();
        Self { script: Script::new(), system, tys, module: Module::new(module_name) }
    }

    /// Register a foreign procedure. Parameter and return types are named
    /// (`"number"`, `"string"`, ...) and resolved against the module and
    /// the system module; `"void"` means no result.
    pub fn add_proc(
        &mut self,
        name: &str,
        params: &[(&str, &str)],
        ret: &str,
        callback: ForeignFn,
    ) -> Result<u16, Error> {
        let mut resolved = Vec::with_capacity(params.len());
        for (pname, tname) in params {
            resolved.push((pname.to_string(), self.resolve_type_name(tname)?));
        }
        let ret = if ret == "void" { None } else { Some(self.resolve_type_name(ret)?) };
        let id = self
            .script
            .add_proc(&mut self.module, name, resolved, ret, callback)?;
        Ok(id)
    }

    fn resolve_type_name(&self, name: &str) -> Result<SymRef, Error> {
        let found = self
            .module
            .scope
            .syms
            .get(name)
            .or_else(|| self.system.scope.syms.get(name))
            .cloned();
        match found {
            Some(sym) if matches!(sym.borrow().kind, SymKind::Type(_)) => Ok(sym),
            _ => {
                let pos = Pos { file: Rc::from("<native>"), line: 0, col: 0 };
                Err(CompileError::new(
                    &pos,
                    CompileErrorKind::UndefinedReference(name.to_string()),
                )
                .into())
            }
        }
    }

    /// Parse and compile `source`, consuming the session.
    pub fn compile(mut self, file: &str, source: &str) -> Result<Compiled, Error> {
        let ast = parser::parse(file, source)?;
        tracing::debug!(file, "parsed");
        let chunk =
            codegen::generate(&mut self.script, &self.system, &self.tys, &mut self.module, &ast)?;
        Ok(Compiled { script: self.script, chunk })
    }
}

/// Compile ember source into bytecode with no foreign procedures.
pub fn compile(file: &str, source: &str) -> Result<Compiled, Error> {
    Compiler::new("main").compile(file, source)
}

/// Register the built-in `print` overloads (string, number, bool).
pub fn register_builtins(compiler: &mut Compiler) -> Result<(), Error> {
    for ty in ["string", "number", "bool"] {
        compiler.add_proc(
            "print",
            &[("value", ty)],
            "void",
            Box::new(|args| {
                if let Some(v) = args.first() {
                    println!("{}", v);
                }
                Value::Bool(false)
            }),
        )?;
    }
    Ok(())
}

/// Compile and run ember source in one step, with `print` available.
pub fn run(file: &str, source: &str) -> Result<(), Error> {
    let mut compiler = Compiler::new("main");
    register_builtins(&mut compiler)?;
    let compiled = compiler.compile(file, source)?;
    let mut vm = Vm::new(&compiled.script);
    vm.run(&compiled.chunk)?;
    Ok(())
}
