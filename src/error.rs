//! Compilation errors.
//!
//! There are two fatal categories: [`SyntaxError`] from the scanner and
//! parser, and [`CompileError`] from the symbol model and code generator.
//! Both carry a source position and render as `file(line, col): message`.
//! The first error aborts compilation; there is no recovery.

use crate::parser::ast::Pos;

/// Top-level error for the whole pipeline, including execution through the
/// bundled VM.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Vm(#[from] crate::vm::VmError),
}

/// Raised by the scanner and parser. Fatal.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{file}({line}, {col}): {message}")]
pub struct SyntaxError {
    pub file: String,
    pub line: u32,
    pub col: u32,
    pub message: String,
}

impl SyntaxError {
    pub fn new(file: &str, line: u32, col: u32, message: impl Into<String>) -> Self {
        Self { file: file.to_string(), line, col, message: message.into() }
    }
}

/// Raised by the symbol model and code generator. Fatal.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{file}({line}, {col}): {kind}")]
pub struct CompileError {
    pub file: String,
    pub line: u32,
    pub col: u32,
    pub kind: CompileErrorKind,
}

impl CompileError {
    pub fn new(pos: &Pos, kind: CompileErrorKind) -> Self {
        Self { file: pos.file.to_string(), line: pos.line, col: pos.col, kind }
    }
}

/// Every compile-time error kind, with its message template defined once.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    #[error("'result' shadows the implicit result variable")]
    ShadowResult,
    #[error("redeclaration of '{0}'")]
    LocalRedeclaration(String),
    #[error("redeclaration of global '{0}'")]
    GlobalRedeclaration(String),
    #[error("undefined reference: '{0}'")]
    UndefinedReference(String),
    #[error("'{0}' cannot be reassigned")]
    LetReassignment(String),
    #[error("type mismatch: got <{got}> but expected <{expected}>")]
    TypeMismatch { got: String, expected: String },
    #[error("type mismatch: got <{got}>\nbut expected one of:\n{choices}")]
    TypeMismatchChoice { got: String, choices: String },
    #[error("'{0}' is not a proc")]
    NotAProc(String),
    #[error("invalid field access: '{0}'")]
    InvalidField(String),
    #[error("no field named '{field}' in object '{ty}'")]
    NonExistentField { field: String, ty: String },
    #[error("invalid assignment target")]
    InvalidAssignment,
    #[error("type '{0}' is not an object")]
    TypeIsNotAnObject(String),
    #[error("all fields of object '{0}' must be initialized exactly once")]
    ObjectFieldsMustBeInitialized(String),
    #[error("field initializer must be a colon expression, like 'name: value'")]
    FieldInitMustBeAColonExpr,
    #[error("object '{ty}' has no field '{field}'")]
    NoSuchField { ty: String, field: String },
    #[error("expression has no value")]
    ValueIsVoid,
    #[error("'{0}' is only usable inside a block")]
    OnlyUsableInABlock(String),
    #[error("'{0}' is only usable inside a loop")]
    OnlyUsableInALoop(String),
    #[error("'{0}' is only usable inside a proc")]
    OnlyUsableInAProc(String),
    #[error("'{0}' is only usable inside an iterator")]
    OnlyUsableInAnIterator(String),
    #[error("'{0}' must be initialized with a value")]
    VarMustHaveValue(String),
    #[error("iterator '{0}' must declare a yield type")]
    IterMustHaveYieldType(String),
    #[error("expected {expected} but found {got}")]
    SymKindMismatch { expected: String, got: String },
    #[error("invalid symbol name '{0}'")]
    InvalidSymName(String),
    #[error("could not infer generic arguments for '{0}', use '{0}[...]'")]
    CouldNotInferGeneric(String),
    #[error("'{0}' is not generic")]
    NotGeneric(String),
    #[error("'{name}' expects {expected} generic arguments, got {got}")]
    GenericArgLenMismatch { name: String, expected: usize, got: usize },
    #[error("could not infer a type for 'null', use 'null[T]'")]
    CouldNotInferNull,
    #[error("instantiation of '{0}' recurses with ever-changing arguments")]
    RecursiveInstantiation(String),
}
