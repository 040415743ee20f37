//! A compact, safe virtual machine for the emitted bytecode.
//!
//! The VM is a collaborator of the compiler: it exists so compiled chunks
//! can actually be executed (and so the behavioral tests can observe loop
//! and call semantics), not as a performance surface. Values are a plain
//! enum, locals live on one value stack addressed from a frame base, and
//! direct calls recurse through `exec`.

pub mod chunk;
pub mod disasm;
pub mod script;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use self::chunk::{Chunk, Op};
use self::script::{ProcKind, Script};

const MAX_CALL_DEPTH: u32 = 256;

#[derive(Debug, Clone)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Str(Rc<str>),
    Obj(Rc<RefCell<ObjVal>>),
    /// A typed nil, carrying its object-type id.
    Nil(u16),
}

#[derive(Debug)]
pub struct ObjVal {
    pub ty: u16,
    pub fields: Vec<Value>,
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => {
                if *n == (*n as i64) as f64 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "{}", s),
            Value::Nil(_) => write!(f, "null"),
            Value::Obj(obj) => {
                let obj = obj.borrow();
                write!(f, "(")?;
                for (i, field) in obj.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum VmError {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("invalid opcode {0:#04x}")]
    BadOpcode(u8),
    #[error("truncated instruction at offset {0}")]
    Truncated(usize),
    #[error("undefined global '{0}'")]
    UndefinedGlobal(String),
    #[error("field access on null")]
    NullAccess,
    #[error("expected a {0}")]
    TypeError(&'static str),
    #[error("unknown proc id {0}")]
    BadProcId(u16),
    #[error("call depth exceeded")]
    CallDepth,
}

pub struct Vm<'a> {
    script: &'a Script,
    stack: Vec<Value>,
    globals: HashMap<String, Value>,
    depth: u32,
}

impl<'a> Vm<'a> {
    pub fn new(script: &'a Script) -> Self {
        Self { script, stack: Vec::new(), globals: HashMap::new(), depth: 0 }
    }

    /// Execute a top-level chunk to its `halt`.
    pub fn run(&mut self, chunk: &Chunk) -> Result<(), VmError> {
        self.exec(chunk, 0)
    }

    /// Value of a global, for embedders and tests.
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    fn pop(&mut self) -> Result<Value, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn pop_number(&mut self) -> Result<f64, VmError> {
        match self.pop()? {
            Value::Number(n) => Ok(n),
            _ => Err(VmError::TypeError("number")),
        }
    }

    fn pop_bool(&mut self) -> Result<bool, VmError> {
        match self.pop()? {
            Value::Bool(b) => Ok(b),
            _ => Err(VmError::TypeError("bool")),
        }
    }

    fn peek_bool(&self) -> Result<bool, VmError> {
        match self.stack.last() {
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(VmError::TypeError("bool")),
            None => Err(VmError::StackUnderflow),
        }
    }

    fn exec(&mut self, chunk: &Chunk, base: usize) -> Result<(), VmError> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(VmError::CallDepth);
        }
        self.depth += 1;
        let result = self.dispatch(chunk, base);
        self.depth -= 1;
        result
    }

    fn dispatch(&mut self, chunk: &Chunk, base: usize) -> Result<(), VmError> {
        let code = &chunk.code;
        let mut ip = 0usize;

        let read_u8 = |ip: &mut usize| -> Result<u8, VmError> {
            let b = *code.get(*ip).ok_or(VmError::Truncated(*ip))?;
            *ip += 1;
            Ok(b)
        };
        let read_u16 = |ip: &mut usize| -> Result<u16, VmError> {
            let bytes = code.get(*ip..*ip + 2).ok_or(VmError::Truncated(*ip))?;
            *ip += 2;
            Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
        };
        let read_f64 = |ip: &mut usize| -> Result<f64, VmError> {
            let bytes = code.get(*ip..*ip + 8).ok_or(VmError::Truncated(*ip))?;
            *ip += 8;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(bytes);
            Ok(f64::from_le_bytes(raw))
        };

        loop {
            let at = ip;
            let byte = read_u8(&mut ip)?;
            let op = Op::from_byte(byte).ok_or(VmError::BadOpcode(byte))?;
            match op {
                Op::PushTrue => self.stack.push(Value::Bool(true)),
                Op::PushFalse => self.stack.push(Value::Bool(false)),
                Op::PushN => {
                    let n = read_f64(&mut ip)?;
                    self.stack.push(Value::Number(n));
                }
                Op::PushS => {
                    let id = read_u16(&mut ip)?;
                    self.stack.push(Value::Str(Rc::from(chunk.string(id))));
                }
                Op::PushNil => {
                    let ty = read_u16(&mut ip)?;
                    self.stack.push(Value::Nil(ty));
                }
                Op::PushG => {
                    let id = read_u16(&mut ip)?;
                    let name = chunk.string(id);
                    let value = self
                        .globals
                        .get(name)
                        .cloned()
                        .ok_or_else(|| VmError::UndefinedGlobal(name.to_string()))?;
                    self.stack.push(value);
                }
                Op::PopG => {
                    let id = read_u16(&mut ip)?;
                    let value = self.pop()?;
                    self.globals.insert(chunk.string(id).to_string(), value);
                }
                Op::PushL => {
                    let slot = read_u8(&mut ip)? as usize;
                    let value = self
                        .stack
                        .get(base + slot)
                        .cloned()
                        .ok_or(VmError::StackUnderflow)?;
                    self.stack.push(value);
                }
                Op::PopL => {
                    let slot = read_u8(&mut ip)? as usize;
                    let value = self.pop()?;
                    let dst = self
                        .stack
                        .get_mut(base + slot)
                        .ok_or(VmError::StackUnderflow)?;
                    *dst = value;
                }
                Op::PushF => {
                    let field = read_u8(&mut ip)? as usize;
                    match self.pop()? {
                        Value::Obj(obj) => {
                            let value = obj
                                .borrow()
                                .fields
                                .get(field)
                                .cloned()
                                .ok_or(VmError::TypeError("field"))?;
                            self.stack.push(value);
                        }
                        Value::Nil(_) => return Err(VmError::NullAccess),
                        _ => return Err(VmError::TypeError("object")),
                    }
                }
                Op::PopF => {
                    let field = read_u8(&mut ip)? as usize;
                    let value = self.pop()?;
                    match self.pop()? {
                        Value::Obj(obj) => {
                            let mut obj = obj.borrow_mut();
                            let dst =
                                obj.fields.get_mut(field).ok_or(VmError::TypeError("field"))?;
                            *dst = value;
                        }
                        Value::Nil(_) => return Err(VmError::NullAccess),
                        _ => return Err(VmError::TypeError("object")),
                    }
                }
                Op::Discard => {
                    self.pop()?;
                }
                Op::NDiscard => {
                    let n = read_u8(&mut ip)? as usize;
                    if self.stack.len() < n {
                        return Err(VmError::StackUnderflow);
                    }
                    self.stack.truncate(self.stack.len() - n);
                }
                Op::NegN => {
                    let n = self.pop_number()?;
                    self.stack.push(Value::Number(-n));
                }
                Op::AddN => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.stack.push(Value::Number(a + b));
                }
                Op::SubN => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.stack.push(Value::Number(a - b));
                }
                Op::MultN => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.stack.push(Value::Number(a * b));
                }
                Op::DivN => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.stack.push(Value::Number(a / b));
                }
                Op::InvB => {
                    let b = self.pop_bool()?;
                    self.stack.push(Value::Bool(!b));
                }
                Op::EqB => {
                    let b = self.pop_bool()?;
                    let a = self.pop_bool()?;
                    self.stack.push(Value::Bool(a == b));
                }
                Op::EqN => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.stack.push(Value::Bool(a == b));
                }
                Op::LessN => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.stack.push(Value::Bool(a < b));
                }
                Op::GreaterN => {
                    let b = self.pop_number()?;
                    let a = self.pop_number()?;
                    self.stack.push(Value::Bool(a > b));
                }
                Op::JumpFwd => {
                    let dist = read_u16(&mut ip)? as usize;
                    ip += dist;
                }
                Op::JumpFwdT => {
                    let dist = read_u16(&mut ip)? as usize;
                    if self.peek_bool()? {
                        ip += dist;
                    }
                }
                Op::JumpFwdF => {
                    let dist = read_u16(&mut ip)? as usize;
                    if !self.peek_bool()? {
                        ip += dist;
                    }
                }
                Op::JumpBack => {
                    let dist = read_u16(&mut ip)? as usize;
                    if dist > ip {
                        return Err(VmError::Truncated(at));
                    }
                    ip -= dist;
                }
                Op::CallD => {
                    let id = read_u16(&mut ip)?;
                    self.call(id)?;
                }
                Op::ReturnVal => {
                    let value = self.pop()?;
                    self.stack.truncate(base);
                    self.stack.push(value);
                    return Ok(());
                }
                Op::ReturnVoid => {
                    self.stack.truncate(base);
                    return Ok(());
                }
                Op::ConstrObj => {
                    let ty = read_u16(&mut ip)?;
                    let n = read_u8(&mut ip)? as usize;
                    if self.stack.len() < n {
                        return Err(VmError::StackUnderflow);
                    }
                    let fields = self.stack.split_off(self.stack.len() - n);
                    self.stack
                        .push(Value::Obj(Rc::new(RefCell::new(ObjVal { ty, fields }))));
                }
                Op::Halt => return Ok(()),
            }
        }
    }

    fn call(&mut self, id: u16) -> Result<(), VmError> {
        let script = self.script;
        let proc = script.procs.get(id as usize).ok_or(VmError::BadProcId(id))?;
        let argc = proc.param_count as usize;
        if self.stack.len() < argc {
            return Err(VmError::StackUnderflow);
        }
        match &proc.kind {
            ProcKind::Native(chunk) => {
                let chunk = Rc::clone(chunk);
                let callee_base = self.stack.len() - argc;
                self.exec(&chunk, callee_base)
            }
            ProcKind::Foreign(callback) => {
                let args = self.stack.split_off(self.stack.len() - argc);
                let result = (callback.borrow_mut())(&args);
                if proc.has_result {
                    self.stack.push(result);
                }
                Ok(())
            }
        }
    }
}
