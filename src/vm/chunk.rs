//! Chunks: the mutable byte buffer one compiled procedure (or the top-level
//! script) is emitted into, together with its interned strings and a
//! run-length-encoded line-info table.
//!
//! Multi-byte operands are little-endian. Forward jumps are emitted as
//! two-byte holes and patched with the distance from the byte after the
//! operand to the current end of code.

use std::collections::HashMap;
use std::rc::Rc;

use crate::parser::ast::Pos;

/// Object-type ids start here so they never collide with primitive ids.
pub const TY_FIRST_OBJECT: u16 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Op {
    PushTrue = 0,
    PushFalse,
    PushN,
    PushS,
    PushNil,
    PushG,
    PopG,
    PushL,
    PopL,
    PushF,
    PopF,
    Discard,
    NDiscard,
    NegN,
    AddN,
    SubN,
    MultN,
    DivN,
    InvB,
    EqB,
    EqN,
    LessN,
    GreaterN,
    JumpFwd,
    JumpFwdT,
    JumpFwdF,
    JumpBack,
    CallD,
    ReturnVal,
    ReturnVoid,
    ConstrObj,
    Halt,
}

impl Op {
    pub fn from_byte(b: u8) -> Option<Op> {
        use Op::*;
        Some(match b {
            0 => PushTrue,
            1 => PushFalse,
            2 => PushN,
            3 => PushS,
            4 => PushNil,
            5 => PushG,
            6 => PopG,
            7 => PushL,
            8 => PopL,
            9 => PushF,
            10 => PopF,
            11 => Discard,
            12 => NDiscard,
            13 => NegN,
            14 => AddN,
            15 => SubN,
            16 => MultN,
            17 => DivN,
            18 => InvB,
            19 => EqB,
            20 => EqN,
            21 => LessN,
            22 => GreaterN,
            23 => JumpFwd,
            24 => JumpFwdT,
            25 => JumpFwdF,
            26 => JumpBack,
            27 => CallD,
            28 => ReturnVal,
            29 => ReturnVoid,
            30 => ConstrObj,
            31 => Halt,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        use Op::*;
        match self {
            PushTrue => "pushTrue",
            PushFalse => "pushFalse",
            PushN => "pushN",
            PushS => "pushS",
            PushNil => "pushNil",
            PushG => "pushG",
            PopG => "popG",
            PushL => "pushL",
            PopL => "popL",
            PushF => "pushF",
            PopF => "popF",
            Discard => "discard",
            NDiscard => "nDiscard",
            NegN => "negN",
            AddN => "addN",
            SubN => "subN",
            MultN => "multN",
            DivN => "divN",
            InvB => "invB",
            EqB => "eqB",
            EqN => "eqN",
            LessN => "lessN",
            GreaterN => "greaterN",
            JumpFwd => "jumpFwd",
            JumpFwdT => "jumpFwdT",
            JumpFwdF => "jumpFwdF",
            JumpBack => "jumpBack",
            CallD => "callD",
            ReturnVal => "returnVal",
            ReturnVoid => "returnVoid",
            ConstrObj => "constrObj",
            Halt => "halt",
        }
    }

    /// Width of the operand bytes following the opcode.
    pub fn operand_len(self) -> usize {
        use Op::*;
        match self {
            PushN => 8,
            PushS | PushNil | PushG | PopG => 2,
            PushL | PopL | PushF | PopF | NDiscard => 1,
            JumpFwd | JumpFwdT | JumpFwdF | JumpBack | CallD => 2,
            ConstrObj => 3,
            _ => 0,
        }
    }
}

/// One run of the line-info table: `run` consecutive code bytes emitted at
/// `(line, col)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRun {
    pub line: u32,
    pub col: u32,
    pub run: u32,
}

#[derive(Debug)]
pub struct Chunk {
    pub code: Vec<u8>,
    lines: Vec<LineRun>,
    strings: Vec<String>,
    string_ids: HashMap<String, u16>,
    pub file: Rc<str>,
    pub line: u32,
    pub col: u32,
}

impl Chunk {
    pub fn new(file: &Rc<str>) -> Self {
        Self {
            code: Vec::new(),
            lines: Vec::new(),
            strings: Vec::new(),
            string_ids: HashMap::new(),
            file: Rc::clone(file),
            line: 1,
            col: 1,
        }
    }

    /// Set the position subsequent emissions are attributed to.
    pub fn set_pos(&mut self, pos: &Pos) {
        self.line = pos.line;
        self.col = pos.col;
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    fn add_line(&mut self, n: u32) {
        if let Some(last) = self.lines.last_mut() {
            if last.line == self.line && last.col == self.col {
                last.run += n;
                return;
            }
        }
        self.lines.push(LineRun { line: self.line, col: self.col, run: n });
    }

    pub fn emit(&mut self, op: Op) {
        self.code.push(op as u8);
        self.add_line(1);
    }

    pub fn emit_u8(&mut self, b: u8) {
        self.code.push(b);
        self.add_line(1);
    }

    pub fn emit_u16(&mut self, v: u16) {
        self.code.extend_from_slice(&v.to_le_bytes());
        self.add_line(2);
    }

    pub fn emit_f64(&mut self, v: f64) {
        self.code.extend_from_slice(&v.to_le_bytes());
        self.add_line(8);
    }

    /// Emit `n` placeholder bytes and return the offset of the first, to be
    /// patched later. The placeholder bytes are counted in the line info.
    pub fn emit_hole(&mut self, n: usize) -> usize {
        let at = self.code.len();
        for _ in 0..n {
            self.code.push(0xff);
        }
        self.add_line(n as u32);
        at
    }

    /// Write the forward distance from `offset + 2` to the current end of
    /// code into the two-byte hole at `offset`.
    pub fn patch_hole_u16(&mut self, offset: usize) {
        let dist = (self.code.len() - (offset + 2)) as u16;
        self.code[offset..offset + 2].copy_from_slice(&dist.to_le_bytes());
    }

    /// Intern a string, returning its stable id.
    pub fn intern(&mut self, s: &str) -> u16 {
        if let Some(&id) = self.string_ids.get(s) {
            return id;
        }
        let id = self.strings.len() as u16;
        self.strings.push(s.to_string());
        self.string_ids.insert(s.to_string(), id);
        id
    }

    pub fn string(&self, id: u16) -> &str {
        &self.strings[id as usize]
    }

    pub fn strings(&self) -> &[String] {
        &self.strings
    }

    /// Position of the code byte at `offset`.
    pub fn pos_at(&self, offset: usize) -> Option<(u32, u32)> {
        let mut covered = 0usize;
        for run in &self.lines {
            covered += run.run as usize;
            if offset < covered {
                return Some((run.line, run.col));
            }
        }
        None
    }

    /// Total bytes covered by the line-info table. Always equals `len()`.
    pub fn line_info_total(&self) -> usize {
        self.lines.iter().map(|r| r.run as usize).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::Pos;

    fn test_chunk() -> Chunk {
        Chunk::new(&Rc::from("test.em"))
    }

    #[test]
    fn line_runs_merge_and_cover_all_bytes() {
        let mut c = test_chunk();
        c.emit(Op::PushTrue);
        c.emit(Op::PushFalse);
        let pos = Pos { file: Rc::from("test.em"), line: 2, col: 5 };
        c.set_pos(&pos);
        c.emit(Op::PushN);
        c.emit_f64(1.0);
        assert_eq!(c.line_info_total(), c.len());
        assert_eq!(c.pos_at(0), Some((1, 1)));
        assert_eq!(c.pos_at(2), Some((2, 5)));
        assert_eq!(c.pos_at(10), Some((2, 5)));
        assert_eq!(c.pos_at(11), None);
    }

    #[test]
    fn holes_patch_forward_distance() {
        let mut c = test_chunk();
        c.emit(Op::JumpFwd);
        let hole = c.emit_hole(2);
        c.emit(Op::Discard);
        c.emit(Op::Discard);
        c.patch_hole_u16(hole);
        let dist = u16::from_le_bytes([c.code[hole], c.code[hole + 1]]);
        assert_eq!(dist, 2);
    }

    #[test]
    fn interning_is_stable() {
        let mut c = test_chunk();
        let a = c.intern("x");
        let b = c.intern("y");
        assert_eq!(c.intern("x"), a);
        assert_ne!(a, b);
        assert_eq!(c.string(b), "y");
    }
}
