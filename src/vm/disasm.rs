//! Chunk disassembly: an instruction iterator for tests and a textual
//! listing for the CLI.

use super::chunk::{Chunk, Op};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    None,
    U8(u8),
    U16(u16),
    F64(f64),
    /// `constrObj`: object-type id and field count.
    TyFields(u16, u8),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Instr {
    pub offset: usize,
    pub op: Op,
    pub operand: Operand,
}

#[derive(thiserror::Error, Debug)]
pub enum DisasmError {
    #[error("invalid opcode {byte:#04x} at offset {offset}")]
    BadOpcode { offset: usize, byte: u8 },
    #[error("truncated operand at offset {0}")]
    Truncated(usize),
}

/// Decode a chunk into its instruction sequence.
pub fn instructions(chunk: &Chunk) -> Result<Vec<Instr>, DisasmError> {
    let code = &chunk.code;
    let mut out = Vec::new();
    let mut ip = 0usize;
    while ip < code.len() {
        let offset = ip;
        let byte = code[ip];
        let op = Op::from_byte(byte).ok_or(DisasmError::BadOpcode { offset, byte })?;
        ip += 1;
        let len = op.operand_len();
        let bytes = code
            .get(ip..ip + len)
            .ok_or(DisasmError::Truncated(offset))?;
        let operand = match len {
            0 => Operand::None,
            1 => Operand::U8(bytes[0]),
            2 => Operand::U16(u16::from_le_bytes([bytes[0], bytes[1]])),
            3 => Operand::TyFields(u16::from_le_bytes([bytes[0], bytes[1]]), bytes[2]),
            _ => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                Operand::F64(f64::from_le_bytes(raw))
            }
        };
        ip += len;
        out.push(Instr { offset, op, operand });
    }
    Ok(out)
}

/// The opcodes of a chunk, in order.
pub fn opcodes(chunk: &Chunk) -> Result<Vec<Op>, DisasmError> {
    Ok(instructions(chunk)?.into_iter().map(|i| i.op).collect())
}

/// Render a chunk as a listing with offsets, source positions and resolved
/// string operands.
pub fn disassemble(chunk: &Chunk, name: &str) -> String {
    let mut out = format!("== {} ==\n", name);
    let instrs = match instructions(chunk) {
        Ok(instrs) => instrs,
        Err(e) => {
            out.push_str(&format!("  <{}>\n", e));
            return out;
        }
    };
    let mut last_line = 0;
    for instr in instrs {
        let (line, col) = chunk.pos_at(instr.offset).unwrap_or((0, 0));
        if line == last_line {
            out.push_str(&format!("{:04}      | ", instr.offset));
        } else {
            out.push_str(&format!("{:04} {:4}:{:<3} ", instr.offset, line, col));
            last_line = line;
        }
        out.push_str(instr.op.name());
        match instr.operand {
            Operand::None => {}
            Operand::U8(v) => out.push_str(&format!(" {}", v)),
            Operand::U16(v) => match instr.op {
                Op::PushS | Op::PushG | Op::PopG => {
                    out.push_str(&format!(" {} ({:?})", v, chunk.string(v)))
                }
                Op::JumpFwd | Op::JumpFwdT | Op::JumpFwdF => {
                    let target = instr.offset + 3 + v as usize;
                    out.push_str(&format!(" +{} -> {:04}", v, target));
                }
                Op::JumpBack => {
                    let target = (instr.offset + 3).saturating_sub(v as usize);
                    out.push_str(&format!(" -{} -> {:04}", v, target));
                }
                _ => out.push_str(&format!(" {}", v)),
            },
            Operand::F64(v) => out.push_str(&format!(" {}", v)),
            Operand::TyFields(ty, n) => out.push_str(&format!(" ty={} fields={}", ty, n)),
        }
        out.push('\n');
    }
    out
}
