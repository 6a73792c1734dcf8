//! Bytecode instructions and code objects
//!
//! A code object is a Scheme procedure in its compiled and assembled form,
//! suitable for execution by the VM. Instructions are `(opcode, arg)` pairs;
//! on the wire they are packed into a single 32-bit word with the opcode in
//! the high byte and the argument in the low 24 bits.
//!
//! The raw opcode byte is kept in [`Instruction`] rather than decoded at
//! load time, so that a corrupt opcode surfaces as a graceful VM error at
//! the dispatch site instead of a load failure.

use crate::heap::Heap;
use crate::value::{repr, ObjId};

/// Bytecode op-codes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Const = 0x00,
    LoadVar = 0x10,
    StoreVar = 0x11,
    DefVar = 0x12,
    Function = 0x20,
    Pop = 0x30,
    Jump = 0x40,
    FJump = 0x41,
    Return = 0x50,
    Call = 0x51,
}

impl Opcode {
    pub fn from_u8(byte: u8) -> Option<Opcode> {
        match byte {
            0x00 => Some(Opcode::Const),
            0x10 => Some(Opcode::LoadVar),
            0x11 => Some(Opcode::StoreVar),
            0x12 => Some(Opcode::DefVar),
            0x20 => Some(Opcode::Function),
            0x30 => Some(Opcode::Pop),
            0x40 => Some(Opcode::Jump),
            0x41 => Some(Opcode::FJump),
            0x50 => Some(Opcode::Return),
            0x51 => Some(Opcode::Call),
            _ => None,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Const => "CONST",
            Opcode::LoadVar => "LOADVAR",
            Opcode::StoreVar => "STOREVAR",
            Opcode::DefVar => "DEFVAR",
            Opcode::Function => "FUNCTION",
            Opcode::Pop => "POP",
            Opcode::Jump => "JUMP",
            Opcode::FJump => "FJUMP",
            Opcode::Return => "RETURN",
            Opcode::Call => "CALL",
        }
    }
}

/// A single bytecode instruction executable by the VM.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: u8,
    /// 24-bit unsigned argument.
    pub arg: u32,
}

impl Instruction {
    pub fn new(opcode: Opcode, arg: u32) -> Instruction {
        Instruction {
            opcode: opcode as u8,
            arg,
        }
    }

    /// Pack into the wire word: opcode in the high byte, arg in the low 24
    /// bits.
    pub fn pack(self) -> u32 {
        ((self.opcode as u32) << 24) | (self.arg & 0x00FF_FFFF)
    }

    /// Unpack from a wire word.
    pub fn unpack(word: u32) -> Instruction {
        Instruction {
            opcode: (word >> 24) as u8,
            arg: word & 0x00FF_FFFF,
        }
    }
}

/// Code object - a compiled procedure.
///
/// `constants` holds heap handles; a constant is either a leaf value or a
/// nested code object (the target of a `FUNCTION` instruction). `args` and
/// `varnames` are referenced by index from `CALL`-bound parameters and the
/// `LOADVAR`/`STOREVAR`/`DEFVAR` instructions respectively.
pub struct CodeObject {
    /// Procedure name for diagnostics. Anonymous lambdas and the top-level
    /// code object have an empty name.
    pub name: String,
    pub args: Vec<String>,
    pub varnames: Vec<String>,
    pub constants: Vec<ObjId>,
    pub code: Vec<Instruction>,
}

impl CodeObject {
    /// Multi-line disassembly of this code object, recursing into nested
    /// procedures referenced by `FUNCTION` instructions.
    pub fn disassemble(&self, heap: &Heap) -> String {
        self.disassemble_nested(heap, 0)
    }

    fn disassemble_nested(&self, heap: &Heap, nesting: usize) -> String {
        let prefix = " ".repeat(nesting);
        let mut out = String::new();
        out.push_str(&format!("{}----------\n", prefix));
        out.push_str(&format!("{}CodeObject: {}\n", prefix, self.name));
        out.push_str(&format!("{}Args: {:?}\n", prefix, self.args));

        for (offset, instr) in self.code.iter().enumerate() {
            let opcode = Opcode::from_u8(instr.opcode);
            let mnemonic = opcode.map(Opcode::mnemonic).unwrap_or("<invalid>");
            out.push_str(&format!("{}  {:4} {:<12} ", prefix, offset, mnemonic));

            match opcode {
                Some(Opcode::Const) => {
                    let constant = match self.constants.get(instr.arg as usize) {
                        Some(id) => repr(heap, *id),
                        None => "<out of range>".to_string(),
                    };
                    out.push_str(&format!("{:4} {{= {}}}\n", instr.arg, constant));
                }
                Some(Opcode::LoadVar) | Some(Opcode::StoreVar) | Some(Opcode::DefVar) => {
                    let varname = self
                        .varnames
                        .get(instr.arg as usize)
                        .map(String::as_str)
                        .unwrap_or("<out of range>");
                    out.push_str(&format!("{:4} {{= {}}}\n", instr.arg, varname));
                }
                Some(Opcode::Function) => {
                    out.push_str(&format!("{:4} {{=\n", instr.arg));
                    match self
                        .constants
                        .get(instr.arg as usize)
                        .and_then(|id| heap.get(*id).as_code())
                    {
                        Some(code) => {
                            out.push_str(&code.disassemble_nested(heap, nesting + 8));
                        }
                        None => out.push_str(&format!("{}<out of range>\n", prefix)),
                    }
                }
                Some(Opcode::Pop) | Some(Opcode::Return) => out.push('\n'),
                _ => out.push_str(&format!("{:4}\n", instr.arg)),
            }
        }

        out.push_str(&format!("{}----------\n", prefix));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Object;

    #[test]
    fn test_opcode_round_trip() {
        for byte in [0x00, 0x10, 0x11, 0x12, 0x20, 0x30, 0x40, 0x41, 0x50, 0x51] {
            let opcode = Opcode::from_u8(byte).unwrap();
            assert_eq!(opcode as u8, byte);
        }
        assert!(Opcode::from_u8(0x01).is_none());
        assert!(Opcode::from_u8(0xFF).is_none());
    }

    #[test]
    fn test_instruction_pack_unpack() {
        let instr = Instruction::new(Opcode::Call, 3);
        assert_eq!(instr.pack(), 0x5100_0003);
        assert_eq!(Instruction::unpack(0x5100_0003), instr);

        // The argument occupies only the low 24 bits.
        let instr = Instruction::new(Opcode::Jump, 0x00AB_CDEF);
        let word = instr.pack();
        assert_eq!(word >> 24, 0x40);
        assert_eq!(word & 0x00FF_FFFF, 0x00AB_CDEF);
        assert_eq!(Instruction::unpack(word), instr);
    }

    #[test]
    fn test_disassemble_smoke() {
        let mut heap = Heap::new();
        let six = heap.number(6);
        let code = CodeObject {
            name: "main".to_string(),
            args: vec![],
            varnames: vec!["write".to_string()],
            constants: vec![six],
            code: vec![
                Instruction::new(Opcode::Const, 0),
                Instruction::new(Opcode::LoadVar, 0),
                Instruction::new(Opcode::Call, 1),
                Instruction::new(Opcode::Pop, 0),
            ],
        };
        let id = heap.alloc(Object::Code(code));
        let listing = match heap.get(id) {
            Object::Code(co) => co.disassemble(&heap),
            _ => unreachable!(),
        };
        assert!(listing.contains("CodeObject: main"));
        assert!(listing.contains("CONST"));
        assert!(listing.contains("{= 6}"));
        assert!(listing.contains("{= write}"));
    }
}
