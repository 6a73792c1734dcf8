//! Bytecode (de)serialization
//!
//! The wire format is a tagged binary stream. Every multi-byte integer is a
//! 4-byte little-endian word. A file starts with the magic constant
//! followed by the serialized top-level code object; each object is a
//! single type-tag byte followed by its body:
//!
//! | tag | object      | body                                            |
//! |-----|-------------|-------------------------------------------------|
//! | `0` | null        | nothing                                         |
//! | `b` | boolean     | 1 byte, 0 = false, 1 = true                     |
//! | `n` | number      | signed word                                     |
//! | `s` | string      | word length, then the bytes                     |
//! | `S` | symbol      | a string body                                   |
//! | `p` | pair        | two tagged objects                              |
//! | `i` | instruction | word: opcode in the high byte, arg in the low 24 |
//! | `[` | sequence    | word length, then that many tagged elements     |
//! | `c` | code object | name string, args, constants, varnames, code    |
//!
//! Constants may be any value including nested code objects. Deserialized
//! values are allocated directly on the heap; during boot everything is
//! reachable through the root code object's constant pool, so nothing can
//! be collected out from under the loader.
//!
//! [`serialize`] is the exact inverse and serves as the round-trip oracle
//! for tests and fixtures.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::bytecode::{CodeObject, Instruction};
use crate::error::LoadError;
use crate::heap::{Heap, FALSE_ID, NULL_ID, TRUE_ID};
use crate::value::{ObjId, Object};

/// A version word in the high two bytes and 0B0B in the low two.
pub const MAGIC: u32 = 0x0001_0B0B;

const TYPE_NULL: u8 = b'0';
const TYPE_BOOLEAN: u8 = b'b';
const TYPE_STRING: u8 = b's';
const TYPE_SYMBOL: u8 = b'S';
const TYPE_NUMBER: u8 = b'n';
const TYPE_PAIR: u8 = b'p';
const TYPE_INSTR: u8 = b'i';
const TYPE_SEQUENCE: u8 = b'[';
const TYPE_CODEOBJECT: u8 = b'c';

/// Deserialize a bytecode file into a code object allocated on the heap.
pub fn load_file(heap: &mut Heap, path: &Path) -> Result<ObjId, LoadError> {
    let bytes = fs::read(path)?;
    load_bytes(heap, &bytes)
}

/// Deserialize a byte buffer into a code object allocated on the heap.
pub fn load_bytes(heap: &mut Heap, bytes: &[u8]) -> Result<ObjId, LoadError> {
    let mut reader = Reader { bytes, pos: 0 };
    let magic = reader.read_word()?;
    if magic != MAGIC {
        return Err(LoadError::BadMagic(magic));
    }
    reader.expect_tag(TYPE_CODEOBJECT, "'c'")?;
    let id = reader.read_code_object(heap)?;
    if let Object::Code(code) = heap.get(id) {
        debug!(
            "loaded code object '{}' ({} instructions, {} constants)",
            code.name,
            code.code.len(),
            code.constants.len()
        );
    }
    Ok(id)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn read_byte(&mut self) -> Result<u8, LoadError> {
        let byte = *self.bytes.get(self.pos).ok_or(LoadError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_word(&mut self) -> Result<u32, LoadError> {
        let end = self.pos + 4;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(LoadError::UnexpectedEof)?;
        self.pos = end;
        Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    fn expect_tag(&mut self, tag: u8, expected: &'static str) -> Result<(), LoadError> {
        let found = self.read_byte()?;
        if found != tag {
            return Err(LoadError::UnexpectedTag {
                expected,
                found: found as char,
            });
        }
        Ok(())
    }

    /// A string body: word length followed by the bytes (not
    /// NUL-terminated). Called after the tag has been consumed.
    fn read_string_body(&mut self) -> Result<String, LoadError> {
        let len = self.read_word()? as usize;
        let end = self.pos + len;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(LoadError::UnexpectedEof)?;
        self.pos = end;
        String::from_utf8(slice.to_vec()).map_err(LoadError::InvalidString)
    }

    fn read_tagged_string(&mut self) -> Result<String, LoadError> {
        self.expect_tag(TYPE_STRING, "'s'")?;
        self.read_string_body()
    }

    /// Any tagged object legal in a constant pool or inside a pair. A bare
    /// string is not one of them: the compiler only emits strings as names
    /// inside code objects.
    fn read_object(&mut self, heap: &mut Heap) -> Result<ObjId, LoadError> {
        let tag = self.read_byte()?;
        match tag {
            TYPE_NULL => Ok(NULL_ID),
            TYPE_BOOLEAN => {
                let byte = self.read_byte()?;
                Ok(if byte == 1 { TRUE_ID } else { FALSE_ID })
            }
            TYPE_NUMBER => {
                // Two's-complement reinterpretation of the unsigned word.
                let word = self.read_word()?;
                Ok(heap.number(word as i32))
            }
            TYPE_SYMBOL => {
                let name = self.read_string_body()?;
                Ok(heap.symbol(name))
            }
            TYPE_PAIR => {
                let first = self.read_object(heap)?;
                let second = self.read_object(heap)?;
                Ok(heap.cons(first, second))
            }
            TYPE_CODEOBJECT => self.read_code_object(heap),
            TYPE_STRING => Err(LoadError::UnexpectedTag {
                expected: "an object tag",
                found: 's',
            }),
            _ => Err(LoadError::UnknownTag(tag)),
        }
    }

    fn read_instruction(&mut self) -> Result<Instruction, LoadError> {
        self.expect_tag(TYPE_INSTR, "'i'")?;
        let word = self.read_word()?;
        Ok(Instruction::unpack(word))
    }

    fn read_sequence_len(&mut self) -> Result<usize, LoadError> {
        self.expect_tag(TYPE_SEQUENCE, "'['")?;
        Ok(self.read_word()? as usize)
    }

    fn read_string_sequence(&mut self) -> Result<Vec<String>, LoadError> {
        let len = self.read_sequence_len()?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(self.read_tagged_string()?);
        }
        Ok(items)
    }

    fn read_object_sequence(&mut self, heap: &mut Heap) -> Result<Vec<ObjId>, LoadError> {
        let len = self.read_sequence_len()?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(self.read_object(heap)?);
        }
        Ok(items)
    }

    fn read_instruction_sequence(&mut self) -> Result<Vec<Instruction>, LoadError> {
        let len = self.read_sequence_len()?;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(self.read_instruction()?);
        }
        Ok(items)
    }

    /// A code object body, called after the `c` tag has been consumed.
    fn read_code_object(&mut self, heap: &mut Heap) -> Result<ObjId, LoadError> {
        let name = self.read_tagged_string()?;
        let args = self.read_string_sequence()?;
        let constants = self.read_object_sequence(heap)?;
        let varnames = self.read_string_sequence()?;
        let code = self.read_instruction_sequence()?;
        Ok(heap.alloc(Object::Code(CodeObject {
            name,
            args,
            varnames,
            constants,
            code,
        })))
    }
}

/// Serialize a code object tree back into the wire format, magic constant
/// included. The inverse of [`load_bytes`]; used as the round-trip oracle
/// in tests and to produce fixtures.
///
/// Panics if the tree contains a value with no wire representation
/// (closures, builtins, environments); the compiler never emits such
/// constants.
pub fn serialize(heap: &Heap, code_id: ObjId) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC.to_le_bytes());
    write_object(heap, code_id, &mut out);
    out
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    out.push(TYPE_STRING);
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn write_object(heap: &Heap, id: ObjId, out: &mut Vec<u8>) {
    match heap.get(id) {
        Object::Null => out.push(TYPE_NULL),
        Object::Boolean(value) => {
            out.push(TYPE_BOOLEAN);
            out.push(*value as u8);
        }
        Object::Number(n) => {
            out.push(TYPE_NUMBER);
            out.extend_from_slice(&(*n as u32).to_le_bytes());
        }
        Object::Symbol(s) => {
            out.push(TYPE_SYMBOL);
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Object::Pair { first, second } => {
            out.push(TYPE_PAIR);
            write_object(heap, *first, out);
            write_object(heap, *second, out);
        }
        Object::Code(code) => {
            out.push(TYPE_CODEOBJECT);
            write_string(&code.name, out);

            out.push(TYPE_SEQUENCE);
            out.extend_from_slice(&(code.args.len() as u32).to_le_bytes());
            for arg in &code.args {
                write_string(arg, out);
            }

            out.push(TYPE_SEQUENCE);
            out.extend_from_slice(&(code.constants.len() as u32).to_le_bytes());
            for constant in &code.constants {
                write_object(heap, *constant, out);
            }

            out.push(TYPE_SEQUENCE);
            out.extend_from_slice(&(code.varnames.len() as u32).to_le_bytes());
            for varname in &code.varnames {
                write_string(varname, out);
            }

            out.push(TYPE_SEQUENCE);
            out.extend_from_slice(&(code.code.len() as u32).to_le_bytes());
            for instr in &code.code {
                out.push(TYPE_INSTR);
                out.extend_from_slice(&instr.pack().to_le_bytes());
            }
        }
        Object::Closure { .. } | Object::Builtin(_) | Object::Environment(_) => {
            panic!("runtime-only object has no wire representation")
        }
    }
}
