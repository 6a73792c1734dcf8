//! End-to-end tests for the full pipeline:
//! program tree → serialize → .bobc file → load → execute → output

use bob_core::bytecode::{CodeObject, Instruction, Opcode};
use bob_core::heap::Heap;
use bob_core::value::{ObjId, Object};
use bob_core::{loader, LoadError, Vm};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

struct SharedSink(Rc<RefCell<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn code(
    heap: &mut Heap,
    name: &str,
    args: &[&str],
    varnames: &[&str],
    constants: Vec<ObjId>,
    instructions: &[(Opcode, u32)],
) -> ObjId {
    heap.alloc(Object::Code(CodeObject {
        name: name.to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
        varnames: varnames.iter().map(|s| s.to_string()).collect(),
        constants,
        code: instructions
            .iter()
            .map(|&(op, arg)| Instruction::new(op, arg))
            .collect(),
    }))
}

/// (define (make-adder x) (lambda (y) (+ x y)))
/// (define a5 (make-adder 5))
/// (write (a5 10))
fn adder_program(heap: &mut Heap) -> ObjId {
    let inner = code(
        heap,
        "",
        &["y"],
        &["+", "x", "y"],
        vec![],
        &[
            (Opcode::LoadVar, 1),
            (Opcode::LoadVar, 2),
            (Opcode::LoadVar, 0),
            (Opcode::Call, 2),
            (Opcode::Return, 0),
        ],
    );
    let make_adder = code(
        heap,
        "make-adder",
        &["x"],
        &[],
        vec![inner],
        &[(Opcode::Function, 0), (Opcode::Return, 0)],
    );
    let five = heap.number(5);
    let ten = heap.number(10);
    code(
        heap,
        "",
        &[],
        &["make-adder", "a5", "write"],
        vec![make_adder, five, ten],
        &[
            (Opcode::Function, 0),
            (Opcode::DefVar, 0),
            (Opcode::Const, 1),
            (Opcode::LoadVar, 0),
            (Opcode::Call, 1),
            (Opcode::DefVar, 1),
            (Opcode::Const, 2),
            (Opcode::LoadVar, 1),
            (Opcode::Call, 1),
            (Opcode::LoadVar, 2),
            (Opcode::Call, 1),
            (Opcode::Pop, 0),
        ],
    )
}

/// Serialize a program to a temp file, load it back, and run it with the
/// given GC threshold, returning the captured output.
fn run_from_file(program_bytes: &[u8], gc_threshold: usize) -> String {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("program.bobc");
    std::fs::write(&path, program_bytes).unwrap();

    let mut heap = Heap::new();
    let loaded = loader::load_file(&mut heap, &path).unwrap();

    let buf = Rc::new(RefCell::new(Vec::new()));
    let mut vm = Vm::new(heap, Box::new(SharedSink(buf.clone())));
    vm.set_gc_threshold(gc_threshold);
    vm.run(loaded).unwrap();

    let out = buf.borrow().clone();
    String::from_utf8(out).unwrap()
}

#[test]
fn test_closure_program_through_file() {
    let mut heap = Heap::new();
    let program = adder_program(&mut heap);
    let bytes = loader::serialize(&heap, program);

    assert_eq!(run_from_file(&bytes, usize::MAX), "15\n");
}

#[test]
fn test_closure_program_under_gc_pressure() {
    let mut heap = Heap::new();
    let program = adder_program(&mut heap);
    let bytes = loader::serialize(&heap, program);

    // A zero threshold forces a collection between every two instructions.
    assert_eq!(run_from_file(&bytes, 0), "15\n");
}

#[test]
fn test_corrupt_file_is_a_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.bobc");
    std::fs::write(&path, b"not bytecode at all").unwrap();

    let mut heap = Heap::new();
    let err = loader::load_file(&mut heap, &path).unwrap_err();
    assert!(matches!(err, LoadError::BadMagic(_)));
}

#[test]
fn test_missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.bobc");

    let mut heap = Heap::new();
    let err = loader::load_file(&mut heap, &path).unwrap_err();
    assert!(matches!(err, LoadError::Io(_)));
}
