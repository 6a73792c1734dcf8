//! The bytecode interpreter
//!
//! A fetch/decode/dispatch loop over two explicit stacks: the value stack
//! and the stack of execution frames. An execution frame is the triple
//! `(code object, pc, environment)`; `CALL` suspends the current frame onto
//! the frame stack and `RETURN` resumes it with the pc already past the
//! call.
//!
//! The collector is polled in exactly one place, between instruction
//! fetches. This is a hard rule: during an instruction's execution some
//! objects may not be reachable from the roots (for example the argument
//! vector popped off the stack before a builtin call), and collecting them
//! there would corrupt execution.

use std::io::Write;
use std::mem;

use tracing::debug;

use crate::builtins::{self, Builtin, BuiltinKind, BuiltinResult, VmBuiltinFn};
use crate::bytecode::Opcode;
use crate::env;
use crate::error::{BuiltinError, VmError};
use crate::heap::{Heap, NULL_ID};
use crate::value::{repr, ObjId, Object};

/// Default GC size threshold: the collector stays quiet until this many
/// bytes of allocations are outstanding.
pub const DEFAULT_GC_THRESHOLD: usize = 10 * 1024 * 1024;

/// Encapsulates where the interpreter is executing: the current code
/// object, the pc offset of the next instruction, and the environment the
/// code runs in.
struct ExecutionFrame {
    code: Option<ObjId>,
    pc: usize,
    env: ObjId,
}

/// The virtual machine. Owns the heap, the output sink and both run-time
/// stacks; `run` drives the dispatch loop.
pub struct Vm {
    heap: Heap,
    output: Box<dyn Write>,
    value_stack: Vec<ObjId>,
    frame_stack: Vec<ExecutionFrame>,
    frame: ExecutionFrame,
    gc_threshold: usize,
}

impl Vm {
    /// Create a VM around a heap (usually one already populated by the
    /// loader) and an output sink for `(write ...)`.
    pub fn new(mut heap: Heap, output: Box<dyn Write>) -> Vm {
        let global_env = create_global_env(&mut heap);
        Vm {
            heap,
            output,
            value_stack: Vec::with_capacity(256),
            frame_stack: Vec::with_capacity(64),
            frame: ExecutionFrame {
                code: None,
                pc: 0,
                env: global_env,
            },
            gc_threshold: DEFAULT_GC_THRESHOLD,
        }
    }

    pub fn set_gc_threshold(&mut self, bytes: usize) {
        self.gc_threshold = bytes;
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Execute a code object to completion.
    pub fn run(&mut self, code_id: ObjId) -> Result<(), VmError> {
        let name = match self.heap.get(code_id).as_code() {
            Some(code) => code.name.clone(),
            None => return Err(VmError::new("run expects a code object")),
        };
        debug!("running code object '{}'", name);

        self.frame.code = Some(code_id);
        self.frame.pc = 0;

        loop {
            let cur_code = match self.frame.code {
                Some(id) => id,
                None => return Err(VmError::new("no code object to execute")),
            };

            // Fetch the next instruction. Running off the end of a code
            // object is normal termination only at top level.
            let instr = {
                let code = match self.heap.get(cur_code).as_code() {
                    Some(code) => code,
                    None => {
                        return Err(VmError::new("current frame does not hold a code object"))
                    }
                };
                if self.frame.pc >= code.code.len() {
                    if self.frame_stack.is_empty() {
                        return Ok(());
                    }
                    return Err(VmError::new("Code object ended prematurely"));
                }
                code.code[self.frame.pc]
            };
            self.frame.pc += 1;

            // The one and only GC safe point.
            let roots = self.gc_roots();
            self.heap.maybe_collect(self.gc_threshold, &roots);

            let opcode = Opcode::from_u8(instr.opcode).ok_or_else(|| {
                VmError::new(format!("Invalid instruction opcode 0x{:02X}", instr.opcode))
            })?;

            match opcode {
                Opcode::Const => {
                    let value = self.constant(cur_code, instr.arg)?;
                    self.value_stack.push(value);
                }
                Opcode::LoadVar => {
                    let varname = self.varname(cur_code, instr.arg)?;
                    match env::lookup(&self.heap, self.frame.env, &varname) {
                        Some(value) => self.value_stack.push(value),
                        None => {
                            return Err(VmError::new(format!(
                                "Unknown variable '{}' referenced",
                                varname
                            )))
                        }
                    }
                }
                Opcode::StoreVar => {
                    let value = self.pop()?;
                    let varname = self.varname(cur_code, instr.arg)?;
                    if !env::assign(&mut self.heap, self.frame.env, &varname, value) {
                        return Err(VmError::new(format!(
                            "Unknown variable '{}' referenced",
                            varname
                        )));
                    }
                }
                Opcode::DefVar => {
                    let value = self.pop()?;
                    let varname = self.varname(cur_code, instr.arg)?;
                    env::define(&mut self.heap, self.frame.env, &varname, value);
                }
                Opcode::Function => {
                    let target = self.constant(cur_code, instr.arg)?;
                    if self.heap.get(target).as_code().is_none() {
                        return Err(VmError::new(
                            "Expected a code object as the argument of FUNCTION",
                        ));
                    }
                    let closure = self.heap.alloc(Object::Closure {
                        code: target,
                        env: self.frame.env,
                    });
                    self.value_stack.push(closure);
                }
                Opcode::Pop => {
                    // It's not a bug to generate instructions to pop the
                    // stack when there's nothing to pop.
                    let _ = self.value_stack.pop();
                }
                Opcode::Jump => {
                    self.frame.pc = instr.arg as usize;
                }
                Opcode::FJump => {
                    let value = self.pop()?;
                    if self.heap.get(value).is_false() {
                        self.frame.pc = instr.arg as usize;
                    }
                }
                Opcode::Return => {
                    self.frame = self
                        .frame_stack
                        .pop()
                        .ok_or_else(|| VmError::new("RETURN with an empty frame stack"))?;
                }
                Opcode::Call => {
                    self.exec_call(instr.arg as usize)?;
                }
            }
        }
    }

    /// The callee is on top of the value stack, above its arguments
    /// (right-most argument on top). The callee is either a builtin
    /// procedure or a closure.
    fn exec_call(&mut self, num_args: usize) -> Result<(), VmError> {
        let callee = self.pop()?;
        let mut args = Vec::with_capacity(num_args);
        for _ in 0..num_args {
            args.push(self.pop()?);
        }
        args.reverse();

        enum Callee {
            Builtin(BuiltinKind),
            Closure { code: ObjId, env: ObjId },
            Other,
        }
        let kind = match self.heap.get(callee) {
            Object::Builtin(builtin) => Callee::Builtin(builtin.kind),
            Object::Closure { code, env } => Callee::Closure {
                code: *code,
                env: *env,
            },
            _ => Callee::Other,
        };

        match kind {
            Callee::Builtin(kind) => {
                let result = match kind {
                    BuiltinKind::Heap(func) => func(&mut self.heap, &args),
                    BuiltinKind::Vm(func) => func(self, &args),
                }
                .map_err(VmError::from)?;
                self.value_stack.push(result);
            }
            Callee::Closure { code, env } => {
                let param_names = {
                    let co = match self.heap.get(code).as_code() {
                        Some(co) => co,
                        None => {
                            return Err(VmError::new("closure does not reference a code object"))
                        }
                    };
                    if args.len() != co.args.len() {
                        return Err(VmError::new(format!(
                            "Calling procedure {} with {} args, expected {}",
                            co.name,
                            args.len(),
                            co.args.len()
                        )));
                    }
                    co.args.clone()
                };

                // Extend the closure's environment with a frame binding the
                // parameter names to the call arguments, then make the
                // closure's code the current frame with pc 0.
                let call_env = self.heap.environment(Some(env));
                for (param, value) in param_names.iter().zip(&args) {
                    env::define(&mut self.heap, call_env, param, *value);
                }
                let new_frame = ExecutionFrame {
                    code: Some(code),
                    pc: 0,
                    env: call_env,
                };
                self.frame_stack.push(mem::replace(&mut self.frame, new_frame));
            }
            Callee::Other => {
                return Err(VmError::new(
                    "Expected a callable object on top of the stack for CALL",
                ));
            }
        }
        Ok(())
    }

    fn pop(&mut self) -> Result<ObjId, VmError> {
        self.value_stack
            .pop()
            .ok_or_else(|| VmError::new("value stack underflow"))
    }

    fn constant(&self, code_id: ObjId, arg: u32) -> Result<ObjId, VmError> {
        let code = match self.heap.get(code_id).as_code() {
            Some(code) => code,
            None => return Err(VmError::new("current frame does not hold a code object")),
        };
        code.constants
            .get(arg as usize)
            .copied()
            .ok_or_else(|| VmError::new(format!("Constants offset {} out of bounds", arg)))
    }

    fn varname(&self, code_id: ObjId, arg: u32) -> Result<String, VmError> {
        let code = match self.heap.get(code_id).as_code() {
            Some(code) => code,
            None => return Err(VmError::new("current frame does not hold a code object")),
        };
        code.varnames
            .get(arg as usize)
            .cloned()
            .ok_or_else(|| VmError::new(format!("Varnames offset {} out of bounds", arg)))
    }

    /// The complete root set: the current frame, every value on the value
    /// stack, and every suspended frame. This is the single narrow
    /// interface between the interpreter and the collector.
    fn gc_roots(&self) -> Vec<ObjId> {
        let mut roots = Vec::with_capacity(self.value_stack.len() + 2 * self.frame_stack.len() + 2);
        if let Some(code) = self.frame.code {
            roots.push(code);
        }
        roots.push(self.frame.env);
        roots.extend(&self.value_stack);
        for frame in &self.frame_stack {
            if let Some(code) = frame.code {
                roots.push(code);
            }
            roots.push(frame.env);
        }
        roots
    }

    fn write_output(&mut self, text: &str) -> Result<(), BuiltinError> {
        self.output
            .write_all(text.as_bytes())
            .and_then(|_| self.output.flush())
            .map_err(|err| BuiltinError::new(format!("write: {}", err)))
    }
}

/// Builtins that need access to the interpreter state. They are registered
/// alongside the plain builtins but carry a `&mut Vm` instead of a heap.
const VM_BUILTINS: [(&str, VmBuiltinFn); 4] = [
    ("write", builtin_write),
    ("__debug-vm", builtin_debug_vm),
    ("__run-gc", builtin_run_gc),
    ("__debug-gc", builtin_debug_gc),
];

/// Create the global environment: every standard builtin plus the
/// interpreter-state builtins, each defined under its name.
fn create_global_env(heap: &mut Heap) -> ObjId {
    let env = heap.environment(None);

    for (name, func) in builtins::table() {
        let proc = heap.alloc(Object::Builtin(Builtin {
            name: name.to_string(),
            kind: BuiltinKind::Heap(func),
        }));
        env::define(heap, env, name, proc);
    }

    for (name, func) in VM_BUILTINS {
        let proc = heap.alloc(Object::Builtin(Builtin {
            name: name.to_string(),
            kind: BuiltinKind::Vm(func),
        }));
        env::define(heap, env, name, proc);
    }

    env
}

/// `(write a b c)`: the representations of the arguments separated by
/// single spaces, followed by a newline.
fn builtin_write(vm: &mut Vm, args: &[ObjId]) -> BuiltinResult {
    let mut out = String::new();
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&repr(&vm.heap, *arg));
    }
    out.push('\n');
    vm.write_output(&out)?;
    Ok(NULL_ID)
}

/// Render both run-time stacks to the output sink.
fn builtin_debug_vm(vm: &mut Vm, _args: &[ObjId]) -> BuiltinResult {
    let mut out = String::from("Value stack:\n");
    for (i, value) in vm.value_stack.iter().rev().enumerate() {
        let marker = if i == 0 { "TOS: " } else { "     " };
        out.push_str(&format!("{}| {}\n", marker, repr(&vm.heap, *value)));
    }
    out.push_str("Frame stack:\n");
    for (i, frame) in vm.frame_stack.iter().rev().enumerate() {
        let marker = if i == 0 { "TOS: " } else { "     " };
        let name = frame
            .code
            .and_then(|code| vm.heap.get(code).as_code())
            .map(|code| code.name.clone())
            .unwrap_or_default();
        out.push_str(&format!("{}| Code: <{}> [PC={}]\n", marker, name, frame.pc));
    }
    vm.write_output(&out)?;
    Ok(NULL_ID)
}

/// Force a collection by polling with a zero threshold.
fn builtin_run_gc(vm: &mut Vm, _args: &[ObjId]) -> BuiltinResult {
    let roots = vm.gc_roots();
    vm.heap.maybe_collect(0, &roots);
    Ok(NULL_ID)
}

/// Print allocator statistics. With a single `#t` argument, also list all
/// live objects (builtins excluded).
fn builtin_debug_gc(vm: &mut Vm, args: &[ObjId]) -> BuiltinResult {
    let mut out = format!(
        "========================================\n\
         Number of live objects: {}\n\
         Total allocation size: {}\n",
        vm.heap.live_count(),
        vm.heap.total_alloc_size()
    );
    if let Some(&first) = args.first() {
        if matches!(vm.heap.get(first), Object::Boolean(true)) {
            out.push_str("==== Live objects ====\n");
            for (id, object) in vm.heap.live_objects() {
                if !matches!(object, Object::Builtin(_)) {
                    out.push_str(&repr(&vm.heap, id));
                    out.push('\n');
                }
            }
        }
    }
    vm.write_output(&out)?;
    Ok(NULL_ID)
}
