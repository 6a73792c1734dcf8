//! Scheme builtin procedures
//!
//! Every builtin shares the uniform signature
//! `fn(&mut Heap, &[ObjId]) -> Result<ObjId, BuiltinError>`. The handful of
//! builtins that need access to interpreter state (`write` and the
//! diagnostics) live in the `vm` module instead and receive `&mut Vm`; the
//! [`BuiltinKind`] enum distinguishes the two at the call site.
//!
//! `and` and `or` conform to the definitions in R5RS, section 4.2.

use crate::error::BuiltinError;
use crate::heap::{Heap, FALSE_ID, NULL_ID, TRUE_ID};
use crate::value::{objects_equal, ObjId, Object};
use crate::vm::Vm;

pub type BuiltinResult = Result<ObjId, BuiltinError>;

/// A builtin operating on the heap alone.
pub type BuiltinFn = fn(&mut Heap, &[ObjId]) -> BuiltinResult;

/// A builtin with access to the interpreter state.
pub type VmBuiltinFn = fn(&mut Vm, &[ObjId]) -> BuiltinResult;

#[derive(Copy, Clone)]
pub enum BuiltinKind {
    Heap(BuiltinFn),
    Vm(VmBuiltinFn),
}

/// A named native procedure, stored on the heap as `Object::Builtin`.
pub struct Builtin {
    pub name: String,
    pub kind: BuiltinKind,
}

/// The standard builtin table. The VM seeds the global environment from
/// this, then adds the interpreter-state builtins on top.
pub fn table() -> Vec<(&'static str, BuiltinFn)> {
    vec![
        ("eq?", eqv_p as BuiltinFn),
        ("eqv?", eqv_p),
        ("car", car),
        ("cdr", cdr),
        ("cadr", cadr),
        ("caddr", caddr),
        ("set-car!", set_car),
        ("set-cdr!", set_cdr),
        ("cons", cons),
        ("pair?", pair_p),
        ("number?", number_p),
        ("null?", null_p),
        ("boolean?", boolean_p),
        ("symbol?", symbol_p),
        ("zero?", zero_p),
        ("list", list),
        ("+", add),
        ("-", sub),
        ("*", mul),
        ("quotient", quotient),
        ("modulo", modulo),
        ("not", logical_not),
        ("or", logical_or),
        ("and", logical_and),
        ("=", num_eq),
        (">=", num_ge),
        ("<=", num_le),
        (">", num_gt),
        ("<", num_lt),
    ]
}

fn verify_numargs(args: &[ObjId], num: usize, name: &str) -> Result<(), BuiltinError> {
    if args.len() != num {
        return Err(BuiltinError::new(format!(
            "{} expects {} arguments",
            name, num
        )));
    }
    Ok(())
}

fn pair_parts(heap: &Heap, id: ObjId, message: &str) -> Result<(ObjId, ObjId), BuiltinError> {
    match heap.get(id) {
        Object::Pair { first, second } => Ok((*first, *second)),
        _ => Err(BuiltinError::new(message)),
    }
}

fn number_arg(heap: &Heap, id: ObjId, message: &str) -> Result<i32, BuiltinError> {
    match heap.get(id) {
        Object::Number(n) => Ok(*n),
        _ => Err(BuiltinError::new(message)),
    }
}

fn car(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    verify_numargs(args, 1, "car")?;
    let (first, _) = pair_parts(heap, args[0], "car expects a pair")?;
    Ok(first)
}

fn cdr(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    verify_numargs(args, 1, "cdr")?;
    let (_, second) = pair_parts(heap, args[0], "cdr expects a pair")?;
    Ok(second)
}

fn cadr(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    verify_numargs(args, 1, "cadr")?;
    let (_, second) = pair_parts(heap, args[0], "cadr expects a pair")?;
    let (first, _) = pair_parts(heap, second, "cadr expects arg's cdr to be a pair")?;
    Ok(first)
}

fn caddr(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    verify_numargs(args, 1, "caddr")?;
    let (_, second) = pair_parts(heap, args[0], "caddr expects a pair")?;
    let (_, third) = pair_parts(heap, second, "caddr expects arg's cdr to be a pair")?;
    let (first, _) = pair_parts(heap, third, "caddr expects arg's cddr to be a pair")?;
    Ok(first)
}

fn set_car(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    verify_numargs(args, 2, "set-car!")?;
    match heap.get_mut(args[0]) {
        Object::Pair { first, .. } => {
            *first = args[1];
            Ok(NULL_ID)
        }
        _ => Err(BuiltinError::new("set-car! expects a pair")),
    }
}

fn set_cdr(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    verify_numargs(args, 2, "set-cdr!")?;
    match heap.get_mut(args[0]) {
        Object::Pair { second, .. } => {
            *second = args[1];
            Ok(NULL_ID)
        }
        _ => Err(BuiltinError::new("set-cdr! expects a pair")),
    }
}

fn cons(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    verify_numargs(args, 2, "cons")?;
    Ok(heap.cons(args[0], args[1]))
}

fn list(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    let mut lst = NULL_ID;
    for &arg in args.iter().rev() {
        lst = heap.cons(arg, lst);
    }
    Ok(lst)
}

fn pair_p(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    verify_numargs(args, 1, "pair?")?;
    Ok(heap.boolean(matches!(heap.get(args[0]), Object::Pair { .. })))
}

fn boolean_p(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    verify_numargs(args, 1, "boolean?")?;
    Ok(heap.boolean(matches!(heap.get(args[0]), Object::Boolean(_))))
}

fn symbol_p(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    verify_numargs(args, 1, "symbol?")?;
    Ok(heap.boolean(matches!(heap.get(args[0]), Object::Symbol(_))))
}

fn number_p(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    verify_numargs(args, 1, "number?")?;
    Ok(heap.boolean(matches!(heap.get(args[0]), Object::Number(_))))
}

fn null_p(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    verify_numargs(args, 1, "null?")?;
    Ok(heap.boolean(matches!(heap.get(args[0]), Object::Null)))
}

fn zero_p(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    verify_numargs(args, 1, "zero?")?;
    Ok(heap.boolean(matches!(heap.get(args[0]), Object::Number(0))))
}

fn logical_not(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    verify_numargs(args, 1, "not")?;
    match heap.get(args[0]) {
        Object::Boolean(value) => Ok(heap.boolean(!value)),
        _ => Err(BuiltinError::new("not expects a boolean")),
    }
}

/// Return the first truthy argument, or the last argument, or `#f` when
/// called with no arguments.
fn logical_or(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    for &arg in args {
        if !heap.get(arg).is_false() {
            return Ok(arg);
        }
    }
    Ok(args.last().copied().unwrap_or(FALSE_ID))
}

/// Return the first falsy argument, or the last argument, or `#t` when
/// called with no arguments.
fn logical_and(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    for &arg in args {
        if heap.get(arg).is_false() {
            return Ok(arg);
        }
    }
    Ok(args.last().copied().unwrap_or(TRUE_ID))
}

/// A rough approximation of Scheme's `eqv?` that's good enough for most
/// purposes: identity for pairs, structural equality for everything else.
/// Serves as both `eq?` and `eqv?`.
fn eqv_p(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    verify_numargs(args, 2, "eqv?")?;
    let equal = match (heap.get(args[0]), heap.get(args[1])) {
        (Object::Pair { .. }, Object::Pair { .. }) => args[0] == args[1],
        _ => objects_equal(heap, args[0], args[1]),
    };
    Ok(heap.boolean(equal))
}

/// Left-fold of a binary integer operation over at least one argument.
fn arithmetic<F>(heap: &mut Heap, name: &str, args: &[ObjId], op: F) -> BuiltinResult
where
    F: Fn(i32, i32) -> Result<i32, BuiltinError>,
{
    if args.is_empty() {
        return Err(BuiltinError::new(format!("{} expects arguments", name)));
    }
    let typeerr = format!("{} expects a numeric argument", name);
    let mut result = number_arg(heap, args[0], &typeerr)?;
    for &arg in &args[1..] {
        let n = number_arg(heap, arg, &typeerr)?;
        result = op(result, n)?;
    }
    Ok(heap.number(result))
}

fn add(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    arithmetic(heap, "+", args, |a, b| Ok(a.wrapping_add(b)))
}

fn sub(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    arithmetic(heap, "-", args, |a, b| Ok(a.wrapping_sub(b)))
}

fn mul(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    arithmetic(heap, "*", args, |a, b| Ok(a.wrapping_mul(b)))
}

fn quotient(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    arithmetic(heap, "quotient", args, |a, b| {
        if b == 0 {
            Err(BuiltinError::new("quotient: division by zero"))
        } else {
            Ok(a.wrapping_div(b))
        }
    })
}

fn modulo(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    arithmetic(heap, "modulo", args, |a, b| {
        if b == 0 {
            Err(BuiltinError::new("modulo: division by zero"))
        } else {
            Ok(a.wrapping_rem(b))
        }
    })
}

/// Pairwise chain comparison over at least one argument: `(< a b c)` holds
/// iff `a < b` and `b < c`.
fn comparison<F>(heap: &mut Heap, name: &str, args: &[ObjId], op: F) -> BuiltinResult
where
    F: Fn(i32, i32) -> bool,
{
    if args.is_empty() {
        return Err(BuiltinError::new(format!("{} expects arguments", name)));
    }
    let typeerr = format!("{} expects a numeric argument", name);
    let mut a = number_arg(heap, args[0], &typeerr)?;
    for &arg in &args[1..] {
        let b = number_arg(heap, arg, &typeerr)?;
        if !op(a, b) {
            return Ok(FALSE_ID);
        }
        a = b;
    }
    Ok(TRUE_ID)
}

fn num_eq(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    comparison(heap, "=", args, |a, b| a == b)
}

fn num_lt(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    comparison(heap, "<", args, |a, b| a < b)
}

fn num_le(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    comparison(heap, "<=", args, |a, b| a <= b)
}

fn num_gt(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    comparison(heap, ">", args, |a, b| a > b)
}

fn num_ge(heap: &mut Heap, args: &[ObjId]) -> BuiltinResult {
    comparison(heap, ">=", args, |a, b| a >= b)
}
