//! Runtime value model
//!
//! Every runtime value lives on the managed heap and is referred to by an
//! [`ObjId`] handle. Values form a closed sum: dispatch is a match on the
//! discriminant, not virtual calls. Environments are ordinary heap objects
//! because they participate in reference cycles with the closures that
//! capture them and must be traced by the collector like everything else.

use crate::builtins::Builtin;
use crate::bytecode::CodeObject;
use crate::env::EnvFrame;
use crate::heap::Heap;

/// Value identifier - lightweight copyable index into the heap
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjId(pub u32);

/// Heap object data (no GC fields; the mark bitmap lives in the heap)
pub enum Object {
    Null,
    Boolean(bool),
    Number(i32),
    Symbol(String),
    Pair { first: ObjId, second: ObjId },
    Code(CodeObject),
    Closure { code: ObjId, env: ObjId },
    Builtin(Builtin),
    Environment(EnvFrame),
}

impl Object {
    /// Only `#f` is false; every other value (including `()`) is truthy.
    pub fn is_false(&self) -> bool {
        matches!(self, Object::Boolean(false))
    }

    pub fn as_code(&self) -> Option<&CodeObject> {
        match self {
            Object::Code(code) => Some(code),
            _ => None,
        }
    }
}

/// Textual representation of a value, as produced by `(write ...)`.
pub fn repr(heap: &Heap, id: ObjId) -> String {
    match heap.get(id) {
        Object::Null => "()".to_string(),
        Object::Boolean(true) => "#t".to_string(),
        Object::Boolean(false) => "#f".to_string(),
        Object::Number(n) => n.to_string(),
        Object::Symbol(s) => s.clone(),
        Object::Pair { .. } => format!("({})", repr_pair_chain(heap, id)),
        Object::Code(code) => code.disassemble(heap),
        Object::Closure { code, .. } => format!("<closure '{}'>", code_name(heap, *code)),
        Object::Builtin(builtin) => format!("<builtin '{}'>", builtin.name),
        Object::Environment(_) => "<environment>".to_string(),
    }
}

/// Linearizes a nested pair structure: `Pair(1, Pair(2, Null))` prints as
/// `1 2`. The loop follows the `second` chain until it is no longer a pair;
/// a trailing `Null` is dropped, anything else prints as ` . tail`.
fn repr_pair_chain(heap: &Heap, id: ObjId) -> String {
    let (first, mut second) = match heap.get(id) {
        Object::Pair { first, second } => (*first, *second),
        _ => unreachable!("repr_pair_chain called on a non-pair"),
    };
    let mut rep = repr(heap, first);
    loop {
        match heap.get(second) {
            Object::Pair { first, second: next } => {
                rep.push(' ');
                rep.push_str(&repr(heap, *first));
                second = *next;
            }
            Object::Null => return rep,
            _ => return format!("{} . {}", rep, repr(heap, second)),
        }
    }
}

fn code_name(heap: &Heap, code: ObjId) -> String {
    match heap.get(code) {
        Object::Code(co) => co.name.clone(),
        _ => String::new(),
    }
}

/// Structural equality. Identity implies equality; otherwise two values are
/// equal when they have the same variant and equal contents, with pairs
/// compared recursively. Code objects, closures, builtins and environments
/// are only equal to themselves.
pub fn objects_equal(heap: &Heap, a: ObjId, b: ObjId) -> bool {
    if a == b {
        return true;
    }
    match (heap.get(a), heap.get(b)) {
        (Object::Null, Object::Null) => true,
        (Object::Boolean(x), Object::Boolean(y)) => x == y,
        (Object::Number(x), Object::Number(y)) => x == y,
        (Object::Symbol(x), Object::Symbol(y)) => x == y,
        (
            Object::Pair {
                first: f1,
                second: s1,
            },
            Object::Pair {
                first: f2,
                second: s2,
            },
        ) => objects_equal(heap, *f1, *f2) && objects_equal(heap, *s1, *s2),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::{FALSE_ID, NULL_ID, TRUE_ID};

    #[test]
    fn test_repr_leaves() {
        let mut heap = Heap::new();
        assert_eq!(repr(&heap, NULL_ID), "()");
        assert_eq!(repr(&heap, TRUE_ID), "#t");
        assert_eq!(repr(&heap, FALSE_ID), "#f");

        let n = heap.number(-42);
        assert_eq!(repr(&heap, n), "-42");

        let sym = heap.symbol("lambda");
        assert_eq!(repr(&heap, sym), "lambda");
    }

    #[test]
    fn test_repr_proper_list() {
        let mut heap = Heap::new();
        let one = heap.number(1);
        let two = heap.number(2);
        let three = heap.number(3);
        let tail = heap.cons(three, NULL_ID);
        let mid = heap.cons(two, tail);
        let list = heap.cons(one, mid);
        assert_eq!(repr(&heap, list), "(1 2 3)");
    }

    #[test]
    fn test_repr_improper_list() {
        let mut heap = Heap::new();
        let one = heap.number(1);
        let two = heap.number(2);
        let three = heap.number(3);
        let inner = heap.cons(two, three);
        let pair = heap.cons(one, inner);
        assert_eq!(repr(&heap, pair), "(1 2 . 3)");
    }

    #[test]
    fn test_repr_single_pair() {
        let mut heap = Heap::new();
        let one = heap.number(1);
        let two = heap.number(2);
        let pair = heap.cons(one, two);
        assert_eq!(repr(&heap, pair), "(1 . 2)");
    }

    #[test]
    fn test_equality_leaves() {
        let mut heap = Heap::new();
        let a = heap.number(7);
        let b = heap.number(7);
        let c = heap.number(8);
        assert!(objects_equal(&heap, a, b));
        assert!(!objects_equal(&heap, a, c));

        let s1 = heap.symbol("x");
        let s2 = heap.symbol("x");
        let s3 = heap.symbol("y");
        assert!(objects_equal(&heap, s1, s2));
        assert!(!objects_equal(&heap, s1, s3));

        assert!(objects_equal(&heap, NULL_ID, NULL_ID));
        assert!(!objects_equal(&heap, TRUE_ID, FALSE_ID));
        assert!(!objects_equal(&heap, a, s1));
    }

    #[test]
    fn test_equality_pairs_structural() {
        let mut heap = Heap::new();
        let one_a = heap.number(1);
        let two_a = heap.number(2);
        let one_b = heap.number(1);
        let two_b = heap.number(2);
        let p1 = heap.cons(one_a, two_a);
        let p2 = heap.cons(one_b, two_b);
        assert!(objects_equal(&heap, p1, p2));

        let three = heap.number(3);
        let p3 = heap.cons(one_a, three);
        assert!(!objects_equal(&heap, p1, p3));
    }

    #[test]
    fn test_truthiness() {
        let mut heap = Heap::new();
        assert!(heap.get(FALSE_ID).is_false());
        assert!(!heap.get(TRUE_ID).is_false());
        // The empty list is truthy.
        assert!(!heap.get(NULL_ID).is_false());
        let n = heap.number(0);
        assert!(!heap.get(n).is_false());
    }
}
