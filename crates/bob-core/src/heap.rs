//! Managed heap with a mark-and-sweep garbage collector
//!
//! All runtime values live in a single arena of slots addressed by
//! [`ObjId`] indices. A separate mark bitmap and a free list keep the
//! `Object` data itself free of GC fields. Each allocation records an
//! approximate byte size; the accumulated `total_alloc_size` drives the
//! collection trigger.
//!
//! The collector runs only when explicitly polled through
//! [`Heap::maybe_collect`], and the interpreter polls in exactly one place:
//! between instruction fetches. Mid-instruction, transient values (such as
//! the argument vector popped off the stack before a builtin call) are not
//! reachable from any root, and collecting them would corrupt execution.

use std::mem;

use tracing::debug;

use crate::env::EnvFrame;
use crate::value::{ObjId, Object};

/// Pre-allocated constants, always marked and never swept.
pub const NULL_ID: ObjId = ObjId(0);
pub const TRUE_ID: ObjId = ObjId(1);
pub const FALSE_ID: ObjId = ObjId(2);
pub const FIRST_USER_ID: u32 = 3;

struct Slot {
    object: Object,
    /// Approximate allocation size in bytes, recorded at allocation time.
    size: usize,
}

/// The object heap. Owns every runtime value.
pub struct Heap {
    slots: Vec<Option<Slot>>,
    marks: Vec<bool>,
    free_list: Vec<u32>,
    total_alloc_size: usize,
}

impl Heap {
    pub fn new() -> Self {
        let mut heap = Heap {
            slots: Vec::with_capacity(1024),
            marks: Vec::with_capacity(1024),
            free_list: Vec::new(),
            total_alloc_size: 0,
        };

        // Constants occupy the first slots and stay marked forever.
        for object in [Object::Null, Object::Boolean(true), Object::Boolean(false)] {
            heap.slots.push(Some(Slot { object, size: 0 }));
            heap.marks.push(true);
        }

        heap
    }

    /// Allocate a new object and return its handle.
    pub fn alloc(&mut self, object: Object) -> ObjId {
        let size = object_size(&object);
        self.total_alloc_size += size;

        let id = if let Some(id) = self.free_list.pop() {
            self.slots[id as usize] = Some(Slot { object, size });
            self.marks[id as usize] = false;
            id
        } else {
            let id = self.slots.len() as u32;
            self.slots.push(Some(Slot { object, size }));
            self.marks.push(false);
            id
        };
        ObjId(id)
    }

    #[inline]
    pub fn get(&self, id: ObjId) -> &Object {
        match &self.slots[id.0 as usize] {
            Some(slot) => &slot.object,
            None => panic!("access to freed heap slot {}", id.0),
        }
    }

    #[inline]
    pub fn get_mut(&mut self, id: ObjId) -> &mut Object {
        match &mut self.slots[id.0 as usize] {
            Some(slot) => &mut slot.object,
            None => panic!("access to freed heap slot {}", id.0),
        }
    }

    #[inline]
    pub fn null(&self) -> ObjId {
        NULL_ID
    }

    #[inline]
    pub fn boolean(&self, value: bool) -> ObjId {
        if value {
            TRUE_ID
        } else {
            FALSE_ID
        }
    }

    #[inline]
    pub fn number(&mut self, n: i32) -> ObjId {
        self.alloc(Object::Number(n))
    }

    #[inline]
    pub fn symbol(&mut self, s: impl Into<String>) -> ObjId {
        self.alloc(Object::Symbol(s.into()))
    }

    #[inline]
    pub fn cons(&mut self, first: ObjId, second: ObjId) -> ObjId {
        self.alloc(Object::Pair { first, second })
    }

    #[inline]
    pub fn environment(&mut self, parent: Option<ObjId>) -> ObjId {
        self.alloc(Object::Environment(EnvFrame::new(parent)))
    }

    /// Run a collection if the outstanding allocation size exceeds the
    /// threshold. This is the only entry point the interpreter uses.
    pub fn maybe_collect(&mut self, threshold: usize, roots: &[ObjId]) {
        if self.total_alloc_size > threshold {
            self.collect(roots);
        }
    }

    /// Unconditional mark-and-sweep collection from the given roots.
    pub fn collect(&mut self, roots: &[ObjId]) {
        let old_objects = self.live_count();
        let old_size = self.total_alloc_size;

        for root in roots {
            self.mark(*root);
        }
        self.sweep();

        if self.total_alloc_size != old_size {
            debug!(
                "gc: {} objects ({} bytes) -> {} objects ({} bytes)",
                old_objects,
                old_size,
                self.live_count(),
                self.total_alloc_size
            );
        }
    }

    /// Mark an object and everything reachable from it. The mark bit makes
    /// this idempotent, so cyclic graphs terminate: an already-marked object
    /// is never revisited.
    fn mark(&mut self, root: ObjId) {
        let mut worklist = vec![root];

        while let Some(id) = worklist.pop() {
            let idx = id.0 as usize;
            if self.marks[idx] {
                continue;
            }
            self.marks[idx] = true;

            match self.get(id) {
                Object::Pair { first, second } => {
                    worklist.push(*first);
                    worklist.push(*second);
                }
                Object::Closure { code, env } => {
                    worklist.push(*code);
                    worklist.push(*env);
                }
                Object::Code(code) => {
                    worklist.extend(code.constants.iter().copied());
                }
                Object::Environment(frame) => {
                    worklist.extend(frame.bindings.values().copied());
                    if let Some(parent) = frame.parent {
                        worklist.push(parent);
                    }
                }
                // Leaves: no outgoing references.
                Object::Null
                | Object::Boolean(_)
                | Object::Number(_)
                | Object::Symbol(_)
                | Object::Builtin(_) => {}
            }
        }
    }

    /// Free unmarked slots and clear the marks of the survivors.
    fn sweep(&mut self) {
        for idx in FIRST_USER_ID as usize..self.slots.len() {
            if self.marks[idx] {
                self.marks[idx] = false;
            } else if let Some(slot) = self.slots[idx].take() {
                self.total_alloc_size -= slot.size;
                self.free_list.push(idx as u32);
            }
        }
    }

    /// Number of live objects, the pre-allocated constants included.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Accumulated size in bytes of all outstanding allocations.
    pub fn total_alloc_size(&self) -> usize {
        self.total_alloc_size
    }

    /// Iterate over all live objects.
    pub fn live_objects(&self) -> impl Iterator<Item = (ObjId, &Object)> {
        self.slots.iter().enumerate().filter_map(|(idx, slot)| {
            slot.as_ref()
                .map(|slot| (ObjId(idx as u32), &slot.object))
        })
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

fn object_size(object: &Object) -> usize {
    let payload = match object {
        Object::Symbol(s) => s.len(),
        Object::Code(code) => {
            code.name.len()
                + code
                    .args
                    .iter()
                    .map(|a| a.len() + mem::size_of::<String>())
                    .sum::<usize>()
                + code
                    .varnames
                    .iter()
                    .map(|v| v.len() + mem::size_of::<String>())
                    .sum::<usize>()
                + code.constants.len() * mem::size_of::<ObjId>()
                + code.code.len() * mem::size_of::<crate::bytecode::Instruction>()
        }
        Object::Environment(frame) => frame
            .bindings
            .keys()
            .map(|k| k.len() + mem::size_of::<ObjId>())
            .sum(),
        _ => 0,
    };
    mem::size_of::<Object>() + payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::repr;

    #[test]
    fn test_constants_preallocated() {
        let heap = Heap::new();
        assert!(matches!(heap.get(NULL_ID), Object::Null));
        assert!(matches!(heap.get(TRUE_ID), Object::Boolean(true)));
        assert!(matches!(heap.get(FALSE_ID), Object::Boolean(false)));
    }

    #[test]
    fn test_alloc_and_get() {
        let mut heap = Heap::new();
        let n = heap.number(42);
        assert!(matches!(heap.get(n), Object::Number(42)));
        assert!(heap.total_alloc_size() > 0);
    }

    #[test]
    fn test_gc_keeps_reachable() {
        let mut heap = Heap::new();
        let one = heap.number(1);
        let two = heap.number(2);
        let pair = heap.cons(one, two);

        heap.collect(&[pair]);

        assert!(matches!(heap.get(pair), Object::Pair { .. }));
        assert!(matches!(heap.get(one), Object::Number(1)));
        assert!(matches!(heap.get(two), Object::Number(2)));
        assert_eq!(repr(&heap, pair), "(1 . 2)");
    }

    #[test]
    fn test_gc_collects_unreachable() {
        let mut heap = Heap::new();
        let one = heap.number(1);
        let _orphan = heap.number(2);
        let three = heap.number(3);
        let pair = heap.cons(one, three);

        let before_count = heap.live_count();
        let before_size = heap.total_alloc_size();
        heap.collect(&[pair]);

        assert_eq!(before_count - heap.live_count(), 1);
        assert!(heap.total_alloc_size() < before_size);
    }

    #[test]
    fn test_gc_reuses_freed_slots() {
        let mut heap = Heap::new();
        let orphan = heap.number(1);
        heap.collect(&[]);
        let fresh = heap.number(2);
        // The freed slot is handed out again.
        assert_eq!(orphan, fresh);
        assert!(matches!(heap.get(fresh), Object::Number(2)));
    }

    #[test]
    fn test_gc_threshold() {
        let mut heap = Heap::new();
        let _orphan = heap.number(1);
        let count = heap.live_count();

        // Below the threshold: nothing happens.
        heap.maybe_collect(usize::MAX, &[]);
        assert_eq!(heap.live_count(), count);

        // Above it: the orphan is gone.
        heap.maybe_collect(0, &[]);
        assert_eq!(heap.live_count(), count - 1);
    }

    #[test]
    fn test_gc_cycle_survives_while_rooted() {
        let mut heap = Heap::new();
        let one = heap.number(1);
        let pair = heap.cons(one, NULL_ID);
        // Tie the knot: the pair's second now points back at itself.
        match heap.get_mut(pair) {
            Object::Pair { second, .. } => *second = pair,
            _ => unreachable!(),
        }

        // Marking must terminate and keep the cycle alive.
        heap.collect(&[pair]);
        assert!(matches!(heap.get(pair), Object::Pair { .. }));

        // Once unrooted, the whole cycle is reclaimed.
        let before = heap.live_count();
        heap.collect(&[]);
        assert_eq!(before - heap.live_count(), 2);
    }

    #[test]
    fn test_gc_no_allocation_is_monotonic() {
        let mut heap = Heap::new();
        let one = heap.number(1);
        let pair = heap.cons(one, NULL_ID);

        heap.collect(&[pair]);
        let size_after_first = heap.total_alloc_size();
        heap.collect(&[pair]);
        assert_eq!(heap.total_alloc_size(), size_after_first);
    }

    #[test]
    fn test_gc_traces_environments_and_closures() {
        let mut heap = Heap::new();
        let global = heap.environment(None);
        let child = heap.environment(Some(global));
        let captured = heap.number(99);
        crate::env::define(&mut heap, child, "x", captured);

        let code = heap.alloc(Object::Code(crate::bytecode::CodeObject {
            name: "f".to_string(),
            args: vec![],
            varnames: vec![],
            constants: vec![],
            code: vec![],
        }));
        let closure = heap.alloc(Object::Closure { code, env: child });

        // The closure keeps its code, environment chain and binding alive.
        heap.collect(&[closure]);
        assert!(matches!(heap.get(captured), Object::Number(99)));
        assert!(matches!(heap.get(global), Object::Environment(_)));
    }
}
