//! The scope chain: symbol tables carrying types and storage locations,
//! plus the register and label allocators the emitter leans on.
//!
//! Scopes form a stack of frames rather than a parent-pointer chain; the
//! innermost frame is the top of the stack.  Symbol entries are append-only
//! and looked up from the end, so a name declared later in the same scope
//! shadows an earlier one.

use crate::common::{Id, Set};
use crate::middle::types::{FnTy, Ty};

/// One lexical scope.
struct Frame {
    /// Ordered `(name, type, location)` entries; never removed, never
    /// overwritten.
    entries: Vec<Entry>,
    /// The enclosing function, if any.
    func: Option<FnTy>,
    /// False only for the program scope; storage found in a local frame is
    /// frame-relative, storage in the program scope is absolute.
    is_local: bool,
    /// Program and function frames own a storage counter; block frames
    /// allocate through their enclosing function frame, so block-local
    /// declarations keep growing the same stack frame.
    owns_storage: bool,
    /// Words of storage handed out so far (globals, or locals of the
    /// current function frame).
    size: i64,
}

struct Entry {
    name: Id,
    ty: Ty,
    loc: i64,
}

/// The scope stack shared by the checker and the code generator.
pub struct ScopeStack {
    frames: Vec<Frame>,
    /// Labels are unique across the whole program.
    next_label: u32,
    /// Live virtual-register ids; allocation hands out the smallest free id.
    live: Set<u32>,
}

impl ScopeStack {
    /// A fresh stack holding only the program scope.
    pub fn new() -> Self {
        ScopeStack {
            frames: vec![Frame {
                entries: Vec::new(),
                func: None,
                is_local: false,
                owns_storage: true,
                size: 0,
            }],
            next_label: 0,
            live: Set::new(),
        }
    }

    /// Enter a compound statement's scope.
    pub fn push_block(&mut self) {
        let func = self.current_fn().cloned();
        self.frames.push(Frame {
            entries: Vec::new(),
            func,
            is_local: true,
            owns_storage: false,
            size: 0,
        });
    }

    /// Enter a function's scope.  The register live set starts empty; no
    /// virtual register survives across function boundaries.
    pub fn push_function(&mut self, func: FnTy) {
        self.frames.push(Frame {
            entries: Vec::new(),
            func: Some(func),
            is_local: true,
            owns_storage: true,
            size: 0,
        });
        self.live.clear();
    }

    pub fn pop(&mut self) {
        let frame = self.frames.pop();
        debug_assert!(frame.is_some() && !self.frames.is_empty());
    }

    /// The descriptor of the function whose body is being walked.
    pub fn current_fn(&self) -> Option<&FnTy> {
        self.frames.last().and_then(|f| f.func.as_ref())
    }

    /// Record a symbol in the innermost scope.
    pub fn declare(&mut self, name: Id, ty: Ty, loc: i64) {
        let frame = self.frames.last_mut().expect("scope stack is never empty");
        frame.entries.push(Entry { name, ty, loc });
    }

    /// Reserve `words` words of storage in the current frame (or the data
    /// segment, at program scope) and return the location of the first.
    /// Locations count upward from 1.
    pub fn alloc_slot(&mut self, words: i64) -> i64 {
        let frame = self
            .frames
            .iter_mut()
            .rev()
            .find(|f| f.owns_storage)
            .expect("scope stack is never empty");
        let loc = frame.size + 1;
        frame.size += words;
        loc
    }

    /// Resolve a name to its type, innermost declaration first.
    pub fn lookup_type(&self, name: Id) -> Option<&Ty> {
        self.lookup(name).map(|(entry, _)| &entry.ty)
    }

    /// Resolve a name to its storage location; the flag reports whether the
    /// location is frame-relative (local) or absolute (global).
    pub fn lookup_location(&self, name: Id) -> Option<(i64, bool)> {
        self.lookup(name).map(|(entry, frame)| (entry.loc, frame.is_local))
    }

    fn lookup(&self, name: Id) -> Option<(&Entry, &Frame)> {
        for frame in self.frames.iter().rev() {
            if let Some(entry) = frame.entries.iter().rev().find(|e| e.name == name) {
                return Some((entry, frame));
            }
        }
        None
    }

    /// Smallest virtual-register id not currently live.
    pub fn alloc_register(&mut self) -> u32 {
        let id = (0..).find(|id| !self.live.contains(id)).unwrap();
        self.live.insert(id);
        id
    }

    pub fn free_register(&mut self, id: u32) {
        let was_live = self.live.remove(&id);
        debug_assert!(was_live, "freed a register that was not live");
    }

    /// The live registers in ascending order, for spilling around calls.
    pub fn live_registers(&self) -> Vec<u32> {
        self.live.iter().copied().collect()
    }

    /// A fresh program-wide label id.
    pub fn alloc_label(&mut self) -> u32 {
        let label = self.next_label;
        self.next_label += 1;
        label
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::id;
    use crate::middle::types::{BaseTy, ValueTy};

    fn int_scalar() -> Ty {
        Ty::Value(ValueTy::scalar(BaseTy::Int))
    }

    fn float_scalar() -> Ty {
        Ty::Value(ValueTy::scalar(BaseTy::Float))
    }

    #[test]
    fn later_declaration_shadows_earlier_in_same_scope() {
        let mut scopes = ScopeStack::new();
        scopes.declare(id("x"), int_scalar(), 1);
        scopes.declare(id("x"), float_scalar(), 2);
        assert_eq!(scopes.lookup_type(id("x")), Some(&float_scalar()));
        assert_eq!(scopes.lookup_location(id("x")), Some((2, false)));
    }

    #[test]
    fn inner_scope_shadows_outer_and_unwinds() {
        let mut scopes = ScopeStack::new();
        scopes.declare(id("x"), int_scalar(), 1);
        scopes.push_function(FnTy {
            ret: BaseTy::Int,
            params: vec![],
        });
        scopes.declare(id("x"), float_scalar(), 1);
        assert_eq!(scopes.lookup_type(id("x")), Some(&float_scalar()));
        assert_eq!(scopes.lookup_location(id("x")), Some((1, true)));
        scopes.pop();
        assert_eq!(scopes.lookup_type(id("x")), Some(&int_scalar()));
        assert_eq!(scopes.lookup_location(id("x")), Some((1, false)));
    }

    #[test]
    fn block_storage_grows_the_function_frame() {
        let mut scopes = ScopeStack::new();
        scopes.push_function(FnTy {
            ret: BaseTy::Int,
            params: vec![],
        });
        assert_eq!(scopes.alloc_slot(1), 1);
        scopes.push_block();
        assert_eq!(scopes.alloc_slot(4), 2);
        assert_eq!(scopes.alloc_slot(1), 6);
        scopes.pop();
        // block exit does not rewind the frame
        assert_eq!(scopes.alloc_slot(1), 7);
    }

    #[test]
    fn registers_reuse_smallest_free_id() {
        let mut scopes = ScopeStack::new();
        assert_eq!(scopes.alloc_register(), 0);
        assert_eq!(scopes.alloc_register(), 1);
        assert_eq!(scopes.alloc_register(), 2);
        scopes.free_register(1);
        assert_eq!(scopes.alloc_register(), 1);
        scopes.free_register(0);
        scopes.free_register(1);
        assert_eq!(scopes.alloc_register(), 0);
        assert_eq!(scopes.live_registers(), vec![0, 2]);
    }

    #[test]
    fn labels_are_program_wide() {
        let mut scopes = ScopeStack::new();
        assert_eq!(scopes.alloc_label(), 0);
        scopes.push_function(FnTy {
            ret: BaseTy::Int,
            params: vec![],
        });
        assert_eq!(scopes.alloc_label(), 1);
        scopes.pop();
        assert_eq!(scopes.alloc_label(), 2);
    }
}
