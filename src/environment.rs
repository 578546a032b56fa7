use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::object::Object;

/// A single mutable slot shared between an environment entry and any
/// captured reference to it. Closures stay live by holding cells.
pub type Cell = Rc<RefCell<Object>>;

pub fn new_cell(value: Object) -> Cell {
    Rc::new(RefCell::new(value))
}

/// One lexical frame: name → cell bindings, export marks, parent link.
pub struct Frame {
    bindings: IndexMap<String, Cell>,
    exports: HashSet<String>,
    parent: Option<Env>,
}

/// A chain of frames with reference semantics: cloning an `Env` aliases the
/// same frame, which is what closure capture needs.
#[derive(Clone)]
pub struct Env(Rc<RefCell<Frame>>);

impl Env {
    pub fn new() -> Self {
        Env(Rc::new(RefCell::new(Frame {
            bindings: IndexMap::new(),
            exports: HashSet::new(),
            parent: None,
        })))
    }

    pub fn child_of(parent: &Env) -> Self {
        Env(Rc::new(RefCell::new(Frame {
            bindings: IndexMap::new(),
            exports: HashSet::new(),
            parent: Some(parent.clone()),
        })))
    }

    /// Look a name up through the frame chain.
    pub fn get(&self, name: &str) -> Option<Object> {
        self.get_cell(name).map(|cell| cell.borrow().clone())
    }

    /// Locate the cell a name resolves to, walking parents.
    pub fn get_cell(&self, name: &str) -> Option<Cell> {
        let frame = self.0.borrow();
        if let Some(cell) = frame.bindings.get(name) {
            return Some(cell.clone());
        }
        frame.parent.as_ref().and_then(|parent| parent.get_cell(name))
    }

    /// Bind a name in the innermost frame, shadowing any outer binding.
    pub fn set(&self, name: impl Into<String>, value: Object) -> Cell {
        let cell = new_cell(value);
        self.0.borrow_mut().bindings.insert(name.into(), cell.clone());
        cell
    }

    /// Install an existing cell under a name (closure capture wiring).
    pub fn set_cell(&self, name: impl Into<String>, cell: Cell) {
        self.0.borrow_mut().bindings.insert(name.into(), cell);
    }

    /// Mutate the cell a name currently resolves to. Returns false when the
    /// name is unbound anywhere in the chain.
    pub fn assign(&self, name: &str, value: Object) -> bool {
        match self.get_cell(name) {
            Some(cell) => {
                *cell.borrow_mut() = value;
                true
            }
            None => false,
        }
    }

    /// Mark a binding in this frame as exported.
    pub fn export(&self, name: &str) -> bool {
        let mut frame = self.0.borrow_mut();
        if frame.bindings.contains_key(name) {
            frame.exports.insert(name.to_string());
            true
        } else {
            false
        }
    }

    /// Shallow snapshot of this frame's exported bindings.
    pub fn exports(&self) -> IndexMap<String, Object> {
        let frame = self.0.borrow();
        frame
            .bindings
            .iter()
            .filter(|(name, _)| frame.exports.contains(name.as_str()))
            .map(|(name, cell)| (name.clone(), cell.borrow().clone()))
            .collect()
    }

    /// Names bound directly in this frame (not parents), in binding order.
    pub fn local_names(&self) -> Vec<String> {
        self.0.borrow().bindings.keys().cloned().collect()
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.0.borrow().bindings.contains_key(name)
    }
}

impl Default for Env {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frame = self.0.borrow();
        write!(
            f,
            "Env({} bindings{})",
            frame.bindings.len(),
            if frame.parent.is_some() {
                ", chained"
            } else {
                ""
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_walks_parent_chain() {
        let outer = Env::new();
        outer.set("x", Object::integer(1));
        let inner = Env::child_of(&outer);
        assert_eq!(inner.get("x"), Some(Object::integer(1)));
        assert_eq!(inner.get("missing"), None);
    }

    #[test]
    fn set_shadows_without_touching_outer() {
        let outer = Env::new();
        outer.set("x", Object::integer(1));
        let inner = Env::child_of(&outer);
        inner.set("x", Object::integer(2));
        assert_eq!(inner.get("x"), Some(Object::integer(2)));
        assert_eq!(outer.get("x"), Some(Object::integer(1)));
    }

    #[test]
    fn assign_mutates_the_visible_cell() {
        let outer = Env::new();
        outer.set("count", Object::integer(0));
        let inner = Env::child_of(&outer);
        assert!(inner.assign("count", Object::integer(5)));
        assert_eq!(outer.get("count"), Some(Object::integer(5)));
        assert!(!inner.assign("missing", Object::Null));
    }

    #[test]
    fn shared_cells_back_closure_captures() {
        let env = Env::new();
        let cell = env.set("c", Object::integer(0));
        let closure_env = Env::new();
        closure_env.set_cell("c", cell);
        closure_env.assign("c", Object::integer(7));
        assert_eq!(env.get("c"), Some(Object::integer(7)));
    }

    #[test]
    fn exports_snapshot_only_marked_names() {
        let env = Env::new();
        env.set("public_total", Object::integer(3));
        env.set("hidden", Object::integer(4));
        assert!(env.export("public_total"));
        assert!(!env.export("missing"));
        let exports = env.exports();
        assert_eq!(exports.len(), 1);
        assert_eq!(exports.get("public_total"), Some(&Object::integer(3)));
    }
}
