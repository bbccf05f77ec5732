// Generic lexical-scope chain, reused by the assembler's semantic pass
// (`asm::semantic`) for register aliases, labels, and proc names (§4.6
// "lookups walk inner -> outer").

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::rc::Rc;

pub type Node<T> = Rc<T>;
pub type AList<T> = Vec<(String, Node<T>)>;
pub type Map<T> = HashMap<String, Node<T>>;

// Datastructure to manage lexical scoping.
pub struct Env<T> {
    scope: RefCell<Map<T>>,
    parent: Option<Node<Env<T>>>,
}

impl<T> Env<T>
where
    T: Clone + Debug,
{
    fn new(parent: Option<Node<Env<T>>>) -> Env<T> {
        let scope = RefCell::new(Map::new());
        Env { scope, parent }
    }

    pub fn root() -> Env<T> {
        Self::new(None)
    }

    pub fn chain(parent: &Node<Env<T>>) -> Env<T> {
        Self::new(Some(parent.clone()))
    }

    // Look up an identifier from anywhere in our scope chain.
    pub fn get(&self, key: &str) -> Option<Node<T>> {
        if let Some(value) = self.scope.borrow().get(key) {
            Some(value.clone())
        } else if let Some(env) = &self.parent {
            env.get(key)
        } else {
            None
        }
    }

    // True if `key` is bound in this scope specifically, ignoring
    // outer scopes (used to detect redefinition within one scope).
    pub fn defined_locally(&self, key: &str) -> bool {
        self.scope.borrow().contains_key(key)
    }

    // The enclosing scope, if any; lets a caller walk back out of a
    // scope chain it built with `chain`.
    pub fn parent_handle(&self) -> Option<Node<Env<T>>> {
        self.parent.clone()
    }

    // Insert a value in the current scope.
    pub fn define(&self, key: &str, value: &Node<T>) {
        self.scope.borrow_mut().insert(key.to_string(), value.clone());
    }

    // Import the map of values into the current scope.
    pub fn import(&self, scope: &AList<T>) {
        for (k, v) in scope.iter() {
            self.define(k, v)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_scope_shadows_outer() {
        let root: Node<Env<i32>> = Rc::new(Env::root());
        root.define("x", &Rc::new(1));
        let inner = Env::chain(&root);
        assert_eq!(*inner.get("x").unwrap(), 1);
        inner.define("x", &Rc::new(2));
        assert_eq!(*inner.get("x").unwrap(), 2);
        assert_eq!(*root.get("x").unwrap(), 1);
    }

    #[test]
    fn undefined_lookup_is_none() {
        let root: Env<i32> = Env::root();
        assert!(root.get("missing").is_none());
    }

    #[test]
    fn defined_locally_ignores_outer_scope() {
        let root: Node<Env<i32>> = Rc::new(Env::root());
        root.define("x", &Rc::new(1));
        let inner = Env::chain(&root);
        assert!(!inner.defined_locally("x"));
        assert!(root.defined_locally("x"));
    }
}
