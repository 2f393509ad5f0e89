/// Variable scope chain.
///
/// Frames are heap-allocated and reference-counted so lambdas can capture
/// their defining scope by reference: a binding added to a frame after a
/// closure captured it is still visible to the closure, which is what makes
/// `$f := function($n){ … $f($n - 1) … }` work.
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;

#[derive(Debug, Default)]
pub struct Frame {
    bindings: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Frame>>,
}

impl Frame {
    pub fn new() -> Rc<Frame> {
        Rc::new(Frame::default())
    }

    pub fn child(parent: &Rc<Frame>) -> Rc<Frame> {
        Rc::new(Frame {
            bindings: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    pub fn bind(&self, name: impl Into<String>, value: Value) {
        self.bindings.borrow_mut().insert(name.into(), value);
    }

    /// Walk the scope chain for a binding.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.bindings.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_walks_the_chain() {
        let root = Frame::new();
        root.bind("a", Value::Number(1.0));
        let child = Frame::child(&root);
        child.bind("b", Value::Number(2.0));
        assert_eq!(child.lookup("a"), Some(Value::Number(1.0)));
        assert_eq!(child.lookup("b"), Some(Value::Number(2.0)));
        assert_eq!(root.lookup("b"), None);
    }

    #[test]
    fn inner_bindings_shadow_outer() {
        let root = Frame::new();
        root.bind("x", Value::Number(1.0));
        let child = Frame::child(&root);
        child.bind("x", Value::Number(2.0));
        assert_eq!(child.lookup("x"), Some(Value::Number(2.0)));
        assert_eq!(root.lookup("x"), Some(Value::Number(1.0)));
    }

    #[test]
    fn bindings_added_after_capture_are_visible() {
        let root = Frame::new();
        let captured = Rc::clone(&root);
        root.bind("late", Value::Bool(true));
        assert_eq!(captured.lookup("late"), Some(Value::Bool(true)));
    }
}
