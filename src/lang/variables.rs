use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use crate::lang::ast::Identifier;
use crate::lang::error::{Error, Result};

/// One call's variables
pub type Frame = BTreeMap<Identifier, i64>;

/// Stack of frames. Only the top frame is visible to a running statement.
///
/// The global frame sits at the bottom and can never be popped.
pub struct CallStack {
    global: Frame,
    calls: Vec<Frame>,
    max_slots: usize,
}

impl CallStack {
    pub fn new(max_slots: usize) -> Self {
        CallStack {
            global: Frame::new(),
            calls: Vec::new(),
            max_slots,
        }
    }

    pub fn push_frame(&mut self) {
        self.calls.push(Frame::new());
    }

    pub fn pop_frame(&mut self) -> Result<Frame> {
        self.calls
            .pop()
            .ok_or_else(|| Error::MemoryBounds("cannot pop the global frame".to_string()))
    }

    pub fn current(&mut self) -> &mut Frame {
        self.calls.last_mut().unwrap_or(&mut self.global)
    }

    pub fn globals(&self) -> &Frame {
        &self.global
    }

    /// Number of frames, counting the global one
    pub fn len(&self) -> usize {
        self.calls.len() + 1
    }

    pub fn get(&self, ident: &Identifier) -> Result<i64> {
        let frame = self.calls.last().unwrap_or(&self.global);
        frame
            .get(ident)
            .copied()
            .ok_or_else(|| Error::MemoryBounds(format!("no variable '{}' in this frame", ident)))
    }

    /// Write `val` into the top frame, creating the slot if needed
    pub fn set(&mut self, ident: &Identifier, val: i64) -> Result<()> {
        let max_slots = self.max_slots;
        let frame = self.current();
        if let Some(slot) = frame.get_mut(ident) {
            *slot = val;
            return Ok(());
        }

        if frame.len() >= max_slots {
            return Err(Error::MemoryBounds(format!(
                "frame is full ({} slots), cannot create '{}'",
                max_slots, ident
            )));
        }

        frame.insert(ident.clone(), val);
        Ok(())
    }

    /// Write every pair into the global frame, or none of them if they would not all fit
    pub fn set_globals(&mut self, vals: &[(Identifier, i64)]) -> Result<()> {
        let new: BTreeSet<&Identifier> = vals
            .iter()
            .map(|(ident, _)| ident)
            .filter(|ident| !self.global.contains_key(*ident))
            .collect();
        if self.global.len() + new.len() > self.max_slots {
            return Err(Error::MemoryBounds(format!(
                "global frame holds {} of {} slots, cannot add {} more",
                self.global.len(),
                self.max_slots,
                new.len()
            )));
        }

        for (ident, val) in vals {
            self.global.insert(ident.clone(), *val);
        }

        Ok(())
    }
}

/// Bounds how deeply function calls may nest
pub struct RecursionGuard {
    depth: Rc<Cell<usize>>,
    max_depth: usize,
}

/// Proof that a call has been entered. Dropping it leaves the call.
pub struct CallToken {
    depth: Rc<Cell<usize>>,
}

impl Drop for CallToken {
    fn drop(&mut self) {
        self.depth.set(self.depth.get() - 1);
    }
}

impl RecursionGuard {
    pub fn new(max_depth: usize) -> Self {
        RecursionGuard {
            depth: Rc::new(Cell::new(0)),
            max_depth,
        }
    }

    /// Enter a call to `name`
    ///
    /// Fails without changing the depth if the limit has been reached. The depth goes back down
    /// when the returned token is dropped, on success and error paths alike.
    pub fn enter_call(&self, name: &Identifier) -> Result<CallToken> {
        let depth = self.depth.get();
        if depth >= self.max_depth {
            return Err(Error::StackOverflow {
                name: name.to_string(),
                limit: self.max_depth,
            });
        }

        self.depth.set(depth + 1);
        Ok(CallToken {
            depth: Rc::clone(&self.depth),
        })
    }

    pub fn depth(&self) -> usize {
        self.depth.get()
    }
}

#[test]
fn test_frames() {
    let x = Identifier::from("x");
    let mut stack = CallStack::new(8);
    stack.set(&x, 1).expect("set failed");

    stack.push_frame();
    assert_eq!(stack.len(), 2);
    assert!(matches!(stack.get(&x), Err(Error::MemoryBounds(_))));
    stack.set(&x, 2).expect("set failed");
    assert_eq!(stack.get(&x).expect("get failed"), 2);

    let popped = stack.pop_frame().expect("pop failed");
    assert_eq!(popped.get(&x), Some(&2));
    assert_eq!(stack.get(&x).expect("get failed"), 1);
    assert!(stack.pop_frame().is_err());
    assert_eq!(stack.len(), 1);
}

#[test]
fn test_frame_capacity() {
    let mut stack = CallStack::new(2);
    stack.set(&Identifier::from("a"), 1).expect("set failed");
    stack.set(&Identifier::from("b"), 2).expect("set failed");
    // Overwriting an existing slot never needs room
    stack.set(&Identifier::from("a"), 3).expect("set failed");
    assert!(matches!(
        stack.set(&Identifier::from("c"), 4),
        Err(Error::MemoryBounds(_))
    ));
    assert_eq!(stack.current().len(), 2);
}

#[test]
fn test_set_globals() {
    let a = Identifier::from("a");
    let mut stack = CallStack::new(3);
    stack.set(&a, 1).expect("set failed");

    let too_many = vec![
        (Identifier::from("b"), 2),
        (Identifier::from("c"), 3),
        (Identifier::from("d"), 4),
    ];
    assert!(matches!(
        stack.set_globals(&too_many),
        Err(Error::MemoryBounds(_))
    ));
    assert_eq!(stack.globals().len(), 1);
    assert_eq!(stack.get(&a).expect("get failed"), 1);

    // Existing names and repeats do not need new slots
    let fits = vec![(a.clone(), 5), (Identifier::from("b"), 2), (Identifier::from("b"), 6)];
    stack.set_globals(&fits).expect("set_globals failed");
    assert_eq!(stack.get(&a).expect("get failed"), 5);
    assert_eq!(stack.get(&Identifier::from("b")).expect("get failed"), 6);
    assert_eq!(stack.globals().len(), 2);
}

#[test]
fn test_recursion_guard() {
    let f = Identifier::from("f");
    let guard = RecursionGuard::new(2);
    {
        let _outer = guard.enter_call(&f).expect("enter failed");
        let _inner = guard.enter_call(&f).expect("enter failed");
        assert_eq!(guard.depth(), 2);
        assert!(matches!(
            guard.enter_call(&f),
            Err(Error::StackOverflow { limit: 2, .. })
        ));
        assert_eq!(guard.depth(), 2);
    }
    assert_eq!(guard.depth(), 0);
}
