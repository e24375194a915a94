use std::collections::BTreeMap;
use std::rc::Rc;

use log::{info, warn};

use crate::lang::ast::{FuncDef, Identifier, Node};

/// Every user function defined so far, by name
///
/// Definitions are shared with any call currently running them, so replacing a function while it
/// executes does not pull the body out from under the caller.
#[derive(Default)]
pub struct FunctionTable {
    inner: BTreeMap<Identifier, Rc<FuncDef>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &Identifier) -> Option<Rc<FuncDef>> {
        self.inner.get(name).cloned()
    }

    /// Add `func`, replacing any earlier definition with the same name
    pub fn insert(&mut self, func: FuncDef) {
        let name = func.name.clone();
        if self.inner.insert(name.clone(), Rc::new(func)).is_some() {
            warn!("Function '{}' redefined", name);
        } else {
            info!("Function '{}' defined", name);
        }
    }

    /// Register every `FUNC` in `stmts`, including ones nested inside other blocks
    pub fn register_from(&mut self, stmts: &[Node]) {
        for stmt in stmts {
            match stmt {
                Node::FuncDef(func) => {
                    self.insert(func.clone());
                    self.register_from(&func.body);
                }
                Node::If(_, true_body, false_body) => {
                    self.register_from(true_body);
                    self.register_from(false_body);
                }
                Node::While(_, body)
                | Node::For { body, .. }
                | Node::Switch(_, body)
                | Node::Case(_, body)
                | Node::Default(body) => self.register_from(body),
                _ => (),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Definitions in name order
    pub fn iter(&self) -> impl Iterator<Item = &FuncDef> {
        self.inner.values().map(|f| f.as_ref())
    }
}

#[test]
fn test_register_nested() {
    use crate::lang::parse::parse;

    let stmts = parse("FUNC outer { FUNC inner { PRINT 1; END END IF 1 { FUNC third { END }")
        .expect("Failed to parse");
    let mut table = FunctionTable::new();
    table.register_from(&stmts);

    let names: Vec<String> = table.iter().map(|f| f.name.to_string()).collect();
    assert_eq!(names, vec!["inner", "outer", "third"]);
}

#[test]
fn test_redefine_replaces() {
    use crate::lang::parse::parse;

    let mut table = FunctionTable::new();
    table.register_from(&parse("FUNC f { PRINT 1; END").expect("Failed to parse"));
    table.register_from(&parse("FUNC f a { PRINT a; END").expect("Failed to parse"));

    assert_eq!(table.len(), 1);
    let f = table.get(&Identifier::from("f")).expect("f missing");
    assert_eq!(f.params, vec![Identifier::from("a")]);
}
