use std::io::Write;

use log::debug;

use crate::lang::ast::*;
use crate::lang::error::{Error, Result};
use crate::lang::functions::FunctionTable;
use crate::lang::heap::Heap;
use crate::lang::variables::{CallStack, RecursionGuard};

pub const DEFAULT_MAX_DEPTH: usize = 50;
pub const DEFAULT_MAX_SLOTS: usize = 256;
pub const DEFAULT_MAX_HEAP: usize = 65536;

/// Limits an interpreter runs under
#[derive(Clone, Debug)]
pub struct Config {
    /// Deepest allowed nesting of function calls
    pub max_depth: usize,
    /// Most variables a single frame may hold
    pub max_slots: usize,
    /// Most heap cells that may be live at once
    pub max_heap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_depth: DEFAULT_MAX_DEPTH,
            max_slots: DEFAULT_MAX_SLOTS,
            max_heap: DEFAULT_MAX_HEAP,
        }
    }
}

/// How a block finished
///
/// Internal control flow, not exposed outside this module
enum Flow {
    Normal,
    Return(i64),
}

/// All state a running program can touch
pub struct Interpreter<'a> {
    sink: &'a mut dyn Write,
    interactive: bool,
    functions: FunctionTable,
    stack: CallStack,
    guard: RecursionGuard,
    heap: Heap,
}

impl<'a> Interpreter<'a> {
    /// Create a new `Interpreter` instance
    ///
    /// `sink` is where output should be written. eg. result of `PRINT` statements
    ///
    /// `interactive` sets whether or not a top-level `CALL` without a destination should print
    /// its result (useful when human is at a REPL)
    pub fn new(sink: &'a mut dyn Write, interactive: bool, config: &Config) -> Self {
        Self {
            sink,
            interactive,
            functions: FunctionTable::new(),
            stack: CallStack::new(config.max_slots),
            guard: RecursionGuard::new(config.max_depth),
            heap: Heap::new(config.max_heap),
        }
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut FunctionTable {
        &mut self.functions
    }

    pub fn stack(&self) -> &CallStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut CallStack {
        &mut self.stack
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn depth(&self) -> usize {
        self.guard.depth()
    }

    fn read(&self, operand: &Operand) -> Result<i64> {
        match operand {
            Operand::Integer(i) => Ok(*i),
            Operand::Slot(ident) => self.stack.get(ident),
        }
    }

    fn eval_binop(&mut self, op: BinaryOp, lhs: &Operand, rhs: &Operand) -> Result<i64> {
        let l = self.read(lhs)?;
        let r = self.read(rhs)?;

        Ok(match op {
            BinaryOp::Add => l.wrapping_add(r),
            BinaryOp::Subtract => l.wrapping_sub(r),
            BinaryOp::Multiply => l.wrapping_mul(r),
            BinaryOp::Divide => {
                if r == 0 {
                    return Err(Error::Arithmetic(format!("{} / 0", l)));
                }
                l.wrapping_div(r)
            }
            BinaryOp::Modulo => {
                if r == 0 {
                    return Err(Error::Arithmetic(format!("{} % 0", l)));
                }
                l.wrapping_rem(r)
            }
        })
    }

    fn eval_block(&mut self, stmts: &[Node]) -> Result<Flow> {
        for stmt in stmts {
            match self.eval_statement(stmt)? {
                Flow::Normal => (),
                r @ Flow::Return(_) => return Ok(r),
            }
        }

        Ok(Flow::Normal)
    }

    fn eval_while(&mut self, cond: &Operand, body: &[Node]) -> Result<Flow> {
        // The condition is re-read every time around so the body can end the loop
        while self.read(cond)? != 0 {
            if let r @ Flow::Return(_) = self.eval_block(body)? {
                return Ok(r);
            }
        }

        Ok(Flow::Normal)
    }

    fn eval_for(
        &mut self,
        counter: &Identifier,
        start: i64,
        end: i64,
        step: i64,
        body: &[Node],
    ) -> Result<Flow> {
        let mut i = start;
        while (step > 0 && i <= end) || (step < 0 && i >= end) {
            self.stack.set(counter, i)?;
            if let r @ Flow::Return(_) = self.eval_block(body)? {
                return Ok(r);
            }

            i = match i.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }

        Ok(Flow::Normal)
    }

    fn eval_switch(&mut self, subject: &Operand, arms: &[Node]) -> Result<Flow> {
        let val = self.read(subject)?;
        let matched = arms
            .iter()
            .find_map(|arm| match arm {
                Node::Case(v, body) if *v == val => Some(body),
                _ => None,
            })
            .or_else(|| {
                arms.iter().find_map(|arm| match arm {
                    Node::Default(body) => Some(body),
                    _ => None,
                })
            });

        match matched {
            Some(body) => self.eval_block(body),
            None => Ok(Flow::Normal),
        }
    }

    /// Run function `name` with `args` and return its result
    ///
    /// Arguments are read from the caller's frame. The callee gets a fresh frame holding only its
    /// parameters; that frame is gone by the time this returns, whether or not the body failed.
    fn eval_call(&mut self, name: &Identifier, args: &[Operand]) -> Result<i64> {
        let func = self
            .functions
            .get(name)
            .ok_or_else(|| Error::UndefinedFunction(name.to_string()))?;
        if func.params.len() != args.len() {
            return Err(Error::Arity {
                name: name.to_string(),
                expected: func.params.len(),
                got: args.len(),
            });
        }

        let _call = self.guard.enter_call(name)?;
        let vals = args
            .iter()
            .map(|arg| self.read(arg))
            .collect::<Result<Vec<i64>>>()?;
        debug!("call {} {:?} at depth {}", name, vals, self.guard.depth());

        self.stack.push_frame();
        let ret = self.eval_function_body(&func, &vals);
        self.stack.pop_frame()?;

        match ret? {
            Flow::Return(v) => Ok(v),
            Flow::Normal => Ok(0),
        }
    }

    fn eval_function_body(&mut self, func: &FuncDef, vals: &[i64]) -> Result<Flow> {
        for (param, val) in func.params.iter().zip(vals) {
            self.stack.set(param, *val)?;
        }

        self.eval_block(&func.body)
    }

    fn eval_malloc(&mut self, size: &Operand, dest: &Identifier) -> Result<()> {
        let size = self.read(size)?;
        let handle = self.heap.allocate(size)?;
        if let Err(e) = self.stack.set(dest, handle) {
            // Nothing holds the handle, so give it straight back
            self.heap.release(handle)?;
            return Err(e);
        }

        Ok(())
    }

    fn eval_statement(&mut self, stmt: &Node) -> Result<Flow> {
        match stmt {
            Node::Literal(_, _) => (),
            Node::Let(dest, src) => {
                let val = self.read(src)?;
                self.stack.set(dest, val)?;
            }
            Node::BinaryOp { op, lhs, rhs, dest } => {
                let val = self.eval_binop(*op, lhs, rhs)?;
                self.stack.set(dest, val)?;
            }
            Node::Print(src) => {
                let val = self.read(src)?;
                writeln!(self.sink, "Output: {}", val)?;
            }
            Node::If(cond, true_body, false_body) => {
                let body = if self.read(cond)? != 0 {
                    true_body
                } else {
                    false_body
                };
                return self.eval_block(body);
            }
            Node::While(cond, body) => return self.eval_while(cond, body),
            Node::For {
                counter,
                start,
                end,
                step,
                body,
            } => return self.eval_for(counter, *start, *end, *step, body),
            Node::Switch(subject, arms) => return self.eval_switch(subject, arms),
            // Arms only run through their `SWITCH`
            Node::Case(_, _) | Node::Default(_) => (),
            // Registered when parsed
            Node::FuncDef(_) => (),
            Node::Call { name, args, dest } => {
                let val = self.eval_call(name, args)?;
                if let Some(dest) = dest {
                    self.stack.set(dest, val)?;
                }
            }
            Node::Return(src) => return Ok(Flow::Return(self.read(src)?)),
            Node::Malloc(size, dest) => self.eval_malloc(size, dest)?,
            Node::Free(handle) => {
                let handle = self.read(handle)?;
                self.heap.release(handle)?;
            }
            Node::Retain(handle) => {
                let handle = self.read(handle)?;
                self.heap.retain(handle)?;
            }
            Node::Store(handle, index, src) => {
                let handle = self.read(handle)?;
                let index = self.read(index)?;
                let val = self.read(src)?;
                self.heap.write(handle, index, val)?;
            }
            Node::Load(handle, index, dest) => {
                let handle = self.read(handle)?;
                let index = self.read(index)?;
                let val = self.heap.read(handle, index)?;
                self.stack.set(dest, val)?;
            }
        }

        Ok(Flow::Normal)
    }

    /// Execute one top-level statement
    pub fn eval(&mut self, stmt: &Node) -> Result<()> {
        match stmt {
            Node::Call {
                name,
                args,
                dest: None,
            } if self.interactive => {
                let val = self.eval_call(name, args)?;
                writeln!(self.sink, "Output: {}", val)?;
            }
            // A `RETURN` out here just ends the statement
            _ => {
                self.eval_statement(stmt)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
fn run(input: &str) -> (String, Vec<Error>) {
    use crate::lang::parse::parse;

    let mut output = Vec::new();
    let mut errors = Vec::new();
    {
        let mut interp = Interpreter::new(&mut output, false, &Config::default());
        let stmts = parse(input).expect("Failed to parse");
        interp.functions_mut().register_from(&stmts);
        for stmt in &stmts {
            if let Err(e) = interp.eval(stmt) {
                errors.push(e);
            }
        }
    }

    (String::from_utf8(output).expect("Output not utf-8"), errors)
}

#[test]
fn test_arithmetic() {
    let tests = vec![
        ("LET a 7; LET b 2; ADD a b c; PRINT c;", "Output: 9\n"),
        ("LET a 7; SUBTRACT a 9 c; PRINT c;", "Output: -2\n"),
        ("LET a 7; MULTIPLY a -3 c; PRINT c;", "Output: -21\n"),
        ("LET a 7; DIVIDE a 2 c; PRINT c;", "Output: 3\n"),
        ("LET a -7; MODULO a 3 c; PRINT c;", "Output: -1\n"),
        ("LET a 9223372036854775807; ADD a 1 a; PRINT a;", "Output: -9223372036854775808\n"),
        ("ADD 1 2 x; LET y x; PRINT y; PRINT 4;", "Output: 3\nOutput: 4\n"),
    ];

    for (input, expected) in tests {
        let (output, errors) = run(input);
        assert!(errors.is_empty(), "{}: {:?}", input, errors);
        assert_eq!(output, expected);
    }
}

#[test]
fn test_divide_by_zero() {
    let (output, errors) = run("LET a 1; LET z 0; LET c 5; DIVIDE a z c; PRINT c; MODULO a z c;");
    assert_eq!(output, "Output: 5\n");
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|e| matches!(e, Error::Arithmetic(_))));
}

#[test]
fn test_undefined_slot() {
    let (output, errors) = run("PRINT nope; PRINT 1;");
    assert_eq!(output, "Output: 1\n");
    assert!(matches!(errors.as_slice(), [Error::MemoryBounds(_)]));
}

#[test]
fn test_if() {
    let tests = vec![
        ("LET x 3; IF x { PRINT 1; } ELSE { PRINT 2; }", "Output: 1\n"),
        ("LET x 0; IF x { PRINT 1; } ELSE { PRINT 2; }", "Output: 2\n"),
        ("LET x 0; IF x { PRINT 1; } PRINT 3;", "Output: 3\n"),
    ];

    for (input, expected) in tests {
        let (output, errors) = run(input);
        assert!(errors.is_empty(), "{}: {:?}", input, errors);
        assert_eq!(output, expected);
    }
}

#[test]
fn test_loop() {
    let tests = vec![
        (
            "LET x 3; WHILE x { PRINT x; SUBTRACT x 1 x; END",
            "Output: 3\nOutput: 2\nOutput: 1\n",
        ),
        (
            "FOR i 1 5 1 { PRINT i; END",
            "Output: 1\nOutput: 2\nOutput: 3\nOutput: 4\nOutput: 5\n",
        ),
        ("FOR i 1 6 2 { PRINT i; END", "Output: 1\nOutput: 3\nOutput: 5\n"),
        ("FOR i 3 1 -1 { PRINT i; END", "Output: 3\nOutput: 2\nOutput: 1\n"),
        ("FOR i 5 1 { PRINT i; END PRINT 0;", "Output: 0\n"),
        (
            "FOR i 9223372036854775806 9223372036854775807 { PRINT i; END",
            "Output: 9223372036854775806\nOutput: 9223372036854775807\n",
        ),
    ];

    for (input, expected) in tests {
        let (output, errors) = run(input);
        assert!(errors.is_empty(), "{}: {:?}", input, errors);
        assert_eq!(output, expected);
    }
}

#[test]
fn test_switch() {
    let program = |x: i64| {
        format!(
            "LET x {}; SWITCH x {{ CASE 1 {{ PRINT 10; }} CASE 2 {{ PRINT 20; }} \
             DEFAULT {{ PRINT 30; }} CASE 2 {{ PRINT 21; }} END",
            x
        )
    };
    let tests = vec![(1, "Output: 10\n"), (2, "Output: 20\n"), (9, "Output: 30\n")];

    for (x, expected) in tests {
        let (output, errors) = run(&program(x));
        assert!(errors.is_empty());
        assert_eq!(output, expected);
    }

    let (output, errors) = run("SWITCH 4 { CASE 1 { PRINT 1; } END PRINT 2;");
    assert!(errors.is_empty());
    assert_eq!(output, "Output: 2\n");
}

#[test]
fn test_call() {
    let tests = vec![
        (
            "FUNC add2 a b { ADD a b s; RETURN s; END CALL add2 3 4 -> r; PRINT r;",
            "Output: 7\n",
        ),
        (
            "FUNC fact n { IF n { SUBTRACT n 1 m; CALL fact m -> r; MULTIPLY n r r; RETURN r; } \
             RETURN 1; END CALL fact 10 -> x; PRINT x;",
            "Output: 3628800\n",
        ),
        // RETURN ends the body early
        ("FUNC f { RETURN 1; PRINT 9; END CALL f -> r; PRINT r;", "Output: 1\n"),
        // No RETURN at all evaluates to 0
        ("FUNC f { PRINT 5; END LET r 3; CALL f -> r; PRINT r;", "Output: 5\nOutput: 0\n"),
        // Callee frames are private
        (
            "LET x 1; FUNC f x { LET y 2; PRINT x; END CALL f 7; PRINT x;",
            "Output: 7\nOutput: 1\n",
        ),
    ];

    for (input, expected) in tests {
        let (output, errors) = run(input);
        assert!(errors.is_empty(), "{}: {:?}", input, errors);
        assert_eq!(output, expected);
    }
}

#[test]
fn test_call_errors() {
    let (_, errors) = run("CALL nope 1;");
    assert!(matches!(errors.as_slice(), [Error::UndefinedFunction(n)] if n == "nope"));

    let (_, errors) = run("FUNC f a { END CALL f;");
    assert!(matches!(
        errors.as_slice(),
        [Error::Arity {
            expected: 1,
            got: 0,
            ..
        }]
    ));

    // Callee cannot see the caller's variables
    let (_, errors) = run("LET x 1; FUNC f { PRINT x; END CALL f;");
    assert!(matches!(errors.as_slice(), [Error::MemoryBounds(_)]));
}

#[test]
fn test_recursion_limit() {
    let down = "FUNC down n { IF n { SUBTRACT n 1 m; CALL down m; } END ";
    let config = Config::default();

    // down 49 nests exactly 50 calls deep
    let (_, errors) = run(&format!("{}CALL down {};", down, config.max_depth - 1));
    assert!(errors.is_empty(), "{:?}", errors);

    let (_, errors) = run(&format!("{}CALL down {};", down, config.max_depth));
    assert!(matches!(
        errors.as_slice(),
        [Error::StackOverflow { limit: 50, .. }]
    ));
}

#[test]
fn test_failed_call_restores_state() {
    use crate::lang::parse::parse;

    let mut output = Vec::new();
    let mut interp = Interpreter::new(&mut output, false, &Config::default());
    let stmts = parse(
        "FUNC down n { IF n { SUBTRACT n 1 m; CALL down m; } DIVIDE 1 n q; END \
         FUNC forever { CALL forever; END CALL down 3; CALL forever; CALL missing;",
    )
    .expect("Failed to parse");
    interp.functions_mut().register_from(&stmts);

    for stmt in &stmts[2..] {
        assert!(interp.eval(stmt).is_err());
        assert_eq!(interp.depth(), 0);
        assert_eq!(interp.stack().len(), 1);
    }
}

#[test]
fn test_heap() {
    let (output, errors) = run(
        "MALLOC 2 p; STORE p 1 42; LOAD p 1 v; PRINT v; RETAIN p; FREE p; LOAD p 0 w; PRINT w; \
         FREE p; FREE p; PRINT 7;",
    );
    assert_eq!(output, "Output: 42\nOutput: 0\nOutput: 7\n");
    assert!(matches!(errors.as_slice(), [Error::DoubleFree(_)]));

    let (_, errors) = run("MALLOC 0 p; MALLOC 2 p; STORE p 2 1; LOAD 5 0 v;");
    assert_eq!(errors.len(), 3);
    assert!(errors.iter().all(|e| matches!(e, Error::MemoryBounds(_))));
}

#[test]
fn test_interactive() {
    use crate::lang::parse::parse;

    let mut output = Vec::new();
    {
        let mut interp = Interpreter::new(&mut output, true, &Config::default());
        let stmts = parse("FUNC f { RETURN 5; END CALL f; CALL f -> r;").expect("Failed to parse");
        interp.functions_mut().register_from(&stmts);
        for stmt in &stmts {
            interp.eval(stmt).expect("eval failed");
        }
    }
    assert_eq!(String::from_utf8(output).expect("Output not utf-8"), "Output: 5\n");
}
