use std::fs;
use std::io::Write;
use std::path::Path;

use log::{debug, info};

use crate::lang::error::{Error, Result};
use crate::lang::eval::{Config, Interpreter};
use crate::lang::parse::parse;
use crate::lang::serialize::{load_state, save_state};

pub struct Runtime<'a> {
    interp: Interpreter<'a>,
}

impl<'a> Runtime<'a> {
    /// Create a new `Runtime` instance
    ///
    /// `sink` is where output should be written. eg. result of `PRINT` statements
    ///
    /// `interactive` sets whether or not a bare `CALL` should print its result (useful when human
    /// is at a REPL)
    pub fn new(sink: &'a mut dyn Write, interactive: bool, config: &Config) -> Self {
        Self {
            interp: Interpreter::new(sink, interactive, config),
        }
    }

    pub fn interpreter(&self) -> &Interpreter<'a> {
        &self.interp
    }

    /// Parse and run `cmd`, returning every error hit along the way
    ///
    /// A parse error stops everything. Otherwise each top-level statement runs in turn, and a
    /// failing statement does not stop the ones after it.
    pub fn eval(&mut self, cmd: &str) -> Vec<Error> {
        let stmts = match parse(cmd) {
            Ok(s) => s,
            Err(e) => return vec![e],
        };
        self.interp.functions_mut().register_from(&stmts);

        let mut errors = Vec::new();
        for stmt in &stmts {
            if let Err(e) = self.interp.eval(stmt) {
                errors.push(e);
            }

            let swept = self.interp.heap_mut().collect();
            if swept > 0 {
                debug!("collected {} dead allocation(s)", swept);
            }
        }

        errors
    }

    /// Current functions and globals, in state file form
    pub fn save(&self) -> Vec<u8> {
        save_state(self.interp.functions(), self.interp.stack().globals())
    }

    /// Restore functions and globals from `bytes`
    ///
    /// The whole file is decoded before anything is applied, and the globals go in all at once
    /// before any function does. A file that is corrupt or does not fit changes nothing.
    pub fn load(&mut self, bytes: &[u8]) -> Result<()> {
        let state = load_state(bytes)?;
        self.interp.stack_mut().set_globals(&state.globals)?;

        for func in state.functions {
            self.interp.functions_mut().insert(func);
        }

        Ok(())
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(&path, self.save())?;
        info!("Saved state to {}", path.as_ref().display());

        Ok(())
    }

    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let bytes = fs::read(&path)?;
        self.load(&bytes)?;
        info!("Loaded state from {}", path.as_ref().display());

        Ok(())
    }
}

#[cfg(test)]
fn output_of(sink: Vec<u8>) -> String {
    String::from_utf8(sink).expect("Output not utf-8")
}

#[test]
fn test_errors_do_not_stop_later_statements() {
    let mut output = Vec::new();
    let errors = {
        let mut rt = Runtime::new(&mut output, false, &Config::default());
        rt.eval("LET a 1; DIVIDE a 0 b; PRINT a; CALL nope; MALLOC 1 p; FREE p; FREE p; PRINT 2;")
    };

    assert_eq!(output_of(output), "Output: 1\nOutput: 2\n");
    assert_eq!(errors.len(), 3);
    assert!(matches!(errors[0], Error::Arithmetic(_)));
    assert!(matches!(errors[1], Error::UndefinedFunction(_)));
    assert!(matches!(errors[2], Error::DoubleFree(_)));
}

#[test]
fn test_parse_error_runs_nothing() {
    let mut output = Vec::new();
    {
        let mut rt = Runtime::new(&mut output, false, &Config::default());
        let errors = rt.eval("FUNC f { PRINT 1; END PRINT 2; LET x;");
        assert!(matches!(errors.as_slice(), [Error::Syntax(_)]));
        assert!(rt.interpreter().functions().is_empty());

        let errors = rt.eval("   ");
        assert!(matches!(errors.as_slice(), [Error::Syntax(_)]));
    }

    assert_eq!(output_of(output), "");
}

#[test]
fn test_state_across_inputs() {
    let mut output = Vec::new();
    {
        let mut rt = Runtime::new(&mut output, false, &Config::default());
        assert!(rt.eval("FUNC sq n { MULTIPLY n n r; RETURN r; END LET x 4;").is_empty());
        assert!(rt.eval("CALL sq x -> y; PRINT y;").is_empty());
        assert!(rt.eval("MALLOC 8 p; FREE p;").is_empty());
        assert!(rt.interpreter().heap().is_empty());
    }

    assert_eq!(output_of(output), "Output: 16\n");
}

#[test]
fn test_save_load() {
    let saved = {
        let mut sink = Vec::new();
        let mut rt = Runtime::new(&mut sink, false, &Config::default());
        assert!(rt
            .eval("FUNC dbl n { ADD n n r; RETURN r; END LET x 21; LET y -3;")
            .is_empty());
        rt.save()
    };

    let mut output = Vec::new();
    {
        let mut rt = Runtime::new(&mut output, false, &Config::default());
        rt.load(&saved).expect("Failed to load");
        assert!(rt.eval("CALL dbl x -> z; PRINT z; PRINT y;").is_empty());
        assert_eq!(rt.save(), {
            let mut expected = saved.clone();
            expected.extend_from_slice(b"LET 0 2 z 42 0\n");
            // Globals are written in name order, and z sorts last
            expected
        });
    }

    assert_eq!(output_of(output), "Output: 42\nOutput: -3\n");
}

#[test]
fn test_corrupt_load_changes_nothing() {
    let mut sink = Vec::new();
    let mut rt = Runtime::new(&mut sink, false, &Config::default());
    assert!(rt.eval("LET x 1;").is_empty());
    let before = rt.save();

    let result = rt.load(b"FUNC 0 1 g 0\nLET 0 2 x 9 0\nFUNC 0 1 h 2 PRINT 0 1 x 0");
    assert!(matches!(result, Err(Error::CorruptState(_))));
    assert!(rt.interpreter().functions().is_empty());
    assert_eq!(rt.save(), before);
}

#[test]
fn test_load_that_does_not_fit_changes_nothing() {
    let saved = {
        let mut sink = Vec::new();
        let mut rt = Runtime::new(&mut sink, false, &Config::default());
        assert!(rt
            .eval("FUNC g { RETURN 1; END LET a 1; LET b 2; LET c 3;")
            .is_empty());
        rt.save()
    };

    let config = Config {
        max_slots: 2,
        ..Config::default()
    };
    let mut sink = Vec::new();
    let mut rt = Runtime::new(&mut sink, false, &config);
    assert!(rt.eval("LET a 9;").is_empty());
    let before = rt.save();

    assert!(matches!(rt.load(&saved), Err(Error::MemoryBounds(_))));
    assert!(rt.interpreter().functions().is_empty());
    assert_eq!(rt.interpreter().stack().globals().len(), 1);
    assert_eq!(rt.save(), before);
}
