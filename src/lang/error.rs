use std::io;

use thiserror::Error;

/// Every way a statement can fail
///
/// None of these are fatal to the interpreter. The runtime reports the error and moves on to the
/// next top-level statement.
#[derive(Error, Debug)]
pub enum Error {
    #[error("SyntaxError: {0}")]
    Syntax(String),
    #[error("UndefinedFunctionError: no function named '{0}'")]
    UndefinedFunction(String),
    #[error("StackOverflowError: recursion depth limit of {limit} reached calling '{name}'")]
    StackOverflow { name: String, limit: usize },
    #[error("ArityError: '{name}' takes {expected} argument(s) but {got} were given")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("ArithmeticError: {0}")]
    Arithmetic(String),
    #[error("MemoryBoundsError: {0}")]
    MemoryBounds(String),
    #[error("DoubleFreeError: handle {0:#x} is not a live allocation")]
    DoubleFree(i64),
    #[error("CorruptStateError: {0}")]
    CorruptState(String),
    #[error("IoError: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<pom::Error> for Error {
    fn from(e: pom::Error) -> Self {
        Error::Syntax(e.to_string())
    }
}

#[test]
fn test_error_display() {
    let tests = vec![
        (Error::Syntax("oops".to_string()), "SyntaxError: oops"),
        (
            Error::UndefinedFunction("f".to_string()),
            "UndefinedFunctionError: no function named 'f'",
        ),
        (
            Error::StackOverflow {
                name: "f".to_string(),
                limit: 50,
            },
            "StackOverflowError: recursion depth limit of 50 reached calling 'f'",
        ),
        (Error::DoubleFree(0x1000), "DoubleFreeError: handle 0x1000 is not a live allocation"),
    ];

    for (err, expected) in tests {
        assert_eq!(err.to_string(), expected);
    }
}
