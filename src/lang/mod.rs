pub mod ast;
pub mod error;
pub mod eval;
pub mod functions;
pub mod heap;
pub mod opcodes;
pub mod parse;
pub mod runtime;
pub mod serialize;
pub mod variables;
