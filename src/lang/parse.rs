//! Parser for tally's command language.
//!
//! The grammar is a PEG (https://en.wikipedia.org/wiki/Parsing_expression_grammar) over
//! whitespace-separated tokens. Every statement starts with an upper case command word; simple
//! statements end in `;`, block statements end in `}` or `END`.
//!
//! Developer notes:
//!
//! * A PEG is order sensitive. Commands are tried before the bare literal rule, and the bare
//!   literal rule only accepts a leading word that is not reserved. Otherwise a malformed `LET`
//!   would quietly turn into a literal.
//!
//! * Words are always consumed whole by `word()` and then compared, so `LETTER` is never read as
//!   `LET` followed by `TER`.
//!
//! * The combinators recurse once per open block. `parse()` counts blocks before handing the
//!   input to them, so deep input fails with a syntax error instead of exhausting the stack.
//!
//! * Nothing is logged from inside a combinator: a PEG backtracks, and a parser that matched may
//!   still belong to input that fails as a whole.

use std::iter::FromIterator;
use std::str::FromStr;

use log::warn;
use pom::parser::{call, end, is_a, one_of, sym, tag, Parser};

use crate::lang::ast::*;
use crate::lang::error::{Error, Result};
use crate::lang::opcodes::is_keyword;

/// Most blocks that may be open at once
pub const MAX_NESTING: usize = 64;

fn space<'a>() -> Parser<'a, char, ()> {
    one_of(" \t\r\n").repeat(0..).discard()
}

fn word<'a>() -> Parser<'a, char, String> {
    (is_a(|c: char| c.is_ascii_alphabetic() || c == '_')
        + is_a(|c: char| c.is_ascii_alphanumeric() || c == '_').repeat(0..))
    .collect()
    .map(String::from_iter)
}

fn keyword<'a>(kw: &'static str) -> Parser<'a, char, ()> {
    word()
        .convert(move |w| {
            if w == kw {
                Ok(())
            } else {
                Err(format!("expected {}, found {}", kw, w))
            }
        })
        .discard()
}

fn ident<'a>() -> Parser<'a, char, Identifier> {
    word().convert(|w| {
        if is_keyword(&w) {
            Err(format!("'{}' is a reserved word", w))
        } else {
            Ok(Identifier(w))
        }
    })
}

fn number<'a>() -> Parser<'a, char, i64> {
    let digits = sym('-').opt() + is_a(|c: char| c.is_ascii_digit()).repeat(1..);
    let number = digits
        .collect()
        .map(String::from_iter)
        .convert(|s| i64::from_str(&s));

    // `12ab` is a malformed number, not `12` followed by `ab`
    number - !is_a(|c: char| c.is_ascii_alphanumeric() || c == '_')
}

fn operand<'a>() -> Parser<'a, char, Operand> {
    number().map(Operand::Integer) | ident().map(Operand::Slot)
}

fn leaves(values: Vec<i64>) -> Vec<Node> {
    values
        .into_iter()
        .map(|v| Node::Literal(v, Vec::new()))
        .collect()
}

fn let_stmt<'a>() -> Parser<'a, char, Node> {
    (keyword("LET") * space() * ident() + space() * operand())
        .map(|(dest, src)| Node::Let(dest, src))
}

fn binop_stmt<'a>() -> Parser<'a, char, Node> {
    let op = word().convert(|w| {
        BinaryOp::from_command(&w).ok_or_else(|| format!("'{}' is not an arithmetic command", w))
    });
    let binop = op + space() * operand() + space() * operand() + space() * ident();

    binop.map(|(((op, lhs), rhs), dest)| Node::BinaryOp { op, lhs, rhs, dest })
}

fn print_stmt<'a>() -> Parser<'a, char, Node> {
    (keyword("PRINT") * space() * operand()).map(Node::Print)
}

fn call_stmt<'a>() -> Parser<'a, char, Node> {
    let args = (space() * operand()).repeat(0..);
    let dest = space() * tag("->") * space() * ident();
    let call = keyword("CALL") * space() * ident() + args + dest.opt();

    call.map(|((name, args), dest)| Node::Call { name, args, dest })
}

fn return_stmt<'a>() -> Parser<'a, char, Node> {
    (keyword("RETURN") * space() * operand()).map(Node::Return)
}

fn heap_stmt<'a>() -> Parser<'a, char, Node> {
    let malloc = (keyword("MALLOC") * space() * operand() + space() * ident())
        .map(|(size, dest)| Node::Malloc(size, dest));
    let free = (keyword("FREE") * space() * operand()).map(Node::Free);
    let retain = (keyword("RETAIN") * space() * operand()).map(Node::Retain);
    let store = (keyword("STORE") * space() * operand()
        + space() * operand()
        + space() * operand())
    .map(|((handle, index), value)| Node::Store(handle, index, value));
    let load = (keyword("LOAD") * space() * operand() + space() * operand() + space() * ident())
        .map(|((handle, index), dest)| Node::Load(handle, index, dest));

    malloc | free | retain | store | load
}

/// A statement that starts with something other than a command
///
/// The remaining numbers are kept as children. A leading word is dropped.
fn literal_stmt<'a>() -> Parser<'a, char, Node> {
    let with_number = (number() + (space() * number()).repeat(0..))
        .map(|(value, rest)| Node::Literal(value, leaves(rest)));
    let with_word =
        (ident() + (space() * number()).repeat(0..)).map(|(_, rest)| Node::Literal(0, leaves(rest)));

    with_number | with_word
}

/// `{ stmts }`
fn brace_body<'a>() -> Parser<'a, char, Vec<Node>> {
    space() * sym('{') * call(stmts) - space() - sym('}')
}

/// `{ stmts END`
fn end_body<'a>() -> Parser<'a, char, Vec<Node>> {
    space() * sym('{') * call(stmts) - space() - keyword("END")
}

fn if_else_stmt<'a>() -> Parser<'a, char, Node> {
    let if_stmt = keyword("IF") * space() * operand() + brace_body();
    let else_stmt = space() * keyword("ELSE") * brace_body();

    (if_stmt + else_stmt.opt()).map(|((cond, true_body), false_body)| {
        Node::If(cond, true_body, false_body.unwrap_or_else(Vec::new))
    })
}

fn while_stmt<'a>() -> Parser<'a, char, Node> {
    (keyword("WHILE") * space() * operand() + end_body())
        .map(|(cond, body)| Node::While(cond, body))
}

fn for_stmt<'a>() -> Parser<'a, char, Node> {
    let range = space() * number() + space() * number() + (space() * number()).opt();
    let for_stmt = keyword("FOR") * space() * ident() + range + end_body();

    for_stmt.convert(|((counter, ((start, end), step)), body)| {
        let step = step.unwrap_or(1);
        if step == 0 {
            return Err("FOR step must not be zero");
        }

        Ok(Node::For {
            counter,
            start,
            end,
            step,
            body,
        })
    })
}

fn switch_arm<'a>() -> Parser<'a, char, Node> {
    let case = (keyword("CASE") * space() * number() + brace_body())
        .map(|(value, body)| Node::Case(value, body));
    let default = (keyword("DEFAULT") * brace_body()).map(Node::Default);

    space() * (case | default)
}

fn switch_stmt<'a>() -> Parser<'a, char, Node> {
    let switch = keyword("SWITCH") * space() * operand() - space() - sym('{')
        + switch_arm().repeat(0..)
        - space()
        - keyword("END");

    switch.convert(|(subject, arms)| {
        let defaults = arms
            .iter()
            .filter(|arm| matches!(arm, Node::Default(_)))
            .count();
        if defaults > 1 {
            return Err("SWITCH may have at most one DEFAULT");
        }

        Ok(Node::Switch(subject, arms))
    })
}

fn func_stmt<'a>() -> Parser<'a, char, Node> {
    let func = keyword("FUNC") * space() * ident() + (space() * ident()).repeat(0..) + end_body();

    func.convert(|((name, params), body)| {
        for (i, param) in params.iter().enumerate() {
            if params[..i].contains(param) {
                return Err(format!("duplicate parameter '{}' in FUNC {}", param, name));
            }
        }

        Ok(Node::FuncDef(FuncDef { name, params, body }))
    })
}

/// Parse a statement
///
/// Consumes leading whitespace
fn stmt<'a>() -> Parser<'a, char, Node> {
    // NB: commands must come first otherwise they may be parsed as bare literals
    let block = (if_else_stmt() | while_stmt() | for_stmt() | switch_stmt() | func_stmt())
        - (space() * sym(';')).opt();
    let simple = (let_stmt()
        | binop_stmt()
        | print_stmt()
        | call_stmt()
        | return_stmt()
        | heap_stmt()
        | literal_stmt())
        - space()
        - sym(';');

    space() * (block | simple)
}

/// Parse a series of statements
fn stmts<'a>() -> Parser<'a, char, Vec<Node>> {
    stmt().repeat(0..)
}

/// `input` with `;`, `{` and `}` pulled apart from the words around them
fn spaced(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c == ';' || c == '{' || c == '}' {
            out.push(' ');
            out.push(c);
            out.push(' ');
        } else {
            out.push(c);
        }
    }

    out
}

/// Count the blocks of `input`
///
/// `{` opens a block; `}` and `END` close one. Returns how many are still open at the end, which is
/// negative when there are more closers than openers, and the most that were open at any point.
pub fn block_nesting(input: &str) -> (i64, usize) {
    let mut open: i64 = 0;
    let mut deepest: i64 = 0;
    for tok in spaced(input).split_whitespace() {
        match tok {
            "{" => open += 1,
            "}" | "END" => open -= 1,
            _ => continue,
        }
        deepest = deepest.max(open);
    }

    (open, deepest as usize)
}

/// Words that begin a statement without being a command
///
/// Only meaningful for input that parsed. There every token after `;`, `{`, `}` or `END` either
/// begins a statement or is one of the block keywords.
fn unknown_commands(input: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut at_start = true;
    for tok in spaced(input).split_whitespace() {
        let is_word = tok.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_');
        if at_start && is_word && !is_keyword(tok) {
            words.push(tok.to_string());
        }
        at_start = matches!(tok, ";" | "{" | "}" | "END");
    }

    words
}

/// Parse `input` into one tree per top-level statement
pub fn parse(input: &str) -> Result<Vec<Node>> {
    if input.trim().is_empty() {
        return Err(Error::Syntax("empty input".to_string()));
    }

    let (_, deepest) = block_nesting(input);
    if deepest > MAX_NESTING {
        return Err(Error::Syntax(format!(
            "blocks nested {} deep, the limit is {}",
            deepest, MAX_NESTING
        )));
    }

    let chars: Vec<char> = input.chars().collect();
    let program = stmts() - space() - end();
    let stmts = program.parse(&chars)?;

    for word in unknown_commands(input) {
        warn!("Unrecognized command '{}', treating as literal", word);
    }

    Ok(stmts)
}

#[cfg(test)]
fn slot(s: &str) -> Operand {
    Operand::Slot(Identifier::from(s))
}

#[test]
fn test_number() {
    {
        let data = vec![("0", 0), ("42", 42), ("-7", -7), ("9223372036854775807", i64::MAX)];

        for (input, expected) in data {
            let input: Vec<char> = input.chars().collect();
            assert_eq!(number().parse(&input), Ok(expected));
        }
    }

    {
        let data = vec!["12ab", "9223372036854775808", "-", "x"];

        for input in data {
            let input: Vec<char> = input.chars().collect();
            assert!((number() - end()).parse(&input).is_err());
        }
    }
}

#[test]
fn test_ident() {
    let input: Vec<char> = "counter_1".chars().collect();
    assert_eq!(ident().parse(&input), Ok(Identifier::from("counter_1")));

    for reserved in &["LET", "END", "ELSE"] {
        let input: Vec<char> = reserved.chars().collect();
        assert!(ident().parse(&input).is_err());
    }
}

#[test]
fn test_simple_stmt() {
    let data = vec![
        ("LET x 5;", Node::Let(Identifier::from("x"), Operand::Integer(5))),
        ("LET y x ;", Node::Let(Identifier::from("y"), slot("x"))),
        (
            "ADD a 1 b;",
            Node::BinaryOp {
                op: BinaryOp::Add,
                lhs: slot("a"),
                rhs: Operand::Integer(1),
                dest: Identifier::from("b"),
            },
        ),
        (
            "MODULO 10 b c;",
            Node::BinaryOp {
                op: BinaryOp::Modulo,
                lhs: Operand::Integer(10),
                rhs: slot("b"),
                dest: Identifier::from("c"),
            },
        ),
        ("PRINT x;", Node::Print(slot("x"))),
        (
            "CALL f;",
            Node::Call {
                name: Identifier::from("f"),
                args: Vec::new(),
                dest: None,
            },
        ),
        (
            "CALL f 1 n -> r;",
            Node::Call {
                name: Identifier::from("f"),
                args: vec![Operand::Integer(1), slot("n")],
                dest: Some(Identifier::from("r")),
            },
        ),
        (
            "CALL f -1->r;",
            Node::Call {
                name: Identifier::from("f"),
                args: vec![Operand::Integer(-1)],
                dest: Some(Identifier::from("r")),
            },
        ),
        ("RETURN n;", Node::Return(slot("n"))),
        (
            "MALLOC 4 p;",
            Node::Malloc(Operand::Integer(4), Identifier::from("p")),
        ),
        ("FREE p;", Node::Free(slot("p"))),
        ("RETAIN p;", Node::Retain(slot("p"))),
        (
            "STORE p 0 9;",
            Node::Store(slot("p"), Operand::Integer(0), Operand::Integer(9)),
        ),
        (
            "LOAD p 0 v;",
            Node::Load(slot("p"), Operand::Integer(0), Identifier::from("v")),
        ),
        (
            "1 2 3;",
            Node::Literal(
                1,
                vec![Node::Literal(2, Vec::new()), Node::Literal(3, Vec::new())],
            ),
        ),
        (
            "frob 2;",
            Node::Literal(0, vec![Node::Literal(2, Vec::new())]),
        ),
    ];

    for (input, expected) in data {
        let input: Vec<char> = input.chars().collect();
        assert_eq!(stmt().parse(&input), Ok(expected));
    }
}

#[test]
fn test_block_stmt() {
    let data = vec![
        (
            "IF x { PRINT x; }",
            Node::If(slot("x"), vec![Node::Print(slot("x"))], Vec::new()),
        ),
        (
            "IF x { PRINT 1; } ELSE { PRINT 2; };",
            Node::If(
                slot("x"),
                vec![Node::Print(Operand::Integer(1))],
                vec![Node::Print(Operand::Integer(2))],
            ),
        ),
        (
            "WHILE x { SUBTRACT x 1 x; END",
            Node::While(
                slot("x"),
                vec![Node::BinaryOp {
                    op: BinaryOp::Subtract,
                    lhs: slot("x"),
                    rhs: Operand::Integer(1),
                    dest: Identifier::from("x"),
                }],
            ),
        ),
        (
            "FOR i 1 5 { PRINT i; END",
            Node::For {
                counter: Identifier::from("i"),
                start: 1,
                end: 5,
                step: 1,
                body: vec![Node::Print(slot("i"))],
            },
        ),
        (
            "FOR i 5 1 -2 { END;",
            Node::For {
                counter: Identifier::from("i"),
                start: 5,
                end: 1,
                step: -2,
                body: Vec::new(),
            },
        ),
        (
            "SWITCH x { CASE 1 { PRINT 1; } CASE 2 { PRINT 2; } DEFAULT { PRINT 3; } END",
            Node::Switch(
                slot("x"),
                vec![
                    Node::Case(1, vec![Node::Print(Operand::Integer(1))]),
                    Node::Case(2, vec![Node::Print(Operand::Integer(2))]),
                    Node::Default(vec![Node::Print(Operand::Integer(3))]),
                ],
            ),
        ),
        (
            "FUNC add2 a b { ADD a b s; RETURN s; END",
            Node::FuncDef(FuncDef {
                name: Identifier::from("add2"),
                params: vec![Identifier::from("a"), Identifier::from("b")],
                body: vec![
                    Node::BinaryOp {
                        op: BinaryOp::Add,
                        lhs: slot("a"),
                        rhs: slot("b"),
                        dest: Identifier::from("s"),
                    },
                    Node::Return(slot("s")),
                ],
            }),
        ),
    ];

    for (input, expected) in data {
        let input: Vec<char> = input.chars().collect();
        assert_eq!(stmt().parse(&input), Ok(expected));
    }
}

#[test]
fn test_program() {
    {
        let input = "FUNC down n { IF n { SUBTRACT n 1 m; CALL down m; } END LET x 3; CALL down x;";
        let stmts = parse(input).expect("Failed to parse");
        assert_eq!(stmts.len(), 3);
        assert_eq!(stmts[0].command(), "FUNC");
        assert_eq!(stmts[1].command(), "LET");
        assert_eq!(stmts[2].command(), "CALL");
    }

    {
        let data = vec![
            "",
            "   \n ",
            "LET x;",
            "LET 5 5;",
            "LET x 5",
            "LET END 5;",
            "PRINT 12ab;",
            "WHILE x { PRINT x; }",
            "FUNC f { PRINT 1;",
            "FOR i 1 5 0 { PRINT i; END",
            "SWITCH x { DEFAULT { } DEFAULT { } END",
            "FUNC f a a { END",
            "IF x { PRINT x; } ELSE",
            "PRINT 99999999999999999999;",
        ];

        for input in data {
            assert!(
                matches!(parse(input), Err(Error::Syntax(_))),
                "{:?} should not parse",
                input
            );
        }
    }
}

#[cfg(test)]
fn nested_ifs(depth: usize) -> String {
    format!("{}PRINT 1; {}", "IF 1 { ".repeat(depth), "} ".repeat(depth))
}

#[test]
fn test_block_nesting() {
    let data = vec![
        ("PRINT 1;", (0, 0)),
        ("IF x { PRINT 1; } IF x { }", (0, 1)),
        ("WHILE x { IF x {PRINT 1;} END", (0, 2)),
        ("FUNC f { SWITCH x { CASE 1 {", (3, 3)),
        ("LET ENDING 1;", (0, 0)),
        ("} {", (0, 0)),
    ];

    for (input, expected) in data {
        assert_eq!(block_nesting(input), expected, "{}", input);
    }
}

#[test]
fn test_nesting_limit() {
    let stmts = parse(&nested_ifs(MAX_NESTING)).expect("Failed to parse");
    assert_eq!(stmts.len(), 1);

    for depth in &[MAX_NESTING + 1, 2000] {
        assert!(
            matches!(parse(&nested_ifs(*depth)), Err(Error::Syntax(_))),
            "{} levels should not parse",
            depth
        );
    }
}

#[test]
fn test_unknown_commands() {
    let input = "frob 1; IF x { zap; } ELSE { PRINT 2; } 3 4; WHILE x { END CALL f -1->r;";
    assert_eq!(unknown_commands(input), vec!["frob", "zap"]);
    assert!(unknown_commands("LET x 1; FUNC f a { RETURN a; END").is_empty());
}
