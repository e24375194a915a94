//! Text encoding of syntax trees and saved interpreter state.
//!
//! Each node is written depth first as one record:
//!
//!     <COMMAND> <value> <operand count> <operands...> <child count>
//!
//! followed by its children. Operands are integers or identifiers. A state file is a run of
//! `FUNC` records, one per defined function, then a `LET` record per global variable.
//!
//! There is no version field, so any change to the record layout breaks old files.

use std::convert::TryFrom;
use std::str::{FromStr, SplitWhitespace};

use crate::lang::ast::*;
use crate::lang::error::{Error, Result};
use crate::lang::functions::FunctionTable;
use crate::lang::opcodes::is_keyword;
use crate::lang::parse::MAX_NESTING;
use crate::lang::variables::Frame;

/// Deepest node `deserialize` will rebuild, counting a top-level statement as 0
///
/// A statement inside the most blocks the parser accepts sits at `MAX_NESTING`, and a bare
/// literal's leaves sit one level below that.
const MAX_NODE_NESTING: usize = MAX_NESTING + 1;

/// Everything a state file restores
#[derive(Debug, PartialEq)]
pub struct State {
    pub functions: Vec<FuncDef>,
    pub globals: Vec<(Identifier, i64)>,
}

fn slot_tokens(idents: &[Identifier]) -> impl Iterator<Item = String> + '_ {
    idents.iter().map(|i| i.to_string())
}

fn write_node(out: &mut String, node: &Node) {
    let mut value = 0;
    let mut operands: Vec<String> = Vec::new();
    let mut children: Vec<&Node> = Vec::new();

    match node {
        Node::Literal(v, leaves) => {
            value = *v;
            children.extend(leaves);
        }
        Node::Let(dest, src) => operands.extend(vec![dest.to_string(), src.to_string()]),
        Node::BinaryOp { lhs, rhs, dest, .. } => {
            operands.extend(vec![lhs.to_string(), rhs.to_string(), dest.to_string()])
        }
        Node::Print(src) | Node::Return(src) | Node::Free(src) | Node::Retain(src) => {
            operands.push(src.to_string())
        }
        Node::If(cond, true_body, false_body) => {
            value = true_body.len() as i64;
            operands.push(cond.to_string());
            children.extend(true_body.iter().chain(false_body));
        }
        Node::While(cond, body) | Node::Switch(cond, body) => {
            operands.push(cond.to_string());
            children.extend(body);
        }
        Node::For {
            counter,
            start,
            end,
            step,
            body,
        } => {
            operands.extend(vec![
                counter.to_string(),
                start.to_string(),
                end.to_string(),
                step.to_string(),
            ]);
            children.extend(body);
        }
        Node::Case(v, body) => {
            value = *v;
            children.extend(body);
        }
        Node::Default(body) => children.extend(body),
        Node::FuncDef(func) => {
            operands.push(func.name.to_string());
            operands.extend(slot_tokens(&func.params));
            children.extend(&func.body);
        }
        Node::Call { name, args, dest } => {
            operands.push(name.to_string());
            operands.extend(args.iter().map(|a| a.to_string()));
            if let Some(dest) = dest {
                value = 1;
                operands.push(dest.to_string());
            }
        }
        Node::Malloc(size, dest) => operands.extend(vec![size.to_string(), dest.to_string()]),
        Node::Store(handle, index, src) => {
            operands.extend(vec![handle.to_string(), index.to_string(), src.to_string()])
        }
        Node::Load(handle, index, dest) => {
            operands.extend(vec![handle.to_string(), index.to_string(), dest.to_string()])
        }
    }

    let mut record = vec![
        node.command().to_string(),
        value.to_string(),
        operands.len().to_string(),
    ];
    record.extend(operands);
    record.push(children.len().to_string());
    out.push_str(&record.join(" "));
    out.push('\n');

    for child in children {
        write_node(out, child);
    }
}

pub fn serialize(node: &Node) -> Vec<u8> {
    let mut out = String::new();
    write_node(&mut out, node);

    out.into_bytes()
}

pub fn serialize_all(nodes: &[Node]) -> Vec<u8> {
    nodes.iter().flat_map(serialize).collect()
}

fn corrupt<S: Into<String>>(msg: S) -> Error {
    Error::CorruptState(msg.into())
}

/// Pulls records back out of a token stream
struct Reader<'s> {
    tokens: SplitWhitespace<'s>,
}

impl<'s> Reader<'s> {
    fn new(bytes: &'s [u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| corrupt(e.to_string()))?;

        Ok(Reader {
            tokens: text.split_whitespace(),
        })
    }

    fn token(&mut self, what: &str) -> Result<&'s str> {
        self.tokens
            .next()
            .ok_or_else(|| corrupt(format!("truncated stream, expected {}", what)))
    }

    fn integer(&mut self, what: &str) -> Result<i64> {
        let tok = self.token(what)?;
        i64::from_str(tok).map_err(|_| corrupt(format!("bad {} '{}'", what, tok)))
    }

    fn count(&mut self, what: &str) -> Result<usize> {
        let tok = self.token(what)?;
        usize::from_str(tok).map_err(|_| corrupt(format!("bad {} '{}'", what, tok)))
    }

    fn operand(&mut self) -> Result<Operand> {
        let tok = self.token("operand")?;
        if tok.starts_with(|c: char| c == '-' || c.is_ascii_digit()) {
            return i64::from_str(tok)
                .map(Operand::Integer)
                .map_err(|_| corrupt(format!("bad integer operand '{}'", tok)));
        }

        let valid = tok.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
            && tok.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(corrupt(format!("bad identifier '{}'", tok)));
        }
        if is_keyword(tok) {
            return Err(corrupt(format!("reserved word '{}' used as a name", tok)));
        }

        Ok(Operand::Slot(Identifier(tok.to_string())))
    }

    fn node(&mut self, nesting: usize) -> Result<Node> {
        if nesting > MAX_NODE_NESTING {
            return Err(corrupt("tree nested too deeply"));
        }

        let command = self.token("command")?;
        let value = self.integer("value")?;
        let operand_count = self.count("operand count")?;
        let operands = (0..operand_count)
            .map(|_| self.operand())
            .collect::<Result<Vec<Operand>>>()?;
        let child_count = self.count("child count")?;
        let children = (0..child_count)
            .map(|_| self.node(nesting + 1))
            .collect::<Result<Vec<Node>>>()?;

        build(command, value, operands, children)
    }

    fn is_empty(&self) -> bool {
        self.tokens.clone().next().is_none()
    }
}

fn slot(command: &str, operand: Operand) -> Result<Identifier> {
    match operand {
        Operand::Slot(ident) => Ok(ident),
        Operand::Integer(i) => Err(corrupt(format!("{} expects a name, found {}", command, i))),
    }
}

fn integer(command: &str, operand: Operand) -> Result<i64> {
    match operand {
        Operand::Integer(i) => Ok(i),
        Operand::Slot(ident) => Err(corrupt(format!(
            "{} expects an integer, found {}",
            command, ident
        ))),
    }
}

fn operands<const N: usize>(command: &str, operands: Vec<Operand>) -> Result<[Operand; N]> {
    let got = operands.len();
    <[Operand; N]>::try_from(operands)
        .map_err(|_| corrupt(format!("{} takes {} operands, found {}", command, N, got)))
}

fn leaf(command: &str, value: i64, children: &[Node]) -> Result<()> {
    if value != 0 || !children.is_empty() {
        return Err(corrupt(format!("{} cannot have a value or children", command)));
    }

    Ok(())
}

/// Check a decoded record has the right shape for its command and turn it into a node
fn build(command: &str, value: i64, ops: Vec<Operand>, children: Vec<Node>) -> Result<Node> {
    if let Some(op) = BinaryOp::from_command(command) {
        leaf(command, value, &children)?;
        let [lhs, rhs, dest] = operands::<3>(command, ops)?;
        return Ok(Node::BinaryOp {
            op,
            lhs,
            rhs,
            dest: slot(command, dest)?,
        });
    }

    let node = match command {
        "LITERAL" => {
            let [] = operands::<0>(command, ops)?;
            if !children
                .iter()
                .all(|c| matches!(c, Node::Literal(_, leaves) if leaves.is_empty()))
            {
                return Err(corrupt("LITERAL children must be plain literals"));
            }
            Node::Literal(value, children)
        }
        "LET" => {
            leaf(command, value, &children)?;
            let [dest, src] = operands::<2>(command, ops)?;
            Node::Let(slot(command, dest)?, src)
        }
        "PRINT" => {
            leaf(command, value, &children)?;
            let [src] = operands::<1>(command, ops)?;
            Node::Print(src)
        }
        "IF" => {
            let [cond] = operands::<1>(command, ops)?;
            let split = usize::try_from(value)
                .ok()
                .filter(|&n| n <= children.len())
                .ok_or_else(|| corrupt(format!("IF branch length {} out of range", value)))?;
            let mut true_body = children;
            let false_body = true_body.split_off(split);
            Node::If(cond, true_body, false_body)
        }
        "WHILE" => {
            let [cond] = operands::<1>(command, ops)?;
            Node::While(cond, children)
        }
        "FOR" => {
            let [counter, start, end, step] = operands::<4>(command, ops)?;
            let step = integer(command, step)?;
            if step == 0 {
                return Err(corrupt("FOR step must not be zero"));
            }
            Node::For {
                counter: slot(command, counter)?,
                start: integer(command, start)?,
                end: integer(command, end)?,
                step,
                body: children,
            }
        }
        "SWITCH" => {
            let [subject] = operands::<1>(command, ops)?;
            let mut defaults = 0;
            for arm in &children {
                match arm {
                    Node::Case(_, _) => (),
                    Node::Default(_) => defaults += 1,
                    _ => return Err(corrupt("SWITCH arms must be CASE or DEFAULT")),
                }
            }
            if defaults > 1 {
                return Err(corrupt("SWITCH has more than one DEFAULT"));
            }
            Node::Switch(subject, children)
        }
        "CASE" => {
            let [] = operands::<0>(command, ops)?;
            Node::Case(value, children)
        }
        "DEFAULT" => {
            let [] = operands::<0>(command, ops)?;
            Node::Default(children)
        }
        "FUNC" => {
            let mut ops = ops.into_iter();
            let name = ops
                .next()
                .ok_or_else(|| corrupt("FUNC without a name"))
                .and_then(|op| slot(command, op))?;
            let params = ops
                .map(|op| slot(command, op))
                .collect::<Result<Vec<Identifier>>>()?;
            for (i, param) in params.iter().enumerate() {
                if params[..i].contains(param) {
                    return Err(corrupt(format!(
                        "duplicate parameter '{}' in FUNC {}",
                        param, name
                    )));
                }
            }
            Node::FuncDef(FuncDef {
                name,
                params,
                body: children,
            })
        }
        "CALL" => {
            if !children.is_empty() {
                return Err(corrupt("CALL cannot have children"));
            }
            let mut ops = ops;
            let dest = match value {
                0 => None,
                1 => Some(
                    ops.pop()
                        .ok_or_else(|| corrupt("CALL without a destination"))?,
                ),
                _ => return Err(corrupt(format!("bad CALL flag {}", value))),
            };
            let dest = dest.map(|d| slot(command, d)).transpose()?;
            if ops.is_empty() {
                return Err(corrupt("CALL without a name"));
            }
            let args = ops.split_off(1);
            let name = ops
                .pop()
                .ok_or_else(|| corrupt("CALL without a name"))
                .and_then(|op| slot(command, op))?;
            Node::Call { name, args, dest }
        }
        "RETURN" => {
            leaf(command, value, &children)?;
            let [src] = operands::<1>(command, ops)?;
            Node::Return(src)
        }
        "MALLOC" => {
            leaf(command, value, &children)?;
            let [size, dest] = operands::<2>(command, ops)?;
            Node::Malloc(size, slot(command, dest)?)
        }
        "FREE" => {
            leaf(command, value, &children)?;
            let [handle] = operands::<1>(command, ops)?;
            Node::Free(handle)
        }
        "RETAIN" => {
            leaf(command, value, &children)?;
            let [handle] = operands::<1>(command, ops)?;
            Node::Retain(handle)
        }
        "STORE" => {
            leaf(command, value, &children)?;
            let [handle, index, src] = operands::<3>(command, ops)?;
            Node::Store(handle, index, src)
        }
        "LOAD" => {
            leaf(command, value, &children)?;
            let [handle, index, dest] = operands::<3>(command, ops)?;
            Node::Load(handle, index, slot(command, dest)?)
        }
        _ => return Err(corrupt(format!("unknown command '{}'", command))),
    };

    Ok(node)
}

/// Rebuild exactly one node from `bytes`
pub fn deserialize(bytes: &[u8]) -> Result<Node> {
    let mut reader = Reader::new(bytes)?;
    let node = reader.node(0)?;
    if !reader.is_empty() {
        return Err(corrupt("trailing data after node"));
    }

    Ok(node)
}

/// Rebuild every node in `bytes`
pub fn deserialize_all(bytes: &[u8]) -> Result<Vec<Node>> {
    let mut reader = Reader::new(bytes)?;
    let mut nodes = Vec::new();
    while !reader.is_empty() {
        nodes.push(reader.node(0)?);
    }

    Ok(nodes)
}

pub fn save_state(functions: &FunctionTable, globals: &Frame) -> Vec<u8> {
    let mut nodes: Vec<Node> = functions.iter().cloned().map(Node::FuncDef).collect();
    nodes.extend(
        globals
            .iter()
            .map(|(ident, val)| Node::Let(ident.clone(), Operand::Integer(*val))),
    );

    serialize_all(&nodes)
}

/// Decode a state file without touching any interpreter
pub fn load_state(bytes: &[u8]) -> Result<State> {
    let mut state = State {
        functions: Vec::new(),
        globals: Vec::new(),
    };

    for node in deserialize_all(bytes)? {
        match node {
            Node::FuncDef(func) => state.functions.push(func),
            Node::Let(ident, Operand::Integer(val)) => state.globals.push((ident, val)),
            other => {
                return Err(corrupt(format!(
                    "unexpected {} record in state",
                    other.command()
                )))
            }
        }
    }

    Ok(state)
}

#[test]
fn test_round_trip() {
    use crate::lang::parse::parse;

    let program = "LET x 5; ADD x -1 y; PRINT y; 1 2 3; frob 4;
        IF x { PRINT 1; } ELSE { PRINT 2; PRINT 3; }
        IF x { }
        WHILE x { SUBTRACT x 1 x; END
        FOR i 10 1 -3 { PRINT i; END
        SWITCH x { CASE -1 { PRINT 1; } DEFAULT { } CASE 2 { PRINT 2; } END
        FUNC f a b { IF a { RETURN b; } CALL f 0 b -> r; RETURN r; END
        CALL f 1 x; CALL f 1 2 -> z;
        MALLOC 4 p; STORE p 0 x; LOAD p 0 q; RETAIN p; FREE p;";

    for node in parse(program).expect("Failed to parse") {
        let bytes = serialize(&node);
        assert_eq!(deserialize(&bytes).expect("Failed to deserialize"), node);
    }
}

#[test]
fn test_record_layout() {
    use crate::lang::parse::parse;

    let stmts = parse("IF x { PRINT 7; } ELSE { CALL f 1 -> r; }").expect("Failed to parse");
    let text = String::from_utf8(serialize(&stmts[0])).expect("not utf-8");
    assert_eq!(text, "IF 1 1 x 2\nPRINT 0 1 7 0\nCALL 1 3 f 1 r 0\n");
}

#[test]
fn test_deepest_tree() {
    use crate::lang::parse::parse;

    // A bare literal's leaves are the deepest nodes the parser can produce
    let depth = MAX_NESTING;
    let program = format!("{}1 2; {}", "IF 1 { ".repeat(depth), "} ".repeat(depth));
    let stmts = parse(&program).expect("Failed to parse");
    let bytes = serialize(&stmts[0]);
    assert_eq!(deserialize(&bytes).expect("Failed to deserialize"), stmts[0]);

    // One more level than that is refused
    let mut deeper = String::new();
    for _ in 0..=depth {
        deeper.push_str("IF 0 1 1 1\n");
    }
    deeper.push_str("LITERAL 1 0 1\nLITERAL 2 0 0\n");
    assert!(matches!(
        deserialize(deeper.as_bytes()),
        Err(Error::CorruptState(_))
    ));
}

#[test]
fn test_corrupt() {
    let data = vec![
        "",
        "PRINT 0 1",
        "PRINT 0 1 x",
        "PRINT 0 x 1 0",
        "PRINT 0 2 x y 0",
        "PRINT 0 1 x 0 PRINT",
        "LET 0 2 5 5 0",
        "IF 3 1 x 1 PRINT 0 1 x 0",
        "SWITCH 0 1 x 1 PRINT 0 1 x 0",
        "FOR 0 4 i 1 5 0 0",
        "CALL 0 0 0",
        "CALL 1 0 0",
        "CALL 2 2 f r 0",
        "WHILE 0 1 x 99999",
        "JUMP 0 0 0",
        "LITERAL 1 0 1 PRINT 0 1 x 0",
        "PRINT 0 1 x! 0",
        "PRINT 0 1 END 0",
        "FUNC 0 1 LET 0",
        "FUNC 0 2 f ELSE 0",
        "FUNC 0 3 f a a 0",
    ];

    for input in data {
        assert!(
            matches!(deserialize(input.as_bytes()), Err(Error::CorruptState(_))),
            "{:?} should not deserialize",
            input
        );
    }

    assert!(matches!(
        deserialize(&[0xff, 0xfe]),
        Err(Error::CorruptState(_))
    ));
}

#[test]
fn test_state() {
    use crate::lang::parse::parse;

    let mut functions = FunctionTable::new();
    let stmts = parse("FUNC g { RETURN 2; END FUNC f a { RETURN a; END").expect("Failed to parse");
    functions.register_from(&stmts);
    let mut globals = Frame::new();
    globals.insert(Identifier::from("x"), 3);
    globals.insert(Identifier::from("a"), -1);

    let state = load_state(&save_state(&functions, &globals)).expect("Failed to load");
    let names: Vec<String> = state.functions.iter().map(|f| f.name.to_string()).collect();
    assert_eq!(names, vec!["f", "g"]);
    assert_eq!(
        state.globals,
        vec![(Identifier::from("a"), -1), (Identifier::from("x"), 3)]
    );

    assert!(load_state(b"PRINT 0 1 x 0").is_err());
    assert!(load_state(b"LET 0 2 x y 0").is_err());
    assert_eq!(
        load_state(b"").expect("Failed to load"),
        State {
            functions: Vec::new(),
            globals: Vec::new()
        }
    );
}
