use std::fmt;

#[derive(Debug, PartialEq, Hash, PartialOrd, Ord, Eq, Clone)]
pub struct Identifier(pub String);

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Identifier(s.to_string())
    }
}

/// Something a statement reads: either a constant or a slot in the top frame
#[derive(Debug, PartialEq, Clone)]
pub enum Operand {
    Integer(i64),
    Slot(Identifier),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Integer(i) => write!(f, "{}", i),
            Operand::Slot(ident) => write!(f, "{}", ident),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOp {
    pub fn command(&self) -> &'static str {
        match self {
            BinaryOp::Add => "ADD",
            BinaryOp::Subtract => "SUBTRACT",
            BinaryOp::Multiply => "MULTIPLY",
            BinaryOp::Divide => "DIVIDE",
            BinaryOp::Modulo => "MODULO",
        }
    }

    pub fn from_command(cmd: &str) -> Option<Self> {
        Some(match cmd {
            "ADD" => BinaryOp::Add,
            "SUBTRACT" => BinaryOp::Subtract,
            "MULTIPLY" => BinaryOp::Multiply,
            "DIVIDE" => BinaryOp::Divide,
            "MODULO" => BinaryOp::Modulo,
            _ => return None,
        })
    }
}

/// A user function: formal parameters plus the statements of its body
#[derive(Debug, PartialEq, Clone)]
pub struct FuncDef {
    pub name: Identifier,
    pub params: Vec<Identifier>,
    pub body: Vec<Node>,
}

/// One statement of the language
///
/// Every node owns its children outright. Nothing is shared between subtrees, so dropping a node
/// drops exactly its subtree.
#[derive(Debug, PartialEq, Clone)]
pub enum Node {
    /// (value, children)
    Literal(i64, Vec<Node>),
    /// (dest, src)
    Let(Identifier, Operand),
    BinaryOp {
        op: BinaryOp,
        lhs: Operand,
        rhs: Operand,
        dest: Identifier,
    },
    Print(Operand),
    /// (condition, true_body, false_body)
    If(Operand, Vec<Node>, Vec<Node>),
    /// (condition, body)
    While(Operand, Vec<Node>),
    For {
        counter: Identifier,
        start: i64,
        end: i64,
        step: i64,
        body: Vec<Node>,
    },
    /// (subject, arms) where every arm is a `Case` or `Default`
    Switch(Operand, Vec<Node>),
    /// (value, body)
    Case(i64, Vec<Node>),
    Default(Vec<Node>),
    FuncDef(FuncDef),
    Call {
        name: Identifier,
        args: Vec<Operand>,
        dest: Option<Identifier>,
    },
    Return(Operand),
    /// (size, dest)
    Malloc(Operand, Identifier),
    Free(Operand),
    Retain(Operand),
    /// (handle, index, value)
    Store(Operand, Operand, Operand),
    /// (handle, index, dest)
    Load(Operand, Operand, Identifier),
}

impl Node {
    /// Name of the command that produces this node
    pub fn command(&self) -> &'static str {
        match self {
            Node::Literal(_, _) => "LITERAL",
            Node::Let(_, _) => "LET",
            Node::BinaryOp { op, .. } => op.command(),
            Node::Print(_) => "PRINT",
            Node::If(_, _, _) => "IF",
            Node::While(_, _) => "WHILE",
            Node::For { .. } => "FOR",
            Node::Switch(_, _) => "SWITCH",
            Node::Case(_, _) => "CASE",
            Node::Default(_) => "DEFAULT",
            Node::FuncDef(_) => "FUNC",
            Node::Call { .. } => "CALL",
            Node::Return(_) => "RETURN",
            Node::Malloc(_, _) => "MALLOC",
            Node::Free(_) => "FREE",
            Node::Retain(_) => "RETAIN",
            Node::Store(_, _, _) => "STORE",
            Node::Load(_, _, _) => "LOAD",
        }
    }
}
