pub mod builtins;
pub mod eval;
pub mod frame;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod signature;

use std::rc::Rc;

use crate::errors::Result;
use signature::Signature;

/// A JSONata AST node: a kind, the source offset it came from, and the
/// keep-array marker set by `[]`.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub position: usize,
    /// Disable singleton collapse for the sequence this node produces.
    pub keep_array: bool,
}

impl Node {
    pub fn new(kind: NodeKind, position: usize) -> Self {
        Self {
            kind,
            position,
            keep_array: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    // Literals
    Number(f64),
    String(String),
    Bool(bool),
    Null,
    Regex(Rc<regex::Regex>),

    // Navigation
    Name(String),
    Variable(String), // "" is the focus `$`, "$" is the root `$$`
    Wildcard,
    Descendant,
    Parent,
    Path(Vec<Node>),
    /// `lhs[pred]` — predicate or positional filter.
    Filter {
        lhs: Box<Node>,
        pred: Box<Node>,
    },
    /// `lhs@$var` — bind each item of lhs while the focus stays put.
    ContextBind {
        lhs: Box<Node>,
        var: String,
    },
    /// `lhs#$var` — bind the positional index of each item.
    IndexBind {
        lhs: Box<Node>,
        var: String,
    },

    // Operators
    Binary {
        op: BinaryOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    UnaryMinus(Box<Node>),

    // Constructors
    ArrayCtor(Vec<Node>),
    ObjectCtor(Vec<(Node, Node)>),
    /// `lhs{key: value, …}` — aggregation/grouping over the lhs sequence.
    GroupBy {
        lhs: Box<Node>,
        pairs: Vec<(Node, Node)>,
    },

    // Control
    Block(Vec<Node>),
    Bind {
        name: String,
        value: Box<Node>,
    },
    Condition {
        cond: Box<Node>,
        then: Box<Node>,
        els: Option<Box<Node>>,
    },

    // Functions
    Lambda {
        params: Vec<String>,
        signature: Option<Signature>,
        body: Rc<Node>,
    },
    Call {
        proc: Box<Node>,
        args: Vec<Node>,
    },
    Partial {
        proc: Box<Node>,
        args: Vec<Node>,
    },
    Placeholder,

    // Postfix constructs
    Sort {
        lhs: Box<Node>,
        terms: Vec<SortTerm>,
    },
    Transform {
        pattern: Rc<Node>,
        update: Rc<Node>,
        delete: Option<Rc<Node>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Concat,
    And,
    Or,
    In,
    Range,
    /// `~>` function application chain.
    Apply,
}

#[derive(Debug, Clone)]
pub struct SortTerm {
    pub expr: Node,
    pub descending: bool,
}

/// Parse a JSONata expression into an AST.
pub fn parse(source: &str) -> Result<Node> {
    parser::Parser::new(source).parse()
}
