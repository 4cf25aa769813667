use std::{fmt::Display, rc::Rc};

use crate::{span::Span, token::TokenKind};

/// Identifies a node whose scope distance the resolver records.
pub type NodeId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Bang,
    Minus,
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Bang => "!",
            Self::Minus => "-",
        })
    }
}

impl UnaryOp {
    pub fn from_token(t: TokenKind) -> Option<Self> {
        let op = match t {
            TokenKind::BANG => Self::Bang,
            TokenKind::MINUS => Self::Minus,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Slash,
    Star,
    Modulo,
    Plus,
    Minus,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    BangEqual,
    EqualEqual,
}

impl Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Slash => "/",
            Self::Star => "*",
            Self::Modulo => "%",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::BangEqual => "!=",
            Self::EqualEqual => "==",
        })
    }
}

impl BinOp {
    pub fn from_token(t: TokenKind) -> Option<Self> {
        let op = match t {
            TokenKind::SLASH => Self::Slash,
            TokenKind::STAR => Self::Star,
            TokenKind::MODULO => Self::Modulo,
            TokenKind::PLUS => Self::Plus,
            TokenKind::MINUS => Self::Minus,
            TokenKind::GREATER => Self::Greater,
            TokenKind::GREATER_EQUAL => Self::GreaterEqual,
            TokenKind::LESS => Self::Less,
            TokenKind::LESS_EQUAL => Self::LessEqual,
            TokenKind::BANG_EQUAL => Self::BangEqual,
            TokenKind::EQUAL_EQUAL => Self::EqualEqual,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl Display for LogicalOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::And => "and",
            Self::Or => "or",
        })
    }
}

impl LogicalOp {
    pub fn from_token(t: TokenKind) -> Option<Self> {
        let op = match t {
            TokenKind::AND => Self::And,
            TokenKind::OR => Self::Or,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Number(f64),
    Str(String),
    Boolean(bool),
    Nil,
}

impl Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&match self {
            Self::Nil => "nil".to_string(),
            Self::Number(n) => n.to_string(),
            Self::Str(s) => s.to_owned(),
            Self::Boolean(b) => b.to_string(),
        })
    }
}

/// A name reference that the resolver can bind to a scope distance.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Ident {
    pub name: String,
    pub id: NodeId,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    List(Vec<Expr>),
    Ident(Ident),
    Assignment {
        ident: Ident,
        value: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        lhs: Box<Expr>,
        op: BinOp,
        rhs: Box<Expr>,
    },
    Logical {
        lhs: Box<Expr>,
        op: LogicalOp,
        rhs: Box<Expr>,
    },
    Group(Box<Expr>),
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    FieldGet {
        object: Box<Expr>,
        field: String,
    },
    FieldSet {
        object: Box<Expr>,
        field: String,
        value: Box<Expr>,
    },
    This(Ident),
    /// `super.method`; the ident is the `super` binding itself.
    Super {
        ident: Ident,
        method: String,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionKind {
    Function,
    Method,
}

/// A function or method declaration. Runtime functions share it
/// through an `Rc`, and the VM caches one compiled chunk per `id`.
#[derive(Debug, PartialEq)]
pub struct FunctionDecl {
    pub id: NodeId,
    pub kind: FunctionKind,
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Item>,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    pub kind: ItemKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ItemKind {
    ExprStmt(Expr),
    VarDecl {
        name: String,
        init: Option<Expr>,
    },
    Block(Vec<Item>),
    IfStmt {
        condition: Expr,
        if_item: Box<Item>,
        else_item: Option<Box<Item>>,
    },
    /// Also the desugared form of `for`; `increment` runs after every
    /// iteration, including ones cut short by `continue`.
    WhileStmt {
        condition: Expr,
        body: Box<Item>,
        increment: Option<Expr>,
    },
    RepeatStmt {
        count: Expr,
        body: Box<Item>,
    },
    ReturnStmt(Option<Expr>),
    Break,
    Continue,
    /// `assert [break] expr ["message"];`
    Assert {
        expr: Expr,
        message: Option<String>,
        expect_error: bool,
    },
    Function(Rc<FunctionDecl>),
    Class {
        name: String,
        parent: Option<Ident>,
        methods: Vec<Rc<FunctionDecl>>,
    },
}

impl Item {
    pub fn new(kind: ItemKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Source {
    pub items: Vec<Item>,
}
