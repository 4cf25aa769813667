use std::fmt::Display;

use crate::span::Span;

/// A lexical or syntactic diagnostic.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{span}: {msg}")]
pub struct Error {
    pub span: Span,
    pub msg: String,
}

impl Error {
    pub fn new(span: Span, msg: impl Display) -> Self {
        Self {
            span,
            msg: msg.to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ErrorMsg {
    // Lex errors
    UnexpectedChar,
    UnterminatedString,
    // Parse errors
    ExpectedExpression,
    ElseWithoutIf,
    InvalidIdent,
    InvalidAssignment,
    InvalidStatement,
    InvalidNumber,
    KeywordAsName,
    DeclarationInBody,
    EmptyBody,
    TooManyParams,
    TooManyArgs,
    MissingSemicolon,
    MissingDot,
    MissingOpeningParen,
    MissingClosingParen,
    MissingOpeningBrace,
    MissingClosingBrace,
    MissingClosingBracket,
    MissingSuperclass,
}

impl Display for ErrorMsg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::UnexpectedChar => "unexpected character",
            Self::UnterminatedString => "unterminated string",
            Self::ExpectedExpression => "expression expected",
            Self::ElseWithoutIf => "'else' without a matching 'if'",
            Self::InvalidIdent => "expected identifier",
            Self::InvalidAssignment => "invalid assignment target",
            Self::InvalidStatement => {
                "only variable assignments 'name = ...' or function calls 'name(...)' may be used as statements"
            }
            Self::InvalidNumber => "number literal is out of range",
            Self::KeywordAsName => "a keyword cannot be used as a name",
            Self::DeclarationInBody => "a declaration is not allowed here, wrap it in a block",
            Self::EmptyBody => "a ';' directly after ')' leaves the body empty",
            Self::TooManyParams => "a function cannot have more than 255 parameters",
            Self::TooManyArgs => "a call cannot have more than 255 arguments",
            Self::MissingSemicolon => "expected ';'",
            Self::MissingDot => "expected '.' after 'super'",
            Self::MissingOpeningParen => "expected '('",
            Self::MissingClosingParen => "expected ')'",
            Self::MissingOpeningBrace => "expected '{'",
            Self::MissingClosingBrace => "expected '}'",
            Self::MissingClosingBracket => "expected ']'",
            Self::MissingSuperclass => "expected superclass name",
        })
    }
}
