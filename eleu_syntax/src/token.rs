use std::fmt::Display;

use crate::span::Span;

/// The enum variants are in SCREAMING_SNAKE_CASE as they technically
/// represent constants, but Rust does not allow const enum variants.
#[allow(nonstandard_style)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
    // Symbols
    LPAREN,
    RPAREN,
    LBRACE,
    RBRACE,
    LBRACKET,
    RBRACKET,
    COMMA,
    DOT,
    SEMICOLON,
    // Arithmetic
    BANG,
    MINUS,
    PLUS,
    SLASH,
    STAR,
    MODULO,
    // Comparisons
    BANG_EQUAL,
    EQUAL_EQUAL,
    GREATER,
    GREATER_EQUAL,
    LESS,
    LESS_EQUAL,
    // Literals
    IDENT,
    STRING,
    NUMBER,
    // Keywords
    AND,
    ASSERT,
    BREAK,
    CLASS,
    CONTINUE,
    ELSE,
    FALSE,
    FUN,
    FOR,
    IF,
    NIL,
    OR,
    REPEAT,
    RETURN,
    SUPER,
    THIS,
    TRUE,
    VAR,
    WHILE,
    // Miscellaneous tokens
    EQUAL,
    ERROR,
    EOF,
}

impl TokenKind {
    pub fn from_char(c: char) -> Option<Self> {
        let token = match c {
            '(' => Self::LPAREN,
            ')' => Self::RPAREN,
            '{' => Self::LBRACE,
            '}' => Self::RBRACE,
            '[' => Self::LBRACKET,
            ']' => Self::RBRACKET,
            ',' => Self::COMMA,
            '.' => Self::DOT,
            '-' => Self::MINUS,
            '+' => Self::PLUS,
            ';' => Self::SEMICOLON,
            '*' => Self::STAR,
            '%' => Self::MODULO,
            _ => return None,
        };
        Some(token)
    }

    pub fn from_keyword(kw: &str) -> Option<Self> {
        let token = match kw {
            "and" => Self::AND,
            "assert" => Self::ASSERT,
            "break" => Self::BREAK,
            "class" => Self::CLASS,
            "continue" => Self::CONTINUE,
            "else" => Self::ELSE,
            "false" => Self::FALSE,
            "fun" | "function" => Self::FUN,
            "for" => Self::FOR,
            "if" => Self::IF,
            "nil" => Self::NIL,
            "or" => Self::OR,
            "repeat" => Self::REPEAT,
            "return" => Self::RETURN,
            "super" => Self::SUPER,
            "this" => Self::THIS,
            "true" => Self::TRUE,
            "var" => Self::VAR,
            "while" => Self::WHILE,
            _ => return None,
        };
        Some(token)
    }

    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            Self::AND
                | Self::ASSERT
                | Self::BREAK
                | Self::CLASS
                | Self::CONTINUE
                | Self::ELSE
                | Self::FALSE
                | Self::FUN
                | Self::FOR
                | Self::IF
                | Self::NIL
                | Self::OR
                | Self::REPEAT
                | Self::RETURN
                | Self::SUPER
                | Self::THIS
                | Self::TRUE
                | Self::VAR
                | Self::WHILE
        )
    }
}

/// A scanned lexeme. For `ERROR` tokens the lexeme holds the
/// diagnostic message instead of source text.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub lexeme: String,
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.lexeme)
    }
}

impl Token {
    pub fn new(kind: TokenKind, span: Span, lexeme: String) -> Self {
        Self { kind, span, lexeme }
    }
}
