use std::rc::Rc;

use log::trace;

use crate::{
    error::ErrorMsg,
    span::Span,
    token::{Token, TokenKind},
};

#[derive(Debug)]
pub struct Lexer {
    file: Rc<str>,
    chars: Vec<char>,
    start: usize,
    current: usize,
    line: usize,
    col: usize,
    start_line: usize,
    start_col: usize,
}

impl Lexer {
    pub fn new(source: &str, file: &str) -> Self {
        Self {
            file: Rc::from(file),
            chars: source.chars().collect(),
            start: 0,
            current: 0,
            line: 1,
            col: 1,
            start_line: 1,
            start_col: 1,
        }
    }

    /// Scans the whole input. The returned stream always ends with
    /// either an `EOF` token or the first `ERROR` token.
    pub fn lex_all(mut self) -> Vec<Token> {
        let mut tokens: Vec<Token> = Vec::default();
        loop {
            let token = self.lex();
            let last = matches!(token.kind, TokenKind::EOF | TokenKind::ERROR);
            trace!("Lexed {:?} '{}' at {}", token.kind, token.lexeme, token.span);
            tokens.push(token);
            if last {
                break;
            }
        }
        tokens
    }

    pub fn lex(&mut self) -> Token {
        self.skip_whitespace();
        self.start = self.current;
        self.start_line = self.line;
        self.start_col = self.col;
        let Some(c) = self.advance() else {
            return Token::new(TokenKind::EOF, self.span(), "end of file".to_string());
        };
        match c {
            '!' => self.lookahead_for_token('=', TokenKind::BANG_EQUAL, TokenKind::BANG),
            '=' => self.lookahead_for_token('=', TokenKind::EQUAL_EQUAL, TokenKind::EQUAL),
            '>' => self.lookahead_for_token('=', TokenKind::GREATER_EQUAL, TokenKind::GREATER),
            '<' => self.lookahead_for_token('=', TokenKind::LESS_EQUAL, TokenKind::LESS),
            '/' => self.make_token(TokenKind::SLASH),
            '"' => self.lex_string(),
            _ => {
                if let Some(t) = TokenKind::from_char(c) {
                    self.make_token(t)
                } else if c.is_alphabetic() || c == '_' {
                    self.lex_ident()
                } else if c.is_ascii_digit() {
                    self.lex_number()
                } else {
                    self.error(ErrorMsg::UnexpectedChar)
                }
            }
        }
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                Some(' ' | '\t' | '\r' | '\n') => {
                    self.advance();
                }
                Some('/') if self.peek_next() == Some('/') => {
                    self.advance_while(|c| c != '\n');
                }
                _ => return,
            }
        }
    }

    fn lex_ident(&mut self) -> Token {
        self.advance_while(|c| c.is_alphanumeric() || c == '_');
        if let Some(t) = TokenKind::from_keyword(&self.lexeme_from_range()) {
            self.make_token(t)
        } else {
            self.make_token(TokenKind::IDENT)
        }
    }

    fn lex_number(&mut self) -> Token {
        self.advance_while(|c| c.is_ascii_digit());
        // A fractional part needs at least one digit after the dot
        if self.peek() == Some('.') && self.peek_next().filter(char::is_ascii_digit).is_some() {
            self.advance();
            self.advance_while(|c| c.is_ascii_digit());
        }
        self.make_token(TokenKind::NUMBER)
    }

    fn lex_string(&mut self) -> Token {
        self.advance_while(|c| c != '"');
        if self.advance_if(|c| c == '"').is_none() {
            return self.error(ErrorMsg::UnterminatedString);
        }
        // The lexeme excludes the surrounding quotes
        let text = self.chars[self.start + 1..self.current - 1]
            .iter()
            .collect::<String>();
        Token::new(TokenKind::STRING, self.span(), text)
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.span(), self.lexeme_from_range())
    }

    fn lexeme_from_range(&self) -> String {
        self.chars[self.start..self.current].iter().collect()
    }

    fn span(&self) -> Span {
        Span::new(
            self.file.clone(),
            self.start_line,
            self.start_col,
            self.line,
            self.col,
        )
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.current).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.chars.get(self.current + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.current += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn advance_if<F>(&mut self, cond: F) -> Option<char>
    where
        F: FnOnce(char) -> bool,
    {
        if self.peek().filter(|&c| cond(c)).is_some() {
            self.advance()
        } else {
            None
        }
    }

    fn advance_while<F>(&mut self, cond: F) -> Option<usize>
    where
        F: Fn(char) -> bool,
    {
        let mut count: usize = 0;
        while self.peek().filter(|&c| cond(c)).is_some() {
            count += 1;
            self.advance();
        }
        count.ne(&0).then_some(count)
    }

    fn lookahead_for_token(
        &mut self,
        match_char: char,
        if_match: TokenKind,
        no_match: TokenKind,
    ) -> Token {
        if self.advance_if(|c| c == match_char).is_some() {
            self.make_token(if_match)
        } else {
            self.make_token(no_match)
        }
    }

    fn error(&self, msg: ErrorMsg) -> Token {
        Token::new(TokenKind::ERROR, self.span(), msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_kinds(input: &str) -> Vec<TokenKind> {
        Lexer::new(input, "test")
            .lex_all()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn operators() {
        assert_eq!(
            lex_kinds("( ) { } [ ] , ; . - + / * % ! != = == < <= > >="),
            vec![
                TokenKind::LPAREN,
                TokenKind::RPAREN,
                TokenKind::LBRACE,
                TokenKind::RBRACE,
                TokenKind::LBRACKET,
                TokenKind::RBRACKET,
                TokenKind::COMMA,
                TokenKind::SEMICOLON,
                TokenKind::DOT,
                TokenKind::MINUS,
                TokenKind::PLUS,
                TokenKind::SLASH,
                TokenKind::STAR,
                TokenKind::MODULO,
                TokenKind::BANG,
                TokenKind::BANG_EQUAL,
                TokenKind::EQUAL,
                TokenKind::EQUAL_EQUAL,
                TokenKind::LESS,
                TokenKind::LESS_EQUAL,
                TokenKind::GREATER,
                TokenKind::GREATER_EQUAL,
                TokenKind::EOF,
            ]
        );
    }

    #[test]
    fn keywords_and_idents() {
        assert_eq!(
            lex_kinds("fun function repeat return retur _x1 nil"),
            vec![
                TokenKind::FUN,
                TokenKind::FUN,
                TokenKind::REPEAT,
                TokenKind::RETURN,
                TokenKind::IDENT,
                TokenKind::IDENT,
                TokenKind::NIL,
                TokenKind::EOF,
            ]
        );
    }

    #[test]
    fn numbers() {
        let tokens = Lexer::new("12.5 7. 3", "test").lex_all();
        let lexemes: Vec<&str> = tokens.iter().map(|t| t.lexeme.as_str()).collect();
        assert_eq!(lexemes, vec!["12.5", "7", ".", "3", "end of file"]);
    }

    #[test]
    fn comments_and_spans() {
        let tokens = Lexer::new("// header\n  var x;", "a.eleu").lex_all();
        assert_eq!(tokens[0].kind, TokenKind::VAR);
        assert_eq!(tokens[0].span.to_string(), "a.eleu(2,3,2,6)");
        assert_eq!(tokens[1].span.to_string(), "a.eleu(2,7,2,8)");
    }

    #[test]
    fn multiline_string() {
        let tokens = Lexer::new("\"a\nb\" x", "s").lex_all();
        assert_eq!(tokens[0].kind, TokenKind::STRING);
        assert_eq!(tokens[0].lexeme, "a\nb");
        assert_eq!(tokens[0].span.to_string(), "s(1,1,2,3)");
        assert_eq!(tokens[1].span.line_start, 2);
    }

    #[test]
    fn unterminated_string() {
        let tokens = Lexer::new("var s = \"abc", "s").lex_all();
        let last = tokens.last().unwrap();
        assert_eq!(last.kind, TokenKind::ERROR);
        assert_eq!(last.lexeme, ErrorMsg::UnterminatedString.to_string());
    }

    #[test]
    fn stops_at_first_error() {
        assert_eq!(
            lex_kinds("a # b"),
            vec![TokenKind::IDENT, TokenKind::ERROR]
        );
    }
}
