use std::{fmt::Display, rc::Rc};

use log::trace;

use crate::{
    ast::{
        BinOp, Expr, ExprKind, FunctionDecl, FunctionKind, Ident, Item, ItemKind, Literal,
        LogicalOp, NodeId, Source, UnaryOp,
    },
    error::{Error, ErrorMsg},
    span::Span,
    stack::ensure_sufficient_stack,
    token::{Token, TokenKind},
};

const MAX_ARGS: usize = 255;

#[derive(Debug)]
pub struct Parser<'a> {
    tokens: &'a [Token],
    current: usize,
    next_id: NodeId,
    errors: Vec<Error>,
    stop_at_first_error: bool,
}

impl<'a> Parser<'a> {
    /// `tokens` is expected to be the output of `Lexer::lex_all`, which
    /// always ends with an `EOF` or `ERROR` token.
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            current: 0,
            next_id: 0,
            errors: Vec::default(),
            stop_at_first_error: false,
        }
    }

    /// Abort on the first syntax error instead of synchronizing to the
    /// next statement and collecting every error.
    pub fn stop_at_first_error(mut self, stop: bool) -> Self {
        self.stop_at_first_error = stop;
        self
    }

    pub fn parse_all(mut self) -> Result<Source, Vec<Error>> {
        if self.tokens.is_empty() {
            return Ok(Source::default());
        }
        let mut items: Vec<Item> = Vec::default();
        while !self.is_at_end() {
            match self.parse_declaration() {
                Ok(Some(item)) => items.push(item),
                Ok(None) => (),
                Err(e) => {
                    self.errors.push(e);
                    break;
                }
            }
        }
        // A lexical error that no parse error has reported yet
        if self.errors.is_empty() || !self.stop_at_first_error {
            let last = self.peek();
            if last.kind == TokenKind::ERROR {
                self.errors.push(Error::new(last.span.clone(), &last.lexeme));
            }
        }
        self.errors.dedup();
        trace!("Parsed {} items with {} errors", items.len(), self.errors.len());

        let errors = self.errors;
        errors.is_empty().then(|| Source { items }).ok_or(errors)
    }

    /// Parses one declaration. In recovering mode the error is recorded,
    /// the stream is synchronized and `None` is returned.
    fn parse_declaration(&mut self) -> Result<Option<Item>, Error> {
        match ensure_sufficient_stack(|| self.parse_item()) {
            Ok(item) => Ok(Some(item)),
            Err(e) if self.stop_at_first_error => Err(e),
            Err(e) => {
                self.errors.push(e);
                self.sync();
                Ok(None)
            }
        }
    }

    fn parse_item(&mut self) -> Result<Item, Error> {
        match self.peek().kind {
            TokenKind::FUN => {
                let start = self.advance().span.clone();
                let decl = self.parse_function(FunctionKind::Function, start)?;
                let span = decl.span.clone();
                Ok(Item::new(ItemKind::Function(decl), span))
            }
            TokenKind::CLASS => self.parse_class(),
            TokenKind::VAR => self.parse_var_decl(),
            _ => self.parse_stmt(),
        }
    }

    fn parse_stmt(&mut self) -> Result<Item, Error> {
        ensure_sufficient_stack(|| self.parse_stmt_kind())
    }

    fn parse_stmt_kind(&mut self) -> Result<Item, Error> {
        match self.peek().kind {
            TokenKind::ASSERT => self.parse_assert(),
            TokenKind::LBRACE => {
                let start = self.advance().span.clone();
                let items = self.parse_block_items()?;
                Ok(Item::new(ItemKind::Block(items), self.span_from(&start)))
            }
            TokenKind::FOR => self.parse_for_stmt(),
            TokenKind::IF => self.parse_if_stmt(),
            TokenKind::RETURN => self.parse_return(),
            TokenKind::WHILE => self.parse_while_stmt(),
            TokenKind::REPEAT => self.parse_repeat_stmt(),
            TokenKind::BREAK | TokenKind::CONTINUE => {
                let token = self.advance();
                let kind = if token.kind == TokenKind::BREAK {
                    ItemKind::Break
                } else {
                    ItemKind::Continue
                };
                self.advance_or_err(TokenKind::SEMICOLON, ErrorMsg::MissingSemicolon)?;
                Ok(Item::new(kind, self.span_from(&token.span)))
            }
            _ => self.parse_expr_stmt(true),
        }
    }

    fn parse_var_decl(&mut self) -> Result<Item, Error> {
        // Consume the `var` keyword
        let start = self.advance().span.clone();
        let t = self.peek();
        if t.kind.is_keyword() {
            let msg = format!("{} ('{}')", ErrorMsg::KeywordAsName, t.lexeme);
            return Err(self.error(t.span.clone(), msg));
        }
        let name = self.advance_or_err(TokenKind::IDENT, ErrorMsg::InvalidIdent)?;
        let init = if self.advance_if(|t| t.kind == TokenKind::EQUAL).is_some() {
            Some(self.parse_expr()?)
        } else {
            None
        };
        self.advance_or_err(TokenKind::SEMICOLON, ErrorMsg::MissingSemicolon)?;

        Ok(Item::new(
            ItemKind::VarDecl {
                name: name.lexeme.clone(),
                init,
            },
            self.span_from(&start),
        ))
    }

    fn parse_assert(&mut self) -> Result<Item, Error> {
        // Consume the `assert` keyword
        let start = self.advance().span.clone();
        let expect_error = self.advance_if(|t| t.kind == TokenKind::BREAK).is_some();
        let expr = self.parse_expr()?;
        let message = self
            .advance_if(|t| t.kind == TokenKind::STRING)
            .map(|t| t.lexeme.clone());
        self.advance_or_err(TokenKind::SEMICOLON, ErrorMsg::MissingSemicolon)?;

        Ok(Item::new(
            ItemKind::Assert {
                expr,
                message,
                expect_error,
            },
            self.span_from(&start),
        ))
    }

    fn parse_if_stmt(&mut self) -> Result<Item, Error> {
        // Consume the `if` keyword
        let start = self.advance().span.clone();
        let condition = self.parse_condition()?;
        self.check_body(true)?;
        let if_item = self.parse_stmt()?;
        let else_item = if self.advance_if(|t| t.kind == TokenKind::ELSE).is_some() {
            self.check_body(false)?;
            Some(Box::new(self.parse_stmt()?))
        } else {
            None
        };

        Ok(Item::new(
            ItemKind::IfStmt {
                condition,
                if_item: Box::new(if_item),
                else_item,
            },
            self.span_from(&start),
        ))
    }

    fn parse_while_stmt(&mut self) -> Result<Item, Error> {
        // Consume the `while` keyword
        let start = self.advance().span.clone();
        let condition = self.parse_condition()?;
        self.check_body(true)?;
        let body = self.parse_stmt()?;

        Ok(Item::new(
            ItemKind::WhileStmt {
                condition,
                body: Box::new(body),
                increment: None,
            },
            self.span_from(&start),
        ))
    }

    fn parse_repeat_stmt(&mut self) -> Result<Item, Error> {
        // Consume the `repeat` keyword
        let start = self.advance().span.clone();
        let count = self.parse_condition()?;
        self.check_body(true)?;
        let body = self.parse_stmt()?;

        Ok(Item::new(
            ItemKind::RepeatStmt {
                count,
                body: Box::new(body),
            },
            self.span_from(&start),
        ))
    }

    fn parse_for_stmt(&mut self) -> Result<Item, Error> {
        // Consume the `for` keyword
        let start = self.advance().span.clone();
        self.advance_or_err(TokenKind::LPAREN, ErrorMsg::MissingOpeningParen)?;
        let init = match self.peek().kind {
            TokenKind::SEMICOLON => {
                self.advance();
                None
            }
            TokenKind::VAR => Some(self.parse_var_decl()?),
            _ => Some(self.parse_expr_stmt(false)?),
        };

        let condition = if self.check(TokenKind::SEMICOLON) {
            Expr::new(ExprKind::Literal(Literal::Boolean(true)), start.clone())
        } else {
            self.parse_expr()?
        };
        self.advance_or_err(TokenKind::SEMICOLON, ErrorMsg::MissingSemicolon)?;

        let increment = if self.check(TokenKind::RPAREN) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.advance_or_err(TokenKind::RPAREN, ErrorMsg::MissingClosingParen)?;
        self.check_body(true)?;
        let body = self.parse_stmt()?;

        let span = self.span_from(&start);
        // The increment stays attached to the loop rather than being
        // appended to the body, so `continue` still runs it
        let mut item = Item::new(
            ItemKind::WhileStmt {
                condition,
                body: Box::new(body),
                increment,
            },
            span.clone(),
        );
        // If the initialiser is present, wrap both in a block so the
        // loop variable is scoped to the loop
        if let Some(i) = init {
            item = Item::new(ItemKind::Block(vec![i, item]), span);
        }

        Ok(item)
    }

    fn parse_class(&mut self) -> Result<Item, Error> {
        // Consume the `class` keyword
        let start = self.advance().span.clone();
        let name = self.advance_or_err(TokenKind::IDENT, ErrorMsg::InvalidIdent)?;
        let parent = if self.advance_if(|t| t.kind == TokenKind::LESS).is_some() {
            let parent = self.advance_or_err(TokenKind::IDENT, ErrorMsg::MissingSuperclass)?;
            Some(self.ident(&parent.lexeme))
        } else {
            None
        };
        self.advance_or_err(TokenKind::LBRACE, ErrorMsg::MissingOpeningBrace)?;
        let mut methods = vec![];
        while !self.check(TokenKind::RBRACE) && !self.is_at_end() {
            let method_start = self.peek().span.clone();
            methods.push(self.parse_function(FunctionKind::Method, method_start)?);
        }
        self.advance_or_err(TokenKind::RBRACE, ErrorMsg::MissingClosingBrace)?;

        Ok(Item::new(
            ItemKind::Class {
                name: name.lexeme.clone(),
                parent,
                methods,
            },
            self.span_from(&start),
        ))
    }

    /// Parses `name(params) { body }`; the `fun` keyword, if any, has
    /// already been consumed.
    fn parse_function(
        &mut self,
        kind: FunctionKind,
        start: Span,
    ) -> Result<Rc<FunctionDecl>, Error> {
        let name = self.advance_or_err(TokenKind::IDENT, ErrorMsg::InvalidIdent)?;
        self.advance_or_err(TokenKind::LPAREN, ErrorMsg::MissingOpeningParen)?;
        let mut params = vec![];
        if !self.check(TokenKind::RPAREN) {
            loop {
                if params.len() >= MAX_ARGS {
                    let span = self.peek().span.clone();
                    return Err(self.error(span, ErrorMsg::TooManyParams));
                }
                let param = self.advance_or_err(TokenKind::IDENT, ErrorMsg::InvalidIdent)?;
                params.push(param.lexeme.clone());
                if self.advance_if(|t| t.kind == TokenKind::COMMA).is_none() {
                    break;
                }
            }
        }
        self.advance_or_err(TokenKind::RPAREN, ErrorMsg::MissingClosingParen)?;
        self.advance_or_err(TokenKind::LBRACE, ErrorMsg::MissingOpeningBrace)?;
        let body = self.parse_block_items()?;

        Ok(Rc::new(FunctionDecl {
            id: self.next_id(),
            kind,
            name: name.lexeme.clone(),
            params,
            body,
            span: self.span_from(&start),
        }))
    }

    fn parse_return(&mut self) -> Result<Item, Error> {
        // Consume the `return` keyword
        let start = self.advance().span.clone();
        let value = if self.check(TokenKind::SEMICOLON) {
            None
        } else {
            Some(self.parse_expr()?)
        };
        self.advance_or_err(TokenKind::SEMICOLON, ErrorMsg::MissingSemicolon)?;

        Ok(Item::new(ItemKind::ReturnStmt(value), self.span_from(&start)))
    }

    /// Expression statements are restricted to assignments, field sets
    /// and calls unless `restricted` is false (the `for` initialiser).
    fn parse_expr_stmt(&mut self, restricted: bool) -> Result<Item, Error> {
        let start = self.peek().span.clone();
        if self.advance_if(|t| t.kind == TokenKind::SEMICOLON).is_some() {
            let nil = Expr::new(ExprKind::Literal(Literal::Nil), start.clone());
            return Ok(Item::new(ItemKind::ExprStmt(nil), start));
        }
        let expr = self.parse_expr()?;
        if restricted
            && !matches!(
                expr.kind,
                ExprKind::Assignment { .. } | ExprKind::FieldSet { .. } | ExprKind::Call { .. }
            )
        {
            return Err(self.error(expr.span.clone(), ErrorMsg::InvalidStatement));
        }
        self.advance_or_err(TokenKind::SEMICOLON, ErrorMsg::MissingSemicolon)?;

        Ok(Item::new(ItemKind::ExprStmt(expr), self.span_from(&start)))
    }

    /// Parses the declarations of a block whose opening brace has been
    /// consumed, up to and including the closing brace.
    fn parse_block_items(&mut self) -> Result<Vec<Item>, Error> {
        let mut items = Vec::default();
        while !self.check(TokenKind::RBRACE) && !self.is_at_end() {
            if let Some(item) = self.parse_declaration()? {
                items.push(item);
            }
        }
        self.advance_or_err(TokenKind::RBRACE, ErrorMsg::MissingClosingBrace)?;
        Ok(items)
    }

    fn parse_condition(&mut self) -> Result<Expr, Error> {
        self.advance_or_err(TokenKind::LPAREN, ErrorMsg::MissingOpeningParen)?;
        let condition = self.parse_expr()?;
        self.advance_or_err(TokenKind::RPAREN, ErrorMsg::MissingClosingParen)?;
        Ok(condition)
    }

    /// Rejects bodies that are a bare declaration, and, directly after a
    /// closing parenthesis, an empty `;` body.
    fn check_body(&mut self, after_paren: bool) -> Result<(), Error> {
        let t = self.peek();
        match t.kind {
            TokenKind::SEMICOLON if after_paren => {
                Err(self.error(t.span.clone(), ErrorMsg::EmptyBody))
            }
            TokenKind::VAR | TokenKind::FUN | TokenKind::CLASS => {
                let msg = format!("{} ('{}')", ErrorMsg::DeclarationInBody, t.lexeme);
                Err(self.error(t.span.clone(), msg))
            }
            _ => Ok(()),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, Error> {
        ensure_sufficient_stack(|| self.parse_assignment())
    }

    fn parse_assignment(&mut self) -> Result<Expr, Error> {
        let lhs = self.parse_logical_or()?;
        if self.advance_if(|t| t.kind == TokenKind::EQUAL).is_none() {
            return Ok(lhs);
        }
        let rhs = self.parse_assignment()?;
        let span = lhs.span.union(&rhs.span);
        match lhs.kind {
            ExprKind::Ident(ident) => Ok(Expr::new(
                ExprKind::Assignment {
                    ident,
                    value: Box::new(rhs),
                },
                span,
            )),
            ExprKind::FieldGet { object, field } => Ok(Expr::new(
                ExprKind::FieldSet {
                    object,
                    field,
                    value: Box::new(rhs),
                },
                span,
            )),
            _ => Err(self.error(lhs.span, ErrorMsg::InvalidAssignment)),
        }
    }

    fn parse_logical_or(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_logical_and()?;
        while self.advance_if(|t| t.kind == TokenKind::OR).is_some() {
            let rhs = self.parse_logical_and()?;
            lhs = Self::logical(lhs, LogicalOp::Or, rhs);
        }
        Ok(lhs)
    }

    fn parse_logical_and(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_eq()?;
        while self.advance_if(|t| t.kind == TokenKind::AND).is_some() {
            let rhs = self.parse_eq()?;
            lhs = Self::logical(lhs, LogicalOp::And, rhs);
        }
        Ok(lhs)
    }

    fn parse_eq(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_cmp()?;
        while let Some(op) = self
            .advance_if(|t| matches!(t.kind, TokenKind::EQUAL_EQUAL | TokenKind::BANG_EQUAL))
            .and_then(|t| BinOp::from_token(t.kind))
        {
            let rhs = self.parse_cmp()?;
            lhs = Self::binary(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_term()?;
        while let Some(op) = self
            .advance_if(|t| {
                matches!(
                    t.kind,
                    TokenKind::GREATER
                        | TokenKind::GREATER_EQUAL
                        | TokenKind::LESS
                        | TokenKind::LESS_EQUAL
                )
            })
            .and_then(|t| BinOp::from_token(t.kind))
        {
            let rhs = self.parse_term()?;
            lhs = Self::binary(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_factor()?;
        while let Some(op) = self
            .advance_if(|t| matches!(t.kind, TokenKind::PLUS | TokenKind::MINUS))
            .and_then(|t| BinOp::from_token(t.kind))
        {
            let rhs = self.parse_factor()?;
            lhs = Self::binary(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn parse_factor(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self
            .advance_if(|t| {
                matches!(
                    t.kind,
                    TokenKind::SLASH | TokenKind::STAR | TokenKind::MODULO
                )
            })
            .and_then(|t| BinOp::from_token(t.kind))
        {
            let rhs = self.parse_unary()?;
            lhs = Self::binary(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, Error> {
        if let Some(t) = self.advance_if(|t| matches!(t.kind, TokenKind::BANG | TokenKind::MINUS))
        {
            let start = t.span.clone();
            let op = UnaryOp::from_token(t.kind);
            let expr = ensure_sufficient_stack(|| self.parse_unary())?;
            let span = start.union(&expr.span);
            return Ok(match op {
                Some(op) => Expr::new(
                    ExprKind::Unary {
                        op,
                        expr: Box::new(expr),
                    },
                    span,
                ),
                None => expr,
            });
        }
        self.parse_func_call()
    }

    fn parse_func_call(&mut self) -> Result<Expr, Error> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek().kind {
                TokenKind::LPAREN => {
                    // Consume the opening parenthesis
                    self.advance();
                    let mut args = vec![];
                    if !self.check(TokenKind::RPAREN) {
                        loop {
                            if args.len() >= MAX_ARGS {
                                let span = self.peek().span.clone();
                                return Err(self.error(span, ErrorMsg::TooManyArgs));
                            }
                            args.push(self.parse_expr()?);
                            if self.advance_if(|t| t.kind == TokenKind::COMMA).is_none() {
                                break;
                            }
                        }
                    }
                    self.advance_or_err(TokenKind::RPAREN, ErrorMsg::MissingClosingParen)?;
                    let span = self.span_from(&expr.span);
                    expr = Expr::new(
                        ExprKind::Call {
                            func: Box::new(expr),
                            args,
                        },
                        span,
                    );
                }
                TokenKind::DOT => {
                    // Consume the dot
                    self.advance();
                    let field = self.advance_or_err(TokenKind::IDENT, ErrorMsg::InvalidIdent)?;
                    let span = self.span_from(&expr.span);
                    expr = Expr::new(
                        ExprKind::FieldGet {
                            object: Box::new(expr),
                            field: field.lexeme.clone(),
                        },
                        span,
                    );
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, Error> {
        let t = self.peek();
        let kind = match t.kind {
            TokenKind::TRUE => ExprKind::Literal(Literal::Boolean(true)),
            TokenKind::FALSE => ExprKind::Literal(Literal::Boolean(false)),
            TokenKind::NIL => ExprKind::Literal(Literal::Nil),
            TokenKind::STRING => ExprKind::Literal(Literal::Str(t.lexeme.clone())),
            TokenKind::NUMBER => match t.lexeme.parse::<f64>() {
                Ok(n) if n.is_finite() => ExprKind::Literal(Literal::Number(n)),
                _ => return Err(self.error(t.span.clone(), ErrorMsg::InvalidNumber)),
            },
            TokenKind::IDENT => ExprKind::Ident(self.ident(&t.lexeme)),
            TokenKind::THIS => ExprKind::This(self.ident("this")),
            TokenKind::SUPER => return self.parse_super(),
            TokenKind::LPAREN => return self.parse_group(),
            TokenKind::LBRACKET => return self.parse_list(),
            TokenKind::ELSE => return Err(self.error(t.span.clone(), ErrorMsg::ElseWithoutIf)),
            _ => return Err(self.error(t.span.clone(), ErrorMsg::ExpectedExpression)),
        };
        self.advance();
        Ok(Expr::new(kind, t.span.clone()))
    }

    fn parse_super(&mut self) -> Result<Expr, Error> {
        // Consume the `super` keyword
        let start = self.advance().span.clone();
        self.advance_or_err(TokenKind::DOT, ErrorMsg::MissingDot)?;
        let method = self.advance_or_err(TokenKind::IDENT, ErrorMsg::InvalidIdent)?;
        Ok(Expr::new(
            ExprKind::Super {
                ident: self.ident("super"),
                method: method.lexeme.clone(),
            },
            self.span_from(&start),
        ))
    }

    fn parse_group(&mut self) -> Result<Expr, Error> {
        // Consume the opening parenthesis
        let start = self.advance().span.clone();
        let expr = self.parse_expr()?;
        self.advance_or_err(TokenKind::RPAREN, ErrorMsg::MissingClosingParen)?;
        Ok(Expr::new(
            ExprKind::Group(Box::new(expr)),
            self.span_from(&start),
        ))
    }

    fn parse_list(&mut self) -> Result<Expr, Error> {
        // Consume the opening bracket
        let start = self.advance().span.clone();
        let mut elements = vec![];
        if !self.check(TokenKind::RBRACKET) {
            loop {
                elements.push(self.parse_expr()?);
                if self.advance_if(|t| t.kind == TokenKind::COMMA).is_none() {
                    break;
                }
            }
        }
        self.advance_or_err(TokenKind::RBRACKET, ErrorMsg::MissingClosingBracket)?;
        Ok(Expr::new(ExprKind::List(elements), self.span_from(&start)))
    }

    fn binary(lhs: Expr, op: BinOp, rhs: Expr) -> Expr {
        let span = lhs.span.union(&rhs.span);
        Expr::new(
            ExprKind::Binary {
                lhs: Box::new(lhs),
                op,
                rhs: Box::new(rhs),
            },
            span,
        )
    }

    fn logical(lhs: Expr, op: LogicalOp, rhs: Expr) -> Expr {
        let span = lhs.span.union(&rhs.span);
        Expr::new(
            ExprKind::Logical {
                lhs: Box::new(lhs),
                op,
                rhs: Box::new(rhs),
            },
            span,
        )
    }

    fn ident(&mut self, name: &str) -> Ident {
        Ident {
            name: name.to_string(),
            id: self.next_id(),
        }
    }

    fn next_id(&mut self) -> NodeId {
        self.next_id += 1;
        self.next_id
    }

    fn span_from(&self, start: &Span) -> Span {
        start.union(&self.previous().span)
    }

    fn peek(&self) -> &'a Token {
        let tokens: &'a [Token] = self.tokens;
        &tokens[self.current.min(tokens.len() - 1)]
    }

    fn previous(&self) -> &'a Token {
        let tokens: &'a [Token] = self.tokens;
        &tokens[self.current.saturating_sub(1).min(tokens.len() - 1)]
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::EOF | TokenKind::ERROR)
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> &'a Token {
        let t = self.peek();
        if !self.is_at_end() {
            self.current += 1;
        }
        t
    }

    fn advance_if<F>(&mut self, cond: F) -> Option<&'a Token>
    where
        F: FnOnce(&Token) -> bool,
    {
        if cond(self.peek()) && !self.is_at_end() {
            Some(self.advance())
        } else {
            None
        }
    }

    fn advance_or_err(&mut self, kind: TokenKind, msg: ErrorMsg) -> Result<&'a Token, Error> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let span = self.previous().span.clone();
            Err(self.error(span, msg))
        }
    }

    /// Skips tokens until just after a `;` or just before a token that
    /// starts a new statement.
    fn sync(&mut self) {
        self.advance();
        while !self.is_at_end() {
            if self.previous().kind == TokenKind::SEMICOLON {
                return;
            }
            if matches!(
                self.peek().kind,
                TokenKind::CLASS
                    | TokenKind::FUN
                    | TokenKind::VAR
                    | TokenKind::FOR
                    | TokenKind::IF
                    | TokenKind::WHILE
                    | TokenKind::RETURN
            ) {
                return;
            }
            self.advance();
        }
    }

    /// Builds a parse error. When the stream is stuck on a lexical error
    /// token, that error takes precedence over whatever was expected.
    fn error(&self, span: Span, msg: impl Display) -> Error {
        let t = self.peek();
        if t.kind == TokenKind::ERROR {
            return Error::new(t.span.clone(), &t.lexeme);
        }
        Error::new(span, msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lex::Lexer;
    use assert_matches::assert_matches;

    fn parse(input: &str) -> Source {
        let tokens = Lexer::new(input, "test").lex_all();
        Parser::new(&tokens).parse_all().unwrap()
    }

    fn parse_errors(input: &str) -> Vec<Error> {
        let tokens = Lexer::new(input, "test").lex_all();
        Parser::new(&tokens).parse_all().unwrap_err()
    }

    fn parse_err_test(input: &str, expected: &str) {
        let errors = parse_errors(input);
        assert_eq!(errors.first().unwrap().msg, expected);
    }

    #[test]
    fn var_decl() {
        let source = parse("var x = 42;");
        assert_matches!(
            &source.items[0].kind,
            ItemKind::VarDecl { name, init: Some(Expr { kind: ExprKind::Literal(Literal::Number(n)), .. }) }
                if name == "x" && *n == 42.0
        );
        assert_eq!(source.items[0].span.to_string(), "test(1,1,1,12)");
    }

    #[test]
    fn precedence() {
        let source = parse("x = 1 + 2 * 3;");
        let ItemKind::ExprStmt(Expr { kind: ExprKind::Assignment { value, .. }, .. }) =
            &source.items[0].kind
        else {
            panic!("expected an assignment");
        };
        assert_matches!(
            &value.kind,
            ExprKind::Binary { op: BinOp::Plus, rhs, .. }
                if matches!(rhs.kind, ExprKind::Binary { op: BinOp::Star, .. })
        );
    }

    #[test]
    fn logical() {
        let source = parse("x = a and b or c;");
        let ItemKind::ExprStmt(Expr { kind: ExprKind::Assignment { value, .. }, .. }) =
            &source.items[0].kind
        else {
            panic!("expected an assignment");
        };
        assert_matches!(
            &value.kind,
            ExprKind::Logical { op: LogicalOp::Or, lhs, .. }
                if matches!(lhs.kind, ExprKind::Logical { op: LogicalOp::And, .. })
        );
    }

    #[test]
    fn if_else_binds_nearest() {
        let source = parse("if (a) if (b) f(); else g();");
        assert_matches!(
            &source.items[0].kind,
            ItemKind::IfStmt { else_item: None, if_item, .. }
                if matches!(if_item.kind, ItemKind::IfStmt { else_item: Some(_), .. })
        );
    }

    #[test]
    fn for_desugars_to_while() {
        let source = parse("for (var i = 0; i < 3; i = i + 1) { print(i); }");
        let ItemKind::Block(items) = &source.items[0].kind else {
            panic!("expected a block");
        };
        assert_matches!(&items[0].kind, ItemKind::VarDecl { name, .. } if name == "i");
        assert_matches!(
            &items[1].kind,
            ItemKind::WhileStmt { increment: Some(Expr { kind: ExprKind::Assignment { .. }, .. }), .. }
        );
    }

    #[test]
    fn for_without_clauses() {
        let source = parse("for (;;) { break; }");
        assert_matches!(
            &source.items[0].kind,
            ItemKind::WhileStmt {
                condition: Expr { kind: ExprKind::Literal(Literal::Boolean(true)), .. },
                increment: None,
                ..
            }
        );
    }

    #[test]
    fn class_with_superclass() {
        let source = parse("class B < A { init(x) { this.x = x; } get() { return super.get(); } }");
        assert_matches!(
            &source.items[0].kind,
            ItemKind::Class { name, parent: Some(Ident { name: parent, .. }), methods }
                if name == "B" && parent == "A" && methods.len() == 2
                    && methods[0].kind == FunctionKind::Method
                    && methods[0].params == vec!["x".to_string()]
        );
    }

    #[test]
    fn assert_forms() {
        let source = parse("assert 1 == 1; assert break f() \"boom\";");
        assert_matches!(
            &source.items[0].kind,
            ItemKind::Assert { message: None, expect_error: false, .. }
        );
        assert_matches!(
            &source.items[1].kind,
            ItemKind::Assert { message: Some(m), expect_error: true, .. } if m == "boom"
        );
    }

    #[test]
    fn list_literal() {
        let source = parse("x = [1, \"a\", []];");
        let ItemKind::ExprStmt(Expr { kind: ExprKind::Assignment { value, .. }, .. }) =
            &source.items[0].kind
        else {
            panic!("expected an assignment");
        };
        assert_matches!(&value.kind, ExprKind::List(elements) if elements.len() == 3);
    }

    #[test]
    fn empty_statement() {
        let source = parse(";");
        assert_matches!(
            &source.items[0].kind,
            ItemKind::ExprStmt(Expr { kind: ExprKind::Literal(Literal::Nil), .. })
        );
    }

    #[test]
    fn node_ids_are_unique() {
        let source = parse("a = b; c(d);");
        let mut ids = vec![];
        for item in &source.items {
            match &item.kind {
                ItemKind::ExprStmt(Expr { kind: ExprKind::Assignment { ident, value }, .. }) => {
                    ids.push(ident.id);
                    if let ExprKind::Ident(i) = &value.kind {
                        ids.push(i.id);
                    }
                }
                ItemKind::ExprStmt(Expr { kind: ExprKind::Call { func, args }, .. }) => {
                    if let ExprKind::Ident(i) = &func.kind {
                        ids.push(i.id);
                    }
                    if let ExprKind::Ident(i) = &args[0].kind {
                        ids.push(i.id);
                    }
                }
                _ => panic!("unexpected item"),
            }
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn missing_semicolon() {
        parse_err_test("var x = 1", &ErrorMsg::MissingSemicolon.to_string());
    }

    #[test]
    fn missing_closing_paren() {
        parse_err_test("x = (1 + 2 * 3;", &ErrorMsg::MissingClosingParen.to_string());
    }

    #[test]
    fn missing_closing_brace() {
        parse_err_test("{ f();", &ErrorMsg::MissingClosingBrace.to_string());
    }

    #[test]
    fn restricted_expression_statement() {
        parse_err_test("1 + 2;", &ErrorMsg::InvalidStatement.to_string());
    }

    #[test]
    fn invalid_assignment_target() {
        parse_err_test("a + b = c;", &ErrorMsg::InvalidAssignment.to_string());
    }

    #[test]
    fn keyword_as_variable_name() {
        parse_err_test(
            "var while = 1;",
            &format!("{} ('while')", ErrorMsg::KeywordAsName),
        );
    }

    #[test]
    fn declaration_as_body() {
        parse_err_test(
            "if (true) var x = 1;",
            &format!("{} ('var')", ErrorMsg::DeclarationInBody),
        );
    }

    #[test]
    fn semicolon_after_condition() {
        parse_err_test("while (true); f();", &ErrorMsg::EmptyBody.to_string());
    }

    #[test]
    fn else_without_if() {
        parse_err_test("x = else;", &ErrorMsg::ElseWithoutIf.to_string());
    }

    #[test]
    fn lexical_error_is_reported() {
        parse_err_test("var s = \"abc", &crate::error::ErrorMsg::UnterminatedString.to_string());
    }

    #[test]
    fn recovers_and_collects_errors() {
        let errors = parse_errors("var = 1;\nf();\n1;\nvar y = 2;");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[1].span.line_start, 3);
    }

    #[test]
    fn stop_at_first_error() {
        let tokens = Lexer::new("var = 1;\n1;", "test").lex_all();
        let errors = Parser::new(&tokens)
            .stop_at_first_error(true)
            .parse_all()
            .unwrap_err();
        assert_eq!(errors.len(), 1);
    }
}
