use crate::{
    ast::{BinOp, Branch, Expr, Token, TokenKind, UnaryOp, UseLimit},
    lexer::{LexError, Lexer},
};
use std::mem;

/// Deepest nesting of sub-expressions the parser accepts.
pub const MAX_NESTING: usize = 128;

/// A syntax error with the character offset where it was detected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Syntax error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, position: usize) -> Self {
        ParseError {
            message: message.into(),
            position,
        }
    }
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        ParseError::new(err.to_string(), err.position())
    }
}

type ParseResult<T> = Result<T, ParseError>;

/// Recursive descent parser over a token vector.
///
/// The parser is a pure function of its tokens: it has no access to variables,
/// registries or configuration.
pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    depth: usize,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !tokens.last().is_some_and(Token::is_eof) {
            let end = tokens.last().map_or(0, |t| t.position + t.lexeme.chars().count());
            tokens.push(Token::new(TokenKind::Eof, "", end));
        }
        Parser {
            tokens,
            current: 0,
            depth: 0,
        }
    }

    /// Tokenizes `source` and builds a parser over the result.
    pub fn from_source(source: &str) -> ParseResult<Self> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Parser::new(tokens))
    }

    /// Parses a complete expression. Trailing tokens are an error.
    ///
    /// # Examples
    ///
    /// ```
    /// use expr_engine::parser::Parser;
    /// use expr_engine::ast::{BinOp, Expr};
    ///
    /// let expr = Parser::from_source("1 + 2").unwrap().parse().unwrap();
    /// assert_eq!(expr, Expr::binary(BinOp::Add, Expr::Integer(1), Expr::Integer(2)));
    /// ```
    pub fn parse(&mut self) -> ParseResult<Expr> {
        let expr = self.parse_expression()?;
        if !self.check(&TokenKind::Eof) {
            return Err(self.error(format!(
                "Unexpected token '{}' after end of expression.",
                self.peek()
            )));
        }
        Ok(expr)
    }

    fn peek(&self) -> &Token {
        // `new` guarantees a trailing Eof, and `advance` never moves past it.
        &self.tokens[self.current]
    }

    fn peek_kind_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.current + offset).map(|t| &t.kind)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if !token.is_eof() {
            self.current += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        mem::discriminant(&self.peek().kind) == mem::discriminant(kind)
    }

    fn matches(&mut self, kinds: &[TokenKind]) -> bool {
        if kinds.iter().any(|k| self.check(k)) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> ParseResult<Token> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    fn expect_identifier(&mut self, message: &str) -> ParseResult<String> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(message)),
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.peek().position)
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("Expression nested too deeply."));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// expr := letExpr | condExpr | ternary
    fn parse_expression(&mut self) -> ParseResult<Expr> {
        self.nested(|p| match p.peek().kind {
            TokenKind::Let => p.parse_let(),
            TokenKind::If => p.parse_conditional(),
            _ => p.parse_ternary(),
        })
    }

    /// letExpr := "let" IDENT "=" logicOr ("as" "-"? INT)? ";" expr
    fn parse_let(&mut self) -> ParseResult<Expr> {
        self.advance(); // let
        let name = self.expect_identifier("Expect variable name after 'let'.")?;
        self.expect(TokenKind::Assign, "Expect '=' after variable name.")?;
        let value = self.parse_or()?;

        let uses = if self.matches(&[TokenKind::As]) {
            let negative = self.matches(&[TokenKind::Minus]);
            let count = match self.peek().kind {
                TokenKind::Integer(n) => n,
                _ => return Err(self.error("Expect number after 'as' for variable uses.")),
            };
            let position = self.peek().position;
            self.advance();
            let count = if negative { -count } else { count };
            UseLimit::from_count(count).ok_or_else(|| {
                ParseError::new("Variable uses after 'as' must not be 0.", position)
            })?
        } else {
            UseLimit::Unlimited
        };

        self.expect(TokenKind::Semicolon, "Expect ';' after variable binding.")?;
        let body = self.parse_expression()?;

        Ok(Expr::Let {
            name,
            value: Box::new(value),
            uses,
            body: Box::new(body),
        })
    }

    /// condExpr := "if" logicOr ":" expr ("elif" logicOr ":" expr)* "else" ":" expr
    fn parse_conditional(&mut self) -> ParseResult<Expr> {
        self.advance(); // if
        let mut branches = vec![self.parse_branch()?];

        while self.matches(&[TokenKind::Elif]) {
            branches.push(self.parse_branch()?);
        }

        self.expect(TokenKind::Else, "Expect 'else' to close conditional chain.")?;
        self.expect(TokenKind::Colon, "Expect ':' after 'else' keyword.")?;
        let otherwise = self.parse_expression()?;

        Ok(Expr::Conditional {
            branches,
            otherwise: Some(Box::new(otherwise)),
        })
    }

    fn parse_branch(&mut self) -> ParseResult<Branch> {
        let condition = self.parse_or()?;
        self.expect(TokenKind::Colon, "Expect ':' after condition.")?;
        let result = self.parse_expression()?;
        Ok(Branch { condition, result })
    }

    /// ternary := logicOr ("?" expr ":" expr)?
    fn parse_ternary(&mut self) -> ParseResult<Expr> {
        let condition = self.parse_or()?;
        if !self.matches(&[TokenKind::Question]) {
            return Ok(condition);
        }
        let then_branch = self.parse_expression()?;
        self.expect(TokenKind::Colon, "Expect ':' after true branch of ternary.")?;
        let else_branch = self.parse_expression()?;
        Ok(Expr::Ternary {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        })
    }

    fn parse_or(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_and()?;
        while self.matches(&[TokenKind::Or]) {
            let right = self.parse_and()?;
            left = Expr::binary(BinOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.matches(&[TokenKind::And]) {
            let right = self.parse_equality()?;
            left = Expr::binary(BinOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::EqEq => BinOp::Equal,
                TokenKind::NotEq => BinOp::NotEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Lt => BinOp::LessThan,
                TokenKind::Gt => BinOp::GreaterThan,
                TokenKind::LtEq => BinOp::LessEqual,
                TokenKind::GtEq => BinOp::GreaterEqual,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Subtract,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Expr> {
        let mut left = self.parse_power()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => BinOp::Multiply,
                TokenKind::Slash => BinOp::Divide,
                TokenKind::Percent => BinOp::Modulo,
                _ => break,
            };
            self.advance();
            let right = self.parse_power()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    /// power := unary ("^" power)?
    fn parse_power(&mut self) -> ParseResult<Expr> {
        let base = self.parse_unary()?;
        if self.matches(&[TokenKind::Caret]) {
            let exponent = self.nested(|p| p.parse_power())?;
            return Ok(Expr::binary(BinOp::Power, base, exponent));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let op = match self.peek().kind {
            TokenKind::Minus => UnaryOp::Negate,
            TokenKind::Not => UnaryOp::Not,
            _ => return self.parse_primary(),
        };
        self.advance();
        let operand = self.nested(|p| p.parse_unary())?;
        Ok(Expr::unary(op, operand))
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let token = self.advance();
        match token.kind {
            // Literals
            TokenKind::Integer(n) => Ok(Expr::Integer(n)),
            TokenKind::Float(n) => Ok(Expr::Float(n)),
            TokenKind::String(s) => Ok(Expr::String(s)),
            TokenKind::Boolean(b) => Ok(Expr::Boolean(b)),
            TokenKind::Null => Ok(Expr::Null),

            TokenKind::LParen => {
                let inner = self.parse_expression()?;
                self.expect(TokenKind::RParen, "Expect ')' after expression.")?;
                Ok(Expr::Grouping(Box::new(inner)))
            }

            TokenKind::Out => self.parse_cast(),

            TokenKind::Identifier(name) => {
                if self.check(&TokenKind::LParen) {
                    self.advance();
                    return self.parse_call(name, None);
                }
                if self.is_type_hint_ahead() {
                    self.advance(); // <
                    let hint = self.expect_identifier("Expect type name after '<'.")?;
                    self.expect(TokenKind::Gt, "Expect '>' after generic type.")?;
                    self.expect(TokenKind::LParen, "Expect '(' after generic type.")?;
                    return self.parse_call(name, Some(hint));
                }
                Ok(Expr::Variable(name))
            }

            _ => {
                // Put the offending token back so the error points at it.
                if !token.is_eof() {
                    self.current -= 1;
                }
                Err(self.error("Expect expression."))
            }
        }
    }

    /// `name<Type>(` where `<` would otherwise be read as a comparison.
    fn is_type_hint_ahead(&self) -> bool {
        matches!(
            (
                self.peek_kind_at(0),
                self.peek_kind_at(1),
                self.peek_kind_at(2),
                self.peek_kind_at(3),
            ),
            (
                Some(TokenKind::Lt),
                Some(TokenKind::Identifier(_)),
                Some(TokenKind::Gt),
                Some(TokenKind::LParen)
            )
        )
    }

    /// Arguments after the opening parenthesis has been consumed.
    fn parse_call(&mut self, name: String, type_hint: Option<String>) -> ParseResult<Expr> {
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.matches(&[TokenKind::Comma]) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "Expect ')' after function arguments.")?;
        Ok(Expr::Call {
            name,
            type_hint,
            args,
        })
    }

    /// `Out<Type>(expr)` after the `Out` keyword has been consumed.
    fn parse_cast(&mut self) -> ParseResult<Expr> {
        self.expect(TokenKind::Lt, "Expect '<' after 'Out'.")?;
        let type_name = self.expect_identifier("Expect type name after 'Out<'.")?;
        self.expect(TokenKind::Gt, "Expect '>' after type name.")?;
        self.expect(TokenKind::LParen, "Expect '(' after 'Out<Type>'.")?;
        let inner = self.parse_expression()?;
        self.expect(TokenKind::RParen, "Expect ')' after cast expression.")?;
        Ok(Expr::Cast {
            type_name,
            inner: Box::new(inner),
        })
    }
}

/// Tokenizes and parses `source` in one step.
pub fn parse(source: &str) -> ParseResult<Expr> {
    Parser::from_source(source)?.parse()
}
