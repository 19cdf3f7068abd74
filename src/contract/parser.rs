//! Recursive-descent parser producing the contract syntax tree.
//!
//! # Grammar
//!
//! ```text
//! program    := stmt*
//! stmt       := "if" expr block ("else" (block | if-stmt))?
//!             | "while" expr block
//!             | "pass" ";"
//!             | expr ("=" expr)? ";"
//! block      := "{" stmt* "}"
//! expr       := or
//! or         := and ("or" and)*
//! and        := not ("and" not)*
//! not        := "not" not | comparison
//! comparison := sum (("==" | "!=" | "<" | "<=" | ">" | ">=") sum)?
//! sum        := term (("+" | "-") term)*
//! term       := unary (("*" | "/" | "%") unary)*
//! unary      := "-" unary | postfix
//! postfix    := primary ("(" args ")" | "[" expr "]" | "." ident)*
//! primary    := number | string | "true" | "false" | "none"
//!             | ident | "(" expr ")" | "[" args "]"
//! ```

use super::lexer::{syntax_error, tokenize, Spanned, Token};
use crate::error::ChainError;
use serde_json::Value;

/// Deepest nesting of blocks and sub-expressions a contract may use.
const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Name(String),
    List(Vec<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Attr(Box<Expr>, String),
    Call(Box<Expr>, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Assign { target: Expr, value: Expr },
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
    While { cond: Expr, body: Vec<Stmt> },
    Expr(Expr),
    Pass,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

pub fn parse(source: &str) -> Result<Program, ChainError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let mut body = Vec::new();
    while !parser.at(&Token::Eof) {
        body.push(parser.statement()?);
    }
    Ok(Program { body })
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn current(&self) -> &Spanned {
        // The token stream always ends with Eof, and `advance` never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn at(&self, token: &Token) -> bool {
        &self.current().token == token
    }

    fn advance(&mut self) -> Token {
        let token = self.current().token.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.at(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl AsRef<str>) -> ChainError {
        let here = self.current();
        syntax_error(here.line, here.column, message)
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), ChainError> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}, found {:?}", what, self.current().token)))
        }
    }

    fn enter(&mut self) -> Result<(), ChainError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("nesting too deep"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn statement(&mut self) -> Result<Stmt, ChainError> {
        let line = self.current().line;
        let kind = match self.current().token {
            Token::If => self.if_statement()?,
            Token::While => {
                self.advance();
                let cond = self.expression()?;
                let body = self.block()?;
                StmtKind::While { cond, body }
            }
            Token::Pass => {
                self.advance();
                self.expect(Token::Semicolon, "';'")?;
                StmtKind::Pass
            }
            _ => {
                let expr = self.expression()?;
                let kind = if self.eat(&Token::Assign) {
                    if !matches!(expr, Expr::Name(_) | Expr::Index(..)) {
                        return Err(self.error("invalid assignment target"));
                    }
                    let value = self.expression()?;
                    StmtKind::Assign {
                        target: expr,
                        value,
                    }
                } else {
                    StmtKind::Expr(expr)
                };
                self.expect(Token::Semicolon, "';'")?;
                kind
            }
        };
        Ok(Stmt { kind, line })
    }

    fn if_statement(&mut self) -> Result<StmtKind, ChainError> {
        self.expect(Token::If, "'if'")?;
        let cond = self.expression()?;
        let then_branch = self.block()?;
        let else_branch = if self.eat(&Token::Else) {
            if self.at(&Token::If) {
                let line = self.current().line;
                self.enter()?;
                let nested = self.if_statement();
                self.leave();
                vec![Stmt {
                    kind: nested?,
                    line,
                }]
            } else {
                self.block()?
            }
        } else {
            Vec::new()
        };
        Ok(StmtKind::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ChainError> {
        self.expect(Token::LBrace, "'{'")?;
        self.enter()?;
        let mut body = Vec::new();
        while !self.at(&Token::RBrace) {
            if self.at(&Token::Eof) {
                self.leave();
                return Err(self.error("unclosed block"));
            }
            match self.statement() {
                Ok(stmt) => body.push(stmt),
                Err(e) => {
                    self.leave();
                    return Err(e);
                }
            }
        }
        self.advance();
        self.leave();
        Ok(body)
    }

    fn expression(&mut self) -> Result<Expr, ChainError> {
        self.enter()?;
        let expr = self.or_expr();
        self.leave();
        expr
    }

    fn or_expr(&mut self) -> Result<Expr, ChainError> {
        let mut lhs = self.and_expr()?;
        while self.eat(&Token::Or) {
            let rhs = self.and_expr()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ChainError> {
        let mut lhs = self.not_expr()?;
        while self.eat(&Token::And) {
            let rhs = self.not_expr()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr, ChainError> {
        if self.eat(&Token::Not) {
            self.enter()?;
            let operand = self.not_expr();
            self.leave();
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ChainError> {
        let lhs = self.sum()?;
        let op = match self.current().token {
            Token::EqEq => BinOp::Eq,
            Token::NotEq => BinOp::Ne,
            Token::Lt => BinOp::Lt,
            Token::Le => BinOp::Le,
            Token::Gt => BinOp::Gt,
            Token::Ge => BinOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.sum()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn sum(&mut self) -> Result<Expr, ChainError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.current().token {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn term(&mut self) -> Result<Expr, ChainError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.current().token {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Rem,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, ChainError> {
        if self.eat(&Token::Minus) {
            self.enter()?;
            let operand = self.unary();
            self.leave();
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(operand?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ChainError> {
        let mut expr = self.primary()?;
        loop {
            match self.current().token {
                Token::LParen => {
                    self.advance();
                    let args = self.arguments(Token::RParen)?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(Token::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                Token::Dot => {
                    self.advance();
                    match self.advance() {
                        Token::Ident(name) => expr = Expr::Attr(Box::new(expr), name),
                        other => {
                            return Err(self.error(format!(
                                "expected attribute name, found {:?}",
                                other
                            )))
                        }
                    }
                }
                _ => return Ok(expr),
            }
        }
    }

    fn arguments(&mut self, close: Token) -> Result<Vec<Expr>, ChainError> {
        let mut args = Vec::new();
        if self.eat(&close) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&close) {
                return Ok(args);
            }
            self.expect(Token::Comma, "','")?;
        }
    }

    fn primary(&mut self) -> Result<Expr, ChainError> {
        match self.advance() {
            Token::Int(n) => Ok(Expr::Literal(Value::from(n))),
            Token::Float(f) => Ok(Expr::Literal(Value::from(f))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::None => Ok(Expr::Literal(Value::Null)),
            Token::Ident(name) => Ok(Expr::Name(name)),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => Ok(Expr::List(self.arguments(Token::RBracket)?)),
            other => Err(self.error(format!("unexpected token {:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_precedence() {
        let program = parse("x = 1 + 2 * 3;").unwrap();
        let StmtKind::Assign { value, .. } = &program.body[0].kind else {
            panic!("expected assignment");
        };
        assert_eq!(
            value,
            &Expr::Binary(
                BinOp::Add,
                Box::new(Expr::Literal(Value::from(1))),
                Box::new(Expr::Binary(
                    BinOp::Mul,
                    Box::new(Expr::Literal(Value::from(2))),
                    Box::new(Expr::Literal(Value::from(3))),
                )),
            )
        );
    }

    #[test]
    fn test_parses_control_flow() {
        let source = r#"
            if blockchain.get_balance(sender) > 10 {
                state["tier"] = "gold";
            } else if params["force"] {
                state["tier"] = "silver";
            } else {
                pass;
            }
            while state["n"] < 3 { state["n"] = state["n"] + 1; }
        "#;
        let program = parse(source).unwrap();
        assert_eq!(program.body.len(), 2);
        assert_eq!(program.body[0].line, 2);
        assert!(matches!(program.body[1].kind, StmtKind::While { .. }));
    }

    #[test]
    fn test_missing_semicolon_is_rejected() {
        let err = parse("x = 1").unwrap_err();
        assert!(matches!(err, ChainError::ContractSyntaxError(ref m) if m.contains("';'")));
    }

    #[test]
    fn test_invalid_assignment_target() {
        assert!(matches!(
            parse("1 + 2 = 3;"),
            Err(ChainError::ContractSyntaxError(_))
        ));
        assert!(matches!(
            parse("blockchain.get_block_number() = 3;"),
            Err(ChainError::ContractSyntaxError(_))
        ));
    }

    #[test]
    fn test_unclosed_block() {
        assert!(matches!(
            parse("while true { x = 1;"),
            Err(ChainError::ContractSyntaxError(_))
        ));
    }

    #[test]
    fn test_excessive_nesting_is_rejected() {
        let source = format!("x = {}1{};", "(".repeat(200), ")".repeat(200));
        assert!(matches!(
            parse(&source),
            Err(ChainError::ContractSyntaxError(ref m)) if m.contains("nesting")
        ));
    }

    #[test]
    fn test_empty_program_is_valid() {
        assert_eq!(parse("  # nothing here\n").unwrap().body.len(), 0);
    }
}
