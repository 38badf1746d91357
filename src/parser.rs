use crate::ast::{Expr, Position, Script, Statement};
use crate::lexer::{Token, TokenType};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub pos: Position,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (line {}, column {})", self.message, self.pos.line, self.pos.column)
    }
}

impl Error for ParseError {}

/// Deepest statement or expression nesting accepted. Code generated from any loadable workspace
/// stays well inside it.
pub const MAX_NESTING_DEPTH: usize = 192;

pub struct Parser {
    tokens: Vec<Token>,
    index: usize,
    depth: usize,
    loops: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            index: 0,
            depth: 0,
            loops: 0,
        }
    }

    pub fn parse_script(&mut self) -> Result<Script, ParseError> {
        let mut body = Vec::new();
        while !self.at_end() {
            body.push(self.parse_statement()?);
        }
        Ok(Script { body })
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        self.nested(Self::parse_statement_inner)
    }

    fn parse_statement_inner(&mut self) -> Result<Statement, ParseError> {
        let token = self.current().clone();
        match token.typ {
            TokenType::Semicolon => {
                self.advance();
                return Ok(Statement::Empty { pos: token.pos });
            }
            TokenType::LBrace => {
                let body = self.parse_block()?;
                return Ok(Statement::Block {
                    pos: token.pos,
                    body,
                });
            }
            TokenType::Keyword => {}
            _ => return self.parse_expression_statement(),
        }
        match token.value.as_str() {
            "var" | "let" | "const" => {
                let stmt = self.parse_var_decl()?;
                self.consume_terminator()?;
                Ok(stmt)
            }
            "if" => self.parse_if_stmt(),
            "while" => self.parse_while_stmt(),
            "for" => self.parse_for_stmt(),
            "return" => self.parse_return_stmt(),
            "break" | "continue" => self.parse_jump_stmt(),
            "function" if self.peek().typ == TokenType::Ident => self.parse_function_decl(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> Result<Statement, ParseError> {
        let pos = self.current().pos;
        let expr = self.parse_expression()?;
        self.consume_terminator()?;
        Ok(Statement::Expr { pos, expr })
    }

    fn parse_var_decl(&mut self) -> Result<Statement, ParseError> {
        let pos = self.advance().pos;
        let mut decls = Vec::new();
        loop {
            let name = self.consume_type(TokenType::Ident, "Expected variable name.")?.value;
            let init = if self.match_op("=") {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            decls.push((name, init));
            if !self.match_type(TokenType::Comma) {
                break;
            }
        }
        Ok(Statement::Var { pos, decls })
    }

    fn parse_function_decl(&mut self) -> Result<Statement, ParseError> {
        let pos = self.current().pos;
        let function = self.parse_function_expr()?;
        let Expr::Function { name: Some(name), .. } = &function else {
            return self.error_here("Function declaration requires a name.");
        };
        Ok(Statement::Var {
            pos,
            decls: vec![(name.clone(), Some(function))],
        })
    }

    fn parse_if_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.advance().pos;
        let condition = self.parse_condition("if")?;
        let then_body = self.parse_body()?;
        let else_body = if self.match_keyword("else") {
            if self.check_keyword("if") {
                vec![self.parse_if_stmt()?]
            } else {
                self.parse_body()?
            }
        } else {
            Vec::new()
        };
        Ok(Statement::If {
            pos,
            condition,
            then_body,
            else_body,
        })
    }

    fn parse_while_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.advance().pos;
        let condition = self.parse_condition("while")?;
        let body = self.parse_loop_body()?;
        Ok(Statement::While {
            pos,
            condition,
            body,
        })
    }

    fn parse_for_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.advance().pos;
        self.consume_type(TokenType::LParen, "Expected '(' after 'for'.")?;

        let init = if self.check_type(TokenType::Semicolon) {
            None
        } else if self.check_keyword("var") || self.check_keyword("let") {
            Some(Box::new(self.parse_var_decl()?))
        } else {
            let init_pos = self.current().pos;
            let expr = self.parse_expression()?;
            Some(Box::new(Statement::Expr {
                pos: init_pos,
                expr,
            }))
        };
        self.consume_type(TokenType::Semicolon, "Expected ';' after for-loop initializer.")?;

        let condition = if self.check_type(TokenType::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume_type(TokenType::Semicolon, "Expected ';' after for-loop condition.")?;

        let update = if self.check_type(TokenType::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume_type(TokenType::RParen, "Expected ')' after for-loop clauses.")?;

        let body = self.parse_loop_body()?;
        Ok(Statement::For {
            pos,
            init,
            condition,
            update,
            body,
        })
    }

    fn parse_return_stmt(&mut self) -> Result<Statement, ParseError> {
        let pos = self.advance().pos;
        let value = if self.check_type(TokenType::Semicolon)
            || self.check_type(TokenType::RBrace)
            || self.at_end()
        {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.consume_terminator()?;
        Ok(Statement::Return { pos, value })
    }

    fn parse_jump_stmt(&mut self) -> Result<Statement, ParseError> {
        let token = self.current().clone();
        if self.loops == 0 {
            return self.error_here(format!("Illegal {} statement.", token.value));
        }
        self.advance();
        self.consume_terminator()?;
        Ok(if token.value == "break" {
            Statement::Break { pos: token.pos }
        } else {
            Statement::Continue { pos: token.pos }
        })
    }

    fn parse_condition(&mut self, context: &str) -> Result<Expr, ParseError> {
        self.consume_type(
            TokenType::LParen,
            format!("Expected '(' after '{}'.", context).as_str(),
        )?;
        let condition = self.parse_expression()?;
        self.consume_type(
            TokenType::RParen,
            format!("Expected ')' after {} condition.", context).as_str(),
        )?;
        Ok(condition)
    }

    fn parse_body(&mut self) -> Result<Vec<Statement>, ParseError> {
        if self.check_type(TokenType::LBrace) {
            self.parse_block()
        } else {
            Ok(vec![self.parse_statement()?])
        }
    }

    fn parse_loop_body(&mut self) -> Result<Vec<Statement>, ParseError> {
        self.loops += 1;
        let body = self.parse_body();
        self.loops -= 1;
        body
    }

    fn parse_block(&mut self) -> Result<Vec<Statement>, ParseError> {
        self.consume_type(TokenType::LBrace, "Expected '{'.")?;
        let mut body = Vec::new();
        while !self.check_type(TokenType::RBrace) {
            if self.at_end() {
                return self.error_here("Unterminated block. Expected '}'.");
            }
            body.push(self.parse_statement()?);
        }
        self.consume_type(TokenType::RBrace, "Expected '}'.")?;
        Ok(body)
    }

    fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.parse_assignment()
    }

    fn parse_assignment(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::parse_assignment_inner)
    }

    fn parse_assignment_inner(&mut self) -> Result<Expr, ParseError> {
        let target = self.parse_conditional()?;
        let token = self.current().clone();
        if token.typ == TokenType::Op && is_assign_op(&token.value) {
            if !target.is_assignable() {
                return self.error_here("Invalid assignment target.");
            }
            self.advance();
            let value = self.parse_assignment()?;
            return Ok(Expr::Assign {
                pos: token.pos,
                op: token.value,
                target: Box::new(target),
                value: Box::new(value),
            });
        }
        Ok(target)
    }

    fn parse_conditional(&mut self) -> Result<Expr, ParseError> {
        let condition = self.parse_binary(1)?;
        if !self.check_type(TokenType::Question) {
            return Ok(condition);
        }
        let pos = self.advance().pos;
        let then_value = self.parse_assignment()?;
        self.consume_type(TokenType::Colon, "Expected ':' in conditional expression.")?;
        let else_value = self.parse_assignment()?;
        Ok(Expr::Conditional {
            pos,
            condition: Box::new(condition),
            then_value: Box::new(then_value),
            else_value: Box::new(else_value),
        })
    }

    fn parse_binary(&mut self, min_precedence: i32) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let token = self.current().clone();
            if token.typ != TokenType::Op {
                break;
            }
            let Some(precedence) = precedence_of(&token.value) else {
                break;
            };
            if precedence < min_precedence {
                break;
            }
            self.advance();
            let right = self.parse_binary(precedence + 1)?;
            left = Expr::Binary {
                pos: token.pos,
                op: token.value,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let token = self.current().clone();
        if token.typ == TokenType::Op {
            match token.value.as_str() {
                "-" | "+" | "!" => {
                    self.advance();
                    let operand = self.nested(Self::parse_unary)?;
                    return Ok(Expr::Unary {
                        pos: token.pos,
                        op: token.value,
                        operand: Box::new(operand),
                    });
                }
                "++" | "--" => {
                    self.advance();
                    let target = self.nested(Self::parse_unary)?;
                    if !target.is_assignable() {
                        return self.error_here("Invalid increment target.");
                    }
                    return Ok(Expr::Update {
                        pos: token.pos,
                        op: token.value,
                        prefix: true,
                        target: Box::new(target),
                    });
                }
                _ => {}
            }
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            let token = self.current().clone();
            match token.typ {
                TokenType::Dot => {
                    self.advance();
                    let property = self.current().clone();
                    if !matches!(property.typ, TokenType::Ident | TokenType::Keyword) {
                        return self.error_here("Expected property name after '.'.");
                    }
                    self.advance();
                    expr = Expr::Member {
                        pos: token.pos,
                        object: Box::new(expr),
                        property: property.value,
                    };
                }
                TokenType::LParen => {
                    let args = self.parse_arguments()?;
                    expr = Expr::Call {
                        pos: token.pos,
                        callee: Box::new(expr),
                        args,
                    };
                }
                TokenType::Op if token.value == "++" || token.value == "--" => {
                    if !expr.is_assignable() {
                        return self.error_here("Invalid increment target.");
                    }
                    self.advance();
                    expr = Expr::Update {
                        pos: token.pos,
                        op: token.value,
                        prefix: false,
                        target: Box::new(expr),
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.consume_type(TokenType::LParen, "Expected '('.")?;
        let mut args = Vec::new();
        if self.match_type(TokenType::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_assignment()?);
            if self.match_type(TokenType::Comma) {
                continue;
            }
            self.consume_type(TokenType::RParen, "Expected ')' after arguments.")?;
            break;
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.current().clone();
        match token.typ {
            TokenType::Number => {
                self.advance();
                let value = token.value.parse::<f64>().map_err(|_| ParseError {
                    message: format!("Invalid number literal '{}'.", token.value),
                    pos: token.pos,
                })?;
                Ok(Expr::Number {
                    pos: token.pos,
                    value,
                })
            }
            TokenType::String => {
                self.advance();
                Ok(Expr::String {
                    pos: token.pos,
                    value: token.value,
                })
            }
            TokenType::Ident => {
                self.advance();
                Ok(Expr::Ident {
                    pos: token.pos,
                    name: token.value,
                })
            }
            TokenType::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.consume_type(TokenType::RParen, "Expected ')' after grouped expression.")?;
                Ok(expr)
            }
            TokenType::Keyword => match token.value.as_str() {
                "true" | "false" => {
                    self.advance();
                    Ok(Expr::Bool {
                        pos: token.pos,
                        value: token.value == "true",
                    })
                }
                "null" => {
                    self.advance();
                    Ok(Expr::Null { pos: token.pos })
                }
                "undefined" => {
                    self.advance();
                    Ok(Expr::Undefined { pos: token.pos })
                }
                "function" => self.parse_function_expr(),
                other => self.error_here(format!("Unexpected keyword '{}'.", other)),
            },
            _ => self.error_here("Expected expression."),
        }
    }

    fn parse_function_expr(&mut self) -> Result<Expr, ParseError> {
        let pos = self.advance().pos;
        let name = if self.check_type(TokenType::Ident) {
            Some(self.advance().value)
        } else {
            None
        };
        self.consume_type(TokenType::LParen, "Expected '(' after 'function'.")?;
        let mut params = Vec::new();
        if !self.match_type(TokenType::RParen) {
            loop {
                params.push(self.consume_type(TokenType::Ident, "Expected parameter name.")?.value);
                if self.match_type(TokenType::Comma) {
                    continue;
                }
                self.consume_type(TokenType::RParen, "Expected ')' after parameters.")?;
                break;
            }
        }
        // Loops outside the function do not make `break` legal inside it.
        let loops = std::mem::take(&mut self.loops);
        let body = self.parse_block();
        self.loops = loops;
        let body = body?;
        Ok(Expr::Function {
            pos,
            name,
            params,
            body: Rc::new(body),
        })
    }

    fn nested<R>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<R, ParseError>,
    ) -> Result<R, ParseError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return self.error_here("Expression nested too deeply.");
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    /// Statements end with ';'. A missing one is tolerated before '}' and at end of input.
    fn consume_terminator(&mut self) -> Result<(), ParseError> {
        if self.match_type(TokenType::Semicolon)
            || self.check_type(TokenType::RBrace)
            || self.at_end()
        {
            return Ok(());
        }
        self.error_here("Expected ';' after statement.")
    }

    fn consume_type(&mut self, typ: TokenType, message: &str) -> Result<Token, ParseError> {
        let token = self.current().clone();
        if token.typ == typ {
            self.advance();
            Ok(token)
        } else {
            Err(ParseError {
                message: message.to_string(),
                pos: token.pos,
            })
        }
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        let token = self.current();
        token.typ == TokenType::Keyword && token.value == keyword
    }

    fn match_keyword(&mut self, keyword: &str) -> bool {
        if self.check_keyword(keyword) {
            self.advance();
            return true;
        }
        false
    }

    fn match_op(&mut self, op: &str) -> bool {
        let token = self.current();
        if token.typ == TokenType::Op && token.value == op {
            self.advance();
            return true;
        }
        false
    }

    fn match_type(&mut self, typ: TokenType) -> bool {
        if self.check_type(typ) {
            self.advance();
            return true;
        }
        false
    }

    fn check_type(&self, typ: TokenType) -> bool {
        self.current().typ == typ
    }

    fn at_end(&self) -> bool {
        self.current().typ == TokenType::Eof
    }

    fn current(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        if self.index + 1 >= self.tokens.len() {
            &self.tokens[self.tokens.len() - 1]
        } else {
            &self.tokens[self.index + 1]
        }
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.index < self.tokens.len() - 1 {
            self.index += 1;
        }
        token
    }

    fn error_here<T: Into<String>, R>(&self, message: T) -> Result<R, ParseError> {
        Err(ParseError {
            message: message.into(),
            pos: self.current().pos,
        })
    }
}

fn precedence_of(op: &str) -> Option<i32> {
    match op {
        "||" => Some(1),
        "&&" => Some(2),
        "==" | "!=" | "===" | "!==" => Some(3),
        "<" | "<=" | ">" | ">=" => Some(4),
        "+" | "-" => Some(5),
        "*" | "/" | "%" => Some(6),
        _ => None,
    }
}

fn is_assign_op(op: &str) -> bool {
    matches!(op, "=" | "+=" | "-=" | "*=" | "/=" | "%=")
}
