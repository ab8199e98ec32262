use crate::{
    ast::{
        AssignTarget, BinaryOp, Expr, Function, Literal, LogicalOp, Parameter, Program, Stmt,
        TableItem, UnaryOp,
    },
    error::{byte_offset_to_position, FountainError, FountainResult, Location},
    lexer::{Token, TokenKind},
};
use std::path::PathBuf;

const MAX_CALL_ARGS: usize = 255;

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    source: String,
    file_path: PathBuf,
    loop_depth: usize,
    fn_depth: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            source: String::new(),
            file_path: PathBuf::from("<unknown>"),
            loop_depth: 0,
            fn_depth: 0,
        }
    }

    pub fn with_source_and_file(tokens: Vec<Token>, source: String, file_path: PathBuf) -> Self {
        Self {
            tokens,
            current: 0,
            source,
            file_path,
            loop_depth: 0,
            fn_depth: 0,
        }
    }

    fn location_here(&self) -> Option<Location> {
        let token = if self.current < self.tokens.len() {
            &self.tokens[self.current]
        } else {
            self.tokens.last()?
        };
        let (line, column) = byte_offset_to_position(&self.source, token.span.start);
        Some(Location::new(self.file_path.clone(), line, column))
    }

    fn error_with_location(&self, msg: String) -> FountainError {
        FountainError::Parse {
            message: msg,
            location: self.location_here(),
        }
    }

    fn control_flow_error(&self, msg: String) -> FountainError {
        FountainError::ControlFlow {
            message: msg,
            location: self.location_here(),
        }
    }

    pub fn parse_program(&mut self) -> FountainResult<Program> {
        let mut statements = Vec::new();
        while !self.is_at_end() {
            statements.push(self.parse_statement()?);
        }
        Ok(Program { statements })
    }

    fn parse_statement(&mut self) -> FountainResult<Stmt> {
        let stmt = self.parse_simple_statement()?;
        // Optional terminator, for multi-statement lines.
        self.matches(&TokenKind::Semicolon);
        Ok(stmt)
    }

    fn parse_simple_statement(&mut self) -> FountainResult<Stmt> {
        match self.current_kind() {
            TokenKind::Do => {
                self.advance();
                self.parse_block()
            }
            TokenKind::Print => {
                self.advance();
                let expr = self.parse_expression()?;
                Ok(Stmt::Print(expr))
            }
            TokenKind::If => {
                self.advance();
                self.parse_if_statement()
            }
            TokenKind::For => {
                self.advance();
                self.parse_for_statement()
            }
            TokenKind::Break => {
                if self.loop_depth == 0 {
                    return Err(self.control_flow_error("'break' outside loop".to_string()));
                }
                self.advance();
                Ok(Stmt::Break)
            }
            TokenKind::Continue => {
                if self.loop_depth == 0 {
                    return Err(self.control_flow_error("'continue' outside loop".to_string()));
                }
                self.advance();
                Ok(Stmt::Continue)
            }
            TokenKind::Fn => {
                self.advance();
                self.parse_function_statement()
            }
            TokenKind::Return => {
                if self.fn_depth == 0 {
                    return Err(self.error_with_location("'return' outside function".to_string()));
                }
                self.advance();
                let value = if self.starts_expression() {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                Ok(Stmt::Return { value })
            }
            TokenKind::Assert => {
                self.advance();
                let test = self.parse_expression()?;
                let message = if self.matches(&TokenKind::Comma) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };
                Ok(Stmt::Assert { test, message })
            }
            _ => self.parse_assign_or_expression(),
        }
    }

    /// Consume the left-hand side as if it were an expression, then turn it
    /// into an assignment target when '=' follows. This allows arbitrarily
    /// long targets (`a.b[c].d = ...`) with one-token lookahead.
    fn parse_assign_or_expression(&mut self) -> FountainResult<Stmt> {
        let expr = self.parse_expression()?;

        if self.matches(&TokenKind::Equal) {
            let target = match expr {
                Expr::Variable(name) => AssignTarget::Name(name),
                Expr::Index { table, key } => AssignTarget::Index {
                    table: *table,
                    key: *key,
                },
                Expr::Field { table, name } => AssignTarget::Field {
                    table: *table,
                    name,
                },
                other => {
                    return Err(self.error_with_location(format!(
                        "cannot assign to {}",
                        describe_expr(&other)
                    )))
                }
            };
            let value = self.parse_expression()?;
            return Ok(Stmt::Assign { target, value });
        }

        Ok(Stmt::Expression(expr))
    }

    fn parse_block(&mut self) -> FountainResult<Stmt> {
        let mut statements = Vec::new();
        while !self.check(&TokenKind::End) && !self.is_at_end() {
            statements.push(self.parse_statement()?);
        }
        self.expect(&TokenKind::End, "expected 'end' after block")?;
        Ok(Stmt::Block(statements))
    }

    fn parse_if_statement(&mut self) -> FountainResult<Stmt> {
        let test = self.parse_expression()?;
        self.expect(&TokenKind::Do, "expected 'do' after condition")?;

        let mut body = Vec::new();
        let mut orelse = Vec::new();
        let mut in_else = false;

        loop {
            if self.is_at_end() || self.check(&TokenKind::End) {
                break;
            }
            if self.matches(&TokenKind::Else) {
                if in_else {
                    return Err(self.error_with_location("duplicate 'else' branch".to_string()));
                }
                in_else = true;
                continue;
            }
            let stmt = self.parse_statement()?;
            if in_else {
                orelse.push(stmt);
            } else {
                body.push(stmt);
            }
        }

        self.expect(&TokenKind::End, "expected 'end' to close 'if'")?;
        Ok(Stmt::If { test, body, orelse })
    }

    fn parse_for_statement(&mut self) -> FountainResult<Stmt> {
        self.expect(&TokenKind::Do, "expected 'do' after 'for'")?;

        self.loop_depth += 1;
        let mut body = Vec::new();
        while !self.check(&TokenKind::End) && !self.is_at_end() {
            match self.parse_statement() {
                Ok(stmt) => body.push(stmt),
                Err(err) => {
                    self.loop_depth -= 1;
                    return Err(err);
                }
            }
        }
        self.loop_depth -= 1;

        self.expect(&TokenKind::End, "expected 'end' to close 'for'")?;
        Ok(Stmt::For { body })
    }

    fn parse_function_statement(&mut self) -> FountainResult<Stmt> {
        let name = self.consume_identifier("expected function name")?;
        self.expect(&TokenKind::LParen, "expected '(' after function name")?;

        let params = self.parse_parameter_list()?;
        self.expect(&TokenKind::RParen, "expected ')' after parameters")?;

        // The function body is a fresh control-flow context: `break` inside it
        // cannot target a loop outside it, and `return` becomes legal.
        let saved_loop_depth = std::mem::replace(&mut self.loop_depth, 0);
        self.fn_depth += 1;

        let mut body = Vec::new();
        let mut result = Ok(());
        while !self.check(&TokenKind::End) && !self.is_at_end() {
            match self.parse_statement() {
                Ok(stmt) => body.push(stmt),
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }

        self.fn_depth -= 1;
        self.loop_depth = saved_loop_depth;
        result?;

        self.expect(&TokenKind::End, "expected 'end' to close function")?;
        Ok(Stmt::Function(Function { name, params, body }))
    }

    fn parse_parameter_list(&mut self) -> FountainResult<Vec<Parameter>> {
        let mut params: Vec<Parameter> = Vec::new();
        if self.check(&TokenKind::RParen) {
            return Ok(params);
        }

        loop {
            let name = self.consume_identifier("expected parameter name")?;
            if params.iter().any(|p| p.name == name) {
                return Err(
                    self.error_with_location(format!("duplicate parameter name '{}'", name))
                );
            }
            let default = if self.matches(&TokenKind::Equal) {
                Some(self.parse_expression()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(self.error_with_location(format!(
                        "parameter '{}' without a default follows a defaulted parameter",
                        name
                    )));
                }
                None
            };
            params.push(Parameter { name, default });

            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }
        Ok(params)
    }

    fn parse_expression(&mut self) -> FountainResult<Expr> {
        let expr = self.parse_disjunction()?;

        // `a if c else b`. An `if` here may instead open an if statement
        // right after an expression statement, so commit to the conditional
        // only once `else` shows up after the condition; otherwise rewind
        // and leave the `if` for the statement level. The else arm recurses
        // so conditionals chain to the right.
        if self.check(&TokenKind::If) {
            let checkpoint = self.current;
            self.advance();
            if let Ok(test) = self.parse_disjunction() {
                if self.matches(&TokenKind::Else) {
                    let orelse = self.parse_expression()?;
                    return Ok(Expr::Conditional {
                        test: Box::new(test),
                        body: Box::new(expr),
                        orelse: Box::new(orelse),
                    });
                }
            }
            self.current = checkpoint;
        }

        Ok(expr)
    }

    fn parse_disjunction(&mut self) -> FountainResult<Expr> {
        let mut expr = self.parse_conjunction()?;
        while self.matches(&TokenKind::Or) {
            let right = self.parse_conjunction()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                op: LogicalOp::Or,
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_conjunction(&mut self) -> FountainResult<Expr> {
        let mut expr = self.parse_equality()?;
        while self.matches(&TokenKind::And) {
            let right = self.parse_equality()?;
            expr = Expr::Logical {
                left: Box::new(expr),
                op: LogicalOp::And,
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_equality(&mut self) -> FountainResult<Expr> {
        let mut expr = self.parse_comparison()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::EqEq => BinaryOp::Eq,
                TokenKind::NotEq => BinaryOp::NotEq,
                _ => break,
            };
            self.advance();
            let right = self.parse_comparison()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> FountainResult<Expr> {
        let mut expr = self.parse_term()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::Less => BinaryOp::Less,
                TokenKind::LessEq => BinaryOp::LessEq,
                TokenKind::Greater => BinaryOp::Greater,
                TokenKind::GreaterEq => BinaryOp::GreaterEq,
                _ => break,
            };
            self.advance();
            let right = self.parse_term()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_term(&mut self) -> FountainResult<Expr> {
        let mut expr = self.parse_factor()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_factor()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> FountainResult<Expr> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            expr = Expr::Binary {
                left: Box::new(expr),
                op,
                right: Box::new(right),
            };
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> FountainResult<Expr> {
        let op = match self.current_kind() {
            TokenKind::Minus => UnaryOp::Negate,
            TokenKind::Not => UnaryOp::Not,
            _ => return self.parse_call(),
        };
        self.advance();
        let right = self.parse_unary()?;
        Ok(Expr::Unary {
            op,
            right: Box::new(right),
        })
    }

    fn parse_call(&mut self) -> FountainResult<Expr> {
        let mut expr = self.parse_primary()?;

        // Postfix operators chain: f(a)(b), t[k].field(c), ...
        loop {
            if self.matches(&TokenKind::LParen) {
                let (pos_args, kw_args) = self.parse_argument_list()?;
                self.expect(&TokenKind::RParen, "expected ')' after arguments")?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    pos_args,
                    kw_args,
                };
            } else if self.matches(&TokenKind::LBracket) {
                let key = self.parse_expression()?;
                self.expect(&TokenKind::RBracket, "expected ']' after index")?;
                expr = Expr::Index {
                    table: Box::new(expr),
                    key: Box::new(key),
                };
            } else if self.matches(&TokenKind::Dot) {
                let name = self.consume_identifier("expected field name after '.'")?;
                expr = Expr::Field {
                    table: Box::new(expr),
                    name,
                };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    fn parse_argument_list(&mut self) -> FountainResult<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut pos_args = Vec::new();
        let mut kw_args: Vec<(String, Expr)> = Vec::new();

        if self.check(&TokenKind::RParen) {
            return Ok((pos_args, kw_args));
        }

        loop {
            if pos_args.len() + kw_args.len() >= MAX_CALL_ARGS {
                return Err(self.error_with_location(format!(
                    "more than {} arguments in call",
                    MAX_CALL_ARGS
                )));
            }

            if self.check_named_argument() {
                let name = self.consume_identifier("expected argument name")?;
                self.expect(&TokenKind::Equal, "expected '=' after argument name")?;
                if kw_args.iter().any(|(existing, _)| existing == &name) {
                    return Err(self.error_with_location(format!(
                        "duplicate named argument '{}'",
                        name
                    )));
                }
                let value = self.parse_expression()?;
                kw_args.push((name, value));
            } else {
                if !kw_args.is_empty() {
                    return Err(self.error_with_location(
                        "positional argument follows named argument".to_string(),
                    ));
                }
                pos_args.push(self.parse_expression()?);
            }

            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }

        Ok((pos_args, kw_args))
    }

    fn check_named_argument(&self) -> bool {
        matches!(self.current_kind(), TokenKind::Identifier(_))
            && matches!(self.peek_kind(1), Some(TokenKind::Equal))
    }

    fn parse_primary(&mut self) -> FountainResult<Expr> {
        match self.current_kind().clone() {
            TokenKind::False => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            TokenKind::Nil => {
                self.advance();
                Ok(Expr::Literal(Literal::Nil))
            }
            TokenKind::Number(value) => {
                self.advance();
                Ok(Expr::Literal(Literal::Number(value)))
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expr::Literal(Literal::Str(value)))
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::Variable(name))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(&TokenKind::RParen, "expected ')' after expression")?;
                Ok(Expr::Group(Box::new(expr)))
            }
            TokenKind::LBrace => {
                self.advance();
                self.parse_table_literal()
            }
            other => Err(self.error_with_location(format!(
                "expected expression, found {}",
                describe_token(&other)
            ))),
        }
    }

    fn parse_table_literal(&mut self) -> FountainResult<Expr> {
        let mut items = Vec::new();

        if self.matches(&TokenKind::RBrace) {
            return Ok(Expr::Table(items));
        }

        loop {
            if self.matches(&TokenKind::LBracket) {
                let key = self.parse_expression()?;
                self.expect(&TokenKind::RBracket, "expected ']' after table key")?;
                self.expect(&TokenKind::Equal, "expected '=' after table key")?;
                let value = self.parse_expression()?;
                items.push(TableItem::Keyed { key, value });
            } else if self.check_named_argument() {
                let name = self.consume_identifier("expected table key")?;
                self.expect(&TokenKind::Equal, "expected '=' after table key")?;
                let value = self.parse_expression()?;
                items.push(TableItem::Named { name, value });
            } else {
                items.push(TableItem::Positional(self.parse_expression()?));
            }

            if !self.matches(&TokenKind::Comma) {
                break;
            }
        }

        self.expect(&TokenKind::RBrace, "expected '}' after table items")?;
        Ok(Expr::Table(items))
    }

    fn starts_expression(&self) -> bool {
        matches!(
            self.current_kind(),
            TokenKind::Identifier(_)
                | TokenKind::Number(_)
                | TokenKind::Str(_)
                | TokenKind::True
                | TokenKind::False
                | TokenKind::Nil
                | TokenKind::Minus
                | TokenKind::Not
                | TokenKind::LParen
                | TokenKind::LBrace
        )
    }

    fn consume_identifier(&mut self, msg: &str) -> FountainResult<String> {
        if let TokenKind::Identifier(name) = self.current_kind().clone() {
            self.advance();
            Ok(name)
        } else {
            Err(self.error_with_location(msg.to_string()))
        }
    }

    fn expect(&mut self, expected: &TokenKind, msg: &str) -> FountainResult<()> {
        if self.check(expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_with_location(msg.to_string()))
        }
    }

    fn matches(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.current_kind()) == std::mem::discriminant(kind)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current_kind(), TokenKind::Eof)
    }

    fn current_kind(&self) -> &TokenKind {
        &self.tokens[self.current].kind
    }

    fn peek_kind(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.current + offset).map(|t| &t.kind)
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            self.current += 1;
        }
    }
}

fn describe_expr(expr: &Expr) -> &'static str {
    match expr {
        Expr::Literal(_) => "literal",
        Expr::Variable(_) => "variable",
        Expr::Unary { .. } => "unary expression",
        Expr::Binary { .. } => "binary expression",
        Expr::Logical { .. } => "logical expression",
        Expr::Conditional { .. } => "conditional expression",
        Expr::Call { .. } => "call",
        Expr::Index { .. } => "index expression",
        Expr::Field { .. } => "field access",
        Expr::Group(_) => "grouping",
        Expr::Table(_) => "table literal",
    }
}

fn describe_token(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Identifier(name) => format!("identifier '{}'", name),
        TokenKind::Number(n) => format!("number {}", n),
        TokenKind::Str(_) => "string literal".to_string(),
        TokenKind::Eof => "end of input".to_string(),
        other => format!("{:?}", other).to_lowercase(),
    }
}
