//=============================================
// zexus/compiler/parser.rs
//=============================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Production recursive descent parser
// Objective: Strict token stream -> compiler AST; accepts only
//            the enumerated tolerances, fails fast otherwise
//=============================================

use crate::ast::{InfixOp, PrefixOp};
use crate::compiler::ast::{
    next_node_id, ActionDecl, ActionSignature, AssignTarget, ContractDecl, EventDecl, Expr,
    Program, ProtocolDecl, Stmt,
};
use crate::config::{self, SyntaxStyle};
use crate::errors::ZexusError;
use crate::symbol::Symbol;
use crate::token::{Position, Token, TokenKind};

//=============================================
//            Section 1: Parser State
//=============================================

/// Strict recursive descent producing the compiler AST.
///
/// Tolerances accepted (and nothing else): optional/stray semicolons, the
/// three catch spellings, `,`/`;` as map separators with trailing separators,
/// bare identifiers as map keys, single-parameter `lambda x -> e`, and —
/// only when the process syntax style is `tolerable` — colon-blocks.
pub struct ProductionParser {
    tokens: Vec<Token>,
    current: usize,
    colon_blocks: bool,
}

const MAX_EXPRESSION_DEPTH: usize = 512;

impl ProductionParser {
    pub fn new(tokens: Vec<Token>) -> Self {
        let tokens: Vec<Token> = tokens
            .into_iter()
            .filter(|token| !matches!(token.kind, TokenKind::Newline))
            .collect();
        Self {
            tokens,
            current: 0,
            colon_blocks: config::current().syntax_style == SyntaxStyle::Tolerable,
        }
    }

    pub fn parse_program(&mut self) -> Result<Program, ZexusError> {
        let mut statements = Vec::new();
        self.skip_separators();
        while !self.at_end() {
            statements.push(self.parse_statement(0)?);
            self.skip_separators();
        }
        Ok(Program::new(statements))
    }

    //=============================================
    //            Section 2: Token Navigation
    //=============================================

    fn at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn peek_next(&self) -> &Token {
        &self.tokens[(self.current + 1).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.current + 1 < self.tokens.len() {
            self.current += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn match_kind(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume(&mut self, kind: &TokenKind, expected: &str) -> Result<Token, ZexusError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.expected(&[expected]))
        }
    }

    fn consume_identifier(&mut self, expected: &str) -> Result<Symbol, ZexusError> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let symbol = Symbol::from(name.as_str());
                self.advance();
                Ok(symbol)
            }
            _ => Err(self.expected(&[expected])),
        }
    }

    fn match_identifier(&mut self, word: &str) -> bool {
        if let TokenKind::Identifier(name) = &self.peek().kind {
            if name == word {
                self.advance();
                return true;
            }
        }
        false
    }

    fn position(&self) -> Position {
        self.peek().position.clone()
    }

    /// Hard error carrying the expected-token set.
    fn expected(&self, expected: &[&str]) -> ZexusError {
        let token = self.peek();
        ZexusError::syntax(
            format!("expected {}, found '{}'", expected.join(" or "), token.kind),
            token.position.clone(),
        )
    }

    fn skip_separators(&mut self) {
        while self.check(&TokenKind::Semicolon) {
            self.advance();
        }
    }

    //=============================================
    //            Section 3: Statements
    //=============================================

    fn parse_statement(&mut self, depth: usize) -> Result<Stmt, ZexusError> {
        self.skip_separators();
        let stmt = match &self.peek().kind {
            TokenKind::Let => self.parse_let(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Print => self.parse_print(),
            TokenKind::For => self.parse_for_each(depth),
            TokenKind::If => self.parse_if(depth),
            TokenKind::While => self.parse_while(depth),
            TokenKind::Try => self.parse_try_catch(depth),
            TokenKind::Action => Ok(Stmt::Action {
                decl: self.parse_action_decl(true, depth)?,
            }),
            TokenKind::Event => self.parse_event(),
            TokenKind::Emit => self.parse_emit(),
            TokenKind::Enum => self.parse_enum(),
            TokenKind::Protocol => self.parse_protocol(),
            TokenKind::Contract => self.parse_contract(depth),
            TokenKind::External => self.parse_external(),
            TokenKind::Export => self.parse_export(depth),
            TokenKind::Debug => self.parse_debug(),
            TokenKind::Use => self.parse_use(),
            TokenKind::Persistent => self.parse_persistent_storage(),
            TokenKind::Screen => self.parse_renderer_def(TokenKind::Screen),
            TokenKind::Component => self.parse_renderer_def(TokenKind::Component),
            TokenKind::Theme => self.parse_renderer_def(TokenKind::Theme),
            TokenKind::Exactly => Err(ZexusError::syntax(
                "'exactly' blocks are reserved and not yet specified",
                self.position(),
            )),
            TokenKind::LeftBrace => self.parse_block(depth),
            _ => {
                let position = self.position();
                let expr = self.parse_expression(0)?;
                Ok(Stmt::Expression { expr, position })
            }
        }?;
        self.skip_separators();
        Ok(stmt)
    }

    fn parse_let(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.advance();
        let name = self.consume_identifier("variable name")?;
        self.consume(&TokenKind::Assign, "'='")?;
        let value = self.parse_expression(0)?;
        Ok(Stmt::Let {
            name,
            value,
            position,
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.advance();
        let value = if self.at_end()
            || self.check(&TokenKind::Semicolon)
            || self.check(&TokenKind::RightBrace)
        {
            None
        } else {
            Some(self.parse_expression(0)?)
        };
        Ok(Stmt::Return { value, position })
    }

    fn parse_print(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.advance();
        let value = self.parse_expression(0)?;
        Ok(Stmt::Print { value, position })
    }

    fn parse_for_each(&mut self, depth: usize) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.advance();
        self.consume(&TokenKind::Each, "'each'")?;
        let variable = self.consume_identifier("loop variable")?;
        self.consume(&TokenKind::In, "'in'")?;
        let iterable = self.parse_expression(0)?;
        let body = self.parse_block_like(&position, depth)?;
        Ok(Stmt::ForEach {
            variable,
            iterable,
            body: Box::new(body),
            position,
        })
    }

    fn parse_if(&mut self, depth: usize) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.advance();
        let condition = self.parse_expression(0)?;
        let consequence = self.parse_block_like(&position, depth)?;
        let alternative = if self.match_kind(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                Some(Box::new(self.parse_if(depth)?))
            } else {
                Some(Box::new(self.parse_block_like(&position, depth)?))
            }
        } else {
            None
        };
        Ok(Stmt::If {
            condition,
            consequence: Box::new(consequence),
            alternative,
            position,
        })
    }

    fn parse_while(&mut self, depth: usize) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.advance();
        let condition = self.parse_expression(0)?;
        let body = self.parse_block_like(&position, depth)?;
        Ok(Stmt::While {
            condition,
            body: Box::new(body),
            position,
        })
    }

    fn parse_try_catch(&mut self, depth: usize) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.advance();
        let body = self.parse_block_like(&position, depth)?;
        self.consume(&TokenKind::Catch, "'catch'")?;
        let error_name = self.parse_catch_variable()?;
        let handler = self.parse_block_like(&position, depth)?;
        Ok(Stmt::TryCatch {
            body: Box::new(body),
            error_name,
            handler: Box::new(handler),
            position,
        })
    }

    /// `catch err`, `catch(err)` and `catch((err))` are equivalent.
    fn parse_catch_variable(&mut self) -> Result<Symbol, ZexusError> {
        let mut parens = 0;
        while self.check(&TokenKind::LeftParen) && parens < 2 {
            self.advance();
            parens += 1;
        }
        let name = self.consume_identifier("catch variable")?;
        for _ in 0..parens {
            self.consume(&TokenKind::RightParen, "')'")?;
        }
        Ok(name)
    }

    fn parse_action_decl(
        &mut self,
        require_name: bool,
        depth: usize,
    ) -> Result<ActionDecl, ZexusError> {
        let position = self.position();
        self.advance(); // action
        let is_async = self.match_kind(&TokenKind::Async);
        let name = if matches!(self.peek().kind, TokenKind::Identifier(_)) {
            Some(self.consume_identifier("action name")?)
        } else if require_name {
            return Err(self.expected(&["action name"]));
        } else {
            None
        };
        let params = self.parse_parameter_list()?;
        let body = self.parse_block_like(&position, depth + 1)?;
        let body = match body {
            Stmt::Block { statements, .. } => statements,
            other => vec![other],
        };
        Ok(ActionDecl {
            name,
            params,
            body,
            is_async,
            position,
            node_id: next_node_id(),
        })
    }

    fn parse_parameter_list(&mut self) -> Result<Vec<Symbol>, ZexusError> {
        self.consume(&TokenKind::LeftParen, "'('")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                params.push(self.consume_identifier("parameter name")?);
                if self.match_kind(&TokenKind::Colon) {
                    self.consume_identifier("type annotation")?;
                }
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "')'")?;
        Ok(params)
    }

    fn parse_event(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.advance();
        let name = self.consume_identifier("event name")?;
        self.consume(&TokenKind::LeftBrace, "'{'")?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.at_end() {
            fields.push(self.consume_identifier("event field name")?);
            if self.match_kind(&TokenKind::Colon) {
                self.consume_identifier("field type annotation")?;
            }
            if !self.match_kind(&TokenKind::Comma) && !self.match_kind(&TokenKind::Semicolon) {
                break;
            }
        }
        self.consume(&TokenKind::RightBrace, "'}'")?;
        Ok(Stmt::Event {
            decl: EventDecl {
                name,
                fields,
                position,
            },
        })
    }

    fn parse_emit(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.advance();
        let name = self.consume_identifier("event name")?;
        let payload = if self.check(&TokenKind::LeftBrace) {
            self.parse_map_pairs()?
        } else {
            Vec::new()
        };
        Ok(Stmt::Emit {
            name,
            payload,
            position,
        })
    }

    fn parse_enum(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.advance();
        let name = self.consume_identifier("enum name")?;
        self.consume(&TokenKind::LeftBrace, "'{'")?;
        let mut variants = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.at_end() {
            variants.push(self.consume_identifier("enum variant")?);
            if !self.match_kind(&TokenKind::Comma) && !self.match_kind(&TokenKind::Semicolon) {
                break;
            }
        }
        self.consume(&TokenKind::RightBrace, "'}'")?;
        Ok(Stmt::Enum {
            name,
            variants,
            position,
        })
    }

    fn parse_protocol(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.advance();
        let name = self.consume_identifier("protocol name")?;
        self.consume(&TokenKind::LeftBrace, "'{'")?;
        let mut signatures = Vec::new();
        loop {
            self.skip_separators();
            if self.check(&TokenKind::RightBrace) || self.at_end() {
                break;
            }
            self.consume(&TokenKind::Action, "'action'")?;
            let sig_name = self.consume_identifier("signature name")?;
            let params = self.parse_parameter_list()?;
            signatures.push(ActionSignature {
                name: sig_name,
                params,
            });
        }
        self.consume(&TokenKind::RightBrace, "'}'")?;
        Ok(Stmt::Protocol {
            decl: ProtocolDecl {
                name,
                signatures,
                position,
            },
        })
    }

    fn parse_contract(&mut self, depth: usize) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.advance();
        let name = self.consume_identifier("contract name")?;
        self.consume(&TokenKind::LeftBrace, "'{'")?;
        let mut protocol = None;
        let mut storage = Vec::new();
        let mut actions = Vec::new();
        loop {
            self.skip_separators();
            match &self.peek().kind {
                TokenKind::RightBrace | TokenKind::Eof => break,
                TokenKind::Require => {
                    self.advance();
                    protocol = Some(self.consume_identifier("protocol name")?);
                }
                TokenKind::Storage => {
                    self.advance();
                    storage = self.parse_map_pairs()?;
                }
                TokenKind::Action => actions.push(self.parse_action_decl(true, depth + 1)?),
                _ => return Err(self.expected(&["'require'", "'storage'", "'action'", "'}'"])),
            }
        }
        self.consume(&TokenKind::RightBrace, "'}'")?;
        Ok(Stmt::Contract {
            decl: ContractDecl {
                name,
                protocol,
                storage,
                actions,
                position,
            },
        })
    }

    fn parse_external(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.advance();
        let name = self.consume_identifier("external name")?;
        let source = if self.match_kind(&TokenKind::From) {
            match self.advance() {
                Token {
                    kind: TokenKind::Str(path),
                    ..
                } => Some(path),
                token => {
                    return Err(ZexusError::syntax(
                        "expected string source after 'from'",
                        token.position,
                    ));
                }
            }
        } else {
            None
        };
        Ok(Stmt::External {
            name,
            source,
            position,
        })
    }

    fn parse_export(&mut self, depth: usize) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.advance();
        let inner = match &self.peek().kind {
            TokenKind::Let => self.parse_let()?,
            TokenKind::Action => Stmt::Action {
                decl: self.parse_action_decl(true, depth)?,
            },
            TokenKind::Identifier(_) => {
                let name_position = self.position();
                let name = self.consume_identifier("exported name")?;
                Stmt::Expression {
                    expr: Expr::identifier(name, name_position.clone()),
                    position: name_position,
                }
            }
            _ => return Err(self.expected(&["'let'", "'action'", "a name"])),
        };
        Ok(Stmt::Export {
            inner: Box::new(inner),
            position,
        })
    }

    fn parse_debug(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.advance();
        let message = self.parse_expression(0)?;
        let value = if self.match_kind(&TokenKind::Comma) {
            Some(self.parse_expression(0)?)
        } else {
            None
        };
        Ok(Stmt::Debug {
            message,
            value,
            position,
        })
    }

    fn parse_use(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.advance();
        let module = self.consume_identifier("module name")?;
        let alias = if self.match_identifier("as") {
            Some(self.consume_identifier("module alias")?)
        } else {
            None
        };
        Ok(Stmt::Import {
            module,
            alias,
            position,
        })
    }

    fn parse_persistent_storage(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.advance();
        self.consume(&TokenKind::Storage, "'storage'")?;
        let name = self.consume_identifier("storage name")?;
        let pairs = self.parse_map_pairs()?;
        Ok(Stmt::Let {
            name,
            value: Expr::Map(pairs),
            position,
        })
    }

    fn parse_renderer_def(&mut self, keyword: TokenKind) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.advance();
        let name = self.consume_identifier("definition name")?;
        let pairs = if self.check(&TokenKind::LeftBrace) {
            self.parse_map_pairs()?
        } else {
            Vec::new()
        };
        let properties = Expr::Map(pairs);
        Ok(match keyword {
            TokenKind::Screen => Stmt::ScreenDef {
                name,
                properties,
                position,
            },
            TokenKind::Component => Stmt::ComponentDef {
                name,
                properties,
                position,
            },
            _ => Stmt::ThemeDef {
                name,
                properties,
                position,
            },
        })
    }

    fn parse_block(&mut self, depth: usize) -> Result<Stmt, ZexusError> {
        let position = self.position();
        self.consume(&TokenKind::LeftBrace, "'{'")?;
        let mut statements = Vec::new();
        loop {
            self.skip_separators();
            if self.check(&TokenKind::RightBrace) || self.at_end() {
                break;
            }
            statements.push(self.parse_statement(depth + 1)?);
        }
        self.consume(&TokenKind::RightBrace, "'}'")?;
        Ok(Stmt::Block {
            statements,
            position,
        })
    }

    fn parse_block_like(&mut self, opener: &Position, depth: usize) -> Result<Stmt, ZexusError> {
        if self.check(&TokenKind::LeftBrace) {
            return self.parse_block(depth);
        }
        if self.colon_blocks && self.check(&TokenKind::Colon) {
            self.advance();
            return self.parse_colon_block(opener, depth);
        }
        if self.colon_blocks {
            Err(self.expected(&["'{'", "':'"]))
        } else {
            Err(self.expected(&["'{'"]))
        }
    }

    /// Same end rule as the tolerant parser: the block extends while
    /// statements sit on the opening line or are indented past the opening
    /// column.
    fn parse_colon_block(&mut self, opener: &Position, depth: usize) -> Result<Stmt, ZexusError> {
        let position = self.position();
        let mut statements = Vec::new();
        loop {
            self.skip_separators();
            if self.at_end() || self.check(&TokenKind::RightBrace) {
                break;
            }
            let next = self.peek();
            if next.position.line > opener.line && next.position.column <= opener.column {
                break;
            }
            statements.push(self.parse_statement(depth + 1)?);
        }
        if statements.is_empty() {
            return Err(ZexusError::syntax("colon-block is empty", position));
        }
        Ok(Stmt::Block {
            statements,
            position,
        })
    }

    //=============================================
    //            Section 4: Expressions
    //=============================================

    fn parse_expression(&mut self, depth: usize) -> Result<Expr, ZexusError> {
        if depth > MAX_EXPRESSION_DEPTH {
            return Err(ZexusError::syntax(
                "expression nesting too deep",
                self.position(),
            ));
        }
        self.parse_assignment(depth)
    }

    fn parse_assignment(&mut self, depth: usize) -> Result<Expr, ZexusError> {
        let left = self.parse_or(depth)?;
        if self.check(&TokenKind::Assign) {
            let position = self.position();
            self.advance();
            let value = self.parse_assignment(depth + 1)?;
            let target = match left {
                Expr::Identifier { name, .. } => AssignTarget::Name(name),
                Expr::Index { object, index } => AssignTarget::Index { object, index },
                Expr::Property { object, name } => AssignTarget::Property { object, name },
                _ => {
                    return Err(ZexusError::syntax("invalid assignment target", position));
                }
            };
            return Ok(Expr::Assign {
                target,
                value: Box::new(value),
                position,
            });
        }
        Ok(left)
    }

    fn parse_or(&mut self, depth: usize) -> Result<Expr, ZexusError> {
        let mut left = self.parse_and(depth)?;
        while self.match_kind(&TokenKind::Or) {
            let right = self.parse_and(depth)?;
            left = Expr::Infix {
                left: Box::new(left),
                operator: InfixOp::Or,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self, depth: usize) -> Result<Expr, ZexusError> {
        let mut left = self.parse_equality(depth)?;
        while self.match_kind(&TokenKind::And) {
            let right = self.parse_equality(depth)?;
            left = Expr::Infix {
                left: Box::new(left),
                operator: InfixOp::And,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self, depth: usize) -> Result<Expr, ZexusError> {
        let mut left = self.parse_relational(depth)?;
        loop {
            let operator = match self.peek().kind {
                TokenKind::Equal => InfixOp::Eq,
                TokenKind::NotEqual => InfixOp::NotEq,
                _ => break,
            };
            self.advance();
            let right = self.parse_relational(depth)?;
            left = Expr::Infix {
                left: Box::new(left),
                operator,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_relational(&mut self, depth: usize) -> Result<Expr, ZexusError> {
        let mut left = self.parse_additive(depth)?;
        loop {
            let operator = match self.peek().kind {
                TokenKind::Less => InfixOp::Lt,
                TokenKind::Greater => InfixOp::Gt,
                TokenKind::LessEqual => InfixOp::Le,
                TokenKind::GreaterEqual => InfixOp::Ge,
                _ => break,
            };
            self.advance();
            let right = self.parse_additive(depth)?;
            left = Expr::Infix {
                left: Box::new(left),
                operator,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self, depth: usize) -> Result<Expr, ZexusError> {
        let mut left = self.parse_multiplicative(depth)?;
        loop {
            let operator = match self.peek().kind {
                TokenKind::Plus => InfixOp::Add,
                TokenKind::Minus => InfixOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative(depth)?;
            left = Expr::Infix {
                left: Box::new(left),
                operator,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self, depth: usize) -> Result<Expr, ZexusError> {
        let mut left = self.parse_unary(depth)?;
        loop {
            let operator = match self.peek().kind {
                TokenKind::Star => InfixOp::Mul,
                TokenKind::Slash => InfixOp::Div,
                TokenKind::Percent => InfixOp::Mod,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary(depth)?;
            left = Expr::Infix {
                left: Box::new(left),
                operator,
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self, depth: usize) -> Result<Expr, ZexusError> {
        match self.peek().kind {
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_unary(depth)?;
                Ok(Expr::Prefix {
                    operator: PrefixOp::Neg,
                    operand: Box::new(operand),
                })
            }
            TokenKind::Bang => {
                self.advance();
                let operand = self.parse_unary(depth)?;
                Ok(Expr::Prefix {
                    operator: PrefixOp::Not,
                    operand: Box::new(operand),
                })
            }
            TokenKind::Await => {
                let position = self.position();
                self.advance();
                let inner = self.parse_unary(depth)?;
                Ok(Expr::Await {
                    inner: Box::new(inner),
                    position,
                })
            }
            _ => self.parse_postfix(depth),
        }
    }

    fn parse_postfix(&mut self, depth: usize) -> Result<Expr, ZexusError> {
        let mut expr = self.parse_primary(depth)?;
        loop {
            match self.peek().kind {
                TokenKind::LeftParen => {
                    let position = self.position();
                    let args = self.parse_argument_list(depth)?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        position,
                    };
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    let index = self.parse_expression(depth + 1)?;
                    self.consume(&TokenKind::RightBracket, "']'")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                TokenKind::Dot => {
                    let position = self.position();
                    self.advance();
                    let name = self.consume_identifier("property name")?;
                    if self.check(&TokenKind::LeftParen) {
                        let args = self.parse_argument_list(depth)?;
                        expr = Expr::MethodCall {
                            receiver: Box::new(expr),
                            method: name,
                            args,
                            position,
                        };
                    } else {
                        expr = Expr::Property {
                            object: Box::new(expr),
                            name,
                        };
                    }
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_argument_list(&mut self, depth: usize) -> Result<Vec<Expr>, ZexusError> {
        self.consume(&TokenKind::LeftParen, "'('")?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                args.push(self.parse_expression(depth + 1)?);
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
                if self.check(&TokenKind::RightParen) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "')'")?;
        Ok(args)
    }

    fn parse_primary(&mut self, depth: usize) -> Result<Expr, ZexusError> {
        let position = self.position();
        match self.peek().kind.clone() {
            TokenKind::Integer(value) => {
                self.advance();
                Ok(Expr::Integer(value))
            }
            TokenKind::Float(value) => {
                self.advance();
                Ok(Expr::Float(value))
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expr::Str(value))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Null)
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::identifier(name.as_str(), position))
            }
            TokenKind::RegisterEvent => {
                self.advance();
                Ok(Expr::identifier("register_event", position))
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expression(depth + 1)?;
                self.consume(&TokenKind::RightParen, "')'")?;
                Ok(inner)
            }
            TokenKind::LeftBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(&TokenKind::RightBracket) {
                    loop {
                        elements.push(self.parse_expression(depth + 1)?);
                        if !self.match_kind(&TokenKind::Comma) {
                            break;
                        }
                        if self.check(&TokenKind::RightBracket) {
                            break;
                        }
                    }
                }
                self.consume(&TokenKind::RightBracket, "']'")?;
                Ok(Expr::List(elements))
            }
            TokenKind::LeftBrace => Ok(Expr::Map(self.parse_map_pairs()?)),
            TokenKind::Lambda => self.parse_lambda(depth),
            TokenKind::Action => {
                let decl = self.parse_action_decl(false, depth)?;
                Ok(Expr::ActionLiteral { decl })
            }
            TokenKind::If => self.parse_if_expression(depth),
            TokenKind::Embedded { language, body } => {
                self.advance();
                Ok(Expr::EmbeddedLiteral {
                    language,
                    code: body,
                })
            }
            _ => Err(self.expected(&["an expression"])),
        }
    }

    fn parse_lambda(&mut self, depth: usize) -> Result<Expr, ZexusError> {
        self.advance(); // lambda
        let params = if self.check(&TokenKind::LeftParen) {
            self.parse_parameter_list()?
        } else {
            vec![self.consume_identifier("lambda parameter")?]
        };
        self.consume(&TokenKind::Arrow, "'->'")?;
        let body = self.parse_expression(depth + 1)?;
        Ok(Expr::Lambda {
            params,
            body: Box::new(body),
            node_id: next_node_id(),
        })
    }

    fn parse_if_expression(&mut self, depth: usize) -> Result<Expr, ZexusError> {
        self.advance(); // if
        let condition = self.parse_expression(depth + 1)?;
        self.consume(&TokenKind::LeftBrace, "'{'")?;
        let consequence = self.parse_expression(depth + 1)?;
        self.consume(&TokenKind::RightBrace, "'}'")?;
        self.consume(&TokenKind::Else, "'else'")?;
        self.consume(&TokenKind::LeftBrace, "'{'")?;
        let alternative = self.parse_expression(depth + 1)?;
        self.consume(&TokenKind::RightBrace, "'}'")?;
        Ok(Expr::IfExpr {
            condition: Box::new(condition),
            consequence: Box::new(consequence),
            alternative: Box::new(alternative),
        })
    }

    fn parse_map_pairs(&mut self) -> Result<Vec<(String, Expr)>, ZexusError> {
        self.consume(&TokenKind::LeftBrace, "'{'")?;
        let mut pairs = Vec::new();
        loop {
            while self.match_kind(&TokenKind::Comma) || self.match_kind(&TokenKind::Semicolon) {}
            if self.check(&TokenKind::RightBrace) || self.at_end() {
                break;
            }
            let key = match self.advance() {
                Token {
                    kind: TokenKind::Str(text),
                    ..
                } => text,
                Token {
                    kind: TokenKind::Identifier(name),
                    ..
                } => name,
                token => {
                    return Err(ZexusError::syntax(
                        format!("invalid map key '{}'", token.kind),
                        token.position,
                    ));
                }
            };
            self.consume(&TokenKind::Colon, "':'")?;
            let value = self.parse_expression(0)?;
            pairs.push((key, value));
            if !self.match_kind(&TokenKind::Comma) && !self.match_kind(&TokenKind::Semicolon) {
                break;
            }
        }
        self.consume(&TokenKind::RightBrace, "'}'")?;
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;

    fn parse(source: &str) -> Result<Program, ZexusError> {
        let tokens = lexer::tokenize(source)?;
        ProductionParser::new(tokens).parse_program()
    }

    #[test]
    fn accepts_the_enumerated_tolerances() {
        assert!(parse("let m = { \"a\": 1, b: 2; c: 3, } ;;").is_ok());
        assert!(parse("try { let x = 1 } catch err { print(err) }").is_ok());
        assert!(parse("try { let x = 1 } catch((err)) { print(err) }").is_ok());
        assert!(parse("let f = lambda x -> x + 1").is_ok());
    }

    #[test]
    fn rejects_malformed_input_fast() {
        let err = parse("let = 5").unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::SyntaxError);
        assert!(err.message.contains("expected"));
        assert!(err.position.is_some());
    }

    #[test]
    fn colon_blocks_require_tolerable_style() {
        crate::config::set_syntax_style(crate::config::SyntaxStyle::Universal);
        assert!(parse("if x: print(1)").is_err());
        crate::config::set_syntax_style(crate::config::SyntaxStyle::Tolerable);
        assert!(parse("if x: print(1)").is_ok());
        crate::config::set_syntax_style(crate::config::SyntaxStyle::Universal);
    }

    #[test]
    fn exactly_is_a_hard_error() {
        let err = parse("exactly thing { }").unwrap_err();
        assert!(err.message.contains("'exactly'"));
    }

    #[test]
    fn use_parses_to_import() {
        let program = parse("use math as m").unwrap();
        match &program.statements[0] {
            Stmt::Import { module, alias, .. } => {
                assert_eq!(module.as_str(), "math");
                assert_eq!(alias.as_ref().unwrap().as_str(), "m");
            }
            other => panic!("expected import, got {:?}", other),
        }
    }

    #[test]
    fn action_async_flag_carries() {
        let program = parse("action async fetch(url) { return url }").unwrap();
        match &program.statements[0] {
            Stmt::Action { decl } => assert!(decl.is_async),
            other => panic!("expected action, got {:?}", other),
        }
    }
}
