//=============================================
// zexus/parser.rs
//=============================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Tolerant multi-strategy parser for the interpreter
// Objective: Always produce a Program from any token stream,
//            collecting recoverable diagnostics along the way
//=============================================

pub mod context;
pub mod recovery;
pub mod structural;

use crate::ast::{
    ActionDecl, ActionSignature, AssignTarget, ContractDecl, EventDecl, Expr, InfixOp, PrefixOp,
    Program, ProtocolDecl, Stmt,
};
use crate::config;
use crate::errors::{Diagnostic, ErrorKind, RecoveryAction, ZexusError};
use crate::lexer::Lexer;
use crate::symbol::Symbol;
use crate::token::{Position, Token, TokenKind};

use recovery::RecoveryEngine;
use structural::StructuralAnalyzer;

//=============================================
//            Section 1: Facade
//=============================================

/// The tolerant parser: consumes the whole token stream and always yields a
/// Program, plus a (possibly empty) list of recoverable diagnostics.
pub struct TolerantParser;

impl TolerantParser {
    /// Lex and parse; lexical errors are repaired by dropping the offending
    /// character so that parsing still reaches end of input.
    pub fn parse_source(source: &str) -> (Program, Vec<Diagnostic>) {
        let (tokens, mut diagnostics) = lex_tolerant(source);
        let (program, parse_diagnostics) = Self::parse(&tokens);
        diagnostics.extend(parse_diagnostics);
        let mut program = program;
        program.recovery_notes = diagnostics.clone();
        (program, diagnostics)
    }

    pub fn parse(tokens: &[Token]) -> (Program, Vec<Diagnostic>) {
        let filtered: Vec<Token> = tokens
            .iter()
            .filter(|token| !matches!(token.kind, TokenKind::Newline))
            .cloned()
            .collect();

        if config::current().enable_advanced_parsing {
            match StructuralAnalyzer::new(&filtered).analyze() {
                Ok(outcome) => {
                    let parser = context::ContextStackParser::new(&filtered);
                    return parser.parse(outcome);
                }
                Err(error) => {
                    let mut engine = RecoveryEngine::new();
                    engine.report(
                        Diagnostic::new(
                            error.kind,
                            error.message.clone(),
                            error.position.clone().unwrap_or_else(Position::none),
                        )
                        .with_recovery(RecoveryAction::StructuralFallback),
                    );
                    return descend_whole_stream(&filtered, engine);
                }
            }
        }
        descend_whole_stream(&filtered, RecoveryEngine::new())
    }
}

/// Plain recursive descent over the raw stream, recovery engine attached.
fn descend_whole_stream(tokens: &[Token], mut engine: RecoveryEngine) -> (Program, Vec<Diagnostic>) {
    let end = tokens.len();
    let mut statements = Vec::new();
    let mut index = 0;
    while index < end && !matches!(tokens[index].kind, TokenKind::Eof) {
        if matches!(tokens[index].kind, TokenKind::Semicolon) {
            index += 1;
            continue;
        }
        let mut parser = DescentParser::over(tokens, index, end);
        match parser.parse_statement() {
            Ok(stmt) => {
                engine_extend(&mut engine, parser.take_diagnostics());
                statements.push(stmt);
                index = parser.pos;
            }
            Err(error) => {
                index = engine.synchronize(tokens, index.max(parser.pos), end, &error);
                if index <= parser.pos && index < end {
                    index += 1;
                }
            }
        }
    }
    let mut program = Program::new(statements);
    let diagnostics = engine.into_diagnostics();
    program.recovery_notes = diagnostics.clone();
    (program, diagnostics)
}

fn engine_extend(engine: &mut RecoveryEngine, diagnostics: Vec<Diagnostic>) {
    for diagnostic in diagnostics {
        engine.report(diagnostic);
    }
}

/// Repair lexical errors by deleting the offending character, so the
/// tolerant path always reaches end of input.
fn lex_tolerant(source: &str) -> (Vec<Token>, Vec<Diagnostic>) {
    let mut text: Vec<char> = source.chars().collect();
    let mut diagnostics = Vec::new();
    loop {
        let attempt: String = text.iter().collect();
        match Lexer::new(&attempt).tokenize() {
            Ok(tokens) => return (tokens, diagnostics),
            Err(error) => {
                let offset = error.position.as_ref().map(|p| p.offset).unwrap_or(0);
                diagnostics.push(
                    Diagnostic::new(
                        error.kind,
                        error.message.clone(),
                        error.position.clone().unwrap_or_else(Position::none),
                    )
                    .with_recovery(RecoveryAction::SkippedToStatementBoundary { dropped: 1 }),
                );
                if offset < text.len() {
                    text.remove(offset);
                } else if let Some(last) = text.pop() {
                    let _ = last;
                } else {
                    return (vec![], diagnostics);
                }
                if diagnostics.len() > 256 {
                    // Hopeless input; give up on further repair.
                    return (vec![], diagnostics);
                }
            }
        }
    }
}

//=============================================
//            Section 2: Recursive Descent Core
//=============================================

/// Pratt-style recursive descent over a token slice. Used by the
/// context-stack parser for clean segments and directly as the fallback.
/// All tolerances are always on here; the production parser enforces the
/// strict subset separately.
pub(crate) struct DescentParser<'a> {
    tokens: &'a [Token],
    pub(crate) pos: usize,
    end: usize,
    diagnostics: Vec<Diagnostic>,
    expr_depth: usize,
}

const MAX_EXPRESSION_DEPTH: usize = 512;

impl<'a> DescentParser<'a> {
    pub(crate) fn over(tokens: &'a [Token], start: usize, end: usize) -> Self {
        Self {
            tokens,
            pos: start,
            end: end.min(tokens.len()),
            diagnostics: Vec::new(),
            expr_depth: 0,
        }
    }

    pub(crate) fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos >= self.end || matches!(self.tokens[self.pos].kind, TokenKind::Eof)
    }

    fn peek(&self) -> &Token {
        static EOF_FALLBACK: once_cell::sync::Lazy<Token> = once_cell::sync::Lazy::new(|| {
            Token::new(TokenKind::Eof, "", Position::none())
        });
        self.tokens.get(self.pos).filter(|_| self.pos < self.end).unwrap_or(&EOF_FALLBACK)
    }

    /// Lookahead helper used by the tolerant strategies.
    pub(crate) fn peek_at(&self, k: usize) -> &Token {
        static EOF_FALLBACK: once_cell::sync::Lazy<Token> = once_cell::sync::Lazy::new(|| {
            Token::new(TokenKind::Eof, "", Position::none())
        });
        self.tokens
            .get(self.pos + k)
            .filter(|_| self.pos + k < self.end)
            .unwrap_or(&EOF_FALLBACK)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.end {
            self.pos += 1;
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
            Err(self.unexpected(expected))
        }
    }

    fn consume_identifier(&mut self, expected: &str) -> Result<Symbol, ZexusError> {
        match &self.peek().kind {
            TokenKind::Identifier(name) => {
                let symbol = Symbol::from(name.as_str());
                self.advance();
                Ok(symbol)
            }
            _ => Err(self.unexpected(expected)),
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

    fn current_position(&self) -> Position {
        self.peek().position.clone()
    }

    fn unexpected(&self, expected: &str) -> ZexusError {
        let token = self.peek();
        ZexusError::syntax(
            format!("expected {}, found '{}'", expected, token.kind),
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

    pub(crate) fn parse_statement(&mut self) -> Result<Stmt, ZexusError> {
        self.skip_separators();
        let position = self.current_position();
        let stmt = match &self.peek().kind {
            TokenKind::Let => self.parse_let(),
            TokenKind::Return => self.parse_return(),
            TokenKind::Print => self.parse_print(),
            TokenKind::For => self.parse_for_each(),
            TokenKind::If => self.parse_if_statement(),
            TokenKind::While => self.parse_while(),
            TokenKind::Try => self.parse_try_catch(),
            TokenKind::Action => self.parse_action_statement(),
            TokenKind::Event => self.parse_event(),
            TokenKind::Emit => self.parse_emit(),
            TokenKind::Enum => self.parse_enum(),
            TokenKind::Protocol => self.parse_protocol(),
            TokenKind::Contract => self.parse_contract(),
            TokenKind::External => self.parse_external(),
            TokenKind::Export => self.parse_export(),
            TokenKind::Debug => self.parse_debug(),
            TokenKind::Use => self.parse_use(),
            TokenKind::Persistent => self.parse_persistent_storage(),
            TokenKind::Screen => self.parse_renderer_def(TokenKind::Screen),
            TokenKind::Component => self.parse_renderer_def(TokenKind::Component),
            TokenKind::Theme => self.parse_renderer_def(TokenKind::Theme),
            TokenKind::Exactly => Err(ZexusError::syntax(
                "'exactly' blocks are reserved and not yet specified",
                position.clone(),
            )),
            TokenKind::LeftBrace => self.parse_block_statement(),
            _ => {
                let expr = self.parse_expression()?;
                Ok(Stmt::Expression {
                    expr,
                    position: position.clone(),
                })
            }
        }?;
        self.skip_separators();
        Ok(stmt)
    }

    fn parse_let(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.current_position();
        self.advance(); // let
        let name = self.consume_identifier("variable name after 'let'")?;
        self.consume(&TokenKind::Assign, "'=' in let statement")?;
        let value = self.parse_expression()?;
        Ok(Stmt::Let {
            name,
            value,
            position,
        })
    }

    fn parse_return(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.current_position();
        self.advance(); // return
        let value = if self.at_end()
            || self.check(&TokenKind::Semicolon)
            || self.check(&TokenKind::RightBrace)
        {
            None
        } else {
            Some(self.parse_expression()?)
        };
        Ok(Stmt::Return { value, position })
    }

    fn parse_print(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.current_position();
        self.advance(); // print
        let value = self.parse_expression()?;
        Ok(Stmt::Print { value, position })
    }

    fn parse_for_each(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.current_position();
        self.advance(); // for
        self.consume(&TokenKind::Each, "'each' after 'for'")?;
        let variable = self.consume_identifier("loop variable")?;
        self.consume(&TokenKind::In, "'in' in for-each")?;
        let iterable = self.parse_expression()?;
        let body = self.parse_block_like(&position)?;
        Ok(Stmt::ForEach {
            variable,
            iterable,
            body: Box::new(body),
            position,
        })
    }

    fn parse_if_statement(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.current_position();
        self.advance(); // if
        let condition = self.parse_expression()?;
        let consequence = self.parse_block_like(&position)?;
        let alternative = if self.match_kind(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                Some(Box::new(self.parse_if_statement()?))
            } else {
                Some(Box::new(self.parse_block_like(&position)?))
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

    fn parse_while(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.current_position();
        self.advance(); // while
        let condition = self.parse_expression()?;
        let body = self.parse_block_like(&position)?;
        Ok(Stmt::While {
            condition,
            body: Box::new(body),
            position,
        })
    }

    /// `try { … } catch err { … }` with `catch(err)` and `catch((err))`
    /// accepted as equivalent spellings.
    fn parse_try_catch(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.current_position();
        self.advance(); // try
        let body = self.parse_block_like(&position)?;
        let error_name = if self.match_kind(&TokenKind::Catch) {
            self.parse_catch_variable()?
        } else {
            self.diagnostics.push(Diagnostic::new(
                ErrorKind::SyntaxError,
                "try block has no catch handler; binding 'error'",
                self.current_position(),
            ));
            Symbol::from("error")
        };
        let handler = self.parse_block_like(&position)?;
        Ok(Stmt::TryCatch {
            body: Box::new(body),
            error_name,
            handler: Box::new(handler),
            position,
        })
    }

    fn parse_catch_variable(&mut self) -> Result<Symbol, ZexusError> {
        let mut depth = 0;
        while self.check(&TokenKind::LeftParen) {
            self.advance();
            depth += 1;
        }
        let name = if matches!(self.peek().kind, TokenKind::Identifier(_)) {
            self.consume_identifier("catch variable")?
        } else {
            Symbol::from("error")
        };
        for _ in 0..depth {
            self.consume(&TokenKind::RightParen, "')' closing catch variable")?;
        }
        Ok(name)
    }

    fn parse_action_statement(&mut self) -> Result<Stmt, ZexusError> {
        let decl = self.parse_action_decl(true)?;
        Ok(Stmt::Action { decl })
    }

    /// `action [async] [name](params) body`
    fn parse_action_decl(&mut self, require_name: bool) -> Result<ActionDecl, ZexusError> {
        let position = self.current_position();
        self.advance(); // action
        let is_async = self.match_kind(&TokenKind::Async);
        let name = if matches!(self.peek().kind, TokenKind::Identifier(_)) {
            Some(self.consume_identifier("action name")?)
        } else if require_name {
            return Err(self.unexpected("action name"));
        } else {
            None
        };
        let params = self.parse_parameter_list()?;
        let body = self.parse_block_like(&position)?;
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
        })
    }

    fn parse_parameter_list(&mut self) -> Result<Vec<Symbol>, ZexusError> {
        self.consume(&TokenKind::LeftParen, "'(' opening parameter list")?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                params.push(self.consume_identifier("parameter name")?);
                // Annotations are parsed and ignored at runtime.
                if self.match_kind(&TokenKind::Colon) {
                    self.consume_identifier("type annotation")?;
                }
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "')' closing parameter list")?;
        Ok(params)
    }

    fn parse_event(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.current_position();
        self.advance(); // event
        let name = self.consume_identifier("event name")?;
        self.consume(&TokenKind::LeftBrace, "'{' opening event fields")?;
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
        self.consume(&TokenKind::RightBrace, "'}' closing event fields")?;
        Ok(Stmt::Event {
            decl: EventDecl {
                name,
                fields,
                position,
            },
        })
    }

    fn parse_emit(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.current_position();
        self.advance(); // emit
        let name = self.consume_identifier("event name after 'emit'")?;
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
        let position = self.current_position();
        self.advance(); // enum
        let name = self.consume_identifier("enum name")?;
        self.consume(&TokenKind::LeftBrace, "'{' opening enum variants")?;
        let mut variants = Vec::new();
        while !self.check(&TokenKind::RightBrace) && !self.at_end() {
            variants.push(self.consume_identifier("enum variant")?);
            if !self.match_kind(&TokenKind::Comma) && !self.match_kind(&TokenKind::Semicolon) {
                break;
            }
        }
        self.consume(&TokenKind::RightBrace, "'}' closing enum variants")?;
        Ok(Stmt::Enum {
            name,
            variants,
            position,
        })
    }

    fn parse_protocol(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.current_position();
        self.advance(); // protocol
        let name = self.consume_identifier("protocol name")?;
        self.consume(&TokenKind::LeftBrace, "'{' opening protocol body")?;
        let mut signatures = Vec::new();
        loop {
            self.skip_separators();
            if self.check(&TokenKind::RightBrace) || self.at_end() {
                break;
            }
            self.consume(&TokenKind::Action, "'action' signature in protocol")?;
            let sig_name = self.consume_identifier("signature name")?;
            let params = self.parse_parameter_list()?;
            signatures.push(ActionSignature {
                name: sig_name,
                params,
            });
        }
        self.consume(&TokenKind::RightBrace, "'}' closing protocol body")?;
        Ok(Stmt::Protocol {
            decl: ProtocolDecl {
                name,
                signatures,
                position,
            },
        })
    }

    /// `contract Name { [require Protocol] [storage { … }] action … }`
    fn parse_contract(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.current_position();
        self.advance(); // contract
        let name = self.consume_identifier("contract name")?;
        self.consume(&TokenKind::LeftBrace, "'{' opening contract body")?;
        let mut protocol = None;
        let mut storage = Vec::new();
        let mut actions = Vec::new();
        loop {
            self.skip_separators();
            match &self.peek().kind {
                TokenKind::RightBrace | TokenKind::Eof => break,
                TokenKind::Require => {
                    self.advance();
                    protocol = Some(self.consume_identifier("protocol name after 'require'")?);
                }
                TokenKind::Storage => {
                    self.advance();
                    storage = self.parse_map_pairs()?;
                }
                TokenKind::Action => {
                    actions.push(self.parse_action_decl(true)?);
                }
                _ => return Err(self.unexpected("'require', 'storage' or 'action' in contract")),
            }
        }
        self.consume(&TokenKind::RightBrace, "'}' closing contract body")?;
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
        let position = self.current_position();
        self.advance(); // external
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

    fn parse_export(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.current_position();
        self.advance(); // export
        let inner = match &self.peek().kind {
            TokenKind::Let => self.parse_let()?,
            TokenKind::Action => self.parse_action_statement()?,
            TokenKind::Identifier(_) => {
                let name_position = self.current_position();
                let name = self.consume_identifier("exported name")?;
                Stmt::Expression {
                    expr: Expr::Identifier {
                        name,
                        position: name_position.clone(),
                    },
                    position: name_position,
                }
            }
            _ => return Err(self.unexpected("'let', 'action' or a name after 'export'")),
        };
        Ok(Stmt::Export {
            inner: Box::new(inner),
            position,
        })
    }

    fn parse_debug(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.current_position();
        self.advance(); // debug
        let message = self.parse_expression()?;
        let value = if self.match_kind(&TokenKind::Comma) {
            Some(self.parse_expression()?)
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
        let position = self.current_position();
        self.advance(); // use
        let module = self.consume_identifier("module name after 'use'")?;
        let alias = if self.match_identifier("as") {
            Some(self.consume_identifier("module alias")?)
        } else {
            None
        };
        Ok(Stmt::Use {
            module,
            alias,
            position,
        })
    }

    /// `persistent storage name { … }` is sugar for a map-typed binding.
    fn parse_persistent_storage(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.current_position();
        self.advance(); // persistent
        self.consume(&TokenKind::Storage, "'storage' after 'persistent'")?;
        let name = self.consume_identifier("storage name")?;
        let pairs_position = self.current_position();
        let pairs = self.parse_map_pairs()?;
        Ok(Stmt::Let {
            name,
            value: Expr::Map {
                pairs,
                position: pairs_position,
            },
            position,
        })
    }

    fn parse_renderer_def(&mut self, keyword: TokenKind) -> Result<Stmt, ZexusError> {
        let position = self.current_position();
        self.advance(); // screen | component | theme
        let name = self.consume_identifier("definition name")?;
        let pairs_position = self.current_position();
        let pairs = if self.check(&TokenKind::LeftBrace) {
            self.parse_map_pairs()?
        } else {
            Vec::new()
        };
        let properties = Expr::Map {
            pairs,
            position: pairs_position,
        };
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

    fn parse_block_statement(&mut self) -> Result<Stmt, ZexusError> {
        let position = self.current_position();
        self.consume(&TokenKind::LeftBrace, "'{' opening block")?;
        let mut statements = Vec::new();
        loop {
            self.skip_separators();
            if self.check(&TokenKind::RightBrace) || self.at_end() {
                break;
            }
            statements.push(self.parse_statement()?);
        }
        self.consume(&TokenKind::RightBrace, "'}' closing block")?;
        Ok(Stmt::Block {
            statements,
            position,
        })
    }

    /// A braced block or a colon-block (`if cond: …`).
    fn parse_block_like(&mut self, opener: &Position) -> Result<Stmt, ZexusError> {
        if self.check(&TokenKind::LeftBrace) {
            return self.parse_block_statement();
        }
        if self.match_kind(&TokenKind::Colon) {
            return self.parse_colon_block(opener);
        }
        Err(self.unexpected("'{' or ':' opening a block"))
    }

    /// Colon-block body: statements continue while they sit on the opening
    /// line or are indented past the opening column; the block ends at the
    /// next same-or-lower-column statement, a closing brace, or end of input.
    fn parse_colon_block(&mut self, opener: &Position) -> Result<Stmt, ZexusError> {
        let position = self.current_position();
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
            statements.push(self.parse_statement()?);
        }
        if statements.is_empty() {
            self.diagnostics.push(Diagnostic::new(
                ErrorKind::SyntaxError,
                "colon-block is empty; its end point is ambiguous",
                position.clone(),
            ));
        }
        Ok(Stmt::Block {
            statements,
            position,
        })
    }

    //=============================================
    //            Section 4: Expressions
    //=============================================

    pub(crate) fn parse_expression(&mut self) -> Result<Expr, ZexusError> {
        self.expr_depth += 1;
        if self.expr_depth > MAX_EXPRESSION_DEPTH {
            self.expr_depth -= 1;
            return Err(ZexusError::syntax(
                "expression nesting too deep",
                self.current_position(),
            ));
        }
        let result = self.parse_assignment();
        self.expr_depth -= 1;
        result
    }

    fn parse_assignment(&mut self) -> Result<Expr, ZexusError> {
        let left = self.parse_or()?;
        if self.check(&TokenKind::Assign) {
            let position = self.current_position();
            self.advance();
            let value = self.parse_assignment()?;
            let target = match left {
                Expr::Identifier { name, .. } => AssignTarget::Name(name),
                Expr::Index { object, index, .. } => AssignTarget::Index { object, index },
                Expr::Property { object, name, .. } => AssignTarget::Property { object, name },
                other => {
                    return Err(ZexusError::syntax(
                        format!("invalid assignment target: {:?}", expr_label(&other)),
                        position,
                    ));
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

    fn parse_or(&mut self) -> Result<Expr, ZexusError> {
        let mut left = self.parse_and()?;
        while self.check(&TokenKind::Or) {
            let position = self.current_position();
            self.advance();
            let right = self.parse_and()?;
            left = Expr::infix(left, InfixOp::Or, right, position);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ZexusError> {
        let mut left = self.parse_equality()?;
        while self.check(&TokenKind::And) {
            let position = self.current_position();
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::infix(left, InfixOp::And, right, position);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, ZexusError> {
        let mut left = self.parse_relational()?;
        loop {
            let operator = match self.peek().kind {
                TokenKind::Equal => InfixOp::Eq,
                TokenKind::NotEqual => InfixOp::NotEq,
                _ => break,
            };
            let position = self.current_position();
            self.advance();
            let right = self.parse_relational()?;
            left = Expr::infix(left, operator, right, position);
        }
        Ok(left)
    }

    fn parse_relational(&mut self) -> Result<Expr, ZexusError> {
        let mut left = self.parse_additive()?;
        loop {
            let operator = match self.peek().kind {
                TokenKind::Less => InfixOp::Lt,
                TokenKind::Greater => InfixOp::Gt,
                TokenKind::LessEqual => InfixOp::Le,
                TokenKind::GreaterEqual => InfixOp::Ge,
                _ => break,
            };
            let position = self.current_position();
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::infix(left, operator, right, position);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, ZexusError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let operator = match self.peek().kind {
                TokenKind::Plus => InfixOp::Add,
                TokenKind::Minus => InfixOp::Sub,
                _ => break,
            };
            let position = self.current_position();
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::infix(left, operator, right, position);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ZexusError> {
        let mut left = self.parse_unary()?;
        loop {
            let operator = match self.peek().kind {
                TokenKind::Star => InfixOp::Mul,
                TokenKind::Slash => InfixOp::Div,
                TokenKind::Percent => InfixOp::Mod,
                _ => break,
            };
            let position = self.current_position();
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::infix(left, operator, right, position);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ZexusError> {
        let position = self.current_position();
        match self.peek().kind {
            TokenKind::Minus => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Prefix {
                    operator: PrefixOp::Neg,
                    operand: Box::new(operand),
                    position,
                })
            }
            TokenKind::Bang => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::Prefix {
                    operator: PrefixOp::Not,
                    operand: Box::new(operand),
                    position,
                })
            }
            TokenKind::Await => {
                self.advance();
                let inner = self.parse_unary()?;
                Ok(Expr::Await {
                    inner: Box::new(inner),
                    position,
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ZexusError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek().kind {
                TokenKind::LeftParen => {
                    let position = self.current_position();
                    let args = self.parse_argument_list()?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                        position,
                    };
                }
                TokenKind::LeftBracket => {
                    let position = self.current_position();
                    self.advance();
                    let index = self.parse_expression()?;
                    self.consume(&TokenKind::RightBracket, "']' closing index")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                        position,
                    };
                }
                TokenKind::Dot => {
                    let position = self.current_position();
                    self.advance();
                    let name = self.consume_identifier("property name after '.'")?;
                    if self.check(&TokenKind::LeftParen) {
                        let args = self.parse_argument_list()?;
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
                            position,
                        };
                    }
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_argument_list(&mut self) -> Result<Vec<Expr>, ZexusError> {
        self.consume(&TokenKind::LeftParen, "'(' opening arguments")?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
                // Trailing comma before ')'.
                if self.check(&TokenKind::RightParen) {
                    break;
                }
            }
        }
        self.consume(&TokenKind::RightParen, "')' closing arguments")?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ZexusError> {
        let position = self.current_position();
        match self.peek().kind.clone() {
            TokenKind::Integer(value) => {
                self.advance();
                Ok(Expr::Integer { value, position })
            }
            TokenKind::Float(value) => {
                self.advance();
                Ok(Expr::Float { value, position })
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expr::Str { value, position })
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool {
                    value: true,
                    position,
                })
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool {
                    value: false,
                    position,
                })
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Null { position })
            }
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::Identifier {
                    name: Symbol::from(name.as_str()),
                    position,
                })
            }
            // `register_event(...)` is an ordinary call to the builtin.
            TokenKind::RegisterEvent => {
                self.advance();
                Ok(Expr::Identifier {
                    name: Symbol::from("register_event"),
                    position,
                })
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.consume(&TokenKind::RightParen, "')' closing group")?;
                Ok(inner)
            }
            TokenKind::LeftBracket => {
                self.advance();
                let mut elements = Vec::new();
                if !self.check(&TokenKind::RightBracket) {
                    loop {
                        elements.push(self.parse_expression()?);
                        if !self.match_kind(&TokenKind::Comma) {
                            break;
                        }
                        if self.check(&TokenKind::RightBracket) {
                            break;
                        }
                    }
                }
                self.consume(&TokenKind::RightBracket, "']' closing list")?;
                Ok(Expr::List { elements, position })
            }
            TokenKind::LeftBrace => {
                let pairs = self.parse_map_pairs()?;
                Ok(Expr::Map { pairs, position })
            }
            TokenKind::Lambda => self.parse_lambda(),
            TokenKind::Action => {
                let decl = self.parse_action_decl(false)?;
                Ok(Expr::ActionLiteral {
                    params: decl.params,
                    body: decl.body,
                    is_async: decl.is_async,
                    position: decl.position,
                })
            }
            TokenKind::If => self.parse_if_expression(),
            TokenKind::Embedded { language, body } => {
                self.advance();
                Ok(Expr::EmbeddedLiteral {
                    language,
                    code: body,
                    position,
                })
            }
            _ => Err(self.unexpected("an expression")),
        }
    }

    /// `lambda x -> expr` and `lambda(x, y) -> expr`.
    fn parse_lambda(&mut self) -> Result<Expr, ZexusError> {
        let position = self.current_position();
        self.advance(); // lambda
        let params = if self.check(&TokenKind::LeftParen) {
            self.parse_parameter_list()?
        } else {
            vec![self.consume_identifier("lambda parameter")?]
        };
        self.consume(&TokenKind::Arrow, "'->' in lambda")?;
        let body = self.parse_expression()?;
        Ok(Expr::Lambda {
            params,
            body: Box::new(body),
            position,
        })
    }

    /// `if cond { expr } else { expr }` in expression position.
    fn parse_if_expression(&mut self) -> Result<Expr, ZexusError> {
        let position = self.current_position();
        self.advance(); // if
        let condition = self.parse_expression()?;
        self.consume(&TokenKind::LeftBrace, "'{' opening if-expression arm")?;
        let consequence = self.parse_expression()?;
        self.consume(&TokenKind::RightBrace, "'}' closing if-expression arm")?;
        self.consume(&TokenKind::Else, "'else' in if-expression")?;
        self.consume(&TokenKind::LeftBrace, "'{' opening else arm")?;
        let alternative = self.parse_expression()?;
        self.consume(&TokenKind::RightBrace, "'}' closing else arm")?;
        Ok(Expr::IfExpr {
            condition: Box::new(condition),
            consequence: Box::new(consequence),
            alternative: Box::new(alternative),
            position,
        })
    }

    /// Map pairs: keys are string literals or bare identifiers (coerced to
    /// their spelling); entries separated by `,` or `;`, trailing separators
    /// allowed.
    fn parse_map_pairs(&mut self) -> Result<Vec<(String, Expr)>, ZexusError> {
        self.consume(&TokenKind::LeftBrace, "'{' opening map literal")?;
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
            self.consume(&TokenKind::Colon, "':' after map key")?;
            let value = self.parse_expression()?;
            pairs.push((key, value));
            if !self.match_kind(&TokenKind::Comma) && !self.match_kind(&TokenKind::Semicolon) {
                break;
            }
        }
        self.consume(&TokenKind::RightBrace, "'}' closing map literal")?;
        Ok(pairs)
    }
}

fn expr_label(expr: &Expr) -> &'static str {
    match expr {
        Expr::Call { .. } => "call",
        Expr::Infix { .. } => "infix expression",
        Expr::Prefix { .. } => "prefix expression",
        _ => "expression",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;

    fn parse_clean(source: &str) -> Program {
        let tokens = lexer::tokenize(source).unwrap();
        let (program, diagnostics) = TolerantParser::parse(&tokens);
        assert!(
            diagnostics.is_empty(),
            "unexpected diagnostics: {:?}",
            diagnostics
        );
        program
    }

    #[test]
    fn parses_let_with_precedence() {
        let program = parse_clean("let x = 1 + 2 * 3");
        assert_eq!(program.statements.len(), 1);
        match &program.statements[0] {
            Stmt::Let { value, .. } => match value {
                Expr::Infix { operator, right, .. } => {
                    assert_eq!(*operator, InfixOp::Add);
                    assert!(matches!(**right, Expr::Infix { operator: InfixOp::Mul, .. }));
                }
                other => panic!("expected infix, got {:?}", other),
            },
            other => panic!("expected let, got {:?}", other),
        }
    }

    #[test]
    fn statements_split_without_semicolons() {
        let program = parse_clean("let f = make() print(string(f()))");
        assert_eq!(program.statements.len(), 2);
        assert!(matches!(program.statements[0], Stmt::Let { .. }));
        assert!(matches!(program.statements[1], Stmt::Print { .. }));
    }

    #[test]
    fn map_literal_with_mixed_separators_and_bare_keys() {
        let program = parse_clean("let m = { \"a\": 1, b: 2; c: 3, }");
        match &program.statements[0] {
            Stmt::Let { value: Expr::Map { pairs, .. }, .. } => {
                let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
                assert_eq!(keys, vec!["a", "b", "c"]);
            }
            other => panic!("expected map let, got {:?}", other),
        }
    }

    #[test]
    fn catch_forms_are_equivalent() {
        for source in [
            "try { let x = 1 } catch err { print(err) }",
            "try { let x = 1 } catch(err) { print(err) }",
            "try { let x = 1 } catch((err)) { print(err) }",
        ] {
            let program = parse_clean(source);
            match &program.statements[0] {
                Stmt::TryCatch { error_name, .. } => assert_eq!(error_name.as_str(), "err"),
                other => panic!("expected try/catch, got {:?}", other),
            }
        }
    }

    #[test]
    fn lambda_short_form_matches_parenthesized() {
        let short = parse_clean("let f = lambda x -> x * 2");
        let full = parse_clean("let f = lambda(x) -> x * 2");
        let pick = |program: &Program| match &program.statements[0] {
            Stmt::Let { value: Expr::Lambda { params, .. }, .. } => params.clone(),
            other => panic!("expected lambda, got {:?}", other),
        };
        assert_eq!(pick(&short), pick(&full));
    }

    #[test]
    fn colon_block_ends_at_dedented_statement() {
        let program = parse_clean("if x:\n    print(1)\n    print(2)\nlet y = 3");
        assert_eq!(program.statements.len(), 2);
        match &program.statements[0] {
            Stmt::If { consequence, .. } => match &**consequence {
                Stmt::Block { statements, .. } => assert_eq!(statements.len(), 2),
                other => panic!("expected block, got {:?}", other),
            },
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn action_async_parses() {
        let program = parse_clean("action async fetch(url) { return url }");
        match &program.statements[0] {
            Stmt::Action { decl } => {
                assert!(decl.is_async);
                assert_eq!(decl.params.len(), 1);
            }
            other => panic!("expected action, got {:?}", other),
        }
    }

    #[test]
    fn recovery_produces_program_and_diagnostics() {
        let tokens = lexer::tokenize("let = 5 ; print(2)").unwrap();
        let (program, diagnostics) = TolerantParser::parse(&tokens);
        assert!(!diagnostics.is_empty());
        assert_eq!(program.statements.len(), 1);
        assert!(matches!(program.statements[0], Stmt::Print { .. }));
    }

    #[test]
    fn total_even_on_garbage() {
        let (program, diagnostics) = TolerantParser::parse_source("let @ # } while");
        assert!(!diagnostics.is_empty());
        // Still a Program, possibly empty.
        let _ = program.statements.len();
    }

    #[test]
    fn exactly_surfaces_a_clear_syntax_error() {
        let tokens = lexer::tokenize("exactly thing { }").unwrap();
        let (_, diagnostics) = TolerantParser::parse(&tokens);
        assert!(diagnostics
            .iter()
            .any(|d| d.message.contains("'exactly'")));
    }

    #[test]
    fn emit_with_payload() {
        let program = parse_clean("emit Tick { x: 7, label: \"go\" }");
        match &program.statements[0] {
            Stmt::Emit { name, payload, .. } => {
                assert_eq!(name.as_str(), "Tick");
                assert_eq!(payload.len(), 2);
            }
            other => panic!("expected emit, got {:?}", other),
        }
    }
}
