use std::fmt;

use num_bigint::BigInt;

/// Source position of a token or AST node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, column: usize, offset: usize) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }

    /// Placeholder position for synthesized nodes.
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// All token kinds in Zexus.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Literals
    Integer(BigInt),
    Float(f64),
    Str(String),
    Identifier(String),
    /// `{| lang ... |}` block: language tag plus raw body.
    Embedded { language: String, body: String },

    // Keywords
    Let,
    Return,
    Print,
    For,
    Each,
    In,
    Action,
    If,
    Else,
    While,
    Try,
    Catch,
    Debug,
    External,
    From,
    Use,
    Export,
    Exactly,
    Lambda,
    True,
    False,
    Null,
    Async,
    Await,
    Event,
    Emit,
    RegisterEvent,
    Enum,
    Protocol,
    Contract,
    Require,
    Persistent,
    Storage,
    Screen,
    Component,
    Theme,

    // Operators
    Assign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Less,
    Greater,
    Equal,
    NotEqual,
    LessEqual,
    GreaterEqual,
    And,
    Or,
    Arrow,
    Dot,

    // Delimiters
    Comma,
    Semicolon,
    Colon,
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,

    // Layout
    Newline,
    Eof,
}

impl TokenKind {
    /// True for keywords that open a new statement, used by the recovery
    /// engine and the colon-block end rule.
    pub fn starts_statement(&self) -> bool {
        matches!(
            self,
            TokenKind::Let
                | TokenKind::Return
                | TokenKind::Print
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Try
                | TokenKind::Action
                | TokenKind::Debug
                | TokenKind::External
                | TokenKind::Use
                | TokenKind::Export
                | TokenKind::Event
                | TokenKind::Emit
                | TokenKind::Enum
                | TokenKind::Protocol
                | TokenKind::Contract
                | TokenKind::Persistent
                | TokenKind::Screen
                | TokenKind::Component
                | TokenKind::Theme
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Integer(n) => write!(f, "{}", n),
            TokenKind::Float(n) => write!(f, "{}", n),
            TokenKind::Str(s) => write!(f, "\"{}\"", s),
            TokenKind::Identifier(s) => write!(f, "{}", s),
            TokenKind::Embedded { language, .. } => write!(f, "{{|{}|}}", language),
            other => write!(f, "{:?}", other),
        }
    }
}

/// A token with its original spelling and source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub position: Position,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, position: Position) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            position,
        }
    }

    pub fn is(&self, kind: &TokenKind) -> bool {
        &self.kind == kind
    }
}
