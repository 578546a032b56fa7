//=====================================================
// File: errors.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Zexus error taxonomy and diagnostics
// Objective: One error shape shared by lexer, parsers,
//            evaluator, compiler and VM
//=====================================================

use std::fmt;

use crate::token::Position;

/// Error kinds surfaced to Zexus programs and hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    LexicalError,
    SyntaxError,
    SemanticError,
    ArityError,
    TypeError,
    NameError,
    AttributeError,
    ArithmeticError,
    IoError,
    ProtocolError,
    EventError,
    InterruptedError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::LexicalError => "LexicalError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::SemanticError => "SemanticError",
            ErrorKind::ArityError => "ArityError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::NameError => "NameError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::ArithmeticError => "ArithmeticError",
            ErrorKind::IoError => "IOError",
            ErrorKind::ProtocolError => "ProtocolError",
            ErrorKind::EventError => "EventError",
            ErrorKind::InterruptedError => "InterruptedError",
            ErrorKind::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error raised anywhere in the pipeline.
///
/// Rendered on one line as `<kind> at <pos>: <message>`; the position is
/// omitted when the error has no source anchor (e.g. host-raised I/O).
#[derive(Debug, Clone, PartialEq)]
pub struct ZexusError {
    pub kind: ErrorKind,
    pub message: String,
    pub position: Option<Position>,
}

impl ZexusError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            position: None,
        }
    }

    pub fn at(kind: ErrorKind, message: impl Into<String>, position: Position) -> Self {
        Self {
            kind,
            message: message.into(),
            position: Some(position),
        }
    }

    pub fn lexical(message: impl Into<String>, position: Position) -> Self {
        Self::at(ErrorKind::LexicalError, message, position)
    }

    pub fn syntax(message: impl Into<String>, position: Position) -> Self {
        Self::at(ErrorKind::SyntaxError, message, position)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn name_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NameError, message)
    }

    pub fn arity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ArityError, message)
    }

    pub fn arithmetic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ArithmeticError, message)
    }

    pub fn attribute(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AttributeError, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IoError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    pub fn with_position(mut self, position: Position) -> Self {
        if self.position.is_none() {
            self.position = Some(position);
        }
        self
    }
}

impl fmt::Display for ZexusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.position {
            Some(pos) => write!(f, "{} at {}: {}", self.kind.as_str(), pos, self.message),
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}

impl std::error::Error for ZexusError {}

impl From<std::io::Error> for ZexusError {
    fn from(value: std::io::Error) -> Self {
        ZexusError::io(value.to_string())
    }
}

/// Recovery action taken by the tolerant parser when it skipped past a
/// malformed region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Dropped tokens up to the next `;` or newline at brace depth 0.
    SkippedToStatementBoundary { dropped: usize },
    /// Closed a block on an unmatched `}`.
    ClosedUnbalancedBlock,
    /// Fell back from structural analysis to plain recursive descent.
    StructuralFallback,
    /// No recovery was needed; the diagnostic is advisory.
    None,
}

/// A collected (non-fatal) diagnostic from the tolerant pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub position: Position,
    pub recovery: RecoveryAction,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, message: impl Into<String>, position: Position) -> Self {
        Self {
            kind,
            message: message.into(),
            position,
            recovery: RecoveryAction::None,
        }
    }

    pub fn with_recovery(mut self, recovery: RecoveryAction) -> Self {
        self.recovery = recovery;
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {}: {}",
            self.kind.as_str(),
            self.position,
            self.message
        )
    }
}
