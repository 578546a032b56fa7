use crate::errors::{Diagnostic, RecoveryAction, ZexusError};
use crate::token::{Token, TokenKind};

/// Token-skipping recovery for the tolerant parser.
///
/// On an unexpected token the engine drops tokens up to the next statement
/// boundary at brace depth 0 inside the current region, records what it did,
/// and lets parsing resume. A boundary is a `;`, a line break onto a token
/// that can start a statement, or the region's end.
pub struct RecoveryEngine {
    diagnostics: Vec<Diagnostic>,
}

impl RecoveryEngine {
    pub fn new() -> Self {
        Self {
            diagnostics: Vec::new(),
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Record the failure at `from` and return the index to resume at.
    pub fn synchronize(
        &mut self,
        tokens: &[Token],
        from: usize,
        region_end: usize,
        error: &ZexusError,
    ) -> usize {
        let mut index = from;
        let mut depth: i32 = 0;
        let start_line = tokens
            .get(from)
            .map(|token| token.position.line)
            .unwrap_or(0);

        while index < region_end {
            let token = &tokens[index];
            match token.kind {
                TokenKind::LeftBrace | TokenKind::LeftParen | TokenKind::LeftBracket => depth += 1,
                TokenKind::RightBrace | TokenKind::RightParen | TokenKind::RightBracket => {
                    if depth == 0 {
                        // Unmatched closer ends the damaged region itself.
                        break;
                    }
                    depth -= 1;
                }
                TokenKind::Semicolon if depth == 0 => {
                    index += 1;
                    break;
                }
                TokenKind::Eof => break,
                _ => {
                    if depth == 0
                        && token.position.line > start_line
                        && token.kind.starts_statement()
                    {
                        break;
                    }
                }
            }
            index += 1;
        }

        let dropped = index.saturating_sub(from);
        let position = error
            .position
            .clone()
            .or_else(|| tokens.get(from).map(|token| token.position.clone()))
            .unwrap_or_else(crate::token::Position::none);
        self.diagnostics.push(
            Diagnostic::new(error.kind, error.message.clone(), position)
                .with_recovery(RecoveryAction::SkippedToStatementBoundary { dropped }),
        );
        index
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::lexer;

    fn tokens_of(source: &str) -> Vec<Token> {
        lexer::tokenize(source)
            .unwrap()
            .into_iter()
            .filter(|token| !matches!(token.kind, TokenKind::Newline))
            .collect()
    }

    #[test]
    fn synchronizes_at_semicolon() {
        let tokens = tokens_of("garbage tokens ; let x = 1");
        let mut engine = RecoveryEngine::new();
        let error = ZexusError::new(ErrorKind::SyntaxError, "unexpected token");
        let resume = engine.synchronize(&tokens, 0, tokens.len(), &error);
        assert!(matches!(tokens[resume].kind, TokenKind::Let));
        assert_eq!(engine.diagnostics().len(), 1);
    }

    #[test]
    fn synchronizes_at_statement_start_on_new_line() {
        let tokens = tokens_of("broken +\nprint(1)");
        let mut engine = RecoveryEngine::new();
        let error = ZexusError::new(ErrorKind::SyntaxError, "unexpected token");
        let resume = engine.synchronize(&tokens, 0, tokens.len(), &error);
        assert!(matches!(tokens[resume].kind, TokenKind::Print));
    }

    #[test]
    fn records_dropped_count() {
        let tokens = tokens_of("a b c ; let x = 1");
        let mut engine = RecoveryEngine::new();
        let error = ZexusError::new(ErrorKind::SyntaxError, "unexpected token");
        engine.synchronize(&tokens, 0, tokens.len(), &error);
        match &engine.diagnostics()[0].recovery {
            RecoveryAction::SkippedToStatementBoundary { dropped } => assert_eq!(*dropped, 4),
            other => panic!("unexpected recovery action {:?}", other),
        }
    }
}
