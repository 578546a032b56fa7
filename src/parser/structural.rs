use crate::errors::{Diagnostic, ErrorKind, RecoveryAction, ZexusError};
use crate::token::{Token, TokenKind};

/// Block kinds recognized by the structural pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Top,
    If,
    While,
    ForEach,
    Try,
    Catch,
    ActionBody,
    Map,
    List,
    Paren,
    Statement,
}

/// A contiguous token slice tagged with its structural kind.
#[derive(Debug, Clone)]
pub struct StructuralBlock {
    pub kind: BlockKind,
    /// Token range, inclusive start / exclusive end.
    pub start: usize,
    pub end: usize,
    pub nested: Vec<StructuralBlock>,
}

/// Result of the segmentation pass: top-level statement spans plus any
/// repairs made along the way.
#[derive(Debug, Default)]
pub struct StructuralOutcome {
    pub segments: Vec<StructuralBlock>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Single left-to-right pass with a brace-depth counter and a small state
/// machine for `try/catch` pairing and map-literal detection.
///
/// Fails (returning the caller to plain recursive descent) only when the
/// stream is structurally hopeless: a block left open at end of input.
pub struct StructuralAnalyzer<'a> {
    tokens: &'a [Token],
}

impl<'a> StructuralAnalyzer<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self { tokens }
    }

    pub fn analyze(&self) -> Result<StructuralOutcome, ZexusError> {
        let mut outcome = StructuralOutcome::default();
        let mut index = 0;
        let end = self.tokens.len();

        while index < end {
            match self.tokens[index].kind {
                TokenKind::Eof => break,
                TokenKind::Semicolon => {
                    // Stray separators are legal; nothing to segment.
                    index += 1;
                }
                TokenKind::RightBrace | TokenKind::RightParen | TokenKind::RightBracket => {
                    outcome.diagnostics.push(
                        Diagnostic::new(
                            ErrorKind::SyntaxError,
                            format!(
                                "brace_mismatch: unmatched '{}'",
                                self.tokens[index].lexeme
                            ),
                            self.tokens[index].position.clone(),
                        )
                        .with_recovery(RecoveryAction::ClosedUnbalancedBlock),
                    );
                    index += 1;
                }
                _ => {
                    let segment = self.read_segment(index, &mut outcome.diagnostics)?;
                    index = segment.end;
                    outcome.segments.push(segment);
                }
            }
        }

        Ok(outcome)
    }

    /// Read one top-level segment starting at `start`.
    fn read_segment(
        &self,
        start: usize,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<StructuralBlock, ZexusError> {
        let kind = segment_kind(&self.tokens[start].kind);
        let opener = self.tokens[start].position.clone();
        let mut nested: Vec<StructuralBlock> = Vec::new();
        let mut open_stack: Vec<(BlockKind, usize, usize)> = Vec::new(); // kind, start, child base
        let mut index = start;
        let mut saw_try = matches!(kind, BlockKind::Try);
        // A `:` at depth 0 in a block-opening construct starts a colon-block;
        // the segment then extends by the indentation end rule instead.
        let mut in_colon_block = false;
        // Becomes true once the try's brace block has closed; the following
        // `catch` then binds to this segment regardless of newlines.
        let mut awaiting_catch = false;

        while index < self.tokens.len() {
            let token = &self.tokens[index];
            match &token.kind {
                TokenKind::Eof => break,
                TokenKind::LeftBrace | TokenKind::LeftParen | TokenKind::LeftBracket => {
                    let block_kind = match token.kind {
                        TokenKind::LeftParen => BlockKind::Paren,
                        TokenKind::LeftBracket => BlockKind::List,
                        _ => self.classify_brace(index),
                    };
                    open_stack.push((block_kind, index, nested.len()));
                    index += 1;
                }
                TokenKind::RightBrace | TokenKind::RightParen | TokenKind::RightBracket => {
                    match open_stack.pop() {
                        Some((block_kind, block_start, child_base)) => {
                            let children = nested.split_off(child_base);
                            nested.push(StructuralBlock {
                                kind: block_kind,
                                start: block_start,
                                end: index + 1,
                                nested: children,
                            });
                            index += 1;
                            if open_stack.is_empty() && matches!(token.kind, TokenKind::RightBrace)
                            {
                                if in_colon_block {
                                    // Colon-blocks end by the indentation
                                    // rule, not at nested literal closers.
                                    continue;
                                }
                                if saw_try && !awaiting_catch {
                                    awaiting_catch = true;
                                    continue;
                                }
                                // A closed top-level brace ends the segment
                                // unless an `else` / `catch` continues it.
                                match self.peek_kind(index) {
                                    Some(TokenKind::Else) => continue,
                                    Some(TokenKind::Catch) => continue,
                                    _ => break,
                                }
                            }
                        }
                        None => {
                            // Unmatched closer terminates the segment; the
                            // top-level loop reports it.
                            break;
                        }
                    }
                }
                TokenKind::Catch if open_stack.is_empty() => {
                    saw_try = false;
                    awaiting_catch = false;
                    index += 1;
                }
                TokenKind::Semicolon if open_stack.is_empty() && !in_colon_block => {
                    index += 1;
                    break;
                }
                TokenKind::Colon
                    if open_stack.is_empty()
                        && matches!(
                            kind,
                            BlockKind::If
                                | BlockKind::While
                                | BlockKind::ForEach
                                | BlockKind::Try
                                | BlockKind::ActionBody
                        ) =>
                {
                    in_colon_block = true;
                    index += 1;
                }
                _ => {
                    if open_stack.is_empty() && index > start && self.begins_new_statement(index) {
                        if in_colon_block {
                            // Colon-block end rule: a later line at the same
                            // or lower column ends the segment.
                            let position = &self.tokens[index].position;
                            if position.line > opener.line && position.column <= opener.column {
                                break;
                            }
                        } else {
                            break;
                        }
                    }
                    index += 1;
                }
            }
        }

        if let Some((_, block_start, _)) = open_stack.first() {
            return Err(ZexusError::syntax(
                "block opened here is never closed",
                self.tokens[*block_start].position.clone(),
            ));
        }

        if awaiting_catch && matches!(kind, BlockKind::Try) {
            diagnostics.push(Diagnostic::new(
                ErrorKind::SyntaxError,
                "try block has no catch handler",
                self.tokens[start].position.clone(),
            ));
        }

        Ok(StructuralBlock {
            kind,
            start,
            end: index,
            nested,
        })
    }

    /// Tie-break rule (a): `{` immediately after `=`, `:` or `,` opens a map
    /// literal; any other `{` opens a statement block.
    fn classify_brace(&self, index: usize) -> BlockKind {
        match index.checked_sub(1).map(|i| &self.tokens[i].kind) {
            Some(TokenKind::Assign) | Some(TokenKind::Colon) | Some(TokenKind::Comma) => {
                BlockKind::Map
            }
            _ => BlockKind::Statement,
        }
    }

    fn peek_kind(&self, index: usize) -> Option<TokenKind> {
        self.tokens.get(index).map(|token| token.kind.clone())
    }

    /// True when the token at `index` can only begin a fresh statement:
    /// a statement keyword, or an expression opener directly after a token
    /// that already completed an expression.
    fn begins_new_statement(&self, index: usize) -> bool {
        let token = &self.tokens[index];
        let prev_ends_expression = index
            .checked_sub(1)
            .map(|i| ends_expression(&self.tokens[i].kind))
            .unwrap_or(false);
        if !prev_ends_expression {
            return false;
        }
        token.kind.starts_statement()
            || matches!(
                token.kind,
                TokenKind::Identifier(_)
                    | TokenKind::Await
                    | TokenKind::Lambda
                    | TokenKind::RegisterEvent
            )
    }
}

fn segment_kind(kind: &TokenKind) -> BlockKind {
    match kind {
        TokenKind::If => BlockKind::If,
        TokenKind::While => BlockKind::While,
        TokenKind::For => BlockKind::ForEach,
        TokenKind::Try => BlockKind::Try,
        TokenKind::Catch => BlockKind::Catch,
        TokenKind::Action => BlockKind::ActionBody,
        _ => BlockKind::Statement,
    }
}

fn ends_expression(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::RightParen
            | TokenKind::RightBracket
            | TokenKind::RightBrace
            | TokenKind::Identifier(_)
            | TokenKind::Integer(_)
            | TokenKind::Float(_)
            | TokenKind::Str(_)
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Null
            | TokenKind::Embedded { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;

    fn analyze(source: &str) -> StructuralOutcome {
        let tokens: Vec<Token> = lexer::tokenize(source)
            .unwrap()
            .into_iter()
            .filter(|token| !matches!(token.kind, TokenKind::Newline))
            .collect();
        StructuralAnalyzer::new(&tokens).analyze().unwrap()
    }

    #[test]
    fn splits_statements_on_one_line() {
        let outcome = analyze("let f = make() print(string(f()))");
        assert_eq!(outcome.segments.len(), 2);
        assert_eq!(outcome.segments[0].kind, BlockKind::Statement);
    }

    #[test]
    fn brace_after_assign_is_a_map() {
        let outcome = analyze("let m = { \"a\": 1 }");
        assert_eq!(outcome.segments.len(), 1);
        let nested = &outcome.segments[0].nested;
        assert!(nested.iter().any(|block| block.kind == BlockKind::Map));
    }

    #[test]
    fn action_brace_is_a_statement_block() {
        let outcome = analyze("action inc(x) { return x }");
        let segment = &outcome.segments[0];
        assert_eq!(segment.kind, BlockKind::ActionBody);
        assert!(segment
            .nested
            .iter()
            .any(|block| block.kind == BlockKind::Statement));
    }

    #[test]
    fn catch_binds_to_its_try_across_newlines() {
        let outcome = analyze("try { risky() }\n\ncatch(err) { print(err) }");
        assert_eq!(outcome.segments.len(), 1);
        assert_eq!(outcome.segments[0].kind, BlockKind::Try);
    }

    #[test]
    fn unmatched_closer_reports_brace_mismatch() {
        let outcome = analyze("let x = 1 } let y = 2");
        assert_eq!(outcome.segments.len(), 2);
        assert!(outcome
            .diagnostics
            .iter()
            .any(|d| d.message.contains("brace_mismatch")));
    }

    #[test]
    fn colon_block_extends_past_indented_lines() {
        let outcome = analyze("if x:\n    print(1)\n    let m = { a: 1 }\nlet y = 3");
        assert_eq!(outcome.segments.len(), 2);
        assert_eq!(outcome.segments[0].kind, BlockKind::If);
        assert_eq!(outcome.segments[1].kind, BlockKind::Statement);
    }

    #[test]
    fn unclosed_block_fails_structural_analysis() {
        let tokens: Vec<Token> = lexer::tokenize("action f() { let x = 1")
            .unwrap()
            .into_iter()
            .filter(|token| !matches!(token.kind, TokenKind::Newline))
            .collect();
        assert!(StructuralAnalyzer::new(&tokens).analyze().is_err());
    }
}
