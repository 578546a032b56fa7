use crate::ast::{Program, Stmt};
use crate::errors::Diagnostic;
use crate::token::{Token, TokenKind};

use super::recovery::RecoveryEngine;
use super::structural::{BlockKind, StructuralBlock, StructuralOutcome};
use super::DescentParser;

/// Grammar expected at the top of the context stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseContext {
    Statement,
    Expression,
    MapEntry,
    CatchVar,
}

/// Maps structural blocks to AST nodes. Each block kind selects a direct
/// micro-parser; the context stack names the grammar currently expected so
/// recovery diagnostics can say where parsing stood.
pub struct ContextStackParser<'a> {
    tokens: &'a [Token],
    stack: Vec<ParseContext>,
}

impl<'a> ContextStackParser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            stack: vec![ParseContext::Statement],
        }
    }

    pub fn parse(mut self, outcome: StructuralOutcome) -> (Program, Vec<Diagnostic>) {
        let mut engine = RecoveryEngine::new();
        for diagnostic in outcome.diagnostics {
            engine.report(diagnostic);
        }

        let mut statements = Vec::new();
        for segment in &outcome.segments {
            self.stack.push(context_for(segment.kind));
            self.parse_segment(segment, &mut statements, &mut engine);
            self.stack.pop();
        }

        let mut program = Program::new(statements);
        let diagnostics = engine.into_diagnostics();
        program.recovery_notes = diagnostics.clone();
        (program, diagnostics)
    }

    /// Parse every statement inside one structural segment, recovering
    /// within the segment so later segments are unaffected.
    fn parse_segment(
        &mut self,
        segment: &StructuralBlock,
        statements: &mut Vec<Stmt>,
        engine: &mut RecoveryEngine,
    ) {
        let mut index = segment.start;
        while index < segment.end {
            if matches!(
                self.tokens[index].kind,
                TokenKind::Semicolon | TokenKind::Eof
            ) {
                index += 1;
                continue;
            }
            let mut parser = DescentParser::over(self.tokens, index, segment.end);
            match parser.parse_statement() {
                Ok(stmt) => {
                    for diagnostic in parser.take_diagnostics() {
                        engine.report(diagnostic);
                    }
                    statements.push(stmt);
                    index = parser.pos;
                }
                Err(mut error) => {
                    error.message = format!(
                        "{} (while parsing {})",
                        error.message,
                        self.describe_context()
                    );
                    let resume =
                        engine.synchronize(self.tokens, index.max(parser.pos), segment.end, &error);
                    index = if resume > index { resume } else { index + 1 };
                }
            }
        }
    }

    fn describe_context(&self) -> &'static str {
        match self.stack.last().copied().unwrap_or(ParseContext::Statement) {
            ParseContext::Statement => "a statement",
            ParseContext::Expression => "an expression",
            ParseContext::MapEntry => "a map entry",
            ParseContext::CatchVar => "a catch variable",
        }
    }
}

fn context_for(kind: BlockKind) -> ParseContext {
    match kind {
        BlockKind::Map => ParseContext::MapEntry,
        BlockKind::List | BlockKind::Paren => ParseContext::Expression,
        BlockKind::Catch => ParseContext::CatchVar,
        _ => ParseContext::Statement,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer;
    use crate::parser::structural::StructuralAnalyzer;

    fn run(source: &str) -> (Program, Vec<Diagnostic>) {
        let tokens: Vec<Token> = lexer::tokenize(source)
            .unwrap()
            .into_iter()
            .filter(|token| !matches!(token.kind, TokenKind::Newline))
            .collect();
        let outcome = StructuralAnalyzer::new(&tokens).analyze().unwrap();
        ContextStackParser::new(&tokens).parse(outcome)
    }

    #[test]
    fn clean_program_has_no_diagnostics() {
        let (program, diagnostics) = run("let a = 1\nlet b = a + 1\nprint(b)");
        assert!(diagnostics.is_empty());
        assert_eq!(program.statements.len(), 3);
    }

    #[test]
    fn damage_in_one_segment_leaves_others_parsed() {
        let (program, diagnostics) = run("let = broken\nprint(42)\nlet ok = 1");
        assert!(!diagnostics.is_empty());
        assert_eq!(program.statements.len(), 2);
        assert!(matches!(program.statements[0], Stmt::Print { .. }));
        assert!(matches!(program.statements[1], Stmt::Let { .. }));
    }

    #[test]
    fn diagnostics_name_the_parse_context() {
        let (_, diagnostics) = run("let = broken");
        assert!(diagnostics[0].message.contains("while parsing a statement"));
    }
}
