//=====================================================
// File: compiler/mod.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Zexus compilation pipeline
// Objective: source -> tokens -> compiler AST -> semantic
//            analysis -> bytecode
//=====================================================

pub mod ast;
pub mod emitter;
pub mod parser;
pub mod semantic;

use crate::bytecode::Bytecode;
use crate::errors::ZexusError;
use crate::lexer;

use emitter::BytecodeEmitter;
use parser::ProductionParser;
use semantic::SemanticAnalyzer;

/// Full compilation pipeline. The production parser aborts on the first hard
/// error; semantic errors accumulate and gate emission.
pub fn compile(source: &str) -> Result<Bytecode, Vec<ZexusError>> {
    let tokens = lexer::tokenize(source).map_err(|error| vec![error])?;
    let program = ProductionParser::new(tokens)
        .parse_program()
        .map_err(|error| vec![error])?;
    let analysis = SemanticAnalyzer::new().analyze(&program);
    if !analysis.is_clean() {
        return Err(analysis.errors);
    }
    Ok(BytecodeEmitter::new(&analysis).emit_program(&program))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_source_compiles() {
        let bytecode = compile("let x = 1 print(string(x))").unwrap();
        assert!(!bytecode.code.is_empty());
    }

    #[test]
    fn syntax_errors_abort_immediately() {
        let errors = compile("let = 1").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, crate::errors::ErrorKind::SyntaxError);
    }

    #[test]
    fn semantic_errors_accumulate_and_gate_emission() {
        let errors = compile("print(a) print(b)").unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| e.kind == crate::errors::ErrorKind::SemanticError));
    }
}
