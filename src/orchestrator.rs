//=====================================================
// File: orchestrator.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Hybrid execution entry point
// Objective: Route a source program to the interpreter or the
//            compiler + VM, with compiler-error fallback
//=====================================================

use crate::builtins::Host;
use crate::compiler;
use crate::config;
use crate::errors::ZexusError;
use crate::evaluator::Evaluator;
use crate::object::Object;
use crate::parser::TolerantParser;
use crate::vm::Vm;

/// Which execution path to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Compile and run on the VM; fall back to the interpreter when
    /// compilation fails.
    #[default]
    Auto,
    Interpreter,
    Compiler,
}

/// Execute a program with a default (stdout) host.
pub fn execute(source: &str, mode: ExecutionMode) -> Result<Object, ZexusError> {
    execute_with_host(source, mode, Host::new()).map(|(value, _)| value)
}

/// Execute a program with a caller-provided host, returning the host so
/// embedders can drain captured output.
pub fn execute_with_host(
    source: &str,
    mode: ExecutionMode,
    host: Host,
) -> Result<(Object, Host), ZexusError> {
    match mode {
        ExecutionMode::Interpreter => interpret(source, host),
        ExecutionMode::Compiler => compile_and_run(source, host).map_err(first_error),
        ExecutionMode::Auto => match compiler::compile(source) {
            Ok(bytecode) => {
                let mut vm = Vm::new(bytecode, host);
                let result = vm.run();
                let host = std::mem::take(&mut vm.host);
                result.map(|value| (value, host))
            }
            Err(errors) => {
                config::debug_log(&format!(
                    "compiler rejected program ({}); falling back to interpreter",
                    errors
                        .first()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "no detail".to_string())
                ));
                interpret(source, host)
            }
        },
    }
}

fn interpret(source: &str, host: Host) -> Result<(Object, Host), ZexusError> {
    let (program, diagnostics) = TolerantParser::parse_source(source);
    for diagnostic in &diagnostics {
        config::debug_log(&format!("recovered: {}", diagnostic));
    }
    let mut evaluator = Evaluator::with_host(host);
    let result = evaluator.run_async(&program);
    let host = std::mem::take(&mut evaluator.host);
    result.map(|value| (value, host))
}

fn compile_and_run(source: &str, host: Host) -> Result<(Object, Host), Vec<ZexusError>> {
    let bytecode = compiler::compile(source)?;
    let mut vm = Vm::new(bytecode, host);
    match vm.run() {
        Ok(value) => {
            let host = std::mem::take(&mut vm.host);
            Ok((value, host))
        }
        Err(error) => Err(vec![error]),
    }
}

fn first_error(mut errors: Vec<ZexusError>) -> ZexusError {
    if errors.is_empty() {
        ZexusError::internal("compilation failed with no detail")
    } else {
        errors.remove(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_captured(source: &str, mode: ExecutionMode) -> (Object, String) {
        let (value, mut host) =
            execute_with_host(source, mode, Host::capturing()).expect("execution");
        let output = host.take_output();
        (value, output)
    }

    #[test]
    fn all_three_modes_agree_on_clean_programs() {
        for mode in [
            ExecutionMode::Auto,
            ExecutionMode::Interpreter,
            ExecutionMode::Compiler,
        ] {
            let (_, output) = run_captured("print(string(10 + 5))", mode);
            assert_eq!(output, "15\n", "mode {:?}", mode);
        }
    }

    #[test]
    fn auto_falls_back_to_the_interpreter_on_compile_errors() {
        // Stray trailing garbage: hard error for the production parser, a
        // recoverable diagnostic for the tolerant one.
        let source = "print(string(1 + 2)) let = ";
        let (_, output) = run_captured(source, ExecutionMode::Auto);
        assert_eq!(output, "3\n");
    }

    #[test]
    fn compiler_mode_reports_the_first_error() {
        let err = execute("let = 5", ExecutionMode::Compiler).unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::SyntaxError);
    }
}
