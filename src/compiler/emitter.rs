//=====================================================
// File: compiler/emitter.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Bytecode emission from the compiler AST
// Objective: Linearize statements/expressions into stack ops
//            with a constant pool and a function pool
//=====================================================

use std::collections::HashMap;

use crate::compiler::ast::{
    ActionDecl, AssignTarget, ContractDecl, Expr, NodeId, Program, Stmt,
};
use crate::compiler::semantic::Analysis;
use crate::bytecode::{Bytecode, Constant, FunctionDef, Op};

/// Emits bytecode. Every expression leaves exactly one value on the stack
/// and every statement leaves zero; the final top-level expression statement
/// keeps its value so a program has a result.
pub struct BytecodeEmitter {
    bytecode: Bytecode,
    captures: HashMap<NodeId, Vec<String>>,
    hidden_counter: usize,
}

impl BytecodeEmitter {
    pub fn new(analysis: &Analysis) -> Self {
        let mut bytecode = Bytecode::default();
        bytecode.header = analysis.header.clone();
        Self {
            bytecode,
            captures: analysis.captures.clone(),
            hidden_counter: 0,
        }
    }

    pub fn emit_program(mut self, program: &Program) -> Bytecode {
        let count = program.statements.len();
        let mut code = Vec::new();
        for (index, stmt) in program.statements.iter().enumerate() {
            let keep_value = index + 1 == count && matches!(stmt, Stmt::Expression { .. });
            self.emit_stmt(stmt, &mut code, keep_value);
        }
        self.bytecode.code = code;
        self.bytecode
    }

    fn hidden_name(&mut self, prefix: &str) -> String {
        let name = format!("${}_{}", prefix, self.hidden_counter);
        self.hidden_counter += 1;
        name
    }

    //=====================================================
    //            Statements
    //=====================================================

    fn emit_stmt(&mut self, stmt: &Stmt, code: &mut Vec<Op>, keep_value: bool) {
        match stmt {
            Stmt::Let { name, value, .. } => {
                self.emit_expr(value, code);
                let name = self.bytecode.add_name(name.as_str());
                code.push(Op::Store(name));
            }
            Stmt::Return { value, .. } => {
                match value {
                    Some(value) => self.emit_expr(value, code),
                    None => {
                        let null = self.bytecode.add_constant(Constant::Null);
                        code.push(Op::LoadConst(null));
                    }
                }
                code.push(Op::Return);
            }
            Stmt::Expression { expr, .. } => {
                self.emit_expr(expr, code);
                if !keep_value {
                    code.push(Op::Pop);
                }
            }
            Stmt::Block { statements, .. } => {
                for stmt in statements {
                    self.emit_stmt(stmt, code, false);
                }
            }
            Stmt::Print { value, .. } => {
                self.emit_expr(value, code);
                let name = self.bytecode.add_name("print");
                code.push(Op::CallName { name, arity: 1 });
                code.push(Op::Pop);
            }
            Stmt::ForEach {
                variable,
                iterable,
                body,
                ..
            } => self.emit_for_each(variable.as_str(), iterable, body, code),
            Stmt::If {
                condition,
                consequence,
                alternative,
                ..
            } => {
                self.emit_expr(condition, code);
                let jump_to_else = code.len();
                code.push(Op::JumpIfFalse(usize::MAX));
                self.emit_stmt(consequence, code, false);
                match alternative {
                    Some(alternative) => {
                        let jump_to_end = code.len();
                        code.push(Op::Jump(usize::MAX));
                        patch_to_here(code, jump_to_else);
                        self.emit_stmt(alternative, code, false);
                        patch_to_here(code, jump_to_end);
                    }
                    None => {
                        patch_to_here(code, jump_to_else);
                    }
                }
            }
            Stmt::While {
                condition, body, ..
            } => {
                let loop_start = code.len();
                self.emit_expr(condition, code);
                let exit_jump = code.len();
                code.push(Op::JumpIfFalse(usize::MAX));
                self.emit_stmt(body, code, false);
                code.push(Op::Jump(loop_start));
                patch_to_here(code, exit_jump);
            }
            Stmt::TryCatch {
                body,
                error_name,
                handler,
                ..
            } => {
                let err_name = self.bytecode.add_name(error_name.as_str());
                let try_push = code.len();
                code.push(Op::TryPush {
                    handler: usize::MAX,
                    err_name,
                });
                self.emit_stmt(body, code, false);
                code.push(Op::TryPop);
                let jump_to_end = code.len();
                code.push(Op::Jump(usize::MAX));
                let handler_target = code.len();
                if let Op::TryPush { handler, .. } = &mut code[try_push] {
                    *handler = handler_target;
                }
                self.emit_stmt(handler, code, false);
                patch_to_here(code, jump_to_end);
            }
            Stmt::Action { decl } => {
                let func = self.emit_function(decl);
                let name = decl
                    .name
                    .as_ref()
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| self.hidden_name("action"));
                let name = self.bytecode.add_name(&name);
                code.push(Op::StoreFunc { name, func });
            }
            // Event declarations live in the program header; the VM installs
            // descriptors before execution.
            Stmt::Event { .. } => {}
            Stmt::Emit { name, payload, .. } => {
                for (key, value) in payload {
                    let key = self.bytecode.add_constant(Constant::Str(key.clone()));
                    code.push(Op::LoadConst(key));
                    self.emit_expr(value, code);
                }
                code.push(Op::MakeMap(payload.len()));
                let name = self.bytecode.add_name(name.as_str());
                code.push(Op::EmitEvent(name));
            }
            Stmt::Enum { name, variants, .. } => {
                for variant in variants {
                    let variant = self
                        .bytecode
                        .add_constant(Constant::Str(variant.to_string()));
                    code.push(Op::LoadConst(variant));
                }
                let name = self.bytecode.add_name(name.as_str());
                code.push(Op::DefineEnum {
                    name,
                    variants: variants.len(),
                });
            }
            // Protocols are static metadata; conformance is asserted where a
            // contract names one.
            Stmt::Protocol { .. } => {}
            Stmt::Contract { decl } => self.emit_contract(decl, code),
            Stmt::External { name, source, .. } => {
                let name_const = self
                    .bytecode
                    .add_constant(Constant::Str(name.to_string()));
                code.push(Op::LoadConst(name_const));
                let source_const = match source {
                    Some(source) => self
                        .bytecode
                        .add_constant(Constant::Str(source.clone())),
                    None => self.bytecode.add_constant(Constant::Null),
                };
                code.push(Op::LoadConst(source_const));
                let callee = self.bytecode.add_name("__external__");
                code.push(Op::CallName {
                    name: callee,
                    arity: 2,
                });
                code.push(Op::Pop);
            }
            Stmt::Export { inner, .. } => {
                let exported = match &**inner {
                    Stmt::Let { name, .. } => {
                        self.emit_stmt(inner, code, false);
                        Some(name.to_string())
                    }
                    Stmt::Action { decl } => {
                        self.emit_stmt(inner, code, false);
                        decl.name.as_ref().map(|n| n.to_string())
                    }
                    Stmt::Expression {
                        expr: Expr::Identifier { name, .. },
                        ..
                    } => Some(name.to_string()),
                    _ => None,
                };
                if let Some(name) = exported {
                    let name_const = self.bytecode.add_constant(Constant::Str(name));
                    code.push(Op::LoadConst(name_const));
                    let callee = self.bytecode.add_name("__export__");
                    code.push(Op::CallName {
                        name: callee,
                        arity: 1,
                    });
                    code.push(Op::Pop);
                }
            }
            Stmt::Debug { message, value, .. } => {
                self.emit_expr(message, code);
                let mut arity = 1;
                if let Some(value) = value {
                    self.emit_expr(value, code);
                    arity = 2;
                }
                let name = self.bytecode.add_name("debug_log");
                code.push(Op::CallName { name, arity });
                code.push(Op::Pop);
            }
            Stmt::Import { module, alias, .. } => {
                let module = self.bytecode.add_name(module.as_str());
                let alias = alias.as_ref().map(|a| self.bytecode.add_name(a.as_str()));
                code.push(Op::Import { module, alias });
            }
            Stmt::ScreenDef {
                name, properties, ..
            } => self.emit_render_def("define_screen", name.as_str(), properties, code),
            Stmt::ComponentDef {
                name, properties, ..
            } => self.emit_render_def("define_component", name.as_str(), properties, code),
            Stmt::ThemeDef {
                name, properties, ..
            } => self.emit_render_def("define_theme", name.as_str(), properties, code),
        }
    }

    /// Lower for-each through the runtime iteration protocol, branching on
    /// the end sentinel.
    fn emit_for_each(
        &mut self,
        variable: &str,
        iterable: &Expr,
        body: &Stmt,
        code: &mut Vec<Op>,
    ) {
        let iter_slot = self.hidden_name("iter");
        let iter_slot = self.bytecode.add_name(&iter_slot);
        let iter_fn = self.bytecode.add_name("__iter__");
        let next_fn = self.bytecode.add_name("__next__");
        let has_fn = self.bytecode.add_name("__iter_has__");
        let variable = self.bytecode.add_name(variable);

        self.emit_expr(iterable, code);
        code.push(Op::CallName {
            name: iter_fn,
            arity: 1,
        });
        code.push(Op::Store(iter_slot));

        let loop_start = code.len();
        code.push(Op::Load(iter_slot));
        code.push(Op::CallName {
            name: next_fn,
            arity: 1,
        });
        code.push(Op::Dup);
        code.push(Op::CallName {
            name: has_fn,
            arity: 1,
        });
        let exit_jump = code.len();
        code.push(Op::JumpIfFalse(usize::MAX));
        code.push(Op::Store(variable));
        self.emit_stmt(body, code, false);
        code.push(Op::Jump(loop_start));
        patch_to_here(code, exit_jump);
        // Drop the sentinel left by the final __next__.
        code.push(Op::Pop);
    }

    fn emit_render_def(&mut self, tag: &str, name: &str, properties: &Expr, code: &mut Vec<Op>) {
        let name_const = self.bytecode.add_constant(Constant::Str(name.to_string()));
        code.push(Op::LoadConst(name_const));
        self.emit_expr(properties, code);
        let tag = self.bytecode.add_name(tag);
        code.push(Op::RenderOp { tag, arity: 2 });
        code.push(Op::Pop);
    }

    fn emit_contract(&mut self, decl: &ContractDecl, code: &mut Vec<Op>) {
        let mut entries = 0;
        for (key, value) in &decl.storage {
            let key = self.bytecode.add_constant(Constant::Str(key.clone()));
            code.push(Op::LoadConst(key));
            self.emit_expr(value, code);
            entries += 1;
        }
        for action in &decl.actions {
            let Some(action_name) = action.name.as_ref() else {
                continue;
            };
            let key = self
                .bytecode
                .add_constant(Constant::Str(action_name.to_string()));
            code.push(Op::LoadConst(key));
            let func = self.emit_function(action);
            let slot = self.hidden_name("contract_fn");
            let slot = self.bytecode.add_name(&slot);
            code.push(Op::StoreFunc { name: slot, func });
            code.push(Op::Load(slot));
            entries += 1;
        }
        code.push(Op::MakeMap(entries));
        if let Some(protocol) = &decl.protocol {
            let protocol = self.bytecode.add_name(protocol.as_str());
            code.push(Op::AssertProtocol(protocol));
        }
        let name = self.bytecode.add_name(decl.name.as_str());
        code.push(Op::Store(name));
    }

    fn emit_function(&mut self, decl: &ActionDecl) -> usize {
        let mut code = Vec::new();
        for stmt in &decl.body {
            self.emit_stmt(stmt, &mut code, false);
        }
        let null = self.bytecode.add_constant(Constant::Null);
        code.push(Op::LoadConst(null));
        code.push(Op::Return);

        let def = FunctionDef {
            name: decl
                .name
                .as_ref()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "anonymous".to_string()),
            params: decl.params.iter().map(|p| p.to_string()).collect(),
            captures: self.captures.get(&decl.node_id).cloned().unwrap_or_default(),
            code,
            is_async: decl.is_async,
        };
        self.bytecode.functions.push(def);
        self.bytecode.functions.len() - 1
    }

    fn emit_lambda(&mut self, params: &[crate::symbol::Symbol], body: &Expr, node_id: NodeId) -> usize {
        let mut code = Vec::new();
        self.emit_expr(body, &mut code);
        code.push(Op::Return);

        let def = FunctionDef {
            name: "lambda".to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            captures: self.captures.get(&node_id).cloned().unwrap_or_default(),
            code,
            is_async: false,
        };
        self.bytecode.functions.push(def);
        self.bytecode.functions.len() - 1
    }

    //=====================================================
    //            Expressions
    //=====================================================

    fn emit_expr(&mut self, expr: &Expr, code: &mut Vec<Op>) {
        match expr {
            Expr::Identifier { name, .. } => {
                let name = self.bytecode.add_name(name.as_str());
                code.push(Op::Load(name));
            }
            Expr::Integer(value) => {
                let index = self.bytecode.add_constant(Constant::Int(value.clone()));
                code.push(Op::LoadConst(index));
            }
            Expr::Float(value) => {
                let index = self.bytecode.add_constant(Constant::Float(*value));
                code.push(Op::LoadConst(index));
            }
            Expr::Str(value) => {
                let index = self.bytecode.add_constant(Constant::Str(value.clone()));
                code.push(Op::LoadConst(index));
            }
            Expr::Bool(value) => {
                let index = self.bytecode.add_constant(Constant::Bool(*value));
                code.push(Op::LoadConst(index));
            }
            Expr::Null => {
                let index = self.bytecode.add_constant(Constant::Null);
                code.push(Op::LoadConst(index));
            }
            Expr::List(elements) => {
                for element in elements {
                    self.emit_expr(element, code);
                }
                code.push(Op::MakeList(elements.len()));
            }
            Expr::Map(pairs) => {
                for (key, value) in pairs {
                    let key = self.bytecode.add_constant(Constant::Str(key.clone()));
                    code.push(Op::LoadConst(key));
                    self.emit_expr(value, code);
                }
                code.push(Op::MakeMap(pairs.len()));
            }
            Expr::ActionLiteral { decl } => {
                let func = self.emit_function(decl);
                let slot = self.hidden_name("fn");
                let slot = self.bytecode.add_name(&slot);
                code.push(Op::StoreFunc { name: slot, func });
                code.push(Op::Load(slot));
            }
            Expr::Lambda {
                params,
                body,
                node_id,
            } => {
                let func = self.emit_lambda(params, body, *node_id);
                let slot = self.hidden_name("fn");
                let slot = self.bytecode.add_name(&slot);
                code.push(Op::StoreFunc { name: slot, func });
                code.push(Op::Load(slot));
            }
            Expr::Call { callee, args, .. } => self.emit_call(callee, args, code),
            Expr::MethodCall {
                receiver,
                method,
                args,
                ..
            } => {
                self.emit_expr(receiver, code);
                for arg in args {
                    self.emit_expr(arg, code);
                }
                let name = self.bytecode.add_name(&format!("__method_{}", method));
                code.push(Op::CallName {
                    name,
                    arity: args.len() + 1,
                });
            }
            Expr::Property { object, name } => {
                self.emit_expr(object, code);
                let name = self.bytecode.add_name(name.as_str());
                code.push(Op::Prop(name));
            }
            Expr::Index { object, index } => {
                self.emit_expr(object, code);
                self.emit_expr(index, code);
                code.push(Op::Index);
            }
            Expr::Assign { target, value, .. } => match target {
                AssignTarget::Name(name) => {
                    self.emit_expr(value, code);
                    code.push(Op::Dup);
                    let name = self.bytecode.add_name(name.as_str());
                    code.push(Op::Assign(name));
                }
                AssignTarget::Index { object, index } => {
                    self.emit_expr(object, code);
                    self.emit_expr(index, code);
                    self.emit_expr(value, code);
                    let name = self.bytecode.add_name("__set_index__");
                    code.push(Op::CallName { name, arity: 3 });
                }
                AssignTarget::Property { object, name } => {
                    self.emit_expr(object, code);
                    let key = self
                        .bytecode
                        .add_constant(Constant::Str(name.to_string()));
                    code.push(Op::LoadConst(key));
                    self.emit_expr(value, code);
                    let callee = self.bytecode.add_name("__set_index__");
                    code.push(Op::CallName {
                        name: callee,
                        arity: 3,
                    });
                }
            },
            Expr::Prefix { operator, operand } => {
                self.emit_expr(operand, code);
                code.push(Op::Un(*operator));
            }
            Expr::Infix {
                left,
                operator,
                right,
            } => {
                self.emit_expr(left, code);
                self.emit_expr(right, code);
                code.push(Op::Bin(*operator));
            }
            Expr::IfExpr {
                condition,
                consequence,
                alternative,
            } => {
                self.emit_expr(condition, code);
                let jump_to_else = code.len();
                code.push(Op::JumpIfFalse(usize::MAX));
                self.emit_expr(consequence, code);
                let jump_to_end = code.len();
                code.push(Op::Jump(usize::MAX));
                patch_to_here(code, jump_to_else);
                self.emit_expr(alternative, code);
                patch_to_here(code, jump_to_end);
            }
            Expr::Await { inner, .. } => {
                self.emit_expr(inner, code);
                code.push(Op::Await);
            }
            Expr::EmbeddedLiteral { language, code: body } => {
                let lang_key = self
                    .bytecode
                    .add_constant(Constant::Str("language".to_string()));
                code.push(Op::LoadConst(lang_key));
                let lang = self
                    .bytecode
                    .add_constant(Constant::Str(language.clone()));
                code.push(Op::LoadConst(lang));
                let code_key = self
                    .bytecode
                    .add_constant(Constant::Str("code".to_string()));
                code.push(Op::LoadConst(code_key));
                let body = self.bytecode.add_constant(Constant::Str(body.clone()));
                code.push(Op::LoadConst(body));
                code.push(Op::MakeMap(2));
            }
        }
    }

    fn emit_call(&mut self, callee: &Expr, args: &[Expr], code: &mut Vec<Op>) {
        match callee {
            Expr::Identifier { name, .. } => {
                // spawn(expr) exercises the dedicated opcode.
                if name.as_str() == "spawn" && args.len() == 1 {
                    self.emit_expr(&args[0], code);
                    code.push(Op::Spawn);
                    return;
                }
                // register_event with a literal name lowers to the
                // dedicated opcode; the general builtin handles the rest.
                if name.as_str() == "register_event" && args.len() == 2 {
                    if let Expr::Str(event_name) = &args[0] {
                        self.emit_expr(&args[1], code);
                        let event = self
                            .bytecode
                            .add_constant(Constant::Str(event_name.clone()));
                        code.push(Op::RegisterEvent(event));
                        return;
                    }
                }
                for arg in args {
                    self.emit_expr(arg, code);
                }
                let name = self.bytecode.add_name(name.as_str());
                code.push(Op::CallName {
                    name,
                    arity: args.len(),
                });
            }
            Expr::ActionLiteral { decl } => {
                for arg in args {
                    self.emit_expr(arg, code);
                }
                let func = self.emit_function(decl);
                code.push(Op::CallFuncConst {
                    func,
                    arity: args.len(),
                });
            }
            Expr::Lambda {
                params,
                body,
                node_id,
            } => {
                for arg in args {
                    self.emit_expr(arg, code);
                }
                let func = self.emit_lambda(params, body, *node_id);
                code.push(Op::CallFuncConst {
                    func,
                    arity: args.len(),
                });
            }
            other => {
                // General case: callee below the arguments, then CALL_TOP.
                self.emit_expr(other, code);
                for arg in args {
                    self.emit_expr(arg, code);
                }
                code.push(Op::CallTop(args.len()));
            }
        }
    }
}

/// Point the placeholder jump at `at` to the current end of `code`.
fn patch_to_here(code: &mut Vec<Op>, at: usize) {
    let target = code.len();
    match &mut code[at] {
        Op::Jump(slot) | Op::JumpIfFalse(slot) => *slot = target,
        other => unreachable!("patched instruction {:?} is not a jump", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::ProductionParser;
    use crate::compiler::semantic::SemanticAnalyzer;
    use crate::lexer;

    fn emit(source: &str) -> Bytecode {
        let tokens = lexer::tokenize(source).unwrap();
        let program = ProductionParser::new(tokens).parse_program().unwrap();
        let analysis = SemanticAnalyzer::new().analyze(&program);
        assert!(analysis.is_clean(), "{:?}", analysis.errors);
        BytecodeEmitter::new(&analysis).emit_program(&program)
    }

    #[test]
    fn let_emits_store() {
        let bytecode = emit("let x = 1 + 2");
        assert!(bytecode
            .code
            .iter()
            .any(|op| matches!(op, Op::Bin(crate::ast::InfixOp::Add))));
        assert!(bytecode.code.iter().any(|op| matches!(op, Op::Store(_))));
    }

    #[test]
    fn if_jumps_are_patched_in_bounds() {
        let bytecode = emit("if 1 < 2 { print(1) } else { print(2) }");
        for op in &bytecode.code {
            if let Op::Jump(target) | Op::JumpIfFalse(target) = op {
                assert!(*target <= bytecode.code.len());
            }
        }
    }

    #[test]
    fn for_each_lowers_through_iteration_protocol() {
        let bytecode = emit("for each x in [1, 2] { print(x) }");
        let names: Vec<&str> = bytecode
            .code
            .iter()
            .filter_map(|op| match op {
                Op::CallName { name, .. } => bytecode.name_at(*name),
                _ => None,
            })
            .collect();
        assert!(names.contains(&"__iter__"));
        assert!(names.contains(&"__next__"));
        assert!(names.contains(&"__iter_has__"));
    }

    #[test]
    fn functions_get_pool_entries_with_captures() {
        let bytecode =
            emit("action make() { let c = 0 action inc() { c = c + 1 return c } return inc }");
        assert_eq!(bytecode.functions.len(), 2);
        let inc = bytecode
            .functions
            .iter()
            .find(|f| f.name == "inc")
            .expect("inc in pool");
        assert_eq!(inc.captures, vec!["c".to_string()]);
    }

    #[test]
    fn async_flag_carries_to_the_pool() {
        let bytecode = emit("action async work() { return 1 }");
        assert!(bytecode.functions[0].is_async);
    }

    #[test]
    fn try_catch_emits_matched_push_pop() {
        let bytecode = emit("try { print(1) } catch(e) { print(e) }");
        let pushes = bytecode
            .code
            .iter()
            .filter(|op| matches!(op, Op::TryPush { .. }))
            .count();
        let pops = bytecode
            .code
            .iter()
            .filter(|op| matches!(op, Op::TryPop))
            .count();
        assert_eq!(pushes, 1);
        assert_eq!(pops, 1);
    }

    #[test]
    fn spawn_and_register_event_use_dedicated_ops() {
        let bytecode = emit(
            "event E { x: integer } \
             action async work() { return 1 } \
             register_event(\"E\", action(e) { return e }) \
             let t = spawn(work())",
        );
        assert!(bytecode.code.iter().any(|op| matches!(op, Op::Spawn)));
        assert!(bytecode
            .code
            .iter()
            .any(|op| matches!(op, Op::RegisterEvent(_))));
    }

    #[test]
    fn emit_builds_payload_map_then_event() {
        let bytecode = emit("event E { x: integer } emit E { x: 7 }");
        let map_then_emit = bytecode
            .code
            .windows(2)
            .any(|window| {
                matches!(window[0], Op::MakeMap(1)) && matches!(window[1], Op::EmitEvent(_))
            });
        assert!(map_then_emit);
    }
}
