//=====================================================
// File: compiler/semantic.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Semantic analysis over the compiler AST
// Objective: Name resolution, closure capture classification,
//            async/export/event/protocol validation, header
//=====================================================

use std::collections::{HashMap, HashSet};

use crate::builtins::Registry;
use crate::bytecode::ProgramHeader;
use crate::compiler::ast::{
    ActionDecl, AssignTarget, ContractDecl, Expr, NodeId, Program, ProtocolDecl, Stmt,
};
use crate::errors::{ErrorKind, ZexusError};
use crate::token::Position;

/// Result of the single analysis pass. Bytecode emission proceeds only when
/// `errors` is empty.
#[derive(Debug, Default)]
pub struct Analysis {
    pub captures: HashMap<NodeId, Vec<String>>,
    pub header: ProgramHeader,
    pub errors: Vec<ZexusError>,
}

impl Analysis {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    Global,
    Action,
    Block,
}

struct Scope {
    kind: ScopeKind,
    bindings: HashSet<String>,
    /// For Action scopes: the declaring node, to attach captures.
    action_id: Option<NodeId>,
}

pub struct SemanticAnalyzer {
    scopes: Vec<Scope>,
    analysis: Analysis,
    registry: Registry,
    declared_events: HashSet<String>,
    protocols: HashMap<String, ProtocolDecl>,
    /// Stack of is_async flags for nested actions.
    action_stack: Vec<bool>,
}

impl SemanticAnalyzer {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                kind: ScopeKind::Global,
                bindings: HashSet::new(),
                action_id: None,
            }],
            analysis: Analysis::default(),
            registry: Registry::standard(),
            declared_events: HashSet::new(),
            protocols: HashMap::new(),
            action_stack: Vec::new(),
        }
    }

    pub fn analyze(mut self, program: &Program) -> Analysis {
        // Hoist top-level declarations so forward references resolve, and
        // collect the event/enum header up front.
        for stmt in &program.statements {
            self.hoist(stmt);
        }
        for stmt in &program.statements {
            self.check_stmt(stmt, true);
        }
        self.analysis
    }

    fn hoist(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Action { decl } => {
                if let Some(name) = &decl.name {
                    self.bind(name.as_str());
                }
            }
            Stmt::Event { decl } => {
                self.declared_events.insert(decl.name.to_string());
                self.analysis.header.events.push((
                    decl.name.to_string(),
                    decl.fields.iter().map(|f| f.to_string()).collect(),
                ));
                self.bind(decl.name.as_str());
            }
            Stmt::Enum { name, variants, .. } => {
                self.analysis.header.enums.push((
                    name.to_string(),
                    variants.iter().map(|v| v.to_string()).collect(),
                ));
                self.bind(name.as_str());
            }
            Stmt::Protocol { decl } => {
                self.protocols.insert(decl.name.to_string(), decl.clone());
                self.analysis.header.protocols.push((
                    decl.name.to_string(),
                    decl.signatures
                        .iter()
                        .map(|sig| (sig.name.to_string(), sig.params.len()))
                        .collect(),
                ));
            }
            Stmt::Export { inner, .. } => self.hoist(inner),
            _ => {}
        }
    }

    fn error(&mut self, message: String, position: &Position) {
        self.analysis.errors.push(ZexusError::at(
            ErrorKind::SemanticError,
            message,
            position.clone(),
        ));
    }

    fn bind(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.bindings.insert(name.to_string());
        }
    }

    fn push_scope(&mut self, kind: ScopeKind, action_id: Option<NodeId>) {
        self.scopes.push(Scope {
            kind,
            bindings: HashSet::new(),
            action_id,
        });
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Resolve a name. Names bound in an enclosing action (past at least one
    /// action boundary) are recorded as captures for every action boundary
    /// crossed on the way out.
    fn resolve(&mut self, name: &str) -> bool {
        let mut crossed: Vec<NodeId> = Vec::new();
        for scope in self.scopes.iter().rev() {
            if scope.bindings.contains(name) {
                // Global and builtin names load via the shared frame; only
                // names held by an enclosing action body need cells.
                if scope.kind != ScopeKind::Global {
                    for action_id in &crossed {
                        let captures = self
                            .analysis
                            .captures
                            .entry(*action_id)
                            .or_default();
                        if !captures.iter().any(|existing| existing == name) {
                            captures.push(name.to_string());
                        }
                    }
                }
                return true;
            }
            if scope.kind == ScopeKind::Action {
                if let Some(action_id) = scope.action_id {
                    crossed.push(action_id);
                }
            }
        }
        self.registry.contains(name)
    }

    fn check_stmt(&mut self, stmt: &Stmt, top_level: bool) {
        match stmt {
            Stmt::Let { name, value, .. } => {
                self.check_expr(value);
                self.bind(name.as_str());
            }
            Stmt::Return { value, position } => {
                if self.action_stack.is_empty() {
                    self.error("'return' outside of an action".to_string(), position);
                }
                if let Some(value) = value {
                    self.check_expr(value);
                }
            }
            Stmt::Expression { expr, .. } => self.check_expr(expr),
            Stmt::Block { statements, .. } => {
                self.push_scope(ScopeKind::Block, None);
                for stmt in statements {
                    self.check_stmt(stmt, false);
                }
                self.pop_scope();
            }
            Stmt::Print { value, .. } => self.check_expr(value),
            Stmt::ForEach {
                variable,
                iterable,
                body,
                ..
            } => {
                self.check_expr(iterable);
                self.push_scope(ScopeKind::Block, None);
                self.bind(variable.as_str());
                self.check_stmt(body, false);
                self.pop_scope();
            }
            Stmt::If {
                condition,
                consequence,
                alternative,
                ..
            } => {
                self.check_expr(condition);
                self.check_stmt(consequence, false);
                if let Some(alternative) = alternative {
                    self.check_stmt(alternative, false);
                }
            }
            Stmt::While {
                condition, body, ..
            } => {
                self.check_expr(condition);
                self.check_stmt(body, false);
            }
            Stmt::TryCatch {
                body,
                error_name,
                handler,
                ..
            } => {
                self.check_stmt(body, false);
                self.push_scope(ScopeKind::Block, None);
                self.bind(error_name.as_str());
                self.check_stmt(handler, false);
                self.pop_scope();
            }
            Stmt::Action { decl } => {
                if let Some(name) = &decl.name {
                    self.bind(name.as_str());
                }
                self.check_action(decl);
            }
            Stmt::Event { decl } => {
                // Hoisting already collected the descriptor; nothing to walk.
                let _ = decl;
            }
            Stmt::Emit {
                name,
                payload,
                position,
            } => {
                if !self.declared_events.contains(name.as_str()) {
                    self.error(
                        format!("emit of undeclared event '{}'", name),
                        position,
                    );
                }
                for (_, value) in payload {
                    self.check_expr(value);
                }
            }
            Stmt::Enum { .. } => {}
            Stmt::Protocol { .. } => {}
            Stmt::Contract { decl } => self.check_contract(decl),
            Stmt::External { name, .. } => self.bind(name.as_str()),
            Stmt::Export { inner, position } => {
                if !top_level {
                    self.error("exports must be top-level bindings".to_string(), position);
                }
                match &**inner {
                    Stmt::Let { .. } | Stmt::Action { .. } => self.check_stmt(inner, top_level),
                    Stmt::Expression {
                        expr: Expr::Identifier { name, position, .. },
                        ..
                    } => {
                        if !self.resolve(name.as_str()) {
                            self.error(
                                format!("cannot export unresolved name '{}'", name),
                                position,
                            );
                        }
                    }
                    other => {
                        self.error(
                            "only bindings and names can be exported".to_string(),
                            other.position(),
                        );
                    }
                }
            }
            Stmt::Debug { message, value, .. } => {
                self.check_expr(message);
                if let Some(value) = value {
                    self.check_expr(value);
                }
            }
            Stmt::Import { module, alias, .. } => {
                let bound = alias.as_ref().unwrap_or(module);
                self.bind(bound.as_str());
            }
            Stmt::ScreenDef { properties, .. }
            | Stmt::ComponentDef { properties, .. }
            | Stmt::ThemeDef { properties, .. } => self.check_expr(properties),
        }
    }

    fn check_action(&mut self, decl: &ActionDecl) {
        self.push_scope(ScopeKind::Action, Some(decl.node_id));
        if let Some(name) = &decl.name {
            // Self-reference for recursion.
            self.bind(name.as_str());
        }
        for param in &decl.params {
            self.bind(param.as_str());
        }
        self.action_stack.push(decl.is_async);
        for stmt in &decl.body {
            self.check_stmt(stmt, false);
        }
        self.action_stack.pop();
        self.pop_scope();
    }

    fn check_contract(&mut self, decl: &ContractDecl) {
        for (_, value) in &decl.storage {
            self.check_expr(value);
        }
        for action in &decl.actions {
            self.check_action(action);
        }
        self.bind(decl.name.as_str());
        if let Some(protocol_name) = &decl.protocol {
            match self.protocols.get(protocol_name.as_str()).cloned() {
                Some(protocol) => {
                    for signature in &protocol.signatures {
                        let satisfied = decl.actions.iter().any(|action| {
                            action.name.as_deref() == Some(signature.name.as_str())
                                && action.params.len() == signature.params.len()
                        });
                        if !satisfied {
                            self.analysis.errors.push(ZexusError::at(
                                ErrorKind::ProtocolError,
                                format!(
                                    "contract '{}' is missing {}.{}/{}",
                                    decl.name,
                                    protocol_name,
                                    signature.name,
                                    signature.params.len()
                                ),
                                decl.position.clone(),
                            ));
                        }
                    }
                }
                None => {
                    self.analysis.errors.push(ZexusError::at(
                        ErrorKind::ProtocolError,
                        format!("unknown protocol '{}'", protocol_name),
                        decl.position.clone(),
                    ));
                }
            }
        }
    }

    fn check_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Identifier {
                name, position, ..
            } => {
                if !self.resolve(name.as_str()) {
                    self.error(format!("unresolved name '{}'", name), position);
                }
            }
            Expr::Integer(_)
            | Expr::Float(_)
            | Expr::Str(_)
            | Expr::Bool(_)
            | Expr::Null
            | Expr::EmbeddedLiteral { .. } => {}
            Expr::List(elements) => {
                for element in elements {
                    self.check_expr(element);
                }
            }
            Expr::Map(pairs) => {
                for (_, value) in pairs {
                    self.check_expr(value);
                }
            }
            Expr::ActionLiteral { decl } => self.check_action(decl),
            Expr::Lambda { params, body, node_id } => {
                self.push_scope(ScopeKind::Action, Some(*node_id));
                for param in params {
                    self.bind(param.as_str());
                }
                self.action_stack.push(false);
                self.check_expr(body);
                self.action_stack.pop();
                self.pop_scope();
            }
            Expr::Call { callee, args, .. } => {
                self.check_expr(callee);
                for arg in args {
                    self.check_expr(arg);
                }
            }
            Expr::MethodCall { receiver, args, .. } => {
                self.check_expr(receiver);
                for arg in args {
                    self.check_expr(arg);
                }
            }
            Expr::Property { object, .. } => self.check_expr(object),
            Expr::Index { object, index } => {
                self.check_expr(object);
                self.check_expr(index);
            }
            Expr::Assign { target, value, .. } => {
                self.check_expr(value);
                match target {
                    AssignTarget::Name(name) => {
                        // Assignment to an unbound name declares it in the
                        // current scope, matching the interpreter.
                        if !self.resolve(name.as_str()) {
                            self.bind(name.as_str());
                        }
                    }
                    AssignTarget::Index { object, index } => {
                        self.check_expr(object);
                        self.check_expr(index);
                    }
                    AssignTarget::Property { object, .. } => self.check_expr(object),
                }
            }
            Expr::Prefix { operand, .. } => self.check_expr(operand),
            Expr::Infix { left, right, .. } => {
                self.check_expr(left);
                self.check_expr(right);
            }
            Expr::IfExpr {
                condition,
                consequence,
                alternative,
            } => {
                self.check_expr(condition);
                self.check_expr(consequence);
                self.check_expr(alternative);
            }
            Expr::Await { inner, position } => {
                if self.action_stack.last().copied() != Some(true)
                    && !self.action_stack.is_empty()
                {
                    self.error(
                        "'await' is only allowed inside 'action async' bodies".to_string(),
                        position,
                    );
                }
                // Top-level awaits are tolerated so scripts can join
                // spawned work; nested sync actions are not.
                self.check_expr(inner);
            }
        }
    }
}

impl Default for SemanticAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::ProductionParser;
    use crate::lexer;

    fn analyze(source: &str) -> Analysis {
        let tokens = lexer::tokenize(source).unwrap();
        let program = ProductionParser::new(tokens).parse_program().unwrap();
        SemanticAnalyzer::new().analyze(&program)
    }

    #[test]
    fn resolves_builtins_and_locals() {
        let analysis = analyze("let x = 1 print(string(x))");
        assert!(analysis.is_clean(), "{:?}", analysis.errors);
    }

    #[test]
    fn unresolved_name_is_reported() {
        let analysis = analyze("print(string(missing))");
        assert_eq!(analysis.errors.len(), 1);
        assert!(analysis.errors[0].message.contains("missing"));
    }

    #[test]
    fn captures_are_classified_per_action() {
        let analysis = analyze(
            "action make() { let c = 0 action inc() { c = c + 1 return c } return inc }",
        );
        assert!(analysis.is_clean(), "{:?}", analysis.errors);
        let captured: Vec<&Vec<String>> = analysis.captures.values().collect();
        assert!(captured
            .iter()
            .any(|captures| captures.contains(&"c".to_string())));
    }

    #[test]
    fn await_outside_async_action_is_an_error() {
        let analysis = analyze("action work() { await 1 }");
        assert!(!analysis.is_clean());
        assert!(analysis.errors[0].message.contains("await"));
    }

    #[test]
    fn return_outside_action_is_an_error() {
        let analysis = analyze("return 1");
        assert!(!analysis.is_clean());
    }

    #[test]
    fn emit_requires_declared_event() {
        let analysis = analyze("emit Missing { x: 1 }");
        assert!(!analysis.is_clean());
        let declared = analyze("event E { x: integer } emit E { x: 1 }");
        assert!(declared.is_clean(), "{:?}", declared.errors);
    }

    #[test]
    fn header_collects_events_and_enums() {
        let analysis = analyze("event E { x: integer } enum Color { Red, Green }");
        assert_eq!(analysis.header.events.len(), 1);
        assert_eq!(analysis.header.enums.len(), 1);
        assert_eq!(analysis.header.events[0].1, vec!["x".to_string()]);
    }

    #[test]
    fn contract_protocol_conformance() {
        let good = analyze(
            "protocol Ledger { action transfer(to, amount) } \
             contract Token { require Ledger action transfer(to, amount) { return amount } }",
        );
        assert!(good.is_clean(), "{:?}", good.errors);

        let bad = analyze(
            "protocol Ledger { action transfer(to, amount) } \
             contract Token { require Ledger }",
        );
        assert!(bad
            .errors
            .iter()
            .any(|e| e.kind == ErrorKind::ProtocolError));
    }
}
