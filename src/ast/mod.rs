//=====================================================
// File: ast.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Zexus interpreter AST definitions
// Objective: Define the rich statement/expression node set
//            consumed by the tree-walking evaluator
//=====================================================

use num_bigint::BigInt;

use crate::errors::Diagnostic;
use crate::symbol::Symbol;
use crate::token::Position;

/// Infix operators, shared by both AST sets and the bytecode `BIN` op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl InfixOp {
    pub fn symbol(self) -> &'static str {
        match self {
            InfixOp::Add => "+",
            InfixOp::Sub => "-",
            InfixOp::Mul => "*",
            InfixOp::Div => "/",
            InfixOp::Mod => "%",
            InfixOp::Eq => "==",
            InfixOp::NotEq => "!=",
            InfixOp::Lt => "<",
            InfixOp::Gt => ">",
            InfixOp::Le => "<=",
            InfixOp::Ge => ">=",
            InfixOp::And => "&&",
            InfixOp::Or => "||",
        }
    }
}

/// Prefix operators, shared by both AST sets and the bytecode `UN` op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    Neg,
    Not,
}

impl PrefixOp {
    pub fn symbol(self) -> &'static str {
        match self {
            PrefixOp::Neg => "-",
            PrefixOp::Not => "!",
        }
    }
}

/// Assignment targets: plain names, index slots, properties.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Name(Symbol),
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Property {
        object: Box<Expr>,
        name: Symbol,
    },
}

/// A named or anonymous action (user function).
#[derive(Debug, Clone, PartialEq)]
pub struct ActionDecl {
    pub name: Option<Symbol>,
    pub params: Vec<Symbol>,
    pub body: Vec<Stmt>,
    pub is_async: bool,
    pub position: Position,
}

/// A declared event with its field-name schema (annotations are parsed and
/// discarded at this level).
#[derive(Debug, Clone, PartialEq)]
pub struct EventDecl {
    pub name: Symbol,
    pub fields: Vec<Symbol>,
    pub position: Position,
}

/// A protocol: a named set of required action signatures.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolDecl {
    pub name: Symbol,
    pub signatures: Vec<ActionSignature>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionSignature {
    pub name: Symbol,
    pub params: Vec<Symbol>,
}

/// A contract: storage fields plus member actions. Carries no runtime
/// meaning beyond a map-typed binding until a contract runtime exists.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractDecl {
    pub name: Symbol,
    pub protocol: Option<Symbol>,
    pub storage: Vec<(String, Expr)>,
    pub actions: Vec<ActionDecl>,
    pub position: Position,
}

/// Statements in the interpreter AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let {
        name: Symbol,
        value: Expr,
        position: Position,
    },
    Return {
        value: Option<Expr>,
        position: Position,
    },
    Expression {
        expr: Expr,
        position: Position,
    },
    Block {
        statements: Vec<Stmt>,
        position: Position,
    },
    Print {
        value: Expr,
        position: Position,
    },
    ForEach {
        variable: Symbol,
        iterable: Expr,
        body: Box<Stmt>,
        position: Position,
    },
    If {
        condition: Expr,
        consequence: Box<Stmt>,
        alternative: Option<Box<Stmt>>,
        position: Position,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
        position: Position,
    },
    TryCatch {
        body: Box<Stmt>,
        error_name: Symbol,
        handler: Box<Stmt>,
        position: Position,
    },
    Action {
        decl: ActionDecl,
    },
    Event {
        decl: EventDecl,
    },
    Emit {
        name: Symbol,
        payload: Vec<(String, Expr)>,
        position: Position,
    },
    Enum {
        name: Symbol,
        variants: Vec<Symbol>,
        position: Position,
    },
    Protocol {
        decl: ProtocolDecl,
    },
    Contract {
        decl: ContractDecl,
    },
    External {
        name: Symbol,
        source: Option<String>,
        position: Position,
    },
    Export {
        inner: Box<Stmt>,
        position: Position,
    },
    Debug {
        message: Expr,
        value: Option<Expr>,
        position: Position,
    },
    Use {
        module: Symbol,
        alias: Option<Symbol>,
        position: Position,
    },
    ScreenDef {
        name: Symbol,
        properties: Expr,
        position: Position,
    },
    ComponentDef {
        name: Symbol,
        properties: Expr,
        position: Position,
    },
    ThemeDef {
        name: Symbol,
        properties: Expr,
        position: Position,
    },
}

impl Stmt {
    pub fn position(&self) -> &Position {
        match self {
            Stmt::Let { position, .. } => position,
            Stmt::Return { position, .. } => position,
            Stmt::Expression { position, .. } => position,
            Stmt::Block { position, .. } => position,
            Stmt::Print { position, .. } => position,
            Stmt::ForEach { position, .. } => position,
            Stmt::If { position, .. } => position,
            Stmt::While { position, .. } => position,
            Stmt::TryCatch { position, .. } => position,
            Stmt::Action { decl } => &decl.position,
            Stmt::Event { decl } => &decl.position,
            Stmt::Emit { position, .. } => position,
            Stmt::Enum { position, .. } => position,
            Stmt::Protocol { decl } => &decl.position,
            Stmt::Contract { decl } => &decl.position,
            Stmt::External { position, .. } => position,
            Stmt::Export { position, .. } => position,
            Stmt::Debug { position, .. } => position,
            Stmt::Use { position, .. } => position,
            Stmt::ScreenDef { position, .. } => position,
            Stmt::ComponentDef { position, .. } => position,
            Stmt::ThemeDef { position, .. } => position,
        }
    }
}

/// Expressions in the interpreter AST.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Identifier {
        name: Symbol,
        position: Position,
    },
    Integer {
        value: BigInt,
        position: Position,
    },
    Float {
        value: f64,
        position: Position,
    },
    Str {
        value: String,
        position: Position,
    },
    Bool {
        value: bool,
        position: Position,
    },
    Null {
        position: Position,
    },
    List {
        elements: Vec<Expr>,
        position: Position,
    },
    /// Map literal; bare-identifier keys are coerced to their spelling.
    Map {
        pairs: Vec<(String, Expr)>,
        position: Position,
    },
    ActionLiteral {
        params: Vec<Symbol>,
        body: Vec<Stmt>,
        is_async: bool,
        position: Position,
    },
    Lambda {
        params: Vec<Symbol>,
        body: Box<Expr>,
        position: Position,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        position: Position,
    },
    MethodCall {
        receiver: Box<Expr>,
        method: Symbol,
        args: Vec<Expr>,
        position: Position,
    },
    Property {
        object: Box<Expr>,
        name: Symbol,
        position: Position,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        position: Position,
    },
    Assign {
        target: AssignTarget,
        value: Box<Expr>,
        position: Position,
    },
    Prefix {
        operator: PrefixOp,
        operand: Box<Expr>,
        position: Position,
    },
    Infix {
        left: Box<Expr>,
        operator: InfixOp,
        right: Box<Expr>,
        position: Position,
    },
    IfExpr {
        condition: Box<Expr>,
        consequence: Box<Expr>,
        alternative: Box<Expr>,
        position: Position,
    },
    Await {
        inner: Box<Expr>,
        position: Position,
    },
    EmbeddedLiteral {
        language: String,
        code: String,
        position: Position,
    },
}

impl Expr {
    pub fn position(&self) -> &Position {
        match self {
            Expr::Identifier { position, .. } => position,
            Expr::Integer { position, .. } => position,
            Expr::Float { position, .. } => position,
            Expr::Str { position, .. } => position,
            Expr::Bool { position, .. } => position,
            Expr::Null { position } => position,
            Expr::List { position, .. } => position,
            Expr::Map { position, .. } => position,
            Expr::ActionLiteral { position, .. } => position,
            Expr::Lambda { position, .. } => position,
            Expr::Call { position, .. } => position,
            Expr::MethodCall { position, .. } => position,
            Expr::Property { position, .. } => position,
            Expr::Index { position, .. } => position,
            Expr::Assign { position, .. } => position,
            Expr::Prefix { position, .. } => position,
            Expr::Infix { position, .. } => position,
            Expr::IfExpr { position, .. } => position,
            Expr::Await { position, .. } => position,
            Expr::EmbeddedLiteral { position, .. } => position,
        }
    }

    pub fn identifier(name: impl Into<Symbol>, position: Position) -> Self {
        Expr::Identifier {
            name: name.into(),
            position,
        }
    }

    pub fn integer(value: impl Into<BigInt>, position: Position) -> Self {
        Expr::Integer {
            value: value.into(),
            position,
        }
    }

    pub fn string(value: impl Into<String>, position: Position) -> Self {
        Expr::Str {
            value: value.into(),
            position,
        }
    }

    pub fn infix(left: Expr, operator: InfixOp, right: Expr, position: Position) -> Self {
        Expr::Infix {
            left: Box::new(left),
            operator,
            right: Box::new(right),
            position,
        }
    }

    pub fn call(callee: Expr, args: Vec<Expr>, position: Position) -> Self {
        Expr::Call {
            callee: Box::new(callee),
            args,
            position,
        }
    }
}

/// A complete Zexus program, with any recovery notes the tolerant parser
/// attached while repairing the token stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
    pub recovery_notes: Vec<Diagnostic>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self {
            statements,
            recovery_notes: Vec::new(),
        }
    }

    pub fn find_actions(&self) -> Vec<&ActionDecl> {
        let mut actions = Vec::new();
        for stmt in &self.statements {
            if let Stmt::Action { decl } = stmt {
                actions.push(decl);
            }
        }
        actions
    }

    pub fn find_events(&self) -> Vec<&EventDecl> {
        let mut events = Vec::new();
        for stmt in &self.statements {
            if let Stmt::Event { decl } = stmt {
                events.push(decl);
            }
        }
        events
    }
}

// @ZNOTE[Compiler Alignment]: construct names here track compiler::ast by
// hand; the grammar suite compares the two node sets shape-for-shape.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expr_helpers_build_expected_shapes() {
        let pos = Position::new(1, 1, 0);
        let expr = Expr::infix(
            Expr::integer(5, pos.clone()),
            InfixOp::Add,
            Expr::integer(3, pos.clone()),
            pos.clone(),
        );
        if let Expr::Infix { operator, .. } = expr {
            assert_eq!(operator, InfixOp::Add);
        } else {
            panic!("expected infix expression");
        }
    }

    #[test]
    fn stmt_position_accessor_covers_decl_variants() {
        let pos = Position::new(4, 2, 10);
        let action = Stmt::Action {
            decl: ActionDecl {
                name: Some(Symbol::from("work")),
                params: vec![],
                body: vec![],
                is_async: false,
                position: pos.clone(),
            },
        };
        assert_eq!(action.position(), &pos);
    }

    #[test]
    fn program_finders() {
        let pos = Position::new(1, 1, 0);
        let program = Program::new(vec![
            Stmt::Action {
                decl: ActionDecl {
                    name: Some(Symbol::from("a")),
                    params: vec![],
                    body: vec![],
                    is_async: true,
                    position: pos.clone(),
                },
            },
            Stmt::Event {
                decl: EventDecl {
                    name: Symbol::from("E"),
                    fields: vec![Symbol::from("x")],
                    position: pos,
                },
            },
        ]);
        assert_eq!(program.find_actions().len(), 1);
        assert_eq!(program.find_events().len(), 1);
        assert!(program.find_actions()[0].is_async);
    }
}
