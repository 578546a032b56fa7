#![allow(clippy::result_large_err)]

pub mod arith;
pub mod methods;

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::ast::{ActionDecl, AssignTarget, ContractDecl, Expr, Program, ProtocolDecl, Stmt};
use crate::builtins::{self, Host, Registry};
use crate::config;
use crate::environment::Env;
use crate::errors::{ErrorKind, ZexusError};
use crate::object::{
    ActionObject, Coroutine, CoroutineState, EventDescriptor, LambdaObject, Object,
};

/// Control flow that unwinds through evaluation frames.
#[derive(Debug)]
pub enum Flow {
    Return(Object),
    Error(ZexusError),
}

impl From<ZexusError> for Flow {
    fn from(value: ZexusError) -> Self {
        Flow::Error(value)
    }
}

type EvalResult = Result<Object, Flow>;

/// Per-run evaluator options.
#[derive(Debug, Clone, Default)]
pub struct EvalOptions {
    /// Print an action-frame trace when an error surfaces.
    pub debug: bool,
    /// Abort with InterruptedError after this many evaluation steps.
    pub step_budget: Option<u64>,
}

/// Tree-walking interpreter over the interpreter AST.
pub struct Evaluator {
    pub host: Host,
    registry: Registry,
    globals: Env,
    events: HashMap<String, Rc<EventDescriptor>>,
    handlers: HashMap<String, Vec<Object>>,
    protocols: HashMap<String, ProtocolDecl>,
    queue: VecDeque<Rc<RefCell<Coroutine>>>,
    call_stack: Vec<String>,
    /// Action frames captured where the surfacing error was raised.
    error_trace: Vec<String>,
    options: EvalOptions,
    steps: u64,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_host(Host::new())
    }

    pub fn with_host(host: Host) -> Self {
        let registry = Registry::standard();
        let globals = Env::new();
        registry.install_globals(&globals);
        Self {
            host,
            registry,
            globals,
            events: HashMap::new(),
            handlers: HashMap::new(),
            protocols: HashMap::new(),
            queue: VecDeque::new(),
            call_stack: Vec::new(),
            error_trace: Vec::new(),
            options: EvalOptions::default(),
            steps: 0,
        }
    }

    pub fn with_options(mut self, options: EvalOptions) -> Self {
        self.options = options;
        self
    }

    pub fn globals(&self) -> &Env {
        &self.globals
    }

    /// Evaluate a program. The result is the value of the final top-level
    /// expression statement, `null` otherwise.
    pub fn evaluate(&mut self, program: &Program) -> Result<Object, ZexusError> {
        let env = self.globals.clone();
        let mut last = Object::Null;
        let count = program.statements.len();
        for (index, stmt) in program.statements.iter().enumerate() {
            match self.eval_stmt(stmt, &env) {
                Ok(value) => {
                    if index + 1 == count && matches!(stmt, Stmt::Expression { .. }) {
                        last = value;
                    }
                }
                Err(Flow::Return(_)) => {
                    return Err(self.surface(ZexusError::at(
                        ErrorKind::InternalError,
                        "return outside of an action",
                        stmt.position().clone(),
                    )));
                }
                Err(Flow::Error(error)) => return Err(self.surface(error)),
            }
        }
        Ok(last)
    }

    /// Evaluate, then drive spawned coroutines to completion (FIFO).
    pub fn run_async(&mut self, program: &Program) -> Result<Object, ZexusError> {
        let result = self.evaluate(program)?;
        while let Some(task) = self.queue.pop_front() {
            self.run_task(&task);
        }
        Ok(result)
    }

    fn surface(&mut self, error: ZexusError) -> ZexusError {
        if self.options.debug && !self.error_trace.is_empty() {
            let mut trace = String::from("TRACE:");
            for frame in self.error_trace.iter().rev() {
                trace.push_str(&format!(" <- {}", frame));
            }
            self.host.print_line(&trace);
        }
        self.error_trace.clear();
        error
    }

    fn tick(&mut self) -> Result<(), ZexusError> {
        self.steps += 1;
        if let Some(budget) = self.options.step_budget {
            if self.steps > budget {
                return Err(ZexusError::new(
                    ErrorKind::InterruptedError,
                    format!("step budget of {} exceeded", budget),
                ));
            }
        }
        Ok(())
    }

    //=====================================================
    //            Statements
    //=====================================================

    fn eval_stmt(&mut self, stmt: &Stmt, env: &Env) -> EvalResult {
        self.tick()?;
        match stmt {
            Stmt::Let { name, value, .. } => {
                let value = self.eval_expr(value, env)?;
                env.set(name.as_str(), value);
                Ok(Object::Null)
            }
            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr, env)?,
                    None => Object::Null,
                };
                Err(Flow::Return(value))
            }
            Stmt::Expression { expr, .. } => self.eval_expr(expr, env),
            Stmt::Block { statements, .. } => {
                let child = Env::child_of(env);
                let mut last = Object::Null;
                for stmt in statements {
                    last = self.eval_stmt(stmt, &child)?;
                }
                Ok(last)
            }
            Stmt::Print { value, .. } => {
                let value = self.eval_expr(value, env)?;
                self.host.print_line(&value.inspect());
                Ok(Object::Null)
            }
            Stmt::ForEach {
                variable,
                iterable,
                body,
                position,
            } => {
                let iterable = self.eval_expr(iterable, env)?;
                let items: Vec<Object> = match &iterable {
                    Object::List(items) => items.borrow().clone(),
                    Object::Map(pairs) => pairs
                        .borrow()
                        .keys()
                        .map(|key| Object::Str(key.clone()))
                        .collect(),
                    other => {
                        return Err(Flow::Error(ZexusError::at(
                            ErrorKind::TypeError,
                            format!("{} is not iterable", other.type_name()),
                            position.clone(),
                        )));
                    }
                };
                let loop_env = Env::child_of(env);
                loop_env.set(variable.as_str(), Object::Null);
                for item in items {
                    loop_env.assign(variable.as_str(), item);
                    self.eval_stmt(body, &loop_env)?;
                }
                Ok(Object::Null)
            }
            Stmt::If {
                condition,
                consequence,
                alternative,
                ..
            } => {
                let condition = self.eval_expr(condition, env)?;
                if condition.is_truthy() {
                    self.eval_stmt(consequence, env)?;
                } else if let Some(alternative) = alternative {
                    self.eval_stmt(alternative, env)?;
                }
                Ok(Object::Null)
            }
            Stmt::While {
                condition, body, ..
            } => {
                loop {
                    let condition = self.eval_expr(condition, env)?;
                    if !condition.is_truthy() {
                        break;
                    }
                    self.eval_stmt(body, env)?;
                }
                Ok(Object::Null)
            }
            Stmt::TryCatch {
                body,
                error_name,
                handler,
                ..
            } => {
                match self.eval_stmt(body, env) {
                    Ok(_) => Ok(Object::Null),
                    Err(Flow::Return(value)) => Err(Flow::Return(value)),
                    Err(Flow::Error(error)) => {
                        self.error_trace.clear();
                        // The handler sees only the error binding in its own
                        // frame; errors raised inside it propagate normally.
                        let handler_env = Env::child_of(env);
                        handler_env.set(
                            error_name.as_str(),
                            Object::error(error.kind, error.message.clone()),
                        );
                        self.eval_stmt(handler, &handler_env)?;
                        Ok(Object::Null)
                    }
                }
            }
            Stmt::Action { decl } => {
                let action = self.make_action(decl, env);
                if let Some(name) = &decl.name {
                    env.set(name.as_str(), action);
                }
                Ok(Object::Null)
            }
            Stmt::Event { decl } => {
                let descriptor = Rc::new(EventDescriptor {
                    name: decl.name.to_string(),
                    fields: decl.fields.iter().map(|f| f.to_string()).collect(),
                });
                self.events
                    .insert(decl.name.to_string(), descriptor.clone());
                env.set(decl.name.as_str(), Object::EventDescriptor(descriptor));
                Ok(Object::Null)
            }
            Stmt::Emit { name, payload, position } => {
                self.eval_emit(name.as_str(), payload, env, position.clone())
            }
            Stmt::Enum { name, variants, .. } => {
                let variant_names: Vec<String> =
                    variants.iter().map(|v| v.to_string()).collect();
                env.set(name.as_str(), methods::enum_map(name.as_str(), &variant_names));
                Ok(Object::Null)
            }
            Stmt::Protocol { decl } => {
                self.protocols.insert(decl.name.to_string(), decl.clone());
                Ok(Object::Null)
            }
            Stmt::Contract { decl } => self.eval_contract(decl, env),
            Stmt::External { name, source, .. } => {
                let bound = self
                    .host
                    .externals
                    .get(name.as_str())
                    .cloned()
                    .unwrap_or(Object::Null);
                if matches!(bound, Object::Null) {
                    config::debug_log(&format!(
                        "external '{}'{} not provided by host",
                        name,
                        source
                            .as_ref()
                            .map(|s| format!(" (from \"{}\")", s))
                            .unwrap_or_default()
                    ));
                }
                env.set(name.as_str(), bound);
                Ok(Object::Null)
            }
            Stmt::Export { inner, position } => {
                let name = match &**inner {
                    Stmt::Let { name, .. } => {
                        self.eval_stmt(inner, env)?;
                        name.to_string()
                    }
                    Stmt::Action { decl } => {
                        self.eval_stmt(inner, env)?;
                        decl.name
                            .as_ref()
                            .map(|n| n.to_string())
                            .unwrap_or_default()
                    }
                    Stmt::Expression {
                        expr: Expr::Identifier { name, .. },
                        ..
                    } => name.to_string(),
                    _ => {
                        return Err(Flow::Error(ZexusError::at(
                            ErrorKind::SemanticError,
                            "only top-level bindings can be exported",
                            position.clone(),
                        )));
                    }
                };
                if !env.export(&name) {
                    return Err(Flow::Error(ZexusError::at(
                        ErrorKind::NameError,
                        format!("cannot export unbound name '{}'", name),
                        position.clone(),
                    )));
                }
                Ok(Object::Null)
            }
            Stmt::Debug { message, value, .. } => {
                let message = self.eval_expr(message, env)?;
                let mut line = format!("DEBUG: {}", message.inspect());
                if let Some(value) = value {
                    let value = self.eval_expr(value, env)?;
                    line.push_str(&format!(" -> {}", value.inspect()));
                }
                self.host.print_line(&line);
                Ok(Object::Null)
            }
            Stmt::Use {
                module,
                alias,
                position,
            } => {
                let bound = self.host.modules.get(module.as_str()).cloned();
                match bound {
                    Some(value) => {
                        let name = alias.as_ref().unwrap_or(module);
                        env.set(name.as_str(), value);
                        Ok(Object::Null)
                    }
                    None => Err(Flow::Error(ZexusError::at(
                        ErrorKind::NameError,
                        format!("unknown module '{}'", module),
                        position.clone(),
                    ))),
                }
            }
            Stmt::ScreenDef {
                name, properties, ..
            } => self.eval_renderer_def("define_screen", name.as_str(), properties, env),
            Stmt::ComponentDef {
                name, properties, ..
            } => self.eval_renderer_def("define_component", name.as_str(), properties, env),
            Stmt::ThemeDef {
                name, properties, ..
            } => self.eval_renderer_def("define_theme", name.as_str(), properties, env),
        }
    }

    fn eval_renderer_def(
        &mut self,
        tag: &str,
        name: &str,
        properties: &Expr,
        env: &Env,
    ) -> EvalResult {
        let properties = self.eval_expr(properties, env)?;
        builtins::invoke_render(
            &mut self.host,
            tag,
            &[Object::string(name), properties],
        )?;
        Ok(Object::Null)
    }

    fn make_action(&self, decl: &ActionDecl, env: &Env) -> Object {
        Object::Action(Rc::new(ActionObject {
            name: decl.name.as_ref().map(|n| n.to_string()),
            params: decl.params.iter().map(|p| p.to_string()).collect(),
            body: decl.body.clone(),
            env: env.clone(),
            is_async: decl.is_async,
        }))
    }

    fn eval_contract(&mut self, decl: &ContractDecl, env: &Env) -> EvalResult {
        let mut pairs = indexmap::IndexMap::new();
        for (key, value) in &decl.storage {
            let value = self.eval_expr(value, env)?;
            pairs.insert(key.clone(), value);
        }
        for action in &decl.actions {
            let name = action
                .name
                .as_ref()
                .map(|n| n.to_string())
                .unwrap_or_else(|| "anonymous".to_string());
            pairs.insert(name, self.make_action(action, env));
        }
        if let Some(protocol_name) = &decl.protocol {
            let protocol = self.protocols.get(protocol_name.as_str()).cloned();
            let protocol = protocol.ok_or_else(|| {
                ZexusError::at(
                    ErrorKind::ProtocolError,
                    format!("unknown protocol '{}'", protocol_name),
                    decl.position.clone(),
                )
            })?;
            for signature in &protocol.signatures {
                let conforms = decl.actions.iter().any(|action| {
                    action.name.as_deref() == Some(signature.name.as_str())
                        && action.params.len() == signature.params.len()
                });
                if !conforms {
                    return Err(Flow::Error(ZexusError::at(
                        ErrorKind::ProtocolError,
                        format!(
                            "contract '{}' does not satisfy {}.{}({})",
                            decl.name,
                            protocol_name,
                            signature.name,
                            signature.params.len()
                        ),
                        decl.position.clone(),
                    )));
                }
            }
        }
        env.set(decl.name.as_str(), Object::map(pairs));
        Ok(Object::Null)
    }

    fn eval_emit(
        &mut self,
        name: &str,
        payload: &[(String, Expr)],
        env: &Env,
        position: crate::token::Position,
    ) -> EvalResult {
        let descriptor = self.events.get(name).cloned().ok_or_else(|| {
            ZexusError::at(
                ErrorKind::EventError,
                format!("emit of undeclared event '{}'", name),
                position.clone(),
            )
        })?;

        let mut pairs = indexmap::IndexMap::new();
        for (key, value) in payload {
            if !descriptor.fields.iter().any(|field| field == key) {
                return Err(Flow::Error(ZexusError::at(
                    ErrorKind::EventError,
                    format!("event '{}' has no field '{}'", name, key),
                    position.clone(),
                )));
            }
            let value = self.eval_expr(value, env)?;
            pairs.insert(key.clone(), value);
        }
        for field in &descriptor.fields {
            if !pairs.contains_key(field) {
                pairs.insert(field.clone(), Object::Null);
            }
        }
        let payload = Object::map(pairs);

        // Synchronous delivery in registration order; a failing handler
        // halts further delivery of this emission.
        let handlers = self.handlers.get(name).cloned().unwrap_or_default();
        for handler in handlers {
            self.apply(handler, vec![payload.clone()])?;
        }
        Ok(Object::Null)
    }

    //=====================================================
    //            Expressions
    //=====================================================

    fn eval_expr(&mut self, expr: &Expr, env: &Env) -> EvalResult {
        self.tick()?;
        match expr {
            Expr::Identifier { name, position } => {
                env.get(name.as_str()).ok_or_else(|| {
                    Flow::Error(ZexusError::at(
                        ErrorKind::NameError,
                        format!("identifier not found: {}", name),
                        position.clone(),
                    ))
                })
            }
            Expr::Integer { value, .. } => Ok(Object::Integer(value.clone())),
            Expr::Float { value, .. } => Ok(Object::Float(*value)),
            Expr::Str { value, .. } => Ok(Object::Str(value.clone())),
            Expr::Bool { value, .. } => Ok(Object::Boolean(*value)),
            Expr::Null { .. } => Ok(Object::Null),
            Expr::List { elements, .. } => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval_expr(element, env)?);
                }
                Ok(Object::list(items))
            }
            Expr::Map { pairs, .. } => {
                let mut map = indexmap::IndexMap::new();
                for (key, value) in pairs {
                    let value = self.eval_expr(value, env)?;
                    map.insert(key.clone(), value);
                }
                Ok(Object::map(map))
            }
            Expr::ActionLiteral {
                params,
                body,
                is_async,
                position,
            } => Ok(self.make_action(
                &ActionDecl {
                    name: None,
                    params: params.clone(),
                    body: body.clone(),
                    is_async: *is_async,
                    position: position.clone(),
                },
                env,
            )),
            Expr::Lambda { params, body, .. } => Ok(Object::Lambda(Rc::new(LambdaObject {
                params: params.iter().map(|p| p.to_string()).collect(),
                body: (**body).clone(),
                env: env.clone(),
            }))),
            Expr::Call { callee, args, position } => {
                let callee = self.eval_expr(callee, env)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_expr(arg, env)?);
                }
                self.apply(callee, values).map_err(|flow| match flow {
                    Flow::Error(error) => {
                        Flow::Error(error.with_position(position.clone()))
                    }
                    other => other,
                })
            }
            Expr::MethodCall {
                receiver,
                method,
                args,
                position,
            } => {
                let receiver = self.eval_expr(receiver, env)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_expr(arg, env)?);
                }
                self.eval_method(receiver, method.as_str(), values, position)
            }
            Expr::Property { object, name, .. } => {
                let object = self.eval_expr(object, env)?;
                methods::property(&object, name.as_str()).map_err(Flow::Error)
            }
            Expr::Index {
                object,
                index,
                position,
            } => {
                let object = self.eval_expr(object, env)?;
                let index = self.eval_expr(index, env)?;
                self.eval_index(object, index, position)
            }
            Expr::Assign { target, value, position } => {
                let value = self.eval_expr(value, env)?;
                self.eval_assign(target, value, env, position)
            }
            Expr::Prefix {
                operator, operand, ..
            } => {
                let operand = self.eval_expr(operand, env)?;
                arith::unary_op(*operator, operand).map_err(Flow::Error)
            }
            Expr::Infix {
                left,
                operator,
                right,
                position,
            } => {
                let left = self.eval_expr(left, env)?;
                let right = self.eval_expr(right, env)?;
                arith::binary_op(*operator, left, right)
                    .map_err(|error| Flow::Error(error.with_position(position.clone())))
            }
            Expr::IfExpr {
                condition,
                consequence,
                alternative,
                ..
            } => {
                let condition = self.eval_expr(condition, env)?;
                if condition.is_truthy() {
                    self.eval_expr(consequence, env)
                } else {
                    self.eval_expr(alternative, env)
                }
            }
            Expr::Await { inner, .. } => {
                let value = self.eval_expr(inner, env)?;
                self.await_value(value)
            }
            Expr::EmbeddedLiteral { language, code, .. } => {
                let mut pairs = indexmap::IndexMap::new();
                pairs.insert("language".to_string(), Object::string(language.clone()));
                pairs.insert("code".to_string(), Object::string(code.clone()));
                Ok(Object::map(pairs))
            }
        }
    }

    fn eval_method(
        &mut self,
        receiver: Object,
        method: &str,
        args: Vec<Object>,
        position: &crate::token::Position,
    ) -> EvalResult {
        match methods::dispatch(&receiver, method, &args) {
            Some(result) => {
                result.map_err(|error| Flow::Error(error.with_position(position.clone())))
            }
            None => {
                // Higher-order list methods share the builtin bodies.
                let mut call_args = vec![receiver];
                call_args.extend(args);
                self.call_engine_builtin(method, call_args)
            }
        }
    }

    fn eval_index(
        &mut self,
        object: Object,
        index: Object,
        position: &crate::token::Position,
    ) -> EvalResult {
        methods::index_get(&object, &index)
            .map_err(|error| Flow::Error(error.with_position(position.clone())))
    }

    fn eval_assign(
        &mut self,
        target: &AssignTarget,
        value: Object,
        env: &Env,
        position: &crate::token::Position,
    ) -> EvalResult {
        match target {
            AssignTarget::Name(name) => {
                if !env.assign(name.as_str(), value.clone()) {
                    env.set(name.as_str(), value.clone());
                }
                Ok(value)
            }
            AssignTarget::Index { object, index } => {
                let object = self.eval_expr(object, env)?;
                let index = self.eval_expr(index, env)?;
                methods::index_set(&object, &index, value)
                    .map_err(|error| Flow::Error(error.with_position(position.clone())))
            }
            AssignTarget::Property { object, name } => {
                let object = self.eval_expr(object, env)?;
                methods::index_set(&object, &Object::string(name.as_str()), value)
                    .map_err(|error| Flow::Error(error.with_position(position.clone())))
            }
        }
    }

    //=====================================================
    //            Application & builtins
    //=====================================================

    pub fn apply(&mut self, callee: Object, args: Vec<Object>) -> EvalResult {
        match callee {
            Object::Builtin { name, arity } => {
                if !arity.accepts(args.len()) {
                    return Err(Flow::Error(ZexusError::arity(format!(
                        "'{}' expects {}, got {}",
                        name,
                        arity.describe(),
                        args.len()
                    ))));
                }
                self.call_engine_builtin(name, args)
            }
            Object::Action(action) => {
                if args.len() != action.params.len() {
                    return Err(Flow::Error(ZexusError::arity(format!(
                        "action '{}' expects {} argument(s), got {}",
                        action.name.as_deref().unwrap_or("anonymous"),
                        action.params.len(),
                        args.len()
                    ))));
                }
                if action.is_async {
                    // Calling an async action yields a coroutine; it runs
                    // when awaited or driven by the scheduler.
                    return Ok(Object::Coroutine(Coroutine::pending(
                        Object::Action(action),
                        args,
                    )));
                }
                self.apply_action(&action, args)
            }
            Object::Lambda(lambda) => {
                if args.len() != lambda.params.len() {
                    return Err(Flow::Error(ZexusError::arity(format!(
                        "lambda expects {} argument(s), got {}",
                        lambda.params.len(),
                        args.len()
                    ))));
                }
                let child = Env::child_of(&lambda.env);
                for (param, arg) in lambda.params.iter().zip(args) {
                    child.set(param.as_str(), arg);
                }
                self.eval_expr(&lambda.body, &child)
            }
            Object::Compiled(_) => Err(Flow::Error(ZexusError::internal(
                "compiled actions can only run inside the VM",
            ))),
            other => Err(Flow::Error(ZexusError::type_error(format!(
                "{} is not callable",
                other.type_name()
            )))),
        }
    }

    fn apply_action(&mut self, action: &Rc<ActionObject>, args: Vec<Object>) -> EvalResult {
        // Parameters bind in a child of the action's captured environment.
        let child = Env::child_of(&action.env);
        for (param, arg) in action.params.iter().zip(args) {
            child.set(param.as_str(), arg);
        }
        self.call_stack.push(
            action
                .name
                .clone()
                .unwrap_or_else(|| "anonymous".to_string()),
        );
        let mut outcome = Ok(Object::Null);
        for stmt in &action.body {
            match self.eval_stmt(stmt, &child) {
                Ok(_) => {}
                Err(Flow::Return(value)) => {
                    outcome = Ok(value);
                    break;
                }
                Err(Flow::Error(error)) => {
                    if self.options.debug && self.error_trace.is_empty() {
                        self.error_trace = self.call_stack.clone();
                    }
                    outcome = Err(Flow::Error(error));
                    break;
                }
            }
        }
        self.call_stack.pop();
        outcome
    }

    fn call_engine_builtin(&mut self, name: &str, args: Vec<Object>) -> EvalResult {
        match name {
            "map" => {
                let (items, func) = list_and_callable("map", &args)?;
                let mut mapped = Vec::with_capacity(items.len());
                for item in items {
                    mapped.push(self.apply(func.clone(), vec![item])?);
                }
                Ok(Object::list(mapped))
            }
            "filter" => {
                let (items, func) = list_and_callable("filter", &args)?;
                let mut kept = Vec::new();
                for item in items {
                    if self.apply(func.clone(), vec![item.clone()])?.is_truthy() {
                        kept.push(item);
                    }
                }
                Ok(Object::list(kept))
            }
            "reduce" => {
                let (items, func) = list_and_callable("reduce", &args)?;
                let mut iterator = items.into_iter();
                let mut accumulator = match args.get(2) {
                    Some(init) => init.clone(),
                    None => iterator.next().ok_or_else(|| {
                        Flow::Error(ZexusError::type_error(
                            "reduce() of empty list with no initial value",
                        ))
                    })?,
                };
                for item in iterator {
                    accumulator = self.apply(func.clone(), vec![accumulator, item])?;
                }
                Ok(accumulator)
            }
            "spawn" => match &args[0] {
                Object::Coroutine(task) => {
                    task.borrow_mut().queued = true;
                    self.queue.push_back(task.clone());
                    Ok(Object::Coroutine(task.clone()))
                }
                other => Err(Flow::Error(ZexusError::type_error(format!(
                    "spawn() expects COROUTINE, got {}",
                    other.type_name()
                )))),
            },
            "register_event" => {
                let event_name = match &args[0] {
                    Object::Str(s) => s.clone(),
                    other => {
                        return Err(Flow::Error(ZexusError::type_error(format!(
                            "register_event() expects a STRING name, got {}",
                            other.type_name()
                        ))));
                    }
                };
                if !self.events.contains_key(&event_name) {
                    return Err(Flow::Error(ZexusError::new(
                        ErrorKind::EventError,
                        format!("register_event for undeclared event '{}'", event_name),
                    )));
                }
                if !args[1].is_callable() {
                    return Err(Flow::Error(ZexusError::type_error(
                        "register_event() expects a callable handler",
                    )));
                }
                self.handlers
                    .entry(event_name)
                    .or_default()
                    .push(args[1].clone());
                Ok(Object::Null)
            }
            _ => self
                .registry
                .invoke(&mut self.host, name, &args)
                .map_err(Flow::Error),
        }
    }

    //=====================================================
    //            Cooperative tasks
    //=====================================================

    fn await_value(&mut self, value: Object) -> EvalResult {
        match value {
            Object::Coroutine(task) => self.drive(&task),
            // Awaiting a non-coroutine passes it through unchanged.
            other => Ok(other),
        }
    }

    /// Drive the awaited coroutine to completion. Queued tasks ahead of it
    /// run first, preserving spawn order.
    fn drive(&mut self, target: &Rc<RefCell<Coroutine>>) -> EvalResult {
        loop {
            {
                let state = target.borrow();
                match &state.state {
                    CoroutineState::Done(value) => return Ok(value.clone()),
                    CoroutineState::Failed(error) => {
                        return Err(Flow::Error(error.clone()));
                    }
                    CoroutineState::Task { .. } => {
                        return Err(Flow::Error(ZexusError::internal(
                            "VM coroutine awaited inside the interpreter",
                        )));
                    }
                    CoroutineState::Pending { .. } => {}
                }
            }
            if target.borrow().queued {
                match self.queue.pop_front() {
                    Some(task) => {
                        self.run_task(&task);
                    }
                    None => {
                        // Queue drained without reaching the target; run it.
                        self.run_task(target);
                    }
                }
            } else {
                self.run_task(target);
            }
        }
    }

    fn run_task(&mut self, task: &Rc<RefCell<Coroutine>>) {
        let pending = {
            let mut state = task.borrow_mut();
            match std::mem::replace(&mut state.state, CoroutineState::Done(Object::Null)) {
                CoroutineState::Pending { action, args } => Some((action, args)),
                other => {
                    state.state = other;
                    None
                }
            }
        };
        let Some((action, args)) = pending else {
            return;
        };
        let result = match action {
            Object::Action(action) => self.apply_action(&action, args),
            other => self.apply(other, args),
        };
        let mut state = task.borrow_mut();
        state.state = match result {
            Ok(value) => CoroutineState::Done(value),
            Err(Flow::Return(value)) => CoroutineState::Done(value),
            Err(Flow::Error(error)) => CoroutineState::Failed(error),
        };
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn list_and_callable(name: &str, args: &[Object]) -> Result<(Vec<Object>, Object), Flow> {
    let items = match &args[0] {
        Object::List(items) => items.borrow().clone(),
        other => {
            return Err(Flow::Error(ZexusError::type_error(format!(
                "{}() expects LIST, got {}",
                name,
                other.type_name()
            ))));
        }
    };
    let func = args
        .get(1)
        .cloned()
        .ok_or_else(|| Flow::Error(ZexusError::arity(format!("{}() expects a callable", name))))?;
    if !func.is_callable() {
        return Err(Flow::Error(ZexusError::type_error(format!(
            "{}() expects a callable, got {}",
            name,
            func.type_name()
        ))));
    }
    Ok((items, func))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::TolerantParser;

    fn run(source: &str) -> (Result<Object, ZexusError>, String) {
        let (program, diagnostics) = TolerantParser::parse_source(source);
        assert!(
            diagnostics.is_empty(),
            "parse diagnostics for {:?}: {:?}",
            source,
            diagnostics
        );
        let mut evaluator = Evaluator::with_host(Host::capturing());
        let result = evaluator.run_async(&program);
        let output = evaluator.host.take_output();
        (result, output)
    }

    fn output_of(source: &str) -> String {
        let (result, output) = run(source);
        result.unwrap();
        output
    }

    #[test]
    fn arithmetic_prints() {
        assert_eq!(output_of("print(string(10 + 5))"), "15\n");
    }

    #[test]
    fn map_literal_formats_in_insertion_order() {
        assert_eq!(
            output_of("let m = { \"a\": 1, b: 2; c: 3, }  print(string(m))"),
            "{\"a\": 1, \"b\": 2, \"c\": 3}\n"
        );
    }

    #[test]
    fn try_catch_binds_error_object() {
        assert_eq!(
            output_of("try { let x = 10 / 0 } catch(err) { print(\"error: \" + string(err)) }"),
            "error: ArithmeticError: division by zero\n"
        );
    }

    #[test]
    fn list_map_method_with_lambda() {
        assert_eq!(
            output_of("let nums=[1,2,3,4] let d=nums.map(lambda(n)->n*2) print(string(d))"),
            "[2, 4, 6, 8]\n"
        );
    }

    #[test]
    fn closures_share_cells() {
        let source = "action make(){ let c=0 action inc(){ c=c+1 return c } return inc } \
                      let f=make() print(string(f())) print(string(f()))";
        assert_eq!(output_of(source), "1\n2\n");
    }

    #[test]
    fn events_deliver_in_registration_order() {
        let source = "event E { x: integer } \
                      register_event(\"E\", action(e){ print(\"got \" + string(e.x)) }) \
                      emit E { x: 7 }";
        assert_eq!(output_of(source), "got 7\n");
    }

    #[test]
    fn missing_event_fields_default_to_null() {
        let source = "event E { x: integer, y: integer } \
                      register_event(\"E\", action(e){ print(string(e.y)) }) \
                      emit E { x: 1 }";
        assert_eq!(output_of(source), "null\n");
    }

    #[test]
    fn arity_is_exact() {
        let (result, _) = run("action one(a) { return a } one(1, 2)");
        assert_eq!(result.unwrap_err().kind, ErrorKind::ArityError);
    }

    #[test]
    fn return_at_top_level_is_an_error() {
        let (result, _) = run("return 5");
        assert_eq!(result.unwrap_err().kind, ErrorKind::InternalError);
    }

    #[test]
    fn async_action_call_returns_coroutine_until_awaited() {
        let source = "action async work() { return 42 } \
                      let c = work() print(string(c)) print(string(await c))";
        assert_eq!(output_of(source), "<coroutine>\n42\n");
    }

    #[test]
    fn spawned_tasks_run_fifo() {
        let source = "let order = [] \
                      action async a() { order = push(order, 1) } \
                      action async b() { order = push(order, 2) } \
                      let ta = spawn(a()) let tb = spawn(b()) \
                      await tb print(string(order))";
        assert_eq!(output_of(source), "[1, 2]\n");
    }

    #[test]
    fn for_each_iterates_map_keys_in_order() {
        let source = "let m = { a: 1, b: 2 } for each k in m { print(k) }";
        assert_eq!(output_of(source), "a\nb\n");
    }

    #[test]
    fn while_and_assignment() {
        let source = "let i = 0 let total = 0 while i < 4 { total = total + i i = i + 1 } \
                      print(string(total))";
        assert_eq!(output_of(source), "6\n");
    }

    #[test]
    fn step_budget_interrupts_runaway_loops() {
        let (program, _) = TolerantParser::parse_source("while true { let x = 1 }");
        let mut evaluator = Evaluator::with_host(Host::capturing()).with_options(EvalOptions {
            debug: false,
            step_budget: Some(10_000),
        });
        let err = evaluator.evaluate(&program).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InterruptedError);
    }

    #[test]
    fn enum_values_compare() {
        let source = "enum Color { Red, Green } let a = Color.Red \
                      if a == Color.Red { print(\"red\") } else { print(\"no\") }";
        assert_eq!(output_of(source), "red\n");
    }

    #[test]
    fn contract_is_a_map_binding_and_checks_protocol() {
        let source = "protocol Ledger { action transfer(to, amount) } \
                      contract Token { require Ledger storage { total: 100 } \
                      action transfer(to, amount) { return amount } } \
                      print(string(Token.total))";
        assert_eq!(output_of(source), "100\n");

        let bad = "protocol Ledger { action transfer(to, amount) } \
                   contract Token { require Ledger storage { total: 100 } }";
        let (result, _) = run(bad);
        assert_eq!(result.unwrap_err().kind, ErrorKind::ProtocolError);
    }
}
