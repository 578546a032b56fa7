#![allow(clippy::result_large_err)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::builtins::{self, Host, Registry};
use crate::bytecode::{Bytecode, CompiledAction, FunctionDef, Op};
use crate::environment::Env;
use crate::errors::{ErrorKind, ZexusError};
use crate::evaluator::arith;
use crate::evaluator::methods;
use crate::object::{Coroutine, CoroutineState, EventDescriptor, Object};

/// Runtime flags controlling tracing and the step budget.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    pub trace: bool,
    pub step_budget: Option<u64>,
}

impl RuntimeOptions {
    pub fn with_trace(trace: bool) -> Self {
        Self {
            trace,
            ..Self::default()
        }
    }

    pub fn with_step_budget(mut self, budget: u64) -> Self {
        self.step_budget = Some(budget);
        self
    }
}

/// An installed try handler: jump target, error binding, stack watermark.
struct TryHandler {
    target: usize,
    err_name: usize,
    stack_depth: usize,
}

enum FrameCode {
    Main(Rc<Vec<Op>>),
    Function(Rc<FunctionDef>),
}

impl FrameCode {
    fn op_at(&self, ip: usize) -> Option<&Op> {
        match self {
            FrameCode::Main(ops) => ops.get(ip),
            FrameCode::Function(def) => def.code.get(ip),
        }
    }
}

/// One call frame: code, instruction pointer, locals (chained to globals),
/// value-stack base and this frame's try stack.
struct Frame {
    code: FrameCode,
    ip: usize,
    locals: Env,
    stack_base: usize,
    try_stack: Vec<TryHandler>,
}

/// A cooperative task: saved frames plus its own value stack.
struct Task {
    id: u64,
    frames: Vec<Frame>,
    stack: Vec<Object>,
    coroutine: Option<Rc<RefCell<Coroutine>>>,
    /// Result injected when the awaited task completed.
    wake: Option<Result<Object, ZexusError>>,
}

enum StepOutcome {
    Finished(Result<Object, ZexusError>),
    Blocked { on: u64 },
}

/// Stack VM over Zexus bytecode with a FIFO cooperative scheduler.
///
/// Exactly one task executes at a time; tasks suspend only at `AWAIT` on an
/// incomplete coroutine. Spawned tasks run in spawn order when the running
/// task suspends or completes.
///
/// @ZNOTE[Renderer Boundary]: RENDER_OP delegates straight to the host
/// backend; tag semantics never enter this loop.
pub struct Vm {
    main_code: Rc<Vec<Op>>,
    constants: Rc<Bytecode>,
    functions: Vec<Rc<FunctionDef>>,
    pub host: Host,
    registry: Registry,
    globals: Env,
    options: RuntimeOptions,

    events: HashMap<String, Rc<EventDescriptor>>,
    handlers: HashMap<String, Vec<Object>>,
    protocols: HashMap<String, Vec<(String, usize)>>,

    ready: VecDeque<Task>,
    pending: HashMap<u64, Task>,
    blocked: HashMap<u64, Vec<Task>>,
    results: HashMap<u64, Result<Object, ZexusError>>,
    next_task_id: u64,
    steps: u64,
}

impl Vm {
    pub fn new(program: Bytecode, host: Host) -> Self {
        let registry = Registry::standard();
        let globals = Env::new();
        registry.install_globals(&globals);
        let main_code = Rc::new(program.code.clone());
        let functions = program
            .functions
            .iter()
            .cloned()
            .map(Rc::new)
            .collect();
        Self {
            main_code,
            constants: Rc::new(program),
            functions,
            host,
            registry,
            globals,
            options: RuntimeOptions::default(),
            events: HashMap::new(),
            handlers: HashMap::new(),
            protocols: HashMap::new(),
            ready: VecDeque::new(),
            pending: HashMap::new(),
            blocked: HashMap::new(),
            results: HashMap::new(),
            next_task_id: 1,
            steps: 0,
        }
    }

    pub fn with_options(mut self, options: RuntimeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn globals(&self) -> &Env {
        &self.globals
    }

    /// Execute the program to completion, then drain remaining spawned
    /// tasks. The result is the value left by the final top-level
    /// expression statement.
    pub fn run(&mut self) -> Result<Object, ZexusError> {
        self.install_header();
        let main_task = Task {
            id: 0,
            frames: vec![Frame {
                code: FrameCode::Main(self.main_code.clone()),
                ip: 0,
                locals: self.globals.clone(),
                stack_base: 0,
                try_stack: Vec::new(),
            }],
            stack: Vec::new(),
            coroutine: None,
            wake: None,
        };
        self.ready.push_back(main_task);

        let mut main_result: Result<Object, ZexusError> = Ok(Object::Null);
        while let Some(mut task) = self.ready.pop_front() {
            match self.run_until_blocked(&mut task) {
                StepOutcome::Finished(result) => {
                    let id = task.id;
                    if let Some(coroutine) = &task.coroutine {
                        coroutine.borrow_mut().state = match &result {
                            Ok(value) => CoroutineState::Done(value.clone()),
                            Err(error) => CoroutineState::Failed(error.clone()),
                        };
                    }
                    if let Some(waiters) = self.blocked.remove(&id) {
                        for mut waiter in waiters {
                            waiter.wake = Some(result.clone());
                            self.ready.push_back(waiter);
                        }
                    }
                    self.results.insert(id, result.clone());
                    if id == 0 {
                        main_result = result;
                        if main_result.is_err() {
                            break;
                        }
                    }
                }
                StepOutcome::Blocked { on } => {
                    self.blocked.entry(on).or_default().push(task);
                }
            }
        }
        main_result
    }

    fn install_header(&mut self) {
        for (name, fields) in &self.constants.header.events {
            let descriptor = Rc::new(EventDescriptor {
                name: name.clone(),
                fields: fields.clone(),
            });
            self.events.insert(name.clone(), descriptor.clone());
            self.globals
                .set(name.as_str(), Object::EventDescriptor(descriptor));
        }
        for (name, signatures) in &self.constants.header.protocols {
            self.protocols.insert(name.clone(), signatures.clone());
        }
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

    fn constant(&self, index: usize) -> Result<Object, ZexusError> {
        self.constants
            .constants
            .get(index)
            .map(|constant| constant.to_object())
            .ok_or_else(|| {
                ZexusError::internal(format!("constant index {} out of bounds", index))
            })
    }

    fn name(&self, index: usize) -> Result<String, ZexusError> {
        self.constants
            .name_at(index)
            .map(|name| name.to_string())
            .ok_or_else(|| {
                ZexusError::internal(format!("name constant {} out of bounds", index))
            })
    }

    //=====================================================
    //            Task stepping
    //=====================================================

    fn run_until_blocked(&mut self, task: &mut Task) -> StepOutcome {
        if let Some(wake) = task.wake.take() {
            match wake {
                Ok(value) => task.stack.push(value),
                Err(error) => {
                    if let Err(fatal) = self.raise(task, error) {
                        return StepOutcome::Finished(Err(fatal));
                    }
                }
            }
        }

        loop {
            if let Err(error) = self.tick() {
                // Budget exhaustion is not catchable by user handlers.
                return StepOutcome::Finished(Err(error));
            }

            let Some(frame) = task.frames.last_mut() else {
                let result = task.stack.pop().unwrap_or(Object::Null);
                return StepOutcome::Finished(Ok(result));
            };

            let op = match frame.code.op_at(frame.ip) {
                Some(op) => op.clone(),
                None => {
                    // Fell off the end of a code block.
                    if task.frames.len() == 1 {
                        let result = task.stack.pop().unwrap_or(Object::Null);
                        return StepOutcome::Finished(Ok(result));
                    }
                    let frame = task.frames.pop().expect("frame exists");
                    task.stack.truncate(frame.stack_base);
                    task.stack.push(Object::Null);
                    continue;
                }
            };
            if self.options.trace {
                eprintln!("[vm] task={} ip={} op={:?}", task.id, frame.ip, op);
            }
            frame.ip += 1;

            let step = self.execute(task, op);
            match step {
                Ok(None) => {}
                Ok(Some(outcome)) => return outcome,
                Err(error) => {
                    if let Err(fatal) = self.raise(task, error) {
                        return StepOutcome::Finished(Err(fatal));
                    }
                }
            }
        }
    }

    /// Execute one instruction. `Ok(Some(_))` suspends or finishes the task;
    /// `Err` unwinds through the try machinery.
    fn execute(
        &mut self,
        task: &mut Task,
        op: Op,
    ) -> Result<Option<StepOutcome>, ZexusError> {
        match op {
            Op::LoadConst(index) => {
                let value = self.constant(index)?;
                task.stack.push(value);
            }
            Op::Load(index) => {
                let name = self.name(index)?;
                let frame = task.frames.last().expect("frame exists");
                let value = frame.locals.get(&name).ok_or_else(|| {
                    ZexusError::name_error(format!("identifier not found: {}", name))
                })?;
                task.stack.push(value);
            }
            Op::Store(index) => {
                let name = self.name(index)?;
                let value = self.pop(task)?;
                let frame = task.frames.last().expect("frame exists");
                frame.locals.set(name, value);
            }
            Op::Assign(index) => {
                let name = self.name(index)?;
                let value = self.pop(task)?;
                let frame = task.frames.last().expect("frame exists");
                if !frame.locals.assign(&name, value.clone()) {
                    frame.locals.set(name, value);
                }
            }
            Op::Pop => {
                self.pop(task)?;
            }
            Op::Dup => {
                let top = self.peek(task)?.clone();
                task.stack.push(top);
            }
            Op::MakeList(count) => {
                let items = self.pop_many(task, count)?;
                task.stack.push(Object::list(items));
            }
            Op::MakeMap(count) => {
                let mut flat = self.pop_many(task, count * 2)?;
                let mut pairs = indexmap::IndexMap::new();
                while !flat.is_empty() {
                    let key = flat.remove(0);
                    let value = flat.remove(0);
                    let key = match key {
                        Object::Str(key) => key,
                        other => {
                            return Err(ZexusError::type_error(format!(
                                "map keys must be strings, got {}",
                                other.type_name()
                            )));
                        }
                    };
                    pairs.insert(key, value);
                }
                task.stack.push(Object::map(pairs));
            }
            Op::Index => {
                let index = self.pop(task)?;
                let object = self.pop(task)?;
                task.stack.push(methods::index_get(&object, &index)?);
            }
            Op::Prop(index) => {
                let name = self.name(index)?;
                let object = self.pop(task)?;
                task.stack.push(methods::property(&object, &name)?);
            }
            Op::Bin(operator) => {
                let right = self.pop(task)?;
                let left = self.pop(task)?;
                task.stack.push(arith::binary_op(operator, left, right)?);
            }
            Op::Un(operator) => {
                let operand = self.pop(task)?;
                task.stack.push(arith::unary_op(operator, operand)?);
            }
            Op::Jump(target) => {
                task.frames.last_mut().expect("frame exists").ip = target;
            }
            Op::JumpIfFalse(target) => {
                let condition = self.pop(task)?;
                if !condition.is_truthy() {
                    task.frames.last_mut().expect("frame exists").ip = target;
                }
            }
            Op::CallName { name, arity } => {
                let name = self.name(name)?;
                let args = self.pop_many(task, arity)?;
                let frame = task.frames.last().expect("frame exists");
                match frame.locals.get(&name) {
                    Some(callee) => self.apply_in_task(task, callee, args)?,
                    None => {
                        let value = self.call_builtin(&name, args)?;
                        task.stack.push(value);
                    }
                }
            }
            Op::CallFuncConst { func, arity } => {
                let args = self.pop_many(task, arity)?;
                let compiled = self.bind_function(task, func)?;
                self.apply_in_task(task, Object::Compiled(compiled), args)?;
            }
            Op::CallTop(arity) => {
                let args = self.pop_many(task, arity)?;
                let callee = self.pop(task)?;
                self.apply_in_task(task, callee, args)?;
            }
            Op::Return => {
                let value = self.pop(task)?;
                let frame = task.frames.pop().expect("frame exists");
                task.stack.truncate(frame.stack_base);
                if task.frames.is_empty() {
                    return Ok(Some(StepOutcome::Finished(Ok(value))));
                }
                task.stack.push(value);
            }
            Op::StoreFunc { name, func } => {
                let name = self.name(name)?;
                let compiled = self.bind_function(task, func)?;
                let frame = task.frames.last().expect("frame exists");
                frame.locals.set(name, Object::Compiled(compiled));
            }
            Op::Spawn => {
                let value = self.pop(task)?;
                let handle = self.spawn_value(value)?;
                task.stack.push(handle);
            }
            Op::Await => {
                let value = self.pop(task)?;
                match value {
                    Object::Coroutine(coroutine) => {
                        let state_view = {
                            let state = coroutine.borrow();
                            match &state.state {
                                CoroutineState::Done(value) => Some(Ok(value.clone())),
                                CoroutineState::Failed(error) => Some(Err(error.clone())),
                                CoroutineState::Task { task_id } => {
                                    if let Some(result) = self.results.get(task_id) {
                                        Some(result.clone())
                                    } else {
                                        None
                                    }
                                }
                                CoroutineState::Pending { .. } => Some(Err(
                                    ZexusError::internal(
                                        "interpreter coroutine awaited inside the VM",
                                    ),
                                )),
                            }
                        };
                        match state_view {
                            Some(Ok(value)) => task.stack.push(value),
                            Some(Err(error)) => return Err(error),
                            None => {
                                let task_id = match &coroutine.borrow().state {
                                    CoroutineState::Task { task_id } => *task_id,
                                    _ => unreachable!("state checked above"),
                                };
                                // Awaiting an unspawned coroutine schedules it.
                                if let Some(pending) = self.pending.remove(&task_id) {
                                    coroutine.borrow_mut().queued = true;
                                    self.ready.push_back(pending);
                                }
                                return Ok(Some(StepOutcome::Blocked { on: task_id }));
                            }
                        }
                    }
                    // A non-coroutine passes through unchanged.
                    other => task.stack.push(other),
                }
            }
            Op::RegisterEvent(index) => {
                let handler = self.pop(task)?;
                let name = match self.constant(index)? {
                    Object::Str(name) => name,
                    other => {
                        return Err(ZexusError::internal(format!(
                            "event name constant is {}",
                            other.type_name()
                        )));
                    }
                };
                self.register_handler(&name, handler)?;
                // The registration expression's value.
                task.stack.push(Object::Null);
            }
            Op::EmitEvent(index) => {
                let name = self.name(index)?;
                let payload = self.pop(task)?;
                self.emit_event(&name, payload)?;
            }
            Op::DefineEnum { name, variants } => {
                let name = self.name(name)?;
                let mut variant_names = Vec::with_capacity(variants);
                for value in self.pop_many(task, variants)? {
                    match value {
                        Object::Str(variant) => variant_names.push(variant),
                        other => {
                            return Err(ZexusError::internal(format!(
                                "enum variant constant is {}",
                                other.type_name()
                            )));
                        }
                    }
                }
                let frame = task.frames.last().expect("frame exists");
                frame
                    .locals
                    .set(name.clone(), methods::enum_map(&name, &variant_names));
            }
            Op::AssertProtocol(index) => {
                let name = self.name(index)?;
                let target = self.peek(task)?.clone();
                self.assert_protocol(&name, &target)?;
            }
            Op::Import { module, alias } => {
                let module = self.name(module)?;
                let bound = match alias {
                    Some(alias) => self.name(alias)?,
                    None => module.clone(),
                };
                let value = self.host.modules.get(&module).cloned().ok_or_else(|| {
                    ZexusError::name_error(format!("unknown module '{}'", module))
                })?;
                let frame = task.frames.last().expect("frame exists");
                frame.locals.set(bound, value);
            }
            Op::TryPush { handler, err_name } => {
                let stack_depth = task.stack.len();
                let frame = task.frames.last_mut().expect("frame exists");
                frame.try_stack.push(TryHandler {
                    target: handler,
                    err_name,
                    stack_depth,
                });
            }
            Op::TryPop => {
                let frame = task.frames.last_mut().expect("frame exists");
                frame.try_stack.pop().ok_or_else(|| {
                    ZexusError::internal("TRY_POP without a matching TRY_PUSH")
                })?;
            }
            Op::Raise => {
                let value = self.pop(task)?;
                let error = match value {
                    Object::Error { kind, message } => ZexusError::new(kind, message),
                    other => ZexusError::new(ErrorKind::InternalError, other.inspect()),
                };
                return Err(error);
            }
            Op::RenderOp { tag, arity } => {
                let tag = self.name(tag)?;
                let args = self.pop_many(task, arity)?;
                let result = builtins::invoke_render(&mut self.host, &tag, &args)?;
                task.stack.push(result);
            }
        }
        Ok(None)
    }

    //=====================================================
    //            Stack & frame helpers
    //=====================================================

    fn pop(&self, task: &mut Task) -> Result<Object, ZexusError> {
        task.stack
            .pop()
            .ok_or_else(|| ZexusError::internal("value stack underflow"))
    }

    fn peek<'t>(&self, task: &'t Task) -> Result<&'t Object, ZexusError> {
        task.stack
            .last()
            .ok_or_else(|| ZexusError::internal("value stack underflow"))
    }

    fn pop_many(&self, task: &mut Task, count: usize) -> Result<Vec<Object>, ZexusError> {
        if task.stack.len() < count {
            return Err(ZexusError::internal("value stack underflow"));
        }
        let split = task.stack.len() - count;
        Ok(task.stack.split_off(split))
    }

    /// Copy a pool function and snapshot the current frame's visible cells
    /// into its closure.
    fn bind_function(
        &mut self,
        task: &Task,
        func: usize,
    ) -> Result<Rc<CompiledAction>, ZexusError> {
        let def = self
            .functions
            .get(func)
            .cloned()
            .ok_or_else(|| ZexusError::internal(format!("function index {} out of bounds", func)))?;
        let frame = task.frames.last().expect("frame exists");
        let mut cells = Vec::with_capacity(def.captures.len());
        for capture in &def.captures {
            let cell = match frame.locals.get_cell(capture) {
                Some(cell) => cell,
                None => frame.locals.set(capture.clone(), Object::Null),
            };
            cells.push((capture.clone(), cell));
        }
        Ok(Rc::new(CompiledAction { def, cells }))
    }

    fn push_call_frame(&mut self, task: &mut Task, compiled: &CompiledAction, args: Vec<Object>) {
        let locals = Env::child_of(&self.globals);
        for (name, cell) in &compiled.cells {
            locals.set_cell(name.clone(), cell.clone());
        }
        for (param, arg) in compiled.def.params.iter().zip(args) {
            locals.set(param.clone(), arg);
        }
        task.frames.push(Frame {
            code: FrameCode::Function(compiled.def.clone()),
            ip: 0,
            locals,
            stack_base: task.stack.len(),
            try_stack: Vec::new(),
        });
    }

    fn apply_in_task(
        &mut self,
        task: &mut Task,
        callee: Object,
        args: Vec<Object>,
    ) -> Result<(), ZexusError> {
        match callee {
            Object::Compiled(compiled) => {
                if args.len() != compiled.def.params.len() {
                    return Err(ZexusError::arity(format!(
                        "action '{}' expects {} argument(s), got {}",
                        compiled.def.name,
                        compiled.def.params.len(),
                        args.len()
                    )));
                }
                if compiled.def.is_async {
                    let handle = self.prepare_coroutine(&compiled, args);
                    task.stack.push(handle);
                } else {
                    self.push_call_frame(task, &compiled, args);
                }
                Ok(())
            }
            Object::Builtin { name, arity } => {
                if !arity.accepts(args.len()) {
                    return Err(ZexusError::arity(format!(
                        "'{}' expects {}, got {}",
                        name,
                        arity.describe(),
                        args.len()
                    )));
                }
                let value = self.call_builtin(name, args)?;
                task.stack.push(value);
                Ok(())
            }
            other => Err(ZexusError::type_error(format!(
                "{} is not callable",
                other.type_name()
            ))),
        }
    }

    /// Wrap an async callee into an unscheduled coroutine task.
    fn prepare_coroutine(&mut self, compiled: &CompiledAction, args: Vec<Object>) -> Object {
        let task_id = self.next_task_id;
        self.next_task_id += 1;
        let coroutine = Coroutine::for_task(task_id);
        let mut task = Task {
            id: task_id,
            frames: Vec::new(),
            stack: Vec::new(),
            coroutine: Some(coroutine.clone()),
            wake: None,
        };
        self.push_call_frame(&mut task, compiled, args);
        self.pending.insert(task_id, task);
        Object::Coroutine(coroutine)
    }

    fn spawn_value(&mut self, value: Object) -> Result<Object, ZexusError> {
        match value {
            Object::Coroutine(coroutine) => {
                let task_id = match &coroutine.borrow().state {
                    CoroutineState::Task { task_id } => Some(*task_id),
                    _ => None,
                };
                if let Some(task_id) = task_id {
                    if let Some(task) = self.pending.remove(&task_id) {
                        coroutine.borrow_mut().queued = true;
                        self.ready.push_back(task);
                    }
                }
                Ok(Object::Coroutine(coroutine))
            }
            other => Err(ZexusError::type_error(format!(
                "spawn() expects COROUTINE, got {}",
                other.type_name()
            ))),
        }
    }

    /// Unwind to the nearest try handler; `Err` means the task dies.
    fn raise(&mut self, task: &mut Task, error: ZexusError) -> Result<(), ZexusError> {
        loop {
            let Some(frame) = task.frames.last_mut() else {
                return Err(error);
            };
            if let Some(handler) = frame.try_stack.pop() {
                task.stack.truncate(handler.stack_depth);
                let err_name = self.name(handler.err_name)?;
                frame
                    .locals
                    .set(err_name, Object::error(error.kind, error.message));
                frame.ip = handler.target;
                return Ok(());
            }
            let dead = task.frames.pop().expect("frame exists");
            task.stack.truncate(dead.stack_base);
        }
    }

    //=====================================================
    //            Builtin dispatch
    //=====================================================

    fn call_builtin(&mut self, name: &str, args: Vec<Object>) -> Result<Object, ZexusError> {
        if let Some(method) = name.strip_prefix("__method_") {
            let method = method.to_string();
            let Some((receiver, rest)) = args.split_first() else {
                return Err(ZexusError::internal("method call without a receiver"));
            };
            return match methods::dispatch(receiver, &method, rest) {
                Some(result) => result,
                // Higher-order list methods reuse the builtin bodies with the
                // receiver as the first argument.
                None => self.call_builtin(&method, args),
            };
        }

        match name {
            "map" => {
                let (items, func) = list_and_callable("map", &args)?;
                let mut mapped = Vec::with_capacity(items.len());
                for item in items {
                    mapped.push(self.run_sync(func.clone(), vec![item])?);
                }
                Ok(Object::list(mapped))
            }
            "filter" => {
                let (items, func) = list_and_callable("filter", &args)?;
                let mut kept = Vec::new();
                for item in items {
                    if self.run_sync(func.clone(), vec![item.clone()])?.is_truthy() {
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
                        ZexusError::type_error("reduce() of empty list with no initial value")
                    })?,
                };
                for item in iterator {
                    accumulator = self.run_sync(func.clone(), vec![accumulator, item])?;
                }
                Ok(accumulator)
            }
            "spawn" => self.spawn_value(args.into_iter().next().ok_or_else(|| {
                ZexusError::arity("spawn() expects 1 argument(s), got 0")
            })?),
            "register_event" => {
                if args.len() != 2 {
                    return Err(ZexusError::arity(format!(
                        "'register_event' expects 2 argument(s), got {}",
                        args.len()
                    )));
                }
                let event_name = match &args[0] {
                    Object::Str(name) => name.clone(),
                    other => {
                        return Err(ZexusError::type_error(format!(
                            "register_event() expects a STRING name, got {}",
                            other.type_name()
                        )));
                    }
                };
                self.register_handler(&event_name, args[1].clone())?;
                Ok(Object::Null)
            }
            "__set_index__" => {
                if args.len() != 3 {
                    return Err(ZexusError::internal("__set_index__ expects 3 operands"));
                }
                methods::index_set(&args[0], &args[1], args[2].clone())
            }
            "__external__" => {
                if args.len() != 2 {
                    return Err(ZexusError::internal("__external__ expects 2 operands"));
                }
                let name = match &args[0] {
                    Object::Str(name) => name.clone(),
                    other => {
                        return Err(ZexusError::internal(format!(
                            "external name is {}",
                            other.type_name()
                        )));
                    }
                };
                let bound = self
                    .host
                    .externals
                    .get(&name)
                    .cloned()
                    .unwrap_or(Object::Null);
                self.globals.set(name, bound);
                Ok(Object::Null)
            }
            "__export__" => {
                if args.is_empty() {
                    return Err(ZexusError::internal("__export__ expects 1 operand"));
                }
                let name = match &args[0] {
                    Object::Str(name) => name.clone(),
                    other => {
                        return Err(ZexusError::internal(format!(
                            "export name is {}",
                            other.type_name()
                        )));
                    }
                };
                if !self.globals.export(&name) {
                    return Err(ZexusError::name_error(format!(
                        "cannot export unbound name '{}'",
                        name
                    )));
                }
                Ok(Object::Null)
            }
            _ => self.registry.invoke(&mut self.host, name, &args),
        }
    }

    /// Run a callable to completion on a private task; used for callbacks
    /// (list higher-order methods, event handlers).
    fn run_sync(&mut self, callee: Object, args: Vec<Object>) -> Result<Object, ZexusError> {
        match callee {
            Object::Compiled(compiled) => {
                if args.len() != compiled.def.params.len() {
                    return Err(ZexusError::arity(format!(
                        "action '{}' expects {} argument(s), got {}",
                        compiled.def.name,
                        compiled.def.params.len(),
                        args.len()
                    )));
                }
                if compiled.def.is_async {
                    return Ok(self.prepare_coroutine(&compiled, args));
                }
                let mut task = Task {
                    id: u64::MAX,
                    frames: Vec::new(),
                    stack: Vec::new(),
                    coroutine: None,
                    wake: None,
                };
                self.push_call_frame(&mut task, &compiled, args);
                match self.run_until_blocked(&mut task) {
                    StepOutcome::Finished(result) => result,
                    StepOutcome::Blocked { .. } => Err(ZexusError::internal(
                        "cannot await inside a synchronous callback",
                    )),
                }
            }
            Object::Builtin { name, arity } => {
                if !arity.accepts(args.len()) {
                    return Err(ZexusError::arity(format!(
                        "'{}' expects {}, got {}",
                        name,
                        arity.describe(),
                        args.len()
                    )));
                }
                self.call_builtin(name, args)
            }
            other => Err(ZexusError::type_error(format!(
                "{} is not callable",
                other.type_name()
            ))),
        }
    }

    //=====================================================
    //            Events & protocols
    //=====================================================

    fn register_handler(&mut self, name: &str, handler: Object) -> Result<(), ZexusError> {
        if !self.events.contains_key(name) {
            return Err(ZexusError::new(
                ErrorKind::EventError,
                format!("register_event for undeclared event '{}'", name),
            ));
        }
        if !handler.is_callable() {
            return Err(ZexusError::type_error(
                "register_event() expects a callable handler",
            ));
        }
        self.handlers
            .entry(name.to_string())
            .or_default()
            .push(handler);
        Ok(())
    }

    fn emit_event(&mut self, name: &str, payload: Object) -> Result<(), ZexusError> {
        let descriptor = self.events.get(name).cloned().ok_or_else(|| {
            ZexusError::new(
                ErrorKind::EventError,
                format!("emit of undeclared event '{}'", name),
            )
        })?;
        let pairs = match &payload {
            Object::Map(pairs) => pairs.clone(),
            other => {
                return Err(ZexusError::new(
                    ErrorKind::EventError,
                    format!("event payload must be MAP, got {}", other.type_name()),
                ));
            }
        };
        {
            let mut pairs = pairs.borrow_mut();
            for key in pairs.keys().cloned().collect::<Vec<_>>() {
                if !descriptor.fields.iter().any(|field| *field == key) {
                    return Err(ZexusError::new(
                        ErrorKind::EventError,
                        format!("event '{}' has no field '{}'", name, key),
                    ));
                }
            }
            for field in &descriptor.fields {
                if !pairs.contains_key(field.as_str()) {
                    pairs.insert(field.clone(), Object::Null);
                }
            }
        }
        let handlers = self.handlers.get(name).cloned().unwrap_or_default();
        for handler in handlers {
            self.run_sync(handler, vec![payload.clone()])?;
        }
        Ok(())
    }

    fn assert_protocol(&self, name: &str, target: &Object) -> Result<(), ZexusError> {
        let signatures = self.protocols.get(name).ok_or_else(|| {
            ZexusError::new(
                ErrorKind::ProtocolError,
                format!("unknown protocol '{}'", name),
            )
        })?;
        let pairs = match target {
            Object::Map(pairs) => pairs.borrow(),
            other => {
                return Err(ZexusError::new(
                    ErrorKind::ProtocolError,
                    format!("protocol check expects MAP, got {}", other.type_name()),
                ));
            }
        };
        for (signature, arity) in signatures {
            let satisfied = match pairs.get(signature.as_str()) {
                Some(Object::Compiled(compiled)) => compiled.def.params.len() == *arity,
                Some(other) => other.is_callable(),
                None => false,
            };
            if !satisfied {
                return Err(ZexusError::new(
                    ErrorKind::ProtocolError,
                    format!("missing {}.{}/{}", name, signature, arity),
                ));
            }
        }
        Ok(())
    }
}

fn list_and_callable(name: &str, args: &[Object]) -> Result<(Vec<Object>, Object), ZexusError> {
    let items = match &args[0] {
        Object::List(items) => items.borrow().clone(),
        other => {
            return Err(ZexusError::type_error(format!(
                "{}() expects LIST, got {}",
                name,
                other.type_name()
            )));
        }
    };
    let func = args
        .get(1)
        .cloned()
        .ok_or_else(|| ZexusError::arity(format!("{}() expects a callable", name)))?;
    if !func.is_callable() {
        return Err(ZexusError::type_error(format!(
            "{}() expects a callable, got {}",
            name,
            func.type_name()
        )));
    }
    Ok((items, func))
}

/// Compile and run a source string on a fresh VM.
pub fn run_source(source: &str, host: Host) -> Result<(Object, Host), Vec<ZexusError>> {
    let bytecode = crate::compiler::compile(source)?;
    let mut vm = Vm::new(bytecode, host);
    match vm.run() {
        Ok(value) => Ok((value, std::mem::take(&mut vm.host))),
        Err(error) => Err(vec![error]),
    }
}
