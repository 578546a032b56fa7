//=====================================================
// File: builtins.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Zexus builtin function registry
// Objective: One registry shared by evaluator and VM, with
//            renderer delegation and host-facing I/O
//=====================================================

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use serde_json::Value as JsonValue;

use crate::environment::Env;
use crate::errors::{ErrorKind, ZexusError};
use crate::object::{BuiltinArity, Object, ObjectIterator};
use crate::renderer::{self, NullRenderer, RendererBackend};

pub type BuiltinResult = Result<Object, ZexusError>;
type BuiltinFn = fn(&mut Host, &[Object]) -> BuiltinResult;

/// Where `print` and the debug channel write.
pub enum OutputSink {
    Stdout,
    Capture(String),
}

/// Host-side services shared by both execution engines: the renderer
/// collaborator, the output sink, and tables for `use` modules and
/// `external` declarations.
pub struct Host {
    pub renderer: Box<dyn RendererBackend>,
    pub output: OutputSink,
    pub modules: HashMap<String, Object>,
    pub externals: HashMap<String, Object>,
}

impl Host {
    pub fn new() -> Self {
        Self {
            renderer: Box::new(NullRenderer),
            output: OutputSink::Stdout,
            modules: HashMap::new(),
            externals: HashMap::new(),
        }
    }

    pub fn capturing() -> Self {
        let mut host = Self::new();
        host.output = OutputSink::Capture(String::new());
        host
    }

    pub fn with_renderer(renderer: Box<dyn RendererBackend>) -> Self {
        let mut host = Self::new();
        host.renderer = renderer;
        host
    }

    pub fn register_module(&mut self, name: impl Into<String>, module: Object) {
        self.modules.insert(name.into(), module);
    }

    pub fn register_external(&mut self, name: impl Into<String>, value: Object) {
        self.externals.insert(name.into(), value);
    }

    pub fn print_line(&mut self, text: &str) {
        match &mut self.output {
            OutputSink::Stdout => {
                println!("{}", text);
                let _ = std::io::stdout().flush();
            }
            OutputSink::Capture(buffer) => {
                buffer.push_str(text);
                buffer.push('\n');
            }
        }
    }

    /// Drain captured output; empty when printing to stdout.
    pub fn take_output(&mut self) -> String {
        match &mut self.output {
            OutputSink::Stdout => String::new(),
            OutputSink::Capture(buffer) => std::mem::take(buffer),
        }
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new()
    }
}

/// Names the engines resolve themselves because they need to apply user
/// callables or talk to the scheduler/event registry.
pub const ENGINE_BUILTINS: &[(&str, BuiltinArity)] = &[
    ("map", BuiltinArity::Exact(2)),
    ("filter", BuiltinArity::Exact(2)),
    ("reduce", BuiltinArity::Range { min: 2, max: Some(3) }),
    ("spawn", BuiltinArity::Exact(1)),
    ("register_event", BuiltinArity::Exact(2)),
];

pub struct Registry {
    entries: IndexMap<&'static str, (BuiltinArity, BuiltinFn)>,
}

impl Registry {
    pub fn standard() -> Self {
        let mut registry = Self {
            entries: IndexMap::new(),
        };
        registry.register("print", BuiltinArity::Exact(1), builtin_print);
        registry.register("string", BuiltinArity::Exact(1), builtin_string);
        registry.register("len", BuiltinArity::Exact(1), builtin_len);
        registry.register("first", BuiltinArity::Exact(1), builtin_first);
        registry.register("rest", BuiltinArity::Exact(1), builtin_rest);
        registry.register("push", BuiltinArity::Exact(2), builtin_push);
        registry.register("datetime_now", BuiltinArity::Exact(0), builtin_datetime_now);
        registry.register("random", BuiltinArity::Exact(0), builtin_random);
        registry.register("sqrt", BuiltinArity::Exact(1), builtin_sqrt);
        registry.register("to_hex", BuiltinArity::Exact(1), builtin_to_hex);
        registry.register("from_hex", BuiltinArity::Exact(1), builtin_from_hex);
        registry.register("file_read_text", BuiltinArity::Exact(1), builtin_file_read_text);
        registry.register(
            "file_write_text",
            BuiltinArity::Exact(2),
            builtin_file_write_text,
        );
        registry.register("file_read_json", BuiltinArity::Exact(1), builtin_file_read_json);
        registry.register(
            "file_write_json",
            BuiltinArity::Exact(2),
            builtin_file_write_json,
        );
        registry.register("file_list_dir", BuiltinArity::Exact(1), builtin_file_list_dir);
        registry.register(
            "debug_log",
            BuiltinArity::Range { min: 1, max: Some(2) },
            builtin_debug_log,
        );
        registry.register("debug_trace", BuiltinArity::Exact(1), builtin_debug_trace);
        registry.register("sleep", BuiltinArity::Exact(1), builtin_sleep);
        for name in renderer::RENDER_BUILTINS.iter().copied() {
            // Dispatched by name in invoke(); the entry carries the arity
            // hint and puts the name in the global frame.
            registry.register(name, BuiltinArity::Range { min: 0, max: None }, builtin_render_stub);
        }
        // Iteration protocol used by the compiled for-each lowering.
        registry.register("__iter__", BuiltinArity::Exact(1), builtin_iter);
        registry.register("__next__", BuiltinArity::Exact(1), builtin_next);
        registry.register("__iter_has__", BuiltinArity::Exact(1), builtin_iter_has);
        registry
    }

    fn register(&mut self, name: &'static str, arity: BuiltinArity, func: BuiltinFn) {
        self.entries.insert(name, (arity, func));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
            || ENGINE_BUILTINS.iter().any(|(engine, _)| *engine == name)
    }

    pub fn arity_of(&self, name: &str) -> Option<BuiltinArity> {
        if let Some((arity, _)) = self.entries.get(name) {
            return Some(*arity);
        }
        ENGINE_BUILTINS
            .iter()
            .find(|(engine, _)| *engine == name)
            .map(|(_, arity)| *arity)
    }

    /// Invoke a registry builtin. Engine-resolved names are rejected here;
    /// callers intercept them first.
    pub fn invoke(&self, host: &mut Host, name: &str, args: &[Object]) -> BuiltinResult {
        if renderer::is_render_builtin(name) {
            return invoke_render(host, name, args);
        }
        let (arity, func) = self
            .entries
            .get(name)
            .ok_or_else(|| ZexusError::name_error(format!("unknown builtin '{}'", name)))?;
        if !arity.accepts(args.len()) {
            return Err(ZexusError::arity(format!(
                "'{}' expects {}, got {}",
                name,
                arity.describe(),
                args.len()
            )));
        }
        func(host, args)
    }

    /// Merge every builtin name (registry + engine-level) into the global
    /// frame as Builtin objects. Internal iteration hooks stay hidden.
    pub fn install_globals(&self, env: &Env) {
        for (name, (arity, _)) in &self.entries {
            if name.starts_with("__") {
                continue;
            }
            env.set(*name, Object::Builtin {
                name: *name,
                arity: *arity,
            });
        }
        for (name, arity) in ENGINE_BUILTINS.iter().copied() {
            env.set(name, Object::Builtin { name, arity });
        }
    }
}

//=====================================================
//            Builtin bodies
//=====================================================

fn builtin_print(host: &mut Host, args: &[Object]) -> BuiltinResult {
    host.print_line(&args[0].inspect());
    Ok(Object::Null)
}

fn builtin_string(_host: &mut Host, args: &[Object]) -> BuiltinResult {
    Ok(Object::Str(args[0].inspect()))
}

fn builtin_len(_host: &mut Host, args: &[Object]) -> BuiltinResult {
    match &args[0] {
        Object::Str(s) => Ok(Object::integer(s.chars().count() as i64)),
        Object::List(items) => Ok(Object::integer(items.borrow().len() as i64)),
        Object::Map(pairs) => Ok(Object::integer(pairs.borrow().len() as i64)),
        other => Err(ZexusError::type_error(format!(
            "len() does not support {}",
            other.type_name()
        ))),
    }
}

fn builtin_first(_host: &mut Host, args: &[Object]) -> BuiltinResult {
    match &args[0] {
        Object::List(items) => Ok(items.borrow().first().cloned().unwrap_or(Object::Null)),
        other => Err(ZexusError::type_error(format!(
            "first() expects LIST, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_rest(_host: &mut Host, args: &[Object]) -> BuiltinResult {
    match &args[0] {
        Object::List(items) => {
            let items = items.borrow();
            if items.is_empty() {
                Ok(Object::Null)
            } else {
                Ok(Object::list(items[1..].to_vec()))
            }
        }
        other => Err(ZexusError::type_error(format!(
            "rest() expects LIST, got {}",
            other.type_name()
        ))),
    }
}

/// Non-mutating: returns a new list with the element appended.
fn builtin_push(_host: &mut Host, args: &[Object]) -> BuiltinResult {
    match &args[0] {
        Object::List(items) => {
            let mut copy = items.borrow().clone();
            copy.push(args[1].clone());
            Ok(Object::list(copy))
        }
        other => Err(ZexusError::type_error(format!(
            "push() expects LIST, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_datetime_now(_host: &mut Host, _args: &[Object]) -> BuiltinResult {
    Ok(Object::DateTime(Utc::now()))
}

fn builtin_random(_host: &mut Host, _args: &[Object]) -> BuiltinResult {
    Ok(Object::Float(rand::random::<f64>()))
}

fn builtin_sqrt(_host: &mut Host, args: &[Object]) -> BuiltinResult {
    let value = match &args[0] {
        Object::Integer(n) => n.to_f64().unwrap_or(f64::NAN),
        Object::Float(f) => *f,
        other => {
            return Err(ZexusError::type_error(format!(
                "sqrt() expects a number, got {}",
                other.type_name()
            )));
        }
    };
    Ok(Object::Float(value.sqrt()))
}

fn builtin_to_hex(_host: &mut Host, args: &[Object]) -> BuiltinResult {
    match &args[0] {
        Object::Integer(n) => Ok(Object::Str(format!("{:x}", n))),
        other => Err(ZexusError::type_error(format!(
            "to_hex() expects INTEGER, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_from_hex(_host: &mut Host, args: &[Object]) -> BuiltinResult {
    match &args[0] {
        Object::Str(s) => BigInt::parse_bytes(s.as_bytes(), 16)
            .map(Object::Integer)
            .ok_or_else(|| {
                ZexusError::type_error(format!("from_hex() could not parse '{}'", s))
            }),
        other => Err(ZexusError::type_error(format!(
            "from_hex() expects STRING, got {}",
            other.type_name()
        ))),
    }
}

fn expect_path(name: &str, value: &Object) -> Result<String, ZexusError> {
    match value {
        Object::Str(path) => Ok(path.clone()),
        other => Err(ZexusError::type_error(format!(
            "{}() expects a path string, got {}",
            name,
            other.type_name()
        ))),
    }
}

fn builtin_file_read_text(_host: &mut Host, args: &[Object]) -> BuiltinResult {
    let path = expect_path("file_read_text", &args[0])?;
    fs::read_to_string(&path)
        .map(Object::Str)
        .map_err(|err| ZexusError::io(format!("read {}: {}", path, err)))
}

fn builtin_file_write_text(_host: &mut Host, args: &[Object]) -> BuiltinResult {
    let path = expect_path("file_write_text", &args[0])?;
    let content = match &args[1] {
        Object::Str(s) => s.clone(),
        other => other.inspect(),
    };
    fs::write(&path, content)
        .map(|_| Object::Null)
        .map_err(|err| ZexusError::io(format!("write {}: {}", path, err)))
}

fn builtin_file_read_json(_host: &mut Host, args: &[Object]) -> BuiltinResult {
    let path = expect_path("file_read_json", &args[0])?;
    let text = fs::read_to_string(&path)
        .map_err(|err| ZexusError::io(format!("read {}: {}", path, err)))?;
    let json: JsonValue = serde_json::from_str(&text)
        .map_err(|err| ZexusError::io(format!("parse {}: {}", path, err)))?;
    Ok(json_to_object(&json))
}

fn builtin_file_write_json(_host: &mut Host, args: &[Object]) -> BuiltinResult {
    let path = expect_path("file_write_json", &args[0])?;
    let json = object_to_json(&args[1])?;
    let text = serde_json::to_string_pretty(&json)
        .map_err(|err| ZexusError::io(format!("encode {}: {}", path, err)))?;
    fs::write(&path, text)
        .map(|_| Object::Null)
        .map_err(|err| ZexusError::io(format!("write {}: {}", path, err)))
}

fn builtin_file_list_dir(_host: &mut Host, args: &[Object]) -> BuiltinResult {
    let path = expect_path("file_list_dir", &args[0])?;
    let entries = fs::read_dir(&path)
        .map_err(|err| ZexusError::io(format!("list {}: {}", path, err)))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| ZexusError::io(format!("list {}: {}", path, err)))?;
        names.push(Object::Str(entry.file_name().to_string_lossy().into_owned()));
    }
    Ok(Object::list(names))
}

fn builtin_debug_log(host: &mut Host, args: &[Object]) -> BuiltinResult {
    let mut line = format!("DEBUG: {}", args[0].inspect());
    if let Some(value) = args.get(1) {
        line.push_str(&format!(" -> {}", value.inspect()));
    }
    host.print_line(&line);
    Ok(Object::Null)
}

fn builtin_debug_trace(host: &mut Host, args: &[Object]) -> BuiltinResult {
    host.print_line(&format!("TRACE: {}", args[0].inspect()));
    Ok(Object::Null)
}

fn builtin_sleep(_host: &mut Host, args: &[Object]) -> BuiltinResult {
    let seconds = match &args[0] {
        Object::Integer(n) => n.to_f64().unwrap_or(0.0),
        Object::Float(f) => *f,
        other => {
            return Err(ZexusError::type_error(format!(
                "sleep() expects a number, got {}",
                other.type_name()
            )));
        }
    };
    if seconds > 0.0 {
        thread::sleep(Duration::from_secs_f64(seconds));
    }
    Ok(Object::Null)
}

fn builtin_render_stub(_host: &mut Host, _args: &[Object]) -> BuiltinResult {
    Err(ZexusError::internal(
        "renderer builtins are dispatched by name before lookup",
    ))
}

/// Route a renderer-delegated builtin through `op(tag, args)`.
pub fn invoke_render(host: &mut Host, tag: &str, args: &[Object]) -> BuiltinResult {
    host.renderer.op(tag, args.to_vec())
}

//=====================================================
//            Iteration protocol
//=====================================================

fn builtin_iter(_host: &mut Host, args: &[Object]) -> BuiltinResult {
    iterator_for(&args[0])
}

/// Build the iteration handle used by for-each: list elements, or map keys
/// in insertion order.
pub fn iterator_for(value: &Object) -> BuiltinResult {
    let items = match value {
        Object::List(items) => items.borrow().clone(),
        Object::Map(pairs) => pairs
            .borrow()
            .keys()
            .map(|key| Object::Str(key.clone()))
            .collect(),
        other => {
            return Err(ZexusError::type_error(format!(
                "{} is not iterable",
                other.type_name()
            )));
        }
    };
    Ok(Object::Iterator(std::rc::Rc::new(std::cell::RefCell::new(
        ObjectIterator { items, index: 0 },
    ))))
}

fn builtin_next(_host: &mut Host, args: &[Object]) -> BuiltinResult {
    match &args[0] {
        Object::Iterator(state) => {
            let mut state = state.borrow_mut();
            if state.index < state.items.len() {
                let item = state.items[state.index].clone();
                state.index += 1;
                Ok(item)
            } else {
                Ok(Object::IterEnd)
            }
        }
        other => Err(ZexusError::type_error(format!(
            "__next__ expects an iterator, got {}",
            other.type_name()
        ))),
    }
}

fn builtin_iter_has(_host: &mut Host, args: &[Object]) -> BuiltinResult {
    Ok(Object::Boolean(!matches!(args[0], Object::IterEnd)))
}

//=====================================================
//            JSON bridging
//=====================================================

pub fn json_to_object(json: &JsonValue) -> Object {
    match json {
        JsonValue::Null => Object::Null,
        JsonValue::Bool(b) => Object::Boolean(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Object::integer(i)
            } else {
                Object::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        JsonValue::String(s) => Object::Str(s.clone()),
        JsonValue::Array(items) => Object::list(items.iter().map(json_to_object).collect()),
        JsonValue::Object(map) => {
            let mut pairs = IndexMap::new();
            for (key, value) in map {
                pairs.insert(key.clone(), json_to_object(value));
            }
            Object::map(pairs)
        }
    }
}

pub fn object_to_json(value: &Object) -> Result<JsonValue, ZexusError> {
    Ok(match value {
        Object::Null => JsonValue::Null,
        Object::Boolean(b) => JsonValue::Bool(*b),
        Object::Integer(n) => match n.to_i64() {
            Some(i) => JsonValue::from(i),
            None => JsonValue::from(n.to_string()),
        },
        Object::Float(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Object::Str(s) => JsonValue::from(s.clone()),
        Object::List(items) => {
            let mut array = Vec::new();
            for item in items.borrow().iter() {
                array.push(object_to_json(item)?);
            }
            JsonValue::Array(array)
        }
        Object::Map(pairs) => {
            let mut map = serde_json::Map::new();
            for (key, item) in pairs.borrow().iter() {
                map.insert(key.clone(), object_to_json(item)?);
            }
            JsonValue::Object(map)
        }
        other => {
            return Err(ZexusError::new(
                ErrorKind::TypeError,
                format!("{} cannot be serialized to JSON", other.type_name()),
            ));
        }
    })
}
