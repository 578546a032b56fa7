use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};

use crate::ast::{Expr, Stmt};
use crate::environment::Env;
use crate::errors::{ErrorKind, ZexusError};

/// A user-declared action (named or anonymous) with its captured environment.
#[derive(Debug)]
pub struct ActionObject {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub env: Env,
    pub is_async: bool,
}

/// An expression-bodied action.
#[derive(Debug)]
pub struct LambdaObject {
    pub params: Vec<String>,
    pub body: Expr,
    pub env: Env,
}

/// A declared event name plus its field-name schema.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDescriptor {
    pub name: String,
    pub fields: Vec<String>,
}

/// Arity hint for host callables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinArity {
    Exact(usize),
    Range { min: usize, max: Option<usize> },
}

impl BuiltinArity {
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            BuiltinArity::Exact(n) => *n == count,
            BuiltinArity::Range { min, max } => {
                count >= *min && max.map(|m| count <= m).unwrap_or(true)
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            BuiltinArity::Exact(n) => format!("{} argument(s)", n),
            BuiltinArity::Range { min, max } => match max {
                Some(max) => format!("{}..={} arguments", min, max),
                None => format!("at least {} argument(s)", min),
            },
        }
    }
}

/// State of a cooperative task, shared between the coroutine object and the
/// scheduler driving it.
#[derive(Debug)]
pub enum CoroutineState {
    /// Interpreter-side coroutine: async action plus bound arguments,
    /// not yet driven.
    Pending { action: Object, args: Vec<Object> },
    /// VM-side coroutine registered with the scheduler under a task id.
    Task { task_id: u64 },
    Done(Object),
    Failed(ZexusError),
}

#[derive(Debug)]
pub struct Coroutine {
    pub state: CoroutineState,
    /// Set once the coroutine has been handed to a scheduler queue.
    pub queued: bool,
}

impl Coroutine {
    pub fn pending(action: Object, args: Vec<Object>) -> Rc<RefCell<Coroutine>> {
        Rc::new(RefCell::new(Coroutine {
            state: CoroutineState::Pending { action, args },
            queued: false,
        }))
    }

    pub fn for_task(task_id: u64) -> Rc<RefCell<Coroutine>> {
        Rc::new(RefCell::new(Coroutine {
            state: CoroutineState::Task { task_id },
            queued: false,
        }))
    }
}

/// Zexus runtime values.
#[derive(Debug, Clone)]
pub enum Object {
    Integer(BigInt),
    Float(f64),
    Str(String),
    Boolean(bool),
    Null,
    List(Rc<RefCell<Vec<Object>>>),
    Map(Rc<RefCell<IndexMap<String, Object>>>),
    Builtin {
        name: &'static str,
        arity: BuiltinArity,
    },
    Action(Rc<ActionObject>),
    Lambda(Rc<LambdaObject>),
    Error {
        kind: ErrorKind,
        message: String,
    },
    DateTime(DateTime<Utc>),
    EnumValue {
        enum_name: String,
        variant: String,
    },
    EventDescriptor(Rc<EventDescriptor>),
    Coroutine(Rc<RefCell<Coroutine>>),
    /// Function produced by the VM's `STORE_FUNC` (pool entry + captured cells).
    Compiled(Rc<crate::bytecode::CompiledAction>),
    /// Internal iterator handle produced by `__iter__`.
    Iterator(Rc<RefCell<ObjectIterator>>),
    /// Internal end-of-iteration sentinel returned by `__next__`.
    IterEnd,
}

/// Snapshot iterator over a list's elements or a map's keys.
#[derive(Debug)]
pub struct ObjectIterator {
    pub items: Vec<Object>,
    pub index: usize,
}

impl Object {
    pub fn list(elements: Vec<Object>) -> Object {
        Object::List(Rc::new(RefCell::new(elements)))
    }

    pub fn map(pairs: IndexMap<String, Object>) -> Object {
        Object::Map(Rc::new(RefCell::new(pairs)))
    }

    pub fn integer(value: impl Into<BigInt>) -> Object {
        Object::Integer(value.into())
    }

    pub fn string(value: impl Into<String>) -> Object {
        Object::Str(value.into())
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Object {
        Object::Error {
            kind,
            message: message.into(),
        }
    }

    /// Zexus truthiness: `false`, `null`, `0`, `0.0`, empty string/list/map
    /// are false; everything else is true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Object::Boolean(b) => *b,
            Object::Null => false,
            Object::Integer(n) => !n.is_zero(),
            Object::Float(f) => *f != 0.0,
            Object::Str(s) => !s.is_empty(),
            Object::List(items) => !items.borrow().is_empty(),
            Object::Map(pairs) => !pairs.borrow().is_empty(),
            _ => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Integer(_) => "INTEGER",
            Object::Float(_) => "FLOAT",
            Object::Str(_) => "STRING",
            Object::Boolean(_) => "BOOLEAN",
            Object::Null => "NULL",
            Object::List(_) => "LIST",
            Object::Map(_) => "MAP",
            Object::Builtin { .. } => "BUILTIN",
            Object::Action(_) => "ACTION",
            Object::Lambda(_) => "LAMBDA",
            Object::Error { .. } => "ERROR",
            Object::DateTime(_) => "DATETIME",
            Object::EnumValue { .. } => "ENUM_VALUE",
            Object::EventDescriptor(_) => "EVENT",
            Object::Coroutine(_) => "COROUTINE",
            Object::Compiled(_) => "ACTION",
            Object::Iterator(_) => "ITERATOR",
            Object::IterEnd => "ITER_END",
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Object::Builtin { .. } | Object::Action(_) | Object::Lambda(_) | Object::Compiled(_)
        )
    }

    /// Recursive printer backing the `string` builtin and `print`.
    ///
    /// Map keys are quoted; string values are rendered bare. Insertion order
    /// is preserved.
    pub fn inspect(&self) -> String {
        match self {
            Object::Integer(n) => n.to_string(),
            Object::Float(f) => format_float(*f),
            Object::Str(s) => s.clone(),
            Object::Boolean(b) => if *b { "true" } else { "false" }.to_string(),
            Object::Null => "null".to_string(),
            Object::List(items) => {
                let rendered: Vec<String> =
                    items.borrow().iter().map(|item| item.inspect()).collect();
                format!("[{}]", rendered.join(", "))
            }
            Object::Map(pairs) => {
                let rendered: Vec<String> = pairs
                    .borrow()
                    .iter()
                    .map(|(key, value)| format!("\"{}\": {}", key, value.inspect()))
                    .collect();
                format!("{{{}}}", rendered.join(", "))
            }
            Object::Builtin { name, .. } => format!("<built-in function: {}>", name),
            Object::Action(action) => {
                let name = action.name.as_deref().unwrap_or("anonymous");
                format!("action {}({})", name, action.params.join(", "))
            }
            Object::Lambda(lambda) => format!("lambda({})", lambda.params.join(", ")),
            Object::Error { kind, message } => format!("{}: {}", kind.as_str(), message),
            Object::DateTime(dt) => dt.to_rfc3339(),
            Object::EnumValue { enum_name, variant } => format!("{}.{}", enum_name, variant),
            Object::EventDescriptor(desc) => {
                format!("<event {} {{{}}}>", desc.name, desc.fields.join(", "))
            }
            Object::Coroutine(_) => "<coroutine>".to_string(),
            Object::Compiled(compiled) => {
                format!("action {}({})", compiled.def.name, compiled.def.params.join(", "))
            }
            Object::Iterator(_) => "<iterator>".to_string(),
            Object::IterEnd => "<iteration end>".to_string(),
        }
    }
}

/// `2.0` prints as `2.0`, not `2`.
fn format_float(f: f64) -> String {
    let rendered = f.to_string();
    if rendered.contains('.') || rendered.contains('e') || rendered.contains("inf") {
        rendered
    } else {
        format!("{}.0", rendered)
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Object::Integer(a), Object::Integer(b)) => a == b,
            (Object::Float(a), Object::Float(b)) => a == b,
            // Int <-> Float numeric equality is the one cross-kind case.
            (Object::Integer(a), Object::Float(b)) | (Object::Float(b), Object::Integer(a)) => {
                a.to_f64().map(|a| a == *b).unwrap_or(false)
            }
            (Object::Str(a), Object::Str(b)) => a == b,
            (Object::Boolean(a), Object::Boolean(b)) => a == b,
            (Object::Null, Object::Null) => true,
            (Object::List(a), Object::List(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                *a.borrow() == *b.borrow()
            }
            (Object::Map(a), Object::Map(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                *a.borrow() == *b.borrow()
            }
            (
                Object::Builtin { name: a, arity: aa },
                Object::Builtin { name: b, arity: ba },
            ) => a == b && aa == ba,
            (Object::Action(a), Object::Action(b)) => Rc::ptr_eq(a, b),
            (Object::Lambda(a), Object::Lambda(b)) => Rc::ptr_eq(a, b),
            (
                Object::Error {
                    kind: ak,
                    message: am,
                },
                Object::Error {
                    kind: bk,
                    message: bm,
                },
            ) => ak == bk && am == bm,
            (Object::DateTime(a), Object::DateTime(b)) => a == b,
            (
                Object::EnumValue {
                    enum_name: ae,
                    variant: av,
                },
                Object::EnumValue {
                    enum_name: be,
                    variant: bv,
                },
            ) => ae == be && av == bv,
            (Object::EventDescriptor(a), Object::EventDescriptor(b)) => a == b,
            (Object::Coroutine(a), Object::Coroutine(b)) => Rc::ptr_eq(a, b),
            (Object::Compiled(a), Object::Compiled(b)) => Rc::ptr_eq(a, b),
            (Object::IterEnd, Object::IterEnd) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inspect())
    }
}
