//! Dynamic values shared by proxies, specs and patch targets.
//!
//! Primitives compare structurally; reference kinds (mocks, objects,
//! classes, modules, functions, sentinels) compare by identity.

use crate::errors::{Exception, ExceptionType, StandinError};
use crate::function::{BoundMethod, Function};
use crate::mock::Mock;
use crate::module::Module;
use crate::object::{Class, Object};
use crate::sentinel::Sentinel;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Keyword arguments of a call, ordered by name.
pub type Kwargs = BTreeMap<String, Value>;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Tuple(Vec<Value>),
    Dict(Dict),
    Sentinel(Sentinel),
    /// Compares equal to everything.
    Any,
    NotImplemented,
    Mock(Mock),
    Function(Function),
    BoundMethod(BoundMethod),
    StaticMethod(Function),
    ClassMethod(Function),
    Class(Class),
    Object(Object),
    Module(Module),
    Exception(Exception),
    ExceptionType(ExceptionType),
}

impl Value {
    pub fn str(text: impl Into<String>) -> Self {
        Value::Str(text.into())
    }

    pub fn tuple(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Tuple(items.into_iter().collect())
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_not_implemented(&self) -> bool {
        matches!(self, Value::NotImplemented)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_mock(&self) -> Option<&Mock> {
        match self {
            Value::Mock(mock) => Some(mock),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(dict) => Some(dict),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&Class> {
        match self {
            Value::Class(class) => Some(class),
            _ => None,
        }
    }

    /// True when the value is a plain or bound function, i.e. something whose
    /// call shape can be introspected.
    pub fn is_function(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::BoundMethod(_) | Value::StaticMethod(_) | Value::ClassMethod(_)
        )
    }

    /// Address-based identity for reference kinds; `None` for primitives.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Mock(mock) => Some(mock.address()),
            Value::Function(f) | Value::StaticMethod(f) | Value::ClassMethod(f) => Some(f.address()),
            Value::BoundMethod(method) => Some(method.address()),
            Value::Class(class) => Some(class.address()),
            Value::Object(object) => Some(object.address()),
            Value::Module(module) => Some(module.address()),
            Value::Sentinel(sentinel) => Some(sentinel.address()),
            Value::Dict(dict) => Some(dict.address()),
            _ => None,
        }
    }

    /// Identity comparison (`is`). Primitives fall back to equality.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self.identity(), other.identity()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => match (self, other) {
                (Value::Any, Value::Any) => true,
                (Value::Any, _) | (_, Value::Any) => false,
                _ => self == other,
            },
            _ => false,
        }
    }

    /// Calls the value with positional and keyword arguments.
    pub fn call(&self, args: &[Value], kwargs: &Kwargs) -> Result<Value, StandinError> {
        crate::function::call_value(self, args, kwargs)
    }

    /// Conventional rendering, without consulting magic-method overrides.
    /// A mapping reached again while it is being rendered shows as `{...}`.
    pub fn repr(&self) -> String {
        self.repr_within(&mut Vec::new())
    }

    /// `open` holds the mappings currently being rendered.
    fn repr_within(&self, open: &mut Vec<usize>) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => render_float(*f),
            Value::Str(s) => quote(s),
            Value::Tuple(items) => render_tuple_within(items, open),
            Value::Dict(dict) => dict.repr_within(open),
            Value::Sentinel(sentinel) => sentinel.repr(),
            Value::Any => "<ANY>".to_string(),
            Value::NotImplemented => "NotImplemented".to_string(),
            Value::Mock(mock) => mock.default_repr(),
            Value::Function(f) => format!("<function {}>", f.name()),
            Value::BoundMethod(method) => format!(
                "<bound method {} of {}>",
                method.function().name(),
                method.receiver().repr_within(open)
            ),
            Value::StaticMethod(f) => format!("<staticmethod {}>", f.name()),
            Value::ClassMethod(f) => format!("<classmethod {}>", f.name()),
            Value::Class(class) => format!("<class '{}'>", class.name()),
            Value::Object(object) => {
                format!("<{} object id='{}'>", object.class().name(), object.address())
            }
            Value::Module(module) => format!("<module '{}'>", module.name()),
            Value::Exception(exception) => exception.repr(),
            Value::ExceptionType(kind) => format!("<class '{}'>", kind.name()),
        }
    }
}

pub(crate) fn quote(text: &str) -> String {
    let escaped = text.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

fn render_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{f:.1}")
    } else {
        f.to_string()
    }
}

pub(crate) fn render_tuple(items: &[Value]) -> String {
    render_tuple_within(items, &mut Vec::new())
}

fn render_tuple_within(items: &[Value], open: &mut Vec<usize>) -> String {
    match items {
        [] => "()".to_string(),
        [only] => format!("({},)", only.repr_within(open)),
        _ => {
            let inner = items
                .iter()
                .map(|item| item.repr_within(open))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({inner})")
        }
    }
}

pub(crate) fn render_kwargs(kwargs: &Kwargs) -> String {
    let inner = kwargs
        .iter()
        .map(|(k, v)| format!("{}: {}", quote(k), v.repr()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{inner}}}")
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Any, _) | (_, Value::Any) => true,
            (Value::None, Value::None) => true,
            (Value::NotImplemented, Value::NotImplemented) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
                self.as_int() == other.as_int()
            }
            (
                Value::Float(_) | Value::Int(_) | Value::Bool(_),
                Value::Float(_) | Value::Int(_) | Value::Bool(_),
            ) => self.as_float() == other.as_float(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a.same_contents(b),
            (Value::Exception(a), Value::Exception(b)) => a == b,
            (Value::ExceptionType(a), Value::ExceptionType(b)) => a == b,
            (Value::BoundMethod(a), Value::BoundMethod(b)) => {
                a.function().ptr_eq(b.function()) && a.receiver().is_same(b.receiver())
            }
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => f.write_str(s),
            Value::Exception(exception) => write!(f, "{exception}"),
            other => f.write_str(&other.repr()),
        }
    }
}

thread_local! {
    static COMPARING: RefCell<Vec<(usize, usize)>> = const { RefCell::new(Vec::new()) };
}

/// Shared, mutable, insertion-ordered mapping.
#[derive(Clone, Default)]
pub struct Dict(Rc<RefCell<Vec<(Value, Value)>>>);

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let dict = Self::new();
        for (key, value) in pairs {
            dict.insert(key, value);
        }
        dict
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.0
            .borrow()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.0.borrow().iter().any(|(k, _)| k == key)
    }

    pub fn insert(&self, key: Value, value: Value) {
        let mut entries = self.0.borrow_mut();
        if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            entries.push((key, value));
        }
    }

    pub fn remove(&self, key: &Value) -> Option<Value> {
        let mut entries = self.0.borrow_mut();
        let index = entries.iter().position(|(k, _)| k == key)?;
        Some(entries.remove(index).1)
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn keys(&self) -> Vec<Value> {
        self.0.borrow().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Shallow copy of the current entries.
    pub fn items(&self) -> Vec<(Value, Value)> {
        self.0.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &Dict) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Pairs of mappings already under comparison count as equal, so
    /// self-containing mappings compare without unbounded recursion.
    fn same_contents(&self, other: &Dict) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let pair = (self.address(), other.address());
        if COMPARING.with(|open| open.borrow().contains(&pair)) {
            return true;
        }
        COMPARING.with(|open| open.borrow_mut().push(pair));
        let ours = self.items();
        let equal = ours.len() == other.len()
            && ours
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|theirs| theirs == *v));
        COMPARING.with(|open| open.borrow_mut().pop());
        equal
    }

    fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    fn repr_within(&self, open: &mut Vec<usize>) -> String {
        let address = self.address();
        if open.contains(&address) {
            return "{...}".to_string();
        }
        open.push(address);
        let inner = self
            .items()
            .iter()
            .map(|(k, v)| format!("{}: {}", k.repr_within(open), v.repr_within(open)))
            .collect::<Vec<_>>()
            .join(", ");
        open.pop();
        format!("{{{inner}}}")
    }
}

impl From<Kwargs> for Dict {
    fn from(kwargs: Kwargs) -> Self {
        Dict::from_pairs(kwargs.into_iter().map(|(k, v)| (Value::Str(k), v)))
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::None
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Tuple(value)
    }
}

impl From<Dict> for Value {
    fn from(value: Dict) -> Self {
        Value::Dict(value)
    }
}

impl From<Kwargs> for Value {
    fn from(value: Kwargs) -> Self {
        Value::Dict(Dict::from(value))
    }
}

impl From<Sentinel> for Value {
    fn from(value: Sentinel) -> Self {
        Value::Sentinel(value)
    }
}

impl From<&Sentinel> for Value {
    fn from(value: &Sentinel) -> Self {
        Value::Sentinel(value.clone())
    }
}

impl From<Mock> for Value {
    fn from(value: Mock) -> Self {
        Value::Mock(value)
    }
}

impl From<&Mock> for Value {
    fn from(value: &Mock) -> Self {
        Value::Mock(value.clone())
    }
}

impl From<Function> for Value {
    fn from(value: Function) -> Self {
        Value::Function(value)
    }
}

impl From<Class> for Value {
    fn from(value: Class) -> Self {
        Value::Class(value)
    }
}

impl From<&Class> for Value {
    fn from(value: &Class) -> Self {
        Value::Class(value.clone())
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Value::Object(value)
    }
}

impl From<&Object> for Value {
    fn from(value: &Object) -> Self {
        Value::Object(value.clone())
    }
}

impl From<Module> for Value {
    fn from(value: Module) -> Self {
        Value::Module(value)
    }
}

impl From<&Module> for Value {
    fn from(value: &Module) -> Self {
        Value::Module(value.clone())
    }
}

impl From<Exception> for Value {
    fn from(value: Exception) -> Self {
        Value::Exception(value)
    }
}

impl From<ExceptionType> for Value {
    fn from(value: ExceptionType) -> Self {
        Value::ExceptionType(value)
    }
}

impl From<&Value> for Value {
    fn from(value: &Value) -> Self {
        value.clone()
    }
}

/// Builds a positional argument vector, converting each item into a [`Value`].
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Value>::new()
    };
    ($($item:expr),+ $(,)?) => {
        vec![$($crate::Value::from($item)),+]
    };
}

/// Builds a [`Kwargs`](crate::Kwargs) map from `name => value` pairs.
#[macro_export]
macro_rules! kwargs {
    () => {
        $crate::Kwargs::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut map = $crate::Kwargs::new();
        $(map.insert(::std::string::String::from($name), $crate::Value::from($value));)+
        map
    }};
}

/// Builds a [`Value::Tuple`].
#[macro_export]
macro_rules! tuple {
    ($($item:expr),* $(,)?) => {
        $crate::Value::Tuple(vec![$($crate::Value::from($item)),*])
    };
}
