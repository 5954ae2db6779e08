//! Classes, instances and the attribute protocol used by specs and patches.

use crate::errors::StandinError;
use crate::function::{BoundMethod, Function, Signature};
use crate::mock::TRACKING_NAMES;
use crate::value::{Kwargs, Value};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

/// An attribute table.
#[derive(Default)]
pub(crate) struct Namespace(RefCell<BTreeMap<String, Value>>);

impl Namespace {
    pub(crate) fn get(&self, name: &str) -> Option<Value> {
        self.0.borrow().get(name).cloned()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.0.borrow().contains_key(name)
    }

    pub(crate) fn set(&self, name: &str, value: Value) {
        self.0.borrow_mut().insert(name.to_string(), value);
    }

    pub(crate) fn remove(&self, name: &str) -> Option<Value> {
        self.0.borrow_mut().remove(name)
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }
}

struct ClassInner {
    name: String,
    bases: Vec<Class>,
    attrs: Namespace,
    builtin: bool,
}

#[derive(Clone)]
pub struct Class(Rc<ClassInner>);

impl Class {
    pub fn new(name: impl Into<String>, bases: &[Class]) -> Self {
        Self(Rc::new(ClassInner {
            name: name.into(),
            bases: bases.to_vec(),
            attrs: Namespace::default(),
            builtin: false,
        }))
    }

    pub fn builder(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder {
            name: name.into(),
            bases: Vec::new(),
            members: Vec::new(),
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn bases(&self) -> &[Class] {
        &self.0.bases
    }

    pub fn is_builtin(&self) -> bool {
        self.0.builtin
    }

    /// Method resolution order, computed by C3 linearization. Inconsistent
    /// hierarchies fall back to depth-first, left-to-right order.
    pub fn mro(&self) -> Vec<Class> {
        c3_linearize(self).unwrap_or_else(|| {
            let mut order: Vec<Class> = Vec::new();
            depth_first(self, &mut order);
            order
        })
    }

    /// Own attribute, ignoring bases.
    pub fn own(&self, name: &str) -> Option<Value> {
        self.0.attrs.get(name)
    }

    pub fn own_names(&self) -> Vec<String> {
        self.0.attrs.names()
    }

    /// Raw attribute lookup along the MRO: the defining class and the stored value.
    pub fn lookup(&self, name: &str) -> Option<(Class, Value)> {
        self.mro()
            .into_iter()
            .find_map(|class| class.own(name).map(|value| (class, value)))
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) {
        self.0.attrs.set(name, value.into());
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0.attrs.remove(name)
    }

    pub fn is_subclass(&self, other: &Class) -> bool {
        self.mro().iter().any(|class| class.ptr_eq(other))
    }

    pub fn ptr_eq(&self, other: &Class) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class '{}'>", self.name())
    }
}

fn depth_first(class: &Class, order: &mut Vec<Class>) {
    if order.iter().any(|seen| seen.ptr_eq(class)) {
        return;
    }
    order.push(class.clone());
    for base in class.bases() {
        depth_first(base, order);
    }
}

fn c3_linearize(class: &Class) -> Option<Vec<Class>> {
    let mut sequences = class
        .bases()
        .iter()
        .map(c3_linearize)
        .collect::<Option<Vec<_>>>()?;
    sequences.push(class.bases().to_vec());

    let mut result = vec![class.clone()];
    loop {
        sequences.retain(|seq| !seq.is_empty());
        if sequences.is_empty() {
            return Some(result);
        }
        let head = sequences.iter().find_map(|seq| {
            let candidate = &seq[0];
            let in_tail = sequences
                .iter()
                .any(|other| other[1..].iter().any(|c| c.ptr_eq(candidate)));
            (!in_tail).then(|| candidate.clone())
        })?;
        for seq in &mut sequences {
            if seq[0].ptr_eq(&head) {
                seq.remove(0);
            }
        }
        result.push(head);
    }
}

/// Declarative class construction.
pub struct ClassBuilder {
    name: String,
    bases: Vec<Class>,
    members: Vec<(String, Value)>,
    error: Option<StandinError>,
}

impl ClassBuilder {
    pub fn base(mut self, base: &Class) -> Self {
        self.bases.push(base.clone());
        self
    }

    pub fn attr(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.members.push((name.to_string(), value.into()));
        self
    }

    /// An instance method; `params` includes the receiver, e.g. `"self, a, b=None"`.
    pub fn method(
        self,
        name: &str,
        params: &str,
        body: impl Fn(&[Value], &Kwargs) -> Result<Value, StandinError> + 'static,
    ) -> Self {
        self.member(name, params, body, Value::Function)
    }

    pub fn static_method(
        self,
        name: &str,
        params: &str,
        body: impl Fn(&[Value], &Kwargs) -> Result<Value, StandinError> + 'static,
    ) -> Self {
        self.member(name, params, body, Value::StaticMethod)
    }

    /// A class method; `params` includes the class receiver, e.g. `"cls, a"`.
    pub fn class_method(
        self,
        name: &str,
        params: &str,
        body: impl Fn(&[Value], &Kwargs) -> Result<Value, StandinError> + 'static,
    ) -> Self {
        self.member(name, params, body, Value::ClassMethod)
    }

    fn member(
        mut self,
        name: &str,
        params: &str,
        body: impl Fn(&[Value], &Kwargs) -> Result<Value, StandinError> + 'static,
        wrap: fn(Function) -> Value,
    ) -> Self {
        match Signature::parse(params) {
            Ok(signature) => {
                let function = Function::new(name, signature, body);
                self.members.push((name.to_string(), wrap(function)));
            }
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
        self
    }

    pub fn build(self) -> Result<Class, StandinError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let class = Class::new(self.name, &self.bases);
        for (name, value) in self.members {
            class.set(&name, value);
        }
        Ok(class)
    }
}

struct ObjectInner {
    class: Class,
    attrs: Namespace,
}

/// An instance of a [`Class`].
#[derive(Clone)]
pub struct Object(Rc<ObjectInner>);

impl Object {
    pub fn new(class: &Class) -> Self {
        Self(Rc::new(ObjectInner {
            class: class.clone(),
            attrs: Namespace::default(),
        }))
    }

    pub fn class(&self) -> &Class {
        &self.0.class
    }

    pub fn own(&self, name: &str) -> Option<Value> {
        self.0.attrs.get(name)
    }

    pub fn own_names(&self) -> Vec<String> {
        self.0.attrs.names()
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) {
        self.0.attrs.set(name, value.into());
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0.attrs.remove(name)
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

thread_local! {
    static BUILTINS: RefCell<BTreeMap<String, Class>> = RefCell::new(BTreeMap::new());
}

fn builtin_base(name: &str) -> Option<&'static str> {
    match name {
        "object" => None,
        "bool" => Some("int"),
        "MagicMock" | "NonCallableMock" => Some("Mock"),
        "NonCallableMagicMock" => Some("MagicMock"),
        "Exception" => Some("BaseException"),
        "BaseException" => Some("object"),
        _ => Some("object"),
    }
}

/// Identity-stable built-in class for `name` (per thread).
pub fn builtin_class(name: &str) -> Class {
    if let Some(class) = BUILTINS.with(|builtins| builtins.borrow().get(name).cloned()) {
        return class;
    }
    let bases = builtin_base(name)
        .map(|base| vec![builtin_class(base)])
        .unwrap_or_default();
    let class = Class(Rc::new(ClassInner {
        name: name.to_string(),
        bases,
        attrs: Namespace::default(),
        builtin: true,
    }));
    BUILTINS.with(|builtins| {
        builtins
            .borrow_mut()
            .entry(name.to_string())
            .or_insert(class)
            .clone()
    })
}

fn exception_class(kind: &crate::errors::ExceptionType) -> Class {
    if let Some(class) = BUILTINS.with(|builtins| builtins.borrow().get(kind.name()).cloned()) {
        return class;
    }
    let base = if kind.is_termination() {
        builtin_class("BaseException")
    } else {
        builtin_class("Exception")
    };
    let class = Class(Rc::new(ClassInner {
        name: kind.name().to_string(),
        bases: vec![base],
        attrs: Namespace::default(),
        builtin: true,
    }));
    BUILTINS.with(|builtins| {
        builtins
            .borrow_mut()
            .entry(kind.name().to_string())
            .or_insert(class)
            .clone()
    })
}

/// The class a value reports as its type. Mocks report their spec class.
pub fn type_of(value: &Value) -> Class {
    match value {
        Value::None => builtin_class("NoneType"),
        Value::Bool(_) => builtin_class("bool"),
        Value::Int(_) => builtin_class("int"),
        Value::Float(_) => builtin_class("float"),
        Value::Str(_) => builtin_class("str"),
        Value::Tuple(_) => builtin_class("tuple"),
        Value::Dict(_) => builtin_class("dict"),
        Value::Sentinel(_) => builtin_class("SentinelObject"),
        Value::Any => builtin_class("_ANY"),
        Value::NotImplemented => builtin_class("NotImplementedType"),
        Value::Mock(mock) => mock.reported_class(),
        Value::Function(_) => builtin_class("function"),
        Value::BoundMethod(_) => builtin_class("method"),
        Value::StaticMethod(_) => builtin_class("staticmethod"),
        Value::ClassMethod(_) => builtin_class("classmethod"),
        Value::Class(_) | Value::ExceptionType(_) => builtin_class("type"),
        Value::Object(object) => object.class().clone(),
        Value::Module(_) => builtin_class("module"),
        Value::Exception(exception) => exception_class(exception.kind()),
    }
}

pub fn is_instance(value: &Value, class: &Class) -> bool {
    match value {
        Value::Mock(mock) => mock.is_instance(class),
        other => type_of(other).is_subclass(class),
    }
}

/// True for numeric and boolean primitives.
pub fn is_primitive_number(value: &Value) -> bool {
    matches!(value, Value::Bool(_) | Value::Int(_) | Value::Float(_))
}

/// Sorted attribute names visible on a value.
pub fn dir(value: &Value) -> Vec<String> {
    let mut names = BTreeSet::new();
    match value {
        Value::Object(object) => {
            names.extend(object.own_names());
            for class in object.class().mro() {
                names.extend(class.own_names());
            }
        }
        Value::Class(class) => {
            for class in class.mro() {
                names.extend(class.own_names());
            }
        }
        Value::Module(module) => names.extend(module.names()),
        Value::Mock(mock) => names.extend(mock.dir_names()),
        _ => {}
    }
    names.into_iter().collect()
}

fn bind_member(receiver: &Value, owner: &Class, raw: Value, on_instance: bool) -> Value {
    match raw {
        Value::Function(f) if on_instance => Value::BoundMethod(BoundMethod::new(receiver.clone(), f)),
        Value::StaticMethod(f) => Value::Function(f),
        Value::ClassMethod(f) => Value::BoundMethod(BoundMethod::new(Value::Class(owner.clone()), f)),
        other => other,
    }
}

/// Attribute lookup with binding semantics.
pub fn get_attr(target: &Value, name: &str) -> Result<Value, StandinError> {
    match target {
        Value::Mock(mock) => mock.get_attribute(name),
        Value::Object(object) => {
            if let Some(value) = object.own(name) {
                return Ok(value);
            }
            let class = object.class();
            class
                .lookup(name)
                .map(|(_, raw)| bind_member(target, class, raw, true))
                .ok_or_else(|| {
                    StandinError::Attribute(format!(
                        "'{}' object has no attribute '{name}'",
                        class.name()
                    ))
                })
        }
        Value::Class(class) => class
            .lookup(name)
            .map(|(_, raw)| bind_member(target, class, raw, false))
            .ok_or_else(|| {
                StandinError::Attribute(format!(
                    "type object '{}' has no attribute '{name}'",
                    class.name()
                ))
            }),
        Value::Module(module) => module.get(name).ok_or_else(|| {
            StandinError::Attribute(format!(
                "module '{}' has no attribute '{name}'",
                module.name()
            ))
        }),
        Value::Function(function) => match (function.delegate(), name) {
            (Some(delegate), "mock") => Ok(delegate.clone()),
            (Some(Value::Mock(mock)), _) if is_delegated(name) => mock.get_attribute(name),
            _ => Err(no_attribute(target, name)),
        },
        other => Err(no_attribute(other, name)),
    }
}

/// Proxy bookkeeping a signature-copying wrapper exposes from its mock.
fn is_delegated(name: &str) -> bool {
    matches!(name, "return_value" | "side_effect") || TRACKING_NAMES.contains(&name)
}

fn no_attribute(target: &Value, name: &str) -> StandinError {
    StandinError::Attribute(format!(
        "'{}' object has no attribute '{name}'",
        type_of(target).name()
    ))
}

pub fn has_attr(target: &Value, name: &str) -> bool {
    get_attr(target, name).is_ok()
}

/// The attribute stored directly on `target`, ignoring anything inherited.
pub fn get_local(target: &Value, name: &str) -> Option<Value> {
    match target {
        Value::Object(object) => object.own(name),
        Value::Class(class) => class.own(name),
        Value::Module(module) => module.get(name),
        Value::Mock(mock) => mock.local_attribute(name),
        _ => None,
    }
}

pub fn set_attr(target: &Value, name: &str, value: Value) -> Result<(), StandinError> {
    match target {
        Value::Mock(mock) => mock.set_attribute(name, value),
        Value::Object(object) => {
            object.set(name, value);
            Ok(())
        }
        Value::Class(class) if !class.is_builtin() => {
            class.set(name, value);
            Ok(())
        }
        Value::Module(module) => {
            module.set(name, value);
            Ok(())
        }
        Value::Function(function) => match function.delegate() {
            Some(Value::Mock(mock)) if matches!(name, "return_value" | "side_effect") => {
                mock.set_attribute(name, value)
            }
            _ => Err(StandinError::Attribute(format!(
                "'function' object attribute '{name}' is read-only"
            ))),
        },
        other => Err(StandinError::Attribute(format!(
            "'{}' object attribute '{name}' is read-only",
            type_of(other).name()
        ))),
    }
}

pub fn del_attr(target: &Value, name: &str) -> Result<(), StandinError> {
    let removed = match target {
        Value::Mock(mock) => return mock.delete_attribute(name),
        Value::Object(object) => object.remove(name),
        Value::Class(class) => class.remove(name),
        Value::Module(module) => module.remove(name),
        _ => None,
    };
    removed.map(|_| ()).ok_or_else(|| no_attribute(target, name))
}
