//! Shape-checked proxy trees built from real classes, instances and
//! functions.
//!
//! Every proxy in the tree only exposes names its source really has, and
//! every callable proxy enforces the source's parameter list.

use crate::errors::StandinError;
use crate::function::{signature_of, Function, Signature};
use crate::logging::append_run_log;
use crate::mock::magic::is_dunder;
use crate::mock::{Flavor, Mock, MockBuilder, Spec};
use crate::object::{dir, get_attr, is_primitive_number, type_of, Class};
use crate::value::Value;
use serde_json::json;
use std::collections::HashMap;

/// Builds a shape-checked proxy for `spec`.
pub fn create_autospec(spec: impl Into<Value>, spec_set: bool) -> Result<Mock, StandinError> {
    Autospec::new(spec).spec_set(spec_set).build()
}

/// Wraps `mock` in a function with the call shape of `func`.
///
/// Classes contribute their `__init__` parameters and callable instances
/// their `__call__` parameters, minus the receiver; `skip_first` drops one
/// more leading parameter. Calls that do not fit fail before reaching the
/// delegate, which receives them normalized (named parameters positional,
/// defaults filled in). Without a delegate a fresh [`Mock`] is created. A
/// mock delegate adopts the signature too and stays reachable through the
/// wrapper's `mock` attribute, as do its `return_value` and `side_effect`.
pub fn mocksignature(
    func: impl Into<Value>,
    mock: Option<Value>,
    skip_first: bool,
) -> Result<Function, StandinError> {
    let func = func.into();
    let (name, mut signature) = copied_signature(&func)?;
    if skip_first {
        signature = signature.skip_first();
    }
    let delegate = mock.unwrap_or_else(|| Value::Mock(Mock::new()));
    if let Value::Mock(mock) = &delegate {
        mock.set_signature(name.as_str(), signature.clone());
    }
    Ok(Function::forwarding(name, signature, delegate))
}

fn copied_signature(func: &Value) -> Result<(String, Signature), StandinError> {
    let copied = match func {
        Value::Class(class) => {
            let init = match class.lookup("__init__") {
                Some((_, Value::Function(init))) => init.signature().skip_first(),
                _ => Signature::new(),
            };
            Some((class.name().to_string(), init))
        }
        Value::Object(object) => instance_call_signature(object.class())
            .map(|call| (object.class().name().to_string(), call)),
        Value::Function(f) | Value::StaticMethod(f) | Value::ClassMethod(f) => {
            signature_of(func).map(|signature| (f.name().to_string(), signature))
        }
        Value::BoundMethod(method) => {
            Some((method.function().name().to_string(), method.signature()))
        }
        Value::Mock(mock) if mock.is_callable() => Some((
            mock.name().unwrap_or_else(|| "mock".to_string()),
            mock.signature().unwrap_or_else(Signature::variadic),
        )),
        _ => None,
    };
    copied.ok_or_else(|| {
        StandinError::Type(format!("cannot copy the call signature of {}", func.repr()))
    })
}

pub struct Autospec {
    spec: Value,
    spec_set: bool,
    inherit: bool,
    instance: bool,
}

impl Autospec {
    pub fn new(spec: impl Into<Value>) -> Self {
        Self {
            spec: spec.into(),
            spec_set: false,
            inherit: false,
            instance: false,
        }
    }

    /// Forbid setting names the spec does not have.
    pub fn spec_set(mut self, spec_set: bool) -> Self {
        self.spec_set = spec_set;
        self
    }

    /// For class specs: calling the proxy returns a spec'd instance proxy.
    pub fn inherit(mut self, inherit: bool) -> Self {
        self.inherit = inherit;
        self
    }

    /// Treat a class spec as describing an instance of that class.
    pub fn instance(mut self, instance: bool) -> Self {
        self.instance = instance;
        self
    }

    pub fn build(self) -> Result<Mock, StandinError> {
        if let Value::Tuple(_) = self.spec {
            return Err(StandinError::Type(
                "autospec needs a class, instance or function, not a list of names".to_string(),
            ));
        }
        let mut engine = Engine {
            spec_set: self.spec_set,
            inherit: self.inherit,
            seen: HashMap::new(),
        };
        let mock = engine.spec_mock(&self.spec, None, self.instance)?;
        append_run_log(
            "info",
            "autospec.created",
            json!({
                "spec": self.spec.repr(),
                "spec_set": self.spec_set,
                "inherit": self.inherit,
                "proxies": engine.seen.len(),
            }),
        );
        Ok(mock)
    }
}

struct Engine {
    spec_set: bool,
    inherit: bool,
    /// Spec identity to the proxy built for it, for this build only.
    seen: HashMap<usize, Mock>,
}

/// Only user-defined reference kinds are cached; built-in types and
/// primitives get a fresh proxy on every access.
fn cache_key(spec: &Value) -> Option<usize> {
    match spec {
        Value::Class(class) if class.is_builtin() => None,
        Value::Class(_) | Value::Object(_) | Value::Module(_) | Value::Mock(_) => spec.identity(),
        _ => None,
    }
}

/// Call shape of a class's instances when called, if they are callable.
fn instance_call_signature(class: &Class) -> Option<Signature> {
    match class.lookup("__call__") {
        Some((_, Value::Function(function))) => Some(function.signature().skip_first()),
        _ => None,
    }
}

/// Whether the receiver must be dropped from `entry`'s signature: only for
/// plain functions reached through a class, never for static or class
/// methods or attributes stored on the instance itself.
fn must_skip(spec: &Value, entry: &str, is_type: bool) -> bool {
    let class = match spec {
        Value::Class(class) => class.clone(),
        Value::Object(object) if object.own(entry).is_some() => return false,
        other => type_of(other),
    };
    for klass in class.mro() {
        match klass.own(entry) {
            None => continue,
            Some(Value::StaticMethod(_) | Value::ClassMethod(_)) => return false,
            Some(_) => return is_type,
        }
    }
    is_type
}

impl Engine {
    fn builder(&self, spec: &Value) -> MockBuilder {
        let shape = Spec::Value(spec.clone());
        let builder = Mock::builder().flavor(Flavor::Magic);
        if self.spec_set {
            builder.spec_set(shape)
        } else {
            builder.spec(shape)
        }
    }

    fn spec_mock(
        &mut self,
        spec: &Value,
        parent: Option<(&Mock, &str)>,
        instance: bool,
    ) -> Result<Mock, StandinError> {
        let key = cache_key(spec);
        if !instance {
            if let Some(existing) = key.and_then(|key| self.seen.get(&key)) {
                return Ok(existing.clone());
            }
        }

        let is_type = matches!(spec, Value::Class(_));
        let mut builder = self.builder(spec);
        if let Some((parent, name)) = parent {
            builder = builder.parent(parent).name(name);
        }
        builder = match spec {
            Value::Class(class) if !instance => {
                let init = match class.lookup("__init__") {
                    Some((_, Value::Function(init))) => init.signature().skip_first(),
                    _ => Signature::new(),
                };
                builder.signature(class.name(), init)
            }
            Value::Class(class) => match instance_call_signature(class) {
                Some(call) => builder.signature(class.name(), call),
                None => builder.non_callable(),
            },
            Value::Object(object) => match instance_call_signature(object.class()) {
                Some(call) => builder.signature(object.class().name(), call),
                None => builder.non_callable(),
            },
            Value::Mock(mock) if mock.is_callable() => builder,
            other => match signature_of(other) {
                Some(signature) => {
                    let owner = match other {
                        Value::Function(f) | Value::StaticMethod(f) | Value::ClassMethod(f) => {
                            f.name().to_string()
                        }
                        Value::BoundMethod(method) => method.function().name().to_string(),
                        _ => "function".to_string(),
                    };
                    builder.signature(owner, signature)
                }
                None => builder.non_callable(),
            },
        };
        let mock = builder.build();

        if let (Some(key), false) = (key, instance) {
            self.seen.insert(key, mock.clone());
        }

        if is_type && self.inherit && !instance {
            let returned = self.spec_mock(spec, None, true)?;
            mock.set_return_value(returned);
        }

        for entry in dir(spec) {
            if is_dunder(&entry) {
                continue;
            }
            let original = get_attr(spec, &entry)?;
            let child = if original.is_function() {
                let mut signature = signature_of(&original).unwrap_or_default();
                if must_skip(spec, &entry, is_type) {
                    signature = signature.skip_first();
                }
                self.builder(&original)
                    .parent(&mock)
                    .name(entry.as_str())
                    .signature(entry.as_str(), signature)
                    .build()
            } else if is_primitive_number(&original) {
                Mock::builder()
                    .flavor(Flavor::Magic)
                    .parent(&mock)
                    .name(entry.as_str())
                    .spec_class(type_of(&original))
                    .build()
            } else {
                self.spec_mock(&original, Some((&mock, &entry)), false)?
            };
            mock.adopt_child(&entry, child);
        }

        Ok(mock)
    }
}
