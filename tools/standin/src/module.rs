//! Named namespaces and the per-thread module registry that dotted patch
//! targets are resolved against.

use crate::errors::StandinError;
use crate::object::{get_attr, Namespace};
use crate::value::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

struct ModuleInner {
    name: String,
    attrs: Namespace,
}

#[derive(Clone)]
pub struct Module(Rc<ModuleInner>);

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Rc::new(ModuleInner {
            name: name.into(),
            attrs: Namespace::default(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.attrs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.attrs.contains(name)
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) {
        self.0.attrs.set(name, value.into());
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0.attrs.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.attrs.names()
    }

    pub fn ptr_eq(&self, other: &Module) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

thread_local! {
    static MODULES: RefCell<BTreeMap<String, Module>> = RefCell::new(BTreeMap::new());
}

/// Registers `module` under its dotted name, replacing any previous entry.
///
/// A module named `pkg.sub` is also bound as attribute `sub` on an already
/// registered `pkg`.
pub fn register_module(module: &Module) {
    let name = module.name().to_string();
    if let Some((parent, leaf)) = name.rsplit_once('.') {
        if let Some(parent) = lookup_module(parent) {
            parent.set(leaf, module.clone());
        }
    }
    MODULES.with(|modules| modules.borrow_mut().insert(name, module.clone()));
}

pub fn unregister_module(name: &str) -> Option<Module> {
    MODULES.with(|modules| modules.borrow_mut().remove(name))
}

pub fn lookup_module(name: &str) -> Option<Module> {
    MODULES.with(|modules| modules.borrow().get(name).cloned())
}

fn load(name: &str) -> Result<Module, StandinError> {
    lookup_module(name).ok_or_else(|| StandinError::Import(format!("No module named {name}")))
}

/// Resolves a dotted path to a value, loading registered modules for
/// prefixes that are not reachable as attributes.
pub fn import(target: &str) -> Result<Value, StandinError> {
    let mut components = target.split('.');
    let first = components.next().unwrap_or_default();
    let mut import_path = first.to_string();
    let mut thing = Value::Module(load(first)?);
    for component in components {
        import_path.push('.');
        import_path.push_str(component);
        thing = match get_attr(&thing, component) {
            Ok(value) => value,
            Err(StandinError::Attribute(_)) => {
                let module = load(&import_path)?;
                if let Value::Module(parent) = &thing {
                    parent.set(component, module.clone());
                }
                Value::Module(module)
            }
            Err(other) => return Err(other),
        };
    }
    Ok(thing)
}
