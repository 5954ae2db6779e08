//! Patch transactions: swap an attribute for a replacement and guarantee the
//! original comes back.
//!
//! Every form (decorator, class decorator, explicit start/stop, scoped block,
//! drop guard) goes through the same [`Patching`] core. A transaction keeps a
//! stack of undo records, so the same decorator can be re-entered by nested
//! calls and each exit restores the value captured at its matching entry.

pub mod dict;

pub use dict::{patch_dict, DictPatch, DictTarget};

use crate::autospec::{mocksignature, Autospec};
use crate::config;
use crate::errors::StandinError;
use crate::function::{Function, Signature};
use crate::logging::append_run_log;
use crate::mock::{Flavor, Mock, MockBuilder, Spec};
use crate::module::import;
use crate::object::{del_attr, dir, get_attr, get_local, has_attr, set_attr, Class};
use crate::recording::{emit_record, PatchRecord, RecordEntry};
use crate::value::Value;
use serde_json::json;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// One reversible mutation of external state.
pub trait Patching {
    /// Apply the patch and return the value now installed.
    fn activate(&self) -> Result<Value, StandinError>;

    /// Undo the most recent activation.
    fn deactivate(&self) -> Result<(), StandinError>;

    /// Whether decorated functions receive the installed value as an extra
    /// trailing positional argument.
    fn supplies_argument(&self) -> bool {
        false
    }

    fn describe(&self) -> String;
}

/// Transactions attached to one decorated function, in declaration order.
#[derive(Clone, Default)]
pub struct PatchStack(Rc<RefCell<Vec<Rc<dyn Patching>>>>);

impl PatchStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, patching: Rc<dyn Patching>) {
        self.0.borrow_mut().push(patching);
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn describe(&self) -> Vec<String> {
        self.0.borrow().iter().map(|p| p.describe()).collect()
    }

    /// Enters every transaction in order, runs `body` with the supplied
    /// extra arguments, then exits every entered transaction in reverse.
    ///
    /// If entering one fails, those already entered are exited before the
    /// error propagates. An error from `body` wins over an error from exit.
    pub fn run<T>(
        &self,
        body: impl FnOnce(Vec<Value>) -> Result<T, StandinError>,
    ) -> Result<T, StandinError> {
        let patchings = self.0.borrow().clone();
        let mut entered = Unwind::default();
        let mut extra = Vec::new();
        for patching in patchings {
            let installed = patching.activate()?;
            if patching.supplies_argument() {
                extra.push(installed);
            }
            entered.0.push(patching);
        }
        let outcome = body(extra);
        let exited = entered.finish();
        match outcome {
            Err(err) => Err(err),
            Ok(value) => exited.map(|()| value),
        }
    }
}

impl fmt::Debug for PatchStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.describe()).finish()
    }
}

/// Entered transactions; exits whatever is left on drop, so panics and
/// early returns still restore.
#[derive(Default)]
struct Unwind(Vec<Rc<dyn Patching>>);

impl Unwind {
    fn finish(mut self) -> Result<(), StandinError> {
        let mut first = Ok(());
        while let Some(patching) = self.0.pop() {
            if let Err(err) = patching.deactivate() {
                if first.is_ok() {
                    first = Err(err);
                }
            }
        }
        first
    }
}

impl Drop for Unwind {
    fn drop(&mut self) {
        while let Some(patching) = self.0.pop() {
            let _ = patching.deactivate();
        }
    }
}

/// Restores its transaction when dropped unless [`PatchGuard::restore`]
/// already did.
pub struct PatchGuard<'a> {
    patching: &'a dyn Patching,
    installed: Value,
    active: bool,
}

impl PatchGuard<'_> {
    pub fn installed(&self) -> &Value {
        &self.installed
    }

    pub fn restore(mut self) -> Result<(), StandinError> {
        self.active = false;
        self.patching.deactivate()
    }
}

impl Drop for PatchGuard<'_> {
    fn drop(&mut self) {
        if self.active {
            let _ = self.patching.deactivate();
        }
    }
}

pub(crate) fn guard(patching: &dyn Patching) -> Result<PatchGuard<'_>, StandinError> {
    let installed = patching.activate()?;
    Ok(PatchGuard {
        patching,
        installed,
        active: true,
    })
}

pub(crate) fn scoped<T>(
    patching: &dyn Patching,
    body: impl FnOnce(Value) -> Result<T, StandinError>,
) -> Result<T, StandinError> {
    let guard = guard(patching)?;
    let outcome = body(guard.installed().clone());
    let restored = guard.restore();
    match outcome {
        Err(err) => Err(err),
        Ok(value) => restored.map(|()| value),
    }
}

/// Attaches `patching` to `function`'s patch stack, wrapping the function
/// first if it does not have one yet.
pub(crate) fn decorate(patching: Rc<dyn Patching>, function: &Function) -> Function {
    if let Some(stack) = function.patchings() {
        stack.push(patching);
        return function.clone();
    }
    let stack = PatchStack::new();
    stack.push(patching);
    let running = stack.clone();
    let inner = function.clone();
    Function::with_patchings(
        function.name(),
        Signature::variadic(),
        stack,
        move |args, kwargs| {
            running.run(|extra| {
                let mut args = args.to_vec();
                args.extend(extra);
                inner.call(&args, kwargs)
            })
        },
    )
}

/// Rewrites every callable member of `class` whose name starts with the
/// configured test prefix. Static and class methods keep their kind;
/// callable proxies become static methods forwarding to the proxy.
pub(crate) fn decorate_members(class: &Class, mut wrap: impl FnMut(&Function) -> Function) {
    let prefix = config::active().patch.test_prefix;
    for name in dir(&Value::Class(class.clone())) {
        if !name.starts_with(&prefix) {
            continue;
        }
        let wrapped = match class.lookup(&name) {
            Some((_, Value::Function(function))) => Value::Function(wrap(&function)),
            Some((_, Value::StaticMethod(function))) => Value::StaticMethod(wrap(&function)),
            Some((_, Value::ClassMethod(function))) => Value::ClassMethod(wrap(&function)),
            Some((_, Value::Mock(mock))) if mock.is_callable() => {
                let forward = Function::variadic(name.as_str(), move |args, kwargs| {
                    mock.call(args.to_vec(), kwargs.clone())
                });
                Value::StaticMethod(wrap(&forward))
            }
            _ => continue,
        };
        class.set(&name, wrapped);
    }
}

/// How a synthesized replacement is shaped.
#[derive(Clone)]
pub enum SpecArg {
    /// Use the value being replaced.
    Original,
    Value(Value),
    Names(Vec<String>),
}

#[derive(Clone, Default)]
struct PatchOptions {
    new: Option<Value>,
    spec: Option<SpecArg>,
    spec_set: Option<SpecArg>,
    create: bool,
    autospec: bool,
    mocksignature: bool,
}

#[derive(Clone)]
struct Undo {
    original: Option<Value>,
    local: bool,
}

/// Replaces one attribute of one target.
pub struct Patch {
    target: Value,
    attribute: String,
    label: String,
    options: PatchOptions,
    undo: RefCell<Vec<Undo>>,
}

/// Patches the attribute named by the last component of a dotted path,
/// importing everything before it.
pub fn patch(target: &str) -> Result<Patch, StandinError> {
    let (path, attribute) = target
        .rsplit_once('.')
        .filter(|(path, attribute)| !path.is_empty() && !attribute.is_empty())
        .ok_or_else(|| {
            StandinError::Type(format!(
                "Need a valid target to patch. You supplied: '{target}'"
            ))
        })?;
    let owner = import(path)?;
    Ok(Patch::build(owner, attribute, target.to_string()))
}

/// Patches `attribute` on an object already in hand.
pub fn patch_object(target: impl Into<Value>, attribute: &str) -> Patch {
    let target = target.into();
    let label = format!("{}.{attribute}", owner_label(&target));
    Patch::build(target, attribute, label)
}

fn owner_label(target: &Value) -> String {
    match target {
        Value::Module(module) => module.name().to_string(),
        Value::Class(class) => class.name().to_string(),
        other => other.repr(),
    }
}

impl Patch {
    fn build(target: Value, attribute: &str, label: String) -> Self {
        Self {
            target,
            attribute: attribute.to_string(),
            label,
            options: PatchOptions::default(),
            undo: RefCell::new(Vec::new()),
        }
    }

    /// Explicit replacement. Without one, a MagicMock is synthesized.
    pub fn new(mut self, replacement: impl Into<Value>) -> Self {
        self.options.new = Some(replacement.into());
        self
    }

    pub fn spec(mut self, spec: SpecArg) -> Self {
        self.options.spec = Some(spec);
        self
    }

    pub fn spec_set(mut self, spec: SpecArg) -> Self {
        self.options.spec_set = Some(spec);
        self
    }

    /// Allow patching an attribute that does not exist yet; it is deleted
    /// again on exit.
    pub fn create(mut self, create: bool) -> Self {
        self.options.create = create;
        self
    }

    /// Build the replacement with the autospec engine from the original.
    pub fn autospec(mut self, autospec: bool) -> Self {
        self.options.autospec = autospec;
        self
    }

    /// Install a function with the original's call shape that forwards to
    /// the replacement. The replacement itself is still what the patch
    /// hands out.
    pub fn mocksignature(mut self, mocksignature: bool) -> Self {
        self.options.mocksignature = mocksignature;
        self
    }

    pub fn target(&self) -> &Value {
        &self.target
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    /// A fresh transaction with the same target and options and no undo
    /// history.
    pub fn copy(&self) -> Patch {
        Self {
            target: self.target.clone(),
            attribute: self.attribute.clone(),
            label: self.label.clone(),
            options: self.options.clone(),
            undo: RefCell::new(Vec::new()),
        }
    }

    pub fn start(&self) -> Result<Value, StandinError> {
        self.activate()
    }

    pub fn stop(&self) -> Result<(), StandinError> {
        self.deactivate()
    }

    pub fn guard(&self) -> Result<PatchGuard<'_>, StandinError> {
        guard(self)
    }

    /// Runs `body` with the patch applied, restoring afterwards whether or
    /// not `body` failed.
    pub fn scoped<T>(
        &self,
        body: impl FnOnce(Value) -> Result<T, StandinError>,
    ) -> Result<T, StandinError> {
        scoped(self, body)
    }

    pub fn decorate(self, function: &Function) -> Function {
        decorate(Rc::new(self), function)
    }

    pub fn decorate_class(&self, class: &Class) {
        decorate_members(class, |function| self.copy().decorate(function));
    }

    fn original(&self) -> Result<(Option<Value>, bool), StandinError> {
        if let Some(local) = get_local(&self.target, &self.attribute) {
            return Ok((Some(local), true));
        }
        match get_attr(&self.target, &self.attribute) {
            Ok(inherited) => Ok((Some(inherited), false)),
            Err(StandinError::Attribute(_)) if self.options.create => Ok((None, false)),
            Err(StandinError::Attribute(_)) => Err(StandinError::MissingTarget(format!(
                "{} does not have the attribute '{}'",
                self.target.repr(),
                self.attribute
            ))),
            Err(other) => Err(other),
        }
    }

    fn synthesize(&self, original: Option<&Value>) -> Result<Value, StandinError> {
        if self.options.autospec {
            let original = original.ok_or_else(|| {
                StandinError::Type(format!(
                    "Can't autospec '{}': it does not exist yet",
                    self.label
                ))
            })?;
            let mock = Autospec::new(original.clone())
                .spec_set(matches!(self.options.spec_set, Some(SpecArg::Original)))
                .inherit(matches!(original, Value::Class(_)))
                .build()?;
            return Ok(Value::Mock(mock));
        }

        let (shape, strict) = match (&self.options.spec_set, &self.options.spec) {
            (Some(shape), _) => (Some(shape), true),
            (None, Some(shape)) => (Some(shape), false),
            (None, None) => (None, false),
        };
        let mut inherit = false;
        let spec = match shape {
            None => None,
            Some(SpecArg::Original) => {
                inherit = matches!(original, Some(Value::Class(_)));
                original.cloned().map(Spec::Value)
            }
            Some(SpecArg::Value(value)) => Some(Spec::Value(value.clone())),
            Some(SpecArg::Names(names)) => Some(Spec::Names(names.clone())),
        };
        let shaped = |builder: MockBuilder| match &spec {
            Some(spec) if strict => builder.spec_set(spec.clone()),
            Some(spec) => builder.spec(spec.clone()),
            None => builder,
        };

        let mock = shaped(Mock::builder().flavor(Flavor::Magic)).build();
        if inherit {
            let instance = shaped(Mock::builder().flavor(Flavor::Magic).non_callable()).build();
            mock.set_return_value(instance);
        }
        Ok(Value::Mock(mock))
    }
}

impl Patching for Patch {
    fn activate(&self) -> Result<Value, StandinError> {
        let (original, local) = self.original()?;
        let replacement = match &self.options.new {
            Some(new) => new.clone(),
            None => self.synthesize(original.as_ref())?,
        };
        let installed = if self.options.mocksignature {
            let original = original.clone().ok_or_else(|| {
                StandinError::Type(format!(
                    "Can't copy the signature of '{}': it does not exist yet",
                    self.label
                ))
            })?;
            Value::Function(mocksignature(original, Some(replacement.clone()), false)?)
        } else {
            replacement.clone()
        };
        set_attr(&self.target, &self.attribute, installed)?;

        let action = if original.is_some() { "replaced" } else { "created" };
        self.undo.borrow_mut().push(Undo { original, local });
        append_run_log(
            "info",
            "patch.entered",
            json!({
                "target": self.label,
                "action": action,
                "synthesized": self.options.new.is_none(),
            }),
        );
        emit_record(RecordEntry::PatchEntered(PatchRecord::capture(
            &self.label,
            action,
        )));
        Ok(replacement)
    }

    fn deactivate(&self) -> Result<(), StandinError> {
        // The record stays on the stack until the restore has gone through.
        let undo = self.undo.borrow().last().cloned().ok_or_else(|| {
            StandinError::Type(format!("patch of '{}' is not active", self.label))
        })?;

        let action = match undo {
            Undo {
                original: Some(original),
                local: true,
            } => {
                set_attr(&self.target, &self.attribute, original)?;
                "restored"
            }
            Undo { original, .. } => {
                del_attr(&self.target, &self.attribute)?;
                match original {
                    Some(original) => {
                        if !self.options.create && !has_attr(&self.target, &self.attribute) {
                            set_attr(&self.target, &self.attribute, original)?;
                        }
                        "restored"
                    }
                    None => "deleted",
                }
            }
        };
        self.undo.borrow_mut().pop();

        append_run_log(
            "info",
            "patch.exited",
            json!({ "target": self.label, "action": action }),
        );
        emit_record(RecordEntry::PatchExited(PatchRecord::capture(
            &self.label,
            action,
        )));
        Ok(())
    }

    fn supplies_argument(&self) -> bool {
        self.options.new.is_none()
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
