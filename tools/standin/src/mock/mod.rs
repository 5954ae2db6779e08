//! The dynamic proxy.
//!
//! A [`Mock`] records every invocation, grows a memoized tree of child
//! proxies on attribute access and carries a per-instance magic-method
//! table. State lives behind a `RefCell` and no borrow is held while user
//! code (side effects, wrapped callables, overrides) runs, so proxies can be
//! re-entered from their own side effects.

pub mod magic;

use crate::call::CallRecord;
use crate::errors::StandinError;
use crate::function::Signature;
use crate::logging::{append_run_log, run_log_enabled};
use crate::object::{builtin_class, dir, get_attr, type_of, Class};
use crate::recording::{emit_record, is_recording, MockCallRecord, RecordEntry};
use crate::sentinel::is_default;
use crate::value::{Kwargs, Value};
use magic::{configure_default, is_dunder, is_unsupported, Magic, Slot};
use serde_json::json;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// Value reported by the default `__sizeof__`.
pub(crate) const FIXED_SIZE: i64 = 32;

/// Names that configure or expose a proxy's bookkeeping rather than
/// creating children.
pub(crate) const TRACKING_NAMES: [&str; 5] = [
    "called",
    "call_count",
    "call_args",
    "call_args_list",
    "method_calls",
];

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Plain,
    /// Pre-installs the magic-method defaults.
    Magic,
}

/// Shape source for a proxy's allowed attribute names.
#[derive(Clone)]
pub enum Spec {
    Names(Vec<String>),
    Value(Value),
}

impl Spec {
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Spec::Names(names.into_iter().map(Into::into).collect())
    }

    pub fn of(value: impl Into<Value>) -> Self {
        Spec::Value(value.into())
    }

    fn resolve(self) -> (Option<Class>, BTreeSet<String>) {
        match self {
            Spec::Names(names) => (None, names.into_iter().collect()),
            Spec::Value(Value::Class(class)) => {
                let allowed = dir(&Value::Class(class.clone())).into_iter().collect();
                (Some(class), allowed)
            }
            Spec::Value(value) => (Some(type_of(&value)), dir(&value).into_iter().collect()),
        }
    }
}

struct MockState {
    name: Option<String>,
    parent: Option<WeakMock>,
    spec_class: Option<Class>,
    spec_set: bool,
    allowed: Option<BTreeSet<String>>,
    children: BTreeMap<String, Mock>,
    attributes: BTreeMap<String, Value>,
    magics: BTreeMap<Magic, Slot>,
    return_value: Option<Value>,
    side_effect: Option<Value>,
    wraps: Option<Value>,
    signature: Option<(String, Signature)>,
    called: bool,
    call_count: usize,
    call_args: Option<CallRecord>,
    call_args_list: Vec<CallRecord>,
    method_calls: Vec<CallRecord>,
}

struct MockCell {
    id: u64,
    flavor: Flavor,
    callable: bool,
    state: RefCell<MockState>,
}

#[derive(Clone)]
pub struct Mock(Rc<MockCell>);

/// Non-owning handle, used for parent links.
#[derive(Clone)]
pub struct WeakMock(Weak<MockCell>);

impl WeakMock {
    pub fn upgrade(&self) -> Option<Mock> {
        self.0.upgrade().map(Mock)
    }
}

pub struct MockBuilder {
    flavor: Flavor,
    callable: bool,
    spec: Option<Spec>,
    spec_set: bool,
    spec_class: Option<Class>,
    side_effect: Option<Value>,
    return_value: Option<Value>,
    wraps: Option<Value>,
    name: Option<String>,
    parent: Option<WeakMock>,
    signature: Option<(String, Signature)>,
}

impl MockBuilder {
    pub fn magic(mut self) -> Self {
        self.flavor = Flavor::Magic;
        self
    }

    pub fn flavor(mut self, flavor: Flavor) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn non_callable(mut self) -> Self {
        self.callable = false;
        self
    }

    pub fn spec(mut self, spec: Spec) -> Self {
        self.spec = Some(spec);
        self.spec_set = false;
        self
    }

    /// Like [`MockBuilder::spec`], and setting unknown attributes fails too.
    pub fn spec_set(mut self, spec: Spec) -> Self {
        self.spec = Some(spec);
        self.spec_set = true;
        self
    }

    /// Reports `class` as the proxy's type without restricting attributes.
    pub(crate) fn spec_class(mut self, class: Class) -> Self {
        self.spec_class = Some(class);
        self
    }

    pub fn side_effect(mut self, effect: impl Into<Value>) -> Self {
        self.side_effect = Some(effect.into());
        self
    }

    pub fn return_value(mut self, value: impl Into<Value>) -> Self {
        self.return_value = Some(value.into());
        self
    }

    pub fn wraps(mut self, target: impl Into<Value>) -> Self {
        self.wraps = Some(target.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn parent(mut self, parent: &Mock) -> Self {
        self.parent = Some(parent.downgrade());
        self
    }

    /// Enforces `signature` on every call; `owner` names the callable in
    /// mismatch errors.
    pub fn signature(mut self, owner: impl Into<String>, signature: Signature) -> Self {
        self.signature = Some((owner.into(), signature));
        self
    }

    pub fn build(self) -> Mock {
        let (spec_class, allowed) = match self.spec {
            Some(spec) => {
                let (class, allowed) = spec.resolve();
                (class.or(self.spec_class), Some(allowed))
            }
            None => (self.spec_class, None),
        };
        let mut magics = BTreeMap::new();
        if self.flavor == Flavor::Magic {
            for magic in Magic::defaults() {
                let permitted = allowed
                    .as_ref()
                    .map_or(true, |names| names.contains(&magic.name()));
                if permitted {
                    magics.insert(magic, Slot::Lazy);
                }
            }
        }
        let side_effect = self.side_effect.filter(|effect| !effect.is_none());
        Mock(Rc::new(MockCell {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            flavor: self.flavor,
            callable: self.callable,
            state: RefCell::new(MockState {
                name: self.name,
                parent: self.parent,
                spec_class,
                spec_set: self.spec_set && allowed.is_some(),
                allowed,
                children: BTreeMap::new(),
                attributes: BTreeMap::new(),
                magics,
                return_value: self.return_value,
                side_effect,
                wraps: self.wraps,
                signature: self.signature,
                called: false,
                call_count: 0,
                call_args: None,
                call_args_list: Vec::new(),
                method_calls: Vec::new(),
            }),
        }))
    }
}

impl Default for Mock {
    fn default() -> Self {
        Mock::new()
    }
}

impl Mock {
    pub fn builder() -> MockBuilder {
        MockBuilder {
            flavor: Flavor::Plain,
            callable: true,
            spec: None,
            spec_set: false,
            spec_class: None,
            side_effect: None,
            return_value: None,
            wraps: None,
            name: None,
            parent: None,
            signature: None,
        }
    }

    pub fn new() -> Self {
        Self::builder().build()
    }

    /// The rich variant with every supported magic method pre-installed.
    pub fn magic() -> Self {
        Self::builder().magic().build()
    }

    pub fn non_callable() -> Self {
        Self::builder().non_callable().build()
    }

    pub fn non_callable_magic() -> Self {
        Self::builder().magic().non_callable().build()
    }

    fn state(&self) -> Ref<'_, MockState> {
        self.0.state.borrow()
    }

    fn state_mut(&self) -> RefMut<'_, MockState> {
        self.0.state.borrow_mut()
    }

    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn flavor(&self) -> Flavor {
        self.0.flavor
    }

    pub fn is_callable(&self) -> bool {
        self.0.callable
    }

    pub fn ptr_eq(&self, other: &Mock) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakMock {
        WeakMock(Rc::downgrade(&self.0))
    }

    pub(crate) fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn identity_hash(&self) -> i64 {
        i64::try_from(self.address() >> 4).unwrap_or(i64::MAX)
    }

    pub fn name(&self) -> Option<String> {
        self.state().name.clone()
    }

    pub fn parent(&self) -> Option<Mock> {
        self.state().parent.as_ref().and_then(WeakMock::upgrade)
    }

    pub fn spec_class(&self) -> Option<Class> {
        self.state().spec_class.clone()
    }

    pub fn is_spec_set(&self) -> bool {
        self.state().spec_set
    }

    /// The allowed attribute names, when the proxy is constrained.
    pub fn allowed_names(&self) -> Option<BTreeSet<String>> {
        self.state().allowed.clone()
    }

    pub fn signature(&self) -> Option<Signature> {
        self.state().signature.as_ref().map(|(_, sig)| sig.clone())
    }

    pub(crate) fn set_signature(&self, owner: impl Into<String>, signature: Signature) {
        self.state_mut().signature = Some((owner.into(), signature));
    }

    pub fn called(&self) -> bool {
        self.state().called
    }

    pub fn call_count(&self) -> usize {
        self.state().call_count
    }

    pub fn call_args(&self) -> Option<CallRecord> {
        self.state().call_args.clone()
    }

    pub fn call_args_list(&self) -> Vec<CallRecord> {
        self.state().call_args_list.clone()
    }

    pub fn method_calls(&self) -> Vec<CallRecord> {
        self.state().method_calls.clone()
    }

    pub fn side_effect(&self) -> Option<Value> {
        self.state().side_effect.clone()
    }

    /// `Value::None` clears the side effect.
    pub fn set_side_effect(&self, effect: impl Into<Value>) {
        let effect = effect.into();
        self.state_mut().side_effect = (!effect.is_none()).then_some(effect);
    }

    pub fn wraps(&self) -> Option<Value> {
        self.state().wraps.clone()
    }

    /// The configured return value, materializing a fresh proxy of the same
    /// flavor the first time it is read unset.
    pub fn return_value(&self) -> Value {
        if let Some(value) = self.state().return_value.clone() {
            return value;
        }
        let fresh = Value::Mock(Mock::builder().flavor(self.0.flavor).build());
        self.state_mut()
            .return_value
            .get_or_insert(fresh)
            .clone()
    }

    pub fn set_return_value(&self, value: impl Into<Value>) {
        self.state_mut().return_value = Some(value.into());
    }

    /// Memoized children created so far.
    pub fn children(&self) -> BTreeMap<String, Mock> {
        self.state().children.clone()
    }

    pub(crate) fn adopt_child(&self, name: &str, child: Mock) {
        self.state_mut().children.insert(name.to_string(), child);
    }

    fn type_name(&self) -> &'static str {
        match (self.0.flavor, self.0.callable) {
            (Flavor::Plain, true) => "Mock",
            (Flavor::Magic, true) => "MagicMock",
            (Flavor::Plain, false) => "NonCallableMock",
            (Flavor::Magic, false) => "NonCallableMagicMock",
        }
    }

    /// The class this proxy claims to be: its spec class, or its own type.
    pub fn reported_class(&self) -> Class {
        self.spec_class()
            .unwrap_or_else(|| builtin_class(self.type_name()))
    }

    /// True for the spec class (and its bases) and for the proxy's own type.
    pub fn is_instance(&self, class: &Class) -> bool {
        self.reported_class().is_subclass(class)
            || builtin_class(self.type_name()).is_subclass(class)
    }

    /// Dotted path from the root, with unnamed ancestors rendered as `mock`.
    fn dotted_name(&self) -> Option<String> {
        let mut path = self.name()?;
        let mut parent = self.parent();
        while let Some(node) = parent {
            let prefix = node.name().unwrap_or_else(|| "mock".to_string());
            path = format!("{prefix}.{path}");
            parent = node.parent();
        }
        Some(path)
    }

    fn label(&self) -> String {
        self.dotted_name().unwrap_or_else(|| "mock".to_string())
    }

    /// `<Mock name='a.b' spec='C' id='7'>`, ignoring any `__repr__` override.
    pub fn default_repr(&self) -> String {
        let (spec, spec_set) = {
            let state = self.state();
            (state.spec_class.clone(), state.spec_set)
        };
        let mut text = format!("<{}", self.type_name());
        if let Some(name) = self.dotted_name() {
            text.push_str(&format!(" name='{name}'"));
        }
        if let Some(class) = spec {
            let key = if spec_set { "spec_set" } else { "spec" };
            text.push_str(&format!(" {key}='{}'", class.name()));
        }
        text.push_str(&format!(" id='{}'>", self.0.id));
        text
    }

    /// Names visible through `dir`.
    pub fn dir_names(&self) -> Vec<String> {
        let state = self.state();
        if let Some(allowed) = &state.allowed {
            return allowed.iter().cloned().collect();
        }
        let mut names = state.children.keys().cloned().collect::<BTreeSet<_>>();
        names.extend(state.attributes.keys().cloned());
        names.into_iter().collect()
    }

    /// Invokes the proxy.
    pub fn call(&self, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, StandinError> {
        if !self.0.callable {
            return Err(StandinError::Type(format!(
                "'{}' object is not callable",
                self.type_name()
            )));
        }
        let signature = self.state().signature.clone();
        let (args, kwargs) = match signature {
            Some((owner, signature)) => signature.normalize(&owner, &args, &kwargs)?,
            None => (args, kwargs),
        };

        let record = CallRecord::new(args.clone(), kwargs.clone());
        let call_count = {
            let mut state = self.state_mut();
            state.called = true;
            state.call_count += 1;
            state.call_args = Some(record.clone());
            state.call_args_list.push(record.clone());
            state.call_count
        };
        self.notify_ancestors(&args, &kwargs);

        let logging = run_log_enabled("debug");
        let recording = is_recording();
        if logging || recording {
            let label = self.label();
            let rendered = record.repr();
            if logging {
                append_run_log(
                    "debug",
                    "mock.call",
                    json!({
                        "mock": label,
                        "call": rendered,
                        "call_count": call_count,
                    }),
                );
            }
            if recording {
                emit_record(RecordEntry::MockCall(MockCallRecord::capture(
                    &label,
                    &rendered,
                    call_count,
                )));
            }
        }

        let (side_effect, wraps, configured) = {
            let state = self.state();
            (
                state.side_effect.clone(),
                state.wraps.clone(),
                state.return_value.is_some(),
            )
        };
        if let Some(effect) = side_effect {
            match effect {
                Value::Exception(exception) => return Err(StandinError::Raised(exception)),
                Value::ExceptionType(kind) => return Err(StandinError::Raised(kind.instance(""))),
                callable => {
                    let result = callable.call(&args, &kwargs)?;
                    if !is_default(&result) {
                        return Ok(result);
                    }
                }
            }
        }
        if let Some(wrapped) = wraps {
            if !configured {
                return wrapped.call(&args, &kwargs);
            }
        }
        Ok(self.return_value())
    }

    /// Appends a tagged record to every ancestor's `method_calls`. The walk
    /// stops at the last ancestor, so the root never records itself.
    fn notify_ancestors(&self, args: &[Value], kwargs: &Kwargs) {
        let mut name = self.name().unwrap_or_default();
        let mut parent = self.parent();
        while let Some(node) = parent {
            node.state_mut()
                .method_calls
                .push(CallRecord::named(name.clone(), args.to_vec(), kwargs.clone()));
            let Some(grandparent) = node.parent() else {
                break;
            };
            name = format!("{}.{name}", node.name().unwrap_or_default());
            parent = Some(grandparent);
        }
    }

    fn unknown_attribute(&self, name: &str) -> StandinError {
        StandinError::Attribute(format!(
            "Mock object '{}' has no attribute '{name}'",
            self.label()
        ))
    }

    /// Attribute read: configuration names, explicit attributes, the magic
    /// table, then memoized children.
    pub fn get_attribute(&self, name: &str) -> Result<Value, StandinError> {
        match name {
            "return_value" => return Ok(self.return_value()),
            "side_effect" => return Ok(self.side_effect().unwrap_or(Value::None)),
            "called" => return Ok(Value::Bool(self.called())),
            "call_count" => return Ok(Value::from(self.call_count())),
            "call_args" => {
                return Ok(self
                    .call_args()
                    .map_or(Value::None, |record| record.to_value()))
            }
            "call_args_list" => {
                return Ok(Value::Tuple(
                    self.call_args_list().iter().map(CallRecord::to_value).collect(),
                ))
            }
            "method_calls" => {
                return Ok(Value::Tuple(
                    self.method_calls().iter().map(CallRecord::to_value).collect(),
                ))
            }
            _ => {}
        }

        if let Some(value) = self.state().attributes.get(name).cloned() {
            return Ok(value);
        }

        if let Some(magic) = Magic::from_name(name) {
            let slot = self.state().magics.get(&magic).cloned();
            return match slot {
                Some(Slot::Installed(value)) => Ok(value),
                Some(Slot::Lazy) => Ok(Value::Mock(self.materialize(magic))),
                None => Err(self.unknown_attribute(name)),
            };
        }
        if is_dunder(name) {
            return Err(self.unknown_attribute(name));
        }

        let (permitted, existing, wraps) = {
            let state = self.state();
            (
                state.allowed.as_ref().map_or(true, |allowed| allowed.contains(name)),
                state.children.get(name).cloned(),
                state.wraps.clone(),
            )
        };
        if !permitted {
            return Err(self.unknown_attribute(name));
        }
        if let Some(child) = existing {
            return Ok(Value::Mock(child));
        }

        let mut builder = Mock::builder()
            .flavor(self.0.flavor)
            .name(name)
            .parent(self);
        if let Some(wrapped) = wraps {
            builder = builder.wraps(get_attr(&wrapped, name)?);
        }
        let child = builder.build();
        let child = self
            .state_mut()
            .children
            .entry(name.to_string())
            .or_insert(child)
            .clone();
        Ok(Value::Mock(child))
    }

    /// Attribute write. Magic names install into this proxy's own table.
    pub fn set_attribute(&self, name: &str, value: Value) -> Result<(), StandinError> {
        match name {
            "return_value" => {
                self.set_return_value(value);
                return Ok(());
            }
            "side_effect" => {
                self.set_side_effect(value);
                return Ok(());
            }
            _ if TRACKING_NAMES.contains(&name) => {
                return Err(StandinError::Attribute(format!(
                    "can't set attribute '{name}'"
                )))
            }
            _ => {}
        }

        let (forbidden, outside_spec) = {
            let state = self.state();
            match &state.allowed {
                Some(allowed) => {
                    let known = allowed.contains(name)
                        || state.attributes.contains_key(name)
                        || state.children.contains_key(name);
                    (state.spec_set && !known, !allowed.contains(name))
                }
                None => (false, false),
            }
        };
        if forbidden {
            return Err(self.unknown_attribute(name));
        }
        if is_unsupported(name) {
            return Err(StandinError::Attribute(format!(
                "Attempting to set unsupported magic method '{name}'."
            )));
        }
        if let Some(magic) = Magic::from_name(name) {
            if outside_spec {
                return Err(self.unknown_attribute(name));
            }
            self.state_mut().magics.insert(magic, Slot::Installed(value));
            return Ok(());
        }
        self.state_mut().attributes.insert(name.to_string(), value);
        Ok(())
    }

    pub fn delete_attribute(&self, name: &str) -> Result<(), StandinError> {
        let removed = {
            let mut state = self.state_mut();
            match Magic::from_name(name) {
                Some(magic) => state.magics.remove(&magic).is_some(),
                None => {
                    let attribute = state.attributes.remove(name).is_some();
                    let child = state.children.remove(name).is_some();
                    attribute || child
                }
            }
        };
        if removed {
            Ok(())
        } else {
            Err(self.unknown_attribute(name))
        }
    }

    /// What this proxy holds for `name` itself, without creating anything.
    pub fn local_attribute(&self, name: &str) -> Option<Value> {
        let state = self.state();
        if let Some(value) = state.attributes.get(name) {
            return Some(value.clone());
        }
        if let Some(child) = state.children.get(name) {
            return Some(Value::Mock(child.clone()));
        }
        match Magic::from_name(name).and_then(|magic| state.magics.get(&magic)) {
            Some(Slot::Installed(value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn has_magic(&self, magic: Magic) -> bool {
        self.state().magics.contains_key(&magic)
    }

    fn materialize(&self, magic: Magic) -> Mock {
        let slot = Mock::builder().magic().name(magic.name()).build();
        configure_default(self, &slot, magic);
        let mut state = self.state_mut();
        if let Some(Slot::Installed(Value::Mock(existing))) = state.magics.get(&magic) {
            return existing.clone();
        }
        state
            .magics
            .insert(magic, Slot::Installed(Value::Mock(slot.clone())));
        slot
    }

    /// Runs the installed override for `magic`, if any. Mock overrides are
    /// called with the operands; function overrides also receive this proxy
    /// first.
    pub(crate) fn invoke_magic(
        &self,
        magic: Magic,
        operands: &[Value],
    ) -> Option<Result<Value, StandinError>> {
        let slot = self.state().magics.get(&magic).cloned()?;
        let handler = match slot {
            Slot::Lazy => Value::Mock(self.materialize(magic)),
            Slot::Installed(value) => value,
        };
        let result = match &handler {
            Value::Mock(mock) => mock.call(operands.to_vec(), Kwargs::new()),
            Value::Function(function) => {
                let mut full = Vec::with_capacity(operands.len() + 1);
                full.push(Value::Mock(self.clone()));
                full.extend_from_slice(operands);
                function.call(&full, &Kwargs::new())
            }
            other => other.call(operands, &Kwargs::new()),
        };
        Some(result)
    }

    /// Clears call tracking on this proxy, its children, its return value
    /// and its materialized magic slots. Configuration is kept.
    pub fn reset(&self) {
        let mut visited = HashSet::new();
        self.reset_inner(&mut visited);
    }

    fn reset_inner(&self, visited: &mut HashSet<usize>) {
        if !visited.insert(self.address()) {
            return;
        }
        let mut related = Vec::new();
        {
            let mut state = self.state_mut();
            state.called = false;
            state.call_count = 0;
            state.call_args = None;
            state.call_args_list.clear();
            state.method_calls.clear();
            related.extend(state.children.values().cloned());
            if let Some(Value::Mock(returned)) = &state.return_value {
                related.push(returned.clone());
            }
            for slot in state.magics.values() {
                if let Slot::Installed(Value::Mock(installed)) = slot {
                    related.push(installed.clone());
                }
            }
        }
        for mock in related {
            mock.reset_inner(visited);
        }
    }

    fn expected_record(&self, args: Vec<Value>, kwargs: Kwargs) -> CallRecord {
        let signature = self.state().signature.clone();
        if let Some((owner, signature)) = signature {
            if let Ok((args, kwargs)) = signature.normalize(&owner, &args, &kwargs) {
                return CallRecord::new(args, kwargs);
            }
        }
        CallRecord::new(args, kwargs)
    }

    /// Fails unless the most recent call matches.
    pub fn assert_called_with(&self, args: Vec<Value>, kwargs: Kwargs) -> Result<(), StandinError> {
        let expected = self.expected_record(args, kwargs);
        match self.call_args() {
            None => Err(StandinError::Assertion(format!(
                "Expected: {}\nNot called",
                expected.repr()
            ))),
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => Err(StandinError::Assertion(format!(
                "Expected: {}\nCalled with: {}",
                expected.repr(),
                actual.repr()
            ))),
        }
    }

    pub fn assert_called_once_with(
        &self,
        args: Vec<Value>,
        kwargs: Kwargs,
    ) -> Result<(), StandinError> {
        let count = self.call_count();
        if count != 1 {
            return Err(StandinError::Assertion(format!(
                "Expected to be called once. Called {count} times."
            )));
        }
        self.assert_called_with(args, kwargs)
    }
}

impl PartialEq for Mock {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for Mock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.default_repr())
    }
}
