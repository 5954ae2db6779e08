//! Temporary overlays on mappings.
//!
//! Plain [`Dict`] values are edited directly; anything else is driven
//! through the mapping protocol (key iteration plus item get/set/delete).

use super::{decorate_members, guard, scoped, PatchGuard, Patching};
use crate::errors::StandinError;
use crate::function::{Function, Signature};
use crate::logging::append_run_log;
use crate::module::import;
use crate::object::Class;
use crate::protocol;
use crate::recording::{emit_record, DictPatchRecord, RecordEntry};
use crate::value::{Dict, Value};
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

/// What to patch: a mapping in hand or a dotted path resolving to one.
pub enum DictTarget {
    Value(Value),
    Path(String),
}

impl From<Value> for DictTarget {
    fn from(value: Value) -> Self {
        DictTarget::Value(value)
    }
}

impl From<&Value> for DictTarget {
    fn from(value: &Value) -> Self {
        DictTarget::Value(value.clone())
    }
}

impl From<Dict> for DictTarget {
    fn from(dict: Dict) -> Self {
        DictTarget::Value(Value::Dict(dict))
    }
}

impl From<&Dict> for DictTarget {
    fn from(dict: &Dict) -> Self {
        DictTarget::Value(Value::Dict(dict.clone()))
    }
}

impl From<&str> for DictTarget {
    fn from(path: &str) -> Self {
        DictTarget::Path(path.to_string())
    }
}

pub struct DictPatch {
    target: Value,
    label: String,
    values: Vec<(Value, Value)>,
    clear: bool,
    saved: RefCell<Vec<Vec<(Value, Value)>>>,
}

/// Overlays `values` on a mapping for the duration of the patch, clearing
/// it first when `clear` is set.
pub fn patch_dict(
    target: impl Into<DictTarget>,
    values: impl IntoIterator<Item = (Value, Value)>,
    clear: bool,
) -> Result<DictPatch, StandinError> {
    let (target, label) = match target.into() {
        DictTarget::Path(path) => (import(&path)?, path),
        DictTarget::Value(value) => {
            let label = value.repr();
            (value, label)
        }
    };
    Ok(DictPatch {
        target,
        label,
        values: values.into_iter().collect(),
        clear,
        saved: RefCell::new(Vec::new()),
    })
}

impl DictPatch {
    pub fn target(&self) -> &Value {
        &self.target
    }

    pub fn copy(&self) -> DictPatch {
        DictPatch {
            target: self.target.clone(),
            label: self.label.clone(),
            values: self.values.clone(),
            clear: self.clear,
            saved: RefCell::new(Vec::new()),
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

    pub fn scoped<T>(
        &self,
        body: impl FnOnce(Value) -> Result<T, StandinError>,
    ) -> Result<T, StandinError> {
        scoped(self, body)
    }

    /// Wraps `function` so every call runs inside this patch. The wrapper
    /// does not join a shared patch stack and supplies no extra argument.
    pub fn decorate(self, function: &Function) -> Function {
        let patching = Rc::new(self);
        let inner = function.clone();
        Function::new(function.name(), Signature::variadic(), move |args, kwargs| {
            patching.scoped(|_| inner.call(args, kwargs))
        })
    }

    pub fn decorate_class(&self, class: &Class) {
        decorate_members(class, |function| self.copy().decorate(function));
    }

    fn snapshot(&self) -> Result<Vec<(Value, Value)>, StandinError> {
        if let Value::Dict(dict) = &self.target {
            return Ok(dict.items());
        }
        protocol::iterate(&self.target)?
            .into_iter()
            .map(|key| {
                let value = protocol::get_item(&self.target, &key)?;
                Ok((key, value))
            })
            .collect()
    }

    fn clear_target(&self) -> Result<(), StandinError> {
        if let Value::Dict(dict) = &self.target {
            dict.clear();
            return Ok(());
        }
        for key in protocol::iterate(&self.target)? {
            protocol::del_item(&self.target, &key)?;
        }
        Ok(())
    }

    fn apply(&self, entries: &[(Value, Value)]) -> Result<(), StandinError> {
        for (key, value) in entries {
            match &self.target {
                Value::Dict(dict) => dict.insert(key.clone(), value.clone()),
                target => protocol::set_item(target, key, value.clone())?,
            }
        }
        Ok(())
    }

    fn entry_count(&self) -> usize {
        match &self.target {
            Value::Dict(dict) => dict.len(),
            target => protocol::len(target).unwrap_or_default(),
        }
    }

    fn report(&self, phase: &str) {
        let entries = self.entry_count();
        append_run_log(
            "info",
            "patch.dict",
            json!({
                "target": self.label,
                "phase": phase,
                "entries": entries,
                "clear": self.clear,
            }),
        );
        emit_record(RecordEntry::DictPatched(DictPatchRecord::capture(
            &self.label,
            phase,
            entries,
            self.clear,
        )));
    }
}

impl Patching for DictPatch {
    fn activate(&self) -> Result<Value, StandinError> {
        let original = self.snapshot()?;
        self.saved.borrow_mut().push(original);
        if self.clear {
            self.clear_target()?;
        }
        self.apply(&self.values)?;
        self.report("enter");
        Ok(self.target.clone())
    }

    fn deactivate(&self) -> Result<(), StandinError> {
        let original = self.saved.borrow_mut().pop().ok_or_else(|| {
            StandinError::Type(format!("dict patch of {} is not active", self.label))
        })?;
        self.clear_target()?;
        self.apply(&original)?;
        self.report("exit");
        Ok(())
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
