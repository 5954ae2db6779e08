//! Recorded invocations.
//!
//! A [`CallRecord`] is either `(args, kwargs)` or `(name, args, kwargs)`.
//! Compared against a shorter tuple that leaves out empty positional or
//! empty keyword arguments it still compares equal, so
//! `((), {})`, `()` and an empty record all match.

use crate::value::{render_kwargs, render_tuple, quote, Dict, Kwargs, Value};
use std::fmt;

#[derive(Clone, PartialEq)]
pub struct CallRecord {
    name: Option<String>,
    args: Vec<Value>,
    kwargs: Kwargs,
}

impl CallRecord {
    pub fn new(args: Vec<Value>, kwargs: Kwargs) -> Self {
        Self {
            name: None,
            args,
            kwargs,
        }
    }

    pub fn named(name: impl Into<String>, args: Vec<Value>, kwargs: Kwargs) -> Self {
        Self {
            name: Some(name.into()),
            args,
            kwargs,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &Kwargs {
        &self.kwargs
    }

    /// The tuple form of the record.
    pub fn to_value(&self) -> Value {
        let mut items = Vec::with_capacity(3);
        if let Some(name) = &self.name {
            items.push(Value::Str(name.clone()));
        }
        items.push(Value::Tuple(self.args.clone()));
        items.push(Value::from(self.kwargs.clone()));
        Value::Tuple(items)
    }

    pub fn repr(&self) -> String {
        let body = format!("{}, {}", render_tuple(&self.args), render_kwargs(&self.kwargs));
        match &self.name {
            Some(name) => format!("({}, {body})", quote(name)),
            None => format!("({body})"),
        }
    }

    /// Applies the relaxed equality law against a tuple value.
    pub fn matches(&self, other: &Value) -> bool {
        let Value::Tuple(items) = other else {
            return false;
        };
        let rest = match &self.name {
            Some(name) => match items.first() {
                Some(Value::Str(other_name)) if other_name == name => &items[1..],
                Some(Value::Any) => &items[1..],
                _ => return false,
            },
            None => &items[..],
        };

        let empty = Dict::new();
        let (other_args, other_kwargs): (&[Value], &Value) = match rest {
            [] => (&[], &Value::Dict(empty)),
            [Value::Tuple(args)] => (args, &Value::Dict(empty)),
            [kwargs] => (&[], kwargs),
            [Value::Tuple(args), kwargs] => (args, kwargs),
            _ => return false,
        };
        let ours = Value::from(self.kwargs.clone());
        self.args.as_slice() == other_args && ours == *other_kwargs
    }
}

impl PartialEq<Value> for CallRecord {
    fn eq(&self, other: &Value) -> bool {
        self.matches(other)
    }
}

impl PartialEq<CallRecord> for Value {
    fn eq(&self, other: &CallRecord) -> bool {
        other.matches(self)
    }
}

impl fmt::Debug for CallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl fmt::Display for CallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

/// Expected-call builder: `call(args![1], kwargs! {})`.
pub fn call(args: Vec<Value>, kwargs: Kwargs) -> CallRecord {
    CallRecord::new(args, kwargs)
}

/// Expected method-call builder: `call_named("a.b", args![1], kwargs! {})`.
pub fn call_named(name: impl Into<String>, args: Vec<Value>, kwargs: Kwargs) -> CallRecord {
    CallRecord::named(name, args, kwargs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{args, kwargs, tuple};

    #[test]
    fn empty_record_equals_the_empty_tuple() {
        let record = CallRecord::new(args![], kwargs! {});
        assert_eq!(record, tuple!());
        assert_eq!(record, Value::Tuple(vec![tuple!(), Value::from(kwargs! {})]));
    }

    #[test]
    fn positional_only_record_equals_a_one_tuple_of_args() {
        let record = CallRecord::new(args![1, 2], kwargs! {});
        assert_eq!(record, Value::Tuple(vec![tuple!(1, 2)]));
        assert_ne!(record, Value::Tuple(vec![tuple!(1)]));
    }

    #[test]
    fn keyword_only_record_equals_a_one_tuple_of_kwargs() {
        let record = CallRecord::new(args![], kwargs! {"a" => 1});
        assert_eq!(record, Value::Tuple(vec![Value::from(kwargs! {"a" => 1})]));
        assert_ne!(record, tuple!());
    }

    #[test]
    fn named_records_compare_the_name_first() {
        let record = CallRecord::named("foo", args![1], kwargs! {});
        assert_eq!(record, Value::Tuple(vec![Value::from("foo"), tuple!(1)]));
        assert_ne!(record, Value::Tuple(vec![Value::from("bar"), tuple!(1)]));
        assert_eq!(CallRecord::named("foo", args![], kwargs! {}), tuple!("foo"));
    }

    #[test]
    fn repr_renders_tuple_forms() {
        assert_eq!(
            CallRecord::named("foo", args![1], kwargs! {"bar" => 2}).repr(),
            "('foo', (1,), {'bar': 2})"
        );
        assert_eq!(CallRecord::new(args![], kwargs! {}).repr(), "((), {})");
    }

    #[test]
    fn any_matches_arguments() {
        let record = CallRecord::new(args![1, "x"], kwargs! {"k" => 3});
        assert_eq!(record, call(args![Value::Any, "x"], kwargs! {"k" => Value::Any}));
    }
}
