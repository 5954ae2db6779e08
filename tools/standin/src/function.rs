//! Callables and parameter descriptors.
//!
//! A [`Signature`] is the explicit description of a call shape: ordered
//! parameter names, which of them carry defaults, and whether variadic
//! positional or keyword collectors are present. Binding a call against it
//! either yields the canonical argument layout or a signature-mismatch error.

use crate::errors::StandinError;
use crate::object::{type_of, Class, Object};
use crate::patch::PatchStack;
use crate::value::{Kwargs, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub default: Option<Value>,
}

impl Param {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    pub fn optional(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            default: Some(default.into()),
        }
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

#[derive(Clone, Default, PartialEq)]
pub struct Signature {
    params: Vec<Param>,
    varargs: Option<String>,
    /// Parameters after `*` or `*args`; only bindable by keyword.
    keyword_only: Vec<Param>,
    varkw: Option<String>,
}

/// Result of mapping a call onto a [`Signature`].
#[derive(Debug, Clone, PartialEq)]
pub struct BoundArguments {
    /// Every named parameter, in declaration order, with defaults applied.
    pub named: Vec<(String, Value)>,
    pub extra_args: Vec<Value>,
    /// Keyword-only parameters, with defaults applied.
    pub keyword: Vec<(String, Value)>,
    pub extra_kwargs: Kwargs,
}

impl BoundArguments {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.named
            .iter()
            .chain(&self.keyword)
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Canonical layout: named parameters positionally, then variadic
    /// extras; keyword-only parameters travel with the extra keywords.
    pub fn into_call(self) -> (Vec<Value>, Kwargs) {
        let mut args = self.named.into_iter().map(|(_, v)| v).collect::<Vec<_>>();
        args.extend(self.extra_args);
        let mut kwargs = self.extra_kwargs;
        kwargs.extend(self.keyword);
        (args, kwargs)
    }
}

impl Signature {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(*args, **kwargs)`: accepts every call.
    pub fn variadic() -> Self {
        Self::new().with_varargs("args").with_varkw("kwargs")
    }

    pub fn param(mut self, name: impl Into<String>) -> Self {
        self.params.push(Param::required(name));
        self
    }

    pub fn optional(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.params.push(Param::optional(name, default));
        self
    }

    pub fn with_varargs(mut self, name: impl Into<String>) -> Self {
        self.varargs = Some(name.into());
        self
    }

    pub fn with_varkw(mut self, name: impl Into<String>) -> Self {
        self.varkw = Some(name.into());
        self
    }

    /// A parameter that can only be passed by keyword.
    pub fn keyword_only(mut self, param: Param) -> Self {
        self.keyword_only.push(param);
        self
    }

    /// Parses a parameter list such as
    /// `"self, a, b=None, *args, flag=False, **kwargs"`. Parameters after
    /// `*args` or a bare `*` are keyword-only.
    pub fn parse(text: &str) -> Result<Self, StandinError> {
        let mut signature = Signature::new();
        let mut seen_default = false;
        let mut after_star = false;
        for part in split_params(text)? {
            if let Some(name) = part.strip_prefix("**") {
                signature.varkw = Some(parse_identifier(name, text)?);
                continue;
            }
            if part == "*" {
                after_star = true;
                continue;
            }
            if let Some(name) = part.strip_prefix('*') {
                signature.varargs = Some(parse_identifier(name, text)?);
                after_star = true;
                continue;
            }
            let param = match part.split_once('=') {
                Some((name, literal)) => Param {
                    name: parse_identifier(name, text)?,
                    default: Some(parse_literal(literal.trim())?),
                },
                None => Param::required(parse_identifier(part, text)?),
            };
            if after_star {
                signature.keyword_only.push(param);
            } else if param.has_default() {
                seen_default = true;
                signature.params.push(param);
            } else if seen_default {
                return Err(StandinError::Signature(format!(
                    "non-default argument '{part}' follows default argument in ({text})"
                )));
            } else {
                signature.params.push(param);
            }
        }
        Ok(signature)
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn varargs(&self) -> Option<&str> {
        self.varargs.as_deref()
    }

    pub fn varkw(&self) -> Option<&str> {
        self.varkw.as_deref()
    }

    pub fn keyword_only_params(&self) -> &[Param] {
        &self.keyword_only
    }

    /// Drops the leading receiver parameter.
    pub fn skip_first(&self) -> Self {
        let mut copy = self.clone();
        if !copy.params.is_empty() {
            copy.params.remove(0);
        }
        copy
    }

    pub fn bind(
        &self,
        owner: &str,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> Result<BoundArguments, StandinError> {
        let mut slots: Vec<Option<Value>> = vec![None; self.params.len()];
        let mut extra_args = Vec::new();
        for (index, arg) in args.iter().enumerate() {
            match slots.get_mut(index) {
                Some(slot) => *slot = Some(arg.clone()),
                None if self.varargs.is_some() => extra_args.push(arg.clone()),
                None => {
                    return Err(StandinError::Signature(format!(
                        "{owner}() takes {} positional argument{} but {} {} given",
                        self.params.len(),
                        plural(self.params.len()),
                        args.len(),
                        if args.len() == 1 { "was" } else { "were" }
                    )))
                }
            }
        }

        let mut keyword_slots: Vec<Option<Value>> = vec![None; self.keyword_only.len()];
        let mut extra_kwargs = BTreeMap::new();
        for (name, value) in kwargs {
            if let Some(index) = self.params.iter().position(|p| &p.name == name) {
                if slots[index].is_some() {
                    return Err(StandinError::Signature(format!(
                        "{owner}() got multiple values for argument '{name}'"
                    )));
                }
                slots[index] = Some(value.clone());
            } else if let Some(index) = self.keyword_only.iter().position(|p| &p.name == name) {
                keyword_slots[index] = Some(value.clone());
            } else if self.varkw.is_some() {
                extra_kwargs.insert(name.clone(), value.clone());
            } else {
                return Err(StandinError::Signature(format!(
                    "{owner}() got an unexpected keyword argument '{name}'"
                )));
            }
        }

        let missing = missing_names(&self.params, &slots);
        if !missing.is_empty() {
            return Err(StandinError::Signature(format!(
                "{owner}() missing {} required positional argument{}: {}",
                missing.len(),
                plural(missing.len()),
                missing.join(", ")
            )));
        }

        let missing_keywords = missing_names(&self.keyword_only, &keyword_slots);
        if !missing_keywords.is_empty() {
            return Err(StandinError::Signature(format!(
                "{owner}() missing {} required keyword-only argument{}: {}",
                missing_keywords.len(),
                plural(missing_keywords.len()),
                missing_keywords.join(", ")
            )));
        }

        Ok(BoundArguments {
            named: fill_defaults(&self.params, slots),
            extra_args,
            keyword: fill_defaults(&self.keyword_only, keyword_slots),
            extra_kwargs,
        })
    }

    /// Binds and returns the call in canonical layout.
    pub fn normalize(
        &self,
        owner: &str,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> Result<(Vec<Value>, Kwargs), StandinError> {
        Ok(self.bind(owner, args, kwargs)?.into_call())
    }

    pub fn render(&self) -> String {
        let mut parts = self.params.iter().map(render_param).collect::<Vec<_>>();
        match &self.varargs {
            Some(name) => parts.push(format!("*{name}")),
            None if !self.keyword_only.is_empty() => parts.push("*".to_string()),
            None => {}
        }
        parts.extend(self.keyword_only.iter().map(render_param));
        if let Some(name) = &self.varkw {
            parts.push(format!("**{name}"));
        }
        format!("({})", parts.join(", "))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn render_param(param: &Param) -> String {
    match &param.default {
        Some(default) => format!("{}={}", param.name, default.repr()),
        None => param.name.clone(),
    }
}

fn missing_names(params: &[Param], slots: &[Option<Value>]) -> Vec<String> {
    params
        .iter()
        .zip(slots)
        .filter(|(param, slot)| slot.is_none() && !param.has_default())
        .map(|(param, _)| format!("'{}'", param.name))
        .collect()
}

fn fill_defaults(params: &[Param], slots: Vec<Option<Value>>) -> Vec<(String, Value)> {
    params
        .iter()
        .zip(slots)
        .map(|(param, slot)| {
            let value = slot.or_else(|| param.default.clone()).unwrap_or(Value::None);
            (param.name.clone(), value)
        })
        .collect()
}

/// Splits a parameter list on commas outside quotes and parentheses.
fn split_params(text: &str) -> Result<Vec<&str>, StandinError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (index, c) in text.char_indices() {
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == open {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(text[start..index].trim());
                start = index + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Err(StandinError::Signature(format!(
            "unterminated string in ({text})"
        )));
    }
    parts.push(text[start..].trim());
    Ok(parts.into_iter().filter(|part| !part.is_empty()).collect())
}

fn plural(count: usize) -> &'static str {
    if count == 1 {
        ""
    } else {
        "s"
    }
}

fn parse_identifier(raw: &str, text: &str) -> Result<String, StandinError> {
    let name = raw.trim();
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c == '_' || c.is_alphabetic())
        && name.chars().all(|c| c == '_' || c.is_alphanumeric());
    if valid {
        Ok(name.to_string())
    } else {
        Err(StandinError::Signature(format!(
            "invalid parameter name '{name}' in ({text})"
        )))
    }
}

fn parse_literal(literal: &str) -> Result<Value, StandinError> {
    let value = match literal {
        "None" => Value::None,
        "True" => Value::Bool(true),
        "False" => Value::Bool(false),
        "()" => Value::Tuple(Vec::new()),
        _ => {
            if let Ok(n) = literal.parse::<i64>() {
                Value::Int(n)
            } else if let Ok(f) = literal.parse::<f64>() {
                Value::Float(f)
            } else if literal.len() >= 2
                && ((literal.starts_with('\'') && literal.ends_with('\''))
                    || (literal.starts_with('"') && literal.ends_with('"')))
            {
                Value::Str(literal[1..literal.len() - 1].to_string())
            } else {
                return Err(StandinError::Signature(format!(
                    "unsupported default value '{literal}'"
                )));
            }
        }
    };
    Ok(value)
}

type NativeBody = dyn Fn(&[Value], &Kwargs) -> Result<Value, StandinError>;

struct FunctionInner {
    name: String,
    signature: Signature,
    body: Box<NativeBody>,
    patchings: Option<PatchStack>,
    /// The value calls are forwarded to, for signature-copying wrappers.
    delegate: Option<Value>,
}

/// A named native callable with a declared signature.
///
/// The body always receives arguments in canonical layout (see
/// [`Signature::normalize`]).
#[derive(Clone)]
pub struct Function(Rc<FunctionInner>);

impl Function {
    pub fn new(
        name: impl Into<String>,
        signature: Signature,
        body: impl Fn(&[Value], &Kwargs) -> Result<Value, StandinError> + 'static,
    ) -> Self {
        Self(Rc::new(FunctionInner {
            name: name.into(),
            signature,
            body: Box::new(body),
            patchings: None,
            delegate: None,
        }))
    }

    /// A function accepting any arguments.
    pub fn variadic(
        name: impl Into<String>,
        body: impl Fn(&[Value], &Kwargs) -> Result<Value, StandinError> + 'static,
    ) -> Self {
        Self::new(name, Signature::variadic(), body)
    }

    pub(crate) fn with_patchings(
        name: impl Into<String>,
        signature: Signature,
        patchings: PatchStack,
        body: impl Fn(&[Value], &Kwargs) -> Result<Value, StandinError> + 'static,
    ) -> Self {
        Self(Rc::new(FunctionInner {
            name: name.into(),
            signature,
            body: Box::new(body),
            patchings: Some(patchings),
            delegate: None,
        }))
    }

    /// A function with `signature` that forwards every normalized call to
    /// `delegate`.
    pub(crate) fn forwarding(
        name: impl Into<String>,
        signature: Signature,
        delegate: Value,
    ) -> Self {
        let target = delegate.clone();
        Self(Rc::new(FunctionInner {
            name: name.into(),
            signature,
            body: Box::new(move |args, kwargs| target.call(args, kwargs)),
            patchings: None,
            delegate: Some(delegate),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn signature(&self) -> &Signature {
        &self.0.signature
    }

    /// What a signature-copying wrapper forwards to.
    pub fn delegate(&self) -> Option<&Value> {
        self.0.delegate.as_ref()
    }

    /// The patch stack attached when this function was produced by a patch decorator.
    pub fn patchings(&self) -> Option<&PatchStack> {
        self.0.patchings.as_ref()
    }

    pub fn call(&self, args: &[Value], kwargs: &Kwargs) -> Result<Value, StandinError> {
        let (args, kwargs) = self.0.signature.normalize(&self.0.name, args, kwargs)?;
        (self.0.body)(&args, &kwargs)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<function {}{}>", self.name(), self.signature().render())
    }
}

struct BoundInner {
    receiver: Value,
    function: Function,
}

/// A function bound to its receiver (an instance, or a class for class methods).
#[derive(Clone)]
pub struct BoundMethod(Rc<BoundInner>);

impl BoundMethod {
    pub fn new(receiver: Value, function: Function) -> Self {
        Self(Rc::new(BoundInner { receiver, function }))
    }

    pub fn receiver(&self) -> &Value {
        &self.0.receiver
    }

    pub fn function(&self) -> &Function {
        &self.0.function
    }

    /// The call shape seen by callers: the receiver parameter is gone.
    pub fn signature(&self) -> Signature {
        self.0.function.signature().skip_first()
    }

    pub fn call(&self, args: &[Value], kwargs: &Kwargs) -> Result<Value, StandinError> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(self.0.receiver.clone());
        full.extend_from_slice(args);
        self.0.function.call(&full, kwargs)
    }

    pub(crate) fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

/// The call shape of a callable value, if it has an introspectable one.
pub fn signature_of(value: &Value) -> Option<Signature> {
    match value {
        Value::Function(f) | Value::StaticMethod(f) => Some(f.signature().clone()),
        Value::ClassMethod(f) => Some(f.signature().skip_first()),
        Value::BoundMethod(method) => Some(method.signature()),
        _ => None,
    }
}

/// Calls any callable value.
pub fn call_value(callee: &Value, args: &[Value], kwargs: &Kwargs) -> Result<Value, StandinError> {
    match callee {
        Value::Mock(mock) => mock.call(args.to_vec(), kwargs.clone()),
        Value::Function(f) => f.call(args, kwargs),
        Value::BoundMethod(method) => method.call(args, kwargs),
        Value::Class(class) => instantiate(class, args, kwargs),
        Value::ExceptionType(kind) => {
            let message = args.first().map(|v| v.to_string()).unwrap_or_default();
            Ok(Value::Exception(kind.instance(message)))
        }
        Value::Object(object) => match object.class().lookup("__call__") {
            Some((_, Value::Function(f))) => {
                BoundMethod::new(Value::Object(object.clone()), f).call(args, kwargs)
            }
            _ => Err(not_callable(callee)),
        },
        _ => Err(not_callable(callee)),
    }
}

fn not_callable(value: &Value) -> StandinError {
    StandinError::Type(format!("'{}' object is not callable", type_of(value).name()))
}

fn instantiate(class: &Class, args: &[Value], kwargs: &Kwargs) -> Result<Value, StandinError> {
    if class.is_builtin() {
        return Err(StandinError::Type(format!(
            "cannot create '{}' instances",
            class.name()
        )));
    }
    let instance = Value::Object(Object::new(class));
    match class.lookup("__init__") {
        Some((_, Value::Function(init))) => {
            BoundMethod::new(instance.clone(), init).call(args, kwargs)?;
        }
        _ if !args.is_empty() || !kwargs.is_empty() => {
            return Err(StandinError::Signature(format!(
                "{}() takes no arguments",
                class.name()
            )))
        }
        _ => {}
    }
    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{args, kwargs};

    #[test]
    fn parse_reads_required_defaults_and_collectors() {
        let sig = Signature::parse("self, a, b=None, c='x', *rest, **options").expect("parse");
        assert_eq!(sig.params().len(), 4);
        assert!(!sig.params()[1].has_default());
        assert_eq!(sig.params()[3].default, Some(Value::from("x")));
        assert_eq!(sig.varargs(), Some("rest"));
        assert_eq!(sig.varkw(), Some("options"));
        assert_eq!(sig.render(), "(self, a, b=None, c='x', *rest, **options)");
    }

    #[test]
    fn quoted_defaults_may_contain_separators() {
        let sig = Signature::parse("text, sep=',', end='=', pad=\"a, b\"").expect("parse");
        assert_eq!(sig.params().len(), 4);
        assert_eq!(sig.params()[1].default, Some(Value::from(",")));
        assert_eq!(sig.params()[2].default, Some(Value::from("=")));
        assert_eq!(sig.params()[3].default, Some(Value::from("a, b")));
        assert!(Signature::parse("a='open").is_err());
    }

    #[test]
    fn parameters_after_a_star_are_keyword_only() {
        let sig = Signature::parse("a, *, strict, level=1").expect("parse");
        assert_eq!(sig.params().len(), 1);
        assert_eq!(sig.keyword_only_params().len(), 2);
        assert_eq!(sig.render(), "(a, *, strict, level=1)");

        let (args, kwargs) = sig
            .normalize("f", &args![1], &kwargs! {"strict" => true})
            .expect("bind");
        assert_eq!(args, args![1]);
        assert_eq!(kwargs, kwargs! {"strict" => true, "level" => 1});

        let positional = sig.bind("f", &args![1, true], &kwargs! {}).expect_err("arity");
        assert_eq!(
            positional.to_string(),
            "f() takes 1 positional argument but 2 were given"
        );
        let missing = sig.bind("f", &args![1], &kwargs! {}).expect_err("missing");
        assert_eq!(
            missing.to_string(),
            "f() missing 1 required keyword-only argument: 'strict'"
        );

        let collected = Signature::parse("*items, sep=' '").expect("parse");
        let bound = collected.bind("join", &args!["a", "b"], &kwargs! {}).expect("bind");
        assert_eq!(bound.extra_args, args!["a", "b"]);
        assert_eq!(bound.get("sep"), Some(&Value::from(" ")));
    }

    #[test]
    fn parse_rejects_required_after_default() {
        let err = Signature::parse("a=1, b").expect_err("must fail");
        assert!(matches!(err, StandinError::Signature(_)));
    }

    #[test]
    fn bind_reports_each_kind_of_mismatch() {
        let sig = Signature::parse("a, b").expect("parse");
        let too_many = sig.bind("f", &args![1, 2, 3], &kwargs! {}).expect_err("arity");
        assert_eq!(
            too_many.to_string(),
            "f() takes 2 positional arguments but 3 were given"
        );
        let missing = sig.bind("f", &args![1], &kwargs! {}).expect_err("missing");
        assert_eq!(
            missing.to_string(),
            "f() missing 1 required positional argument: 'b'"
        );
        let unexpected = sig
            .bind("f", &args![1, 2], &kwargs! {"c" => 3})
            .expect_err("unexpected");
        assert_eq!(
            unexpected.to_string(),
            "f() got an unexpected keyword argument 'c'"
        );
        let duplicate = sig
            .bind("f", &args![1, 2], &kwargs! {"a" => 3})
            .expect_err("duplicate");
        assert_eq!(
            duplicate.to_string(),
            "f() got multiple values for argument 'a'"
        );
    }

    #[test]
    fn normalize_fills_defaults_and_moves_keywords_into_position() {
        let sig = Signature::parse("a=None, *args, **kw").expect("parse");
        let (args, kwargs) = sig
            .normalize("f", &args![], &kwargs! {"z" => 1})
            .expect("bind");
        assert_eq!(args, args![()]);
        assert_eq!(kwargs, kwargs! {"z" => 1});

        let (args, _) = sig
            .normalize("f", &args![], &kwargs! {"a" => 5})
            .expect("bind");
        assert_eq!(args, args![5]);
    }

    #[test]
    fn bound_method_drops_the_receiver() {
        let f = Function::new(
            "m",
            Signature::parse("self, x").expect("parse"),
            |args, _| Ok(args[1].clone()),
        );
        let bound = BoundMethod::new(Value::Int(0), f);
        assert_eq!(bound.signature().render(), "(x)");
        assert_eq!(bound.call(&args![7], &kwargs! {}).expect("call"), Value::Int(7));
    }
}
