//! Protocol operations (indexing, iteration, comparison, arithmetic, the
//! scoped-resource protocol) applied to any [`Value`].
//!
//! Each operation consults the operand's own magic table first (proxies),
//! then a dunder method on the class (plain objects), then the primitive
//! behaviour.

use crate::errors::{ExceptionType, StandinError};
use crate::function::BoundMethod;
use crate::mock::magic::{Magic, NumericOp, Operand};
use crate::object::type_of;
use crate::value::{Kwargs, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn magic(self) -> Magic {
        match self {
            Comparison::Lt => Magic::Lt,
            Comparison::Le => Magic::Le,
            Comparison::Gt => Magic::Gt,
            Comparison::Ge => Magic::Ge,
        }
    }

    fn reflected(self) -> Comparison {
        match self {
            Comparison::Lt => Comparison::Gt,
            Comparison::Le => Comparison::Ge,
            Comparison::Gt => Comparison::Lt,
            Comparison::Ge => Comparison::Le,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        }
    }

    fn holds(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::{Greater, Less};
        match self {
            Comparison::Lt => ordering == Less,
            Comparison::Le => ordering != Greater,
            Comparison::Gt => ordering == Greater,
            Comparison::Ge => ordering != Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Abs,
    Invert,
}

impl UnaryOp {
    fn magic(self) -> Magic {
        match self {
            UnaryOp::Neg => Magic::Neg,
            UnaryOp::Pos => Magic::Pos,
            UnaryOp::Abs => Magic::Abs,
            UnaryOp::Invert => Magic::Invert,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "unary -",
            UnaryOp::Pos => "unary +",
            UnaryOp::Abs => "abs()",
            UnaryOp::Invert => "unary ~",
        }
    }
}

/// Integer rounding toward zero, down, or up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Trunc,
    Floor,
    Ceil,
}

impl Rounding {
    fn magic(self) -> Magic {
        match self {
            Rounding::Trunc => Magic::Trunc,
            Rounding::Floor => Magic::Floor,
            Rounding::Ceil => Magic::Ceil,
        }
    }

    fn apply(self, f: f64) -> f64 {
        match self {
            Rounding::Trunc => f.trunc(),
            Rounding::Floor => f.floor(),
            Rounding::Ceil => f.ceil(),
        }
    }
}

/// Upper bound on the size of a repeated string.
const MAX_REPEAT_BYTES: usize = 1 << 30;

fn type_name(value: &Value) -> String {
    type_of(value).name().to_string()
}

fn raise(kind: &str, message: impl Into<String>) -> StandinError {
    StandinError::Raised(ExceptionType::ordinary(kind).instance(message))
}

/// Runs the operand's own override for `magic`, if it has one.
fn dispatch(target: &Value, magic: Magic, operands: &[Value]) -> Option<Result<Value, StandinError>> {
    match target {
        Value::Mock(mock) => mock.invoke_magic(magic, operands),
        Value::Object(object) => match object.class().lookup(&magic.name()) {
            Some((_, Value::Function(function))) => {
                Some(BoundMethod::new(target.clone(), function).call(operands, &Kwargs::new()))
            }
            _ => None,
        },
        _ => None,
    }
}

fn supports(target: &Value, magic: Magic) -> bool {
    match target {
        Value::Mock(mock) => mock.has_magic(magic),
        Value::Object(object) => object.class().lookup(&magic.name()).is_some(),
        _ => false,
    }
}

fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { index + len } else { index };
    (0..len).contains(&resolved).then(|| resolved as usize)
}

pub fn get_item(target: &Value, key: &Value) -> Result<Value, StandinError> {
    if let Some(result) = dispatch(target, Magic::GetItem, std::slice::from_ref(key)) {
        return result;
    }
    match target {
        Value::Tuple(items) => {
            let index = to_index(key)?;
            normalize_index(index, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| StandinError::Index("tuple index out of range".to_string()))
        }
        Value::Str(text) => {
            let chars = text.chars().collect::<Vec<_>>();
            let index = to_index(key)?;
            normalize_index(index, chars.len())
                .map(|i| Value::Str(chars[i].to_string()))
                .ok_or_else(|| StandinError::Index("string index out of range".to_string()))
        }
        Value::Dict(dict) => dict
            .get(key)
            .ok_or_else(|| StandinError::Key(key.repr())),
        other => Err(StandinError::Type(format!(
            "'{}' object is not subscriptable",
            type_name(other)
        ))),
    }
}

pub fn set_item(target: &Value, key: &Value, value: Value) -> Result<(), StandinError> {
    if let Some(result) = dispatch(target, Magic::SetItem, &[key.clone(), value.clone()]) {
        return result.map(|_| ());
    }
    match target {
        Value::Dict(dict) => {
            dict.insert(key.clone(), value);
            Ok(())
        }
        other => Err(StandinError::Type(format!(
            "'{}' object does not support item assignment",
            type_name(other)
        ))),
    }
}

pub fn del_item(target: &Value, key: &Value) -> Result<(), StandinError> {
    if let Some(result) = dispatch(target, Magic::DelItem, std::slice::from_ref(key)) {
        return result.map(|_| ());
    }
    match target {
        Value::Dict(dict) => dict
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StandinError::Key(key.repr())),
        other => Err(StandinError::Type(format!(
            "'{}' object doesn't support item deletion",
            type_name(other)
        ))),
    }
}

pub fn len(target: &Value) -> Result<usize, StandinError> {
    if let Some(result) = dispatch(target, Magic::Len, &[]) {
        let value = result?;
        let n = value.as_int().ok_or_else(|| {
            StandinError::Type(format!(
                "'{}' object cannot be interpreted as an integer",
                type_name(&value)
            ))
        })?;
        return usize::try_from(n)
            .map_err(|_| raise("ValueError", "__len__() should return >= 0"));
    }
    match target {
        Value::Str(text) => Ok(text.chars().count()),
        Value::Tuple(items) => Ok(items.len()),
        Value::Dict(dict) => Ok(dict.len()),
        other => Err(StandinError::Type(format!(
            "object of type '{}' has no len()",
            type_name(other)
        ))),
    }
}

pub fn contains(container: &Value, item: &Value) -> Result<bool, StandinError> {
    if let Some(result) = dispatch(container, Magic::Contains, std::slice::from_ref(item)) {
        return truthy(&result?);
    }
    match container {
        Value::Tuple(items) => Ok(items.iter().any(|candidate| candidate == item)),
        Value::Dict(dict) => Ok(dict.contains_key(item)),
        Value::Str(text) => match item {
            Value::Str(needle) => Ok(text.contains(needle.as_str())),
            other => Err(StandinError::Type(format!(
                "'in <string>' requires string as left operand, not {}",
                type_name(other)
            ))),
        },
        other if supports(other, Magic::Iter) => {
            Ok(iterate(other)?.iter().any(|candidate| candidate == item))
        }
        other => Err(StandinError::Type(format!(
            "argument of type '{}' is not iterable",
            type_name(other)
        ))),
    }
}

fn primitive_items(value: &Value) -> Option<Vec<Value>> {
    match value {
        Value::Tuple(items) => Some(items.clone()),
        Value::Dict(dict) => Some(dict.keys()),
        Value::Str(text) => Some(text.chars().map(|c| Value::Str(c.to_string())).collect()),
        _ => None,
    }
}

/// Materializes the iteration sequence of `target`.
pub fn iterate(target: &Value) -> Result<Vec<Value>, StandinError> {
    if let Some(result) = dispatch(target, Magic::Iter, &[]) {
        let produced = result?;
        return primitive_items(&produced).ok_or_else(|| {
            StandinError::Type(format!(
                "iter() returned non-iterator of type '{}'",
                type_name(&produced)
            ))
        });
    }
    primitive_items(target).ok_or_else(|| {
        StandinError::Type(format!("'{}' object is not iterable", type_name(target)))
    })
}

fn string_hash(text: &str) -> i64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish() as i64
}

pub fn hash(target: &Value) -> Result<i64, StandinError> {
    if let Some(result) = dispatch(target, Magic::Hash, &[]) {
        let value = result?;
        return value.as_int().ok_or_else(|| {
            StandinError::Type("__hash__ method should return an integer".to_string())
        });
    }
    match target {
        Value::None => Ok(0),
        Value::Bool(_) | Value::Int(_) => Ok(target.as_int().unwrap_or_default()),
        Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(*f as i64),
        Value::Float(f) => Ok(f.to_bits() as i64),
        Value::Str(text) => Ok(string_hash(text)),
        Value::Tuple(items) => {
            let mut acc: i64 = 0x345678;
            for item in items {
                acc = acc.wrapping_mul(1_000_003) ^ hash(item)?;
            }
            Ok(acc)
        }
        Value::Dict(_) => Err(StandinError::Type("unhashable type: 'dict'".to_string())),
        Value::Mock(mock) => Ok(mock.identity_hash()),
        other => Ok(other
            .identity()
            .map_or_else(|| string_hash(&other.repr()), |address| (address >> 4) as i64)),
    }
}

pub fn repr(target: &Value) -> Result<String, StandinError> {
    if let Some(result) = dispatch(target, Magic::Repr, &[]) {
        return match result? {
            Value::Str(text) => Ok(text),
            other => Err(StandinError::Type(format!(
                "__repr__ returned non-string (type {})",
                type_name(&other)
            ))),
        };
    }
    Ok(target.repr())
}

pub fn to_str(target: &Value) -> Result<String, StandinError> {
    if let Some(result) = dispatch(target, Magic::Str, &[]) {
        return match result? {
            Value::Str(text) => Ok(text),
            other => Err(StandinError::Type(format!(
                "__str__ returned non-string (type {})",
                type_name(&other)
            ))),
        };
    }
    match target {
        Value::Str(text) => Ok(text.clone()),
        Value::Exception(exception) => Ok(exception.message().to_string()),
        other => repr(other),
    }
}

/// Truth value: `__bool__`, then `__len__`, then the primitive rule.
pub fn truthy(target: &Value) -> Result<bool, StandinError> {
    if let Some(result) = dispatch(target, Magic::Bool, &[]) {
        return match result? {
            Value::Bool(flag) => Ok(flag),
            other => Err(StandinError::Type(format!(
                "__bool__ should return bool, returned {}",
                type_name(&other)
            ))),
        };
    }
    if supports(target, Magic::Len) {
        return Ok(len(target)? != 0);
    }
    Ok(match target {
        Value::None => false,
        Value::Bool(flag) => *flag,
        Value::Int(n) => *n != 0,
        Value::Float(f) => *f != 0.0,
        Value::Str(text) => !text.is_empty(),
        Value::Tuple(items) => !items.is_empty(),
        Value::Dict(dict) => !dict.is_empty(),
        _ => true,
    })
}

fn primitive_order(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Tuple(a), Value::Tuple(b)) => {
            for (x, y) in a.iter().zip(b) {
                if x != y {
                    return primitive_order(x, y);
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => match (left.as_float(), right.as_float()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    }
}

/// Ordering comparison with reflected fallback.
pub fn compare(left: &Value, op: Comparison, right: &Value) -> Result<Value, StandinError> {
    if let Some(result) = dispatch(left, op.magic(), std::slice::from_ref(right)) {
        let value = result?;
        if !value.is_not_implemented() {
            return Ok(value);
        }
    }
    if let Some(result) = dispatch(right, op.reflected().magic(), std::slice::from_ref(left)) {
        let value = result?;
        if !value.is_not_implemented() {
            return Ok(value);
        }
    }
    primitive_order(left, right)
        .map(|ordering| Value::Bool(op.holds(ordering)))
        .ok_or_else(|| {
            StandinError::Type(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                op.symbol(),
                type_name(left),
                type_name(right)
            ))
        })
}

fn rich_equality(left: &Value, right: &Value, magic: Magic) -> Result<Option<Value>, StandinError> {
    for (target, other) in [(left, right), (right, left)] {
        if let Some(result) = dispatch(target, magic, std::slice::from_ref(other)) {
            let value = result?;
            if !value.is_not_implemented() {
                return Ok(Some(value));
            }
        }
    }
    Ok(None)
}

/// `==`: overrides on either side, then value equality (identity for
/// reference kinds).
pub fn equals(left: &Value, right: &Value) -> Result<Value, StandinError> {
    Ok(rich_equality(left, right, Magic::Eq)?.unwrap_or(Value::Bool(left == right)))
}

pub fn not_equals(left: &Value, right: &Value) -> Result<Value, StandinError> {
    if let Some(value) = rich_equality(left, right, Magic::Ne)? {
        return Ok(value);
    }
    Ok(Value::Bool(!truthy(&equals(left, right)?)?))
}

fn zero_division() -> StandinError {
    raise("ZeroDivisionError", "division by zero")
}

fn overflow() -> StandinError {
    raise("OverflowError", "integer overflow")
}

fn int_binary(op: NumericOp, a: i64, b: i64) -> Result<Value, StandinError> {
    let checked = |value: Option<i64>| value.map(Value::Int).ok_or_else(overflow);
    match op {
        NumericOp::Add => checked(a.checked_add(b)),
        NumericOp::Sub => checked(a.checked_sub(b)),
        NumericOp::Mul => checked(a.checked_mul(b)),
        NumericOp::TrueDiv if b == 0 => Err(zero_division()),
        NumericOp::TrueDiv => Ok(Value::Float(a as f64 / b as f64)),
        NumericOp::FloorDiv | NumericOp::Mod if b == 0 => Err(zero_division()),
        NumericOp::FloorDiv => {
            let quotient = a.checked_div(b).ok_or_else(overflow)?;
            let adjust = a % b != 0 && ((a < 0) != (b < 0));
            Ok(Value::Int(if adjust { quotient - 1 } else { quotient }))
        }
        NumericOp::Mod if b == -1 => Ok(Value::Int(0)),
        NumericOp::Mod => {
            let remainder = a.checked_rem(b).ok_or_else(overflow)?;
            let adjust = remainder != 0 && ((remainder < 0) != (b < 0));
            Ok(Value::Int(if adjust { remainder + b } else { remainder }))
        }
        NumericOp::Pow if b < 0 => Ok(Value::Float((a as f64).powf(b as f64))),
        NumericOp::Pow => {
            let exponent = u32::try_from(b).map_err(|_| overflow())?;
            checked(a.checked_pow(exponent))
        }
        NumericOp::LShift | NumericOp::RShift if b < 0 => {
            Err(raise("ValueError", "negative shift count"))
        }
        NumericOp::LShift => {
            let shift = u32::try_from(b).map_err(|_| overflow())?;
            let shifted = a.checked_shl(shift).ok_or_else(overflow)?;
            if shifted >> shift != a {
                return Err(overflow());
            }
            Ok(Value::Int(shifted))
        }
        NumericOp::RShift => Ok(Value::Int(a >> b.min(63))),
        NumericOp::And => Ok(Value::Int(a & b)),
        NumericOp::Xor => Ok(Value::Int(a ^ b)),
        NumericOp::Or => Ok(Value::Int(a | b)),
    }
}

fn float_binary(op: NumericOp, a: f64, b: f64) -> Option<Result<Value, StandinError>> {
    let result = match op {
        NumericOp::Add => Ok(a + b),
        NumericOp::Sub => Ok(a - b),
        NumericOp::Mul => Ok(a * b),
        NumericOp::TrueDiv | NumericOp::FloorDiv | NumericOp::Mod if b == 0.0 => {
            Err(zero_division())
        }
        NumericOp::TrueDiv => Ok(a / b),
        NumericOp::FloorDiv => Ok((a / b).floor()),
        NumericOp::Mod => Ok(a - b * (a / b).floor()),
        NumericOp::Pow => Ok(a.powf(b)),
        _ => return None,
    };
    Some(result.map(Value::Float))
}

fn primitive_binary(op: NumericOp, left: &Value, right: &Value) -> Option<Result<Value, StandinError>> {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) if matches!(op, NumericOp::And | NumericOp::Or | NumericOp::Xor) => {
            Some(Ok(Value::Bool(match op {
                NumericOp::And => *a & *b,
                NumericOp::Or => *a | *b,
                _ => *a ^ *b,
            })))
        }
        (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
            let (a, b) = (left.as_int()?, right.as_int()?);
            Some(int_binary(op, a, b))
        }
        (Value::Float(_) | Value::Int(_) | Value::Bool(_), Value::Float(_) | Value::Int(_) | Value::Bool(_)) => {
            float_binary(op, left.as_float()?, right.as_float()?)
        }
        (Value::Str(a), Value::Str(b)) if op == NumericOp::Add => Some(Ok(Value::Str(format!("{a}{b}")))),
        (Value::Str(text), Value::Int(n)) | (Value::Int(n), Value::Str(text)) if op == NumericOp::Mul => {
            Some(repeat_text(text, *n))
        }
        (Value::Tuple(a), Value::Tuple(b)) if op == NumericOp::Add => {
            Some(Ok(Value::Tuple(a.iter().chain(b).cloned().collect())))
        }
        _ => None,
    }
}

fn repeat_text(text: &str, count: i64) -> Result<Value, StandinError> {
    let count = usize::try_from(count).unwrap_or(0);
    match text.len().checked_mul(count) {
        Some(total) if total <= MAX_REPEAT_BYTES => Ok(Value::Str(text.repeat(count))),
        _ => Err(raise("MemoryError", "repeated string is too large")),
    }
}

/// Binary arithmetic: forward override, reflected override, primitives.
pub fn binary(left: &Value, op: NumericOp, right: &Value) -> Result<Value, StandinError> {
    if let Some(result) = dispatch(left, Magic::Numeric(op, Operand::Forward), std::slice::from_ref(right)) {
        let value = result?;
        if !value.is_not_implemented() {
            return Ok(value);
        }
    }
    if let Some(result) = dispatch(right, Magic::Numeric(op, Operand::Reflected), std::slice::from_ref(left)) {
        let value = result?;
        if !value.is_not_implemented() {
            return Ok(value);
        }
    }
    primitive_binary(op, left, right).unwrap_or_else(|| {
        Err(StandinError::Type(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            type_name(left),
            type_name(right)
        )))
    })
}

/// Augmented assignment: the in-place override, else [`binary`].
pub fn inplace(left: &Value, op: NumericOp, right: &Value) -> Result<Value, StandinError> {
    if let Some(result) = dispatch(left, Magic::Numeric(op, Operand::InPlace), std::slice::from_ref(right)) {
        let value = result?;
        if !value.is_not_implemented() {
            return Ok(value);
        }
    }
    binary(left, op, right)
}

pub fn divmod(left: &Value, right: &Value) -> Result<Value, StandinError> {
    if let Some(result) = dispatch(left, Magic::DivMod, std::slice::from_ref(right)) {
        return result;
    }
    let quotient = binary(left, NumericOp::FloorDiv, right)?;
    let remainder = binary(left, NumericOp::Mod, right)?;
    Ok(Value::Tuple(vec![quotient, remainder]))
}

pub fn unary(op: UnaryOp, target: &Value) -> Result<Value, StandinError> {
    if let Some(result) = dispatch(target, op.magic(), &[]) {
        return result;
    }
    let unsupported = || {
        StandinError::Type(format!(
            "bad operand type for {}: '{}'",
            op.symbol(),
            type_name(target)
        ))
    };
    match target {
        Value::Int(_) | Value::Bool(_) => {
            let n = target.as_int().unwrap_or_default();
            match op {
                UnaryOp::Neg => n.checked_neg().map(Value::Int).ok_or_else(overflow),
                UnaryOp::Pos => Ok(Value::Int(n)),
                UnaryOp::Abs => n.checked_abs().map(Value::Int).ok_or_else(overflow),
                UnaryOp::Invert => Ok(Value::Int(!n)),
            }
        }
        Value::Float(f) => match op {
            UnaryOp::Neg => Ok(Value::Float(-f)),
            UnaryOp::Pos => Ok(Value::Float(*f)),
            UnaryOp::Abs => Ok(Value::Float(f.abs())),
            UnaryOp::Invert => Err(unsupported()),
        },
        _ => Err(unsupported()),
    }
}

pub fn to_int(target: &Value) -> Result<i64, StandinError> {
    if let Some(result) = dispatch(target, Magic::Int, &[]) {
        let value = result?;
        return value.as_int().ok_or_else(|| {
            StandinError::Type(format!(
                "__int__ returned non-int (type {})",
                type_name(&value)
            ))
        });
    }
    match target {
        Value::Int(_) | Value::Bool(_) => Ok(target.as_int().unwrap_or_default()),
        Value::Float(f) if f.is_finite() => Ok(f.trunc() as i64),
        Value::Float(_) => Err(raise("OverflowError", "cannot convert float infinity or NaN to integer")),
        Value::Str(text) => text.trim().parse::<i64>().map_err(|_| {
            raise(
                "ValueError",
                format!("invalid literal for int() with base 10: {}", target.repr()),
            )
        }),
        other => Err(StandinError::Type(format!(
            "int() argument must be a string, a bytes-like object or a real number, not '{}'",
            type_name(other)
        ))),
    }
}

pub fn to_float(target: &Value) -> Result<f64, StandinError> {
    if let Some(result) = dispatch(target, Magic::Float, &[]) {
        return match result? {
            Value::Float(f) => Ok(f),
            other => Err(StandinError::Type(format!(
                "__float__ returned non-float (type {})",
                type_name(&other)
            ))),
        };
    }
    match target {
        Value::Str(text) => text.trim().parse::<f64>().map_err(|_| {
            raise(
                "ValueError",
                format!("could not convert string to float: {}", target.repr()),
            )
        }),
        other => other.as_float().ok_or_else(|| {
            StandinError::Type(format!(
                "float() argument must be a string or a real number, not '{}'",
                type_name(other)
            ))
        }),
    }
}

pub fn to_index(target: &Value) -> Result<i64, StandinError> {
    let not_an_index = |value: &Value| {
        StandinError::Type(format!(
            "'{}' object cannot be interpreted as an integer",
            type_name(value)
        ))
    };
    if let Some(result) = dispatch(target, Magic::Index, &[]) {
        return match result? {
            Value::Int(n) => Ok(n),
            other => Err(not_an_index(&other)),
        };
    }
    target.as_int().ok_or_else(|| not_an_index(target))
}

/// `trunc()`, `floor()` and `ceil()`: the override, else the numeric rule.
pub fn round_to_int(op: Rounding, target: &Value) -> Result<Value, StandinError> {
    if let Some(result) = dispatch(target, op.magic(), &[]) {
        return result;
    }
    match target {
        Value::Int(_) | Value::Bool(_) => Ok(Value::Int(target.as_int().unwrap_or_default())),
        Value::Float(f) if f.is_nan() => Err(raise(
            "ValueError",
            "cannot convert float NaN to integer",
        )),
        Value::Float(f) => {
            let rounded = op.apply(*f);
            if rounded.is_finite() && rounded >= i64::MIN as f64 && rounded < i64::MAX as f64 {
                Ok(Value::Int(rounded as i64))
            } else {
                Err(raise("OverflowError", "cannot convert float infinity to integer"))
            }
        }
        other => Err(StandinError::Type(format!(
            "type {} doesn't define {} method",
            type_name(other),
            op.magic().name()
        ))),
    }
}

/// Advances an iterator through `__next__`.
pub fn next(target: &Value) -> Result<Value, StandinError> {
    dispatch(target, Magic::Next, &[]).unwrap_or_else(|| {
        Err(StandinError::Type(format!(
            "'{}' object is not an iterator",
            type_name(target)
        )))
    })
}

/// Reverse iteration: `__reversed__`, else the sequence protocol.
pub fn reversed(target: &Value) -> Result<Vec<Value>, StandinError> {
    if let Some(result) = dispatch(target, Magic::Reversed, &[]) {
        let produced = result?;
        return primitive_items(&produced).ok_or_else(|| {
            StandinError::Type(format!(
                "'{}' object is not iterable",
                type_name(&produced)
            ))
        });
    }
    match target {
        Value::Tuple(_) | Value::Str(_) => {
            let mut items = primitive_items(target).unwrap_or_default();
            items.reverse();
            Ok(items)
        }
        other if supports(other, Magic::Len) && supports(other, Magic::GetItem) => {
            let count = len(other)?;
            (0..count)
                .rev()
                .map(|index| get_item(other, &Value::from(index)))
                .collect()
        }
        other => Err(StandinError::Type(format!(
            "'{}' object is not reversible",
            type_name(other)
        ))),
    }
}

pub fn size_of(target: &Value) -> Result<i64, StandinError> {
    if let Some(result) = dispatch(target, Magic::SizeOf, &[]) {
        let value = result?;
        return value.as_int().ok_or_else(|| {
            StandinError::Type("an integer is required".to_string())
        });
    }
    let base = i64::try_from(std::mem::size_of::<Value>()).unwrap_or(i64::MAX);
    Ok(match target {
        Value::Str(text) => base + i64::try_from(text.len()).unwrap_or(0),
        Value::Tuple(items) => base * (1 + i64::try_from(items.len()).unwrap_or(0)),
        _ => base,
    })
}

fn not_a_context_manager(target: &Value) -> StandinError {
    StandinError::Type(format!(
        "'{}' object does not support the context manager protocol",
        type_name(target)
    ))
}

pub fn enter(manager: &Value) -> Result<Value, StandinError> {
    dispatch(manager, Magic::Enter, &[]).unwrap_or_else(|| Err(not_a_context_manager(manager)))
}

/// Calls the exit hook with the error that ended the block, if any.
/// Returns whether the hook asked for the error to be suppressed.
pub fn exit(manager: &Value, error: Option<&StandinError>) -> Result<bool, StandinError> {
    let operands = match error {
        Some(err) => {
            let exception = err.to_exception();
            vec![
                Value::ExceptionType(exception.kind().clone()),
                Value::Exception(exception),
                Value::None,
            ]
        }
        None => vec![Value::None, Value::None, Value::None],
    };
    match dispatch(manager, Magic::Exit, &operands) {
        Some(result) => truthy(&result?),
        None => Err(not_a_context_manager(manager)),
    }
}

/// Runs `body` inside the scoped-resource protocol of `manager`.
///
/// Returns `Ok(None)` when the body failed and the exit hook suppressed the
/// error.
pub fn with_context<T>(
    manager: &Value,
    body: impl FnOnce(Value) -> Result<T, StandinError>,
) -> Result<Option<T>, StandinError> {
    if !supports(manager, Magic::Exit) {
        return Err(not_a_context_manager(manager));
    }
    let entered = enter(manager)?;
    match body(entered) {
        Ok(value) => {
            exit(manager, None)?;
            Ok(Some(value))
        }
        Err(err) => {
            if exit(manager, Some(&err))? {
                Ok(None)
            } else {
                Err(err)
            }
        }
    }
}
