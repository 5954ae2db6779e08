//! The magic-method table: which protocol operations a proxy can emulate,
//! their dunder names, and the defaults the rich variant starts with.

use super::{Mock, WeakMock};
use crate::function::Function;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NumericOp {
    Add,
    Sub,
    Mul,
    TrueDiv,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    And,
    Xor,
    Or,
}

impl NumericOp {
    pub const ALL: [NumericOp; 12] = [
        NumericOp::Add,
        NumericOp::Sub,
        NumericOp::Mul,
        NumericOp::TrueDiv,
        NumericOp::FloorDiv,
        NumericOp::Mod,
        NumericOp::Pow,
        NumericOp::LShift,
        NumericOp::RShift,
        NumericOp::And,
        NumericOp::Xor,
        NumericOp::Or,
    ];

    pub fn stem(self) -> &'static str {
        match self {
            NumericOp::Add => "add",
            NumericOp::Sub => "sub",
            NumericOp::Mul => "mul",
            NumericOp::TrueDiv => "truediv",
            NumericOp::FloorDiv => "floordiv",
            NumericOp::Mod => "mod",
            NumericOp::Pow => "pow",
            NumericOp::LShift => "lshift",
            NumericOp::RShift => "rshift",
            NumericOp::And => "and",
            NumericOp::Xor => "xor",
            NumericOp::Or => "or",
        }
    }

    /// Operator symbol used in error messages.
    pub fn symbol(self) -> &'static str {
        match self {
            NumericOp::Add => "+",
            NumericOp::Sub => "-",
            NumericOp::Mul => "*",
            NumericOp::TrueDiv => "/",
            NumericOp::FloorDiv => "//",
            NumericOp::Mod => "%",
            NumericOp::Pow => "**",
            NumericOp::LShift => "<<",
            NumericOp::RShift => ">>",
            NumericOp::And => "&",
            NumericOp::Xor => "^",
            NumericOp::Or => "|",
        }
    }
}

/// Which side of a binary operator a numeric slot serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operand {
    Forward,
    InPlace,
    Reflected,
}

impl Operand {
    fn prefix(self) -> &'static str {
        match self {
            Operand::Forward => "",
            Operand::InPlace => "i",
            Operand::Reflected => "r",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Magic {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    GetItem,
    SetItem,
    DelItem,
    Len,
    Contains,
    Iter,
    Hash,
    Str,
    SizeOf,
    Enter,
    Exit,
    Bool,
    Neg,
    Pos,
    Abs,
    Invert,
    Int,
    Float,
    Index,
    Trunc,
    Floor,
    Ceil,
    Next,
    DivMod,
    Numeric(NumericOp, Operand),
    Repr,
    Reversed,
}

const SIMPLE: [Magic; 32] = [
    Magic::Lt,
    Magic::Le,
    Magic::Gt,
    Magic::Ge,
    Magic::Eq,
    Magic::Ne,
    Magic::GetItem,
    Magic::SetItem,
    Magic::DelItem,
    Magic::Len,
    Magic::Contains,
    Magic::Iter,
    Magic::Hash,
    Magic::Str,
    Magic::SizeOf,
    Magic::Enter,
    Magic::Exit,
    Magic::Bool,
    Magic::Neg,
    Magic::Pos,
    Magic::Abs,
    Magic::Invert,
    Magic::Int,
    Magic::Float,
    Magic::Index,
    Magic::Trunc,
    Magic::Floor,
    Magic::Ceil,
    Magic::Next,
    Magic::DivMod,
    Magic::Repr,
    Magic::Reversed,
];

/// Names that can never be installed on a proxy.
pub const UNSUPPORTED: [&str; 8] = [
    "__getattr__",
    "__setattr__",
    "__init__",
    "__new__",
    "__prepare__",
    "__instancecheck__",
    "__subclasscheck__",
    "__del__",
];

impl Magic {
    pub fn name(self) -> String {
        match self {
            Magic::Numeric(op, side) => format!("__{}{}__", side.prefix(), op.stem()),
            other => format!("__{}__", other.stem()),
        }
    }

    fn stem(self) -> &'static str {
        match self {
            Magic::Lt => "lt",
            Magic::Le => "le",
            Magic::Gt => "gt",
            Magic::Ge => "ge",
            Magic::Eq => "eq",
            Magic::Ne => "ne",
            Magic::GetItem => "getitem",
            Magic::SetItem => "setitem",
            Magic::DelItem => "delitem",
            Magic::Len => "len",
            Magic::Contains => "contains",
            Magic::Iter => "iter",
            Magic::Hash => "hash",
            Magic::Str => "str",
            Magic::SizeOf => "sizeof",
            Magic::Enter => "enter",
            Magic::Exit => "exit",
            Magic::Bool => "bool",
            Magic::Neg => "neg",
            Magic::Pos => "pos",
            Magic::Abs => "abs",
            Magic::Invert => "invert",
            Magic::Int => "int",
            Magic::Float => "float",
            Magic::Index => "index",
            Magic::Trunc => "trunc",
            Magic::Floor => "floor",
            Magic::Ceil => "ceil",
            Magic::Next => "next",
            Magic::DivMod => "divmod",
            Magic::Repr => "repr",
            Magic::Reversed => "reversed",
            Magic::Numeric(op, _) => op.stem(),
        }
    }

    pub fn from_name(name: &str) -> Option<Magic> {
        let stem = name.strip_prefix("__")?.strip_suffix("__")?;
        if let Some(magic) = SIMPLE.iter().find(|magic| magic.stem() == stem) {
            return Some(*magic);
        }
        for side in [Operand::Forward, Operand::InPlace, Operand::Reflected] {
            let Some(rest) = stem.strip_prefix(side.prefix()) else {
                continue;
            };
            if let Some(op) = NumericOp::ALL.iter().find(|op| op.stem() == rest) {
                return Some(Magic::Numeric(*op, side));
            }
        }
        None
    }

    /// Every operation the rich variant installs at construction time.
    /// `__repr__` and `__reversed__` are settable but never pre-installed.
    pub fn defaults() -> Vec<Magic> {
        let mut all = SIMPLE
            .iter()
            .copied()
            .filter(|magic| !matches!(magic, Magic::Repr | Magic::Reversed))
            .collect::<Vec<_>>();
        for side in [Operand::Forward, Operand::InPlace, Operand::Reflected] {
            all.extend(NumericOp::ALL.iter().map(|op| Magic::Numeric(*op, side)));
        }
        all
    }
}

pub fn is_unsupported(name: &str) -> bool {
    UNSUPPORTED.contains(&name)
}

/// `__name__`-shaped attribute names.
pub fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

/// Per-instance table entry.
#[derive(Clone)]
pub(crate) enum Slot {
    /// Default installed by the rich variant; becomes a mock on first use.
    Lazy,
    Installed(Value),
}

/// Configures a freshly materialized slot mock with the default behaviour
/// for `magic`. Operations without a listed default keep the slot mock's
/// own return value.
pub(crate) fn configure_default(owner: &Mock, slot: &Mock, magic: Magic) {
    let fixed = match magic {
        Magic::Len => Some(Value::Int(0)),
        Magic::Contains | Magic::Exit => Some(Value::Bool(false)),
        Magic::Iter => Some(Value::Tuple(Vec::new())),
        Magic::Bool => Some(Value::Bool(true)),
        Magic::Int | Magic::Index => Some(Value::Int(1)),
        Magic::Float => Some(Value::Float(1.0)),
        Magic::Hash => Some(Value::Int(owner.identity_hash())),
        Magic::Str => Some(Value::Str(owner.default_repr())),
        Magic::SizeOf => Some(Value::Int(super::FIXED_SIZE)),
        Magic::Lt | Magic::Le | Magic::Gt | Magic::Ge => Some(Value::NotImplemented),
        _ => None,
    };
    if let Some(value) = fixed {
        slot.set_return_value(value);
        return;
    }
    match magic {
        Magic::Eq => slot.set_side_effect(identity_comparison(owner.downgrade(), "__eq__", true)),
        Magic::Ne => slot.set_side_effect(identity_comparison(owner.downgrade(), "__ne__", false)),
        _ => {}
    }
}

fn identity_comparison(owner: WeakMock, name: &str, equal: bool) -> Value {
    Value::Function(Function::variadic(name, move |args, _| {
        let same = match (owner.upgrade(), args.first()) {
            (Some(owner), Some(Value::Mock(other))) => owner.ptr_eq(other),
            _ => false,
        };
        Ok(Value::Bool(same == equal))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_the_table() {
        for magic in Magic::defaults() {
            assert_eq!(Magic::from_name(&magic.name()), Some(magic));
        }
        assert_eq!(Magic::from_name("__radd__"), Some(Magic::Numeric(NumericOp::Add, Operand::Reflected)));
        assert_eq!(Magic::from_name("__ior__"), Some(Magic::Numeric(NumericOp::Or, Operand::InPlace)));
        assert_eq!(Magic::from_name("__repr__"), Some(Magic::Repr));
        assert_eq!(Magic::from_name("__next__"), Some(Magic::Next));
        assert_eq!(Magic::from_name("__floor__"), Some(Magic::Floor));
        assert_eq!(Magic::from_name("__frobnicate__"), None);
        assert_eq!(Magic::from_name("len"), None);
    }

    #[test]
    fn repr_and_reversed_are_not_preinstalled() {
        let defaults = Magic::defaults();
        assert!(!defaults.contains(&Magic::Repr));
        assert!(!defaults.contains(&Magic::Reversed));
        assert!(defaults.contains(&Magic::Exit));
    }

    #[test]
    fn dunder_detection() {
        assert!(is_dunder("__foo__"));
        assert!(!is_dunder("____"));
        assert!(!is_dunder("_foo_"));
        assert!(is_unsupported("__getattr__"));
        assert!(!is_unsupported("__len__"));
    }
}
