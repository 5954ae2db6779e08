//! Test doubles and patching for a small dynamic object model.
//!
//! [`Mock`] records every call and grows child proxies on attribute access,
//! [`create_autospec`] shapes a proxy tree after real classes and functions,
//! and [`patch`], [`patch_object`] and [`patch_dict`] swap values in and out
//! of modules, classes, objects and mappings.

pub mod autospec;
pub mod call;
pub mod config;
pub mod errors;
pub mod function;
pub mod logging;
pub mod mock;
pub mod module;
pub mod object;
pub mod patch;
pub mod protocol;
pub mod recording;
pub mod runtime;
pub mod sentinel;
pub mod value;

pub use autospec::{create_autospec, mocksignature, Autospec};
pub use call::{call, call_named, CallRecord};
pub use errors::{Exception, ExceptionType, StandinError};
pub use function::{BoundMethod, Function, Signature};
pub use mock::magic::{Magic, NumericOp, Operand};
pub use mock::{Flavor, Mock, MockBuilder, Spec};
pub use module::{import, register_module, Module};
pub use object::{Class, ClassBuilder, Object};
pub use patch::{
    patch, patch_dict, patch_object, DictPatch, Patch, PatchGuard, PatchStack, Patching, SpecArg,
};
pub use sentinel::{default_sentinel, sentinel, Sentinel};
pub use value::{Dict, Kwargs, Value};

/// Placeholder that compares equal to anything in call assertions.
pub const ANY: Value = Value::Any;
