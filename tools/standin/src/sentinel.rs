//! Process-wide registry of named, identity-stable marker values.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Name of the sentinel that means "no override, use the default behaviour".
pub const DEFAULT_NAME: &str = "DEFAULT";

#[derive(Clone)]
pub struct Sentinel(Arc<str>);

impl Sentinel {
    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn repr(&self) -> String {
        format!("<SentinelObject \"{}\">", self.0)
    }

    pub(crate) fn address(&self) -> usize {
        Arc::as_ptr(&self.0) as *const u8 as usize
    }
}

impl PartialEq for Sentinel {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Sentinel {}

impl fmt::Debug for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl fmt::Display for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

static SENTINELS: OnceLock<Mutex<HashMap<String, Sentinel>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, Sentinel>> {
    SENTINELS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns the sentinel for `name`, creating it on first use.
pub fn sentinel(name: &str) -> Sentinel {
    let mut sentinels = registry().lock().unwrap_or_else(PoisonError::into_inner);
    sentinels
        .entry(name.to_string())
        .or_insert_with(|| Sentinel(Arc::from(name)))
        .clone()
}

/// The "fall through to the default behaviour" marker.
pub fn default_sentinel() -> Sentinel {
    sentinel(DEFAULT_NAME)
}

pub(crate) fn is_default(value: &crate::value::Value) -> bool {
    matches!(value, crate::value::Value::Sentinel(s) if s.name() == DEFAULT_NAME && *s == default_sentinel())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_yields_same_object() {
        let first = sentinel("whatever");
        let second = sentinel("whatever");
        assert_eq!(first, second);
        assert_eq!(first.address(), second.address());
    }

    #[test]
    fn distinct_names_are_unequal() {
        assert_ne!(sentinel("whatever"), sentinel("whatever_else"));
    }

    #[test]
    fn repr_embeds_the_name() {
        assert_eq!(sentinel("whatever").repr(), "<SentinelObject \"whatever\">");
    }

    #[test]
    fn default_is_the_registered_default_sentinel() {
        assert_eq!(default_sentinel(), sentinel("DEFAULT"));
        assert!(is_default(&crate::value::Value::Sentinel(sentinel("DEFAULT"))));
        assert!(!is_default(&crate::value::Value::Sentinel(sentinel("other"))));
    }
}
