//! Stack configuration
//!
//! Keys are namespaced as `<provider>:<key>` (e.g. `digitalocean:token`).
//! Secret values are kept in memory only: they are never written to the
//! state file and their `Debug` output is redacted.

use std::collections::BTreeMap;
use std::fmt;

use crate::{Error, Result};

/// A single configuration value.
#[derive(Clone, PartialEq, Eq)]
pub struct ConfigValue {
    value: String,
    secret: bool,
}

impl ConfigValue {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: false,
        }
    }

    pub fn secret(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: true,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_secret(&self) -> bool {
        self.secret
    }
}

impl fmt::Debug for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secret {
            f.write_str("ConfigValue([secret])")
        } else {
            f.debug_tuple("ConfigValue").field(&self.value).finish()
        }
    }
}

/// Configuration attached to a stack.
#[derive(Debug, Clone, Default)]
pub struct StackConfig {
    values: BTreeMap<String, ConfigValue>,
}

impl StackConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value. The key must be namespaced (`namespace:name`).
    pub fn set(&mut self, key: impl Into<String>, value: ConfigValue) -> Result<()> {
        let key = key.into();
        match key.split_once(':') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => {
                self.values.insert(key, value);
                Ok(())
            }
            _ => Err(Error::InvalidConfig(format!(
                "config key {key:?} must be of the form <namespace>:<name>"
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    /// Non-empty value for `key`, or `None`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).map(ConfigValue::value).filter(|v| !v.is_empty())
    }

    /// The values that may be persisted.
    pub fn non_secret(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .filter(|(_, v)| !v.secret)
            .map(|(k, v)| (k.clone(), v.value.clone()))
            .collect()
    }
}
