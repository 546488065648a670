//! Ordered parameter sets and advisory parameter diffs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ConfigError, HalldyllError, PackagingError, Result};

/// Ordered mapping of parameter name to value with unique names.
///
/// Two sets are equal when they hold the same key/value pairs, regardless of
/// insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterSet {
    entries: Vec<(String, String)>,
}

/// Advisory difference between the live and desired parameter sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParameterDiff {
    /// Keys present only in the desired set.
    pub added: Vec<String>,
    /// Keys present only in the live set.
    pub removed: Vec<String>,
    /// Keys whose value changed: (key, old, new).
    pub changed: Vec<(String, String, String)>,
}

impl ParameterSet {
    /// Creates an empty parameter set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Inserts a parameter.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is already present.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.contains(&name) {
            return Err(HalldyllError::Config(ConfigError::DuplicateName {
                resource_type: String::from("parameter"),
                name,
            }));
        }
        self.entries.push((name, value.into()));
        Ok(())
    }

    /// Sets a parameter, replacing any existing value in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == name) {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    /// Builder-style insertion that replaces existing values.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Returns the value of a parameter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if the parameter is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == name)
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no parameters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over parameters in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merges another set into this one.
    ///
    /// Identical duplicates are accepted, conflicting values are not.
    ///
    /// # Errors
    ///
    /// Returns an error on the first key declared with a different value.
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        for (name, value) in other.iter() {
            match self.get(name) {
                Some(existing) if existing == value => {}
                Some(_) => {
                    return Err(HalldyllError::Packaging(PackagingError::ParameterConflict {
                        key: name.to_string(),
                    }));
                }
                None => self.entries.push((name.to_string(), value.to_string())),
            }
        }
        Ok(())
    }

    /// Computes which keys changed going from `previous` to `self`.
    #[must_use]
    pub fn diff_from(&self, previous: &Self) -> ParameterDiff {
        let old: HashMap<&str, &str> = previous.iter().collect();
        let new: HashMap<&str, &str> = self.iter().collect();

        let added = self
            .iter()
            .filter(|(k, _)| !old.contains_key(k))
            .map(|(k, _)| k.to_string())
            .collect();

        let removed = previous
            .iter()
            .filter(|(k, _)| !new.contains_key(k))
            .map(|(k, _)| k.to_string())
            .collect();

        let changed = self
            .iter()
            .filter_map(|(k, v)| match old.get(k) {
                Some(previous_value) if *previous_value != v => {
                    Some((k.to_string(), (*previous_value).to_string(), v.to_string()))
                }
                _ => None,
            })
            .collect();

        ParameterDiff {
            added,
            removed,
            changed,
        }
    }
}

impl PartialEq for ParameterSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl Eq for ParameterSet {}

impl FromIterator<(String, String)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (k, v) in iter {
            set.set(k, v);
        }
        set
    }
}

impl ParameterDiff {
    /// Returns true if nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Total number of changed keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }
}

impl std::fmt::Display for ParameterDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "no parameter changes");
        }
        for key in &self.added {
            writeln!(f, "+ {key}")?;
        }
        for key in &self.removed {
            writeln!(f, "- {key}")?;
        }
        for (key, old, new) in &self.changed {
            writeln!(f, "~ {key}: {old} -> {new}")?;
        }
        Ok(())
    }
}
