//! Named scalar model parameters.

use std::collections::BTreeMap;

use sylva_core::{Result, SylvaError};

/// Admissible values of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Domain {
    /// Any finite value.
    Unbounded,
    /// Strictly positive.
    Positive,
    /// Zero or more.
    NonNegative,
    /// In `[0, 1]`.
    Probability,
}

impl Domain {
    /// True if `value` lies in this domain.
    pub fn contains(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        match self {
            Domain::Unbounded => true,
            Domain::Positive => value > 0.0,
            Domain::NonNegative => value >= 0.0,
            Domain::Probability => (0.0..=1.0).contains(&value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
struct Entry {
    value: f64,
    domain: Domain,
    free: bool,
}

/// A set of named scalar parameters.
///
/// Names are kept sorted so iteration and [`values_key`](Self::values_key)
/// are deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Parameters {
    entries: BTreeMap<String, Entry>,
}

impl Parameters {
    /// An empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter that estimation may change.
    pub fn free(self, name: &str, value: f64, domain: Domain) -> Result<Self> {
        self.insert(name, value, domain, true)
    }

    /// Add a parameter held at its value.
    pub fn fixed(self, name: &str, value: f64, domain: Domain) -> Result<Self> {
        self.insert(name, value, domain, false)
    }

    fn insert(mut self, name: &str, value: f64, domain: Domain, free: bool) -> Result<Self> {
        check(name, value, domain)?;
        self.entries.insert(
            name.to_string(),
            Entry {
                value,
                domain,
                free,
            },
        );
        Ok(self)
    }

    /// Value of `name`.
    pub fn get(&self, name: &str) -> Result<f64> {
        self.entries
            .get(name)
            .map(|e| e.value)
            .ok_or_else(|| SylvaError::Parameter(format!("missing parameter '{}'", name)))
    }

    /// Change the value of an existing parameter.
    pub fn set(&mut self, name: &str, value: f64) -> Result<()> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| SylvaError::Parameter(format!("missing parameter '{}'", name)))?;
        check(name, value, entry.domain)?;
        entry.value = value;
        Ok(())
    }

    /// Domain of `name`.
    pub fn domain(&self, name: &str) -> Result<Domain> {
        self.entries
            .get(name)
            .map(|e| e.domain)
            .ok_or_else(|| SylvaError::Parameter(format!("missing parameter '{}'", name)))
    }

    /// True if `name` exists and is free.
    pub fn is_free(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|e| e.free)
    }

    /// Names of free parameters, sorted.
    pub fn free_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| e.free)
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// All parameter names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names and values in name order; equal keys mean equal values.
    pub fn values_key(&self) -> Vec<(String, u64)> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.to_bits()))
            .collect()
    }
}

fn check(name: &str, value: f64, domain: Domain) -> Result<()> {
    if domain.contains(value) {
        Ok(())
    } else {
        Err(SylvaError::Parameter(format!(
            "value {} of '{}' is outside {:?}",
            value, name, domain
        )))
    }
}
