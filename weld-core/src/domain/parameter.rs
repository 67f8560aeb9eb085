//! Build parameter types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Type of a build parameter
///
/// Only string parameters exist today; the tag is kept on the wire so that
/// richer types can be added without changing the format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    #[default]
    String,
}

/// A single `(name, type, value)` build parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: ParameterType,
    pub value: String,
}

impl Parameter {
    /// Creates a string parameter
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterType::String,
            value: value.into(),
        }
    }
}

/// Ordered sequence of parameters
///
/// Insertion order is preserved. [`ParameterSet::add`] updates an existing
/// parameter in place, [`ParameterSet::push`] appends unconditionally.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet(Vec<Parameter>);

impl ParameterSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Sets `name` to `value`, keeping the position of an existing entry
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.value = value,
            None => self.0.push(Parameter::string(name, value)),
        }
    }

    /// Appends a parameter without looking for an existing one
    pub fn push(&mut self, parameter: Parameter) {
        self.0.push(parameter);
    }

    /// Upserts every parameter of `other`, in order
    pub fn merge(&mut self, other: impl IntoIterator<Item = Parameter>) {
        for p in other {
            self.add(p.name, p.value);
        }
    }

    /// Returns the value of the last parameter named `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|p| p.name == name)
    }

    pub fn as_slice(&self) -> &[Parameter] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Collapses the set into a map; later duplicates win
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect()
    }

    /// Builds a set from a map, sorted by key
    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        Self(
            map.into_iter()
                .map(|(name, value)| Parameter::string(name, value))
                .collect(),
        )
    }
}

impl From<Vec<Parameter>> for ParameterSet {
    fn from(params: Vec<Parameter>) -> Self {
        Self(params)
    }
}

impl FromIterator<Parameter> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = Parameter>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for ParameterSet {
    type Item = Parameter;
    type IntoIter = std::vec::IntoIter<Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ParameterSet {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
