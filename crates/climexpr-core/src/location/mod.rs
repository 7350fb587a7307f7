//! Location registry.
//!
//! Maps `(project, model, simulation, frequency, realm, table)` keys, any of
//! which may be a wildcard, to an organization kind and a list of URL
//! patterns. Lookup keeps the most specific compatible entries.

pub mod search;

use std::fmt;

use tracing::debug;

pub use search::{FileMatch, FileSearch, Organization, SearchRequest};

/// Names of the key fields, in key order.
pub const KEY_FIELDS: [&str; 6] = ["project", "model", "simulation", "frequency", "realm", "table"];

/// One field of a location key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyField {
    /// Matches any value.
    Any,
    /// Matches exactly this value.
    Is(String),
}

impl KeyField {
    pub fn is_any(&self) -> bool {
        matches!(self, KeyField::Any)
    }

    /// Compatibility is symmetric: either side may be a wildcard.
    pub fn compatible(&self, other: &KeyField) -> bool {
        match (self, other) {
            (KeyField::Any, _) | (_, KeyField::Any) => true,
            (KeyField::Is(a), KeyField::Is(b)) => a == b,
        }
    }
}

impl From<&str> for KeyField {
    fn from(s: &str) -> Self {
        if s == crate::facet::WILDCARD {
            KeyField::Any
        } else {
            KeyField::Is(s.to_string())
        }
    }
}

impl From<String> for KeyField {
    fn from(s: String) -> Self {
        KeyField::from(s.as_str())
    }
}

impl fmt::Display for KeyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyField::Any => f.write_str(crate::facet::WILDCARD),
            KeyField::Is(s) => f.write_str(s),
        }
    }
}

/// A registry key or query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocationKey {
    pub project: KeyField,
    pub model: KeyField,
    pub simulation: KeyField,
    pub frequency: KeyField,
    pub realm: KeyField,
    pub table: KeyField,
}

impl LocationKey {
    /// A key fixing only the project.
    pub fn for_project(project: impl Into<String>) -> Self {
        Self {
            project: KeyField::Is(project.into()),
            model: KeyField::Any,
            simulation: KeyField::Any,
            frequency: KeyField::Any,
            realm: KeyField::Any,
            table: KeyField::Any,
        }
    }

    pub fn model(mut self, value: impl Into<KeyField>) -> Self {
        self.model = value.into();
        self
    }

    pub fn simulation(mut self, value: impl Into<KeyField>) -> Self {
        self.simulation = value.into();
        self
    }

    pub fn frequency(mut self, value: impl Into<KeyField>) -> Self {
        self.frequency = value.into();
        self
    }

    pub fn realm(mut self, value: impl Into<KeyField>) -> Self {
        self.realm = value.into();
        self
    }

    pub fn table(mut self, value: impl Into<KeyField>) -> Self {
        self.table = value.into();
        self
    }

    /// Sets a field by its name in [`KEY_FIELDS`]. Unknown names are ignored.
    pub fn set(&mut self, field: &str, value: KeyField) {
        match field {
            "project" => self.project = value,
            "model" => self.model = value,
            "simulation" => self.simulation = value,
            "frequency" => self.frequency = value,
            "realm" => self.realm = value,
            "table" => self.table = value,
            _ => {}
        }
    }

    pub fn fields(&self) -> [&KeyField; 6] {
        [
            &self.project,
            &self.model,
            &self.simulation,
            &self.frequency,
            &self.realm,
            &self.table,
        ]
    }

    pub fn wildcard_count(&self) -> usize {
        self.fields().iter().filter(|f| f.is_any()).count()
    }

    pub fn compatible(&self, other: &LocationKey) -> bool {
        self.fields()
            .iter()
            .zip(other.fields().iter())
            .all(|(a, b)| a.compatible(b))
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = KEY_FIELDS
            .iter()
            .zip(self.fields().iter())
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// A declared data location.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationEntry {
    pub key: LocationKey,
    pub organization: Organization,
    pub urls: Vec<String>,
}

impl LocationEntry {
    pub fn new(key: LocationKey, organization: Organization, urls: Vec<String>) -> Self {
        Self {
            key,
            organization,
            urls,
        }
    }
}

/// All declared locations.
#[derive(Debug, Clone, Default)]
pub struct LocationRegistry {
    entries: Vec<LocationEntry>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a location. An entry with the same key is replaced.
    pub fn declare(&mut self, entry: LocationEntry) {
        debug!(key = %entry.key, org = entry.organization.as_str(), "declaring location");
        match self.entries.iter_mut().find(|e| e.key == entry.key) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// Returns the compatible entries with the fewest wildcard fields.
    /// Ties are all kept, in declaration order.
    pub fn get_locs(&self, query: &LocationKey) -> Vec<&LocationEntry> {
        let matching: Vec<&LocationEntry> = self
            .entries
            .iter()
            .filter(|e| e.key.compatible(query))
            .collect();
        let Some(min) = matching.iter().map(|e| e.key.wildcard_count()).min() else {
            return Vec::new();
        };
        matching
            .into_iter()
            .filter(|e| e.key.wildcard_count() == min)
            .collect()
    }

    pub fn entries(&self) -> &[LocationEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
