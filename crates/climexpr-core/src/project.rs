//! Project declarations.
//!
//! A project fixes the ordered facet list of its datasets, their defaults,
//! the separator used in dataset CRS strings, and which facets may serve as
//! ensemble axes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{CrsError, Result};
use crate::facet::{FacetValue, RESERVED_CHARS};
use crate::period::Period;

/// Facets every project carries, in CRS order.
pub const BASE_FACETS: [&str; 5] = ["project", "simulation", "variable", "period", "domain"];

/// Separator used when a declaration does not name one.
pub const DEFAULT_SEPARATOR: char = '%';

/// Facet name accepted as a synonym of `simulation` when a project does not
/// declare it.
pub const MODEL_SYNONYM: &str = "model";

/// Facet values of one dataset, keyed by facet name.
pub type FacetMap = BTreeMap<String, FacetValue>;

/// Per-project hook run on facet values after defaults are filled in.
pub type Normalizer = Arc<dyn Fn(&mut FacetMap) + Send + Sync>;

/// A declared project.
#[derive(Clone)]
pub struct Project {
    name: String,
    facets: Vec<String>,
    defaults: BTreeMap<String, String>,
    separator: char,
    ensemble_facets: Vec<String>,
    synonyms: BTreeMap<String, String>,
    normalizer: Option<Normalizer>,
}

impl Project {
    /// Creates a new project builder.
    pub fn builder(name: impl Into<String>) -> ProjectBuilder {
        ProjectBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered facet list (base facets first).
    pub fn facets(&self) -> &[String] {
        &self.facets
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    pub fn defaults(&self) -> &BTreeMap<String, String> {
        &self.defaults
    }

    pub fn default_for(&self, facet: &str) -> Option<&str> {
        self.defaults.get(facet).map(String::as_str)
    }

    /// Facets usable as ensemble axes, in declaration order.
    pub fn ensemble_facets(&self) -> &[String] {
        &self.ensemble_facets
    }

    pub fn has_facet(&self, facet: &str) -> bool {
        self.facets.iter().any(|f| f == facet)
    }

    /// Translates a facet name or synonym to the project's facet name.
    pub fn canonical_facet<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        if self.has_facet(name) {
            return Some(name);
        }
        self.synonyms.get(name).map(String::as_str)
    }

    /// Synonym names and the facet each stands for.
    pub fn synonyms(&self) -> &BTreeMap<String, String> {
        &self.synonyms
    }

    /// Runs the normalization hook, if any.
    pub fn normalize(&self, facets: &mut FacetMap) {
        if let Some(hook) = &self.normalizer {
            hook(facets);
        }
    }
}

impl fmt::Debug for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Project")
            .field("name", &self.name)
            .field("facets", &self.facets)
            .field("defaults", &self.defaults)
            .field("separator", &self.separator)
            .field("ensemble_facets", &self.ensemble_facets)
            .field("normalizer", &self.normalizer.is_some())
            .finish()
    }
}

impl PartialEq for Project {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.facets == other.facets
            && self.separator == other.separator
    }
}

/// Builder for [`Project`].
pub struct ProjectBuilder {
    name: String,
    extra_facets: Vec<String>,
    defaults: BTreeMap<String, String>,
    separator: char,
    ensemble_facets: Vec<String>,
    normalizer: Option<Normalizer>,
}

impl ProjectBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extra_facets: Vec::new(),
            defaults: BTreeMap::new(),
            separator: DEFAULT_SEPARATOR,
            ensemble_facets: Vec::new(),
            normalizer: None,
        }
    }

    /// Adds a facet after the base facets.
    pub fn facet(mut self, facet: impl Into<String>) -> Self {
        self.extra_facets.push(facet.into());
        self
    }

    /// Adds a facet together with its default value.
    pub fn facet_with_default(mut self, facet: impl Into<String>, value: impl Into<String>) -> Self {
        let facet = facet.into();
        self.defaults.insert(facet.clone(), value.into());
        self.extra_facets.push(facet);
        self
    }

    /// Sets a default for any facet, base or extra.
    pub fn default_value(mut self, facet: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(facet.into(), value.into());
        self
    }

    pub fn separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    pub fn ensemble_facet(mut self, facet: impl Into<String>) -> Self {
        self.ensemble_facets.push(facet.into());
        self
    }

    pub fn normalizer(mut self, hook: Normalizer) -> Self {
        self.normalizer = Some(hook);
        self
    }

    /// Validates the declaration and builds the project.
    pub fn build(self) -> Result<Project> {
        let invalid = |reason: String| CrsError::InvalidProject {
            name: self.name.clone(),
            reason,
        };

        if self.name.is_empty() {
            return Err(invalid("empty name".to_string()));
        }
        if let Some(ch) = self
            .name
            .chars()
            .find(|c| RESERVED_CHARS.contains(c) || c.is_whitespace() || *c == self.separator)
        {
            return Err(invalid(format!("name contains reserved character '{}'", ch)));
        }
        let sep = self.separator;
        if RESERVED_CHARS.contains(&sep)
            || sep.is_alphanumeric()
            || sep.is_whitespace()
            || matches!(sep, '.' | '-' | '*')
        {
            return Err(invalid(format!("separator '{}' is reserved", sep)));
        }

        let mut facets: Vec<String> = BASE_FACETS.iter().map(|f| f.to_string()).collect();
        let mut seen: BTreeSet<String> = facets.iter().cloned().collect();
        for facet in self.extra_facets {
            if !is_identifier(&facet) {
                return Err(invalid(format!("facet name '{}' is not an identifier", facet)));
            }
            if !seen.insert(facet.clone()) {
                return Err(invalid(format!("duplicate facet '{}'", facet)));
            }
            facets.push(facet);
        }
        for key in self.defaults.keys() {
            if !seen.contains(key) {
                return Err(invalid(format!("default for undeclared facet '{}'", key)));
            }
        }
        let mut ensemble_seen = BTreeSet::new();
        for facet in &self.ensemble_facets {
            if !seen.contains(facet) {
                return Err(invalid(format!("ensemble facet '{}' is not declared", facet)));
            }
            if !ensemble_seen.insert(facet) {
                return Err(invalid(format!("duplicate ensemble facet '{}'", facet)));
            }
        }

        let mut synonyms = BTreeMap::new();
        if !seen.contains(MODEL_SYNONYM) {
            synonyms.insert(MODEL_SYNONYM.to_string(), "simulation".to_string());
        }

        Ok(Project {
            name: self.name,
            facets,
            defaults: self.defaults,
            separator: sep,
            ensemble_facets: self.ensemble_facets,
            synonyms,
            normalizer: self.normalizer,
        })
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Keeps the facets of a time-invariant dataset consistent: when any listed
/// facet holds its sentinel, all listed facets are set to theirs.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedFieldRule {
    sentinels: Vec<(String, FacetValue)>,
}

impl FixedFieldRule {
    pub fn new(sentinels: Vec<(String, FacetValue)>) -> Self {
        Self { sentinels }
    }

    /// The CMIP-style rule: `table=fx`, `period=fx`, `simulation=r0i0p0`,
    /// `frequency=fx`.
    pub fn classic() -> Self {
        Self::new(vec![
            ("table".to_string(), FacetValue::Text("fx".to_string())),
            ("period".to_string(), FacetValue::Period(Period::Fixed)),
            ("simulation".to_string(), FacetValue::Text("r0i0p0".to_string())),
            ("frequency".to_string(), FacetValue::Text("fx".to_string())),
        ])
    }

    pub fn apply(&self, facets: &mut FacetMap) {
        let triggered = self
            .sentinels
            .iter()
            .any(|(facet, sentinel)| facets.get(facet) == Some(sentinel));
        if !triggered {
            return;
        }
        for (facet, sentinel) in &self.sentinels {
            if let Some(value) = facets.get_mut(facet) {
                *value = sentinel.clone();
            }
        }
    }

    /// Wraps the rule as a project normalization hook.
    pub fn into_normalizer(self) -> Normalizer {
        Arc::new(move |facets: &mut FacetMap| self.apply(facets))
    }
}
