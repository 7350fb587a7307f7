//! Declaration catalogs.
//!
//! A catalog is a YAML or JSON document holding the declarations a
//! registry needs: projects, global defaults, locations, aliases, derived
//! variables, operators and macros. [`Catalog::apply`] declares them in
//! dependency order.
//!
//! ```yaml
//! projects:
//!   - name: demo
//!     separator: "|"
//!     facets: [frequency]
//!     defaults: { frequency: monthly }
//!     ensemble_facets: [simulation]
//! locations:
//!   - project: demo
//!     urls: ["/data/${model}/${variable}_${PERIOD}.nc"]
//! operators:
//!   - name: ccdo
//!     command: "cdo ${operator} ${in} ${out}"
//!     format: nc
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::alias::{Alias, DerivedVariable};
use crate::error::{CrsError, Result};
use crate::facet::WILDCARD;
use crate::location::{LocationEntry, LocationKey, Organization};
use crate::project::{FixedFieldRule, Project, DEFAULT_SEPARATOR};
use crate::registry::Registry;

/// A set of declarations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Catalog {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub projects: Vec<ProjectDecl>,
    /// Defaults shared by every project.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub defaults: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<LocationDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<AliasDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub derived: Vec<DerivedVariable>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operators: Vec<OperatorDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub macros: Vec<MacroDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectDecl {
    pub name: String,
    /// Facets declared after the base ones.
    #[serde(default)]
    pub facets: Vec<String>,
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
    #[serde(default = "default_separator")]
    pub separator: char,
    #[serde(default)]
    pub ensemble_facets: Vec<String>,
    /// Installs the classic fixed-field normalization.
    #[serde(default)]
    pub fixed_fields: bool,
}

fn default_separator() -> char {
    DEFAULT_SEPARATOR
}

impl ProjectDecl {
    pub fn to_project(&self) -> Result<Project> {
        let mut builder = Project::builder(self.name.clone()).separator(self.separator);
        for facet in &self.facets {
            builder = builder.facet(facet.clone());
        }
        for (facet, value) in &self.defaults {
            builder = builder.default_value(facet.clone(), value.clone());
        }
        for facet in &self.ensemble_facets {
            builder = builder.ensemble_facet(facet.clone());
        }
        if self.fixed_fields {
            builder = builder.normalizer(FixedFieldRule::classic().into_normalizer());
        }
        builder.build()
    }
}

/// A location entry. Key fields left out match anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationDecl {
    pub project: String,
    #[serde(default = "any")]
    pub model: String,
    #[serde(default = "any")]
    pub simulation: String,
    #[serde(default = "any")]
    pub frequency: String,
    #[serde(default = "any")]
    pub realm: String,
    #[serde(default = "any")]
    pub table: String,
    #[serde(default = "generic")]
    pub organization: String,
    pub urls: Vec<String>,
}

fn any() -> String {
    WILDCARD.to_string()
}

fn generic() -> String {
    Organization::Generic.as_str().to_string()
}

impl LocationDecl {
    pub fn to_entry(&self) -> Result<LocationEntry> {
        let organization: Organization = self.organization.parse()?;
        let key = LocationKey::for_project(self.project.as_str())
            .model(self.model.as_str())
            .simulation(self.simulation.as_str())
            .frequency(self.frequency.as_str())
            .realm(self.realm.as_str())
            .table(self.table.as_str());
        Ok(LocationEntry::new(key, organization, self.urls.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasDecl {
    pub project: String,
    #[serde(flatten)]
    pub alias: Alias,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatorDecl {
    pub name: String,
    pub command: String,
    pub format: String,
    /// Variable-name formats of the outputs, `%s` standing for the input
    /// variable.
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

/// A macro given as the CRS of its template, holes written `ARG`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MacroDecl {
    pub name: String,
    pub template: String,
}

impl Catalog {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a catalog file; `.json` files are JSON, anything else YAML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&text)
        } else {
            Self::from_yaml_str(&text)
        }
        .map_err(|err| CrsError::Catalog(format!("{}: {}", path.display(), err)))
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Declares everything into `registry`: projects and defaults, then
    /// locations, aliases, operators, derived variables and macros.
    pub fn apply(&self, registry: &mut Registry) -> Result<()> {
        for decl in &self.projects {
            registry.declare_project(decl.to_project()?)?;
        }
        for (facet, value) in &self.defaults {
            registry.declare_default(facet.clone(), value.clone());
        }
        for decl in &self.locations {
            registry.declare_location(decl.to_entry()?)?;
        }
        for decl in &self.aliases {
            registry.declare_alias(&decl.project, decl.alias.clone())?;
        }
        for decl in &self.operators {
            registry.declare_operator(&decl.name, &decl.command, &decl.format, &decl.outputs)?;
        }
        for derived in &self.derived {
            registry.declare_derived(derived.clone())?;
        }
        for decl in &self.macros {
            let template = registry.parse_expr(&decl.template)?;
            registry.declare_macro(&decl.name, template)?;
        }
        debug!(
            projects = self.projects.len(),
            locations = self.locations.len(),
            operators = self.operators.len(),
            macros = self.macros.len(),
            "applied catalog"
        );
        Ok(())
    }
}
