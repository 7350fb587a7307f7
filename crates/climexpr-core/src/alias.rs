//! Variable aliases and derived variables.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::expr::ParamValue;

/// Rewrite rule from a user-facing variable name to what is stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    /// User-facing variable name.
    pub variable: String,
    /// Name of the variable inside the data files.
    pub stored_name: String,
    #[serde(default = "one")]
    pub scale: f64,
    #[serde(default)]
    pub offset: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    /// Sentinel for missing values in the stored data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing: Option<f64>,
    /// Variable name as it appears in file names, when it differs from
    /// `stored_name`. Only used for file search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name_variable: Option<String>,
}

fn one() -> f64 {
    1.0
}

impl Alias {
    /// An alias that only renames.
    pub fn rename(variable: impl Into<String>, stored_name: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            stored_name: stored_name.into(),
            scale: 1.0,
            offset: 0.0,
            units: None,
            missing: None,
            file_name_variable: None,
        }
    }

    pub fn with_scale(mut self, scale: f64, offset: f64) -> Self {
        self.scale = scale;
        self.offset = offset;
        self
    }

    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.units = Some(units.into());
        self
    }

    pub fn with_missing(mut self, missing: f64) -> Self {
        self.missing = Some(missing);
        self
    }

    pub fn with_file_name_variable(mut self, name: impl Into<String>) -> Self {
        self.file_name_variable = Some(name.into());
        self
    }

    /// Variable name to use when searching files.
    pub fn search_variable(&self) -> &str {
        self.file_name_variable
            .as_deref()
            .unwrap_or(&self.stored_name)
    }

    /// True when data values must be transformed, not only renamed.
    pub fn transforms_values(&self) -> bool {
        self.scale != 1.0 || self.offset != 0.0 || self.missing.is_some()
    }

    /// The `${alias}` token value: `variable,stored_name,scale,offset`.
    pub fn token(&self) -> String {
        format!(
            "{},{},{},{}",
            self.variable, self.stored_name, self.scale, self.offset
        )
    }
}

/// A variable computed by an operator from other variables of the same
/// project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedVariable {
    pub project: String,
    pub variable: String,
    pub operator: String,
    /// Input variables, one operand each, in slot order.
    pub inputs: Vec<String>,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}
