//! Operator metadata derived from command templates.
//!
//! An operator is declared with a command line containing `${...}` tokens.
//! The tokens tell which operands the operator takes and in which shape,
//! which selections it performs itself, and which outputs it writes:
//!
//! ```text
//! cdo ${operator} -selname,${var} ${in} ${out}
//! ncl plot.ncl in=${in} overlay=${in_2} out=${out}
//! ensplot.sh ${mmin} labels=${labels} ${out}
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{CrsError, Result};
use crate::location::search::token_regex;

/// Tokens filled in by the evaluator rather than by tree parameters.
const EVALUATOR_TOKENS: &[&str] = &[
    "period", "period_iso", "domain", "alias", "units", "missing", "labels", "crs",
];

static SLOT_REGEX: OnceLock<Regex> = OnceLock::new();
static VAR_REGEX: OnceLock<Regex> = OnceLock::new();
static OUT_REGEX: OnceLock<Regex> = OnceLock::new();

fn slot_regex() -> &'static Regex {
    SLOT_REGEX.get_or_init(|| Regex::new(r"^(in|ins|mmin)(?:_([0-9]+))?$").expect("invalid regex pattern"))
}

fn var_regex() -> &'static Regex {
    VAR_REGEX.get_or_init(|| Regex::new(r"^var(?:_[0-9]+)?$").expect("invalid regex pattern"))
}

fn out_regex() -> &'static Regex {
    OUT_REGEX.get_or_init(|| Regex::new(r"^out(?:_([A-Za-z0-9_]+))?$").expect("invalid regex pattern"))
}

/// What one operand slot receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// A single file (`${in}`).
    Single,
    /// Several files joined by whitespace (`${ins}`).
    Multi,
    /// An ensemble as a label-to-files map (`${mmin}`).
    Members,
}

/// A positional operand slot, numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSlot {
    pub index: usize,
    pub kind: SlotKind,
}

/// Kind of artifact the operator produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMedium {
    None,
    Tabular,
    Image,
    Data,
}

impl OutputMedium {
    /// Maps a declared output format to its medium.
    pub fn from_format(format: &str) -> Option<Self> {
        match format.to_ascii_lowercase().as_str() {
            "none" => Some(OutputMedium::None),
            "txt" | "csv" => Some(OutputMedium::Tabular),
            "png" | "pdf" | "eps" | "graph" => Some(OutputMedium::Image),
            "nc" | "netcdf" => Some(OutputMedium::Data),
            _ => None,
        }
    }
}

/// Static metadata of a declared operator.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorMeta {
    pub name: String,
    pub command: String,
    pub format: String,
    /// Operand slots in index order, contiguous from 1.
    pub slots: Vec<InputSlot>,
    pub can_select_var: bool,
    pub can_select_period: bool,
    pub can_select_domain: bool,
    pub can_alias: bool,
    pub can_missing: bool,
    pub uses_labels: bool,
    /// Output name (`""` for the main output) to variable-name format, where
    /// `%s` stands for the first operand's variable.
    pub outputs: BTreeMap<String, String>,
    /// Tokens supplied by tree parameters.
    pub parameters: BTreeSet<String>,
    pub medium: OutputMedium,
}

impl OperatorMeta {
    /// Derives metadata from a command template.
    pub fn parse(
        name: &str,
        command: &str,
        format: &str,
        output_var_formats: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let malformed = |reason: String| CrsError::MalformedOperatorTemplate {
            name: name.to_string(),
            reason,
        };

        let declared_medium = OutputMedium::from_format(format)
            .ok_or_else(|| malformed(format!("unknown output format '{}'", format)))?;

        let mut slots: BTreeMap<usize, SlotKind> = BTreeMap::new();
        let mut meta = OperatorMeta {
            name: name.to_string(),
            command: command.to_string(),
            format: format.to_string(),
            slots: Vec::new(),
            can_select_var: false,
            can_select_period: false,
            can_select_domain: false,
            can_alias: false,
            can_missing: false,
            uses_labels: false,
            outputs: BTreeMap::new(),
            parameters: BTreeSet::new(),
            medium: OutputMedium::None,
        };

        for caps in token_regex().captures_iter(command) {
            let token = &caps[1];
            if let Some(slot) = slot_regex().captures(token) {
                let kind = match &slot[1] {
                    "in" => SlotKind::Single,
                    "ins" => SlotKind::Multi,
                    _ => SlotKind::Members,
                };
                let index = match slot.get(2) {
                    Some(n) => n
                        .as_str()
                        .parse::<usize>()
                        .map_err(|_| malformed(format!("bad slot index in '{}'", token)))?,
                    None => 1,
                };
                if index == 0 {
                    return Err(malformed(format!("slot index 0 in '{}'", token)));
                }
                match slots.get(&index) {
                    Some(existing) if *existing != kind => {
                        return Err(malformed(format!(
                            "operand {} used as both {:?} and {:?}",
                            index, existing, kind
                        )));
                    }
                    _ => {
                        slots.insert(index, kind);
                    }
                }
            } else if var_regex().is_match(token) {
                meta.can_select_var = true;
            } else if let Some(out) = out_regex().captures(token) {
                let output = out.get(1).map(|m| m.as_str()).unwrap_or("");
                meta.outputs.insert(output.to_string(), "%s".to_string());
            } else {
                match token {
                    "period" | "period_iso" => meta.can_select_period = true,
                    "domain" => meta.can_select_domain = true,
                    "alias" | "units" => meta.can_alias = true,
                    "missing" => meta.can_missing = true,
                    "labels" => meta.uses_labels = true,
                    "crs" => {}
                    other => {
                        meta.parameters.insert(other.to_string());
                    }
                }
            }
        }

        if slots.is_empty() {
            return Err(malformed("no input token (${in}, ${ins} or ${mmin})".to_string()));
        }
        for (expected, index) in (1..).zip(slots.keys()) {
            if *index != expected {
                return Err(malformed(format!("operand slot {} is missing", expected)));
            }
        }
        meta.slots = slots
            .into_iter()
            .map(|(index, kind)| InputSlot { index, kind })
            .collect();

        for (output, var_format) in output_var_formats {
            match meta.outputs.get_mut(output) {
                Some(slot) => *slot = var_format.clone(),
                None => {
                    return Err(malformed(format!(
                        "variable format given for undeclared output '{}'",
                        output
                    )))
                }
            }
        }

        meta.medium = if meta.outputs.is_empty() {
            OutputMedium::None
        } else if declared_medium == OutputMedium::None {
            return Err(malformed("output tokens present but format is 'none'".to_string()));
        } else {
            declared_medium
        };

        Ok(meta)
    }

    /// Minimum operand count: the first operand is mandatory.
    pub fn min_operands(&self) -> usize {
        1
    }

    pub fn max_operands(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Option<&InputSlot> {
        self.slots.get(index.checked_sub(1)?)
    }

    /// True when no slot takes an ensemble, so the caller must apply the
    /// operator once per member.
    pub fn is_ensemble_dumb(&self) -> bool {
        !self.slots.iter().any(|s| s.kind == SlotKind::Members)
    }

    pub fn has_output(&self, output: &str) -> bool {
        self.outputs.contains_key(output)
    }

    /// Named outputs, excluding the main output.
    pub fn named_outputs(&self) -> impl Iterator<Item = &str> {
        self.outputs
            .keys()
            .filter(|k| !k.is_empty())
            .map(String::as_str)
    }

    /// Variable name of `output` given the first operand's variable.
    pub fn output_variable(&self, output: &str, input_variable: &str) -> Option<String> {
        self.outputs
            .get(output)
            .map(|fmt| fmt.replace("%s", input_variable))
    }

    /// True when `name` may be passed as a tree parameter.
    pub fn accepts_parameter(&self, name: &str) -> bool {
        self.parameters.contains(name)
    }

    /// Substitutes tokens from `bindings`. Unbound tokens render empty.
    pub fn render(&self, bindings: &BTreeMap<String, String>) -> String {
        token_regex()
            .replace_all(&self.command, |caps: &regex::Captures<'_>| {
                bindings.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned()
    }

    /// Tokens the evaluator is expected to fill in.
    pub fn evaluator_tokens() -> &'static [&'static str] {
        EVALUATOR_TOKENS
    }
}
