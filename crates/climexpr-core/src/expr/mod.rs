//! The expression object model.
//!
//! Every expression is one variant of [`Expr`]. Algorithms (CRS building,
//! parsing, resolution, macro matching, evaluation) recurse over this enum
//! with exhaustive matches.

mod dataset;
mod ensemble;
mod output;
mod page;
mod tree;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use dataset::Dataset;
pub use ensemble::Ensemble;
pub use output::NamedOutput;
pub use page::Page;
pub use tree::{is_housekeeping, Tree};

/// CRS of the placeholder node.
pub const PLACEHOLDER_CRS: &str = "ARG";

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A dataset selection.
    Dataset(Dataset),
    /// An operator applied to operands.
    Tree(Tree),
    /// A labelled, ordered collection of expressions.
    Ensemble(Ensemble),
    /// One named output of a multi-output tree.
    Output(NamedOutput),
    /// A hole in a macro template.
    Placeholder,
    /// A composite page of expressions.
    Page(Page),
}

impl Expr {
    /// Canonical reference string of this node.
    pub fn crs(&self) -> String {
        crate::crs::build(self)
    }

    /// Short name of the node kind, for messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Dataset(_) => "dataset",
            Expr::Tree(_) => "tree",
            Expr::Ensemble(_) => "ensemble",
            Expr::Output(_) => "output",
            Expr::Placeholder => "placeholder",
            Expr::Page(_) => "page",
        }
    }

    pub fn as_dataset(&self) -> Option<&Dataset> {
        match self {
            Expr::Dataset(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&Tree> {
        match self {
            Expr::Tree(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_ensemble(&self) -> Option<&Ensemble> {
        match self {
            Expr::Ensemble(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Expr::Placeholder)
    }

    /// Counts placeholders, depth-first.
    pub fn placeholder_count(&self) -> usize {
        match self {
            Expr::Placeholder => 1,
            Expr::Dataset(_) => 0,
            Expr::Tree(t) => t.operands().iter().flatten().map(Expr::placeholder_count).sum(),
            Expr::Ensemble(e) => e.iter().map(|(_, m)| m.placeholder_count()).sum(),
            Expr::Output(o) => o.father().placeholder_count(),
            Expr::Page(p) => p.cells().flatten().map(Expr::placeholder_count).sum(),
        }
    }

    /// Variable carried by this expression: the dataset's variable, the
    /// first operand's for trees, the first member's for ensembles, and the
    /// output-formatted name for named outputs.
    pub fn variable(&self) -> Option<String> {
        match self {
            Expr::Dataset(d) => d.variable().map(str::to_string),
            Expr::Tree(t) => t
                .operands()
                .first()
                .and_then(|o| o.as_ref())
                .and_then(Expr::variable)
                .map(|v| t.operator().output_variable("", &v).unwrap_or(v)),
            Expr::Ensemble(e) => e.iter().next().and_then(|(_, m)| m.variable()),
            Expr::Output(o) => {
                let tree = o.father().as_tree()?;
                let base = tree
                    .operands()
                    .first()
                    .and_then(|op| op.as_ref())
                    .and_then(Expr::variable)?;
                tree.operator().output_variable(o.name(), &base)
            }
            Expr::Placeholder | Expr::Page(_) => None,
        }
    }

    /// All datasets reachable from this node, depth-first.
    pub fn datasets(&self) -> Vec<&Dataset> {
        let mut out = Vec::new();
        self.collect_datasets(&mut out);
        out
    }

    fn collect_datasets<'a>(&'a self, out: &mut Vec<&'a Dataset>) {
        match self {
            Expr::Dataset(d) => out.push(d),
            Expr::Tree(t) => t
                .operands()
                .iter()
                .flatten()
                .for_each(|o| o.collect_datasets(out)),
            Expr::Ensemble(e) => e.iter().for_each(|(_, m)| m.collect_datasets(out)),
            Expr::Output(o) => o.father().collect_datasets(out),
            Expr::Page(p) => p.cells().flatten().for_each(|c| c.collect_datasets(out)),
            Expr::Placeholder => {}
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.crs())
    }
}

impl From<Dataset> for Expr {
    fn from(d: Dataset) -> Self {
        Expr::Dataset(d)
    }
}

impl From<Tree> for Expr {
    fn from(t: Tree) -> Self {
        Expr::Tree(t)
    }
}

impl From<Ensemble> for Expr {
    fn from(e: Ensemble) -> Self {
        Expr::Ensemble(e)
    }
}

impl From<NamedOutput> for Expr {
    fn from(o: NamedOutput) -> Self {
        Expr::Output(o)
    }
}

impl From<Page> for Expr {
    fn from(p: Page) -> Self {
        Expr::Page(p)
    }
}

/// A tree parameter or page decoration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ParamValue>),
}

impl ParamValue {
    /// Canonical literal form, reparsable by the CRS parser.
    pub fn repr(&self) -> String {
        match self {
            ParamValue::Bool(b) => b.to_string(),
            ParamValue::Int(i) => i.to_string(),
            ParamValue::Float(f) => format!("{:?}", f),
            ParamValue::Str(s) => quote(s),
            ParamValue::List(items) => format!(
                "[{}]",
                items.iter().map(ParamValue::repr).collect::<Vec<_>>().join(",")
            ),
        }
    }

    /// Plain text for command-line substitution (strings unquoted).
    pub fn to_token(&self) -> String {
        match self {
            ParamValue::Str(s) => s.clone(),
            ParamValue::List(items) => items
                .iter()
                .map(ParamValue::to_token)
                .collect::<Vec<_>>()
                .join(","),
            other => other.repr(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// False if any float, nested ones included, is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        match self {
            ParamValue::Float(f) => f.is_finite(),
            ParamValue::List(items) => items.iter().all(ParamValue::is_finite),
            _ => true,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

/// Quotes a string as a CRS literal.
pub(crate) fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        if ch == '\\' || ch == '\'' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('\'');
    out
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<i32> for ParamValue {
    fn from(i: i32) -> Self {
        ParamValue::Int(i as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        ParamValue::Float(f)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(items: Vec<T>) -> Self {
        ParamValue::List(items.into_iter().map(Into::into).collect())
    }
}
