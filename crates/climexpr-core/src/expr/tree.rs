//! Operator application nodes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{CrsError, Result};
use crate::operator::OperatorMeta;

use super::{Expr, ParamValue};

/// Prefix of construction-only parameter names.
const HOUSEKEEPING_PREFIX: char = '_';

/// True for parameters that are never serialized and ignored by matching.
pub fn is_housekeeping(name: &str) -> bool {
    name.starts_with(HOUSEKEEPING_PREFIX)
}

/// An operator applied to positional operands and keyword parameters.
#[derive(Debug, Clone)]
pub struct Tree {
    operator: Arc<OperatorMeta>,
    operands: Vec<Option<Expr>>,
    params: BTreeMap<String, ParamValue>,
    outputs: BTreeMap<String, PathBuf>,
}

impl Tree {
    /// Builds a tree, checking arity and parameter names.
    ///
    /// Trailing null operands are dropped. The first operand is mandatory and
    /// at most one operand per declared slot is accepted.
    pub fn new(
        operator: Arc<OperatorMeta>,
        mut operands: Vec<Option<Expr>>,
        params: BTreeMap<String, ParamValue>,
    ) -> Result<Self> {
        while matches!(operands.last(), Some(None)) {
            operands.pop();
        }
        let arity = |got: usize| CrsError::ArityMismatch {
            operator: operator.name.clone(),
            min: operator.min_operands(),
            max: operator.max_operands(),
            got,
        };
        if operands.first().map_or(true, Option::is_none) {
            return Err(arity(operands.iter().flatten().count()));
        }
        if operands.len() > operator.max_operands() {
            return Err(arity(operands.len()));
        }
        if let Some(param) = params
            .keys()
            .find(|p| !is_housekeeping(p) && !operator.accepts_parameter(p))
        {
            return Err(CrsError::UnknownParameter {
                operator: operator.name.clone(),
                param: param.clone(),
            });
        }
        if let Some(param) = params.iter().find(|(_, v)| !v.is_finite()).map(|(k, _)| k) {
            return Err(CrsError::NonFiniteParameter {
                param: param.clone(),
            });
        }
        Ok(Self {
            operator,
            operands,
            params,
            outputs: BTreeMap::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.operator.name
    }

    pub fn operator(&self) -> &OperatorMeta {
        &self.operator
    }

    /// Operands in slot order; `None` marks an omitted optional operand.
    pub fn operands(&self) -> &[Option<Expr>] {
        &self.operands
    }

    pub(crate) fn operands_mut(&mut self) -> &mut [Option<Expr>] {
        &mut self.operands
    }

    /// Operand in slot `index` (1-based).
    pub fn operand(&self, index: usize) -> Option<&Expr> {
        self.operands.get(index.checked_sub(1)?)?.as_ref()
    }

    /// All parameters, housekeeping ones included.
    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// Parameters that take part in the CRS, in name order.
    pub fn serialized_params(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.params.iter().filter(|(k, _)| !is_housekeeping(k))
    }

    /// Records where an output was materialized.
    pub fn set_output(&mut self, output: impl Into<String>, path: impl Into<PathBuf>) -> Result<()> {
        let output = output.into();
        if !self.operator.has_output(&output) {
            return Err(CrsError::UnknownOutput {
                operator: self.operator.name.clone(),
                output,
            });
        }
        self.outputs.insert(output, path.into());
        Ok(())
    }

    pub fn output(&self, output: &str) -> Option<&Path> {
        self.outputs.get(output).map(PathBuf::as_path)
    }

    pub fn outputs(&self) -> &BTreeMap<String, PathBuf> {
        &self.outputs
    }

    /// Same operator and parameters, ignoring operands.
    pub(crate) fn same_head(&self, other: &Tree) -> bool {
        self.operator.name == other.operator.name
            && self.serialized_params().eq(other.serialized_params())
    }

    /// Rebuilds the tree with other operands, keeping operator and parameters.
    pub(crate) fn with_operands(&self, operands: Vec<Option<Expr>>) -> Result<Self> {
        Tree::new(self.operator.clone(), operands, self.params.clone())
    }
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.same_head(other) && self.operands == other.operands
    }
}
