//! Named outputs of multi-output trees.

use crate::error::{CrsError, Result};

use super::Expr;

/// One named output of a tree (`father.name` in CRS form).
#[derive(Debug, Clone, PartialEq)]
pub struct NamedOutput {
    father: Box<Expr>,
    name: String,
}

impl NamedOutput {
    /// The father must be a tree whose operator declares `name`. A
    /// placeholder father is accepted inside macro templates.
    pub fn new(father: Expr, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        match &father {
            Expr::Tree(tree) if tree.operator().has_output(&name) && !name.is_empty() => {}
            Expr::Tree(tree) => {
                return Err(CrsError::UnknownOutput {
                    operator: tree.name().to_string(),
                    output: name,
                })
            }
            Expr::Placeholder => {}
            other => {
                return Err(CrsError::UnknownOutput {
                    operator: other.kind().to_string(),
                    output: name,
                })
            }
        }
        Ok(Self {
            father: Box::new(father),
            name,
        })
    }

    pub fn father(&self) -> &Expr {
        &self.father
    }

    pub(crate) fn father_mut(&mut self) -> &mut Expr {
        &mut self.father
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}
