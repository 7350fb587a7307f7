//! Labelled, ordered collections of expressions.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{CrsError, Result};

use super::Expr;

/// An ensemble: members keyed by label, iterated in an explicit order.
#[derive(Debug, Clone, PartialEq)]
pub struct Ensemble {
    members: BTreeMap<String, Expr>,
    order: Vec<String>,
}

impl Ensemble {
    /// Builds an ensemble whose order is the order of `members`.
    pub fn new<I, L>(members: I) -> Result<Self>
    where
        I: IntoIterator<Item = (L, Expr)>,
        L: Into<String>,
    {
        let mut map = BTreeMap::new();
        let mut order = Vec::new();
        for (label, member) in members {
            let label = label.into();
            if label.is_empty() {
                return Err(CrsError::UnknownExpression(
                    "ensemble member with an empty label".to_string(),
                ));
            }
            if map.insert(label.clone(), member).is_some() {
                return Err(CrsError::AmbiguousExpression(format!(
                    "ensemble label '{}' used twice",
                    label
                )));
            }
            order.push(label);
        }
        if order.is_empty() {
            return Err(CrsError::UnknownExpression("empty ensemble".to_string()));
        }
        Ok(Self {
            members: map,
            order,
        })
    }

    /// Members in order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Expr)> {
        self.order.iter().filter_map(|l| self.members.get_key_value(l))
    }

    /// Members in label order, mutably.
    pub(crate) fn members_mut(&mut self) -> impl Iterator<Item = (&String, &mut Expr)> {
        self.members.iter_mut()
    }

    pub fn get(&self, label: &str) -> Option<&Expr> {
        self.members.get(label)
    }

    pub fn labels(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Reorders members. `order` must be exactly a permutation of the
    /// current labels.
    pub fn set_order<S: AsRef<str>>(&mut self, order: &[S]) -> Result<()> {
        let wanted: Vec<String> = order.iter().map(|s| s.as_ref().to_string()).collect();
        let unique: BTreeSet<&String> = wanted.iter().collect();
        let is_permutation = wanted.len() == self.order.len()
            && unique.len() == wanted.len()
            && unique.iter().all(|l| self.members.contains_key(*l));
        if !is_permutation {
            return Err(CrsError::EnsembleLabelSetMismatch {
                expected: self.order.clone(),
                got: wanted,
            });
        }
        self.order = wanted;
        Ok(())
    }
}

impl IntoIterator for Ensemble {
    type Item = (String, Expr);
    type IntoIter = std::vec::IntoIter<(String, Expr)>;

    fn into_iter(mut self) -> Self::IntoIter {
        self.order
            .iter()
            .filter_map(|l| self.members.remove(l).map(|m| (l.clone(), m)))
            .collect::<Vec<_>>()
            .into_iter()
    }
}
