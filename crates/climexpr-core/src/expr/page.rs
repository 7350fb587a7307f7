//! Composite pages: a grid of expressions with geometry and decorations.

use std::collections::BTreeMap;

use crate::error::{CrsError, Result};

use super::{Expr, ParamValue};

/// A page of plots laid out on a grid. Empty cells are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    rows: Vec<Vec<Option<Expr>>>,
    widths: Vec<f64>,
    heights: Vec<f64>,
    decorations: BTreeMap<String, ParamValue>,
}

/// Keyword arguments of `cpage(...)` that carry geometry.
pub const GEOMETRY_KEYS: [&str; 2] = ["widths", "heights"];

fn equal_fractions(n: usize) -> Vec<f64> {
    vec![1.0 / n as f64; n]
}

impl Page {
    /// Builds a page. Missing widths or heights default to equal fractions.
    pub fn new(
        rows: Vec<Vec<Option<Expr>>>,
        widths: Option<Vec<f64>>,
        heights: Option<Vec<f64>>,
        decorations: BTreeMap<String, ParamValue>,
    ) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Err(CrsError::InvalidPage("page has no rows".to_string()));
        };
        let widths = widths.unwrap_or_else(|| equal_fractions(first.len()));
        let heights = heights.unwrap_or_else(|| equal_fractions(rows.len()));

        if widths.is_empty() {
            return Err(CrsError::InvalidPage("page has no columns".to_string()));
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != widths.len()) {
            return Err(CrsError::InvalidPage(format!(
                "row {} has {} cells, expected {}",
                i,
                row.len(),
                widths.len()
            )));
        }
        if heights.len() != rows.len() {
            return Err(CrsError::InvalidPage(format!(
                "{} heights for {} rows",
                heights.len(),
                rows.len()
            )));
        }
        if let Some(name) = decorations.keys().find(|k| GEOMETRY_KEYS.contains(&k.as_str())) {
            return Err(CrsError::InvalidPage(format!(
                "'{}' is page geometry, not a decoration",
                name
            )));
        }
        if let Some(name) = decorations.iter().find(|(_, v)| !v.is_finite()).map(|(k, _)| k) {
            return Err(CrsError::NonFiniteParameter {
                param: name.clone(),
            });
        }
        if widths.iter().chain(heights.iter()).any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(CrsError::InvalidPage(
                "widths and heights must be positive".to_string(),
            ));
        }
        Ok(Self {
            rows,
            widths,
            heights,
            decorations,
        })
    }

    pub fn rows(&self) -> &[Vec<Option<Expr>>] {
        &self.rows
    }

    /// Cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = &Option<Expr>> {
        self.rows.iter().flatten()
    }

    pub(crate) fn cells_mut(&mut self) -> impl Iterator<Item = &mut Option<Expr>> {
        self.rows.iter_mut().flatten()
    }

    pub fn widths(&self) -> &[f64] {
        &self.widths
    }

    pub fn heights(&self) -> &[f64] {
        &self.heights
    }

    pub fn decorations(&self) -> &BTreeMap<String, ParamValue> {
        &self.decorations
    }

    /// Same grid shape, widths, heights and decorations.
    pub fn geometry_eq(&self, other: &Page) -> bool {
        self.rows.len() == other.rows.len()
            && self.widths == other.widths
            && self.heights == other.heights
            && self.decorations == other.decorations
    }

    /// Rebuilds the page with new cells in row-major order, keeping geometry.
    pub(crate) fn with_cells(&self, cells: Vec<Option<Expr>>) -> Result<Self> {
        let columns = self.widths.len();
        if cells.len() != columns * self.rows.len() {
            return Err(CrsError::InvalidPage(format!(
                "{} cells for a {}x{} grid",
                cells.len(),
                self.rows.len(),
                columns
            )));
        }
        let mut rows = Vec::with_capacity(self.rows.len());
        let mut cells = cells.into_iter();
        for _ in 0..self.rows.len() {
            rows.push(cells.by_ref().take(columns).collect());
        }
        Page::new(
            rows,
            Some(self.widths.clone()),
            Some(self.heights.clone()),
            self.decorations.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn grid() -> Vec<Vec<Option<Expr>>> {
        vec![
            vec![Some(Expr::Placeholder), Some(Expr::Placeholder)],
            vec![Some(Expr::Placeholder), None],
        ]
    }

    #[test]
    fn test_default_geometry() {
        let page = Page::new(grid(), None, None, BTreeMap::new()).unwrap();
        assert_eq!(page.widths(), &[0.5, 0.5]);
        assert_eq!(page.heights(), &[0.5, 0.5]);
        assert_eq!(page.cells().count(), 4);
        assert_eq!(page.cells().flatten().count(), 3);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let rows = vec![vec![Some(Expr::Placeholder)], vec![None, None]];
        assert!(matches!(
            Page::new(rows, None, None, BTreeMap::new()),
            Err(CrsError::InvalidPage(_))
        ));
    }

    #[test]
    fn test_heights_must_match_rows() {
        assert!(Page::new(grid(), None, Some(vec![1.0]), BTreeMap::new()).is_err());
        assert!(Page::new(grid(), Some(vec![0.5, 0.5, 0.5]), None, BTreeMap::new()).is_err());
        assert!(Page::new(vec![], None, None, BTreeMap::new()).is_err());
    }

    #[test]
    fn test_non_finite_decoration_rejected() {
        let mut decorations = BTreeMap::new();
        decorations.insert("scale".to_string(), ParamValue::Float(f64::NAN));
        assert!(matches!(
            Page::new(grid(), None, None, decorations),
            Err(CrsError::NonFiniteParameter { .. })
        ));
    }

    #[test]
    fn test_with_cells_keeps_geometry() {
        let page = Page::new(grid(), Some(vec![0.3, 0.7]), None, BTreeMap::new()).unwrap();
        let rebuilt = page.with_cells(vec![None, Some(Expr::Placeholder), None, None]).unwrap();
        assert!(rebuilt.geometry_eq(&page));
        assert_eq!(rebuilt.rows()[0][1], Some(Expr::Placeholder));
        assert!(page.with_cells(vec![None]).is_err());
    }
}
