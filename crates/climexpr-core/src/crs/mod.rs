//! Canonical reference strings.
//!
//! Every expression has exactly one CRS. The rules are:
//!
//! ```text
//! dataset       demo|X|tas|1980-1981|global|monthly
//! tree          ccdo(<operand>,None,<operand>,operator='zonmean')
//! ensemble      ens({'a':<expr>,'b':<expr>})
//! named output  stats(<operand>).sd
//! page          cpage([[<expr>,None]],widths=[1.0],heights=[1.0],title='x')
//! placeholder   ARG
//! ```
//!
//! Parameters and decorations are written in name order; housekeeping
//! parameters (names starting with `_`) are left out.

pub mod parser;

use crate::expr::{quote, Expr, ParamValue, Tree, PLACEHOLDER_CRS};
use crate::project::{FacetMap, Project};

/// CRS keyword of ensembles.
pub const ENSEMBLE_KEYWORD: &str = "ens";
/// CRS keyword of pages.
pub const PAGE_KEYWORD: &str = "cpage";
/// CRS of an omitted operand or empty page cell.
pub const NULL_OPERAND: &str = "None";

/// Names that cannot be used for operators or macros.
pub const RESERVED_NAMES: [&str; 4] = [ENSEMBLE_KEYWORD, PAGE_KEYWORD, PLACEHOLDER_CRS, NULL_OPERAND];

/// Builds the CRS of an expression.
pub fn build(expr: &Expr) -> String {
    render(expr, &mut |child| build(child))
}

/// Writes `expr` at the top level and delegates its children to `child`.
///
/// [`build`] passes itself; the macro rewriter passes its own recursion so
/// that rewritten children are reassembled with the same syntax.
pub fn render(expr: &Expr, child: &mut dyn FnMut(&Expr) -> String) -> String {
    match expr {
        Expr::Dataset(d) => d.crs().to_string(),
        Expr::Placeholder => PLACEHOLDER_CRS.to_string(),
        Expr::Tree(tree) => render_tree(tree, child),
        Expr::Ensemble(ensemble) => {
            let members: Vec<String> = ensemble
                .iter()
                .map(|(label, member)| format!("{}:{}", quote(label), child(member)))
                .collect();
            format!("{}({{{}}})", ENSEMBLE_KEYWORD, members.join(","))
        }
        Expr::Output(output) => format!("{}.{}", child(output.father()), output.name()),
        Expr::Page(page) => {
            let rows: Vec<String> = page
                .rows()
                .iter()
                .map(|row| {
                    let cells: Vec<String> = row
                        .iter()
                        .map(|c| match c {
                            Some(e) => child(e),
                            None => NULL_OPERAND.to_string(),
                        })
                        .collect();
                    format!("[{}]", cells.join(","))
                })
                .collect();
            let mut args = vec![
                format!("[{}]", rows.join(",")),
                format!("widths={}", float_list(page.widths())),
                format!("heights={}", float_list(page.heights())),
            ];
            args.extend(
                page.decorations()
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v.repr())),
            );
            format!("{}({})", PAGE_KEYWORD, args.join(","))
        }
    }
}

/// Builds the CRS of a tree.
pub fn build_tree(tree: &Tree) -> String {
    render_tree(tree, &mut |child| build(child))
}

fn render_tree(tree: &Tree, child: &mut dyn FnMut(&Expr) -> String) -> String {
    let mut args: Vec<String> = tree
        .operands()
        .iter()
        .map(|op| match op {
            Some(e) => child(e),
            None => NULL_OPERAND.to_string(),
        })
        .collect();
    args.extend(
        tree.serialized_params()
            .map(|(k, v)| format!("{}={}", k, v.repr())),
    );
    format!("{}({})", tree.name(), args.join(","))
}

fn float_list(values: &[f64]) -> String {
    ParamValue::List(values.iter().copied().map(ParamValue::Float).collect()).repr()
}

/// Joins facet values in project order with the project separator.
pub fn dataset_crs(project: &Project, facets: &FacetMap) -> String {
    project
        .facets()
        .iter()
        .map(|f| facets.get(f).map(|v| v.repr()).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(&project.separator().to_string())
}

/// Computes the cache key of a CRS: lowercase hex BLAKE3.
pub fn digest(crs: &str) -> String {
    blake3::hash(crs.as_bytes()).to_hex().to_string()
}
