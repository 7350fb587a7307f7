//! Macros: expression templates with placeholder holes.
//!
//! A macro is extracted from a concrete expression by turning chosen
//! subexpressions into [`Expr::Placeholder`]. It can then be matched against
//! other expressions ([`Macro::cmatch`]), instantiated with operands
//! ([`Macro::instantiate`]), and used to rewrite a CRS into its shortest
//! macro form ([`rewrite`]).

use tracing::trace;

use crate::crs;
use crate::error::{CrsError, Result};
use crate::expr::{Expr, NamedOutput};
use crate::registry::Registry;

/// A named template.
#[derive(Debug, Clone, PartialEq)]
pub struct Macro {
    name: String,
    template: Expr,
}

impl Macro {
    pub fn new(name: impl Into<String>, template: Expr) -> Self {
        Self {
            name: name.into(),
            template,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &Expr {
        &self.template
    }

    /// Number of operands the macro takes.
    pub fn arity(&self) -> usize {
        self.template.placeholder_count()
    }

    /// Matches the template against `concrete`; see [`cmatch`].
    pub fn cmatch(&self, concrete: &Expr) -> Option<Vec<Expr>> {
        cmatch(&self.template, concrete)
    }

    /// Fills the placeholders depth-first, left to right.
    pub fn instantiate(&self, operands: Vec<Expr>) -> Result<Expr> {
        let expected = self.arity();
        if operands.len() != expected {
            return Err(CrsError::MacroOperandCountMismatch {
                name: self.name.clone(),
                expected,
                got: operands.len(),
            });
        }
        let mut operands = operands.into_iter();
        fill(&self.template, &mut operands)
    }
}

/// Replaces the subexpressions of `expr` found in `holes` by placeholders.
///
/// With no holes, every dataset and ensemble becomes a placeholder. Trees,
/// named outputs and pages are rebuilt around their transformed children.
pub fn extract(expr: &Expr, holes: &[Expr]) -> Result<Expr> {
    if holes.iter().any(|h| h == expr) {
        return Ok(Expr::Placeholder);
    }
    match expr {
        Expr::Dataset(_) | Expr::Ensemble(_) if holes.is_empty() => Ok(Expr::Placeholder),
        Expr::Dataset(_) | Expr::Ensemble(_) | Expr::Placeholder => Ok(expr.clone()),
        Expr::Tree(tree) => {
            let operands = tree
                .operands()
                .iter()
                .map(|op| op.as_ref().map(|e| extract(e, holes)).transpose())
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::Tree(tree.with_operands(operands)?))
        }
        Expr::Output(output) => {
            let father = extract(output.father(), holes)?;
            Ok(Expr::Output(NamedOutput::new(father, output.name())?))
        }
        Expr::Page(page) => {
            let cells = page
                .cells()
                .map(|c| c.as_ref().map(|e| extract(e, holes)).transpose())
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::Page(page.with_cells(cells)?))
        }
    }
}

/// Structural match of `template` against `concrete`.
///
/// Returns the concrete subexpressions bound to the template's
/// placeholders, depth-first and left to right, or `None` when the shapes
/// differ. A template without placeholders that matches returns an empty
/// list.
pub fn cmatch(template: &Expr, concrete: &Expr) -> Option<Vec<Expr>> {
    let mut bindings = Vec::new();
    if match_into(template, concrete, &mut bindings) {
        Some(bindings)
    } else {
        None
    }
}

fn match_into(template: &Expr, concrete: &Expr, bindings: &mut Vec<Expr>) -> bool {
    match (template, concrete) {
        (Expr::Placeholder, c) => {
            bindings.push(c.clone());
            true
        }
        (Expr::Tree(t), Expr::Tree(c)) => {
            if !t.same_head(c) || t.operands().len() != c.operands().len() {
                trace!(template = t.name(), concrete = c.name(), "tree heads differ");
                return false;
            }
            match_all(t.operands().iter().zip(c.operands()), bindings)
        }
        (Expr::Output(t), Expr::Output(c)) => {
            t.name() == c.name() && match_into(t.father(), c.father(), bindings)
        }
        (Expr::Page(t), Expr::Page(c)) => t.geometry_eq(c) && match_all(t.cells().zip(c.cells()), bindings),
        (Expr::Dataset(t), Expr::Dataset(c)) => t == c,
        (Expr::Ensemble(t), Expr::Ensemble(c)) => t == c,
        _ => false,
    }
}

fn match_all<'a, I>(pairs: I, bindings: &mut Vec<Expr>) -> bool
where
    I: Iterator<Item = (&'a Option<Expr>, &'a Option<Expr>)>,
{
    for pair in pairs {
        let ok = match pair {
            (None, None) => true,
            (Some(t), Some(c)) => match_into(t, c, bindings),
            _ => false,
        };
        if !ok {
            return false;
        }
    }
    true
}

fn fill(template: &Expr, operands: &mut impl Iterator<Item = Expr>) -> Result<Expr> {
    match template {
        Expr::Placeholder => operands
            .next()
            .ok_or_else(|| CrsError::Evaluation("macro operand list exhausted".to_string())),
        Expr::Dataset(_) | Expr::Ensemble(_) => Ok(template.clone()),
        Expr::Tree(tree) => {
            let mut filled = Vec::with_capacity(tree.operands().len());
            for op in tree.operands() {
                filled.push(match op {
                    Some(e) => Some(fill(e, operands)?),
                    None => None,
                });
            }
            Ok(Expr::Tree(tree.with_operands(filled)?))
        }
        Expr::Output(output) => {
            let father = fill(output.father(), operands)?;
            Ok(Expr::Output(NamedOutput::new(father, output.name())?))
        }
        Expr::Page(page) => {
            let mut filled = Vec::new();
            for cell in page.cells() {
                filled.push(match cell {
                    Some(e) => Some(fill(e, operands)?),
                    None => None,
                });
            }
            Ok(Expr::Page(page.with_cells(filled)?))
        }
    }
}

/// Rewrites a CRS into macro calls.
///
/// The first declared macro matching a node wins and its bindings are
/// rewritten in turn; otherwise the node is reassembled from rewritten
/// children. With `allow_top_level` unset, the root itself is never
/// replaced.
pub fn rewrite(registry: &Registry, crs: &str, allow_top_level: bool) -> Result<String> {
    let expr = registry.parse_expr(crs)?;
    Ok(rewrite_expr(registry, &expr, allow_top_level))
}

/// Same as [`rewrite`], on a parsed expression.
pub fn rewrite_expr(registry: &Registry, expr: &Expr, allow_top_level: bool) -> String {
    if allow_top_level {
        for m in registry.macros() {
            if let Some(args) = m.cmatch(expr) {
                trace!(macro_name = m.name(), "macro matched");
                let args: Vec<String> = args
                    .iter()
                    .map(|a| rewrite_expr(registry, a, true))
                    .collect();
                return format!("{}({})", m.name(), args.join(","));
            }
        }
    }
    crs::render(expr, &mut |child| rewrite_expr(registry, child, true))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::expr::{ParamValue, Tree};
    use crate::project::Project;
    use pretty_assertions::assert_eq;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .declare_project(Project::builder("demo").separator('|').build().unwrap())
            .unwrap();
        registry
            .declare_operator("ccdo", "cdo ${operator} ${in} ${out}", "nc", &BTreeMap::new())
            .unwrap();
        registry
            .declare_operator("plot", "plot ${in} ${in_2} ${title} ${out}", "png", &BTreeMap::new())
            .unwrap();
        registry
    }

    fn ds(registry: &Registry, model: &str) -> Expr {
        Expr::Dataset(
            registry
                .dataset([
                    ("project", "demo"),
                    ("model", model),
                    ("variable", "tas"),
                    ("period", "1980-1981"),
                ])
                .unwrap(),
        )
    }

    fn ccdo(registry: &Registry, operand: Expr, operator: &str) -> Expr {
        let mut params = BTreeMap::new();
        params.insert("operator".to_string(), ParamValue::from(operator));
        registry.call("ccdo", vec![Some(operand)], params).unwrap()
    }

    fn plot(registry: &Registry, operand: Expr) -> Expr {
        registry.call("plot", vec![Some(operand)], BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_extract_and_match() {
        let r = registry();
        let d1 = ds(&r, "A");
        let e = plot(&r, ccdo(&r, d1.clone(), "zonmean"));
        let template = extract(&e, &[d1]).unwrap();
        assert_eq!(template.crs(), "plot(ccdo(ARG,operator='zonmean'))");

        let d2 = ds(&r, "B");
        let other = plot(&r, ccdo(&r, d2.clone(), "zonmean"));
        assert_eq!(cmatch(&template, &other), Some(vec![d2.clone()]));

        let different = plot(&r, ccdo(&r, d2, "timavg"));
        assert_eq!(cmatch(&template, &different), None);
    }

    #[test]
    fn test_extract_without_holes() {
        let r = registry();
        let e = plot(&r, ccdo(&r, ds(&r, "A"), "zonmean"));
        assert_eq!(extract(&e, &[]).unwrap().crs(), "plot(ccdo(ARG,operator='zonmean'))");
    }

    #[test]
    fn test_literal_match_has_no_bindings() {
        let r = registry();
        let e = ccdo(&r, ds(&r, "A"), "zonmean");
        assert_eq!(cmatch(&e, &e), Some(vec![]));
        assert_eq!(cmatch(&e, &ccdo(&r, ds(&r, "B"), "zonmean")), None);
    }

    #[test]
    fn test_null_operands_match_only_null() {
        let r = registry();
        let two = Expr::Tree(
            Tree::new(
                r.operator("plot").unwrap(),
                vec![Some(Expr::Placeholder), Some(ds(&r, "A"))],
                BTreeMap::new(),
            )
            .unwrap(),
        );
        assert_eq!(cmatch(&two, &plot(&r, ds(&r, "B"))), None);
    }

    #[test]
    fn test_instantiate_round_trip() {
        let r = registry();
        let d1 = ds(&r, "A");
        let e = plot(&r, ccdo(&r, d1.clone(), "zonmean"));
        let m = Macro::new("zplot", extract(&e, &[d1]).unwrap());
        assert_eq!(m.arity(), 1);
        let bindings = m.cmatch(&e).unwrap();
        assert_eq!(m.instantiate(bindings).unwrap().crs(), e.crs());
    }

    #[test]
    fn test_instantiate_count_mismatch() {
        let r = registry();
        let m = Macro::new("zplot", extract(&plot(&r, ds(&r, "A")), &[]).unwrap());
        assert!(matches!(
            m.instantiate(vec![]),
            Err(CrsError::MacroOperandCountMismatch { expected: 1, got: 0, .. })
        ));
        assert!(matches!(
            m.instantiate(vec![ds(&r, "A"), ds(&r, "B")]),
            Err(CrsError::MacroOperandCountMismatch { expected: 1, got: 2, .. })
        ));
    }

    #[test]
    fn test_rewrite() {
        let mut r = registry();
        let d1 = ds(&r, "A");
        let template = extract(&ccdo(&r, d1.clone(), "zonmean"), &[d1]).unwrap();
        r.declare_macro("zm", template).unwrap();

        let e = plot(&r, ccdo(&r, ds(&r, "B"), "zonmean"));
        assert_eq!(
            rewrite(&r, &e.crs(), true).unwrap(),
            "plot(zm(demo|B|tas|1980-1981|global))"
        );
        let top = ccdo(&r, ds(&r, "B"), "zonmean");
        assert_eq!(rewrite(&r, &top.crs(), true).unwrap(), "zm(demo|B|tas|1980-1981|global)");
        assert_eq!(rewrite(&r, &top.crs(), false).unwrap(), top.crs());
    }
}
