//! Declarations and the single dispatch table.
//!
//! A [`Registry`] owns everything declared at startup: projects, global
//! facet defaults, data locations, aliases, derived variables, operators and
//! macros. Operators and macros share one name-keyed table, so
//! [`Registry::call`] is the only way to apply either by name.
//!
//! Most callers use their own `Registry`. For code that needs process-wide
//! state, [`global`] returns a registry behind one coarse lock and
//! [`reset_global`] tears it down.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tracing::debug;

use crate::alias::{Alias, DerivedVariable};
use crate::crs::parser::{parse_crs, RawExpr};
use crate::crs::{self, RESERVED_NAMES};
use crate::error::{CrsError, Result};
use crate::expr::{Dataset, Ensemble, Expr, NamedOutput, Page, ParamValue, Tree};
use crate::facet::{FacetValue, DOMAIN_FACET, GLOBAL_DOMAIN};
use crate::location::{KeyField, LocationEntry, LocationRegistry};
use crate::macros::Macro;
use crate::operator::OperatorMeta;
use crate::project::{FacetMap, Project};

/// What a name in the dispatch table designates.
#[derive(Debug, Clone)]
pub enum Callable {
    Operator(Arc<OperatorMeta>),
    Macro(Arc<Macro>),
}

/// All declarations of a session.
#[derive(Debug, Default)]
pub struct Registry {
    projects: BTreeMap<String, Arc<Project>>,
    global_defaults: BTreeMap<String, String>,
    locations: LocationRegistry,
    aliases: BTreeMap<(String, String), Arc<Alias>>,
    derived: BTreeMap<(String, String), DerivedVariable>,
    callables: BTreeMap<String, Callable>,
    macro_order: Vec<String>,
    nodes: HashMap<String, Expr>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Projects and defaults
    // ------------------------------------------------------------------

    /// Declares a project, replacing any project of the same name.
    pub fn declare_project(&mut self, project: Project) -> Result<Arc<Project>> {
        debug!(project = project.name(), facets = ?project.facets(), "declaring project");
        let project = Arc::new(project);
        self.projects
            .insert(project.name().to_string(), project.clone());
        Ok(project)
    }

    pub fn project(&self, name: &str) -> Result<Arc<Project>> {
        self.projects
            .get(name)
            .cloned()
            .ok_or_else(|| CrsError::UnknownProject(name.to_string()))
    }

    pub fn projects(&self) -> impl Iterator<Item = &Arc<Project>> {
        self.projects.values()
    }

    /// Declares a default used by every project that has `facet` and no
    /// default of its own.
    pub fn declare_default(&mut self, facet: impl Into<String>, value: impl Into<String>) {
        let facet = facet.into();
        let value = value.into();
        debug!(facet = %facet, value = %value, "declaring global default");
        self.global_defaults.insert(facet, value);
    }

    /// Default of `facet` in `project`: project default, then global
    /// default, then `global` for the domain.
    pub fn default_for(&self, project: &Project, facet: &str) -> Option<String> {
        project
            .default_for(facet)
            .or_else(|| self.global_defaults.get(facet).map(String::as_str))
            .or_else(|| (facet == DOMAIN_FACET).then_some(GLOBAL_DOMAIN))
            .map(str::to_string)
    }

    // ------------------------------------------------------------------
    // Locations, aliases, derived variables
    // ------------------------------------------------------------------

    pub fn declare_location(&mut self, entry: LocationEntry) -> Result<()> {
        if let KeyField::Is(name) = &entry.key.project {
            self.project(name)?;
        }
        self.locations.declare(entry);
        Ok(())
    }

    pub fn locations(&self) -> &LocationRegistry {
        &self.locations
    }

    pub fn declare_alias(&mut self, project: &str, alias: Alias) -> Result<()> {
        self.project(project)?;
        debug!(project, variable = %alias.variable, stored = %alias.stored_name, "declaring alias");
        self.aliases
            .insert((project.to_string(), alias.variable.clone()), Arc::new(alias));
        Ok(())
    }

    pub fn alias(&self, project: &str, variable: &str) -> Option<Arc<Alias>> {
        self.aliases
            .get(&(project.to_string(), variable.to_string()))
            .cloned()
    }

    /// Declares a variable computed by an operator from other variables.
    pub fn declare_derived(&mut self, derived: DerivedVariable) -> Result<()> {
        self.project(&derived.project)?;
        let operator = self.operator(&derived.operator)?;
        if derived.inputs.is_empty() || derived.inputs.len() > operator.max_operands() {
            return Err(CrsError::ArityMismatch {
                operator: operator.name.clone(),
                min: operator.min_operands(),
                max: operator.max_operands(),
                got: derived.inputs.len(),
            });
        }
        debug!(project = %derived.project, variable = %derived.variable, operator = %derived.operator, "declaring derived variable");
        self.derived.insert(
            (derived.project.clone(), derived.variable.clone()),
            derived,
        );
        Ok(())
    }

    pub fn derived(&self, project: &str, variable: &str) -> Option<&DerivedVariable> {
        self.derived
            .get(&(project.to_string(), variable.to_string()))
    }

    // ------------------------------------------------------------------
    // Dispatch table
    // ------------------------------------------------------------------

    /// Declares an operator from its command template.
    pub fn declare_operator(
        &mut self,
        name: &str,
        command: &str,
        format: &str,
        output_var_formats: &BTreeMap<String, String>,
    ) -> Result<Arc<OperatorMeta>> {
        check_callable_name(name).map_err(|reason| CrsError::MalformedOperatorTemplate {
            name: name.to_string(),
            reason,
        })?;
        let meta = Arc::new(OperatorMeta::parse(name, command, format, output_var_formats)?);
        debug!(operator = name, slots = meta.max_operands(), medium = ?meta.medium, "declaring operator");
        self.macro_order.retain(|m| m != name);
        self.callables
            .insert(name.to_string(), Callable::Operator(meta.clone()));
        Ok(meta)
    }

    pub fn operator(&self, name: &str) -> Result<Arc<OperatorMeta>> {
        match self.callables.get(name) {
            Some(Callable::Operator(meta)) => Ok(meta.clone()),
            _ => Err(CrsError::UnknownOperator(name.to_string())),
        }
    }

    /// Declares a macro. Macros are tried by [`crate::macros::rewrite`] in
    /// declaration order; re-declaring a name moves it to the end.
    pub fn declare_macro(&mut self, name: &str, template: Expr) -> Result<Arc<Macro>> {
        check_callable_name(name).map_err(CrsError::UnknownExpression)?;
        if template.is_placeholder() {
            return Err(CrsError::UnknownExpression(format!(
                "macro '{}' is a bare placeholder",
                name
            )));
        }
        let m = Arc::new(Macro::new(name, template));
        debug!(macro_name = name, arity = m.arity(), template = %m.template(), "declaring macro");
        self.macro_order.retain(|n| n != name);
        self.macro_order.push(name.to_string());
        self.callables
            .insert(name.to_string(), Callable::Macro(m.clone()));
        Ok(m)
    }

    pub fn macro_def(&self, name: &str) -> Option<&Arc<Macro>> {
        match self.callables.get(name) {
            Some(Callable::Macro(m)) => Some(m),
            _ => None,
        }
    }

    /// Macros in declaration order.
    pub fn macros(&self) -> impl Iterator<Item = &Arc<Macro>> {
        self.macro_order.iter().filter_map(|n| self.macro_def(n))
    }

    pub fn callable(&self, name: &str) -> Option<&Callable> {
        self.callables.get(name)
    }

    /// Applies an operator or a macro by name.
    ///
    /// Operators build a [`Tree`]. Macros are instantiated with the operands
    /// and take no parameters.
    pub fn call(
        &self,
        name: &str,
        operands: Vec<Option<Expr>>,
        params: BTreeMap<String, ParamValue>,
    ) -> Result<Expr> {
        match self.callables.get(name) {
            Some(Callable::Operator(meta)) => Ok(Expr::Tree(Tree::new(meta.clone(), operands, params)?)),
            Some(Callable::Macro(m)) => {
                if let Some(param) = params.keys().next() {
                    return Err(CrsError::UnknownParameter {
                        operator: name.to_string(),
                        param: param.clone(),
                    });
                }
                let got = operands.len();
                let operands: Option<Vec<Expr>> = operands.into_iter().collect();
                let operands = operands.ok_or_else(|| CrsError::MacroOperandCountMismatch {
                    name: name.to_string(),
                    expected: m.arity(),
                    got,
                })?;
                m.instantiate(operands)
            }
            None => Err(CrsError::UnknownOperator(name.to_string())),
        }
    }

    // ------------------------------------------------------------------
    // Datasets
    // ------------------------------------------------------------------

    /// Builds a dataset from `(facet, value)` pairs.
    ///
    /// Facet synonyms are translated, missing facets take their defaults,
    /// `period` and `domain` are parsed, then the project's normalization
    /// hook runs and the alias of `(project, variable)` is attached.
    pub fn dataset<I, K, V>(&self, pairs: I) -> Result<Dataset>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let raw: Vec<(String, String)> = pairs
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect();
        let project_name = raw
            .iter()
            .find(|(k, _)| k == "project")
            .map(|(_, v)| v.clone())
            .ok_or_else(|| CrsError::MissingRequiredFacet {
                project: String::new(),
                facet: "project".to_string(),
            })?;
        let project = self.project(&project_name)?;

        let mut given: BTreeMap<String, String> = BTreeMap::new();
        for (key, value) in raw {
            let facet = project
                .canonical_facet(&key)
                .ok_or_else(|| CrsError::UnknownFacet {
                    project: project.name().to_string(),
                    facet: key.clone(),
                })?;
            given.insert(facet.to_string(), value);
        }

        let mut facets = FacetMap::new();
        for facet in project.facets() {
            let raw = match given.remove(facet) {
                Some(v) => v,
                None => self
                    .default_for(&project, facet)
                    .ok_or_else(|| CrsError::MissingRequiredFacet {
                        project: project.name().to_string(),
                        facet: facet.clone(),
                    })?,
            };
            facets.insert(facet.clone(), FacetValue::parse(facet, &raw)?);
        }
        self.dataset_from_facets(project, facets)
    }

    /// Builds a dataset from typed values and attaches its alias.
    pub fn dataset_from_facets(&self, project: Arc<Project>, facets: FacetMap) -> Result<Dataset> {
        let dataset = Dataset::from_facets(project, facets, None)?;
        let alias = dataset
            .variable()
            .and_then(|v| self.alias(dataset.project().name(), v));
        Ok(dataset.with_alias(alias))
    }

    /// Splits `s` on the project's separator. Succeeds only when the field
    /// count equals the facet count and the first field is the project name.
    pub fn crs2ds(&self, project: &str, s: &str) -> Result<Dataset> {
        let project = self.project(project)?;
        let fields: Vec<&str> = s.split(project.separator()).collect();
        if fields.len() != project.facets().len() || fields[0] != project.name() {
            return Err(CrsError::UnknownExpression(s.to_string()));
        }
        let mut facets = FacetMap::new();
        for (facet, raw) in project.facets().iter().zip(fields) {
            facets.insert(facet.clone(), FacetValue::parse(facet, raw)?);
        }
        self.dataset_from_facets(project, facets)
    }

    /// Parses a dataset string against every project.
    pub fn ds(&self, s: &str) -> Result<Dataset> {
        let mut found: Vec<Dataset> = self
            .projects
            .keys()
            .filter_map(|name| self.crs2ds(name, s).ok())
            .collect();
        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err(CrsError::UnknownExpression(s.to_string())),
            _ => Err(CrsError::AmbiguousExpression(format!(
                "'{}' parses in projects {}",
                s,
                found
                    .iter()
                    .map(|d| d.project().name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Replaces a dataset whose variable is derived by the operator tree
    /// that computes it, recursively.
    pub fn expand_derived(&self, dataset: &Dataset) -> Result<Expr> {
        let Some(variable) = dataset.variable() else {
            return Ok(Expr::Dataset(dataset.clone()));
        };
        let Some(derived) = self.derived(dataset.project().name(), variable) else {
            return Ok(Expr::Dataset(dataset.clone()));
        };
        let mut operands = Vec::with_capacity(derived.inputs.len());
        for input in &derived.inputs {
            let member = dataset
                .with_values([("variable".to_string(), FacetValue::Text(input.clone()))])?;
            let alias = self.alias(dataset.project().name(), input);
            operands.push(Some(self.expand_derived(&member.with_alias(alias))?));
        }
        self.call(&derived.operator, operands, derived.params.clone())
    }

    // ------------------------------------------------------------------
    // Parsing
    // ------------------------------------------------------------------

    /// Parses any CRS into an expression. Calls to macros are instantiated.
    pub fn parse_expr(&self, s: &str) -> Result<Expr> {
        let raw = parse_crs(s)?;
        self.to_expr(raw)
    }

    fn to_expr(&self, raw: RawExpr) -> Result<Expr> {
        match raw {
            RawExpr::Placeholder => Ok(Expr::Placeholder),
            RawExpr::Token(s) => self.ds(&s).map(Expr::Dataset),
            RawExpr::Call {
                name,
                operands,
                params,
            } => {
                let operands = operands
                    .into_iter()
                    .map(|op| op.map(|o| self.to_expr(o)).transpose())
                    .collect::<Result<Vec<_>>>()?;
                self.call(&name, operands, params.into_iter().collect())
            }
            RawExpr::Ensemble(members) => {
                let members = members
                    .into_iter()
                    .map(|(label, m)| Ok((label, self.to_expr(m)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expr::Ensemble(Ensemble::new(members)?))
            }
            RawExpr::Page { rows, params } => {
                let rows = rows
                    .into_iter()
                    .map(|row| {
                        row.into_iter()
                            .map(|c| c.map(|e| self.to_expr(e)).transpose())
                            .collect::<Result<Vec<_>>>()
                    })
                    .collect::<Result<Vec<_>>>()?;
                let mut widths = None;
                let mut heights = None;
                let mut decorations = BTreeMap::new();
                for (key, value) in params {
                    match key.as_str() {
                        "widths" => widths = Some(number_list(&key, &value)?),
                        "heights" => heights = Some(number_list(&key, &value)?),
                        _ => {
                            decorations.insert(key, value);
                        }
                    }
                }
                Ok(Expr::Page(Page::new(rows, widths, heights, decorations)?))
            }
            RawExpr::Output { father, name } => {
                let father = self.to_expr(*father)?;
                Ok(Expr::Output(NamedOutput::new(father, name)?))
            }
        }
    }

    // ------------------------------------------------------------------
    // Node cache
    // ------------------------------------------------------------------

    /// Stores a node under its CRS and returns the CRS.
    pub fn register_node(&mut self, expr: Expr) -> String {
        let key = expr.crs();
        self.nodes.insert(key.clone(), expr);
        key
    }

    pub fn lookup_node(&self, crs: &str) -> Option<&Expr> {
        self.nodes.get(crs)
    }

    pub fn drop_node(&mut self, crs: &str) -> Option<Expr> {
        self.nodes.remove(crs)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Cache key of an expression, for the external artifact cache.
    pub fn cache_key(&self, expr: &Expr) -> String {
        crs::digest(&expr.crs())
    }
}

fn number_list(key: &str, value: &ParamValue) -> Result<Vec<f64>> {
    let invalid = || CrsError::InvalidPage(format!("'{}' must be a list of numbers", key));
    match value {
        ParamValue::List(items) => items
            .iter()
            .map(|v| v.as_f64().ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

fn check_callable_name(name: &str) -> std::result::Result<(), String> {
    let mut chars = name.chars();
    let identifier = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !identifier {
        return Err(format!("'{}' is not an identifier", name));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(format!("'{}' is a reserved name", name));
    }
    Ok(())
}

static GLOBAL: OnceLock<RwLock<Registry>> = OnceLock::new();

/// The process-wide registry.
pub fn global() -> &'static RwLock<Registry> {
    GLOBAL.get_or_init(|| RwLock::new(Registry::new()))
}

/// Drops every process-wide declaration and cached node.
pub fn reset_global() {
    let mut registry = global().write().unwrap_or_else(PoisonError::into_inner);
    *registry = Registry::new();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::{LocationKey, Organization};
    use pretty_assertions::assert_eq;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .declare_project(
                Project::builder("demo")
                    .facet("frequency")
                    .separator('|')
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .declare_operator("ccdo", "cdo ${operator} ${in} ${out}", "nc", &BTreeMap::new())
            .unwrap();
        registry
    }

    fn demo(registry: &Registry) -> Dataset {
        registry
            .dataset([
                ("project", "demo"),
                ("model", "X"),
                ("variable", "tas"),
                ("period", "1980-1981"),
                ("frequency", "monthly"),
            ])
            .unwrap()
    }

    #[test]
    fn test_dataset_defaults_and_synonym() {
        let r = registry();
        let d = demo(&r);
        assert_eq!(d.crs(), "demo|X|tas|1980-1981|global|monthly");
        assert_eq!(r.ds(d.crs()).unwrap(), d);
    }

    #[test]
    fn test_global_and_project_defaults() {
        let mut r = registry();
        r.declare_default("frequency", "daily");
        let d = r
            .dataset([("project", "demo"), ("model", "X"), ("variable", "tas"), ("period", "1980")])
            .unwrap();
        assert_eq!(d.text("frequency"), Some("daily"));

        r.declare_project(
            Project::builder("demo")
                .facet_with_default("frequency", "monthly")
                .separator('|')
                .build()
                .unwrap(),
        )
        .unwrap();
        let d = r
            .dataset([("project", "demo"), ("model", "X"), ("variable", "tas"), ("period", "1980")])
            .unwrap();
        assert_eq!(d.text("frequency"), Some("monthly"));
    }

    #[test]
    fn test_dataset_errors() {
        let r = registry();
        assert!(matches!(
            r.dataset([("project", "nope")]),
            Err(CrsError::UnknownProject(_))
        ));
        assert!(matches!(
            r.dataset([("project", "demo"), ("realm", "atmos")]),
            Err(CrsError::UnknownFacet { .. })
        ));
        assert!(matches!(
            r.dataset([("project", "demo"), ("model", "X"), ("variable", "tas"), ("period", "1980")]),
            Err(CrsError::MissingRequiredFacet { .. })
        ));
    }

    #[test]
    fn test_crs2ds_field_count() {
        let r = registry();
        assert!(r.crs2ds("demo", "demo|X|tas|1980-1981|global").is_err());
        assert!(r.crs2ds("demo", "other|X|tas|1980-1981|global|monthly").is_err());
        assert!(matches!(r.ds("nothing"), Err(CrsError::UnknownExpression(_))));
    }

    #[test]
    fn test_ambiguous_ds() {
        let mut r = Registry::new();
        r.declare_project(Project::builder("a").separator('|').facet("e").build().unwrap())
            .unwrap();
        r.declare_project(Project::builder("a|b").separator('%').facet("e").build().unwrap())
            .unwrap();
        let s = "a|b%s%v%1980-1981%global%x|y|1980-1981|global|z";
        assert!(r.crs2ds("a", s).is_ok());
        assert!(r.crs2ds("a|b", s).is_ok());
        assert!(matches!(r.ds(s), Err(CrsError::AmbiguousExpression(_))));
    }

    #[test]
    fn test_alias_is_attached() {
        let mut r = registry();
        r.declare_alias("demo", Alias::rename("tas", "t2m")).unwrap();
        let d = demo(&r);
        assert_eq!(d.alias().map(|a| a.stored_name.as_str()), Some("t2m"));
        assert_eq!(d.search_variable(), Some("t2m"));
    }

    #[test]
    fn test_call_dispatch() {
        let mut r = registry();
        let d = Expr::Dataset(demo(&r));
        let mut params = BTreeMap::new();
        params.insert("operator".to_string(), ParamValue::from("zonmean"));
        let tree = r.call("ccdo", vec![Some(d.clone())], params).unwrap();
        assert_eq!(
            tree.crs(),
            "ccdo(demo|X|tas|1980-1981|global|monthly,operator='zonmean')"
        );

        let template = crate::macros::extract(&tree, &[d.clone()]).unwrap();
        r.declare_macro("zm", template).unwrap();
        let via_macro = r.call("zm", vec![Some(d)], BTreeMap::new()).unwrap();
        assert_eq!(via_macro, tree);

        assert!(matches!(
            r.call("nope", vec![], BTreeMap::new()),
            Err(CrsError::UnknownOperator(_))
        ));
    }

    #[test]
    fn test_reserved_callable_names() {
        let mut r = registry();
        for name in ["ens", "cpage", "ARG", "None", "a-b"] {
            assert!(r
                .declare_operator(name, "x ${in} ${out}", "nc", &BTreeMap::new())
                .is_err());
        }
        assert!(r.declare_macro("m", Expr::Placeholder).is_err());
    }

    #[test]
    fn test_parse_expr_round_trip() {
        let r = registry();
        let crs = "ccdo(demo|X|tas|1980-1981|global|monthly,operator='zonmean')";
        assert_eq!(r.parse_expr(crs).unwrap().crs(), crs);
    }

    #[test]
    fn test_expand_derived() {
        let mut r = registry();
        r.declare_operator("minus", "cdo sub ${in} ${in_2} ${out}", "nc", &BTreeMap::new())
            .unwrap();
        r.declare_derived(DerivedVariable {
            project: "demo".into(),
            variable: "dtr".into(),
            operator: "minus".into(),
            inputs: vec!["tasmax".into(), "tasmin".into()],
            params: BTreeMap::new(),
        })
        .unwrap();
        let d = r
            .dataset([
                ("project", "demo"),
                ("model", "X"),
                ("variable", "dtr"),
                ("period", "1980-1981"),
                ("frequency", "monthly"),
            ])
            .unwrap();
        assert_eq!(
            r.expand_derived(&d).unwrap().crs(),
            "minus(demo|X|tasmax|1980-1981|global|monthly,demo|X|tasmin|1980-1981|global|monthly)"
        );
    }

    #[test]
    fn test_node_cache() {
        let mut r = registry();
        let key = r.register_node(Expr::Dataset(demo(&r)));
        assert!(r.lookup_node(&key).is_some());
        assert_eq!(r.node_count(), 1);
        assert!(r.drop_node(&key).is_some());
        assert!(r.lookup_node(&key).is_none());
    }

    #[test]
    fn test_location_needs_project() {
        let mut r = registry();
        let entry = LocationEntry::new(LocationKey::for_project("nope"), Organization::Generic, vec![]);
        assert!(matches!(r.declare_location(entry), Err(CrsError::UnknownProject(_))));
    }
}
