//! Evaluator and metadata boundaries.
//!
//! The library never runs external programs. [`evaluate`] walks an
//! expression, lists dataset files, and hands each operator application to
//! an [`Evaluator`] as a [`BuildRequest`]. Ensemble-dumb operators applied
//! to an ensemble are called once per member.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crs;
use crate::error::{CrsError, Result};
use crate::expr::{Dataset, Expr, NamedOutput, Page, ParamValue, Tree};
use crate::facet::{FacetValue, DOMAIN_FACET};
use crate::operator::{OperatorMeta, SlotKind};
use crate::registry::Registry;
use crate::resolve::{explore, select_files, ExploreMode, ExploreOptions};

/// Name of the main output of an operator.
pub const MAIN_OUTPUT: &str = "";

/// Files produced by evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Files(Vec<PathBuf>),
    /// Per-member files, in ensemble order.
    Members(Vec<(String, Vec<PathBuf>)>),
}

impl Artifact {
    pub fn files(&self) -> Vec<&Path> {
        match self {
            Artifact::Files(files) => files.iter().map(PathBuf::as_path).collect(),
            Artifact::Members(members) => members
                .iter()
                .flat_map(|(_, files)| files.iter().map(PathBuf::as_path))
                .collect(),
        }
    }

    pub fn labels(&self) -> Vec<&str> {
        match self {
            Artifact::Files(_) => Vec::new(),
            Artifact::Members(members) => members.iter().map(|(l, _)| l.as_str()).collect(),
        }
    }

    fn member(&self, label: &str) -> Option<Artifact> {
        match self {
            Artifact::Files(_) => Some(self.clone()),
            Artifact::Members(members) => members
                .iter()
                .find(|(l, _)| l == label)
                .map(|(_, files)| Artifact::Files(files.clone())),
        }
    }
}

/// One operator application handed to an [`Evaluator`].
#[derive(Debug, Clone)]
pub struct BuildRequest<'a> {
    /// CRS of the application.
    pub crs: String,
    /// Digest of `crs`, usable as a cache file stem.
    pub key: String,
    pub operator: &'a OperatorMeta,
    /// Operand artifacts by slot; `None` for omitted operands.
    pub operands: Vec<Option<Artifact>>,
    pub params: BTreeMap<String, ParamValue>,
    /// Values of every command token except the `${out...}` ones.
    pub bindings: BTreeMap<String, String>,
}

impl BuildRequest<'_> {
    /// Renders the operator command with the given output paths.
    pub fn command(&self, outputs: &BTreeMap<String, PathBuf>) -> String {
        let mut bindings = self.bindings.clone();
        for (name, path) in outputs {
            let token = if name.is_empty() {
                "out".to_string()
            } else {
                format!("out_{}", name)
            };
            bindings.insert(token, path.display().to_string());
        }
        self.operator.render(&bindings)
    }
}

/// Runs operators and composes pages.
pub trait Evaluator {
    /// Produces the outputs of one operator application, keyed by output
    /// name ([`MAIN_OUTPUT`] for the main one).
    fn build(&mut self, request: &BuildRequest<'_>) -> Result<BTreeMap<String, PathBuf>>;

    /// Assembles a page from its evaluated cells, row-major.
    fn compose_page(&mut self, crs: &str, page: &Page, cells: &[Option<Artifact>]) -> Result<PathBuf> {
        let _ = (page, cells);
        Err(CrsError::Evaluation(format!("page composition is not supported: {}", crs)))
    }
}

/// Evaluates an expression.
///
/// Wildcarded datasets are resolved in place, and the outputs of every
/// tree applied outside an ensemble loop are recorded on the tree.
pub fn evaluate<E>(registry: &Registry, evaluator: &mut E, expr: &mut Expr) -> Result<Artifact>
where
    E: Evaluator + ?Sized,
{
    match expr {
        Expr::Placeholder => Err(CrsError::Evaluation(
            "a placeholder cannot be evaluated".to_string(),
        )),
        Expr::Dataset(dataset) => dataset_artifact(registry, evaluator, dataset),
        Expr::Ensemble(ensemble) => {
            let mut files = BTreeMap::new();
            for (label, member) in ensemble.members_mut() {
                match evaluate(registry, evaluator, member)? {
                    Artifact::Files(f) => {
                        files.insert(label.clone(), f);
                    }
                    Artifact::Members(_) => {
                        return Err(CrsError::Evaluation(format!(
                            "ensemble member '{}' is itself an ensemble",
                            label
                        )))
                    }
                }
            }
            Ok(Artifact::Members(
                ensemble
                    .labels()
                    .iter()
                    .filter_map(|l| files.remove(l).map(|f| (l.clone(), f)))
                    .collect(),
            ))
        }
        Expr::Tree(tree) => {
            let mut outputs = evaluate_tree(registry, evaluator, tree)?;
            Ok(outputs
                .remove(MAIN_OUTPUT)
                .unwrap_or(Artifact::Files(Vec::new())))
        }
        Expr::Output(output) => evaluate_output(registry, evaluator, output),
        Expr::Page(page) => {
            let mut cells = Vec::new();
            for cell in page.cells_mut() {
                cells.push(match cell {
                    Some(e) => Some(evaluate(registry, evaluator, e)?),
                    None => None,
                });
            }
            let crs = crs::build(&Expr::Page(page.clone()));
            let path = evaluator.compose_page(&crs, page, &cells)?;
            Ok(Artifact::Files(vec![path]))
        }
    }
}

fn dataset_artifact<E>(registry: &Registry, evaluator: &mut E, dataset: &mut Dataset) -> Result<Artifact>
where
    E: Evaluator + ?Sized,
{
    let mut expanded = registry.expand_derived(dataset)?;
    if let Expr::Tree(_) = expanded {
        debug!(dataset = dataset.crs(), "evaluating derived variable");
        return evaluate(registry, evaluator, &mut expanded);
    }
    if !dataset.is_concrete() {
        let resolved = explore(registry, dataset, &ExploreOptions::new(ExploreMode::Resolve))?
            .into_dataset()
            .ok_or_else(|| CrsError::Evaluation(format!("{} did not resolve", dataset.crs())))?;
        debug!(from = dataset.crs(), to = resolved.crs(), "resolved operand");
        *dataset = resolved;
    }
    Ok(Artifact::Files(select_files(registry, dataset)?))
}

fn evaluate_output<E>(registry: &Registry, evaluator: &mut E, output: &mut NamedOutput) -> Result<Artifact>
where
    E: Evaluator + ?Sized,
{
    let name = output.name().to_string();
    match output.father_mut() {
        Expr::Tree(tree) => {
            let mut outputs = evaluate_tree(registry, evaluator, tree)?;
            outputs.remove(&name).ok_or_else(|| CrsError::UnknownOutput {
                operator: tree.name().to_string(),
                output: name,
            })
        }
        other => Err(CrsError::Evaluation(format!(
            "output '{}' of a {} cannot be evaluated",
            name,
            other.kind()
        ))),
    }
}

fn evaluate_tree<E>(registry: &Registry, evaluator: &mut E, tree: &mut Tree) -> Result<BTreeMap<String, Artifact>>
where
    E: Evaluator + ?Sized,
{
    let mut artifacts = Vec::with_capacity(tree.operands().len());
    for operand in tree.operands_mut() {
        artifacts.push(match operand {
            Some(e) => Some(evaluate(registry, evaluator, e)?),
            None => None,
        });
    }

    let labels = member_labels(&artifacts)?;
    let looped = tree.operator().is_ensemble_dumb() && labels.is_some();
    let Some(labels) = labels.filter(|_| looped) else {
        let produced = {
            let request = build_request(tree, crs::build_tree(tree), artifacts)?;
            evaluator.build(&request)?
        };
        let mut outputs = BTreeMap::new();
        for (name, path) in produced {
            tree.set_output(name.clone(), path.clone())?;
            outputs.insert(name, Artifact::Files(vec![path]));
        }
        return Ok(outputs);
    };

    debug!(operator = tree.name(), members = labels.len(), "looping over ensemble members");
    let mut per_output: BTreeMap<String, Vec<(String, Vec<PathBuf>)>> = BTreeMap::new();
    for label in &labels {
        let member_operands = tree
            .operands()
            .iter()
            .map(|op| op.as_ref().map(|e| member_expr(e, label)).transpose())
            .collect::<Result<Vec<_>>>()?;
        let member_tree = tree.with_operands(member_operands)?;
        let member_artifacts = artifacts
            .iter()
            .map(|a| a.as_ref().and_then(|a| a.member(label)))
            .collect();
        let crs = crs::build_tree(&member_tree);
        let request = build_request(&member_tree, crs, member_artifacts)?;
        for (name, path) in evaluator.build(&request)? {
            if !tree.operator().has_output(&name) {
                return Err(CrsError::UnknownOutput {
                    operator: tree.name().to_string(),
                    output: name,
                });
            }
            per_output
                .entry(name)
                .or_default()
                .push((label.clone(), vec![path]));
        }
    }
    Ok(per_output
        .into_iter()
        .map(|(name, members)| (name, Artifact::Members(members)))
        .collect())
}

/// Labels of the ensemble operands, which must all carry the same labels.
fn member_labels(artifacts: &[Option<Artifact>]) -> Result<Option<Vec<String>>> {
    let mut labels: Option<Vec<String>> = None;
    for artifact in artifacts.iter().flatten() {
        if let Artifact::Members(_) = artifact {
            let got: Vec<String> = artifact.labels().into_iter().map(str::to_string).collect();
            match &labels {
                None => labels = Some(got),
                Some(expected) => {
                    let a: BTreeSet<&String> = expected.iter().collect();
                    let b: BTreeSet<&String> = got.iter().collect();
                    if a != b {
                        return Err(CrsError::EnsembleLabelSetMismatch {
                            expected: expected.clone(),
                            got,
                        });
                    }
                }
            }
        }
    }
    Ok(labels)
}

/// The member `label` of an expression that evaluates to an ensemble.
fn member_expr(expr: &Expr, label: &str) -> Result<Expr> {
    match expr {
        Expr::Ensemble(ensemble) => ensemble.get(label).cloned().ok_or_else(|| {
            CrsError::EnsembleLabelSetMismatch {
                expected: ensemble.labels().to_vec(),
                got: vec![label.to_string()],
            }
        }),
        Expr::Tree(tree) if tree.operator().is_ensemble_dumb() => {
            let operands = tree
                .operands()
                .iter()
                .map(|op| op.as_ref().map(|e| member_expr(e, label)).transpose())
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::Tree(tree.with_operands(operands)?))
        }
        Expr::Output(output) => Ok(Expr::Output(NamedOutput::new(
            member_expr(output.father(), label)?,
            output.name(),
        )?)),
        other => Ok(other.clone()),
    }
}

fn build_request(tree: &Tree, crs: String, operands: Vec<Option<Artifact>>) -> Result<BuildRequest<'_>> {
    let operator = tree.operator();
    let mut bindings = BTreeMap::new();

    for slot in &operator.slots {
        let prefix = match slot.kind {
            SlotKind::Single => "in",
            SlotKind::Multi => "ins",
            SlotKind::Members => "mmin",
        };
        let value = match (slot.kind, operands.get(slot.index - 1).and_then(Option::as_ref)) {
            (_, None) => String::new(),
            (SlotKind::Members, Some(artifact @ Artifact::Members(_))) => {
                bindings.insert("labels".to_string(), artifact.labels().join(" "));
                join_paths(&artifact.files())
            }
            (SlotKind::Members, Some(Artifact::Files(_))) => {
                return Err(CrsError::Evaluation(format!(
                    "operand {} of '{}' must be an ensemble",
                    slot.index, operator.name
                )))
            }
            (_, Some(Artifact::Files(files))) => {
                join_paths(&files.iter().map(PathBuf::as_path).collect::<Vec<_>>())
            }
            (_, Some(Artifact::Members(_))) => {
                return Err(CrsError::Evaluation(format!(
                    "operand {} of '{}' is an ensemble but the slot takes files",
                    slot.index, operator.name
                )))
            }
        };
        if slot.index == 1 {
            bindings.insert(prefix.to_string(), value.clone());
        }
        bindings.insert(format!("{}_{}", prefix, slot.index), value);
    }

    for (i, operand) in tree.operands().iter().enumerate() {
        if let Some(variable) = operand.as_ref().and_then(Expr::variable) {
            if i == 0 {
                bindings.insert("var".to_string(), variable.clone());
            }
            bindings.insert(format!("var_{}", i + 1), variable);
        }
    }

    if let Some(dataset) = tree.operand(1).and_then(|e| e.datasets().into_iter().next()) {
        if let Some(period) = dataset.period() {
            bindings.insert("period".to_string(), period.repr());
            bindings.insert("period_iso".to_string(), period.iso());
        }
        if let Some(FacetValue::Domain(domain)) = dataset.get(DOMAIN_FACET) {
            let repr = domain.repr();
            bindings.insert(
                "domain".to_string(),
                repr.trim_matches(|c| c == '[' || c == ']').to_string(),
            );
        }
        if let Some(alias) = dataset.alias() {
            bindings.insert("alias".to_string(), alias.token());
            if let Some(units) = &alias.units {
                bindings.insert("units".to_string(), units.clone());
            }
            if let Some(missing) = alias.missing {
                bindings.insert("missing".to_string(), missing.to_string());
            }
        }
    }

    for (name, value) in tree.serialized_params() {
        bindings.insert(name.clone(), value.to_token());
    }
    bindings.insert("crs".to_string(), crs.clone());

    Ok(BuildRequest {
        key: crs::digest(&crs),
        crs,
        operator,
        operands,
        params: tree.params().clone(),
        bindings,
    })
}

fn join_paths(paths: &[&Path]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Global attributes and variable attributes of a data file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub frequency: Option<String>,
    pub institution: Option<String>,
    pub long_name: Option<String>,
    pub table_id: Option<String>,
    pub realm: Option<String>,
    pub standard_name: Option<String>,
    pub units: Option<String>,
}

/// Reads file metadata. Implemented outside the library.
pub trait MetadataPeek {
    fn peek(&self, path: &Path, variable: &str) -> Result<FileMetadata>;
}

/// Where a dataset comes from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub crs: String,
    pub key: String,
    pub project: String,
    pub facets: BTreeMap<String, String>,
    pub first_file: PathBuf,
    pub file_count: usize,
    pub metadata: FileMetadata,
}

/// Combines the facets of a concrete dataset with the metadata of its
/// first file.
pub fn provenance<P>(registry: &Registry, dataset: &Dataset, peek: &P) -> Result<Provenance>
where
    P: MetadataPeek + ?Sized,
{
    if !dataset.is_concrete() {
        return Err(CrsError::AmbiguousExpression(format!(
            "provenance of a wildcarded dataset: {}",
            dataset.crs()
        )));
    }
    let files = select_files(registry, dataset)?;
    let first = files
        .first()
        .cloned()
        .ok_or_else(|| CrsError::NoFileFound(dataset.crs().to_string()))?;
    let variable = dataset.search_variable().unwrap_or_default();
    let metadata = peek.peek(&first, variable)?;
    Ok(Provenance {
        crs: dataset.crs().to_string(),
        key: crs::digest(dataset.crs()),
        project: dataset.project().name().to_string(),
        facets: dataset
            .facets()
            .iter()
            .map(|(k, v)| (k.clone(), v.repr()))
            .collect(),
        first_file: first,
        file_count: files.len(),
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::location::{LocationEntry, LocationKey, Organization};
    use crate::project::Project;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        requests: Vec<(String, String, BTreeMap<String, String>)>,
    }

    impl Evaluator for Recorder {
        fn build(&mut self, request: &BuildRequest<'_>) -> Result<BTreeMap<String, PathBuf>> {
            self.requests.push((
                request.operator.name.clone(),
                request.crs.clone(),
                request.bindings.clone(),
            ));
            Ok(request
                .operator
                .outputs
                .keys()
                .map(|name| {
                    (
                        name.clone(),
                        PathBuf::from(format!("/cache/{}{}.nc", request.key, name)),
                    )
                })
                .collect())
        }
    }

    fn setup() -> (TempDir, Registry) {
        let dir = TempDir::new().unwrap();
        for model in ["A", "B"] {
            let path = dir.path().join(model).join("tas_1980-1989.nc");
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, b"").unwrap();
        }
        let mut r = Registry::new();
        r.declare_project(Project::builder("demo").separator('|').build().unwrap())
            .unwrap();
        r.declare_location(LocationEntry::new(
            LocationKey::for_project("demo"),
            Organization::Generic,
            vec![format!("{}/${{model}}/${{variable}}_${{PERIOD}}.nc", dir.path().display())],
        ))
        .unwrap();
        r.declare_operator("ccdo", "cdo ${operator} ${in} ${out}", "nc", &BTreeMap::new())
            .unwrap();
        r.declare_operator("stats", "stats ${in} ${out} ${out_sd}", "nc", &BTreeMap::new())
            .unwrap();
        r.declare_operator("eplot", "eplot ${mmin} ${labels} ${out}", "png", &BTreeMap::new())
            .unwrap();
        (dir, r)
    }

    fn ds(r: &Registry, model: &str) -> Expr {
        Expr::Dataset(
            r.dataset([
                ("project", "demo"),
                ("model", model),
                ("variable", "tas"),
                ("period", "1980-1981"),
            ])
            .unwrap(),
        )
    }

    fn ccdo(r: &Registry, operand: Expr) -> Expr {
        let mut params = BTreeMap::new();
        params.insert("operator".to_string(), ParamValue::from("zonmean"));
        r.call("ccdo", vec![Some(operand)], params).unwrap()
    }

    #[test]
    fn test_evaluate_tree_records_outputs() {
        let (_dir, r) = setup();
        let mut e = ccdo(&r, ds(&r, "A"));
        let mut rec = Recorder::default();
        let artifact = evaluate(&r, &mut rec, &mut e).unwrap();

        assert_eq!(rec.requests.len(), 1);
        let (name, crs, bindings) = &rec.requests[0];
        assert_eq!(name, "ccdo");
        assert_eq!(crs, &e.crs());
        assert_eq!(bindings["operator"], "zonmean");
        assert_eq!(bindings["var"], "tas");
        assert_eq!(bindings["period"], "1980-1981");
        assert!(bindings["in"].ends_with("tas_1980-1989.nc"));

        let out = e.as_tree().unwrap().output(MAIN_OUTPUT).unwrap().to_path_buf();
        assert_eq!(artifact, Artifact::Files(vec![out]));
    }

    #[test]
    fn test_ensemble_dumb_operator_loops() {
        let (_dir, r) = setup();
        let ens = crate::expr::Ensemble::new(vec![("a", ds(&r, "A")), ("b", ds(&r, "B"))]).unwrap();
        let mut e = ccdo(&r, Expr::Ensemble(ens));
        let mut rec = Recorder::default();
        let artifact = evaluate(&r, &mut rec, &mut e).unwrap();

        assert_eq!(rec.requests.len(), 2);
        assert_eq!(rec.requests[0].1, ccdo(&r, ds(&r, "A")).crs());
        assert_eq!(artifact.labels(), vec!["a", "b"]);

        let mut plot = r.call("eplot", vec![Some(e)], BTreeMap::new()).unwrap();
        let artifact = evaluate(&r, &mut rec, &mut plot).unwrap();
        let (_, _, bindings) = rec.requests.last().unwrap();
        assert_eq!(bindings["labels"], "a b");
        assert_eq!(artifact.files().len(), 1);
    }

    #[test]
    fn test_named_output() {
        let (_dir, r) = setup();
        let father = r.call("stats", vec![Some(ds(&r, "A"))], BTreeMap::new()).unwrap();
        let mut e = Expr::Output(NamedOutput::new(father, "sd").unwrap());
        let mut rec = Recorder::default();
        let artifact = evaluate(&r, &mut rec, &mut e).unwrap();
        let files = artifact.files();
        assert_eq!(files.len(), 1);
        assert!(files[0].to_string_lossy().ends_with("sd.nc"));
    }

    #[test]
    fn test_wildcards_resolve_in_place() {
        let (_dir, r) = setup();
        let mut e = r
            .dataset([
                ("project", "demo"),
                ("model", "A"),
                ("variable", "tas"),
                ("period", "*"),
            ])
            .map(Expr::Dataset)
            .unwrap();
        let mut rec = Recorder::default();
        evaluate(&r, &mut rec, &mut e).unwrap();
        assert_eq!(e.crs(), "demo|A|tas|1980-1989|global");
        assert!(evaluate(&r, &mut rec, &mut Expr::Placeholder).is_err());
    }

    struct FixedPeek;

    impl MetadataPeek for FixedPeek {
        fn peek(&self, _path: &Path, variable: &str) -> Result<FileMetadata> {
            Ok(FileMetadata {
                units: Some("K".to_string()),
                standard_name: Some(format!("{}_std", variable)),
                ..FileMetadata::default()
            })
        }
    }

    #[test]
    fn test_provenance() {
        let (_dir, r) = setup();
        let d = ds(&r, "B");
        let p = provenance(&r, d.as_dataset().unwrap(), &FixedPeek).unwrap();
        assert_eq!(p.project, "demo");
        assert_eq!(p.facets["simulation"], "B");
        assert_eq!(p.file_count, 1);
        assert_eq!(p.metadata.units.as_deref(), Some("K"));
        assert_eq!(p.key, crs::digest(d.crs().as_str()));
    }
}
