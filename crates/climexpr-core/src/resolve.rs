//! Wildcard resolution.
//!
//! [`explore`] searches the files of a dataset whose facets may hold the
//! wildcard and reports what it found:
//!
//! - [`ExploreMode::Choices`]: the observed values of each wildcarded facet;
//! - [`ExploreMode::Resolve`]: one concrete dataset, or an error when any
//!   wildcard has several candidates;
//! - [`ExploreMode::Ensemble`]: an ensemble over the wildcarded ensemble
//!   facets that have several values;
//! - [`ExploreMode::Periods`]: the merged periods of each group of files.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::{CrsError, Result};
use crate::expr::{Dataset, Ensemble, Expr};
use crate::facet::{FacetValue, PERIOD_FACET, WILDCARD};
use crate::location::{FileMatch, KeyField, LocationKey, SearchRequest, KEY_FIELDS};
use crate::period::{intersect_period_lists, merge_periods, single_period, union_period_lists, Period};
use crate::registry::Registry;

/// Separator between facet values in generated ensemble labels.
pub const LABEL_SEPARATOR: &str = "_";

/// What [`explore`] produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExploreMode {
    #[default]
    Choices,
    Resolve,
    Ensemble,
    Periods,
}

/// How periods of different file groups are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PeriodOperation {
    /// Keep what every group covers.
    #[default]
    Intersection,
    /// Keep what any group covers.
    Union,
}

/// Options of [`explore`].
#[derive(Debug, Clone, Default)]
pub struct ExploreOptions {
    pub mode: ExploreMode,
    pub operation: PeriodOperation,
    /// Facet whose values define the period groups. By default a group is
    /// one combination of the other wildcarded facets.
    pub group_by: Option<String>,
    /// Ensemble axis that varies slowest in member labels.
    pub first: Option<String>,
    /// In choices mode, fail instead of warning when nothing is found.
    pub strict: bool,
}

impl ExploreOptions {
    pub fn new(mode: ExploreMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn operation(mut self, operation: PeriodOperation) -> Self {
        self.operation = operation;
        self
    }

    pub fn group_by(mut self, facet: impl Into<String>) -> Self {
        self.group_by = Some(facet.into());
        self
    }

    pub fn first(mut self, facet: impl Into<String>) -> Self {
        self.first = Some(facet.into());
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

/// Result of [`explore`].
#[derive(Debug, Clone, PartialEq)]
pub enum Exploration {
    /// Facet name to observed values, sorted. A wildcarded period maps to
    /// its merged periods.
    Choices(BTreeMap<String, Vec<FacetValue>>),
    Resolved(Dataset),
    Ensemble(Ensemble),
    /// Group label to the merged periods of that group.
    Periods(BTreeMap<String, Vec<Period>>),
}

impl Exploration {
    pub fn into_dataset(self) -> Option<Dataset> {
        match self {
            Exploration::Resolved(d) => Some(d),
            _ => None,
        }
    }

    pub fn into_ensemble(self) -> Option<Ensemble> {
        match self {
            Exploration::Ensemble(e) => Some(e),
            _ => None,
        }
    }

    pub fn choices(&self) -> Option<&BTreeMap<String, Vec<FacetValue>>> {
        match self {
            Exploration::Choices(c) => Some(c),
            _ => None,
        }
    }

    pub fn periods(&self) -> Option<&BTreeMap<String, Vec<Period>>> {
        match self {
            Exploration::Periods(p) => Some(p),
            _ => None,
        }
    }
}

/// Explores the files of `dataset`.
pub fn explore(registry: &Registry, dataset: &Dataset, options: &ExploreOptions) -> Result<Exploration> {
    let files = match find_files(registry, dataset) {
        Ok(files) => files,
        Err(err) if options.mode == ExploreMode::Choices && !options.strict && err.is_absence() => {
            warn!(dataset = dataset.crs(), error = %err, "no choices");
            return Ok(Exploration::Choices(BTreeMap::new()));
        }
        Err(err) => return Err(err),
    };
    let explorer = Explorer::new(dataset, &files, options)?;
    match options.mode {
        ExploreMode::Choices => Ok(Exploration::Choices(explorer.choices())),
        ExploreMode::Resolve => explorer.resolve(registry).map(Exploration::Resolved),
        ExploreMode::Ensemble => explorer.ensemble(registry).map(Exploration::Ensemble),
        ExploreMode::Periods => Ok(Exploration::Periods(explorer.period_groups(&files))),
    }
}

/// Lists the files of a dataset, sorted.
pub fn select_files(registry: &Registry, dataset: &Dataset) -> Result<Vec<PathBuf>> {
    Ok(find_files(registry, dataset)?
        .into_iter()
        .map(|m| m.path)
        .collect())
}

/// The location-registry query of a dataset.
pub fn location_query(dataset: &Dataset) -> LocationKey {
    let mut key = LocationKey::for_project(dataset.project().name());
    for field in KEY_FIELDS.iter().skip(1) {
        let value = match dataset.get(field) {
            Some(FacetValue::Text(v)) => KeyField::Is(v.clone()),
            _ => KeyField::Any,
        };
        key.set(field, value);
    }
    key
}

fn find_files(registry: &Registry, dataset: &Dataset) -> Result<Vec<FileMatch>> {
    let query = location_query(dataset);
    let entries = registry.locations().get_locs(&query);
    if entries.is_empty() {
        return Err(CrsError::NoLocationRegistered(dataset.crs().to_string()));
    }
    let request = SearchRequest {
        project: dataset.project(),
        facets: dataset.facets(),
        variable: dataset.search_variable().unwrap_or(WILDCARD),
    };
    let mut files = Vec::new();
    for entry in entries {
        debug!(dataset = dataset.crs(), org = entry.organization.as_str(), urls = entry.urls.len(), "searching location");
        files.extend(entry.organization.strategy().search(&entry.urls, &request)?);
    }
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files.dedup_by(|a, b| a.path == b.path);
    if files.is_empty() {
        return Err(CrsError::NoFileFound(dataset.crs().to_string()));
    }
    Ok(files)
}

struct Explorer<'a> {
    dataset: &'a Dataset,
    files: &'a [FileMatch],
    options: &'a ExploreOptions,
    /// Wildcarded facets other than the period, in project order.
    wildcards: Vec<&'a str>,
    period_wildcarded: bool,
    group_by: Option<&'a str>,
}

impl<'a> Explorer<'a> {
    fn new(dataset: &'a Dataset, files: &'a [FileMatch], options: &'a ExploreOptions) -> Result<Self> {
        let all = dataset.wildcarded_facets();
        let period_wildcarded = all.contains(&PERIOD_FACET);
        let wildcards = all.into_iter().filter(|f| *f != PERIOD_FACET).collect();
        let group_by = match &options.group_by {
            Some(name) => Some(dataset.project().canonical_facet(name).ok_or_else(|| {
                CrsError::UnknownFacet {
                    project: dataset.project().name().to_string(),
                    facet: name.clone(),
                }
            })?),
            None => None,
        };
        Ok(Self {
            dataset,
            files,
            options,
            wildcards,
            period_wildcarded,
            group_by,
        })
    }

    fn observed(&self, files: &[&FileMatch], facet: &str) -> BTreeSet<String> {
        files
            .iter()
            .filter_map(|m| m.facets.get(facet).cloned())
            .collect()
    }

    fn all_files(&self) -> Vec<&'a FileMatch> {
        self.files.iter().collect()
    }

    fn group_key(&self, file: &FileMatch) -> String {
        let value_of = |facet: &str| {
            file.facets
                .get(facet)
                .cloned()
                .or_else(|| self.dataset.get(facet).map(FacetValue::repr))
                .unwrap_or_default()
        };
        match self.group_by {
            Some(facet) => value_of(facet),
            None => self
                .wildcards
                .iter()
                .map(|f| value_of(*f))
                .collect::<Vec<_>>()
                .join(LABEL_SEPARATOR),
        }
    }

    fn period_groups<'f>(&self, files: impl IntoIterator<Item = &'f FileMatch>) -> BTreeMap<String, Vec<Period>> {
        let mut raw: BTreeMap<String, Vec<Period>> = BTreeMap::new();
        for file in files {
            if let Some(period) = file.period {
                raw.entry(self.group_key(file)).or_default().push(period);
            }
        }
        raw.into_iter()
            .map(|(group, periods)| (group, merge_periods(periods)))
            .collect()
    }

    /// Combines the per-group periods with the requested operation.
    fn merged_periods(&self, files: &[&FileMatch]) -> Vec<Period> {
        let groups = self.period_groups(files.iter().copied());
        let mut lists = groups.into_values();
        let Some(first) = lists.next() else {
            return Vec::new();
        };
        lists.fold(first, |acc, list| match self.options.operation {
            PeriodOperation::Intersection => intersect_period_lists(&acc, &list),
            PeriodOperation::Union => union_period_lists(&acc, &list),
        })
    }

    fn choices(&self) -> BTreeMap<String, Vec<FacetValue>> {
        let files = self.all_files();
        let mut choices = BTreeMap::new();
        for facet in &self.wildcards {
            let values = self.observed(&files, facet);
            if values.is_empty() {
                debug!(facet, "wildcarded facet is not observable in file names");
                continue;
            }
            choices.insert(
                facet.to_string(),
                values.into_iter().map(FacetValue::Text).collect(),
            );
        }
        if self.period_wildcarded {
            choices.insert(
                PERIOD_FACET.to_string(),
                self.merged_periods(&files)
                    .into_iter()
                    .map(FacetValue::Period)
                    .collect(),
            );
        }
        choices
    }

    /// The single value of `facet` among `files`.
    fn single_value(&self, files: &[&FileMatch], facet: &str) -> Result<String> {
        let values = self.observed(files, facet);
        let mut iter = values.iter();
        match (iter.next(), iter.next()) {
            (Some(one), None) => Ok(one.clone()),
            (None, _) => Err(CrsError::AmbiguousExpression(format!(
                "{}: no value of '{}' can be observed",
                self.dataset.crs(),
                facet
            ))),
            _ => Err(CrsError::AmbiguousExpression(format!(
                "{}: '{}' has several values: {}",
                self.dataset.crs(),
                facet,
                values.iter().cloned().collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    fn resolved_period(&self, files: &[&FileMatch]) -> Result<Option<Period>> {
        if !self.period_wildcarded {
            return Ok(None);
        }
        let merged = self.merged_periods(files);
        if merged.is_empty() && !files.iter().any(|f| f.period.is_some()) {
            return Err(CrsError::AmbiguousExpression(format!(
                "{}: no period can be observed",
                self.dataset.crs()
            )));
        }
        single_period(&merged).map(Some)
    }

    fn concrete(
        &self,
        registry: &Registry,
        values: BTreeMap<String, FacetValue>,
    ) -> Result<Dataset> {
        let mut facets = self.dataset.facets().clone();
        facets.extend(values);
        registry.dataset_from_facets(self.dataset.project_arc().clone(), facets)
    }

    fn resolve(&self, registry: &Registry) -> Result<Dataset> {
        let files = self.all_files();
        let mut values = BTreeMap::new();
        for facet in &self.wildcards {
            values.insert(
                facet.to_string(),
                FacetValue::Text(self.single_value(&files, facet)?),
            );
        }
        if let Some(period) = self.resolved_period(&files)? {
            values.insert(PERIOD_FACET.to_string(), FacetValue::Period(period));
        }
        let resolved = self.concrete(registry, values)?;
        debug!(from = self.dataset.crs(), to = resolved.crs(), "resolved dataset");
        Ok(resolved)
    }

    fn ensemble(&self, registry: &Registry) -> Result<Ensemble> {
        let files = self.all_files();
        let project = self.dataset.project();

        let mut axes: Vec<(&str, Vec<String>)> = project
            .ensemble_facets()
            .iter()
            .map(String::as_str)
            .filter(|f| self.wildcards.contains(f))
            .map(|f| (f, self.observed(&files, f).into_iter().collect::<Vec<_>>()))
            .filter(|(_, values)| values.len() > 1)
            .collect();
        if let Some(first) = self.options.first.as_deref().and_then(|f| project.canonical_facet(f)) {
            match axes.iter().position(|(f, _)| *f == first) {
                Some(pos) => {
                    let axis = axes.remove(pos);
                    axes.insert(0, axis);
                }
                None => debug!(first, "requested first axis is not an ensemble axis"),
            }
        }

        let period = self.resolved_period(&files)?;
        if axes.is_empty() {
            let member = self.resolve(registry)?;
            let label = project
                .ensemble_facets()
                .iter()
                .find_map(|f| member.text(f).filter(|_| self.wildcards.contains(&f.as_str())))
                .unwrap_or(member.crs())
                .to_string();
            return Ensemble::new(vec![(label, Expr::Dataset(member))]);
        }

        let mut combos: Vec<Vec<&str>> = vec![Vec::new()];
        for (_, values) in &axes {
            combos = combos
                .into_iter()
                .flat_map(|prefix| {
                    values.iter().map(move |v| {
                        let mut combo = prefix.clone();
                        combo.push(v.as_str());
                        combo
                    })
                })
                .collect();
        }

        let mut members = Vec::with_capacity(combos.len());
        for combo in combos {
            let label = combo.join(LABEL_SEPARATOR);
            let subset: Vec<&FileMatch> = files
                .iter()
                .copied()
                .filter(|m| {
                    axes.iter()
                        .zip(&combo)
                        .all(|((facet, _), value)| m.facets.get(*facet).map(String::as_str) == Some(*value))
                })
                .collect();
            if subset.is_empty() {
                warn!(dataset = self.dataset.crs(), member = %label, "no file for ensemble member");
                continue;
            }
            let mut values = BTreeMap::new();
            for ((facet, _), value) in axes.iter().zip(&combo) {
                values.insert(facet.to_string(), FacetValue::Text(value.to_string()));
            }
            for facet in self.wildcards.iter().filter(|f| !axes.iter().any(|(a, _)| a == *f)) {
                values.insert(facet.to_string(), FacetValue::Text(self.single_value(&subset, facet)?));
            }
            if let Some(period) = period {
                values.insert(PERIOD_FACET.to_string(), FacetValue::Period(period));
            }
            members.push((label, Expr::Dataset(self.concrete(registry, values)?)));
        }
        debug!(dataset = self.dataset.crs(), members = members.len(), "built ensemble");
        Ensemble::new(members)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::location::{LocationEntry, Organization};
    use crate::project::Project;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn touch(dir: &TempDir, rel: &str) {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    fn setup(files: &[&str]) -> (TempDir, Registry) {
        let dir = TempDir::new().unwrap();
        for f in files {
            touch(&dir, f);
        }
        let mut r = Registry::new();
        r.declare_project(
            Project::builder("demo")
                .facet_with_default("realization", "r1")
                .separator('|')
                .ensemble_facet("simulation")
                .ensemble_facet("realization")
                .build()
                .unwrap(),
        )
        .unwrap();
        let url = format!(
            "{}/${{model}}/${{realization}}/${{variable}}_${{PERIOD}}.nc",
            dir.path().display()
        );
        r.declare_location(LocationEntry::new(
            LocationKey::for_project("demo"),
            Organization::Generic,
            vec![url],
        ))
        .unwrap();
        (dir, r)
    }

    fn ds(r: &Registry, model: &str, realization: &str, period: &str) -> Dataset {
        r.dataset([
            ("project", "demo"),
            ("model", model),
            ("realization", realization),
            ("variable", "tas"),
            ("period", period),
        ])
        .unwrap()
    }

    #[test]
    fn test_choices() {
        let (_dir, r) = setup(&["A/r1/tas_1980-1989.nc", "B/r1/tas_1980-1999.nc"]);
        let found = explore(&r, &ds(&r, "*", "r1", "*"), &ExploreOptions::default()).unwrap();
        let choices = found.choices().unwrap();
        assert_eq!(
            choices["simulation"],
            vec![FacetValue::Text("A".into()), FacetValue::Text("B".into())]
        );
        assert_eq!(
            choices["period"],
            vec![FacetValue::Period("1980-1989".parse().unwrap())]
        );
    }

    #[test]
    fn test_choices_downgrades_absence() {
        let (_dir, r) = setup(&[]);
        let d = ds(&r, "*", "r1", "*");
        let found = explore(&r, &d, &ExploreOptions::default()).unwrap();
        assert_eq!(found.choices().unwrap().len(), 0);

        let strict = ExploreOptions::default().strict(true);
        assert!(matches!(explore(&r, &d, &strict), Err(CrsError::NoFileFound(_))));
        let resolve = ExploreOptions::new(ExploreMode::Resolve);
        assert!(matches!(explore(&r, &d, &resolve), Err(CrsError::NoFileFound(_))));
    }

    #[test]
    fn test_no_location() {
        let (_dir, mut r) = setup(&[]);
        r.declare_project(Project::builder("other").build().unwrap()).unwrap();
        let d = r
            .dataset([("project", "other"), ("model", "*"), ("variable", "tas"), ("period", "*")])
            .unwrap();
        assert!(matches!(
            explore(&r, &d, &ExploreOptions::new(ExploreMode::Resolve)),
            Err(CrsError::NoLocationRegistered(_))
        ));
    }

    #[test]
    fn test_resolve() {
        let (_dir, r) = setup(&["A/r1/tas_1980-1989.nc", "A/r1/tas_1990-1999.nc"]);
        let found = explore(&r, &ds(&r, "*", "r1", "*"), &ExploreOptions::new(ExploreMode::Resolve))
            .unwrap()
            .into_dataset()
            .unwrap();
        assert_eq!(found.crs(), "demo|A|tas|1980-1999|global|r1");
    }

    #[test]
    fn test_resolve_ambiguous() {
        let (_dir, r) = setup(&["A/r1/tas_1980-1989.nc", "B/r1/tas_1980-1989.nc"]);
        assert!(matches!(
            explore(&r, &ds(&r, "*", "r1", "1980-1981"), &ExploreOptions::new(ExploreMode::Resolve)),
            Err(CrsError::AmbiguousExpression(_))
        ));
    }

    #[test]
    fn test_resolve_period_with_holes() {
        let (_dir, r) = setup(&["A/r1/tas_1980-1989.nc", "A/r1/tas_2000-2009.nc"]);
        assert!(matches!(
            explore(&r, &ds(&r, "A", "r1", "*"), &ExploreOptions::new(ExploreMode::Resolve)),
            Err(CrsError::PeriodHasHoles(_))
        ));
    }

    #[test]
    fn test_period_intersection_across_models() {
        let (_dir, r) = setup(&["A/r1/tas_1980-1999.nc", "B/r1/tas_1990-2009.nc"]);
        let d = ds(&r, "*", "r1", "*");
        let found = explore(&r, &d, &ExploreOptions::new(ExploreMode::Choices)).unwrap();
        assert_eq!(
            found.choices().unwrap()["period"],
            vec![FacetValue::Period("1990-1999".parse().unwrap())]
        );

        let union = ExploreOptions::new(ExploreMode::Choices).operation(PeriodOperation::Union);
        let found = explore(&r, &d, &union).unwrap();
        assert_eq!(
            found.choices().unwrap()["period"],
            vec![FacetValue::Period("1980-2009".parse().unwrap())]
        );

        let periods = explore(&r, &d, &ExploreOptions::new(ExploreMode::Periods)).unwrap();
        assert_eq!(periods.periods().unwrap().len(), 2);
    }

    #[test]
    fn test_ensemble_two_axes() {
        let (_dir, r) = setup(&[
            "A/r1/tas_1980-1989.nc",
            "A/r2/tas_1980-1989.nc",
            "B/r1/tas_1980-1989.nc",
            "B/r2/tas_1980-1989.nc",
        ]);
        let d = ds(&r, "*", "*", "1980-1981");
        let ens = explore(&r, &d, &ExploreOptions::new(ExploreMode::Ensemble))
            .unwrap()
            .into_ensemble()
            .unwrap();
        assert_eq!(ens.labels(), &["A_r1", "A_r2", "B_r1", "B_r2"]);

        let opts = ExploreOptions::new(ExploreMode::Ensemble).first("realization");
        let ens = explore(&r, &d, &opts).unwrap().into_ensemble().unwrap();
        assert_eq!(ens.labels(), &["r1_A", "r1_B", "r2_A", "r2_B"]);
        assert_eq!(
            ens.get("r2_B").unwrap().crs(),
            "demo|B|tas|1980-1981|global|r2"
        );
    }

    #[test]
    fn test_select_files() {
        let (_dir, r) = setup(&["A/r1/tas_1980-1989.nc", "A/r1/tas_1990-1999.nc"]);
        let files = select_files(&r, &ds(&r, "A", "r1", "1985-1986")).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("tas_1980-1989.nc"));
    }
}
