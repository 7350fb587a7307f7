//! Test fixtures: synthetic data trees, a demo registry and a recording
//! evaluator.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Once;

use tempfile::TempDir;

use climexpr_core::eval::{BuildRequest, Evaluator};
use climexpr_core::{LocationEntry, LocationKey, Organization, Project, Registry, Result};

static TRACING: Once = Once::new();

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A temporary directory of empty data files.
pub struct DataTree {
    pub root: TempDir,
}

impl DataTree {
    pub fn new() -> Self {
        let root = TempDir::new().expect("Failed to create temp dir");
        Self { root }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Creates an empty file at `relative`, with its parent directories.
    pub fn touch(&self, relative: &str) -> PathBuf {
        let path = self.root.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create data dir");
        }
        fs::write(&path, b"").expect("Failed to write data file");
        path
    }

    /// Creates `<model>/<realization>/<variable>_<period>.nc` files.
    pub fn with_files(self, files: &[(&str, &str, &str, &str)]) -> Self {
        for (model, realization, variable, period) in files {
            self.touch(&format!("{}/{}/{}_{}.nc", model, realization, variable, period));
        }
        self
    }

    /// URL pattern matching the layout written by [`DataTree::with_files`].
    pub fn pattern(&self) -> String {
        format!(
            "{}/${{model}}/${{realization}}/${{variable}}_${{PERIOD}}.nc",
            self.path().display()
        )
    }
}

impl Default for DataTree {
    fn default() -> Self {
        Self::new()
    }
}

/// A registry with project `demo` (`realization` and `frequency` extra
/// facets, separator `|`), a location over `tree`, and the operators
/// `ccdo`, `plot`, `stats` and `eplot`.
pub fn demo_registry(tree: &DataTree) -> Registry {
    let mut registry = Registry::new();
    registry
        .declare_project(
            Project::builder("demo")
                .facet_with_default("realization", "r1")
                .facet_with_default("frequency", "monthly")
                .separator('|')
                .ensemble_facet("simulation")
                .ensemble_facet("realization")
                .build()
                .expect("demo project should build"),
        )
        .expect("demo project should declare");
    registry
        .declare_location(LocationEntry::new(
            LocationKey::for_project("demo"),
            Organization::Generic,
            vec![tree.pattern()],
        ))
        .expect("demo location should declare");

    let none = BTreeMap::new();
    registry
        .declare_operator("ccdo", "cdo ${operator} ${in} ${out}", "nc", &none)
        .expect("ccdo should declare");
    registry
        .declare_operator("plot", "plot ${in} ${in_2} ${title} ${color} ${period} ${out}", "png", &none)
        .expect("plot should declare");
    let mut formats = BTreeMap::new();
    formats.insert("sd".to_string(), "std_%s".to_string());
    registry
        .declare_operator("stats", "stats ${in} ${out} ${out_sd}", "nc", &formats)
        .expect("stats should declare");
    registry
        .declare_operator("eplot", "eplot ${mmin} ${labels} ${out}", "png", &none)
        .expect("eplot should declare");
    registry
}

/// An evaluator that records requests and invents output paths under a
/// cache directory.
#[derive(Debug, Default)]
pub struct RecordingEvaluator {
    pub cache: PathBuf,
    pub requests: Vec<RecordedRequest>,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub operator: String,
    pub crs: String,
    pub key: String,
    pub command: String,
}

impl RecordingEvaluator {
    pub fn new(cache: impl Into<PathBuf>) -> Self {
        Self {
            cache: cache.into(),
            requests: Vec::new(),
        }
    }

    pub fn operators(&self) -> Vec<&str> {
        self.requests.iter().map(|r| r.operator.as_str()).collect()
    }
}

impl Evaluator for RecordingEvaluator {
    fn build(&mut self, request: &BuildRequest<'_>) -> Result<BTreeMap<String, PathBuf>> {
        let outputs: BTreeMap<String, PathBuf> = request
            .operator
            .outputs
            .keys()
            .map(|name| {
                let stem = if name.is_empty() {
                    request.key.clone()
                } else {
                    format!("{}_{}", request.key, name)
                };
                (name.clone(), self.cache.join(format!("{}.{}", stem, request.operator.format)))
            })
            .collect();
        self.requests.push(RecordedRequest {
            operator: request.operator.name.clone(),
            crs: request.crs.clone(),
            key: request.key.clone(),
            command: request.command(&outputs),
        });
        Ok(outputs)
    }
}
