//! Canonical reference expressions for derived climate data.
//!
//! A CRS is a short string naming a climate dataset selection (project,
//! model, variable, period, domain and project-specific facets), optionally
//! passed through named operators. This crate turns such strings into an
//! object graph and back, resolves wildcarded facets against registered
//! data locations, factors expressions into macros and describes operators
//! to an external evaluator.
//!
//! # Example
//!
//! ```
//! use std::collections::BTreeMap;
//! use climexpr_core::{Project, Registry};
//!
//! let mut registry = Registry::new();
//! registry.declare_project(Project::builder("demo").separator('|').build()?)?;
//! registry.declare_operator("ccdo", "cdo ${operator} ${in} ${out}", "nc", &BTreeMap::new())?;
//!
//! let crs = "ccdo(demo|CNRM|tas|1980-1981|global,operator='zonmean')";
//! let expr = registry.parse_expr(crs)?;
//! assert_eq!(expr.crs(), crs);
//! assert_eq!(expr.variable().as_deref(), Some("tas"));
//! # Ok::<(), climexpr_core::CrsError>(())
//! ```
//!
//! # Modules
//!
//! - [`period`], [`facet`]: facet value types
//! - [`project`], [`alias`], [`location`]: declarations held by the registry
//! - [`operator`]: operator metadata parsed from command templates
//! - [`expr`]: the expression object model
//! - [`crs`]: canonical strings, the CRS parser and cache keys
//! - [`registry`]: registries and the dispatch table
//! - [`resolve`]: wildcard resolution
//! - [`macros`]: macro extraction, matching and rewriting
//! - [`eval`]: evaluator and metadata boundaries
//! - [`catalog`]: YAML/JSON declaration catalogs

pub mod alias;
pub mod catalog;
pub mod crs;
pub mod error;
pub mod eval;
pub mod expr;
pub mod facet;
pub mod location;
pub mod macros;
pub mod operator;
pub mod period;
pub mod project;
pub mod registry;
pub mod resolve;

pub use alias::{Alias, DerivedVariable};
pub use catalog::Catalog;
pub use crs::{build as buildcrs, digest};
pub use error::{CrsError, Result};
pub use eval::{evaluate, provenance, Artifact, BuildRequest, Evaluator, FileMetadata, MetadataPeek};
pub use expr::{Dataset, Ensemble, Expr, NamedOutput, Page, ParamValue, Tree};
pub use facet::{Domain, FacetValue};
pub use location::{LocationEntry, LocationKey, Organization};
pub use macros::{cmatch, extract, rewrite, Macro};
pub use operator::OperatorMeta;
pub use period::Period;
pub use project::{FixedFieldRule, Project, ProjectBuilder};
pub use registry::{global, reset_global, Registry};
pub use resolve::{explore, select_files, ExploreMode, ExploreOptions, Exploration, PeriodOperation};
