//! End-to-end scenarios: dataset round trip, most-specific location match,
//! two-axis ensembles and macro matching.

use std::collections::BTreeMap;

use pretty_assertions::assert_eq;

use climexpr_core::location::LocationRegistry;
use climexpr_core::macros::{cmatch, extract};
use climexpr_core::{
    buildcrs, explore, ExploreMode, ExploreOptions, Expr, LocationEntry, LocationKey,
    Organization, ParamValue, Project, Registry,
};
use climexpr_tests::{demo_registry, init_tracing, DataTree};

// ============================================================================
// Scenario A: dataset construction and round trip
// ============================================================================

#[test]
fn scenario_a_dataset_round_trip() {
    init_tracing();
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
        .declare_location(LocationEntry::new(
            LocationKey::for_project("demo").model("*"),
            Organization::Generic,
            vec!["/data/${model}/${variable}_${PERIOD}.nc".to_string()],
        ))
        .unwrap();

    let d = registry
        .dataset([
            ("project", "demo"),
            ("model", "X"),
            ("variable", "tas"),
            ("period", "1980-1981"),
            ("frequency", "monthly"),
        ])
        .unwrap();
    let crs = buildcrs(&Expr::Dataset(d.clone()));
    assert_eq!(crs, "demo|X|tas|1980-1981|global|monthly");

    let back = registry.ds(&crs).unwrap();
    assert_eq!(back, d);
    assert_eq!(back.facets(), d.facets());
}

// ============================================================================
// Scenario B: most-specific location match
// ============================================================================

fn entry(key: LocationKey, url: &str) -> LocationEntry {
    LocationEntry::new(key, Organization::Generic, vec![url.to_string()])
}

#[test]
fn scenario_b_most_specific_location() {
    init_tracing();
    let mut locations = LocationRegistry::new();
    locations.declare(entry(LocationKey::for_project("demo").model("X"), "/x"));
    locations.declare(entry(LocationKey::for_project("demo").model("*"), "/any"));
    locations.declare(entry(LocationKey::for_project("other"), "/other"));

    let query = LocationKey::for_project("demo").model("X");
    let found = locations.get_locs(&query);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].urls, vec!["/x".to_string()]);

    let query = LocationKey::for_project("demo").model("Y");
    let found = locations.get_locs(&query);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].urls, vec!["/any".to_string()]);

    let query = LocationKey::for_project("demo");
    let found = locations.get_locs(&query);
    assert!(found.iter().all(|e| e.urls != vec!["/other".to_string()]));
    assert_eq!(found.len(), 1);
}

#[test]
fn scenario_b_ties_are_all_returned() {
    let mut locations = LocationRegistry::new();
    locations.declare(entry(LocationKey::for_project("demo").model("X"), "/x"));
    locations.declare(entry(LocationKey::for_project("demo").model("Y"), "/y"));
    let found = locations.get_locs(&LocationKey::for_project("demo"));
    assert_eq!(found.len(), 2);
}

// ============================================================================
// Scenario C: ensemble over two facets
// ============================================================================

#[test]
fn scenario_c_two_axis_ensemble() {
    init_tracing();
    let tree = DataTree::new().with_files(&[
        ("CNRM", "r1", "tas", "1980-1989"),
        ("CNRM", "r2", "tas", "1980-1989"),
        ("IPSL", "r1", "tas", "1980-1989"),
        ("IPSL", "r2", "tas", "1980-1989"),
    ]);
    let registry = demo_registry(&tree);
    let d = registry
        .dataset([
            ("project", "demo"),
            ("model", "*"),
            ("realization", "*"),
            ("variable", "tas"),
            ("period", "1980-1981"),
        ])
        .unwrap();

    let ens = explore(&registry, &d, &ExploreOptions::new(ExploreMode::Ensemble))
        .unwrap()
        .into_ensemble()
        .unwrap();
    assert_eq!(ens.len(), 4);
    assert_eq!(ens.labels(), &["CNRM_r1", "CNRM_r2", "IPSL_r1", "IPSL_r2"]);

    let opts = ExploreOptions::new(ExploreMode::Ensemble).first("realization");
    let ens = explore(&registry, &d, &opts).unwrap().into_ensemble().unwrap();
    assert_eq!(ens.labels(), &["r1_CNRM", "r1_IPSL", "r2_CNRM", "r2_IPSL"]);
    assert_eq!(
        ens.get("r2_IPSL").unwrap().crs(),
        "demo|IPSL|tas|1980-1981|global|r2|monthly"
    );
}

#[test]
fn scenario_c_missing_combination_is_skipped() {
    let tree = DataTree::new().with_files(&[
        ("CNRM", "r1", "tas", "1980-1989"),
        ("CNRM", "r2", "tas", "1980-1989"),
        ("IPSL", "r1", "tas", "1980-1989"),
    ]);
    let registry = demo_registry(&tree);
    let d = registry
        .dataset([
            ("project", "demo"),
            ("model", "*"),
            ("realization", "*"),
            ("variable", "tas"),
            ("period", "1980-1981"),
        ])
        .unwrap();
    let ens = explore(&registry, &d, &ExploreOptions::new(ExploreMode::Ensemble))
        .unwrap()
        .into_ensemble()
        .unwrap();
    assert_eq!(ens.labels(), &["CNRM_r1", "CNRM_r2", "IPSL_r1"]);
}

// ============================================================================
// Scenario D: macro extraction and matching
// ============================================================================

fn ccdo(registry: &Registry, operand: Expr, operator: &str) -> Expr {
    let mut params = BTreeMap::new();
    params.insert("operator".to_string(), ParamValue::from(operator));
    registry.call("ccdo", vec![Some(operand)], params).unwrap()
}

fn plot(registry: &Registry, operand: Expr) -> Expr {
    registry.call("plot", vec![Some(operand)], BTreeMap::new()).unwrap()
}

#[test]
fn scenario_d_macro_matching() {
    init_tracing();
    let tree = DataTree::new();
    let registry = demo_registry(&tree);
    let ds1 = Expr::Dataset(registry.ds("demo|CNRM|tas|1980-1981|global|r1|monthly").unwrap());
    let ds2 = Expr::Dataset(registry.ds("demo|IPSL|tas|1980-1981|global|r1|monthly").unwrap());

    let e = plot(&registry, ccdo(&registry, ds1.clone(), "zonmean"));
    let template = extract(&e, &[ds1]).unwrap();
    assert_eq!(template.crs(), "plot(ccdo(ARG,operator='zonmean'))");

    let same_shape = plot(&registry, ccdo(&registry, ds2.clone(), "zonmean"));
    assert_eq!(cmatch(&template, &same_shape), Some(vec![ds2.clone()]));

    let other_param = plot(&registry, ccdo(&registry, ds2, "timavg"));
    assert_eq!(cmatch(&template, &other_param), None);
}
