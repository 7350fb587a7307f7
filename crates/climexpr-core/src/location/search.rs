//! Organization-specific file search.
//!
//! A location's URL patterns contain `${facet}` tokens and an optional
//! `${PERIOD}` token. Concrete facet values are substituted; wildcarded
//! facets become glob wildcards and regex captures so the concrete values
//! observed in matching paths can be reported back.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, trace};

use crate::error::{CrsError, Result};
use crate::facet::FacetValue;
use crate::period::Period;
use crate::project::{FacetMap, Project};

/// Token standing for the period range in file names.
pub const PERIOD_TOKEN: &str = "PERIOD";

const TOKEN_PATTERN: &str = r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}";

static TOKEN_REGEX: OnceLock<Regex> = OnceLock::new();

pub(crate) fn token_regex() -> &'static Regex {
    TOKEN_REGEX.get_or_init(|| Regex::new(TOKEN_PATTERN).expect("invalid regex pattern"))
}

/// One file matched by a search.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMatch {
    pub path: PathBuf,
    /// Concrete values captured for the facets wildcarded in the request.
    pub facets: BTreeMap<String, String>,
    /// Period parsed from the file name, when the pattern has one.
    pub period: Option<Period>,
}

/// What a file search looks for.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    pub project: &'a Project,
    pub facets: &'a FacetMap,
    /// Variable name as it appears in file names (after aliasing).
    pub variable: &'a str,
}

impl<'a> SearchRequest<'a> {
    /// Resolves a pattern token to the project facet it designates.
    fn facet_for<'b>(&'b self, token: &'b str) -> Option<&'b str> {
        self.project.canonical_facet(token)
    }

    fn value_for(&self, facet: &str) -> Option<FacetValue> {
        if facet == "variable" {
            return match self.facets.get(facet) {
                Some(FacetValue::Wildcard) => Some(FacetValue::Wildcard),
                _ => Some(FacetValue::Text(self.variable.to_string())),
            };
        }
        self.facets.get(facet).cloned()
    }

    fn period(&self) -> Option<&Period> {
        self.facets.get("period").and_then(FacetValue::as_period)
    }
}

/// A file search strategy.
pub trait FileSearch: Send + Sync {
    /// Searches every URL pattern and returns the matching files.
    fn search(&self, urls: &[String], request: &SearchRequest<'_>) -> Result<Vec<FileMatch>>;
}

/// How files are laid out under a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Organization {
    /// URL patterns are templates with `${facet}` and `${PERIOD}` tokens.
    Generic,
    /// Legacy CMIP5 Data Reference Syntax tree under each URL root.
    Cmip5Drs,
}

impl Organization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Organization::Generic => "generic",
            Organization::Cmip5Drs => "cmip5_drs",
        }
    }

    /// Returns the search strategy for this organization.
    pub fn strategy(&self) -> &'static dyn FileSearch {
        match self {
            Organization::Generic => &GenericSearch,
            Organization::Cmip5Drs => &Cmip5DrsSearch,
        }
    }
}

impl fmt::Display for Organization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Organization {
    type Err = CrsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "generic" => Ok(Organization::Generic),
            "cmip5_drs" => Ok(Organization::Cmip5Drs),
            _ => Err(CrsError::Catalog(format!("unknown organization: {}", s))),
        }
    }
}

/// A URL pattern turned into a glob and a capturing regex.
#[derive(Debug)]
struct CompiledPattern {
    glob: String,
    regex: Regex,
    /// Capture group name and the facet it reports.
    captures: Vec<(String, String)>,
    period_group: Option<String>,
}

fn literal_to_regex(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for ch in literal.chars() {
        match ch {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }
    out
}

fn compile(url: &str, request: &SearchRequest<'_>) -> Result<CompiledPattern> {
    let mut glob = String::new();
    let mut re = String::from("^");
    let mut captures = Vec::new();
    let mut period_group = None;
    let mut last = 0;

    for caps in token_regex().captures_iter(url) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let literal = &url[last..whole.start()];
        glob.push_str(literal);
        re.push_str(&literal_to_regex(literal));
        last = whole.end();

        let token = &caps[1];
        if token == PERIOD_TOKEN {
            glob.push('*');
            match request.period() {
                Some(Period::Fixed) => re.push_str(".*"),
                _ => {
                    let group = "period".to_string();
                    if period_group.is_none() {
                        re.push_str(&format!(
                            "(?P<{}>[0-9]{{4,12}}(?:[-_][0-9]{{4,12}})?)",
                            group
                        ));
                        period_group = Some(group);
                    } else {
                        re.push_str("[0-9]{4,12}(?:[-_][0-9]{4,12})?");
                    }
                }
            }
            continue;
        }

        let facet = request.facet_for(token);
        match facet.and_then(|f| request.value_for(f)) {
            Some(FacetValue::Wildcard) => {
                let group = format!("f{}", captures.len());
                glob.push('*');
                // Lazy, so a two-date period keeps its first date.
                re.push_str(&format!("(?P<{}>[^/]+?)", group));
                captures.push((group, facet.unwrap_or(token).to_string()));
            }
            Some(value) => {
                let text = value.repr();
                glob.push_str(&glob::Pattern::escape(&text));
                re.push_str(&regex::escape(&text));
            }
            None => {
                glob.push('*');
                re.push_str("[^/]*?");
            }
        }
    }
    let tail = &url[last..];
    glob.push_str(tail);
    re.push_str(&literal_to_regex(tail));
    re.push('$');

    let regex = Regex::new(&re).map_err(|e| CrsError::Pattern {
        pattern: url.to_string(),
        reason: e.to_string(),
    })?;
    Ok(CompiledPattern {
        glob,
        regex,
        captures,
        period_group,
    })
}

fn search_pattern(url: &str, request: &SearchRequest<'_>) -> Result<Vec<FileMatch>> {
    let compiled = compile(url, request)?;
    let paths = glob::glob(&compiled.glob).map_err(|e| CrsError::Pattern {
        pattern: url.to_string(),
        reason: e.to_string(),
    })?;

    let mut matches = Vec::new();
    for entry in paths {
        let path = match entry {
            Ok(path) => path,
            Err(err) => {
                trace!(error = %err, "skipping unreadable path");
                continue;
            }
        };
        let text = path.to_string_lossy();
        let Some(caps) = compiled.regex.captures(&text) else {
            continue;
        };

        let mut facets = BTreeMap::new();
        let mut consistent = true;
        for (group, facet) in &compiled.captures {
            let Some(value) = caps.name(group) else {
                continue;
            };
            let value = value.as_str().to_string();
            match facets.get(facet) {
                Some(existing) if *existing != value => consistent = false,
                _ => {
                    facets.insert(facet.clone(), value);
                }
            }
        }
        if !consistent {
            trace!(path = %text, "inconsistent repeated facet");
            continue;
        }

        let period = match compiled
            .period_group
            .as_ref()
            .and_then(|g| caps.name(g))
        {
            Some(m) => match Period::parse(m.as_str()) {
                Ok(p) => Some(p),
                Err(_) => {
                    trace!(path = %text, "unparsable period in file name");
                    continue;
                }
            },
            None => None,
        };
        if let (Some(found), Some(wanted @ Period::Span { .. })) = (&period, request.period()) {
            if !found.intersects(wanted) {
                continue;
            }
        }

        matches.push(FileMatch {
            path,
            facets,
            period,
        });
    }
    debug!(pattern = url, glob = %compiled.glob, found = matches.len(), "file search");
    Ok(matches)
}

/// Template-glob search: each URL is a pattern.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericSearch;

impl FileSearch for GenericSearch {
    fn search(&self, urls: &[String], request: &SearchRequest<'_>) -> Result<Vec<FileMatch>> {
        let mut all = Vec::new();
        for url in urls {
            all.extend(search_pattern(url, request)?);
        }
        all.sort_by(|a, b| a.path.cmp(&b.path));
        all.dedup_by(|a, b| a.path == b.path);
        Ok(all)
    }
}

/// CMIP5 DRS search: each URL is the root of a DRS tree, read through its
/// `latest` version links.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cmip5DrsSearch;

impl Cmip5DrsSearch {
    pub fn template(root: &str) -> String {
        format!(
            "{}/${{project}}/*/*/${{model}}/${{experiment}}/${{frequency}}/${{realm}}/${{table}}/${{simulation}}/latest/${{variable}}/${{variable}}_${{table}}_${{model}}_${{experiment}}_${{simulation}}_${{PERIOD}}.nc",
            root.trim_end_matches('/')
        )
    }
}

impl FileSearch for Cmip5DrsSearch {
    fn search(&self, urls: &[String], request: &SearchRequest<'_>) -> Result<Vec<FileMatch>> {
        let templates: Vec<String> = urls.iter().map(|root| Self::template(root)).collect();
        GenericSearch.search(&templates, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project() -> Project {
        Project::builder("demo").facet("frequency").build().unwrap()
    }

    fn facets(pairs: &[(&str, &str)]) -> FacetMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), FacetValue::parse(k, v).unwrap()))
            .collect()
    }

    fn touch(dir: &TempDir, rel: &str) {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_generic_search_captures_wildcards() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "A/tas_1980-1989.nc");
        touch(&dir, "A/tas_1990-1999.nc");
        touch(&dir, "B/tas_1980-1999.nc");
        touch(&dir, "B/pr_1980-1999.nc");

        let project = project();
        let f = facets(&[
            ("project", "demo"),
            ("simulation", "*"),
            ("variable", "tas"),
            ("period", "*"),
            ("domain", "global"),
            ("frequency", "monthly"),
        ]);
        let request = SearchRequest {
            project: &project,
            facets: &f,
            variable: "tas",
        };
        let url = format!("{}/${{model}}/${{variable}}_${{PERIOD}}.nc", dir.path().display());
        let found = GenericSearch.search(&[url], &request).unwrap();

        assert_eq!(found.len(), 3);
        assert!(found.iter().all(|m| m.facets.contains_key("simulation")));
        let periods: Vec<String> = found
            .iter()
            .map(|m| m.period.unwrap().repr())
            .collect();
        assert!(periods.contains(&"1990-1999".to_string()));
    }

    #[test]
    fn test_concrete_period_filters_files() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "tas_1980-1989.nc");
        touch(&dir, "tas_1990-1999.nc");

        let project = project();
        let f = facets(&[
            ("project", "demo"),
            ("simulation", "X"),
            ("variable", "tas"),
            ("period", "1985-1986"),
            ("domain", "global"),
            ("frequency", "monthly"),
        ]);
        let request = SearchRequest {
            project: &project,
            facets: &f,
            variable: "tas",
        };
        let url = format!("{}/${{variable}}_${{PERIOD}}.nc", dir.path().display());
        let found = GenericSearch.search(&[url], &request).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].path.ends_with("tas_1980-1989.nc"));
    }

    #[test]
    fn test_aliased_variable_is_searched() {
        let dir = TempDir::new().unwrap();
        touch(&dir, "t2m_1980-1989.nc");

        let project = project();
        let f = facets(&[
            ("project", "demo"),
            ("simulation", "X"),
            ("variable", "tas"),
            ("period", "1980"),
            ("domain", "global"),
            ("frequency", "monthly"),
        ]);
        let request = SearchRequest {
            project: &project,
            facets: &f,
            variable: "t2m",
        };
        let url = format!("{}/${{variable}}_${{PERIOD}}.nc", dir.path().display());
        assert_eq!(GenericSearch.search(&[url], &request).unwrap().len(), 1);
    }

    #[test]
    fn test_cmip5_template() {
        let template = Cmip5DrsSearch::template("/data/");
        assert!(template.starts_with("/data/${project}/*/*/${model}/"));
        assert!(template.ends_with("_${PERIOD}.nc"));
    }

    #[test]
    fn test_organization_from_str() {
        assert_eq!("generic".parse::<Organization>().unwrap(), Organization::Generic);
        assert_eq!("CMIP5_DRS".parse::<Organization>().unwrap(), Organization::Cmip5Drs);
        assert!("ftp".parse::<Organization>().is_err());
    }
}
