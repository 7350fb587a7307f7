//! Dataset nodes.

use std::fmt;
use std::sync::Arc;

use crate::alias::Alias;
use crate::error::{CrsError, Result};
use crate::facet::{Domain, FacetValue, DOMAIN_FACET, PERIOD_FACET};
use crate::period::Period;
use crate::project::{FacetMap, Project};

/// A dataset selection: one value per project facet.
#[derive(Clone)]
pub struct Dataset {
    project: Arc<Project>,
    facets: FacetMap,
    alias: Option<Arc<Alias>>,
    crs: String,
}

impl Dataset {
    /// Builds a dataset from a complete facet map.
    ///
    /// Runs the project's normalization hook, then checks that the key set
    /// equals the project's facets, that every value is non-empty and of the
    /// right type, and that text values contain no reserved character.
    pub fn from_facets(
        project: Arc<Project>,
        mut facets: FacetMap,
        alias: Option<Arc<Alias>>,
    ) -> Result<Self> {
        project.normalize(&mut facets);

        if let Some(extra) = facets.keys().find(|k| !project.has_facet(k)) {
            return Err(CrsError::UnknownFacet {
                project: project.name().to_string(),
                facet: extra.clone(),
            });
        }
        for facet in project.facets() {
            let value = match facets.get(facet) {
                Some(v) if !v.is_empty() => v,
                _ => {
                    return Err(CrsError::MissingRequiredFacet {
                        project: project.name().to_string(),
                        facet: facet.clone(),
                    })
                }
            };
            value.check_reserved(facet, project.separator())?;
            let well_typed = match (facet.as_str(), value) {
                (_, FacetValue::Wildcard) => true,
                (PERIOD_FACET, v) => matches!(v, FacetValue::Period(_)),
                (DOMAIN_FACET, v) => matches!(v, FacetValue::Domain(_)),
                (_, v) => matches!(v, FacetValue::Text(_)),
            };
            if !well_typed {
                return Err(CrsError::UnknownExpression(format!(
                    "facet '{}' cannot hold '{}'",
                    facet, value
                )));
            }
        }
        match facets.get("project") {
            Some(FacetValue::Text(name)) if name == project.name() => {}
            _ => {
                return Err(CrsError::UnknownProject(
                    facets
                        .get("project")
                        .map(FacetValue::repr)
                        .unwrap_or_default(),
                ))
            }
        }

        let crs = crate::crs::dataset_crs(&project, &facets);
        Ok(Self {
            project,
            facets,
            alias,
            crs,
        })
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub(crate) fn project_arc(&self) -> &Arc<Project> {
        &self.project
    }

    pub fn facets(&self) -> &FacetMap {
        &self.facets
    }

    pub fn get(&self, facet: &str) -> Option<&FacetValue> {
        self.project
            .canonical_facet(facet)
            .and_then(|f| self.facets.get(f))
    }

    /// Text value of a facet, if it is concrete text.
    pub fn text(&self, facet: &str) -> Option<&str> {
        self.get(facet).and_then(FacetValue::as_text)
    }

    pub fn variable(&self) -> Option<&str> {
        self.text("variable")
    }

    pub fn period(&self) -> Option<&Period> {
        self.get(PERIOD_FACET).and_then(FacetValue::as_period)
    }

    pub fn domain(&self) -> Option<&Domain> {
        self.get(DOMAIN_FACET).and_then(FacetValue::as_domain)
    }

    /// Cached alias of `(project, variable)`.
    pub fn alias(&self) -> Option<&Alias> {
        self.alias.as_deref()
    }

    /// Variable name to use in file search.
    pub fn search_variable(&self) -> Option<&str> {
        match self.alias() {
            Some(alias) => Some(alias.search_variable()),
            None => self.variable(),
        }
    }

    pub fn crs(&self) -> &str {
        &self.crs
    }

    /// Facets holding the wildcard, in project order.
    pub fn wildcarded_facets(&self) -> Vec<&str> {
        self.project
            .facets()
            .iter()
            .filter(|f| self.facets.get(*f).is_some_and(FacetValue::is_wildcard))
            .map(String::as_str)
            .collect()
    }

    pub fn is_concrete(&self) -> bool {
        self.facets.values().all(|v| !v.is_wildcard())
    }

    /// Returns a copy with another period and a re-derived CRS.
    pub fn with_period(&self, period: Period) -> Result<Self> {
        self.with_values([(PERIOD_FACET.to_string(), FacetValue::Period(period))])
    }

    /// Returns a copy with some facet values replaced.
    pub fn with_values<I>(&self, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, FacetValue)>,
    {
        let mut facets = self.facets.clone();
        for (facet, value) in values {
            let name = self
                .project
                .canonical_facet(&facet)
                .ok_or_else(|| CrsError::UnknownFacet {
                    project: self.project.name().to_string(),
                    facet: facet.clone(),
                })?
                .to_string();
            facets.insert(name, value);
        }
        Dataset::from_facets(self.project.clone(), facets, self.alias.clone())
    }

    /// Replaces the cached alias (after a variable change).
    pub(crate) fn with_alias(mut self, alias: Option<Arc<Alias>>) -> Self {
        self.alias = alias;
        self
    }
}

impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        self.project.name() == other.project.name() && self.facets == other.facets
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dataset").field(&self.crs).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn project() -> Arc<Project> {
        Arc::new(
            Project::builder("demo")
                .facet("frequency")
                .separator('|')
                .build()
                .unwrap(),
        )
    }

    fn facets(pairs: &[(&str, &str)]) -> FacetMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), FacetValue::parse(k, v).unwrap()))
            .collect()
    }

    fn full() -> FacetMap {
        facets(&[
            ("project", "demo"),
            ("simulation", "X"),
            ("variable", "tas"),
            ("period", "1980-1981"),
            ("domain", "global"),
            ("frequency", "monthly"),
        ])
    }

    #[test]
    fn test_crs() {
        let ds = Dataset::from_facets(project(), full(), None).unwrap();
        assert_eq!(ds.crs(), "demo|X|tas|1980-1981|global|monthly");
        assert_eq!(ds.text("model"), Some("X"));
    }

    #[test]
    fn test_missing_facet() {
        let mut f = full();
        f.remove("frequency");
        assert!(matches!(
            Dataset::from_facets(project(), f, None),
            Err(CrsError::MissingRequiredFacet { .. })
        ));
    }

    #[test]
    fn test_unknown_facet() {
        let mut f = full();
        f.insert("realm".into(), FacetValue::Text("atmos".into()));
        assert!(matches!(
            Dataset::from_facets(project(), f, None),
            Err(CrsError::UnknownFacet { .. })
        ));
    }

    #[test]
    fn test_reserved_separator_in_value() {
        let mut f = full();
        f.insert("simulation".into(), FacetValue::Text("a|b".into()));
        assert!(matches!(
            Dataset::from_facets(project(), f, None),
            Err(CrsError::ReservedCharacterInValue { .. })
        ));
    }

    #[test]
    fn test_with_period() {
        let ds = Dataset::from_facets(project(), full(), None).unwrap();
        let moved = ds.with_period(Period::years(1990, 1999).unwrap()).unwrap();
        assert_eq!(moved.crs(), "demo|X|tas|1990-1999|global|monthly");
        assert_eq!(ds.crs(), "demo|X|tas|1980-1981|global|monthly");
    }

    #[test]
    fn test_wildcards() {
        let mut f = full();
        f.insert("simulation".into(), FacetValue::Wildcard);
        let ds = Dataset::from_facets(project(), f, None).unwrap();
        assert_eq!(ds.wildcarded_facets(), vec!["simulation"]);
        assert!(!ds.is_concrete());
        assert_eq!(ds.crs(), "demo|*|tas|1980-1981|global|monthly");
    }
}
