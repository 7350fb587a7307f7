//! Facet values and the spatial domain type.

use std::fmt;

use crate::error::{CrsError, Result};
use crate::period::Period;

/// Written form of the wildcard sentinel.
pub const WILDCARD: &str = "*";

/// Written form of the whole-globe domain.
pub const GLOBAL_DOMAIN: &str = "global";

/// Characters that carry structure in a CRS and may never appear inside a
/// text facet value or be used as a project separator.
pub const RESERVED_CHARS: &[char] = &[',', '(', ')', '[', ']', '{', '}', '=', '\'', '"', ':'];

/// The list separator inside CRS literals.
pub const LIST_SEPARATOR: char = ',';

/// Facet names with a typed value.
pub const PERIOD_FACET: &str = "period";
pub const DOMAIN_FACET: &str = "domain";

/// A spatial selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Domain {
    /// The whole globe.
    Global,
    /// Latitude/longitude bounding box.
    BBox {
        lat_min: f64,
        lat_max: f64,
        lon_min: f64,
        lon_max: f64,
    },
}

impl Domain {
    /// Parses `global` or `[lat_min,lat_max,lon_min,lon_max]`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == GLOBAL_DOMAIN {
            return Ok(Domain::Global);
        }
        let inner = s
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| CrsError::InvalidDomain(s.to_string()))?;
        let values = inner
            .split(LIST_SEPARATOR)
            .map(|v| v.trim().parse::<f64>())
            .collect::<std::result::Result<Vec<f64>, _>>()
            .map_err(|_| CrsError::InvalidDomain(s.to_string()))?;
        match values.as_slice() {
            [lat_min, lat_max, lon_min, lon_max] if values.iter().all(|v| v.is_finite()) => {
                Ok(Domain::BBox {
                    lat_min: *lat_min,
                    lat_max: *lat_max,
                    lon_min: *lon_min,
                    lon_max: *lon_max,
                })
            }
            _ => Err(CrsError::InvalidDomain(s.to_string())),
        }
    }

    /// Canonical written form.
    pub fn repr(&self) -> String {
        match self {
            Domain::Global => GLOBAL_DOMAIN.to_string(),
            Domain::BBox {
                lat_min,
                lat_max,
                lon_min,
                lon_max,
            } => format!("[{},{},{},{}]", lat_min, lat_max, lon_min, lon_max),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

/// The value of one dataset facet.
#[derive(Debug, Clone, PartialEq)]
pub enum FacetValue {
    /// A concrete string value.
    Text(String),
    /// Matches any concrete value during resolution.
    Wildcard,
    /// The `period` facet.
    Period(Period),
    /// The `domain` facet.
    Domain(Domain),
}

impl FacetValue {
    /// Parses a written value for the given facet, applying the type
    /// coercion of `period` and `domain`.
    pub fn parse(facet: &str, raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw == WILDCARD {
            return Ok(FacetValue::Wildcard);
        }
        match facet {
            PERIOD_FACET => Period::parse(raw).map(FacetValue::Period),
            DOMAIN_FACET => Domain::parse(raw).map(FacetValue::Domain),
            _ => Ok(FacetValue::Text(raw.to_string())),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, FacetValue::Wildcard)
    }

    /// Returns the text of a concrete string value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FacetValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_period(&self) -> Option<&Period> {
        match self {
            FacetValue::Period(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_domain(&self) -> Option<&Domain> {
        match self {
            FacetValue::Domain(d) => Some(d),
            _ => None,
        }
    }

    /// True when the value is an empty string.
    pub fn is_empty(&self) -> bool {
        matches!(self, FacetValue::Text(s) if s.is_empty())
    }

    /// Canonical written form.
    pub fn repr(&self) -> String {
        match self {
            FacetValue::Text(s) => s.clone(),
            FacetValue::Wildcard => WILDCARD.to_string(),
            FacetValue::Period(p) => p.repr(),
            FacetValue::Domain(d) => d.repr(),
        }
    }

    /// Rejects text values that would not survive a CRS round trip.
    pub fn check_reserved(&self, facet: &str, separator: char) -> Result<()> {
        if let FacetValue::Text(s) = self {
            // A bare "*" would reparse as the wildcard.
            let wildcard = (s == WILDCARD).then_some('*');
            if let Some(ch) = wildcard.or_else(|| {
                s.chars()
                    .find(|c| *c == separator || RESERVED_CHARS.contains(c) || c.is_whitespace())
            }) {
                return Err(CrsError::ReservedCharacterInValue {
                    facet: facet.to_string(),
                    value: s.clone(),
                    ch,
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for FacetValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl From<&str> for FacetValue {
    fn from(s: &str) -> Self {
        if s == WILDCARD {
            FacetValue::Wildcard
        } else {
            FacetValue::Text(s.to_string())
        }
    }
}

impl From<Period> for FacetValue {
    fn from(p: Period) -> Self {
        FacetValue::Period(p)
    }
}

impl From<Domain> for FacetValue {
    fn from(d: Domain) -> Self {
        FacetValue::Domain(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_round_trip() {
        let d = Domain::parse("[-30,30.5,0,360]").unwrap();
        assert_eq!(d.repr(), "[-30,30.5,0,360]");
        assert_eq!(Domain::parse(&d.repr()).unwrap(), d);
        assert_eq!(Domain::parse("global").unwrap(), Domain::Global);
    }

    #[test]
    fn test_domain_rejects_bad_shapes() {
        assert!(Domain::parse("[1,2,3]").is_err());
        assert!(Domain::parse("1,2,3,4").is_err());
        assert!(Domain::parse("[a,b,c,d]").is_err());
    }

    #[test]
    fn test_wildcard_is_a_whole_value() {
        assert_eq!(FacetValue::parse("model", "*").unwrap(), FacetValue::Wildcard);
        assert_eq!(
            FacetValue::parse("model", "r1*").unwrap(),
            FacetValue::Text("r1*".to_string())
        );
        assert_eq!(FacetValue::parse("period", "*").unwrap(), FacetValue::Wildcard);
    }

    #[test]
    fn test_typed_facets() {
        assert!(matches!(
            FacetValue::parse("period", "1980-1981").unwrap(),
            FacetValue::Period(_)
        ));
        assert!(FacetValue::parse("period", "soon").is_err());
        assert!(matches!(
            FacetValue::parse("domain", "global").unwrap(),
            FacetValue::Domain(Domain::Global)
        ));
    }

    #[test]
    fn test_reserved_characters() {
        let value = FacetValue::Text("a|b".to_string());
        assert!(matches!(
            value.check_reserved("model", '|'),
            Err(CrsError::ReservedCharacterInValue { ch: '|', .. })
        ));
        assert!(FacetValue::Text("a,b".into()).check_reserved("model", '%').is_err());
        assert!(FacetValue::Text("CNRM-CM5.1".into()).check_reserved("model", '%').is_ok());
    }

    #[test]
    fn test_text_equal_to_wildcard_rejected() {
        assert!(matches!(
            FacetValue::Text("*".into()).check_reserved("model", '|'),
            Err(CrsError::ReservedCharacterInValue { ch: '*', .. })
        ));
        assert!(FacetValue::Wildcard.check_reserved("model", '|').is_ok());
        assert!(FacetValue::Text("r*".into()).check_reserved("model", '|').is_ok());
    }
}
