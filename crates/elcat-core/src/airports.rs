//! Airport reference directory.
//!
//! Loaded once at process start from a JSON file and passed by reference to
//! whoever needs code resolution — there is deliberately no module-level
//! cache.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Airport {
    pub iata: String,
    #[serde(default)]
    pub icao: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub tz: Option<String>,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("reading airport file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing airport file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// In-memory index over the airport table: IATA, ICAO, and folded city/name.
#[derive(Debug, Default)]
pub struct AirportDirectory {
    by_iata: HashMap<String, Airport>,
    by_icao: HashMap<String, Airport>,
    by_city: HashMap<String, String>,
    by_name: HashMap<String, String>,
}

impl AirportDirectory {
    pub fn from_airports(rows: Vec<Airport>) -> Self {
        let mut directory = Self::default();
        for airport in rows {
            let iata = airport.iata.trim().to_ascii_uppercase();
            if iata.is_empty() {
                continue;
            }
            if let Some(icao) = airport.icao.as_deref() {
                let icao = icao.trim().to_ascii_uppercase();
                if !icao.is_empty() {
                    directory.by_icao.insert(icao, airport.clone());
                }
            }
            if let Some(city) = airport.city.as_deref() {
                let folded = fold(city);
                if !folded.is_empty() {
                    directory.by_city.insert(folded, iata.clone());
                }
            }
            if let Some(name) = airport.name.as_deref() {
                let folded = fold(name);
                if !folded.is_empty() {
                    directory.by_name.insert(folded, iata.clone());
                }
            }
            directory.by_iata.insert(iata, airport);
        }
        directory
    }

    /// Load the directory from a JSON array of airports.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| DirectoryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let rows: Vec<Airport> =
            serde_json::from_str(&text).map_err(|source| DirectoryError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self::from_airports(rows))
    }

    pub fn len(&self) -> usize {
        self.by_iata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_iata.is_empty()
    }

    /// Resolve an IATA code, ICAO code, city, or airport name to its record.
    pub fn resolve(&self, code_or_name: &str) -> Option<&Airport> {
        let trimmed = code_or_name.trim();
        if trimmed.is_empty() {
            return None;
        }
        let upper = trimmed.to_ascii_uppercase();
        if upper.len() == 3 {
            if let Some(airport) = self.by_iata.get(&upper) {
                return Some(airport);
            }
        }
        if upper.len() == 4 {
            if let Some(airport) = self.by_icao.get(&upper) {
                return Some(airport);
            }
        }
        let folded = fold(trimmed);
        self.by_city
            .get(&folded)
            .or_else(|| self.by_name.get(&folded))
            .and_then(|iata| self.by_iata.get(iata))
    }

    /// Map any accepted identifier to an uppercased IATA code.
    pub fn to_iata(&self, code_or_name: &str) -> Option<String> {
        self.resolve(code_or_name)
            .map(|airport| airport.iata.trim().to_ascii_uppercase())
    }
}

fn fold(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample() -> AirportDirectory {
        AirportDirectory::from_airports(vec![
            Airport {
                iata: "FRA".into(),
                icao: Some("EDDF".into()),
                name: Some("Frankfurt Airport".into()),
                city: Some("Frankfurt".into()),
                lat: Some(50.033),
                lon: Some(8.570),
                tz: Some("Europe/Berlin".into()),
            },
            Airport {
                iata: "ZRH".into(),
                icao: Some("LSZH".into()),
                name: Some("Zurich Airport".into()),
                city: Some("Zurich".into()),
                lat: None,
                lon: None,
                tz: Some("Europe/Zurich".into()),
            },
        ])
    }

    #[test]
    fn resolves_by_iata_icao_city_and_name() {
        let directory = sample();
        assert_eq!(directory.resolve("FRA").unwrap().iata, "FRA");
        assert_eq!(directory.resolve("eddf").unwrap().iata, "FRA");
        assert_eq!(directory.resolve("Zurich").unwrap().iata, "ZRH");
        assert_eq!(directory.resolve("zurich  airport").unwrap().iata, "ZRH");
        assert!(directory.resolve("XXX").is_none());
        assert!(directory.resolve("").is_none());
    }

    #[test]
    fn to_iata_maps_icao_onto_iata() {
        let directory = sample();
        assert_eq!(directory.to_iata("LSZH").as_deref(), Some("ZRH"));
        assert_eq!(directory.to_iata("fra").as_deref(), Some("FRA"));
        assert_eq!(directory.to_iata("nowhere"), None);
    }

    #[test]
    fn loads_from_a_json_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"[{{"iata":"GVA","icao":"LSGG","city":"Geneva","tz":"Europe/Zurich"}}]"#
        )
        .expect("write airports");
        let directory = AirportDirectory::load(file.path()).expect("load");
        assert_eq!(directory.len(), 1);
        assert_eq!(directory.to_iata("Geneva").as_deref(), Some("GVA"));
    }

    #[test]
    fn load_reports_parse_failures_with_the_path() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "not json").expect("write");
        let err = AirportDirectory::load(file.path()).unwrap_err();
        assert!(matches!(err, DirectoryError::Parse { .. }));
    }
}
