//! Source adapter contracts + per-site adapter implementations.
//!
//! An adapter owns everything site-specific: URLs, pagination, markup
//! quirks, and the local zone its timestamps are quoted in. Whatever changes
//! inside an adapter, the handoff stays the same: a flat list of
//! [`RawObservation`]s, empty rather than an error when a page simply shows
//! nothing.

mod aslgroup;
mod eaviation;
mod globeair;

use std::sync::Arc;

use async_trait::async_trait;
use elcat_core::airports::AirportDirectory;
use elcat_core::RawObservation;
use elcat_storage::{FetchError, HttpFetcher};
use scraper::{ElementRef, Selector};
use thiserror::Error;

pub use aslgroup::AslGroupAdapter;
pub use eaviation::EaviationAdapter;
pub use globeair::GlobeAirAdapter;

pub const CRATE_NAME: &str = "elcat-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("{0}")]
    Parse(String),
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// Fetch and parse all offers the source currently lists. Partial or
    /// empty listings yield fewer (or zero) observations, not an error;
    /// only transport-level failure is reported upward.
    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<RawObservation>, AdapterError>;
}

pub fn adapter_for_source(
    source_id: &str,
    airports: &Arc<AirportDirectory>,
) -> Option<Box<dyn SourceAdapter>> {
    match source_id {
        "globeair" => Some(Box::new(GlobeAirAdapter::new())),
        "aslgroup" => Some(Box::new(AslGroupAdapter::new(airports.clone()))),
        "eaviation" => Some(Box::new(EaviationAdapter::new(airports.clone()))),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Shared markup helpers
// ---------------------------------------------------------------------------

pub(crate) fn sel(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Parse(e.to_string()))
}

pub(crate) fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

pub(crate) fn first_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|n| text_or_none(collapse_ws(&n.text().collect::<String>())))
}

pub(crate) fn first_attr(
    element: ElementRef<'_>,
    selector: &Selector,
    attr: &str,
) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string()))
}

/// Trimmed, non-empty text lines of an element, in document order.
pub(crate) fn stripped_lines(element: ElementRef<'_>) -> Vec<String> {
    element
        .text()
        .filter_map(|t| text_or_none(t.to_string()))
        .collect()
}

pub(crate) fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// All parenthesized 2-5 character alphanumeric codes in a route label,
/// uppercased, e.g. `"Montichiari (BS)(LIPO)"` -> `["BS", "LIPO"]`.
pub(crate) fn parenthesized_codes(text: &str) -> Vec<String> {
    let mut codes = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('(') {
        let tail = &rest[open + 1..];
        let Some(close) = tail.find(')') else {
            break;
        };
        let candidate = tail[..close].trim();
        if (2..=5).contains(&candidate.len())
            && candidate.chars().all(|c| c.is_ascii_alphanumeric())
        {
            codes.push(candidate.to_ascii_uppercase());
        }
        rest = &tail[close + 1..];
    }
    codes
}

/// Route label with every parenthesized chunk removed.
pub(crate) fn strip_parenthesized(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0usize;
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    collapse_ws(&out)
}

/// Pick the route code for one side of a headline: prefer the last IATA-sized
/// code, else map the last ICAO-sized one through the directory, else fall
/// back to a rough prefix of the place name.
pub(crate) fn route_code(text: &str, airports: &AirportDirectory) -> Option<String> {
    let codes = parenthesized_codes(text);
    if let Some(iata) = codes.iter().rev().find(|c| c.len() == 3) {
        return Some(airports.to_iata(iata).unwrap_or_else(|| iata.clone()));
    }
    if let Some(icao) = codes.iter().rev().find(|c| c.len() == 4) {
        return Some(airports.to_iata(icao).unwrap_or_else(|| icao.clone()));
    }
    let name = strip_parenthesized(text);
    if let Some(iata) = airports.to_iata(&name) {
        return Some(iata);
    }
    let rough: String = name
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .take(3)
        .collect::<String>()
        .to_ascii_uppercase();
    if rough.len() == 3 {
        Some(rough)
    } else {
        None
    }
}

pub(crate) fn absolute_link(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if href.starts_with('/') {
        format!("{}{}", base.trim_end_matches('/'), href)
    } else {
        format!("{}/{}", base.trim_end_matches('/'), href)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elcat_core::airports::Airport;

    fn directory() -> AirportDirectory {
        AirportDirectory::from_airports(vec![
            Airport {
                iata: "VBS".into(),
                icao: Some("LIPO".into()),
                name: Some("Montichiari".into()),
                city: Some("Brescia".into()),
                lat: None,
                lon: None,
                tz: None,
            },
            Airport {
                iata: "CEQ".into(),
                icao: Some("LFMD".into()),
                name: Some("Cannes Mandelieu".into()),
                city: Some("Cannes".into()),
                lat: None,
                lon: None,
                tz: None,
            },
        ])
    }

    #[test]
    fn parenthesized_codes_finds_every_chunk() {
        assert_eq!(
            parenthesized_codes("Montichiari (BS)(LIPO)"),
            vec!["BS".to_string(), "LIPO".to_string()]
        );
        assert_eq!(parenthesized_codes("Cannes(LFMD)"), vec!["LFMD".to_string()]);
        assert!(parenthesized_codes("no codes here").is_empty());
        assert!(parenthesized_codes("(this one is far too long)").is_empty());
    }

    #[test]
    fn strip_parenthesized_cleans_route_labels() {
        assert_eq!(strip_parenthesized("Montichiari (BS)(LIPO)"), "Montichiari");
        assert_eq!(strip_parenthesized("  Cannes (LFMD) "), "Cannes");
        assert_eq!(strip_parenthesized("Nice"), "Nice");
    }

    #[test]
    fn route_code_prefers_iata_then_maps_icao() {
        let airports = directory();
        assert_eq!(
            route_code("Cannes(LFMD)", &airports).as_deref(),
            Some("CEQ")
        );
        // "(BS)" is a province tag, too short to be final; the ICAO wins
        assert_eq!(
            route_code("Montichiari (BS)(LIPO)", &airports).as_deref(),
            Some("VBS")
        );
        assert_eq!(
            route_code("Zurich (ZRH)", &airports).as_deref(),
            Some("ZRH")
        );
        assert_eq!(
            route_code("Cannes", &airports).as_deref(),
            Some("CEQ")
        );
        assert_eq!(route_code("Oslo", &airports).as_deref(), Some("OSL"));
    }

    #[test]
    fn absolute_link_resolves_relative_hrefs() {
        assert_eq!(
            absolute_link("https://example.com", "/offers/1"),
            "https://example.com/offers/1"
        );
        assert_eq!(
            absolute_link("https://example.com/", "https://other.example/x"),
            "https://other.example/x"
        );
    }
}
