//! E-Aviation empty-leg widget adapter.
//!
//! The operator embeds a charter-market widget; items carry a route
//! description with parenthesized codes, an availability date
//! (`"Verfügbar: 2025-08-08"`, no time of day) and an aircraft title row.
//! No prices are shown, so every observation is pending. When the page
//! itself renders empty, the widget iframe is fetched once as a fallback.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use elcat_core::airports::AirportDirectory;
use elcat_core::RawObservation;
use elcat_storage::HttpFetcher;
use scraper::Html;
use serde_json::json;
use tracing::debug;

use crate::{
    collapse_ws, route_code, sel, strip_parenthesized, text_or_none, AdapterError, SourceAdapter,
};

pub const EAVIATION_URL: &str = "https://www.e-aviation.de/leerfluege/";

/// Central European local time as a fixed offset; see the ASL adapter.
const UTC_OFFSET_SECS: i32 = 3600;

pub struct EaviationAdapter {
    airports: Arc<AirportDirectory>,
}

impl EaviationAdapter {
    pub fn new(airports: Arc<AirportDirectory>) -> Self {
        Self { airports }
    }
}

#[async_trait]
impl SourceAdapter for EaviationAdapter {
    fn source_id(&self) -> &'static str {
        "eaviation"
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<RawObservation>, AdapterError> {
        let html = http.fetch_text(self.source_id(), EAVIATION_URL).await?;
        let rows = parse_items(&html, &self.airports)?;
        if !rows.is_empty() {
            return Ok(rows);
        }

        // Server HTML came back empty; the offers may live in the widget
        // iframe only.
        if let Some(src) = iframe_src(&html)? {
            debug!(source = self.source_id(), iframe = %src, "falling back to widget iframe");
            let iframe_html = http.fetch_text(self.source_id(), &src).await?;
            return parse_items(&iframe_html, &self.airports);
        }

        Ok(Vec::new())
    }
}

pub fn iframe_src(html: &str) -> Result<Option<String>, AdapterError> {
    let document = Html::parse_document(html);
    let iframe_sel = sel(r#"iframe[src*="avinode"], iframe[src*="market"], iframe[src*="widget"]"#)?;
    Ok(document
        .select(&iframe_sel)
        .next()
        .and_then(|n| n.value().attr("src"))
        .and_then(|s| text_or_none(s.to_string())))
}

pub fn parse_items(
    html: &str,
    airports: &AirportDirectory,
) -> Result<Vec<RawObservation>, AdapterError> {
    let document = Html::parse_document(html);
    let item_sel = sel(".search-hit-list-item")?;
    let route_sel = sel(".t-empty-leg-description")?;
    let span_sel = sel("span")?;
    let itinerary_sel = sel(".search-hit-list-item-details__lift-itinerary p")?;
    let title_sel = sel(".lift__title-row .lift__title")?;

    let mut rows = Vec::new();

    for item in document.select(&item_sel) {
        let Some(route) = item.select(&route_sel).next() else {
            continue;
        };
        let spans: Vec<String> = route
            .select(&span_sel)
            .filter_map(|s| text_or_none(collapse_ws(&s.text().collect::<String>())))
            .collect();
        if spans.len() < 2 {
            continue;
        }
        let left = &spans[0];
        let right = &spans[spans.len() - 1];

        let origin = route_code(left, airports);
        let destination = route_code(right, airports);

        let mut date_line = None;
        let mut date = None;
        for paragraph in item.select(&itinerary_sel) {
            let text = collapse_ws(&paragraph.text().collect::<String>());
            if text.contains("Verfügbar") {
                date = find_date_iso(&text);
                date_line = Some(text);
                break;
            }
        }

        // The non-route title row is the aircraft.
        let aircraft = item.select(&title_sel).find_map(|title| {
            if title.value().classes().any(|c| c == "t-empty-leg-description") {
                return None;
            }
            text_or_none(collapse_ws(&title.text().collect::<String>()))
        });

        let (Some(origin), Some(destination), Some(date)) = (origin, destination, date) else {
            debug!(%left, %right, "skipping widget item without route codes or date");
            continue;
        };

        rows.push(RawObservation {
            source: "eaviation".to_string(),
            origin,
            destination,
            origin_name: Some(strip_parenthesized(left)),
            destination_name: Some(strip_parenthesized(right)),
            departure: Some(format!("{}T00:00:00", date.format("%Y-%m-%d"))),
            arrival: None,
            utc_offset_secs: UTC_OFFSET_SECS,
            aircraft: aircraft.clone(),
            currency: "EUR".to_string(),
            price_current: None,
            price_normal: None,
            link: Some(EAVIATION_URL.to_string()),
            status_text: "listed".to_string(),
            raw: json!({
                "operator": "E-Aviation",
                "route_left": left,
                "route_right": right,
                "date": date_line,
                "aircraft": aircraft,
            }),
        });
    }

    Ok(rows)
}

/// First `yyyy-mm-dd` token in a line such as `"Verfügbar: 2025-08-08"`.
fn find_date_iso(text: &str) -> Option<NaiveDate> {
    text.split_whitespace()
        .find_map(|token| NaiveDate::parse_from_str(token, "%Y-%m-%d").ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use elcat_core::airports::Airport;

    fn directory() -> AirportDirectory {
        AirportDirectory::from_airports(vec![
            Airport {
                iata: "STR".into(),
                icao: Some("EDDS".into()),
                name: Some("Stuttgart Airport".into()),
                city: Some("Stuttgart".into()),
                lat: None,
                lon: None,
                tz: None,
            },
            Airport {
                iata: "NCE".into(),
                icao: Some("LFMN".into()),
                name: Some("Nice Cote d'Azur".into()),
                city: Some("Nice".into()),
                lat: None,
                lon: None,
                tz: None,
            },
        ])
    }

    const WIDGET_PAGE: &str = r#"
    <html><body>
      <div class="search-hit-list-item">
        <div class="lift__title-row">
          <div class="lift__title t-empty-leg-description">
            <span>Stuttgart (EDDS)</span> <span>Nice (LFMN)</span>
          </div>
        </div>
        <div class="lift__title-row"><div class="lift__title">Phenom 300</div></div>
        <div class="search-hit-list-item-details__lift-itinerary">
          <p>Verfügbar: 2025-08-08</p>
        </div>
      </div>
      <div class="search-hit-list-item">
        <div class="lift__title-row">
          <div class="lift__title t-empty-leg-description"><span>Broken</span></div>
        </div>
      </div>
    </body></html>
    "#;

    #[test]
    fn parses_widget_items_at_local_midnight() {
        let rows = parse_items(WIDGET_PAGE, &directory()).unwrap();
        assert_eq!(rows.len(), 1);

        let row = &rows[0];
        assert_eq!(row.source, "eaviation");
        assert_eq!(row.origin, "STR");
        assert_eq!(row.destination, "NCE");
        assert_eq!(row.departure.as_deref(), Some("2025-08-08T00:00:00"));
        assert_eq!(row.utc_offset_secs, 3600);
        assert_eq!(row.aircraft.as_deref(), Some("Phenom 300"));
        assert_eq!(row.status_text, "listed");
        assert!(row.price_current.is_none());
    }

    #[test]
    fn iframe_fallback_is_detected() {
        let html = r#"<html><body>
            <iframe src="https://widget.avinode.example/embed?x=1"></iframe>
        </body></html>"#;
        assert_eq!(
            iframe_src(html).unwrap().as_deref(),
            Some("https://widget.avinode.example/embed?x=1")
        );
        assert_eq!(iframe_src("<html></html>").unwrap(), None);
    }

    #[test]
    fn iso_date_tokens_are_extracted() {
        assert_eq!(
            find_date_iso("Verfügbar: 2025-08-08"),
            NaiveDate::from_ymd_opt(2025, 8, 8)
        );
        assert_eq!(find_date_iso("Verfügbar: bald"), None);
    }
}
