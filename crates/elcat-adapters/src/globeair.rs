//! GlobeAir empty-leg listing adapter.
//!
//! One card grid page. Cards show a route title like
//! `"Amsterdam (AMS) → Zurich (ZRH)"`, a date line, a 12-hour time range and
//! a "Book for €…" button when the leg is priced. The page quotes local
//! wall-clock times without a zone; as in the production scraper they are
//! taken at face value (offset zero) rather than guessed at.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use elcat_core::{RawObservation, RawPrice};
use elcat_storage::HttpFetcher;
use scraper::Html;
use serde_json::json;

use crate::{
    absolute_link, first_attr, first_text, sel, stripped_lines, AdapterError, SourceAdapter,
};

pub const GLOBEAIR_BASE: &str = "https://www.globeair.com";
pub const GLOBEAIR_URL: &str = "https://www.globeair.com/empty-leg-flights";

#[derive(Debug, Clone, Copy, Default)]
pub struct GlobeAirAdapter;

impl GlobeAirAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SourceAdapter for GlobeAirAdapter {
    fn source_id(&self) -> &'static str {
        "globeair"
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<RawObservation>, AdapterError> {
        let html = http.fetch_text(self.source_id(), GLOBEAIR_URL).await?;
        parse_cards(&html)
    }
}

/// Parse the card grid. Pure; cards that don't look like an offer are
/// skipped, never fatal.
pub fn parse_cards(html: &str) -> Result<Vec<RawObservation>, AdapterError> {
    let document = Html::parse_document(html);
    let card_sel = sel(".columns .column, div.column")?;
    let title_sel = sel("h3.caption")?;
    let data_sel = sel("p.flightdata")?;
    let book_sel = sel("a.button.is-primary, a.button.is-rounded.is-primary")?;
    let strike_sel = sel("p.flightdata strike")?;
    let strong_sel = sel("p.flightdata strong")?;
    let prob_sel = sel(".tags .tag.is-info")?;
    let link_sel = sel("a[href]")?;

    let mut rows = Vec::new();
    let mut seen = HashSet::new();

    for card in document.select(&card_sel) {
        let Some(title) = first_text(card, &title_sel) else {
            continue;
        };
        let Some(data) = card.select(&data_sel).next() else {
            continue;
        };
        let Some((origin_name, origin, destination_name, destination)) = parse_route_title(&title)
        else {
            continue;
        };

        let lines = stripped_lines(data);
        let date_line = lines.first().cloned();
        let time_line = lines.get(1).cloned();
        let info_line = lines.get(2).cloned().unwrap_or_default();

        let (departure, arrival) = match (&date_line, &time_line) {
            (Some(date), Some(times)) => card_timestamps(date, times),
            _ => (None, None),
        };

        let price_current = first_text(card, &book_sel).map(RawPrice::Text);
        let price_normal = first_text(card, &strike_sel).map(RawPrice::Text);
        let discount = first_text(card, &strong_sel);
        let probability = first_text(card, &prob_sel);

        let link = first_attr(card, &link_sel, "href").map(|href| absolute_link(GLOBEAIR_BASE, &href));

        // The grid repeats cards in responsive breakpoints; keep one per leg.
        let key = (
            origin.clone(),
            destination.clone(),
            departure.clone(),
            link.clone().map(|l| l.split(['?', '#']).next().unwrap_or("").to_string()),
        );
        if !seen.insert(key) {
            continue;
        }

        let status_text = if info_line.contains("Flight not confirmed") {
            "not confirmed".to_string()
        } else {
            "listed".to_string()
        };

        rows.push(RawObservation {
            source: "globeair".to_string(),
            origin,
            destination,
            origin_name: Some(origin_name),
            destination_name: Some(destination_name),
            departure,
            arrival,
            utc_offset_secs: 0,
            aircraft: None,
            currency: "EUR".to_string(),
            price_current,
            price_normal,
            link,
            status_text,
            raw: json!({
                "operator": "GlobeAir",
                "title": title,
                "date": date_line,
                "times": time_line,
                "info": info_line,
                "discount": discount,
                "probability": probability,
            }),
        });
    }

    Ok(rows)
}

/// `"Amsterdam (AMS) → Zurich (ZRH)"` -> (name, code, name, code).
fn parse_route_title(title: &str) -> Option<(String, String, String, String)> {
    let (left, right) = title.split_once('→')?;
    let (origin_name, origin) = route_side(left)?;
    let (destination_name, destination) = route_side(right)?;
    Some((origin_name, origin, destination_name, destination))
}

fn route_side(side: &str) -> Option<(String, String)> {
    let side = side.trim();
    let open = side.rfind('(')?;
    let close = side[open..].find(')')? + open;
    let code = side[open + 1..close].trim();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
        return None;
    }
    let name = side[..open].trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), code.to_string()))
}

/// Combine the card's date line with a `"10:30 AM → 12:00 PM"` range into
/// naive local timestamps for departure and arrival.
fn card_timestamps(date_line: &str, time_line: &str) -> (Option<String>, Option<String>) {
    let Some(date) = parse_card_date(date_line) else {
        return (None, None);
    };
    let Some((dep, arr)) = time_line.split_once('→') else {
        return (None, None);
    };
    let departure = parse_clock(dep).map(|t| format_naive(date, t));
    let arrival = parse_clock(arr).map(|t| format_naive(date, t));
    (departure, arrival)
}

fn format_naive(date: NaiveDate, time: NaiveTime) -> String {
    date.and_time(time).format("%Y-%m-%dT%H:%M:%S").to_string()
}

fn parse_card_date(text: &str) -> Option<NaiveDate> {
    let cleaned = text.trim();
    let candidates = [
        cleaned.to_string(),
        match cleaned.split_once(',') {
            // strip a leading weekday such as "Sat, 09 Aug 2025"
            Some((head, tail)) if !head.chars().any(|c| c.is_ascii_digit()) => {
                tail.trim().to_string()
            }
            _ => cleaned.to_string(),
        },
    ];
    for candidate in &candidates {
        for format in ["%d %b %Y", "%d %B %Y", "%b %d, %Y", "%B %d, %Y", "%Y-%m-%d"] {
            if let Ok(date) = NaiveDate::parse_from_str(candidate, format) {
                return Some(date);
            }
        }
    }
    None
}

fn parse_clock(text: &str) -> Option<NaiveTime> {
    let cleaned = text.trim();
    for format in ["%I:%M %p", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(cleaned, format) {
            return Some(time);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARD_PAGE: &str = r#"
    <html><body><div class="columns">
      <div class="column">
        <h3 class="caption">Osijek (OSI) → Friedrichshafen (FDH)</h3>
        <p class="flightdata">
          Sat, 09 Aug 2025
          <br>10:30 AM → 12:00 PM
          <br>Flight not confirmed yet.
          <strike>€ 12.400</strike>
          <strong>(-91%)</strong>
        </p>
        <div class="tags"><span class="tag is-info">65%</span></div>
        <a href="/empty-leg-flights/osi-fdh">Details</a>
        <a class="button is-primary" href="/book/osi-fdh">Book for € 1.190</a>
      </div>
      <div class="column">
        <h3 class="caption">Osijek (OSI) → Friedrichshafen (FDH)</h3>
        <p class="flightdata">
          Sat, 09 Aug 2025
          <br>10:30 AM → 12:00 PM
        </p>
        <a href="/empty-leg-flights/osi-fdh?utm=mobile">Details</a>
      </div>
      <div class="column"><h3 class="caption">Not a route at all</h3><p class="flightdata">x</p></div>
    </div></body></html>
    "#;

    #[test]
    fn parses_cards_and_dedupes_responsive_repeats() {
        let rows = parse_cards(CARD_PAGE).unwrap();
        assert_eq!(rows.len(), 1);

        let row = &rows[0];
        assert_eq!(row.source, "globeair");
        assert_eq!(row.origin, "OSI");
        assert_eq!(row.destination, "FDH");
        assert_eq!(row.origin_name.as_deref(), Some("Osijek"));
        assert_eq!(row.departure.as_deref(), Some("2025-08-09T10:30:00"));
        assert_eq!(row.arrival.as_deref(), Some("2025-08-09T12:00:00"));
        assert_eq!(row.utc_offset_secs, 0);
        assert_eq!(
            row.price_current,
            Some(RawPrice::Text("Book for € 1.190".to_string()))
        );
        assert_eq!(row.price_normal, Some(RawPrice::Text("€ 12.400".to_string())));
        assert_eq!(
            row.link.as_deref(),
            Some("https://www.globeair.com/empty-leg-flights/osi-fdh")
        );
        assert_eq!(row.raw["probability"], "65%");
        assert_eq!(row.raw["discount"], "(-91%)");
    }

    #[test]
    fn route_title_requires_three_letter_codes() {
        assert!(parse_route_title("Nice (NCE) → Palma (PMI)").is_some());
        assert!(parse_route_title("Nice (NICE) → Palma (PMI)").is_none());
        assert!(parse_route_title("Nice NCE - Palma PMI").is_none());
    }

    #[test]
    fn card_dates_accept_common_forms() {
        assert!(parse_card_date("Sat, 09 Aug 2025").is_some());
        assert!(parse_card_date("09 Aug 2025").is_some());
        assert!(parse_card_date("August 9, 2025").is_some());
        assert!(parse_card_date("tomorrow").is_none());
    }

    #[test]
    fn clock_parsing_handles_both_conventions() {
        assert_eq!(
            parse_clock(" 10:30 AM "),
            NaiveTime::from_hms_opt(10, 30, 0)
        );
        assert_eq!(parse_clock("12:00 PM"), NaiveTime::from_hms_opt(12, 0, 0));
        assert_eq!(parse_clock("18:45"), NaiveTime::from_hms_opt(18, 45, 0));
        assert_eq!(parse_clock("noonish"), None);
    }
}
