//! ASL Group empty-leg listing adapter.
//!
//! Paginated article list. Page 1 carries a pagination block whose highest
//! number is the page count; later pages are fetched sequentially under a
//! hard cap. Route headlines carry one or more parenthesized codes
//! (`"Montichiari (BS)(LIPO)"`), dates as `dd-mm-yyyy`, times as `HH:MM`,
//! all in Central European local time.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use elcat_core::airports::AirportDirectory;
use elcat_core::RawObservation;
use elcat_storage::HttpFetcher;
use scraper::Html;
use serde_json::json;
use tracing::warn;

use crate::{
    absolute_link, first_attr, first_text, route_code, sel, strip_parenthesized, AdapterError,
    SourceAdapter,
};

pub const ASL_BASE: &str = "https://www.aslgroup.eu";
pub const ASL_LISTING: &str = "https://www.aslgroup.eu/en/empty-legs";

/// Hard cap on followed listing pages; the pager occasionally advertises
/// far more pages than actually hold offers.
const MAX_PAGES: usize = 8;

/// Central European local time as a fixed offset. The corpus carries no tz
/// database, so DST drift of one hour is accepted and documented.
const UTC_OFFSET_SECS: i32 = 3600;

pub struct AslGroupAdapter {
    airports: Arc<AirportDirectory>,
}

impl AslGroupAdapter {
    pub fn new(airports: Arc<AirportDirectory>) -> Self {
        Self { airports }
    }
}

#[async_trait]
impl SourceAdapter for AslGroupAdapter {
    fn source_id(&self) -> &'static str {
        "aslgroup"
    }

    async fn fetch(&self, http: &HttpFetcher) -> Result<Vec<RawObservation>, AdapterError> {
        let first = http.fetch_text(self.source_id(), ASL_LISTING).await?;
        let mut rows = parse_page(&first, &self.airports)?;

        let pages = page_count(&first)?.min(MAX_PAGES);
        for page in 2..=pages {
            let url = format!("{ASL_LISTING}/{page}");
            match http.fetch_text(self.source_id(), &url).await {
                Ok(html) => rows.extend(parse_page(&html, &self.airports)?),
                Err(err) => {
                    // keep what earlier pages produced
                    warn!(source = self.source_id(), page, %err, "listing page fetch failed");
                    break;
                }
            }
        }

        Ok(rows)
    }
}

/// Highest page number advertised by the pagination block of page 1.
pub fn page_count(html: &str) -> Result<usize, AdapterError> {
    let document = Html::parse_document(html);
    let page_sel = sel(".pagination a.pagination-page, .pagination a")?;
    let max = document
        .select(&page_sel)
        .filter_map(|a| a.text().collect::<String>().trim().parse::<usize>().ok())
        .max()
        .unwrap_or(1);
    Ok(max.max(1))
}

pub fn parse_page(
    html: &str,
    airports: &AirportDirectory,
) -> Result<Vec<RawObservation>, AdapterError> {
    let document = Html::parse_document(html);
    let article_sel = sel("article.plane")?;
    let name_sel = sel(".plane-name")?;
    let headline_sel = sel(".plane-headline, .leading-headline")?;
    let span_sel = sel("span")?;
    let spec_sel = sel("ul.plane-specs li")?;
    let link_sel = sel("a.button, a.button-full, a.button-primary, a[href]")?;

    let mut rows = Vec::new();

    for article in document.select(&article_sel) {
        let aircraft = first_text(article, &name_sel);

        let Some(headline) = article.select(&headline_sel).next() else {
            continue;
        };
        let spans: Vec<String> = headline
            .select(&span_sel)
            .filter_map(|s| crate::text_or_none(crate::collapse_ws(&s.text().collect::<String>())))
            .collect();
        let (left, right) = match (spans.first(), spans.last()) {
            (Some(left), Some(right)) if spans.len() >= 2 => (left.clone(), right.clone()),
            _ => {
                let text = crate::collapse_ws(&headline.text().collect::<String>());
                match split_route(&text) {
                    Some(pair) => pair,
                    None => continue,
                }
            }
        };

        let Some(origin) = route_code(&left, airports) else {
            continue;
        };
        let Some(destination) = route_code(&right, airports) else {
            continue;
        };

        let mut date_text = None;
        let mut time_text = None;
        for item in article.select(&spec_sel) {
            let text = crate::collapse_ws(&item.text().collect::<String>());
            if date_text.is_none() && find_date_dmy(&text).is_some() {
                date_text = Some(text.clone());
            }
            if time_text.is_none() && find_clock(&text).is_some() {
                time_text = Some(text);
            }
        }
        let departure = match (
            date_text.as_deref().and_then(find_date_dmy),
            time_text.as_deref().and_then(find_clock),
        ) {
            (Some(date), Some(time)) => Some(
                date.and_time(time)
                    .format("%Y-%m-%dT%H:%M:%S")
                    .to_string(),
            ),
            _ => None,
        };

        let link = first_attr(article, &link_sel, "href").map(|href| absolute_link(ASL_BASE, &href));

        rows.push(RawObservation {
            source: "aslgroup".to_string(),
            origin,
            destination,
            origin_name: Some(strip_parenthesized(&left)),
            destination_name: Some(strip_parenthesized(&right)),
            departure,
            arrival: None,
            utc_offset_secs: UTC_OFFSET_SECS,
            aircraft: aircraft.clone(),
            currency: "EUR".to_string(),
            price_current: None,
            price_normal: None,
            link,
            status_text: "listed".to_string(),
            raw: json!({
                "operator": "ASL",
                "headline_left": left,
                "headline_right": right,
                "date": date_text,
                "time": time_text,
                "aircraft": aircraft,
            }),
        });
    }

    Ok(rows)
}

fn split_route(text: &str) -> Option<(String, String)> {
    for separator in ['→', '-'] {
        let parts: Vec<&str> = text
            .split(separator)
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() >= 2 {
            return Some((parts[0].to_string(), parts[parts.len() - 1].to_string()));
        }
    }
    None
}

/// First `dd-mm-yyyy` token in a spec line.
fn find_date_dmy(text: &str) -> Option<NaiveDate> {
    text.split_whitespace()
        .find_map(|token| NaiveDate::parse_from_str(token, "%d-%m-%Y").ok())
}

/// First `HH:MM` token in a spec line.
fn find_clock(text: &str) -> Option<NaiveTime> {
    text.split_whitespace()
        .find_map(|token| NaiveTime::parse_from_str(token, "%H:%M").ok())
}
