use std::sync::Arc;

use elcat_adapters::adapter_for_source;
use elcat_core::airports::AirportDirectory;

#[test]
fn registry_knows_every_production_source() {
    let airports = Arc::new(AirportDirectory::default());
    for source_id in ["globeair", "aslgroup", "eaviation"] {
        let adapter = adapter_for_source(source_id, &airports)
            .unwrap_or_else(|| panic!("no adapter registered for {source_id}"));
        assert_eq!(adapter.source_id(), source_id);
    }
}

#[test]
fn registry_rejects_unknown_sources() {
    let airports = Arc::new(AirportDirectory::default());
    assert!(adapter_for_source("jetfinder", &airports).is_none());
}
