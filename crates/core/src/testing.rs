//! Shared fixtures for mock-server tests

use crate::gate::RequestGate;
use crate::limits::EndpointLimitTable;
use reqwest::Client;
use wiremock::MockServer;

/// Gate whose limits are loose enough not to slow tests down
pub(crate) fn fast_gate(server: &MockServer) -> RequestGate {
    let table = EndpointLimitTable::default()
        .with_host(server.address().to_string())
        .with_storage_limit(60_000)
        .with_fallback_limit(60_000);
    RequestGate::new(Client::new(), &table).unwrap()
}

pub(crate) fn mock_buckets_url(server: &MockServer) -> String {
    format!("{}/oss/v2/buckets", server.uri())
}
