//! Provider catalogue and key availability.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;

use crate::llm::{ProviderDescriptor, descriptors};
use crate::server::AppState;

/// GET /api/providers
pub async fn list_providers() -> Json<&'static [ProviderDescriptor]> {
    Json(descriptors())
}

/// GET /api/keys
///
/// Which providers have a server-side key, so clients know when `apiKey`
/// may be left out.
pub async fn keys(State(state): State<AppState>) -> Json<BTreeMap<&'static str, bool>> {
    let configured = state
        .dispatcher
        .keys()
        .credentials()
        .configured()
        .into_iter()
        .map(|(id, present)| (id.as_str(), present))
        .collect();
    Json(configured)
}
