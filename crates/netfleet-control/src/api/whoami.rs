use std::collections::BTreeSet;

use axum::Json;
use serde::Serialize;

use crate::api::auth_extractor::Caller;
use crate::api::Envelope;

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    pub api_key: String,
    pub roles: BTreeSet<String>,
}

/// Echo the authenticated API key and its roles.
pub async fn whoami(Caller(caller): Caller) -> Json<Envelope<WhoAmI>> {
    Json(Envelope::ok(WhoAmI {
        api_key: caller.api_key,
        roles: caller.roles,
    }))
}
