use serde::{Deserialize, Serialize};

use crate::engine::Dispatch;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct SourceRequest {
    /// A `data:` URL, an http(s) frame URL, or empty to unload.
    pub(crate) image: Option<String>,
    pub(crate) viewport_height: Option<f64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct SourceResponse {
    pub(crate) source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) scan: Option<Dispatch>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ScanResponse {
    pub(crate) scan: Dispatch,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}
