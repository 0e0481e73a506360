//! Bling homologation: the fixed five-step product lifecycle an integration
//! must complete once to be certified.
//!
//! START → STEP1 (GET) → STEP2 (POST) → STEP3 (PUT) → STEP4 (PATCH) →
//! STEP5 (DELETE) → SUCCESS, with ERROR reachable from every step.

pub mod runner;

use serde::Serialize;
use thiserror::Error;

pub use runner::ComplianceRunner;

/// Response header carrying the rotating compliance hash.
pub const HASH_HEADER: &str = "x-bling-homologacao";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StepTag {
    #[serde(rename = "START")]
    Start,
    #[serde(rename = "STEP1")]
    FetchProduct,
    #[serde(rename = "STEP2")]
    CreateProduct,
    #[serde(rename = "STEP3")]
    UpdateProduct,
    #[serde(rename = "STEP4")]
    Deactivate,
    #[serde(rename = "STEP5")]
    Delete,
    #[serde(rename = "HASH")]
    Hash,
    #[serde(rename = "REFRESH")]
    Refresh,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "ERROR")]
    Error,
}

impl StepTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepTag::Start => "START",
            StepTag::FetchProduct => "STEP1",
            StepTag::CreateProduct => "STEP2",
            StepTag::UpdateProduct => "STEP3",
            StepTag::Deactivate => "STEP4",
            StepTag::Delete => "STEP5",
            StepTag::Hash => "HASH",
            StepTag::Refresh => "REFRESH",
            StepTag::Success => "SUCCESS",
            StepTag::Error => "ERROR",
        }
    }
}

/// One line of the run log. `timestamp` is milliseconds since run start.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub step: StepTag,
    pub message: String,
    pub timestamp: u64,
    pub data: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("time limit of {budget_ms}ms exceeded ({elapsed_ms}ms elapsed)")]
    BudgetExceeded { budget_ms: u64, elapsed_ms: u64 },

    #[error("step {step} failed: {status} - {body}")]
    Rejected {
        step: &'static str,
        status: u16,
        body: String,
    },

    #[error("step {step} could not reach the API: {message}")]
    Transport { step: &'static str, message: String },

    #[error("step {step} returned an unexpected payload: {message}")]
    Malformed { step: &'static str, message: String },
}

/// Final report, serialized as the HTTP response body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HomologationReport {
    pub success: bool,
    pub homologacao_id: String,
    pub total_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub steps: Vec<LogEntry>,
    pub final_hash: Option<String>,
    /// Id of the product created in step 2, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<serde_json::Value>,
}

impl HomologationReport {
    /// Whether any log entry carries `tag`.
    pub fn reached(&self, tag: StepTag) -> bool {
        self.steps.iter().any(|e| e.step == tag)
    }
}
