use serde::{Deserialize, Serialize};

use crate::services::entitlement::QuotaStatus;
use catalog::FeatureFlag;

#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    pub dimension: String,
}

#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    pub quota: QuotaStatus,
}

#[derive(Debug, Serialize)]
pub struct FeatureResponse {
    pub feature: FeatureFlag,
    pub allowed: bool,
}
