// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use experience_fabric::SharedEnvelope;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_PAGE_LIMIT: usize = 100;
pub const MAX_PAGE_LIMIT: usize = 1000;

#[derive(Serialize, Deserialize)]
pub struct PublishRequest {
    pub module: String,
    pub signal: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Deserialize, Default)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT)
    }
}

#[derive(Deserialize, Default)]
pub struct SinceQuery {
    #[serde(default)]
    pub cursor: u64,
    pub limit: Option<usize>,
}

impl SinceQuery {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(MAX_PAGE_LIMIT)
    }
}

#[derive(Serialize, Deserialize)]
pub struct EnvelopesResponse {
    pub envelopes: Vec<SharedEnvelope>,
}

/// One page of a cursor walk. Resume with `next_cursor` until `caught_up`.
#[derive(Serialize, Deserialize)]
pub struct SinceResponse {
    pub envelopes: Vec<SharedEnvelope>,
    pub next_cursor: u64,
    pub caught_up: bool,
}

#[derive(Serialize, Deserialize)]
pub struct ModuleRequest {
    pub module: String,
}

#[derive(Serialize, Deserialize)]
pub struct ModulesResponse {
    pub allowed_modules: Vec<String>,
}
