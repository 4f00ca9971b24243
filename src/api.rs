//! Remote data endpoint client
//!
//! Every call is a POST of `{"action": <name>, ...params}` to a single URL,
//! answered with `{"success": bool, ...payload}`.

use chrono::NaiveDate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ApiError;

/// Days shown in the recent-entries list
pub const RECENT_LIST_DAYS: u32 = 14;

/// Cost per drink assumed when the endpoint has none stored
pub const DEFAULT_COST_PER_DRINK: f64 = 3.0;

/// A request body understood by the endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Action {
    LogDrinks { date: NaiveDate, drinks: u32 },
    GetRecentEntries { days: u32 },
    GetSettings,
    #[serde(rename_all = "camelCase")]
    UpdateSetting { setting_name: String, value: Value },
    GetMonthStats { month: u32, year: i32 },
    GetYearStats { year: i32 },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::LogDrinks { .. } => "logDrinks",
            Action::GetRecentEntries { .. } => "getRecentEntries",
            Action::GetSettings => "getSettings",
            Action::UpdateSetting { .. } => "updateSetting",
            Action::GetMonthStats { .. } => "getMonthStats",
            Action::GetYearStats { .. } => "getYearStats",
        }
    }
}

/// Envelope returned by every action
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    /// Action-specific fields
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl ApiResponse {
    /// Turn `success: false` into `ApiError::Rejected`
    pub fn into_result(self) -> Result<Self, ApiError> {
        if self.success {
            Ok(self)
        } else {
            Err(ApiError::Rejected(
                self.message.unwrap_or_else(|| "no message".to_string()),
            ))
        }
    }
}

/// One day in the recent-entries list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentEntry {
    /// Date as formatted by the endpoint (e.g. `2024-07-15 Mon`)
    pub tracking_date: String,
    pub actual_drinks: u32,
}

/// Totals for a month or a year, as returned by `getMonthStats`/`getYearStats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStats {
    pub total_drinks: u32,
    pub drinking_days: u32,
    pub dry_days: u32,
    pub average_drinks_per_drinking_day: f64,
    pub total_cost: f64,
    pub total_days_tracked: u32,
    /// Per-month totals; only year stats carry them
    #[serde(default)]
    pub monthly_breakdown: Vec<MonthTotal>,
}

/// One bar of the yearly breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthTotal {
    /// 1-12
    pub month: u32,
    pub total_drinks: u32,
}

/// User settings stored by the endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_cost_per_drink")]
    pub cost_per_drink: f64,
    /// Drinks per day; 0 means no target
    #[serde(default)]
    pub daily_target: u32,
}

fn default_cost_per_drink() -> f64 {
    DEFAULT_COST_PER_DRINK
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cost_per_drink: DEFAULT_COST_PER_DRINK,
            daily_target: 0,
        }
    }
}

/// Client for the tracker's data endpoint
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    endpoint: String,
}

impl ApiClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_client(Client::new(), endpoint)
    }

    /// Create an ApiClient with a custom HTTP client
    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    /// POST an action and decode the envelope
    pub async fn call(&self, action: &Action) -> Result<ApiResponse, ApiError> {
        debug!(action = action.name(), "calling endpoint");
        let response = self
            .client
            .post(&self.endpoint)
            .json(action)
            .send()
            .await?;
        let text = response.text().await?;
        let envelope: ApiResponse = serde_json::from_str(&text)?;
        envelope.into_result()
    }

    /// Record the number of drinks for a day
    pub async fn log_drinks(&self, date: NaiveDate, drinks: u32) -> Result<ApiResponse, ApiError> {
        self.call(&Action::LogDrinks { date, drinks }).await
    }

    /// Entries for the last `days` days, newest first as returned by the endpoint
    pub async fn get_recent_entries(&self, days: u32) -> Result<Vec<RecentEntry>, ApiError> {
        let response = self.call(&Action::GetRecentEntries { days }).await?;
        parse_entries(response)
    }

    /// Stored settings, with defaults for any the endpoint leaves out
    pub async fn get_settings(&self) -> Result<Settings, ApiError> {
        let response = self.call(&Action::GetSettings).await?;
        parse_settings(response)
    }

    pub async fn update_setting(
        &self,
        setting_name: impl Into<String>,
        value: Value,
    ) -> Result<ApiResponse, ApiError> {
        self.call(&Action::UpdateSetting {
            setting_name: setting_name.into(),
            value,
        })
        .await
    }

    pub async fn get_month_stats(&self, month: u32, year: i32) -> Result<PeriodStats, ApiError> {
        let response = self.call(&Action::GetMonthStats { month, year }).await?;
        parse_stats(response)
    }

    pub async fn get_year_stats(&self, year: i32) -> Result<PeriodStats, ApiError> {
        let response = self.call(&Action::GetYearStats { year }).await?;
        parse_stats(response)
    }
}

fn parse_entries(response: ApiResponse) -> Result<Vec<RecentEntry>, ApiError> {
    match response.payload.get("entries") {
        Some(entries) => Ok(serde_json::from_value(entries.clone())?),
        None => Ok(Vec::new()),
    }
}

/// Stats fields sit at the top level of the envelope
fn parse_stats(response: ApiResponse) -> Result<PeriodStats, ApiError> {
    Ok(serde_json::from_value(Value::Object(response.payload))?)
}

fn parse_settings(response: ApiResponse) -> Result<Settings, ApiError> {
    match response.payload.get("settings") {
        Some(Value::Null) | None => Ok(Settings::default()),
        Some(settings) => Ok(serde_json::from_value(settings.clone())?),
    }
}
