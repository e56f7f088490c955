//! Typed endpoints of the remote season service.

use super::error::ApiError;
use super::session::SessionManager;
use super::transport::ApiRequest;
use crate::model::{CompetitorRecord, Step, StepResponse, StepResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

const CALENDAR_PATH: &str = "api/season/calendar/";
const BOARD_PATH: &str = "api/drivers/";
const RESET_PATH: &str = "api/season/reset/";
const ME_PATH: &str = "api/auth/me/";
const HEALTH_PATH: &str = "api/health/";

pub(crate) fn step_path(id: u32) -> String {
    format!("api/simulate/session/{id}/")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub id: Option<i64>,
    pub username: String,
}

pub struct SeasonClient {
    session: SessionManager,
}

impl SeasonClient {
    pub fn new(session: SessionManager) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Full calendar, ordered by step id.
    pub async fn calendar(&self) -> Result<Vec<Step>, ApiError> {
        let resp = self.session.call(&ApiRequest::get(CALENDAR_PATH)).await?;
        let steps: Option<Vec<Step>> = resp.json(CALENDAR_PATH)?;
        let mut steps = steps.unwrap_or_default();
        crate::calendar::sort_by_id(&mut steps);
        debug!(steps = steps.len(), "calendar fetched");
        Ok(steps)
    }

    pub async fn board(&self) -> Result<Vec<CompetitorRecord>, ApiError> {
        let resp = self.session.call(&ApiRequest::get(BOARD_PATH)).await?;
        let board: Option<Vec<CompetitorRecord>> = resp.json(BOARD_PATH)?;
        Ok(board.unwrap_or_default())
    }

    /// Execute one step remotely. With `force` the service recomputes an already simulated step.
    pub async fn simulate_step(&self, id: u32, force: bool) -> Result<Vec<StepResult>, ApiError> {
        let path = step_path(id);
        let mut request = ApiRequest::post(path.clone(), serde_json::json!({}));
        if force {
            request = request.with_query("force", "1");
        }
        let resp = self.session.call(&request).await?;
        let body: Option<StepResponse> = resp.json(&path)?;
        Ok(body.unwrap_or_default().results)
    }

    pub async fn reset_season(&self) -> Result<(), ApiError> {
        self.session
            .call(&ApiRequest::post(RESET_PATH, serde_json::json!({})))
            .await?;
        Ok(())
    }

    pub async fn me(&self) -> Result<Account, ApiError> {
        let resp = self.session.call(&ApiRequest::get(ME_PATH)).await?;
        resp.json(ME_PATH)
    }

    pub async fn health(&self) -> Result<bool, ApiError> {
        let resp = self.session.call(&ApiRequest::get(HEALTH_PATH)).await?;
        let v: serde_json::Value = resp.json(HEALTH_PATH)?;
        Ok(v.get("ok").and_then(|ok| ok.as_bool()).unwrap_or(false))
    }
}
