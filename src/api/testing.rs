//! In-process stand-in for the remote season service, used by unit tests.

use super::error::ApiError;
use super::session::{LOGIN_PATH, REFRESH_PATH};
use super::transport::{ApiRequest, ApiResponse, Transport};
use crate::model::{CompetitorRecord, Step, StepKind, StepResult};
use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};

type StepHook = Arc<dyn Fn(u32) + Send + Sync>;

#[derive(Default)]
struct FakeState {
    calendar: Vec<Step>,
    board: Vec<CompetitorRecord>,
    log: Vec<(String, Option<String>)>,
    valid_access: Option<String>,
    refresh: Option<(String, String, Option<String>)>,
    reject_refreshed: bool,
    login: Option<(String, String, String, String)>,
    failing_step: Option<(u32, u16)>,
    vanishing_step: Option<u32>,
    offline: bool,
    step_hook: Option<StepHook>,
}

pub(crate) struct FakeService {
    state: Mutex<FakeState>,
}

fn competitor(surname: &str, name: &str, number: u32, speed: i64) -> CompetitorRecord {
    serde_json::from_value(json!({
        "surname": surname,
        "name": name,
        "number": number,
        "team": "Test Team",
        "points": 0,
        "wins": 0,
        "podiums": 0,
        "speed": speed,
        "racing": 70,
        "reaction": 70,
        "experience": 60,
        "consistency": 75,
        "error_rate": 5,
        "street_circuit_affinity": 3,
        "high_speed_circuit_affinity": 4,
        "wet_circuit_affinity": 2,
    }))
    .expect("valid competitor fixture")
}

fn json_response(status: u16, body: serde_json::Value) -> ApiResponse {
    ApiResponse {
        status,
        body: body.to_string(),
    }
}

impl FakeService {
    /// A season of `steps` steps (qualifying/race pairs per round) and three competitors.
    pub(crate) fn season(steps: u32) -> Self {
        let calendar = (1..=steps)
            .map(|id| Step {
                id,
                group_name: format!("Round {}", id.div_ceil(2)),
                circuit_name: Some(format!("Circuit {}", id.div_ceil(2))),
                circuit_type: Some("street".into()),
                kind: if id % 2 == 1 {
                    StepKind::Qualifying
                } else {
                    StepKind::Race
                },
                date: Some(format!("2026-03-{:02}", id.min(28))),
                simulated: false,
            })
            .collect();
        let board = vec![
            competitor("Verstappen", "Max", 3, 90),
            competitor("Norris", "Lando", 4, 88),
            competitor("Leclerc", "Charles", 16, 87),
        ];
        Self {
            state: Mutex::new(FakeState {
                calendar,
                board,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn require_access(&self, token: &str) {
        self.lock().valid_access = Some(token.to_string());
    }

    pub(crate) fn grant_on_refresh(&self, refresh: &str, access: &str, rotated: Option<&str>) {
        self.lock().refresh = Some((
            refresh.to_string(),
            access.to_string(),
            rotated.map(str::to_string),
        ));
    }

    /// Tokens issued by the refresh endpoint are still rejected by every other endpoint.
    pub(crate) fn reject_refreshed_tokens(&self) {
        self.lock().reject_refreshed = true;
    }

    pub(crate) fn accept_login(&self, user: &str, password: &str, access: &str, refresh: &str) {
        self.lock().login = Some((user.into(), password.into(), access.into(), refresh.into()));
    }

    pub(crate) fn fail_step(&self, id: u32, status: u16) {
        self.lock().failing_step = Some((id, status));
    }

    /// The step is executed, then dropped from the calendar as if the season changed meanwhile.
    pub(crate) fn vanish_after_step(&self, id: u32) {
        self.lock().vanishing_step = Some(id);
    }

    pub(crate) fn go_offline(&self) {
        self.lock().offline = true;
    }

    pub(crate) fn shuffle_calendar(&self) {
        self.lock().calendar.reverse();
    }

    /// Called with the step id whenever a step request reaches the service.
    pub(crate) fn on_step(&self, hook: impl Fn(u32) + Send + Sync + 'static) {
        self.lock().step_hook = Some(Arc::new(hook));
    }

    pub(crate) fn paths(&self) -> Vec<String> {
        self.lock().log.iter().map(|(p, _)| p.clone()).collect()
    }

    pub(crate) fn bearers(&self) -> Vec<Option<String>> {
        self.lock().log.iter().map(|(_, b)| b.clone()).collect()
    }

    /// Ids of every step request received, in arrival order.
    pub(crate) fn step_calls(&self) -> Vec<u32> {
        self.paths()
            .iter()
            .filter_map(|p| p.strip_prefix("POST api/simulate/session/"))
            .filter_map(|rest| rest.split('/').next())
            .filter_map(|id| id.parse().ok())
            .collect()
    }

    pub(crate) fn simulated_flags(&self) -> Vec<bool> {
        let mut cal = self.lock().calendar.clone();
        cal.sort_by_key(|s| s.id);
        cal.iter().map(|s| s.simulated).collect()
    }

    fn simulate(state: &mut FakeState, id: u32) -> ApiResponse {
        let Some(step) = state.calendar.iter_mut().find(|s| s.id == id) else {
            return json_response(404, json!({ "detail": "No SeasonSession matches the given query." }));
        };
        step.simulated = true;

        let n = state.board.len();
        let winner = (id as usize - 1) % n;
        let mut results = Vec::with_capacity(n);
        for (offset, pos) in (0..n).zip(1u32..) {
            let idx = (winner + offset) % n;
            let gained = match pos {
                1 => 25,
                2 => 18,
                3 => 15,
                _ => 0,
            };
            let rec = &mut state.board[idx];
            rec.points += gained;
            rec.speed = rec.speed.map(|s| s + 1);
            if pos == 1 {
                rec.wins = Some(rec.wins.unwrap_or(0) + 1);
            }
            rec.podiums = Some(rec.podiums.unwrap_or(0) + 1);
            results.push(StepResult {
                competitor: rec.clone(),
                points_gained: gained,
                stats_gained: 1,
                position: Some(pos),
            });
        }
        if state.vanishing_step == Some(id) {
            state.calendar.retain(|s| s.id != id);
        }
        json_response(200, json!({ "results": results }))
    }

    fn reset(state: &mut FakeState) {
        for step in &mut state.calendar {
            step.simulated = false;
        }
        for rec in &mut state.board {
            rec.points = 0;
            rec.wins = Some(0);
            rec.podiums = Some(0);
        }
    }
}

#[async_trait]
impl Transport for FakeService {
    async fn send(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        // Every request suspends once, like a real round trip.
        tokio::task::yield_now().await;

        let mut line = format!("{} {}", request.method, request.path);
        if !request.query.is_empty() {
            let q: Vec<String> = request.query.iter().map(|(k, v)| format!("{k}={v}")).collect();
            line.push('?');
            line.push_str(&q.join("&"));
        }

        let hook = {
            let mut st = self.lock();
            if st.offline {
                return Err(ApiError::Network("connection refused".into()));
            }
            st.log.push((line, bearer.map(str::to_string)));
            if request.path.starts_with("api/simulate/session/") {
                st.step_hook.clone()
            } else {
                None
            }
        };

        if let Some(hook) = hook {
            let id = request
                .path
                .trim_start_matches("api/simulate/session/")
                .trim_end_matches('/')
                .parse()
                .unwrap_or(0);
            hook(id);
        }

        let mut st = self.lock();
        let body = request.body.clone().unwrap_or(serde_json::Value::Null);

        if request.path == LOGIN_PATH {
            return Ok(match st.login.as_ref() {
                Some((u, p, a, r)) if body["username"] == *u && body["password"] == *p => {
                    json_response(200, json!({ "access": a, "refresh": r, "username": u }))
                }
                _ => json_response(401, json!({ "detail": "Identifiants invalides." })),
            });
        }

        if request.path == REFRESH_PATH {
            let granted = match st.refresh.clone() {
                Some((expected, access, rotated)) if body["refresh"] == expected => {
                    Some((access, rotated))
                }
                _ => None,
            };
            return Ok(match granted {
                Some((access, rotated)) => {
                    if !st.reject_refreshed {
                        st.valid_access = Some(access.clone());
                    }
                    match rotated {
                        Some(r) => json_response(200, json!({ "access": access, "refresh": r })),
                        None => json_response(200, json!({ "access": access })),
                    }
                }
                None => json_response(401, json!({ "detail": "Token is invalid or expired" })),
            });
        }

        if let Some(valid) = st.valid_access.as_deref() {
            if bearer != Some(valid) {
                return Ok(json_response(
                    401,
                    json!({ "detail": "Given token not valid for any token type" }),
                ));
            }
        }

        let path = request.path.as_str();
        let resp = match path {
            "api/season/calendar/" => json_response(200, json!(st.calendar)),
            "api/drivers/" => json_response(200, json!(st.board)),
            "api/season/reset/" => {
                Self::reset(&mut st);
                json_response(200, json!({ "ok": true, "reset_skills": true }))
            }
            "api/auth/me/" => json_response(200, json!({ "id": 1, "username": "tester" })),
            "api/health/" => json_response(200, json!({ "ok": true })),
            _ => {
                let id: Option<u32> = path
                    .strip_prefix("api/simulate/session/")
                    .and_then(|rest| rest.trim_end_matches('/').parse().ok());
                match id {
                    Some(id) if st.failing_step.map(|(f, _)| f) == Some(id) => {
                        let status = st.failing_step.map(|(_, s)| s).unwrap_or(500);
                        json_response(status, json!({ "detail": "simulation failed" }))
                    }
                    Some(id) => Self::simulate(&mut st, id),
                    None => json_response(404, json!({ "detail": "Not found." })),
                }
            }
        };
        Ok(resp)
    }
}
