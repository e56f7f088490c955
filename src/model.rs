use crate::standings::normalize_name;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    #[serde(default)]
    pub credentials_path: Option<std::path::PathBuf>,
    #[serde(default)]
    pub focal: Option<CompetitorId>,
}

/// Session type of a calendar step, decoded from the service's short codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepKind {
    Practice,
    SprintQualifying,
    Qualifying,
    Sprint,
    Race,
    Other(String),
}

impl StepKind {
    pub fn code(&self) -> &str {
        match self {
            StepKind::Practice => "FP",
            StepKind::SprintQualifying => "QS",
            StepKind::Qualifying => "QC",
            StepKind::Sprint => "S",
            StepKind::Race => "GP",
            StepKind::Other(code) => code,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            StepKind::Practice => "Practice",
            StepKind::SprintQualifying => "Sprint qualifying",
            StepKind::Qualifying => "Qualifying",
            StepKind::Sprint => "Sprint",
            StepKind::Race => "Race",
            StepKind::Other(code) => code,
        }
    }
}

impl From<String> for StepKind {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "FP" | "PRACTICE" => StepKind::Practice,
            "QS" | "SPRINT_QUALIFYING" => StepKind::SprintQualifying,
            "QC" | "QUALIFYING" => StepKind::Qualifying,
            "S" | "SPRINT" => StepKind::Sprint,
            "GP" | "RACE" => StepKind::Race,
            _ => StepKind::Other(raw),
        }
    }
}

impl From<StepKind> for String {
    fn from(kind: StepKind) -> Self {
        kind.code().to_string()
    }
}

/// One schedulable unit of remote simulation work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "index")]
    pub id: u32,
    #[serde(rename = "gp_name", default)]
    pub group_name: String,
    #[serde(default)]
    pub circuit_name: Option<String>,
    #[serde(default)]
    pub circuit_type: Option<String>,
    #[serde(rename = "session_type")]
    pub kind: StepKind,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(rename = "is_simulated", default)]
    pub simulated: bool,
}

/// Compound identity of a competitor: normalized surname plus racing number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompetitorId {
    pub surname: String,
    pub number: u32,
}

impl CompetitorId {
    pub fn new(surname: &str, number: u32) -> Self {
        Self {
            surname: normalize_name(surname),
            number,
        }
    }
}

impl fmt::Display for CompetitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.surname, self.number)
    }
}

impl FromStr for CompetitorId {
    type Err = String;

    /// Parses `surname:number`, e.g. `verstappen:3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (surname, number) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected <surname>:<number>, got {s:?}"))?;
        let number = number
            .trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid racing number {number:?}: {e}"))?;
        let id = CompetitorId::new(surname, number);
        if id.surname.is_empty() {
            return Err(format!("empty surname in {s:?}"));
        }
        Ok(id)
    }
}

/// One row of the standings board as served by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorRecord {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: String,
    pub surname: String,
    #[serde(default)]
    pub number: u32,
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub points: i64,
    #[serde(default)]
    pub wins: Option<i64>,
    #[serde(default)]
    pub podiums: Option<i64>,
    #[serde(default)]
    pub pole_positions: Option<i64>,
    #[serde(default)]
    pub fastest_laps: Option<i64>,
    #[serde(default)]
    pub speed: Option<i64>,
    #[serde(default)]
    pub racing: Option<i64>,
    #[serde(default)]
    pub reaction: Option<i64>,
    #[serde(default)]
    pub experience: Option<i64>,
    #[serde(default)]
    pub consistency: Option<i64>,
    #[serde(default)]
    pub error_rate: Option<i64>,
    #[serde(rename = "street_circuit_affinity", alias = "street_affinity", default)]
    pub street_affinity: Option<i64>,
    #[serde(
        rename = "high_speed_circuit_affinity",
        alias = "high_speed_affinity",
        default
    )]
    pub high_speed_affinity: Option<i64>,
    #[serde(rename = "wet_circuit_affinity", alias = "wet_affinity", default)]
    pub wet_affinity: Option<i64>,
}

impl CompetitorRecord {
    pub fn identity(&self) -> CompetitorId {
        CompetitorId::new(&self.surname, self.number)
    }

    pub fn display_name(&self) -> String {
        if self.name.trim().is_empty() {
            self.surname.clone()
        } else {
            format!("{} {}", self.name, self.surname)
        }
    }
}

/// Per-competitor outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    #[serde(flatten)]
    pub competitor: CompetitorRecord,
    #[serde(default)]
    pub points_gained: i64,
    #[serde(default)]
    pub stats_gained: i64,
    #[serde(default)]
    pub position: Option<u32>,
}

/// Body of `POST api/simulate/session/{id}/`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepResponse {
    #[serde(default)]
    pub results: Vec<StepResult>,
}

/// Live state of the run controller. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    /// A calendar/board read or a season reset is in flight.
    Syncing,
    RunningSingle {
        step_id: u32,
    },
    RunningBatch {
        done: usize,
        total: usize,
        cancel_requested: bool,
    },
}

impl RunState {
    pub fn is_idle(self) -> bool {
        matches!(self, RunState::Idle)
    }

    pub fn is_running(self) -> bool {
        matches!(
            self,
            RunState::RunningSingle { .. } | RunState::RunningBatch { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    StepStarted {
        step_id: u32,
        force: bool,
    },
    StepCompleted {
        step: Box<Step>,
        results: usize,
    },
    BatchStarted {
        total: usize,
    },
    BatchProgress {
        done: usize,
        total: usize,
    },
    BatchFinished {
        done: usize,
        total: usize,
        cancelled: bool,
    },
    RunFailed {
        message: String,
    },
    SeasonComplete {
        champion: Option<Box<CompetitorRecord>>,
    },
    Info(InfoEvent),
}

/// Structured info events emitted by the controller and consumed by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InfoEvent {
    Message(String),
    CancelRequested { done: usize, total: usize },
    SeasonReset,
}

impl InfoEvent {
    /// Render a human-readable message for the CLI.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::CancelRequested { done, total } => {
                format!("Cancelling after the current step ({done}/{total} done)")
            }
            InfoEvent::SeasonReset => "Season reset".to_string(),
        }
    }
}
