use crate::api::{ApiError, HttpTransport, SeasonClient, SessionManager};
use crate::model::{ClientConfig, CompetitorId, RunEvent};
use crate::orchestrator::{drive_batch, RunController, RunError, UiCommand};
use crate::storage::{FileTokenStore, Profile, SeasonState};
use crate::text_summary::{self, TextSummary};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "season-runner",
    version,
    about = "Drive a remote racing season simulation step by step"
)]
pub struct Cli {
    /// Base URL of the season service
    #[arg(
        long,
        global = true,
        env = "SEASON_API_BASE",
        default_value = "http://localhost:8000/"
    )]
    pub base_url: String,

    /// Where to keep the access/refresh token pair
    #[arg(long, global = true)]
    pub credentials: Option<PathBuf>,

    /// Per-request timeout (e.g. 30s); unlimited when omitted
    #[arg(long, global = true)]
    pub request_timeout: Option<humantime::Duration>,

    /// Follow this driver for this invocation (surname:number), overriding the saved profile
    #[arg(long, global = true)]
    pub driver: Option<CompetitorId>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Log in and store the token pair
    Login {
        username: String,
        #[arg(long, env = "SEASON_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored tokens and profile
    Logout,
    /// Show the account the stored tokens belong to
    Whoami,
    /// Check that the service answers
    Health,
    /// Choose the driver to follow across runs
    Select { surname: String, number: u32 },
    /// Show the calendar grouped by grand prix
    Calendar,
    /// Show the ranked standings
    Standings {
        /// Also write the standings as JSON to this path
        #[arg(long)]
        export_json: Option<PathBuf>,
    },
    /// Run the next unsimulated step
    Next {
        #[arg(long)]
        force: bool,
    },
    /// Run one step by id
    Step {
        id: u32,
        #[arg(long)]
        force: bool,
    },
    /// Run every remaining step; Ctrl-C stops after the current one
    All {
        #[arg(long)]
        force: bool,
    },
    /// Reset the season on the service
    Reset,
}

/// Build a `ClientConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> ClientConfig {
    ClientConfig {
        base_url: args.base_url.clone(),
        user_agent: format!("season-runner/{}", env!("CARGO_PKG_VERSION")),
        request_timeout: args.request_timeout.map(Duration::from),
        credentials_path: args.credentials.clone(),
        focal: args.driver.clone(),
    }
}

/// Per-invocation output context.
struct Output {
    tx: mpsc::UnboundedSender<OutputLine>,
    json: bool,
}

impl Output {
    fn info(&self, msg: impl Into<String>) {
        let _ = self.tx.send(OutputLine::Stderr(msg.into()));
    }

    fn summary(&self, summary: TextSummary) {
        for line in summary.lines {
            let _ = self.tx.send(OutputLine::Stdout(line));
        }
    }

    /// JSON mode prints `value`; text mode prints the lines from `text`.
    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> TextSummary) -> Result<()> {
        if self.json {
            let out = serde_json::to_string_pretty(value)?;
            let _ = self.tx.send(OutputLine::Stdout(out));
        } else {
            self.summary(text());
        }
        Ok(())
    }
}

/// Render controller events as progress lines while commands run.
fn spawn_event_printer(
    mut evt_rx: mpsc::UnboundedReceiver<RunEvent>,
    out_tx: mpsc::UnboundedSender<OutputLine>,
    json: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(ev) = evt_rx.recv().await {
            let line = match ev {
                RunEvent::StepStarted { step_id, force } => {
                    let forced = if force { " (forced)" } else { "" };
                    OutputLine::Stderr(format!("Running step #{step_id}{forced}…"))
                }
                RunEvent::StepCompleted { step, results } => OutputLine::Stderr(format!(
                    "Step #{} {} done ({results} results)",
                    step.id,
                    step.kind.label()
                )),
                RunEvent::BatchStarted { total } => {
                    OutputLine::Stderr(format!("== Running {total} steps =="))
                }
                RunEvent::BatchProgress { done, total } => {
                    OutputLine::Stderr(format!("Progress: {done}/{total}"))
                }
                RunEvent::BatchFinished { .. } => continue,
                RunEvent::RunFailed { message } => {
                    OutputLine::Stderr(format!("Run failed: {message}"))
                }
                RunEvent::SeasonComplete { champion } => {
                    let summary = text_summary::season_complete_summary(champion.as_deref());
                    for line in summary.lines {
                        let _ = out_tx.send(if json {
                            OutputLine::Stderr(line)
                        } else {
                            OutputLine::Stdout(line)
                        });
                    }
                    continue;
                }
                RunEvent::Info(info) => OutputLine::Stderr(info.to_message()),
            };
            let _ = out_tx.send(line);
        }
    })
}

pub async fn run(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let profile_path = Profile::default_path();
    let mut profile = Profile::load(&profile_path).unwrap_or_else(|e| {
        tracing::warn!("ignoring unreadable profile: {e:#}");
        Profile::default()
    });

    let transport = Arc::new(HttpTransport::new(&cfg)?);
    let store = Arc::new(FileTokenStore::new(cfg.credentials_path.clone()));
    let client = SeasonClient::new(SessionManager::new(transport, store));

    let season_path = SeasonState::default_path();
    let mut season = SeasonState::load(&season_path).unwrap_or_else(|e| {
        tracing::warn!("ignoring unreadable season state: {e:#}");
        SeasonState::default()
    });

    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, evt_rx) = mpsc::unbounded_channel::<RunEvent>();
    let printer = spawn_event_printer(evt_rx, out_tx.clone(), args.json);
    let controller = Arc::new(
        RunController::new(client, evt_tx)
            .with_completion_latched(season.is_complete(&cfg.base_url)),
    );
    let out = Output {
        tx: out_tx,
        json: args.json,
    };

    let focal = cfg.focal.clone().or_else(|| profile.focal.clone());
    let res = dispatch(&args, &controller, &out, &mut profile, &profile_path, focal).await;

    if season.set_complete(&cfg.base_url, controller.is_season_complete()) {
        if let Err(e) = season.save(&season_path) {
            tracing::warn!("failed to save season state: {e:#}");
        }
    }

    if let Err(e) = &res {
        if !matches!(args.command, Command::Login { .. }) && is_unauthorized(e) {
            match Profile::clear(&profile_path) {
                Ok(()) => out.info("Session expired; logged out"),
                Err(err) => tracing::warn!("failed to clear profile: {err:#}"),
            }
        }
    }

    // The printer stops once every event sender is gone.
    drop(controller);
    let _ = printer.await;
    drop(out);
    let _ = out_handle.await;
    res
}

async fn dispatch(
    args: &Cli,
    controller: &Arc<RunController>,
    out: &Output,
    profile: &mut Profile,
    profile_path: &std::path::Path,
    focal: Option<CompetitorId>,
) -> Result<()> {
    let session = controller.client().session();
    match &args.command {
        Command::Login { username, password } => {
            let login = session
                .login(username, password)
                .await
                .context("login failed")?;
            profile.username = Some(login.username.unwrap_or_else(|| username.clone()));
            profile.save(profile_path)?;
            out.info(format!("Logged in as {username}"));
        }
        Command::Logout => {
            session.logout();
            Profile::clear(profile_path)?;
            out.info("Logged out");
        }
        Command::Whoami => {
            if !session.is_authenticated() {
                anyhow::bail!("not logged in");
            }
            let me = controller.client().me().await.context("whoami failed")?;
            out.emit(&me, || TextSummary {
                lines: vec![me.username.clone()],
            })?;
        }
        Command::Health => {
            let ok = controller.client().health().await.context("health check failed")?;
            out.emit(&serde_json::json!({ "ok": ok }), || TextSummary {
                lines: vec![if ok { "ok".into() } else { "unhealthy".into() }],
            })?;
            if !ok {
                anyhow::bail!("service reported unhealthy");
            }
        }
        Command::Select { surname, number } => {
            controller.sync().await.context("failed to load standings")?;
            let id = CompetitorId::new(surname, *number);
            let Some(rec) = controller
                .board()
                .into_iter()
                .find(|r| r.identity() == id)
            else {
                anyhow::bail!("no driver {id} on the board");
            };
            controller.select_focal(Some(id.clone()))?;
            profile.focal = Some(id);
            profile.save(profile_path)?;
            out.info(format!("Following {}", rec.display_name()));
        }
        Command::Calendar => {
            controller.sync().await.context("failed to load calendar")?;
            let steps = controller.calendar();
            out.emit(&steps, || text_summary::calendar_summary(&steps))?;
        }
        Command::Standings { export_json } => {
            controller.sync().await.context("failed to load standings")?;
            let standings = controller.standings();
            controller.select_focal(focal.clone())?;
            if let Some(p) = export_json.as_deref() {
                crate::storage::export_json(p, &standings)?;
                out.info(format!("Exported: {}", p.display()));
            }
            out.emit(&standings, || {
                text_summary::standings_summary(&standings, focal.as_ref())
            })?;
            if let Some(rec) = controller.focal_record() {
                out.info(format!("Following {}: {} pts", rec.display_name(), rec.points));
            }
        }
        Command::Next { force } => {
            prepare(controller, focal).await?;
            match controller.run_next(*force).await? {
                Some(report) => {
                    out.emit(&report, || text_summary::step_report_summary(&report, 10))?
                }
                None => out.info("Every step has already been simulated"),
            }
        }
        Command::Step { id, force } => {
            prepare(controller, focal).await?;
            let report = controller.run_single(*id, *force).await?;
            out.emit(&report, || text_summary::step_report_summary(&report, 10))?;
        }
        Command::All { force } => {
            prepare(controller, focal).await?;
            let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
            let signals = tokio::spawn(async move {
                // First Ctrl-C finishes the current step, the next one stops at once.
                let mut presses = 0u32;
                while tokio::signal::ctrl_c().await.is_ok() {
                    presses += 1;
                    let cmd = if presses == 1 {
                        UiCommand::Cancel
                    } else {
                        UiCommand::Quit
                    };
                    if cmd_tx.send(cmd).is_err() {
                        break;
                    }
                }
            });
            let res = drive_batch(controller.clone(), *force, cmd_rx).await;
            signals.abort();
            let report = res?;
            out.emit(&report, || text_summary::batch_summary(&report))?;
        }
        Command::Reset => {
            controller
                .reset_season()
                .await
                .context("season reset failed")?;
            out.emit(&controller.progress(), || TextSummary {
                lines: vec![format!("Season reset: {} steps", controller.progress().total)],
            })?;
        }
    }
    Ok(())
}

/// Whether the service rejected the stored session for good.
fn is_unauthorized(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<ApiError>(),
            Some(ApiError::Unauthorized { .. })
        ) || matches!(
            cause.downcast_ref::<RunError>(),
            Some(RunError::Api(ApiError::Unauthorized { .. }))
        )
    })
}

/// Load the caches and pick the focal driver before a run.
async fn prepare(controller: &RunController, focal: Option<CompetitorId>) -> Result<()> {
    controller.sync().await.context("failed to load season")?;
    controller.select_focal(focal)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_flag_parses_surname_and_number() {
        let cli = Cli::try_parse_from([
            "season-runner",
            "--driver",
            "Pérez:11",
            "--request-timeout",
            "30s",
            "next",
            "--force",
        ])
        .unwrap();
        let cfg = build_config(&cli);
        assert_eq!(cfg.focal, Some(CompetitorId::new("perez", 11)));
        assert_eq!(cfg.request_timeout, Some(Duration::from_secs(30)));
        assert!(matches!(cli.command, Command::Next { force: true }));
        assert!(cfg.user_agent.starts_with("season-runner/"));
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from(["season-runner", "step", "4", "--json"]).unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Command::Step { id: 4, force: false }));
        assert_eq!(build_config(&cli).request_timeout, None);
    }

    #[test]
    fn unauthorized_is_found_through_context() {
        let unauthorized = ApiError::Unauthorized {
            detail: "Token is invalid or expired".into(),
        };
        let direct = anyhow::Error::new(unauthorized.clone()).context("whoami failed");
        assert!(is_unauthorized(&direct));

        let via_run = anyhow::Error::new(RunError::Api(unauthorized)).context("failed to load season");
        assert!(is_unauthorized(&via_run));

        let remote = anyhow::Error::new(RunError::Api(ApiError::Remote {
            status: 500,
            body: "boom".into(),
        }));
        assert!(!is_unauthorized(&remote));
        assert!(!is_unauthorized(&anyhow::Error::new(RunError::Busy)));
    }

    #[test]
    fn malformed_driver_is_rejected() {
        assert!(Cli::try_parse_from(["season-runner", "--driver", "leclerc", "calendar"]).is_err());
    }
}
