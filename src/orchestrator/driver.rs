//! Drives a batch run on a background task while listening for user commands.

use super::controller::{BatchReport, RunController};
use crate::model::InfoEvent;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Duration;

/// Commands emitted by UI layers to control the running batch.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    /// Stop after the step in flight.
    Cancel,
    /// Stop now, abandoning the step in flight.
    Quit,
}

/// Run every remaining step, forwarding cancel commands to the controller until the batch ends.
pub(crate) async fn drive_batch(
    controller: Arc<RunController>,
    force: bool,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<BatchReport> {
    let runner = controller.clone();
    let mut handle = tokio::spawn(async move { runner.run_all(force).await });

    let mut commands_open = true;
    // Cancellation only takes effect between steps; a slow step keeps the batch alive meanwhile.
    let mut cancel_deadline: Option<tokio::time::Instant> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            cmd = cmd_rx.recv(), if commands_open => {
                match cmd {
                    Some(UiCommand::Cancel) => {
                        if controller.cancel() {
                            cancel_deadline =
                                Some(tokio::time::Instant::now() + Duration::from_secs(3));
                        }
                    }
                    Some(UiCommand::Quit) => {
                        handle.abort();
                        // Dropping the batch future releases the controller.
                        let _ = (&mut handle).await;
                        controller.notify(InfoEvent::Message(
                            "Stopped; the step in flight may still complete on the service".into(),
                        ));
                        anyhow::bail!("batch interrupted");
                    }
                    None => commands_open = false,
                }
            }
            joined = &mut handle => {
                let report = joined.context("batch task failed to join")??;
                return Ok(report);
            }
            _ = watchdog.tick() => {
                if let Some(deadline) = cancel_deadline {
                    if !controller.run_state().is_running() {
                        cancel_deadline = None;
                    } else if tokio::time::Instant::now() >= deadline {
                        controller.notify(InfoEvent::Message(
                            "Still waiting for the in-flight step…".into(),
                        ));
                        cancel_deadline = None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::FakeService;
    use crate::api::{MemoryTokenStore, SeasonClient, SessionManager};
    use crate::model::RunEvent;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn cancel_command_stops_the_batch_between_steps() {
        let fake = Arc::new(FakeService::season(4));
        let session = SessionManager::new(fake.clone(), Arc::new(MemoryTokenStore::default()));
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let ctl = Arc::new(RunController::new(SeasonClient::new(session), event_tx));
        ctl.sync().await.unwrap();

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        fake.on_step(move |id| {
            if id == 1 {
                let _ = cmd_tx.send(UiCommand::Cancel);
            }
        });

        let report = drive_batch(ctl.clone(), false, cmd_rx).await.unwrap();
        assert!(report.cancelled);
        assert!(!report.completed.is_empty());
        assert!(report.completed.len() < 4);
        assert_eq!(fake.step_calls(), report.completed);
        assert!(ctl.run_state().is_idle());

        let mut cancel_lines = 0;
        while let Ok(ev) = event_rx.try_recv() {
            match ev {
                RunEvent::Info(InfoEvent::CancelRequested { .. }) => cancel_lines += 1,
                RunEvent::Info(InfoEvent::Message(msg)) => panic!("unexpected notice: {msg}"),
                _ => {}
            }
        }
        assert_eq!(cancel_lines, 1);
    }

    #[tokio::test]
    async fn quit_command_abandons_the_batch() {
        let fake = Arc::new(FakeService::season(6));
        let session = SessionManager::new(fake.clone(), Arc::new(MemoryTokenStore::default()));
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let ctl = Arc::new(RunController::new(SeasonClient::new(session), event_tx));
        ctl.sync().await.unwrap();

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        fake.on_step(move |id| {
            if id == 1 {
                let _ = cmd_tx.send(UiCommand::Cancel);
                let _ = cmd_tx.send(UiCommand::Quit);
            }
        });

        let err = drive_batch(ctl.clone(), false, cmd_rx).await.unwrap_err();
        assert!(err.to_string().contains("interrupted"));
        assert!(ctl.run_state().is_idle());
        assert!(fake.step_calls().len() < 6);

        let mut stopped = false;
        while let Ok(ev) = event_rx.try_recv() {
            if let RunEvent::Info(InfoEvent::Message(msg)) = ev {
                stopped |= msg.starts_with("Stopped");
            }
        }
        assert!(stopped);

        // The controller accepts new work straight away.
        assert!(ctl.run_next(false).await.is_ok());
    }

    #[tokio::test]
    async fn closed_command_channel_lets_batch_finish() {
        let fake = Arc::new(FakeService::season(3));
        let session = SessionManager::new(fake.clone(), Arc::new(MemoryTokenStore::default()));
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let ctl = Arc::new(RunController::new(SeasonClient::new(session), event_tx));
        ctl.sync().await.unwrap();

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
        drop(cmd_tx);
        let report = drive_batch(ctl, false, cmd_rx).await.unwrap();
        assert_eq!(report.completed, vec![1, 2, 3]);
        assert!(!report.cancelled);
    }
}
