//! Application-level orchestration.
//!
//! This module owns the run lifecycle (single steps, batches, cancellation, sync and reset)
//! and post-step processing such as result ordering and focal deltas. CLI layers call into
//! this module to keep responsibilities separated.

mod controller;
mod driver;
mod post_process;

pub(crate) use controller::{BatchReport, RunController, RunError};
pub(crate) use driver::{drive_batch, UiCommand};
pub(crate) use post_process::StepReport;
