//! Before/after stat snapshots for the focal competitor.
//!
//! `begin_run` must run before the remote step call and `end_run` after the refreshed board is
//! in hand. Swapping the two yields a delta computed against itself.

use crate::model::{CompetitorId, CompetitorRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StatField {
    Points,
    Speed,
    Racing,
    Reaction,
    Experience,
    Consistency,
    ErrorRate,
    StreetAffinity,
    HighSpeedAffinity,
    WetAffinity,
}

impl StatField {
    pub const ALL: [StatField; 10] = [
        StatField::Points,
        StatField::Speed,
        StatField::Racing,
        StatField::Reaction,
        StatField::Experience,
        StatField::Consistency,
        StatField::ErrorRate,
        StatField::StreetAffinity,
        StatField::HighSpeedAffinity,
        StatField::WetAffinity,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StatField::Points => "Points",
            StatField::Speed => "Speed",
            StatField::Racing => "Racing",
            StatField::Reaction => "Reaction",
            StatField::Experience => "Experience",
            StatField::Consistency => "Consistency",
            StatField::ErrorRate => "Error rate",
            StatField::StreetAffinity => "Street",
            StatField::HighSpeedAffinity => "High speed",
            StatField::WetAffinity => "Wet",
        }
    }

    fn read(self, rec: &CompetitorRecord) -> Option<i64> {
        match self {
            StatField::Points => Some(rec.points),
            StatField::Speed => rec.speed,
            StatField::Racing => rec.racing,
            StatField::Reaction => rec.reaction,
            StatField::Experience => rec.experience,
            StatField::Consistency => rec.consistency,
            StatField::ErrorRate => rec.error_rate,
            StatField::StreetAffinity => rec.street_affinity,
            StatField::HighSpeedAffinity => rec.high_speed_affinity,
            StatField::WetAffinity => rec.wet_affinity,
        }
    }
}

/// Named numeric statistics of one competitor at one point in time.
/// Fields the service reported as null are simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatBlock {
    values: BTreeMap<StatField, i64>,
}

impl StatBlock {
    pub fn from_record(rec: &CompetitorRecord) -> Self {
        let values = StatField::ALL
            .iter()
            .filter_map(|f| f.read(rec).map(|v| (*f, v)))
            .collect();
        Self { values }
    }

    pub fn get(&self, field: StatField) -> Option<i64> {
        self.values.get(&field).copied()
    }
}

fn find_block(board: &[CompetitorRecord], focal: &CompetitorId) -> Option<StatBlock> {
    board
        .iter()
        .find(|r| &r.identity() == focal)
        .map(StatBlock::from_record)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPair {
    pub focal: Option<CompetitorId>,
    pub previous: Option<StatBlock>,
    pub current: Option<StatBlock>,
}

impl SnapshotPair {
    /// Track a different competitor. Both snapshots are dropped when the focus changes.
    pub fn focus(&mut self, focal: Option<CompetitorId>) {
        if self.focal != focal {
            *self = SnapshotPair {
                focal,
                ..Default::default()
            };
        }
    }

    pub fn clear(&mut self) {
        self.previous = None;
        self.current = None;
    }

    /// Seed `current` from a board read outside of a run, if nothing is known yet.
    pub fn observe(&mut self, board: &[CompetitorRecord]) {
        if self.current.is_some() {
            return;
        }
        if let Some(focal) = self.focal.as_ref() {
            self.current = find_block(board, focal);
        }
    }

    /// Copy the currently known block into `previous`. Must precede the remote step call.
    /// Returns the block it replaced, for [`SnapshotPair::abort_run`].
    pub fn begin_run(&mut self, focal: &CompetitorId) -> Option<StatBlock> {
        if self.focal.as_ref() != Some(focal) {
            self.focus(Some(focal.clone()));
        }
        std::mem::replace(&mut self.previous, self.current.clone())
    }

    /// Undo `begin_run` after a failed step so the last real delta survives.
    pub fn abort_run(&mut self, previous: Option<StatBlock>) {
        self.previous = previous;
    }

    /// Copy the focal competitor's block from the freshly fetched board into `current`.
    pub fn end_run(&mut self, board: &[CompetitorRecord]) {
        self.current = self.focal.as_ref().and_then(|f| find_block(board, f));
    }

    /// `current - previous`, or `None` when either operand is unknown.
    pub fn delta(&self, field: StatField) -> Option<i64> {
        let now = self.current.as_ref()?.get(field)?;
        let before = self.previous.as_ref()?.get(field)?;
        Some(now - before)
    }

    pub fn deltas(&self) -> Vec<(StatField, Option<i64>)> {
        StatField::ALL.iter().map(|f| (*f, self.delta(*f))).collect()
    }
}
