//! Post-step processing.
//!
//! Turns the raw results of a completed step into the report presentation layers consume:
//! results ordered by finishing position, the focal competitor's row and the stat deltas.

use crate::model::{CompetitorId, Step, StepResult};
use crate::snapshot::{SnapshotPair, StatField};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: Step,
    pub forced: bool,
    pub results: Vec<StepResult>,
    pub focal_result: Option<StepResult>,
    pub deltas: Vec<(StatField, Option<i64>)>,
}

/// Classified rows first by position; position-less rows (practice sessions) keep their
/// service order at the end.
pub(crate) fn order_results(results: &mut [StepResult]) {
    results.sort_by_key(|r| (r.position.is_none(), r.position.unwrap_or(u32::MAX)));
}

pub(crate) fn process_step_completion(
    step: Step,
    forced: bool,
    mut results: Vec<StepResult>,
    focal: Option<&CompetitorId>,
    snapshots: &SnapshotPair,
) -> StepReport {
    order_results(&mut results);
    let focal_result = focal.and_then(|f| {
        results
            .iter()
            .find(|r| &r.competitor.identity() == f)
            .cloned()
    });
    let deltas = if focal.is_some() {
        snapshots.deltas()
    } else {
        Vec::new()
    };
    StepReport {
        step,
        forced,
        results,
        focal_result,
        deltas,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StepKind;

    fn result(surname: &str, number: u32, position: Option<u32>) -> StepResult {
        serde_json::from_value(serde_json::json!({
            "surname": surname,
            "number": number,
            "position": position,
        }))
        .unwrap()
    }

    fn practice() -> Step {
        Step {
            id: 1,
            group_name: "Round 1".into(),
            circuit_name: None,
            circuit_type: None,
            kind: StepKind::Practice,
            date: None,
            simulated: true,
        }
    }

    #[test]
    fn unclassified_rows_sink_to_the_bottom() {
        let mut rows = vec![
            result("C", 3, None),
            result("B", 2, Some(2)),
            result("D", 4, None),
            result("A", 1, Some(1)),
        ];
        order_results(&mut rows);
        let order: Vec<&str> = rows.iter().map(|r| r.competitor.surname.as_str()).collect();
        assert_eq!(order, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn focal_row_is_matched_by_normalized_identity() {
        let rows = vec![result("Pérez", 11, Some(2)), result("Ocon", 31, Some(1))];
        let focal = CompetitorId::new("PEREZ", 11);
        let report =
            process_step_completion(practice(), false, rows, Some(&focal), &SnapshotPair::default());
        assert_eq!(report.focal_result.and_then(|r| r.position), Some(2));
        assert_eq!(report.deltas.len(), StatField::ALL.len());
        assert!(report.deltas.iter().all(|(_, d)| d.is_none()));
    }

    #[test]
    fn no_focal_means_no_deltas() {
        let report = process_step_completion(
            practice(),
            true,
            vec![result("Ocon", 31, Some(1))],
            None,
            &SnapshotPair::default(),
        );
        assert!(report.focal_result.is_none());
        assert!(report.deltas.is_empty());
        assert!(report.forced);
    }
}
