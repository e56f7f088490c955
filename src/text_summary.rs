//! Text summary builders for CLI output.
//!
//! Each builder formats human-readable lines; the CLI routes them to stdout.

use crate::calendar;
use crate::model::{CompetitorId, CompetitorRecord, Step};
use crate::orchestrator::{BatchReport, StepReport};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

fn step_line(step: &Step) -> String {
    let mark = if step.simulated { "x" } else { " " };
    let mut line = format!("  [{mark}] #{:<3} {:<18}", step.id, step.kind.label());
    if let Some(date) = step.date.as_deref() {
        line.push_str(&format!(" {date}"));
    }
    line
}

pub(crate) fn calendar_summary(steps: &[Step]) -> TextSummary {
    let mut lines = Vec::new();
    let progress = calendar::progress(steps);
    lines.push(format!("Progress: {}/{} steps", progress.done, progress.total));
    for group in calendar::groups(steps) {
        let circuit = group
            .steps
            .first()
            .and_then(|s| s.circuit_name.as_deref())
            .map(|c| format!(" @ {c}"))
            .unwrap_or_default();
        lines.push(format!("{}{} ({})", group.name, circuit, group.status.label()));
        lines.extend(group.steps.iter().map(|s| step_line(s)));
    }
    TextSummary { lines }
}

/// Standings rows in ranked order; the focal competitor is marked with `*`.
pub(crate) fn standings_summary(
    standings: &[CompetitorRecord],
    focal: Option<&CompetitorId>,
) -> TextSummary {
    let lines = standings
        .iter()
        .enumerate()
        .map(|(i, rec)| {
            let pos = i + 1;
            let mark = if focal == Some(&rec.identity()) { "*" } else { " " };
            format!(
                "{mark}{pos:>3}. {:<24} #{:<3} {:>5} pts  wins {:<3} podiums {}",
                rec.display_name(),
                rec.number,
                rec.points,
                rec.wins.unwrap_or(0),
                rec.podiums.unwrap_or(0),
            )
        })
        .collect();
    TextSummary { lines }
}

fn signed(delta: Option<i64>) -> String {
    match delta {
        Some(d) => format!("{d:+}"),
        None => "n/a".to_string(),
    }
}

pub(crate) fn step_report_summary(report: &StepReport, top: usize) -> TextSummary {
    let mut lines = Vec::new();
    let step = &report.step;
    let forced = if report.forced { " (forced)" } else { "" };
    lines.push(format!(
        "Step #{} {} - {}{forced}",
        step.id,
        step.kind.label(),
        step.group_name
    ));
    for r in report.results.iter().take(top) {
        let pos = r
            .position
            .map(|p| format!("P{p}"))
            .unwrap_or_else(|| "-".into());
        lines.push(format!(
            "  {pos:>4} {:<24} +{} pts",
            r.competitor.display_name(),
            r.points_gained
        ));
    }

    if let Some(focal) = report.focal_result.as_ref() {
        let pos = focal
            .position
            .map(|p| format!("P{p}"))
            .unwrap_or_else(|| "unclassified".into());
        lines.push(format!(
            "Your driver: {} {pos}, +{} pts",
            focal.competitor.display_name(),
            focal.points_gained
        ));
    }
    if !report.deltas.is_empty() {
        let parts: Vec<String> = report
            .deltas
            .iter()
            .map(|(field, d)| format!("{} {}", field.label(), signed(*d)))
            .collect();
        lines.push(format!("Changes: {}", parts.join(", ")));
    }
    TextSummary { lines }
}

pub(crate) fn batch_summary(report: &BatchReport) -> TextSummary {
    let mut lines = Vec::new();
    let status = if report.cancelled {
        "cancelled"
    } else {
        "finished"
    };
    lines.push(format!(
        "Batch {status}: {}/{} steps",
        report.completed.len(),
        report.total
    ));
    if let Some(last) = report.last.as_ref() {
        lines.extend(step_report_summary(last, 3).lines);
    }
    TextSummary { lines }
}

pub(crate) fn season_complete_summary(champion: Option<&CompetitorRecord>) -> TextSummary {
    let mut lines = vec!["Season complete!".to_string()];
    if let Some(c) = champion {
        lines.push(format!(
            "Champion: {} (#{}) with {} pts",
            c.display_name(),
            c.number,
            c.points
        ));
    }
    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{StepKind, StepResult};
    use crate::snapshot::StatField;

    fn rec(surname: &str, number: u32, points: i64) -> CompetitorRecord {
        serde_json::from_value(serde_json::json!({
            "name": "Test",
            "surname": surname,
            "number": number,
            "points": points,
        }))
        .unwrap()
    }

    fn step(id: u32, group: &str, simulated: bool) -> Step {
        Step {
            id,
            group_name: group.into(),
            circuit_name: Some("Monza".into()),
            circuit_type: None,
            kind: StepKind::Race,
            date: None,
            simulated,
        }
    }

    #[test]
    fn calendar_groups_carry_status() {
        let steps = vec![
            step(1, "Italy", true),
            step(2, "Italy", true),
            step(3, "Spain", true),
            step(4, "Spain", false),
            step(5, "Japan", false),
        ];
        let lines = calendar_summary(&steps).lines;
        assert_eq!(lines[0], "Progress: 3/5 steps");
        assert!(lines.contains(&"Italy @ Monza (done)".to_string()));
        assert!(lines.contains(&"Spain @ Monza (in progress)".to_string()));
        assert!(lines.contains(&"Japan @ Monza (upcoming)".to_string()));
    }

    #[test]
    fn standings_mark_focal() {
        let board = vec![rec("Norris", 4, 30), rec("Leclerc", 16, 20)];
        let focal = CompetitorId::new("leclerc", 16);
        let lines = standings_summary(&board, Some(&focal)).lines;
        assert!(lines[0].starts_with("   1."));
        assert!(lines[1].starts_with("*  2."));
    }

    #[test]
    fn unavailable_deltas_render_as_na() {
        let report = StepReport {
            step: step(2, "Italy", true),
            forced: false,
            results: vec![StepResult {
                competitor: rec("Leclerc", 16, 25),
                points_gained: 25,
                stats_gained: 1,
                position: Some(1),
            }],
            focal_result: None,
            deltas: vec![(StatField::Points, Some(25)), (StatField::WetAffinity, None)],
        };
        let lines = step_report_summary(&report, 5).lines;
        assert_eq!(lines.last().unwrap(), "Changes: Points +25, Wet n/a");
    }

    #[test]
    fn champion_banner() {
        let champ = rec("Leclerc", 16, 58);
        let lines = season_complete_summary(Some(&champ)).lines;
        assert_eq!(lines[1], "Champion: Test Leclerc (#16) with 58 pts");
    }
}
