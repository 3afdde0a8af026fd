//! Presentation of scenario reports.

use std::fmt::Write;

use crate::scenario::{ScenarioReport, StepRecord};
use crate::Result;

pub fn render_text(report: &ScenarioReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} (stream/{}, length={})",
        report.scenario, report.stream_id, report.length
    );
    for step in &report.steps {
        let _ = writeln!(out, "  {}", render_step(step));
    }
    out
}

pub fn render_step(step: &StepRecord) -> String {
    let mut line = step.operation.to_string();
    if let Some(tag) = step.tag {
        let _ = write!(line, "#{tag}");
    }
    if let Some(requested) = step.requested {
        let _ = write!(line, " requested={requested}");
    }
    let _ = write!(line, " status={}", step.status);
    if let Some(bytes) = step.bytes_transferred {
        let _ = write!(line, " bytes={bytes}");
    }
    if let Some(value) = step.value {
        let _ = write!(line, " value={value:#x}");
    }
    let _ = write!(
        line,
        " pos={}->{} eof={}",
        step.position_before, step.position_after, step.is_eof
    );
    line
}

pub fn render_json(reports: &[ScenarioReport]) -> Result<String> {
    Ok(serde_json::to_string_pretty(reports)?)
}
