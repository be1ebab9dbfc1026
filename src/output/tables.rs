use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color as TableColor, ContentArrangement, Table};
use std::time::Duration;

use crate::providers::buildkite::Job;

/// Table and cell creation helpers
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Jobs longer than a minute are shown to the second, shorter ones to 10ms.
pub fn round_job_duration(duration: Duration) -> Duration {
    let millis = duration.as_millis();
    let rounded = if duration > Duration::from_secs(60) {
        (millis + 500) / 1000 * 1000
    } else {
        (millis + 5) / 10 * 10
    };
    Duration::from_millis(u64::try_from(rounded).unwrap_or(u64::MAX))
}

pub fn job_duration_cell(job: &Job) -> Cell {
    let text = job.duration().map_or_else(
        || "-".to_string(),
        |d| humantime::format_duration(round_job_duration(d)).to_string(),
    );
    if job.failed() {
        Cell::new(text).fg(TableColor::Red)
    } else {
        Cell::new(text)
    }
}
