use crate::models::{BatchResult, FileRecord};

fn file_label(record: &FileRecord) -> String {
    let input = record
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| record.input.display().to_string());
    match &record.error {
        Some(error) => format!("{input} ({error})"),
        None => {
            let output = record
                .output
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| record.output.display().to_string());
            format!("{input} -> {output}")
        }
    }
}

/// Format a batch result as a fixed-column table.
pub fn format_table(result: &BatchResult) -> String {
    let separator = "\u{2500}".repeat(58);
    let mut output = String::new();

    output.push_str(&format!(
        "{:<9} {:>9} {:>10} {:>10}  {}\n",
        "Status", "Gain", "Mean", "Peak", "File"
    ));
    output.push_str(&separator);
    output.push('\n');

    for record in &result.records {
        let gain = record
            .plan
            .map(|p| format!("{:+.1} dB", p.gain_db))
            .unwrap_or_else(|| "-".to_string());
        let mean = record
            .measurement
            .map(|m| format!("{:.2} dB", m.integrated_db))
            .unwrap_or_else(|| "-".to_string());
        let peak = record
            .measurement
            .map(|m| format!("{:.2} dB", m.peak_db))
            .unwrap_or_else(|| "-".to_string());

        output.push_str(&format!(
            "{:<9} {:>9} {:>10} {:>10}  {}\n",
            record.state.to_string(),
            gain,
            mean,
            peak,
            file_label(record),
        ));
    }

    output.push_str(&separator);
    output.push('\n');
    output.push_str(&format!(
        "Normalized: {} of {}",
        result.succeeded,
        result.records.len(),
    ));

    output
}

/// Format a batch result as pretty-printed JSON.
pub fn format_json(result: &BatchResult) -> String {
    serde_json::to_string_pretty(result).unwrap_or_else(|_| "{}".to_string())
}

/// One-line batch summary for stderr.
pub fn format_summary(result: &BatchResult) -> String {
    format!(
        "Done: {} normalized, {} failed (out of {} total)",
        result.succeeded,
        result.failed,
        result.records.len(),
    )
}
