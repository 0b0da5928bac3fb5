use std::sync::OnceLock;

use regex::Regex;

use crate::error::ParseError;
use crate::models::LoudnessMeasurement;

/// Diagnostic labels emitted by the engine's volume-analysis filter.
/// Matched case-sensitively; anything else on the line is ignored.
pub const MEAN_VOLUME_LABEL: &str = "mean_volume:";
pub const MAX_VOLUME_LABEL: &str = "max_volume:";
pub const NOISE_FLOOR_LABEL: &str = "noise_floor:";

/// Locale-independent decimal: optional sign, digits, optional fraction.
/// The engine spells digital silence as `-inf`.
fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[+-]?(?:\d+(?:\.\d+)?|inf)$").unwrap())
}

/// Parse the analysis pass's diagnostic text into a structured measurement.
///
/// Scans line by line; unrecognized lines are skipped so extra diagnostic
/// noise from newer engine versions does not break parsing. When a label
/// repeats, the last occurrence wins (engines emit running summaries; the
/// final value is authoritative). `mean_volume` must appear at least once;
/// a missing `max_volume` falls back to the integrated loudness, which
/// disables the clipping check downstream rather than inventing a peak.
pub fn parse(diagnostics: &str) -> Result<LoudnessMeasurement, ParseError> {
    let mut mean = None;
    let mut max = None;
    let mut noise = None;

    for line in diagnostics.lines() {
        if let Some(value) = field(line, MEAN_VOLUME_LABEL)? {
            mean = Some(value);
        } else if let Some(value) = field(line, MAX_VOLUME_LABEL)? {
            max = Some(value);
        } else if let Some(value) = field(line, NOISE_FLOOR_LABEL)? {
            noise = Some(value);
        }
    }

    let integrated_db = mean.ok_or(ParseError::MissingField("mean_volume"))?;
    Ok(LoudnessMeasurement {
        integrated_db,
        peak_db: max.unwrap_or(integrated_db),
        noise_floor_db: noise,
    })
}

/// Extract the numeric token following `label` if this line carries it.
/// Returns `Ok(None)` when the label is absent, an error when the label is
/// present but not followed by a valid number.
fn field(line: &str, label: &str) -> Result<Option<f64>, ParseError> {
    let Some(pos) = line.find(label) else {
        return Ok(None);
    };
    let rest = &line[pos + label.len()..];
    let token = rest.split_whitespace().next().unwrap_or("");
    match parse_db_token(token) {
        Some(value) => Ok(Some(value)),
        None => Err(ParseError::MalformedNumber {
            label: label.trim_end_matches(':').to_string(),
            token: token.to_string(),
        }),
    }
}

fn parse_db_token(token: &str) -> Option<f64> {
    if !number_re().is_match(token) {
        return None;
    }
    if token.ends_with("inf") {
        return Some(if token.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        });
    }
    token.parse::<f64>().ok()
}
