use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::engine::{CancelToken, Engine, EngineOutput};
use crate::error::JobError;
use crate::gain;
use crate::models::{GainPlan, JobState, LoudnessMeasurement};
use crate::parser;
use crate::presets::FormatConfig;

/// Loudness parameters shared by every job in a batch.
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub target_db: f64,
    pub ceiling_db: f64,
    pub format: FormatConfig,
}

/// One file's trip through the pipeline:
/// `Pending -> Analyzing -> Computing -> Applying -> Done`, with `Failed`
/// reachable from any non-terminal state. Owned by exactly one worker.
#[derive(Debug)]
pub struct NormalizationJob {
    input_path: PathBuf,
    output_path: PathBuf,
    state: JobState,
    measurement: Option<LoudnessMeasurement>,
    plan: Option<GainPlan>,
    error: Option<JobError>,
}

impl NormalizationJob {
    pub fn new(input_path: PathBuf, output_path: PathBuf) -> Self {
        NormalizationJob {
            input_path,
            output_path,
            state: JobState::Pending,
            measurement: None,
            plan: None,
            error: None,
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn measurement(&self) -> Option<&LoudnessMeasurement> {
        self.measurement.as_ref()
    }

    pub fn plan(&self) -> Option<&GainPlan> {
        self.plan.as_ref()
    }

    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    /// Drive the job to a terminal state. Never panics and never touches
    /// the input file; failures land in `error` with `state == Failed`.
    pub fn run(&mut self, engine: &Engine, opts: &JobOptions, cancel: &CancelToken) {
        match self.advance(engine, opts, cancel) {
            Ok(()) => self.state = JobState::Done,
            Err(err) => {
                self.error = Some(err);
                self.state = JobState::Failed;
            }
        }
    }

    fn advance(
        &mut self,
        engine: &Engine,
        opts: &JobOptions,
        cancel: &CancelToken,
    ) -> Result<(), JobError> {
        self.state = JobState::Analyzing;
        let analysis = invoke_with_retry(engine, &analysis_args(&self.input_path), cancel)?;

        // The analysis filter writes its report to stderr and some engine
        // builds exit non-zero while doing so; the parser's verdict on the
        // captured text is what decides this transition.
        self.state = JobState::Computing;
        let measurement = parser::parse(&analysis.stderr)?;
        let plan = gain::compute(&measurement, opts.target_db, opts.ceiling_db);
        self.measurement = Some(measurement);
        self.plan = Some(plan);

        self.state = JobState::Applying;
        let args = apply_args(&self.input_path, &self.output_path, &plan, &opts.format);
        let applied = invoke_with_retry(engine, &args, cancel)?;
        if !applied.success() {
            return Err(JobError::EncodeFailed {
                code: applied.exit_code,
                detail: last_diagnostic_line(&applied.stderr),
            });
        }

        let produced = std::fs::metadata(&self.output_path)
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if !produced {
            return Err(JobError::OutputMissing(self.output_path.clone()));
        }
        Ok(())
    }

    pub fn into_record(self) -> crate::models::FileRecord {
        crate::models::FileRecord {
            input: self.input_path,
            output: self.output_path,
            state: self.state,
            measurement: self.measurement,
            plan: self.plan,
            error: self.error.map(|e| e.to_string()),
        }
    }
}

/// Transient process failures (timeout, spawn resource exhaustion) get one
/// retry with identical arguments. Anything else propagates immediately;
/// retrying a parse or logic failure cannot change the outcome.
fn invoke_with_retry(
    engine: &Engine,
    args: &[OsString],
    cancel: &CancelToken,
) -> Result<EngineOutput, JobError> {
    match engine.run(args, cancel) {
        Err(err) if err.is_transient() => engine.run(args, cancel).map_err(JobError::from),
        other => other.map_err(JobError::from),
    }
}

/// Analysis pass: run the volume-statistics filter over the first audio
/// stream, discarding the decoded output.
fn analysis_args(input: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-nostdin".into(), "-i".into()];
    args.push(input.as_os_str().to_os_string());
    args.extend(["-map", "0:a:0", "-af", "volumedetect", "-f", "null", "-"].map(OsString::from));
    args
}

/// Apply pass: gain (and limiter) filter over the first audio stream,
/// re-encoded to the output path. `-y` overwrites without prompting.
fn apply_args(
    input: &Path,
    output: &Path,
    plan: &GainPlan,
    format: &FormatConfig,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-y".into(),
        "-hide_banner".into(),
        "-nostdin".into(),
        "-i".into(),
    ];
    args.push(input.as_os_str().to_os_string());
    args.extend(["-map", "0:a:0", "-af"].map(OsString::from));
    args.push(filter_graph(plan).into());
    args.push("-c:a".into());
    args.push(format.encoder.into());
    if let Some(bitrate) = &format.bitrate {
        args.push("-b:a".into());
        args.push(bitrate.into());
    }
    args.push(output.as_os_str().to_os_string());
    args
}

/// Audio filter graph realizing a gain plan. The limiter ceiling is linear.
fn filter_graph(plan: &GainPlan) -> String {
    if plan.is_passthrough() {
        return "anull".to_string();
    }
    let mut graph = format!("volume={:.1}dB", plan.gain_db);
    if plan.limiter_needed {
        let limit = 10f64.powf(plan.effective_ceiling / 20.0).min(1.0);
        graph.push_str(&format!(",alimiter=limit={limit:.6}"));
    }
    graph
}

/// ffmpeg-style tools put the reason for failure on the last stderr line.
fn last_diagnostic_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no diagnostic output")
        .trim()
        .to_string()
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;

    fn stub_engine(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-engine");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn opts() -> JobOptions {
        JobOptions {
            target_db: -14.0,
            ceiling_db: 0.0,
            format: FormatConfig::wav(),
        }
    }

    /// Stub behaving like the real engine: diagnostics on the analysis
    /// pass (last argument `-`), output file on the apply pass.
    const WELL_BEHAVED: &str = r#"
for last in "$@"; do :; done
if [ "$last" = "-" ]; then
  echo "[Parsed_volumedetect_0 @ 0x1] mean_volume: -20.0 dB" 1>&2
  echo "[Parsed_volumedetect_0 @ 0x1] max_volume: -3.0 dB" 1>&2
else
  printf 'normalized' > "$last"
fi
"#;

    #[test]
    fn test_job_runs_to_done() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(
            stub_engine(dir.path(), WELL_BEHAVED),
            Duration::from_secs(10),
        );
        let input = dir.path().join("song.flac");
        std::fs::write(&input, b"fake audio").unwrap();
        let output = dir.path().join("song.wav");

        let mut job = NormalizationJob::new(input, output.clone());
        assert_eq!(job.state(), JobState::Pending);
        job.run(&engine, &opts(), &CancelToken::new());

        assert_eq!(job.state(), JobState::Done);
        assert!(job.error().is_none());
        let m = job.measurement().unwrap();
        assert_eq!(m.integrated_db, -20.0);
        assert_eq!(m.peak_db, -3.0);
        // +6 dB wanted, capped to +3 by the 0 dBFS ceiling.
        let plan = job.plan().unwrap();
        assert_eq!(plan.gain_db, 3.0);
        assert!(plan.limiter_needed);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "normalized");
    }

    #[test]
    fn test_analysis_nonzero_exit_is_tolerated_when_diagnostics_present() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"
for last in "$@"; do :; done
if [ "$last" = "-" ]; then
  echo "mean_volume: -18.0 dB" 1>&2
  echo "max_volume: -6.0 dB" 1>&2
  exit 1
else
  printf 'normalized' > "$last"
fi
"#;
        let engine = Engine::new(stub_engine(dir.path(), body), Duration::from_secs(10));
        let input = dir.path().join("song.flac");
        std::fs::write(&input, b"fake audio").unwrap();

        let mut job = NormalizationJob::new(input, dir.path().join("song.wav"));
        job.run(&engine, &opts(), &CancelToken::new());
        assert_eq!(job.state(), JobState::Done);
    }

    #[test]
    fn test_unparseable_diagnostics_fail_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let body = format!(
            r#"
echo run >> "{}"
echo "nothing useful here" 1>&2
"#,
            log.display()
        );
        let engine = Engine::new(stub_engine(dir.path(), &body), Duration::from_secs(10));
        let input = dir.path().join("song.flac");
        std::fs::write(&input, b"fake audio").unwrap();

        let mut job = NormalizationJob::new(input, dir.path().join("song.wav"));
        job.run(&engine, &opts(), &CancelToken::new());

        assert_eq!(job.state(), JobState::Failed);
        assert!(matches!(job.error(), Some(JobError::UnrecognizedOutput(_))));
        let calls = std::fs::read_to_string(&log).unwrap();
        assert_eq!(calls.lines().count(), 1, "parse failures must not retry");
    }

    #[test]
    fn test_timeout_is_retried_once_then_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("first-call");
        let log = dir.path().join("calls.log");
        let body = format!(
            r#"
echo run >> "{log}"
if [ ! -f "{marker}" ]; then
  : > "{marker}"
  sleep 2
  exit 1
fi
for last in "$@"; do :; done
if [ "$last" = "-" ]; then
  echo "mean_volume: -20.0 dB" 1>&2
  echo "max_volume: -3.0 dB" 1>&2
else
  printf 'normalized' > "$last"
fi
"#,
            log = log.display(),
            marker = marker.display()
        );
        let engine = Engine::new(stub_engine(dir.path(), &body), Duration::from_millis(400));
        let input = dir.path().join("song.flac");
        std::fs::write(&input, b"fake audio").unwrap();

        let mut job = NormalizationJob::new(input, dir.path().join("song.wav"));
        job.run(&engine, &opts(), &CancelToken::new());

        assert_eq!(job.state(), JobState::Done);
        // First analysis call timed out, second succeeded, then one apply call.
        let calls = std::fs::read_to_string(&log).unwrap();
        assert_eq!(calls.lines().count(), 3);
    }

    #[test]
    fn test_encode_failure_reports_last_stderr_line() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"
for last in "$@"; do :; done
if [ "$last" = "-" ]; then
  echo "mean_volume: -20.0 dB" 1>&2
else
  echo "Error while decoding stream" 1>&2
  echo "Conversion failed!" 1>&2
  exit 1
fi
"#;
        let engine = Engine::new(stub_engine(dir.path(), body), Duration::from_secs(10));
        let input = dir.path().join("song.flac");
        std::fs::write(&input, b"fake audio").unwrap();

        let mut job = NormalizationJob::new(input, dir.path().join("song.wav"));
        job.run(&engine, &opts(), &CancelToken::new());

        assert_eq!(job.state(), JobState::Failed);
        match job.error() {
            Some(JobError::EncodeFailed { code, detail }) => {
                assert_eq!(*code, Some(1));
                assert_eq!(detail, "Conversion failed!");
            }
            other => panic!("expected EncodeFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let body = r#"
for last in "$@"; do :; done
if [ "$last" = "-" ]; then
  echo "mean_volume: -20.0 dB" 1>&2
fi
exit 0
"#;
        let engine = Engine::new(stub_engine(dir.path(), body), Duration::from_secs(10));
        let input = dir.path().join("song.flac");
        std::fs::write(&input, b"fake audio").unwrap();

        let mut job = NormalizationJob::new(input, dir.path().join("song.wav"));
        job.run(&engine, &opts(), &CancelToken::new());

        assert_eq!(job.state(), JobState::Failed);
        assert!(matches!(job.error(), Some(JobError::OutputMissing(_))));
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(
            stub_engine(dir.path(), WELL_BEHAVED),
            Duration::from_secs(10),
        );
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut job = NormalizationJob::new(
            dir.path().join("song.flac"),
            dir.path().join("song.wav"),
        );
        job.run(&engine, &opts(), &cancel);
        assert_eq!(job.state(), JobState::Failed);
        assert!(matches!(job.error(), Some(JobError::Cancelled)));
    }

    #[test]
    fn test_input_is_never_mutated() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(
            stub_engine(dir.path(), WELL_BEHAVED),
            Duration::from_secs(10),
        );
        let input = dir.path().join("song.flac");
        std::fs::write(&input, b"fake audio").unwrap();

        let mut job = NormalizationJob::new(input.clone(), dir.path().join("song.wav"));
        job.run(&engine, &opts(), &CancelToken::new());

        assert_eq!(job.state(), JobState::Done);
        assert_eq!(std::fs::read(&input).unwrap(), b"fake audio");
    }

    #[test]
    fn test_filter_graph_shapes() {
        let plain = GainPlan {
            gain_db: 6.0,
            limiter_needed: false,
            effective_ceiling: 0.0,
        };
        assert_eq!(filter_graph(&plain), "volume=6.0dB");

        let limited = GainPlan {
            gain_db: 3.0,
            limiter_needed: true,
            effective_ceiling: 0.0,
        };
        assert_eq!(filter_graph(&limited), "volume=3.0dB,alimiter=limit=1.000000");

        let headroom = GainPlan {
            gain_db: 2.0,
            limiter_needed: true,
            effective_ceiling: -1.0,
        };
        assert!(filter_graph(&headroom).contains("alimiter=limit=0.891"));

        let passthrough = GainPlan {
            gain_db: 0.0,
            limiter_needed: false,
            effective_ceiling: 0.0,
        };
        assert_eq!(filter_graph(&passthrough), "anull");
    }

    #[test]
    fn test_analysis_args_shape() {
        let args = analysis_args(Path::new("in.flac"));
        let strings: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            strings,
            [
                "-hide_banner",
                "-nostdin",
                "-i",
                "in.flac",
                "-map",
                "0:a:0",
                "-af",
                "volumedetect",
                "-f",
                "null",
                "-"
            ]
        );
    }

    #[test]
    fn test_apply_args_include_bitrate_when_set() {
        let format = FormatConfig {
            encoder: "libmp3lame",
            extension: "mp3".to_string(),
            bitrate: Some("192K".to_string()),
        };
        let plan = GainPlan {
            gain_db: 4.0,
            limiter_needed: false,
            effective_ceiling: 0.0,
        };
        let args = apply_args(Path::new("in.flac"), Path::new("out.mp3"), &plan, &format);
        let strings: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(strings.starts_with(&["-y".into(), "-hide_banner".into(), "-nostdin".into()]));
        assert!(strings.contains(&"volume=4.0dB".to_string()));
        assert!(strings.contains(&"libmp3lame".to_string()));
        assert!(strings.contains(&"-b:a".to_string()));
        assert!(strings.contains(&"192K".to_string()));
        assert_eq!(strings.last().unwrap(), "out.mp3");
    }
}
