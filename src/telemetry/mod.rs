//! telemetry — single-consumer event pipeline for optimization runs.
//!
//! Purpose
//! -------
//! Collect iteration and completion events from every optimization task on
//! one dedicated worker thread, append them to a CSV log file (flushed per
//! line), keep the full trajectory in memory and render live progress.
//!
//! Key behaviors
//! -------------
//! - [`TelemetryPipeline::spawn`] creates the log file, writes its header and
//!   starts the worker *before* any task runs, so no event can be produced
//!   without a consumer.
//! - Events travel as one tagged [`TelemetryEvent`] over a
//!   `crossbeam_channel`. The worker loops `Waiting → Iteration → Waiting`,
//!   `Waiting → Completed → Waiting` and stops on `Shutdown`.
//! - An iteration event with a failure payload writes the payload to the log
//!   file, raises the shared [`AbortSignal`] and ends the worker with
//!   [`OptError::TelemetryFailure`].
//! - [`TelemetryPipeline::finish`] sends the single `Shutdown` and joins the
//!   worker, returning the in-memory [`TelemetryLog`].
//!
//! Invariants & assumptions
//! ------------------------
//! - Iteration events of one task arrive in strictly increasing iteration
//!   order; events of different tasks interleave by arrival time only.
//! - The progress bar is hidden for a single task or when progress output is
//!   disabled; per-iteration lines are still printed unless disabled.
//!
//! Conventions
//! -----------
//! - Log file name: `<log_dir>/<label>.<replicate_idx>.<YYYYmmdd_HHMMSS>.log`.
//! - Log header: `[windows_idx,] iteration, block_length, likelihood,
//!   <p>_scaled…, <p>_unscaled…`.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use chrono::{DateTime, Local};
use crossbeam_channel::{Receiver, Sender, unbounded};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use crate::optimization::errors::{OptError, OptResult};

/// Shared flag telling every task to stop at its next likelihood call.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One likelihood evaluation, as written to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    /// Task index when several chains are optimized.
    pub window: Option<usize>,
    pub iteration: u64,
    pub block_length: f64,
    pub likelihood: f64,
    /// Logged parameters in model units.
    pub scaled: Vec<f64>,
    /// Logged parameters in user units.
    pub unscaled: Vec<f64>,
}

impl IterationRecord {
    /// Numeric row as kept in the in-memory log.
    pub fn values(&self) -> Vec<f64> {
        let mut row = Vec::with_capacity(4 + self.scaled.len() + self.unscaled.len());
        if let Some(window) = self.window {
            row.push(window as f64);
        }
        row.push(self.iteration as f64);
        row.push(self.block_length);
        row.push(self.likelihood);
        row.extend_from_slice(&self.scaled);
        row.extend_from_slice(&self.unscaled);
        row
    }

    fn fields(&self) -> Vec<String> {
        let mut row = Vec::with_capacity(4 + self.scaled.len() + self.unscaled.len());
        if let Some(window) = self.window {
            row.push(window.to_string());
        }
        row.push(self.iteration.to_string());
        row.push(self.block_length.to_string());
        row.push(self.likelihood.to_string());
        row.extend(self.scaled.iter().chain(&self.unscaled).map(f64::to_string));
        row
    }
}

/// Summary of one finished optimization task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSummary {
    pub window: usize,
    pub windows_flag: bool,
    pub status: String,
    pub evals: u64,
    pub optimum: f64,
    pub lower_collisions: Vec<String>,
    pub upper_collisions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Iteration { record: IterationRecord, failure: Option<String> },
    Completed(TaskSummary),
    Shutdown,
}

/// Where and how a pipeline reports.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_dir: PathBuf,
    pub label: String,
    pub replicate_idx: usize,
    pub task_count: usize,
    pub windows_flag: bool,
    pub logged_parameters: Vec<String>,
    pub progress: bool,
}

/// Everything the worker saw before it stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryLog {
    pub header: Vec<String>,
    pub iterations: Vec<Vec<f64>>,
    pub completed: usize,
    pub shutdown_received: bool,
    pub log_path: PathBuf,
}

/// Log header for the given layout.
pub fn log_header(windows_flag: bool, logged_parameters: &[String]) -> Vec<String> {
    let mut header = Vec::with_capacity(4 + 2 * logged_parameters.len());
    if windows_flag {
        header.push("windows_idx".to_string());
    }
    header.extend(["iteration", "block_length", "likelihood"].map(String::from));
    header.extend(logged_parameters.iter().map(|p| format!("{p}_scaled")));
    header.extend(logged_parameters.iter().map(|p| format!("{p}_unscaled")));
    header
}

pub fn log_file_name(label: &str, replicate_idx: usize, now: DateTime<Local>) -> String {
    format!("{label}.{replicate_idx}.{}.log", now.format("%Y%m%d_%H%M%S"))
}

/// Progress line for one iteration, showing the unscaled parameters.
pub fn format_iteration(record: &IterationRecord, logged_parameters: &[String]) -> String {
    let params = logged_parameters
        .iter()
        .zip(&record.unscaled)
        .map(|(name, value)| format!("{name}={value:.5e}"))
        .collect::<Vec<_>>()
        .join(" ");
    let window = record.window.map(|w| format!("windows_idx={w} ")).unwrap_or_default();
    format!(
        "[+] {window}i={:<4} -- {{{params}}} -- L={:.5}",
        record.iteration, record.likelihood
    )
}

/// Completion line for one task.
pub fn format_completion(summary: &TaskSummary) -> String {
    let window = if summary.windows_flag {
        format!("windows_idx={} ", summary.window)
    } else {
        String::new()
    };
    let mut line = format!("[+] [COMPLETED] {window}--------- [{}]", summary.status);
    if !summary.lower_collisions.is_empty() || !summary.upper_collisions.is_empty() {
        let mut parts = Vec::new();
        if !summary.lower_collisions.is_empty() {
            parts.push(format!("{} (lower)", summary.lower_collisions.join(", ")));
        }
        if !summary.upper_collisions.is_empty() {
            parts.push(format!("{} (upper)", summary.upper_collisions.join(", ")));
        }
        line.push_str(&format!(" --> [BOUNDARY_COLLISION] : {}", parts.join("; ")));
    }
    line
}

/// Handle on a running telemetry worker.
pub struct TelemetryPipeline {
    sender: Sender<TelemetryEvent>,
    handle: JoinHandle<OptResult<TelemetryLog>>,
    log_path: PathBuf,
}

impl TelemetryPipeline {
    /// Create the log file, write the header and start the worker thread.
    ///
    /// # Errors
    /// - `Io` if the log file cannot be created or written.
    pub fn spawn(config: TelemetryConfig, abort: AbortSignal) -> OptResult<Self> {
        let log_path = config.log_dir.join(log_file_name(
            &config.label,
            config.replicate_idx,
            Local::now(),
        ));
        let writer = csv::Writer::from_path(&log_path)?;
        info!(log_file = %log_path.display(), "optimization trajectories are written to log file");
        Self::start(writer, log_path, config, abort)
    }

    /// Write the header to `writer` and start the worker on it.
    fn start<W: Write + Send + 'static>(
        mut writer: csv::Writer<W>, log_path: PathBuf, config: TelemetryConfig, abort: AbortSignal,
    ) -> OptResult<Self> {
        let header = log_header(config.windows_flag, &config.logged_parameters);
        writer.write_record(&header)?;
        writer.flush()?;

        let bar = progress_bar(config.task_count, config.progress);
        let (sender, receiver) = unbounded();
        let worker = Worker {
            receiver,
            writer,
            bar,
            abort,
            print: config.progress,
            logged_parameters: config.logged_parameters,
            log: TelemetryLog {
                header,
                iterations: Vec::new(),
                completed: 0,
                shutdown_received: false,
                log_path: log_path.clone(),
            },
        };
        let handle = thread::Builder::new()
            .name("telemetry".to_string())
            .spawn(move || worker.run())?;
        Ok(Self { sender, handle, log_path })
    }

    /// New producer handle for a task.
    pub fn sender(&self) -> Sender<TelemetryEvent> {
        self.sender.clone()
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Send the single `Shutdown` and wait for the worker.
    ///
    /// # Errors
    /// - `TelemetryFailure` if an iteration carried a failure payload.
    /// - `Io` if the log file could not be written.
    pub fn finish(self) -> OptResult<TelemetryLog> {
        // The worker may already have stopped on a failure payload.
        let _ = self.sender.send(TelemetryEvent::Shutdown);
        drop(self.sender);
        self.handle.join().map_err(|_| OptError::TelemetryFailure {
            log_file: self.log_path.display().to_string(),
            text: "telemetry worker panicked".to_string(),
        })?
    }
}

fn progress_bar(task_count: usize, progress: bool) -> ProgressBar {
    if !progress || task_count <= 1 {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(task_count as u64);
    if let Ok(style) = ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} tasks")
    {
        bar.set_style(style);
    }
    bar
}

struct Worker<W: Write> {
    receiver: Receiver<TelemetryEvent>,
    writer: csv::Writer<W>,
    bar: ProgressBar,
    abort: AbortSignal,
    print: bool,
    logged_parameters: Vec<String>,
    log: TelemetryLog,
}

impl<W: Write + 'static> Worker<W> {
    /// Consume events until `Shutdown`; any failure raises the abort signal.
    fn run(self) -> OptResult<TelemetryLog> {
        let abort = self.abort.clone();
        let result = self.consume();
        if let Err(err) = &result {
            abort.raise();
            debug!(error = %err, "telemetry pipeline stopped early");
        }
        result
    }

    fn consume(mut self) -> OptResult<TelemetryLog> {
        while let Ok(event) = self.receiver.recv() {
            match event {
                TelemetryEvent::Iteration { record, failure } => {
                    self.log.iterations.push(record.values());
                    self.writer.write_record(record.fields())?;
                    self.writer.flush()?;
                    self.show(format_iteration(&record, &self.logged_parameters));
                    if let Some(text) = failure {
                        return self.fail(text);
                    }
                }
                TelemetryEvent::Completed(summary) => {
                    self.show(format_completion(&summary));
                    self.bar.inc(1);
                    self.log.completed += 1;
                }
                TelemetryEvent::Shutdown => {
                    self.log.shutdown_received = true;
                    break;
                }
            }
        }
        self.bar.finish_and_clear();
        debug!(
            iterations = self.log.iterations.len(),
            completed = self.log.completed,
            "telemetry pipeline terminated"
        );
        Ok(self.log)
    }

    fn show(&self, line: String) {
        if !self.print {
            return;
        }
        if self.bar.is_hidden() {
            println!("{line}");
        } else {
            self.bar.println(line);
        }
    }

    fn fail(self, text: String) -> OptResult<TelemetryLog> {
        self.abort.raise();
        self.bar.abandon();
        let log_file = self.log.log_path.display().to_string();
        let mut file = self.writer.into_inner().map_err(|e| OptError::Io { text: e.to_string() })?;
        writeln!(file, "{text}")?;
        file.flush()?;
        Err(OptError::TelemetryFailure { log_file, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;

    fn record(window: Option<usize>, iteration: u64) -> IterationRecord {
        IterationRecord {
            window,
            iteration,
            block_length: 64.0,
            likelihood: -12.5,
            scaled: vec![1.0, 0.5],
            unscaled: vec![10_000.0, 5_000.0],
        }
    }

    /// Accepts writes until the flag is set, then fails every write.
    struct Breakable(Arc<AtomicBool>);

    impl Write for Breakable {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.0.load(Ordering::SeqCst) {
                Err(std::io::Error::other("no space left on device"))
            } else {
                Ok(buf.len())
            }
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn config(dir: &Path, windows_flag: bool) -> TelemetryConfig {
        TelemetryConfig {
            log_dir: dir.to_path_buf(),
            label: "run".to_string(),
            replicate_idx: 3,
            task_count: 2,
            windows_flag,
            logged_parameters: vec!["Ne_A".to_string(), "Ne_B".to_string()],
            progress: false,
        }
    }

    #[test]
    // Purpose
    // -------
    // Header and file name follow the documented layout.
    //
    // Given
    // -----
    // - Two logged parameters with and without a window column.
    //
    // Expect
    // ------
    // - `windows_idx` leads only in multi-chain mode; scaled before unscaled.
    // - File name `<label>.<idx>.<YYYYmmdd_HHMMSS>.log`.
    fn header_and_file_name_follow_layout() {
        let names = vec!["Ne_A".to_string(), "me".to_string()];

        let single = log_header(false, &names);
        let multi = log_header(true, &names);
        let now = Local.with_ymd_and_hms(2024, 5, 17, 9, 3, 1).unwrap();

        assert_eq!(
            single,
            vec!["iteration", "block_length", "likelihood", "Ne_A_scaled", "me_scaled", "Ne_A_unscaled", "me_unscaled"]
        );
        assert_eq!(multi[0], "windows_idx");
        assert_eq!(multi.len(), single.len() + 1);
        assert_eq!(log_file_name("fit", 0, now), "fit.0.20240517_090301.log");
    }

    #[test]
    // Purpose
    // -------
    // Completion lines name boundary collisions by side.
    //
    // Given
    // -----
    // - One lower and one upper collision in multi-chain mode.
    //
    // Expect
    // ------
    // - `[BOUNDARY_COLLISION] : Ne_A (lower); T (upper)` suffix.
    fn completion_line_lists_collisions() {
        let summary = TaskSummary {
            window: 2,
            windows_flag: true,
            status: "XTOL_REACHED".to_string(),
            evals: 40,
            optimum: -3.0,
            lower_collisions: vec!["Ne_A".to_string()],
            upper_collisions: vec!["T".to_string()],
        };

        let line = format_completion(&summary);

        assert_eq!(
            line,
            "[+] [COMPLETED] windows_idx=2 --------- [XTOL_REACHED] --> [BOUNDARY_COLLISION] : Ne_A (lower); T (upper)"
        );
    }

    #[test]
    // Purpose
    // -------
    // The worker logs every event in order and stops on the sentinel.
    //
    // Given
    // -----
    // - Two iteration events and one completion, then `finish`.
    //
    // Expect
    // ------
    // - In-memory log holds both rows; completion counted once.
    // - The CSV file holds the header plus two lines.
    fn pipeline_records_events_until_shutdown() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let pipeline = TelemetryPipeline::spawn(config(dir.path(), true), AbortSignal::new()).unwrap();
        let tx = pipeline.sender();

        // Act
        tx.send(TelemetryEvent::Iteration { record: record(Some(1), 1), failure: None }).unwrap();
        tx.send(TelemetryEvent::Iteration { record: record(Some(1), 2), failure: None }).unwrap();
        tx.send(TelemetryEvent::Completed(TaskSummary {
            window: 1,
            windows_flag: true,
            status: "FTOL_REACHED".to_string(),
            evals: 2,
            optimum: -12.5,
            lower_collisions: vec![],
            upper_collisions: vec![],
        }))
        .unwrap();
        let path = pipeline.log_path().to_path_buf();
        let log = pipeline.finish().unwrap();

        // Assert
        assert_eq!(log.iterations.len(), 2);
        assert_eq!(log.iterations[1], vec![1.0, 2.0, 64.0, -12.5, 1.0, 0.5, 10_000.0, 5_000.0]);
        assert_eq!(log.completed, 1);
        assert!(log.shutdown_received);
        let text = fs::read_to_string(path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("windows_idx,iteration,block_length,likelihood"));
        assert_eq!(lines[1], "1,1,64,-12.5,1,0.5,10000,5000");
    }

    #[test]
    // Purpose
    // -------
    // A failure payload aborts the run and lands in the log file.
    //
    // Given
    // -----
    // - One iteration event carrying "boom".
    //
    // Expect
    // ------
    // - `finish` returns `TelemetryFailure` with the payload.
    // - The abort signal is raised; the file ends with the payload.
    fn failure_payload_raises_abort() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let abort = AbortSignal::new();
        let pipeline = TelemetryPipeline::spawn(config(dir.path(), false), abort.clone()).unwrap();
        let path = pipeline.log_path().to_path_buf();

        // Act
        pipeline
            .sender()
            .send(TelemetryEvent::Iteration {
                record: record(None, 1),
                failure: Some("boom".to_string()),
            })
            .unwrap();
        let err = pipeline.finish().unwrap_err();

        // Assert
        assert!(matches!(err, OptError::TelemetryFailure { ref text, .. } if text == "boom"));
        assert!(abort.is_raised());
        let text = fs::read_to_string(path).unwrap();
        assert_eq!(text.lines().last(), Some("boom"));
    }

    #[test]
    // Purpose
    // -------
    // A log write failure ends the worker with the I/O error and stops the
    // tasks through the abort signal.
    //
    // Given
    // -----
    // - A pipeline whose writer starts failing after the header.
    // - One iteration event.
    //
    // Expect
    // ------
    // - `finish` returns `Io`; the abort signal is raised.
    fn write_failure_surfaces_as_io_error_and_aborts() {
        // Arrange
        let broken = Arc::new(AtomicBool::new(false));
        let abort = AbortSignal::new();
        let writer = csv::Writer::from_writer(Breakable(Arc::clone(&broken)));
        let pipeline =
            TelemetryPipeline::start(writer, PathBuf::from("run.log"), config(Path::new("."), false), abort.clone())
                .unwrap();

        // Act
        broken.store(true, Ordering::SeqCst);
        pipeline.sender().send(TelemetryEvent::Iteration { record: record(None, 1), failure: None }).unwrap();
        let err = pipeline.finish().unwrap_err();

        // Assert
        assert!(matches!(err, OptError::Io { .. }), "{err}");
        assert!(abort.is_raised());
    }
}
