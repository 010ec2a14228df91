//! Per-line debug tracing for script execution.

use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use vext_core::current_unix_timestamp_parts;

/// File name of the trace log written inside the configured trace directory.
pub const DEBUG_TRACE_FILE_NAME: &str = ".p4-debug-tracing.txt";
const INTERNAL_CHUNK_PREFIX: &str = "Internal/";
const DEPTH_MARKER: &str = ">>> ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Debug instrumentation level requested for an execution context.
pub enum DebugLevel {
    None,
    Tracing,
    CrystalBall,
}

impl DebugLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Tracing => "tracing",
            Self::CrystalBall => "crystal_ball",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "none" => Some(Self::None),
            "tracing" => Some(Self::Tracing),
            "crystal_ball" => Some(Self::CrystalBall),
            _ => None,
        }
    }
}

/// Line-trace writer for one execution context.
pub struct TraceLog {
    path: PathBuf,
    writer: BufWriter<File>,
    context_id: String,
    pid: u32,
    depth: usize,
    current_source: Option<String>,
    sources: HashMap<String, Option<Vec<String>>>,
    write_failed: bool,
}

impl TraceLog {
    pub fn open(dir: &Path, context_id: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(DEBUG_TRACE_FILE_NAME);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            context_id: context_id.to_string(),
            pid: std::process::id(),
            depth: 0,
            current_source: None,
            sources: HashMap::new(),
            write_failed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn start_script(&mut self) {
        self.depth = 0;
        self.current_source = None;
        self.write_record("Start of script");
    }

    pub fn end_script(&mut self) {
        self.write_record("End of script");
        if let Err(error) = self.writer.flush() {
            self.report_failure(&error);
        }
    }

    pub fn enter_function(&mut self) {
        self.depth = self.depth.saturating_add(1);
    }

    pub fn leave_function(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Records one executed line. `chunk_name` is the interpreter's chunk name.
    pub fn record_line(&mut self, chunk_name: &str, line: i64) {
        let source = chunk_name.strip_prefix('@').unwrap_or(chunk_name);
        if source.starts_with(INTERNAL_CHUNK_PREFIX) {
            return;
        }
        if self.current_source.as_deref() != Some(source) {
            self.current_source = Some(source.to_string());
            self.write_record(source);
        }
        let text = self
            .source_line(chunk_name, line)
            .unwrap_or_else(|| "unknown".to_string());
        let record = format!(
            "{line:5} {}{text}",
            DEPTH_MARKER.repeat(self.depth)
        );
        self.write_record(&record);
    }

    fn source_line(&mut self, chunk_name: &str, line: i64) -> Option<String> {
        let index = usize::try_from(line).ok()?.checked_sub(1)?;
        let lines = self
            .sources
            .entry(chunk_name.to_string())
            .or_insert_with(|| read_source_lines(chunk_name));
        lines.as_ref()?.get(index).cloned()
    }

    fn write_record(&mut self, text: &str) {
        if self.write_failed {
            return;
        }
        let (secs, nanos) = current_unix_timestamp_parts();
        let written = writeln!(
            self.writer,
            "{secs}.{nanos:09} {} {} {text}",
            self.pid, self.context_id
        );
        if let Err(error) = written {
            self.report_failure(&error);
        }
    }

    fn report_failure(&mut self, error: &std::io::Error) {
        if !self.write_failed {
            tracing::warn!(
                path = %self.path.display(),
                error = %error,
                "debug trace log write failed; tracing disabled for this context"
            );
        }
        self.write_failed = true;
    }
}

fn read_source_lines(chunk_name: &str) -> Option<Vec<String>> {
    let path = chunk_name.strip_prefix('@')?;
    let raw = std::fs::read_to_string(path).ok()?;
    Some(raw.lines().map(str::to_string).collect())
}
