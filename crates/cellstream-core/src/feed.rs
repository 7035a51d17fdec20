//! Raw reading sources.
//!
//! A feed is a restartable sequence of `x,y,z` records. Each call to
//! [`FeedSource::open`] starts a fresh pass and yields a lazy stream whose
//! items fail individually: one malformed line never ends the pass. How
//! many passes to run is decided by a [`CyclePolicy`], outside the source.

use std::future::Future;
use std::path::{Path, PathBuf};

use cellstream_types::PointReading;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Errors produced while reading a feed.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The feed could not be opened for a new pass.
    #[error("failed to open feed {path}: {source}")]
    Open {
        /// Path or description of the feed.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Reading a line failed mid-pass.
    #[error("failed to read feed at line {line}: {source}")]
    Read {
        /// 1-based line number.
        line: u64,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A line is not a three-field numeric record.
    #[error("malformed record at line {line}: {reason}")]
    Malformed {
        /// 1-based line number.
        line: u64,
        /// What was wrong with it.
        reason: String,
    },
}

/// One pass over a feed.
pub type ReadingStream = BoxStream<'static, Result<PointReading, FeedError>>;

/// A feed that can be read from the start any number of times.
pub trait FeedSource: Send + Sync {
    /// Short description for log lines.
    fn describe(&self) -> String;

    /// Start a new pass.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Open`] if the pass cannot be started.
    fn open(&self) -> impl Future<Output = Result<ReadingStream, FeedError>> + Send;
}

/// How many passes the producer makes over its feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePolicy {
    /// Restart after every pass until stopped.
    Endless,
    /// Stop after this many passes.
    Passes(u32),
}

impl CyclePolicy {
    /// Policy for a configured pass count, where `0` means endless.
    pub const fn from_passes(passes: u32) -> Self {
        if passes == 0 {
            Self::Endless
        } else {
            Self::Passes(passes)
        }
    }

    /// Whether another pass may start after `completed` passes.
    pub const fn allows(self, completed: u32) -> bool {
        match self {
            Self::Endless => true,
            Self::Passes(n) => completed < n,
        }
    }
}

/// Parse one `x,y,z` line.
///
/// # Errors
///
/// Returns [`FeedError::Malformed`] for a wrong field count, a field that
/// is not a number, or a non-finite value.
pub fn parse_record(text: &str, line: u64) -> Result<PointReading, FeedError> {
    let malformed = |reason: String| FeedError::Malformed { line, reason };

    let fields: Vec<&str> = text.split(',').map(str::trim).collect();
    let [x, y, z] = fields.as_slice() else {
        return Err(malformed(format!("expected 3 fields, found {}", fields.len())));
    };

    let parse = |name: &str, raw: &str| -> Result<f64, FeedError> {
        let value: f64 = raw
            .parse()
            .map_err(|e| malformed(format!("{name} {raw:?}: {e}")))?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(malformed(format!("{name} is not finite")))
        }
    };

    Ok(PointReading::new(parse("x", *x)?, parse("y", *y)?, parse("z", *z)?))
}

/// Decode one raw line, dropping a trailing `\r`.
fn decode_line(raw: &[u8], line: u64) -> Result<&str, FeedError> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    std::str::from_utf8(raw).map_err(|e| FeedError::Malformed {
        line,
        reason: format!("not valid UTF-8: {e}"),
    })
}

/// CSV file of `x,y,z` lines. Blank lines are ignored.
///
/// A line that cannot be decoded or parsed fails on its own; only an I/O
/// error ends the pass.
#[derive(Debug, Clone)]
pub struct CsvFileFeed {
    path: PathBuf,
}

impl CsvFileFeed {
    /// Feed reading the file at `path` on every pass.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file this feed reads.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FeedSource for CsvFileFeed {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn open(&self) -> Result<ReadingStream, FeedError> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|source| FeedError::Open {
                path: self.describe(),
                source,
            })?;

        // `None` once the file is exhausted or a read has failed.
        let state = Some((BufReader::new(file).split(b'\n'), 0u64));
        let readings = stream::unfold(state, |state| async move {
            let (mut segments, mut line) = state?;
            loop {
                line = line.saturating_add(1);
                let raw = match segments.next_segment().await {
                    Ok(Some(raw)) => raw,
                    Ok(None) => return None,
                    Err(source) => return Some((Err(FeedError::Read { line, source }), None)),
                };
                let item = match decode_line(&raw, line) {
                    Ok(text) if text.trim().is_empty() => continue,
                    Ok(text) => parse_record(text, line),
                    Err(e) => Err(e),
                };
                return Some((item, Some((segments, line))));
            }
        });
        Ok(readings.boxed())
    }
}

/// Fixed in-memory lines, replayed on every pass.
#[derive(Debug, Clone, Default)]
pub struct MemoryFeed {
    lines: Vec<String>,
}

impl MemoryFeed {
    /// Feed over the given raw lines.
    pub fn new<I, L>(lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

impl FeedSource for MemoryFeed {
    fn describe(&self) -> String {
        format!("memory feed ({} lines)", self.lines.len())
    }

    async fn open(&self) -> Result<ReadingStream, FeedError> {
        let parsed: Vec<Result<PointReading, FeedError>> = (1u64..)
            .zip(&self.lines)
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(line, text)| parse_record(text, line))
            .collect();
        Ok(stream::iter(parsed).boxed())
    }
}
