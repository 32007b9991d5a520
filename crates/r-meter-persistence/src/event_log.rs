//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Durable JSON-lines reading store."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use r_meter_common::config::RegistrationPolicy;
use r_meter_common::model::CounterId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::index::ReadingIndex;
use crate::metrics::PersistenceMetrics;
use crate::sink::{ReadingSink, StoredReading};
use crate::{PersistenceError, Result};

/// Format version written in the header line.
pub const LOG_VERSION: u16 = 1;

/// First line of every log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventLogHeader {
    version: u16,
    created_at: DateTime<Utc>,
}

/// Mutation recorded in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StoreEvent {
    /// Explicit registration of a counter.
    Registered {
        /// Registered counter.
        counter_id: CounterId,
    },
    /// One accepted reading.
    Reading(StoredReading),
    /// A counter and its history were removed.
    Deleted {
        /// Removed counter.
        counter_id: CounterId,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogEntry {
    sequence: u64,
    recorded_at: DateTime<Utc>,
    event: StoreEvent,
}

/// Byte sink behind the log. A failed append is cut back to the last complete line.
trait LogFile: Write + Send {
    fn truncate_to(&mut self, len: u64) -> std::io::Result<()>;
}

impl LogFile for File {
    fn truncate_to(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }
}

struct EventLogWriter<F = File> {
    file: F,
    committed_len: u64,
    next_sequence: u64,
}

impl EventLogWriter<File> {
    fn open(path: &Path, last_sequence: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        let mut writer = Self::new(file, len, last_sequence);
        if len == 0 {
            let header = EventLogHeader {
                version: LOG_VERSION,
                created_at: Utc::now(),
            };
            writer.write_line(serde_json::to_string(&header)?)?;
        }
        Ok(writer)
    }
}

impl<F: LogFile> EventLogWriter<F> {
    fn new(file: F, committed_len: u64, last_sequence: u64) -> Self {
        Self {
            file,
            committed_len,
            next_sequence: last_sequence,
        }
    }

    /// Write one full line or nothing at all.
    fn write_line(&mut self, mut line: String) -> Result<usize> {
        line.push('\n');
        let written = self
            .file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.flush());
        if let Err(err) = written {
            if let Err(rollback) = self.file.truncate_to(self.committed_len) {
                warn!(error = %rollback, "could not discard partial event log line");
            }
            return Err(err.into());
        }
        self.committed_len += line.len() as u64;
        Ok(line.len())
    }

    /// Append one event and return the bytes written. The sequence only advances
    /// once the line is on disk.
    fn append(&mut self, event: StoreEvent) -> Result<usize> {
        let entry = LogEntry {
            sequence: self.next_sequence + 1,
            recorded_at: Utc::now(),
            event,
        };
        let bytes = self.write_line(serde_json::to_string(&entry)?)?;
        self.next_sequence = entry.sequence;
        Ok(bytes)
    }
}

/// Replay the log in order, invoking `handler` for each event. Returns the last
/// sequence number seen.
pub fn replay<F>(path: &Path, mut handler: F) -> Result<u64>
where
    F: FnMut(StoreEvent) -> Result<()>,
{
    let reader = BufReader::new(File::open(path)?);
    let mut last_sequence = 0u64;
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if number == 0 || line.trim().is_empty() {
            continue;
        }
        let entry: LogEntry = serde_json::from_str(&line).map_err(|source| {
            PersistenceError::Corrupt {
                line: number + 1,
                source,
            }
        })?;
        last_sequence = entry.sequence;
        handler(entry.event)?;
    }
    Ok(last_sequence)
}

fn apply_event(index: &mut ReadingIndex, event: StoreEvent) {
    match event {
        StoreEvent::Registered { counter_id } => {
            if !index.contains(counter_id) {
                let _ = index.register(counter_id);
            }
        }
        StoreEvent::Reading(reading) => index.apply(reading),
        StoreEvent::Deleted { counter_id } => {
            index.remove(counter_id);
        }
    }
}

struct Inner {
    index: ReadingIndex,
    writer: EventLogWriter,
}

/// Store whose every mutation is appended to a JSON-lines file before it becomes
/// visible. Opening an existing file replays it to rebuild the index.
pub struct EventLogStore {
    path: PathBuf,
    inner: Arc<Mutex<Inner>>,
    metrics: Option<PersistenceMetrics>,
}
impl EventLogStore {
    /// Open or create the log at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        policy: RegistrationPolicy,
        metrics: Option<PersistenceMetrics>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut index = ReadingIndex::new(policy);
        let mut last_sequence = 0;
        if path.exists() && fs::metadata(&path)?.len() > 0 {
            let started = Instant::now();
            last_sequence = replay(&path, |event| {
                apply_event(&mut index, event);
                Ok(())
            })?;
            let elapsed = started.elapsed();
            if let Some(metrics) = &metrics {
                metrics.observe_replay_duration(elapsed.as_secs_f64());
            }
            info!(
                path = %path.display(),
                events = last_sequence,
                readings = index.reading_count(),
                elapsed_ms = elapsed.as_millis() as u64,
                "event log replayed"
            );
        }
        let writer = EventLogWriter::open(&path, last_sequence)?;
        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(Inner { index, writer })),
            metrics,
        })
    }

    /// Location of the log on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total readings currently indexed.
    pub fn len(&self) -> usize {
        self.inner.lock().index.reading_count()
    }

    /// True when no reading is indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run a mutation on the blocking pool; file writes never stall a runtime worker.
    async fn mutate<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Inner) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&mut inner.lock())).await?
    }

    fn record_bytes(&self, bytes: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.record_event_bytes(bytes);
        }
    }
}

impl std::fmt::Debug for EventLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLogStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ReadingSink for EventLogStore {
    fn name(&self) -> &'static str {
        "event-log"
    }

    async fn insert(
        &self,
        counter_id: CounterId,
        amps: f64,
        energy_kw: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let reading = StoredReading {
            counter_id,
            amps,
            energy_kw,
            timestamp,
        };
        let bytes = self
            .mutate(move |inner| {
                inner.index.check(&reading)?;
                let bytes = inner.writer.append(StoreEvent::Reading(reading))?;
                inner.index.apply(reading);
                Ok(bytes)
            })
            .await?;
        self.record_bytes(bytes);
        Ok(())
    }

    async fn query_latest(&self, counter_id: CounterId) -> Result<Option<StoredReading>> {
        Ok(self.inner.lock().index.latest(counter_id))
    }

    async fn query_range(
        &self,
        counter_id: CounterId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredReading>> {
        Ok(self.inner.lock().index.range(counter_id, start, end))
    }

    async fn register(&self, counter_id: CounterId) -> Result<()> {
        let bytes = self
            .mutate(move |inner| {
                if inner.index.contains(counter_id) {
                    return Err(PersistenceError::AlreadyRegistered(counter_id));
                }
                let bytes = inner.writer.append(StoreEvent::Registered { counter_id })?;
                inner.index.register(counter_id)?;
                Ok(bytes)
            })
            .await?;
        self.record_bytes(bytes);
        debug!(counter_id = %counter_id, "counter registered");
        Ok(())
    }

    async fn is_registered(&self, counter_id: CounterId) -> Result<bool> {
        Ok(self.inner.lock().index.contains(counter_id))
    }

    async fn delete_counter(&self, counter_id: CounterId) -> Result<usize> {
        let deleted = self
            .mutate(move |inner| {
                if !inner.index.contains(counter_id) {
                    return Ok(None);
                }
                let bytes = inner.writer.append(StoreEvent::Deleted { counter_id })?;
                Ok(Some((inner.index.remove(counter_id), bytes)))
            })
            .await?;
        let Some((removed, bytes)) = deleted else {
            return Ok(0);
        };
        self.record_bytes(bytes);
        info!(counter_id = %counter_id, removed, "counter history deleted");
        Ok(removed)
    }
}
