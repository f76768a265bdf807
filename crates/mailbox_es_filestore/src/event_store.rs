use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use fs2::FileExt;
use mailbox_es::{
    AggregateId, DtoError, Event, EventDto, EventStore, EventStoreError, History, NonEmpty,
};
use mailbox_es_inmemory::InMemoryEventStore;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::Error;

/// Type name of the line recording that an aggregate's history was removed.
const AGGREGATE_REMOVED: &str = "aggregate-removed";

/// An [`InMemoryEventStore`] whose appends are also written to a file.
///
/// Several stores, in one process or many, may share a file. Every append
/// takes an exclusive advisory lock on the file, replays the lines other
/// writers added since it last looked, and only then runs the in-memory
/// compare-and-swap, so a stale append reports
/// [`EventStoreError::ConcurrentAppendConflict`] even when the winner lives
/// in another process. The batch is written as a single chunk of lines; if
/// the write fails, the file is cut back to its previous length, the previous
/// history is restored and the append reports
/// [`EventStoreError::Unavailable`].
///
/// Reads replay new lines under a shared lock and are then served from
/// memory.
pub struct FlatFileEventStore<E>
where
    E: Event,
{
    event_store: InMemoryEventStore<E>,
    log: Mutex<Log>,
    path: PathBuf,
}

/// The open file and the part of it already replayed into memory.
struct Log {
    file: File,
    replayed: Replayed,
}

#[derive(Clone, Copy, Debug, Default)]
struct Replayed {
    /// Byte length of the complete lines replayed so far.
    offset: u64,
    /// Number of lines replayed so far.
    lines: usize,
}

/// What to do with bytes after the last newline.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Tail {
    /// Cut them off; only done while holding the exclusive lock.
    Truncate,
    /// Leave them for the next exclusive holder.
    Keep,
}

/// An advisory lock on the event file, released on drop.
struct FileLock<'a> {
    file: &'a File,
}

impl<'a> FileLock<'a> {
    fn exclusive(file: &'a File) -> io::Result<Self> {
        FileExt::lock_exclusive(file)?;
        Ok(FileLock { file })
    }

    fn shared(file: &'a File) -> io::Result<Self> {
        FileExt::lock_shared(file)?;
        Ok(FileLock { file })
    }
}

impl Drop for FileLock<'_> {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(self.file) {
            warn!("could not unlock event file: {err}");
        }
    }
}

impl<E> FlatFileEventStore<E>
where
    E: EventDto,
{
    /// Opens the store at `path`, replaying every line of the file.
    ///
    /// The file is created if missing. A truncated final line, left by an
    /// interrupted write, is removed from the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let file = fs::OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let event_store = InMemoryEventStore::new();
        let mut replayed = Replayed::default();
        {
            let _lock = FileLock::exclusive(&file)?;
            replay(&file, &mut replayed, &event_store, Tail::Truncate)?;
        }
        info!(
            path = %path.display(),
            aggregates = event_store.aggregate_count(),
            lines = replayed.lines,
            "loaded event store"
        );

        Ok(FlatFileEventStore {
            event_store,
            log: Mutex::new(Log { file, replayed }),
            path,
        })
    }

    /// The wrapped in memory store.
    ///
    /// It only reflects the file as of the last operation on this store.
    pub fn event_store(&self) -> &InMemoryEventStore<E> {
        &self.event_store
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn log(&self) -> Result<MutexGuard<'_, Log>, EventStoreError> {
        self.log
            .lock()
            .map_err(|_| EventStoreError::unavailable(Error::Poisoned))
    }

    /// Writes `chunk` at the end of the file, which must hold the exclusive
    /// lock and be fully replayed.
    ///
    /// On failure the file is cut back to the replayed length.
    fn write_chunk(
        &self,
        file: &File,
        replayed: &mut Replayed,
        chunk: &str,
        lines: usize,
    ) -> Result<(), Error> {
        match write_synced(file, chunk) {
            Ok(()) => {
                replayed.offset += chunk.len() as u64;
                replayed.lines += lines;
                Ok(())
            }
            Err(err) => {
                if let Err(truncate_err) = file.set_len(replayed.offset) {
                    warn!(
                        path = %self.path.display(),
                        "could not cut back partially written chunk: {truncate_err}"
                    );
                }
                Err(err.into())
            }
        }
    }
}

fn write_synced(file: &File, chunk: &str) -> io::Result<()> {
    let mut writer = file;
    writer.write_all(chunk.as_bytes())?;
    writer.flush()?;
    file.sync_data()
}

enum Line<E> {
    Event(E),
    Removed(String),
}

fn parse_line<E>(line: &[u8]) -> Result<Line<E>, DtoError>
where
    E: EventDto,
{
    let value: Value = serde_json::from_slice(line).map_err(DtoError::Deserialize)?;
    if value.get("type").and_then(Value::as_str) == Some(AGGREGATE_REMOVED) {
        let key = value
            .get("aggregateKey")
            .and_then(Value::as_str)
            .ok_or_else(|| DtoError::invalid_field("aggregateKey", "missing"))?;
        return Ok(Line::Removed(key.to_string()));
    }

    let dto = serde_json::from_value(value).map_err(DtoError::Deserialize)?;
    E::from_dto(dto).map(Line::Event)
}

/// Lines of one aggregate found while replaying.
struct Replay<E> {
    /// A removal was replayed, the stored history no longer counts.
    removed: bool,
    events: Vec<E>,
}

/// Replays the lines written after `replayed` into `event_store`.
///
/// Nothing is installed unless every new line parses and every touched
/// aggregate still forms a valid history starting at the first event id.
fn replay<E>(
    file: &File,
    replayed: &mut Replayed,
    event_store: &InMemoryEventStore<E>,
    tail: Tail,
) -> Result<(), Error>
where
    E: EventDto,
{
    let mut reader = file;
    reader.seek(SeekFrom::Start(replayed.offset))?;
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    let complete = bytes
        .iter()
        .rposition(|byte| *byte == b'\n')
        .map_or(0, |newline| newline + 1);
    if complete < bytes.len() && tail == Tail::Truncate {
        warn!(
            bytes = bytes.len() - complete,
            "cutting off truncated last line"
        );
        file.set_len(replayed.offset + complete as u64)?;
    }
    if complete == 0 {
        return Ok(());
    }

    let mut order: Vec<String> = Vec::new();
    let mut replays: HashMap<String, Replay<E>> = HashMap::new();
    let mut line_count = 0;
    for (index, line) in bytes[..complete - 1].split(|byte| *byte == b'\n').enumerate() {
        line_count = index + 1;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let parsed = parse_line::<E>(line).map_err(|source| Error::Dto {
            line: replayed.lines + index + 1,
            source,
        })?;
        let (key, event) = match parsed {
            Line::Event(event) => (event.aggregate_id().as_aggregate_key(), Some(event)),
            Line::Removed(key) => (key, None),
        };
        let replay = replays.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Replay {
                removed: false,
                events: Vec::new(),
            }
        });
        match event {
            Some(event) => replay.events.push(event),
            None => {
                replay.removed = true;
                replay.events.clear();
            }
        }
    }

    let mut installs = Vec::with_capacity(order.len());
    for key in order {
        let Some(replay) = replays.remove(&key) else {
            continue;
        };
        let history = match NonEmpty::new(replay.events) {
            Some(events) => {
                let id = events.first().aggregate_id().clone();
                let base = if replay.removed {
                    None
                } else {
                    event_store.current(&id)
                };
                let history = base
                    .as_deref()
                    .cloned()
                    .unwrap_or_default()
                    .append(&events)
                    .map_err(|source| Error::CorruptHistory {
                        aggregate_key: key.clone(),
                        source,
                    })?;
                Some((id, Arc::new(history)))
            }
            None => None,
        };
        installs.push((key, replay.removed, history));
    }

    let aggregates = installs.len();
    for (key, removed, history) in installs {
        if removed {
            event_store.remove_by_key(&key);
        }
        if let Some((id, history)) = history {
            event_store.insert(id, history);
        }
    }
    replayed.offset += complete as u64;
    replayed.lines += line_count;
    debug!(lines = line_count, aggregates, "replayed event file");

    Ok(())
}

fn to_chunk<'a, E>(events: impl IntoIterator<Item = &'a E>) -> Result<String, Error>
where
    E: EventDto,
{
    let mut chunk = String::new();
    for event in events {
        chunk.push_str(&event.to_json().map_err(Error::Serialize)?);
        chunk.push('\n');
    }
    Ok(chunk)
}

impl<E> fmt::Debug for FlatFileEventStore<E>
where
    E: Event,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatFileEventStore")
            .field("path", &self.path)
            .field("event_store", &self.event_store)
            .finish()
    }
}

#[async_trait]
impl<E> EventStore<E> for FlatFileEventStore<E>
where
    E: EventDto,
{
    async fn append_all(&self, events: NonEmpty<E>) -> Result<(), EventStoreError> {
        let chunk = to_chunk(&events).map_err(EventStoreError::unavailable)?;

        let mut log = self.log()?;
        let Log { file, replayed } = &mut *log;
        let file = &*file;
        let _lock = FileLock::exclusive(file).map_err(EventStoreError::unavailable)?;
        replay(file, replayed, &self.event_store, Tail::Truncate)
            .map_err(EventStoreError::unavailable)?;

        let (previous, installed) = self.event_store.try_append_all(&events)?;
        if let Err(err) = self.write_chunk(file, replayed, &chunk, events.len()) {
            let id = events.first().aggregate_id();
            if !self.event_store.revert(id, &installed, previous) {
                warn!(aggregate = %id.as_aggregate_key(), "could not revert unpersisted append");
            }
            return Err(EventStoreError::unavailable(err));
        }
        debug!(
            aggregate = %events.first().aggregate_id().as_aggregate_key(),
            count = events.len(),
            "persisted events"
        );

        Ok(())
    }

    async fn get_events_of_aggregate(
        &self,
        id: &E::AggregateId,
    ) -> Result<History<E>, EventStoreError> {
        {
            let mut log = self.log()?;
            let Log { file, replayed } = &mut *log;
            let file = &*file;
            let _lock = FileLock::shared(file).map_err(EventStoreError::unavailable)?;
            replay(file, replayed, &self.event_store, Tail::Keep)
                .map_err(EventStoreError::unavailable)?;
        }

        Ok(self
            .event_store
            .current(id)
            .as_deref()
            .cloned()
            .unwrap_or_default())
    }

    async fn remove(&self, id: &E::AggregateId) -> Result<(), EventStoreError> {
        let line = json!({
            "type": AGGREGATE_REMOVED,
            "aggregateKey": id.as_aggregate_key(),
        });

        let mut log = self.log()?;
        let Log { file, replayed } = &mut *log;
        let file = &*file;
        let _lock = FileLock::exclusive(file).map_err(EventStoreError::unavailable)?;
        replay(file, replayed, &self.event_store, Tail::Truncate)
            .map_err(EventStoreError::unavailable)?;

        self.write_chunk(file, replayed, &format!("{line}\n"), 1)
            .map_err(EventStoreError::unavailable)?;
        if let Some(current) = self.event_store.current(id) {
            self.event_store.replace_if_unchanged(id, &current, None);
        }

        Ok(())
    }
}
