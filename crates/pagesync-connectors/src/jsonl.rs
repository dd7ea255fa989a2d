//! JSON-lines directory sink.
//!
//! Each destination is one `<sink>.jsonl` file under the configured
//! directory. A batch is merged into the existing rows by primary key and
//! the whole file is rewritten through a temporary file that is fsynced
//! and renamed over the original, so a crash leaves either the old or the
//! new contents.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use pagesync_engine::{BatchAck, RequestContext, Sink};
use pagesync_types::error::{ConnectorError, ErrorScope};
use pagesync_types::record::TypedRow;
use pagesync_types::schema::Resource;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use crate::table::Table;

const EXTENSION: &str = "jsonl";

#[derive(Debug)]
pub struct JsonlSink {
    dir: PathBuf,
    /// One writer at a time per destination file.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JsonlSink {
    /// Create the sink, creating `dir` if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing the destination of `resource`.
    ///
    /// # Errors
    ///
    /// Returns a `config` error if the sink name could escape the directory.
    pub fn path_for(&self, resource: &Resource) -> Result<PathBuf, ConnectorError> {
        let name = resource.sink.as_str();
        let invalid = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\'])
            || name.contains('\0');
        if invalid {
            return Err(ConnectorError::config(
                "INVALID_SINK_NAME",
                format!("sink name '{name}' is not a valid file name"),
            )
            .with_scope(ErrorScope::Resource));
        }
        Ok(self.dir.join(format!("{name}.{EXTENSION}")))
    }

    async fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(
            locks
                .entry(path.to_string_lossy().into_owned())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Run blocking file I/O for one destination under its lock.
    async fn with_file<T, F>(&self, resource: &Resource, op: F) -> Result<T, ConnectorError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> io::Result<T> + Send + 'static,
    {
        let path = self.path_for(resource)?;
        let lock = self.lock_for(&path).await;
        let _guard = lock.lock().await;

        let display = path.display().to_string();
        tokio::task::spawn_blocking(move || op(&path))
            .await
            .map_err(|e| ConnectorError::internal("SINK_TASK_FAILED", format!("sink task failed: {e}")))?
            .map_err(|e| ConnectorError::sink("SINK_IO", format!("{display}: {e}")))
    }
}

fn read_rows(path: &Path) -> io::Result<Vec<serde_json::Value>> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut rows = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(&line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        rows.push(row);
    }
    Ok(rows)
}

fn replace_file(path: &Path, table: &Table) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        for row in table.rows() {
            serde_json::to_writer(&mut writer, row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl Sink for JsonlSink {
    async fn is_empty(&self, _ctx: &RequestContext, resource: &Resource) -> Result<bool, ConnectorError> {
        self.with_file(resource, |path| Ok(read_rows(path)?.is_empty()))
            .await
    }

    async fn truncate(&self, _ctx: &RequestContext, resource: &Resource) -> Result<(), ConnectorError> {
        self.with_file(resource, |path| match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        })
        .await?;
        tracing::debug!(resource = resource.name(), sink = %resource.sink, "Destination truncated");
        Ok(())
    }

    async fn write_batch(
        &self,
        _ctx: &RequestContext,
        resource: &Resource,
        rows: &[TypedRow],
    ) -> Result<BatchAck, ConnectorError> {
        let owned = resource.clone();
        let batch = rows.to_vec();
        let stored = self
            .with_file(resource, move |path| {
                let mut table = Table::from_rows(&owned, read_rows(path)?);
                table.upsert(&owned, &batch);
                replace_file(path, &table)?;
                Ok(table.len())
            })
            .await?;

        tracing::debug!(
            resource = resource.name(),
            rows = rows.len(),
            stored,
            "Batch written"
        );
        Ok(BatchAck {
            rows_written: rows.len() as u64,
        })
    }
}
