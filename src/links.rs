//! Batched, de-duplicated link files
//!
//! [`LinkBatchWriter`] turns a stream of download URLs coming from many tasks
//! into a bounded number of link files (`{prefix}{index}.{extension}`), each
//! holding at most `max_lines_per_unit` distinct lines. The bulk downloader
//! hands each file to the external transfer tool as one work item.
//!
//! Batch assignment happens in a single critical section: the line is
//! de-duplicated, appended, and when the batch is full it is taken together
//! with its unit index before the lock is released. The file itself is
//! written afterwards, so the lock is never held across an `.await`. A unit
//! whose file can not be written returns its lines to the writer.
//!
//! De-duplication spans one download cycle: [`LinkBatchWriter::take_units`]
//! hands over the written units and forgets the lines they carried.

use crate::error::{Error, Result};
use crate::utils::{next_unit_path, validate_path};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A full batch that has been assigned a unit path but not yet written
struct PendingUnit {
    path: PathBuf,
    lines: Vec<String>,
}

#[derive(Default)]
struct WriterState {
    /// Every line accepted since the units were last taken
    seen: HashSet<String>,
    /// Lines waiting for the current batch to fill
    batch: Vec<String>,
    /// Lowest index the next unit may use
    next_index: u64,
    /// Units written to disk and not yet taken
    units: Vec<PathBuf>,
    closed: bool,
}

/// Accumulates lines into fixed-size, de-duplicated link files
///
/// Safe to share between tasks (`Arc<LinkBatchWriter>`); every method takes
/// `&self`.
///
/// # Examples
///
/// ```no_run
/// use gallery_sync::links::LinkBatchWriter;
///
/// # async fn example() -> gallery_sync::Result<()> {
/// let writer = LinkBatchWriter::new("./packages", "links", 5000, "txt")?;
/// writer.write("https://www.nuget.org/api/v2/package/Serilog/2.12.0").await?;
/// writer.flush().await?;
/// for unit in writer.take_units() {
///     println!("ready: {}", unit.display());
/// }
/// # Ok(())
/// # }
/// ```
pub struct LinkBatchWriter {
    dir: PathBuf,
    prefix: String,
    extension: String,
    max_lines_per_unit: usize,
    state: Mutex<WriterState>,
}

impl LinkBatchWriter {
    /// Create a writer emitting units into `dir`, creating it if missing
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPath`] if `dir` is empty or contains forbidden characters
    /// - [`Error::InvalidArgument`] for an empty prefix or extension, or a zero batch size
    /// - [`Error::Io`] if the directory can not be created
    pub fn new(
        dir: impl AsRef<Path>,
        prefix: &str,
        max_lines_per_unit: usize,
        extension: &str,
    ) -> Result<Self> {
        let dir = dir.as_ref();
        validate_path(dir)?;
        if prefix.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "link file prefix can not be empty".into(),
            ));
        }
        let extension = extension.trim().trim_start_matches('.');
        if extension.is_empty() {
            return Err(Error::InvalidArgument(
                "link file extension can not be empty".into(),
            ));
        }
        if max_lines_per_unit == 0 {
            return Err(Error::InvalidArgument(
                "a link file must hold at least one line".into(),
            ));
        }

        std::fs::create_dir_all(dir)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            extension: extension.to_string(),
            max_lines_per_unit,
            state: Mutex::new(WriterState::default()),
        })
    }

    /// Directory units are written to
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a single line
    ///
    /// Returns whether the line was new. Duplicates and blank lines are
    /// ignored.
    pub async fn write(&self, line: &str) -> Result<bool> {
        Ok(self.write_all([line]).await? == 1)
    }

    /// Write many lines, returning how many of them were new
    ///
    /// An empty input is accepted and logged as a no-op.
    pub async fn write_all<I, S>(&self, lines: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut lines = lines.into_iter().peekable();
        if lines.peek().is_none() {
            tracing::warn!("No links given to the link writer, nothing to do");
            return Ok(0);
        }

        let (accepted, full) = self.ingest(lines)?;
        self.emit(full).await?;
        Ok(accepted)
    }

    /// Write the partial batch, if any, to a unit
    ///
    /// Errors from the filesystem are returned to the caller and the lines
    /// stay pending, so a later flush writes them.
    pub async fn flush(&self) -> Result<()> {
        let pending = {
            let mut state = self.lock()?;
            self.take_rest(&mut state)?
        };
        self.emit(pending).await
    }

    /// Flush the partial batch and refuse any further writes
    ///
    /// Calling it again only retries lines a failed flush left pending.
    pub async fn close(&self) -> Result<()> {
        let pending = {
            let mut state = self.lock()?;
            state.closed = true;
            self.take_rest(&mut state)?
        };
        self.emit(pending).await
    }

    /// Units written so far and not yet taken
    pub fn units(&self) -> Vec<PathBuf> {
        self.lock().map(|s| s.units.clone()).unwrap_or_default()
    }

    /// Hand over the written units, leaving none behind
    ///
    /// Lines carried by the taken units are forgotten, so a later write of
    /// the same line is accepted again. Lines still waiting in the partial
    /// batch stay de-duplicated.
    pub fn take_units(&self) -> Vec<PathBuf> {
        let Ok(mut state) = self.lock() else {
            return Vec::new();
        };
        let state = &mut *state;
        state.seen.clear();
        state.seen.extend(state.batch.iter().cloned());
        std::mem::take(&mut state.units)
    }

    /// Lines waiting in the partial batch
    pub fn pending_len(&self) -> usize {
        self.lock().map(|s| s.batch.len()).unwrap_or(0)
    }

    /// Distinct lines accepted since the units were last taken
    pub fn accepted_len(&self) -> usize {
        self.lock().map(|s| s.seen.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, WriterState>> {
        self.state
            .lock()
            .map_err(|_| Error::Other("link writer state lock poisoned".into()))
    }

    /// De-duplicate and batch `lines`, returning the full batches to emit
    fn ingest<I, S>(&self, lines: I) -> Result<(usize, Vec<PendingUnit>)>
    where
        I: Iterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.lock()?;
        if state.closed {
            return Err(Error::WriterClosed);
        }

        let mut accepted = 0;
        let mut full = Vec::new();
        for line in lines {
            let line = line.as_ref().trim();
            if line.is_empty() {
                tracing::debug!("Skipping blank link");
                continue;
            }
            if !state.seen.insert(line.to_string()) {
                continue;
            }
            accepted += 1;
            state.batch.push(line.to_string());
            while state.batch.len() >= self.max_lines_per_unit {
                let lines = state.batch.drain(..self.max_lines_per_unit).collect();
                full.push(self.assign(&mut state, lines)?);
            }
        }
        Ok((accepted, full))
    }

    /// Put the lines of an unwritten unit back in front of the partial batch
    fn restore(&self, mut lines: Vec<String>) -> Result<()> {
        let mut state = self.lock()?;
        lines.append(&mut state.batch);
        state.batch = lines;
        Ok(())
    }

    /// Split the whole partial batch into units
    fn take_rest(&self, state: &mut WriterState) -> Result<Vec<PendingUnit>> {
        let lines = std::mem::take(&mut state.batch);
        let mut units = Vec::new();
        for chunk in lines.chunks(self.max_lines_per_unit) {
            units.push(self.assign(state, chunk.to_vec())?);
        }
        Ok(units)
    }

    /// Reserve the next free unit name for `lines`
    fn assign(&self, state: &mut WriterState, lines: Vec<String>) -> Result<PendingUnit> {
        let (path, index) =
            next_unit_path(&self.dir, &self.prefix, &self.extension, state.next_index)?;
        state.next_index = index + 1;
        Ok(PendingUnit { path, lines })
    }

    /// Write `units` in order
    ///
    /// On the first failure the lines of that unit and of every unit after
    /// it go back to the partial batch before the error is returned.
    async fn emit(&self, units: Vec<PendingUnit>) -> Result<()> {
        let mut units = units.into_iter();
        while let Some(unit) = units.next() {
            if let Err(e) = self.write_unit(&unit).await {
                tracing::warn!(
                    unit = %unit.path.display(),
                    error = %e,
                    "Failed to write link file, keeping its lines pending"
                );
                let lines = std::iter::once(unit)
                    .chain(units)
                    .flat_map(|u| u.lines)
                    .collect();
                self.restore(lines)?;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn write_unit(&self, unit: &PendingUnit) -> Result<()> {
        let mut contents = unit.lines.join("\n");
        contents.push('\n');
        tokio::fs::write(&unit.path, contents).await?;

        tracing::debug!(
            unit = %unit.path.display(),
            lines = unit.lines.len(),
            "Wrote link file"
        );

        self.lock()?.units.push(unit.path.clone());
        Ok(())
    }
}
