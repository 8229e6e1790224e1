//! Ingestion driver - reads a measurement stream, normalizes, batches and flushes to the store
//!
//! One stream is consumed strictly in order. Malformed records are logged and skipped; any
//! store failure aborts the stream and leaves earlier flushes committed.

use crate::ingestion::batch::BatchAccumulator;
use crate::ingestion::error::{IngestError, SourceError, StoreError};
use crate::ingestion::normalize::normalize;
use crate::ingestion::source::MeasurementReader;
use crate::ingestion::types::{IngestStats, RawMeasurement, RunState, Table};
use crate::ingestion::write::StoreWriter;
use std::path::Path;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Skips past this count in one stream are logged at debug instead of warn
const MAX_LOGGED_SKIPS: usize = 10;

pub struct IngestionDriver<'s, W> {
    store: &'s W,
    batch: BatchAccumulator,
    state: RunState,
    stats: IngestStats,
}

impl<'s, W: StoreWriter> IngestionDriver<'s, W> {
    pub fn new(store: &'s W, batch_size: usize) -> Self {
        Self {
            store,
            batch: BatchAccumulator::new(batch_size),
            state: RunState::Idle,
            stats: IngestStats::default(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn batch(&self) -> &BatchAccumulator {
        &self.batch
    }

    /// Validate connectivity before anything is read
    pub async fn probe(&mut self) -> Result<(), StoreError> {
        match self.store.probe().await {
            Ok(()) => {
                self.transition(RunState::Reading);
                Ok(())
            }
            Err(e) => {
                error!("Store connection failed: {}", e);
                self.transition(RunState::Failed);
                Err(e)
            }
        }
    }

    /// Ingest one record file inside its own span
    pub async fn ingest_file(&mut self, path: &Path) -> Result<IngestStats, IngestError> {
        let span = info_span!("ingest", file = %path.display());
        self.ingest_path(path).instrument(span).await
    }

    async fn ingest_path(&mut self, path: &Path) -> Result<IngestStats, IngestError> {
        self.ensure_ready()?;
        info!("Processing {}", path.display());

        let reader = match MeasurementReader::open(path) {
            Ok(reader) => reader,
            Err(e) => {
                error!("{}", e);
                self.transition(RunState::Failed);
                return Err(e.into());
            }
        };

        self.ingest(reader).await
    }

    /// Consume a whole stream, then flush whatever is left regardless of threshold
    pub async fn ingest<I>(&mut self, records: I) -> Result<IngestStats, IngestError>
    where
        I: IntoIterator<Item = Result<RawMeasurement, SourceError>>,
    {
        self.ensure_ready()?;
        self.transition(RunState::Reading);
        self.stats = IngestStats::default();

        match self.consume(records).await {
            Ok(()) => {
                self.transition(RunState::Done);
                let stats = std::mem::take(&mut self.stats);
                info!("Ingestion complete: {}", stats);
                Ok(stats)
            }
            Err(e) => {
                error!("Ingestion aborted: {} ({})", e, self.stats);
                self.transition(RunState::Failed);
                Err(e)
            }
        }
    }

    fn ensure_ready(&self) -> Result<(), IngestError> {
        match self.state {
            RunState::Reading | RunState::Done => Ok(()),
            other => Err(IngestError::InvalidState(other)),
        }
    }

    async fn consume<I>(&mut self, records: I) -> Result<(), IngestError>
    where
        I: IntoIterator<Item = Result<RawMeasurement, SourceError>>,
    {
        for item in records {
            match item {
                Ok(measurement) => self.ingest_record(&measurement),
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    self.stats.records_read += 1;
                    self.skip(format_args!("Skipping unreadable record: {}", e));
                }
            }

            if self.batch.should_flush() {
                self.flush().await?;
            }
        }

        self.flush().await?;
        Ok(())
    }

    /// Normalize one record into the batch; failures only skip this record
    fn ingest_record(&mut self, measurement: &RawMeasurement) {
        self.stats.records_read += 1;

        match normalize(measurement) {
            Ok(rows) if rows.is_empty() => {
                self.stats.records_dropped += 1;
            }
            Ok(rows) => {
                self.stats.records_normalized += 1;
                for row in rows {
                    self.batch.append(row);
                }
            }
            Err(e) => {
                self.skip(format_args!(
                    "Skipping {} to {:?}: {}",
                    measurement.kind(),
                    measurement.destination(),
                    e
                ));
            }
        }
    }

    fn skip(&mut self, message: std::fmt::Arguments<'_>) {
        self.stats.records_skipped += 1;
        if self.stats.records_skipped <= MAX_LOGGED_SKIPS {
            warn!("{}", message);
        } else {
            debug!("{}", message);
        }
    }

    /// Write every non-empty table buffer, clearing each one after its write succeeds
    async fn flush(&mut self) -> Result<(), StoreError> {
        if self.batch.is_empty() {
            return Ok(());
        }

        self.transition(RunState::Flushing);

        for table in Table::ALL {
            if self.batch.len_of(table) == 0 {
                continue;
            }

            let inserted = match table {
                Table::Ping => self.store.write(self.batch.pings()).await?,
                Table::TraceSummary => self.store.write(self.batch.trace_summaries()).await?,
                Table::TraceHop => self.store.write(self.batch.trace_hops()).await?,
            };

            self.batch.clear(table);
            self.stats.record_inserted(table, inserted);
        }

        self.stats.flushes += 1;
        self.transition(RunState::Reading);
        Ok(())
    }

    fn transition(&mut self, next: RunState) {
        if self.state != next {
            debug!("Driver state {} -> {}", self.state, next);
            self.state = next;
        }
    }
}
