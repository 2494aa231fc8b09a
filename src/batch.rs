// 📦 Batch Writer - bounded buffers flushed as one transaction each
//
// Memory is bounded by one batch; a failed batch is rolled back and never
// touches the batches committed before it.

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

/// A record that knows how to write itself (and any owned sub-rows)
pub trait StoreRecord {
    /// Primary table, used in error context and logs
    const TABLE: &'static str;

    /// Insert inside an open transaction, returning rows written across all tables
    fn insert(&self, tx: &Transaction) -> rusqlite::Result<usize>;
}

/// Running totals of one writer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub records: usize,
    pub rows: usize,
    pub batches: usize,
}

pub struct BatchWriter<'c, T: StoreRecord> {
    conn: &'c mut Connection,
    batch_size: usize,
    buffer: Vec<T>,
    stats: BatchStats,
}

impl<'c, T: StoreRecord> BatchWriter<'c, T> {
    /// `batch_size` is clamped to at least one record
    pub fn new(conn: &'c mut Connection, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        BatchWriter {
            conn,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            stats: BatchStats::default(),
        }
    }

    /// Buffer one record, flushing when the batch is full
    pub fn push(&mut self, record: T) -> PipelineResult<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Commit whatever is buffered as one batch.
    ///
    /// On failure the transaction is rolled back, the buffer is discarded and
    /// the error names the table and the zero-based batch index.
    pub fn flush(&mut self) -> PipelineResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let batch = self.stats.batches;
        let records = std::mem::take(&mut self.buffer);
        self.buffer.reserve(self.batch_size);

        let rows = write_batch(self.conn, &records).map_err(|source| {
            PipelineError::StoreWrite {
                table: T::TABLE.to_string(),
                batch,
                source,
            }
        })?;

        self.stats.records += records.len();
        self.stats.rows += rows;
        self.stats.batches += 1;
        debug!(table = T::TABLE, batch, records = records.len(), rows, "batch committed");

        Ok(())
    }

    /// Flush the trailing partial batch and return the totals
    pub fn finish(mut self) -> PipelineResult<BatchStats> {
        self.flush()?;
        Ok(self.stats)
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }
}

fn write_batch<T: StoreRecord>(conn: &mut Connection, records: &[T]) -> rusqlite::Result<usize> {
    // IMMEDIATE takes the write lock up front so the busy timeout applies
    // instead of failing mid-batch when another loader holds it
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let mut rows = 0;
    for record in records {
        rows += record.insert(&tx)?;
    }

    // Dropping `tx` on the error path above rolls back
    tx.commit()?;
    Ok(rows)
}
