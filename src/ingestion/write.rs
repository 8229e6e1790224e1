//! Write functions - bulk-insert buffered rows into PostgreSQL

use crate::ingestion::error::StoreError;
use crate::ingestion::types::{PingRow, Table, TraceHopRow, TraceSummaryRow};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::query_builder::Separated;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{debug, info};

/// Postgres caps bind parameters per statement at u16::MAX
const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// Destination of flushed batches.
/// Failures are returned as-is; implementations never retry.
#[allow(async_fn_in_trait)]
pub trait StoreWriter {
    /// Trivial round trip used before any record is read
    async fn probe(&self) -> Result<(), StoreError>;

    /// Insert all rows as one unit. Empty input is a no-op returning 0.
    async fn write<R: TableRow>(&self, rows: &[R]) -> Result<u64, StoreError>;
}

/// A row type bound to exactly one table
pub trait TableRow: Send + Sync {
    const TABLE: Table;
    const COLUMNS: &'static [&'static str];

    fn push_binds<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>);
}

impl TableRow for PingRow {
    const TABLE: Table = Table::Ping;
    const COLUMNS: &'static [&'static str] = &[
        "timestamp",
        "measurement_id",
        "source",
        "destination",
        "rtt_avg",
        "rtt_min",
        "rtt_max",
        "packet_loss",
        "probe_count",
        "probe_size",
    ];

    fn push_binds<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>) {
        row.push_bind(self.timestamp)
            .push_bind(self.measurement_id)
            .push_bind(self.source.as_deref())
            .push_unseparated("::inet")
            .push_bind(self.destination.as_deref())
            .push_unseparated("::inet")
            .push_bind(self.rtt_avg)
            .push_bind(self.rtt_min)
            .push_bind(self.rtt_max)
            .push_bind(self.packet_loss)
            .push_bind(self.probe_count)
            .push_bind(self.probe_size);
    }
}

impl TableRow for TraceSummaryRow {
    const TABLE: Table = Table::TraceSummary;
    const COLUMNS: &'static [&'static str] = &[
        "timestamp",
        "measurement_id",
        "source",
        "destination",
        "hop_count",
        "completed",
    ];

    fn push_binds<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>) {
        row.push_bind(self.timestamp)
            .push_bind(self.measurement_id)
            .push_bind(self.source.as_deref())
            .push_unseparated("::inet")
            .push_bind(self.destination.as_deref())
            .push_unseparated("::inet")
            .push_bind(self.hop_count)
            .push_bind(self.completed);
    }
}

impl TableRow for TraceHopRow {
    const TABLE: Table = Table::TraceHop;
    const COLUMNS: &'static [&'static str] = &[
        "timestamp",
        "measurement_id",
        "source",
        "destination",
        "hop_number",
        "hop_address",
        "rtt",
        "probe_ttl",
        "icmp_type",
        "icmp_code",
    ];

    fn push_binds<'args>(&'args self, row: &mut Separated<'_, 'args, Postgres, &'static str>) {
        row.push_bind(self.timestamp)
            .push_bind(self.measurement_id)
            .push_bind(self.source.as_deref())
            .push_unseparated("::inet")
            .push_bind(self.destination.as_deref())
            .push_unseparated("::inet")
            .push_bind(self.hop_number)
            .push_bind(self.hop_address.as_str())
            .push_unseparated("::inet")
            .push_bind(self.rtt)
            .push_bind(self.probe_ttl)
            .push_bind(self.icmp_type)
            .push_bind(self.icmp_code);
    }
}

/// Rows that fit in one INSERT statement for this table
pub fn rows_per_statement<R: TableRow>() -> usize {
    MAX_BIND_PARAMS / R::COLUMNS.len()
}

fn insert_prefix<R: TableRow>() -> String {
    format!(
        "INSERT INTO {} ({}) ",
        R::TABLE.name(),
        R::COLUMNS.join(", ")
    )
}

/// One multi-row INSERT per chunk, each within the bind-parameter limit
fn insert_statements<'a, R: TableRow>(
    rows: &'a [R],
) -> impl Iterator<Item = QueryBuilder<'a, Postgres>> + 'a {
    rows.chunks(rows_per_statement::<R>()).map(|chunk| {
        let mut builder: QueryBuilder<'a, Postgres> = QueryBuilder::new(insert_prefix::<R>());
        builder.push_values(chunk, |mut b, row| row.push_binds(&mut b));
        builder
    })
}

/// Store connection scoped to one loader process
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Open the single connection used for the whole run
    pub async fn connect(
        options: PgConnectOptions,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(acquire_timeout)
            .connect_with(options)
            .await
            .map_err(StoreError::Connection)?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Store connection closed");
    }
}

impl StoreWriter for PgStore {
    async fn probe(&self) -> Result<(), StoreError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::Connection)?;

        info!("Store connection successful");
        Ok(())
    }

    async fn write<R: TableRow>(&self, rows: &[R]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let table = R::TABLE.name();
        let insert_failed = |source| StoreError::Insert { table, source };

        // Oversized batches are split into several statements, committed together
        let mut tx = self.pool.begin().await.map_err(insert_failed)?;
        let mut inserted = 0u64;

        for mut builder in insert_statements(rows) {
            let result = builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(insert_failed)?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(insert_failed)?;

        info!("Inserted {} rows into {}", inserted, table);
        Ok(inserted)
    }
}
