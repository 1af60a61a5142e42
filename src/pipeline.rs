use std::io::BufRead;
use std::time::Instant;

use rusqlite::{Connection, params};
use serde::Serialize;

use crate::aggregate::{self, RollupSummary};
use crate::app::{ProgressEvent, ProgressSink};
use crate::characterize;
use crate::domain::SourceProfile;
use crate::error::TrendsError;
use crate::loader::{BatchLoader, LoadSummary};
use crate::schema;
use crate::source::{MetadataReader, RowStats, SourceFilter};
use crate::store::{self, Store};

#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub profile: SourceProfile,
    pub filter: SourceFilter,
    pub force_regenerate: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub store: String,
    pub rows: RowStats,
    pub load: LoadSummary,
    pub rollups: RollupSummary,
    pub characterizing_pairs: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Skipped { store: String },
    Completed(IngestReport),
}

fn phase(sink: &dyn ProgressSink, started: Instant, message: String) {
    sink.event(ProgressEvent {
        message,
        elapsed: Some(started.elapsed()),
    });
}

pub fn ingest<R: BufRead>(
    store: &Store,
    input: R,
    request: &IngestRequest,
    sink: &dyn ProgressSink,
) -> Result<IngestOutcome, TrendsError> {
    let started = Instant::now();
    let _lock = store.acquire_ingest_lock()?;

    if !request.force_regenerate && store.is_populated()? {
        tracing::info!(store = %store.db_path(), "rollups already present, skipping ingestion");
        return Ok(IngestOutcome::Skipped {
            store: store.db_path().to_string(),
        });
    }

    let mut reader = MetadataReader::new(input, request.profile, request.filter.clone())?;
    phase(
        sink,
        started,
        format!("phase=Parse; reading {} metadata", reader.profile()),
    );

    let staging = store.staging_db()?;
    let scratch = store.scratch_dir()?;
    let conn = Connection::open(&staging)?;
    store::preset_bulk_connection(&conn)?;
    schema::create_store_tables(&conn)?;
    let sequences_db = scratch.path().join("sequences.db");
    let substitutions_db = scratch.path().join("substitutions.db");
    schema::attach_scratch(
        &conn,
        &sequences_db.to_string_lossy(),
        &substitutions_db.to_string_lossy(),
    )?;

    let mut loader = BatchLoader::new(&conn);
    for record in reader.by_ref() {
        loader.push(record?)?;
    }
    let rows = reader.stats();
    let load = loader.finish()?;
    tracing::info!(
        rows = rows.rows,
        accepted = rows.accepted,
        filtered_country = rows.filtered_country,
        bad_date = rows.bad_date,
        out_of_window = rows.out_of_window,
        low_quality = rows.low_quality,
        malformed = rows.malformed,
        "metadata parsed"
    );
    phase(
        sink,
        started,
        format!(
            "phase=Load; {} sequences in {} batches",
            load.sequences, load.flushes
        ),
    );

    let rollups = aggregate::build_rollups(&conn)?;
    phase(
        sink,
        started,
        format!(
            "phase=Aggregate; {} sequence rows, {} substitution rows",
            rollups.sequence_rows, rollups.substitution_rows
        ),
    );

    let characterizing_pairs = characterize::characterize(&conn)?;
    phase(
        sink,
        started,
        format!("phase=Characterize; {characterizing_pairs} lineage signature mutations"),
    );

    schema::detach_scratch(&conn)?;
    drop(scratch);
    schema::create_indexes(&conn)?;
    write_dataset_info(&conn, request, load.sequences)?;
    conn.close().map_err(|(_, err)| TrendsError::from(err))?;
    phase(sink, started, "phase=Index; indexes built".to_string());

    store.promote(staging)?;
    let elapsed_ms = started.elapsed().as_millis();
    tracing::info!(store = %store.db_path(), elapsed_ms, "ingestion complete");

    Ok(IngestOutcome::Completed(IngestReport {
        store: store.db_path().to_string(),
        rows,
        load,
        rollups,
        characterizing_pairs,
        elapsed_ms,
    }))
}

fn write_dataset_info(
    conn: &Connection,
    request: &IngestRequest,
    sequences: u64,
) -> Result<(), TrendsError> {
    let countries = if request.filter.countries.is_empty() {
        "all".to_string()
    } else {
        request
            .filter
            .countries
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(",")
    };
    let range = request.filter.date_range;
    let entries = [
        ("source", request.profile.to_string()),
        ("countries", countries),
        (
            "begin_date",
            range.begin.map(|day| day.to_string()).unwrap_or_default(),
        ),
        (
            "end_date",
            range.end.map(|day| day.to_string()).unwrap_or_default(),
        ),
        ("ingested_at", chrono::Utc::now().to_rfc3339()),
        ("version", env!("CARGO_PKG_VERSION").to_string()),
        ("sequences", sequences.to_string()),
    ];

    let tx = conn.unchecked_transaction()?;
    {
        let mut insert = tx.prepare("INSERT INTO dataset_info (key, value) VALUES (?1, ?2)")?;
        for (key, value) in entries {
            insert.execute(params![key, value])?;
        }
    }
    tx.commit()?;
    Ok(())
}
