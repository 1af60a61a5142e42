use rusqlite::{Connection, params};

use crate::error::TrendsError;

pub const SEQUENCE_DB: &str = "seq_db";
pub const SUBSTITUTION_DB: &str = "sub_db";

const PERSISTENT_TABLES: [&str; 7] = [
    "lineages",
    "proteins",
    "locations",
    "aggr_sequences",
    "aggr_substitutions",
    "lineage_characterization",
    "dataset_info",
];

const STORE_DDL: &str = "
CREATE TABLE lineages (
    lineage_id INTEGER PRIMARY KEY,
    lineage TEXT NOT NULL UNIQUE
);
CREATE TABLE proteins (
    protein_id INTEGER PRIMARY KEY,
    protein TEXT NOT NULL UNIQUE
);
CREATE TABLE locations (
    granularity INTEGER NOT NULL,
    location_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    path TEXT NOT NULL,
    parent_id INTEGER,
    PRIMARY KEY (granularity, location_id)
);
CREATE TABLE aggr_sequences (
    date INTEGER NOT NULL,
    lineage_id INTEGER NOT NULL,
    granularity INTEGER NOT NULL,
    location_id INTEGER NOT NULL,
    count INTEGER NOT NULL
);
CREATE TABLE aggr_substitutions (
    date INTEGER NOT NULL,
    lineage_id INTEGER NOT NULL,
    granularity INTEGER NOT NULL,
    location_id INTEGER NOT NULL,
    protein_id INTEGER NOT NULL,
    mutation TEXT NOT NULL,
    count INTEGER NOT NULL
);
CREATE TABLE lineage_characterization (
    lineage_id INTEGER NOT NULL,
    protein_id INTEGER NOT NULL,
    mutation TEXT NOT NULL,
    PRIMARY KEY (lineage_id, protein_id, mutation)
);
CREATE TABLE dataset_info (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

const SCRATCH_DDL: &str = "
PRAGMA seq_db.journal_mode = OFF;
PRAGMA seq_db.synchronous = OFF;
PRAGMA sub_db.journal_mode = OFF;
PRAGMA sub_db.synchronous = OFF;
CREATE TABLE seq_db.sequences (
    sequence_id INTEGER PRIMARY KEY,
    date INTEGER NOT NULL,
    lineage_id INTEGER NOT NULL,
    continent_id INTEGER NOT NULL,
    country_id INTEGER,
    region_id INTEGER
);
CREATE TABLE sub_db.substitutions (
    sequence_id INTEGER NOT NULL,
    protein_id INTEGER NOT NULL,
    mutation TEXT NOT NULL
);
";

// Trailing columns make both location-scoped lookups index-only.
const INDEX_DDL: &str = "
CREATE INDEX aggr_sequences_location_idx
    ON aggr_sequences (granularity, location_id, date, lineage_id, count);
CREATE INDEX aggr_sequences_date_idx
    ON aggr_sequences (date, lineage_id);
CREATE INDEX aggr_substitutions_location_idx
    ON aggr_substitutions (granularity, location_id, date, lineage_id, protein_id, mutation, count);
CREATE INDEX aggr_substitutions_date_idx
    ON aggr_substitutions (date, lineage_id);
CREATE INDEX lineage_characterization_mutation_idx
    ON lineage_characterization (protein_id, mutation);
";

pub fn create_store_tables(conn: &Connection) -> Result<(), TrendsError> {
    conn.execute_batch(STORE_DDL)?;
    Ok(())
}

pub fn attach_scratch(
    conn: &Connection,
    sequences_path: &str,
    substitutions_path: &str,
) -> Result<(), TrendsError> {
    conn.execute(
        &format!("ATTACH DATABASE ?1 AS {SEQUENCE_DB}"),
        params![sequences_path],
    )?;
    conn.execute(
        &format!("ATTACH DATABASE ?1 AS {SUBSTITUTION_DB}"),
        params![substitutions_path],
    )?;
    conn.execute_batch(SCRATCH_DDL)?;
    Ok(())
}

pub fn detach_scratch(conn: &Connection) -> Result<(), TrendsError> {
    conn.execute_batch(&format!(
        "DETACH DATABASE {SEQUENCE_DB}; DETACH DATABASE {SUBSTITUTION_DB};"
    ))?;
    Ok(())
}

pub fn create_indexes(conn: &Connection) -> Result<(), TrendsError> {
    conn.execute_batch(INDEX_DDL)?;
    Ok(())
}

pub fn rollups_exist(conn: &Connection) -> Result<bool, TrendsError> {
    let mut stmt =
        conn.prepare("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
    for table in PERSISTENT_TABLES {
        let count: i64 = stmt.query_row(params![table], |row| row.get(0))?;
        if count == 0 {
            return Ok(false);
        }
    }
    Ok(true)
}
