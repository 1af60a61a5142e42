use rusqlite::{Connection, params};
use serde::Serialize;

use crate::error::TrendsError;
use crate::interner::{DimensionKind, Interner, LocationIds};
use crate::source::SourceRecord;

pub const BATCH_ROWS: usize = 50_000;

struct SequenceRow {
    sequence_id: i64,
    date: i32,
    lineage_id: u32,
    location: LocationIds,
}

struct SubstitutionRow {
    sequence_id: i64,
    protein_id: u32,
    mutation: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub sequences: u64,
    pub substitutions: u64,
    pub flushes: u64,
    pub lineages: usize,
    pub proteins: usize,
    pub locations: usize,
}

pub struct BatchLoader<'c> {
    conn: &'c Connection,
    interner: Interner,
    sequences: Vec<SequenceRow>,
    substitutions: Vec<SubstitutionRow>,
    batch_rows: usize,
    next_sequence_id: i64,
    summary: LoadSummary,
}

impl<'c> BatchLoader<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self::with_batch_rows(conn, BATCH_ROWS)
    }

    pub fn with_batch_rows(conn: &'c Connection, batch_rows: usize) -> Self {
        Self {
            conn,
            interner: Interner::new(),
            sequences: Vec::new(),
            substitutions: Vec::new(),
            batch_rows: batch_rows.max(1),
            next_sequence_id: 0,
            summary: LoadSummary::default(),
        }
    }

    pub fn push(&mut self, record: SourceRecord) -> Result<(), TrendsError> {
        let sequence_id = self.next_sequence_id;
        self.next_sequence_id += 1;

        let location = self.interner.location_ids(
            &record.continent,
            record.country.as_deref(),
            record.region.as_deref(),
        );
        let lineage_id = self.interner.lineage_id(&record.lineage);
        self.sequences.push(SequenceRow {
            sequence_id,
            date: record.date.value(),
            lineage_id,
            location,
        });

        for (protein, mutation) in record.substitutions {
            let protein_id = self.interner.protein_id(&protein);
            self.substitutions.push(SubstitutionRow {
                sequence_id,
                protein_id,
                mutation,
            });
        }

        if self.sequences.len() + self.substitutions.len() >= self.batch_rows {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TrendsError> {
        if self.sequences.is_empty() && self.substitutions.is_empty() {
            return Ok(());
        }

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut insert_sequence = tx.prepare_cached(
                "INSERT INTO seq_db.sequences
                 (sequence_id, date, lineage_id, continent_id, country_id, region_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for row in &self.sequences {
                insert_sequence.execute(params![
                    row.sequence_id,
                    row.date,
                    row.lineage_id,
                    row.location.continent,
                    row.location.country,
                    row.location.region,
                ])?;
            }

            let mut insert_substitution = tx.prepare_cached(
                "INSERT INTO sub_db.substitutions (sequence_id, protein_id, mutation)
                 VALUES (?1, ?2, ?3)",
            )?;
            for row in &self.substitutions {
                insert_substitution.execute(params![
                    row.sequence_id,
                    row.protein_id,
                    row.mutation
                ])?;
            }
        }
        tx.commit()?;

        self.summary.sequences += self.sequences.len() as u64;
        self.summary.substitutions += self.substitutions.len() as u64;
        self.summary.flushes += 1;
        self.sequences.clear();
        self.substitutions.clear();
        tracing::debug!(
            flushes = self.summary.flushes,
            sequences = self.summary.sequences,
            "flushed raw batch"
        );
        Ok(())
    }

    pub fn finish(mut self) -> Result<LoadSummary, TrendsError> {
        self.flush()?;

        let tx = self.conn.unchecked_transaction()?;
        {
            let mut insert_lineage =
                tx.prepare_cached("INSERT INTO lineages (lineage_id, lineage) VALUES (?1, ?2)")?;
            for (id, name) in self.interner.names(DimensionKind::Lineage).iter().enumerate() {
                insert_lineage.execute(params![id as i64, name])?;
            }

            let mut insert_protein =
                tx.prepare_cached("INSERT INTO proteins (protein_id, protein) VALUES (?1, ?2)")?;
            for (id, name) in self.interner.names(DimensionKind::Protein).iter().enumerate() {
                insert_protein.execute(params![id as i64, name])?;
            }

            let mut insert_location = tx.prepare_cached(
                "INSERT INTO locations (granularity, location_id, name, path, parent_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for entry in self.interner.locations() {
                insert_location.execute(params![
                    entry.granularity.code(),
                    entry.id,
                    entry.name,
                    entry.path,
                    entry.parent
                ])?;
                self.summary.locations += 1;
            }
        }
        tx.commit()?;

        self.summary.lineages = self.interner.len(DimensionKind::Lineage);
        self.summary.proteins = self.interner.len(DimensionKind::Protein);
        Ok(self.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EpochDay;
    use crate::schema;

    fn scratch_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_store_tables(&conn).unwrap();
        schema::attach_scratch(&conn, ":memory:", ":memory:").unwrap();
        conn
    }

    fn record(country: &str, lineage: &str, day: i32, subs: &[(&str, &str)]) -> SourceRecord {
        SourceRecord {
            continent: "Europe".to_string(),
            country: Some(country.to_string()),
            region: None,
            lineage: lineage.to_string(),
            date: EpochDay::new(day),
            substitutions: subs
                .iter()
                .map(|(p, m)| (p.to_string(), m.to_string()))
                .collect(),
        }
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn small_batches_flush_as_they_fill() {
        let conn = scratch_conn();
        let mut loader = BatchLoader::with_batch_rows(&conn, 3);
        for day in 0..4 {
            loader
                .push(record("Italy", "BA.2", day, &[("S", "D614G")]))
                .unwrap();
        }
        // Two rows per record: flushes after the 2nd and 4th record.
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM seq_db.sequences"), 4);
        let summary = loader.finish().unwrap();
        assert_eq!(summary.flushes, 2);
        assert_eq!(summary.sequences, 4);
        assert_eq!(summary.substitutions, 4);
    }

    #[test]
    fn finish_writes_partial_batch_and_dimensions() {
        let conn = scratch_conn();
        let mut loader = BatchLoader::new(&conn);
        loader
            .push(record("Italy", "BA.2", 1, &[("S", "D614G"), ("N", "R203K")]))
            .unwrap();
        loader.push(record("France", "BA.5", 2, &[])).unwrap();
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM seq_db.sequences"), 0);

        let summary = loader.finish().unwrap();
        assert_eq!(summary.flushes, 1);
        assert_eq!(summary.lineages, 2);
        assert_eq!(summary.proteins, 2);
        // One continent plus two countries.
        assert_eq!(summary.locations, 3);
        assert_eq!(count(&conn, "SELECT COUNT(*) FROM sub_db.substitutions"), 2);
        let path: String = conn
            .query_row(
                "SELECT path FROM locations WHERE granularity = 1 AND location_id = 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(path, "Europe/France");
    }
}
