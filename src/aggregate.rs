use rusqlite::{Connection, params};
use serde::Serialize;

use crate::domain::Granularity;
use crate::error::TrendsError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RollupSummary {
    pub sequence_rows: u64,
    pub substitution_rows: u64,
}

fn location_column(granularity: Granularity) -> &'static str {
    match granularity {
        Granularity::Continent => "continent_id",
        Granularity::Country => "country_id",
        Granularity::Region => "region_id",
    }
}

pub fn build_rollups(conn: &Connection) -> Result<RollupSummary, TrendsError> {
    let mut summary = RollupSummary::default();
    let tx = conn.unchecked_transaction()?;
    for granularity in Granularity::ALL {
        let column = location_column(granularity);

        let sequences = tx.execute(
            &format!(
                "INSERT INTO aggr_sequences (date, lineage_id, granularity, location_id, count)
                 SELECT date, lineage_id, ?1, {column}, COUNT(*)
                 FROM seq_db.sequences
                 WHERE {column} IS NOT NULL
                 GROUP BY date, lineage_id, {column}"
            ),
            params![granularity.code()],
        )?;

        let substitutions = tx.execute(
            &format!(
                "INSERT INTO aggr_substitutions
                 (date, lineage_id, granularity, location_id, protein_id, mutation, count)
                 SELECT s.date, s.lineage_id, ?1, s.{column}, m.protein_id, m.mutation, COUNT(*)
                 FROM sub_db.substitutions AS m
                 JOIN seq_db.sequences AS s ON s.sequence_id = m.sequence_id
                 WHERE s.{column} IS NOT NULL
                 GROUP BY s.date, s.lineage_id, s.{column}, m.protein_id, m.mutation"
            ),
            params![granularity.code()],
        )?;

        tracing::debug!(%granularity, sequences, substitutions, "rollup level written");
        summary.sequence_rows += sequences as u64;
        summary.substitution_rows += substitutions as u64;
    }
    tx.commit()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EpochDay;
    use crate::loader::BatchLoader;
    use crate::schema;
    use crate::source::SourceRecord;

    fn record(country: Option<&str>, region: Option<&str>, day: i32) -> SourceRecord {
        SourceRecord {
            continent: "Europe".to_string(),
            country: country.map(str::to_string),
            region: region.map(str::to_string),
            lineage: "BA.2".to_string(),
            date: EpochDay::new(day),
            substitutions: vec![("S".to_string(), "D614G".to_string())],
        }
    }

    fn sum(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn counts_are_consistent_at_every_level() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_store_tables(&conn).unwrap();
        schema::attach_scratch(&conn, ":memory:", ":memory:").unwrap();
        let mut loader = BatchLoader::new(&conn);
        loader.push(record(Some("Italy"), Some("Lazio"), 5)).unwrap();
        loader.push(record(Some("Italy"), Some("Lazio"), 5)).unwrap();
        loader.push(record(Some("Italy"), None, 5)).unwrap();
        loader.push(record(None, None, 6)).unwrap();
        loader.finish().unwrap();

        build_rollups(&conn).unwrap();

        let per_level = |level: i64| {
            sum(
                &conn,
                &format!("SELECT SUM(count) FROM aggr_sequences WHERE granularity = {level}"),
            )
        };
        assert_eq!(per_level(0), 4);
        assert_eq!(per_level(1), 3);
        assert_eq!(per_level(2), 2);

        let lazio: i64 = sum(
            &conn,
            "SELECT count FROM aggr_substitutions WHERE granularity = 2 AND date = 5",
        );
        assert_eq!(lazio, 2);
        let continent_rows = sum(
            &conn,
            "SELECT COUNT(*) FROM aggr_sequences WHERE granularity = 0",
        );
        // Day 5 and day 6 for the same lineage and continent.
        assert_eq!(continent_rows, 2);
    }
}
