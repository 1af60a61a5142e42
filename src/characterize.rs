use std::collections::BTreeSet;

use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};
use serde::Serialize;

use crate::domain::{Granularity, MutationKey};
use crate::error::TrendsError;

pub fn is_characterizing(hits: u64, total: u64) -> bool {
    total > 0 && 2 * hits >= total
}

// Reads the scratch tables, so it must run before they are detached.
pub fn characterize(conn: &Connection) -> Result<usize, TrendsError> {
    let tx = conn.unchecked_transaction()?;
    let mut written = 0;
    {
        let mut select = tx.prepare(
            "WITH totals AS (
                 SELECT lineage_id, COUNT(*) AS total
                 FROM seq_db.sequences
                 GROUP BY lineage_id
             ),
             hits AS (
                 SELECT s.lineage_id, m.protein_id, m.mutation, COUNT(*) AS hits
                 FROM sub_db.substitutions AS m
                 JOIN seq_db.sequences AS s ON s.sequence_id = m.sequence_id
                 GROUP BY s.lineage_id, m.protein_id, m.mutation
             )
             SELECT h.lineage_id, h.protein_id, h.mutation, h.hits, t.total
             FROM hits AS h
             JOIN totals AS t ON t.lineage_id = h.lineage_id",
        )?;
        let mut insert = tx.prepare(
            "INSERT INTO lineage_characterization (lineage_id, protein_id, mutation)
             VALUES (?1, ?2, ?3)",
        )?;

        let mut rows = select.query([])?;
        while let Some(row) = rows.next()? {
            let hits: u64 = row.get(3)?;
            let total: u64 = row.get(4)?;
            if !is_characterizing(hits, total) {
                continue;
            }
            let lineage_id: i64 = row.get(0)?;
            let protein_id: i64 = row.get(1)?;
            let mutation: String = row.get(2)?;
            insert.execute(params![lineage_id, protein_id, mutation])?;
            written += 1;
        }
    }
    tx.commit()?;
    Ok(written)
}

pub fn characterizing_mutations(
    conn: &Connection,
    lineages: &[String],
) -> Result<BTreeSet<MutationKey>, TrendsError> {
    if lineages.is_empty() {
        return Ok(BTreeSet::new());
    }
    let placeholders = vec!["?"; lineages.len()].join(", ");
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT p.protein, c.mutation
         FROM lineage_characterization AS c
         JOIN lineages AS l ON l.lineage_id = c.lineage_id
         JOIN proteins AS p ON p.protein_id = c.protein_id
         WHERE l.lineage IN ({placeholders})"
    ))?;
    let values = lineages.iter().map(|name| Value::Text(name.clone()));
    let keys = stmt
        .query_map(params_from_iter(values), |row| {
            Ok(MutationKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(keys)
}

pub fn characterized_lineages(
    conn: &Connection,
    key: &MutationKey,
) -> Result<Vec<String>, TrendsError> {
    let mut stmt = conn.prepare(
        "SELECT l.lineage
         FROM lineage_characterization AS c
         JOIN proteins AS p ON p.protein_id = c.protein_id
         JOIN lineages AS l ON l.lineage_id = c.lineage_id
         WHERE p.protein = ?1 AND c.mutation = ?2
         ORDER BY l.lineage",
    )?;
    let lineages = stmt
        .query_map(params![key.protein, key.mutation], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(lineages)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineageShare {
    pub lineage: String,
    pub count: u64,
    pub percentage: f64,
}

pub fn mutation_history(
    conn: &Connection,
    key: &MutationKey,
) -> Result<Vec<LineageShare>, TrendsError> {
    // Continent level covers every sequence exactly once.
    let mut stmt = conn.prepare(
        "SELECT l.lineage, SUM(a.count) AS total
         FROM aggr_substitutions AS a
         JOIN proteins AS p ON p.protein_id = a.protein_id
         JOIN lineages AS l ON l.lineage_id = a.lineage_id
         WHERE a.granularity = ?1 AND p.protein = ?2 AND a.mutation = ?3
         GROUP BY a.lineage_id
         HAVING SUM(a.count) > 0
         ORDER BY total DESC, l.lineage",
    )?;
    let counts = stmt
        .query_map(
            params![Granularity::Continent.code(), key.protein, key.mutation],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let total: u64 = counts.iter().map(|(_, count)| count).sum();
    Ok(counts
        .into_iter()
        .map(|(lineage, count)| LineageShare {
            lineage,
            count,
            percentage: 100.0 * count as f64 / total as f64,
        })
        .collect())
}
