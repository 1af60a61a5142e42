use std::collections::HashMap;

use rusqlite::types::Value;
use rusqlite::{Connection, params_from_iter};
use serde::Serialize;

use crate::config::validate_support;
use crate::domain::{EpochDay, MutationKey, WeekWindow};
use crate::error::TrendsError;
use crate::groups::LocationScope;
use crate::stats::{self, Correction, PValue};

#[derive(Debug, Clone)]
pub struct TrendQuery<'a> {
    pub location: LocationScope,
    pub lineages: Option<&'a [u32]>,
    pub end: EpochDay,
    pub min_support: f64,
    pub correction: Correction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendRow {
    pub key: String,
    pub protein: String,
    pub mutation: String,
    pub slope: f64,
    pub frequencies: [f64; 4],
    pub counts: [u64; 4],
    pub p_with_vs_total: PValue,
    pub p_without_vs_total: PValue,
    pub p_with_vs_without: PValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendReport {
    pub windows: [WeekWindow; 4],
    pub week_totals: [u64; 4],
    pub correction: Correction,
    pub rows: Vec<TrendRow>,
}

struct ScopeFilter {
    predicate: String,
    values: Vec<Value>,
}

impl ScopeFilter {
    fn new(location: LocationScope, lineages: Option<&[u32]>, window: WeekWindow) -> Self {
        let mut predicate =
            String::from("granularity = ? AND location_id = ? AND date > ? AND date <= ?");
        let mut values = vec![
            Value::Integer(location.granularity.code()),
            Value::Integer(i64::from(location.location_id)),
            Value::Integer(i64::from(window.after.value())),
            Value::Integer(i64::from(window.through.value())),
        ];
        if let Some(ids) = lineages {
            let placeholders = vec!["?"; ids.len()].join(", ");
            predicate.push_str(&format!(" AND lineage_id IN ({placeholders})"));
            values.extend(ids.iter().map(|id| Value::Integer(i64::from(*id))));
        }
        Self { predicate, values }
    }
}

fn week_total(conn: &Connection, filter: ScopeFilter) -> Result<u64, TrendsError> {
    let sql = format!(
        "SELECT COALESCE(SUM(count), 0) FROM aggr_sequences WHERE {}",
        filter.predicate
    );
    let total = conn.query_row(&sql, params_from_iter(filter.values), |row| row.get(0))?;
    Ok(total)
}

fn week_mutations(
    conn: &Connection,
    mut filter: ScopeFilter,
    floor: Option<f64>,
) -> Result<HashMap<MutationKey, u64>, TrendsError> {
    let having = match floor {
        Some(floor) => {
            filter.values.push(Value::Real(floor));
            " HAVING SUM(a.count) >= ?"
        }
        None => "",
    };
    let sql = format!(
        "SELECT p.protein, a.mutation, SUM(a.count)
         FROM aggr_substitutions AS a
         JOIN proteins AS p ON p.protein_id = a.protein_id
         WHERE {}
         GROUP BY a.protein_id, a.mutation{having}",
        filter.predicate
    );
    let mut stmt = conn.prepare(&sql)?;
    let counts = stmt
        .query_map(params_from_iter(filter.values), |row| {
            Ok((
                MutationKey::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                row.get::<_, u64>(2)?,
            ))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(counts)
}

pub fn frequency(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * count as f64 / total as f64
    }
}

pub fn support_floor(min_support: f64, last_week_total: u64) -> f64 {
    (min_support * last_week_total as f64).max(1.0)
}

pub fn trend_row(key: MutationKey, counts: [u64; 4], totals: [u64; 4]) -> TrendRow {
    let frequencies: [f64; 4] = std::array::from_fn(|i| frequency(counts[i], totals[i]));
    let without: [u64; 4] = std::array::from_fn(|i| totals[i].saturating_sub(counts[i]));

    TrendRow {
        key: key.to_string(),
        slope: stats::ols_slope(&frequencies),
        frequencies,
        counts,
        p_with_vs_total: stats::chi_square_independence(&[&counts, &totals]),
        p_without_vs_total: stats::chi_square_independence(&[&without, &totals]),
        p_with_vs_without: stats::chi_square_independence(&[&counts, &without]),
        protein: key.protein,
        mutation: key.mutation,
    }
}

fn correct_rows(rows: &mut [TrendRow], correction: Correction) {
    let mut family: Vec<PValue> = rows
        .iter()
        .flat_map(|row| {
            [
                row.p_with_vs_total,
                row.p_without_vs_total,
                row.p_with_vs_without,
            ]
        })
        .collect();
    stats::correct(&mut family, correction);
    for (row, corrected) in rows.iter_mut().zip(family.chunks_exact(3)) {
        row.p_with_vs_total = corrected[0];
        row.p_without_vs_total = corrected[1];
        row.p_with_vs_without = corrected[2];
    }
}

pub fn compute_trend(conn: &Connection, query: &TrendQuery<'_>) -> Result<TrendReport, TrendsError> {
    validate_support(query.min_support)?;
    let windows = WeekWindow::four_weeks_ending(query.end);

    if query.lineages.is_some_and(<[u32]>::is_empty) {
        return Ok(TrendReport {
            windows,
            week_totals: [0; 4],
            correction: query.correction,
            rows: Vec::new(),
        });
    }

    let filter = |window: WeekWindow| ScopeFilter::new(query.location, query.lineages, window);

    let mut week_totals = [0u64; 4];
    for (total, window) in week_totals.iter_mut().zip(windows) {
        *total = week_total(conn, filter(window))?;
    }

    let floor = support_floor(query.min_support, week_totals[3]);
    let target = week_mutations(conn, filter(windows[3]), Some(floor))?;
    let mut earlier = Vec::with_capacity(3);
    for window in &windows[..3] {
        earlier.push(week_mutations(conn, filter(*window), None)?);
    }

    let mut keys: Vec<MutationKey> = target.keys().cloned().collect();
    keys.sort();

    let mut rows: Vec<TrendRow> = keys
        .into_iter()
        .map(|key| {
            let counts = [
                earlier[0].get(&key).copied().unwrap_or(0),
                earlier[1].get(&key).copied().unwrap_or(0),
                earlier[2].get(&key).copied().unwrap_or(0),
                target[&key],
            ];
            trend_row(key, counts, week_totals)
        })
        .collect();
    correct_rows(&mut rows, query.correction);

    tracing::debug!(
        end = %query.end,
        ?week_totals,
        mutations = rows.len(),
        "trend computed"
    );
    Ok(TrendReport {
        windows,
        week_totals,
        correction: query.correction,
        rows,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineageBreakdownRow {
    pub lineage: String,
    pub counts: [u64; 4],
    pub frequencies: [f64; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationBreakdown {
    pub key: String,
    pub windows: [WeekWindow; 4],
    pub mutation_totals: [u64; 4],
    pub rows: Vec<LineageBreakdownRow>,
}

pub fn mutation_breakdown(
    conn: &Connection,
    location: LocationScope,
    end: EpochDay,
    key: &MutationKey,
) -> Result<MutationBreakdown, TrendsError> {
    let windows = WeekWindow::four_weeks_ending(end);
    let mut per_lineage: HashMap<String, [u64; 4]> = HashMap::new();

    for (week, window) in windows.iter().enumerate() {
        let mut filter = ScopeFilter::new(location, None, *window);
        filter.values.push(Value::Text(key.protein.clone()));
        filter.values.push(Value::Text(key.mutation.clone()));
        let sql = format!(
            "SELECT l.lineage, SUM(a.count)
             FROM aggr_substitutions AS a
             JOIN proteins AS p ON p.protein_id = a.protein_id
             JOIN lineages AS l ON l.lineage_id = a.lineage_id
             WHERE {} AND p.protein = ? AND a.mutation = ?
             GROUP BY a.lineage_id",
            filter.predicate
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(filter.values))?;
        while let Some(row) = rows.next()? {
            let lineage: String = row.get(0)?;
            let count: u64 = row.get(1)?;
            per_lineage.entry(lineage).or_default()[week] = count;
        }
    }

    let mutation_totals: [u64; 4] =
        std::array::from_fn(|week| per_lineage.values().map(|counts| counts[week]).sum());
    let mut rows: Vec<LineageBreakdownRow> = per_lineage
        .into_iter()
        .map(|(lineage, counts)| LineageBreakdownRow {
            lineage,
            frequencies: std::array::from_fn(|i| frequency(counts[i], mutation_totals[i])),
            counts,
        })
        .collect();
    rows.sort_by(|a, b| a.lineage.cmp(&b.lineage));

    Ok(MutationBreakdown {
        key: key.to_string(),
        windows,
        mutation_totals,
        rows,
    })
}
