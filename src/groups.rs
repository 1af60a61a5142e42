use std::collections::{BTreeMap, BTreeSet};

use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};
use serde::Serialize;

use crate::domain::{EpochDay, Granularity, WEEK_DAYS, WeekWindow};
use crate::error::TrendsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationScope {
    pub granularity: Granularity,
    pub location_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineageAvailability {
    pub lineage: String,
    pub sequences: u64,
}

pub fn lineage_availability(
    conn: &Connection,
    location: Option<LocationScope>,
    end: Option<EpochDay>,
) -> Result<Vec<LineageAvailability>, TrendsError> {
    // Continent level by default, so each sequence counts once.
    let mut predicate = String::from("a.granularity = ?");
    let mut values = Vec::new();
    match location {
        Some(scope) => {
            values.push(Value::Integer(scope.granularity.code()));
            predicate.push_str(" AND a.location_id = ?");
            values.push(Value::Integer(i64::from(scope.location_id)));
        }
        None => values.push(Value::Integer(Granularity::Continent.code())),
    }

    let mut having = String::new();
    if let Some(end) = end {
        let period_start = end.offset(-4 * WEEK_DAYS);
        let last_week = WeekWindow::ending(end);
        predicate.push_str(" AND a.date > ? AND a.date <= ?");
        values.push(Value::Integer(i64::from(period_start.value())));
        values.push(Value::Integer(i64::from(end.value())));
        having = String::from(" HAVING SUM(CASE WHEN a.date > ? THEN a.count ELSE 0 END) > 0");
        values.push(Value::Integer(i64::from(last_week.after.value())));
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT l.lineage, SUM(a.count)
         FROM aggr_sequences AS a
         JOIN lineages AS l ON l.lineage_id = a.lineage_id
         WHERE {predicate}
         GROUP BY a.lineage_id{having}
         ORDER BY l.lineage"
    ))?;
    let lineages = stmt
        .query_map(params_from_iter(values), |row| {
            Ok(LineageAvailability {
                lineage: row.get(0)?,
                sequences: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lineages)
}

pub const OTHERS: &str = "Others";

// Share of a day's sequences a lineage must exceed to be reported by name.
const DAILY_SHARE_THRESHOLD: f64 = 0.10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyLineageCounts {
    pub date: EpochDay,
    pub total: u64,
    pub lineages: BTreeMap<String, u64>,
}

pub fn daily_lineage_breakdown(
    conn: &Connection,
    location: LocationScope,
    begin: EpochDay,
    end: EpochDay,
) -> Result<Vec<DailyLineageCounts>, TrendsError> {
    let mut stmt = conn.prepare_cached(
        "SELECT a.date, l.lineage, SUM(a.count)
         FROM aggr_sequences AS a
         JOIN lineages AS l ON l.lineage_id = a.lineage_id
         WHERE a.granularity = ?1 AND a.location_id = ?2 AND a.date >= ?3 AND a.date <= ?4
         GROUP BY a.date, a.lineage_id
         ORDER BY a.date",
    )?;
    let rows = stmt
        .query_map(
            params![
                location.granularity.code(),
                location.location_id,
                begin.value(),
                end.value()
            ],
            |row| {
                Ok((
                    EpochDay::new(row.get(0)?),
                    row.get::<_, String>(1)?,
                    row.get::<_, u64>(2)?,
                ))
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let mut per_day: BTreeMap<EpochDay, Vec<(String, u64)>> = BTreeMap::new();
    for (date, lineage, count) in rows {
        per_day.entry(date).or_default().push((lineage, count));
    }

    Ok(per_day
        .into_iter()
        .map(|(date, counts)| {
            let total: u64 = counts.iter().map(|(_, count)| count).sum();
            let threshold = DAILY_SHARE_THRESHOLD * total as f64;
            let mut lineages = BTreeMap::new();
            for (lineage, count) in counts {
                let key = if count as f64 > threshold {
                    lineage
                } else {
                    OTHERS.to_string()
                };
                *lineages.entry(key).or_insert(0) += count;
            }
            DailyLineageCounts {
                date,
                total,
                lineages,
            }
        })
        .collect())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LineageGroups {
    pub items: Vec<String>,
    pub groups: BTreeMap<String, Vec<String>>,
    pub all_lineages: BTreeSet<String>,
}

fn group_parent(name: &str) -> Option<&str> {
    name.strip_suffix('*')
        .map(|parent| parent.strip_suffix('.').unwrap_or(parent))
}

pub fn expand_groups<S: AsRef<str>>(
    observed: &[S],
    names: &[String],
) -> Result<LineageGroups, TrendsError> {
    let mut result = LineageGroups::default();
    for raw in names {
        let name = raw.trim();
        if name.is_empty() {
            return Err(TrendsError::InvalidLineages(
                "empty lineage name".to_string(),
            ));
        }
        let Some(parent) = group_parent(name) else {
            if !result.items.iter().any(|item| item == name) {
                result.items.push(name.to_string());
            }
            result.all_lineages.insert(name.to_string());
            continue;
        };
        if parent.is_empty() || parent.contains('*') {
            return Err(TrendsError::InvalidLineages(name.to_string()));
        }

        let prefix = format!("{parent}.");
        let mut members: BTreeSet<String> = observed
            .iter()
            .map(AsRef::as_ref)
            .filter(|candidate| candidate.starts_with(&prefix))
            .map(str::to_string)
            .collect();
        members.insert(parent.to_string());

        result.all_lineages.extend(members.iter().cloned());
        result
            .groups
            .insert(name.to_string(), members.into_iter().collect());
    }
    Ok(result)
}

pub fn resolve_lineage_groups(
    conn: &Connection,
    location: LocationScope,
    end: EpochDay,
    names: &[String],
) -> Result<LineageGroups, TrendsError> {
    let observed: Vec<String> = if names.iter().any(|name| group_parent(name.trim()).is_some()) {
        lineage_availability(conn, Some(location), Some(end))?
            .into_iter()
            .map(|entry| entry.lineage)
            .collect()
    } else {
        Vec::new()
    };
    expand_groups(&observed, names)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn star_group_expands_on_dot_boundary() {
        let observed = ["BA.2", "BA.2.12.1", "BA.2.75", "BA.20", "BA.5"];
        let groups = expand_groups(&observed, &names(&["BA.2*"])).unwrap();
        assert!(groups.items.is_empty());
        assert_eq!(
            groups.groups["BA.2*"],
            names(&["BA.2", "BA.2.12.1", "BA.2.75"])
        );
        assert_eq!(groups.all_lineages.len(), 3);
    }

    #[test]
    fn parent_is_kept_without_observations() {
        let groups = expand_groups(&["XBB.1.5"], &names(&["BQ.1*", "XBB.*"])).unwrap();
        assert_eq!(groups.groups["BQ.1*"], names(&["BQ.1"]));
        assert_eq!(groups.groups["XBB.*"], names(&["XBB", "XBB.1.5"]));
    }

    #[test]
    fn literals_and_groups_share_the_union() {
        let groups = expand_groups(&["BA.2.75"], &names(&["BA.5", "BA.2*", "BA.5"])).unwrap();
        assert_eq!(groups.items, names(&["BA.5"]));
        assert_eq!(
            groups.all_lineages.into_iter().collect::<Vec<_>>(),
            names(&["BA.2", "BA.2.75", "BA.5"])
        );
    }

    #[test]
    fn small_daily_shares_fold_into_others() {
        let conn = Connection::open_in_memory().unwrap();
        crate::schema::create_store_tables(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO lineages VALUES (0, 'BA.2'), (1, 'BA.5'), (2, 'XBB'), (3, 'BQ.1');
             INSERT INTO aggr_sequences VALUES
                 (10, 0, 1, 0, 18), (10, 1, 1, 0, 1), (10, 2, 1, 0, 1),
                 (11, 0, 1, 0, 9), (11, 3, 1, 0, 1),
                 (12, 0, 1, 0, 4), (12, 1, 1, 0, 1),
                 (11, 1, 1, 1, 50);",
        )
        .unwrap();
        let scope = LocationScope {
            granularity: Granularity::Country,
            location_id: 0,
        };

        let days =
            daily_lineage_breakdown(&conn, scope, EpochDay::new(10), EpochDay::new(11)).unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].total, 20);
        assert_eq!(
            days[0].lineages.iter().map(|(k, v)| (k.as_str(), *v)).collect::<Vec<_>>(),
            vec![("BA.2", 18), (OTHERS, 2)]
        );
        // One of ten is exactly 10%, which is not above the threshold.
        assert_eq!(days[1].lineages.get("BQ.1"), None);
        assert_eq!(days[1].lineages.get(OTHERS), Some(&1));
    }

    #[test]
    fn malformed_names_are_rejected() {
        let observed: [&str; 0] = [];
        assert_matches!(
            expand_groups(&observed, &names(&["*"])),
            Err(TrendsError::InvalidLineages(_))
        );
        assert_matches!(
            expand_groups(&observed, &names(&[" "])),
            Err(TrendsError::InvalidLineages(_))
        );
    }
}
