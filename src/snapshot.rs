use std::collections::{BTreeMap, HashMap};

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;

use crate::domain::{EpochDay, Granularity};
use crate::error::TrendsError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocationInfo {
    pub granularity: Granularity,
    pub id: u32,
    pub name: String,
    pub path: String,
    pub parent_id: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetInfo {
    pub source: Option<String>,
    pub countries: Option<String>,
    pub begin_date: Option<String>,
    pub end_date: Option<String>,
    pub ingested_at: Option<String>,
    pub version: Option<String>,
    pub sequences: Option<u64>,
    pub last_update: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    lineages: BTreeMap<String, u32>,
    locations: Vec<LocationInfo>,
    by_path: HashMap<(Granularity, String), usize>,
    info: DatasetInfo,
    last_update: Option<EpochDay>,
}

impl Snapshot {
    pub fn load(conn: &Connection) -> Result<Self, TrendsError> {
        let mut stmt = conn.prepare("SELECT lineage_id, lineage FROM lineages")?;
        let lineages = stmt
            .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, u32>(0)?)))?
            .collect::<Result<BTreeMap<_, _>, _>>()?;

        let mut stmt = conn.prepare(
            "SELECT granularity, location_id, name, path, parent_id
             FROM locations
             ORDER BY granularity, path",
        )?;
        let mut locations = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let code: i64 = row.get(0)?;
            let Some(granularity) = Granularity::from_code(code) else {
                tracing::warn!(code, "skipping location with unknown granularity");
                continue;
            };
            locations.push(LocationInfo {
                granularity,
                id: row.get(1)?,
                name: row.get(2)?,
                path: row.get(3)?,
                parent_id: row.get(4)?,
            });
        }
        let by_path = locations
            .iter()
            .enumerate()
            .map(|(idx, loc)| ((loc.granularity, loc.path.to_lowercase()), idx))
            .collect();

        let last_update: Option<EpochDay> = conn
            .query_row("SELECT MAX(date) FROM aggr_sequences", [], |row| {
                row.get::<_, Option<i32>>(0)
            })
            .optional()?
            .flatten()
            .map(EpochDay::new);

        let mut info = DatasetInfo::default();
        let mut stmt = conn.prepare("SELECT key, value FROM dataset_info")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            match key.as_str() {
                "source" => info.source = Some(value),
                "countries" => info.countries = Some(value),
                "begin_date" => info.begin_date = Some(value),
                "end_date" => info.end_date = Some(value),
                "ingested_at" => info.ingested_at = Some(value),
                "version" => info.version = Some(value),
                "sequences" => info.sequences = value.parse().ok(),
                _ => {}
            }
        }
        info.last_update = last_update.map(|day| day.to_string());

        Ok(Self {
            lineages,
            locations,
            by_path,
            info,
            last_update,
        })
    }

    pub fn info(&self) -> &DatasetInfo {
        &self.info
    }

    pub fn last_update(&self) -> Option<EpochDay> {
        self.last_update
    }

    pub fn lineages(&self) -> impl Iterator<Item = &str> {
        self.lineages.keys().map(String::as_str)
    }

    pub fn lineage_id(&self, name: &str) -> Option<u32> {
        self.lineages.get(name).copied()
    }

    pub fn lineage_ids<S: AsRef<str>>(&self, names: &[S]) -> Vec<u32> {
        let mut ids: Vec<u32> = names
            .iter()
            .filter_map(|name| {
                let id = self.lineage_id(name.as_ref());
                if id.is_none() {
                    tracing::debug!(lineage = name.as_ref(), "lineage not in store");
                }
                id
            })
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn locations(&self, granularity: Granularity) -> impl Iterator<Item = &LocationInfo> {
        self.locations
            .iter()
            .filter(move |loc| loc.granularity == granularity)
    }

    pub fn resolve_location(
        &self,
        granularity: Granularity,
        query: &str,
    ) -> Result<&LocationInfo, TrendsError> {
        let unknown = || TrendsError::UnknownLocation {
            granularity,
            name: query.to_string(),
        };

        if query.contains('/') {
            let path = query
                .split('/')
                .map(str::trim)
                .collect::<Vec<_>>()
                .join("/")
                .to_lowercase();
            return self
                .by_path
                .get(&(granularity, path))
                .map(|&idx| &self.locations[idx])
                .ok_or_else(unknown);
        }

        let name = query.trim();
        let candidates: Vec<&LocationInfo> = self
            .locations(granularity)
            .filter(|loc| loc.name.eq_ignore_ascii_case(name))
            .collect();
        match candidates.as_slice() {
            [] => Err(unknown()),
            [single] => Ok(*single),
            many => Err(TrendsError::AmbiguousLocation {
                name: name.to_string(),
                candidates: many.iter().map(|loc| loc.path.clone()).collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::schema;

    fn snapshot() -> Snapshot {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_store_tables(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO lineages VALUES (0, 'BA.5'), (1, 'BA.2');
             INSERT INTO locations VALUES
                 (0, 0, 'Europe', 'Europe', NULL),
                 (0, 1, 'South America', 'South America', NULL),
                 (1, 0, 'Spain', 'Europe/Spain', 0),
                 (1, 1, 'Venezuela', 'South America/Venezuela', 1),
                 (2, 0, 'Valencia', 'Europe/Spain/Valencia', 0),
                 (2, 1, 'Valencia', 'South America/Venezuela/Valencia', 1);
             INSERT INTO aggr_sequences VALUES (40, 0, 0, 0, 3), (47, 1, 0, 0, 1);
             INSERT INTO dataset_info VALUES ('source', 'gisaid'), ('sequences', '4');",
        )
        .unwrap();
        Snapshot::load(&conn).unwrap()
    }

    #[test]
    fn lineages_are_sorted_by_name() {
        let snapshot = snapshot();
        assert_eq!(snapshot.lineages().collect::<Vec<_>>(), vec!["BA.2", "BA.5"]);
        assert_eq!(
            snapshot.lineage_ids(&["BA.5", "BA.2", "XBB", "BA.5"]),
            vec![0, 1]
        );
    }

    #[test]
    fn dataset_info_includes_last_update() {
        let snapshot = snapshot();
        assert_eq!(snapshot.last_update(), Some(EpochDay::new(47)));
        assert_eq!(snapshot.info().source.as_deref(), Some("gisaid"));
        assert_eq!(snapshot.info().sequences, Some(4));
        assert_eq!(snapshot.info().last_update.as_deref(), Some("2020-02-17"));
    }

    #[test]
    fn locations_resolve_by_name_or_path() {
        let snapshot = snapshot();
        let spain = snapshot
            .resolve_location(Granularity::Country, "spain")
            .unwrap();
        assert_eq!(spain.id, 0);

        let err = snapshot
            .resolve_location(Granularity::Region, "Valencia")
            .unwrap_err();
        assert_matches!(err, TrendsError::AmbiguousLocation { ref candidates, .. } if candidates.len() == 2);

        let valencia = snapshot
            .resolve_location(Granularity::Region, "South America / Venezuela / Valencia")
            .unwrap();
        assert_eq!(valencia.id, 1);

        assert_matches!(
            snapshot.resolve_location(Granularity::Continent, "Europe/Spain"),
            Err(TrendsError::UnknownLocation { .. })
        );
    }
}
