use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, TryLockError};
use std::time::Duration;

use flate2::read::MultiGzDecoder;
use rusqlite::Connection;
use serde::Serialize;

use crate::characterize::{self, LineageShare};
use crate::domain::{EpochDay, Granularity, MutationKey};
use crate::error::TrendsError;
use crate::groups::{self, DailyLineageCounts, LineageAvailability, LineageGroups, LocationScope};
use crate::pipeline::{self, IngestOutcome, IngestRequest};
use crate::snapshot::{DatasetInfo, LocationInfo, Snapshot};
use crate::stats::Correction;
use crate::store::Store;
use crate::trend::{self, MutationBreakdown, TrendQuery, TrendReport};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(elapsed_ms = elapsed.as_millis(), "{}", event.message),
            None => tracing::info!("{}", event.message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocationQuery {
    pub granularity: Granularity,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct TrendRequest {
    pub location: LocationQuery,
    pub lineages: Option<Vec<String>>,
    pub end: EpochDay,
    pub min_support: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineageAnalysis {
    pub groups: LineageGroups,
    pub characterizing_mutations: Vec<String>,
    pub trend: TrendReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct MutationHistory {
    pub key: String,
    pub history: Vec<LineageShare>,
    pub characterized_lineages: Vec<String>,
}

pub struct App {
    store: Store,
    correction: Correction,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
}

impl App {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            correction: Correction::default(),
            snapshot: RwLock::new(None),
        }
    }

    pub fn with_correction(mut self, correction: Correction) -> Self {
        self.correction = correction;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn ingest<R: BufRead>(
        &self,
        input: R,
        request: &IngestRequest,
        sink: &dyn ProgressSink,
    ) -> Result<IngestOutcome, TrendsError> {
        let mut guard = self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let outcome = pipeline::ingest(&self.store, input, request, sink)?;
        if matches!(outcome, IngestOutcome::Completed(_)) {
            *guard = None;
        }
        Ok(outcome)
    }

    pub fn ingest_path(
        &self,
        path: &Path,
        request: &IngestRequest,
        sink: &dyn ProgressSink,
    ) -> Result<IngestOutcome, TrendsError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; opening {}", path.display()),
            elapsed: None,
        });
        let input = open_input(path)?;
        self.ingest(input, request, sink)
    }

    pub fn snapshot(&self) -> Result<Arc<Snapshot>, TrendsError> {
        {
            let guard = match self.snapshot.try_read() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => return Err(TrendsError::Unavailable),
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            };
            if let Some(snapshot) = guard.as_ref() {
                return Ok(Arc::clone(snapshot));
            }
        }

        let conn = self.store.open_read()?;
        let snapshot = Arc::new(Snapshot::load(&conn)?);
        if let Ok(mut guard) = self.snapshot.try_write() {
            *guard = Some(Arc::clone(&snapshot));
        }
        Ok(snapshot)
    }

    fn read_session(&self) -> Result<(Arc<Snapshot>, Connection), TrendsError> {
        let snapshot = self.snapshot()?;
        let conn = self.store.open_read()?;
        Ok((snapshot, conn))
    }

    fn location_scope(
        snapshot: &Snapshot,
        location: &LocationQuery,
    ) -> Result<LocationScope, TrendsError> {
        let info = snapshot.resolve_location(location.granularity, &location.name)?;
        Ok(LocationScope {
            granularity: info.granularity,
            location_id: info.id,
        })
    }

    pub fn compute_trend(&self, request: &TrendRequest) -> Result<TrendReport, TrendsError> {
        let (snapshot, conn) = self.read_session()?;
        let location = Self::location_scope(&snapshot, &request.location)?;
        let lineage_ids = request
            .lineages
            .as_ref()
            .map(|names| snapshot.lineage_ids(names));
        trend::compute_trend(
            &conn,
            &TrendQuery {
                location,
                lineages: lineage_ids.as_deref(),
                end: request.end,
                min_support: request.min_support,
                correction: self.correction,
            },
        )
    }

    pub fn characterizing_mutations(
        &self,
        lineages: &[String],
    ) -> Result<BTreeSet<MutationKey>, TrendsError> {
        let (_, conn) = self.read_session()?;
        characterize::characterizing_mutations(&conn, lineages)
    }

    pub fn resolve_lineage_groups(
        &self,
        location: &LocationQuery,
        end: EpochDay,
        names: &[String],
    ) -> Result<LineageGroups, TrendsError> {
        let (snapshot, conn) = self.read_session()?;
        let scope = Self::location_scope(&snapshot, location)?;
        groups::resolve_lineage_groups(&conn, scope, end, names)
    }

    pub fn lineage_analysis(
        &self,
        request: &TrendRequest,
    ) -> Result<LineageAnalysis, TrendsError> {
        let names = request.lineages.clone().unwrap_or_default();
        let groups = self.resolve_lineage_groups(&request.location, request.end, &names)?;
        let members: Vec<String> = groups.all_lineages.iter().cloned().collect();
        let characterizing_mutations = self
            .characterizing_mutations(&members)?
            .iter()
            .map(ToString::to_string)
            .collect();
        let trend = self.compute_trend(&TrendRequest {
            lineages: Some(members),
            ..request.clone()
        })?;
        Ok(LineageAnalysis {
            groups,
            characterizing_mutations,
            trend,
        })
    }

    pub fn lineage_availability(
        &self,
        location: Option<&LocationQuery>,
        end: Option<EpochDay>,
    ) -> Result<Vec<LineageAvailability>, TrendsError> {
        let (snapshot, conn) = self.read_session()?;
        let scope = location
            .map(|location| Self::location_scope(&snapshot, location))
            .transpose()?;
        groups::lineage_availability(&conn, scope, end)
    }

    pub fn daily_lineage_breakdown(
        &self,
        location: &LocationQuery,
        begin: EpochDay,
        end: EpochDay,
    ) -> Result<Vec<DailyLineageCounts>, TrendsError> {
        let (snapshot, conn) = self.read_session()?;
        let scope = Self::location_scope(&snapshot, location)?;
        groups::daily_lineage_breakdown(&conn, scope, begin, end)
    }

    pub fn mutation_history(&self, key: &MutationKey) -> Result<MutationHistory, TrendsError> {
        let (_, conn) = self.read_session()?;
        Ok(MutationHistory {
            key: key.to_string(),
            history: characterize::mutation_history(&conn, key)?,
            characterized_lineages: characterize::characterized_lineages(&conn, key)?,
        })
    }

    pub fn mutation_breakdown(
        &self,
        location: &LocationQuery,
        end: EpochDay,
        key: &MutationKey,
    ) -> Result<MutationBreakdown, TrendsError> {
        let (snapshot, conn) = self.read_session()?;
        let scope = Self::location_scope(&snapshot, location)?;
        trend::mutation_breakdown(&conn, scope, end, key)
    }

    pub fn dataset_info(&self) -> Result<DatasetInfo, TrendsError> {
        Ok(self.snapshot()?.info().clone())
    }

    pub fn locations(&self, granularity: Granularity) -> Result<Vec<LocationInfo>, TrendsError> {
        Ok(self.snapshot()?.locations(granularity).cloned().collect())
    }
}

pub fn open_input(path: &Path) -> Result<Box<dyn BufRead>, TrendsError> {
    let file = File::open(path)
        .map_err(|err| TrendsError::Input(format!("{}: {err}", path.display())))?;
    let gzipped = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
    if gzipped {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}
