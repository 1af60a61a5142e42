use std::io::{self, Write};

use serde::Serialize;

use crate::app::{LineageAnalysis, MutationHistory};
use crate::groups::{DailyLineageCounts, LineageAvailability, LineageGroups};
use crate::pipeline::IngestOutcome;
use crate::snapshot::{DatasetInfo, LocationInfo};
use crate::trend::{MutationBreakdown, TrendReport};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_ingest(outcome: &IngestOutcome) -> io::Result<()> {
        Self::print_json(outcome)
    }

    pub fn print_trend(report: &TrendReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_analysis(analysis: &LineageAnalysis) -> io::Result<()> {
        Self::print_json(analysis)
    }

    pub fn print_characterizing(mutations: &[String]) -> io::Result<()> {
        Self::print_json(mutations)
    }

    pub fn print_groups(groups: &LineageGroups) -> io::Result<()> {
        Self::print_json(groups)
    }

    pub fn print_lineages(lineages: &[LineageAvailability]) -> io::Result<()> {
        Self::print_json(lineages)
    }

    pub fn print_daily(days: &[DailyLineageCounts]) -> io::Result<()> {
        Self::print_json(days)
    }

    pub fn print_history(history: &MutationHistory) -> io::Result<()> {
        Self::print_json(history)
    }

    pub fn print_breakdown(breakdown: &MutationBreakdown) -> io::Result<()> {
        Self::print_json(breakdown)
    }

    pub fn print_locations(locations: &[LocationInfo]) -> io::Result<()> {
        Self::print_json(locations)
    }

    pub fn print_info(info: &DatasetInfo) -> io::Result<()> {
        Self::print_json(info)
    }

    fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl crate::app::ProgressSink for JsonOutput {
    fn event(&self, _event: crate::app::ProgressEvent) {}
}
