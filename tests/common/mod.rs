#![allow(dead_code)]

use std::io::Cursor;

use camino::Utf8PathBuf;
use tempfile::TempDir;

use kira_variant_trends::app::App;
use kira_variant_trends::output::JsonOutput;
use kira_variant_trends::pipeline::{IngestOutcome, IngestRequest};
use kira_variant_trends::store::Store;

pub const GISAID_HEADER: &str = "Virus name\tCollection date\tLocation\tSequence length\tPango lineage\tAA Substitutions\tN-Content";

/// One accepted GISAID row; `subs` are `PROTEIN_MUTATION` names.
pub fn gisaid_row(location: &str, date: &str, lineage: &str, subs: &[&str]) -> String {
    format!(
        "hCoV-19/test\t{date}\t{location}\t29800\t{lineage}\t({})\t0.001",
        subs.join(",")
    )
}

pub fn gisaid_tsv(rows: &[String]) -> String {
    let mut tsv = String::from(GISAID_HEADER);
    tsv.push('\n');
    for row in rows {
        tsv.push_str(row);
        tsv.push('\n');
    }
    tsv
}

pub fn temp_store() -> (TempDir, Store) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("store")).unwrap();
    (temp, Store::at(root))
}

pub fn ingest(app: &App, tsv: &str, request: &IngestRequest) -> IngestOutcome {
    app.ingest(Cursor::new(tsv.to_string()), request, &JsonOutput)
        .unwrap()
}
