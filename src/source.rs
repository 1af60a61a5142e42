use std::collections::{BTreeSet, HashMap};
use std::io::BufRead;

use serde::Serialize;

use crate::domain::{DateRange, EpochDay, SourceProfile};
use crate::error::TrendsError;

pub const UNKNOWN_LINEAGE: &str = "unknown";

// Accepted genome length is strictly between these bounds, and the missing-base
// fraction strictly below MAX_MISSING_FRACTION.
pub const MIN_GENOME_LENGTH: u32 = 29_000;
pub const MAX_GENOME_LENGTH: u32 = 30_000;

pub const MAX_MISSING_FRACTION: f64 = 0.05;

#[derive(Debug, Clone, PartialEq)]
pub struct SourceRecord {
    pub continent: String,
    pub country: Option<String>,
    pub region: Option<String>,
    pub lineage: String,
    pub date: EpochDay,
    pub substitutions: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    pub countries: BTreeSet<String>,
    pub date_range: DateRange,
}

impl SourceFilter {
    fn accepts_country(&self, country: Option<&str>) -> bool {
        if self.countries.is_empty() {
            return true;
        }
        country.is_some_and(|name| self.countries.contains(&name.to_lowercase()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowStats {
    pub rows: u64,
    pub accepted: u64,
    pub filtered_country: u64,
    pub bad_date: u64,
    pub out_of_window: u64,
    pub low_quality: u64,
    pub malformed: u64,
}

impl RowStats {
    pub fn skipped(&self) -> u64 {
        self.rows - self.accepted
    }
}

pub fn required_columns(profile: SourceProfile) -> &'static [&'static str] {
    match profile {
        SourceProfile::Gisaid => &[
            "Location",
            "Collection date",
            "Pango lineage",
            "Sequence length",
            "N-Content",
            "AA Substitutions",
        ],
        SourceProfile::Nextstrain => &[
            "region",
            "country",
            "division",
            "date",
            "pango_lineage",
            "length",
            "missing_data",
            "aaSubstitutions",
        ],
    }
}

#[derive(Debug, Clone, Copy)]
enum Layout {
    Gisaid {
        location: usize,
        date: usize,
        lineage: usize,
        length: usize,
        n_content: usize,
        substitutions: usize,
    },
    Nextstrain {
        continent: usize,
        country: usize,
        division: usize,
        date: usize,
        lineage: usize,
        length: usize,
        missing_data: usize,
        substitutions: usize,
    },
}

impl Layout {
    fn from_header(profile: SourceProfile, header: &str) -> Result<Self, TrendsError> {
        let positions: HashMap<&str, usize> = header
            .trim_end_matches(['\r', '\n'])
            .split('\t')
            .enumerate()
            .map(|(idx, name)| (name.trim(), idx))
            .collect();

        let missing: Vec<String> = required_columns(profile)
            .iter()
            .filter(|name| !positions.contains_key(**name))
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(TrendsError::MissingColumns { profile, missing });
        }

        let col = |name: &str| positions[name];
        Ok(match profile {
            SourceProfile::Gisaid => Layout::Gisaid {
                location: col("Location"),
                date: col("Collection date"),
                lineage: col("Pango lineage"),
                length: col("Sequence length"),
                n_content: col("N-Content"),
                substitutions: col("AA Substitutions"),
            },
            SourceProfile::Nextstrain => Layout::Nextstrain {
                continent: col("region"),
                country: col("country"),
                division: col("division"),
                date: col("date"),
                lineage: col("pango_lineage"),
                length: col("length"),
                missing_data: col("missing_data"),
                substitutions: col("aaSubstitutions"),
            },
        })
    }

    fn width(&self) -> usize {
        let max = match *self {
            Layout::Gisaid {
                location,
                date,
                lineage,
                length,
                n_content,
                substitutions,
            } => [location, date, lineage, length, n_content, substitutions]
                .into_iter()
                .max(),
            Layout::Nextstrain {
                continent,
                country,
                division,
                date,
                lineage,
                length,
                missing_data,
                substitutions,
            } => [
                continent,
                country,
                division,
                date,
                lineage,
                length,
                missing_data,
                substitutions,
            ]
            .into_iter()
            .max(),
        };
        max.unwrap_or(0) + 1
    }

    fn missing_mark(&self) -> &'static str {
        match self {
            Layout::Gisaid { .. } => "",
            Layout::Nextstrain { .. } => "?",
        }
    }
}

struct RawRow<'a> {
    continent: Option<&'a str>,
    country: Option<&'a str>,
    region: Option<&'a str>,
    date: &'a str,
    lineage: &'a str,
    length: &'a str,
    missing_fraction: Option<f64>,
    substitutions: &'a str,
    separator: char,
}

enum Decoded {
    Record(SourceRecord),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy)]
enum SkipReason {
    Country,
    Date,
    Window,
    Quality,
    Malformed,
}

pub struct MetadataReader<R> {
    input: R,
    profile: SourceProfile,
    layout: Layout,
    filter: SourceFilter,
    line: Vec<u8>,
    stats: RowStats,
    finished: bool,
}

impl<R: BufRead> MetadataReader<R> {
    pub fn new(
        mut input: R,
        profile: SourceProfile,
        filter: SourceFilter,
    ) -> Result<Self, TrendsError> {
        let mut header = String::new();
        let read = input
            .read_line(&mut header)
            .map_err(|err| TrendsError::Input(err.to_string()))?;
        if read == 0 {
            return Err(TrendsError::EmptyInput);
        }
        let layout = Layout::from_header(profile, header.trim_start_matches('\u{feff}'))?;
        Ok(Self {
            input,
            profile,
            layout,
            filter,
            line: Vec::new(),
            stats: RowStats::default(),
            finished: false,
        })
    }

    pub fn profile(&self) -> SourceProfile {
        self.profile
    }

    pub fn stats(&self) -> RowStats {
        self.stats
    }

    fn decode_line(&self) -> Decoded {
        let Ok(line) = std::str::from_utf8(&self.line) else {
            return Decoded::Skipped(SkipReason::Malformed);
        };
        let line = line.trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < self.layout.width() {
            return Decoded::Skipped(SkipReason::Malformed);
        }
        let raw = self.raw_row(&fields);
        self.filter_row(raw)
    }

    fn raw_row<'a>(&self, fields: &[&'a str]) -> RawRow<'a> {
        let mark = self.layout.missing_mark();
        let present = |value: &'a str| {
            let value = value.trim();
            (!value.is_empty() && value != mark).then_some(value)
        };

        match self.layout {
            Layout::Gisaid {
                location,
                date,
                lineage,
                length,
                n_content,
                substitutions,
            } => {
                let mut parts = fields[location].split('/').map(str::trim);
                let continent = parts.next().and_then(present);
                let country = parts.next().and_then(present);
                let region = parts.next().and_then(present);
                RawRow {
                    continent,
                    country,
                    region,
                    date: fields[date],
                    lineage: fields[lineage],
                    length: fields[length],
                    missing_fraction: fields[n_content].trim().parse().ok(),
                    substitutions: fields[substitutions],
                    separator: '_',
                }
            }
            Layout::Nextstrain {
                continent,
                country,
                division,
                date,
                lineage,
                length,
                missing_data,
                substitutions,
            } => {
                let genome_length: Option<f64> = fields[length].trim().parse().ok();
                let missing_bases: Option<f64> = fields[missing_data].trim().parse().ok();
                let missing_fraction = match (missing_bases, genome_length) {
                    (Some(bases), Some(len)) if len > 0.0 => Some(bases / len),
                    _ => None,
                };
                RawRow {
                    continent: present(fields[continent]),
                    country: present(fields[country]),
                    region: present(fields[division]),
                    date: fields[date],
                    lineage: fields[lineage],
                    length: fields[length],
                    missing_fraction,
                    substitutions: fields[substitutions],
                    separator: ':',
                }
            }
        }
    }

    fn filter_row(&self, raw: RawRow<'_>) -> Decoded {
        if !self.filter.accepts_country(raw.country) {
            return Decoded::Skipped(SkipReason::Country);
        }
        let Some(continent) = raw.continent else {
            return Decoded::Skipped(SkipReason::Malformed);
        };
        // Exports repeat the parent name when a level is unknown.
        let country = raw.country.filter(|country| *country != continent);
        let region = country.and(raw.region.filter(|region| Some(*region) != country));

        let Some(date) = EpochDay::parse_iso(raw.date) else {
            return Decoded::Skipped(SkipReason::Date);
        };
        if !self.filter.date_range.contains(date) {
            return Decoded::Skipped(SkipReason::Window);
        }

        let length: Option<u32> = raw.length.trim().parse().ok();
        let missing_fraction = raw.missing_fraction.unwrap_or(0.0);
        let passes_quality = length
            .is_some_and(|len| MIN_GENOME_LENGTH < len && len < MAX_GENOME_LENGTH)
            && missing_fraction < MAX_MISSING_FRACTION;
        if !passes_quality {
            return Decoded::Skipped(SkipReason::Quality);
        }

        let lineage = raw.lineage.trim();
        let lineage = if lineage.is_empty() || lineage == self.layout.missing_mark() {
            UNKNOWN_LINEAGE
        } else {
            lineage
        };

        Decoded::Record(SourceRecord {
            continent: continent.to_string(),
            country: country.map(str::to_string),
            region: region.map(str::to_string),
            lineage: lineage.to_string(),
            date,
            substitutions: parse_substitutions(raw.substitutions, raw.separator),
        })
    }

    fn count(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::Country => self.stats.filtered_country += 1,
            SkipReason::Date => self.stats.bad_date += 1,
            SkipReason::Window => self.stats.out_of_window += 1,
            SkipReason::Quality => self.stats.low_quality += 1,
            SkipReason::Malformed => self.stats.malformed += 1,
        }
    }
}

impl<R: BufRead> Iterator for MetadataReader<R> {
    type Item = Result<SourceRecord, TrendsError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            self.line.clear();
            match self.input.read_until(b'\n', &mut self.line) {
                Ok(0) => self.finished = true,
                Ok(_) => {
                    if self.line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    self.stats.rows += 1;
                    match self.decode_line() {
                        Decoded::Record(record) => {
                            self.stats.accepted += 1;
                            return Some(Ok(record));
                        }
                        Decoded::Skipped(reason) => self.count(reason),
                    }
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(TrendsError::Input(err.to_string())));
                }
            }
        }
        None
    }
}

// `(Spike_D614G,N_R203K)` or `S:D614G,N:R203K`; sorted, duplicates removed.
pub fn parse_substitutions(value: &str, separator: char) -> Vec<(String, String)> {
    let trimmed = value.trim().trim_start_matches('(').trim_end_matches(')');
    let mut pairs: Vec<(String, String)> = trimmed
        .split(',')
        .map(str::trim)
        .filter_map(|item| item.split_once(separator))
        .filter(|(protein, mutation)| !protein.is_empty() && !mutation.is_empty())
        .map(|(protein, mutation)| (protein.to_string(), mutation.to_string()))
        .collect();
    pairs.sort();
    pairs.dedup();
    pairs
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;

    use super::*;

    const GISAID_HEADER: &str = "Virus name\tCollection date\tLocation\tSequence length\tPango lineage\tAA Substitutions\tN-Content\n";
    const NEXTSTRAIN_HEADER: &str = "strain\tdate\tregion\tcountry\tdivision\tlength\tpango_lineage\tmissing_data\taaSubstitutions\n";

    fn gisaid(rows: &[&str], filter: SourceFilter) -> MetadataReader<Cursor<String>> {
        let mut input = GISAID_HEADER.to_string();
        for row in rows {
            input.push_str(row);
            input.push('\n');
        }
        MetadataReader::new(Cursor::new(input), SourceProfile::Gisaid, filter).unwrap()
    }

    #[test]
    fn decodes_gisaid_row() {
        let mut reader = gisaid(
            &["hCoV-19/1\t2022-03-01\tEurope / Italy / Lombardy\t29800\tBA.2\t(Spike_D614G,N_R203K,Spike_D614G)\t0.01"],
            SourceFilter::default(),
        );
        let record = reader.next().unwrap().unwrap();
        assert_eq!(record.continent, "Europe");
        assert_eq!(record.country.as_deref(), Some("Italy"));
        assert_eq!(record.region.as_deref(), Some("Lombardy"));
        assert_eq!(record.lineage, "BA.2");
        assert_eq!(record.date.to_string(), "2022-03-01");
        assert_eq!(
            record.substitutions,
            vec![
                ("N".to_string(), "R203K".to_string()),
                ("Spike".to_string(), "D614G".to_string())
            ]
        );
        assert!(reader.next().is_none());
        assert_eq!(reader.stats().accepted, 1);
    }

    #[test]
    fn skips_rows_and_counts_reasons() {
        let mut reader = gisaid(
            &[
                "a\t2022-03-01\tEurope / Italy\t28000\tBA.2\t()\t0.0",
                "b\t2022-03\tEurope / Italy\t29800\tBA.2\t()\t0.0",
                "c\t2022-03-01\tEurope / Italy\t29800\tBA.2\t()\t0.2",
                "d\t2022-03-01\tEurope / France\t29800\t\t()\t",
                "e\t2022-03-01",
            ],
            SourceFilter::default(),
        );
        let records: Vec<_> = reader.by_ref().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].lineage, UNKNOWN_LINEAGE);
        let stats = reader.stats();
        assert_eq!(stats.rows, 5);
        assert_eq!(stats.low_quality, 2);
        assert_eq!(stats.bad_date, 1);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.skipped(), 4);
    }

    #[test]
    fn quality_bounds_are_strict() {
        let mut reader = gisaid(
            &[
                "a\t2022-03-01\tEurope / Italy\t29000\tBA.2\t()\t0.0",
                "b\t2022-03-01\tEurope / Italy\t30000\tBA.2\t()\t0.0",
                "c\t2022-03-01\tEurope / Italy\t29001\tBA.2\t()\t0.05",
                "d\t2022-03-01\tEurope / Italy\t29999\tBA.2\t()\t0.0499",
            ],
            SourceFilter::default(),
        );
        let accepted = reader.by_ref().filter_map(Result::ok).count();
        assert_eq!(accepted, 1);
        assert_eq!(reader.stats().low_quality, 3);
    }

    #[test]
    fn country_and_window_filters() {
        let filter = SourceFilter {
            countries: ["italy".to_string()].into_iter().collect(),
            date_range: DateRange::new(Some("2022-03-01".parse().unwrap()), None),
        };
        let mut reader = gisaid(
            &[
                "a\t2022-03-01\tEurope / ITALY\t29800\tBA.2\t()\t0.0",
                "b\t2022-03-01\tEurope / France\t29800\tBA.2\t()\t0.0",
                "c\t2022-02-28\tEurope / Italy\t29800\tBA.2\t()\t0.0",
            ],
            filter,
        );
        let accepted = reader.by_ref().filter_map(Result::ok).count();
        assert_eq!(accepted, 1);
        assert_eq!(reader.stats().filtered_country, 1);
        assert_eq!(reader.stats().out_of_window, 1);
    }

    #[test]
    fn repeated_parent_names_collapse() {
        let mut reader = gisaid(
            &["a\t2022-03-01\tEurope / Luxembourg / Luxembourg\t29800\tBA.2\t()\t0.0"],
            SourceFilter::default(),
        );
        let record = reader.next().unwrap().unwrap();
        assert_eq!(record.country.as_deref(), Some("Luxembourg"));
        assert_eq!(record.region, None);
    }

    #[test]
    fn decodes_nextstrain_row() {
        let input = format!(
            "{NEXTSTRAIN_HEADER}x\t2022-05-02\tEurope\tItaly\t?\t29750\tBA.5\t150\tS:D614G,ORF1b:P314L\n"
        );
        let mut reader = MetadataReader::new(
            Cursor::new(input),
            SourceProfile::Nextstrain,
            SourceFilter::default(),
        )
        .unwrap();
        let record = reader.next().unwrap().unwrap();
        assert_eq!(record.region, None);
        assert_eq!(record.substitutions.len(), 2);
        assert_eq!(record.substitutions[0], ("ORF1b".to_string(), "P314L".to_string()));
    }

    #[test]
    fn nextstrain_missing_data_is_a_base_count() {
        // 1500 missing bases out of 29750 is just above the 5% limit.
        let input = format!(
            "{NEXTSTRAIN_HEADER}x\t2022-05-02\tEurope\tItaly\tLazio\t29750\t?\t1500\t\n"
        );
        let mut reader = MetadataReader::new(
            Cursor::new(input),
            SourceProfile::Nextstrain,
            SourceFilter::default(),
        )
        .unwrap();
        assert!(reader.next().is_none());
        assert_eq!(reader.stats().low_quality, 1);
    }

    #[test]
    fn invalid_utf8_row_is_counted_as_malformed() {
        let mut input = GISAID_HEADER.as_bytes().to_vec();
        input.extend_from_slice(b"a\t2022-03-01\tEurope / Italy\t29800\tBA.2\t()\t0.0\n");
        input.extend_from_slice(b"b\t2022-03-01\tSouth America / Brazil / Sa\xe3o Paulo\t29800\tBA.2\t()\t0.0\n");
        input.extend_from_slice(b"c\t2022-03-02\tEurope / Italy\t29800\tBA.5\t()\t0.0\n");
        let mut reader = MetadataReader::new(
            Cursor::new(input),
            SourceProfile::Gisaid,
            SourceFilter::default(),
        )
        .unwrap();

        let records: Vec<_> = reader.by_ref().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].lineage, "BA.5");
        let stats = reader.stats();
        assert_eq!(stats.rows, 3);
        assert_eq!(stats.malformed, 1);
    }

    #[test]
    fn missing_column_is_fatal() {
        let header = "Virus name\tLocation\tSequence length\tPango lineage\tAA Substitutions\tN-Content\n";
        let err = MetadataReader::new(
            Cursor::new(header.to_string()),
            SourceProfile::Gisaid,
            SourceFilter::default(),
        )
        .err()
        .unwrap();
        assert_matches!(
            err,
            TrendsError::MissingColumns { ref missing, .. } if missing == &vec!["Collection date".to_string()]
        );
    }

    #[test]
    fn wrong_profile_is_fatal() {
        let err = MetadataReader::new(
            Cursor::new(GISAID_HEADER.to_string()),
            SourceProfile::Nextstrain,
            SourceFilter::default(),
        )
        .err()
        .unwrap();
        assert_matches!(err, TrendsError::MissingColumns { .. });
    }

    #[test]
    fn empty_input_is_rejected() {
        let err = MetadataReader::new(
            Cursor::new(String::new()),
            SourceProfile::Gisaid,
            SourceFilter::default(),
        )
        .err()
        .unwrap();
        assert_matches!(err, TrendsError::EmptyInput);
    }
}
