use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{Datelike, NaiveDate};
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TrendsError;

// num_days_from_ce of 2020-01-01.
const EPOCH_DAYS_FROM_CE: i32 = 737_425;

pub const WEEK_DAYS: i32 = 7;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Continent,
    Country,
    Region,
}

impl Granularity {
    pub const ALL: [Granularity; 3] = [
        Granularity::Continent,
        Granularity::Country,
        Granularity::Region,
    ];

    pub fn code(self) -> i64 {
        match self {
            Granularity::Continent => 0,
            Granularity::Country => 1,
            Granularity::Region => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Granularity::Continent),
            1 => Some(Granularity::Country),
            2 => Some(Granularity::Region),
            _ => None,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Continent => write!(f, "continent"),
            Granularity::Country => write!(f, "country"),
            Granularity::Region => write!(f, "region"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceProfile {
    #[default]
    Gisaid,
    Nextstrain,
}

impl fmt::Display for SourceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceProfile::Gisaid => write!(f, "gisaid"),
            SourceProfile::Nextstrain => write!(f, "nextstrain"),
        }
    }
}

impl FromStr for SourceProfile {
    type Err = TrendsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "gisaid" => Ok(SourceProfile::Gisaid),
            "nextstrain" => Ok(SourceProfile::Nextstrain),
            _ => Err(TrendsError::InvalidSource(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpochDay(i32);

impl EpochDay {
    pub fn new(days: i32) -> Self {
        Self(days)
    }

    pub fn value(self) -> i32 {
        self.0
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self(date.num_days_from_ce() - EPOCH_DAYS_FROM_CE)
    }

    pub fn to_date(self) -> Option<NaiveDate> {
        NaiveDate::from_num_days_from_ce_opt(self.0 + EPOCH_DAYS_FROM_CE)
    }

    pub fn offset(self, days: i32) -> Self {
        Self(self.0 + days)
    }

    pub fn parse_iso(value: &str) -> Option<Self> {
        NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .ok()
            .map(Self::from_date)
    }
}

impl fmt::Display for EpochDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_date() {
            Some(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            None => write!(f, "day {}", self.0),
        }
    }
}

impl FromStr for EpochDay {
    type Err = TrendsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse_iso(value).ok_or_else(|| TrendsError::InvalidDate(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub begin: Option<EpochDay>,
    pub end: Option<EpochDay>,
}

impl DateRange {
    pub fn new(begin: Option<EpochDay>, end: Option<EpochDay>) -> Self {
        Self { begin, end }
    }

    pub fn contains(&self, day: EpochDay) -> bool {
        self.begin.is_none_or(|begin| day >= begin) && self.end.is_none_or(|end| day <= end)
    }
}

// Covers the days in (after, through].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WeekWindow {
    pub after: EpochDay,
    pub through: EpochDay,
}

impl WeekWindow {
    pub fn ending(through: EpochDay) -> Self {
        Self {
            after: through.offset(-WEEK_DAYS),
            through,
        }
    }

    pub fn four_weeks_ending(end: EpochDay) -> [WeekWindow; 4] {
        [
            WeekWindow::ending(end.offset(-3 * WEEK_DAYS)),
            WeekWindow::ending(end.offset(-2 * WEEK_DAYS)),
            WeekWindow::ending(end.offset(-WEEK_DAYS)),
            WeekWindow::ending(end),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MutationKey {
    pub protein: String,
    pub mutation: String,
}

impl MutationKey {
    pub fn new(protein: impl Into<String>, mutation: impl Into<String>) -> Self {
        Self {
            protein: protein.into(),
            mutation: mutation.into(),
        }
    }

    pub fn position(&self) -> Option<u32> {
        static POSITION: OnceLock<Regex> = OnceLock::new();
        let re = POSITION.get_or_init(|| {
            Regex::new(r"^[A-Za-z*\-]*?(\d+)").expect("position pattern is valid")
        });
        re.captures(&self.mutation)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

impl Ord for MutationKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.protein
            .cmp(&other.protein)
            .then_with(|| match (self.position(), other.position()) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| self.mutation.cmp(&other.mutation))
    }
}

impl PartialOrd for MutationKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MutationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.protein, self.mutation)
    }
}

impl FromStr for MutationKey {
    type Err = TrendsError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let (protein, mutation) = trimmed
            .split_once('_')
            .ok_or_else(|| TrendsError::InvalidMutation(value.to_string()))?;
        if protein.is_empty() || mutation.is_empty() {
            return Err(TrendsError::InvalidMutation(value.to_string()));
        }
        Ok(Self::new(protein, mutation))
    }
}
