use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::{DateRange, EpochDay, SourceProfile};
use crate::error::TrendsError;
use crate::stats::Correction;

pub const DEFAULT_MIN_SUPPORT: f64 = 0.005;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub input: Option<PathBuf>,
    #[serde(default)]
    pub source: Option<SourceProfile>,
    #[serde(default)]
    pub countries: Option<CountryEntry>,
    #[serde(default)]
    pub begin_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub store: Option<PathBuf>,
    #[serde(default)]
    pub min_support: Option<f64>,
    #[serde(default)]
    pub correction: Option<Correction>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CountryEntry {
    Shorthand(String),
    List(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub input: Option<PathBuf>,
    pub source: SourceProfile,
    pub countries: BTreeSet<String>,
    pub date_range: DateRange,
    pub store: Option<PathBuf>,
    pub min_support: f64,
    pub correction: Correction,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            input: None,
            source: SourceProfile::default(),
            countries: BTreeSet::new(),
            date_range: DateRange::default(),
            store: None,
            min_support: DEFAULT_MIN_SUPPORT,
            correction: Correction::default(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, TrendsError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("kira-vt.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(TrendsError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| TrendsError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| TrendsError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_or_default(path: Option<&str>) -> Result<ResolvedConfig, TrendsError> {
        match Self::resolve(path) {
            Err(TrendsError::MissingConfig) => Ok(ResolvedConfig::default()),
            other => other,
        }
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, TrendsError> {
        let countries = match config.countries {
            Some(CountryEntry::Shorthand(value)) => parse_country_list(&value),
            Some(CountryEntry::List(values)) => parse_country_list(&values.join(",")),
            None => BTreeSet::new(),
        };

        let begin = parse_optional_date(config.begin_date.as_deref())?;
        let end = parse_optional_date(config.end_date.as_deref())?;

        let min_support = config.min_support.unwrap_or(DEFAULT_MIN_SUPPORT);
        validate_support(min_support)?;

        Ok(ResolvedConfig {
            input: config.input,
            source: config.source.unwrap_or_default(),
            countries,
            date_range: DateRange::new(begin, end),
            store: config.store,
            min_support,
            correction: config.correction.unwrap_or_default(),
        })
    }
}

pub fn parse_country_list(value: &str) -> BTreeSet<String> {
    let mut countries: BTreeSet<String> = value
        .split(',')
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
        .collect();
    if countries.len() == 1 && countries.contains("all") {
        countries.clear();
    }
    countries
}

pub fn parse_optional_date(value: Option<&str>) -> Result<Option<EpochDay>, TrendsError> {
    match value.map(str::trim) {
        None | Some("") | Some("beginning") | Some("end") => Ok(None),
        Some(value) => value.parse().map(Some),
    }
}

pub fn validate_support(fraction: f64) -> Result<(), TrendsError> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(TrendsError::InvalidSupport(fraction));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_config_shorthand() {
        let config = Config {
            countries: Some(CountryEntry::Shorthand("all".to_string())),
            ..Config::default()
        };

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.source, SourceProfile::Gisaid);
        assert!(resolved.countries.is_empty());
        assert_eq!(resolved.date_range, DateRange::default());
        assert_eq!(resolved.min_support, DEFAULT_MIN_SUPPORT);
        assert_eq!(resolved.correction, Correction::Holm);
    }

    #[test]
    fn parse_config_country_list_is_case_insensitive() {
        let config = Config {
            countries: Some(CountryEntry::List(vec![
                "Italy".to_string(),
                " FRANCE ".to_string(),
            ])),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(
            resolved.countries.into_iter().collect::<Vec<_>>(),
            vec!["france".to_string(), "italy".to_string()]
        );
    }

    #[test]
    fn parse_config_rejects_bad_support() {
        let config = Config {
            min_support: Some(1.5),
            ..Config::default()
        };
        let err = ConfigLoader::resolve_config(config).unwrap_err();
        assert_matches!(err, TrendsError::InvalidSupport(_));
    }

    #[test]
    fn open_date_bounds() {
        assert_eq!(parse_optional_date(Some("beginning")).unwrap(), None);
        assert_eq!(
            parse_optional_date(Some("2020-01-08")).unwrap(),
            Some(EpochDay::new(7))
        );
        assert_matches!(
            parse_optional_date(Some("08/01/2020")),
            Err(TrendsError::InvalidDate(_))
        );
    }
}
