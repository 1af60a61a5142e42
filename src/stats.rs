use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize, Serializer};
use statrs::distribution::{ChiSquared, ContinuousCDF};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PValue {
    Value(f64),
    NotAvailable,
}

impl PValue {
    pub fn value(self) -> Option<f64> {
        match self {
            PValue::Value(p) => Some(p),
            PValue::NotAvailable => None,
        }
    }
}

impl fmt::Display for PValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PValue::Value(p) => write!(f, "{p}"),
            PValue::NotAvailable => write!(f, "NaN"),
        }
    }
}

impl Serialize for PValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PValue::Value(p) => serializer.serialize_f64(*p),
            PValue::NotAvailable => serializer.serialize_str("NaN"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Correction {
    #[default]
    Holm,
    BenjaminiHochberg,
    None,
}

pub fn ols_slope(ys: &[f64]) -> f64 {
    let n = ys.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = ys.iter().sum::<f64>() / n as f64;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    num / den
}

// A zero row or column leaves the statistic undefined. Yates correction at one
// degree of freedom only.
pub fn chi_square_independence(table: &[&[u64]]) -> PValue {
    let rows = table.len();
    let cols = table.first().map(|row| row.len()).unwrap_or(0);
    if rows < 2 || cols < 2 || table.iter().any(|row| row.len() != cols) {
        return PValue::NotAvailable;
    }

    let row_sums: Vec<f64> = table
        .iter()
        .map(|row| row.iter().map(|&v| v as f64).sum())
        .collect();
    let col_sums: Vec<f64> = (0..cols)
        .map(|j| table.iter().map(|row| row[j] as f64).sum())
        .collect();
    if row_sums.iter().chain(col_sums.iter()).any(|&s| s == 0.0) {
        return PValue::NotAvailable;
    }
    let total: f64 = row_sums.iter().sum();

    let dof = ((rows - 1) * (cols - 1)) as f64;
    let mut statistic = 0.0;
    for (i, row) in table.iter().enumerate() {
        for (j, &observed) in row.iter().enumerate() {
            let expected = row_sums[i] * col_sums[j] / total;
            let mut diff = (observed as f64 - expected).abs();
            if dof == 1.0 {
                diff = (diff - 0.5).max(0.0);
            }
            statistic += diff * diff / expected;
        }
    }

    match ChiSquared::new(dof) {
        Ok(dist) => PValue::Value(dist.sf(statistic).clamp(0.0, 1.0)),
        Err(_) => PValue::NotAvailable,
    }
}

pub fn correct(values: &mut [PValue], method: Correction) {
    let mut indexed: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.value().map(|v| (i, v)))
        .collect();
    let m = indexed.len();
    if m == 0 || method == Correction::None {
        return;
    }
    indexed.sort_by(|a, b| a.1.total_cmp(&b.1));

    let adjusted = match method {
        Correction::Holm => holm(&indexed),
        Correction::BenjaminiHochberg => benjamini_hochberg(&indexed),
        Correction::None => return,
    };
    for ((position, _), p) in indexed.iter().zip(adjusted) {
        values[*position] = PValue::Value(p);
    }
}

fn holm(sorted: &[(usize, f64)]) -> Vec<f64> {
    let m = sorted.len() as f64;
    let mut running_max: f64 = 0.0;
    sorted
        .iter()
        .enumerate()
        .map(|(rank, (_, p))| {
            let scaled = ((m - rank as f64) * p).min(1.0);
            running_max = running_max.max(scaled);
            running_max
        })
        .collect()
}

fn benjamini_hochberg(sorted: &[(usize, f64)]) -> Vec<f64> {
    let m = sorted.len() as f64;
    let mut adjusted = vec![0.0; sorted.len()];
    let mut running_min: f64 = 1.0;
    for rank in (0..sorted.len()).rev() {
        let scaled = (sorted[rank].1 * m / (rank as f64 + 1.0)).min(1.0);
        running_min = running_min.min(scaled);
        adjusted[rank] = running_min;
    }
    adjusted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn slope_of_rising_and_flat_series() {
        assert!(ols_slope(&[5.0, 16.67, 40.0, 75.0]) > 0.0);
        assert!(approx(ols_slope(&[10.0, 10.0, 10.0, 10.0]), 0.0));
        assert!(approx(ols_slope(&[0.0, 1.0, 2.0, 3.0]), 1.0));
        assert!(ols_slope(&[4.0, 3.0, 2.0, 1.0]) < 0.0);
    }

    #[test]
    fn chi_square_matches_reference_value() {
        // scipy.stats.chi2_contingency([[10, 20], [30, 40]]) -> p = 0.50403...
        let p = chi_square_independence(&[&[10, 20], &[30, 40]]).value().unwrap();
        assert!((p - 0.504_036).abs() < 1e-4, "p = {p}");
    }

    #[test]
    fn chi_square_identical_rows_is_not_significant() {
        let p = chi_square_independence(&[&[10, 20, 30, 40], &[10, 20, 30, 40]])
            .value()
            .unwrap();
        assert!(approx(p, 1.0));
    }

    #[test]
    fn chi_square_zero_row_is_not_available() {
        assert_eq!(
            chi_square_independence(&[&[0, 0, 0, 0], &[100, 120, 150, 200]]),
            PValue::NotAvailable
        );
        assert_eq!(
            chi_square_independence(&[&[0, 5, 6, 7], &[0, 120, 150, 200]]),
            PValue::NotAvailable
        );
    }

    #[test]
    fn holm_skips_sentinels() {
        let mut values = vec![
            PValue::Value(0.01),
            PValue::NotAvailable,
            PValue::Value(0.04),
            PValue::Value(0.03),
        ];
        correct(&mut values, Correction::Holm);
        assert_eq!(values[1], PValue::NotAvailable);
        assert!(approx(values[0].value().unwrap(), 0.03));
        assert!(approx(values[3].value().unwrap(), 0.06));
        assert!(approx(values[2].value().unwrap(), 0.06));
    }

    #[test]
    fn benjamini_hochberg_is_monotone() {
        let mut values = vec![
            PValue::Value(0.01),
            PValue::Value(0.04),
            PValue::Value(0.03),
            PValue::Value(0.5),
        ];
        correct(&mut values, Correction::BenjaminiHochberg);
        let adjusted: Vec<f64> = values.iter().filter_map(|p| p.value()).collect();
        assert!(approx(adjusted[0], 0.04));
        assert!(approx(adjusted[1], 0.053_333_333_333_333_33));
        assert!(approx(adjusted[2], 0.053_333_333_333_333_33));
        assert!(approx(adjusted[3], 0.5));
    }

    #[test]
    fn single_value_is_unchanged_by_holm() {
        let mut values = vec![PValue::NotAvailable, PValue::Value(0.2)];
        correct(&mut values, Correction::Holm);
        assert_eq!(values, vec![PValue::NotAvailable, PValue::Value(0.2)]);
    }
}
