//! Feature projection
//!
//! Turns a validated [`RawTable`] into the cleaned [`TransactionBatch`]
//! and the numeric [`FeatureMatrix`] every detector reads.

use crate::error::DataError;
use crate::ingest::{RawTable, LABEL_COLUMNS};
use crate::models::{Transaction, TransactionBatch};
use nalgebra::DMatrix;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Feature matrix columns, in order
pub const FEATURE_COLUMNS: [&str; 10] = [
    "amount",
    "oldbalanceOrg",
    "newbalanceOrig",
    "oldbalanceDest",
    "newbalanceDest",
    "errorBalanceOrig",
    "errorBalanceDest",
    "hour",
    "day_of_week",
    "type_encoded",
];

const NUMERIC_COLUMNS: [&str; 6] = [
    "step",
    "amount",
    "oldbalanceOrg",
    "newbalanceOrig",
    "oldbalanceDest",
    "newbalanceDest",
];

/// Dense row-major view over the cleaned numeric features
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    data: DMatrix<f64>,
    columns: Vec<String>,
}

impl FeatureMatrix {
    /// Build from equally sized rows; non-finite values become 0
    pub fn from_rows(rows: &[Vec<f64>], columns: Vec<String>) -> Self {
        let ncols = columns.len();
        let data = DMatrix::from_fn(rows.len(), ncols, |i, j| {
            let v = rows[i].get(j).copied().unwrap_or(0.0);
            if v.is_finite() {
                v
            } else {
                0.0
            }
        });
        Self { data, columns }
    }

    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn value(&self, row: usize, col: usize) -> f64 {
        self.data[(row, col)]
    }

    pub fn row(&self, i: usize) -> Vec<f64> {
        (0..self.ncols()).map(|j| self.data[(i, j)]).collect()
    }

    pub fn column(&self, j: usize) -> Vec<f64> {
        (0..self.nrows()).map(|i| self.data[(i, j)]).collect()
    }

    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        (0..self.nrows()).map(|i| self.row(i)).collect()
    }

    /// Matrix restricted to the given rows, in the given order
    pub fn select_rows(&self, indices: &[usize]) -> FeatureMatrix {
        let data = DMatrix::from_fn(indices.len(), self.ncols(), |i, j| {
            self.data[(indices[i], j)]
        });
        FeatureMatrix {
            data,
            columns: self.columns.clone(),
        }
    }

}

/// Per-column min-max scaler into [0, 1]
///
/// Constant columns scale to 0.
#[derive(Debug, Clone)]
pub struct MinMaxScaler {
    mins: Vec<f64>,
    ranges: Vec<f64>,
}

impl MinMaxScaler {
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        let mut mins = vec![f64::INFINITY; width];
        let mut maxs = vec![f64::NEG_INFINITY; width];
        for row in rows {
            for (j, &v) in row.iter().enumerate().take(width) {
                mins[j] = mins[j].min(v);
                maxs[j] = maxs[j].max(v);
            }
        }
        let ranges = mins.iter().zip(&maxs).map(|(lo, hi)| hi - lo).collect();
        Self { mins, ranges }
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .enumerate()
            .map(|(j, &v)| {
                let range = self.ranges.get(j).copied().unwrap_or(0.0);
                if range > 0.0 {
                    (v - self.mins[j]) / range
                } else {
                    0.0
                }
            })
            .collect()
    }

    pub fn transform_all(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.transform(r)).collect()
    }
}

/// Output of projection: the cleaned batch and its feature matrix
#[derive(Debug, Clone)]
pub struct ProjectedBatch {
    pub batch: TransactionBatch,
    pub matrix: FeatureMatrix,
    pub columns: Vec<String>,
}

/// Extracts and cleans the numeric feature matrix
#[derive(Debug, Default, Clone, Copy)]
pub struct FeatureProjector;

impl FeatureProjector {
    pub fn new() -> Self {
        Self
    }

    pub fn project(&self, table: &RawTable) -> Result<ProjectedBatch, DataError> {
        table.validate()?;

        let n = table.len();
        let col = |name: &str| {
            table
                .column_index(name)
                .ok_or_else(|| DataError::MissingColumns(vec![name.to_string()]))
        };

        // Coerce numeric columns, counting unparseable cells per column
        let mut numeric: Vec<Vec<f64>> = Vec::with_capacity(NUMERIC_COLUMNS.len());
        let mut dead_columns = 0;
        for name in NUMERIC_COLUMNS {
            let idx = col(name)?;
            let mut failures = 0;
            let values: Vec<f64> = (0..n)
                .map(|r| match parse_numeric(table.cell(r, idx)) {
                    Some(v) => v.abs(),
                    None => {
                        failures += 1;
                        0.0
                    }
                })
                .collect();
            if failures == n {
                dead_columns += 1;
                warn!("Column '{}' has no parseable values", name);
            } else if failures > 0 {
                debug!("Column '{}': {} unparseable values filled with 0", name, failures);
            }
            numeric.push(values);
        }
        if dead_columns == NUMERIC_COLUMNS.len() {
            return Err(DataError::Unparseable);
        }
        if numeric.iter().all(|values| is_constant(values)) {
            return Err(DataError::Degenerate(
                "every numeric column is constant".into(),
            ));
        }

        let [fraud_idx, flagged_idx] = LABEL_COLUMNS.map(|name| table.column_index(name));
        let (type_idx, orig_idx, dest_idx) = (col("type")?, col("nameOrig")?, col("nameDest")?);

        let transactions: Vec<Transaction> = (0..n)
            .map(|r| Transaction {
                step: numeric[0][r],
                kind: table.cell(r, type_idx).to_string(),
                amount: numeric[1][r],
                name_orig: table.cell(r, orig_idx).to_string(),
                old_balance_orig: numeric[2][r],
                new_balance_orig: numeric[3][r],
                name_dest: table.cell(r, dest_idx).to_string(),
                old_balance_dest: numeric[4][r],
                new_balance_dest: numeric[5][r],
                is_fraud: fraud_idx.map(|i| parse_flag(table.cell(r, i))),
                is_flagged_fraud: flagged_idx.map(|i| parse_flag(table.cell(r, i))),
            })
            .collect();

        let batch = TransactionBatch::new(transactions);
        let matrix = build_matrix(&batch);

        if matrix.nrows() == 0 {
            return Err(DataError::Degenerate("matrix has zero rows".into()));
        }

        debug!(
            "Projected {} rows into {} features",
            matrix.nrows(),
            matrix.ncols()
        );
        let columns = matrix.columns().to_vec();
        Ok(ProjectedBatch {
            batch,
            matrix,
            columns,
        })
    }
}

/// Feature matrix for an already cleaned batch
pub fn build_matrix(batch: &TransactionBatch) -> FeatureMatrix {
    let kinds: BTreeSet<&str> = batch.iter().map(|t| t.kind.as_str()).collect();
    let encode = |kind: &str| kinds.iter().position(|k| *k == kind).unwrap_or(0) as f64;

    let rows: Vec<Vec<f64>> = batch
        .iter()
        .map(|t| {
            vec![
                t.amount,
                t.old_balance_orig,
                t.new_balance_orig,
                t.old_balance_dest,
                t.new_balance_dest,
                t.error_balance_orig(),
                t.error_balance_dest(),
                t.hour(),
                t.day_of_week(),
                encode(&t.kind),
            ]
        })
        .collect();
    FeatureMatrix::from_rows(&rows, FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect())
}

fn is_constant(values: &[f64]) -> bool {
    values.windows(2).all(|w| w[0] == w[1])
}

fn parse_numeric(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_flag(cell: &str) -> bool {
    parse_numeric(cell).map(|v| v != 0.0).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::REQUIRED_COLUMNS;

    fn table(rows: &[[&str; 9]]) -> RawTable {
        RawTable::from_rows(
            REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    #[test]
    fn test_projection_cleans_and_derives() {
        let t = table(&[
            ["25", "TRANSFER", "-100", "C1", "500", "400", "C2", "0", "100"],
            ["1", "PAYMENT", "abc", "C3", "50", "50", "M1", "0", "0"],
        ]);
        let projected = FeatureProjector::new().project(&t).unwrap();
        let first = &projected.batch.transactions[0];
        assert_eq!(first.amount, 100.0);
        assert_eq!(projected.batch.transactions[1].amount, 0.0);
        assert_eq!(projected.matrix.ncols(), FEATURE_COLUMNS.len());
        // hour = 25 mod 24
        assert_eq!(projected.matrix.value(0, 7), 1.0);
        // PAYMENT < TRANSFER in sorted order
        assert_eq!(projected.matrix.value(0, 9), 1.0);
        assert_eq!(projected.matrix.value(1, 9), 0.0);
        assert!(first.is_fraud.is_none());
    }

    #[test]
    fn test_constant_batch_is_degenerate() {
        let row = ["1", "PAYMENT", "10", "C1", "10", "10", "M1", "10", "10"];
        let t = table(&[row, row, row]);
        assert!(matches!(
            FeatureProjector::new().project(&t),
            Err(DataError::Degenerate(_))
        ));
    }

    #[test]
    fn test_constant_numerics_with_varying_type_is_degenerate() {
        let payment = ["5", "PAYMENT", "100", "C1", "500", "400", "M1", "0", "100"];
        let transfer = ["5", "TRANSFER", "100", "C2", "500", "400", "C3", "0", "100"];
        let rows: Vec<[&str; 9]> = (0..20)
            .map(|i| if i % 2 == 0 { payment } else { transfer })
            .collect();
        assert!(matches!(
            FeatureProjector::new().project(&table(&rows)),
            Err(DataError::Degenerate(_))
        ));
    }

    #[test]
    fn test_one_varying_numeric_column_is_enough() {
        let t = table(&[
            ["5", "PAYMENT", "100", "C1", "500", "400", "M1", "0", "100"],
            ["6", "PAYMENT", "100", "C1", "500", "400", "M1", "0", "100"],
        ]);
        assert!(FeatureProjector::new().project(&t).is_ok());
    }

    #[test]
    fn test_all_unparseable_rejected() {
        let row = ["x", "PAYMENT", "y", "C1", "z", "z", "M1", "z", "z"];
        let t = table(&[row, row]);
        assert!(matches!(
            FeatureProjector::new().project(&t),
            Err(DataError::Unparseable)
        ));
    }

    #[test]
    fn test_labels_parsed_when_present() {
        let mut headers: Vec<String> = REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect();
        headers.push("isFraud".into());
        let rows = vec![
            vec!["1", "PAYMENT", "10", "C1", "10", "0", "M1", "0", "0", "1"],
            vec!["2", "PAYMENT", "20", "C2", "30", "10", "M2", "0", "0", "0"],
        ]
        .into_iter()
        .map(|r| r.into_iter().map(String::from).collect())
        .collect();
        let projected = FeatureProjector::new()
            .project(&RawTable::from_rows(headers, rows))
            .unwrap();
        assert_eq!(projected.batch.labels(), Some(vec![true, false]));
    }

    #[test]
    fn test_min_max_scaler() {
        let rows = vec![vec![0.0, 5.0], vec![10.0, 5.0], vec![5.0, 5.0]];
        let scaler = MinMaxScaler::fit(&rows);
        assert_eq!(scaler.transform(&rows[2]), vec![0.5, 0.0]);
        assert_eq!(scaler.transform(&rows[1]), vec![1.0, 0.0]);
    }

    #[test]
    fn test_select_rows() {
        let m = FeatureMatrix::from_rows(
            &[vec![1.0], vec![2.0], vec![f64::NAN]],
            vec!["a".into()],
        );
        assert_eq!(m.value(2, 0), 0.0);
        let s = m.select_rows(&[1, 0]);
        assert_eq!(s.column(0), vec![2.0, 1.0]);
    }
}
