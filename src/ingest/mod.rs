//! Transaction table loading
//!
//! Tables are kept as raw string cells until projection so that
//! coercion failures can be counted instead of rejected row by row.

use crate::error::DataError;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rustc_hash::FxHashMap;
use std::path::Path;
use tracing::{debug, info};

/// Columns every transaction table must carry
pub const REQUIRED_COLUMNS: [&str; 9] = [
    "step",
    "type",
    "amount",
    "nameOrig",
    "oldbalanceOrg",
    "newbalanceOrig",
    "nameDest",
    "oldbalanceDest",
    "newbalanceDest",
];

/// Optional ground-truth columns
pub const LABEL_COLUMNS: [&str; 2] = ["isFraud", "isFlaggedFraud"];

/// Minimum rows required before a batch can be analyzed
pub const MIN_ROWS: usize = 2;

/// A loaded table of string cells, addressed by header name
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    index: FxHashMap<String, usize>,
}

impl RawTable {
    /// Build a table from headers and rows; short rows read as empty cells
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), i))
            .collect();
        Self {
            headers,
            rows,
            index,
        }
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Cell at (row, column index); missing cells read as ""
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Required columns absent from this table, in canonical order
    pub fn missing_columns(&self) -> Vec<String> {
        REQUIRED_COLUMNS
            .iter()
            .filter(|c| !self.has_column(c))
            .map(|c| c.to_string())
            .collect()
    }

    /// Check emptiness, required columns and minimum size
    pub fn validate(&self) -> Result<(), DataError> {
        if self.rows.is_empty() {
            return Err(DataError::Empty);
        }
        let missing = self.missing_columns();
        if !missing.is_empty() {
            return Err(DataError::MissingColumns(missing));
        }
        if self.rows.len() < MIN_ROWS {
            return Err(DataError::TooFewRows {
                min: MIN_ROWS,
                found: self.rows.len(),
            });
        }
        Ok(())
    }

    /// Seeded sample of at most `max_rows` rows, keeping original order
    pub fn sample_rows(&self, max_rows: usize, seed: u64) -> RawTable {
        if self.rows.len() <= max_rows {
            return self.clone();
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut picked = rand::seq::index::sample(&mut rng, self.rows.len(), max_rows).into_vec();
        picked.sort_unstable();
        info!(
            "Sampling {} of {} rows for analysis",
            max_rows,
            self.rows.len()
        );
        RawTable {
            headers: self.headers.clone(),
            rows: picked.into_iter().map(|i| self.rows[i].clone()).collect(),
            index: self.index.clone(),
        }
    }
}

/// Load a CSV file with a header row
pub fn load_csv(path: &Path) -> Result<RawTable, DataError> {
    let file = std::fs::File::open(path).map_err(|source| DataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table = read_csv(file)?;
    debug!(
        "Loaded {} rows x {} columns from {}",
        table.len(),
        table.headers.len(),
        path.display()
    );
    Ok(table)
}

/// Parse CSV from any reader (header row required)
pub fn read_csv<R: std::io::Read>(reader: R) -> Result<RawTable, DataError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(RawTable::from_rows(headers, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "step,type,amount,nameOrig,oldbalanceOrg,newbalanceOrig,nameDest,oldbalanceDest,newbalanceDest,isFraud";

    #[test]
    fn test_read_csv_and_validate() {
        let data = format!(
            "{HEADER}\n1,PAYMENT,100,C1,500,400,M1,0,0,0\n2,TRANSFER,200,C2,900,700,C3,10,210,1\n"
        );
        let table = read_csv(data.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.validate().is_ok());
        let amount = table.column_index("amount").unwrap();
        assert_eq!(table.cell(1, amount), "200");
    }

    #[test]
    fn test_missing_columns_reported() {
        let table = read_csv("step,amount\n1,2\n3,4\n".as_bytes()).unwrap();
        match table.validate() {
            Err(DataError::MissingColumns(cols)) => {
                assert!(cols.contains(&"type".to_string()));
                assert!(cols.contains(&"newbalanceDest".to_string()));
                assert!(!cols.contains(&"amount".to_string()));
            }
            other => panic!("expected MissingColumns, got {other:?}"),
        }
    }

    #[test]
    fn test_single_row_rejected() {
        let data = format!("{HEADER}\n1,PAYMENT,100,C1,500,400,M1,0,0,0\n");
        let table = read_csv(data.as_bytes()).unwrap();
        assert!(matches!(
            table.validate(),
            Err(DataError::TooFewRows { min: 2, found: 1 })
        ));
    }

    #[test]
    fn test_empty_table_rejected() {
        let table = read_csv(format!("{HEADER}\n").as_bytes()).unwrap();
        assert!(matches!(table.validate(), Err(DataError::Empty)));
    }

    #[test]
    fn test_sample_rows_preserves_order_and_is_seeded() {
        let headers = vec!["n".to_string()];
        let rows: Vec<Vec<String>> = (0..100).map(|i| vec![i.to_string()]).collect();
        let table = RawTable::from_rows(headers, rows);
        let a = table.sample_rows(10, 7);
        let b = table.sample_rows(10, 7);
        assert_eq!(a.len(), 10);
        let values: Vec<usize> = (0..10).map(|r| a.cell(r, 0).parse().unwrap()).collect();
        let again: Vec<usize> = (0..10).map(|r| b.cell(r, 0).parse().unwrap()).collect();
        assert_eq!(values, again);
        assert!(values.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_short_rows_read_as_empty() {
        let table = RawTable::from_rows(vec!["a".into(), "b".into()], vec![vec!["1".into()]]);
        assert_eq!(table.cell(0, 1), "");
        assert_eq!(table.cell(5, 0), "");
    }
}
