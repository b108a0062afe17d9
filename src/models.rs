//! Core data models for fraudscope
//!
//! These models represent cleaned transactions and the per-row
//! classifications handed back to callers.

use serde::{Deserialize, Serialize};

/// One cleaned transaction record
///
/// All numeric fields are non-negative magnitudes after projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Transaction {
    /// Time step (one step = one hour)
    pub step: f64,
    /// Transaction type label (PAYMENT, TRANSFER, ...)
    pub kind: String,
    pub amount: f64,
    /// Origin account identifier
    pub name_orig: String,
    pub old_balance_orig: f64,
    pub new_balance_orig: f64,
    /// Destination account identifier
    pub name_dest: String,
    pub old_balance_dest: f64,
    pub new_balance_dest: f64,
    /// Ground-truth label, when the source table carries `isFraud`
    #[serde(default)]
    pub is_fraud: Option<bool>,
    #[serde(default)]
    pub is_flagged_fraud: Option<bool>,
}

impl Transaction {
    /// Hour of day derived from the time step
    pub fn hour(&self) -> f64 {
        self.step.rem_euclid(24.0)
    }

    /// Day of week derived from the time step
    pub fn day_of_week(&self) -> f64 {
        (self.step / 24.0).floor().rem_euclid(7.0)
    }

    /// Origin bookkeeping mismatch: balance delta minus amount
    pub fn error_balance_orig(&self) -> f64 {
        self.old_balance_orig - self.new_balance_orig - self.amount
    }

    /// Destination bookkeeping mismatch: balance delta minus amount
    pub fn error_balance_dest(&self) -> f64 {
        self.new_balance_dest - self.old_balance_dest - self.amount
    }
}

/// Ordered set of transactions scored together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionBatch {
    pub transactions: Vec<Transaction>,
}

impl TransactionBatch {
    pub fn new(transactions: Vec<Transaction>) -> Self {
        Self { transactions }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Transaction> {
        self.transactions.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Transaction> {
        self.transactions.get(index)
    }

    pub fn amounts(&self) -> Vec<f64> {
        self.transactions.iter().map(|t| t.amount).collect()
    }

    /// Ground-truth labels, only when every row carries one
    pub fn labels(&self) -> Option<Vec<bool>> {
        self.transactions.iter().map(|t| t.is_fraud).collect()
    }

    /// Subset of the batch at the given row indices, in index order
    pub fn select(&self, indices: &[usize]) -> TransactionBatch {
        TransactionBatch {
            transactions: indices
                .iter()
                .filter_map(|&i| self.transactions.get(i).cloned())
                .collect(),
        }
    }
}

/// Risk band for a combined fraud score
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score > 0.7 {
            RiskLevel::High
        } else if score > 0.4 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}
