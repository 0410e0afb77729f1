//! Per-iteration statistics table.

use std::fmt;

/// Columns always present, in order.
pub const BASE_COLUMNS: [&str; 7] = ["iter", "res_stat", "res_eq", "res_ineq", "res_comp", "qp_status", "qp_iter"];

/// Extra columns recorded when external QP residuals are enabled.
pub const QP_RESIDUAL_COLUMNS: [&str; 4] = ["qp_res_stat", "qp_res_eq", "qp_res_ineq", "qp_res_comp"];

/// Table with one row per SQP iteration.
///
/// Entries that were not computed in an iteration (the QP columns of the
/// final, converged row) are stored as `NaN` and printed as `-`.
#[derive(Debug, Clone, PartialEq)]
pub struct SqpStats {
    columns: Vec<&'static str>,
    rows: Vec<Vec<f64>>,
}

impl SqpStats {
    pub fn new(ext_qp_res: bool) -> Self {
        let mut columns = BASE_COLUMNS.to_vec();
        if ext_qp_res {
            columns.extend(QP_RESIDUAL_COLUMNS);
        }
        Self { columns, rows: Vec::new() }
    }

    pub fn columns(&self) -> &[&'static str] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Append a row with every entry unset.
    pub(crate) fn push_row(&mut self) {
        self.rows.push(vec![f64::NAN; self.columns.len()]);
    }

    /// Set `column` of the last row. Unknown columns are ignored.
    pub(crate) fn set(&mut self, column: &str, value: f64) {
        let Some(c) = self.column_index(column) else { return };
        if let Some(row) = self.rows.last_mut() {
            row[c] = value;
        }
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|&c| c == column)
    }

    /// Value at `(row, column)`, `None` if out of range or not computed.
    pub fn get(&self, row: usize, column: &str) -> Option<f64> {
        let c = self.column_index(column)?;
        self.rows.get(row).map(|r| r[c]).filter(|v| !v.is_nan())
    }

    /// Whole column, `NaN` where not computed.
    pub fn column(&self, column: &str) -> Option<Vec<f64>> {
        let c = self.column_index(column)?;
        Some(self.rows.iter().map(|r| r[c]).collect())
    }
}

impl fmt::Display for SqpStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, name) in self.columns.iter().enumerate() {
            if k == 0 {
                write!(f, "{name:>5}")?;
            } else {
                write!(f, " {name:>12}")?;
            }
        }
        writeln!(f)?;
        for row in &self.rows {
            for (k, (name, &v)) in self.columns.iter().zip(row).enumerate() {
                let integer = matches!(*name, "iter" | "qp_status" | "qp_iter");
                let cell = if v.is_nan() {
                    "-".to_string()
                } else if integer {
                    format!("{}", v as i64)
                } else {
                    format!("{v:.4e}")
                };
                if k == 0 {
                    write!(f, "{cell:>5}")?;
                } else {
                    write!(f, " {cell:>12}")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_follow_ext_qp_res() {
        assert_eq!(SqpStats::new(false).columns().len(), 7);
        let stats = SqpStats::new(true);
        assert_eq!(stats.columns().len(), 11);
        assert_eq!(stats.columns()[7], "qp_res_stat");
    }

    #[test]
    fn test_unset_entries_print_as_dash() {
        let mut stats = SqpStats::new(false);
        stats.push_row();
        stats.set("iter", 0.0);
        stats.set("res_stat", 1.5e-3);
        stats.set("qp_res_stat", 1.0);
        assert_eq!(stats.get(0, "res_stat"), Some(1.5e-3));
        assert_eq!(stats.get(0, "qp_iter"), None);
        assert_eq!(stats.get(1, "iter"), None);
        let text = stats.to_string();
        assert!(text.contains("1.5000e-3"), "{text}");
        assert!(text.lines().nth(1).is_some_and(|l| l.trim_end().ends_with('-')));
    }
}
