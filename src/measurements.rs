use std::path::Path;
use std::time::Instant;

use crate::constants::{MEASUREMENT_COLUMN, MEASUREMENT_WINDOW};
use crate::error::{MeshError, Result};

/// Supplies the value stamped onto each outgoing message.
pub trait MeasurementSource: Send {
    fn next_value(&mut self) -> Result<f64>;
}

/// Sensor readings replayed from a CSV file.
///
/// Row 0 is the header. The row read on each call follows wall time:
/// `1 + elapsed_secs % window`, where the window is at most
/// [`MEASUREMENT_WINDOW`] data rows, so the file cycles.
///
/// Cells are split on every comma. Quoted cells are not understood, so a
/// quoted field containing a comma shifts the columns after it.
pub struct CsvMeasurements {
    rows: Vec<Vec<String>>,
    column: usize,
    started: Instant,
}

impl CsvMeasurements {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            MeshError::Config(format!("cannot read measurements {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let rows: Vec<Vec<String>> = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.split(',').map(|cell| cell.trim().to_string()).collect())
            .collect();

        if rows.len() < 2 {
            return Err(MeshError::Config(
                "measurements need a header and at least one data row".to_string(),
            ));
        }

        Ok(CsvMeasurements {
            rows,
            column: MEASUREMENT_COLUMN,
            started: Instant::now(),
        })
    }

    pub fn data_rows(&self) -> usize {
        self.rows.len() - 1
    }

    pub fn row_for(&self, elapsed_secs: u64) -> usize {
        let window = (self.data_rows() as u64).min(MEASUREMENT_WINDOW);
        1 + (elapsed_secs % window) as usize
    }

    pub fn value_at(&self, row: usize) -> Result<f64> {
        let cell = self
            .rows
            .get(row)
            .and_then(|r| r.get(self.column))
            .map(String::as_str)
            .unwrap_or("");

        if cell.is_empty() {
            return Err(MeshError::Measurement(format!(
                "missing value for row {}, column {}",
                row, self.column
            )));
        }
        cell.parse::<f64>().map_err(|e| {
            MeshError::Measurement(format!("row {}: cannot parse {:?}: {}", row, cell, e))
        })
    }
}

impl MeasurementSource for CsvMeasurements {
    fn next_value(&mut self) -> Result<f64> {
        let row = self.row_for(self.started.elapsed().as_secs());
        let value = self.value_at(row)?;
        log::debug!("Measurement row {} -> {}", row, value);
        Ok(value)
    }
}
