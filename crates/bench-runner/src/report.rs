use anyhow::{anyhow, Context, Result};
use std::io::{self, Write};
use std::path::Path;
use tracing::info;

use crate::files::atomic_write_bytes;

pub const ERROR_CELL: &str = "ERROR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Report {
    pub fn new(header: &[&str]) -> Self {
        Self {
            header: header.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<String>) -> Result<()> {
        if row.len() != self.header.len() {
            return Err(anyhow!(
                "report row has {} cells, header has {}",
                row.len(),
                self.header.len()
            ));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn write_csv<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(&self.header)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    pub fn publish(&self, path: &Path) -> Result<()> {
        let text = self.to_csv_string()?;
        atomic_write_bytes(path, text.as_bytes())
            .with_context(|| format!("writing report {}", path.display()))?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()?;
        info!("Report written to {}", path.display());
        Ok(())
    }
}

pub fn seconds(ms: f64) -> String {
    format!("{:.3}", ms / 1000.0)
}

pub fn mebibytes(bytes: f64) -> String {
    format!("{:.3}", bytes / 1024.0 / 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_must_match_header_width() {
        let mut report = Report::new(&["Benchmark", "Host"]);
        report
            .push(vec!["Median".into(), "alice".into()])
            .expect("row");
        assert!(report.push(vec!["Median".into()]).is_err());
        assert_eq!(report.rows().len(), 1);
    }

    #[test]
    fn csv_quotes_cells_when_needed() {
        let mut report = Report::new(&["Benchmark", "Running Time (s)"]);
        report
            .push(vec!["Median, large".into(), ERROR_CELL.into()])
            .expect("row");
        assert_eq!(
            report.to_csv_string().expect("csv"),
            "Benchmark,Running Time (s)\n\"Median, large\",ERROR\n"
        );
    }

    #[test]
    fn unit_conversions_round_consistently() {
        assert_eq!(seconds(125.0), "0.125");
        assert_eq!(seconds(1234.0), "1.234");
        assert_eq!(mebibytes(2048.0 * 1024.0), "2.000");
        assert_eq!(mebibytes(0.0), "0.000");
    }
}
