//! CSV loading for flow exports

use super::FlowTable;
use crate::error::{FlowError, Result};
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::debug;

/// Reads flow exports into [`FlowTable`]s
#[derive(Debug, Clone)]
pub struct CsvLoader {
    /// Field separator
    separator: u8,
    /// Rows to skip before the header
    skip_rows: usize,
}

impl Default for CsvLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl CsvLoader {
    pub fn new() -> Self {
        Self { separator: b',', skip_rows: 0 }
    }

    /// Set the field separator
    pub fn with_separator(mut self, separator: u8) -> Self {
        self.separator = separator;
        self
    }

    /// Skip leading rows before the header
    pub fn with_skip_rows(mut self, skip_rows: usize) -> Self {
        self.skip_rows = skip_rows;
        self
    }

    /// Load one CSV file with a header row.
    ///
    /// Every column is read as text and then coerced to numeric where every
    /// non-empty value parses, so exports mixing integers, floats and
    /// `Infinity` in one column load consistently.
    pub fn load(&self, path: &Path) -> Result<FlowTable> {
        let start = Instant::now();
        let file = File::open(path)?;

        let parse_opts = CsvParseOptions::default().with_separator(self.separator);
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_skip_rows(self.skip_rows)
            .with_infer_schema_length(Some(0))
            .with_parse_options(parse_opts)
            .into_reader_with_file_handle(file)
            .finish()?;

        let table = FlowTable::from_dataframe(&df)?;
        debug!(
            file = %path.display(),
            rows = table.n_rows(),
            cols = table.n_cols(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "loaded csv"
        );
        Ok(table)
    }
}

/// CSV files directly inside `dir`, sorted by file name
pub fn csv_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(FlowError::DataError(format!("{} is not a directory", dir.display())));
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Write a table as CSV
pub fn write_csv(table: &FlowTable, path: &Path) -> Result<()> {
    let mut df = table.to_dataframe()?;
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).include_header(true).finish(&mut df)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_csv_coerces_types() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "Flow Duration,Source IP,Label").unwrap();
        writeln!(file, "10,10.0.0.1,BENIGN").unwrap();
        writeln!(file, "Infinity,10.0.0.2,DDoS").unwrap();
        writeln!(file, "2.5,10.0.0.3,DDoS").unwrap();

        let table = CsvLoader::new().load(file.path()).unwrap();
        assert_eq!(table.n_rows(), 3);
        let duration = table.numeric_values("Flow Duration").unwrap();
        assert_eq!(duration[0], 10.0);
        assert!(duration[1].is_infinite());
        assert!(!table.column("Source IP").unwrap().values.is_numeric());
    }

    #[test]
    fn test_csv_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.csv", "a.CSV", "notes.txt"] {
            std::fs::write(dir.path().join(name), "x\n1\n").unwrap();
        }
        let files = csv_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.CSV", "b.csv"]);
    }

    #[test]
    fn test_write_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let table = FlowTable::from_columns(vec![
            super::super::FlowColumn::text("label", vec![Some("UDP".into())]),
            super::super::FlowColumn::numeric("confidence", vec![Some(0.9)]),
        ])
        .unwrap();
        write_csv(&table, &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("label,confidence"));
    }
}
