//! Reading metric tables and the participants table.
//!
//! Metric files are comma-separated with a header row; the participants table
//! is tab-separated. Only the named columns are read, everything else in a row
//! is ignored.

use crate::error::DataError;
use crate::models::{MetadataTable, MetricField, MetricRecord, SubjectMeta, MISSING_VALUE};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::debug;

/// Columns every participants table must carry.
pub const PARTICIPANT_COLUMNS: [&str; 4] = [
    "participant_id",
    "institution_id",
    "manufacturer",
    "manufacturers_model_name",
];

/// Load `(filename, value)` records from a metric CSV file.
///
/// Empty cells are read as a missing value.
pub fn load_metric_records(
    path: &Path,
    field: MetricField,
    filename_column: &str,
) -> Result<Vec<MetricRecord>, DataError> {
    let table = read_table(path, ',')?;
    let name_idx = table.column(filename_column)?;
    let value_idx = table.column(field.column())?;

    let records: Vec<MetricRecord> = table
        .rows
        .iter()
        .map(|row| {
            let value = match row[value_idx].as_str() {
                "" => MISSING_VALUE,
                other => other,
            };
            MetricRecord::new(row[name_idx].clone(), value)
        })
        .collect();

    debug!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Load the participants table (TSV).
pub fn load_participants(path: &Path) -> Result<MetadataTable, DataError> {
    let table = read_table(path, '\t')?;
    let [id, site, vendor, model] = PARTICIPANT_COLUMNS.map(|c| table.column(c));
    let (id, site, vendor, model) = (id?, site?, vendor?, model?);

    let rows: Vec<SubjectMeta> = table
        .rows
        .iter()
        .map(|row| SubjectMeta {
            participant_id: row[id].clone(),
            institution_id: row[site].clone(),
            manufacturer: row[vendor].clone(),
            manufacturers_model_name: row[model].clone(),
        })
        .collect();

    let metadata = MetadataTable::from_rows(rows);
    debug!("Read {} participants from {}", metadata.len(), path.display());
    Ok(metadata)
}

/// Header plus rows padded to the header width.
struct Table {
    source_name: String,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    fn column(&self, name: &str) -> Result<usize, DataError> {
        self.header
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| DataError::MissingColumn {
                source_name: self.source_name.clone(),
                column: name.to_string(),
            })
    }
}

fn read_table(path: &Path, delimiter: char) -> Result<Table, DataError> {
    let io_error = |source| DataError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_error)?;
    let reader = BufReader::new(file);
    let source_name = path.display().to_string();

    let mut header: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result.map_err(io_error)?;
        let line = line.trim_end_matches('\r');

        // Skip empty lines
        if line.trim().is_empty() {
            continue;
        }

        let fields = split_fields(line, delimiter).map_err(|message| DataError::Parse {
            source_name: source_name.clone(),
            line: line_num + 1,
            message,
        })?;

        match header {
            None => {
                let mut names = fields;
                // Strip a UTF-8 byte order mark left by spreadsheet exports
                if let Some(first) = names.first_mut() {
                    *first = first.trim_start_matches('\u{feff}').to_string();
                }
                header = Some(names);
            }
            Some(ref names) => {
                if fields.len() > names.len() {
                    return Err(DataError::Parse {
                        source_name: source_name.clone(),
                        line: line_num + 1,
                        message: format!(
                            "Expected at most {} columns, got {}",
                            names.len(),
                            fields.len()
                        ),
                    });
                }
                let mut row = fields;
                row.resize(names.len(), String::new());
                rows.push(row);
            }
        }
    }

    let header = header.ok_or_else(|| DataError::Parse {
        source_name: source_name.clone(),
        line: 0,
        message: "file is empty".to_string(),
    })?;

    Ok(Table {
        source_name,
        header,
        rows,
    })
}

/// Split one line, honouring double-quoted fields with `""` escapes.
fn split_fields(line: &str, delimiter: char) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else if c == '"' && current.trim().is_empty() {
            current.clear();
            in_quotes = true;
        } else if c == delimiter {
            fields.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(c);
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    fields.push(current.trim().to_string());
    Ok(fields)
}
