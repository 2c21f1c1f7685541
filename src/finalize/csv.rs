//! Comma separated text to a table container.
//!
//! The first line with at least two fields names the columns; the last column
//! is the output, every other one an input.

use std::path::Path;

use regex::Regex;
use tracing::debug;

use crate::common::{Result, VaultError};
use crate::container::{ColumnEntry, ContainerHeader, DatasetFile, TableHeader};

const DELIMITER: char = ',';

struct CellParser {
    int: Regex,
    float: Regex,
}

impl CellParser {
    fn new() -> Result<Self> {
        let compile =
            |pattern: &str| Regex::new(pattern).map_err(|e| VaultError::parse(e.to_string()));
        Ok(Self {
            int: compile(r"^-?[0-9]+$")?,
            float: compile(r"^-?[0-9]+\.[0-9]+$")?,
        })
    }

    /// Booleans map to 1/0, numeric literals parse, anything else is 0.
    fn value(&self, cell: &str) -> f32 {
        match cell {
            "true" | "True" | "TRUE" => 1.0,
            "false" | "False" | "FALSE" => 0.0,
            _ if self.int.is_match(cell) => cell.parse::<i64>().map(|v| v as f32).unwrap_or(0.0),
            _ if self.float.is_match(cell) => cell.parse::<f32>().unwrap_or(0.0),
            _ => 0.0,
        }
    }
}

pub fn convert(target: impl AsRef<Path>, name: &str, text: &str) -> Result<DatasetFile> {
    let parser = CellParser::new()?;
    let mut lines = text
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| line.contains(DELIMITER));

    let header_line = lines
        .next()
        .ok_or_else(|| VaultError::parse("csv has no header line"))?;
    let names: Vec<&str> = header_line.split(DELIMITER).map(str::trim).collect();
    let width = names.len();

    let mut values = Vec::new();
    let mut rows = 0u64;
    let mut skipped = 0u64;
    for line in lines {
        let cells: Vec<&str> = line.split(DELIMITER).collect();
        if cells.len() != width {
            skipped += 1;
            continue;
        }
        values.extend(cells.iter().map(|cell| parser.value(cell.trim())));
        rows += 1;
    }

    let columns = names
        .iter()
        .enumerate()
        .map(|(i, col)| {
            let is_output = i + 1 == width;
            let mut entry = ColumnEntry::new(*col, !is_output, is_output);
            column_statistics(&mut entry, &values, i, width);
            entry
        })
        .collect();

    let header = ContainerHeader::Table(TableHeader::new(columns, rows));
    let file = DatasetFile::create_with(target, name, header, |file| file.add_block(0, &values))?;

    debug!(rows, columns = width, skipped, "csv converted");
    Ok(file)
}

fn column_statistics(entry: &mut ColumnEntry, values: &[f32], index: usize, width: usize) {
    let mut count = 0usize;
    let mut sum = 0f64;
    let mut max = f32::NEG_INFINITY;
    let mut max_abs = 0f32;
    for &value in values.iter().skip(index).step_by(width) {
        count += 1;
        sum += value as f64;
        max = max.max(value);
        max_abs = max_abs.max(value.abs());
    }

    if count == 0 {
        return;
    }
    entry.max_value = max;
    entry.avg_value = (sum / count as f64) as f32;
    entry.scale = if max_abs > 0.0 { 1.0 / max_abs } else { 1.0 };
}
