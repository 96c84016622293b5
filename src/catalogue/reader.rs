use std::collections::{BTreeMap, HashSet};
use std::io::Read;

use camino::Utf8Path;
use csv::StringRecord;

use crate::pipeline_errors::PipelineError;

use super::target::{TargetRecord, TicId};
use super::CatalogueColumns;

/// Cells that stand for a missing value in the roster.
fn is_missing(cell: &str) -> bool {
    matches!(cell.trim(), "" | "nan" | "NaN" | "NA" | "None" | "null")
}

fn optional_f64(
    cell: Option<&str>,
    column: &str,
    row: usize,
) -> Result<Option<f64>, PipelineError> {
    match cell {
        None => Ok(None),
        Some(c) if is_missing(c) => Ok(None),
        Some(c) => c.trim().parse::<f64>().map(Some).map_err(|_| {
            PipelineError::CatalogueFormat(format!(
                "row {row}: column {column} holds '{c}' which is not a number"
            ))
        }),
    }
}

fn column_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == name)
}

/// Parse a roster from any CSV reader.
///
/// Arguments
/// -----------------
/// * `input`: CSV content with a header row and comma separators.
/// * `columns`: names of the identifier / TIC / period / coordinate / priority columns.
///
/// Return
/// ----------
/// * The targets in roster order.
/// * [`PipelineError::CatalogueFormat`] when a required column is missing, a period is not a
///   positive number, no TIC number can be derived for a row, or an identifier is repeated.
pub(crate) fn parse_catalogue<R: Read>(
    input: R,
    columns: &CatalogueColumns,
) -> Result<Vec<TargetRecord>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers = reader.headers()?.clone();
    let require = |name: &str| {
        column_index(&headers, name).ok_or_else(|| {
            PipelineError::CatalogueFormat(format!("required column '{name}' is missing"))
        })
    };
    let id_idx = require(&columns.identifier)?;
    let period_idx = require(&columns.period)?;
    let tic_idx = column_index(&headers, &columns.tic);
    let ra_idx = column_index(&headers, &columns.ra);
    let dec_idx = column_index(&headers, &columns.dec);
    let priority_idx = column_index(&headers, &columns.priority);

    let interpreted: HashSet<usize> = [Some(id_idx), Some(period_idx), tic_idx, ra_idx, dec_idx, priority_idx]
        .into_iter()
        .flatten()
        .collect();

    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for (row_idx, record) in reader.records().enumerate() {
        // Row numbers as seen in a spreadsheet: header is row 1
        let row = row_idx + 2;
        let record = record?;
        let cell = |idx: Option<usize>| idx.and_then(|i| record.get(i));

        let identifier = record.get(id_idx).unwrap_or_default().trim().to_string();
        if identifier.is_empty() {
            return Err(PipelineError::CatalogueFormat(format!(
                "row {row}: empty {} value",
                columns.identifier
            )));
        }
        if !seen.insert(identifier.clone()) {
            return Err(PipelineError::CatalogueFormat(format!(
                "row {row}: duplicated identifier '{identifier}'"
            )));
        }

        let tic = match cell(tic_idx).filter(|c| !is_missing(c)) {
            Some(raw) => raw.parse::<TicId>(),
            None => identifier.parse::<TicId>(),
        }
        .map_err(|_| {
            PipelineError::CatalogueFormat(format!(
                "row {row}: cannot derive a TIC number for '{identifier}'"
            ))
        })?;

        let period = optional_f64(cell(Some(period_idx)), &columns.period, row)?;
        if let Some(p) = period {
            if !(p.is_finite() && p > 0.0) {
                return Err(PipelineError::CatalogueFormat(format!(
                    "row {row}: period {p} of '{identifier}' is not a positive number of days"
                )));
            }
        }

        let extra: BTreeMap<String, Option<String>> = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| !interpreted.contains(idx))
            .map(|(idx, name)| {
                let value = record
                    .get(idx)
                    .filter(|c| !is_missing(c))
                    .map(str::to_string);
                (name.to_string(), value)
            })
            .collect();

        targets.push(TargetRecord {
            identifier,
            tic,
            period,
            ra: optional_f64(cell(ra_idx), &columns.ra, row)?,
            dec: optional_f64(cell(dec_idx), &columns.dec, row)?,
            priority: optional_f64(cell(priority_idx), &columns.priority, row)?,
            extra,
        });
    }

    Ok(targets)
}

/// Parse the roster file at `path`.
pub(crate) fn read_catalogue_file(
    path: &Utf8Path,
    columns: &CatalogueColumns,
) -> Result<Vec<TargetRecord>, PipelineError> {
    let file = std::fs::File::open(path).map_err(|e| {
        PipelineError::CatalogueFormat(format!("cannot open catalogue {path}: {e}"))
    })?;
    parse_catalogue(file, columns)
}
