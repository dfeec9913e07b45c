//! CSV export normalization.
//!
//! Turns raw export text into a [`CleanTable`]:
//!
//! 1. best-effort parse, skipping lines whose field count does not match the
//!    header instead of failing the whole export;
//! 2. header canonicalization (separator class collapsed to `_`, trimmed,
//!    lowercased), with later duplicates suffixed `_2`, `_3`, ... and headers
//!    with nothing left named `column_<position>`;
//! 3. deny-listed columns removed, then every required column checked for;
//! 4. all-empty rows dropped, then rows missing a required field dropped;
//! 5. optional date/timestamp coercion, where unparseable values become null.
//!
//! Surviving rows keep their export order and columns keep their relative
//! order.

use std::collections::{BTreeMap, HashMap, HashSet};

use csv::StringRecord;
use log::{debug, info};

use crate::{
    data::{Value, is_blank, parse_naive_date, parse_naive_datetime},
    error::PipelineError,
};

pub const SEPARATOR: char = '_';

pub const DEFAULT_DROP_COLUMNS: &[&str] = &["phone_number", "year_of_graduation", "date"];
pub const DEFAULT_REQUIRED_COLUMNS: &[&str] = &["gender", "district_of_residence"];
pub const DEFAULT_TIMESTAMP_COLUMNS: &[&str] = &["start", "end"];

/// Which header characters are replaced by [`SEPARATOR`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SeparatorClass {
    /// Anything that is not an alphanumeric character.
    #[default]
    NonAlphanumeric,
    /// The listed characters plus any whitespace.
    Chars(Vec<char>),
}

impl SeparatorClass {
    fn matches(&self, c: char) -> bool {
        if c == SEPARATOR {
            return true;
        }
        match self {
            SeparatorClass::NonAlphanumeric => !c.is_alphanumeric(),
            SeparatorClass::Chars(chars) => c.is_whitespace() || chars.contains(&c),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    Date,
    Timestamp,
}

impl Coercion {
    fn apply(&self, raw: &str) -> Option<Value> {
        match self {
            Coercion::Date => parse_naive_date(raw).ok().map(Value::Date),
            Coercion::Timestamp => parse_naive_datetime(raw).ok().map(Value::DateTime),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub delimiter: u8,
    pub separators: SeparatorClass,
    pub drop_columns: Vec<String>,
    pub required_columns: Vec<String>,
    pub coercions: BTreeMap<String, Coercion>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            delimiter: b';',
            separators: SeparatorClass::default(),
            drop_columns: to_strings(DEFAULT_DROP_COLUMNS),
            required_columns: to_strings(DEFAULT_REQUIRED_COLUMNS),
            coercions: DEFAULT_TIMESTAMP_COLUMNS
                .iter()
                .map(|name| (name.to_string(), Coercion::Timestamp))
                .collect(),
        }
    }
}

impl NormalizeOptions {
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Options with no deny-list, no required fields and no coercion.
    pub fn passthrough(delimiter: u8) -> Self {
        Self {
            delimiter,
            separators: SeparatorClass::default(),
            drop_columns: Vec::new(),
            required_columns: Vec::new(),
            coercions: BTreeMap::new(),
        }
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// The export as parsed, before any cleaning.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub malformed_lines: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanRecord {
    values: Vec<Option<Value>>,
}

impl CleanRecord {
    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanTable {
    columns: Vec<String>,
    rows: Vec<CleanRecord>,
}

impl CleanTable {
    /// Builds a table from already-cleaned cells. Rows shorter than
    /// `columns` are padded with nulls.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<Value>>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut values| {
                values.resize(width, None);
                CleanRecord { values }
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[CleanRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value of `column` in row `row`; `None` when the column is absent or
    /// the cell is null.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.values.get(idx)?.as_ref()
    }

    /// Column-name to value view of one row, nulls omitted.
    pub fn record_map(&self, row: usize) -> BTreeMap<&str, &Value> {
        let Some(record) = self.rows.get(row) else {
            return BTreeMap::new();
        };
        self.columns
            .iter()
            .zip(&record.values)
            .filter_map(|(name, value)| value.as_ref().map(|v| (name.as_str(), v)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizeReport {
    pub parsed_rows: usize,
    pub malformed_lines: usize,
    pub empty_rows: usize,
    pub missing_required: usize,
    pub coercion_failures: usize,
    pub kept_rows: usize,
}

/// Canonical rendering of a header: separators collapsed to a single `_`,
/// no leading or trailing `_`, lowercase.
pub fn canonicalize_column_name(name: &str, separators: &SeparatorClass) -> String {
    let mut canonical = String::with_capacity(name.len());
    let mut pending_separator = false;
    // Lowercasing first keeps the result stable under a second pass.
    for c in name.chars().flat_map(char::to_lowercase) {
        if separators.matches(c) {
            pending_separator = true;
            continue;
        }
        if pending_separator && !canonical.is_empty() {
            canonical.push(SEPARATOR);
        }
        pending_separator = false;
        canonical.push(c);
    }
    canonical
}

pub fn canonicalize_headers(headers: &[String], separators: &SeparatorClass) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    headers
        .iter()
        .enumerate()
        .map(|(idx, header)| {
            let mut base = canonicalize_column_name(header, separators);
            if base.is_empty() {
                base = format!("column{SEPARATOR}{}", idx + 1);
            }
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                base
            } else {
                format!("{base}{SEPARATOR}{count}")
            }
        })
        .collect()
}

/// Reads the export, skipping lines that do not match the header width.
///
/// Only a missing or unreadable header is fatal.
pub fn parse_export(text: &str, delimiter: u8) -> Result<RawTable, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()?
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();

    let mut table = RawTable {
        headers,
        ..RawTable::default()
    };
    let mut record = StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                if record.len() != table.headers.len() {
                    debug!(
                        "Skipping line {}: expected {} field(s), found {}",
                        line_of(&record),
                        table.headers.len(),
                        record.len()
                    );
                    table.malformed_lines += 1;
                    continue;
                }
                table.rows.push(record.iter().map(|f| f.to_string()).collect());
            }
            Err(err) => {
                if matches!(err.kind(), csv::ErrorKind::Io(_)) {
                    return Err(err);
                }
                debug!("Skipping unreadable line: {err}");
                table.malformed_lines += 1;
            }
        }
    }
    Ok(table)
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or_default()
}

/// Applies canonicalization, the deny-list, row filters and coercion.
///
/// A required column that is not among the surviving headers fails the
/// whole export rather than filtering out every row.
pub fn clean(
    raw: RawTable,
    options: &NormalizeOptions,
) -> Result<(CleanTable, NormalizeReport), PipelineError> {
    let mut report = NormalizeReport {
        parsed_rows: raw.rows.len(),
        malformed_lines: raw.malformed_lines,
        ..NormalizeReport::default()
    };

    let canonical = canonicalize_headers(&raw.headers, &options.separators);
    let drop = options
        .drop_columns
        .iter()
        .map(|name| canonicalize_column_name(name, &options.separators))
        .collect::<HashSet<_>>();
    let kept = canonical
        .iter()
        .enumerate()
        .filter(|(_, name)| !drop.contains(name.as_str()))
        .map(|(idx, _)| idx)
        .collect::<Vec<_>>();
    let columns = kept.iter().map(|&idx| canonical[idx].clone()).collect::<Vec<_>>();

    let required = options
        .required_columns
        .iter()
        .map(|name| canonicalize_column_name(name, &options.separators))
        .map(|name| {
            columns
                .iter()
                .position(|c| *c == name)
                .ok_or(PipelineError::MissingRequiredColumn { column: name })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let coercion_by_name = options
        .coercions
        .iter()
        .map(|(name, coercion)| {
            (canonicalize_column_name(name, &options.separators), *coercion)
        })
        .collect::<HashMap<_, _>>();
    let coercions = columns
        .iter()
        .map(|name| coercion_by_name.get(name).copied())
        .collect::<Vec<_>>();

    let mut rows = Vec::with_capacity(raw.rows.len());
    for raw_row in raw.rows {
        let cells = kept
            .iter()
            .map(|&idx| raw_row.get(idx).filter(|v| !is_blank(v)).cloned())
            .collect::<Vec<_>>();

        if cells.iter().all(Option::is_none) {
            report.empty_rows += 1;
            continue;
        }
        let complete = required.iter().all(|&idx| cells[idx].is_some());
        if !complete {
            report.missing_required += 1;
            continue;
        }

        let values = cells
            .into_iter()
            .zip(&coercions)
            .map(|(cell, coercion)| match (cell, coercion) {
                (Some(raw), Some(coercion)) => {
                    let coerced = coercion.apply(&raw);
                    if coerced.is_none() {
                        debug!("Could not coerce '{raw}' as {coercion:?}; storing null");
                        report.coercion_failures += 1;
                    }
                    coerced
                }
                (Some(raw), None) => Some(Value::Text(raw)),
                (None, _) => None,
            })
            .collect();
        rows.push(CleanRecord { values });
    }
    report.kept_rows = rows.len();

    Ok((CleanTable { columns, rows }, report))
}

/// Parses and cleans an export in one step.
pub fn normalize(
    text: &str,
    options: &NormalizeOptions,
) -> Result<(CleanTable, NormalizeReport), PipelineError> {
    let raw = parse_export(text, options.delimiter)?;
    if raw.headers.iter().all(|h| is_blank(h)) || raw.rows.is_empty() {
        return Err(PipelineError::NoUsableRows {
            malformed: raw.malformed_lines,
        });
    }
    let (table, report) = clean(raw, options)?;
    info!("Cleaned column names: {:?}", table.columns());
    info!(
        "Normalized {} row(s): kept {}, {} empty, {} missing required field(s), {} malformed line(s) skipped",
        report.parsed_rows,
        report.kept_rows,
        report.empty_rows,
        report.missing_required,
        report.malformed_lines
    );
    if report.coercion_failures > 0 {
        info!(
            "{} value(s) could not be coerced and were stored as null",
            report.coercion_failures
        );
    }
    Ok((table, report))
}
