//! I/O helpers for export text and cleaned CSV output.
//!
//! - **Decoding**: export bytes are decoded through `encoding_rs`, which
//!   sniffs and strips a byte-order mark; UTF-8 is the default.
//! - **Local exports**: a saved export can stand in for the HTTP fetch.
//! - **Writing**: cleaned tables are written back out as CSV (stdout when the
//!   path is `-` or absent), nulls as empty fields.

use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};

use crate::normalize::CleanTable;

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

/// Decodes export bytes, honouring a leading BOM over `encoding`.
pub fn decode_export(bytes: &[u8], encoding: Option<&'static Encoding>) -> Result<String> {
    let encoding = encoding.unwrap_or(UTF_8);
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode export with encoding {}",
            used.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn read_export_file(path: &Path, encoding: &'static Encoding) -> Result<String> {
    let bytes = if is_dash(path) {
        let mut buffer = Vec::new();
        std::io::Read::read_to_end(&mut std::io::stdin().lock(), &mut buffer)
            .context("Reading export from stdin")?;
        buffer
    } else {
        fs::read(path).with_context(|| format!("Reading export file {path:?}"))?
    };
    decode_export(&bytes, Some(encoding)).with_context(|| format!("Decoding {path:?}"))
}

pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    let writer: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(std::io::stdout()),
    };
    Ok(writer)
}

pub fn open_csv_writer(path: Option<&Path>, delimiter: u8) -> Result<csv::Writer<Box<dyn Write>>> {
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(delimiter)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true);
    Ok(builder.from_writer(open_output(path)?))
}

pub fn write_clean_table<W: Write>(writer: &mut csv::Writer<W>, table: &CleanTable) -> Result<()> {
    writer
        .write_record(table.columns())
        .context("Writing header row")?;
    for record in table.rows() {
        writer
            .write_record(record.values().iter().map(|value| {
                value
                    .as_ref()
                    .map(|v| v.as_display())
                    .unwrap_or_default()
            }))
            .context("Writing cleaned row")?;
    }
    writer.flush().context("Flushing cleaned CSV")?;
    Ok(())
}
