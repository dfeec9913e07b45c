//! Fetch → normalize → load, composed.
//!
//! Each stage is a plain function; this module only sequences them and stops
//! at the first fatal error. The load target sits behind [`TableSink`] so the
//! sequence can run against a recording sink in tests.

use std::path::PathBuf;

use encoding_rs::Encoding;
use log::info;
use reqwest::Client;
use sqlx::postgres::PgConnectOptions;

use crate::{
    config::ApiConfig,
    error::{LoadError, PipelineError},
    fetch, io_utils, load,
    load::LoadSummary,
    normalize::{self, CleanTable, NormalizeOptions, NormalizeReport},
    schema::TableSpec,
};

/// Where the export text comes from.
pub enum ExportSource {
    Remote { client: Client, api: ApiConfig },
    File {
        path: PathBuf,
        encoding: &'static Encoding,
    },
}

impl ExportSource {
    pub fn describe(&self) -> String {
        match self {
            ExportSource::Remote { api, .. } => api.export_url.clone(),
            ExportSource::File { path, .. } => path.display().to_string(),
        }
    }
}

#[allow(async_fn_in_trait)]
pub trait TableSink {
    /// Replaces the destination table with `table`, all or nothing.
    async fn replace(
        &mut self,
        spec: &TableSpec,
        table: &CleanTable,
    ) -> Result<LoadSummary, LoadError>;
}

pub struct PostgresSink {
    options: PgConnectOptions,
}

impl PostgresSink {
    pub fn new(options: PgConnectOptions) -> Self {
        Self { options }
    }
}

impl TableSink for PostgresSink {
    async fn replace(
        &mut self,
        spec: &TableSpec,
        table: &CleanTable,
    ) -> Result<LoadSummary, LoadError> {
        load::replace_table(&self.options, spec, table).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub report: NormalizeReport,
    pub load: LoadSummary,
}

pub async fn extract(source: &ExportSource) -> Result<String, PipelineError> {
    match source {
        ExportSource::Remote { client, api } => Ok(fetch::fetch_export(client, api).await?),
        ExportSource::File { path, encoding } => {
            let text = io_utils::read_export_file(path, *encoding).map_err(|err| {
                PipelineError::Read {
                    path: path.clone(),
                    message: format!("{err:#}"),
                }
            })?;
            info!("Read export from {}", path.display());
            Ok(text)
        }
    }
}

/// Runs all three stages. Nothing touches the sink unless the fetch and
/// the parse both succeed.
pub async fn run_pipeline<S: TableSink>(
    source: &ExportSource,
    options: &NormalizeOptions,
    spec: &TableSpec,
    sink: &mut S,
) -> Result<RunSummary, PipelineError> {
    let text = extract(source).await?;
    let (table, report) = normalize::normalize(&text, options)?;
    info!(
        "Uploading {} row(s) to {}.{}",
        table.len(),
        spec.schema,
        spec.table
    );
    let load = sink.replace(spec, &table).await?;
    Ok(RunSummary { report, load })
}
