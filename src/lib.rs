pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod fetch;
pub mod io_utils;
pub mod load;
pub mod normalize;
pub mod pipeline;
pub mod schema;

use std::{env, io::Write, path::Path, sync::OnceLock, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{
    cli::{Cli, Commands},
    config::{ApiConfig, Config, DatabaseConfig},
    pipeline::{ExportSource, PostgresSink},
    schema::TableSpec,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("kobo_etl", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => block_on(handle_run(&args)),
        Commands::Fetch(args) => block_on(handle_fetch(&args)),
        Commands::Normalize(args) => handle_normalize(&args),
        Commands::Ddl(args) => handle_ddl(&args),
    }
}

/// Every run is single-threaded; the runtime only drives network and
/// database I/O.
fn block_on<F>(future: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Starting async runtime")?;
    runtime.block_on(future)
}

fn load_table_spec(path: Option<&Path>) -> Result<TableSpec> {
    match path {
        Some(path) => {
            TableSpec::load(path).with_context(|| format!("Loading table spec from {path:?}"))
        }
        None => Ok(TableSpec::admission()),
    }
}

async fn handle_run(args: &cli::RunArgs) -> Result<()> {
    config::load_env_file(args.env_file.as_deref())?;
    let spec = load_table_spec(args.table_spec.as_deref())?;
    let options = args.normalize.to_options();
    debug!("Normalize options: {options:?}");

    let (source, database) = match &args.input {
        Some(path) => {
            let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
            let source = ExportSource::File {
                path: path.clone(),
                encoding,
            };
            let database = if args.dry_run {
                None
            } else {
                Some(DatabaseConfig::from_lookup(|key| env::var(key).ok())?)
            };
            (source, database)
        }
        None => {
            let (api, database) = if args.dry_run {
                (ApiConfig::from_lookup(|key| env::var(key).ok())?, None)
            } else {
                let config = Config::from_env()?;
                (config.api, Some(config.database))
            };
            let client = fetch::build_client(Duration::from_secs(args.timeout_secs))?;
            (ExportSource::Remote { client, api }, database)
        }
    };
    info!(
        "Starting {} from {} (delimiter '{}')",
        if args.dry_run { "dry run" } else { "load" },
        source.describe(),
        printable_delimiter(options.delimiter)
    );

    let Some(database) = database else {
        let text = pipeline::extract(&source).await?;
        let (table, _) = normalize::normalize(&text, &options)?;
        let mut writer = io_utils::open_csv_writer(None, b',')?;
        io_utils::write_clean_table(&mut writer, &table)?;
        return Ok(());
    };

    let mut sink = PostgresSink::new(database.connect_options());
    let summary = pipeline::run_pipeline(&source, &options, &spec, &mut sink).await?;
    info!(
        "Data processing completed: {} of {} row(s) loaded into {}",
        summary.load.rows_inserted, summary.report.parsed_rows, summary.load.table
    );
    Ok(())
}

async fn handle_fetch(args: &cli::FetchArgs) -> Result<()> {
    config::load_env_file(args.env_file.as_deref())?;
    let api = ApiConfig::from_lookup(|key| env::var(key).ok())?;
    let client = fetch::build_client(Duration::from_secs(args.timeout_secs))?;
    let text = fetch::fetch_export(&client, &api).await?;
    let mut output = io_utils::open_output(args.output.as_deref())?;
    output
        .write_all(text.as_bytes())
        .and_then(|_| output.flush())
        .context("Writing export")?;
    if let Some(path) = &args.output {
        info!("Export written to {path:?}");
    }
    Ok(())
}

fn handle_normalize(args: &cli::NormalizeArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let options = args.normalize.to_options();
    info!(
        "Normalizing '{}' with delimiter '{}'",
        args.input.display(),
        printable_delimiter(options.delimiter)
    );
    let text = io_utils::read_export_file(&args.input, encoding)?;
    let (table, report) = normalize::normalize(&text, &options)
        .with_context(|| format!("Normalizing {:?}", args.input))?;
    let mut writer = io_utils::open_csv_writer(args.output.as_deref(), args.output_delimiter)?;
    io_utils::write_clean_table(&mut writer, &table)?;
    if let Some(path) = &args.output {
        info!("Wrote {} cleaned row(s) to {path:?}", report.kept_rows);
    }
    Ok(())
}

fn handle_ddl(args: &cli::DdlArgs) -> Result<()> {
    let spec = load_table_spec(args.table_spec.as_deref())?;
    let mut stdout = std::io::stdout().lock();
    for statement in spec.refresh_statements() {
        writeln!(stdout, "{statement};")?;
    }
    writeln!(stdout, "{};", spec.insert_sql())?;
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
