#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use kobo_etl::error::LoadError;
use kobo_etl::load::LoadSummary;
use kobo_etl::normalize::CleanTable;
use kobo_etl::pipeline::TableSink;
use kobo_etl::schema::TableSpec;
use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

pub fn read_fixture(name: &str) -> String {
    fs::read_to_string(fixture_path(name)).expect("read fixture")
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// Sink that keeps every table it is handed instead of touching a database.
#[derive(Default)]
pub struct RecordingSink {
    pub loads: Vec<(TableSpec, CleanTable)>,
}

impl TableSink for RecordingSink {
    async fn replace(
        &mut self,
        spec: &TableSpec,
        table: &CleanTable,
    ) -> Result<LoadSummary, LoadError> {
        self.loads.push((spec.clone(), table.clone()));
        Ok(LoadSummary {
            table: format!("{}.{}", spec.schema, spec.table),
            rows_inserted: table.len(),
        })
    }
}
