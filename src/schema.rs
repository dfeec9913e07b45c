//! Destination table model and the SQL text derived from it.
//!
//! The destination layout is agreed ahead of time rather than inferred from
//! the export: a [`TableSpec`] names the schema, the table and an ordered
//! list of [`ColumnSpec`]s. The built-in spec mirrors the admission form;
//! a YAML file can replace it for other forms.
//!
//! ## Responsibilities
//!
//! - YAML table spec loading via `serde_yaml`
//! - Identifier validation (schema, table and column names are spliced into
//!   DDL, so they must be plain identifiers and are always quoted)
//! - Rendering `CREATE SCHEMA`, `DROP TABLE`, `CREATE TABLE` and the
//!   parameterized `INSERT`

use std::{fmt, fs::File, io::BufReader, path::Path, str::FromStr, sync::OnceLock};

use anyhow::{Context, Result, anyhow, ensure};
use itertools::Itertools;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_SCHEMA: &str = "university";
pub const DEFAULT_TABLE: &str = "admission";
pub const SURROGATE_KEY: &str = "id";

const ADMISSION_COLUMNS: &[(&str, SqlType)] = &[
    ("start", SqlType::Timestamp),
    ("end", SqlType::Timestamp),
    ("full_name", SqlType::Text),
    ("date_of_birth", SqlType::Text),
    ("gender", SqlType::Text),
    ("email_address", SqlType::Text),
    ("district_of_residence", SqlType::Text),
    ("educational_background", SqlType::Text),
    ("program_of_interest", SqlType::Text),
    ("university_choices", SqlType::Text),
    ("scholarships", SqlType::Text),
    ("admission_status", SqlType::Text),
];

/// Column type as written in a table spec file. Parsing accepts the common
/// aliases (`string`, `datetime`, `int`, `float`, `bool`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum SqlType {
    Text,
    Timestamp,
    Date,
    Bigint,
    Double,
    Boolean,
}

impl SqlType {
    pub fn sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Timestamp => "TIMESTAMP",
            SqlType::Date => "DATE",
            SqlType::Bigint => "BIGINT",
            SqlType::Double => "DOUBLE PRECISION",
            SqlType::Boolean => "BOOLEAN",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            SqlType::Text => "text",
            SqlType::Timestamp => "timestamp",
            SqlType::Date => "date",
            SqlType::Bigint => "bigint",
            SqlType::Double => "double",
            SqlType::Boolean => "boolean",
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}

impl FromStr for SqlType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "string" => Ok(SqlType::Text),
            "timestamp" | "datetime" => Ok(SqlType::Timestamp),
            "date" => Ok(SqlType::Date),
            "bigint" | "integer" | "int" => Ok(SqlType::Bigint),
            "double" | "float" | "double precision" => Ok(SqlType::Double),
            "boolean" | "bool" => Ok(SqlType::Boolean),
            other => Err(anyhow!("Unsupported column type '{other}'")),
        }
    }
}

impl TryFrom<String> for SqlType {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub sql_type: SqlType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    #[serde(default = "TableSpec::default_schema")]
    pub schema: String,
    #[serde(default = "TableSpec::default_table")]
    pub table: String,
    pub columns: Vec<ColumnSpec>,
}

impl Default for TableSpec {
    fn default() -> Self {
        Self::admission()
    }
}

impl TableSpec {
    /// The admission form layout loaded into `university.admission`.
    pub fn admission() -> Self {
        Self {
            schema: DEFAULT_SCHEMA.to_string(),
            table: DEFAULT_TABLE.to_string(),
            columns: ADMISSION_COLUMNS
                .iter()
                .map(|(name, ty)| ColumnSpec::new(*name, *ty))
                .collect(),
        }
    }

    fn default_schema() -> String {
        DEFAULT_SCHEMA.to_string()
    }

    fn default_table() -> String {
        DEFAULT_TABLE.to_string()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Opening table spec file {path:?}"))?;
        let reader = BufReader::new(file);
        let spec: TableSpec =
            serde_yaml::from_reader(reader).context("Parsing table spec YAML")?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.schema).context("Invalid schema name")?;
        validate_identifier(&self.table).context("Invalid table name")?;
        ensure!(
            !self.columns.is_empty(),
            "Table spec for {} defines no columns",
            self.qualified_name()
        );
        let mut seen = std::collections::HashSet::new();
        for column in &self.columns {
            validate_identifier(&column.name)
                .with_context(|| format!("Invalid column name '{}'", column.name))?;
            ensure!(
                !column.name.eq_ignore_ascii_case(SURROGATE_KEY),
                "Column name '{}' is reserved for the surrogate key",
                column.name
            );
            ensure!(
                seen.insert(column.name.as_str()),
                "Column '{}' is listed more than once",
                column.name
            );
        }
        Ok(())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }

    pub fn create_schema_sql(&self) -> String {
        format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.schema))
    }

    pub fn drop_table_sql(&self) -> String {
        format!("DROP TABLE IF EXISTS {}", self.qualified_name())
    }

    pub fn create_table_sql(&self) -> String {
        let columns = std::iter::once(format!("{} SERIAL PRIMARY KEY", quote_ident(SURROGATE_KEY)))
            .chain(
                self.columns
                    .iter()
                    .map(|c| format!("{} {}", quote_ident(&c.name), c.sql_type.sql())),
            )
            .join(",\n    ");
        format!("CREATE TABLE {} (\n    {}\n)", self.qualified_name(), columns)
    }

    /// Parameterized insert over every spec column, in spec order.
    pub fn insert_sql(&self) -> String {
        let columns = self.columns.iter().map(|c| quote_ident(&c.name)).join(", ");
        let placeholders = (1..=self.columns.len())
            .map(|idx| format!("${idx}"))
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.qualified_name(),
            columns,
            placeholders
        )
    }

    /// Statements in the order a full refresh issues them.
    pub fn refresh_statements(&self) -> Vec<String> {
        vec![
            self.create_schema_sql(),
            self.drop_table_sql(),
            self.create_table_sql(),
        ]
    }
}

fn identifier_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").expect("identifier pattern is valid")
    })
}

pub fn validate_identifier(name: &str) -> Result<()> {
    ensure!(
        identifier_pattern().is_match(name),
        "'{name}' is not a plain SQL identifier (letters, digits and '_', not starting with a digit)"
    );
    Ok(())
}

/// Double-quotes an identifier, so reserved words such as `end` are safe.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
