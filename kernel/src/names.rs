// Table Naming
//
// Schema-qualified table names and the path form used when a
// CREATE TABLE is logged.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableName {
    pub schema: String,
    pub table: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NameError {
    #[error("malformed table path `{0}`")]
    MalformedPath(String),
}

/// Path of a table object as handed over by the statement executor.
///
/// Accepted forms:
/// - `./schema/table` (only the last two components are used)
/// - `schema.table`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TablePath {
    raw: String,
    name: TableName,
}

impl TablePath {
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        let malformed = || NameError::MalformedPath(raw.to_string());

        let (schema, table) = if raw.contains('/') {
            let mut parts = raw.rsplit('/');
            let table = parts.next().ok_or_else(malformed)?;
            let schema = parts.next().ok_or_else(malformed)?;
            (schema, table)
        } else {
            raw.split_once('.').ok_or_else(malformed)?
        };

        if schema.is_empty() || table.is_empty() || schema == "." {
            return Err(malformed());
        }

        Ok(Self {
            raw: raw.to_string(),
            name: TableName::new(schema, table),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn table_name(&self) -> &TableName {
        &self.name
    }
}

impl FromStr for TablePath {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TablePath {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TablePath> for String {
    fn from(path: TablePath) -> Self {
        path.raw
    }
}

impl fmt::Display for TablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
