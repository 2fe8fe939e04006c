//! Type system for Tally tables

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared storage type of a column, as inferred from its values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Boolean,
    Integer,
    Float,
    String,
    Date,
    DateTime,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Boolean => "boolean",
            DataType::Integer => "integer",
            DataType::Float => "float",
            DataType::String => "string",
            DataType::Date => "date",
            DataType::DateTime => "datetime",
        };
        f.write_str(name)
    }
}

/// Semantic role of a column in an aggregation query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnRole {
    /// Dates and timestamps, usable for time bucketing
    Temporal,
    /// Dimensions, usable for grouping
    Categorical,
    /// Numeric values, usable as aggregation targets
    Measure,
}

impl fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnRole::Temporal => "temporal",
            ColumnRole::Categorical => "categorical",
            ColumnRole::Measure => "measure",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub role: ColumnRole,
    pub data_type: DataType,

    /// chrono format that matched the sampled values, when they were text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_format: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, role: ColumnRole, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            role,
            data_type,
            date_format: None,
        }
    }

    pub fn with_date_format(mut self, format: impl Into<String>) -> Self {
        self.date_format = Some(format.into());
        self
    }
}

/// Column descriptors of one table, in header order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnDescriptor>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self { columns }
    }

    pub fn find(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Columns with the given role, in header order
    pub fn with_role(&self, role: ColumnRole) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().filter(move |c| c.role == role)
    }
}
