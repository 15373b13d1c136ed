//! Management command responses (v1 JSON table format).

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct V1Response {
    #[serde(rename = "Tables")]
    pub tables: Vec<V1Table>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct V1Table {
    #[serde(rename = "TableName", default)]
    pub table_name: String,
    #[serde(rename = "Columns")]
    pub columns: Vec<V1Column>,
    #[serde(rename = "Rows")]
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct V1Column {
    #[serde(rename = "ColumnName")]
    pub name: String,
    #[serde(rename = "DataType", default)]
    pub data_type: String,
}

impl V1Response {
    /// First table; management commands return their result there.
    pub fn primary(&self) -> Option<&V1Table> {
        self.tables.first()
    }
}

impl V1Table {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// String cell at (`row`, column `name`).
    pub fn string_at(&self, row: usize, name: &str) -> Option<&str> {
        let col = self.column_index(name)?;
        self.rows.get(row)?.get(col)?.as_str()
    }
}
