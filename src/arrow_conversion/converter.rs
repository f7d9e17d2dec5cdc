//! Converter from row-major JSON data to Arrow record batches.

use crate::error::ConversionError;
use crate::transport::messages::{ColumnInfo, JsonResultSet};
use crate::types::{SqlType, TypeMapper};
use arrow::datatypes::{Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use serde_json::Value;
use std::sync::Arc;

use super::builders::build_array;

/// Converts JSON rows with known column types into Arrow batches.
#[derive(Debug, Clone)]
pub struct ArrowConverter {
    schema: SchemaRef,
    column_types: Vec<SqlType>,
}

impl ArrowConverter {
    /// Create a converter from column metadata.
    ///
    /// # Errors
    /// Returns `ConversionError` if a column type is not supported.
    pub fn new(columns: &[ColumnInfo]) -> Result<Self, ConversionError> {
        let column_types = columns
            .iter()
            .map(|col| SqlType::from_column_type(&col.data_type))
            .collect::<Result<Vec<_>, _>>()?;

        let fields: Vec<Field> = columns
            .iter()
            .zip(&column_types)
            .map(|(col, ty)| Field::new(&col.name, TypeMapper::to_arrow(ty), true))
            .collect();

        Ok(Self {
            schema: Arc::new(Schema::new(fields)),
            column_types,
        })
    }

    /// Get the Arrow schema for this converter.
    pub fn schema(&self) -> SchemaRef {
        Arc::clone(&self.schema)
    }

    /// Convert rows to a single RecordBatch.
    ///
    /// # Errors
    /// Returns `ConversionError::SchemaMismatch` if a row has the wrong width,
    /// or a conversion error for the first value that does not fit its column.
    pub fn convert_rows(&self, rows: &[Vec<Value>]) -> Result<RecordBatch, ConversionError> {
        if rows.is_empty() {
            return Ok(RecordBatch::new_empty(self.schema()));
        }

        let num_columns = self.column_types.len();
        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() != num_columns {
                return Err(ConversionError::SchemaMismatch(format!(
                    "Row {} has {} columns, expected {}",
                    row_idx,
                    row.len(),
                    num_columns
                )));
            }
        }

        let columns = transpose_rows_to_columns(rows, num_columns);
        let arrays = self
            .column_types
            .iter()
            .zip(&columns)
            .enumerate()
            .map(|(col_idx, (ty, values))| build_array(ty, values, col_idx))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RecordBatch::try_new(self.schema(), arrays)?)
    }

    /// Convert rows into batches of at most `rows_per_batch` rows.
    pub fn convert_chunks(
        &self,
        rows: &[Vec<Value>],
        rows_per_batch: usize,
    ) -> Result<Vec<RecordBatch>, ConversionError> {
        rows.chunks(rows_per_batch.max(1))
            .map(|chunk| self.convert_rows(chunk))
            .collect()
    }
}

/// Parse a JSON result description into a schema and batches.
///
/// # Errors
/// Returns `ConversionError::InvalidFormat` for malformed JSON.
pub fn json_to_batches(
    json: &str,
    rows_per_batch: usize,
) -> Result<(SchemaRef, Vec<RecordBatch>), ConversionError> {
    let result: JsonResultSet = serde_json::from_str(json)?;
    let converter = ArrowConverter::new(&result.columns)?;
    let batches = converter.convert_chunks(&result.data, rows_per_batch)?;
    Ok((converter.schema(), batches))
}

fn transpose_rows_to_columns(rows: &[Vec<Value>], num_columns: usize) -> Vec<Vec<Value>> {
    let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(rows.len()); num_columns];

    for row in rows {
        for (col_idx, value) in row.iter().enumerate() {
            columns[col_idx].push(value.clone());
        }
    }

    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::messages::DataType;
    use serde_json::json;

    fn create_test_columns() -> Vec<ColumnInfo> {
        let column = |name: &str, type_name: &str| ColumnInfo {
            name: name.to_string(),
            data_type: DataType {
                type_name: type_name.to_string(),
                precision: None,
                scale: None,
                size: None,
            },
        };
        vec![
            column("id", "BIGINT"),
            column("name", "VARCHAR"),
            column("active", "BOOLEAN"),
        ]
    }

    #[test]
    fn test_arrow_converter_creation() {
        let converter = ArrowConverter::new(&create_test_columns()).unwrap();

        let schema = converter.schema();
        assert_eq!(schema.fields().len(), 3);
        assert_eq!(schema.field(0).name(), "id");
        assert_eq!(schema.field(1).name(), "name");
        assert_eq!(schema.field(2).name(), "active");
    }

    #[test]
    fn test_convert_empty_result() {
        let converter = ArrowConverter::new(&create_test_columns()).unwrap();
        let batch = converter.convert_rows(&[]).unwrap();
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 3);
    }

    #[test]
    fn test_convert_with_nulls() {
        let converter = ArrowConverter::new(&create_test_columns()).unwrap();
        let rows = vec![
            vec![json!(1), json!("Alice"), json!(true)],
            vec![json!(2), json!(null), json!(false)],
            vec![json!(null), json!("Charlie"), json!(null)],
        ];

        let batch = converter.convert_rows(&rows).unwrap();
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.column(0).null_count(), 1);
        assert_eq!(batch.column(1).null_count(), 1);
        assert_eq!(batch.column(2).null_count(), 1);
    }

    #[test]
    fn test_convert_chunks() {
        let converter = ArrowConverter::new(&create_test_columns()).unwrap();
        let rows: Vec<Vec<Value>> = (0..5)
            .map(|i| vec![json!(i), json!(format!("row{}", i)), json!(i % 2 == 0)])
            .collect();

        let batches = converter.convert_chunks(&rows, 2).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].num_rows(), 2);
        assert_eq!(batches[2].num_rows(), 1);
    }

    #[test]
    fn test_schema_mismatch_error() {
        let converter = ArrowConverter::new(&create_test_columns()).unwrap();
        let result = converter.convert_rows(&[vec![json!(1), json!("Alice")]]);
        assert!(matches!(result, Err(ConversionError::SchemaMismatch(_))));
    }

    #[test]
    fn test_json_to_batches() {
        let json = r#"{
            "columns": [{"name": "N", "dataType": {"type": "DECIMAL(5,1)"}}],
            "data": [["1.5"], ["2.0"], [null]]
        }"#;
        let (schema, batches) = json_to_batches(json, 10).unwrap();
        assert_eq!(schema.fields().len(), 1);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].num_rows(), 3);
    }

    #[test]
    fn test_json_to_batches_invalid_json() {
        let err = json_to_batches("{not json", 10).unwrap_err();
        assert!(matches!(err, ConversionError::InvalidFormat(_)));
    }
}
