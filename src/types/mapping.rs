//! Type mapping between SQL type descriptions and Apache Arrow data types.

use crate::error::ConversionError;
use crate::transport::messages::DataType as ColumnType;
use arrow::datatypes::{DataType, TimeUnit};

/// SQL column type understood by the row converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    /// BOOLEAN
    Boolean,
    /// SMALLINT, INTEGER, BIGINT
    Integer,
    /// DOUBLE, FLOAT, REAL
    Double,
    /// DECIMAL(p, s)
    Decimal { precision: u8, scale: i8 },
    /// CHAR, VARCHAR, TEXT
    Varchar,
    /// DATE
    Date,
    /// TIMESTAMP, optionally with time zone
    Timestamp { with_time_zone: bool },
    /// BINARY, VARBINARY
    Binary,
}

impl SqlType {
    /// Parse a column type description.
    ///
    /// The type name may carry its own arguments (`DECIMAL(18,2)`), otherwise
    /// `precision` and `scale` are taken from the description.
    ///
    /// # Errors
    ///
    /// Returns `ConversionError::UnsupportedType` for unknown type names.
    pub fn from_column_type(column_type: &ColumnType) -> Result<Self, ConversionError> {
        let raw = column_type.type_name.trim().to_uppercase();
        let (name, args) = split_type_args(&raw)?;

        match name {
            "BOOLEAN" | "BOOL" => Ok(SqlType::Boolean),
            "SMALLINT" | "INT" | "INTEGER" | "BIGINT" => Ok(SqlType::Integer),
            "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" | "REAL" => Ok(SqlType::Double),
            "DECIMAL" | "NUMERIC" => {
                let precision = args
                    .first()
                    .copied()
                    .or(column_type.precision)
                    .unwrap_or(18);
                let scale = args.get(1).copied().or(column_type.scale).unwrap_or(0);

                if !(1..=38).contains(&precision) || scale < 0 || scale > precision {
                    return Err(ConversionError::InvalidFormat(format!(
                        "DECIMAL({}, {}) is out of range",
                        precision, scale
                    )));
                }

                Ok(SqlType::Decimal {
                    precision: precision as u8,
                    scale: scale as i8,
                })
            }
            "CHAR" | "VARCHAR" | "TEXT" | "STRING" => Ok(SqlType::Varchar),
            "DATE" => Ok(SqlType::Date),
            "TIMESTAMP" => Ok(SqlType::Timestamp {
                with_time_zone: false,
            }),
            "TIMESTAMP WITH TIME ZONE" | "TIMESTAMPTZ" => Ok(SqlType::Timestamp {
                with_time_zone: true,
            }),
            "BINARY" | "VARBINARY" => Ok(SqlType::Binary),
            unknown => Err(ConversionError::UnsupportedType {
                type_name: unknown.to_string(),
            }),
        }
    }
}

/// Splits `DECIMAL(18,2)` into `("DECIMAL", [18, 2])`.
fn split_type_args(raw: &str) -> Result<(&str, Vec<i32>), ConversionError> {
    let Some(open) = raw.find('(') else {
        return Ok((raw, Vec::new()));
    };

    let close = raw
        .rfind(')')
        .filter(|close| *close > open)
        .ok_or_else(|| ConversionError::InvalidFormat(format!("Malformed type name: {}", raw)))?;

    let args = raw[open + 1..close]
        .split(',')
        .map(|arg| {
            arg.trim().parse::<i32>().map_err(|_| {
                ConversionError::InvalidFormat(format!("Invalid type argument in {}", raw))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((raw[..open].trim(), args))
}

/// Type mapper for converting SQL types to Arrow types.
pub struct TypeMapper;

impl TypeMapper {
    /// Convert a SQL type to an Arrow DataType.
    pub fn to_arrow(sql_type: &SqlType) -> DataType {
        match sql_type {
            SqlType::Boolean => DataType::Boolean,
            SqlType::Integer => DataType::Int64,
            SqlType::Double => DataType::Float64,
            SqlType::Decimal { precision, scale } => DataType::Decimal128(*precision, *scale),
            SqlType::Varchar => DataType::Utf8,
            SqlType::Date => DataType::Date32,
            SqlType::Timestamp { with_time_zone } => DataType::Timestamp(
                TimeUnit::Microsecond,
                with_time_zone.then(|| "UTC".into()),
            ),
            SqlType::Binary => DataType::Binary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column_type(name: &str) -> ColumnType {
        ColumnType {
            type_name: name.to_string(),
            precision: None,
            scale: None,
            size: None,
        }
    }

    #[test]
    fn test_simple_names() {
        assert_eq!(
            SqlType::from_column_type(&column_type("boolean")).unwrap(),
            SqlType::Boolean
        );
        assert_eq!(
            SqlType::from_column_type(&column_type("BIGINT")).unwrap(),
            SqlType::Integer
        );
        assert_eq!(
            SqlType::from_column_type(&column_type("VARCHAR(100)")).unwrap(),
            SqlType::Varchar
        );
    }

    #[test]
    fn test_decimal_inline_arguments() {
        let parsed = SqlType::from_column_type(&column_type("DECIMAL(18, 2)")).unwrap();
        assert_eq!(
            parsed,
            SqlType::Decimal {
                precision: 18,
                scale: 2
            }
        );
        assert_eq!(TypeMapper::to_arrow(&parsed), DataType::Decimal128(18, 2));
    }

    #[test]
    fn test_decimal_from_description() {
        let mut ty = column_type("DECIMAL");
        ty.precision = Some(10);
        ty.scale = Some(3);
        assert_eq!(
            SqlType::from_column_type(&ty).unwrap(),
            SqlType::Decimal {
                precision: 10,
                scale: 3
            }
        );
    }

    #[test]
    fn test_decimal_out_of_range() {
        assert!(SqlType::from_column_type(&column_type("DECIMAL(40,2)")).is_err());
        assert!(SqlType::from_column_type(&column_type("DECIMAL(5,")).is_err());
    }

    #[test]
    fn test_timestamp_mapping() {
        let plain = SqlType::from_column_type(&column_type("TIMESTAMP")).unwrap();
        assert!(matches!(
            TypeMapper::to_arrow(&plain),
            DataType::Timestamp(TimeUnit::Microsecond, None)
        ));

        let zoned = SqlType::from_column_type(&column_type("TIMESTAMPTZ")).unwrap();
        assert!(matches!(
            TypeMapper::to_arrow(&zoned),
            DataType::Timestamp(TimeUnit::Microsecond, Some(_))
        ));
    }

    #[test]
    fn test_unknown_type() {
        let err = SqlType::from_column_type(&column_type("GEOMETRY")).unwrap_err();
        assert!(matches!(err, ConversionError::UnsupportedType { .. }));
    }
}
