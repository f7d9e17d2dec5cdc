//! Array builders for converting JSON values to Arrow arrays.
//!
//! Each builder takes one column of JSON values and produces an Arrow array,
//! mapping JSON `null` to an Arrow null.

use crate::error::ConversionError;
use crate::types::SqlType;
use arrow::array::{
    ArrayRef, BinaryBuilder, BooleanBuilder, Date32Builder, Decimal128Builder, Float64Builder,
    Int64Builder, StringBuilder, TimestampMicrosecondBuilder,
};
use serde_json::Value;
use std::sync::Arc;

/// Build an Arrow array from JSON values for a specific SQL type.
///
/// # Arguments
/// * `sql_type` - The column type
/// * `values` - Column of JSON values (one per row)
/// * `column` - Column index for error reporting
pub fn build_array(
    sql_type: &SqlType,
    values: &[Value],
    column: usize,
) -> Result<ArrayRef, ConversionError> {
    match sql_type {
        SqlType::Boolean => build_boolean_array(values, column),
        SqlType::Integer => build_integer_array(values, column),
        SqlType::Double => build_double_array(values, column),
        SqlType::Decimal { precision, scale } => {
            build_decimal128_array(values, *precision, *scale, column)
        }
        SqlType::Varchar => build_string_array(values, column),
        SqlType::Date => build_date_array(values, column),
        SqlType::Timestamp { with_time_zone } => {
            build_timestamp_array(values, *with_time_zone, column)
        }
        SqlType::Binary => build_binary_array(values, column),
    }
}

fn conversion_failed(row: usize, column: usize, message: String) -> ConversionError {
    ConversionError::ValueConversionFailed {
        row,
        column,
        message,
    }
}

fn build_boolean_array(values: &[Value], column: usize) -> Result<ArrayRef, ConversionError> {
    let mut builder = BooleanBuilder::with_capacity(values.len());

    for (row, value) in values.iter().enumerate() {
        if value.is_null() {
            builder.append_null();
        } else if let Some(b) = value.as_bool() {
            builder.append_value(b);
        } else {
            return Err(conversion_failed(
                row,
                column,
                format!("Expected boolean, got: {:?}", value),
            ));
        }
    }

    Ok(Arc::new(builder.finish()))
}

fn build_integer_array(values: &[Value], column: usize) -> Result<ArrayRef, ConversionError> {
    let mut builder = Int64Builder::with_capacity(values.len());

    for (row, value) in values.iter().enumerate() {
        if value.is_null() {
            builder.append_null();
        } else if let Some(i) = value.as_i64() {
            builder.append_value(i);
        } else if let Some(i) = value.as_str().and_then(|s| s.trim().parse::<i64>().ok()) {
            builder.append_value(i);
        } else {
            return Err(conversion_failed(
                row,
                column,
                format!("Expected integer, got: {:?}", value),
            ));
        }
    }

    Ok(Arc::new(builder.finish()))
}

fn build_double_array(values: &[Value], column: usize) -> Result<ArrayRef, ConversionError> {
    let mut builder = Float64Builder::with_capacity(values.len());

    for (row, value) in values.iter().enumerate() {
        if value.is_null() {
            builder.append_null();
        } else if let Some(f) = value.as_f64() {
            builder.append_value(f);
        } else if let Some(s) = value.as_str() {
            let f = match s {
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                "NaN" => f64::NAN,
                _ => s
                    .parse::<f64>()
                    .map_err(|_| conversion_failed(row, column, format!("Invalid float value: {}", s)))?,
            };
            builder.append_value(f);
        } else {
            return Err(conversion_failed(
                row,
                column,
                format!("Expected number, got: {:?}", value),
            ));
        }
    }

    Ok(Arc::new(builder.finish()))
}

fn build_decimal128_array(
    values: &[Value],
    precision: u8,
    scale: i8,
    column: usize,
) -> Result<ArrayRef, ConversionError> {
    let mut builder = Decimal128Builder::with_capacity(values.len())
        .with_precision_and_scale(precision, scale)?;

    for (row, value) in values.iter().enumerate() {
        if value.is_null() {
            builder.append_null();
        } else {
            let text = match value {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                other => {
                    return Err(conversion_failed(
                        row,
                        column,
                        format!("Expected numeric value, got: {:?}", other),
                    ))
                }
            };
            builder.append_value(parse_decimal(&text, precision, scale, row, column)?);
        }
    }

    Ok(Arc::new(builder.finish()))
}

/// Parse `"-123.45"` into an unscaled integer with `scale` fractional digits.
/// Extra fractional digits are truncated.
fn parse_decimal(
    text: &str,
    precision: u8,
    scale: i8,
    row: usize,
    column: usize,
) -> Result<i128, ConversionError> {
    let invalid = || conversion_failed(row, column, format!("Invalid decimal: {}", text));

    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    let (integer_part, fraction_part) = digits.split_once('.').unwrap_or((digits, ""));
    if integer_part.is_empty() && fraction_part.is_empty() {
        return Err(invalid());
    }
    if !integer_part.chars().chain(fraction_part.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let scale = scale.max(0) as usize;
    let mut unscaled = String::with_capacity(integer_part.len() + scale);
    unscaled.push_str(integer_part);
    unscaled.extend(fraction_part.chars().chain(std::iter::repeat('0')).take(scale));

    let significant = unscaled.trim_start_matches('0');
    if significant.len() > precision as usize {
        return Err(conversion_failed(
            row,
            column,
            format!("{} does not fit DECIMAL({}, {})", text, precision, scale),
        ));
    }

    let magnitude = if significant.is_empty() {
        0
    } else {
        significant.parse::<i128>().map_err(|_| invalid())?
    };

    Ok(if negative { -magnitude } else { magnitude })
}

fn build_string_array(values: &[Value], column: usize) -> Result<ArrayRef, ConversionError> {
    let mut builder = StringBuilder::with_capacity(values.len(), values.len() * 16);

    for (row, value) in values.iter().enumerate() {
        match value {
            Value::Null => builder.append_null(),
            Value::String(s) => builder.append_value(s),
            Value::Number(_) | Value::Bool(_) => builder.append_value(value.to_string()),
            other => {
                return Err(conversion_failed(
                    row,
                    column,
                    format!("Expected string, got: {:?}", other),
                ))
            }
        }
    }

    Ok(Arc::new(builder.finish()))
}

fn build_date_array(values: &[Value], column: usize) -> Result<ArrayRef, ConversionError> {
    let mut builder = Date32Builder::with_capacity(values.len());

    for (row, value) in values.iter().enumerate() {
        if value.is_null() {
            builder.append_null();
        } else if let Some(s) = value.as_str() {
            let (year, month, day) = parse_date(s)
                .ok_or_else(|| conversion_failed(row, column, format!("Invalid date: {}", s)))?;
            builder.append_value(days_from_civil(year, month, day));
        } else {
            return Err(conversion_failed(
                row,
                column,
                format!("Expected date string, got: {:?}", value),
            ));
        }
    }

    Ok(Arc::new(builder.finish()))
}

fn build_timestamp_array(
    values: &[Value],
    with_time_zone: bool,
    column: usize,
) -> Result<ArrayRef, ConversionError> {
    let mut builder = TimestampMicrosecondBuilder::with_capacity(values.len());

    for (row, value) in values.iter().enumerate() {
        if value.is_null() {
            builder.append_null();
        } else if let Some(s) = value.as_str() {
            let micros = parse_timestamp_micros(s).ok_or_else(|| {
                conversion_failed(row, column, format!("Invalid timestamp: {}", s))
            })?;
            builder.append_value(micros);
        } else {
            return Err(conversion_failed(
                row,
                column,
                format!("Expected timestamp string, got: {:?}", value),
            ));
        }
    }

    let array = builder.finish();
    if with_time_zone {
        Ok(Arc::new(array.with_timezone("UTC")))
    } else {
        Ok(Arc::new(array))
    }
}

fn build_binary_array(values: &[Value], column: usize) -> Result<ArrayRef, ConversionError> {
    let mut builder = BinaryBuilder::with_capacity(values.len(), values.len() * 16);

    for (row, value) in values.iter().enumerate() {
        match value {
            Value::Null => builder.append_null(),
            Value::String(s) => builder.append_value(s.as_bytes()),
            Value::Array(items) => {
                let bytes = items
                    .iter()
                    .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                    .collect::<Option<Vec<u8>>>()
                    .ok_or_else(|| {
                        conversion_failed(row, column, "Expected an array of bytes".to_string())
                    })?;
                builder.append_value(bytes);
            }
            other => {
                return Err(conversion_failed(
                    row,
                    column,
                    format!("Expected binary value, got: {:?}", other),
                ))
            }
        }
    }

    Ok(Arc::new(builder.finish()))
}

/// Parse `YYYY-MM-DD`.
fn parse_date(s: &str) -> Option<(i64, u32, u32)> {
    let mut parts = s.trim().splitn(3, '-');
    let year = parts.next()?.parse::<i64>().ok()?;
    let month = parts.next()?.parse::<u32>().ok()?;
    let day = parts.next()?.parse::<u32>().ok()?;

    if !(1..=12).contains(&month) || day == 0 || day > days_in_month(year, month) {
        return None;
    }
    Some((year, month, day))
}

/// Parse `YYYY-MM-DD[ T]HH:MM:SS[.ffffff]` into microseconds since the epoch.
fn parse_timestamp_micros(s: &str) -> Option<i64> {
    let s = s.trim();
    let (date, time) = s.split_once(['T', ' ']).unwrap_or((s, "00:00:00"));
    let (year, month, day) = parse_date(date)?;

    let (clock, fraction) = time.split_once('.').unwrap_or((time, ""));
    let mut fields = clock.splitn(3, ':');
    let hour = fields.next()?.parse::<i64>().ok()?;
    let minute = fields.next()?.parse::<i64>().ok()?;
    let second = fields.next().unwrap_or("0").parse::<i64>().ok()?;
    if hour > 23 || minute > 59 || second > 59 {
        return None;
    }

    let fraction = fraction.trim_end_matches('Z');
    if !fraction.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let micros: String = fraction.chars().chain(std::iter::repeat('0')).take(6).collect();
    let micros = micros.parse::<i64>().ok()?;

    let days = i64::from(days_from_civil(year, month, day));
    Some(((days * 24 + hour) * 60 + minute) * 60_000_000 + second * 1_000_000 + micros)
}

fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 if (year % 4 == 0 && year % 100 != 0) || year % 400 == 0 => 29,
        2 => 28,
        _ => 31,
    }
}

/// Days since 1970-01-01 in the proleptic Gregorian calendar.
fn days_from_civil(year: i64, month: u32, day: u32) -> i32 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = year.div_euclid(400);
    let year_of_era = year - era * 400;
    let month = i64::from(month);
    let day_of_year = (153 * (if month > 2 { month - 3 } else { month + 9 }) + 2) / 5 + i64::from(day) - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    (era * 146_097 + day_of_era - 719_468) as i32
}
