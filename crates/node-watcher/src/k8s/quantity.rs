//! Parsing of Kubernetes resource quantities (`500m`, `2Gi`, `1e3`, ...).

use error_stack::Report;

use crate::error::TranslateError;

/// Parse a CPU quantity into cores, supporting the milli-core suffix ("500m").
///
/// # Errors
///
/// - [`TranslateError::InvalidQuantity`] if the value is not a valid quantity
pub fn parse_cpu(value: &str) -> Result<f64, Report<TranslateError>> {
    parse_quantity("cpu", value)
}

/// Parse a memory quantity into bytes.
///
/// Supports the following units:
/// - No suffix: bytes, optionally in exponent form ("1e3")
/// - Binary: "Ki", "Mi", "Gi", "Ti", "Pi", "Ei"
/// - Decimal: "k", "M", "G", "T", "P", "E"
/// - "m": milli-bytes, rounded down
///
/// # Errors
///
/// - [`TranslateError::InvalidQuantity`] if the value is not a valid quantity
pub fn parse_memory(value: &str) -> Result<u64, Report<TranslateError>> {
    let bytes = parse_quantity("memory", value)?;
    Ok(bytes as u64)
}

/// Parse an extended resource count such as `nvidia.com/gpu`.
///
/// # Errors
///
/// - [`TranslateError::InvalidQuantity`] if the value is not a whole number
pub fn parse_count(value: &str) -> Result<u32, Report<TranslateError>> {
    value.trim().parse::<u32>().map_err(|e| {
        Report::new(invalid("gpu", value)).attach_printable(e.to_string())
    })
}

fn parse_quantity(resource: &'static str, value: &str) -> Result<f64, Report<TranslateError>> {
    let value = value.trim();

    // Handle plain numbers, including the exponent form
    if let Ok(number) = value.parse::<f64>() {
        return non_negative(resource, value, number);
    }

    // Find the numeric part and unit part
    let Some(pos) = value.find(|c: char| c.is_ascii_alphabetic()) else {
        return Err(Report::new(invalid(resource, value)));
    };
    let (numeric_part, unit) = value.split_at(pos);

    let numeric_value: f64 = numeric_part.parse::<f64>().map_err(|e| {
        Report::new(invalid(resource, value)).attach_printable(e.to_string())
    })?;

    let multiplier = match unit {
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024_f64,
        "Mi" => 1024_f64.powi(2),
        "Gi" => 1024_f64.powi(3),
        "Ti" => 1024_f64.powi(4),
        "Pi" => 1024_f64.powi(5),
        "Ei" => 1024_f64.powi(6),
        _ => {
            return Err(Report::new(invalid(resource, value))
                .attach_printable(format!("Unsupported unit: {unit}")));
        }
    };

    non_negative(resource, value, numeric_value * multiplier)
}

fn non_negative(
    resource: &'static str,
    value: &str,
    number: f64,
) -> Result<f64, Report<TranslateError>> {
    if number.is_finite() && number >= 0.0 {
        Ok(number)
    } else {
        Err(Report::new(invalid(resource, value)))
    }
}

fn invalid(resource: &'static str, value: &str) -> TranslateError {
    TranslateError::InvalidQuantity {
        resource,
        value: value.to_string(),
    }
}
