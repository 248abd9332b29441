//! CPU quantity conversion
//!
//! Kubernetes reports CPU as a quantity string (`"4"`, `"850m"`,
//! `"123456789n"`). Everything here works in milli-CPU, rounding fractions up.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid CPU quantity '{0}'")]
pub struct QuantityError(pub String);

/// Convert a CPU quantity to milli-CPU
pub fn cpu_millis(quantity: &Quantity) -> Result<u64, QuantityError> {
    parse_cpu_millis(&quantity.0)
}

pub fn parse_cpu_millis(raw: &str) -> Result<u64, QuantityError> {
    let invalid = || QuantityError(raw.to_string());
    let trimmed = raw.trim();

    let split = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+'))
        .unwrap_or(trimmed.len());
    let (number, suffix) = trimmed.split_at(split);

    let value: f64 = number.parse().map_err(|_| invalid())?;
    let millis = match suffix {
        "n" => value / 1e6,
        "u" => value / 1e3,
        "m" => value,
        "" => value * 1e3,
        "k" => value * 1e6,
        "M" => value * 1e9,
        "G" => value * 1e12,
        "Ki" => value * 1024.0 * 1e3,
        "Mi" => value * 1024.0 * 1024.0 * 1e3,
        "Gi" => value * 1024.0 * 1024.0 * 1024.0 * 1e3,
        _ => return Err(invalid()),
    };

    // drop float noise below a nano-core before rounding up
    let millis = ((millis * 1e6).round() / 1e6).ceil();
    if !millis.is_finite() || millis < 0.0 {
        return Err(invalid());
    }
    Ok(millis as u64)
}

/// Usage as a whole percentage of capacity, rounded half away from zero
pub fn usage_percent(used_millis: u64, capacity_millis: u64) -> u64 {
    if capacity_millis == 0 {
        return u64::MAX;
    }
    (used_millis as f64 / capacity_millis as f64 * 100.0).round() as u64
}
