//! Kubernetes resource quantity parsing
//!
//! Covers the forms the metrics API and node status actually emit:
//! `250m`, `2`, `1500000n` for CPU and `16Gi`, `512Mi`, `1e9`, `1000k`
//! for memory.

use super::{MetricsError, MetricsResult};

/// Parse a CPU quantity into millicores
pub fn parse_cpu_millicores(quantity: &str) -> MetricsResult<f64> {
    let q = quantity.trim();
    let (number, scale) = if let Some(n) = q.strip_suffix('n') {
        (n, 1e-6)
    } else if let Some(u) = q.strip_suffix('u') {
        (u, 1e-3)
    } else if let Some(m) = q.strip_suffix('m') {
        (m, 1.0)
    } else {
        (q, 1000.0)
    };

    parse_number(number, quantity).map(|value| value * scale)
}

const BINARY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
];

const DECIMAL_SUFFIXES: &[(&str, f64)] = &[
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Parse a memory quantity into bytes
pub fn parse_memory_bytes(quantity: &str) -> MetricsResult<f64> {
    let q = quantity.trim();

    for (suffix, multiplier) in BINARY_SUFFIXES.iter().chain(DECIMAL_SUFFIXES) {
        if let Some(number) = q.strip_suffix(suffix) {
            return parse_number(number, quantity).map(|value| value * multiplier);
        }
    }

    // Plain bytes, possibly in exponent form such as `1e9`
    parse_number(q, quantity)
}

fn parse_number(number: &str, original: &str) -> MetricsResult<f64> {
    match number.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(value),
        _ => Err(MetricsError::InvalidQuantity(original.to_string())),
    }
}
