//! Storage Quantities
//!
//! Exact arithmetic for Kubernetes-style resource quantities ("100Gi",
//! "1.5T", "500m", "12e6"). Values are held as a signed count of
//! nano-units, which covers every scale the API server accepts without
//! ever touching floating point.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

// =============================================================================
// Constants
// =============================================================================

/// Nano-units per whole unit
const NANOS_PER_UNIT: i128 = 1_000_000_000;

/// Decimal exponent of one nano-unit
const NANO_EXPONENT: i32 = 9;

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ei", 6),
    ("Pi", 5),
    ("Ti", 4),
    ("Gi", 3),
    ("Mi", 2),
    ("Ki", 1),
];

const DECIMAL_SUFFIXES: [(&str, i32); 6] = [
    ("E", 18),
    ("P", 15),
    ("T", 12),
    ("G", 9),
    ("M", 6),
    ("k", 3),
];

const FRACTIONAL_SUFFIXES: [(&str, i32); 3] = [("m", -3), ("u", -6), ("n", -9)];

// =============================================================================
// Format
// =============================================================================

/// Suffix family a quantity was written in; preserved when printing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityFormat {
    /// Powers of 1024 (Ki, Mi, Gi, ...)
    BinarySI,
    /// Powers of 1000 (k, M, G, ...) and sub-unit suffixes (m, u, n)
    DecimalSI,
    /// Scientific notation (1e3, 5E-3)
    DecimalExponent,
}

// =============================================================================
// Storage Quantity
// =============================================================================

/// An exact, signed resource quantity
#[derive(Debug, Clone, Copy)]
pub struct StorageQuantity {
    nanos: i128,
    format: QuantityFormat,
}

impl StorageQuantity {
    /// Zero in binary notation
    pub const ZERO: StorageQuantity = StorageQuantity {
        nanos: 0,
        format: QuantityFormat::BinarySI,
    };

    /// Quantity of whole bytes, printed with binary suffixes
    pub fn from_bytes(bytes: u64) -> Self {
        Self {
            nanos: bytes as i128 * NANOS_PER_UNIT,
            format: QuantityFormat::BinarySI,
        }
    }

    /// Parse a quantity string
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        if s.is_empty() {
            return Err(Error::CapacityParse("empty quantity string".into()));
        }

        let (negative, body) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let num_end = body
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(body.len());
        let (number, suffix) = body.split_at(num_end);

        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(Error::CapacityParse(format!("no digits in '{}'", input)));
        }
        if frac_part.contains('.') {
            return Err(Error::CapacityParse(format!("invalid number in '{}'", input)));
        }

        let mut mantissa: i128 = 0;
        for digit in int_part.bytes().chain(frac_part.bytes()) {
            mantissa = mantissa
                .checked_mul(10)
                .and_then(|m| m.checked_add((digit - b'0') as i128))
                .ok_or_else(|| overflow(input))?;
        }

        let (format, binary_power, decimal_exponent) = parse_suffix(suffix, input)?;

        let mut value = mantissa;
        if binary_power > 0 {
            let multiplier = 1024i128
                .checked_pow(binary_power)
                .ok_or_else(|| overflow(input))?;
            value = value.checked_mul(multiplier).ok_or_else(|| overflow(input))?;
        }

        let exponent = decimal_exponent
            .saturating_add(NANO_EXPONENT)
            .saturating_sub(frac_part.len() as i32);
        let magnitude = scale_by_power_of_ten(value, exponent).ok_or_else(|| overflow(input))?;

        Ok(Self {
            nanos: if negative { -magnitude } else { magnitude },
            format,
        })
    }

    /// The suffix family used when printing
    pub fn format(&self) -> QuantityFormat {
        self.format
    }

    /// Check if the quantity is zero
    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// Check if the quantity is below zero
    pub fn is_negative(&self) -> bool {
        self.nanos < 0
    }

    /// Whole units, rounded up
    pub fn ceil_units(&self) -> i128 {
        let whole = self.nanos.div_euclid(NANOS_PER_UNIT);
        if self.nanos.rem_euclid(NANOS_PER_UNIT) == 0 {
            whole
        } else {
            whole + 1
        }
    }

    /// Add another quantity, keeping this quantity's format
    pub fn checked_add(&self, other: &StorageQuantity) -> Result<Self> {
        let nanos = self.nanos.checked_add(other.nanos).ok_or_else(|| {
            Error::CapacityParse(format!("overflow adding {} to {}", other, self))
        })?;
        Ok(Self {
            nanos,
            format: self.format,
        })
    }

    /// Subtract another quantity, keeping this quantity's format
    pub fn checked_sub(&self, other: &StorageQuantity) -> Result<Self> {
        let nanos = self.nanos.checked_sub(other.nanos).ok_or_else(|| {
            Error::CapacityParse(format!("overflow subtracting {} from {}", other, self))
        })?;
        Ok(Self {
            nanos,
            format: self.format,
        })
    }

    fn fmt_fractional(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (suffix, exponent) in FRACTIONAL_SUFFIXES {
            let unit = 10i128.pow((NANO_EXPONENT + exponent) as u32);
            if self.nanos % unit == 0 {
                let n = self.nanos / unit;
                return match self.format {
                    QuantityFormat::DecimalExponent => write!(f, "{}e{}", n, exponent),
                    _ => write!(f, "{}{}", n, suffix),
                };
            }
        }
        unreachable!("a nano-unit always divides the value")
    }

    fn fmt_decimal(&self, units: i128, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if units == 0 {
            return write!(f, "0");
        }
        for (suffix, exponent) in DECIMAL_SUFFIXES {
            let unit = 10i128.pow(exponent as u32);
            if units % unit == 0 {
                return match self.format {
                    QuantityFormat::DecimalExponent => write!(f, "{}e{}", units / unit, exponent),
                    _ => write!(f, "{}{}", units / unit, suffix),
                };
            }
        }
        write!(f, "{}", units)
    }

    fn fmt_binary(&self, units: i128, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (suffix, power) in BINARY_SUFFIXES {
            let unit = 1024i128.pow(power);
            if units % unit == 0 {
                return write!(f, "{}{}", units / unit, suffix);
            }
        }
        write!(f, "{}", units)
    }
}

fn parse_suffix(suffix: &str, input: &str) -> Result<(QuantityFormat, u32, i32)> {
    if suffix.is_empty() {
        return Ok((QuantityFormat::DecimalSI, 0, 0));
    }
    if let Some((_, power)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Ok((QuantityFormat::BinarySI, *power, 0));
    }
    if let Some((_, exp)) = DECIMAL_SUFFIXES
        .iter()
        .chain(FRACTIONAL_SUFFIXES.iter())
        .find(|(s, _)| *s == suffix)
    {
        return Ok((QuantityFormat::DecimalSI, 0, *exp));
    }
    if let Some(exp) = suffix.strip_prefix('e').or_else(|| suffix.strip_prefix('E')) {
        let exp: i32 = exp
            .parse()
            .map_err(|_| Error::CapacityParse(format!("invalid exponent in '{}'", input)))?;
        return Ok((QuantityFormat::DecimalExponent, 0, exp));
    }
    Err(Error::CapacityParse(format!(
        "unknown suffix '{}' in '{}'",
        suffix, input
    )))
}

/// Multiply by 10^exponent; negative exponents divide and round up
fn scale_by_power_of_ten(value: i128, exponent: i32) -> Option<i128> {
    if exponent >= 0 {
        let factor = 10i128.checked_pow(exponent as u32)?;
        value.checked_mul(factor)
    } else {
        let Some(divisor) = 10i128.checked_pow(exponent.unsigned_abs()) else {
            return Some(if value == 0 { 0 } else { 1 });
        };
        let quotient = value / divisor;
        Some(if value % divisor == 0 { quotient } else { quotient + 1 })
    }
}

fn overflow(input: &str) -> Error {
    Error::CapacityParse(format!("quantity '{}' is out of range", input))
}

impl fmt::Display for StorageQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos % NANOS_PER_UNIT != 0 {
            return self.fmt_fractional(f);
        }
        let units = self.nanos / NANOS_PER_UNIT;
        match self.format {
            // Binary values below 1Ki print with decimal suffixes
            QuantityFormat::BinarySI if units.abs() >= 1024 => self.fmt_binary(units, f),
            _ => self.fmt_decimal(units, f),
        }
    }
}

impl FromStr for StorageQuantity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl PartialEq for StorageQuantity {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for StorageQuantity {}

impl PartialOrd for StorageQuantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StorageQuantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl Hash for StorageQuantity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.nanos.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GI: i128 = 1024 * 1024 * 1024;

    fn q(s: &str) -> StorageQuantity {
        StorageQuantity::parse(s).unwrap()
    }

    #[test]
    fn test_parse_binary_and_decimal() {
        assert_eq!(q("100Gi").ceil_units(), 100 * GI);
        assert_eq!(q("1Ki").ceil_units(), 1024);
        assert_eq!(q("1k").ceil_units(), 1000);
        assert_eq!(q("1.5G").ceil_units(), 1_500_000_000);
        assert_eq!(q("12e6").ceil_units(), 12_000_000);
        assert_eq!(q("42").ceil_units(), 42);
        assert_eq!(q("-3Mi").ceil_units(), -3 * 1024 * 1024);
        assert_eq!(q("100Gi").format(), QuantityFormat::BinarySI);
        assert_eq!(q("5M").format(), QuantityFormat::DecimalSI);
    }

    #[test]
    fn test_parse_fractional() {
        assert_eq!(q("500m").ceil_units(), 1);
        assert_eq!(q("500m").to_string(), "500m");
        assert_eq!(q("0.5").to_string(), "500m");
        assert_eq!(q("1n").to_string(), "1n");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(StorageQuantity::parse("").is_err());
        assert!(StorageQuantity::parse("abc").is_err());
        assert!(StorageQuantity::parse("100X").is_err());
        assert!(StorageQuantity::parse("1.2.3").is_err());
        assert!(StorageQuantity::parse("99999999999999999999999999999999999999999Ei").is_err());
    }

    #[test]
    fn test_canonical_display() {
        assert_eq!(q("200Gi").to_string(), "200Gi");
        assert_eq!(q("1024Mi").to_string(), "1Gi");
        assert_eq!(q("1000k").to_string(), "1M");
        assert_eq!(q("1500").to_string(), "1500");
        assert_eq!(StorageQuantity::from_bytes(1500).to_string(), "1500");
        assert_eq!(StorageQuantity::from_bytes(1000).to_string(), "1k");
        assert_eq!(StorageQuantity::from_bytes(3 * 1024 * 1024).to_string(), "3Mi");
        assert_eq!(q("3e3").to_string(), "3e3");
        assert_eq!(StorageQuantity::ZERO.to_string(), "0");
    }

    #[test]
    fn test_arithmetic_keeps_receiver_format() {
        let ledger = q("200Gi");
        let volume = q("20Gi");

        let after = ledger.checked_sub(&volume).unwrap();
        assert_eq!(after.to_string(), "180Gi");

        let restored = after.checked_add(&volume).unwrap();
        assert_eq!(restored, ledger);
        assert_eq!(restored.to_string(), "200Gi");

        let mixed = q("1Gi").checked_add(&q("1G")).unwrap();
        assert_eq!(mixed.format(), QuantityFormat::BinarySI);
        assert_eq!(mixed.ceil_units(), GI + 1_000_000_000);
    }

    #[test]
    fn test_ordering_ignores_format() {
        assert_eq!(q("1Ki"), q("1024"));
        assert!(q("1Gi") > q("1G"));
        assert!(q("-1") < StorageQuantity::ZERO);
        assert!(q("-1").is_negative());
        assert!(q("0Gi").is_zero());
    }
}
