//! Exact resource quantities
//!
//! Quantities are stored as signed milli-units so that CPU (`400m`), memory
//! (`10Gi`) and plain counts share one integer representation. Repeated
//! add/subtract cycles never drift.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Milli-units per whole unit
const MILLI: i128 = 1000;

/// Errors produced while parsing a quantity string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid number in quantity {0:?}")]
    InvalidNumber(String),

    #[error("unknown suffix {suffix:?} in quantity {input:?}")]
    UnknownSuffix { input: String, suffix: String },

    #[error("quantity {0:?} is out of range")]
    Overflow(String),
}

/// An exact resource amount in milli-units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(i64);

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    pub const fn from_milli(milli: i64) -> Self {
        Self(milli)
    }

    /// Whole units, saturating at the representable range
    pub const fn from_units(units: i64) -> Self {
        Self(units.saturating_mul(1000))
    }

    pub const fn milli_value(&self) -> i64 {
        self.0
    }

    /// Whole units, rounded up
    pub fn value(&self) -> i64 {
        self.0.div_euclid(1000) + i64::from(self.0.rem_euclid(1000) != 0)
    }

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn saturating_add(self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_sub(other.0))
    }

    pub fn checked_add(self, other: Quantity) -> Option<Quantity> {
        self.0.checked_add(other.0).map(Quantity)
    }

    pub fn checked_sub(self, other: Quantity) -> Option<Quantity> {
        self.0.checked_sub(other.0).map(Quantity)
    }

    pub fn negate(self) -> Quantity {
        Quantity(self.0.saturating_neg())
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1000 == 0 {
            write!(f, "{}", self.0 / 1000)
        } else {
            write!(f, "{}m", self.0)
        }
    }
}

/// Scale applied by a suffix: `base ^ exponent`
#[derive(Debug, Clone, Copy)]
enum Scale {
    Decimal(i32),
    Binary(u32),
}

fn parse_suffix(input: &str, suffix: &str) -> Result<Scale, QuantityError> {
    let scale = match suffix {
        "" => Scale::Decimal(0),
        "n" => Scale::Decimal(-9),
        "u" => Scale::Decimal(-6),
        "m" => Scale::Decimal(-3),
        "k" => Scale::Decimal(3),
        "M" => Scale::Decimal(6),
        "G" => Scale::Decimal(9),
        "T" => Scale::Decimal(12),
        "P" => Scale::Decimal(15),
        "E" => Scale::Decimal(18),
        "Ki" => Scale::Binary(10),
        "Mi" => Scale::Binary(20),
        "Gi" => Scale::Binary(30),
        "Ti" => Scale::Binary(40),
        "Pi" => Scale::Binary(50),
        "Ei" => Scale::Binary(60),
        other => {
            // Decimal exponent form: 10e6, 1E3, 5e-3
            let exponent = other
                .strip_prefix(['e', 'E'])
                .filter(|rest| !rest.is_empty())
                .and_then(|rest| rest.parse::<i32>().ok())
                .ok_or_else(|| QuantityError::UnknownSuffix {
                    input: input.to_string(),
                    suffix: other.to_string(),
                })?;
            Scale::Decimal(exponent)
        }
    };
    Ok(scale)
}

fn ceil_div(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    if numerator % denominator != 0 {
        quotient + 1
    } else {
        quotient
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(QuantityError::Empty);
        }

        let (negative, unsigned) = match trimmed.as_bytes()[0] {
            b'-' => (true, &trimmed[1..]),
            b'+' => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };

        let number_len = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(number_len);

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(QuantityError::InvalidNumber(input.to_string()));
        }

        let overflow = || QuantityError::Overflow(input.to_string());
        let digits = format!("{whole}{fraction}");
        let mantissa: i128 = digits
            .parse()
            .map_err(|_| QuantityError::InvalidNumber(input.to_string()))?;
        let fraction_digits = i32::try_from(fraction.len()).map_err(|_| overflow())?;

        let magnitude = match parse_suffix(input, suffix)? {
            Scale::Decimal(exponent) => {
                // milli = mantissa * 10^(exponent + 3 - fraction_digits)
                let power = exponent
                    .checked_add(3)
                    .and_then(|p| p.checked_sub(fraction_digits))
                    .ok_or_else(overflow)?;
                if power >= 0 {
                    10i128
                        .checked_pow(power as u32)
                        .and_then(|factor| mantissa.checked_mul(factor))
                        .ok_or_else(overflow)?
                } else if power < -38 {
                    i128::from(mantissa != 0)
                } else {
                    ceil_div(mantissa, 10i128.pow(power.unsigned_abs()))
                }
            }
            Scale::Binary(exponent) => {
                let numerator = mantissa
                    .checked_mul(1i128 << exponent)
                    .and_then(|value| value.checked_mul(MILLI))
                    .ok_or_else(overflow)?;
                let denominator = 10i128
                    .checked_pow(fraction_digits as u32)
                    .ok_or_else(overflow)?;
                ceil_div(numerator, denominator)
            }
        };

        let signed = if negative { -magnitude } else { magnitude };
        i64::try_from(signed).map(Quantity).map_err(|_| overflow())
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct QuantityVisitor;

impl<'de> Visitor<'de> for QuantityVisitor {
    type Value = Quantity;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a quantity string such as \"400m\" or \"10Gi\", or an integer")
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<Quantity, E> {
        value.parse().map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<Quantity, E> {
        value
            .checked_mul(1000)
            .map(Quantity)
            .ok_or_else(|| E::custom(QuantityError::Overflow(value.to_string())))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<Quantity, E> {
        i64::try_from(value)
            .map_err(|_| E::custom(QuantityError::Overflow(value.to_string())))
            .and_then(|v| self.visit_i64(v))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<Quantity, E> {
        if !value.is_finite() {
            return Err(E::custom(QuantityError::InvalidNumber(value.to_string())));
        }
        self.visit_str(&value.to_string())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(QuantityVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_cpu_forms() {
        assert_eq!(q("400m").milli_value(), 400);
        assert_eq!(q("2").milli_value(), 2000);
        assert_eq!(q("1.5").milli_value(), 1500);
        assert_eq!(q("0.1").milli_value(), 100);
        assert_eq!(q(".5").milli_value(), 500);
    }

    #[test]
    fn test_parse_memory_forms() {
        assert_eq!(q("10e6").value(), 10_000_000);
        assert_eq!(q("10E9").value(), 10_000_000_000);
        assert_eq!(q("128Mi").value(), 128 * 1024 * 1024);
        assert_eq!(q("1.5Gi").value(), 1536 * 1024 * 1024);
        assert_eq!(q("1k").value(), 1000);
        assert_eq!(q("2G").value(), 2_000_000_000);
    }

    #[test]
    fn test_bare_exa_suffix_is_not_an_exponent() {
        assert_eq!(q("2P").value(), 2_000_000_000_000_000);
        // one exa-unit does not fit in i64 milli-units
        assert!(matches!(
            "1E".parse::<Quantity>(),
            Err(QuantityError::Overflow(_))
        ));
        assert!(matches!(
            "1e".parse::<Quantity>(),
            Err(QuantityError::UnknownSuffix { .. })
        ));
    }

    #[test]
    fn test_sub_milli_rounds_up() {
        assert_eq!(q("500u").milli_value(), 1);
        assert_eq!(q("1n").milli_value(), 1);
        assert_eq!(q("0n").milli_value(), 0);
        assert_eq!(q("1500u").milli_value(), 2);
    }

    #[test]
    fn test_negative_quantities() {
        assert_eq!(q("-100m").milli_value(), -100);
        assert!(q("-1").is_negative());
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Quantity>(), Err(QuantityError::Empty));
        assert!(matches!(
            "abc".parse::<Quantity>(),
            Err(QuantityError::InvalidNumber(_))
        ));
        assert!(matches!(
            "10Xi".parse::<Quantity>(),
            Err(QuantityError::UnknownSuffix { .. })
        ));
        assert!(matches!(
            "1.2.3".parse::<Quantity>(),
            Err(QuantityError::InvalidNumber(_))
        ));
        assert!(matches!(
            "100Ei".parse::<Quantity>(),
            Err(QuantityError::Overflow(_))
        ));
    }

    #[test]
    fn test_extreme_exponents() {
        assert!(matches!(
            "1e2147483647".parse::<Quantity>(),
            Err(QuantityError::Overflow(_))
        ));
        assert!(matches!(
            "1.5e2147483647".parse::<Quantity>(),
            Err(QuantityError::Overflow(_))
        ));
        assert!(matches!(
            "1.2345e-2147483648".parse::<Quantity>(),
            Err(QuantityError::Overflow(_))
        ));
        // vanishingly small values still round up to one milli-unit
        assert_eq!(q("1e-2147483645").milli_value(), 1);
    }

    #[test]
    fn test_display_is_canonical() {
        assert_eq!(q("400m").to_string(), "400m");
        assert_eq!(q("2000m").to_string(), "2");
        assert_eq!(q("1Ki").to_string(), "1024");
        assert_eq!(Quantity::ZERO.to_string(), "0");
    }

    #[test]
    fn test_value_rounds_up_partial_units() {
        assert_eq!(Quantity::from_milli(1).value(), 1);
        assert_eq!(Quantity::from_milli(1000).value(), 1);
        assert_eq!(Quantity::from_milli(1001).value(), 2);
        assert_eq!(Quantity::from_milli(-1500).value(), -1);
    }

    #[test]
    fn test_serde_accepts_strings_and_integers() {
        let parsed: Vec<Quantity> = serde_json::from_str(r#"["250m", 3, "1Gi"]"#).unwrap();
        assert_eq!(parsed[0].milli_value(), 250);
        assert_eq!(parsed[1].milli_value(), 3000);
        assert_eq!(parsed[2].value(), 1 << 30);

        let json = serde_json::to_string(&parsed).unwrap();
        assert_eq!(json, r#"["250m","3","1073741824"]"#);
    }
}
