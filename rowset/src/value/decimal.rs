//! Scaled-integer decimal numbers.
//!
//! Every operand keeps the number of fractional digits it was written with,
//! and arithmetic is carried out on integers after aligning scales, so sums of
//! currency-like values never pick up binary floating-point artifacts.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

const MAX_SCALE: u32 = 28;

#[derive(Debug, Clone, Copy)]
pub struct Decimal {
    mantissa: i128,
    scale: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid decimal literal: '{0}'")]
pub struct ParseDecimalError(String);

impl Decimal {
    pub const ZERO: Decimal = Decimal {
        mantissa: 0,
        scale: 0,
    };

    /// `mantissa / 10^scale`. Scales beyond 28 digits are rounded down to 28.
    pub fn new(mantissa: i128, scale: u32) -> Self {
        Decimal { mantissa, scale }.round_dp(MAX_SCALE.min(scale))
    }

    pub fn from_i64(value: i64) -> Self {
        Decimal {
            mantissa: value as i128,
            scale: 0,
        }
    }

    /// Best-effort conversion of a float through its shortest decimal form.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        Decimal::parse(&format!("{value}"))
    }

    /// Parse `[+-]digits[.digits]`. Exponents and bare points are rejected.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (negative, unsigned) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };

        let (int_part, frac_part) = match unsigned.split_once('.') {
            Some((int_part, frac_part)) => {
                if frac_part.is_empty() {
                    return None;
                }
                (int_part, frac_part)
            }
            None => (unsigned, ""),
        };

        if int_part.is_empty()
            || !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }

        let scale = frac_part.len() as u32;
        if scale > MAX_SCALE {
            return None;
        }

        let mut mantissa: i128 = 0;
        for b in int_part.bytes().chain(frac_part.bytes()) {
            mantissa = mantissa.checked_mul(10)?.checked_add((b - b'0') as i128)?;
        }

        Some(Decimal {
            mantissa: if negative { -mantissa } else { mantissa },
            scale,
        })
    }

    pub fn mantissa(&self) -> i128 {
        self.mantissa
    }

    /// Number of fractional digits as written
    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Number of digits left of the decimal point, sign excluded
    pub fn integer_digits(&self) -> u32 {
        let integer = self.mantissa.unsigned_abs() / 10u128.pow(self.scale);
        integer.to_string().len() as u32
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa == 0
    }

    pub fn is_negative(&self) -> bool {
        self.mantissa < 0
    }

    /// Integer part, truncated toward zero
    pub fn trunc_i64(&self) -> Option<i64> {
        i64::try_from(self.mantissa / 10i128.pow(self.scale)).ok()
    }

    pub fn to_f64(&self) -> f64 {
        self.to_string().parse().unwrap_or(0.0)
    }

    /// Rescale to exactly `dp` fractional digits, rounding half away from zero.
    pub fn round_dp(&self, dp: u32) -> Decimal {
        let dp = dp.min(MAX_SCALE);
        match dp.cmp(&self.scale) {
            Ordering::Equal => *self,
            Ordering::Greater => match self.mantissa.checked_mul(10i128.pow(dp - self.scale)) {
                Some(mantissa) => Decimal { mantissa, scale: dp },
                None => *self,
            },
            Ordering::Less => Decimal {
                mantissa: mantissa_at(*self, dp).unwrap_or(0),
                scale: dp,
            },
        }
    }

    /// Drop trailing fractional zeros
    pub fn normalized(&self) -> Decimal {
        let mut result = *self;
        while result.scale > 0 && result.mantissa % 10 == 0 {
            result.mantissa /= 10;
            result.scale -= 1;
        }
        result
    }

    /// Sum of two decimals. When aligning to the finer scale would overflow,
    /// the result is carried at the largest scale that fits, rounding away
    /// the digits below it. `None` only when the integer part overflows.
    pub fn checked_add(self, rhs: Decimal) -> Option<Decimal> {
        combine(self, rhs, i128::checked_add)
    }

    pub fn checked_sub(self, rhs: Decimal) -> Option<Decimal> {
        combine(self, rhs, i128::checked_sub)
    }

    /// Sum of every value, `None` on overflow
    pub fn checked_sum<I: IntoIterator<Item = Decimal>>(values: I) -> Option<Decimal> {
        values
            .into_iter()
            .try_fold(Decimal::ZERO, Decimal::checked_add)
    }

    pub fn checked_mul(self, rhs: Decimal) -> Option<Decimal> {
        let product = Decimal {
            mantissa: self.mantissa.checked_mul(rhs.mantissa)?,
            scale: self.scale + rhs.scale,
        };
        if product.scale > MAX_SCALE {
            Some(product.round_dp(MAX_SCALE))
        } else {
            Some(product)
        }
    }

    /// Divide and round the quotient to `scale` fractional digits.
    /// Returns `None` on division by zero or overflow.
    pub fn checked_div(self, rhs: Decimal, scale: u32) -> Option<Decimal> {
        if rhs.is_zero() {
            return None;
        }
        let scale = scale.min(MAX_SCALE);
        // self.m / 10^a.s  /  (rhs.m / 10^b.s)  =  self.m * 10^(scale + b.s - a.s) / rhs.m / 10^scale
        let shift = scale as i64 + rhs.scale as i64 - self.scale as i64;
        let (numerator, denominator) = if shift >= 0 {
            (
                self.mantissa.checked_mul(10i128.checked_pow(shift as u32)?)?,
                rhs.mantissa,
            )
        } else {
            (
                self.mantissa,
                rhs.mantissa.checked_mul(10i128.checked_pow((-shift) as u32)?)?,
            )
        };
        Some(Decimal {
            mantissa: div_round(numerator, denominator),
            scale,
        })
    }
}

fn combine(a: Decimal, b: Decimal, op: fn(i128, i128) -> Option<i128>) -> Option<Decimal> {
    let finest = a.scale.max(b.scale);
    (0..=finest).rev().find_map(|scale| {
        let mantissa = op(mantissa_at(a, scale)?, mantissa_at(b, scale)?)?;
        Some(Decimal { mantissa, scale })
    })
}

/// Mantissa of `d` at `scale` fractional digits, rounded when coarser
fn mantissa_at(d: Decimal, scale: u32) -> Option<i128> {
    if scale >= d.scale {
        d.mantissa.checked_mul(10i128.checked_pow(scale - d.scale)?)
    } else {
        match 10i128.checked_pow(d.scale - scale) {
            Some(divisor) => Some(div_round(d.mantissa, divisor)),
            None => Some(0),
        }
    }
}

fn align(a: Decimal, b: Decimal) -> Option<(i128, i128, u32)> {
    let scale = a.scale.max(b.scale);
    let a_m = a.mantissa.checked_mul(10i128.checked_pow(scale - a.scale)?)?;
    let b_m = b.mantissa.checked_mul(10i128.checked_pow(scale - b.scale)?)?;
    Some((a_m, b_m, scale))
}

/// Integer division rounding half away from zero
fn div_round(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder.unsigned_abs() * 2 >= denominator.unsigned_abs() {
        if (numerator < 0) == (denominator < 0) {
            quotient + 1
        } else {
            quotient - 1
        }
    } else {
        quotient
    }
}

impl Default for Decimal {
    fn default() -> Self {
        Decimal::ZERO
    }
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        match align(self.normalized(), other.normalized()) {
            Some((a, b, _)) => a.cmp(&b),
            None => self
                .to_f64()
                .partial_cmp(&other.to_f64())
                .unwrap_or(Ordering::Equal),
        }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.mantissa.unsigned_abs().to_string();
        let sign = if self.mantissa < 0 { "-" } else { "" };
        let scale = self.scale as usize;
        if scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (int_part, frac_part) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int_part}.{frac_part}")
    }
}

impl FromStr for Decimal {
    type Err = ParseDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::parse(s).ok_or_else(|| ParseDecimalError(s.to_string()))
    }
}
