//! Mantissa/exponent numbers.
//!
//! A value is stored as `mantissa × 2^exponent`. Every constructor and every
//! arithmetic operation renormalises the mantissa so that its largest
//! component has magnitude in `[1, 2)`, zero being stored as `0 × 2^0`.
//! Non-finite mantissas are kept as they are so that NaN and infinities
//! propagate like they would in plain `f64` arithmetic.

use std::cmp::Ordering;
use std::f64::consts::{LN_10, LN_2};
use std::fmt;
use std::iter::Product;
use std::ops::{Add, Div, Mul, MulAssign, Neg, Sub};

use num_complex::Complex64;

use crate::error::RangeError;

/// Largest exponent that still converts to a finite `f64`.
const MAX_EXPONENT: i64 = f64::MAX_EXP as i64 - 1;
/// Smallest exponent that still converts to a non-zero (subnormal) `f64`.
const MIN_EXPONENT: i64 = f64::MIN_EXP as i64 - f64::MANTISSA_DIGITS as i64;
/// Past this exponent gap the smaller addend is lost entirely.
const ALIGN_LIMIT: i64 = 128;
const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

/// Binary exponent `e` such that `2^e <= |x| < 2^(e+1)`, for finite non-zero `x`.
fn binary_exponent(x: f64) -> i64 {
    let biased = ((x.to_bits() >> 52) & 0x7ff) as i64;
    if biased == 0 {
        // subnormal
        binary_exponent(x * TWO_POW_64) - 64
    } else {
        biased - 1023
    }
}

/// `x × 2^e`, stepping so the scale factor itself never overflows.
fn scale(x: f64, e: i64) -> f64 {
    let mut x = x;
    let mut e = e;
    while e > 1000 {
        if x == 0.0 || !x.is_finite() {
            return x;
        }
        x *= 2f64.powi(1000);
        e -= 1000;
    }
    while e < -1000 {
        if x == 0.0 || !x.is_finite() {
            return x;
        }
        x *= 2f64.powi(-1000);
        e += 1000;
    }
    x * 2f64.powi(e as i32)
}

fn check_range(exponent: i64) -> Result<(), RangeError> {
    if exponent > MAX_EXPONENT {
        Err(RangeError::Overflow { exponent })
    } else if exponent < MIN_EXPONENT {
        Err(RangeError::Underflow { exponent })
    } else {
        Ok(())
    }
}

/// Splits `mantissa × 2^exponent` into a decimal mantissa factor and a power of ten.
fn decimal_parts(exponent: i64) -> (f64, i64) {
    let log10 = exponent as f64 * LN_2 / LN_10;
    let decade = log10.floor();
    (10f64.powf(log10 - decade), decade as i64)
}

/// Extended-range real number.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BigReal {
    mantissa: f64,
    exponent: i64,
}

impl BigReal {
    pub const ZERO: BigReal = BigReal { mantissa: 0.0, exponent: 0 };
    pub const ONE: BigReal = BigReal { mantissa: 1.0, exponent: 0 };

    /// Builds `mantissa × 2^exponent` and renormalises it.
    pub fn new(mantissa: f64, exponent: i64) -> Self {
        if mantissa == 0.0 {
            return Self::ZERO;
        }
        if !mantissa.is_finite() {
            return Self { mantissa, exponent: 0 };
        }
        let shift = binary_exponent(mantissa);
        Self {
            mantissa: scale(mantissa, -shift),
            exponent: exponent.saturating_add(shift),
        }
    }

    pub fn mantissa(&self) -> f64 {
        self.mantissa
    }

    pub fn exponent(&self) -> i64 {
        self.exponent
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa == 0.0
    }

    pub fn abs(self) -> Self {
        Self { mantissa: self.mantissa.abs(), exponent: self.exponent }
    }

    /// Natural logarithm of the magnitude.
    pub fn ln(&self) -> f64 {
        self.mantissa.abs().ln() + self.exponent as f64 * LN_2
    }

    /// Square root of a non-negative value (NaN mantissa otherwise).
    pub fn sqrt(self) -> Self {
        if self.exponent % 2 == 0 {
            Self::new(self.mantissa.sqrt(), self.exponent / 2)
        } else {
            Self::new((2.0 * self.mantissa).sqrt(), (self.exponent - 1) / 2)
        }
    }

    /// Converts back to `f64`, failing outside the representable range.
    pub fn to_f64(&self) -> Result<f64, RangeError> {
        if self.is_zero() || !self.mantissa.is_finite() {
            return Ok(self.mantissa);
        }
        check_range(self.exponent)?;
        Ok(scale(self.mantissa, self.exponent))
    }

    /// Converts back to `f64`, collapsing to `±∞` or `0` out of range and
    /// returning the range condition next to the collapsed value.
    pub fn to_f64_saturating(&self) -> (f64, Option<RangeError>) {
        match self.to_f64() {
            Ok(x) => (x, None),
            Err(err @ RangeError::Overflow { .. }) => {
                (self.mantissa.signum() * f64::INFINITY, Some(err))
            }
            Err(err @ RangeError::Underflow { .. }) => (0.0, Some(err)),
        }
    }

    fn sign_class(&self) -> i8 {
        if self.mantissa > 0.0 {
            1
        } else if self.mantissa < 0.0 {
            -1
        } else {
            0
        }
    }
}

impl Default for BigReal {
    fn default() -> Self {
        Self::ZERO
    }
}

impl From<f64> for BigReal {
    fn from(x: f64) -> Self {
        Self::new(x, 0)
    }
}

impl PartialOrd for BigReal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if !self.mantissa.is_finite() || !other.mantissa.is_finite() {
            return self.mantissa.partial_cmp(&other.mantissa);
        }
        let (sa, sb) = (self.sign_class(), other.sign_class());
        if sa != sb {
            return Some(sa.cmp(&sb));
        }
        if sa == 0 {
            return Some(Ordering::Equal);
        }
        let magnitude = match self.exponent.cmp(&other.exponent) {
            Ordering::Equal => self.mantissa.abs().partial_cmp(&other.mantissa.abs())?,
            ord => ord,
        };
        Some(if sa > 0 { magnitude } else { magnitude.reverse() })
    }
}

impl Neg for BigReal {
    type Output = Self;
    fn neg(self) -> Self {
        Self { mantissa: -self.mantissa, exponent: self.exponent }
    }
}

impl Mul for BigReal {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.mantissa * rhs.mantissa, self.exponent.saturating_add(rhs.exponent))
    }
}

impl Div for BigReal {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        Self::new(self.mantissa / rhs.mantissa, self.exponent.saturating_sub(rhs.exponent))
    }
}

impl Add for BigReal {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        if self.is_zero() {
            return rhs;
        }
        if rhs.is_zero() {
            return self;
        }
        let (hi, lo) = if self.exponent >= rhs.exponent { (self, rhs) } else { (rhs, self) };
        let gap = hi.exponent - lo.exponent;
        if gap > ALIGN_LIMIT {
            return hi;
        }
        Self::new(hi.mantissa + scale(lo.mantissa, -gap), hi.exponent)
    }
}

impl Sub for BigReal {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self + (-rhs)
    }
}

impl fmt::Display for BigReal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (factor, decade) = decimal_parts(self.exponent);
        write!(f, "{:.6}e{}", self.mantissa * factor, decade)
    }
}

/// Extended-range complex number.
///
/// There is deliberately no `PartialEq`: compare magnitudes through
/// [`BigComplex::abs`] instead.
#[derive(Clone, Copy, Debug)]
pub struct BigComplex {
    mantissa: Complex64,
    exponent: i64,
}

impl BigComplex {
    pub const ZERO: BigComplex = BigComplex { mantissa: Complex64::new(0.0, 0.0), exponent: 0 };
    pub const ONE: BigComplex = BigComplex { mantissa: Complex64::new(1.0, 0.0), exponent: 0 };

    /// Builds `mantissa × 2^exponent` and renormalises it.
    pub fn new(mantissa: Complex64, exponent: i64) -> Self {
        let largest = mantissa.re.abs().max(mantissa.im.abs());
        if largest == 0.0 {
            return Self::ZERO;
        }
        if !mantissa.re.is_finite() || !mantissa.im.is_finite() {
            return Self { mantissa, exponent: 0 };
        }
        let shift = binary_exponent(largest);
        Self {
            mantissa: Complex64::new(scale(mantissa.re, -shift), scale(mantissa.im, -shift)),
            exponent: exponent.saturating_add(shift),
        }
    }

    pub fn mantissa(&self) -> Complex64 {
        self.mantissa
    }

    pub fn exponent(&self) -> i64 {
        self.exponent
    }

    pub fn is_zero(&self) -> bool {
        self.mantissa.re == 0.0 && self.mantissa.im == 0.0
    }

    pub fn conj(self) -> Self {
        Self { mantissa: self.mantissa.conj(), exponent: self.exponent }
    }

    /// `|z|²` as an extended real.
    pub fn norm_sqr(&self) -> BigReal {
        BigReal::new(self.mantissa.norm_sqr(), self.exponent.saturating_mul(2))
    }

    /// `|z|` as an extended real.
    pub fn abs(&self) -> BigReal {
        BigReal::new(self.mantissa.norm(), self.exponent)
    }

    /// Principal complex logarithm, always representable.
    pub fn ln(&self) -> Complex64 {
        Complex64::new(
            self.mantissa.norm().ln() + self.exponent as f64 * LN_2,
            self.mantissa.arg(),
        )
    }

    /// Converts back to `Complex64`, failing outside the representable range.
    pub fn to_complex(&self) -> Result<Complex64, RangeError> {
        if self.is_zero() || !self.mantissa.re.is_finite() || !self.mantissa.im.is_finite() {
            return Ok(self.mantissa);
        }
        check_range(self.exponent)?;
        Ok(Complex64::new(
            scale(self.mantissa.re, self.exponent),
            scale(self.mantissa.im, self.exponent),
        ))
    }

    /// Converts back to `Complex64`, collapsing each component to `±∞` (or
    /// zero) on overflow and to zero on underflow. The range condition is
    /// returned next to the collapsed value.
    pub fn to_complex_saturating(&self) -> (Complex64, Option<RangeError>) {
        let infinite = |x: f64| if x == 0.0 { 0.0 } else { x.signum() * f64::INFINITY };
        match self.to_complex() {
            Ok(z) => (z, None),
            Err(err @ RangeError::Overflow { .. }) => (
                Complex64::new(infinite(self.mantissa.re), infinite(self.mantissa.im)),
                Some(err),
            ),
            Err(err @ RangeError::Underflow { .. }) => (Complex64::new(0.0, 0.0), Some(err)),
        }
    }
}

impl Default for BigComplex {
    fn default() -> Self {
        Self::ZERO
    }
}

impl From<Complex64> for BigComplex {
    fn from(z: Complex64) -> Self {
        Self::new(z, 0)
    }
}

impl From<f64> for BigComplex {
    fn from(x: f64) -> Self {
        Self::new(Complex64::new(x, 0.0), 0)
    }
}

impl From<BigReal> for BigComplex {
    fn from(x: BigReal) -> Self {
        Self::new(Complex64::new(x.mantissa, 0.0), x.exponent)
    }
}

impl Neg for BigComplex {
    type Output = Self;
    fn neg(self) -> Self {
        Self { mantissa: -self.mantissa, exponent: self.exponent }
    }
}

impl Mul for BigComplex {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.mantissa * rhs.mantissa, self.exponent.saturating_add(rhs.exponent))
    }
}

impl Mul<Complex64> for BigComplex {
    type Output = Self;
    fn mul(self, rhs: Complex64) -> Self {
        Self::new(self.mantissa * rhs, self.exponent)
    }
}

impl MulAssign for BigComplex {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl MulAssign<Complex64> for BigComplex {
    fn mul_assign(&mut self, rhs: Complex64) {
        *self = *self * rhs;
    }
}

impl Div for BigComplex {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        Self::new(self.mantissa / rhs.mantissa, self.exponent.saturating_sub(rhs.exponent))
    }
}

impl Div<Complex64> for BigComplex {
    type Output = Self;
    fn div(self, rhs: Complex64) -> Self {
        Self::new(self.mantissa / rhs, self.exponent)
    }
}

impl Add for BigComplex {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        if self.is_zero() {
            return rhs;
        }
        if rhs.is_zero() {
            return self;
        }
        let (hi, lo) = if self.exponent >= rhs.exponent { (self, rhs) } else { (rhs, self) };
        let gap = hi.exponent - lo.exponent;
        if gap > ALIGN_LIMIT {
            return hi;
        }
        let aligned = Complex64::new(scale(lo.mantissa.re, -gap), scale(lo.mantissa.im, -gap));
        Self::new(hi.mantissa + aligned, hi.exponent)
    }
}

impl Sub for BigComplex {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self + (-rhs)
    }
}

impl Product for BigComplex {
    fn product<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ONE, |acc, z| acc * z)
    }
}

impl Product<Complex64> for BigComplex {
    fn product<I: Iterator<Item = Complex64>>(iter: I) -> Self {
        iter.fold(Self::ONE, |acc, z| acc * z)
    }
}

impl fmt::Display for BigComplex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (factor, decade) = decimal_parts(self.exponent);
        write!(
            f,
            "({:.6}{:+.6}i)e{}",
            self.mantissa.re * factor,
            self.mantissa.im * factor,
            decade
        )
    }
}
