//! Closed-interval arithmetic over `f64`.
//!
//! This module defines the `Interval` type used by the bounds-evaluation path
//! of every expression node. An interval is a closed range `[lower, upper]`
//! of finite doubles; a degenerate interval (`lower == upper`) represents an
//! exact value, and the `whole()` sentinel represents "bounds unknown or
//! unbounded".
//!
//! Every operation is *sound*: the result contains every value the scalar
//! operation can produce for operands drawn from the inputs. Non-monotonic
//! functions (sine, cosine, squaring, multiplication) are handled by
//! critical-point analysis rather than endpoint application. Arithmetic uses
//! the platform's round-to-nearest results directly (the exact-rounding
//! policy); no directed rounding is performed.
//!
//! Division and the partial elementary functions (`asin`, `acos`, `log`,
//! `sqrt`) are fallible and return `EvalError` values; see the individual
//! methods.

use std::fmt;
use std::ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use num_traits::{One, Zero};

use crate::errors::EvalError;

/// A closed interval of doubles.
///
/// Invariant: `lower <= upper`. Both endpoints are finite except for the
/// `whole()` sentinel, which is `[-inf, +inf]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    lower: f64,
    upper: f64,
}

impl Interval {
    /// Creates the interval `[lower, upper]`.
    ///
    /// # Panics
    /// Debug builds panic if `lower > upper` or either endpoint is NaN.
    pub fn new(lower: f64, upper: f64) -> Self {
        debug_assert!(lower <= upper, "invalid interval [{lower}, {upper}]");
        Self { lower, upper }
    }

    /// The unbounded sentinel `[-inf, +inf]`.
    pub fn whole() -> Self {
        Self {
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
        }
    }

    /// Smallest interval containing both endpoints, collapsing to `whole()`
    /// when either is non-finite (overflow in an interior computation).
    fn enclosure(lower: f64, upper: f64) -> Self {
        if lower.is_finite() && upper.is_finite() {
            Self::new(lower, upper)
        } else {
            Self::whole()
        }
    }

    pub fn lower(self) -> f64 {
        self.lower
    }

    pub fn upper(self) -> f64 {
        self.upper
    }

    pub fn width(self) -> f64 {
        self.upper - self.lower
    }

    pub fn midpoint(self) -> f64 {
        0.5 * (self.lower + self.upper)
    }

    /// True for a degenerate interval representing an exact value.
    pub fn is_singleton(self) -> bool {
        self.lower == self.upper
    }

    pub fn is_whole(self) -> bool {
        self.lower == f64::NEG_INFINITY && self.upper == f64::INFINITY
    }

    /// Splits at the midpoint; both halves share the split point.
    pub fn bisected(self) -> (Self, Self) {
        let mid = self.midpoint();
        (Self::new(self.lower, mid), Self::new(mid, self.upper))
    }

    /// Smallest interval containing both `self` and `other`.
    pub fn hull(self, other: Self) -> Self {
        Self::new(self.lower.min(other.lower), self.upper.max(other.upper))
    }

    /// Intersection, or `None` when the intervals are disjoint.
    pub fn intersection(self, other: Self) -> Option<Self> {
        let lower = self.lower.max(other.lower);
        let upper = self.upper.min(other.upper);
        (lower <= upper).then(|| Self::new(lower, upper))
    }

    /// True when the intervals intersect after widening each side by
    /// `tolerance`.
    pub fn overlaps(self, other: Self, tolerance: f64) -> bool {
        self.lower - tolerance <= other.upper && other.lower <= self.upper + tolerance
    }

    /// True when the intervals intersect even after *shrinking* each side by
    /// `tolerance` (robust overlap for downstream geometry predicates).
    pub fn strictly_overlaps(self, other: Self, tolerance: f64) -> bool {
        self.lower + tolerance < other.upper && other.lower < self.upper - tolerance
    }

    pub fn contains_value(self, value: f64, tolerance: f64) -> bool {
        self.lower - tolerance <= value && value <= self.upper + tolerance
    }

    pub fn contains(self, other: Self, tolerance: f64) -> bool {
        self.lower - tolerance <= other.lower && other.upper <= self.upper + tolerance
    }

    /// Tight enclosure of `x * x`; never negative, unlike `self * self`.
    pub fn squared(self) -> Self {
        let (a, b) = (self.lower * self.lower, self.upper * self.upper);
        if self.lower <= 0.0 && self.upper >= 0.0 {
            Self::enclosure(0.0, a.max(b))
        } else {
            Self::enclosure(a.min(b), a.max(b))
        }
    }

    /// Enclosure of `|x|`.
    pub fn abs(self) -> Self {
        if self.lower >= 0.0 {
            self
        } else if self.upper <= 0.0 {
            -self
        } else {
            Self::new(0.0, (-self.lower).max(self.upper))
        }
    }

    /// Division, failing when the divisor contains zero, since there is no
    /// safe finite enclosure in that case.
    pub fn checked_div(self, rhs: Self) -> Result<Self, EvalError> {
        if rhs.lower <= 0.0 && rhs.upper >= 0.0 {
            return Err(EvalError::DivisionByZero {
                lower: rhs.lower,
                upper: rhs.upper,
            });
        }
        if self.is_whole() {
            return Ok(Self::whole());
        }
        let q = [
            self.lower / rhs.lower,
            self.lower / rhs.upper,
            self.upper / rhs.lower,
            self.upper / rhs.upper,
        ];
        Ok(Self::enclosure(
            q.iter().copied().fold(f64::INFINITY, f64::min),
            q.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        ))
    }

    /// Sound enclosure of the sine of every value in the interval.
    pub fn sin(self) -> Self {
        use std::f64::consts::{FRAC_PI_2, TAU};
        if self.is_whole() || self.width() >= TAU {
            return Self::new(-1.0, 1.0);
        }
        let (sl, su) = (self.lower.sin(), self.upper.sin());
        let mut lower = sl.min(su);
        let mut upper = sl.max(su);
        if self.spans_congruent(FRAC_PI_2, TAU) {
            upper = 1.0;
        }
        if self.spans_congruent(-FRAC_PI_2, TAU) {
            lower = -1.0;
        }
        Self::new(lower, upper)
    }

    /// Sound enclosure of the cosine of every value in the interval.
    pub fn cos(self) -> Self {
        use std::f64::consts::{PI, TAU};
        if self.is_whole() || self.width() >= TAU {
            return Self::new(-1.0, 1.0);
        }
        let (cl, cu) = (self.lower.cos(), self.upper.cos());
        let mut lower = cl.min(cu);
        let mut upper = cl.max(cu);
        if self.spans_congruent(0.0, TAU) {
            upper = 1.0;
        }
        if self.spans_congruent(PI, TAU) {
            lower = -1.0;
        }
        Self::new(lower, upper)
    }

    /// Enclosure of the tangent; collapses to `whole()` when the interval
    /// crosses an asymptote.
    pub fn tan(self) -> Self {
        use std::f64::consts::{FRAC_PI_2, PI};
        if self.is_whole() || self.width() >= PI || self.spans_congruent(FRAC_PI_2, PI) {
            return Self::whole();
        }
        Self::enclosure(self.lower.tan(), self.upper.tan())
    }

    /// Enclosure of the arctangent (total and monotonic).
    pub fn atan(self) -> Self {
        Self::new(self.lower.atan(), self.upper.atan())
    }

    /// Enclosure of the exponential (monotonic; overflow widens to
    /// `whole()`).
    pub fn exp(self) -> Self {
        if self.is_whole() {
            return Self::whole();
        }
        Self::enclosure(self.lower.exp(), self.upper.exp())
    }

    /// Enclosure of the natural logarithm.
    ///
    /// Fails with `DomainError` when the interval is entirely non-positive.
    /// An interval straddling zero has a range unbounded below and collapses
    /// to `whole()`.
    pub fn log(self) -> Result<Self, EvalError> {
        if self.upper <= 0.0 {
            return Err(self.domain_error("log"));
        }
        if self.lower <= 0.0 {
            return Ok(Self::whole());
        }
        Ok(Self::enclosure(self.lower.ln(), self.upper.ln()))
    }

    /// Enclosure of the square root; any negative part clamps to zero.
    ///
    /// Fails with `DomainError` when the interval is entirely negative.
    pub fn sqrt(self) -> Result<Self, EvalError> {
        if self.upper < 0.0 {
            return Err(self.domain_error("sqrt"));
        }
        Ok(Self::enclosure(
            self.lower.max(0.0).sqrt(),
            self.upper.sqrt(),
        ))
    }

    /// Enclosure of the arcsine over the part of the interval inside
    /// [-1, 1].
    ///
    /// Fails with `DomainError` when the interval does not intersect the
    /// function's domain.
    pub fn asin(self) -> Result<Self, EvalError> {
        let clamped = self
            .intersection(Self::new(-1.0, 1.0))
            .ok_or_else(|| self.domain_error("asin"))?;
        Ok(Self::new(clamped.lower.asin(), clamped.upper.asin()))
    }

    /// Enclosure of the arccosine over the part of the interval inside
    /// [-1, 1]; decreasing, so the endpoints swap.
    pub fn acos(self) -> Result<Self, EvalError> {
        let clamped = self
            .intersection(Self::new(-1.0, 1.0))
            .ok_or_else(|| self.domain_error("acos"))?;
        Ok(Self::new(clamped.upper.acos(), clamped.lower.acos()))
    }

    fn domain_error(self, function: &'static str) -> EvalError {
        EvalError::DomainError {
            function,
            lower: self.lower,
            upper: self.upper,
        }
    }

    /// True when some value congruent to `target` modulo `period` lies in
    /// the interval.
    fn spans_congruent(self, target: f64, period: f64) -> bool {
        let k = ((self.lower - target) / period).ceil();
        target + k * period <= self.upper
    }
}

impl From<f64> for Interval {
    /// The degenerate interval representing an exact value.
    fn from(value: f64) -> Self {
        Self::new(value, value)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

impl Neg for Interval {
    type Output = Interval;

    fn neg(self) -> Interval {
        Interval::new(-self.upper, -self.lower)
    }
}

impl Add for Interval {
    type Output = Interval;

    fn add(self, rhs: Interval) -> Interval {
        // Overflow (or a whole operand) collapses to the whole sentinel.
        Interval::enclosure(self.lower + rhs.lower, self.upper + rhs.upper)
    }
}

impl Sub for Interval {
    type Output = Interval;

    fn sub(self, rhs: Interval) -> Interval {
        Interval::enclosure(self.lower - rhs.upper, self.upper - rhs.lower)
    }
}

impl Mul for Interval {
    type Output = Interval;

    fn mul(self, rhs: Interval) -> Interval {
        // Zero absorbs even the whole sentinel; checking it first keeps
        // 0 * inf out of the endpoint products.
        if self.is_zero() || rhs.is_zero() {
            return Interval::zero();
        }
        if self.is_whole() || rhs.is_whole() {
            return Interval::whole();
        }
        let p = [
            self.lower * rhs.lower,
            self.lower * rhs.upper,
            self.upper * rhs.lower,
            self.upper * rhs.upper,
        ];
        Interval::enclosure(
            p.iter().copied().fold(f64::INFINITY, f64::min),
            p.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        )
    }
}

impl AddAssign for Interval {
    fn add_assign(&mut self, rhs: Interval) {
        *self = *self + rhs;
    }
}

impl SubAssign for Interval {
    fn sub_assign(&mut self, rhs: Interval) {
        *self = *self - rhs;
    }
}

impl MulAssign for Interval {
    fn mul_assign(&mut self, rhs: Interval) {
        *self = *self * rhs;
    }
}

// Zero/One make Interval usable as a nalgebra matrix scalar, so interval
// matrix products (the Linear bounds path) go through nalgebra directly.
impl Zero for Interval {
    fn zero() -> Self {
        Self::from(0.0)
    }

    fn is_zero(&self) -> bool {
        self.lower == 0.0 && self.upper == 0.0
    }
}

impl One for Interval {
    fn one() -> Self {
        Self::from(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_hull_contains_both_operands() {
        let a = Interval::new(-2.0, 1.0);
        let b = Interval::new(0.5, 3.0);
        let hull = a.hull(b);
        assert!(hull.contains(a, 0.0));
        assert!(hull.contains(b, 0.0));
        assert_eq!(hull, Interval::new(-2.0, 3.0));
    }

    #[test]
    fn test_multiplication_sign_cases() {
        let cases = [
            (Interval::new(1.0, 2.0), Interval::new(3.0, 4.0)),
            (Interval::new(-2.0, -1.0), Interval::new(3.0, 4.0)),
            (Interval::new(-2.0, 3.0), Interval::new(-1.0, 4.0)),
            (Interval::new(-5.0, -1.0), Interval::new(-4.0, -3.0)),
        ];
        for (a, b) in cases {
            let product = a * b;
            // Sampling the corners plus interior points must stay inside.
            for &x in &[a.lower(), a.midpoint(), a.upper()] {
                for &y in &[b.lower(), b.midpoint(), b.upper()] {
                    assert!(
                        product.contains_value(x * y, 1e-12),
                        "{a} * {b} lost {x} * {y}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_zero_times_whole_is_zero() {
        assert_eq!(Interval::zero() * Interval::whole(), Interval::zero());
    }

    #[test]
    fn test_division_by_straddling_interval_fails() {
        let err = Interval::new(1.0, 2.0)
            .checked_div(Interval::new(-1.0, 1.0))
            .unwrap_err();
        assert!(matches!(err, EvalError::DivisionByZero { .. }));

        // Exactly-zero point divisor also fails.
        assert!(Interval::from(1.0)
            .checked_div(Interval::from(0.0))
            .is_err());
    }

    #[test]
    fn test_division_sound_when_divisor_is_signed() {
        let q = Interval::new(1.0, 2.0)
            .checked_div(Interval::new(2.0, 4.0))
            .unwrap();
        assert_eq!(q, Interval::new(0.25, 1.0));

        let q = Interval::new(1.0, 2.0)
            .checked_div(Interval::new(-4.0, -2.0))
            .unwrap();
        assert_eq!(q, Interval::new(-1.0, -0.25));
    }

    #[test]
    fn test_sine_captures_interior_extrema() {
        // [0, pi] contains the maximum at pi/2 but neither endpoint is 1.
        let s = Interval::new(0.0, PI).sin();
        assert_eq!(s.upper(), 1.0);
        assert!(s.lower() <= 0.0);

        // A full period collapses to [-1, 1].
        assert_eq!(Interval::new(0.0, 7.0).sin(), Interval::new(-1.0, 1.0));

        // A monotonic stretch stays at the endpoints.
        let s = Interval::new(0.1, 1.2).sin();
        assert_eq!(s, Interval::new(0.1f64.sin(), 1.2f64.sin()));
    }

    #[test]
    fn test_cosine_captures_interior_extrema() {
        let c = Interval::new(FRAC_PI_2, 3.0 * FRAC_PI_2).cos();
        assert_eq!(c.lower(), -1.0);
        // Shifted periods still find the maximum.
        let c = Interval::new(2.0 * PI - 0.1, 2.0 * PI + 0.1).cos();
        assert_eq!(c.upper(), 1.0);
    }

    #[test]
    fn test_tangent_across_asymptote_is_whole() {
        assert!(Interval::new(1.0, 2.0).tan().is_whole());
        let t = Interval::new(-0.5, 0.5).tan();
        assert_eq!(t, Interval::new((-0.5f64).tan(), 0.5f64.tan()));
    }

    #[test]
    fn test_asin_requires_domain_overlap() {
        assert!(Interval::new(2.0, 3.0).asin().is_err());
        // Partial overlap clamps instead of failing.
        let a = Interval::new(0.5, 4.0).asin().unwrap();
        assert_eq!(a, Interval::new(0.5f64.asin(), FRAC_PI_2));
        // acos is decreasing.
        let a = Interval::new(-1.0, 0.0).acos().unwrap();
        assert_eq!(a, Interval::new(FRAC_PI_2, PI));
    }

    #[test]
    fn test_log_and_sqrt_domains() {
        assert!(Interval::new(-2.0, -1.0).log().is_err());
        assert!(Interval::new(-1.0, 1.0).log().unwrap().is_whole());
        let l = Interval::new(1.0, std::f64::consts::E).log().unwrap();
        assert!(l.contains_value(0.5, 1e-12));
        assert_eq!(l.lower(), 0.0);

        assert!(Interval::new(-2.0, -1.0).sqrt().is_err());
        assert_eq!(
            Interval::new(-1.0, 4.0).sqrt().unwrap(),
            Interval::new(0.0, 2.0)
        );
    }

    #[test]
    fn test_squared_is_nonnegative() {
        assert_eq!(Interval::new(-2.0, 1.0).squared(), Interval::new(0.0, 4.0));
        assert_eq!(Interval::new(-3.0, -2.0).squared(), Interval::new(4.0, 9.0));
    }

    #[test]
    fn test_overlap_predicates() {
        let a = Interval::new(0.0, 1.0);
        let b = Interval::new(1.5, 2.0);
        assert!(!a.overlaps(b, 0.0));
        assert!(a.overlaps(b, 0.6));
        // Touching intervals overlap but not strictly.
        let c = Interval::new(1.0, 2.0);
        assert!(a.overlaps(c, 0.0));
        assert!(!a.strictly_overlaps(c, 0.0));
        assert!(Interval::new(0.0, 1.0).strictly_overlaps(Interval::new(0.2, 0.8), 0.1));
    }

    #[test]
    fn test_bisected_shares_midpoint() {
        let (left, right) = Interval::new(0.0, 4.0).bisected();
        assert_eq!(left, Interval::new(0.0, 2.0));
        assert_eq!(right, Interval::new(2.0, 4.0));
    }

    #[test]
    fn test_exp_overflow_widens_to_whole() {
        assert!(Interval::new(0.0, 1e300).exp().is_whole());
        let e = Interval::new(0.0, 1.0).exp();
        assert_eq!(e, Interval::new(1.0, std::f64::consts::E));
    }
}
