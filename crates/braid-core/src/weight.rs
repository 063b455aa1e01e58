//! Log2-domain weight arithmetic.
//!
//! Every function here is built from IEEE-754 basic operations only
//! (add, multiply, divide, floor and bit manipulation). None of them call the
//! platform `log2`/`exp2`, whose last-bit results differ between libm
//! implementations. Two nodes on different platforms therefore compute the
//! same minimum weights and the same work values bit-for-bit.

use crate::types::Work;

const LN_2: f64 = 0.693_147_180_559_945_3;
const LOG2_E: f64 = 1.442_695_040_888_963_4;
const SQRT_2: f64 = 1.414_213_562_373_095_1;

const MANTISSA_MASK: u64 = 0x000f_ffff_ffff_ffff;
const EXPONENT_ONE: u64 = 0x3ff0_0000_0000_0000;

/// Split a positive finite `x` into `m * 2^e` with `m` in `[1, 2)`.
fn frexp(x: f64) -> (f64, i64) {
    let bits = x.to_bits();
    let exp_bits = ((bits >> 52) & 0x7ff) as i64;
    if exp_bits == 0 {
        // Subnormal: lift into the normal range first.
        let (m, e) = frexp(x * 18_446_744_073_709_551_616.0);
        return (m, e - 64);
    }
    let m = f64::from_bits((bits & MANTISSA_MASK) | EXPONENT_ONE);
    (m, exp_bits - 1023)
}

/// Multiply `x` by `2^n`.
fn ldexp(mut x: f64, mut n: i64) -> f64 {
    while n > 1023 {
        x *= f64::from_bits(((1023 + 1023) as u64) << 52);
        n -= 1023;
    }
    while n < -1022 {
        x *= f64::from_bits(1u64 << 52);
        n += 1022;
    }
    x * f64::from_bits(((n + 1023) as u64) << 52)
}

/// Base-2 logarithm.
pub fn log2(x: f64) -> f64 {
    if x.is_nan() || x < 0.0 {
        return f64::NAN;
    }
    if x == 0.0 {
        return f64::NEG_INFINITY;
    }
    if x.is_infinite() {
        return f64::INFINITY;
    }

    let (mut m, mut e) = frexp(x);
    if m > SQRT_2 {
        m *= 0.5;
        e += 1;
    }

    // ln(m) = 2·atanh(s), s = (m-1)/(m+1), |s| < 0.172
    let s = (m - 1.0) / (m + 1.0);
    let s2 = s * s;
    let mut p = 0.0;
    let mut k = 29.0;
    while k >= 1.0 {
        p = p * s2 + 1.0 / k;
        k -= 2.0;
    }
    e as f64 + 2.0 * s * p * LOG2_E
}

/// `2^y`.
pub fn exp2(y: f64) -> f64 {
    if y.is_nan() {
        return f64::NAN;
    }
    if y >= 1024.0 {
        return f64::INFINITY;
    }
    if y < -1080.0 {
        return 0.0;
    }

    let n = y.floor();
    let r = (y - n) * LN_2;

    // e^r by Horner over the Taylor series, r in [0, ln 2)
    let mut p = 1.0;
    let mut k = 22.0;
    while k >= 1.0 {
        p = 1.0 + p * r / k;
        k -= 1.0;
    }
    ldexp(p, n as i64)
}

/// `log2(2^a + 2^b)` without leaving the log domain.
///
/// Zero is treated as "no weight yet", so `sum_weights(0, w) == w`.
pub fn sum_weights(a: f64, b: f64) -> f64 {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    if lo == 0.0 {
        return hi;
    }
    hi + log2(1.0 + exp2(lo - hi))
}

/// Log2-domain sum of a sequence of weights, folded left to right.
pub fn sum_all<I: IntoIterator<Item = f64>>(weights: I) -> f64 {
    weights.into_iter().fold(0.0, sum_weights)
}

/// Integer work represented by `weight`: `round(2^weight)`, saturating.
pub fn weight_to_work(weight: f64) -> Work {
    if weight.is_nan() || weight < -1.0 {
        return 0;
    }
    if weight >= 128.0 {
        return Work::MAX;
    }
    (exp2(weight) + 0.5).floor() as Work
}

/// Inverse of [`weight_to_work`], used for logs and reports.
pub fn work_to_weight(work: Work) -> f64 {
    if work == 0 {
        return 0.0;
    }
    log2(work as f64)
}
