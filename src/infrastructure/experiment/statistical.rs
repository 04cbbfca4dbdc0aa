//! Statistical analysis functions for A/B testing
//!
//! Frequentist two-proportion z-tests with a pooled standard error, sample
//! size planning, and a chi-squared independence test across all variants.
//! Everything here is pure arithmetic over counts; degenerate inputs yield
//! sentinel values (0, `None`, p = 1) instead of errors.

use serde::{Deserialize, Serialize};

use crate::domain::experiment::{ConfidenceInterval, Variant, VariantId};

/// Critical value for a two-sided 95% interval
const Z_95: f64 = 1.959_963_984_540_054;

/// Minimum total visitors before a "no winner" verdict is meaningful
pub const MINIMUM_VISITORS_FOR_VERDICT: u64 = 100;

/// Significance level used by the chi-squared report
const CHI_SQUARED_ALPHA: f64 = 0.05;

// ============================================================================
// Two-proportion z-test
// ============================================================================

/// Pooled two-proportion z-score of variant B against control A
///
/// Positive when B converts better than A. Returns `0.0` when either sample
/// is empty or the pooled standard error is zero (both rates 0% or 100%).
pub fn calculate_z_score(
    control_visitors: u64,
    control_conversions: u64,
    variant_visitors: u64,
    variant_conversions: u64,
) -> f64 {
    if control_visitors == 0 || variant_visitors == 0 {
        return 0.0;
    }

    let n_a = control_visitors as f64;
    let n_b = variant_visitors as f64;
    let p_a = control_conversions as f64 / n_a;
    let p_b = variant_conversions as f64 / n_b;
    let pooled = (control_conversions + variant_conversions) as f64 / (n_a + n_b);

    let se = (pooled * (1.0 - pooled) * (1.0 / n_a + 1.0 / n_b)).sqrt();

    if !(se > 0.0) {
        return 0.0;
    }

    (p_b - p_a) / se
}

/// Two-tailed confidence (0 - 100) that a z-score reflects a real difference
pub fn z_score_to_confidence(z: f64) -> f64 {
    let confidence = (2.0 * normal_cdf(z.abs()) - 1.0) * 100.0;
    confidence.clamp(0.0, 100.0)
}

/// Relative lift of a rate over a baseline, in percent; 0 for a zero baseline
pub fn lift(baseline_rate: f64, rate: f64) -> f64 {
    if baseline_rate > 0.0 {
        (rate - baseline_rate) / baseline_rate * 100.0
    } else {
        0.0
    }
}

/// 95% Wald interval around a conversion rate, clamped to [0, 1]
pub fn confidence_interval(visitors: u64, conversions: u64) -> ConfidenceInterval {
    if visitors == 0 {
        return ConfidenceInterval::default();
    }

    let n = visitors as f64;
    let rate = conversions as f64 / n;
    let margin = Z_95 * (rate * (1.0 - rate) / n).sqrt();

    ConfidenceInterval::new((rate - margin).max(0.0), (rate + margin).min(1.0))
}

// ============================================================================
// Sample size planning
// ============================================================================

/// Minimum visitors per group to detect a relative lift of `mde`
///
/// `n = (z_{1-α/2} + z_power)^2 * (p1(1-p1) + p2(1-p2)) / (p1 - p2)^2` with
/// `p2 = p1 * (1 + mde)`. Returns `None` when the baseline, confidence or
/// power fall outside (0, 1), when `mde` is not positive, or when the
/// expected rate would reach 100%.
pub fn calculate_minimum_sample_size(
    baseline_rate: f64,
    minimum_detectable_effect: f64,
    confidence: f64,
    power: f64,
) -> Option<u64> {
    let in_unit = |v: f64| v > 0.0 && v < 1.0;

    if !in_unit(baseline_rate) || !in_unit(confidence) || !in_unit(power) {
        return None;
    }
    if !(minimum_detectable_effect > 0.0) {
        return None;
    }

    let p1 = baseline_rate;
    let p2 = p1 * (1.0 + minimum_detectable_effect);

    if p2 >= 1.0 {
        tracing::warn!(
            baseline_rate,
            minimum_detectable_effect,
            "Expected rate reaches 100%, sample size undefined"
        );
        return None;
    }

    let z_alpha = inverse_normal_cdf(1.0 - (1.0 - confidence) / 2.0);
    let z_beta = inverse_normal_cdf(power);

    let variance = p1 * (1.0 - p1) + p2 * (1.0 - p2);
    let diff_sq = (p1 - p2).powi(2);

    if diff_sq <= 0.0 {
        return None;
    }

    let n = (z_alpha + z_beta).powi(2) * variance / diff_sq;

    Some((n.ceil() as u64).max(1))
}

/// Days until `required` visitors are reached at `daily_rate` visitors a day
///
/// `Some(0)` once reached, `None` when no rate is available.
pub fn estimate_days_to_significance(current: u64, daily_rate: f64, required: u64) -> Option<u64> {
    if current >= required {
        return Some(0);
    }
    if !(daily_rate > 0.0) {
        return None;
    }

    let remaining = (required - current) as f64;
    Some((remaining / daily_rate).ceil() as u64)
}

// ============================================================================
// Chi-squared independence test
// ============================================================================

/// Outcome of a chi-squared test over a 2xK conversion table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChiSquaredResult {
    pub chi_squared: f64,
    pub degrees_of_freedom: u32,
    pub p_value: f64,
    pub significant: bool,
}

/// Chi-squared test of independence between variant and conversion
///
/// Takes `(visitors, conversions)` per variant. Fewer than two variants or
/// no visitors at all yields a non-significant result with `p = 1`.
pub fn chi_squared_test(counts: &[(u64, u64)]) -> ChiSquaredResult {
    let k = counts.len();
    let degrees_of_freedom = k.saturating_sub(1) as u32;

    let not_significant = ChiSquaredResult {
        chi_squared: 0.0,
        degrees_of_freedom,
        p_value: 1.0,
        significant: false,
    };

    if k < 2 {
        return ChiSquaredResult {
            degrees_of_freedom: 0,
            ..not_significant
        };
    }

    let total_visitors: u64 = counts.iter().map(|(n, _)| n).sum();
    let total_conversions: u64 = counts.iter().map(|(n, c)| (*c).min(*n)).sum();

    if total_visitors == 0 {
        return not_significant;
    }

    let total_n = total_visitors as f64;
    let total_c = total_conversions as f64;
    let total_nc = total_n - total_c;

    let mut chi_squared = 0.0;

    for &(n, c) in counts.iter().filter(|(n, _)| *n > 0) {
        let c = c.min(n) as f64;
        let n = n as f64;
        let expected_c = n * total_c / total_n;
        let expected_nc = n * total_nc / total_n;

        if expected_c > 0.0 {
            chi_squared += (c - expected_c).powi(2) / expected_c;
        }
        if expected_nc > 0.0 {
            chi_squared += ((n - c) - expected_nc).powi(2) / expected_nc;
        }
    }

    let p_value = chi_squared_p_value(chi_squared, degrees_of_freedom);

    ChiSquaredResult {
        chi_squared,
        degrees_of_freedom,
        p_value,
        significant: p_value < CHI_SQUARED_ALPHA,
    }
}

/// Upper tail probability of the chi-squared distribution
fn chi_squared_p_value(chi_squared: f64, df: u32) -> f64 {
    if chi_squared <= 0.0 || df == 0 {
        return 1.0;
    }

    let p = regularized_gamma_p(f64::from(df) / 2.0, chi_squared / 2.0);
    (1.0 - p).clamp(0.0, 1.0)
}

// ============================================================================
// Experiment analysis
// ============================================================================

/// Counts of one variant fed into [`analyze_experiment`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantCounts {
    pub variant_id: VariantId,
    pub label: String,
    pub is_control: bool,
    pub visitors: u64,
    pub conversions: u64,
}

impl From<&Variant> for VariantCounts {
    fn from(variant: &Variant) -> Self {
        Self {
            variant_id: variant.id().clone(),
            label: variant.label().to_string(),
            is_control: variant.is_control(),
            visitors: variant.visitors(),
            conversions: variant.conversions(),
        }
    }
}

/// One analysed variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantAnalysis {
    pub variant_id: VariantId,
    pub label: String,
    pub is_control: bool,
    pub visitors: u64,
    pub conversions: u64,
    /// Conversion rate in percent
    pub conversion_rate: f64,
    pub z_score: f64,
    /// Confidence in percent
    pub confidence: f64,
    pub significant: bool,
    /// Lift over the control in percent
    pub lift: f64,
}

/// Comparison of every variant against the control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentAnalysis {
    pub variants: Vec<VariantAnalysis>,
    pub winner: Option<VariantId>,
    pub recommendation: String,
}

impl ExperimentAnalysis {
    pub fn has_winner(&self) -> bool {
        self.winner.is_some()
    }
}

/// Compare each variant against the control and pick a winner
///
/// The control is the variant flagged `is_control`, or the first one. The
/// winner is the significant variant with positive lift and the highest
/// confidence. `confidence_threshold` is a ratio (0.95).
pub fn analyze_experiment(variants: &[VariantCounts], confidence_threshold: f64) -> ExperimentAnalysis {
    let Some(control_index) = variants
        .iter()
        .position(|v| v.is_control)
        .or_else(|| (!variants.is_empty()).then_some(0))
    else {
        return ExperimentAnalysis {
            variants: Vec::new(),
            winner: None,
            recommendation: "No variants to analyse.".to_string(),
        };
    };

    let threshold_pct = confidence_threshold * 100.0;
    let control = &variants[control_index];
    let control_rate = rate_percent(control.visitors, control.conversions);

    let mut best: Option<(usize, f64, f64)> = None;
    let mut results = Vec::with_capacity(variants.len());

    for (index, v) in variants.iter().enumerate() {
        let is_control = index == control_index;
        let conversion_rate = rate_percent(v.visitors, v.conversions);

        let mut analysis = VariantAnalysis {
            variant_id: v.variant_id.clone(),
            label: v.label.clone(),
            is_control,
            visitors: v.visitors,
            conversions: v.conversions,
            conversion_rate,
            z_score: 0.0,
            confidence: 0.0,
            significant: false,
            lift: 0.0,
        };

        if !is_control {
            let z = calculate_z_score(
                control.visitors,
                control.conversions,
                v.visitors,
                v.conversions,
            );
            let confidence = z_score_to_confidence(z);
            let variant_lift = lift(control_rate, conversion_rate);

            analysis.z_score = z;
            analysis.confidence = confidence;
            analysis.significant = confidence >= threshold_pct;
            analysis.lift = variant_lift;

            let beats_best = best.is_none_or(|(_, best_conf, _)| confidence > best_conf);
            if analysis.significant && variant_lift > 0.0 && beats_best {
                best = Some((index, confidence, variant_lift));
            }
        }

        results.push(analysis);
    }

    let total_visitors: u64 = results.iter().map(|r| r.visitors).sum();

    let (winner, recommendation) = match best {
        Some((index, confidence, best_lift)) => {
            let winner = &results[index];
            (
                Some(winner.variant_id.clone()),
                format!(
                    "Winner detected: '{}' with a lift of {:.1}% at {:.1}% confidence. \
                     Roll it out as the new default and stop the experiment.",
                    winner.label, best_lift, confidence
                ),
            )
        }
        None if total_visitors < MINIMUM_VISITORS_FOR_VERDICT => (
            None,
            format!(
                "Insufficient data. At least {} visitors are needed for reliable results; \
                 keep collecting traffic.",
                MINIMUM_VISITORS_FOR_VERDICT
            ),
        ),
        None => (
            None,
            "No statistically significant winner yet. Keep the experiment running \
             or consider a larger minimum detectable effect."
                .to_string(),
        ),
    };

    ExperimentAnalysis {
        variants: results,
        winner,
        recommendation,
    }
}

fn rate_percent(visitors: u64, conversions: u64) -> f64 {
    if visitors == 0 {
        0.0
    } else {
        conversions as f64 / visitors as f64 * 100.0
    }
}

// ============================================================================
// Distribution functions
// ============================================================================

/// Standard normal cumulative distribution function
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Inverse of the standard normal CDF (Acklam's rational approximation)
///
/// Returns infinities at the closed ends of [0, 1].
pub fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

/// Error function (Abramowitz and Stegun 7.1.26), accurate to about 1.5e-7
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

/// Natural log of the gamma function (Lanczos, g = 7)
fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_93,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_13,
        -176.615_029_162_140_59,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_571_6e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        // Reflection formula
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let t = x + G + 0.5;
    let series = COEFFICIENTS
        .iter()
        .enumerate()
        .skip(1)
        .fold(COEFFICIENTS[0], |acc, (i, c)| acc + c / (x + i as f64));

    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

/// Regularized lower incomplete gamma function P(a, x)
fn regularized_gamma_p(a: f64, x: f64) -> f64 {
    if x <= 0.0 || a <= 0.0 {
        return 0.0;
    }

    if x < a + 1.0 {
        gamma_p_series(a, x)
    } else {
        1.0 - gamma_q_continued_fraction(a, x)
    }
}

const GAMMA_MAX_ITERATIONS: usize = 200;
const GAMMA_EPSILON: f64 = 1.0e-10;
const GAMMA_TINY: f64 = 1.0e-30;

fn gamma_p_series(a: f64, x: f64) -> f64 {
    let mut term = 1.0 / a;
    let mut sum = term;

    for n in 1..=GAMMA_MAX_ITERATIONS {
        term *= x / (a + n as f64);
        sum += term;
        if term.abs() < sum.abs() * GAMMA_EPSILON {
            break;
        }
    }

    sum * (-x + a * x.ln() - ln_gamma(a)).exp()
}

/// Upper regularized gamma Q(a, x) by modified Lentz continued fraction
fn gamma_q_continued_fraction(a: f64, x: f64) -> f64 {
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / GAMMA_TINY;
    let mut d = 1.0 / b;
    let mut h = d;

    for i in 1..=GAMMA_MAX_ITERATIONS {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;

        d = an * d + b;
        if d.abs() < GAMMA_TINY {
            d = GAMMA_TINY;
        }
        c = b + an / c;
        if c.abs() < GAMMA_TINY {
            c = GAMMA_TINY;
        }
        d = 1.0 / d;

        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < GAMMA_EPSILON {
            break;
        }
    }

    (-x + a * x.ln() - ln_gamma(a)).exp() * h
}
