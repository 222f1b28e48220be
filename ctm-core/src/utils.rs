use crate::state::ScenarioVector;
use ndarray::Zip;

/// Elementwise division with a caller-specified fill value wherever the
/// divisor is exactly zero. The conventional fill is `f64::INFINITY`, which
/// turns an unconstrained ratio into a non-binding bound instead of a NaN.
pub fn safe_div(num: &ScenarioVector, den: &ScenarioVector, fill: f64) -> ScenarioVector {
    Zip::from(num)
        .and(den)
        .map_collect(|&n, &d| if d == 0.0 { fill } else { n / d })
}

/// Elementwise minimum of two scenario vectors.
pub fn vmin(a: &ScenarioVector, b: &ScenarioVector) -> ScenarioVector {
    Zip::from(a).and(b).map_collect(|&a, &b| a.min(b))
}

/// Elementwise median of three scenario vectors.
///
/// Computed by comparison rather than arithmetic so that infinite operands
/// stay exact (`a + b + c - max - min` would produce NaN for `±inf`).
pub fn median3(a: &ScenarioVector, b: &ScenarioVector, c: &ScenarioVector) -> ScenarioVector {
    Zip::from(a)
        .and(b)
        .and(c)
        .map_collect(|&a, &b, &c| a.min(b).max(a.max(b).min(c)))
}
