//! The per-gate integration rule.
//!
//! Gating variables obey `dg/dt = A - B*g` with voltage-dependent rates, a
//! stiff equation whenever B gets large. The update used here is the
//! Crank-Nicolson form of the exponential Euler rule, which is
//! unconditionally stable and exact for constant rates, so a gate driven at a
//! fixed voltage approaches its steady state `A/B` monotonically regardless
//! of how `B*dt` compares to 1.

/// Advance a gating variable by one step of length `dt`.
///
/// Implements `g' = (g*(2/dt - B) + 2*A) / (2/dt + B)`.
///
/// # Examples
///
/// ```
/// use hh_gating::solve::advance_gate;
///
/// // Constant rates drive the gate toward A/B = 0.5.
/// let mut g = 0.0;
/// for _ in 0..100 {
///     g = advance_gate(g, 500.0, 1000.0, 1e-4);
/// }
/// assert!((g - 0.5).abs() < 1e-6);
/// ```
#[inline]
pub fn advance_gate(g: f64, a: f64, b: f64, dt: f64) -> f64 {
    let inv = 2.0 / dt;
    (g * (inv - b) + 2.0 * a) / (inv + b)
}

/// Raise a gate state to a small integer power.
///
/// Channel conductances multiply gate states raised to powers that are
/// almost always 1 to 4 (`m^3*h`, `n^4`), so those cases are unrolled; the
/// generic path covers anything larger.
#[inline]
pub fn take_power(x: f64, power: u32) -> f64 {
    match power {
        0 => 1.0,
        1 => x,
        2 => x * x,
        3 => x * x * x,
        4 => {
            let sq = x * x;
            sq * sq
        }
        p => x.powi(p as i32),
    }
}
