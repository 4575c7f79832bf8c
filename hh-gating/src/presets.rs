//! Ready-made channel configurations.
//!
//! The classic squid giant axon pair, in SI units with rates in 1/s and
//! absolute membrane voltage in volts. These double as reference models in
//! tests and benchmarks; real simulations usually load their kinetics from
//! model files instead.

use crate::channel::{Channel, Slot};
use crate::error::Result;

/// Grid used by the squid presets: 3000 divisions over [-110 mV, +50 mV].
const SQUID_GRID: [f64; 3] = [3000.0, -0.110, 0.050];

fn with_grid(coeffs: [f64; 10]) -> [f64; 13] {
    let mut parms = [0.0; 13];
    parms[..10].copy_from_slice(&coeffs);
    parms[10..].copy_from_slice(&SQUID_GRID);
    parms
}

/// Fast sodium channel of the squid giant axon: `gBar * m^3 * h`.
///
/// # Examples
///
/// ```
/// use hh_gating::{presets, Slot, Tick};
///
/// let mut na = presets::squid_na().unwrap();
/// na.set_vm(-0.070);
/// na.reinit(&Tick { dt: 1e-5 }).unwrap();
/// let m = na.state(Slot::X).unwrap();
/// assert!((m - 0.053).abs() < 0.001);
/// ```
pub fn squid_na() -> Result<Channel> {
    let mut ch = Channel::new();
    ch.set_gbar(1200.0); // S/m^2
    ch.set_ek(0.045);
    ch.set_power(Slot::X, 3)?;
    ch.set_power(Slot::Y, 1)?;
    // m gate
    ch.setup_alpha(
        Slot::X,
        with_grid([
            -4.5e3, -1.0e5, -1.0, 0.045, -0.010, // alpha
            4.0e3, 0.0, 0.0, 0.070, 0.018, // beta
        ]),
    )?;
    // h gate
    ch.setup_alpha(
        Slot::Y,
        with_grid([
            70.0, 0.0, 0.0, 0.070, 0.020, // alpha
            1.0e3, 0.0, 1.0, 0.040, -0.010, // beta
        ]),
    )?;
    Ok(ch)
}

/// Delayed rectifier potassium channel of the squid giant axon:
/// `gBar * n^4`.
pub fn squid_k() -> Result<Channel> {
    let mut ch = Channel::new();
    ch.set_gbar(360.0); // S/m^2
    ch.set_ek(-0.082);
    ch.set_power(Slot::X, 4)?;
    // n gate
    ch.setup_alpha(
        Slot::X,
        with_grid([
            -0.6e3, -1.0e4, -1.0, 0.060, -0.010, // alpha
            125.0, 0.0, 0.0, 0.070, 0.080, // beta
        ]),
    )?;
    Ok(ch)
}
