//! # HH-GATING
//!
//! Hodgkin-Huxley gating kinetics: voltage- and concentration-dependent ion
//! channel gates, the channels that compose them into conductances, and the
//! numerical rules that keep the per-tick update stable.
//!
//! ## Overview
//!
//! The library models the innermost loop of a compartmental neuron
//! simulator. A compartment pushes its membrane voltage (and, for
//! calcium-dependent channels, pool concentrations) into each [`Channel`]
//! every tick; the channel asks each of its gates for the rate pair
//! `(A, B)`, advances the gate states with the Crank-Nicolson form of the
//! exponential Euler rule, and reports the conductance `Gk` and driven
//! current `Ik = (Ek - Vm) * Gk` back to the compartment.
//!
//! Gate rates can come from precomputed lookup tables, from compiled
//! rate-law expression strings, or from the canonical five-coefficient
//! curve family that covers the classic squid-axon kinetics. All three
//! supplies converge on the same `(A, B)` query convention, where `A` is
//! the forward rate and `B` the total rate (or their tau/inf transforms),
//! so the channel's hot loop never branches on where the numbers came from.
//!
//! ## Quick start
//!
//! ```
//! use hh_gating::{presets, Slot, Tick};
//!
//! // The delayed rectifier of the squid giant axon: Gk = gBar * n^4.
//! let mut k = presets::squid_k().unwrap();
//! let tick = Tick { dt: 1e-5 };
//!
//! k.set_vm(-0.070);
//! k.reinit(&tick).unwrap();
//!
//! // Depolarise and watch the conductance climb.
//! k.set_vm(0.0);
//! let resting = k.gk();
//! for _ in 0..1000 {
//!     k.process(&tick);
//! }
//! assert!(k.gk() > resting);
//! ```
//!
//! ## Sharing and ownership
//!
//! Duplicating a channel shares its gates read-only: the copy sees the
//! original's tables and expressions, but every mutating gate operation
//! checks the calling channel's id against the gate's owner and ignores
//! non-owners with a warning. Gate state that changes during stepping
//! lives in the channel, so shared gates are safe to read from many
//! channels at once.

pub mod channel;
pub mod error;
pub mod gate;
pub mod gate2d;
pub mod presets;
pub mod routing;
pub mod solve;

pub use channel::{
    Channel, ChannelKind, ChannelOutput, ChannelPhase, ChannelSettings, Driver, Slot, Tick,
    INSTANT_X, INSTANT_Y, INSTANT_Z, REINIT_B_FLOOR,
};
pub use error::{GatingError, Result};
pub use gate::{ChannelId, Gate1D, GateForm, SINGULARITY_EPS};
pub use gate2d::Gate2D;
pub use routing::{InputIndex, InputSource};
