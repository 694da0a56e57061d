//! Watchdog keepalive capability.
//!
//! The charge session is supervised by an external watchdog (hardware timer
//! or the converter's own I2C watchdog). The keepalive task pets it on a
//! fixed cadence; starvation makes the watchdog owner abort the session — the
//! control loop never aborts itself through this interface.

/// A watchdog that must be petted periodically while charging is active.
pub trait Watchdog {
    /// Reset the watchdog countdown. Infallible: a pet that cannot reach the
    /// hardware is indistinguishable from starvation and handled by the owner.
    fn pet(&mut self);

    /// Timeout the owner enforces, in milliseconds. The keepalive task pets
    /// at half this interval.
    fn timeout_ms(&self) -> u64;
}
