//! Time source port.
//!
//! The registration session throttles status requests and times out replies
//! using a monotonic millisecond tick, and stamps authorization tokens with a
//! wall-clock expiry. Both come from this trait so tests can drive time by
//! hand.

pub trait Clock {
    /// Monotonic milliseconds since an arbitrary origin.
    fn monotonic_ms(&self) -> u64;

    /// Seconds since the Unix epoch.
    fn unix_seconds(&self) -> u64;
}
