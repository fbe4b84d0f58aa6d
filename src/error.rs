
/// Upper MAC errors
///
/// Transmission failures (timeouts, internal collisions) and queue
/// overflow are handled inside the MAC and never surface here.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError<E> {
    /// Traffic identifier outside of the 0..=7 user priority range
    InvalidTid(u8),

    /// Wrapper for unhandled / underlying radio errors
    Radio(E),
}
