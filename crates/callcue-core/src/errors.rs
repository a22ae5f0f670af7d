use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MessageStreamError {
    /// The subscriber fell behind and the oldest undelivered messages
    /// were dropped for it. Receiving continues with the oldest retained
    /// message.
    #[error("subscriber lagged, {0} messages dropped")]
    Lagged(u64),
    /// The session ended, or none was active when subscribing.
    #[error("message stream closed")]
    Closed,
}
