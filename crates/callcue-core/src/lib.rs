//! Callcue core: in-call user notifications.
//!
//! Pure Rust crate with no platform dependencies. Observes a call
//! session's signal streams and maintains the one-shot user messages and
//! persistent alert flags that native UI shells render as toasts and
//! banners.

pub mod aggregator;
mod alerts;
pub mod call_state;
pub mod config;
pub mod errors;
pub mod messages;
pub mod signals;

pub use aggregator::{UserMessageAggregator, UserMessageStream};
pub use call_state::{CallPhase, CallSnapshot, RecordingPolicy, RecordingState, UsbCameraStatus};
pub use config::AggregatorConfig;
pub use errors::MessageStreamError;
pub use messages::{AlertMessage, AlertSet, UserMessage, UserMessageKind};
pub use signals::{AudioFailureEvent, CallSignals, CallSignalsPublisher, MutedEvent};
