//! Export coordination
//!
//! Participants negotiate transcript exports with control tokens sent as
//! ordinary chat messages. The coordination state is never stored: it is a
//! pure fold over the session timeline, recomputed on every change.

mod fold;
pub mod interpreter;
pub mod state;
pub mod token;
pub mod transcript;

#[cfg(test)]
mod proptests;

pub use fold::fold_export_state;
pub use interpreter::{Delivery, Evaluation, ExportInterpreter};
pub use state::{DeliveredExports, ExportSnapshot, Timeline};
pub use token::{ChatItem, ControlAction, ExportKind};
pub use transcript::ExportPayload;
