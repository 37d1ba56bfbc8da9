//! # Actions
//!
//! Requests flow from any thread into an entity's dispatcher, which fans them
//! out to every registered handler. Extensions never run their logic inside a
//! dispatch: their bound handler only enqueues, and the extension drains its
//! queue on its own update.

mod dispatcher;
mod request;

pub use dispatcher::{handler, ActionDispatcher, ActionHandler};
pub use request::ActionRequest;
