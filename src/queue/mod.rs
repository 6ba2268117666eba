//! Durable FIFO-of-intent between intake and the worker pool, with a
//! dead-letter queue and an operator redrive path.

pub mod redrive;
pub mod store;

pub use redrive::{redrive, RedriveReport, RedriveRequest, MAX_REDRIVE_MESSAGES};
pub use store::{DeadLetter, Delivery, MappingMessage, QueueError, RequestQueue};
