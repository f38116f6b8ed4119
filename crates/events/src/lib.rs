//! Live event distribution for the job gateway.
//!
//! [`fanout`] relays in-flight job progress to any number of SSE
//! subscribers; [`webhook`] delivers terminal notifications to external
//! callback URLs.

pub mod fanout;
pub mod webhook;

pub use fanout::{EventKind, Fanout, JobEvent, Subscription};
pub use webhook::{WebhookDispatcher, WebhookPayload};
