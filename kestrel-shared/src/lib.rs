pub mod models;
pub mod redact;

pub use models::events::{DeadLetterEvent, PaymentSucceededEvent};
pub use redact::Redacted;
