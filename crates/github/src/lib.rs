pub mod events;
pub mod signature;
pub mod webhook;

pub use events::{PingEvent, PushEvent, WebhookEvent};
pub use webhook::{GitHubEvent, MAX_PAYLOAD_SIZE, Rejection};
