//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SubscriptionService`: ensures each symbol is subscribed upstream once
//! - `TickRelay`: caches incoming ticks and fans them out to clients

mod relay;
mod subscription;

pub use relay::{RefreshPolicy, TickRelay};
pub use subscription::{SubscribeOutcome, SubscriptionService};
