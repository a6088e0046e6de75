mod bus;
mod types;

pub use bus::{emit_isolated, EventBus, EventSink, FnSink, NullSink, SubscriptionId};
pub use types::{AgentEvent, EventKind};
