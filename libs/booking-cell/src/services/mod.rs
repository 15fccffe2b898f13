pub mod ledger;
pub mod store;
pub mod redis_store;
pub mod coordinator;
pub mod availability;
pub mod notification;
pub mod metrics;

pub use ledger::*;
pub use store::*;
pub use redis_store::*;
pub use coordinator::*;
pub use availability::*;
pub use notification::*;
pub use metrics::*;
