//! Live delivery side of the engine: who is listening ([`registry`]), how
//! produced items reach them ([`dispatcher`]), and the background jobs that
//! turn committed actions into notifications and timeline rows ([`fanout`]).

pub mod config;
pub mod dispatcher;
pub mod fanout;
pub mod registry;

pub use config::GatewayConfig;
pub use dispatcher::{DispatchStats, Dispatcher};
pub use fanout::{FanoutPool, FanoutStats, Job};
pub use registry::{Addressed, Registry, RegistryStats, Subscription};
