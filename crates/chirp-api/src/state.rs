use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use chirp_db::Database;
use chirp_gateway::{Dispatcher, FanoutPool, GatewayConfig};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub fanout: FanoutPool,
    pub jwt_secret: String,
    /// Parent of every live stream's cancellation token. Cancelling it closes
    /// all open streams, which lets graceful shutdown finish.
    pub shutdown: CancellationToken,
}

impl AppStateInner {
    /// Wires the dispatcher and starts the fan-out workers. Must be called
    /// from within a Tokio runtime.
    pub fn new(db: Arc<Database>, config: &GatewayConfig, jwt_secret: String) -> AppState {
        let dispatcher = Dispatcher::new(config);
        let fanout = FanoutPool::start(db.clone(), dispatcher.clone(), config);

        Arc::new(Self {
            db,
            dispatcher,
            fanout,
            jwt_secret,
            shutdown: CancellationToken::new(),
        })
    }
}
