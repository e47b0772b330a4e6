/// Tunables for live delivery and background fan-out.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Items buffered per live subscriber before new ones are dropped.
    pub subscriber_buffer: usize,
    /// Worker tasks draining the fan-out queue.
    pub fanout_workers: usize,
    /// Jobs the fan-out queue holds before `submit` starts rejecting.
    pub fanout_queue: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 64,
            fanout_workers: 4,
            fanout_queue: 1024,
        }
    }
}
