use std::sync::Arc;
use kestrel_order::OrderOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<OrderOrchestrator>,
}
