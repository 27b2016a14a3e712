pub mod transitions;
pub mod gateway;
pub mod orchestrator;
pub mod completion;
pub mod dispatch;
pub mod mock;

pub use completion::{CompletionPolicy, Disposition, PaymentCompletionHandler};
pub use dispatch::{CompletionDispatcher, Delivery, Handled, OffsetTracker};
pub use gateway::HttpPaymentGateway;
pub use orchestrator::{
    OrchestratorConfig, OrderOrchestrator, PageMeta, PageQuery, Paginated, PaymentApplied,
    PlacedOrder,
};
pub use transitions::{PermissiveTransitions, TransitionPolicy, TransitionRejected};
