use kestrel_core::OrderStatus;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid state transition from {from} to {to}")]
pub struct TransitionRejected {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// Decides whether an explicit status change is allowed.
///
/// This is the only place status-change legality is checked. The payment
/// completion path does not go through it.
pub trait TransitionPolicy: Send + Sync {
    fn check(&self, from: OrderStatus, to: OrderStatus) -> Result<(), TransitionRejected>;
}

/// Any status may follow any other, including PAID back to PENDING.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveTransitions;

impl TransitionPolicy for PermissiveTransitions {
    fn check(&self, _from: OrderStatus, _to: OrderStatus) -> Result<(), TransitionRejected> {
        Ok(())
    }
}
