//! Processor configuration.

/// Behavior switches for [`ControlMessageProcessor`](crate::ControlMessageProcessor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Emit push subscribe/unsubscribe actions
    pub push_notifications: bool,

    /// As a V2 admin, generate and distribute a new key pair when members
    /// are removed. Disable on read-only replicas.
    pub distribute_on_removal: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self { push_notifications: true, distribute_on_removal: true }
    }
}
