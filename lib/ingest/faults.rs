use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::error;

/// Structured record of an internal fault caught at the tick boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub message: String,
    pub context: BTreeMap<String, String>,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Converts a caught panic payload into a fault, keeping the panic message when it is a
    /// string.
    pub fn from_panic(payload: Box<dyn Any + Send + 'static>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self::new(format!("panic: {message}"))
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }
}

/// External fault-tracking sink.
///
/// Delivery is fire-and-forget: implementations must not block the caller for long and have no
/// way to surface delivery failures back to the Scheduler.
pub trait FaultReporter: Send + Sync {
    fn report(&self, fault: &Fault);
}

impl<T> FaultReporter for Arc<T>
where
    T: FaultReporter + ?Sized,
{
    fn report(&self, fault: &Fault) {
        (**self).report(fault)
    }
}

/// Reports faults as error-level log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingFaultReporter;

impl FaultReporter for TracingFaultReporter {
    fn report(&self, fault: &Fault) {
        error!(
            event = "fault_reported",
            message = %fault.message,
            context = ?fault.context,
            "internal fault reported"
        );
    }
}
