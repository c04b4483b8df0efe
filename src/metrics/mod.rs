//! Metrics for sleet.
//!
//! Events are recorded through the `metrics` facade. The CLI installs no
//! recorder, so they cost nothing unless an embedding application installs one.

#[cfg(test)]
pub(crate) mod capture;
pub mod events;

/// Emit an internal event.
///
/// This macro calls the `InternalEvent::emit()` method on the given event,
/// which records the corresponding metric.
///
/// # Example
///
/// ```ignore
/// use sleet::metrics::events::RecordsRouted;
///
/// emit!(RecordsRouted { bucket: 3, count: 120 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
