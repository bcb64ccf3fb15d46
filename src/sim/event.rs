//! Event trait
//!
//! Everything the queue holds is a boxed, one-shot event.

use super::environment::Environment;

/// An event runs once when the clock reaches its time. `self: Box<Self>` lets
/// the event move its captured state out.
pub trait Event: 'static {
    fn execute(self: Box<Self>, env: &mut Environment);

    /// Short label used in logs.
    fn kind(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
