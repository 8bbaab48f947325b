use parking_lot::Mutex;
use std::sync::Arc;

/// State shared between the sync tasks, the event loop and the HTTP handlers.
pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
