use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::error::{ProxyError, Result};

use super::node::{CallerConstructor, ListenerConstructor};

/// Process-wide listener/caller constructor registries. Populated once at
/// startup (each protocol module's `register()` function, called from
/// `main` before any node is built) and read-only thereafter -- see
/// SPEC_FULL.md §4.4/§9.
static LISTENER_CONSTRUCTORS: Lazy<Mutex<HashMap<String, Arc<dyn ListenerConstructor>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));
static CALLER_CONSTRUCTORS: Lazy<Mutex<HashMap<String, Arc<dyn CallerConstructor>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub fn register_listener_constructor(name: &str, ctor: Arc<dyn ListenerConstructor>) {
    LISTENER_CONSTRUCTORS.lock().insert(name.to_string(), ctor);
}

pub fn register_caller_constructor(name: &str, ctor: Arc<dyn CallerConstructor>) {
    CALLER_CONSTRUCTORS.lock().insert(name.to_string(), ctor);
}

pub fn listener_constructor(name: &str) -> Result<Arc<dyn ListenerConstructor>> {
    LISTENER_CONSTRUCTORS
        .lock()
        .get(name)
        .cloned()
        .ok_or_else(|| ProxyError::UnknownProtocol(name.to_string()))
}

pub fn caller_constructor(name: &str) -> Result<Arc<dyn CallerConstructor>> {
    CALLER_CONSTRUCTORS
        .lock()
        .get(name)
        .cloned()
        .ok_or_else(|| ProxyError::UnknownProtocol(name.to_string()))
}
