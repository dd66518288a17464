//! In-process callback registry.
//!
//! Callback actions name an opaque entry in this registry; embedding code
//! populates it with factories at startup. Resolution failures and panics
//! inside user callbacks surface as load failures, never as a crash.

use crate::model::{HttpRequest, HttpResponse};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Generates a response for a matched request.
pub trait ResponseCallback: Send + Sync {
    fn handle(&self, request: &HttpRequest) -> HttpResponse;
}

/// Generates the request to forward for a matched request.
pub trait ForwardCallback: Send + Sync {
    fn handle(&self, request: &HttpRequest) -> HttpRequest;
}

type ResponseFactory = Arc<dyn Fn() -> Box<dyn ResponseCallback> + Send + Sync>;
type ForwardFactory = Arc<dyn Fn() -> Box<dyn ForwardCallback> + Send + Sync>;

#[derive(Clone)]
enum Factory {
    Response(ResponseFactory),
    Forward(ForwardFactory),
}

#[derive(Default)]
pub struct LocalCallbackRegistry {
    factories: RwLock<HashMap<String, Factory>>,
}

impl LocalCallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_response<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn ResponseCallback> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(name.into(), Factory::Response(Arc::new(factory)));
    }

    pub fn register_forward<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn ForwardCallback> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .insert(name.into(), Factory::Forward(Arc::new(factory)));
    }

    /// Instantiate and invoke a response callback. `None` when the name is
    /// unknown or registered with the wrong flavor; `Err` when the callback
    /// panicked.
    pub fn invoke_response(
        &self,
        name: &str,
        request: &HttpRequest,
    ) -> Option<Result<HttpResponse, String>> {
        let factory = match self.factories.read().get(name)? {
            Factory::Response(factory) => Arc::clone(factory),
            Factory::Forward(_) => return None,
        };
        Some(catch_panic(|| factory().handle(request)))
    }

    /// Instantiate and invoke a forward callback.
    pub fn invoke_forward(
        &self,
        name: &str,
        request: &HttpRequest,
    ) -> Option<Result<HttpRequest, String>> {
        let factory = match self.factories.read().get(name)? {
            Factory::Forward(factory) => Arc::clone(factory),
            Factory::Response(_) => return None,
        };
        Some(catch_panic(|| factory().handle(request)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.read().contains_key(name)
    }
}

fn catch_panic<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).map_err(|panic| {
        panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "callback panicked".to_string())
    })
}
