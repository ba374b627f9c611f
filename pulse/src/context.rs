//! Per-request context lookup.
//!
//! Hosts track each in-flight inbound request in a [`RequestContext`], a bag
//! of typed items keyed by name. The request telemetry for the request is kept
//! under [`REQUEST_TELEMETRY_ITEM_NAME`] so that code deep in the call stack,
//! e.g. a dependency tracker, can find the request it belongs to.

use std::{any::Any, fmt};

use rustc_hash::FxHashMap;

use crate::telemetry::RequestTelemetry;

/// Item name under which a request's telemetry is stored.
pub const REQUEST_TELEMETRY_ITEM_NAME: &str = "pulse.request_telemetry";

/// Items associated with one inbound request.
#[derive(Default)]
pub struct RequestContext {
    items: FxHashMap<String, Box<dyn Any + Send + Sync>>,
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("items", &self.items.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RequestContext {
    /// Create an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `name`, returning whatever was there before.
    pub fn insert<V>(
        &mut self,
        name: impl Into<String>,
        value: V,
    ) -> Option<Box<dyn Any + Send + Sync>>
    where
        V: Any + Send + Sync,
    {
        self.items.insert(name.into(), Box::new(value))
    }

    /// The item stored under `name`, if present and of type `V`.
    #[must_use]
    pub fn get<V: Any>(&self, name: &str) -> Option<&V> {
        self.items.get(name)?.downcast_ref::<V>()
    }

    /// Attach the request telemetry for this request.
    pub fn set_request_telemetry(&mut self, request: RequestTelemetry) {
        let _ = self.insert(REQUEST_TELEMETRY_ITEM_NAME, request);
    }

    /// The request telemetry for this request.
    ///
    /// `None` if nothing was attached or the item under
    /// [`REQUEST_TELEMETRY_ITEM_NAME`] is of some other type.
    #[must_use]
    pub fn request_telemetry(&self) -> Option<&RequestTelemetry> {
        self.get(REQUEST_TELEMETRY_ITEM_NAME)
    }
}

/// The request telemetry tracked in `context`, tolerating an absent context.
#[must_use]
pub fn request_telemetry(context: Option<&RequestContext>) -> Option<&RequestTelemetry> {
    context?.request_telemetry()
}
