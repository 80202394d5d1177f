//! Post-commit notifications for downstream collaborators.
//!
//! Hooks run after the upload transaction has committed. A failing hook is
//! logged and never rolls back or fails the upload.

use tracing::{info, warn};

use crate::models::ObjectDetail;

pub type HookResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receiver of object creation events.
pub trait ObjectHooks: Send + Sync {
    fn on_created(&self, _object: &ObjectDetail) -> HookResult {
        Ok(())
    }

    fn on_reuploaded(&self, _object: &ObjectDetail) -> HookResult {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

impl ObjectHooks for NoopHooks {}

/// Hooks that only emit a log line per event.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingHooks;

impl ObjectHooks for LoggingHooks {
    fn on_created(&self, object: &ObjectDetail) -> HookResult {
        info!(dhash = %object.object.dhash, kind = %object.object.object_type(), "object created");
        Ok(())
    }

    fn on_reuploaded(&self, object: &ObjectDetail) -> HookResult {
        info!(dhash = %object.object.dhash, kind = %object.object.object_type(), "object reuploaded");
        Ok(())
    }
}

/// Deliver the creation-or-reuse event, swallowing hook failures.
pub(crate) fn notify(hooks: &dyn ObjectHooks, object: &ObjectDetail, is_new: bool) {
    let result = if is_new {
        hooks.on_created(object)
    } else {
        hooks.on_reuploaded(object)
    };
    if let Err(e) = result {
        warn!(dhash = %object.object.dhash, is_new, "object hook failed: {e}");
    }
}
