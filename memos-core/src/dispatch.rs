//! Dispatch registry: label → handler.
//!
//! [`HandlerRegistry::build_dispatch_map`] builds one handler per label
//! through an exhaustive `match`, so adding a [`TaskLabel`] variant without
//! a handler is a compile error. [`DispatchMap::from_handlers`] re-checks
//! completeness at construction for maps assembled by hand.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::HandlerContext;
use crate::error::{Result, SchedulerError};
use crate::handlers::{
    self, AddHandler, AnswerHandler, FeedbackHandler, HandleReport, MemOrganizeHandler,
    MemReadHandler, MemUpdateHandler, PrefAddHandler, QueryHandler, TaskHandler,
};
use crate::metrics::SchedulerCounters;
use crate::types::{ScheduleMessage, TaskLabel};

/// Factory for the standard handler set.
pub struct HandlerRegistry;

impl HandlerRegistry {
    /// The handler for `label`.
    #[must_use]
    pub fn handler_for(label: TaskLabel) -> Arc<dyn TaskHandler> {
        match label {
            TaskLabel::Query => Arc::new(QueryHandler),
            TaskLabel::Answer => Arc::new(AnswerHandler),
            TaskLabel::Add => Arc::new(AddHandler),
            TaskLabel::MemUpdate => Arc::new(MemUpdateHandler),
            TaskLabel::MemRead => Arc::new(MemReadHandler),
            TaskLabel::MemOrganize => Arc::new(MemOrganizeHandler),
            TaskLabel::PrefAdd => Arc::new(PrefAddHandler),
            TaskLabel::MemFeedback => Arc::new(FeedbackHandler),
        }
    }

    /// Build the complete dispatch map.
    ///
    /// # Errors
    /// Returns `SchedulerError::Configuration` if the map is incomplete.
    pub fn build_dispatch_map() -> Result<DispatchMap> {
        DispatchMap::from_handlers(TaskLabel::ALL.into_iter().map(Self::handler_for).collect())
    }
}

/// Complete label → handler table.
#[derive(Clone)]
pub struct DispatchMap {
    /// Indexed by [`TaskLabel::index`].
    handlers: Vec<Arc<dyn TaskHandler>>,
}

impl std::fmt::Debug for DispatchMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.handlers.iter().map(|h| h.label())).finish()
    }
}

impl DispatchMap {
    /// Assemble a map, requiring exactly one handler per label.
    ///
    /// # Errors
    /// Returns `SchedulerError::Configuration` naming the duplicated or
    /// missing label.
    pub fn from_handlers(handlers: Vec<Arc<dyn TaskHandler>>) -> Result<Self> {
        let mut slots: Vec<Option<Arc<dyn TaskHandler>>> = vec![None; TaskLabel::ALL.len()];
        for handler in handlers {
            let label = handler.label();
            let slot = &mut slots[label.index()];
            if slot.is_some() {
                return Err(SchedulerError::Configuration(format!(
                    "duplicate handler for label '{label}'"
                )));
            }
            *slot = Some(handler);
        }

        let mut table = Vec::with_capacity(slots.len());
        for (label, slot) in TaskLabel::ALL.into_iter().zip(slots) {
            match slot {
                Some(h) => table.push(h),
                None => {
                    return Err(SchedulerError::Configuration(format!(
                        "no handler registered for label '{label}'"
                    )));
                }
            }
        }
        debug!(handlers = table.len(), "dispatch map built");
        Ok(Self { handlers: table })
    }

    /// Handler for a known label.
    #[must_use]
    pub fn handler(&self, label: TaskLabel) -> Arc<dyn TaskHandler> {
        Arc::clone(&self.handlers[label.index()])
    }

    /// Resolve a raw label string.
    ///
    /// # Errors
    /// Returns `SchedulerError::UnknownLabel` for labels outside the set.
    pub fn route(&self, label: &str) -> Result<Arc<dyn TaskHandler>> {
        Ok(self.handler(label.parse()?))
    }

    /// Route `label` and run the shared handling template.
    ///
    /// # Errors
    /// `UnknownLabel` if the label does not route, `Validation` if the
    /// batch is rejected. Per-group failures are in the report.
    pub async fn dispatch(
        &self,
        ctx: &HandlerContext,
        label: &str,
        messages: Vec<ScheduleMessage>,
    ) -> Result<HandleReport> {
        let handler = match self.route(label) {
            Ok(h) => h,
            Err(e) => {
                SchedulerCounters::incr(&ctx.counters().routing_failures);
                warn!(label, messages = messages.len(), "no handler for label");
                return Err(e);
            }
        };
        handlers::handle(handler.as_ref(), ctx, messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{FakeCube, context_with};

    #[test]
    fn standard_map_covers_every_label() {
        let map = HandlerRegistry::build_dispatch_map().expect("complete");
        for label in TaskLabel::ALL {
            assert_eq!(map.handler(label).label(), label);
            assert_eq!(map.route(label.as_str()).expect("routes").label(), label);
        }
    }

    #[test]
    fn missing_label_is_a_configuration_error() {
        let handlers = TaskLabel::ALL
            .into_iter()
            .filter(|l| *l != TaskLabel::PrefAdd)
            .map(HandlerRegistry::handler_for)
            .collect();
        let err = DispatchMap::from_handlers(handlers).expect_err("incomplete");
        assert!(matches!(err, SchedulerError::Configuration(ref m) if m.contains("pref_add")));
    }

    #[test]
    fn duplicate_label_is_a_configuration_error() {
        let mut handlers: Vec<_> = TaskLabel::ALL.into_iter().map(HandlerRegistry::handler_for).collect();
        handlers.push(Arc::new(QueryHandler));
        let err = DispatchMap::from_handlers(handlers).expect_err("duplicate");
        assert!(matches!(err, SchedulerError::Configuration(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn unknown_label_does_not_route() {
        let map = HandlerRegistry::build_dispatch_map().expect("complete");
        assert!(matches!(map.route("mem_purge"), Err(SchedulerError::UnknownLabel(_))));
    }

    #[tokio::test]
    async fn dispatch_counts_routing_failures() {
        let map = HandlerRegistry::build_dispatch_map().expect("complete");
        let (ctx, _sink) = context_with(Arc::new(FakeCube::new("c1")));
        let msg = ScheduleMessage::with_raw_label("u1", "c1", "mem_purge", "x");
        let err = map.dispatch(&ctx, "mem_purge", vec![msg]).await.expect_err("unknown");
        assert!(matches!(err, SchedulerError::UnknownLabel(_)));
        assert_eq!(ctx.counters().snapshot().routing_failures, 1);
    }

    #[tokio::test]
    async fn dispatch_runs_the_routed_handler() {
        let map = HandlerRegistry::build_dispatch_map().expect("complete");
        let (ctx, sink) = context_with(Arc::new(FakeCube::new("c1")));
        let msg = ScheduleMessage::new("u1", "c1", TaskLabel::Answer, "done");
        let report = map.dispatch(&ctx, "answer", vec![msg]).await.expect("dispatched");
        assert_eq!(report.label, TaskLabel::Answer);
        assert_eq!(sink.len(), 1);
    }
}
