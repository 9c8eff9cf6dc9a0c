//! Per-session registry of control-event subscriptions.
//!
//! Each subscription carries a `CancellationToken`; UI glue holding a clone
//! detaches its listener when the token is cancelled at session end.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use singlecell_core::ids::InteractId;
use singlecell_interact::EventKind;

#[derive(Debug, Clone)]
pub struct Subscription {
    pub control: String,
    pub event: EventKind,
    pub handle: CancellationToken,
}

#[derive(Debug, Default)]
pub struct EventHandlerRegistry {
    scopes: HashMap<InteractId, Vec<Subscription>>,
}

impl EventHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &mut self,
        scope: &InteractId,
        control: &str,
        event: EventKind,
    ) -> CancellationToken {
        let handle = CancellationToken::new();
        self.scopes.entry(scope.clone()).or_default().push(Subscription {
            control: control.to_string(),
            event,
            handle: handle.clone(),
        });
        handle
    }

    pub fn is_subscribed(&self, scope: &InteractId, control: &str, event: EventKind) -> bool {
        self.scopes.get(scope).is_some_and(|subs| {
            subs.iter()
                .any(|s| s.control == control && s.event == event && !s.handle.is_cancelled())
        })
    }

    pub fn has_scope(&self, scope: &InteractId) -> bool {
        self.scopes.contains_key(scope)
    }

    pub fn subscriptions(&self, scope: &InteractId) -> &[Subscription] {
        self.scopes.get(scope).map(Vec::as_slice).unwrap_or_default()
    }

    /// Cancel and drop every subscription in one scope.
    pub fn unsubscribe_scope(&mut self, scope: &InteractId) -> usize {
        self.scopes
            .remove(scope)
            .map(|subs| {
                subs.iter().for_each(|s| s.handle.cancel());
                subs.len()
            })
            .unwrap_or(0)
    }

    /// Cancel and drop everything. Returns how many subscriptions were removed.
    pub fn unsubscribe_all(&mut self) -> usize {
        let mut removed = 0;
        for (_, subs) in self.scopes.drain() {
            for sub in &subs {
                sub.handle.cancel();
            }
            removed += subs.len();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.scopes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
