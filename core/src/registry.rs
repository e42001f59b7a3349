//! The cancellation registry.
//!
//! A process-wide store, held as an explicit context object:
//!
//! ```text
//! ComponentId ─▶ RequestId ─▶ InstanceLabel ─▶ Slot
//! ```
//!
//! All mutations are synchronous and never hold the store lock while a cancel
//! handle runs, so a handle may safely call back into the registry (for
//! example when aborting completes the request and its response hook fires).
//!
//! # Example
//!
//! ```
//! use cancelable_requests_core::{CancelHandle, CancellationRegistry, RegistryConfig, SlotState};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(CancellationRegistry::new(RegistryConfig::default()));
//! let component = registry.register("list-view".into());
//!
//! let request = "users".into();
//! let label = registry
//!     .install_pending(&component, &request, CancelHandle::noop())
//!     .unwrap();
//!
//! registry.cancel_request(&component, &request);
//! assert_eq!(registry.slot_state(&component, &request, &label), Some(SlotState::Canceled));
//!
//! registry.unregister(&component, true);
//! assert!(!registry.is_registered(&component));
//! ```

use crate::config::{ConfigError, RegistryConfig};
use crate::environment::{Clock, SystemClock};
use crate::error::RegistryError;
use crate::handle::CancelHandle;
use crate::id::{ComponentId, InstanceLabel, RequestId};
use crate::metrics::{COMPONENTS, HANDLE_FAILURES, HANDLES_INVOKED, TOMBSTONES_UPGRADED};
use crate::slot::{CancelLatch, Slot, SlotState};
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, warn};

/// A stored slot and the latch its probes watch.
#[derive(Debug)]
struct Instance {
    slot: Slot,
    latch: CancelLatch,
}

impl Instance {
    fn pending(handle: CancelHandle) -> Self {
        Self {
            slot: Slot::Pending(handle),
            latch: CancelLatch::new(),
        }
    }

    /// Move to `Canceled`, returning the handle if the request was in flight.
    fn cancel(&mut self) -> Option<CancelHandle> {
        self.latch.trip();
        match std::mem::replace(&mut self.slot, Slot::Canceled) {
            Slot::Pending(handle) => Some(handle),
            Slot::Removed | Slot::Canceled => None,
        }
    }

    const fn is_pending(&self) -> bool {
        matches!(self.slot, Slot::Pending(_))
    }
}

/// Slots of one (component, request) pair, oldest first.
type RequestGroup = BTreeMap<InstanceLabel, Instance>;

/// All request groups of one component.
type ComponentEntries = HashMap<RequestId, RequestGroup>;

/// Handles collected under the lock, invoked after it is released.
type CollectedHandles = SmallVec<[(RequestId, InstanceLabel, CancelHandle); 4]>;

/// Per-component view returned by [`CancellationRegistry::snapshot`].
pub type ComponentSnapshot = BTreeMap<RequestId, Vec<(InstanceLabel, SlotState)>>;

/// Outcome of a cancel operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancelReport {
    /// Pending handles that were invoked (successfully or not)
    pub handles_invoked: usize,
    /// Handles that reported an error while cancelling
    pub handle_failures: usize,
    /// `Removed` tombstones upgraded to `Canceled`
    pub tombstones_upgraded: usize,
}

impl CancelReport {
    /// Whether any in-flight request was aborted
    #[must_use]
    pub const fn cancelled_anything(&self) -> bool {
        self.handles_invoked > 0
    }

    const fn absorb(&mut self, other: Self) {
        self.handles_invoked += other.handles_invoked;
        self.handle_failures += other.handle_failures;
        self.tombstones_upgraded += other.tombstones_upgraded;
    }
}

/// Outcome of a tombstone sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Terminal slots removed
    pub tombstones_removed: usize,
    /// Request groups dropped because they became empty
    pub groups_removed: usize,
}

/// Point-in-time counters over the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Registered components
    pub components: usize,
    /// (component, request) groups
    pub request_groups: usize,
    /// Slots in `Pending`
    pub pending: usize,
    /// Slots in `Removed`
    pub removed: usize,
    /// Slots in `Canceled`
    pub canceled: usize,
}

impl RegistryStats {
    /// Total terminal slots awaiting a sweep
    #[must_use]
    pub const fn tombstones(&self) -> usize {
        self.removed + self.canceled
    }
}

/// Store of cancel handles scoped by component and logical request.
pub struct CancellationRegistry {
    store: Mutex<HashMap<ComponentId, ComponentEntries>>,
    config: RwLock<RegistryConfig>,
    clock: Arc<dyn Clock>,
    sequence: AtomicU64,
}

impl CancellationRegistry {
    /// Create an empty registry using the system clock
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create an empty registry with an injected clock
    #[must_use]
    pub fn with_clock(config: RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
            config: RwLock::new(config),
            clock,
            sequence: AtomicU64::new(0),
        }
    }

    /// Current configuration
    #[must_use]
    pub fn config(&self) -> RegistryConfig {
        *self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the configuration.
    ///
    /// Applies to subsequent operations only; existing slots are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] and keeps the current configuration
    /// if `config` does not validate.
    pub fn set_config(&self, config: RegistryConfig) -> Result<(), ConfigError> {
        config.validate()?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    /// Toggle the `Removed → Canceled` upgrade on late cancels
    pub fn set_change_remove_on_cancel(&self, enabled: bool) {
        self.config
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .change_remove_on_cancel = enabled;
    }

    /// Create an empty scope for `component_id`.
    ///
    /// Re-registering replaces the previous scope and forgets its slots
    /// without cancelling them.
    pub fn register(&self, component_id: ComponentId) -> ComponentId {
        let replaced = {
            let mut store = self.lock_store();
            let replaced = store.insert(component_id.clone(), ComponentEntries::new());
            record_components(store.len());
            replaced
        };

        if replaced.is_some() {
            debug!(component_id = %component_id, "Component re-registered, previous scope replaced");
        } else {
            debug!(component_id = %component_id, "Component registered");
        }
        component_id
    }

    /// Tear down the scope of `component_id`.
    ///
    /// With `cancel_pending`, every pending request of the component is
    /// cancelled first. Unknown components are ignored. Probes of the dropped
    /// slots keep reporting cancelled from then on.
    pub fn unregister(&self, component_id: &ComponentId, cancel_pending: bool) -> CancelReport {
        let upgrade_removed = self.config().change_remove_on_cancel;
        let mut report = CancelReport::default();

        let handles = {
            let mut store = self.lock_store();
            let Some(mut entries) = store.remove(component_id) else {
                debug!(component_id = %component_id, "Unregister for unknown component ignored");
                return report;
            };
            record_components(store.len());

            let mut handles = CollectedHandles::new();
            for (request_id, group) in &mut entries {
                if cancel_pending {
                    Self::transition_to_canceled(
                        request_id,
                        group,
                        upgrade_removed,
                        &mut handles,
                        &mut report,
                    );
                }
                for instance in group.values() {
                    instance.latch.trip();
                }
            }
            handles
        };
        record_upgrades(&report);

        Self::invoke_handles(component_id, handles, &mut report);
        debug!(
            component_id = %component_id,
            cancel_pending,
            handles_invoked = report.handles_invoked,
            "Component unregistered"
        );
        report
    }

    /// Cancel every instance of one logical request.
    ///
    /// `Pending` slots have their handle invoked and become `Canceled` even if
    /// the handle fails. `Removed` slots become `Canceled` only when
    /// [`RegistryConfig::change_remove_on_cancel`] is set. Unknown component or
    /// request groups are ignored.
    pub fn cancel_request(&self, component_id: &ComponentId, request_id: &RequestId) -> CancelReport {
        let config = self.config();
        let mut report = CancelReport::default();

        let handles = {
            let mut store = self.lock_store();
            let Some(group) = store
                .get_mut(component_id)
                .and_then(|entries| entries.get_mut(request_id))
            else {
                debug!(
                    component_id = %component_id,
                    request_id = %request_id,
                    "Cancel for unknown request group ignored"
                );
                return report;
            };

            let mut handles = CollectedHandles::new();
            Self::transition_to_canceled(
                request_id,
                group,
                config.change_remove_on_cancel,
                &mut handles,
                &mut report,
            );
            Self::enforce_tombstone_cap(group, config.sweep.max_tombstones_per_request);
            handles
        };
        record_upgrades(&report);

        Self::invoke_handles(component_id, handles, &mut report);
        report
    }

    /// Cancel every logical request of a component
    pub fn cancel_all_for_component(&self, component_id: &ComponentId) -> CancelReport {
        let request_ids: Vec<RequestId> = match self.lock_store().get(component_id) {
            Some(entries) => entries.keys().cloned().collect(),
            None => {
                debug!(component_id = %component_id, "Cancel-all for unknown component ignored");
                return CancelReport::default();
            }
        };

        let mut report = CancelReport::default();
        for request_id in &request_ids {
            report.absorb(self.cancel_request(component_id, request_id));
        }
        report
    }

    /// Prepare the group of a new request instance.
    ///
    /// Cancels whatever the group still holds when it already exists, or
    /// creates it empty otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ComponentNotRegistered`] if the component has
    /// no scope.
    pub fn supersede(
        &self,
        component_id: &ComponentId,
        request_id: &RequestId,
    ) -> Result<CancelReport, RegistryError> {
        let exists = {
            let mut store = self.lock_store();
            let entries = store
                .get_mut(component_id)
                .ok_or_else(|| RegistryError::ComponentNotRegistered(component_id.clone()))?;

            if entries.contains_key(request_id) {
                true
            } else {
                entries.insert(request_id.clone(), RequestGroup::new());
                false
            }
        };

        if !exists {
            return Ok(CancelReport::default());
        }

        let report = self.cancel_request(component_id, request_id);
        if report.cancelled_anything() {
            debug!(
                component_id = %component_id,
                request_id = %request_id,
                superseded = report.handles_invoked,
                "Superseded pending request"
            );
        }
        Ok(report)
    }

    /// Record a new in-flight instance under a fresh label.
    ///
    /// Any other instance of the group still `Pending` at this point (one that
    /// slipped in while this request was yielding) is cancelled, so the newest
    /// instance is the only pending one.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::ComponentNotRegistered`] if the component has
    /// no scope; the handle is not stored in that case.
    pub fn install_pending(
        &self,
        component_id: &ComponentId,
        request_id: &RequestId,
        handle: CancelHandle,
    ) -> Result<InstanceLabel, RegistryError> {
        let label = self.next_label();
        let mut report = CancelReport::default();

        let handles = {
            let mut store = self.lock_store();
            let entries = store
                .get_mut(component_id)
                .ok_or_else(|| RegistryError::ComponentNotRegistered(component_id.clone()))?;
            let group = entries.entry(request_id.clone()).or_default();

            let mut handles = CollectedHandles::new();
            for (existing, instance) in group.iter_mut() {
                if instance.is_pending() {
                    if let Some(stale) = instance.cancel() {
                        handles.push((request_id.clone(), *existing, stale));
                    }
                }
            }
            group.insert(label, Instance::pending(handle));
            handles
        };

        if !handles.is_empty() {
            debug!(
                component_id = %component_id,
                request_id = %request_id,
                instance = %label,
                stale = handles.len(),
                "Cancelling instances installed concurrently"
            );
            Self::invoke_handles(component_id, handles, &mut report);
        }
        Ok(label)
    }

    /// Retire a completed instance.
    ///
    /// `Pending` becomes `Removed`; terminal slots keep their state. Returns the
    /// slot state after the call, or `None` when the slot does not exist.
    pub fn mark_removed(
        &self,
        component_id: &ComponentId,
        request_id: &RequestId,
        label: &InstanceLabel,
    ) -> Option<SlotState> {
        let max_tombstones = self.config().sweep.max_tombstones_per_request;
        let mut store = self.lock_store();

        let Some(group) = store
            .get_mut(component_id)
            .and_then(|entries| entries.get_mut(request_id))
        else {
            debug!(
                component_id = %component_id,
                request_id = %request_id,
                instance = %label,
                "Completion for unknown request group ignored"
            );
            return None;
        };

        let state = match group.get_mut(label) {
            Some(instance) => {
                if instance.is_pending() {
                    instance.slot = Slot::Removed;
                }
                instance.slot.state()
            }
            None => {
                debug!(
                    component_id = %component_id,
                    request_id = %request_id,
                    instance = %label,
                    "Completion for unknown instance ignored"
                );
                return None;
            }
        };

        Self::enforce_tombstone_cap(group, max_tombstones);
        Some(state)
    }

    /// State of one instance, if present
    #[must_use]
    pub fn slot_state(
        &self,
        component_id: &ComponentId,
        request_id: &RequestId,
        label: &InstanceLabel,
    ) -> Option<SlotState> {
        self.lock_store()
            .get(component_id)
            .and_then(|entries| entries.get(request_id))
            .and_then(|group| group.get(label))
            .map(|instance| instance.slot.state())
    }

    /// Whether an instance must be treated as cancelled.
    ///
    /// True when the slot is `Canceled`, or when the whole component scope is
    /// gone. This reads the store only: once a slot is swept while its
    /// component lives it reads as not cancelled here, while a
    /// [`CancelProbe`](crate::CancelProbe) keeps remembering the cancel.
    #[must_use]
    pub fn is_canceled(
        &self,
        component_id: &ComponentId,
        request_id: &RequestId,
        label: &InstanceLabel,
    ) -> bool {
        let store = self.lock_store();
        let Some(entries) = store.get(component_id) else {
            return true;
        };
        entries
            .get(request_id)
            .and_then(|group| group.get(label))
            .is_some_and(|instance| matches!(instance.slot, Slot::Canceled))
    }

    /// Latch a new probe should watch.
    ///
    /// Shares the stored slot's latch when there is one. A missing component
    /// yields a tripped latch; a missing slot of a live component a fresh one.
    pub(crate) fn latch_for(
        &self,
        component_id: &ComponentId,
        request_id: &RequestId,
        label: &InstanceLabel,
    ) -> CancelLatch {
        let store = self.lock_store();
        let Some(entries) = store.get(component_id) else {
            return CancelLatch::tripped();
        };
        entries
            .get(request_id)
            .and_then(|group| group.get(label))
            .map_or_else(CancelLatch::new, |instance| instance.latch.clone())
    }

    /// Whether the component currently has a scope
    #[must_use]
    pub fn is_registered(&self, component_id: &ComponentId) -> bool {
        self.lock_store().contains_key(component_id)
    }

    /// Whether a group exists for the (component, request) pair
    #[must_use]
    pub fn has_group(&self, component_id: &ComponentId, request_id: &RequestId) -> bool {
        self.lock_store()
            .get(component_id)
            .is_some_and(|entries| entries.contains_key(request_id))
    }

    /// Number of `Pending` slots for a (component, request) pair
    #[must_use]
    pub fn pending_count(&self, component_id: &ComponentId, request_id: &RequestId) -> usize {
        self.lock_store()
            .get(component_id)
            .and_then(|entries| entries.get(request_id))
            .map_or(0, |group| {
                group
                    .values()
                    .filter(|instance| instance.is_pending())
                    .count()
            })
    }

    /// Copy of one component's slot states, if registered
    #[must_use]
    pub fn snapshot(&self, component_id: &ComponentId) -> Option<ComponentSnapshot> {
        self.lock_store().get(component_id).map(|entries| {
            entries
                .iter()
                .map(|(request_id, group)| {
                    let slots = group
                        .iter()
                        .map(|(label, instance)| (*label, instance.slot.state()))
                        .collect();
                    (request_id.clone(), slots)
                })
                .collect()
        })
    }

    /// Counters over the whole store
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let store = self.lock_store();
        let mut stats = RegistryStats {
            components: store.len(),
            ..RegistryStats::default()
        };

        for group in store.values().flat_map(HashMap::values) {
            stats.request_groups += 1;
            for instance in group.values() {
                match instance.slot {
                    Slot::Pending(_) => stats.pending += 1,
                    Slot::Removed => stats.removed += 1,
                    Slot::Canceled => stats.canceled += 1,
                }
            }
        }
        stats
    }

    /// Remove tombstones older than the configured maximum age.
    ///
    /// Also enforces the per-request tombstone cap and drops request groups
    /// left empty. Pending slots and component scopes are never touched.
    pub fn sweep(&self) -> SweepReport {
        let policy = self.config().sweep;
        let mut report = SweepReport::default();

        let Some(cutoff) = chrono::Duration::from_std(policy.max_tombstone_age)
            .ok()
            .and_then(|age| self.clock.now().checked_sub_signed(age))
        else {
            return report;
        };

        let mut store = self.lock_store();
        for entries in store.values_mut() {
            for group in entries.values_mut() {
                let before = group.len();
                group.retain(|label, instance| {
                    !(instance.slot.is_terminal() && label.created_at() < cutoff)
                });
                report.tombstones_removed += before - group.len();
                report.tombstones_removed +=
                    Self::enforce_tombstone_cap(group, policy.max_tombstones_per_request);
            }

            let before = entries.len();
            entries.retain(|_, group| !group.is_empty());
            report.groups_removed += before - entries.len();
        }

        if report.tombstones_removed > 0 {
            debug!(
                tombstones_removed = report.tombstones_removed,
                groups_removed = report.groups_removed,
                "Swept cancellation tombstones"
            );
        }
        report
    }

    /// Allocate a fresh instance label from the registry clock
    #[must_use]
    pub fn next_label(&self) -> InstanceLabel {
        InstanceLabel::new(
            self.clock.now(),
            self.sequence.fetch_add(1, Ordering::Relaxed),
        )
    }

    fn lock_store(&self) -> MutexGuard<'_, HashMap<ComponentId, ComponentEntries>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move a group's slots toward `Canceled`, collecting handles to invoke.
    fn transition_to_canceled(
        request_id: &RequestId,
        group: &mut RequestGroup,
        upgrade_removed: bool,
        handles: &mut CollectedHandles,
        report: &mut CancelReport,
    ) {
        for (label, instance) in group.iter_mut() {
            match instance.slot.state() {
                SlotState::Canceled => {}
                SlotState::Removed => {
                    if upgrade_removed {
                        instance.cancel();
                        report.tombstones_upgraded += 1;
                    }
                }
                SlotState::Pending => {
                    if let Some(handle) = instance.cancel() {
                        handles.push((request_id.clone(), *label, handle));
                    }
                }
            }
        }
    }

    /// Invoke collected handles; failures and panics are logged and do not
    /// stop the loop.
    fn invoke_handles(
        component_id: &ComponentId,
        handles: CollectedHandles,
        report: &mut CancelReport,
    ) {
        for (request_id, label, handle) in handles {
            report.handles_invoked += 1;
            metrics::counter!(HANDLES_INVOKED).increment(1);
            if let Err(error) = handle.try_cancel() {
                report.handle_failures += 1;
                metrics::counter!(HANDLE_FAILURES).increment(1);
                warn!(
                    component_id = %component_id,
                    request_id = %request_id,
                    instance = %label,
                    error = %error,
                    "Error while cancelling request"
                );
            }
        }
    }

    /// Drop the oldest terminal slots beyond `max`. Returns how many were dropped.
    ///
    /// At least one tombstone is always kept, so the slot that just turned
    /// terminal survives the call that made it so.
    fn enforce_tombstone_cap(group: &mut RequestGroup, max: usize) -> usize {
        let max = max.max(1);
        let terminal = group
            .values()
            .filter(|instance| instance.slot.is_terminal())
            .count();
        if terminal <= max {
            return 0;
        }

        let excess: Vec<InstanceLabel> = group
            .iter()
            .filter(|(_, instance)| instance.slot.is_terminal())
            .map(|(label, _)| *label)
            .take(terminal - max)
            .collect();

        for label in &excess {
            group.remove(label);
        }
        excess.len()
    }
}

fn record_components(count: usize) {
    // Note: Precision loss acceptable for a component gauge
    #[allow(clippy::cast_precision_loss)]
    let count = count as f64;
    metrics::gauge!(COMPONENTS).set(count);
}

fn record_upgrades(report: &CancelReport) {
    if report.tombstones_upgraded > 0 {
        metrics::counter!(TOMBSTONES_UPGRADED).increment(report.tombstones_upgraded as u64);
    }
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl std::fmt::Debug for CancellationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationRegistry")
            .field("config", &self.config())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
