//! The component configuration state machine.
//!
//! One [`ComponentConfiguration`] is the runtime embodiment of a
//! `(metadata, configuration properties)` pair:
//!
//! ```text
//! DISABLED ──enable──► UNSATISFIED_REFERENCE ──satisfied──► SATISFIED
//!                                ▲                              │
//!                                │        activate (eager or    │
//!                                │         first get_service)   ▼
//!                                └──── below min / config ── ACTIVE
//! ```
//!
//! Transitions are decided under the configuration's own lock; everything
//! that re-enters the registry — publishing, unregistering, property
//! refreshes — runs after the lock is released, so cross-component event
//! cascades cannot deadlock.  Lifecycle callbacks (`activate`,
//! `deactivate`, `modified`, `bind`, `unbind`) run under the transition
//! lock but outside every framework lock, and a panicking callback is
//! contained and reported as a framework error event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use solder_core::constants::{COMPONENT_ID, COMPONENT_NAME, SERVICE_SCOPE};
use solder_core::metadata::{ConfigurationPolicy, ReferenceMetadata, ReferencePolicy};
use solder_core::{ComponentMetadata, Properties, ServiceError, ServiceResult, ServiceScope};
use solder_framework::{
    Bundle, BundleContext, InterfaceMap, ServiceFactory, ServiceObject, ServiceRegistration,
    ServiceSource,
};

use crate::component::{ComponentContext, ComponentInstance};
use crate::manager::DsDeps;
use crate::manager::reference::{ReferenceManager, ReferenceShift};
use crate::notifier::{ConfigurationEvent, ConfigurationEventKind};

/// Lifecycle states of a component configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ComponentState {
    /// Not participating; reference managers are closed.
    Disabled,
    /// Enabled but waiting for references or required configuration.
    UnsatisfiedReference,
    /// Dependencies met; service published, instance not yet built.
    Satisfied,
    /// Instance constructed and activated.
    Active,
    /// Terminal.
    Disposed,
}

impl ComponentState {
    /// Canonical upper-case name, as used in DTOs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "DISABLED",
            Self::UnsatisfiedReference => "UNSATISFIED_REFERENCE",
            Self::Satisfied => "SATISFIED",
            Self::Active => "ACTIVE",
            Self::Disposed => "DISPOSED",
        }
    }
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Machine {
    state: ComponentState,
    instance: Option<Arc<dyn ComponentInstance>>,
    registration: Option<ServiceRegistration>,
    /// Present configuration snapshots, by PID.
    configs: HashMap<String, Arc<Properties>>,
    /// Prototype-scoped side table: published object → owning instance.
    prototype_instances: Vec<(ServiceObject, Arc<dyn ComponentInstance>)>,
}

/// Runtime embodiment of one `(metadata, configuration)` pair.
pub(crate) struct ComponentConfiguration {
    id: u64,
    metadata: Arc<ComponentMetadata>,
    bundle: Arc<Bundle>,
    context: BundleContext,
    deps: DsDeps,
    /// PIDs this configuration consumes (for factory instances, the single
    /// instance PID).
    pids: Vec<String>,
    references: Vec<Arc<ReferenceManager>>,
    machine: Mutex<Machine>,
    /// Publish latch: ensures exactly one publication per satisfied window.
    publishing: AtomicBool,
    config_tokens: Mutex<Vec<(String, u64)>>,
    /// Last activation failure, so `enable` can report a failure that was
    /// driven by an event arriving while it was still wiring subscriptions.
    pending_error: Mutex<Option<ServiceError>>,
}

impl ComponentConfiguration {
    pub(crate) fn new(
        id: u64,
        metadata: Arc<ComponentMetadata>,
        bundle: Arc<Bundle>,
        deps: DsDeps,
        pids: Vec<String>,
    ) -> Arc<Self> {
        let context = deps.framework.context(&bundle);
        let references = metadata
            .references
            .iter()
            .map(|reference| ReferenceManager::new(reference.clone(), context.clone()))
            .collect();
        Arc::new(Self {
            id,
            metadata,
            bundle,
            context,
            deps,
            pids,
            references,
            machine: Mutex::new(Machine {
                state: ComponentState::Disabled,
                instance: None,
                registration: None,
                configs: HashMap::new(),
                prototype_instances: Vec::new(),
            }),
            publishing: AtomicBool::new(false),
            config_tokens: Mutex::new(Vec::new()),
            pending_error: Mutex::new(None),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn metadata(&self) -> &Arc<ComponentMetadata> {
        &self.metadata
    }

    pub(crate) fn state(&self) -> ComponentState {
        self.machine.lock().state
    }

    pub(crate) fn service_id(&self) -> Option<u64> {
        self.machine.lock().registration.as_ref().map(ServiceRegistration::id)
    }

    /// Whether this configuration consumes exactly the given PID — used to
    /// route factory-instance lifecycle to the right configuration.
    pub(crate) fn is_for_single_pid(&self, pid: &str) -> bool {
        matches!(self.pids.as_slice(), [only] if only == pid)
    }

    /// Merged properties as they currently stand.
    pub(crate) fn current_properties(&self) -> Properties {
        self.merged_properties(&self.machine.lock())
    }

    // ─── Enable / teardown ───────────────────────────────────────────────────

    /// Moves `Disabled → UnsatisfiedReference`, wires configuration and
    /// reference subscriptions, and attempts satisfaction.  Eager activation
    /// failures propagate to the caller.
    pub(crate) fn enable(self: &Arc<Self>) -> ServiceResult<()> {
        {
            let mut machine = self.machine.lock();
            if machine.state != ComponentState::Disabled {
                return Ok(());
            }
            machine.state = ComponentState::UnsatisfiedReference;
        }
        *self.pending_error.lock() = None;
        debug!(component = %self.metadata.name, "Component enabled");

        if self.metadata.configuration_policy != ConfigurationPolicy::Ignore {
            for pid in &self.pids {
                let weak = Arc::downgrade(self);
                let token = self.deps.notifier.register_listener(
                    pid,
                    Arc::new(move |event| {
                        if let Some(configuration) = weak.upgrade() {
                            configuration.on_configuration_event(event);
                        }
                    }),
                );
                self.config_tokens.lock().push((pid.clone(), token));
            }
            // Configurations that already exist are picked up immediately.
            let mut machine = self.machine.lock();
            for pid in &self.pids {
                if let Some(props) = self.deps.admin.properties(pid) {
                    machine.configs.insert(pid.clone(), props);
                }
            }
        }

        let sink = Arc::downgrade(self);
        for manager in &self.references {
            manager.open(sink.clone())?;
        }

        self.try_satisfy()?;
        // A registry event during `open` may have driven the first
        // activation itself; surface its failure to the enabling caller.
        match self.pending_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Tears down to `target` (`Disabled` or `Disposed`): unregisters the
    /// service, deactivates an active instance, closes reference managers,
    /// and drops configuration subscriptions.  Idempotent.
    pub(crate) fn shut_down(&self, target: ComponentState) {
        let registration = {
            let mut machine = self.machine.lock();
            if machine.state == ComponentState::Disposed
                || (machine.state == ComponentState::Disabled
                    && target == ComponentState::Disabled)
            {
                return;
            }
            if machine.state == ComponentState::Active {
                self.run_deactivate(&mut machine);
            }
            machine.state = target;
            machine.configs.clear();
            machine.prototype_instances.clear();
            machine.registration.take()
        };
        if let Some(registration) = registration {
            registration.unregister();
        }
        for manager in &self.references {
            manager.close();
        }
        for (pid, token) in self.config_tokens.lock().drain(..) {
            self.deps.notifier.unregister_listener(&pid, token);
        }
        debug!(component = %self.metadata.name, state = %target, "Component torn down");
    }

    pub(crate) fn dispose(&self) {
        self.shut_down(ComponentState::Disposed);
    }

    fn security_disable(&self) {
        warn!(
            component = %self.metadata.name,
            bundle = %self.bundle.symbolic_name(),
            "Bundle validation rejected, disabling component"
        );
        self.shut_down(ComponentState::Disabled);
    }

    // ─── Satisfaction and publication ────────────────────────────────────────

    fn config_satisfied(&self, machine: &Machine) -> bool {
        match self.metadata.configuration_policy {
            ConfigurationPolicy::Require => {
                self.pids.iter().all(|pid| machine.configs.contains_key(pid))
            }
            _ => true,
        }
    }

    fn references_satisfied(&self) -> bool {
        self.references.iter().all(|m| m.is_satisfied())
    }

    /// The Register action: when satisfiable, publish exactly once and move
    /// to `Satisfied`; immediate components then activate eagerly.
    fn try_satisfy(self: &Arc<Self>) -> ServiceResult<()> {
        {
            let machine = self.machine.lock();
            if machine.state != ComponentState::UnsatisfiedReference
                || !self.config_satisfied(&machine)
                || !self.references_satisfied()
            {
                return Ok(());
            }
        }
        // Exactly one thread wins the publish; concurrent attempts return
        // silently and observe the winner's registration.
        if self.publishing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        // Implementation factory lookup: absent means stay unsatisfied.
        if !self
            .deps
            .factories
            .read()
            .contains_key(&self.metadata.implementation)
        {
            debug!(
                component = %self.metadata.name,
                implementation = %self.metadata.implementation,
                "No factory for implementation, staying unsatisfied"
            );
            self.publishing.store(false, Ordering::Release);
            return Ok(());
        }

        let registration = if self.metadata.provides_service() {
            match self.publish() {
                Ok(registration) => Some(registration),
                Err(error) => {
                    self.publishing.store(false, Ordering::Release);
                    return Err(error);
                }
            }
        } else {
            None
        };

        let withdrawn = {
            let mut machine = self.machine.lock();
            if machine.state == ComponentState::UnsatisfiedReference {
                machine.registration = registration.clone();
                machine.state = ComponentState::Satisfied;
                None
            } else {
                // Disposed or disabled while publishing: withdraw.
                registration
            }
        };
        self.publishing.store(false, Ordering::Release);
        if let Some(registration) = withdrawn {
            registration.unregister();
            return Ok(());
        }
        info!(component = %self.metadata.name, "Component satisfied");

        let result = if self.metadata.is_immediate() {
            self.activate_now()
        } else {
            Ok(())
        };

        // A reference may have vanished while the registration was going
        // out; re-evaluate so the published service does not go stale.
        self.revalidate();
        result
    }

    fn publish(self: &Arc<Self>) -> ServiceResult<ServiceRegistration> {
        let Some(service) = self.metadata.service.as_ref() else {
            return Err(ServiceError::illegal_state("component provides no service"));
        };
        let mut properties = self.current_properties();
        if service.scope == ServiceScope::Prototype {
            properties.insert(SERVICE_SCOPE, json!("prototype"));
        }
        let interfaces: Vec<&str> = service.interfaces.iter().map(String::as_str).collect();
        let factory = Arc::new(ComponentServiceFactory {
            component: Arc::downgrade(self),
        });
        self.context
            .register_service(&interfaces, ServiceSource::Factory(factory), properties)
    }

    fn unpublish(&self) {
        let registration = self.machine.lock().registration.take();
        if let Some(registration) = registration {
            registration.unregister();
        }
    }

    /// Re-checks satisfaction after a publish window and demotes when a
    /// dependency vanished mid-flight.
    fn revalidate(self: &Arc<Self>) {
        let demote = {
            let machine = self.machine.lock();
            matches!(
                machine.state,
                ComponentState::Satisfied | ComponentState::Active
            ) && !(self.references_satisfied() && self.config_satisfied(&machine))
        };
        if demote {
            self.make_unsatisfied();
        }
    }

    /// Deactivates (when active), unpublishes, and returns to
    /// `UnsatisfiedReference`.
    fn make_unsatisfied(&self) {
        {
            let mut machine = self.machine.lock();
            if !matches!(
                machine.state,
                ComponentState::Satisfied | ComponentState::Active
            ) {
                return;
            }
            if machine.state == ComponentState::Active {
                self.run_deactivate(&mut machine);
            }
            machine.state = ComponentState::UnsatisfiedReference;
        }
        self.unpublish();
        debug!(component = %self.metadata.name, "Component unsatisfied");
    }

    // ─── Activation ──────────────────────────────────────────────────────────

    fn create_instance(&self) -> ServiceResult<Arc<dyn ComponentInstance>> {
        let factory = self
            .deps
            .factories
            .read()
            .get(&self.metadata.implementation)
            .cloned()
            .ok_or_else(|| {
                ServiceError::factory(format!(
                    "no factory registered for '{}'",
                    self.metadata.implementation
                ))
            })?;
        factory.create().ok_or_else(|| {
            ServiceError::factory(format!(
                "factory for '{}' returned no instance",
                self.metadata.implementation
            ))
        })
    }

    /// Builds and activates the instance; `Satisfied → Active`.
    ///
    /// Activation failure reverts to `Satisfied` without exposing the
    /// instance; a validation rejection disables the component.
    fn activate_now(self: &Arc<Self>) -> ServiceResult<()> {
        if let Err(error) = self.deps.framework.validate_bundle(&self.bundle) {
            *self.pending_error.lock() = Some(error.clone());
            self.security_disable();
            return Err(error);
        }
        let instance = match self.create_instance() {
            Ok(instance) => instance,
            Err(error) => {
                *self.pending_error.lock() = Some(error.clone());
                self.deps.framework.event_hub().post_error(
                    Some(Arc::clone(&self.bundle)),
                    format!("component '{}' instance creation failed", self.metadata.name),
                    error.clone(),
                );
                return Err(error);
            }
        };

        let mut machine = self.machine.lock();
        match machine.state {
            ComponentState::Satisfied => {}
            ComponentState::Active => return Ok(()),
            other => {
                return Err(ServiceError::illegal_state(format!(
                    "cannot activate component '{}' in state {other}",
                    self.metadata.name
                )));
            }
        }

        let context = self.build_component_context(&machine);
        self.run_bind(instance.as_ref());
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            instance.activate(&context)
        }));
        match outcome {
            Ok(Ok(())) => {
                machine.instance = Some(instance);
                machine.state = ComponentState::Active;
                info!(component = %self.metadata.name, "Component activated");
                Ok(())
            }
            Ok(Err(error)) => {
                drop(machine);
                *self.pending_error.lock() = Some(error.clone());
                self.report_activation_failure(error.clone());
                Err(error)
            }
            Err(_) => {
                drop(machine);
                let error = ServiceError::factory(format!(
                    "activate callback of '{}' panicked",
                    self.metadata.name
                ));
                *self.pending_error.lock() = Some(error.clone());
                self.report_activation_failure(error.clone());
                Err(error)
            }
        }
    }

    fn report_activation_failure(&self, error: ServiceError) {
        self.deps.framework.event_hub().post_error(
            Some(Arc::clone(&self.bundle)),
            format!("component '{}' failed to activate", self.metadata.name),
            error,
        );
    }

    /// Injects every bound target through the instance's `bind` callback.
    /// Runs before `activate` on every activation path; a panicking callback
    /// is contained and reported.
    fn run_bind(&self, instance: &dyn ComponentInstance) {
        for manager in &self.references {
            for target in manager.bound() {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    instance.bind(&manager.metadata().name, &target);
                }));
                if result.is_err() {
                    self.deps.framework.event_hub().post_error(
                        Some(Arc::clone(&self.bundle)),
                        format!(
                            "component '{}' bind callback panicked",
                            self.metadata.name
                        ),
                        ServiceError::factory("bind panicked"),
                    );
                }
            }
        }
    }

    /// Deactivates the live instance.  Caller holds the machine lock and has
    /// verified `state == Active`.
    fn run_deactivate(&self, machine: &mut Machine) {
        let Some(instance) = machine.instance.take() else {
            return;
        };
        let context = self.build_component_context(machine);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            instance.deactivate(&context);
        }));
        if result.is_err() {
            self.deps.framework.event_hub().post_error(
                Some(Arc::clone(&self.bundle)),
                format!("component '{}' deactivate callback panicked", self.metadata.name),
                ServiceError::factory("deactivate panicked"),
            );
        }
        for manager in &self.references {
            for target in manager.bound() {
                let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    instance.unbind(&manager.metadata().name, &target);
                }));
            }
        }
        machine.state = ComponentState::Satisfied;
        info!(component = %self.metadata.name, "Component deactivated");
    }

    // ─── Materialisation (consumer-driven) ───────────────────────────────────

    /// Resolves the published service for a consumer: validates the bundle,
    /// lazily activates (delayed components), and produces the interface
    /// map.  Prototype-scoped components build a fresh activated instance
    /// per call.
    pub(crate) fn materialize(self: &Arc<Self>) -> ServiceResult<InterfaceMap> {
        let service = self
            .metadata
            .service
            .as_ref()
            .ok_or_else(|| ServiceError::illegal_state("component provides no service"))?;

        if service.scope == ServiceScope::Prototype {
            if let Err(error) = self.deps.framework.validate_bundle(&self.bundle) {
                self.security_disable();
                return Err(error);
            }
            let instance = self.create_instance()?;
            let mut machine = self.machine.lock();
            if !matches!(
                machine.state,
                ComponentState::Satisfied | ComponentState::Active
            ) {
                return Err(ServiceError::Unregistered);
            }
            let context = self.build_component_context(&machine);
            self.run_bind(instance.as_ref());
            let activated = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                instance.activate(&context)
            }));
            match activated {
                Ok(Ok(())) => {}
                Ok(Err(error)) => return Err(error),
                Err(_) => return Err(ServiceError::factory("activate callback panicked")),
            }
            let map = Self::interface_map(service.interfaces.iter(), instance.as_ref())?;
            if let Some(primary) = map.values().next() {
                machine
                    .prototype_instances
                    .push((Arc::clone(primary), instance));
            }
            return Ok(map);
        }

        self.activate_now()?;
        let machine = self.machine.lock();
        let instance = machine
            .instance
            .as_ref()
            .ok_or_else(|| ServiceError::illegal_state("component lost its instance"))?;
        Self::interface_map(service.interfaces.iter(), instance.as_ref())
    }

    fn interface_map<'a>(
        interfaces: impl Iterator<Item = &'a String>,
        instance: &dyn ComponentInstance,
    ) -> ServiceResult<InterfaceMap> {
        let mut map = InterfaceMap::new();
        for interface in interfaces {
            let object = instance.service_object(interface).ok_or_else(|| {
                ServiceError::factory(format!(
                    "component instance does not provide '{interface}'"
                ))
            })?;
            map.insert(interface.clone(), object);
        }
        Ok(map)
    }

    /// Releases a prototype-scoped instance produced by
    /// [`materialize`](Self::materialize).
    pub(crate) fn release_instance(&self, instance: &InterfaceMap) {
        let Some(probe) = instance.values().next() else {
            return;
        };
        let removed = {
            let mut machine = self.machine.lock();
            let position = machine
                .prototype_instances
                .iter()
                .position(|(object, _)| Arc::ptr_eq(object, probe));
            position.map(|p| {
                let (_, component_instance) = machine.prototype_instances.remove(p);
                (component_instance, self.build_component_context(&machine))
            })
        };
        if let Some((component_instance, context)) = removed {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                component_instance.deactivate(&context);
            }));
        }
    }

    // ─── Properties ──────────────────────────────────────────────────────────

    fn merged_properties(&self, machine: &Machine) -> Properties {
        let mut merged = Properties::new();
        for pid in &self.pids {
            if let Some(config) = machine.configs.get(pid) {
                merged.extend(config);
            }
        }
        merged.insert(COMPONENT_NAME, json!(self.metadata.name));
        merged.insert(COMPONENT_ID, json!(self.id));
        merged
    }

    fn build_component_context(&self, machine: &Machine) -> ComponentContext {
        let mut bound = HashMap::new();
        for manager in &self.references {
            bound.insert(manager.metadata().name.clone(), manager.bound());
        }
        ComponentContext::new(
            Arc::new(self.merged_properties(machine)),
            self.context.clone(),
            bound,
        )
    }

    /// Pushes the current merged properties onto the published registration.
    fn refresh_registration_properties(&self) {
        let (registration, properties) = {
            let machine = self.machine.lock();
            (machine.registration.clone(), self.merged_properties(&machine))
        };
        if let Some(registration) = registration
            && let Err(error) = registration.set_properties(properties)
        {
            debug!(component = %self.metadata.name, %error, "Property refresh skipped");
        }
    }

    // ─── Configuration events ────────────────────────────────────────────────

    fn on_configuration_event(self: &Arc<Self>, event: &ConfigurationEvent) {
        if !self.pids.iter().any(|pid| pid == &event.pid) {
            return;
        }
        match event.kind {
            ConfigurationEventKind::Updated => self.on_configuration_updated(event),
            ConfigurationEventKind::Removed => self.on_configuration_removed(event),
        }
    }

    fn on_configuration_updated(self: &Arc<Self>, event: &ConfigurationEvent) {
        let state = {
            let mut machine = self.machine.lock();
            if let Some(props) = &event.properties {
                machine.configs.insert(event.pid.clone(), Arc::clone(props));
            }
            machine.state
        };
        match state {
            ComponentState::UnsatisfiedReference => {
                let _ = self.try_satisfy();
            }
            ComponentState::Satisfied => {
                self.refresh_registration_properties();
            }
            ComponentState::Active => {
                if self.metadata.modified.is_some() {
                    self.run_modified();
                } else {
                    // No modified callback: restart with the new properties.
                    {
                        let mut machine = self.machine.lock();
                        if machine.state == ComponentState::Active {
                            self.run_deactivate(&mut machine);
                        }
                    }
                    self.refresh_registration_properties();
                    let _ = self.activate_now();
                }
            }
            ComponentState::Disabled | ComponentState::Disposed => {}
        }
    }

    fn run_modified(&self) {
        let machine = self.machine.lock();
        let Some(instance) = machine.instance.clone() else {
            return;
        };
        let context = self.build_component_context(&machine);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            instance.modified(&context)
        }));
        drop(machine);
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(error)) => self.report_activation_failure(error),
            Err(_) => self.report_activation_failure(ServiceError::factory(
                "modified callback panicked",
            )),
        }
        self.refresh_registration_properties();
    }

    fn on_configuration_removed(self: &Arc<Self>, event: &ConfigurationEvent) {
        let require = self.metadata.configuration_policy == ConfigurationPolicy::Require;
        {
            let mut machine = self.machine.lock();
            machine.configs.remove(&event.pid);
        }
        if require {
            self.make_unsatisfied();
        } else {
            self.refresh_registration_properties();
        }
    }
}

impl ComponentConfiguration {
    /// Reacts to a binding change reported by one of the reference managers.
    ///
    /// Shifts arrive from listener dispatch with no locks held.
    pub(crate) fn on_reference_shift(
        self: &Arc<Self>,
        reference: &ReferenceMetadata,
        shift: ReferenceShift,
    ) {
        match self.state() {
            ComponentState::Disabled | ComponentState::Disposed => {}
            ComponentState::UnsatisfiedReference => {
                if shift.is_satisfied {
                    let _ = self.try_satisfy();
                }
            }
            ComponentState::Satisfied | ComponentState::Active => {
                let still_satisfied = self.references_satisfied()
                    && self.config_satisfied(&self.machine.lock());
                if !still_satisfied {
                    self.make_unsatisfied();
                    return;
                }
                // Still satisfied: a pure binding change.
                match reference.policy {
                    ReferencePolicy::Static => {
                        let restart = {
                            let mut machine = self.machine.lock();
                            if machine.state == ComponentState::Active {
                                self.run_deactivate(&mut machine);
                                true
                            } else {
                                false
                            }
                        };
                        if restart {
                            let _ = self.activate_now();
                        }
                    }
                    ReferencePolicy::Dynamic => {
                        let instance = self.machine.lock().instance.clone();
                        if let Some(instance) = instance {
                            for target in &shift.newly_unbound {
                                let _ = std::panic::catch_unwind(
                                    std::panic::AssertUnwindSafe(|| {
                                        instance.unbind(&reference.name, target);
                                    }),
                                );
                            }
                            for target in &shift.newly_bound {
                                let _ = std::panic::catch_unwind(
                                    std::panic::AssertUnwindSafe(|| {
                                        instance.bind(&reference.name, target);
                                    }),
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}

/// The service factory published for a component: lazily activates on first
/// use, produces per-call instances for prototype scope.
struct ComponentServiceFactory {
    component: Weak<ComponentConfiguration>,
}

impl ServiceFactory for ComponentServiceFactory {
    fn get_service(
        &self,
        _bundle: &Arc<Bundle>,
        _registration: &ServiceRegistration,
    ) -> ServiceResult<InterfaceMap> {
        let component = self.component.upgrade().ok_or(ServiceError::Unregistered)?;
        component.materialize()
    }

    fn unget_service(
        &self,
        _bundle: &Arc<Bundle>,
        _registration: &ServiceRegistration,
        instance: InterfaceMap,
    ) {
        if let Some(component) = self.component.upgrade() {
            component.release_instance(&instance);
        }
    }
}
