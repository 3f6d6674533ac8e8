//! End-to-end scenarios: bundles, declarative components, configuration.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::json;

use solder_core::{BundleManifest, Properties, ServiceError, ServiceResult};
use solder_ds::{ComponentContext, ComponentFactory, ComponentInstance, ComponentState, DsRuntime};
use solder_framework::{Framework, ServiceObject, ServiceReference};

// ─── Harness ──────────────────────────────────────────────────────────────────

/// Observable side effects of one component implementation.
#[derive(Default)]
struct Probe {
    activations: AtomicUsize,
    deactivations: AtomicUsize,
    modified_calls: AtomicUsize,
    bound: Mutex<Vec<String>>,
    unbound: Mutex<Vec<String>>,
    last_properties: Mutex<Option<Properties>>,
}

struct ProbeInstance {
    probe: Arc<Probe>,
    object: ServiceObject,
}

impl ComponentInstance for ProbeInstance {
    fn activate(&self, context: &ComponentContext) -> ServiceResult<()> {
        self.probe.activations.fetch_add(1, Ordering::SeqCst);
        *self.probe.last_properties.lock() = Some((**context.properties()).clone());
        Ok(())
    }

    fn deactivate(&self, _context: &ComponentContext) {
        self.probe.deactivations.fetch_add(1, Ordering::SeqCst);
    }

    fn modified(&self, context: &ComponentContext) -> ServiceResult<()> {
        self.probe.modified_calls.fetch_add(1, Ordering::SeqCst);
        *self.probe.last_properties.lock() = Some((**context.properties()).clone());
        Ok(())
    }

    fn bind(&self, reference: &str, target: &ServiceReference) {
        self.probe
            .bound
            .lock()
            .push(format!("{reference}#{}", target.service_id()));
    }

    fn unbind(&self, reference: &str, target: &ServiceReference) {
        self.probe
            .unbound
            .lock()
            .push(format!("{reference}#{}", target.service_id()));
    }

    fn service_object(&self, _interface: &str) -> Option<ServiceObject> {
        Some(Arc::clone(&self.object))
    }
}

struct ProbeFactory {
    probe: Arc<Probe>,
}

impl ComponentFactory for ProbeFactory {
    fn create(&self) -> Option<Arc<dyn ComponentInstance>> {
        Some(Arc::new(ProbeInstance {
            probe: Arc::clone(&self.probe),
            object: Arc::new(()),
        }))
    }
}

fn manifest(components: serde_json::Value) -> BundleManifest {
    BundleManifest::from_value(json!({
        "symbolic_name": "test.bundle",
        "version": 1,
        "components": components
    }))
    .unwrap()
}

/// Polls `condition` until it holds or two seconds elapse.
fn wait_until(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn probe_factory() -> (Arc<Probe>, Arc<ProbeFactory>) {
    let probe = Arc::new(Probe::default());
    let factory = Arc::new(ProbeFactory {
        probe: Arc::clone(&probe),
    });
    (probe, factory)
}

// ─── Scenarios ────────────────────────────────────────────────────────────────

/// Delayed component with a service dependency; validation rejects the
/// owning bundle.  Resolution fails with a security error and the component
/// ends up disabled.
#[test]
fn delayed_component_with_rejected_bundle() {
    let framework = Framework::builder()
        .with_validation(|bundle| bundle.symbolic_name() != "b6")
        .build();
    let ds = DsRuntime::attach(&framework);
    let (_probe, factory) = probe_factory();
    ds.register_factory("test::C6", factory);

    let b6 = framework
        .install_bundle(
            "b6",
            Some(manifest(json!([{
                "name": "c6",
                "implementation": "test::C6",
                "service": {"interfaces": ["Interface2"]},
                "references": [{"name": "dep", "interface": "Interface1"}]
            }]))),
        )
        .unwrap();
    framework.start_bundle(&b6).unwrap();

    // Provide the dependency from another bundle.
    let provider = framework.install_bundle("provider", None).unwrap();
    framework.start_bundle(&provider).unwrap();
    framework
        .context(&provider)
        .register_singleton("Interface1", Arc::new(()), Properties::new())
        .unwrap();

    // The component becomes satisfied and publishes its (lazy) service.
    assert!(wait_until(|| framework
        .registry()
        .get_reference("Interface2")
        .is_some()));

    let consumer = framework.install_bundle("consumer", None).unwrap();
    framework.start_bundle(&consumer).unwrap();
    let reference = framework.registry().get_reference("Interface2").unwrap();
    let result = framework.context(&consumer).get_service(&reference);
    assert!(matches!(result, Err(ServiceError::Security(_))), "{result:?}");

    let scr = ds.service_component_runtime();
    let description = scr.get_component_description_dtos(Some(&b6)).remove(0);
    assert!(wait_until(|| !scr.is_component_enabled(&description)));
}

/// Immediate component whose first activation is rejected by validation:
/// the enable future completes exceptionally and the component is disabled.
#[tokio::test]
async fn immediate_component_rejected_on_activation() {
    let framework = Framework::builder()
        .with_validation(|bundle| bundle.symbolic_name() != "b7")
        .build();
    let ds = DsRuntime::attach(&framework);
    let (probe, factory) = probe_factory();
    ds.register_factory("test::C7", factory);

    let b7 = framework
        .install_bundle(
            "b7",
            Some(manifest(json!([{
                "name": "c7",
                "implementation": "test::C7",
                "enabled": false,
                "immediate": true,
                "references": [{"name": "dep", "interface": "Interface1"}]
            }]))),
        )
        .unwrap();
    framework.start_bundle(&b7).unwrap();

    let provider = framework.install_bundle("provider", None).unwrap();
    framework.start_bundle(&provider).unwrap();
    framework
        .context(&provider)
        .register_singleton("Interface1", Arc::new(()), Properties::new())
        .unwrap();

    let scr = ds.service_component_runtime();
    let description = scr.get_component_description_dtos(Some(&b7)).remove(0);
    let result = scr.enable_component(&description).await;
    assert!(matches!(result, Err(ServiceError::Security(_))), "{result:?}");
    assert!(!scr.is_component_enabled(&description));
    assert_eq!(probe.activations.load(Ordering::SeqCst), 0);
}

/// Required configuration: the component is enabled but publishes nothing
/// until its PID is updated; the published properties carry the
/// configuration; removal withdraws the service.
#[tokio::test]
async fn required_configuration_gates_the_service() {
    let framework = Framework::builder().build();
    let ds = DsRuntime::attach(&framework);
    let (_probe, factory) = probe_factory();
    ds.register_factory("test::CA02", factory);

    let bundle = framework
        .install_bundle(
            "bca02",
            Some(manifest(json!([{
                "name": "bca02.component",
                "implementation": "test::CA02",
                "service": {"interfaces": ["CAInterface"]},
                "configuration-policy": "require",
                "configuration-pid": ["p"]
            }]))),
        )
        .unwrap();
    framework.start_bundle(&bundle).unwrap();

    let scr = ds.service_component_runtime();
    let description = scr.get_component_description_dtos(Some(&bundle)).remove(0);
    assert!(wait_until(|| scr.is_component_enabled(&description)));
    assert!(framework.registry().get_reference("CAInterface").is_none());

    let config = ds.configuration_admin().get_configuration("p");
    config
        .update(Properties::from_json(json!({"foo": "bar"})).unwrap())
        .await
        .unwrap();

    assert!(wait_until(|| framework
        .registry()
        .get_reference("CAInterface")
        .is_some()));
    let reference = framework.registry().get_reference("CAInterface").unwrap();
    assert_eq!(reference.property("foo"), Some(json!("bar")));

    let consumer = framework.install_bundle("consumer", None).unwrap();
    framework.start_bundle(&consumer).unwrap();
    assert!(framework.context(&consumer).get_service(&reference).is_ok());

    config.remove().await.unwrap();
    assert!(wait_until(|| framework
        .registry()
        .get_reference("CAInterface")
        .is_none()));
}

/// A declared `modified` callback receives configuration updates without a
/// restart; the observed properties round-trip the update.
#[tokio::test]
async fn modified_callback_avoids_restart() {
    let framework = Framework::builder().build();
    let ds = DsRuntime::attach(&framework);
    let (probe, factory) = probe_factory();
    ds.register_factory("test::Mod", factory);

    let bundle = framework
        .install_bundle(
            "modbundle",
            Some(manifest(json!([{
                "name": "mod.component",
                "implementation": "test::Mod",
                "immediate": true,
                "modified": "modified",
                "configuration-policy": "optional",
                "configuration-pid": ["mod.pid"]
            }]))),
        )
        .unwrap();
    framework.start_bundle(&bundle).unwrap();
    assert!(wait_until(|| probe.activations.load(Ordering::SeqCst) == 1));

    ds.configuration_admin()
        .get_configuration("mod.pid")
        .update(Properties::from_json(json!({"answer": 42})).unwrap())
        .await
        .unwrap();

    assert!(wait_until(|| probe.modified_calls.load(Ordering::SeqCst) == 1));
    assert_eq!(probe.deactivations.load(Ordering::SeqCst), 0);
    let observed = probe.last_properties.lock().clone().unwrap();
    assert_eq!(observed.get_int("answer").unwrap(), 42);
}

/// Without a `modified` callback a configuration update restarts the active
/// component with the new properties.
#[tokio::test]
async fn configuration_update_restarts_without_modified_callback() {
    let framework = Framework::builder().build();
    let ds = DsRuntime::attach(&framework);
    let (probe, factory) = probe_factory();
    ds.register_factory("test::Restart", factory);

    let bundle = framework
        .install_bundle(
            "restartbundle",
            Some(manifest(json!([{
                "name": "restart.component",
                "implementation": "test::Restart",
                "immediate": true,
                "configuration-policy": "optional",
                "configuration-pid": ["restart.pid"]
            }]))),
        )
        .unwrap();
    framework.start_bundle(&bundle).unwrap();
    assert!(wait_until(|| probe.activations.load(Ordering::SeqCst) == 1));

    ds.configuration_admin()
        .get_configuration("restart.pid")
        .update(Properties::from_json(json!({"round": 2})).unwrap())
        .await
        .unwrap();

    assert!(wait_until(|| probe.activations.load(Ordering::SeqCst) == 2));
    assert_eq!(probe.deactivations.load(Ordering::SeqCst), 1);
    let observed = probe.last_properties.lock().clone().unwrap();
    assert_eq!(observed.get_int("round").unwrap(), 2);
}

/// Dynamic references bind and unbind while the component stays active.
#[test]
fn dynamic_reference_binds_without_restart() {
    let framework = Framework::builder().build();
    let ds = DsRuntime::attach(&framework);
    let (probe, factory) = probe_factory();
    ds.register_factory("test::Dyn", factory);

    let bundle = framework
        .install_bundle(
            "dynbundle",
            Some(manifest(json!([{
                "name": "dyn.component",
                "implementation": "test::Dyn",
                "immediate": true,
                "references": [{
                    "name": "dep",
                    "interface": "Dep",
                    "cardinality": "0..n",
                    "policy": "dynamic"
                }]
            }]))),
        )
        .unwrap();
    framework.start_bundle(&bundle).unwrap();
    assert!(wait_until(|| probe.activations.load(Ordering::SeqCst) == 1));

    let provider = framework.install_bundle("provider", None).unwrap();
    framework.start_bundle(&provider).unwrap();
    let registration = framework
        .context(&provider)
        .register_singleton("Dep", Arc::new(()), Properties::new())
        .unwrap();

    assert!(wait_until(|| probe.bound.lock().len() == 1));
    assert_eq!(probe.deactivations.load(Ordering::SeqCst), 0);

    registration.unregister();
    assert!(wait_until(|| probe.unbound.lock().len() == 1));
    // 0..n stays satisfied with nothing bound: no restart.
    assert_eq!(probe.deactivations.load(Ordering::SeqCst), 0);
    assert_eq!(probe.activations.load(Ordering::SeqCst), 1);
}

/// A mandatory static reference going away deactivates the component and
/// withdraws its service.
#[test]
fn losing_a_mandatory_reference_unpublishes() {
    let framework = Framework::builder().build();
    let ds = DsRuntime::attach(&framework);
    let (probe, factory) = probe_factory();
    ds.register_factory("test::Needy", factory);

    let bundle = framework
        .install_bundle(
            "needybundle",
            Some(manifest(json!([{
                "name": "needy.component",
                "implementation": "test::Needy",
                "immediate": true,
                "service": {"interfaces": ["Needy"]},
                "references": [{"name": "dep", "interface": "Dep"}]
            }]))),
        )
        .unwrap();
    framework.start_bundle(&bundle).unwrap();

    let provider = framework.install_bundle("provider", None).unwrap();
    framework.start_bundle(&provider).unwrap();
    let registration = framework
        .context(&provider)
        .register_singleton("Dep", Arc::new(()), Properties::new())
        .unwrap();

    assert!(wait_until(|| probe.activations.load(Ordering::SeqCst) == 1));
    assert!(framework.registry().get_reference("Needy").is_some());

    registration.unregister();
    assert!(wait_until(|| framework.registry().get_reference("Needy").is_none()));
    assert_eq!(probe.deactivations.load(Ordering::SeqCst), 1);

    let scr = ds.service_component_runtime();
    let description = scr.get_component_description_dtos(Some(&bundle)).remove(0);
    let states: Vec<ComponentState> = scr
        .get_component_configuration_dtos(&description)
        .iter()
        .map(|dto| dto.state)
        .collect();
    assert_eq!(states, vec![ComponentState::UnsatisfiedReference]);
}

/// Twenty concurrent enables publish exactly one registration and all
/// observers see the same service id.
#[tokio::test(flavor = "multi_thread")]
async fn concurrent_enables_publish_exactly_once() {
    let framework = Framework::builder().build();
    let ds = DsRuntime::attach(&framework);
    let (_probe, factory) = probe_factory();
    ds.register_factory("test::Once", factory);

    let bundle = framework
        .install_bundle(
            "oncebundle",
            Some(manifest(json!([{
                "name": "once.component",
                "implementation": "test::Once",
                "enabled": false,
                "service": {"interfaces": ["Once"]}
            }]))),
        )
        .unwrap();
    framework.start_bundle(&bundle).unwrap();

    let scr = ds.service_component_runtime();
    let description = scr.get_component_description_dtos(Some(&bundle)).remove(0);

    let enables = (0..20)
        .map(|_| scr.enable_component(&description))
        .collect::<Vec<_>>();
    for result in futures::future::join_all(enables).await {
        result.unwrap();
    }

    assert!(wait_until(|| framework.registry().get_reference("Once").is_some()));
    let references = framework.registry().get_references("Once", None);
    assert_eq!(references.len(), 1, "exactly one publication");

    let service_id = references[0].service_id();
    let dtos = scr.get_component_configuration_dtos(&description);
    assert_eq!(dtos.len(), 1);
    assert_eq!(dtos[0].service_id, Some(service_id));
    assert_eq!(dtos[0].state, ComponentState::Satisfied);
}

/// A prototype-scoped component with a mandatory reference: every
/// `get_service` materialises a fresh activated instance whose bind
/// callback saw the bound target, and unget deactivates exactly that
/// instance.
#[test]
fn prototype_component_binds_references_per_instance() {
    let framework = Framework::builder().build();
    let ds = DsRuntime::attach(&framework);
    let (probe, factory) = probe_factory();
    ds.register_factory("test::Proto", factory);

    let bundle = framework
        .install_bundle(
            "protobundle",
            Some(manifest(json!([{
                "name": "proto.component",
                "implementation": "test::Proto",
                "service": {"interfaces": ["Proto"], "scope": "prototype"},
                "references": [{"name": "dep", "interface": "Dep"}]
            }]))),
        )
        .unwrap();
    framework.start_bundle(&bundle).unwrap();

    let provider = framework.install_bundle("provider", None).unwrap();
    framework.start_bundle(&provider).unwrap();
    let dep = framework
        .context(&provider)
        .register_singleton("Dep", Arc::new(()), Properties::new())
        .unwrap();

    assert!(wait_until(|| framework.registry().get_reference("Proto").is_some()));

    let consumer = framework.install_bundle("consumer", None).unwrap();
    framework.start_bundle(&consumer).unwrap();
    let context = framework.context(&consumer);
    let reference = framework.registry().get_reference("Proto").unwrap();

    let first = context.get_service(&reference).unwrap();
    let second = context.get_service(&reference).unwrap();
    assert!(!Arc::ptr_eq(&first, &second), "prototype instances are fresh");
    assert_eq!(probe.activations.load(Ordering::SeqCst), 2);

    // Each materialised instance saw the bound target through bind().
    let expected = format!("dep#{}", dep.id());
    assert_eq!(*probe.bound.lock(), vec![expected.clone(), expected]);

    assert!(context.unget_service(&reference, Some(&first)));
    assert!(wait_until(|| probe.deactivations.load(Ordering::SeqCst) == 1));
}

/// A component whose implementation factory is missing stays unsatisfied
/// instead of publishing a service it cannot back.
#[test]
fn missing_factory_keeps_component_unsatisfied() {
    let framework = Framework::builder().build();
    let ds = DsRuntime::attach(&framework);

    let bundle = framework
        .install_bundle(
            "orphanbundle",
            Some(manifest(json!([{
                "name": "orphan.component",
                "implementation": "test::Nowhere",
                "service": {"interfaces": ["Orphan"]}
            }]))),
        )
        .unwrap();
    framework.start_bundle(&bundle).unwrap();

    let scr = ds.service_component_runtime();
    let description = scr.get_component_description_dtos(Some(&bundle)).remove(0);
    assert!(wait_until(|| {
        scr.get_component_configuration_dtos(&description)
            .first()
            .is_some_and(|dto| dto.state == ComponentState::UnsatisfiedReference)
    }));
    assert!(framework.registry().get_reference("Orphan").is_none());
}

/// Stopping the owning bundle disposes its components and withdraws their
/// services.
#[test]
fn bundle_stop_disposes_components() {
    let framework = Framework::builder().build();
    let ds = DsRuntime::attach(&framework);
    let (probe, factory) = probe_factory();
    ds.register_factory("test::Stop", factory);

    let bundle = framework
        .install_bundle(
            "stopbundle",
            Some(manifest(json!([{
                "name": "stop.component",
                "implementation": "test::Stop",
                "immediate": true,
                "service": {"interfaces": ["Stoppable"]}
            }]))),
        )
        .unwrap();
    framework.start_bundle(&bundle).unwrap();
    assert!(wait_until(|| framework.registry().get_reference("Stoppable").is_some()));
    assert!(wait_until(|| probe.activations.load(Ordering::SeqCst) == 1));

    framework.stop_bundle(&bundle).unwrap();
    assert!(framework.registry().get_reference("Stoppable").is_none());
    assert!(wait_until(|| probe.deactivations.load(Ordering::SeqCst) == 1));

    let scr = ds.service_component_runtime();
    assert!(scr.get_component_description_dtos(Some(&bundle)).is_empty());
}
