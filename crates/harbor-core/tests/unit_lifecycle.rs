use harbor_core::container::Engine;
use harbor_core::platform::Platform;
use harbor_core::plugin::{EntryError, InterestSet, PluginEntry, UnitContext};
use harbor_core::unit::{LifecycleError, Unit, UnitDescriptor, UnitEvent, UnitListener, UnitState};
use harbor_core::vfs::MemoryVfs;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

const PLUGINS: &str = "[[plugin]]\nentry = \"acme.Init\"\n";

fn layout() -> MemoryVfs {
    MemoryVfs::new()
        .with_file("/apps/shop/classes/shop/Main.type", "{}")
        .with_file("/apps/shop/lib/acme/acme/Init.type", "{}")
        .with_file("/apps/shop/lib/acme/plugins.toml", PLUGINS)
}

fn platform(entry: Arc<dyn PluginEntry>) -> Arc<Platform> {
    Arc::new(
        Platform::builder(Arc::new(layout()))
            .entry("acme.Init", entry)
            .build()
            .unwrap(),
    )
}

struct Healthy;

impl PluginEntry for Healthy {
    fn on_activate(&self, _: &InterestSet, _: &UnitContext) -> Result<(), EntryError> {
        Ok(())
    }
}

struct Broken;

impl PluginEntry for Broken {
    fn on_activate(&self, _: &InterestSet, _: &UnitContext) -> Result<(), EntryError> {
        Err("cannot reach database".into())
    }
}

#[derive(Default)]
struct Events(Mutex<Vec<UnitEvent>>);

impl UnitListener for Events {
    fn unit_event(&self, _unit: &Unit, event: &UnitEvent) {
        self.0.lock().push(event.clone());
    }
}

#[test]
fn test_failed_plugin_makes_unit_unroutable() {
    let engine = Engine::new("harbor");
    engine.add_host("localhost").unwrap();
    let good = Arc::new(Unit::new(UnitDescriptor::new("good", "/apps/shop"), platform(Arc::new(Healthy))));
    let bad = Arc::new(Unit::new(UnitDescriptor::new("bad", "/apps/shop"), platform(Arc::new(Broken))));
    engine.add_unit("localhost", good.clone()).unwrap();
    engine.add_unit("localhost", bad.clone()).unwrap();

    good.activate().unwrap();
    let err = bad.activate().unwrap_err();
    assert!(matches!(err, LifecycleError::Startup(_)));

    let status = bad.status();
    assert_eq!(status.state, UnitState::Failed);
    assert!(status.last_error.unwrap().contains("cannot reach database"));

    let routable: Vec<String> = engine
        .routable_units("localhost")
        .iter()
        .map(|u| u.name().to_string())
        .collect();
    assert_eq!(routable, vec!["good"]);
}

#[test]
fn test_listeners_see_lifecycle_in_order() {
    let unit = Unit::new(UnitDescriptor::new("shop", "/apps/shop"), platform(Arc::new(Healthy)));
    let events = Arc::new(Events::default());
    unit.add_listener(events.clone());

    unit.activate().unwrap();
    unit.reload().unwrap();
    unit.stop();

    assert_eq!(
        *events.0.lock(),
        vec![
            UnitEvent::Starting,
            UnitEvent::Started { generation: 1 },
            UnitEvent::Starting,
            UnitEvent::Started { generation: 2 },
            UnitEvent::Reloaded { generation: 2 },
            UnitEvent::Stopped,
        ]
    );
}

#[test]
fn test_reload_swaps_loader_and_keeps_bindings() {
    let unit = Unit::new(UnitDescriptor::new("shop", "/apps/shop"), platform(Arc::new(Healthy)));
    unit.naming().add_environment("greeting", "String", "hello").unwrap();
    unit.activate().unwrap();
    let old = unit.loader().unwrap();
    let before = old.resolve("shop.Main").unwrap();

    let report = unit.reload().unwrap();
    let new = unit.loader().unwrap();
    assert_eq!(report.generation, 2);
    assert_eq!(new.generation(), 2);
    assert!(!Arc::ptr_eq(&before, &new.resolve("shop.Main").unwrap()));
    assert!(unit.naming().get("greeting").is_some());
    assert_eq!(unit.status().generation, Some(2));
}

#[test]
fn test_reload_requires_started() {
    let unit = Unit::new(UnitDescriptor::new("shop", "/apps/shop"), platform(Arc::new(Healthy)));
    assert!(matches!(
        unit.reload(),
        Err(LifecycleError::InvalidTransition { state: UnitState::Stopped, .. })
    ));
}

/// Blocks inside activation until the test lets it go.
struct Gate {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl PluginEntry for Gate {
    fn on_activate(&self, _: &InterestSet, _: &UnitContext) -> Result<(), EntryError> {
        self.entered.lock().send(())?;
        self.release.lock().recv()?;
        Ok(())
    }
}

#[test]
fn test_stop_during_activation_cancels() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Arc::new(Gate {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    let unit = Arc::new(Unit::new(UnitDescriptor::new("shop", "/apps/shop"), platform(gate)));

    let activating = {
        let unit = Arc::clone(&unit);
        thread::spawn(move || unit.activate())
    };
    entered_rx.recv().unwrap();
    assert_eq!(unit.state(), UnitState::Starting);

    unit.stop();
    release_tx.send(()).unwrap();

    let outcome = activating.join().unwrap();
    assert!(matches!(outcome, Err(LifecycleError::Cancelled { .. })));
    assert_eq!(unit.state(), UnitState::Stopped);
    assert!(unit.loader().is_none());
    assert!(unit.active_plugins().is_empty());

    // A cancelled unit can be activated again.
    release_tx.send(()).unwrap();
    unit.activate().unwrap();
    assert!(unit.is_routable());
}

/// Blocks inside deactivation until the test lets it go.
struct SlowDrain {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

impl PluginEntry for SlowDrain {
    fn on_activate(&self, _: &InterestSet, _: &UnitContext) -> Result<(), EntryError> {
        Ok(())
    }

    fn on_deactivate(&self, _: &UnitContext) {
        let _ = self.entered.lock().send(());
        let _ = self.release.lock().recv();
    }
}

#[test]
fn test_stop_during_reload_drain_wins() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let drain = Arc::new(SlowDrain {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    });
    let unit = Arc::new(Unit::new(UnitDescriptor::new("shop", "/apps/shop"), platform(drain)));
    let events = Arc::new(Events::default());
    unit.add_listener(events.clone());
    unit.activate().unwrap();

    let reloading = {
        let unit = Arc::clone(&unit);
        thread::spawn(move || unit.reload())
    };
    entered_rx.recv().unwrap();
    assert_eq!(unit.state(), UnitState::Stopping);

    unit.stop();
    release_tx.send(()).unwrap();

    let outcome = reloading.join().unwrap();
    assert!(matches!(outcome, Err(LifecycleError::Cancelled { .. })));
    assert_eq!(unit.state(), UnitState::Stopped);
    assert!(!unit.is_routable());
    assert!(unit.loader().is_none());
    assert!(unit.active_plugins().is_empty());
    assert!(matches!(events.0.lock().last(), Some(UnitEvent::Stopped)));

    // The next activation is not affected by the earlier stop request.
    unit.activate().unwrap();
    assert!(unit.is_routable());
}
