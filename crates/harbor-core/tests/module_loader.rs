use harbor_core::loader::{
    DelegationOrder, DirectorySource, LoaderConfig, ModuleLoader, ResolveError, SourceSet,
    SourceTier, TagInjector,
};
use harbor_core::vfs::{MemoryVfs, Vfs};
use rstest::rstest;
use std::sync::{Arc, Barrier};
use std::thread;

fn sources() -> SourceSet {
    let vfs: Arc<dyn Vfs> = Arc::new(
        MemoryVfs::new()
            .with_file("/boot/lang/Object.type", "boot")
            .with_file("/shared/util/Json.type", r#"{"tags": ["shared"]}"#)
            .with_file("/local/util/Json.type", r#"{"tags": ["local"]}"#)
            .with_file("/local/shop/Cart.type", r#"{"extends": ["lang.Object"]}"#),
    );
    SourceSet::new()
        .with(SourceTier::Bootstrap, Arc::new(DirectorySource::new("boot", "/boot", vfs.clone())))
        .with(SourceTier::Shared, Arc::new(DirectorySource::new("shared", "/shared", vfs.clone())))
        .with(SourceTier::Local, Arc::new(DirectorySource::new("local", "/local", vfs)))
}

fn loader(order: DelegationOrder) -> ModuleLoader {
    ModuleLoader::builder("shop")
        .sources(sources())
        .config(LoaderConfig::new(order))
        .build()
}

#[rstest]
#[case::local_first(DelegationOrder::LocalFirst, "local", SourceTier::Local)]
#[case::shared_first(DelegationOrder::SharedFirst, "shared", SourceTier::Shared)]
fn test_delegation_order_decides_the_winner(
    #[case] order: DelegationOrder,
    #[case] tag: &str,
    #[case] tier: SourceTier,
) {
    let loader = loader(order);
    for _ in 0..3 {
        let definition = loader.resolve("util.Json").unwrap();
        assert!(definition.has_tag(tag));
        assert_eq!(definition.origin().tier, tier);
    }
}

#[test]
fn test_unknown_type_is_not_found_every_time() {
    let loader = loader(DelegationOrder::LocalFirst);
    for _ in 0..3 {
        assert!(matches!(
            loader.resolve("ghost.Type"),
            Err(ResolveError::NotFound { ref type_name }) if type_name == "ghost.Type"
        ));
    }
    assert!(!loader.is_cached("ghost.Type"));
    assert_eq!(loader.stats().misses, 3);
}

#[test]
fn test_concurrent_resolution_populates_once() {
    const THREADS: usize = 16;
    let loader = Arc::new(loader(DelegationOrder::LocalFirst));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let loader = Arc::clone(&loader);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                loader.resolve("shop.Cart").unwrap()
            })
        })
        .collect();
    let definitions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(definitions.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    let stats = loader.stats();
    assert_eq!(stats.populations, 1);
    assert_eq!(stats.hits, THREADS as u64 - 1);
}

#[test]
fn test_reload_never_returns_old_generation() {
    let old = Arc::new(loader(DelegationOrder::LocalFirst));
    let before = old.resolve("shop.Cart").unwrap();

    let new = old.reload();
    let after = new.resolve("shop.Cart").unwrap();

    assert_eq!(new.generation(), old.generation() + 1);
    assert_eq!(after.generation(), new.generation());
    assert!(!Arc::ptr_eq(&before, &after));
    // The old generation keeps answering from its own cache.
    assert!(Arc::ptr_eq(&before, &old.resolve("shop.Cart").unwrap()));
}

#[test]
fn test_snapshot_strips_instrumentation() {
    let instrumented = ModuleLoader::builder("shop")
        .sources(sources())
        .transformer(Arc::new(TagInjector::new("Traced")))
        .build();
    assert!(instrumented.resolve("shop.Cart").unwrap().has_tag("Traced"));

    let raw = instrumented.snapshot_without_instrumentation();
    assert!(!raw.is_instrumented());
    assert!(raw.cached_names().is_empty());
    assert_eq!(raw.generation(), instrumented.generation());
    assert!(!raw.resolve("shop.Cart").unwrap().has_tag("Traced"));
}

#[test]
fn test_local_type_names_cover_only_local_sources() {
    let loader = loader(DelegationOrder::SharedFirst);
    assert_eq!(loader.local_type_names().unwrap(), vec!["shop.Cart", "util.Json"]);
}
