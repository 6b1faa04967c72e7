//! Container concurrency tests

use futures_util::future;
use ioc_kernel::container::{AutoRegistrar, CapabilityKey, ExportStrategy, InjectionContext, Scope, ScopeManager};
use ioc_kernel::{ContainerConfig, LocateError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct ExpensiveService {
    id: usize,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_singleton_activation() {
    let manager = Arc::new(ScopeManager::new());
    let activations = Arc::new(AtomicUsize::new(0));
    let activations_clone = activations.clone();

    manager
        .root()
        .add_strategy(
            ExportStrategy::factory(move |_| {
                std::thread::sleep(Duration::from_millis(20));
                Ok(ExpensiveService {
                    id: activations_clone.fetch_add(1, Ordering::SeqCst),
                })
            })
            .singleton()
            .build(),
        )
        .unwrap();

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let manager = manager.clone();
            tokio::task::spawn_blocking(move || manager.root().locate::<ExpensiveService>())
        })
        .collect();

    let results = future::join_all(handles).await;
    let services: Vec<_> = results
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().unwrap())
        .collect();

    assert_eq!(activations.load(Ordering::SeqCst), 1);
    assert_eq!(services.len(), 32);
    assert!(services.iter().all(|service| Arc::ptr_eq(service, &services[0])));
    assert_eq!(services[0].id, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_registration_during_resolution() {
    let manager = Arc::new(ScopeManager::new());
    manager
        .root()
        .add_strategy(ExportStrategy::instance(0usize).build())
        .unwrap();

    let writers: Vec<_> = (1..=50usize)
        .map(|value| {
            let manager = manager.clone();
            tokio::task::spawn_blocking(move || {
                manager
                    .root()
                    .add_strategy(ExportStrategy::instance(value).priority(value as i32).build())
            })
        })
        .collect();
    let readers: Vec<_> = (0..50)
        .map(|_| {
            let manager = manager.clone();
            tokio::task::spawn_blocking(move || manager.root().locate::<usize>())
        })
        .collect();

    for result in future::join_all(writers).await {
        result.unwrap().unwrap();
    }
    for result in future::join_all(readers).await {
        // Every reader sees some complete registration
        assert!(result.unwrap().unwrap().is_some());
    }

    assert_eq!(*manager.root().locate::<usize>().unwrap().unwrap(), 50);
    assert_eq!(manager.root().locate_all::<usize>().unwrap().len(), 51);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scoped_instances_per_child_under_concurrency() {
    let manager = Arc::new(ScopeManager::new());
    let activations = Arc::new(AtomicUsize::new(0));
    let activations_clone = activations.clone();
    manager
        .root()
        .add_strategy(
            ExportStrategy::factory(move |_| {
                Ok(ExpensiveService {
                    id: activations_clone.fetch_add(1, Ordering::SeqCst),
                })
            })
            .scoped()
            .build(),
        )
        .unwrap();

    let children: Vec<_> = (0..8).map(|_| manager.root().create_child_scope().unwrap()).collect();
    let handles: Vec<_> = children
        .iter()
        .flat_map(|child| (0..4).map(move |_| child.clone()))
        .map(|child| tokio::task::spawn_blocking(move || child.locate::<ExpensiveService>()))
        .collect();

    for result in future::join_all(handles).await {
        result.unwrap().unwrap().unwrap();
    }
    assert_eq!(activations.load(Ordering::SeqCst), 8);
}

struct SlowRegistrar {
    synthesized: Arc<AtomicUsize>,
    built: Arc<AtomicUsize>,
}

impl AutoRegistrar for SlowRegistrar {
    fn synthesize(&self, key: &CapabilityKey) -> Option<Arc<ExportStrategy>> {
        if key != &CapabilityKey::of_type::<ExpensiveService>() {
            return None;
        }
        self.synthesized.fetch_add(1, Ordering::SeqCst);
        // Give competing callers time to miss the same key
        std::thread::sleep(Duration::from_millis(30));
        let built = self.built.clone();
        Some(
            ExportStrategy::factory(move |_| {
                Ok(ExpensiveService {
                    id: built.fetch_add(1, Ordering::SeqCst),
                })
            })
            .singleton()
            .build(),
        )
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_auto_registration_registers_once() {
    let manager = Arc::new(ScopeManager::with_config(
        ContainerConfig::default().with_auto_register_unknown(true),
    ));
    let synthesized = Arc::new(AtomicUsize::new(0));
    let built = Arc::new(AtomicUsize::new(0));
    manager.set_auto_registrar(SlowRegistrar {
        synthesized: synthesized.clone(),
        built: built.clone(),
    });

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::task::spawn_blocking(move || manager.root().locate::<ExpensiveService>())
        })
        .collect();

    let services: Vec<_> = future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().unwrap())
        .collect();

    assert_eq!(synthesized.load(Ordering::SeqCst), 1);
    assert_eq!(built.load(Ordering::SeqCst), 1);
    assert!(services.iter().all(|service| Arc::ptr_eq(service, &services[0])));
    assert_eq!(manager.root().get_all_strategies().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_misses_invoke_provider_once() {
    let manager = Arc::new(ScopeManager::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let provider_calls = calls.clone();
    manager
        .root()
        .add_missing_export_strategy_provider(
            move |_: &Scope, _: &InjectionContext, key: &CapabilityKey| -> Result<Vec<Arc<ExportStrategy>>, LocateError> {
                if key.name() != Some("widget") {
                    return Ok(Vec::new());
                }
                provider_calls.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(30));
                Ok(vec![ExportStrategy::instance("widget".to_string()).export_named("widget").build()])
            },
        )
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::task::spawn_blocking(move || manager.root().locate_named::<String>("widget"))
        })
        .collect();

    for result in future::join_all(handles).await {
        assert_eq!(result.unwrap().unwrap().unwrap().as_str(), "widget");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(manager.root().get_strategies(&CapabilityKey::named("widget")).len(), 1);
}
