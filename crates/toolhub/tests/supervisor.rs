use std::sync::Arc;
use std::time::Duration;

use toolhub::providers::mock::{MockConfigStore, MockDiscovery};
use toolhub::registry::RegistryError;
use toolhub::{LoadStatus, RegistryEvent, ToolRegistry, ToolSupervisor};

fn setup(providers: &[&str], discovery: MockDiscovery) -> (ToolRegistry, ToolSupervisor, Arc<MockDiscovery>) {
    let discovery = Arc::new(discovery);
    let store = Arc::new(MockConfigStore::with_providers(providers.iter().copied()));
    let registry = ToolRegistry::new(store, discovery.clone());
    let supervisor = ToolSupervisor::new(registry.clone());
    (registry, supervisor, discovery)
}

#[tokio::test]
async fn shared_connection_is_disconnected_once() {
    let (registry, supervisor, discovery) = setup(
        &["x"],
        MockDiscovery::new().provider("x", &[("a", ""), ("b", ""), ("c", "")]),
    );
    registry.load_if_needed().await.unwrap();
    assert_eq!(supervisor.connections().await.len(), 1);

    let report = supervisor.shutdown().await;

    assert_eq!(report.disconnected, vec!["x"]);
    assert_eq!(discovery.connections()[0].disconnect_count(), 1);
    assert!(registry.catalog().await.is_empty());
    assert_eq!(registry.status().await, LoadStatus::NotLoaded);
}

#[tokio::test]
async fn second_shutdown_disconnects_nothing() {
    let (registry, supervisor, discovery) = setup(
        &["x", "y"],
        MockDiscovery::new()
            .provider("x", &[("a", "")])
            .provider("y", &[("b", "")]),
    );
    registry.load_if_needed().await.unwrap();

    assert_eq!(supervisor.shutdown().await.total(), 2);
    assert_eq!(supervisor.shutdown().await.total(), 0);

    for connection in discovery.connections() {
        assert_eq!(connection.disconnect_count(), 1);
    }
}

#[tokio::test]
async fn disconnect_failure_does_not_stop_the_rest() {
    let (registry, supervisor, discovery) = setup(
        &["x", "y", "z"],
        MockDiscovery::new()
            .provider("x", &[("a", "")])
            .provider_failing_disconnect("y", &[("b", "")])
            .provider("z", &[("c", "")]),
    );
    registry.load_if_needed().await.unwrap();

    let report = supervisor.shutdown().await;

    assert_eq!(report.disconnected, vec!["x", "z"]);
    assert_eq!(report.failed, vec!["y"]);
    assert!(discovery.connections().iter().all(|c| c.disconnect_count() == 1));
}

#[tokio::test]
async fn shutdown_mid_load_keeps_and_closes_partial_catalog() {
    let (registry, supervisor, discovery) = setup(
        &["a", "b"],
        MockDiscovery::new()
            .provider("a", &[("first", "")])
            .provider_with_delay("b", &[("second", "")], Some(Duration::from_secs(30))),
    );
    let mut events = registry.subscribe();
    let loading = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.load_if_needed().await })
    };

    // wait until provider a has been merged
    loop {
        if let RegistryEvent::CatalogChanged { tools: 1 } = events.recv().await.unwrap() {
            break;
        }
    }

    let report = supervisor.shutdown().await;

    assert_eq!(report.disconnected, vec!["a"]);
    assert_eq!(loading.await.unwrap(), Err(RegistryError::Cancelled));
    // b never finished connecting, so only a's connection exists
    let connections = discovery.connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].disconnect_count(), 1);
}

#[tokio::test]
async fn load_after_shutdown_reconnects() {
    let (registry, supervisor, discovery) = setup(&["x"], MockDiscovery::new().provider("x", &[("a", "")]));
    registry.load_if_needed().await.unwrap();
    supervisor.shutdown().await;

    registry.load_if_needed().await.unwrap();

    assert_eq!(discovery.connect_count("x"), 2);
    assert_eq!(registry.tools().await.len(), 1);
}
