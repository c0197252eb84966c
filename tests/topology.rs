//! Topology construction against a recording factory.

use std::collections::HashSet;
use std::path::Path;

use listener_topology::listener::{
    Capabilities, GlobalTls, LifecycleState, ListenerError, ListenerManager, ListenerSpec,
    TopologyOptions, TopologyStrategy,
};
use listener_topology::net::{EventLoopThreadPool, ListenerCallbacks};

mod common;

use common::{options, RecordingFactory};

fn directive(key: &str, value: &str) -> (String, String) {
    (key.to_string(), value.to_string())
}

#[test]
fn per_loop_builds_one_instance_per_loop_and_listener() {
    let dir = tempfile::tempdir().unwrap();
    let pool = EventLoopThreadPool::new(3, "worker").unwrap();
    let factory = RecordingFactory::new();
    let mut manager = ListenerManager::with_factory(
        options(TopologyStrategy::PerLoop, dir.path()),
        factory.clone(),
    );

    manager.add_listener(ListenerSpec::new("127.0.0.1", 18080)).unwrap();
    manager.add_listener(ListenerSpec::new("::1", 18081)).unwrap();
    manager
        .create_listeners(&GlobalTls::default(), &pool.loops(), ListenerCallbacks::new())
        .unwrap();

    assert_eq!(manager.state(), LifecycleState::Realized);
    assert_eq!(manager.server_count(), 6);
    assert_eq!(manager.get_listeners().len(), 6);
    assert!(!manager.has_listening_thread());

    let pairs: HashSet<(String, u16)> = manager
        .servers()
        .map(|s| (s.accept_loop().name().to_string(), s.address().port()))
        .collect();
    assert_eq!(pairs.len(), 6);
    assert!(manager.servers().all(|s| s.io_loops().is_empty()));
}

#[test]
fn dedicated_thread_builds_one_instance_per_listener() {
    let dir = tempfile::tempdir().unwrap();
    let pool = EventLoopThreadPool::new(3, "worker").unwrap();
    let factory = RecordingFactory::new();
    let mut manager = ListenerManager::with_factory(
        options(TopologyStrategy::DedicatedThread, dir.path()),
        factory.clone(),
    );

    manager.add_listener(ListenerSpec::new("0.0.0.0", 18082)).unwrap();
    manager.add_listener(ListenerSpec::new("::", 18083)).unwrap();
    manager
        .create_listeners(&GlobalTls::default(), &pool.loops(), ListenerCallbacks::new())
        .unwrap();

    assert_eq!(manager.server_count(), 2);
    assert!(manager.has_listening_thread());

    let listening = manager.listening_loop().unwrap().clone();
    assert_eq!(listening.name(), "listening-loop");
    let workers = pool.loops();
    for server in manager.servers() {
        assert_eq!(server.accept_loop(), &listening);
        assert_eq!(server.io_loops(), workers.as_slice());
    }
}

#[test]
fn no_listeners_means_no_instances_and_no_thread() {
    let dir = tempfile::tempdir().unwrap();
    let pool = EventLoopThreadPool::new(2, "worker").unwrap();

    for strategy in [TopologyStrategy::PerLoop, TopologyStrategy::DedicatedThread] {
        let mut manager =
            ListenerManager::with_factory(options(strategy, dir.path()), RecordingFactory::new());
        manager
            .create_listeners(&GlobalTls::default(), &pool.loops(), ListenerCallbacks::new())
            .unwrap();
        assert_eq!(manager.server_count(), 0);
        assert!(!manager.has_listening_thread());
        assert!(manager.get_listeners().is_empty());
    }
}

#[test]
fn tls_material_is_inherited_from_global_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let pool = EventLoopThreadPool::new(1, "worker").unwrap();
    let mut manager = ListenerManager::with_factory(
        options(TopologyStrategy::DedicatedThread, dir.path()),
        RecordingFactory::new(),
    );
    let global = GlobalTls::new("/etc/tls/global.crt", "/etc/tls/global.key");

    manager
        .add_listener(ListenerSpec::new("127.0.0.1", 18443).with_ssl(true))
        .unwrap();
    manager
        .add_listener(
            ListenerSpec::new("127.0.0.1", 18444)
                .with_ssl(true)
                .with_cert_files("/srv/own.crt", ""),
        )
        .unwrap();
    manager.add_listener(ListenerSpec::new("127.0.0.1", 18080)).unwrap();
    manager
        .create_listeners(&global, &pool.loops(), ListenerCallbacks::new())
        .unwrap();

    let policies: Vec<_> = manager.servers().map(|s| s.tls_policy().cloned()).collect();
    let inherited = policies[0].as_ref().unwrap();
    assert_eq!(inherited.cert_path(), Path::new("/etc/tls/global.crt"));
    assert_eq!(inherited.key_path(), Path::new("/etc/tls/global.key"));

    let overridden = policies[1].as_ref().unwrap();
    assert_eq!(overridden.cert_path(), Path::new("/srv/own.crt"));
    assert_eq!(overridden.key_path(), Path::new("/etc/tls/global.key"));

    assert!(policies[2].is_none());
}

#[test]
fn listener_directives_follow_global_ones() {
    let dir = tempfile::tempdir().unwrap();
    let pool = EventLoopThreadPool::new(1, "worker").unwrap();
    let mut manager = ListenerManager::with_factory(
        options(TopologyStrategy::PerLoop, dir.path()),
        RecordingFactory::new(),
    );
    let global =
        GlobalTls::new("g.crt", "g.key").with_conf_cmds(vec![directive("MinProtocol", "TLSv1.2")]);

    manager
        .add_listener(
            ListenerSpec::new("127.0.0.1", 18445)
                .with_ssl(true)
                .with_old_tls(true)
                .with_conf_cmds(vec![directive("MinProtocol", "TLSv1.3")]),
        )
        .unwrap();
    manager
        .create_listeners(&global, &pool.loops(), ListenerCallbacks::new())
        .unwrap();

    let server = manager.servers().next().unwrap();
    let policy = server.tls_policy().unwrap();
    assert_eq!(
        policy.conf_cmds(),
        &[directive("MinProtocol", "TLSv1.2"), directive("MinProtocol", "TLSv1.3")]
    );
    assert!(policy.use_old_tls());
}

#[test]
fn unparseable_address_aborts_construction() {
    let dir = tempfile::tempdir().unwrap();
    let pool = EventLoopThreadPool::new(2, "worker").unwrap();
    let factory = RecordingFactory::new();
    let mut manager = ListenerManager::with_factory(
        options(TopologyStrategy::PerLoop, dir.path()),
        factory.clone(),
    );

    manager.add_listener(ListenerSpec::new("127.0.0.1", 18090)).unwrap();
    manager.add_listener(ListenerSpec::new("not-an-ip", 18091)).unwrap();
    let err = manager
        .create_listeners(&GlobalTls::default(), &pool.loops(), ListenerCallbacks::new())
        .unwrap_err();

    assert!(matches!(err, ListenerError::InvalidAddress(ref a) if a == "not-an-ip"));
    assert_eq!(manager.server_count(), 0);
    assert!(manager.get_listeners().is_empty());
    assert_eq!(manager.state(), LifecycleState::Stopped);
    assert_eq!(factory.counters.starts(), 0);
}

#[test]
fn tls_without_material_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let pool = EventLoopThreadPool::new(1, "worker").unwrap();
    let mut manager = ListenerManager::with_factory(
        options(TopologyStrategy::DedicatedThread, dir.path()),
        RecordingFactory::new(),
    );

    manager
        .add_listener(ListenerSpec::new("0.0.0.0", 18446).with_ssl(true))
        .unwrap();
    let err = manager
        .create_listeners(&GlobalTls::default(), &pool.loops(), ListenerCallbacks::new())
        .unwrap_err();

    assert!(matches!(err, ListenerError::MissingTlsMaterial(_)));
    assert_eq!(manager.servers().filter(|s| s.tls_enabled()).count(), 0);
    assert!(!manager.has_listening_thread());
}

#[test]
fn tls_incapable_build_serves_plain() {
    let dir = tempfile::tempdir().unwrap();
    let pool = EventLoopThreadPool::new(2, "worker").unwrap();
    let options = TopologyOptions {
        capabilities: Capabilities {
            reuse_port: true,
            tls: false,
        },
        ..options(TopologyStrategy::PerLoop, dir.path())
    };
    let mut manager = ListenerManager::with_factory(options, RecordingFactory::new());

    manager
        .add_listener(ListenerSpec::new("0.0.0.0", 18447).with_ssl(true))
        .unwrap();
    manager
        .create_listeners(&GlobalTls::default(), &pool.loops(), ListenerCallbacks::new())
        .unwrap();

    assert_eq!(manager.server_count(), 2);
    assert!(manager.servers().all(|s| !s.tls_enabled()));
}

#[test]
fn bind_probe_detects_an_occupied_port() {
    let dir = tempfile::tempdir().unwrap();
    let pool = EventLoopThreadPool::new(2, "worker").unwrap();
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let options = TopologyOptions {
        share_port: false,
        ..options(TopologyStrategy::PerLoop, dir.path())
    };
    let factory = RecordingFactory::new();
    let mut manager = ListenerManager::with_factory(options, factory.clone());
    manager.add_listener(ListenerSpec::new("127.0.0.1", port)).unwrap();

    let err = manager
        .create_listeners(&GlobalTls::default(), &pool.loops(), ListenerCallbacks::new())
        .unwrap_err();
    assert!(matches!(err, ListenerError::AddressInUse { address, .. } if address.port() == port));
    assert_eq!(factory.counters.created(), 0);
    assert!(dir.path().join("listener-topology.lock").exists());
}

#[test]
fn bind_probe_passes_on_a_free_port() {
    let dir = tempfile::tempdir().unwrap();
    let pool = EventLoopThreadPool::new(2, "worker").unwrap();
    let options = TopologyOptions {
        share_port: false,
        ..options(TopologyStrategy::PerLoop, dir.path())
    };
    let mut manager = ListenerManager::with_factory(options, RecordingFactory::new());
    manager
        .add_listener(ListenerSpec::new("127.0.0.1", common::free_port()))
        .unwrap();

    manager
        .create_listeners(&GlobalTls::default(), &pool.loops(), ListenerCallbacks::new())
        .unwrap();
    assert_eq!(manager.server_count(), 2);
}

#[test]
fn declarations_are_frozen_after_construction() {
    let dir = tempfile::tempdir().unwrap();
    let pool = EventLoopThreadPool::new(1, "worker").unwrap();
    let mut manager = ListenerManager::with_factory(
        options(TopologyStrategy::PerLoop, dir.path()),
        RecordingFactory::new(),
    );

    manager
        .create_listeners(&GlobalTls::default(), &pool.loops(), ListenerCallbacks::new())
        .unwrap();
    let err = manager
        .add_listener(ListenerSpec::new("127.0.0.1", 18092))
        .unwrap_err();
    assert!(matches!(err, ListenerError::Frozen(_)));

    let err = manager
        .create_listeners(&GlobalTls::default(), &pool.loops(), ListenerCallbacks::new())
        .unwrap_err();
    assert!(matches!(err, ListenerError::InvalidState(_)));
}

#[test]
fn lifecycle_is_single_shot() {
    let dir = tempfile::tempdir().unwrap();
    let pool = EventLoopThreadPool::new(2, "worker").unwrap();
    let factory = RecordingFactory::new();
    let mut manager = ListenerManager::with_factory(
        options(TopologyStrategy::PerLoop, dir.path()),
        factory.clone(),
    );
    manager.add_listener(ListenerSpec::new("127.0.0.1", 18093)).unwrap();

    assert!(matches!(
        manager.start_listening(),
        Err(ListenerError::InvalidState(_))
    ));

    manager
        .create_listeners(&GlobalTls::default(), &pool.loops(), ListenerCallbacks::new())
        .unwrap();
    manager.start_listening().unwrap();
    assert_eq!(manager.state(), LifecycleState::Listening);
    assert_eq!(factory.counters.starts(), 2);

    manager.stop_listening();
    manager.stop_listening();
    assert_eq!(manager.state(), LifecycleState::Stopped);
    assert_eq!(factory.counters.stops(), 2);

    assert!(matches!(
        manager.start_listening(),
        Err(ListenerError::InvalidState(_))
    ));
    assert_eq!(factory.counters.starts(), 2);
}

#[test]
fn dropping_a_listening_manager_stops_it() {
    let dir = tempfile::tempdir().unwrap();
    let pool = EventLoopThreadPool::new(1, "worker").unwrap();
    let factory = RecordingFactory::new();
    let mut manager = ListenerManager::with_factory(
        options(TopologyStrategy::DedicatedThread, dir.path()),
        factory.clone(),
    );
    manager.add_listener(ListenerSpec::new("127.0.0.1", 18094)).unwrap();
    manager
        .create_listeners(&GlobalTls::default(), &pool.loops(), ListenerCallbacks::new())
        .unwrap();
    manager.start_listening().unwrap();

    drop(manager);
    assert_eq!(factory.counters.stops(), 1);
}

#[test]
fn reload_isolates_failures_and_skips_plain_listeners() {
    let dir = tempfile::tempdir().unwrap();
    let pool = EventLoopThreadPool::new(1, "worker").unwrap();
    let factory = RecordingFactory::failing_reload_for("/srv/broken.crt");
    let mut manager = ListenerManager::with_factory(
        options(TopologyStrategy::PerLoop, dir.path()),
        factory.clone(),
    );
    let global = GlobalTls::new("/srv/good.crt", "/srv/good.key");

    manager
        .add_listener(ListenerSpec::new("127.0.0.1", 18448).with_ssl(true))
        .unwrap();
    manager
        .add_listener(
            ListenerSpec::new("127.0.0.1", 18449)
                .with_ssl(true)
                .with_cert_files("/srv/broken.crt", ""),
        )
        .unwrap();
    manager.add_listener(ListenerSpec::new("127.0.0.1", 18095)).unwrap();
    manager
        .create_listeners(&global, &pool.loops(), ListenerCallbacks::new())
        .unwrap();
    manager.start_listening().unwrap();

    let report = manager.reload_ssl_files();
    assert!(!report.is_success());
    assert_eq!(report.reloaded.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(factory.counters.reloads(), 2);
}

#[test]
fn instances_stop_while_the_listening_loop_still_runs() {
    let dir = tempfile::tempdir().unwrap();
    let pool = EventLoopThreadPool::new(2, "worker").unwrap();
    let factory = RecordingFactory::new();
    let mut manager = ListenerManager::with_factory(
        options(TopologyStrategy::DedicatedThread, dir.path()),
        factory.clone(),
    );
    manager.add_listener(ListenerSpec::new("127.0.0.1", 18096)).unwrap();
    manager.add_listener(ListenerSpec::new("::1", 18097)).unwrap();
    manager
        .create_listeners(&GlobalTls::default(), &pool.loops(), ListenerCallbacks::new())
        .unwrap();
    manager.start_listening().unwrap();

    manager.stop_listening();

    assert_eq!(factory.counters.stops(), 2);
    assert_eq!(factory.counters.stops_on_live_loop(), 2);
    assert!(!manager.has_listening_thread());
}

#[test]
fn drop_stops_instances_before_the_listening_loop_quits() {
    let dir = tempfile::tempdir().unwrap();
    let pool = EventLoopThreadPool::new(1, "worker").unwrap();
    let factory = RecordingFactory::new();
    let mut manager = ListenerManager::with_factory(
        options(TopologyStrategy::DedicatedThread, dir.path()),
        factory.clone(),
    );
    manager.add_listener(ListenerSpec::new("127.0.0.1", 18098)).unwrap();
    manager
        .create_listeners(&GlobalTls::default(), &pool.loops(), ListenerCallbacks::new())
        .unwrap();

    drop(manager);
    assert_eq!(factory.counters.stops_on_live_loop(), 1);
}

#[test]
fn failed_start_stops_every_instance() {
    let dir = tempfile::tempdir().unwrap();
    let pool = EventLoopThreadPool::new(1, "worker").unwrap();
    let factory = RecordingFactory::failing_start_on(18100);
    let mut manager = ListenerManager::with_factory(
        options(TopologyStrategy::PerLoop, dir.path()),
        factory.clone(),
    );
    for port in [18099, 18100, 18101] {
        manager.add_listener(ListenerSpec::new("127.0.0.1", port)).unwrap();
    }
    manager
        .create_listeners(&GlobalTls::default(), &pool.loops(), ListenerCallbacks::new())
        .unwrap();

    let err = manager.start_listening().unwrap_err();
    assert!(matches!(err, ListenerError::Server(_)));
    assert_eq!(manager.state(), LifecycleState::Stopped);
    assert_eq!(factory.counters.starts(), 2);
    assert_eq!(factory.counters.stops(), 3);

    manager.stop_listening();
    assert_eq!(factory.counters.stops(), 3);
}
