use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket as StdUdpSocket},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use peer_node::config::{Bind, Config, Log, Registry, Stun, Timing};
use peer_node::error::Error;
use peer_node::runtime::PeerRuntime;
use registry::store::Store;

/// Runs a real `peer-registry` HTTP server on an ephemeral loopback port,
/// backed by a scratch JSON file, and returns its base URL. The server
/// task is detached; it lives for the test process's lifetime, same as
/// the teacher's own `crates/service/tests/turn.rs` fixtures do.
async fn spawn_registry() -> String {
    let path = std::env::temp_dir().join(format!("peer-node-test-registry-{}.json", unique()));
    let store = Arc::new(Store::open(&path).expect("open scratch store"));
    let app = registry::controller::router(store);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind registry listener");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    format!("http://{addr}")
}

/// A STUN stand-in that replies to every Binding request with the
/// `reply_port`-th entry of `ports` (clamped to the last entry), reporting
/// a fixed loopback address instead of the request's real source — used to
/// simulate a NAT remap between keep-alive ticks without actually moving
/// the client's own socket.
fn spawn_scripted_stun_server(ports: Vec<u16>) -> u16 {
    let server = StdUdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = server.local_addr().unwrap().port();
    let calls = Arc::new(AtomicUsize::new(0));

    std::thread::spawn(move || loop {
        let mut buf = [0u8; 512];
        let Ok((_size, from)) = server.recv_from(&mut buf) else { return };
        let txid: [u8; 12] = buf[8..20].try_into().unwrap();
        let call = calls.fetch_add(1, Ordering::Relaxed).min(ports.len() - 1);
        let mapped = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), ports[call]);
        let response = stun::encode_binding_response(&txid, mapped);
        let _ = server.send_to(&response, from);
    });

    port
}

/// A STUN stand-in that reports the request's real source address, the
/// common case used by every scenario except the port-migration one.
fn spawn_reflecting_stun_server() -> u16 {
    let server = StdUdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = server.local_addr().unwrap().port();

    std::thread::spawn(move || loop {
        let mut buf = [0u8; 512];
        let Ok((_size, from)) = server.recv_from(&mut buf) else { return };
        let txid: [u8; 12] = buf[8..20].try_into().unwrap();
        let response = stun::encode_binding_response(&txid, from);
        let _ = server.send_to(&response, from);
    });

    port
}

fn unique() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as u64
        ^ COUNTER.fetch_add(1, Ordering::Relaxed)
}

fn test_config(base_url: String, stun_port: u16) -> Config {
    Config {
        registry: Registry { base_url },
        stun: Stun { host: "127.0.0.1".to_string(), port: stun_port },
        bind: Bind { local_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED), local_port: 0 },
        timing: Timing {
            keep_alive_interval_secs: 30,
            connect_timeout_secs: 5,
            punch_attempts: 10,
            punch_spacing_secs: 1,
        },
        log: Log::default(),
    }
}

#[tokio::test]
async fn solo_join_then_leave_registers_and_deregisters() {
    let base_url = spawn_registry().await;
    let stun_port = spawn_reflecting_stun_server();
    let runtime = PeerRuntime::new(&test_config(base_url.clone(), stun_port));

    runtime.join_network().await.expect("join should succeed");

    let client = reqwest::Client::new();
    let listed: Vec<serde_json::Value> = client
        .get(format!("{base_url}/nodes"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1, "registry should hold exactly one entry after join");

    runtime.leave_network().await.expect("leave should succeed");

    let listed: Vec<serde_json::Value> = client
        .get(format!("{base_url}/nodes"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed.is_empty(), "registry should be empty after leave");
}

#[tokio::test]
async fn two_peers_rendezvous_over_loopback() {
    let base_url = spawn_registry().await;
    let stun_port = spawn_reflecting_stun_server();

    let a = PeerRuntime::new(&test_config(base_url.clone(), stun_port));
    let b = PeerRuntime::new(&test_config(base_url.clone(), stun_port));

    a.join_network().await.expect("a joins");
    b.join_network().await.expect("b joins");

    let client = reqwest::Client::new();
    let entries: Vec<serde_json::Value> = client
        .get(format!("{base_url}/nodes"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);

    let ports: Vec<u16> = entries
        .iter()
        .map(|e| e["public_port"].as_u64().unwrap() as u16)
        .collect();

    let a_target: SocketAddr = format!("127.0.0.1:{}", ports[1]).parse().unwrap();
    let b_target: SocketAddr = format!("127.0.0.1:{}", ports[0]).parse().unwrap();

    let (a_result, b_result) = tokio::join!(a.connect_to(a_target), b.connect_to(b_target));
    assert!(a_result.is_ok(), "a's rendezvous should complete: {a_result:?}");
    assert!(b_result.is_ok(), "b's rendezvous should complete: {b_result:?}");

    a.leave_network().await.ok();
    b.leave_network().await.ok();
}

#[tokio::test]
async fn connect_to_a_silent_peer_times_out() {
    let base_url = spawn_registry().await;
    let stun_port = spawn_reflecting_stun_server();

    let mut config = test_config(base_url, stun_port);
    config.timing.connect_timeout_secs = 2;
    config.timing.punch_attempts = 3;
    config.timing.punch_spacing_secs = 1;
    let runtime = PeerRuntime::new(&config);
    runtime.join_network().await.expect("join should succeed");

    // A bound socket that never answers punches.
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let silent_addr = silent.local_addr().unwrap();

    let started = std::time::Instant::now();
    let result = runtime.connect_to(silent_addr).await;
    assert!(matches!(result, Err(Error::Timeout)));
    assert!(started.elapsed() < Duration::from_secs(10), "timeout should honor connect_timeout_secs");

    runtime.leave_network().await.ok();
}

#[tokio::test]
async fn keepalive_tick_migrates_port_and_updates_the_registry() {
    let base_url = spawn_registry().await;
    // First probe reports port 41000, every later probe reports 41001 —
    // simulating a mid-session NAT remap.
    let stun_port = spawn_scripted_stun_server(vec![41000, 41001]);

    let mut config = test_config(base_url.clone(), stun_port);
    config.timing.keep_alive_interval_secs = 1;
    let runtime = PeerRuntime::new(&config);
    runtime.join_network().await.expect("join should succeed");

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let client = reqwest::Client::new();
    let entries: Vec<serde_json::Value> = client
        .get(format!("{base_url}/nodes"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(entries.len(), 1, "the remapped entry replaces the old one, not adds to it");
    assert_eq!(entries[0]["public_port"].as_u64().unwrap(), 41001);

    runtime.leave_network().await.ok();
}

#[tokio::test]
async fn bind_failure_rolls_back_the_registry_insert() {
    let base_url = spawn_registry().await;
    let stun_port = spawn_reflecting_stun_server();

    // Hold a fixed port without SO_REUSEPORT so the endpoint's own bind,
    // which happens after the STUN probe and the registry insert, fails.
    let held = StdUdpSocket::bind("127.0.0.1:0").unwrap();
    let held_port = held.local_addr().unwrap().port();

    let mut config = test_config(base_url.clone(), stun_port);
    config.bind.local_ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.bind.local_port = held_port;
    let runtime = PeerRuntime::new(&config);

    let result = runtime.join_network().await;
    assert!(matches!(result, Err(Error::BindFailed(_))), "got {result:?}");

    let client = reqwest::Client::new();
    let entries: Vec<serde_json::Value> = client
        .get(format!("{base_url}/nodes"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(entries.is_empty(), "the registry insert must be rolled back on bind failure");

    drop(held);
}

#[tokio::test]
async fn an_oversized_hostile_datagram_does_not_wedge_the_endpoint() {
    let base_url = spawn_registry().await;
    let stun_port = spawn_reflecting_stun_server();

    let victim = PeerRuntime::new(&test_config(base_url.clone(), stun_port));
    victim.join_network().await.expect("victim joins");

    let client = reqwest::Client::new();
    let entries: Vec<serde_json::Value> = client
        .get(format!("{base_url}/nodes"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let victim_port = entries[0]["public_port"].as_u64().unwrap() as u16;
    let victim_addr: SocketAddr = format!("127.0.0.1:{victim_port}").parse().unwrap();

    let attacker = StdUdpSocket::bind("127.0.0.1:0").unwrap();
    attacker.send_to(&vec![0xffu8; 4000], victim_addr).unwrap();
    // Give the receive loop a moment to drain the garbage datagram.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let friend = PeerRuntime::new(&test_config(base_url, stun_port));
    friend.join_network().await.expect("friend joins");
    let result = friend.connect_to(victim_addr).await;
    assert!(result.is_ok(), "rendezvous after a hostile datagram should still complete: {result:?}");

    victim.leave_network().await.ok();
    friend.leave_network().await.ok();
}
