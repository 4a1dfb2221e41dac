use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_host_ping::{
    HostResolver, IcmpTransport, PingConfiguration, PingError, Pinger, ResolvedAddress,
};

// Raw sockets need privileges the test runner may not have
fn lacks_raw_socket(result: &Result<Duration, PingError>) -> bool {
    match result {
        Err(error @ PingError::SocketOpen { .. }) => {
            eprintln!("skipping: {}", error);
            true
        }
        _ => false,
    }
}

fn configuration(timeout: Duration) -> PingConfiguration {
    PingConfiguration {
        resolution_timeout: Duration::from_secs(2),
        ..PingConfiguration::default()
    }
    .with_timeout(timeout)
}

#[tokio::test(flavor = "multi_thread")]
async fn loopback_replies() {
    let pinger = Pinger::new(configuration(Duration::from_secs(1)));
    let result = pinger.ping("127.0.0.1").await;
    if lacks_raw_socket(&result) {
        return;
    }
    let latency = result.unwrap();
    assert!(latency <= Duration::from_millis(50), "{:?}", latency);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_host_times_out() {
    let timeout = Duration::from_millis(300);
    let pinger = Pinger::new(configuration(timeout));
    let result = pinger.ping("192.0.2.1").await;
    if lacks_raw_socket(&result) {
        return;
    }
    match result {
        Err(PingError::Timeout { elapsed }) => {
            assert!(elapsed >= timeout, "{:?}", elapsed);
            assert!(elapsed < timeout + Duration::from_millis(500), "{:?}", elapsed);
        }
        // Hosts without a default route refuse to send at all
        Err(PingError::Send { .. }) => (),
        // Some networks route the documentation range to a live gateway
        Ok(latency) => eprintln!("skipping: 192.0.2.1 answered after {:?}", latency),
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn unresolvable_host_never_reports_resolution() {
    let pinger = Pinger::new(configuration(Duration::from_secs(1)));
    let events = Arc::new(Mutex::new(vec![]));
    let resolved = events.clone();
    let reported = events.clone();

    pinger
        .ping_with_handlers(
            "this-host-does-not-exist.invalid",
            move |_| resolved.lock().unwrap().push(None),
            move |success, elapsed| reported.lock().unwrap().push(Some((success, elapsed))),
        )
        .await
        .unwrap();

    assert_eq!(*events.lock().unwrap(), vec![Some((false, 0.0))]);
}

#[tokio::test(flavor = "multi_thread")]
async fn resolution_reported_before_result() {
    let pinger = Pinger::new(configuration(Duration::from_millis(500)));
    let events = Arc::new(Mutex::new(vec![]));
    let resolved = events.clone();
    let reported = events.clone();

    pinger
        .ping_with_handlers(
            "127.0.0.1",
            move |raw| {
                resolved
                    .lock()
                    .unwrap()
                    .push(HostResolver::host_ip(&raw).unwrap())
            },
            move |_, _| reported.lock().unwrap().push("result".to_string()),
        )
        .await
        .unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec!["127.0.0.1".to_string(), "result".to_string()]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_loopback_pings() {
    let pinger = Pinger::new(configuration(Duration::from_secs(1)));
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pinger = pinger.clone();
            tokio::spawn(async move { pinger.ping("127.0.0.1").await })
        })
        .collect();
    for handle in handles {
        let result = handle.await.unwrap();
        if lacks_raw_socket(&result) {
            return;
        }
        assert!(result.is_ok(), "{:?}", result);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn transports_to_same_target_get_own_replies() {
    // Both raw sockets see both replies and must each keep only their own
    let target = ResolvedAddress::new("127.0.0.1".parse().unwrap());
    let conf = PingConfiguration::default();
    let (mut first, mut second) = match (
        IcmpTransport::connect(&target, &conf),
        IcmpTransport::connect(&target, &conf),
    ) {
        (Ok(first), Ok(second)) => (first, second),
        (Err(error), _) | (_, Err(error)) => {
            eprintln!("skipping: {}", error);
            return;
        }
    };
    assert_ne!(first.identifier(), second.identifier());

    let first_packet = first.echo_packet().unwrap();
    let second_packet = second.echo_packet().unwrap();
    // Same sequence number on both, only the identifier tells the replies apart
    assert_eq!(first_packet.sequence, second_packet.sequence);
    let first_ping = first.send(first_packet);
    let second_ping = second.send(second_packet);
    assert_eq!(first_ping.identifier(), first.identifier());
    assert_eq!(second_ping.identifier(), second.identifier());

    let (first_result, second_result) = tokio::join!(first_ping, second_ping);
    assert!(first_result.is_ok(), "{:?}", first_result);
    assert!(second_result.is_ok(), "{:?}", second_result);
    first.stop();
    second.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_is_idempotent() {
    let target = ResolvedAddress::new("127.0.0.1".parse().unwrap());
    let mut transport = match IcmpTransport::connect(&target, &PingConfiguration::default()) {
        Ok(transport) => transport,
        Err(error) => {
            eprintln!("skipping: {}", error);
            return;
        }
    };
    let packet = transport.echo_packet().unwrap();
    let _ = transport.send(packet).await;
    transport.stop();
    transport.stop();
    assert!(transport.is_stopped());

    let calls = Arc::new(Mutex::new(vec![]));
    let recorded = calls.clone();
    let packet = transport.echo_packet().unwrap();
    transport.send_with(packet, move |success, elapsed| {
        recorded.lock().unwrap().push((success, elapsed))
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    transport.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*calls.lock().unwrap(), vec![(false, 0.0)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_ends_outstanding_wait() {
    let target = ResolvedAddress::new("192.0.2.1".parse().unwrap());
    let conf = PingConfiguration::default().with_timeout(Duration::from_secs(10));
    let mut transport = match IcmpTransport::connect(&target, &conf) {
        Ok(transport) => transport,
        Err(error) => {
            eprintln!("skipping: {}", error);
            return;
        }
    };
    let packet = transport.echo_packet().unwrap();
    let ping = transport.send(packet);
    tokio::time::sleep(Duration::from_millis(50)).await;
    transport.stop();

    let result = tokio::time::timeout(Duration::from_secs(1), ping)
        .await
        .expect("stop did not end the wait");
    match result {
        Err(PingError::Cancelled { elapsed }) => assert!(elapsed < Duration::from_secs(1)),
        Err(PingError::Send { .. }) => (),
        Ok(latency) => eprintln!("skipping: 192.0.2.1 answered after {:?}", latency),
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn sequence_numbers_increase() {
    let target = ResolvedAddress::new("127.0.0.1".parse().unwrap());
    let mut transport = match IcmpTransport::connect(&target, &PingConfiguration::default()) {
        Ok(transport) => transport,
        Err(error) => {
            eprintln!("skipping: {}", error);
            return;
        }
    };
    let first = transport.echo_packet().unwrap();
    let second = transport.echo_packet().unwrap();
    assert_eq!(first.identifier, transport.identifier());
    assert_eq!(second.identifier, first.identifier);
    assert_eq!(second.sequence, first.sequence.wrapping_add(1));
    transport.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn shared_pinger_handler() {
    let (tx, rx) = tokio::sync::oneshot::channel();
    let _ = tokio_host_ping::ping("this-host-does-not-exist.invalid", move |success, elapsed| {
        let _ = tx.send((success, elapsed));
    });
    let (success, elapsed) = tokio::time::timeout(Duration::from_secs(15), rx)
        .await
        .unwrap()
        .unwrap();
    assert!(!success);
    assert_eq!(elapsed, 0.0);
}
