use std::{
    io::Write,
    net::{IpAddr, Ipv4Addr, TcpStream},
    sync::Arc,
    time::Duration,
};

use inflow_net::{FramingPolicy, ListenerSpec, PermittedPeerList, PlainDriver, ServerParams, TcpServer};
use inflow_ruleset::Registry;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn lf_delimited_connection_dispatches_two_messages_to_bound_ruleset() {
    let registry = Arc::new(Registry::new(64));
    let rs = registry.construct("R1");
    registry.construct_finalize(rs.clone()).unwrap();
    let queue = registry.ruleset_queue(&rs);

    let driver = Arc::new(PlainDriver::new(PermittedPeerList::new()));
    let mut server =
        TcpServer::construct(driver, ServerParams::default(), registry.clone()).expect("construct server");
    let port = free_port();
    server
        .configure_listen(ListenerSpec {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            ruleset: Some(inflow_ruleset::RulesetRef::new(&rs)),
            input_name: "test".to_string(),
            framing_policy: FramingPolicy { octet_framing_supported: false, ..Default::default() },
        })
        .unwrap();
    server.construct_finalize().unwrap();
    let handle = server.run();

    let mut client = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).expect("connect");
    client.write_all(b"<14>msgA\n<14>msgB\n").unwrap();
    client.flush().unwrap();

    let first = queue.dequeue_timeout(Duration::from_secs(2)).expect("first message");
    let second = queue.dequeue_timeout(Duration::from_secs(2)).expect("second message");
    assert_eq!(first.payload, b"<14>msgA".to_vec());
    assert_eq!(second.payload, b"<14>msgB".to_vec());

    drop(client);
    handle.shutdown(Duration::from_secs(2));
}

#[test]
fn peer_not_in_permitted_list_is_rejected_without_a_session() {
    let registry = Arc::new(Registry::new(64));
    let rs = registry.construct("R1");
    registry.construct_finalize(rs).unwrap();

    let mut peers = PermittedPeerList::new();
    peers.add("10.0.0.9");
    let driver = Arc::new(PlainDriver::new(peers));
    let mut server = TcpServer::construct(driver, ServerParams::default(), registry).expect("construct server");
    let port = free_port();
    server
        .configure_listen(ListenerSpec {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            ruleset: None,
            input_name: "test".to_string(),
            framing_policy: FramingPolicy::default(),
        })
        .unwrap();
    server.construct_finalize().unwrap();
    let handle = server.run();

    let mut client = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).expect("connect");
    let _ = client.write_all(b"should be rejected\n");
    std::thread::sleep(Duration::from_millis(300));

    assert_eq!(handle.rejected_peers(), 1);
    handle.shutdown(Duration::from_secs(2));
}
