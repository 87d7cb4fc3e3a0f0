//! Integration tests for the tank server and client over real sockets
//!
//! These tests start an in-process server on an ephemeral port and talk to
//! it either through raw framed TCP peers or through the client library.

use client::network::Client;
use server::console::OperatorCommand;
use server::network::{Server, ServerHandle};
use shared::{read_packet, write_packet, Packet, PeerId, TankInfo, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(2);

async fn start_server(max_clients: usize) -> (SocketAddr, ServerHandle, JoinHandle<()>) {
    let server = Server::bind("127.0.0.1:0", max_clients).await.unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.handle();
    let task = tokio::spawn(server.run());
    (addr, handle, task)
}

/// A framed TCP peer that speaks the wire protocol directly.
struct RawPeer {
    id: PeerId,
    tank: TankInfo,
    stream: TcpStream,
}

impl RawPeer {
    async fn connect(addr: SocketAddr) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_packet(
            &mut stream,
            &Packet::Connect {
                protocol_version: PROTOCOL_VERSION,
            },
        )
        .await
        .unwrap();

        match timeout(WAIT, read_packet(&mut stream)).await {
            Ok(Ok(Some(Packet::Connected { client_id, tank }))) => RawPeer {
                id: client_id,
                tank,
                stream,
            },
            other => panic!("handshake failed: {:?}", other),
        }
    }

    async fn send(&mut self, packet: Packet) {
        write_packet(&mut self.stream, &packet).await.unwrap();
    }

    async fn next(&mut self) -> Packet {
        timeout(WAIT, read_packet(&mut self.stream))
            .await
            .expect("timed out waiting for packet")
            .unwrap()
            .expect("connection closed")
    }

    /// Next packet that is about tank state, skipping relay group traffic.
    async fn next_tank_packet(&mut self) -> Packet {
        loop {
            match self.next().await {
                Packet::GroupFormed { .. }
                | Packet::GroupDisbanded { .. }
                | Packet::RelayMessage { .. } => continue,
                packet => return packet,
            }
        }
    }

    async fn drain(&mut self) {
        while let Ok(Ok(Some(_))) =
            timeout(Duration::from_millis(100), read_packet(&mut self.stream)).await
        {}
    }

    async fn assert_silent(&mut self) {
        let result = timeout(Duration::from_millis(200), read_packet(&mut self.stream)).await;
        assert!(result.is_err(), "unexpected packet: {:?}", result);
    }
}

/// LIFECYCLE TESTS
mod lifecycle_tests {
    use super::*;

    /// A late joiner learns about existing tanks, join before health
    #[tokio::test]
    async fn late_join_catch_up_order() {
        let (addr, handle, task) = start_server(8).await;

        let mut a = RawPeer::connect(addr).await;
        let mut b = RawPeer::connect(addr).await;

        assert_eq!(
            b.next_tank_packet().await,
            Packet::PlayerJoined {
                tank_id: a.id,
                x: a.tank.x,
                y: a.tank.y,
                tank_type: -1,
            }
        );
        assert_eq!(
            b.next_tank_packet().await,
            Packet::HealthUpdated {
                tank_id: a.id,
                current: 100.0,
                max: 100.0,
            }
        );

        assert_eq!(
            a.next_tank_packet().await,
            Packet::PlayerJoined {
                tank_id: b.id,
                x: b.tank.x,
                y: b.tank.y,
                tank_type: -1,
            }
        );
        assert!(matches!(
            a.next_tank_packet().await,
            Packet::HealthUpdated { tank_id, .. } if tank_id == b.id
        ));

        handle.shutdown();
        task.await.unwrap();
    }

    /// Both peers are told about the relay group when the second one joins
    #[tokio::test]
    async fn second_peer_forms_relay_group() {
        let (addr, handle, task) = start_server(8).await;

        let mut a = RawPeer::connect(addr).await;
        let mut b = RawPeer::connect(addr).await;

        for peer in [&mut a, &mut b] {
            let group_id = loop {
                if let Packet::GroupFormed { group_id, members } = peer.next().await {
                    assert_eq!(members, vec![1, 2]);
                    break group_id;
                }
            };
            assert_eq!(
                peer.next().await,
                Packet::RelayMessage {
                    text: format!("P2P_GROUP_INFO:{}", group_id)
                }
            );
        }

        handle.shutdown();
        task.await.unwrap();
    }

    /// Leaving tells the remaining peers and breaks up the group
    #[tokio::test]
    async fn disconnect_notifies_remaining_peer() {
        let (addr, handle, task) = start_server(8).await;

        let mut a = RawPeer::connect(addr).await;
        let mut b = RawPeer::connect(addr).await;
        a.drain().await;
        let b_id = b.id;

        b.send(Packet::Disconnect).await;
        drop(b);

        assert_eq!(a.next().await, Packet::PlayerLeft { tank_id: b_id });
        assert!(matches!(a.next().await, Packet::GroupDisbanded { .. }));

        let status = handle.execute(OperatorCommand::Status).await.unwrap();
        assert!(status.contains("Total: 1 clients"));

        handle.shutdown();
        task.await.unwrap();
    }

    /// Dropping the socket without a goodbye is handled the same way
    #[tokio::test]
    async fn abrupt_close_is_a_disconnect() {
        let (addr, handle, task) = start_server(8).await;

        let mut a = RawPeer::connect(addr).await;
        let b = RawPeer::connect(addr).await;
        a.drain().await;
        let b_id = b.id;
        drop(b);

        assert_eq!(a.next().await, Packet::PlayerLeft { tank_id: b_id });

        handle.shutdown();
        task.await.unwrap();
    }
}

/// ROUTING TESTS
mod routing_tests {
    use super::*;

    async fn three_peers(addr: SocketAddr) -> (RawPeer, RawPeer, RawPeer) {
        let mut a = RawPeer::connect(addr).await;
        let mut b = RawPeer::connect(addr).await;
        let mut c = RawPeer::connect(addr).await;
        a.drain().await;
        b.drain().await;
        c.drain().await;
        (a, b, c)
    }

    /// A move reaches every other peer and never echoes to the sender
    #[tokio::test]
    async fn move_excludes_sender() {
        let (addr, handle, task) = start_server(8).await;
        let (mut a, mut b, mut c) = three_peers(addr).await;

        a.send(Packet::Move {
            x: 10.0,
            y: 20.0,
            direction: 90.0,
        })
        .await;

        let expected = Packet::PositionUpdated {
            tank_id: a.id,
            x: 10.0,
            y: 20.0,
            direction: 90.0,
        };
        assert_eq!(b.next().await, expected);
        assert_eq!(c.next().await, expected);
        a.assert_silent().await;

        handle.shutdown();
        task.await.unwrap();
    }

    /// Operator damage reaches everyone including the target, and a later
    /// joiner sees the destruction during catch-up
    #[tokio::test]
    async fn operator_damage_and_destroyed_catch_up() {
        let (addr, handle, task) = start_server(8).await;
        let (mut a, mut b, _c) = three_peers(addr).await;

        let report = handle
            .execute(OperatorCommand::Damage {
                id: b.id,
                amount: 150.0,
            })
            .await
            .unwrap();
        assert!(report.contains("destroyed"));

        let target = b.id;
        for peer in [&mut a, &mut b] {
            assert_eq!(
                peer.next().await,
                Packet::HealthUpdated {
                    tank_id: target,
                    current: 0.0,
                    max: 100.0,
                }
            );
            assert_eq!(
                peer.next().await,
                Packet::TankDestroyed {
                    tank_id: target,
                    destroyer_id: 0,
                }
            );
        }

        let mut d = RawPeer::connect(addr).await;
        let mut catch_up = Vec::new();
        for _ in 0..7 {
            catch_up.push(d.next_tank_packet().await);
        }
        let destroyed_at = catch_up
            .iter()
            .position(|p| {
                *p == Packet::TankDestroyed {
                    tank_id: target,
                    destroyer_id: 0,
                }
            })
            .expect("destroyed tank replayed");
        assert_eq!(
            catch_up[destroyed_at - 1],
            Packet::HealthUpdated {
                tank_id: target,
                current: 0.0,
                max: 100.0,
            }
        );

        handle.shutdown();
        task.await.unwrap();
    }

    /// Relay text is tagged with the sender and skips the sender
    #[tokio::test]
    async fn relay_through_server() {
        let (addr, handle, task) = start_server(8).await;
        let (mut a, mut b, mut c) = three_peers(addr).await;

        b.send(Packet::RelayMessage {
            text: "hello".to_string(),
        })
        .await;

        let expected = Packet::RelayMessage {
            text: format!("RELAY_FROM_{}:hello", b.id),
        };
        assert_eq!(a.next().await, expected);
        assert_eq!(c.next().await, expected);
        b.assert_silent().await;

        handle.shutdown();
        task.await.unwrap();
    }
}

/// CLIENT LIBRARY TESTS
mod client_tests {
    use super::*;

    async fn wait_until<F>(mut check: F)
    where
        F: FnMut() -> bool,
    {
        for _ in 0..100 {
            if check() {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached in time");
    }

    /// Moves and messages show up in the other client's mirror
    #[tokio::test]
    async fn mirrors_follow_each_other() {
        let (addr, handle, task) = start_server(8).await;
        let address = addr.to_string();

        let mut first = Client::connect(&address).await.unwrap();
        let mut second = Client::connect(&address).await.unwrap();
        first.start_polling();
        second.start_polling();

        let first_handle = first.handle();
        let first_mirror = first_handle.mirror();
        let second_mirror = second.handle().mirror();

        wait_until(|| {
            second_mirror
                .try_lock()
                .map_or(false, |m| m.other(1).is_some() && m.group_id().is_some())
        })
        .await;
        wait_until(|| first_mirror.try_lock().map_or(false, |m| m.group_id().is_some())).await;

        assert!(first_handle.request_move(42.0, 24.0, 180.0).await);
        assert!(first_handle.send_message("over here").await);

        wait_until(|| {
            second_mirror.try_lock().map_or(false, |m| {
                let moved = m
                    .other(1)
                    .map_or(false, |tank| tank.x == 42.0 && tank.y == 24.0);
                let messaged = m
                    .history()
                    .any(|entry| entry == "Message from Client ID 1 (direct): over here");
                moved && messaged
            })
        })
        .await;

        drop(first_handle);
        first.shutdown().await;

        wait_until(|| {
            second_mirror
                .try_lock()
                .map_or(false, |m| m.other(1).is_none() && m.group_id().is_none())
        })
        .await;

        second.shutdown().await;
        handle.shutdown();
        task.await.unwrap();
    }

    /// A full server refuses the client with a readable reason
    #[tokio::test]
    async fn full_server_refuses_client() {
        let (addr, handle, task) = start_server(1).await;
        let address = addr.to_string();

        let first = Client::connect(&address).await.unwrap();
        let refused = Client::connect(&address).await;
        match refused {
            Err(e) => assert!(e.to_string().contains("Server full")),
            Ok(_) => panic!("second client should be refused"),
        }

        first.shutdown().await;
        handle.shutdown();
        task.await.unwrap();
    }
}
