//! Server network layer: TCP accept loop, per-connection tasks and the
//! single actor task that owns the game core.

use crate::channel::PeerLinks;
use crate::console::OperatorCommand;
use crate::error::ConnectError;
use crate::game::GameServer;
use log::{debug, error, info, warn};
use shared::{read_packet, write_packet, Packet, PeerId, PROTOCOL_VERSION};
use std::io;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Messages sent from connection tasks and the console to the actor
#[derive(Debug)]
pub enum ServerMessage {
    PeerConnecting {
        addr: SocketAddr,
        link: mpsc::UnboundedSender<Packet>,
        reply: oneshot::Sender<Result<PeerId, ConnectError>>,
    },
    PacketReceived {
        peer_id: PeerId,
        packet: Packet,
    },
    PeerDisconnected {
        peer_id: PeerId,
    },
    Operator {
        command: OperatorCommand,
        reply: oneshot::Sender<String>,
    },
    Shutdown,
}

/// Cloneable handle for talking to a running server.
#[derive(Clone)]
pub struct ServerHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerHandle {
    /// Runs an operator command on the actor. `None` once the server stopped.
    pub async fn execute(&self, command: OperatorCommand) -> Option<String> {
        let (reply, response) = oneshot::channel();
        self.server_tx
            .send(ServerMessage::Operator { command, reply })
            .ok()?;
        response.await.ok()
    }

    pub fn shutdown(&self) {
        if self.server_tx.send(ServerMessage::Shutdown).is_err() {
            debug!("Server already stopped");
        }
    }
}

pub struct Server {
    listener: TcpListener,
    game: GameServer<PeerLinks>,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn bind(addr: &str, max_clients: usize) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            game: GameServer::new(PeerLinks::new(), max_clients),
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    /// Runs until a `Shutdown` message arrives.
    pub async fn run(self) {
        let Server {
            listener,
            mut game,
            server_tx,
            mut server_rx,
        } = self;

        let acceptor = spawn_acceptor(listener, server_tx);
        info!("Tank server started");

        while let Some(message) = server_rx.recv().await {
            match message {
                ServerMessage::PeerConnecting { addr, link, reply } => {
                    let result = game.begin_connect(addr);
                    if let Ok(peer_id) = result {
                        game.sink_mut().attach(peer_id, link);
                        game.complete_connect(peer_id);
                    }

                    if reply.send(result.clone()).is_err() {
                        if let Ok(peer_id) = result {
                            warn!("Connection task for client {} vanished", peer_id);
                            game.disconnect_peer(peer_id);
                        }
                    }
                }
                ServerMessage::PacketReceived { peer_id, packet } => {
                    game.handle_packet(peer_id, packet);
                }
                ServerMessage::PeerDisconnected { peer_id } => {
                    game.disconnect_peer(peer_id);
                }
                ServerMessage::Operator { command, reply } => {
                    let _ = reply.send(game.execute(command));
                }
                ServerMessage::Shutdown => {
                    info!("Shutting down server");
                    break;
                }
            }
        }

        acceptor.abort();
    }
}

fn spawn_acceptor(
    listener: TcpListener,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("Accepted connection from {}", addr);
                    tokio::spawn(handle_connection(stream, addr, server_tx.clone()));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    })
}

/// Handshake, then pump inbound packets to the actor until the peer leaves.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle for {}: {}", addr, e);
    }
    let (mut reader, mut writer) = stream.into_split();

    let version = match read_packet(&mut reader).await {
        Ok(Some(Packet::Connect { protocol_version })) => protocol_version,
        Ok(Some(other)) => {
            warn!("Expected Connect from {}, got {:?}", addr, other);
            return;
        }
        Ok(None) => return,
        Err(e) => {
            warn!("Handshake with {} failed: {}", addr, e);
            return;
        }
    };

    if version != PROTOCOL_VERSION {
        let refusal = ConnectError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            actual: version,
        };
        info!("Refusing {}: {}", addr, refusal);
        refuse(&mut writer, &refusal).await;
        return;
    }

    let (link, outbound) = mpsc::unbounded_channel();
    let (reply, response) = oneshot::channel();
    if server_tx
        .send(ServerMessage::PeerConnecting { addr, link, reply })
        .is_err()
    {
        return;
    }

    let peer_id = match response.await {
        Ok(Ok(peer_id)) => peer_id,
        Ok(Err(refusal)) => {
            info!("Refusing {}: {}", addr, refusal);
            refuse(&mut writer, &refusal).await;
            return;
        }
        Err(_) => return,
    };

    let writer_task = tokio::spawn(write_loop(writer, outbound, peer_id));

    read_loop(&mut reader, peer_id, &server_tx).await;

    let _ = server_tx.send(ServerMessage::PeerDisconnected { peer_id });
    // The writer drains whatever is queued and ends once the actor drops the link.
    let _ = writer_task.await;
}

async fn refuse(writer: &mut OwnedWriteHalf, refusal: &ConnectError) {
    let packet = Packet::Disconnected {
        reason: refusal.to_string(),
    };
    if let Err(e) = write_packet(writer, &packet).await {
        debug!("Failed to send refusal: {}", e);
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(
    reader: &mut OwnedReadHalf,
    peer_id: PeerId,
    server_tx: &mpsc::UnboundedSender<ServerMessage>,
) {
    loop {
        match read_packet(reader).await {
            Ok(Some(Packet::Disconnect)) => {
                debug!("Client {} sent disconnect", peer_id);
                break;
            }
            Ok(Some(packet)) => {
                if server_tx
                    .send(ServerMessage::PacketReceived { peer_id, packet })
                    .is_err()
                {
                    break;
                }
            }
            Ok(None) => {
                debug!("Client {} closed the connection", peer_id);
                break;
            }
            Err(e) => {
                warn!("Error reading from client {}: {}", peer_id, e);
                break;
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Packet>,
    peer_id: PeerId,
) {
    while let Some(packet) = outbound.recv().await {
        if let Err(e) = write_packet(&mut writer, &packet).await {
            warn!("Failed to send to client {}: {}", peer_id, e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}
