use crate::commands::{help_text, Command, CommandError};
use crate::mirror::LocalMirror;
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    dispatch_notification, read_packet, write_packet, Packet, PeerId, PROTOCOL_VERSION, SPAWN_AREA,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};

pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
pub const AUTO_MOVE_GRACE: Duration = Duration::from_secs(1);
const AUTO_MOVE_STEP: f32 = 10.0;
const AUTO_MOVE_PAUSE_MS: std::ops::Range<u64> = 3000..5000;
const FLAG_CHECK: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Connection refused by server: {0}")]
    Refused(String),

    #[error("Unexpected handshake reply: {0}")]
    UnexpectedReply(String),

    #[error("Server closed the connection during handshake")]
    ConnectionClosed,
}

#[derive(Debug)]
struct Flags {
    running: AtomicBool,
    connected: AtomicBool,
    auto_move: AtomicBool,
}

/// Cloneable access to a connected session: outbound requests plus the
/// shared mirror. Every request updates the own view under the mirror lock
/// in the same critical section that queues the packet.
#[derive(Clone)]
pub struct ClientHandle {
    outbound: mpsc::UnboundedSender<Packet>,
    mirror: Arc<Mutex<LocalMirror>>,
    flags: Arc<Flags>,
}

impl ClientHandle {
    pub fn mirror(&self) -> Arc<Mutex<LocalMirror>> {
        Arc::clone(&self.mirror)
    }

    pub fn is_running(&self) -> bool {
        self.flags.running.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.flags.connected.load(Ordering::SeqCst)
    }

    pub fn is_auto_moving(&self) -> bool {
        self.flags.auto_move.load(Ordering::SeqCst)
    }

    /// Clears the running flag; the poll and auto-move loops exit on their
    /// next check.
    pub fn stop(&self) {
        self.flags.running.store(false, Ordering::SeqCst);
    }

    fn mark_disconnected(&self) {
        self.flags.connected.store(false, Ordering::SeqCst);
        self.flags.auto_move.store(false, Ordering::SeqCst);
        self.stop();
    }

    fn send(&self, packet: Packet) -> bool {
        if !self.is_connected() {
            warn!("Not connected to server");
            return false;
        }
        if self.outbound.send(packet).is_err() {
            self.mark_disconnected();
            return false;
        }
        true
    }

    pub async fn request_move(&self, x: f32, y: f32, direction: f32) -> bool {
        let mut mirror = self.mirror.lock().await;
        if !self.send(Packet::Move { x, y, direction }) {
            return false;
        }
        mirror.predict_move(x, y, direction);
        true
    }

    pub async fn request_fire(&self, direction: f32, force: f32) -> bool {
        let mirror = self.mirror.lock().await;
        let origin = mirror.fire_origin();
        self.send(Packet::Fire {
            direction,
            force,
            origin,
        })
    }

    pub async fn select_type(&self, tank_type: i32) -> bool {
        let mut mirror = self.mirror.lock().await;
        if !self.send(Packet::SelectType { tank_type }) {
            return false;
        }
        mirror.predict_type(tank_type);
        true
    }

    /// `max` defaults to the current own maximum.
    pub async fn report_health(&self, current: f32, max: Option<f32>) -> bool {
        let mut mirror = self.mirror.lock().await;
        let max = max.unwrap_or(mirror.local().max_health);
        if !self.send(Packet::HealthUpdate { current, max }) {
            return false;
        }
        mirror.predict_health(current, max);
        true
    }

    pub async fn report_destroyed(&self, destroyer_id: PeerId) -> bool {
        let mut mirror = self.mirror.lock().await;
        if !self.send(Packet::Destroyed { destroyer_id }) {
            return false;
        }
        mirror.predict_destroyed(destroyer_id);
        true
    }

    pub async fn request_spawn(
        &self,
        x: f32,
        y: f32,
        direction: f32,
        tank_type: i32,
        initial_health: f32,
    ) -> bool {
        let mut mirror = self.mirror.lock().await;
        let sent = self.send(Packet::Spawn {
            x,
            y,
            direction,
            tank_type,
            initial_health,
        });
        if !sent {
            return false;
        }
        mirror.predict_spawn(x, y, direction, tank_type, initial_health);
        true
    }

    /// Addresses the relay group when one is known, otherwise asks the
    /// server to relay.
    pub async fn send_message(&self, text: &str) -> bool {
        let mut mirror = self.mirror.lock().await;
        match mirror.group_id() {
            Some(group_id) => {
                let sent = self.send(Packet::GroupMessage {
                    group_id,
                    text: text.to_string(),
                });
                if sent {
                    mirror.record_message(format!("Me: {}", text));
                }
                sent
            }
            None => {
                let sent = self.send(Packet::RelayMessage {
                    text: text.to_string(),
                });
                if sent {
                    mirror.record_message(format!("Me (via server): {}", text));
                }
                sent
            }
        }
    }

    /// One random step around the current position.
    async fn auto_step(&self, rng: &mut StdRng) -> Option<(f32, f32, f32)> {
        let mut mirror = self.mirror.lock().await;
        let local = mirror.local();
        let x = (local.x + rng.gen_range(-AUTO_MOVE_STEP..AUTO_MOVE_STEP)).clamp(0.0, SPAWN_AREA);
        let y = (local.y + rng.gen_range(-AUTO_MOVE_STEP..AUTO_MOVE_STEP)).clamp(0.0, SPAWN_AREA);
        let direction = rng.gen_range(0.0..360.0);

        if !self.send(Packet::Move { x, y, direction }) {
            return None;
        }
        mirror.predict_move(x, y, direction);
        Some((x, y, direction))
    }

    async fn disconnect(&self) {
        let _guard = self.mirror.lock().await;
        if self.send(Packet::Disconnect) {
            info!("Disconnecting from server");
        }
        self.flags.connected.store(false, Ordering::SeqCst);
    }
}

/// A connected tank client.
pub struct Client {
    handle: ClientHandle,
    inbound: Option<mpsc::UnboundedReceiver<Packet>>,
    poll_task: Option<JoinHandle<()>>,
    auto_move_task: Option<JoinHandle<()>>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

impl Client {
    /// Opens the connection and completes the handshake.
    pub async fn connect(address: &str) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Connecting to server {}...", address);
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        write_packet(
            &mut writer,
            &Packet::Connect {
                protocol_version: PROTOCOL_VERSION,
            },
        )
        .await?;

        let tank = match read_packet(&mut reader).await? {
            Some(Packet::Connected { client_id, tank }) => {
                info!("Connected! Client ID: {}", client_id);
                tank
            }
            Some(Packet::Disconnected { reason }) => {
                return Err(ClientError::Refused(reason).into());
            }
            Some(other) => {
                return Err(ClientError::UnexpectedReply(format!("{:?}", other)).into());
            }
            None => return Err(ClientError::ConnectionClosed.into()),
        };

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let reader_task = tokio::spawn(read_loop(reader, inbound_tx));
        let writer_task = tokio::spawn(write_loop(writer, outbound_rx));

        let handle = ClientHandle {
            outbound: outbound_tx,
            mirror: Arc::new(Mutex::new(LocalMirror::new(tank))),
            flags: Arc::new(Flags {
                running: AtomicBool::new(true),
                connected: AtomicBool::new(true),
                auto_move: AtomicBool::new(false),
            }),
        };

        Ok(Client {
            handle,
            inbound: Some(inbound_rx),
            poll_task: None,
            auto_move_task: None,
            reader_task,
            writer_task,
        })
    }

    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    /// Starts the periodic inbound pump. Calling it twice has no effect.
    pub fn start_polling(&mut self) {
        if let Some(inbound) = self.inbound.take() {
            self.poll_task = Some(tokio::spawn(poll_loop(inbound, self.handle.clone())));
        }
    }

    /// Flips automatic movement and returns the new setting.
    pub fn toggle_auto_move(&mut self) -> bool {
        let enable = !self.handle.is_auto_moving();
        self.handle.flags.auto_move.store(enable, Ordering::SeqCst);

        if enable {
            let finished = self
                .auto_move_task
                .as_ref()
                .map_or(true, |task| task.is_finished());
            if finished {
                self.auto_move_task = Some(tokio::spawn(auto_move_loop(self.handle.clone())));
            }
        }
        enable
    }

    /// Runs one console command and returns the text to show the player.
    pub async fn execute(&mut self, command: Command) -> Option<String> {
        let handle = &self.handle;
        match command {
            Command::Move { x, y, direction } => handle
                .request_move(x, y, direction)
                .await
                .then(|| format!("Move request sent: ({}, {}) dir {}", x, y, direction)),
            Command::Fire { direction, force } => handle
                .request_fire(direction, force)
                .await
                .then(|| format!("Fire request sent: dir {} force {}", direction, force)),
            Command::SelectType(tank_type) => handle
                .select_type(tank_type)
                .await
                .then(|| format!("Tank type {} selected", tank_type)),
            Command::Health { current, max } => handle
                .report_health(current, max)
                .await
                .then(|| format!("Health update sent: {}", current)),
            Command::Destroy { destroyer_id } => handle
                .report_destroyed(destroyer_id)
                .await
                .then(|| "Destroy report sent".to_string()),
            Command::Spawn {
                x,
                y,
                direction,
                tank_type,
                health,
            } => handle
                .request_spawn(x, y, direction, tank_type, health)
                .await
                .then(|| format!("Spawn request sent: ({}, {})", x, y)),
            Command::Message(text) => handle
                .send_message(&text)
                .await
                .then(|| format!("Message sent: {}", text)),
            Command::History => Some(handle.mirror.lock().await.history_report()),
            Command::Status => {
                let connected = handle.is_connected();
                Some(handle.mirror.lock().await.group_status(connected))
            }
            Command::ToggleAuto => {
                let enabled = self.toggle_auto_move();
                Some(format!(
                    "Auto movement {}",
                    if enabled { "enabled" } else { "disabled" }
                ))
            }
            Command::Help => Some(help_text().to_string()),
            Command::Quit => {
                self.handle.stop();
                None
            }
        }
    }

    /// Interactive loop over stdin until `q`, end of input or disconnect.
    pub async fn run(mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.start_polling();
        println!("{}", help_text());

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while self.handle.is_running() {
            println!("{}", self.handle.mirror.lock().await.status_line());

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = wait_for_stop(&self.handle) => break,
            };
            let Some(line) = line else {
                self.handle.stop();
                break;
            };

            match Command::parse(&line) {
                Ok(command) => {
                    if let Some(output) = self.execute(command).await {
                        println!("{}", output);
                    }
                }
                Err(CommandError::Empty) => {}
                Err(e) => println!("{}", e),
            }
        }

        if !self.handle.is_connected() {
            println!("Disconnected from server");
        }
        self.shutdown().await;
        Ok(())
    }

    /// Stops all loops, tells the server goodbye and waits briefly for the
    /// background tasks.
    pub async fn shutdown(mut self) {
        self.handle.flags.auto_move.store(false, Ordering::SeqCst);
        if let Some(task) = self.auto_move_task.take() {
            if timeout(AUTO_MOVE_GRACE, task).await.is_err() {
                warn!("Auto movement did not stop within {:?}", AUTO_MOVE_GRACE);
            }
        }

        if self.handle.is_connected() {
            self.handle.disconnect().await;
        }
        self.handle.stop();

        if let Some(task) = self.poll_task.take() {
            let _ = task.await;
        }

        // The writer drains the goodbye once every handle is gone.
        drop(self.handle);
        if timeout(AUTO_MOVE_GRACE, self.writer_task).await.is_err() {
            debug!("Writer still busy at shutdown");
        }
        self.reader_task.abort();
        info!("Client stopped");
    }
}

async fn wait_for_stop(handle: &ClientHandle) {
    while handle.is_running() {
        sleep(FLAG_CHECK).await;
    }
}

async fn read_loop(mut reader: OwnedReadHalf, inbound: mpsc::UnboundedSender<Packet>) {
    loop {
        match read_packet(&mut reader).await {
            Ok(Some(packet)) => {
                if inbound.send(packet).is_err() {
                    break;
                }
            }
            Ok(None) => {
                info!("Server closed the connection");
                break;
            }
            Err(e) => {
                error!("Error receiving packet: {}", e);
                break;
            }
        }
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut outbound: mpsc::UnboundedReceiver<Packet>) {
    while let Some(packet) = outbound.recv().await {
        if let Err(e) = write_packet(&mut writer, &packet).await {
            error!("Failed to send packet: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

/// Drains inbound packets every [`POLL_INTERVAL`] and applies them to the
/// mirror in arrival order.
async fn poll_loop(mut inbound: mpsc::UnboundedReceiver<Packet>, handle: ClientHandle) {
    let mut ticker = interval(POLL_INTERVAL);

    while handle.is_running() {
        ticker.tick().await;

        let mut batch = Vec::new();
        let mut closed = false;
        loop {
            match inbound.try_recv() {
                Ok(packet) => batch.push(packet),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }

        if !batch.is_empty() {
            let mut mirror = handle.mirror.lock().await;
            for packet in batch {
                match dispatch_notification(&mut *mirror, packet) {
                    Ok(_) => {}
                    Err(Packet::Disconnected { reason }) => {
                        warn!("Disconnected by server: {}", reason);
                        closed = true;
                    }
                    Err(other) => debug!("Ignoring packet {:?}", other),
                }
            }
        }

        if closed {
            handle.mark_disconnected();
        }
    }
}

async fn auto_move_loop(handle: ClientHandle) {
    let mut rng = StdRng::from_entropy();
    info!("Auto movement started");

    while handle.is_auto_moving() && handle.is_running() {
        match handle.auto_step(&mut rng).await {
            Some((x, y, direction)) => {
                info!("Auto move to ({:.1}, {:.1}) dir {:.1}", x, y, direction)
            }
            None => break,
        }

        let pause = Duration::from_millis(rng.gen_range(AUTO_MOVE_PAUSE_MS));
        let mut waited = Duration::ZERO;
        while waited < pause && handle.is_auto_moving() && handle.is_running() {
            let step = FLAG_CHECK.min(pause - waited);
            sleep(step).await;
            waited += step;
        }
    }

    info!("Auto movement stopped");
}
