//! Line-based chat lobby.
//!
//! Clients join by sending `HELLO <name>`; every later line is relayed to all
//! clients of the same lobby instance.

use super::AppDefinition;
use async_trait::async_trait;
use game_container::{
    AppHandle, ContainerError, ContainerShutdownEvent, GameAppContext, GameAppCreatedEvent,
    GameAppFactory, HeartBeatEvent, InitParams, NetworkClientDisconnectedEvent, Shardlet,
    ShardletError,
};
use shard_event_system::{
    message_ref, EventError, FilterChain, Frame, LineFramer, Message, Registrar, SerialExecutor,
    Subscriber, TaskExecutor,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_MAX_LINE: usize = 1024;

pub struct LobbyFactory {
    definition: AppDefinition,
}

impl LobbyFactory {
    pub fn new(definition: AppDefinition) -> Self {
        Self { definition }
    }

    fn max_line(&self) -> usize {
        self.definition
            .params
            .get("max_line")
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_LINE)
    }
}

#[async_trait]
impl GameAppFactory for LobbyFactory {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn is_startup(&self) -> bool {
        self.definition.startup
    }

    fn bind_address(&self) -> Option<SocketAddr> {
        self.definition.bind_address
    }

    fn create_filter_chain(&self) -> FilterChain {
        FilterChain::new()
            .with_inbound(LineFramer::new(self.max_line()))
            .with_outbound(LineFramer::new(self.max_line()))
    }

    fn init_params(&self) -> InitParams {
        self.definition.params.clone()
    }

    fn heartbeat_interval(&self) -> Option<Duration> {
        self.definition.heartbeat_interval
    }

    /// A client's HELLO must be handled before its next line.
    fn executor(&self) -> Option<Arc<dyn TaskExecutor>> {
        Some(Arc::new(SerialExecutor::new()))
    }

    async fn initialize_application(
        &self,
        app: &AppHandle,
        _parent: Option<&AppHandle>,
        params: &InitParams,
    ) -> Result<(), ShardletError> {
        let context = app.get().map_err(ContainerError::from)?;
        context.add_shardlet(LobbyShardlet::default(), params.clone())?;
        context.add_client_verifier(|message: &dyn Message| hello_name(message).is_some(), true);
        Ok(())
    }
}

/// Name announced by a `HELLO <name>` line.
fn hello_name(message: &dyn Message) -> Option<String> {
    let frame = message_ref::<Frame>(message)?;
    let line = std::str::from_utf8(&frame.data).ok()?;
    let name = line.strip_prefix("HELLO ")?.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Session attachment holding the player's chosen name.
struct PlayerName(String);

#[derive(Default)]
struct LobbyShardlet {
    app: Option<AppHandle>,
    motd: String,
}

impl LobbyShardlet {
    fn context(&self) -> Result<Arc<GameAppContext>, EventError> {
        let app = self
            .app
            .as_ref()
            .ok_or_else(|| EventError::HandlerExecution("lobby not initialized".to_string()))?;
        Ok(app.get()?)
    }

    fn broadcast(&self, context: &GameAppContext, line: String) {
        for session in context.sessions() {
            if let Err(e) = session.send_bytes(line.clone()) {
                debug!("Skipping {} in broadcast: {}", session.uid(), e);
            }
        }
    }

    fn on_created(&self, event: &GameAppCreatedEvent) -> Result<(), EventError> {
        info!("🏛️ Lobby {} ({}) is open", event.name, event.app.uid());
        Ok(())
    }

    fn on_frame(&self, frame: &Frame) -> Result<(), EventError> {
        let context = self.context()?;
        let Some(session) = frame.origin.and_then(|uid| context.session(uid)) else {
            return Ok(());
        };

        match session.attachment::<PlayerName>() {
            Some(player) => {
                let text = String::from_utf8_lossy(&frame.data);
                self.broadcast(&context, format!("{}: {}", player.0, text));
            }
            None => {
                let name = hello_name(frame).ok_or_else(|| {
                    EventError::HandlerExecution("first lobby line must be HELLO".to_string())
                })?;
                session.set_attachment(PlayerName(name.clone()));
                if !self.motd.is_empty() {
                    session.send_bytes(self.motd.clone())?;
                }
                self.broadcast(&context, format!("* {} joined", name));
            }
        }
        Ok(())
    }

    fn on_disconnected(&self, event: &NetworkClientDisconnectedEvent) -> Result<(), EventError> {
        info!("👋 {} left the lobby", event.remote_addr);
        Ok(())
    }

    fn on_heartbeat(&self, event: &HeartBeatEvent) -> Result<(), EventError> {
        let context = self.context()?;
        debug!(
            "💓 Lobby {} heartbeat #{}: {} client(s)",
            context.name(),
            event.sequence,
            context.session_count()
        );
        Ok(())
    }

    fn on_shutdown(&self, _event: &ContainerShutdownEvent) -> Result<(), EventError> {
        let context = self.context()?;
        self.broadcast(&context, "* server is shutting down".to_string());
        Ok(())
    }
}

impl Subscriber for LobbyShardlet {
    fn subscribe(&self, registrar: &mut Registrar<'_, Self>) {
        registrar
            .on(LobbyShardlet::on_created)
            .on(LobbyShardlet::on_frame)
            .on(LobbyShardlet::on_disconnected)
            .on(LobbyShardlet::on_heartbeat)
            .on(LobbyShardlet::on_shutdown);
    }

    fn subscriber_name(&self) -> &str {
        "lobby"
    }
}

impl Shardlet for LobbyShardlet {
    fn init(&mut self, params: &InitParams, context: &AppHandle) -> Result<(), ShardletError> {
        self.app = Some(context.clone());
        self.motd = params.get("motd").cloned().unwrap_or_default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_container::{ContainerConfig, ContainerFacade};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    async fn read_line(reader: &mut BufReader<TcpStream>) -> String {
        let mut line = String::new();
        timeout(Duration::from_secs(5), reader.read_line(&mut line))
            .await
            .expect("Timed out waiting for a line")
            .expect("Failed to read line");
        line
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lobby_chat() {
        let definition = AppDefinition {
            name: "lobby".to_string(),
            bind_address: "127.0.0.1:0".parse().ok(),
            startup: true,
            heartbeat_interval: None,
            params: InitParams::from([("motd".to_string(), "be nice".to_string())]),
        };
        let container = ContainerFacade::new(
            ContainerConfig::default(),
            vec![Arc::new(LobbyFactory::new(definition))],
        );
        container.startup().await.expect("Failed to start container");
        let addr = container
            .local_address_for("lobby")
            .expect("Failed to find lobby endpoint");

        let mut alice = BufReader::new(TcpStream::connect(addr).await.expect("Failed to connect"));
        alice.get_mut().write_all(b"HELLO alice\n").await.expect("Failed to write");
        assert_eq!(read_line(&mut alice).await, "be nice\n");
        assert_eq!(read_line(&mut alice).await, "* alice joined\n");

        let mut bob = BufReader::new(TcpStream::connect(addr).await.expect("Failed to connect"));
        bob.get_mut().write_all(b"HELLO bob\n").await.expect("Failed to write");
        assert_eq!(read_line(&mut bob).await, "be nice\n");
        assert_eq!(read_line(&mut alice).await, "* bob joined\n");
        assert_eq!(read_line(&mut bob).await, "* bob joined\n");

        alice.get_mut().write_all(b"hi bob\n").await.expect("Failed to write");
        assert_eq!(read_line(&mut bob).await, "alice: hi bob\n");
        assert_eq!(read_line(&mut alice).await, "alice: hi bob\n");

        container.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_pipelined_hello_and_chat_line() {
        const CLIENTS: usize = 50;

        let definition = AppDefinition {
            name: "lobby".to_string(),
            bind_address: "127.0.0.1:0".parse().ok(),
            startup: true,
            heartbeat_interval: None,
            params: InitParams::new(),
        };
        let container = ContainerFacade::new(
            ContainerConfig::default(),
            vec![Arc::new(LobbyFactory::new(definition))],
        );
        container.startup().await.expect("Failed to start container");
        let addr = container
            .local_address_for("lobby")
            .expect("Failed to find lobby endpoint");

        let clients: Vec<_> = (0..CLIENTS)
            .map(|i| {
                tokio::spawn(async move {
                    let stream = TcpStream::connect(addr).await.expect("Failed to connect");
                    let mut reader = BufReader::new(stream);
                    let name = format!("p{i}");
                    reader
                        .get_mut()
                        .write_all(format!("HELLO {name}\nhi\n").as_bytes())
                        .await
                        .expect("Failed to write");

                    let own_line = format!("{name}: hi\n");
                    loop {
                        let line = read_line(&mut reader).await;
                        assert!(!line.is_empty(), "{name} disconnected before its chat line");
                        if line == own_line {
                            break reader;
                        }
                    }
                })
            })
            .collect();

        // Keep every connection open until all chat lines have come back.
        let mut readers = Vec::new();
        for client in clients {
            readers.push(client.await.expect("Failed to join client task"));
        }
        assert_eq!(readers.len(), CLIENTS);

        container.shutdown().await;
    }

    #[test]
    fn test_hello_name() {
        fn name(line: &'static [u8]) -> Option<String> {
            hello_name(&Frame::new(None, line))
        }
        assert_eq!(name(b"HELLO alice"), Some("alice".to_string()));
        assert_eq!(name(b"HELLO  bob "), Some("bob".to_string()));
        assert_eq!(name(b"HELLO "), None);
        assert_eq!(name(b"hello alice"), None);
        assert_eq!(name(b"\xff\xfe"), None);
    }
}
