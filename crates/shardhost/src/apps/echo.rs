//! Length-prefixed echo service with a fixed number of seats.
//!
//! Each free seat is a one-shot verifier; a seat is re-armed when its client
//! leaves, so an instance never holds more than `seats` clients.

use super::AppDefinition;
use async_trait::async_trait;
use game_container::{
    AppHandle, ContainerError, GameAppContext, GameAppFactory, InitParams,
    NetworkClientConnectedEvent, NetworkClientDisconnectedEvent, Shardlet, ShardletError,
};
use shard_event_system::{
    message_ref, EventError, FilterChain, Frame, LengthPrefixedFramer, Message, Registrar,
    Subscriber,
};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_SEATS: usize = 16;
const DEFAULT_MAX_FRAME: usize = 64 * 1024;

pub struct EchoFactory {
    definition: AppDefinition,
}

impl EchoFactory {
    pub fn new(definition: AppDefinition) -> Self {
        Self { definition }
    }

    fn max_frame(&self) -> usize {
        self.definition
            .params
            .get("max_frame")
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_FRAME)
    }
}

fn seats(params: &InitParams) -> Result<usize, ShardletError> {
    match params.get("seats") {
        None => Ok(DEFAULT_SEATS),
        Some(value) => match value.parse::<usize>() {
            Ok(seats) if seats > 0 => Ok(seats),
            _ => Err(ShardletError::InvalidParameter {
                name: "seats".to_string(),
                reason: format!("expected a positive number, got {value:?}"),
            }),
        },
    }
}

fn non_empty_frame(message: &dyn Message) -> bool {
    message_ref::<Frame>(message)
        .map(|frame| !frame.data.is_empty())
        .unwrap_or(false)
}

fn arm_seat(context: &GameAppContext) {
    context.add_client_verifier(non_empty_frame, false);
}

#[async_trait]
impl GameAppFactory for EchoFactory {
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
            .with_inbound(LengthPrefixedFramer::new(self.max_frame()))
            .with_outbound(LengthPrefixedFramer::new(self.max_frame()))
    }

    fn init_params(&self) -> InitParams {
        self.definition.params.clone()
    }

    fn heartbeat_interval(&self) -> Option<Duration> {
        self.definition.heartbeat_interval
    }

    async fn initialize_application(
        &self,
        app: &AppHandle,
        _parent: Option<&AppHandle>,
        params: &InitParams,
    ) -> Result<(), ShardletError> {
        let seats = seats(params)?;
        let context = app.get().map_err(ContainerError::from)?;
        context.add_shardlet(EchoShardlet { app: None }, params.clone())?;
        for _ in 0..seats {
            arm_seat(&context);
        }
        info!("🪑 Echo {} ready with {} seat(s)", context.name(), seats);
        Ok(())
    }
}

struct EchoShardlet {
    app: Option<AppHandle>,
}

impl EchoShardlet {
    fn context(&self) -> Result<std::sync::Arc<GameAppContext>, EventError> {
        let app = self
            .app
            .as_ref()
            .ok_or_else(|| EventError::HandlerExecution("echo not initialized".to_string()))?;
        Ok(app.get()?)
    }

    fn on_connected(&self, event: &NetworkClientConnectedEvent) -> Result<(), EventError> {
        debug!("🔗 Echo client {} seated", event.remote_addr);
        Ok(())
    }

    fn on_frame(&self, frame: &Frame) -> Result<(), EventError> {
        let context = self.context()?;
        let Some(session) = frame.origin.and_then(|uid| context.session(uid)) else {
            return Ok(());
        };
        session.send_bytes(frame.data.clone())?;
        Ok(())
    }

    fn on_disconnected(&self, event: &NetworkClientDisconnectedEvent) -> Result<(), EventError> {
        let context = self.context()?;
        if context.is_running() {
            arm_seat(&context);
            debug!("🪑 Seat of {} freed", event.remote_addr);
        }
        Ok(())
    }
}

impl Subscriber for EchoShardlet {
    fn subscribe(&self, registrar: &mut Registrar<'_, Self>) {
        registrar
            .on(EchoShardlet::on_connected)
            .on(EchoShardlet::on_frame)
            .on(EchoShardlet::on_disconnected);
    }

    fn subscriber_name(&self) -> &str {
        "echo"
    }
}

impl Shardlet for EchoShardlet {
    fn init(&mut self, _params: &InitParams, context: &AppHandle) -> Result<(), ShardletError> {
        self.app = Some(context.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use game_container::{ContainerConfig, ContainerFacade};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::time::timeout;

    async fn echo_container(seats: &str) -> Arc<ContainerFacade> {
        let definition = AppDefinition {
            name: "echo".to_string(),
            bind_address: "127.0.0.1:0".parse().ok(),
            startup: true,
            heartbeat_interval: None,
            params: InitParams::from([("seats".to_string(), seats.to_string())]),
        };
        let container = ContainerFacade::new(
            ContainerConfig::default(),
            vec![Arc::new(EchoFactory::new(definition))],
        );
        container.startup().await.expect("Failed to start container");
        container
    }

    async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
        timeout(Duration::from_secs(5), async {
            let length = stream.read_u32().await.expect("Failed to read header");
            let mut payload = vec![0; length as usize];
            stream.read_exact(&mut payload).await.expect("Failed to read payload");
            payload
        })
        .await
        .expect("Timed out waiting for a frame")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_echo_frames() {
        let container = echo_container("2").await;
        let addr = container
            .local_address_for("echo")
            .expect("Failed to find echo endpoint");

        let mut client = TcpStream::connect(addr).await.expect("Failed to connect");
        client.write_all(b"\x00\x00\x00\x05hello\x00\x00").await.expect("Failed to write");
        assert_eq!(read_frame(&mut client).await, b"hello");
        client.write_all(b"\x00\x02ok").await.expect("Failed to write");
        assert_eq!(read_frame(&mut client).await, b"ok");

        container.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_seats_are_limited() {
        let container = echo_container("1").await;
        let addr = container
            .local_address_for("echo")
            .expect("Failed to find echo endpoint");

        let mut first = TcpStream::connect(addr).await.expect("Failed to connect");
        first.write_all(b"\x00\x00\x00\x01a").await.expect("Failed to write");
        assert_eq!(read_frame(&mut first).await, b"a");

        // No free seat: the second client is kicked without a reply
        let mut second = TcpStream::connect(addr).await.expect("Failed to connect");
        second.write_all(b"\x00\x00\x00\x01b").await.expect("Failed to write");
        let mut rest = Vec::new();
        let read = timeout(Duration::from_secs(5), second.read_to_end(&mut rest))
            .await
            .expect("Timed out waiting for close");
        assert!(read.map(|_| rest.is_empty()).unwrap_or(true));

        container.shutdown().await;
    }

    #[test]
    fn test_seats_param() {
        assert_eq!(seats(&InitParams::new()).expect("Failed to read seats"), DEFAULT_SEATS);

        let params = InitParams::from([("seats".to_string(), "3".to_string())]);
        assert_eq!(seats(&params).expect("Failed to read seats"), 3);

        for bad in ["0", "many", "-1"] {
            let params = InitParams::from([("seats".to_string(), bad.to_string())]);
            assert!(matches!(seats(&params), Err(ShardletError::InvalidParameter { .. })));
        }
    }

    #[test]
    fn test_non_empty_frame() {
        assert!(non_empty_frame(&Frame::new(None, &b"x"[..])));
        assert!(!non_empty_frame(&Frame::new(None, Vec::new())));
    }
}
