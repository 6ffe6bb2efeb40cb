//! End-to-end tests over real TCP connections on ephemeral ports.

use async_trait::async_trait;
use game_container::{
    AppHandle, ContainerConfig, ContainerError, ContainerFacade, GameAppFactory, InitParams,
    Shardlet, ShardletError,
};
use shard_event_system::{
    message_ref, EventError, FilterChain, Frame, LineFramer, Message, Registrar, Subscriber,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

const WAIT: Duration = Duration::from_secs(5);

/// Sends every line back to the session it came from.
struct Echo {
    app: Option<AppHandle>,
}

impl Echo {
    fn on_frame(&self, frame: &Frame) -> Result<(), EventError> {
        let Some(app) = &self.app else {
            return Ok(());
        };
        let context = app.get()?;
        let session = frame
            .origin
            .and_then(|uid| context.session(uid))
            .ok_or_else(|| EventError::HandlerExecution("unknown origin".to_string()))?;
        session.send_bytes(frame.data.clone())?;
        Ok(())
    }
}

impl Subscriber for Echo {
    fn subscribe(&self, registrar: &mut Registrar<'_, Self>) {
        registrar.on(Echo::on_frame);
    }
}

impl Shardlet for Echo {
    fn init(&mut self, _params: &InitParams, context: &AppHandle) -> Result<(), ShardletError> {
        self.app = Some(context.clone());
        Ok(())
    }
}

struct EchoFactory;

#[async_trait]
impl GameAppFactory for EchoFactory {
    fn name(&self) -> &str {
        "echo"
    }

    fn is_startup(&self) -> bool {
        true
    }

    fn bind_address(&self) -> Option<SocketAddr> {
        "127.0.0.1:0".parse().ok()
    }

    fn create_filter_chain(&self) -> FilterChain {
        FilterChain::new()
            .with_inbound(LineFramer::default())
            .with_outbound(LineFramer::default())
    }

    async fn initialize_application(
        &self,
        app: &AppHandle,
        _parent: Option<&AppHandle>,
        _params: &InitParams,
    ) -> Result<(), ShardletError> {
        let context = app.get().map_err(ContainerError::from)?;
        context.add_shardlet(Echo { app: None }, InitParams::new())?;
        context.add_client_verifier(
            |message: &dyn Message| {
                message_ref::<Frame>(message)
                    .map(|frame| frame.data.starts_with(b"HELLO"))
                    .unwrap_or(false)
            },
            true,
        );
        Ok(())
    }
}

async fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    timeout(WAIT, reader.read_line(&mut line))
        .await
        .expect("Timed out waiting for a line")
        .expect("Failed to read line");
    line
}

async fn expect_closed(reader: &mut BufReader<TcpStream>) {
    let mut rest = Vec::new();
    let read = timeout(WAIT, reader.read_to_end(&mut rest))
        .await
        .expect("Timed out waiting for close");
    assert!(read.map(|_| rest.is_empty()).unwrap_or(true));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_echo_round_trip_and_shutdown() {
    let container = ContainerFacade::new(ContainerConfig::default(), vec![Arc::new(EchoFactory)]);
    container.startup().await.expect("Failed to start container");
    assert_eq!(container.applications("echo").len(), 1);
    let addr = container
        .local_address_for("echo")
        .expect("Failed to find echo endpoint");

    let stream = TcpStream::connect(addr).await.expect("Failed to connect");
    let mut client = BufReader::new(stream);

    // The admission message is delivered too, so it is echoed
    client.get_mut().write_all(b"HELLO alice\r\n").await.expect("Failed to write");
    assert_eq!(read_line(&mut client).await, "HELLO alice\n");

    // Split writes are reassembled by the line framer
    client.get_mut().write_all(b"pi").await.expect("Failed to write");
    client.get_mut().flush().await.expect("Failed to flush");
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.get_mut().write_all(b"ng\n").await.expect("Failed to write");
    assert_eq!(read_line(&mut client).await, "ping\n");

    let contexts = container.applications("echo");
    assert_eq!(contexts[0].session_count(), 1);

    container.shutdown().await;
    expect_closed(&mut client).await;
    assert!(container.local_address_for("echo").is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_client_is_disconnected() {
    let container = ContainerFacade::new(ContainerConfig::default(), vec![Arc::new(EchoFactory)]);
    container.startup().await.expect("Failed to start container");
    let addr = container
        .local_address_for("echo")
        .expect("Failed to find echo endpoint");

    let stream = TcpStream::connect(addr).await.expect("Failed to connect");
    let mut client = BufReader::new(stream);
    client.get_mut().write_all(b"who goes there\n").await.expect("Failed to write");

    // Silent kick: no response, just a closed connection
    expect_closed(&mut client).await;
    assert_eq!(container.applications("echo")[0].session_count(), 0);

    container.shutdown().await;
}
