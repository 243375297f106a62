//! Dial-out telemetry listener and per-connection receive loop.
//!
//! Devices connect and push length-delimited `SubscribeResponse` frames
//! (4-byte big-endian length prefix followed by the protobuf message). Each
//! accepted connection registers its peer IP in the session registry, runs
//! an independent receive loop feeding the flatten/dispatch pipeline, and
//! unregisters exactly once when the loop exits.

use std::sync::Arc;

use prost::Message;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tracing::{debug, error, info, warn};

use optiwatch_common::gnmi::{SubscribeResponse, subscribe_response::Response};
use optiwatch_common::path::walk_notification;

use crate::catalogue::MetricStore;
use crate::config::DialoutConfig;
use crate::dispatch::Dispatcher;
use crate::registry::{RegistryError, SessionRegistry};

/// Why a dial-out session ended. Every variant terminates only the affected
/// connection.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no peer address on accepted connection")]
    PeerUnresolved,

    #[error("duplicate dial-out session from {0}")]
    Duplicate(String),

    /// The peer closed the stream at a frame boundary. Devices are expected
    /// to hold the channel open, so a clean end is still an abnormal outcome.
    #[error("stream ended by peer")]
    StreamEnded,

    #[error("frame of {got} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { got: usize, limit: usize },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Read one length-delimited frame. Returns `None` on a clean end of stream
/// (EOF at a frame boundary); EOF in the middle of a frame is a transport
/// error.
pub async fn read_frame<R>(reader: &mut R, max_frame: usize) -> Result<Option<Vec<u8>>, SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(SessionError::Transport(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_frame {
        return Err(SessionError::FrameTooLarge {
            got: len,
            limit: max_frame,
        });
    }

    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

/// Write one length-delimited frame.
pub async fn write_frame<W>(writer: &mut W, message: &SubscribeResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = message.encode_to_vec();
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    Ok(())
}

/// The Active state: receive frames until the stream ends or errors,
/// feeding every notification through the flatten/dispatch pipeline.
/// Per-update decode failures are logged and skipped; they never terminate
/// the stream.
async fn receive_loop<R>(
    mut stream: R,
    store: &MetricStore,
    dispatcher: &Dispatcher,
    max_frame: usize,
    device: &str,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = match read_frame(&mut stream, max_frame).await? {
            Some(frame) => frame,
            None => return Err(SessionError::StreamEnded),
        };

        let response = SubscribeResponse::decode(frame.as_slice())?;
        match response.response {
            Some(Response::Update(notification)) => {
                walk_notification(
                    &notification,
                    |fqn, _ts, payload| {
                        for e in dispatcher.dispatch(store, fqn, payload) {
                            warn!(device, path = fqn, error = %e, "failed to decode metric update");
                        }
                    },
                    |fqn, _ts| {
                        debug!(device, path = fqn, "ignoring delete");
                    },
                );
            }
            Some(Response::SyncResponse(done)) => {
                debug!(device, done, "sync response received");
            }
            None => {
                debug!(device, "empty dial-out message ignored");
            }
        }
    }
}

/// Handle one accepted connection through its full session lifecycle:
/// resolve the peer, register, run the receive loop, unregister.
async fn handle_connection(
    stream: TcpStream,
    registry: &SessionRegistry,
    dispatcher: &Dispatcher,
    max_frame: usize,
) -> Result<(), SessionError> {
    let peer = stream
        .peer_addr()
        .map_err(|_| SessionError::PeerUnresolved)?;
    // Only the IP identifies the device; the port changes per connection.
    let device = peer.ip().to_string();

    let store = match registry.register(&device) {
        Ok(store) => store,
        Err(RegistryError::AlreadyExists(addr)) => {
            return Err(SessionError::Duplicate(addr));
        }
    };
    info!(device = %device, "dial-out session registered");

    let result = receive_loop(stream, &store, dispatcher, max_frame, &device).await;

    registry.unregister(&device);
    info!(device = %device, "dial-out session terminated");
    result
}

/// The dial-out ingest server: a bound TCP listener plus the shared session
/// registry and dispatch table.
pub struct DialoutServer {
    listener: TcpListener,
    config: DialoutConfig,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<Dispatcher>,
}

impl DialoutServer {
    /// Bind the configured listen address. Failure here is fatal to the
    /// process (bootstrap error), unlike anything that happens on accepted
    /// connections.
    pub async fn bind(
        config: DialoutConfig,
        registry: Arc<SessionRegistry>,
        dispatcher: Arc<Dispatcher>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(&config.listen)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind dial-out listener {}: {}", config.listen, e))?;

        info!(
            addr = %listener.local_addr()?,
            max_connections = config.max_connections,
            "dial-out listener started"
        );

        Ok(Self {
            listener,
            config,
            registry,
            dispatcher,
        })
    }

    /// The bound listen address.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the shutdown signal fires. Each connection
    /// runs on its own task; connections beyond the configured maximum are
    /// dropped before they register.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_connections));
        let max_frame = self.config.max_frame_bytes;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let permit = semaphore.clone().try_acquire_owned();
                            match permit {
                                Ok(permit) => {
                                    let registry = self.registry.clone();
                                    let dispatcher = self.dispatcher.clone();
                                    tokio::spawn(async move {
                                        let _permit = permit;
                                        if let Err(e) = handle_connection(
                                            stream,
                                            &registry,
                                            &dispatcher,
                                            max_frame,
                                        )
                                        .await
                                        {
                                            match e {
                                                SessionError::Duplicate(_) => {
                                                    error!(peer = %addr, "{}, rejecting", e);
                                                }
                                                SessionError::StreamEnded => {
                                                    info!(peer = %addr, "{}", e);
                                                }
                                                e => {
                                                    warn!(peer = %addr, error = %e, "dial-out session failed");
                                                }
                                            }
                                        }
                                    });
                                }
                                Err(_) => {
                                    warn!(peer = %addr, "max dial-out connections reached, rejecting");
                                    drop(stream);
                                }
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "dial-out accept error");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("dial-out listener stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optiwatch_common::gnmi::{Notification, TypedValue, Update, typed_value};
    use optiwatch_common::path::parse_path;

    fn json_update(path: &str, payload: &str) -> Update {
        Update {
            path: Some(parse_path(path)),
            val: Some(TypedValue {
                value: Some(typed_value::Value::JsonIetfVal(payload.as_bytes().to_vec())),
            }),
        }
    }

    fn update_response(notification: Notification) -> SubscribeResponse {
        SubscribeResponse {
            response: Some(Response::Update(notification)),
        }
    }

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let message = SubscribeResponse {
            response: Some(Response::SyncResponse(true)),
        };
        write_frame(&mut client, &message).await.unwrap();

        let frame = read_frame(&mut server, 1024).await.unwrap().unwrap();
        let decoded = SubscribeResponse::decode(frame.as_slice()).unwrap();
        assert_eq!(decoded, message);
    }

    #[tokio::test]
    async fn test_read_frame_clean_eof() {
        let (client, mut server) = tokio::io::duplex(16);
        drop(client);

        assert!(read_frame(&mut server, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_eof_mid_frame_is_transport_error() {
        let (mut client, mut server) = tokio::io::duplex(64);

        // Announce an 8-byte frame but deliver only 3 bytes.
        client.write_all(&8u32.to_be_bytes()).await.unwrap();
        client.write_all(&[1, 2, 3]).await.unwrap();
        drop(client);

        let err = read_frame(&mut server, 1024).await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
    }

    #[tokio::test]
    async fn test_read_frame_too_large() {
        let (mut client, mut server) = tokio::io::duplex(64);

        client.write_all(&1024u32.to_be_bytes()).await.unwrap();

        let err = read_frame(&mut server, 16).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::FrameTooLarge { got: 1024, limit: 16 }
        ));
    }

    #[tokio::test]
    async fn test_receive_loop_updates_store_and_reports_stream_end() {
        let (mut client, server) = tokio::io::duplex(4096);
        let store = MetricStore::new();
        let dispatcher = Dispatcher::standard();

        let notification = Notification {
            timestamp: 0,
            prefix: Some(parse_path("/openconfig-platform:components")),
            update: vec![json_update(
                "/component[name=FAN-1-33]/fan/state",
                "{\"speed\": 11820}",
            )],
            delete: vec![],
        };
        write_frame(&mut client, &update_response(notification))
            .await
            .unwrap();
        drop(client);

        let err = receive_loop(server, &store, &dispatcher, 4096, "test")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::StreamEnded));
        assert_eq!(store.fan_rpm.value(&["FAN-1-33"]), Some(11820.0));
    }

    #[tokio::test]
    async fn test_receive_loop_survives_bad_updates() {
        let (mut client, server) = tokio::io::duplex(4096);
        let store = MetricStore::new();
        let dispatcher = Dispatcher::standard();

        // First update malformed, second fine: the stream keeps going and
        // the second lands.
        let notification = Notification {
            timestamp: 0,
            prefix: Some(parse_path("/openconfig-platform:components")),
            update: vec![
                json_update("/component[name=FAN-1-33]/fan/state", "not json"),
                json_update("/component[name=FAN-1-34]/fan/state", "{\"speed\": 200}"),
            ],
            delete: vec![],
        };
        write_frame(&mut client, &update_response(notification))
            .await
            .unwrap();
        drop(client);

        let err = receive_loop(server, &store, &dispatcher, 4096, "test")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::StreamEnded));
        assert!(store.fan_rpm.value(&["FAN-1-33"]).is_none());
        assert_eq!(store.fan_rpm.value(&["FAN-1-34"]), Some(200.0));
    }

    #[tokio::test]
    async fn test_receive_loop_malformed_frame_fails_connection() {
        let (mut client, server) = tokio::io::duplex(4096);
        let store = MetricStore::new();
        let dispatcher = Dispatcher::standard();

        // A frame that is not a valid protobuf message.
        client.write_all(&4u32.to_be_bytes()).await.unwrap();
        client.write_all(&[0xff, 0xff, 0xff, 0xff]).await.unwrap();

        let err = receive_loop(server, &store, &dispatcher, 4096, "test")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Decode(_)));
    }
}
