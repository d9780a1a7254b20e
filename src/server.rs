use bytes::Bytes;
use std::future::Future;
use std::net::SocketAddr;
use std::str;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::EnvFilter;

use crate::aof::{self, Aof};
use crate::codec::FrameCodec;
use crate::config::Config;
use crate::connection::Connection;
use crate::db::Database;
use crate::frame::{self, Frame};
use crate::Error;

/// Runs the server until ctrl-c is received.
pub async fn run(config: Config) -> Result<(), Error> {
    run_until(config, async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
        }
    })
    .await
}

/// Runs the server until `shutdown` completes.
pub async fn run_until(config: Config, shutdown: impl Future<Output = ()>) -> Result<(), Error> {
    init_tracing();

    let listener = TcpListener::bind(config.address()).await?;
    serve(listener, config, shutdown).await
}

/// Serves clients from an already bound listener until `shutdown` completes, then waits for
/// open connections to wind down and closes the append-only file.
pub async fn serve(
    listener: TcpListener,
    config: Config,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Error> {
    let db = Arc::new(open_database(&config).await?);
    let limit = Arc::new(Semaphore::new(config.max_connections));
    let connections = Arc::new(AtomicUsize::new(0));
    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();

    let settings = Settings {
        idle_timeout: (config.timeout > 0).then(|| Duration::from_secs(config.timeout)),
        max_frame_size: config.max_frame_size,
    };

    info!("Server listening on {}", listener.local_addr()?);

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
            Some(joined) = tasks.join_next() => {
                if let Err(e) = joined {
                    error!("Connection task failed: {}", e);
                }
            }
            accepted = accept(&listener, &limit) => {
                let (socket, client_address, permit) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                let live = connections.fetch_add(1, Ordering::Relaxed) + 1;
                info!(connections = live, "Accepted connection from {:?}", client_address);

                let db = db.clone();
                let connections = connections.clone();
                let cancel = cancel.clone();

                tasks.spawn(async move {
                    if let Err(e) =
                        handle_connection(socket, client_address, db, settings, cancel).await
                    {
                        debug!("Connection error from {}: {}", client_address, e);
                    }
                    connections.fetch_sub(1, Ordering::Relaxed);
                    drop(permit);
                });
            }
        }
    }

    cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Connection task failed: {}", e);
        }
    }

    db.close().await?;
    info!("Server stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| debug!("Failed to initialize global tracing: {}", e));
}

/// Rebuilds the data set from the append-only file before the file is opened for writing.
async fn open_database(config: &Config) -> Result<Database, Error> {
    let db = Database::new(config.capacity);

    if !config.appendonly {
        return Ok(db);
    }

    let applied = aof::replay(&config.appendfilename, &db).await?;
    info!(applied, "Loaded data from the append-only file");

    let aof = Aof::open(&config.appendfilename, config.appendfsync)?;
    Ok(db.with_aof(aof))
}

async fn accept(
    listener: &TcpListener,
    limit: &Arc<Semaphore>,
) -> Result<(TcpStream, SocketAddr, OwnedSemaphorePermit), Error> {
    let permit = limit.clone().acquire_owned().await?;
    let (socket, client_address) = listener.accept().await?;
    Ok((socket, client_address, permit))
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    idle_timeout: Option<Duration>,
    max_frame_size: usize,
}

#[instrument(
    name = "connection",
    skip(stream, db, settings, cancel),
    fields(connection_id, client_address)
)]
async fn handle_connection(
    stream: TcpStream,
    client_address: SocketAddr,
    db: Arc<Database>,
    settings: Settings,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let mut conn = Connection::with_codec(stream, FrameCodec::new(settings.max_frame_size));
    if let Some(timeout) = settings.idle_timeout {
        conn = conn.with_idle_timeout(timeout);
    }

    tracing::Span::current()
        .record("connection_id", conn.id.to_string())
        .record("client_address", client_address.to_string());

    // Every connection starts on partition 0 and moves with SELECT.
    let mut selected = 0;

    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Closing connection, server is shutting down");
                break;
            }
            item = conn.read_frame() => item,
        };

        let frame = match item {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                warn!("Protocol error: {}", e);
                conn.write_frame(protocol_error(&e)).await?;
                continue;
            }
            Ok(None) => break,
            Err(frame::Error::Io(e)) => {
                debug!("Connection read failed: {}", e);
                break;
            }
            Err(e) => {
                warn!("Protocol error, closing connection: {}", e);
                conn.write_frame(protocol_error(&e)).await?;
                break;
            }
        };

        debug!("Received frame from client: {}", frame);

        let res = match frame.into_args() {
            Some(args) => execute(&db, &mut selected, args),
            None => Frame::Error("ERR Protocol error: expected an array of bulk strings".to_string()),
        };

        debug!("Sending response to client: {}", res);
        conn.write_frame(res).await?;
    }

    info!("Connection closed");
    Ok(())
}

/// Runs a command on the selected partition, switching partitions after a successful SELECT.
fn execute(db: &Database, selected: &mut usize, args: Vec<Bytes>) -> Frame {
    let select = match &args[..] {
        [name, index] if name.eq_ignore_ascii_case(b"SELECT") => str::from_utf8(index)
            .ok()
            .and_then(|index| index.parse::<i64>().ok())
            .and_then(|index| usize::try_from(index).ok()),
        _ => None,
    };

    match db.exec(*selected, args) {
        Ok(res) => {
            if let Some(index) = select {
                *selected = index;
            }
            res
        }
        Err(e) => Frame::Error(e.to_string()),
    }
}

fn protocol_error(err: &frame::Error) -> Frame {
    Frame::Error(format!("ERR Protocol error: {}", err))
}
