use std::{convert::Infallible, fmt::Display, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use chrono::Utc;
use http_body_util::{BodyExt as _, Full};
use hyper::{
    Request, Response, StatusCode,
    body::{Body, Incoming},
    header::{self, HeaderValue},
    service::service_fn,
};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder as ConnectionBuilder,
};
use tokio::{net::TcpListener, sync::oneshot};
use tracing::Instrument as _;

use crate::{config::Config, record::Record, storage::LogDir};

const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";

#[derive(Debug)]
pub struct ServerHandle {
    pub listen_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    join: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stops accepting connections. Requests already in flight finish on
    /// their own tasks.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.join.await;
    }
}

#[derive(Debug)]
struct SinkState {
    log_dir: LogDir,
    max_body_bytes: Option<usize>,
}

pub async fn serve(config: &Config) -> anyhow::Result<ServerHandle> {
    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", config.listen))?;
    let listen_addr = listener
        .local_addr()
        .map_err(|err| anyhow::anyhow!("get local_addr: {err}"))?;

    let state = Arc::new(SinkState {
        log_dir: LogDir::from_config(config),
        max_body_bytes: config.max_body_bytes,
    });
    tracing::info!(
        listen = %listen_addr,
        log_dir = %state.log_dir.path().display(),
        max_body_bytes = ?state.max_body_bytes,
        "request sink listening"
    );

    let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                accept = listener.accept() => {
                    let (stream, peer) = match accept {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::debug!("accept error: {err}");
                            continue;
                        }
                    };
                    let io = TokioIo::new(stream);
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            capture_handler(req, Arc::clone(&state))
                        });
                        let builder = ConnectionBuilder::new(TokioExecutor::new());
                        if let Err(err) = builder.serve_connection(io, service).await {
                            tracing::debug!(peer = %peer, "connection error: {err}");
                        }
                    });
                }
            }
        }
    });

    Ok(ServerHandle {
        listen_addr,
        shutdown_tx,
        join,
    })
}

async fn capture_handler<B>(
    req: Request<B>,
    state: Arc<SinkState>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Display,
{
    let request_span = tracing::info_span!(
        "sink.request",
        method = %req.method(),
        url = %req.uri(),
    );
    Ok(capture_and_persist(req, &state)
        .instrument(request_span)
        .await)
}

async fn capture_and_persist<B>(req: Request<B>, state: &SinkState) -> Response<Full<Bytes>>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Display,
{
    let (parts, body) = req.into_parts();

    let body_bytes = match read_body_with_limit(body, state.max_body_bytes).await {
        Ok(body_bytes) => body_bytes,
        Err(BodyReadError::TooLarge { limit_bytes }) => {
            tracing::warn!("request body exceeded configured limit of {limit_bytes} bytes");
            return simple_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                &format!("request body exceeds configured limit of {limit_bytes} bytes"),
            );
        }
        Err(BodyReadError::Read(message)) => {
            tracing::warn!("failed to read request body: {message}");
            return simple_response(StatusCode::BAD_REQUEST, &message);
        }
    };

    let record = Record::capture(&parts, &body_bytes, Utc::now());
    match state.log_dir.write_record(record).await {
        Ok(path) => {
            tracing::info!(
                path = %path.display(),
                body_bytes = body_bytes.len(),
                "captured request"
            );
            Response::new(Full::new(Bytes::new()))
        }
        Err(err) => {
            let message = format!("{err:#}");
            tracing::warn!("failed to persist request: {message}");
            simple_response(StatusCode::INTERNAL_SERVER_ERROR, &message)
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum BodyReadError {
    Read(String),
    TooLarge { limit_bytes: usize },
}

async fn read_body_with_limit<B>(
    mut body: B,
    max_body_bytes: Option<usize>,
) -> Result<Bytes, BodyReadError>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Display,
{
    let mut buffered = Vec::new();
    while let Some(frame_result) = body.frame().await {
        let frame = frame_result.map_err(|err| BodyReadError::Read(err.to_string()))?;
        let Ok(data) = frame.into_data() else {
            continue;
        };
        if let Some(limit_bytes) = max_body_bytes
            && buffered.len().saturating_add(data.len()) > limit_bytes
        {
            return Err(BodyReadError::TooLarge { limit_bytes });
        }
        buffered.extend_from_slice(&data);
    }

    Ok(Bytes::from(buffered))
}

fn simple_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_owned())));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(TEXT_PLAIN_UTF8),
    );
    response
}
