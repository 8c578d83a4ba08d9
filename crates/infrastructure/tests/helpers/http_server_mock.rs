use super::builders::{answer_for, TestCert};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::BinEncodable;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;

/// Body size past the largest DNS message.
pub const OVERSIZED_BODY_LEN: usize = 70_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpBehavior {
    Answer,
    Status(u16),
    ContentType(&'static str),
    /// Read the request, never answer.
    Stall,
    /// Answer with a body too large for a DNS message and no Content-Length.
    Oversized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HttpProtocol {
    Http1,
    Http2,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub content_type: Option<String>,
    pub accept: Option<String>,
    pub query: Vec<u8>,
}

/// Minimal DoH endpoint at `/dns-query`. HTTP/1.1 serves one request per
/// connection; HTTP/2 is prior knowledge in cleartext and ALPN "h2" over TLS.
pub struct MockHttpServer {
    addr: SocketAddr,
    pub cert: Option<TestCert>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockHttpServer {
    pub async fn start(behavior: HttpBehavior) -> Self {
        Self::start_inner(behavior, None, HttpProtocol::Http1).await
    }

    pub async fn start_tls(behavior: HttpBehavior, server_name: &str) -> Self {
        let cert = TestCert::generate(server_name);
        Self::start_inner(behavior, Some(cert), HttpProtocol::Http1).await
    }

    pub async fn start_h2(behavior: HttpBehavior) -> Self {
        Self::start_inner(behavior, None, HttpProtocol::Http2).await
    }

    pub async fn start_h2_tls(behavior: HttpBehavior, server_name: &str) -> Self {
        let cert = TestCert::generate(server_name);
        Self::start_inner(behavior, Some(cert), HttpProtocol::Http2).await
    }

    async fn start_inner(
        behavior: HttpBehavior,
        cert: Option<TestCert>,
        protocol: HttpProtocol,
    ) -> Self {
        let alpn: &[u8] = match protocol {
            HttpProtocol::Http1 => b"http/1.1",
            HttpProtocol::Http2 => b"h2",
        };
        let acceptor = cert
            .as_ref()
            .map(|c| TlsAcceptor::from(Arc::new(c.server_config(&[alpn]))));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let recorded = recorded.clone();
                        let acceptor = acceptor.clone();
                        tokio::spawn(async move {
                            match acceptor {
                                Some(acceptor) => {
                                    if let Ok(tls) = acceptor.accept(stream).await {
                                        serve(tls, protocol, behavior, recorded).await;
                                    }
                                }
                                None => serve(stream, protocol, behavior, recorded).await,
                            }
                        });
                    }
                }
            }
        });

        Self {
            addr,
            cert,
            requests,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn url(&self) -> String {
        let scheme = if self.cert.is_some() { "https" } else { "http" };
        format!("{}://{}/dns-query", scheme, self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockHttpServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

async fn serve<S>(
    stream: S,
    protocol: HttpProtocol,
    behavior: HttpBehavior,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    match protocol {
        HttpProtocol::Http1 => serve_http1(stream, behavior, recorded).await,
        HttpProtocol::Http2 => serve_h2(stream, behavior, recorded).await,
    }
}

fn query_bytes(method: &str, target: &str, body: Vec<u8>) -> Vec<u8> {
    if method == "GET" {
        target
            .split_once("dns=")
            .map(|(_, encoded)| encoded.split('&').next().unwrap_or_default())
            .and_then(|encoded| URL_SAFE_NO_PAD.decode(encoded).ok())
            .unwrap_or_default()
    } else {
        body
    }
}

/// Status, content type and body for `query_bytes`, or `None` to stall.
fn reply_for(behavior: HttpBehavior, query_bytes: &[u8]) -> Option<(u16, &'static str, Vec<u8>)> {
    let Ok(query) = Message::from_vec(query_bytes) else {
        return Some((400, "text/plain", b"bad query".to_vec()));
    };
    let answer = answer_for(&query).to_bytes().unwrap();
    match behavior {
        HttpBehavior::Answer => Some((200, "application/dns-message", answer)),
        HttpBehavior::Status(code) => Some((code, "text/plain", b"unavailable".to_vec())),
        HttpBehavior::ContentType(ct) => Some((200, ct, answer)),
        HttpBehavior::Stall => None,
        HttpBehavior::Oversized => Some((200, "application/dns-message", vec![0; OVERSIZED_BODY_LEN])),
    }
}

async fn serve_http1<S>(
    mut stream: S,
    behavior: HttpBehavior,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = Vec::new();
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let mut chunk = [0u8; 1024];
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split(' ');
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let content_length: usize = header(&headers, "content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = [0u8; 1024];
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => body.extend_from_slice(&chunk[..n]),
        }
    }

    let query = query_bytes(&method, &target, body);
    recorded.lock().unwrap().push(RecordedRequest {
        method,
        target,
        content_type: header(&headers, "content-type").map(str::to_string),
        accept: header(&headers, "accept").map(str::to_string),
        query: query.clone(),
    });

    let Some((status, content_type, payload)) = reply_for(behavior, &query) else {
        // Hold the connection until the client gives up.
        let _ = stream.read(&mut [0u8; 1]).await;
        return;
    };

    if behavior == HttpBehavior::Oversized {
        let head = format!(
            "HTTP/1.1 {} Mock\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
            status, content_type
        );
        let _ = stream.write_all(head.as_bytes()).await;
        for chunk in payload.chunks(8192) {
            let _ = stream.write_all(format!("{:x}\r\n", chunk.len()).as_bytes()).await;
            let _ = stream.write_all(chunk).await;
            let _ = stream.write_all(b"\r\n").await;
        }
        let _ = stream.write_all(b"0\r\n\r\n").await;
    } else {
        let head = format!(
            "HTTP/1.1 {} Mock\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status,
            content_type,
            payload.len()
        );
        let _ = stream.write_all(head.as_bytes()).await;
        let _ = stream.write_all(&payload).await;
    }
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}

async fn serve_h2<S>(stream: S, behavior: HttpBehavior, recorded: Arc<Mutex<Vec<RecordedRequest>>>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let Ok(mut conn) = h2::server::handshake(stream).await else { return };

    while let Some(Ok((request, mut respond))) = conn.accept().await {
        let recorded = recorded.clone();
        tokio::spawn(async move {
            let (parts, mut body) = request.into_parts();
            let mut data = Vec::new();
            while let Some(Ok(chunk)) = body.data().await {
                let _ = body.flow_control().release_capacity(chunk.len());
                data.extend_from_slice(&chunk);
            }

            let method = parts.method.as_str().to_string();
            let target = parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_default();
            let header = |name: http::header::HeaderName| {
                parts
                    .headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };
            let query = query_bytes(&method, &target, data);
            recorded.lock().unwrap().push(RecordedRequest {
                method,
                target,
                content_type: header(http::header::CONTENT_TYPE),
                accept: header(http::header::ACCEPT),
                query: query.clone(),
            });

            let Some((status, content_type, payload)) = reply_for(behavior, &query) else {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
                drop(respond);
                return;
            };

            let response = http::Response::builder()
                .status(status)
                .header(http::header::CONTENT_TYPE, content_type)
                .body(())
                .unwrap();
            let Ok(mut send) = respond.send_response(response, false) else { return };
            let _ = send.send_data(Bytes::from(payload), true);
        });
    }
}
