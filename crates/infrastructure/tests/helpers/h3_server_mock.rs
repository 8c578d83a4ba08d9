use super::builders::{answer_for, TestCert};
use super::http_server_mock::RecordedRequest;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::{Buf, Bytes};
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::BinEncodable;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

type H3Stream = h3::server::RequestStream<h3_quinn::BidiStream<Bytes>, Bytes>;

/// DoH over HTTP/3 at `/dns-query`, answering every query with one A record.
pub struct MockH3Server {
    endpoint: quinn::Endpoint,
    pub cert: TestCert,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockH3Server {
    pub async fn start(server_name: &str) -> Self {
        let cert = TestCert::generate(server_name);
        let tls = cert.server_config(&[b"h3"]);
        let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(Arc::new(tls)).unwrap();
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
        let endpoint =
            quinn::Endpoint::server(server_config, "127.0.0.1:0".parse().unwrap()).unwrap();

        let requests = Arc::new(Mutex::new(Vec::new()));
        let accept_endpoint = endpoint.clone();
        let recorded = requests.clone();
        tokio::spawn(async move {
            while let Some(incoming) = accept_endpoint.accept().await {
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let Ok(conn) = incoming.await else { return };
                    let Ok(mut h3_conn) =
                        h3::server::Connection::<_, Bytes>::new(h3_quinn::Connection::new(conn))
                            .await
                    else {
                        return;
                    };

                    while let Ok(Some(resolver)) = h3_conn.accept().await {
                        let Ok((request, stream)) = resolver.resolve_request().await else {
                            continue;
                        };
                        let recorded = recorded.clone();
                        tokio::spawn(serve_request(request, stream, recorded));
                    }
                });
            }
        });

        Self {
            endpoint,
            cert,
            requests,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.endpoint.local_addr().unwrap()
    }

    pub fn url(&self) -> String {
        format!("https://{}/dns-query", self.addr())
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for MockH3Server {
    fn drop(&mut self) {
        self.endpoint.close(0u32.into(), b"");
    }
}

async fn serve_request(
    request: http::Request<()>,
    mut stream: H3Stream,
    recorded: Arc<Mutex<Vec<RecordedRequest>>>,
) {
    let mut body = Vec::new();
    while let Ok(Some(mut chunk)) = stream.recv_data().await {
        while chunk.has_remaining() {
            let bytes = chunk.chunk();
            body.extend_from_slice(bytes);
            let len = bytes.len();
            chunk.advance(len);
        }
    }

    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();
    let query = if request.method() == http::Method::GET {
        target
            .split_once("dns=")
            .map(|(_, encoded)| encoded.split('&').next().unwrap_or_default())
            .and_then(|encoded| URL_SAFE_NO_PAD.decode(encoded).ok())
            .unwrap_or_default()
    } else {
        body
    };
    let header = |name: http::header::HeaderName| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    recorded.lock().unwrap().push(RecordedRequest {
        method: request.method().as_str().to_string(),
        target: target.clone(),
        content_type: header(http::header::CONTENT_TYPE),
        accept: header(http::header::ACCEPT),
        query: query.clone(),
    });

    let Ok(query) = Message::from_vec(&query) else { return };
    let answer = answer_for(&query).to_bytes().unwrap();

    let response = http::Response::builder()
        .status(200)
        .header(http::header::CONTENT_TYPE, "application/dns-message")
        .body(())
        .unwrap();
    if stream.send_response(response).await.is_err() {
        return;
    }
    if stream.send_data(Bytes::from(answer)).await.is_err() {
        return;
    }
    let _ = stream.finish().await;
}
