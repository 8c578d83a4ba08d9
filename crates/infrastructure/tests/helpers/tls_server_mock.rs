use super::builders::{answer_for, TestCert};
use super::dns_server_mock::{read_frame, write_frame};
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::BinEncodable;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;

/// DoT server on 127.0.0.1 presenting a self-signed certificate.
pub struct MockTlsServer {
    addr: SocketAddr,
    pub cert: TestCert,
    handshakes: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockTlsServer {
    pub async fn start(server_name: &str, alpn: &[&[u8]]) -> Self {
        let cert = TestCert::generate(server_name);
        let acceptor = TlsAcceptor::from(Arc::new(cert.server_config(alpn)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handshakes = Arc::new(AtomicUsize::new(0));
        let counter = handshakes.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let acceptor = acceptor.clone();
                        let counter = counter.clone();
                        tokio::spawn(async move {
                            let Ok(mut tls) = acceptor.accept(stream).await else { return };
                            counter.fetch_add(1, Ordering::SeqCst);
                            let Ok(query_bytes) = read_frame(&mut tls).await else { return };
                            let Ok(query) = Message::from_vec(&query_bytes) else { return };
                            let response = answer_for(&query).to_bytes().unwrap();
                            let _ = write_frame(&mut tls, &response).await;
                        });
                    }
                }
            }
        });

        Self {
            addr,
            cert,
            handshakes,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }
}

impl Drop for MockTlsServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
