use super::builders::answer_for;
use ferrous_q_infrastructure::dns::codec;
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::BinEncodable;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UdpBehavior {
    Answer,
    Truncated,
    WrongId,
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpBehavior {
    Answer,
    CloseMidFrame,
    Stall,
}

pub struct MockUdpServer {
    addr: SocketAddr,
    queries: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockUdpServer {
    pub async fn start(behavior: UdpBehavior) -> Self {
        Self::start_on("127.0.0.1:0".parse().unwrap(), behavior)
            .await
            .unwrap()
    }

    pub async fn start_on(addr: SocketAddr, behavior: UdpBehavior) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        let queries = Arc::new(AtomicUsize::new(0));
        let counter = queries.clone();

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    result = socket.recv_from(&mut buf) => {
                        let Ok((len, peer)) = result else { continue };
                        counter.fetch_add(1, Ordering::SeqCst);
                        let Ok(query) = Message::from_vec(&buf[..len]) else { continue };
                        let mut response = answer_for(&query);
                        match behavior {
                            UdpBehavior::Answer => {}
                            UdpBehavior::Truncated => {
                                response.set_truncated(true);
                                let _ = response.take_answers();
                            }
                            UdpBehavior::WrongId => codec::set_id(&mut response, query.id().wrapping_add(1)),
                            UdpBehavior::Silent => continue,
                        }
                        let _ = socket.send_to(&response.to_bytes().unwrap(), peer).await;
                    }
                }
            }
        });

        Ok(Self {
            addr: local_addr,
            queries,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl Drop for MockUdpServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub struct MockTcpServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockTcpServer {
    pub async fn start(behavior: TcpBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener, behavior)
    }

    /// UDP and TCP servers sharing one port, as a real resolver would.
    pub async fn start_pair(
        udp_behavior: UdpBehavior,
        tcp_behavior: TcpBehavior,
    ) -> (MockUdpServer, MockTcpServer) {
        for _ in 0..20 {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            if let Ok(udp) = MockUdpServer::start_on(addr, udp_behavior).await {
                return (udp, Self::serve(listener, tcp_behavior));
            }
        }
        panic!("could not bind UDP and TCP on the same port");
    }

    fn serve(listener: TcpListener, behavior: TcpBehavior) -> Self {
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(handle_tcp(stream, behavior));
                    }
                }
            }
        });

        Self {
            addr,
            connections,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockTcpServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn read_frame<S: AsyncReadExt + Unpin>(stream: &mut S) -> std::io::Result<Vec<u8>> {
    let len = stream.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

pub async fn write_frame<S: AsyncWriteExt + Unpin>(stream: &mut S, bytes: &[u8]) -> std::io::Result<()> {
    stream.write_u16(bytes.len() as u16).await?;
    stream.write_all(bytes).await?;
    stream.flush().await
}

async fn handle_tcp(mut stream: TcpStream, behavior: TcpBehavior) {
    let Ok(query_bytes) = read_frame(&mut stream).await else {
        return;
    };
    let Ok(query) = Message::from_vec(&query_bytes) else {
        return;
    };
    let response = answer_for(&query).to_bytes().unwrap();

    match behavior {
        TcpBehavior::Answer => {
            let _ = write_frame(&mut stream, &response).await;
        }
        TcpBehavior::CloseMidFrame => {
            let _ = stream.write_u16(response.len() as u16).await;
            let _ = stream.write_all(&response[..response.len() / 2]).await;
            let _ = stream.shutdown().await;
        }
        TcpBehavior::Stall => {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        }
    }
}
