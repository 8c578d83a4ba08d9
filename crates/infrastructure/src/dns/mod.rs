pub mod codec;
pub mod transport;

pub use transport::{create_transport, DnsTransport, Transport};
