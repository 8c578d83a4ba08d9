#![allow(dead_code)]
#![allow(unused_imports)]

pub mod dns_server_mock;
pub mod http_server_mock;
pub mod tls_server_mock;


#[cfg(feature = "dns-over-h3")]
pub mod h3_server_mock;


pub use builders::{
    answer_for, assert_subnet_echoed, query_for, subnet_query_for, transport_config, TestCert,
    ANSWER_IP,
};
pub use dns_server_mock::{MockTcpServer, MockUdpServer, TcpBehavior, UdpBehavior};
pub use http_server_mock::{HttpBehavior, MockHttpServer};
pub use tls_server_mock::MockTlsServer;
