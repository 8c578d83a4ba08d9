//! DNS message codec on top of `hickory-proto`.
//!
//! Transports move opaque bytes; this module is the only place that turns
//! a [`Message`] into wire format and back.

use ferrous_q_domain::TransportError;
use hickory_proto::op::{Edns, Message, MessageType, OpCode, Query};
use hickory_proto::rr::rdata::opt::{ClientSubnet, EdnsCode, EdnsOption};
use hickory_proto::rr::{DNSClass, Name, RecordType};
use hickory_proto::serialize::binary::{BinEncodable, BinEncoder};
use std::net::IpAddr;
use std::str::FromStr;

/// Smallest possible DNS message: the fixed 12-byte header.
pub const HEADER_LEN: usize = 12;

/// UDP payload size advertised once an OPT record is attached.
pub const EDNS_UDP_PAYLOAD: u16 = 1232;

/// Builds a recursive query with a random ID and a single IN-class question.
pub fn build_query(domain: &str, record_type: RecordType) -> Result<Message, TransportError> {
    let name = Name::from_str(domain).map_err(|e| {
        TransportError::InvalidConfig(format!("Invalid domain '{}': {}", domain, e))
    })?;

    let mut query = Query::new();
    query.set_name(name);
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);

    let mut message = Message::new(fastrand::u16(..), MessageType::Query, OpCode::Query);
    message.set_recursion_desired(true);
    message.add_query(query);
    Ok(message)
}

/// Adds an EDNS0 client subnet option, creating the OPT record if needed.
pub fn set_client_subnet(message: &mut Message, addr: IpAddr, source_prefix: u8) {
    let edns = message.extensions_mut().get_or_insert_with(|| {
        let mut edns = Edns::new();
        edns.set_max_payload(EDNS_UDP_PAYLOAD);
        edns
    });
    edns.options_mut()
        .insert(EdnsOption::Subnet(ClientSubnet::new(addr, source_prefix, 0)));
}

pub fn client_subnet(message: &Message) -> Option<ClientSubnet> {
    match message.extensions().as_ref()?.option(EdnsCode::Subnet)? {
        EdnsOption::Subnet(subnet) => Some(*subnet),
        _ => None,
    }
}

pub fn encode(message: &Message) -> Result<Vec<u8>, TransportError> {
    let mut buffer = Vec::with_capacity(512);
    let mut encoder = BinEncoder::new(&mut buffer);
    message
        .emit(&mut encoder)
        .map_err(|e| TransportError::Encode(e.to_string()))?;
    Ok(buffer)
}

/// Decodes a response, rejecting anything whose QR bit is clear.
pub fn decode_response(bytes: &[u8]) -> Result<Message, TransportError> {
    if bytes.len() < HEADER_LEN {
        return Err(TransportError::Decode(format!(
            "{} bytes is shorter than a DNS header",
            bytes.len()
        )));
    }

    let message = Message::from_vec(bytes).map_err(|e| TransportError::Decode(e.to_string()))?;

    if message.message_type() != MessageType::Response {
        return Err(TransportError::Decode(
            "received a query where a response was expected".into(),
        ));
    }

    Ok(message)
}

pub fn expect_id(response: &Message, expected: u16) -> Result<(), TransportError> {
    if response.id() != expected {
        return Err(TransportError::Decode(format!(
            "response ID {} does not match query ID {}",
            response.id(),
            expected
        )));
    }
    Ok(())
}

/// Rewrites the header ID in place; `Message` only exposes it through the header.
pub fn set_id(message: &mut Message, id: u16) {
    let mut header = *message.header();
    header.set_id(id);
    message.set_header(header);
}

/// Copy of `message` carrying a different ID. DoQ puts 0 on the wire.
pub fn with_id(message: &Message, id: u16) -> Message {
    let mut copy = message.clone();
    set_id(&mut copy, id);
    copy
}
