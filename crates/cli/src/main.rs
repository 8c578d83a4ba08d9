use clap::Parser;
use ferrous_q_domain::{CliOverrides, TransportError};
use ferrous_q_infrastructure::dns::codec;
use ferrous_q_infrastructure::dns::transport::create_transport;
use hickory_proto::op::Message;
use hickory_proto::rr::RecordType;
use std::str::FromStr;
use std::time::Instant;
use tracing::{error, info};

mod bootstrap;

#[derive(Parser)]
#[command(name = "ferrous-q")]
#[command(version)]
#[command(about = "Send one DNS query through every configured transport")]
struct Cli {
    /// Name to query
    name: Option<String>,

    /// Record type (A, AAAA, TXT, ...)
    record_type: Option<String>,

    /// Configuration file path
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<String>,

    /// Upstream URL; repeat to query several. Replaces the configured list.
    #[arg(short = 'u', long = "upstream", value_name = "URL")]
    upstreams: Vec<String>,

    /// Deadline for each exchange, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// EDNS0 client subnet, e.g. 1.1.1.1/24 or 2001:db8::/48
    #[arg(long, value_name = "CIDR", conflicts_with = "no_subnet")]
    subnet: Option<String>,

    /// Send the query without an EDNS0 client subnet
    #[arg(long)]
    no_subnet: bool,
}

struct Outcome {
    tag: String,
    protocol: &'static str,
    result: Result<Message, TransportError>,
}

fn format_answers(response: &Message) -> String {
    let answers: Vec<String> = response
        .answers()
        .iter()
        .map(|record| record.data().to_string())
        .collect();
    if answers.is_empty() {
        format!("({:?}, no answers)", response.response_code())
    } else {
        answers.join(",")
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cli_overrides = CliOverrides {
        name: cli.name,
        record_type: cli.record_type,
        timeout_ms: cli.timeout_ms,
        log_level: cli.log_level,
        upstreams: cli.upstreams,
        subnet: cli.subnet,
        no_subnet: cli.no_subnet,
    };

    let config = bootstrap::load_config(cli.config.as_deref(), cli_overrides)?;
    bootstrap::init_logging(&config);

    let record_type = RecordType::from_str(&config.query.record_type.to_ascii_uppercase())
        .map_err(|e| anyhow::anyhow!("Invalid record type '{}': {}", config.query.record_type, e))?;
    let mut query = codec::build_query(&config.query.name, record_type)?;
    if let Some(subnet) = config.query.client_subnet()? {
        codec::set_client_subnet(&mut query, subnet.addr, subnet.source_prefix);
    }

    info!(
        name = %config.query.name,
        record_type = %record_type,
        timeout_ms = config.query.timeout_ms,
        subnet = config.query.subnet.as_deref().unwrap_or("-"),
        "Starting ferrous-q v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut exchanges = Vec::new();
    for (tag, transport_config) in config.transport_configs()? {
        let transport = match create_transport(&transport_config) {
            Ok(transport) => transport,
            Err(e) => {
                error!(tag = %tag, error = %e, "Failed to create transport");
                println!("{}\t-\t{}", tag, e);
                continue;
            }
        };
        let query = &query;
        exchanges.push(async move {
            let started = Instant::now();
            let result = transport.exchange(query).await;
            info!(
                tag = %tag,
                protocol = transport.protocol_name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                ok = result.is_ok(),
                "Exchange finished"
            );
            Outcome {
                tag,
                protocol: transport.protocol_name(),
                result,
            }
        });
    }

    let outcomes = futures::future::join_all(exchanges).await;

    let mut failures = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(response) => println!("{}\t{}\t-", outcome.tag, format_answers(response)),
            Err(e) => {
                failures += 1;
                error!(
                    tag = %outcome.tag,
                    protocol = outcome.protocol,
                    kind = e.kind_name(),
                    error = %e,
                    "Exchange failed"
                );
                println!("{}\t-\t{}", outcome.tag, e);
            }
        }
    }

    info!(
        total = outcomes.len(),
        failures, "All exchanges finished"
    );
    Ok(())
}
