use anyhow::{bail, Context, Result};
use std::time::Duration;
use tokio_host_ping::{IcmpTransport, PingConfiguration, Pinger};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: ping <host> [--count n] [--timeout ms] [--resolution_timeout ms] \
                     [--size bytes] [--ttl n] [--family any|ipv4|ipv6] [--config file.json]";

fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    let pos = args.iter().position(|r| r == name)?;
    args.get(pos + 1).map(String::as_str)
}

fn load_configuration(args: &[String]) -> Result<PingConfiguration> {
    match flag_value(args, "--config") {
        Some(path) => {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read configuration {}", path))?;
            PingConfiguration::from_json(&data)
                .with_context(|| format!("Bad configuration {}", path))
        }
        None => PingConfiguration::from_args(args).map_err(anyhow::Error::msg),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let target = args
        .get(1)
        .filter(|arg| !arg.starts_with("--"))
        .context(USAGE)?;
    let conf = load_configuration(&args)?;
    debug!("Configuration: {:?}", conf);
    let count: u32 = match flag_value(&args, "--count") {
        Some(count) => count.parse().context("Bad --count value")?,
        None => 1,
    };

    let pinger = Pinger::new(conf);
    let address = pinger
        .resolver()
        .resolve_family(target, conf.family)
        .await?;
    println!("PING {} ({}): {} bytes", target, address, conf.size);

    let mut transport = IcmpTransport::connect(&address, &conf)?;
    let mut replies = 0;
    for i in 0..count {
        let packet = transport.echo_packet()?;
        let sequence = packet.sequence;
        debug!("Sending echo request {} to {}", sequence, address);
        match transport.send(packet).await {
            Ok(latency) => {
                replies += 1;
                println!(
                    "reply from {}: icmp_seq={} time={:.3} ms",
                    address,
                    sequence,
                    latency.as_secs_f64() * 1000.0
                );
            }
            Err(error) => println!("{}: icmp_seq={} {}", address, sequence, error),
        }
        if i + 1 < count {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
    transport.stop();
    info!("{} echo requests sent to {}, {} replies", count, address, replies);

    println!("{} sent, {} received", count, replies);
    if replies == 0 {
        bail!("No reply from {}", target);
    }
    Ok(())
}
