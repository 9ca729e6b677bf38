//! Replay command implementation for the divert CLI
//!
//! Feeds captured packets through a real diversion context and prints what
//! a consumer would receive.

use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use rust_divert::{CapturedPacket, Direction, DivertConfig, DivertContext, Verdict};
use std::path::Path;
use std::time::Duration;
use tokio::time::timeout;

use crate::rules::load_wire;
use crate::utils::{format_bytes, format_hex, parse_hex, print_header};

/// Interface index reported for replayed packets.
const REPLAY_IF_IDX: u32 = 1;

/// How long to wait for a queued packet before giving up.
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// One line of a packet file.
#[derive(Debug)]
struct ReplayPacket {
    direction: Direction,
    data: Vec<u8>,
}

fn parse_line(line: &str) -> Result<Option<ReplayPacket>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (tag, hex) = line
        .split_once(char::is_whitespace)
        .context("expected '<in|out> <hex>'")?;
    let direction = match tag {
        "in" => Direction::Inbound,
        "out" => Direction::Outbound,
        other => bail!("unknown direction '{}'", other),
    };
    Ok(Some(ReplayPacket {
        direction,
        data: parse_hex(hex)?,
    }))
}

fn load_packets(path: &Path) -> Result<Vec<ReplayPacket>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut packets = Vec::new();
    for (number, line) in text.lines().enumerate() {
        if let Some(packet) = parse_line(line).with_context(|| format!("line {}", number + 1))? {
            packets.push(packet);
        }
    }
    Ok(packets)
}

/// Classify every packet, then drain the queue
pub async fn handle_command(
    rules: &Path,
    packets: &Path,
    config: Option<&Path>,
    max_len: usize,
) -> Result<()> {
    let config = DivertConfig::load(config).context("Failed to load configuration")?;
    let wire = load_wire(rules)?;
    let packets = load_packets(packets)?;
    info!("Replaying {} packets", packets.len());

    let context = DivertContext::from_config(&config)?;
    let plan = context.start_filter(&wire).context("Failed to start filter")?;
    debug!("Hook plan: {}", plan);

    print_header("Classification");
    for (i, packet) in packets.iter().enumerate() {
        let captured = CapturedPacket::new(&packet.data, packet.direction, REPLAY_IF_IDX, 0);
        let verdict = match context.classify(&captured) {
            Verdict::Permit => "permit",
            Verdict::Absorb => "absorb",
        };
        println!("#{} {} {}: {}", i + 1, packet.direction, format_bytes(packet.data.len()), verdict);
    }

    print_header("Delivered");
    let queued = context.queued();
    for _ in 0..queued {
        match timeout(RECV_TIMEOUT, context.recv(max_len)).await {
            Ok(Ok(delivered)) => {
                println!("{} {}", delivered.address, format_hex(&delivered.data));
                if delivered.is_truncated() {
                    println!("  (truncated from {} bytes)", delivered.original_len);
                }
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                warn!("Queued packet expired before it could be read");
                break;
            }
        }
    }

    let snapshot = context.metrics().snapshot();
    print_header("Summary");
    println!("classified: {}", snapshot.packets_classified);
    println!("matched:    {}", snapshot.packets_matched);
    println!("delivered:  {}", snapshot.packets_delivered);
    println!("dropped:    {}", snapshot.packets_dropped);
    println!("repaired:   {}", snapshot.checksum_repairs);
    println!("avg size:   {:.1} B", context.metrics().delivered_sizes.average());

    context.close().await?;
    Ok(())
}
