// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Replay a `.dat` capture through the NTS receive stack.

use anyhow::Context;
use anyhow::bail;
use clap::Parser;
use nts::api::Ipv4Addr;
use nts::api::MacAddr;
use nts::api::NtsCfg;
use nts::dat::read_words;
use nts::dat::write_words;
use nts::engine::PushError;
use nts::engine::RxStack;
use nts::engine::ether::StaticNeighbors;
use nts::engine::udp::PortTable;
use nts::engine::word::Word;
use nts::engine::word::frame_to_words;
use nts::print::print_cfg_into;
use nts::print::print_channels_into;
use nts::print::print_stats;
use nts::provider::Providers;
use nts::provider::SlogLog;
use serde::Deserialize;
use slog::Drain;
use std::fs::File;
use std::io::BufReader;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Replay a word stream through the NTS receive stack and record
/// what comes out.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// The stack configuration, as TOML.
    #[arg(long)]
    config: PathBuf,

    /// The ingress word stream.
    #[arg(long)]
    input: PathBuf,

    /// Where to write one `.dat` file per output channel.
    #[arg(long)]
    out_dir: PathBuf,

    /// Open a UDP port, in addition to those in the config.
    #[arg(long = "listen")]
    listen: Vec<u16>,

    /// Resolve an IPv4 address to a MAC address, as IP=MAC.
    #[arg(long = "neighbor")]
    neighbors: Vec<Neighbor>,

    /// Print every counter, including those that are zero.
    #[arg(long)]
    all_stats: bool,
}

/// The config file: the stack configuration, plus optional ports and
/// neighbors.
#[derive(Debug, Deserialize)]
struct ReplayCfg {
    stack: NtsCfg,
    #[serde(default)]
    listen: Vec<u16>,
    #[serde(default)]
    neighbors: Vec<Neighbor>,
}

#[derive(Clone, Copy, Debug, Deserialize)]
struct Neighbor {
    ip: Ipv4Addr,
    mac: MacAddr,
}

impl FromStr for Neighbor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((ip, mac)) = s.split_once('=') else {
            return Err(format!("expected IP=MAC: {s}"));
        };
        Ok(Self { ip: ip.parse()?, mac: mac.parse()? })
    }
}

/// Everything the stack produced, one list of frames per output.
#[derive(Default)]
struct Outputs {
    arp: Vec<Vec<u8>>,
    tcp: Vec<Vec<u8>>,
    icmp: Vec<Vec<u8>>,
    udp: Vec<(String, Vec<u8>)>,
}

impl Outputs {
    fn collect(&mut self, stack: &mut RxStack) {
        self.arp.extend(std::iter::from_fn(|| stack.pop_arp()));
        self.tcp.extend(std::iter::from_fn(|| stack.pop_tcp()));
        self.icmp.extend(std::iter::from_fn(|| stack.pop_icmp_frame()));
        while let Some((meta, payload)) = stack.pop_udp() {
            let desc = format!("{} len {}", meta.pair, meta.len);
            self.udp.push((desc, payload));
        }
    }

    fn write(&self, dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create {}", dir.display()))?;

        for (name, frames) in
            [("arp", &self.arp), ("tcp", &self.tcp), ("icmp", &self.icmp)]
        {
            let mut out = create(dir, name)?;
            for f in frames {
                write_words(&mut out, &frame_to_words(f))?;
            }
            out.flush()?;
        }

        let mut out = create(dir, "udp")?;
        for (desc, payload) in &self.udp {
            writeln!(out, "# {desc}")?;
            write_words(&mut out, &frame_to_words(payload))?;
        }
        out.flush()?;
        Ok(())
    }

    /// Alternate between draining the outputs and running the stack
    /// until a run right after a drain makes no progress.
    fn drain(&mut self, stack: &mut RxStack) -> usize {
        let mut rounds = 0;
        loop {
            self.collect(stack);
            match stack.run() {
                0 => return rounds,
                r => rounds += r,
            }
        }
    }
}

/// Push `words` through `stack`, draining its outputs whenever the
/// ingress channel fills up, and once more at the end.
fn replay(stack: &mut RxStack, words: Vec<Word>) -> anyhow::Result<Outputs> {
    let mut outs = Outputs::default();
    for w in words {
        loop {
            match stack.push_word(w) {
                Ok(()) => break,
                Err(PushError::Full { free, depth }) => {
                    if outs.drain(stack) == 0 {
                        bail!(
                            "the stack stopped making progress with \
                             {free} of {depth} ingress words free"
                        );
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    outs.drain(stack);
    Ok(outs)
}

fn create(dir: &Path, name: &str) -> anyhow::Result<BufWriter<File>> {
    let path = dir.join(format!("{name}.dat"));
    let f = File::create(&path)
        .with_context(|| format!("create {}", path.display()))?;
    Ok(BufWriter::new(f))
}

fn build_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().stderr().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!("component" => "nts-replay"))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log = build_logger();

    let text = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("read {}", cli.config.display()))?;
    let cfg: ReplayCfg = toml::from_str(&text)
        .with_context(|| format!("parse {}", cli.config.display()))?;
    if !cfg.stack.enabled {
        bail!("the stack is disabled in {}", cli.config.display());
    }

    let neighbors: StaticNeighbors = cfg
        .neighbors
        .iter()
        .chain(cli.neighbors.iter())
        .map(|n| (n.ip, n.mac))
        .collect();
    let ports = Arc::new(PortTable::new());
    let providers = Providers { log: Box::new(SlogLog::new(log.clone())) };
    let mut stack = RxStack::new(
        cfg.stack,
        providers,
        Arc::clone(&ports),
        Box::new(neighbors),
    )?;
    for port in cfg.listen.iter().chain(cli.listen.iter()) {
        stack.listen(*port);
    }
    slog::info!(log, "ports open"; "ports" => ?ports.open_ports());

    let input = File::open(&cli.input)
        .with_context(|| format!("open {}", cli.input.display()))?;
    let words = read_words(BufReader::new(input))
        .with_context(|| format!("read {}", cli.input.display()))?;
    slog::info!(log, "replaying"; "words" => words.len());

    let outs = replay(&mut stack, words)?;
    outs.write(&cli.out_dir)?;
    slog::info!(
        log,
        "done";
        "arp" => outs.arp.len(),
        "tcp" => outs.tcp.len(),
        "icmp" => outs.icmp.len(),
        "udp" => outs.udp.len()
    );

    print_cfg_into(&mut std::io::stdout(), stack.cfg())?;
    println!();
    print_stats(&stack.stats(), cli.all_stats)?;
    println!();
    print_channels_into(&mut std::io::stdout(), &stack.channel_usage())?;
    Ok(())
}
