use std::error::Error;
use std::sync::{Arc, Mutex};

use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::info;

use virtmem_ax::client;
use virtmem_ax::host::{HostMemory, LinkEvent};
use virtmem_ax::protocol::Command;
use virtmem_ax::sim::simulate_with_remote;
use virtmem_ax::{SystemSpec, VirtAddr};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Program {
    /// Write 0..n to consecutive words, then flush.
    Count,
    /// Read n consecutive words.
    Scan,
    /// Single-word writes across more pages than there are slots.
    Pingpong,
}

fn parse_addr(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("bad address {s}: {e}"))
}

/// Command-line arguments.
#[derive(Parser)]
#[command(about = "Demand-paging cache controller simulation")]
struct Cli {
    /// Virtual address width in bits.
    #[arg(long, default_value_t = 64)]
    addr_width: u32,

    /// Cache word width in bits.
    #[arg(long, default_value_t = 32)]
    word_width: u32,

    /// Page size in bytes.
    #[arg(long, default_value_t = 4096)]
    page_size: u32,

    /// Link width in bits.
    #[arg(long, default_value_t = 128)]
    link_width: u32,

    /// Number of page slots.
    #[arg(long, default_value_t = 4)]
    num_slots: u32,

    /// Receive buffer depth of each link channel, in 32-bit words.
    #[arg(long, default_value_t = 16)]
    link_depth: u32,

    /// Host response latency in cycles.
    #[arg(long, default_value_t = 0)]
    mem_lat: u32,

    /// Workload to run.
    #[arg(long, value_enum, default_value_t = Program::Count)]
    program: Program,

    /// First address touched by the workload.
    #[arg(long, default_value = "0x0", value_parser = parse_addr)]
    base: u64,

    /// Words (count, scan) or rounds (pingpong).
    #[arg(long, default_value_t = 2048)]
    words: u32,

    /// Give up after this many cycles.
    #[arg(long, default_value_t = 1_000_000)]
    max_cycles: u64,

    /// Have the host request a flush once the workload is done.
    #[arg(long, default_value = "false")]
    remote_flush: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    // logging
    let env = Env::default()
        .filter_or("VIRTMEM_LOG_LEVEL", "info")
        .write_style_or("VIRTMEM_LOG_STYLE", "auto");
    env_logger::init_from_env(env);

    let args = Cli::parse();
    let spec = SystemSpec {
        addr_width: args.addr_width,
        word_width: args.word_width,
        page_size: args.page_size,
        link_width: args.link_width,
        num_slots: args.num_slots,
        link_depth: args.link_depth,
        mem_lat: args.mem_lat,
    };
    spec.validate()?;

    // load instructions
    let base = VirtAddr(args.base);
    let program = match args.program {
        Program::Count => client::count(base, args.words),
        Program::Scan => client::scan(base, args.words),
        Program::Pingpong => client::pingpong(&spec, base, spec.num_slots + 1, args.words),
    };
    info!("running {:?} with {} instructions", args.program, program.len());

    let host = Arc::new(Mutex::new(HostMemory::new(spec)));
    let remote = if args.remote_flush { vec![Command::FlushRequest] } else { Vec::new() };
    let report = simulate_with_remote(spec, program, host, &remote, args.max_cycles)?;

    // print stats
    println!("finished simulation in {} cycles", report.cycles);
    println!("{}", report.stats);
    let fetches = report.transcript.iter().filter(|e| matches!(e, LinkEvent::Fetch { .. })).count();
    let writebacks = report.transcript.iter().filter(|e| matches!(e, LinkEvent::Writeback { .. })).count();
    println!("host saw {fetches} fetches, {writebacks} writebacks");
    if let Some(last) = report.results.last() {
        println!("read {} words, last = {last:#x}", report.results.len());
    }
    Ok(())
}
