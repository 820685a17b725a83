//! Discrete-event rendition of the system: processor, cache and host as
//! asynchronix models exchanging messages, clocked once per simulated second.

mod cache;
mod host;
mod processor;

pub use cache::CacheModel;
pub use host::HostModel;
pub use processor::ProcessorModel;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use asynchronix::simulation::{Mailbox, SimInit};
use asynchronix::time::MonotonicTime;
use log::info;

use crate::common::{Insts, SystemSpec, Word};
use crate::controller::{CacheController, CacheStats};
use crate::error::SimResult;
use crate::host::{HostMemory, LinkEvent};
use crate::protocol::Command;

#[derive(Clone, Debug)]
pub struct SimReport {
    pub cycles: u64,
    pub results: Vec<Word>,
    pub stats: CacheStats,
    pub transcript: Vec<LinkEvent>,
}

fn host_quiet(host: &Arc<Mutex<HostMemory>>) -> bool {
    host.lock().map(|h| h.is_quiet()).unwrap_or(false)
}

pub fn simulate(
    spec: SystemSpec,
    program: Insts,
    host: Arc<Mutex<HostMemory>>,
    max_cycles: u64,
) -> SimResult<SimReport> {
    simulate_with_remote(spec, program, host, &[], max_cycles)
}

/// Run `program`, then have the host issue each of `remote` in turn once
/// the link has gone quiet.
pub fn simulate_with_remote(
    spec: SystemSpec,
    program: Insts,
    host: Arc<Mutex<HostMemory>>,
    remote: &[Command],
    max_cycles: u64,
) -> SimResult<SimReport> {
    let controller = CacheController::new(spec)?;
    let results = Arc::new(Mutex::new(Vec::new()));
    let stats = Arc::new(Mutex::new(CacheStats::default()));
    let done = Arc::new(AtomicBool::new(false));
    let cache_idle = Arc::new(AtomicBool::new(true));
    let mut remote: VecDeque<Command> = remote.iter().copied().collect();

    // create models
    let mut proc = ProcessorModel::new(program, results.clone(), done.clone());
    let mut cache = CacheModel::new(controller, stats.clone(), cache_idle.clone());
    let mut host_model = HostModel::new(host.clone());

    // create mailboxes
    let proc_mbox = Mailbox::<ProcessorModel>::new();
    let cache_mbox = Mailbox::<CacheModel>::new();
    let host_mbox = Mailbox::<HostModel>::new();

    // addresses
    let tick_addr_proc = proc_mbox.address();
    let tick_addr_cache = cache_mbox.address();
    let tick_addr_host = host_mbox.address();

    // connect models
    proc.o_cache_req.connect(CacheModel::on_proc_req, &cache_mbox);
    cache.o_proc_resp.connect(ProcessorModel::on_cache_resp, &proc_mbox);
    cache.o_link.connect(HostModel::on_link, &host_mbox);
    host_model.o_link.connect(CacheModel::on_link, &cache_mbox);

    // initialize simulation
    let mut sim = SimInit::new()
        .add_model(proc, proc_mbox)
        .add_model(cache, cache_mbox)
        .add_model(host_model, host_mbox)
        .init(MonotonicTime::EPOCH);

    // run simulation
    for _ in 0..max_cycles {
        if host.is_poisoned() {
            return crate::sim_error!(format!(
                "host memory lock poisoned after {} cycles",
                sim.time().as_secs()
            ));
        }
        if done.load(Ordering::Relaxed) && cache_idle.load(Ordering::Relaxed) && host_quiet(&host) {
            match remote.pop_front() {
                Some(cmd) => sim.send_event(HostModel::on_remote, cmd, &tick_addr_host),
                None => {
                    let cycles = sim.time().as_secs() as u64;
                    info!("finished simulation in {cycles} cycles");
                    let results = results.lock().map(|r| r.clone()).unwrap_or_default();
                    let stats = stats.lock().map(|s| *s).unwrap_or_default();
                    let transcript = host.lock().map(|h| h.transcript().to_vec()).unwrap_or_default();
                    return Ok(SimReport { cycles, results, stats, transcript });
                }
            }
        }

        // tick
        sim.send_event(ProcessorModel::on_tick, (), &tick_addr_proc);
        sim.send_event(CacheModel::on_tick, (), &tick_addr_cache);
        sim.send_event(HostModel::on_tick, (), &tick_addr_host);

        sim.step_by(Duration::from_secs(1));

        // post-tick
        sim.send_event(ProcessorModel::on_post_tick, (), &tick_addr_proc);
        sim.send_event(CacheModel::on_post_tick, (), &tick_addr_cache);
    }
    crate::sim_error!(format!("simulation did not finish within {max_cycles} cycles"))
}
