use std::sync::{Arc, Mutex};

use virtmem_ax::client;
use virtmem_ax::host::{count_pattern, HostMemory, LinkEvent};
use virtmem_ax::protocol::Command;
use virtmem_ax::sim::{simulate, simulate_with_remote};
use virtmem_ax::{System, SystemSpec, VirtAddr, Word};

fn small() -> SystemSpec {
    SystemSpec { page_size: 256, ..Default::default() }
}

fn shared_host(spec: SystemSpec) -> Arc<Mutex<HostMemory>> {
    Arc::new(Mutex::new(HostMemory::new(spec)))
}

#[test]
fn count_program_reaches_backing_store() {
    let spec = small();
    let host = shared_host(spec);
    let base = VirtAddr(0x1_0000);
    // 200 words span four pages
    let report = simulate(spec, client::count(base, 200), host.clone(), 100_000).unwrap();

    assert!(report.results.is_empty());
    assert_eq!(report.stats.misses, 4);
    assert_eq!(report.stats.flushes, 1);
    let writebacks = report.transcript.iter().filter(|e| matches!(e, LinkEvent::Writeback { .. })).count();
    assert_eq!(writebacks, 4);
    assert!(!report.transcript.contains(&LinkEvent::FlushDone));

    let mut host = host.lock().unwrap();
    for i in 0..200u64 {
        assert_eq!(host.read_word(base.offset_words(i, &spec)), i);
    }
}

#[test]
fn scan_matches_step_harness() {
    let spec = small();
    let base = VirtAddr(0x2_0f80);
    let report = simulate(spec, client::scan(base, 100), shared_host(spec), 100_000).unwrap();
    let expected: Vec<Word> = (0..100).map(|i| count_pattern(base.0 + 4 * i) as Word).collect();
    assert_eq!(report.results, expected);

    let mut sys = System::new(spec).unwrap();
    assert_eq!(sys.read(base, 100).unwrap(), expected);
    assert_eq!(report.stats, *sys.controller.stats());
}

#[test]
fn pingpong_evicts_and_recovers() {
    let spec = small();
    let pages = spec.num_slots + 1;
    let program = client::pingpong(&spec, VirtAddr(0), pages, 3);
    let report = simulate(spec, program, shared_host(spec), 200_000).unwrap();
    // last round wrote 2 * pages + p to page p
    let expected: Vec<Word> = (0..pages).map(|p| (2 * pages + p) as Word).collect();
    assert_eq!(report.results, expected);
    assert!(report.stats.writebacks > 0);
    assert!(report.stats.fetches > pages as u64);
}

#[test]
fn remote_flush_after_program() {
    let spec = small();
    let host = shared_host(spec);
    let program = vec![virtmem_ax::Instr::Write { addr: VirtAddr(0x300), data: vec![0x77] }];
    let report =
        simulate_with_remote(spec, program, host.clone(), &[Command::FlushRequest], 100_000).unwrap();
    assert_eq!(report.stats.remote_commands, 1);
    assert_eq!(report.transcript.last(), Some(&LinkEvent::FlushDone));
    let mut host = host.lock().unwrap();
    assert!(host.flush_acknowledged());
    assert_eq!(host.read_word(VirtAddr(0x300)), 0x77);
}

#[test]
fn cycle_limit_is_reported() {
    let spec = small();
    let err = simulate(spec, client::scan(VirtAddr(0), 64), shared_host(spec), 10).unwrap_err();
    assert!(err.0.contains("10 cycles"));
}

#[test]
fn poisoned_host_lock_is_reported() {
    let spec = small();
    let host = shared_host(spec);
    let holder = host.clone();
    let crashed = std::thread::spawn(move || {
        let _guard = holder.lock().unwrap();
        panic!("host crashed while holding its lock");
    })
    .join();
    assert!(crashed.is_err());

    let err = simulate(spec, client::scan(VirtAddr(0), 4), host, 1000).unwrap_err();
    assert!(err.0.contains("poisoned"), "{err}");
}

#[test]
fn invalid_spec_is_rejected() {
    let spec = SystemSpec { link_width: 48, ..small() };
    assert!(simulate(spec, Vec::new(), shared_host(small()), 10).is_err());
}
