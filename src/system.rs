use log::debug;

use crate::client::Client;
use crate::common::{ClientInputs, ClientOutputs, Instr, Insts, SystemSpec, VirtAddr, Word};
use crate::controller::CacheController;
use crate::error::SimResult;
use crate::host::HostMemory;
use crate::protocol::Command;

/// Cycle budget for the convenience operations.
pub const DEFAULT_BUDGET: u64 = 1_000_000;

/// Controller and host wired back to back and clocked in lock step. Link
/// signals take one cycle in each direction.
pub struct System {
    pub controller: CacheController,
    pub host: HostMemory,
    cycle: u64,
    budget: u64,
}

impl System {
    pub fn new(spec: SystemSpec) -> SimResult<Self> {
        Self::with_host(spec, HostMemory::new(spec))
    }

    pub fn with_host(spec: SystemSpec, host: HostMemory) -> SimResult<Self> {
        Ok(System {
            controller: CacheController::new(spec)?,
            host,
            cycle: 0,
            budget: DEFAULT_BUDGET,
        })
    }

    pub fn set_budget(&mut self, cycles: u64) {
        self.budget = cycles;
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn step(&mut self, inputs: &ClientInputs) -> ClientOutputs {
        let out = self.controller.step(inputs);
        for sig in self.controller.take_link_signals() {
            self.host.deliver(sig);
        }
        self.host.step();
        for sig in self.host.take_link_signals() {
            self.controller.deliver(sig);
        }
        self.cycle += 1;
        out
    }

    /// Run `program` to completion and return every word it read.
    pub fn run(&mut self, program: Insts, max_cycles: u64) -> SimResult<Vec<Word>> {
        let start = self.cycle;
        let mut client = Client::new(program);
        let mut out = ClientOutputs::default();
        loop {
            let inputs = client.tick(&out);
            if client.is_done() {
                break;
            }
            if self.cycle - start >= max_cycles {
                return crate::sim_error!(format!(
                    "program not finished after {max_cycles} cycles, controller in {:?}",
                    self.controller.state()
                ));
            }
            out = self.step(&inputs);
        }
        debug!("program finished in {} cycles", self.cycle - start);
        Ok(client.into_results())
    }

    pub fn read(&mut self, addr: VirtAddr, words: u32) -> SimResult<Vec<Word>> {
        self.run(vec![Instr::Read { addr, words }], self.budget)
    }

    pub fn write(&mut self, addr: VirtAddr, data: &[Word]) -> SimResult {
        self.run(vec![Instr::Write { addr, data: data.to_vec() }], self.budget)?;
        Ok(())
    }

    pub fn flush_all(&mut self) -> SimResult {
        self.run(vec![Instr::Flush], self.budget)?;
        Ok(())
    }

    /// Have the host issue `cmd` and wait until both sides settle.
    pub fn remote(&mut self, cmd: Command) -> SimResult {
        self.host.send_remote(cmd);
        self.run_until_idle(self.budget)
    }

    /// Step with no client activity until nothing is left in flight.
    pub fn run_until_idle(&mut self, max_cycles: u64) -> SimResult {
        let start = self.cycle;
        let idle = ClientInputs::default();
        while !(self.controller.is_idle() && self.host.is_quiet()) {
            if self.cycle - start >= max_cycles {
                return crate::sim_error!(format!(
                    "link still busy after {max_cycles} cycles, controller in {:?}",
                    self.controller.state()
                ));
            }
            self.step(&idle);
        }
        Ok(())
    }
}
