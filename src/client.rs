use std::collections::VecDeque;

use log::debug;

use crate::common::{ClientInputs, ClientOutputs, Instr, Insts, Request, SystemSpec, VirtAddr, Word};

struct Active {
    instr: Instr,
    served: u32,
}

impl Active {
    fn target(&self) -> u32 {
        match &self.instr {
            Instr::Read { words, .. } => (*words).max(1),
            Instr::Write { data, .. } => data.len() as u32,
            Instr::Flush => 1,
        }
    }

    fn inputs(&self) -> ClientInputs {
        match &self.instr {
            Instr::Read { addr, words } => ClientInputs {
                request: Some(Request::read(*addr, *words)),
                flush_all: false,
            },
            Instr::Write { addr, data } => ClientInputs {
                request: Some(Request::write(*addr, data.len() as u32, data[self.served as usize])),
                flush_all: false,
            },
            Instr::Flush => ClientInputs { request: None, flush_all: true },
        }
    }
}

/// Drives the register interface from a program, one instruction at a time.
/// A request is held stable until every word of it was acknowledged.
pub struct Client {
    program: VecDeque<Instr>,
    active: Option<Active>,
    results: Vec<Word>,
    pub cycle_count: u64,
    pub wait_cycles: u64,
    pub completed: u64,
}

impl Client {
    pub fn new(program: Insts) -> Self {
        Client {
            program: program.into(),
            active: None,
            results: Vec::new(),
            cycle_count: 0,
            wait_cycles: 0,
            completed: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.active.is_none() && self.program.is_empty()
    }

    /// Every word read so far, in program order.
    pub fn results(&self) -> &[Word] {
        &self.results
    }

    pub fn into_results(self) -> Vec<Word> {
        self.results
    }

    /// Observe the controller outputs of the previous cycle and produce the
    /// inputs for this one.
    pub fn tick(&mut self, outputs: &ClientOutputs) -> ClientInputs {
        self.cycle_count += 1;
        if let Some(active) = &mut self.active {
            match active.instr {
                Instr::Read { .. } if outputs.done => {
                    self.results.push(outputs.data_read);
                    active.served += 1;
                }
                Instr::Write { .. } if outputs.write_ack => active.served += 1,
                Instr::Flush if outputs.done => active.served += 1,
                _ => self.wait_cycles += 1,
            }
            if active.served >= active.target() {
                debug!("client: {:?} complete after {} cycles", active.instr, self.cycle_count);
                self.completed += 1;
                self.active = None;
            }
        }
        while self.active.is_none() {
            let Some(instr) = self.program.pop_front() else { break };
            let active = Active { instr, served: 0 };
            // an empty write has nothing to wait for
            if active.target() > 0 {
                self.active = Some(active);
            }
        }
        match &self.active {
            Some(active) => active.inputs(),
            None => ClientInputs::default(),
        }
    }
}

/// Write `0..n` to `n` consecutive words starting at `base`, then flush.
pub fn count(base: VirtAddr, n: u32) -> Insts {
    vec![
        Instr::Write { addr: base, data: (0..n as Word).collect() },
        Instr::Flush,
    ]
}

/// Read `n` consecutive words starting at `base`.
pub fn scan(base: VirtAddr, n: u32) -> Insts {
    vec![Instr::Read { addr: base, words: n }]
}

/// Bounce single-word writes across `pages` pages (more than there are
/// slots forces evictions) for `rounds` rounds, then read each page back.
pub fn pingpong(spec: &SystemSpec, base: VirtAddr, pages: u32, rounds: u32) -> Insts {
    let page = |p: u32| VirtAddr(base.0.wrapping_add(p as u64 * spec.page_size as u64) & spec.addr_mask());
    let mut program = Insts::new();
    for r in 0..rounds {
        for p in 0..pages {
            program.push(Instr::Write { addr: page(p), data: vec![(r * pages + p) as Word] });
        }
    }
    for p in 0..pages {
        program.push(Instr::Read { addr: page(p), words: 1 });
    }
    program
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_request_until_done() {
        let mut client = Client::new(scan(VirtAddr(0x100), 2));
        let idle = ClientOutputs::default();
        let first = client.tick(&idle);
        assert_eq!(first.request, Some(Request::read(VirtAddr(0x100), 2)));
        assert_eq!(client.tick(&idle), first);
        let done = ClientOutputs { data_read: 7, done: true, write_ack: false };
        assert_eq!(client.tick(&done), first);
        assert_eq!(client.tick(&ClientOutputs { data_read: 9, ..done }), ClientInputs::default());
        assert!(client.is_done());
        assert_eq!(client.results(), &[7, 9]);
    }

    #[test]
    fn write_data_advances_on_ack() {
        let mut client = Client::new(count(VirtAddr(0), 3));
        let idle = ClientOutputs::default();
        let ack = ClientOutputs { write_ack: true, ..idle };
        assert_eq!(client.tick(&idle).request.map(|r| r.write_data), Some(0));
        assert_eq!(client.tick(&ack).request.map(|r| r.write_data), Some(1));
        assert_eq!(client.tick(&idle).request.map(|r| r.write_data), Some(1));
        assert_eq!(client.tick(&ack).request.map(|r| r.write_data), Some(2));
        let flush = client.tick(&ack);
        assert!(flush.flush_all);
        assert_eq!(flush.request, None);
        assert!(!client.is_done());
        client.tick(&ClientOutputs { done: true, ..idle });
        assert!(client.is_done());
    }

    #[test]
    fn empty_writes_are_skipped() {
        let program = vec![Instr::Write { addr: VirtAddr(0), data: vec![] }, Instr::Flush];
        let mut client = Client::new(program);
        assert!(client.tick(&ClientOutputs::default()).flush_all);
    }

    #[test]
    fn pingpong_layout() {
        let spec = SystemSpec::default();
        let program = pingpong(&spec, VirtAddr(0x10000), 3, 2);
        assert_eq!(program.len(), 9);
        assert_eq!(program[4], Instr::Write { addr: VirtAddr(0x11000), data: vec![4] });
        assert_eq!(program[8], Instr::Read { addr: VirtAddr(0x12000), words: 1 });
    }
}
