use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use asynchronix::model::{Model, Output};
use log::info;

use crate::client::Client;
use crate::common::{ClientInputs, ClientOutputs, Insts, Word};

/// The requesting compute unit. Holds each request on the register
/// interface until the cache model acknowledges it.
pub struct ProcessorModel {
    client: Client,
    last_resp: ClientOutputs,
    pub o_cache_req: Output<ClientInputs>,
    results: Arc<Mutex<Vec<Word>>>,
    done: Arc<AtomicBool>,
}

impl ProcessorModel {
    pub fn new(program: Insts, results: Arc<Mutex<Vec<Word>>>, done: Arc<AtomicBool>) -> Self {
        ProcessorModel {
            client: Client::new(program),
            last_resp: ClientOutputs::default(),
            o_cache_req: Output::new(),
            results,
            done,
        }
    }

    pub async fn on_tick(&mut self, _: ()) {
        let req = self.client.tick(&self.last_resp);
        self.last_resp = ClientOutputs::default();
        self.o_cache_req.send(req).await;
    }

    pub async fn on_post_tick(&mut self) {
        if self.client.is_done() && !self.done.load(Ordering::Relaxed) {
            info!(
                "processor finished: {} instructions, {} cycles waiting",
                self.client.completed, self.client.wait_cycles
            );
            if let Ok(mut results) = self.results.lock() {
                *results = self.client.results().to_vec();
            }
            self.done.store(true, Ordering::Relaxed);
        }
    }

    pub async fn on_cache_resp(&mut self, resp: ClientOutputs) {
        self.last_resp = resp;
    }
}

impl Model for ProcessorModel {}
