//! Single-flight updates for a pipeline shared between threads.
//!
//! When several threads ask for the same node and region at once, one of them
//! (the leader) runs the update and the rest wait for its result instead of
//! queueing up behind the pipeline lock to find the cache warm.
//!
//! ```text
//! thread A ─┐
//! thread B ─┼──► SharedPipeline ──► one update ──► A, B, C share the Arc
//! thread C ─┘
//! ```
//!
//! A flight exists only while its update runs. Callers arriving after it finished
//! start a new one, which the ledger then serves from cache if nothing changed.

use crate::error::{PipelineError, PipelineResult};
use crate::image::{ImageData, ImageRegion};
use crate::pipeline::Pipeline;
use crate::store::NodeId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::debug;

type FlightKey = (NodeId, Option<ImageRegion>);
type FlightResult = PipelineResult<Arc<ImageData>>;

#[derive(Default)]
struct Flight {
    result: Mutex<Option<FlightResult>>,
    done: Condvar,
}

impl Flight {
    fn finish(&self, result: FlightResult) {
        let mut slot = self.result.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(result);
        self.done.notify_all();
    }

    fn wait(&self) -> FlightResult {
        let mut slot = self.result.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(result) = slot.as_ref() {
                return result.clone();
            }
            slot = self.done.wait(slot).unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Statistics for monitoring how often work was shared.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlightStats {
    pub total_requests: u64,
    pub coalesced_requests: u64,
}

/// A [`Pipeline`] behind a lock, with concurrent identical updates coalesced.
pub struct SharedPipeline {
    pipeline: Mutex<Pipeline>,
    in_flight: DashMap<FlightKey, Arc<Flight>>,
    total_requests: AtomicU64,
    coalesced_requests: AtomicU64,
}

impl SharedPipeline {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline: Mutex::new(pipeline),
            in_flight: DashMap::new(),
            total_requests: AtomicU64::new(0),
            coalesced_requests: AtomicU64::new(0),
        }
    }

    /// Exclusive access for wiring and parameter changes. Changes made here are
    /// ordered after any flight already running.
    pub fn lock(&self) -> MutexGuard<'_, Pipeline> {
        self.pipeline.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Updates `id` for `region` (its stored request when `None`), sharing the
    /// result with every concurrent caller asking for the same thing.
    pub fn update(&self, id: NodeId, region: Option<ImageRegion>) -> FlightResult {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let key = (id, region);

        let flight = match self.in_flight.entry(key) {
            Entry::Occupied(entry) => {
                let flight = entry.get().clone();
                drop(entry);
                self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
                debug!(node = id.0, "joining in-flight update");
                return flight.wait();
            }
            Entry::Vacant(entry) => {
                let flight = Arc::new(Flight::default());
                entry.insert(flight.clone());
                flight
            }
        };

        // Followers must never wait forever, even if the update panics.
        let guard = LeaderGuard { owner: self, key, flight: &flight, finished: false };
        let result = {
            let mut pipeline = self.lock();
            match region {
                Some(r) => pipeline.update_region(id, r),
                None => pipeline.update(id),
            }
        };
        guard.finish(result.clone());
        result
    }

    pub fn stats(&self) -> FlightStats {
        FlightStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
        }
    }

    pub fn into_inner(self) -> Pipeline {
        self.pipeline.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

struct LeaderGuard<'a> {
    owner: &'a SharedPipeline,
    key: FlightKey,
    flight: &'a Arc<Flight>,
    finished: bool,
}

impl LeaderGuard<'_> {
    fn finish(mut self, result: FlightResult) {
        self.owner.in_flight.remove(&self.key);
        self.flight.finish(result);
        self.finished = true;
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.owner.in_flight.remove(&self.key);
            self.flight.finish(Err(PipelineError::GenerationFailed {
                node_name: format!("{:?}", self.key.0),
                region: self.key.1.unwrap_or_else(|| ImageRegion::from_size(&[0])),
                msg: "update panicked".to_string(),
            }));
        }
    }
}
