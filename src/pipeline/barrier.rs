use parking_lot::{Condvar, Mutex};
use thiserror::Error;

#[derive(Debug)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    broken: bool,
}

/// Outcome of [`PhaseBarrier::arrive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Arrival {
    /// Last party to arrive; must run the phase transition and then call
    /// [`PhaseBarrier::release`] with the generation.
    Leader(u64),
    /// Released by the leader.
    Follower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("phase barrier broken")]
pub(crate) struct BarrierBroken;

/// Reusable barrier with an explicit generation counter.
///
/// Unlike `std::sync::Barrier` the completing thread holds the others
/// until it has finished the transition, and the barrier can be broken so
/// that no thread stays parked after another one failed.
#[derive(Debug)]
pub(crate) struct PhaseBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    condvar: Condvar,
}

impl PhaseBarrier {
    pub(crate) fn new(parties: usize) -> Self {
        Self {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                broken: false,
            }),
            condvar: Condvar::new(),
        }
    }

    pub(crate) fn arrive(&self) -> Result<Arrival, BarrierBroken> {
        let mut state = self.state.lock();
        if state.broken {
            return Err(BarrierBroken);
        }
        state.arrived += 1;
        let generation = state.generation;
        if state.arrived == self.parties {
            return Ok(Arrival::Leader(generation));
        }
        while state.generation == generation && !state.broken {
            self.condvar.wait(&mut state);
        }
        if state.broken {
            Err(BarrierBroken)
        } else {
            Ok(Arrival::Follower)
        }
    }

    /// Open the barrier for `generation`'s followers.
    pub(crate) fn release(&self, generation: u64) {
        let mut state = self.state.lock();
        if state.generation == generation {
            state.arrived = 0;
            state.generation += 1;
        }
        self.condvar.notify_all();
    }

    /// Wake every waiter with an error; later arrivals fail immediately.
    pub(crate) fn abort(&self) {
        self.state.lock().broken = true;
        self.condvar.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        self.state.lock().generation
    }
}
