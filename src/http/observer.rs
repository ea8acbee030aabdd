use crate::timing::{Phase, PhaseTimestamps};
use chrono::Utc;
use std::sync::{Arc, Mutex};

/// Receives phase transitions from the transport without influencing the request.
pub trait PhaseObserver: Send + Sync {
    fn on_phase(&self, phase: Phase);
}

pub type SharedObserver = Arc<dyn PhaseObserver>;

/// Stamps the wall clock into a `PhaseTimestamps` owned by exactly one trace.
#[derive(Debug, Default)]
pub struct PhaseRecorder {
    stamps: Mutex<PhaseTimestamps>,
}

impl PhaseRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> PhaseTimestamps {
        match self.stamps.lock() {
            Ok(stamps) => stamps.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl PhaseObserver for PhaseRecorder {
    fn on_phase(&self, phase: Phase) {
        let now = Utc::now();
        trace!("{:?} at {}", phase, now.format("%H:%M:%S%.3f"));
        let mut stamps = match self.stamps.lock() {
            Ok(stamps) => stamps,
            Err(poisoned) => poisoned.into_inner(),
        };
        stamps.record(phase, now);
    }
}
