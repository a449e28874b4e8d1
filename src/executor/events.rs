use structure_plan::BlockPos;

/// Progress events emitted while a build runs
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    /// Build attached to a plan
    Started {
        build_id: String,
        total_steps: usize,
        resume_from_step: usize,
    },

    /// A step began
    StepStarted {
        index: usize,
        bulk_ops: usize,
        placements: usize,
    },

    /// One region command was accepted
    BulkOpIssued {
        id: String,
        changed: u64,
    },

    /// A region command exhausted its retries
    BulkOpFailed {
        id: String,
        error: String,
    },

    /// Agent arrived at a station
    StationReached {
        vantage: BlockPos,
        cells: usize,
    },

    /// Agent did not confirm arrival before the move timeout
    MoveTimedOut {
        target: BlockPos,
    },

    /// One attempt failed and the executor is backing off
    AttemptFailed {
        pos: BlockPos,
        attempt: u32,
        backoff_ms: u64,
        error: String,
    },

    /// Placement confirmed by read-back (or read-back skipped in creative reach)
    BlockPlaced {
        pos: BlockPos,
        block: String,
        attempts: u32,
    },

    /// Cell already held the block
    BlockSkipped {
        pos: BlockPos,
    },

    /// Placement accepted but could not be observed
    BlockUnverified {
        pos: BlockPos,
        reason: String,
    },

    /// Placement exhausted its retries
    BlockFailed {
        pos: BlockPos,
        block: String,
        error: String,
    },

    /// Step finished and was persisted
    StepCompleted {
        index: usize,
        placed: u64,
        failed: u64,
    },

    /// Build stopped early on request; progress stays resumable
    Cancelled {
        step: usize,
    },

    /// Every step finished
    Finished {
        build_id: String,
        placed: u64,
        failed: u64,
    },
}

/// Event handler trait
pub trait EventHandler {
    fn on_event(&mut self, event: BuildEvent);
}

impl<F: FnMut(BuildEvent)> EventHandler for F {
    fn on_event(&mut self, event: BuildEvent) {
        self(event)
    }
}

/// Simple event collector
#[derive(Debug, Default)]
pub struct EventCollector {
    events: Vec<BuildEvent>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn events(&self) -> &[BuildEvent] {
        &self.events
    }

    pub fn drain(&mut self) -> Vec<BuildEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl EventHandler for EventCollector {
    fn on_event(&mut self, event: BuildEvent) {
        self.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_collector() {
        let mut collector = EventCollector::new();
        assert!(collector.is_empty());

        collector.on_event(BuildEvent::BlockSkipped { pos: BlockPos::new(0, 0, 0) });
        collector.on_event(BuildEvent::Cancelled { step: 3 });

        assert!(!collector.is_empty());

        let events = collector.drain();
        assert_eq!(events.len(), 2);
        assert!(collector.is_empty());
    }

    #[test]
    fn test_closure_handler() {
        let mut seen = 0;
        {
            let mut handler = |_: BuildEvent| seen += 1;
            handler.on_event(BuildEvent::Cancelled { step: 0 });
            handler.on_event(BuildEvent::Cancelled { step: 1 });
        }
        assert_eq!(seen, 2);
    }
}
