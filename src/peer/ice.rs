use crate::peer::types::{Candidate, CandidateKind, GatheringEvent};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GatheringError {
    #[error("gathering was already started for this description")]
    AlreadyStarted,
    #[error("gathering event before a local description exists")]
    NotStarted,
    #[error("gathering already completed")]
    AlreadyComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Gathering,
    Complete,
}

/// Counts of gathered candidates per type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
    pub other: usize,
}

impl CandidateSummary {
    pub fn record(&mut self, candidate: &Candidate) {
        match candidate.kind() {
            CandidateKind::Host => self.host += 1,
            CandidateKind::ServerReflexive => self.srflx += 1,
            CandidateKind::Relay => self.relay += 1,
            CandidateKind::PeerReflexive | CandidateKind::Unknown => self.other += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.host + self.srflx + self.relay + self.other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatheringProgress {
    Pending,
    /// Emitted once per description; the local description may now be frozen.
    Complete(CandidateSummary),
}

/// Follows candidate discovery for one local description.
///
/// Candidates are only counted: the description read at completion already
/// embeds every one of them, so nothing is trickled to the remote side.
#[derive(Debug, Default)]
pub struct GatheringTracker {
    phase: Phase,
    summary: CandidateSummary,
}

impl GatheringTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when the local description is applied and the engine starts gathering.
    pub fn begin(&mut self) -> Result<(), GatheringError> {
        match self.phase {
            Phase::Idle => {
                self.phase = Phase::Gathering;
                Ok(())
            }
            Phase::Gathering => Err(GatheringError::AlreadyStarted),
            Phase::Complete => Err(GatheringError::AlreadyComplete),
        }
    }

    pub fn observe(&mut self, event: GatheringEvent) -> Result<GatheringProgress, GatheringError> {
        match (self.phase, event) {
            (Phase::Idle, _) => Err(GatheringError::NotStarted),
            (Phase::Complete, _) => Err(GatheringError::AlreadyComplete),
            (Phase::Gathering, GatheringEvent::Candidate(candidate)) => {
                self.summary.record(&candidate);
                Ok(GatheringProgress::Pending)
            }
            (Phase::Gathering, GatheringEvent::Complete) => {
                self.phase = Phase::Complete;
                Ok(GatheringProgress::Complete(self.summary))
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    pub fn summary(&self) -> CandidateSummary {
        self.summary
    }
}
