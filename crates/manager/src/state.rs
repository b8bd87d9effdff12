use crate::acme::AcmeChallengeStore;
use crate::orchestrator::LifecycleOrchestrator;
use crate::scheduler::RenewalScheduler;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<LifecycleOrchestrator>,
    pub scheduler: Arc<RenewalScheduler>,
    pub challenges: AcmeChallengeStore,
}
