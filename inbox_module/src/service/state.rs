use std::sync::Arc;

use crate::inbox_store::InboxStore;
use crate::job_queue::JobQueue;

use super::verify::OriginVerifier;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn InboxStore>,
    pub queue: Arc<dyn JobQueue>,
    pub verifier: Arc<dyn OriginVerifier>,
}
