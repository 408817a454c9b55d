use detection::DetectionService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<DetectionService>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(service: Arc<DetectionService>, max_upload_bytes: u64) -> Self {
        Self {
            service,
            max_upload_bytes: usize::try_from(max_upload_bytes).unwrap_or(usize::MAX),
        }
    }
}
