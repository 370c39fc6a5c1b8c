use std::sync::Arc;

use papconv::ConversionService;

use crate::api::error::{ApiError, ApiResult};

/// Shared handler state. The service is synchronous, so handlers reach it
/// through [`AppState::run`].
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ConversionService>,
}

impl AppState {
    pub fn new(service: Arc<ConversionService>) -> Self {
        Self { service }
    }

    /// Runs a blocking service call off the async runtime.
    pub async fn run<T, F>(&self, f: F) -> ApiResult<T>
    where
        F: FnOnce(&ConversionService) -> ApiResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let service = Arc::clone(&self.service);
        tokio::task::spawn_blocking(move || f(&service))
            .await
            .map_err(|e| ApiError::Internal(format!("Service task failed: {}", e)))?
    }
}
