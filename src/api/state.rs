use std::sync::Arc;

use crate::application::Services;
use crate::infrastructure::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(services: Services, config: AppConfig) -> Self {
        Self {
            services,
            config: Arc::new(config),
        }
    }
}
