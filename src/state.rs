// src/state.rs
// Application state shared across handlers.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use crate::config::CONFIG;
use crate::llm::{backend_from_config, ModelBackend};
use crate::repair::orchestrator::{RepairOptions, RepairOrchestrator};

pub struct AppState {
    pub backend: Arc<dyn ModelBackend>,
    pub options: RepairOptions,
}

impl AppState {
    pub fn new() -> Result<Self> {
        let backend = backend_from_config(&CONFIG)?;
        info!(
            backend = backend.name(),
            native_tools = backend.supports_native_tools(),
            "model backend initialized"
        );
        Ok(Self {
            backend,
            options: RepairOptions::from_config(&CONFIG),
        })
    }

    pub fn with_backend(backend: Arc<dyn ModelBackend>, options: RepairOptions) -> Self {
        Self { backend, options }
    }

    /// Runs are independent; each gets its own orchestrator over the
    /// shared backend.
    pub fn orchestrator(&self) -> RepairOrchestrator {
        RepairOrchestrator::new(self.backend.clone(), self.options.clone())
    }
}
