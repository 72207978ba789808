pub mod handlers;
pub mod operations;
pub mod routes;

pub use operations::{Operation, OperationRegistry, OperationRequest};
pub use routes::*;

use crate::state::ServerState;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<ServerState>,
    pub operations: Arc<OperationRegistry>,
}

impl AppState {
    pub fn new(server: Arc<ServerState>) -> Self {
        Self {
            server,
            operations: Arc::new(OperationRegistry::with_builtin()),
        }
    }

    /// Replace the operation registry
    pub fn with_operations(mut self, operations: OperationRegistry) -> Self {
        self.operations = Arc::new(operations);
        self
    }
}
