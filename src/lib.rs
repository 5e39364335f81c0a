#[cfg(feature = "api")]
pub mod api;
pub mod auth;
pub mod autosave;
#[cfg(feature = "client")]
pub mod client;
pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod models;
pub mod operations;
pub mod store;
pub mod sync;
pub mod validation;

pub mod prelude {
    #[cfg(feature = "api")]
    pub use crate::api::{AppError, AppState, HasOperations, MindMapApp, routes};
    pub use crate::auth::{Authenticator, Credential, Identity, StaticTokenAuthenticator, UserId};
    pub use crate::autosave::{AutosaveConfig, FlushOutcome, SaveState, SaveStatus};
    #[cfg(feature = "client")]
    pub use crate::client::{ApiClient, ApiClientConfig};
    #[cfg(feature = "sqlx")]
    pub use crate::db::{PgStore, create_mind_map_tables};
    pub use crate::error::{ErrorKind, LibError, Result};
    pub use crate::models::{
        CreateMindMapPayload, Edge, EdgeEndpoint, EdgeId, EdgeStyle, GraphViolation, MindMap,
        MindMapId, MindMapSummary, Node, NodeId, NodeStyle, Position, ReplaceGraphPayload,
    };
    pub use crate::operations::{MindMapOperation, MindMapOperationResult, MindMapOperations};
    pub use crate::store::{MemoryStore, MindMapStore};
    pub use crate::sync::{SaveTarget, Snapshot, StoreTarget, SyncEngine};
    pub use crate::validation::validate_graph;
}
