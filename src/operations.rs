use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::auth::Identity;
use crate::error::Result;
use crate::models::{
    CreateMindMapPayload, MindMap, MindMapId, MindMapSummary, ReplaceGraphPayload,
};
use crate::store::MindMapStore;

/// Tool-friendly high-level mind map actions.
///
/// Callers must provide a trusted `Identity` produced by an `Authenticator`,
/// not one derived from model/tool arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum MindMapOperation {
    Create {
        payload: CreateMindMapPayload,
    },
    Replace {
        #[serde(rename = "mindMapId")]
        mind_map_id: MindMapId,
        payload: ReplaceGraphPayload,
    },
    Get {
        #[serde(rename = "mindMapId")]
        mind_map_id: MindMapId,
    },
    List,
    Delete {
        #[serde(rename = "mindMapId")]
        mind_map_id: MindMapId,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum MindMapOperationResult {
    MindMap { mind_map: MindMap },
    MindMaps { items: Vec<MindMapSummary> },
    Deleted,
}

/// Store access scoped to the authenticated caller. The owner of every call is the
/// identity's user; there is no way to name another owner.
#[derive(Clone)]
pub struct MindMapOperations {
    store: Arc<dyn MindMapStore>,
}

impl MindMapOperations {
    pub fn new(store: Arc<dyn MindMapStore>) -> Self {
        Self { store }
    }

    pub fn from_store<S: MindMapStore + 'static>(store: S) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub async fn execute(
        &self,
        identity: &Identity,
        operation: MindMapOperation,
    ) -> Result<MindMapOperationResult> {
        match operation {
            MindMapOperation::Create { payload } => {
                let mind_map = self.create_mind_map(identity, payload).await?;
                Ok(MindMapOperationResult::MindMap { mind_map })
            }
            MindMapOperation::Replace {
                mind_map_id,
                payload,
            } => {
                let mind_map = self
                    .replace_mind_map_graph(identity, mind_map_id, payload)
                    .await?;
                Ok(MindMapOperationResult::MindMap { mind_map })
            }
            MindMapOperation::Get { mind_map_id } => {
                let mind_map = self.get_mind_map(identity, mind_map_id).await?;
                Ok(MindMapOperationResult::MindMap { mind_map })
            }
            MindMapOperation::List => {
                let items = self.list_mind_maps(identity).await?;
                Ok(MindMapOperationResult::MindMaps { items })
            }
            MindMapOperation::Delete { mind_map_id } => {
                self.delete_mind_map(identity, mind_map_id).await?;
                Ok(MindMapOperationResult::Deleted)
            }
        }
    }

    pub async fn list_mind_maps(&self, identity: &Identity) -> Result<Vec<MindMapSummary>> {
        self.store.list_mind_maps(identity.user_id()).await
    }

    pub async fn get_mind_map(&self, identity: &Identity, id: MindMapId) -> Result<MindMap> {
        self.store.get_mind_map(id, identity.user_id()).await
    }

    pub async fn create_mind_map(
        &self,
        identity: &Identity,
        payload: CreateMindMapPayload,
    ) -> Result<MindMap> {
        self.store
            .create_mind_map(identity.user_id(), payload)
            .await
    }

    pub async fn replace_mind_map_graph(
        &self,
        identity: &Identity,
        id: MindMapId,
        payload: ReplaceGraphPayload,
    ) -> Result<MindMap> {
        self.store
            .replace_mind_map_graph(id, identity.user_id(), payload)
            .await
    }

    pub async fn delete_mind_map(&self, identity: &Identity, id: MindMapId) -> Result<()> {
        self.store.delete_mind_map(id, identity.user_id()).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;

    use super::*;
    use crate::auth::UserId;
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;

    fn identity() -> Identity {
        Identity::authenticated(UserId(Uuid::new_v4()))
    }

    #[tokio::test]
    async fn execute_dispatches_tagged_operations() {
        let ops = MindMapOperations::from_store(MemoryStore::new());
        let me = identity();

        let create: MindMapOperation = serde_json::from_value(json!({
            "operation": "create",
            "payload": {"title": "Plan"}
        }))
        .expect("create should deserialize");
        let MindMapOperationResult::MindMap { mind_map } = ops
            .execute(&me, create)
            .await
            .expect("create should succeed")
        else {
            panic!("create should return a mind map");
        };

        let replace: MindMapOperation = serde_json::from_value(json!({
            "operation": "replace",
            "mindMapId": mind_map.id,
            "payload": {
                "title": "Plan",
                "nodes": [{"id": "n1", "label": "Root", "position": {"x": 0.0, "y": 0.0}}],
                "edges": []
            }
        }))
        .expect("replace should deserialize");
        ops.execute(&me, replace)
            .await
            .expect("replace should succeed");

        let listed = ops
            .execute(&me, MindMapOperation::List)
            .await
            .expect("list should succeed");
        assert!(matches!(
            listed,
            MindMapOperationResult::MindMaps { ref items } if items.len() == 1 && items[0].node_count == 1
        ));

        let deleted = ops
            .execute(
                &me,
                MindMapOperation::Delete {
                    mind_map_id: mind_map.id,
                },
            )
            .await
            .expect("delete should succeed");
        assert!(matches!(deleted, MindMapOperationResult::Deleted));
    }

    #[tokio::test]
    async fn operations_are_scoped_to_the_identity() {
        let ops = MindMapOperations::from_store(MemoryStore::new());
        let owner = identity();
        let stranger = identity();

        let created = ops
            .create_mind_map(
                &owner,
                CreateMindMapPayload {
                    title: "Private".to_string(),
                    description: None,
                },
            )
            .await
            .expect("create should succeed");

        let err = ops
            .execute(
                &stranger,
                MindMapOperation::Get {
                    mind_map_id: created.id,
                },
            )
            .await
            .expect_err("stranger must not see the map");
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(
            ops.list_mind_maps(&stranger)
                .await
                .expect("list should succeed")
                .is_empty()
        );
    }
}
