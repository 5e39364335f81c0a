use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::auth::UserId;
use crate::error::{LibError, Result};
use crate::models::{
    CreateMindMapPayload, Edge, EdgeId, EdgeStyle, GraphDefinition, MindMap, MindMapId,
    MindMapSummary, Node, NodeId, NodeStyle, Position, ReplaceGraphPayload, missing_mind_map,
};
use crate::store::MindMapStore;

pub static MIGRATOR: Lazy<Migrator> = Lazy::new(|| {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
});

pub async fn create_mind_map_tables(pool: &PgPool) -> std::result::Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[derive(Debug, Clone, FromRow)]
struct MindMapRow {
    id: Uuid,
    owner_id: Uuid,
    title: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct MindMapSummaryRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    node_count: i64,
    edge_count: i64,
}

#[derive(Debug, Clone, FromRow)]
struct NodeRow {
    id: String,
    node_type: Option<String>,
    label: String,
    description: Option<String>,
    position_x: f64,
    position_y: f64,
    background: Option<String>,
    color: Option<String>,
    border: Option<String>,
    border_radius: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
struct EdgeRow {
    id: String,
    source: String,
    target: String,
    edge_type: Option<String>,
    stroke: Option<String>,
    stroke_width: Option<f64>,
}

impl From<MindMapSummaryRow> for MindMapSummary {
    fn from(value: MindMapSummaryRow) -> Self {
        Self {
            id: MindMapId(value.id),
            title: value.title,
            description: value.description,
            created_at: value.created_at,
            updated_at: value.updated_at,
            node_count: value.node_count,
            edge_count: value.edge_count,
        }
    }
}

impl From<NodeRow> for Node {
    fn from(row: NodeRow) -> Self {
        let style = NodeStyle {
            background: row.background,
            color: row.color,
            border: row.border,
            border_radius: row.border_radius,
        };
        Self {
            id: NodeId(row.id),
            kind: row.node_type,
            label: row.label,
            description: row.description,
            position: Position::new(row.position_x, row.position_y),
            style: (!style.is_empty()).then_some(style),
        }
    }
}

impl From<EdgeRow> for Edge {
    fn from(row: EdgeRow) -> Self {
        let style = EdgeStyle {
            stroke: row.stroke,
            stroke_width: row.stroke_width,
        };
        Self {
            id: EdgeId(row.id),
            source: NodeId(row.source),
            target: NodeId(row.target),
            kind: row.edge_type,
            style: (!style.is_empty()).then_some(style),
        }
    }
}

fn hydrate_mind_map(row: MindMapRow, nodes: Vec<NodeRow>, edges: Vec<EdgeRow>) -> MindMap {
    MindMap {
        id: MindMapId(row.id),
        owner_id: UserId(row.owner_id),
        title: row.title,
        description: row.description,
        created_at: row.created_at,
        updated_at: row.updated_at,
        nodes: nodes.into_iter().map(Node::from).collect(),
        edges: edges.into_iter().map(Edge::from).collect(),
    }
}

fn db_err(public: &'static str, err: sqlx::Error) -> LibError {
    LibError::storage(public, anyhow!(err))
}

/// A write that trips a foreign key means the mind map vanished under us.
fn write_err(public: &'static str, id: MindMapId, err: sqlx::Error) -> LibError {
    let vanished = err
        .as_database_error()
        .is_some_and(|db_error| db_error.is_foreign_key_violation());
    if vanished {
        missing_mind_map(id)
    } else {
        db_err(public, err)
    }
}

async fn load_owned_mind_map(
    conn: &mut PgConnection,
    id: MindMapId,
    owner: UserId,
    lock: bool,
) -> Result<MindMapRow> {
    let query = if lock {
        r#"
        SELECT id, owner_id, title, description, created_at, updated_at
        FROM mindmap.mind_maps
        WHERE id = $1
          AND owner_id = $2
        FOR UPDATE
        "#
    } else {
        r#"
        SELECT id, owner_id, title, description, created_at, updated_at
        FROM mindmap.mind_maps
        WHERE id = $1
          AND owner_id = $2
        "#
    };

    sqlx::query_as::<_, MindMapRow>(query)
        .bind(id.0)
        .bind(owner.0)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|err| db_err("Failed to query mind map", err))?
        .ok_or_else(|| missing_mind_map(id))
}

async fn load_contents(
    conn: &mut PgConnection,
    id: MindMapId,
) -> Result<(Vec<NodeRow>, Vec<EdgeRow>)> {
    let nodes = sqlx::query_as::<_, NodeRow>(
        r#"
        SELECT id, node_type, label, description, position_x, position_y,
               background, color, border, border_radius
        FROM mindmap.nodes
        WHERE mind_map_id = $1
        ORDER BY ordinal ASC
        "#,
    )
    .bind(id.0)
    .fetch_all(&mut *conn)
    .await
    .map_err(|err| db_err("Failed to query mind map nodes", err))?;

    let edges = sqlx::query_as::<_, EdgeRow>(
        r#"
        SELECT id, source, target, edge_type, stroke, stroke_width
        FROM mindmap.edges
        WHERE mind_map_id = $1
        ORDER BY ordinal ASC
        "#,
    )
    .bind(id.0)
    .fetch_all(&mut *conn)
    .await
    .map_err(|err| db_err("Failed to query mind map edges", err))?;

    Ok((nodes, edges))
}

/// Nodes go in before edges so the edge foreign keys always resolve.
async fn write_graph_contents(
    conn: &mut PgConnection,
    id: MindMapId,
    definition: &GraphDefinition,
) -> Result<()> {
    for (ordinal, node) in definition.nodes.iter().enumerate() {
        let style = node.style.clone().unwrap_or_default();
        sqlx::query(
            r#"
            INSERT INTO mindmap.nodes (
                mind_map_id, id, ordinal, node_type, label, description,
                position_x, position_y, background, color, border, border_radius
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(id.0)
        .bind(node.id.as_str())
        .bind(ordinal as i32)
        .bind(&node.kind)
        .bind(&node.label)
        .bind(&node.description)
        .bind(node.position.x)
        .bind(node.position.y)
        .bind(&style.background)
        .bind(&style.color)
        .bind(&style.border)
        .bind(&style.border_radius)
        .execute(&mut *conn)
        .await
        .map_err(|err| write_err("Failed to write mind map nodes", id, err))?;
    }

    for (ordinal, edge) in definition.edges.iter().enumerate() {
        let style = edge.style.clone().unwrap_or_default();
        sqlx::query(
            r#"
            INSERT INTO mindmap.edges (
                mind_map_id, id, ordinal, source, target, edge_type, stroke, stroke_width
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(id.0)
        .bind(edge.id.as_str())
        .bind(ordinal as i32)
        .bind(edge.source.as_str())
        .bind(edge.target.as_str())
        .bind(&edge.kind)
        .bind(&style.stroke)
        .bind(style.stroke_width)
        .execute(&mut *conn)
        .await
        .map_err(|err| write_err("Failed to write mind map edges", id, err))?;
    }

    Ok(())
}

/// Postgres-backed [`MindMapStore`].
///
/// Replace runs in one transaction holding a row lock on the mind map, so two writers for
/// the same id are applied one after the other (last write wins). Delete is a single
/// cascading statement.
#[derive(Clone)]
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|err| db_err("Failed to connect to database", err))?;
        Ok(Self::new(Arc::new(pool)))
    }

    pub fn pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }
}

#[async_trait]
impl MindMapStore for PgStore {
    async fn list_mind_maps(&self, owner: UserId) -> Result<Vec<MindMapSummary>> {
        let rows = sqlx::query_as::<_, MindMapSummaryRow>(
            r#"
            SELECT
                m.id,
                m.title,
                m.description,
                m.created_at,
                m.updated_at,
                COALESCE(n.node_count, 0) AS node_count,
                COALESCE(e.edge_count, 0) AS edge_count
            FROM mindmap.mind_maps m
            LEFT JOIN (
                SELECT mind_map_id, COUNT(*)::bigint AS node_count
                FROM mindmap.nodes
                GROUP BY mind_map_id
            ) n
            ON n.mind_map_id = m.id
            LEFT JOIN (
                SELECT mind_map_id, COUNT(*)::bigint AS edge_count
                FROM mindmap.edges
                GROUP BY mind_map_id
            ) e
            ON e.mind_map_id = m.id
            WHERE m.owner_id = $1
            ORDER BY m.updated_at DESC, m.id DESC
            "#,
        )
        .bind(owner.0)
        .fetch_all(&*self.pool)
        .await
        .map_err(|err| db_err("Failed to list mind maps", err))?;

        Ok(rows.into_iter().map(MindMapSummary::from).collect())
    }

    async fn get_mind_map(&self, id: MindMapId, owner: UserId) -> Result<MindMap> {
        // Read from one snapshot so a concurrent replace is seen entirely or not at all.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| db_err("Failed to start transaction", err))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|err| db_err("Failed to start transaction", err))?;

        let row = load_owned_mind_map(&mut *tx, id, owner, false).await?;
        let (nodes, edges) = load_contents(&mut *tx, id).await?;

        tx.commit()
            .await
            .map_err(|err| db_err("Failed to commit transaction", err))?;

        Ok(hydrate_mind_map(row, nodes, edges))
    }

    async fn create_mind_map(
        &self,
        owner: UserId,
        payload: CreateMindMapPayload,
    ) -> Result<MindMap> {
        let new = payload.normalize()?;
        let id = MindMapId::new_random();

        let row = sqlx::query_as::<_, MindMapRow>(
            r#"
            INSERT INTO mindmap.mind_maps (id, owner_id, title, description)
            VALUES ($1, $2, $3, $4)
            RETURNING id, owner_id, title, description, created_at, updated_at
            "#,
        )
        .bind(id.0)
        .bind(owner.0)
        .bind(&new.title)
        .bind(&new.description)
        .fetch_one(&*self.pool)
        .await
        .map_err(|err| db_err("Failed to create mind map", err))?;

        tracing::info!(mind_map_id = %id, owner = %owner, "created mind map");
        Ok(hydrate_mind_map(row, Vec::new(), Vec::new()))
    }

    async fn replace_mind_map_graph(
        &self,
        id: MindMapId,
        owner: UserId,
        payload: ReplaceGraphPayload,
    ) -> Result<MindMap> {
        let definition = payload.normalize()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| db_err("Failed to start transaction", err))?;

        load_owned_mind_map(&mut *tx, id, owner, true).await?;

        let row = sqlx::query_as::<_, MindMapRow>(
            r#"
            UPDATE mindmap.mind_maps
            SET title = $1,
                description = $2,
                updated_at = GREATEST(clock_timestamp(), updated_at + INTERVAL '1 microsecond')
            WHERE id = $3
            RETURNING id, owner_id, title, description, created_at, updated_at
            "#,
        )
        .bind(&definition.title)
        .bind(&definition.description)
        .bind(id.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| db_err("Failed to update mind map", err))?;

        sqlx::query(
            r#"
            DELETE FROM mindmap.edges
            WHERE mind_map_id = $1
            "#,
        )
        .bind(id.0)
        .execute(&mut *tx)
        .await
        .map_err(|err| db_err("Failed to replace mind map edges", err))?;

        sqlx::query(
            r#"
            DELETE FROM mindmap.nodes
            WHERE mind_map_id = $1
            "#,
        )
        .bind(id.0)
        .execute(&mut *tx)
        .await
        .map_err(|err| db_err("Failed to replace mind map nodes", err))?;

        write_graph_contents(&mut *tx, id, &definition).await?;

        tx.commit()
            .await
            .map_err(|err| db_err("Failed to commit transaction", err))?;

        tracing::info!(
            mind_map_id = %id,
            nodes = definition.nodes.len(),
            edges = definition.edges.len(),
            "replaced mind map graph"
        );
        Ok(MindMap {
            id,
            owner_id: UserId(row.owner_id),
            title: row.title,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
            nodes: definition.nodes,
            edges: definition.edges,
        })
    }

    async fn delete_mind_map(&self, id: MindMapId, owner: UserId) -> Result<()> {
        // Nodes and edges go with the row through ON DELETE CASCADE in the same statement.
        let deleted = sqlx::query(
            r#"
            DELETE FROM mindmap.mind_maps
            WHERE id = $1
              AND owner_id = $2
            "#,
        )
        .bind(id.0)
        .bind(owner.0)
        .execute(&*self.pool)
        .await
        .map_err(|err| db_err("Failed to delete mind map", err))?;

        if deleted.rows_affected() == 0 {
            return Err(missing_mind_map(id));
        }

        tracing::info!(mind_map_id = %id, "deleted mind map");
        Ok(())
    }
}
