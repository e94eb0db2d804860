use std::collections::HashMap;
use std::future::Future;

use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{map_db_error, EngineResult};

/// Read-only view of which manager is responsible for each property.
pub trait AssignmentResolver: Send + Sync {
    fn resolve_manager(
        &self,
        property_id: Uuid,
    ) -> impl Future<Output = EngineResult<Option<Uuid>>> + Send;

    /// Informational count stored on every KPI row the manager owns.
    fn count_properties(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> impl Future<Output = EngineResult<i64>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Assignment {
    organization_id: Uuid,
    user_id: Uuid,
}

#[derive(Debug, Default)]
pub struct InMemoryAssignments {
    by_property: RwLock<HashMap<Uuid, Assignment>>,
}

impl InMemoryAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any previous manager of the property.
    pub async fn assign(&self, organization_id: Uuid, property_id: Uuid, user_id: Uuid) {
        self.by_property.write().await.insert(
            property_id,
            Assignment {
                organization_id,
                user_id,
            },
        );
    }

    pub async fn unassign(&self, property_id: Uuid) {
        self.by_property.write().await.remove(&property_id);
    }
}

impl AssignmentResolver for InMemoryAssignments {
    async fn resolve_manager(&self, property_id: Uuid) -> EngineResult<Option<Uuid>> {
        Ok(self
            .by_property
            .read()
            .await
            .get(&property_id)
            .map(|assignment| assignment.user_id))
    }

    async fn count_properties(&self, organization_id: Uuid, user_id: Uuid) -> EngineResult<i64> {
        let count = self
            .by_property
            .read()
            .await
            .values()
            .filter(|assignment| {
                assignment.organization_id == organization_id && assignment.user_id == user_id
            })
            .count();
        Ok(count as i64)
    }
}

#[derive(Debug, Clone)]
pub struct PgAssignmentResolver {
    pool: PgPool,
}

impl PgAssignmentResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AssignmentResolver for PgAssignmentResolver {
    async fn resolve_manager(&self, property_id: Uuid) -> EngineResult<Option<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id
             FROM property_assignments
             WHERE property_id = $1
             LIMIT 1",
        )
        .bind(property_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_db_error)
    }

    async fn count_properties(&self, organization_id: Uuid, user_id: Uuid) -> EngineResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*)::bigint
             FROM property_assignments
             WHERE organization_id = $1 AND user_id = $2",
        )
        .bind(organization_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_db_error)
    }
}
