use async_trait::async_trait;
use common::{OrderId, SagaId, UserId};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{Result, Saga, SagaParts, SagaStep, SagaStore, StoreError};

const SELECT_SAGA: &str = r#"
    SELECT id, current_step, order_id, user_id, error_reason, version, created_at, updated_at
    FROM sagas
"#;

/// PostgreSQL-backed saga store implementation.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_saga(row: PgRow) -> Result<Saga> {
        let step: String = row.try_get("current_step")?;
        let current_step = step
            .parse::<SagaStep>()
            .map_err(|e| StoreError::InvalidStep(e.0))?;

        Ok(Saga::from_parts(SagaParts {
            id: SagaId::from_uuid(row.try_get::<Uuid, _>("id")?),
            current_step,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            error_reason: row.try_get("error_reason")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        }))
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    #[tracing::instrument(skip(self, saga), fields(saga_id = %saga.id(), order_id = %saga.order_id()))]
    async fn create(&self, saga: &Saga) -> Result<SagaId> {
        sqlx::query(
            r#"
            INSERT INTO sagas (id, current_step, order_id, user_id, error_reason, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(saga.id().as_uuid())
        .bind(saga.current_step().as_str())
        .bind(saga.order_id().as_uuid())
        .bind(saga.user_id().as_uuid())
        .bind(saga.error_reason())
        .bind(saga.version())
        .bind(saga.created_at())
        .bind(saga.updated_at())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                match db_err.constraint() {
                    Some("unique_saga_order") => return StoreError::DuplicateOrder(saga.order_id()),
                    Some("sagas_pkey") => return StoreError::Duplicate(saga.id()),
                    _ => {}
                }
            }
            StoreError::Database(e)
        })?;

        Ok(saga.id())
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, id: SagaId) -> Result<Saga> {
        let row = sqlx::query(&format!("{SELECT_SAGA} WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::row_to_saga(row),
            None => Err(StoreError::NotFound(id)),
        }
    }

    #[tracing::instrument(skip(self))]
    async fn find_by_order(&self, order_id: OrderId) -> Result<Option<Saga>> {
        let row = sqlx::query(&format!("{SELECT_SAGA} WHERE order_id = $1"))
            .bind(order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_saga).transpose()
    }

    #[tracing::instrument(skip(self, saga), fields(saga_id = %saga.id(), step = %saga.current_step()))]
    async fn update(&self, saga: &Saga) -> Result<Saga> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE sagas
            SET current_step = $2, error_reason = $3, updated_at = $4, version = version + 1
            WHERE id = $1 AND version = $5
            "#,
        )
        .bind(saga.id().as_uuid())
        .bind(saga.current_step().as_str())
        .bind(saga.error_reason())
        .bind(saga.updated_at())
        .bind(saga.version())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a missing saga from a stale read
            let actual: Option<i64> = sqlx::query_scalar("SELECT version FROM sagas WHERE id = $1")
                .bind(saga.id().as_uuid())
                .fetch_optional(&mut *tx)
                .await?;

            return Err(match actual {
                None => StoreError::NotFound(saga.id()),
                Some(actual) => StoreError::VersionConflict {
                    saga_id: saga.id(),
                    expected: saga.version(),
                    actual,
                },
            });
        }

        tx.commit().await?;

        let mut updated = saga.clone();
        updated.set_version(saga.version() + 1);
        Ok(updated)
    }
}
