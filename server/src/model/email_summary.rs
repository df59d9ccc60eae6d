use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    entity::prelude::*,
    sea_query::{extension::postgres::PgExpr, Expr, OnConflict},
    ActiveValue::Set,
    Condition, ConnectionTrait, QueryOrder, QuerySelect, Schema,
};

use crate::pipeline::traits::ResultStore;

use super::enrichment::EnrichmentResult;

pub mod entity {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "email_summary")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub message_id: String,
        #[sea_orm(indexed)]
        pub user_id: i32,
        pub summary: String,
        pub category: String,
        pub company: Option<String>,
        #[sea_orm(column_type = "JsonBinary")]
        pub result: Json,
        pub created_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

use entity::{ActiveModel, Column, Entity as EmailSummary};

/// Enrichment results persisted in Postgres, one row per message
#[derive(Debug, Clone)]
pub struct PgResultStore {
    conn: DatabaseConnection,
}

impl PgResultStore {
    pub fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Create the table on first boot
    pub async fn ensure_schema(&self) -> Result<(), DbErr> {
        let backend = self.conn.get_database_backend();
        let schema = Schema::new(backend);
        let mut stmt = schema.create_table_from_entity(EmailSummary);
        stmt.if_not_exists();
        self.conn.execute(backend.build(&stmt)).await?;
        Ok(())
    }

    fn decode(model: entity::Model) -> anyhow::Result<(String, EnrichmentResult)> {
        let result = serde_json::from_value(model.result)
            .with_context(|| format!("Stored summary for {} is malformed", model.message_id))?;
        Ok((model.message_id, result))
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn get(&self, message_id: &str) -> anyhow::Result<Option<EnrichmentResult>> {
        let found = EmailSummary::find_by_id(message_id.to_string())
            .one(&self.conn)
            .await
            .context("Failed to look up stored summary")?;

        found
            .map(|model| Self::decode(model).map(|(_, result)| result))
            .transpose()
    }

    async fn put(
        &self,
        user_id: i32,
        message_id: &str,
        result: &EnrichmentResult,
    ) -> anyhow::Result<()> {
        let row = ActiveModel {
            message_id: Set(message_id.to_string()),
            user_id: Set(user_id),
            summary: Set(result.summary.clone()),
            category: Set(result.category.clone()),
            company: Set(result.company.clone()),
            result: Set(serde_json::to_value(result)?),
            created_at: Set(Utc::now().into()),
        };

        EmailSummary::insert(row)
            .on_conflict(
                OnConflict::column(Column::MessageId)
                    .update_columns([
                        Column::UserId,
                        Column::Summary,
                        Column::Category,
                        Column::Company,
                        Column::Result,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await
            .with_context(|| format!("Failed to save summary for {message_id}"))?;

        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: i32,
        query: Option<&str>,
        limit: u64,
    ) -> anyhow::Result<Vec<(String, EnrichmentResult)>> {
        let mut select = EmailSummary::find().filter(Column::UserId.eq(user_id));

        if let Some(q) = query.map(str::trim).filter(|q| !q.is_empty()) {
            let pattern = format!("%{q}%");
            select = select.filter(
                Condition::any()
                    .add(Expr::col(Column::Summary).ilike(&pattern))
                    .add(Expr::col(Column::Category).ilike(&pattern))
                    .add(Expr::col(Column::Company).ilike(&pattern)),
            );
        }

        let rows = select
            .order_by_desc(Column::CreatedAt)
            .limit(limit)
            .all(&self.conn)
            .await
            .context("Failed to list stored summaries")?;

        rows.into_iter().map(Self::decode).collect()
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::model::enrichment::sample_result;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn row(message_id: &str, result: &EnrichmentResult) -> entity::Model {
        entity::Model {
            message_id: message_id.to_string(),
            user_id: 1,
            summary: result.summary.clone(),
            category: result.category.clone(),
            company: result.company.clone(),
            result: serde_json::to_value(result).unwrap(),
            created_at: Utc::now().into(),
        }
    }

    #[tokio::test]
    async fn test_get_decodes_stored_json() {
        let stored = sample_result("internship");
        let conn = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![row("m1", &stored)]])
            .into_connection();
        let store = PgResultStore::new(conn);

        assert_eq!(store.get("m1").await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn test_put_upserts() {
        let conn = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 1,
            }])
            .into_connection();
        let store = PgResultStore::new(conn);

        store.put(1, "m1", &sample_result("ppt")).await.unwrap();
    }
}
