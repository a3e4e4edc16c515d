use common::error::{AppError, Res};
use sqlx::{Executor, Postgres};

/// Records a provider event id. Returns false when the id was already seen,
/// which is the signal to drop the delivery without re-applying effects.
pub async fn record_event_if_new<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    event_id: &str,
    event_type: &str,
) -> Res<bool> {
    let result = sqlx::query(
        "INSERT INTO webhook_events (event_id, event_type)
         VALUES ($1, $2)
         ON CONFLICT (event_id) DO NOTHING",
    )
    .bind(event_id)
    .bind(event_type)
    .execute(executor)
    .await
    .map_err(AppError::from)?;

    Ok(result.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    async fn test_pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        PgPool::connect(&url).await.expect("connect to test database")
    }

    #[tokio::test]
    #[ignore = "needs a live Postgres with migrations applied"]
    async fn second_delivery_of_the_same_event_is_reported_as_seen() {
        let pool = test_pool().await;
        let event_id = format!("evt_{}", uuid::Uuid::new_v4());

        assert!(
            record_event_if_new(&pool, &event_id, "checkout.session.completed")
                .await
                .unwrap()
        );
        assert!(
            !record_event_if_new(&pool, &event_id, "checkout.session.completed")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    #[ignore = "needs a live Postgres with migrations applied"]
    async fn rolled_back_event_record_leaves_the_redelivery_fresh() {
        let pool = test_pool().await;
        let event_id = format!("evt_{}", uuid::Uuid::new_v4());

        // Recording inside a transaction that never commits, as the webhook
        // handler does when applying the event's effects fails.
        {
            let mut tx = pool.begin().await.unwrap();
            assert!(
                record_event_if_new(&mut *tx, &event_id, "checkout.session.completed")
                    .await
                    .unwrap()
            );
        }

        // The redelivery must not be treated as a duplicate.
        assert!(
            record_event_if_new(&pool, &event_id, "checkout.session.completed")
                .await
                .unwrap()
        );
    }
}
