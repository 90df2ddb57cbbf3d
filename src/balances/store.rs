use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgExecutor, PgPool, Postgres, Transaction};
use tracing::debug;

use crate::beacon_chain::Slot;

use super::BalanceRecord;

/// Inserts all records in one statement. Records whose (validator_index, slot) already exists
/// are skipped, the first write wins. Returns the number of rows inserted.
pub async fn write_balances(
    executor: impl PgExecutor<'_>,
    records: &[BalanceRecord],
) -> sqlx::Result<u64> {
    let validator_indexes: Vec<i32> = records.iter().map(|r| r.validator_index).collect();
    let slots: Vec<i32> = records.iter().map(|r| r.slot.0).collect();
    let balances: Vec<i64> = records.iter().map(|r| r.balance.into()).collect();

    sqlx::query(
        "
        INSERT INTO balance (validator_index, slot, balance)
        SELECT * FROM UNNEST($1::int4[], $2::int4[], $3::int8[])
        ON CONFLICT (validator_index, slot) DO NOTHING
        ",
    )
    .bind(&validator_indexes)
    .bind(&slots)
    .bind(&balances)
    .execute(executor)
    .await
    .map(|result| result.rows_affected())
}

pub async fn get_indexed_slots(executor: impl PgExecutor<'_>) -> sqlx::Result<Vec<Slot>> {
    sqlx::query_scalar::<Postgres, i32>(
        "
        SELECT DISTINCT slot FROM balance
        ",
    )
    .fetch_all(executor)
    .await
    .map(|slots| slots.into_iter().map(Slot).collect())
}

/// The unit of work the indexer writes through. Writes accumulate in an open transaction until
/// `commit`, nothing written is visible or durable before that.
#[async_trait]
pub trait BalanceStore {
    async fn get_indexed_slots(&mut self) -> Result<Vec<Slot>>;
    async fn write_balances(&mut self, records: &[BalanceRecord]) -> Result<()>;
    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;
}

pub struct BalanceStorePostgres {
    db_pool: PgPool,
    transaction: Option<Transaction<'static, Postgres>>,
}

impl BalanceStorePostgres {
    pub fn new(db_pool: PgPool) -> Self {
        Self {
            db_pool,
            transaction: None,
        }
    }
}

#[async_trait]
impl BalanceStore for BalanceStorePostgres {
    async fn get_indexed_slots(&mut self) -> Result<Vec<Slot>> {
        get_indexed_slots(&self.db_pool)
            .await
            .context("failed to get distinct indexed slots")
    }

    async fn write_balances(&mut self, records: &[BalanceRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut transaction = match self.transaction.take() {
            Some(transaction) => transaction,
            None => self
                .db_pool
                .begin()
                .await
                .context("failed to begin balances transaction")?,
        };

        // On error the transaction drops here, which rolls back the whole uncommitted batch.
        let inserted = write_balances(&mut *transaction, records)
            .await
            .context("failed to insert balances")?;
        debug!(
            inserted,
            skipped = records.len() as u64 - inserted,
            "wrote balances"
        );

        self.transaction = Some(transaction);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if let Some(transaction) = self.transaction.take() {
            transaction
                .commit()
                .await
                .context("failed to commit balances transaction")?;
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(transaction) = self.transaction.take() {
            transaction
                .rollback()
                .await
                .context("failed to roll back balances transaction")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_context::test_context;

    use super::*;
    use crate::{db::tests::TestDb, units::GweiNewtype};

    fn record(validator_index: i32, slot: i32, balance: i64) -> BalanceRecord {
        BalanceRecord {
            validator_index,
            slot: Slot(slot),
            balance: GweiNewtype(balance),
        }
    }

    async fn count_rows(db_pool: &PgPool) -> i64 {
        sqlx::query_scalar::<Postgres, i64>("SELECT COUNT(*) FROM balance")
            .fetch_one(db_pool)
            .await
            .unwrap()
    }

    #[ignore = "requires a postgres test database"]
    #[test_context(TestDb)]
    #[tokio::test]
    async fn write_balances_is_idempotent_test(test_db: &TestDb) {
        let records = vec![record(7, 500, 32_000_000_000), record(9, 500, 32_000_000_000)];

        let inserted = write_balances(&test_db.pool, &records).await.unwrap();
        assert_eq!(inserted, 2);

        // Replaying with a different amount changes nothing, the first write wins.
        let replay = vec![record(7, 500, 1), record(9, 500, 1)];
        let inserted = write_balances(&test_db.pool, &replay).await.unwrap();
        assert_eq!(inserted, 0);

        assert_eq!(count_rows(&test_db.pool).await, 2);
        let balance = sqlx::query_scalar::<Postgres, i64>(
            "SELECT balance FROM balance WHERE validator_index = 7 AND slot = 500",
        )
        .fetch_one(&test_db.pool)
        .await
        .unwrap();
        assert_eq!(balance, 32_000_000_000);
    }

    #[ignore = "requires a postgres test database"]
    #[test_context(TestDb)]
    #[tokio::test]
    async fn get_indexed_slots_test(test_db: &TestDb) {
        let records = vec![record(1, 100, 1), record(2, 100, 1), record(1, 101, 1)];
        write_balances(&test_db.pool, &records).await.unwrap();

        let mut slots = get_indexed_slots(&test_db.pool).await.unwrap();
        slots.sort();
        assert_eq!(slots, vec![Slot(100), Slot(101)]);
    }

    #[ignore = "requires a postgres test database"]
    #[test_context(TestDb)]
    #[tokio::test]
    async fn uncommitted_writes_are_invisible_test(test_db: &TestDb) {
        let mut store = BalanceStorePostgres::new(test_db.pool.clone());

        store.write_balances(&[record(1, 100, 1)]).await.unwrap();
        assert!(store.get_indexed_slots().await.unwrap().is_empty());

        store.commit().await.unwrap();
        assert_eq!(store.get_indexed_slots().await.unwrap(), vec![Slot(100)]);
    }

    #[ignore = "requires a postgres test database"]
    #[test_context(TestDb)]
    #[tokio::test]
    async fn rollback_discards_batch_test(test_db: &TestDb) {
        let mut store = BalanceStorePostgres::new(test_db.pool.clone());

        store.write_balances(&[record(1, 100, 1)]).await.unwrap();
        store.write_balances(&[record(1, 101, 1)]).await.unwrap();
        store.rollback().await.unwrap();

        assert_eq!(count_rows(&test_db.pool).await, 0);
    }
}
