//! PostgreSQL stock ledger
//!
//! Uses `warehouse_stored_products_tb` for the counters and
//! `stock_operations_tb` as the per-transfer decision journal. The journal row
//! and the stock write commit in the same transaction.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, warn};

use super::{CreditOutcome, DecrementOutcome, OpType, Refusal, StockLedger, journal};
use crate::db::SafeRow;
use crate::transfer::error::TransferError;
use crate::transfer::types::{TransferId, WarehouseStockKey};

pub struct PgStockLedger {
    pool: PgPool,
}

impl PgStockLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Claim the journal slot. `false` means an earlier call already holds it.
    async fn claim(
        tx: &mut Transaction<'_, Postgres>,
        transfer_id: TransferId,
        op_type: OpType,
        key: WarehouseStockKey,
        quantity: i64,
        result: &str,
    ) -> Result<bool, TransferError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO stock_operations_tb
                (transfer_id, op_type, shop_product_id, warehouse_id, quantity, result)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (transfer_id, op_type) DO NOTHING
            "#,
        )
        .bind(transfer_id.to_string())
        .bind(op_type.as_str())
        .bind(key.shop_product_id)
        .bind(key.warehouse_id)
        .bind(quantity)
        .bind(result)
        .execute(&mut **tx)
        .await?;

        Ok(inserted.rows_affected() > 0)
    }

    async fn settle(
        tx: &mut Transaction<'_, Postgres>,
        transfer_id: TransferId,
        result: &str,
        observed_stock: Option<i64>,
    ) -> Result<(), TransferError> {
        sqlx::query(
            r#"
            UPDATE stock_operations_tb SET result = $3, observed_stock = $4
            WHERE transfer_id = $1 AND op_type = $2
            "#,
        )
        .bind(transfer_id.to_string())
        .bind(OpType::Decrement.as_str())
        .bind(result)
        .bind(observed_stock)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Replay a decision recorded by an earlier, committed call
    async fn recorded_decision(
        tx: &mut Transaction<'_, Postgres>,
        transfer_id: TransferId,
    ) -> Result<DecrementOutcome, TransferError> {
        let row = sqlx::query(
            r#"
            SELECT result, observed_stock FROM stock_operations_tb
            WHERE transfer_id = $1 AND op_type = $2
            "#,
        )
        .bind(transfer_id.to_string())
        .bind(OpType::Decrement.as_str())
        .fetch_one(&mut **tx)
        .await?;

        let result: String = row.try_get_log("result").ok_or_else(|| {
            TransferError::DatabaseError("stock_operations_tb.result unreadable".to_string())
        })?;
        let observed: Option<i64> = row.try_get_log("observed_stock").flatten();

        match result.as_str() {
            journal::APPLIED => Ok(DecrementOutcome::AlreadyApplied),
            journal::INSUFFICIENT => Ok(DecrementOutcome::AlreadyRefused(Refusal::Insufficient {
                available: observed.unwrap_or(0),
            })),
            journal::MISSING => Ok(DecrementOutcome::AlreadyRefused(Refusal::Missing)),
            other => Err(TransferError::DatabaseError(format!(
                "unexpected journal result '{}' for transfer {}",
                other, transfer_id
            ))),
        }
    }
}

#[async_trait]
impl StockLedger for PgStockLedger {
    async fn balance(&self, key: WarehouseStockKey) -> Result<Option<i64>, TransferError> {
        let stock: Option<i64> = sqlx::query_scalar(
            "SELECT stock FROM warehouse_stored_products_tb WHERE shop_product_id = $1 AND warehouse_id = $2",
        )
        .bind(key.shop_product_id)
        .bind(key.warehouse_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(stock)
    }

    async fn decrement(
        &self,
        transfer_id: TransferId,
        key: WarehouseStockKey,
        quantity: i64,
    ) -> Result<DecrementOutcome, TransferError> {
        let mut tx = self.pool.begin().await?;

        // A concurrent call for the same transfer blocks here until ours commits
        if !Self::claim(&mut tx, transfer_id, OpType::Decrement, key, quantity, journal::PENDING)
            .await?
        {
            let replay = Self::recorded_decision(&mut tx, transfer_id).await?;
            tx.rollback().await?;
            debug!(transfer_id = %transfer_id, key = %key, outcome = ?replay, "Decrement already decided");
            return Ok(replay);
        }

        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE warehouse_stored_products_tb
            SET stock = stock - $1, updated_at = NOW()
            WHERE shop_product_id = $2 AND warehouse_id = $3 AND stock >= $1
            RETURNING stock
            "#,
        )
        .bind(quantity)
        .bind(key.shop_product_id)
        .bind(key.warehouse_id)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match remaining {
            Some(remaining) => {
                Self::settle(&mut tx, transfer_id, journal::APPLIED, Some(remaining + quantity))
                    .await?;
                DecrementOutcome::Applied { remaining }
            }
            None => {
                let available: Option<i64> = sqlx::query_scalar(
                    "SELECT stock FROM warehouse_stored_products_tb WHERE shop_product_id = $1 AND warehouse_id = $2",
                )
                .bind(key.shop_product_id)
                .bind(key.warehouse_id)
                .fetch_optional(&mut *tx)
                .await?;

                let refusal = match available {
                    Some(available) => {
                        Self::settle(&mut tx, transfer_id, journal::INSUFFICIENT, Some(available))
                            .await?;
                        Refusal::Insufficient { available }
                    }
                    None => {
                        Self::settle(&mut tx, transfer_id, journal::MISSING, None).await?;
                        Refusal::Missing
                    }
                };
                warn!(transfer_id = %transfer_id, key = %key, quantity, %refusal, "Decrement refused");
                DecrementOutcome::Refused(refusal)
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn credit(
        &self,
        transfer_id: TransferId,
        key: WarehouseStockKey,
        quantity: i64,
    ) -> Result<CreditOutcome, TransferError> {
        let mut tx = self.pool.begin().await?;

        if !Self::claim(&mut tx, transfer_id, OpType::Credit, key, quantity, journal::APPLIED).await?
        {
            tx.rollback().await?;
            return Ok(CreditOutcome::AlreadyApplied);
        }

        let balance: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO warehouse_stored_products_tb (shop_product_id, warehouse_id, stock)
            VALUES ($1, $2, $3)
            ON CONFLICT (shop_product_id, warehouse_id)
            DO UPDATE SET stock = warehouse_stored_products_tb.stock + EXCLUDED.stock,
                          updated_at = NOW()
            RETURNING stock
            "#,
        )
        .bind(key.shop_product_id)
        .bind(key.warehouse_id)
        .bind(quantity)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CreditOutcome::Applied { balance })
    }
}
