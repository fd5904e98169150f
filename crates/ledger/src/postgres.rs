use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    LedgerError, Money, OperationId, Result, Transaction, TransactionId, TransactionQuery,
    TransactionType, UserId, Wallet, WalletId, WalletStatus, WithdrawId, WithdrawQuery,
    WithdrawRequest,
    store::{AdjustOptions, StatusTransition, TransactionLog, WalletStore, WithdrawStore},
};

const WALLET_COLUMNS: &str = "id, user_id, balance, status, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, wallet_id, tx_type, amount, balance_after, \
     related_wallet_id, reason, method, operation_id, status, created_at";

const WITHDRAW_COLUMNS: &str = "id, user_id, wallet_id, amount, fee, actual_amount, method, \
     account, status, reviewer_id, reason, reservation_tx_id, created_at, updated_at, \
     reviewed_at, processed_at";

/// Runs the ledger schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// SQLSTATE raised when `balance + delta` does not fit in a BIGINT.
const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";

/// Returns true if the error is a violation of the named unique constraint.
fn violates(err: &sqlx::Error, constraint: &str) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.constraint() == Some(constraint))
}

/// Maps an error from a balance update, reporting BIGINT overflow as such.
fn balance_error(err: sqlx::Error, wallet_id: WalletId) -> LedgerError {
    let overflow = matches!(
        &err,
        sqlx::Error::Database(db_err)
            if db_err.code().as_deref() == Some(NUMERIC_VALUE_OUT_OF_RANGE)
    );
    if overflow {
        LedgerError::BalanceOverflow(wallet_id)
    } else {
        LedgerError::Database(err)
    }
}

/// Applies `delta` if the guard holds, returning the updated wallet.
///
/// `None` means the guard rejected the change or the wallet does not exist;
/// the row stays locked until the caller's transaction ends.
async fn guarded_adjust(
    conn: &mut PgConnection,
    wallet_id: WalletId,
    delta: Money,
    options: AdjustOptions,
) -> Result<Option<Wallet>> {
    let sql = format!(
        "UPDATE wallets SET balance = balance + $2, updated_at = NOW() \
         WHERE id = $1 AND balance + $2 >= 0 AND (status = 'active' OR $3) \
         RETURNING {WALLET_COLUMNS}"
    );
    sqlx::query(&sql)
        .bind(wallet_id.as_uuid())
        .bind(delta.cents())
        .bind(options.allow_frozen)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| balance_error(e, wallet_id))?
        .map(row_to_wallet)
        .transpose()
}

async fn fetch_wallet(pool: &PgPool, wallet_id: WalletId) -> Result<Option<Wallet>> {
    let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1");
    sqlx::query(&sql)
        .bind(wallet_id.as_uuid())
        .fetch_optional(pool)
        .await?
        .map(row_to_wallet)
        .transpose()
}

/// Works out why a guarded update matched no row.
async fn rejection(
    pool: &PgPool,
    wallet_id: WalletId,
    delta: Money,
    options: AdjustOptions,
) -> LedgerError {
    match fetch_wallet(pool, wallet_id).await {
        Ok(None) => LedgerError::WalletNotFound(wallet_id),
        Ok(Some(wallet)) if wallet.is_frozen() && !options.allow_frozen => {
            LedgerError::WalletFrozen(wallet_id)
        }
        Ok(Some(wallet)) => LedgerError::InsufficientBalance {
            wallet_id,
            balance: wallet.balance,
            requested: delta.negated(),
        },
        Err(e) => e,
    }
}

fn limit_offset(limit: Option<usize>, offset: Option<usize>) -> (i64, i64) {
    let limit = limit.map_or(i64::MAX, |l| i64::try_from(l).unwrap_or(i64::MAX));
    let offset = offset.map_or(0, |o| i64::try_from(o).unwrap_or(i64::MAX));
    (limit, offset)
}

fn row_to_wallet(row: PgRow) -> Result<Wallet> {
    let status: String = row.try_get("status")?;
    Ok(Wallet {
        id: WalletId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        balance: Money::from_cents(row.try_get("balance")?),
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_transaction(row: PgRow) -> Result<Transaction> {
    let tx_type: String = row.try_get("tx_type")?;
    let status: String = row.try_get("status")?;
    Ok(Transaction {
        id: TransactionId::from_uuid(row.try_get("id")?),
        wallet_id: WalletId::from_uuid(row.try_get("wallet_id")?),
        tx_type: tx_type.parse()?,
        amount: Money::from_cents(row.try_get("amount")?),
        balance_after: Money::from_cents(row.try_get("balance_after")?),
        related_wallet_id: row
            .try_get::<Option<Uuid>, _>("related_wallet_id")?
            .map(WalletId::from_uuid),
        reason: row.try_get("reason")?,
        method: row.try_get("method")?,
        operation_id: row
            .try_get::<Option<Uuid>, _>("operation_id")?
            .map(OperationId::from_uuid),
        status: status.parse()?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_withdraw(row: PgRow) -> Result<WithdrawRequest> {
    let status: String = row.try_get("status")?;
    Ok(WithdrawRequest {
        id: WithdrawId::from_uuid(row.try_get("id")?),
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        wallet_id: WalletId::from_uuid(row.try_get("wallet_id")?),
        amount: Money::from_cents(row.try_get("amount")?),
        fee: Money::from_cents(row.try_get("fee")?),
        actual_amount: Money::from_cents(row.try_get("actual_amount")?),
        method: row.try_get("method")?,
        account: row.try_get("account")?,
        status: status.parse()?,
        reviewer_id: row
            .try_get::<Option<Uuid>, _>("reviewer_id")?
            .map(UserId::from_uuid),
        reason: row.try_get("reason")?,
        reservation_tx_id: row
            .try_get::<Option<Uuid>, _>("reservation_tx_id")?
            .map(TransactionId::from_uuid),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        reviewed_at: row.try_get("reviewed_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

/// PostgreSQL-backed wallet store.
///
/// Balance changes are a single conditional `UPDATE`, so the guard and the
/// write happen under the row lock Postgres takes for the update. An
/// overflowing change is reported as `BalanceOverflow`.
#[derive(Clone)]
pub struct PostgresWalletStore {
    pool: PgPool,
}

impl PostgresWalletStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl WalletStore for PostgresWalletStore {
    async fn create_wallet(&self, wallet: Wallet) -> Result<Wallet> {
        let sql = format!(
            "INSERT INTO wallets ({WALLET_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {WALLET_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(wallet.id.as_uuid())
            .bind(wallet.user_id.as_uuid())
            .bind(wallet.balance.cents())
            .bind(wallet.status.as_str())
            .bind(wallet.created_at)
            .bind(wallet.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if violates(&e, "unique_wallet_user") {
                    LedgerError::WalletAlreadyExists(wallet.user_id)
                } else {
                    LedgerError::Database(e)
                }
            })?;
        row_to_wallet(row)
    }

    async fn get_wallet(&self, wallet_id: WalletId) -> Result<Option<Wallet>> {
        fetch_wallet(&self.pool, wallet_id).await
    }

    async fn get_wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE user_id = $1");
        sqlx::query(&sql)
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_wallet)
            .transpose()
    }

    async fn adjust_balance(
        &self,
        wallet_id: WalletId,
        delta: Money,
        options: AdjustOptions,
    ) -> Result<Wallet> {
        let mut conn = self.pool.acquire().await?;
        match guarded_adjust(&mut conn, wallet_id, delta, options).await? {
            Some(wallet) => Ok(wallet),
            None => Err(rejection(&self.pool, wallet_id, delta, options).await),
        }
    }

    async fn set_status(&self, wallet_id: WalletId, status: WalletStatus) -> Result<Wallet> {
        let sql = format!(
            "UPDATE wallets SET status = $2, updated_at = NOW() WHERE id = $1 \
             RETURNING {WALLET_COLUMNS}"
        );
        sqlx::query(&sql)
            .bind(wallet_id.as_uuid())
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_wallet)
            .transpose()?
            .ok_or(LedgerError::WalletNotFound(wallet_id))
    }
}

/// PostgreSQL-backed transaction log.
///
/// Posting runs the guarded wallet `UPDATE` and the ledger `INSERT` in one
/// database transaction. The wallet row lock is held until commit, so a
/// wallet's entries get `seq` values in the order their balances changed.
#[derive(Clone)]
pub struct PostgresTransactionLog {
    pool: PgPool,
}

impl PostgresTransactionLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_transaction(conn: &mut PgConnection, transaction: &Transaction) -> Result<()> {
    let sql = format!(
        "INSERT INTO wallet_transactions ({TRANSACTION_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
    );
    sqlx::query(&sql)
        .bind(transaction.id.as_uuid())
        .bind(transaction.wallet_id.as_uuid())
        .bind(transaction.tx_type.as_str())
        .bind(transaction.amount.cents())
        .bind(transaction.balance_after.cents())
        .bind(transaction.related_wallet_id.map(|id| id.as_uuid()))
        .bind(&transaction.reason)
        .bind(&transaction.method)
        .bind(transaction.operation_id.map(|id| id.as_uuid()))
        .bind(transaction.status.as_str())
        .bind(transaction.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| match transaction.operation_id {
            Some(operation_id) if violates(&e, "unique_wallet_operation") => {
                LedgerError::DuplicateOperation {
                    wallet_id: transaction.wallet_id,
                    operation_id,
                }
            }
            _ => LedgerError::Database(e),
        })?;
    Ok(())
}

#[async_trait]
impl TransactionLog for PostgresTransactionLog {
    async fn post(
        &self,
        mut transaction: Transaction,
        options: AdjustOptions,
    ) -> Result<Transaction> {
        let wallet_id = transaction.wallet_id;
        let mut db = self.pool.begin().await?;

        let Some(wallet) = guarded_adjust(&mut db, wallet_id, transaction.amount, options).await?
        else {
            db.rollback().await?;
            return Err(rejection(&self.pool, wallet_id, transaction.amount, options).await);
        };

        transaction.balance_after = wallet.balance;
        insert_transaction(&mut db, &transaction).await?;
        db.commit().await?;
        Ok(transaction)
    }

    async fn void(&self, id: TransactionId) -> Result<bool> {
        let mut db = self.pool.begin().await?;

        let row = sqlx::query(
            "UPDATE wallet_transactions SET status = 'failed' \
             WHERE id = $1 AND status = 'success' RETURNING wallet_id, amount",
        )
        .bind(id.as_uuid())
        .fetch_optional(&mut *db)
        .await?;

        let Some(row) = row else {
            db.rollback().await?;
            return match self.get_transaction(id).await? {
                Some(_) => Ok(false),
                None => Err(LedgerError::TransactionNotFound(id)),
            };
        };

        let wallet_id = WalletId::from_uuid(row.try_get("wallet_id")?);
        let reversal = Money::from_cents(row.try_get("amount")?).negated();
        let options = AdjustOptions::allow_frozen();

        if guarded_adjust(&mut db, wallet_id, reversal, options)
            .await?
            .is_none()
        {
            db.rollback().await?;
            return Err(rejection(&self.pool, wallet_id, reversal, options).await);
        }

        db.commit().await?;
        Ok(true)
    }

    async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let sql = format!("SELECT {TRANSACTION_COLUMNS} FROM wallet_transactions WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_transaction)
            .transpose()
    }

    async fn find_by_operation(
        &self,
        wallet_id: WalletId,
        tx_type: TransactionType,
        operation_id: OperationId,
    ) -> Result<Option<Transaction>> {
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM wallet_transactions \
             WHERE wallet_id = $1 AND tx_type = $2 AND operation_id = $3 \
               AND status = 'success'"
        );
        sqlx::query(&sql)
            .bind(wallet_id.as_uuid())
            .bind(tx_type.as_str())
            .bind(operation_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_transaction)
            .transpose()
    }

    async fn list_for_wallet(
        &self,
        wallet_id: WalletId,
        query: &TransactionQuery,
    ) -> Result<Vec<Transaction>> {
        let (limit, offset) = limit_offset(query.limit, query.offset);
        let sql = format!(
            "SELECT {TRANSACTION_COLUMNS} FROM wallet_transactions \
             WHERE wallet_id = $1 \
               AND ($2::TEXT IS NULL OR tx_type = $2) \
               AND ($3::TEXT IS NULL OR status = $3) \
             ORDER BY seq ASC LIMIT $4 OFFSET $5"
        );
        let rows = sqlx::query(&sql)
            .bind(wallet_id.as_uuid())
            .bind(query.tx_type.map(|t| t.as_str()))
            .bind(query.status.map(|s| s.as_str()))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_transaction).collect()
    }
}

/// PostgreSQL-backed withdrawal request store.
#[derive(Clone)]
pub struct PostgresWithdrawStore {
    pool: PgPool,
}

impl PostgresWithdrawStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WithdrawStore for PostgresWithdrawStore {
    async fn insert_withdraw(&self, request: WithdrawRequest) -> Result<WithdrawRequest> {
        let sql = format!(
            "INSERT INTO withdraw_requests ({WITHDRAW_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        );
        sqlx::query(&sql)
            .bind(request.id.as_uuid())
            .bind(request.user_id.as_uuid())
            .bind(request.wallet_id.as_uuid())
            .bind(request.amount.cents())
            .bind(request.fee.cents())
            .bind(request.actual_amount.cents())
            .bind(&request.method)
            .bind(&request.account)
            .bind(request.status.as_str())
            .bind(request.reviewer_id.map(|id| id.as_uuid()))
            .bind(&request.reason)
            .bind(request.reservation_tx_id.map(|id| id.as_uuid()))
            .bind(request.created_at)
            .bind(request.updated_at)
            .bind(request.reviewed_at)
            .bind(request.processed_at)
            .execute(&self.pool)
            .await?;
        Ok(request)
    }

    async fn get_withdraw(&self, id: WithdrawId) -> Result<Option<WithdrawRequest>> {
        let sql = format!("SELECT {WITHDRAW_COLUMNS} FROM withdraw_requests WHERE id = $1");
        sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .map(row_to_withdraw)
            .transpose()
    }

    async fn list_withdraws(&self, query: &WithdrawQuery) -> Result<Vec<WithdrawRequest>> {
        let (limit, offset) = limit_offset(query.limit, query.offset);
        let sql = format!(
            "SELECT {WITHDRAW_COLUMNS} FROM withdraw_requests \
             WHERE ($1::UUID IS NULL OR user_id = $1) \
               AND ($2::TEXT IS NULL OR status = $2) \
             ORDER BY seq ASC LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query(&sql)
            .bind(query.user_id.map(|id| id.as_uuid()))
            .bind(query.status.map(|s| s.as_str()))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_withdraw).collect()
    }

    async fn transition(
        &self,
        id: WithdrawId,
        transition: StatusTransition,
    ) -> Result<WithdrawRequest> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {WITHDRAW_COLUMNS} FROM withdraw_requests WHERE id = $1 FOR UPDATE");
        let mut request = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .map(row_to_withdraw)
            .transpose()?
            .ok_or(LedgerError::WithdrawNotFound(id))?;

        if request.status != transition.from {
            return Err(LedgerError::StatusConflict {
                id,
                expected: transition.from,
                actual: request.status,
            });
        }

        transition.apply_to(&mut request);

        sqlx::query(
            "UPDATE withdraw_requests SET status = $2, reviewer_id = $3, reason = $4, \
             updated_at = $5, reviewed_at = $6, processed_at = $7 WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(request.status.as_str())
        .bind(request.reviewer_id.map(|id| id.as_uuid()))
        .bind(&request.reason)
        .bind(request.updated_at)
        .bind(request.reviewed_at)
        .bind(request.processed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(request)
    }
}
