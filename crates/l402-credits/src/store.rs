use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::sync::{Mutex, MutexGuard};

use crate::error::L402Error;
use crate::ledger::{assess_settlement, LedgerPolicy, SettleOutcome};
use crate::payment::{Payment, PaymentRequest, PaymentStatus, Rail, SettlementEvent, User};

/// Repository for users, payment requests and settlement records.
///
/// Implementations must be thread-safe (`Send + Sync`) and must run
/// [`LedgerStore::settle`] and [`LedgerStore::consume_credits`] as single
/// atomic units of work.
pub trait LedgerStore: Send + Sync {
    /// Create a user with a zero balance.
    fn create_user(&self) -> Result<User, L402Error>;

    fn get_user(&self, user_id: &str) -> Result<Option<User>, L402Error>;

    /// Persist a new pending payment request. Fails if the correlation id is taken.
    fn insert_payment_request(&self, request: &PaymentRequest) -> Result<(), L402Error>;

    fn get_payment_request(&self, id: &str) -> Result<Option<PaymentRequest>, L402Error>;

    /// Settle the payment request named by `event.correlation_id`.
    ///
    /// Marking the request completed, crediting the user and appending the
    /// payment record commit together or not at all.
    fn settle(
        &self,
        event: &SettlementEvent,
        policy: &LedgerPolicy,
        now: i64,
    ) -> Result<SettleOutcome, L402Error>;

    /// Atomically debit `amount` credits. Never drives the balance negative.
    fn consume_credits(&self, user_id: &str, amount: i64) -> Result<User, L402Error>;

    /// Mark one pending request expired. Returns `false` if it was not pending.
    fn mark_expired(&self, id: &str) -> Result<bool, L402Error>;

    /// Mark every pending request whose expiry is before `now` as expired.
    fn expire_pending(&self, now: i64) -> Result<usize, L402Error>;

    /// Pending requests on `rail` that have not expired at `now`, oldest first.
    fn pending_requests(&self, rail: Rail, now: i64) -> Result<Vec<PaymentRequest>, L402Error>;

    /// Settlement records for a user, oldest first.
    fn payments_for_user(&self, user_id: &str) -> Result<Vec<Payment>, L402Error>;

    /// Next value of a persisted, strictly increasing counter (starts at 1).
    fn next_index(&self, counter: &str) -> Result<u64, L402Error>;
}

/// SQLite-backed ledger. Survives restarts.
pub struct SqliteLedgerStore {
    conn: Mutex<Connection>,
}

const REQUEST_COLUMNS: &str = "id, user_id, offer_id, rail, status, amount, currency, credits, \
                               created_at, expires_at, completed_at";

impl SqliteLedgerStore {
    /// Open (or create) the ledger database at `path`. `":memory:"` is accepted.
    pub fn open(path: &str) -> Result<Self, L402Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                credits INTEGER NOT NULL DEFAULT 0 CHECK (credits >= 0),
                credits_consumed INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                last_credit_update_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS payment_requests (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                offer_id TEXT NOT NULL,
                rail TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                amount INTEGER NOT NULL,
                currency TEXT NOT NULL,
                credits INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                completed_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_payment_requests_status
                ON payment_requests(status, expires_at);

            CREATE TABLE IF NOT EXISTS payments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                payment_request_id TEXT NOT NULL UNIQUE REFERENCES payment_requests(id),
                credits INTEGER NOT NULL,
                amount INTEGER NOT NULL,
                currency TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS counters (
                name TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, L402Error> {
        self.conn
            .lock()
            .map_err(|_| L402Error::Storage("database lock poisoned".to_string()))
    }

    /// Run raw SQL against the ledger database. Used by tests and tooling.
    pub fn execute_schema(&self, sql: &str) -> Result<(), L402Error> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        credits: row.get(1)?,
        credits_consumed: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn request_from_row(row: &Row<'_>) -> rusqlite::Result<PaymentRequest> {
    let rail: String = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(PaymentRequest {
        id: row.get(0)?,
        user_id: row.get(1)?,
        offer_id: row.get(2)?,
        rail: rail
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?,
        status: status
            .parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?,
        amount: row.get(5)?,
        currency: row.get(6)?,
        credits: row.get(7)?,
        created_at: row.get(8)?,
        expires_at: row.get(9)?,
        completed_at: row.get(10)?,
    })
}

fn query_user(conn: &Connection, user_id: &str) -> Result<Option<User>, L402Error> {
    let user = conn
        .query_row(
            "SELECT id, credits, credits_consumed, created_at FROM users WHERE id = ?1",
            params![user_id],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

fn query_request(conn: &Connection, id: &str) -> Result<Option<PaymentRequest>, L402Error> {
    let request = conn
        .query_row(
            &format!("SELECT {REQUEST_COLUMNS} FROM payment_requests WHERE id = ?1"),
            params![id],
            request_from_row,
        )
        .optional()?;
    Ok(request)
}

impl LedgerStore for SqliteLedgerStore {
    fn create_user(&self) -> Result<User, L402Error> {
        let conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        let id = uuid::Uuid::new_v4().to_string();

        conn.execute(
            "INSERT INTO users (id, credits, credits_consumed, created_at, last_credit_update_at)
             VALUES (?1, 0, 0, ?2, ?2)",
            params![id, now],
        )?;

        Ok(User {
            id,
            credits: 0,
            credits_consumed: 0,
            created_at: now,
        })
    }

    fn get_user(&self, user_id: &str) -> Result<Option<User>, L402Error> {
        let conn = self.conn()?;
        query_user(&conn, user_id)
    }

    fn insert_payment_request(&self, request: &PaymentRequest) -> Result<(), L402Error> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO payment_requests ({REQUEST_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                request.id,
                request.user_id,
                request.offer_id,
                request.rail.as_str(),
                request.status.as_str(),
                request.amount,
                request.currency,
                request.credits,
                request.created_at,
                request.expires_at,
                request.completed_at,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                L402Error::Storage(format!(
                    "payment request {} violates a ledger constraint: {e}",
                    request.id
                ))
            }
            other => other.into(),
        })?;
        Ok(())
    }

    fn get_payment_request(&self, id: &str) -> Result<Option<PaymentRequest>, L402Error> {
        let conn = self.conn()?;
        query_request(&conn, id)
    }

    fn settle(
        &self,
        event: &SettlementEvent,
        policy: &LedgerPolicy,
        now: i64,
    ) -> Result<SettleOutcome, L402Error> {
        let mut conn = self.conn()?;
        // IMMEDIATE takes the write lock up front so two deliveries of the same
        // event cannot both read `pending`.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let Some(request) = query_request(&tx, &event.correlation_id)? else {
            return Ok(SettleOutcome::NotFound);
        };

        if let Some(refusal) = assess_settlement(&request, event, policy, now) {
            return Ok(refusal);
        }

        let updated = tx.execute(
            "UPDATE payment_requests SET status = 'completed', completed_at = ?2
             WHERE id = ?1 AND status != 'completed'",
            params![request.id, now],
        )?;
        if updated != 1 {
            return Ok(SettleOutcome::AlreadySettled);
        }

        let credited = tx.execute(
            "UPDATE users SET credits = credits + ?2, last_credit_update_at = ?3 WHERE id = ?1",
            params![request.user_id, request.credits, now],
        )?;
        if credited != 1 {
            // Dropping `tx` rolls back the status change.
            return Err(L402Error::Storage(format!(
                "user {} for payment request {} does not exist",
                request.user_id, request.id
            )));
        }

        let amount = event.amount.unwrap_or(request.amount);
        let currency = event
            .currency
            .clone()
            .unwrap_or_else(|| request.currency.clone());

        tx.execute(
            "INSERT INTO payments (payment_request_id, credits, amount, currency, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![request.id, request.credits, amount, currency, now],
        )?;
        let payment_id = tx.last_insert_rowid();

        let balance: i64 = tx.query_row(
            "SELECT credits FROM users WHERE id = ?1",
            params![request.user_id],
            |row| row.get(0),
        )?;

        tx.commit()?;

        let payment = Payment {
            id: payment_id,
            payment_request_id: request.id.clone(),
            credits: request.credits,
            amount,
            currency,
            created_at: now,
        };
        let request = PaymentRequest {
            status: PaymentStatus::Completed,
            completed_at: Some(now),
            ..request
        };

        Ok(SettleOutcome::Settled {
            request,
            payment,
            balance,
        })
    }

    fn consume_credits(&self, user_id: &str, amount: i64) -> Result<User, L402Error> {
        if amount <= 0 {
            return Err(L402Error::Validation(
                "credits to consume must be positive".to_string(),
            ));
        }

        let mut conn = self.conn()?;
        let now = chrono::Utc::now().timestamp();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let debited = tx.execute(
            "UPDATE users
             SET credits = credits - ?2, credits_consumed = credits_consumed + ?2,
                 last_credit_update_at = ?3
             WHERE id = ?1 AND credits >= ?2",
            params![user_id, amount, now],
        )?;

        let user = query_user(&tx, user_id)?
            .ok_or_else(|| L402Error::Auth(format!("unknown user {user_id}")))?;

        if debited != 1 {
            return Err(L402Error::InsufficientCredits {
                balance: user.credits,
                requested: amount,
            });
        }

        tx.commit()?;
        Ok(user)
    }

    fn mark_expired(&self, id: &str) -> Result<bool, L402Error> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE payment_requests SET status = 'expired' WHERE id = ?1 AND status = 'pending'",
            params![id],
        )?;
        Ok(updated == 1)
    }

    fn expire_pending(&self, now: i64) -> Result<usize, L402Error> {
        let conn = self.conn()?;
        let expired = conn.execute(
            "UPDATE payment_requests SET status = 'expired'
             WHERE status = 'pending' AND expires_at < ?1",
            params![now],
        )?;
        Ok(expired)
    }

    fn pending_requests(&self, rail: Rail, now: i64) -> Result<Vec<PaymentRequest>, L402Error> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM payment_requests
             WHERE rail = ?1 AND status = 'pending' AND expires_at >= ?2
             ORDER BY created_at ASC"
        ))?;
        let requests = stmt
            .query_map(params![rail.as_str(), now], request_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(requests)
    }

    fn payments_for_user(&self, user_id: &str) -> Result<Vec<Payment>, L402Error> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT p.id, p.payment_request_id, p.credits, p.amount, p.currency, p.created_at
            FROM payments p
            JOIN payment_requests r ON r.id = p.payment_request_id
            WHERE r.user_id = ?1
            ORDER BY p.id ASC
            "#,
        )?;

        let payments = stmt
            .query_map(params![user_id], |row| {
                Ok(Payment {
                    id: row.get(0)?,
                    payment_request_id: row.get(1)?,
                    credits: row.get(2)?,
                    amount: row.get(3)?,
                    currency: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(payments)
    }

    fn next_index(&self, counter: &str) -> Result<u64, L402Error> {
        let conn = self.conn()?;
        let value: i64 = conn.query_row(
            "INSERT INTO counters (name, value) VALUES (?1, 1)
             ON CONFLICT(name) DO UPDATE SET value = value + 1
             RETURNING value",
            params![counter],
            |row| row.get(0),
        )?;
        u64::try_from(value)
            .map_err(|_| L402Error::Storage(format!("counter {counter} is negative")))
    }
}
