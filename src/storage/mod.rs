//! Ledger store.
//!
//! SQLite (via sqlx) holds participants, published lines, wagers and the
//! append-only ledger. The store is an explicitly opened handle: open it at
//! startup, pass it to the services, close it at shutdown.
//!
//! Pool-level methods are single reads or self-contained writes. The
//! connection-level functions at the bottom are the building blocks the
//! wager and settlement services compose inside their own transactions.

pub mod retry;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::StorageConfig;
use crate::types::{
    cents_to_units, units_to_cents, BettingLine, BookError, LedgerDiscrepancy, LedgerTransaction,
    Participant, TxReason, Wager, WagerStatus,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, Clone)]
pub struct LedgerStore {
    pool: SqlitePool,
}

impl LedgerStore {
    /// Open (creating if missing) the database named by `config`.
    pub async fn open(config: &StorageConfig) -> Result<Self, BookError> {
        let options = SqliteConnectOptions::from_str(&config.database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        info!(
            url = %config.database_url,
            max_connections = config.max_connections,
            "Ledger store opened"
        );
        Ok(Self { pool })
    }

    /// Private in-memory database on a single connection, already migrated.
    pub async fn open_in_memory() -> Result<Self, BookError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<(), BookError> {
        MIGRATOR.run(&self.pool).await?;
        debug!("Ledger schema up to date");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Ledger store closed");
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, BookError> {
        Ok(self.pool.begin().await?)
    }

    // -- Participants ------------------------------------------------------

    /// Create a participant with `starting_balance` (and its opening ledger
    /// entry), or refresh an existing one's name and reactivate it.
    ///
    /// Returns the participant and whether it was newly created.
    pub async fn upsert_participant(
        &self,
        id: &str,
        display_name: &str,
        starting_balance: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(Participant, bool), BookError> {
        let opening = units_to_cents(starting_balance)?;
        let mut tx = self.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO participants (id, display_name, balance_cents, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?4)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(id)
        .bind(display_name)
        .bind(opening)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if inserted {
            append_transaction(&mut tx, id, opening, TxReason::Opening, None, now).await?;
        } else {
            sqlx::query(
                "UPDATE participants SET display_name = ?1, active = 1, updated_at = ?2 WHERE id = ?3",
            )
            .bind(display_name)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        let participant = participant_in(&mut tx, id)
            .await?
            .ok_or_else(|| BookError::UnknownParticipant(id.to_string()))?;
        tx.commit().await?;

        Ok((participant, inserted))
    }

    pub async fn deactivate_participant(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Participant, BookError> {
        let updated = sqlx::query("UPDATE participants SET active = 0, updated_at = ?1 WHERE id = ?2")
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(BookError::UnknownParticipant(id.to_string()));
        }
        self.participant(id)
            .await?
            .ok_or_else(|| BookError::UnknownParticipant(id.to_string()))
    }

    pub async fn participant(&self, id: &str) -> Result<Option<Participant>, BookError> {
        let mut conn = self.pool.acquire().await?;
        participant_in(&mut conn, id).await
    }

    pub async fn balance(&self, id: &str) -> Result<Decimal, BookError> {
        let cents: Option<i64> =
            sqlx::query_scalar("SELECT balance_cents FROM participants WHERE id = ?1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        cents
            .map(cents_to_units)
            .ok_or_else(|| BookError::UnknownParticipant(id.to_string()))
    }

    /// Chronological ledger of one participant.
    pub async fn ledger(&self, id: &str) -> Result<Vec<LedgerTransaction>, BookError> {
        if self.participant(id).await?.is_none() {
            return Err(BookError::UnknownParticipant(id.to_string()));
        }
        let rows = sqlx::query("SELECT * FROM ledger_transactions WHERE participant_id = ?1 ORDER BY id")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    /// Participants whose cached balance differs from their ledger sum.
    pub async fn audit(&self) -> Result<Vec<LedgerDiscrepancy>, BookError> {
        let rows = sqlx::query(
            "SELECT p.id AS id, p.balance_cents AS balance_cents,
                    COALESCE(SUM(t.amount_cents), 0) AS ledger_cents
             FROM participants p
             LEFT JOIN ledger_transactions t ON t.participant_id = p.id
             GROUP BY p.id, p.balance_cents
             HAVING p.balance_cents != COALESCE(SUM(t.amount_cents), 0)
             ORDER BY p.id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(LedgerDiscrepancy {
                    participant_id: row.try_get("id")?,
                    balance: cents_to_units(row.try_get("balance_cents")?),
                    ledger_sum: cents_to_units(row.try_get("ledger_cents")?),
                })
            })
            .collect()
    }

    // -- Lines -------------------------------------------------------------

    /// Publish lines atomically, superseding each matchup's current line.
    pub async fn publish_lines(&self, lines: &[BettingLine]) -> Result<(), BookError> {
        let mut tx = self.begin().await?;
        for line in lines {
            sqlx::query("UPDATE betting_lines SET superseded = 1 WHERE matchup_id = ?1 AND superseded = 0")
                .bind(&line.matchup_id)
                .execute(&mut *tx)
                .await?;

            let payload = serde_json::to_string(line)
                .map_err(|e| BookError::Corrupt(format!("line {} not serialisable: {e}", line.line_id)))?;
            sqlx::query(
                "INSERT INTO betting_lines (line_id, matchup_id, week, superseded, payload, generated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5)",
            )
            .bind(&line.line_id)
            .bind(&line.matchup_id)
            .bind(i64::from(line.week))
            .bind(payload)
            .bind(line.generated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(count = lines.len(), "Lines published");
        Ok(())
    }

    pub async fn current_line(&self, matchup_id: &str) -> Result<Option<BettingLine>, BookError> {
        let mut conn = self.pool.acquire().await?;
        current_line_in(&mut conn, matchup_id).await
    }

    pub async fn lines_for_week(&self, week: u32) -> Result<Vec<BettingLine>, BookError> {
        let payloads: Vec<String> = sqlx::query_scalar(
            "SELECT payload FROM betting_lines WHERE week = ?1 AND superseded = 0 ORDER BY matchup_id",
        )
        .bind(i64::from(week))
        .fetch_all(&self.pool)
        .await?;
        payloads.iter().map(|p| line_from_payload(p)).collect()
    }

    // -- Wagers ------------------------------------------------------------

    pub async fn wager(&self, id: &str) -> Result<Option<Wager>, BookError> {
        let mut conn = self.pool.acquire().await?;
        wager_in(&mut conn, id).await
    }

    pub async fn wagers_for_participant(&self, participant_id: &str) -> Result<Vec<Wager>, BookError> {
        let rows = sqlx::query("SELECT * FROM wagers WHERE participant_id = ?1 ORDER BY placed_at, id")
            .bind(participant_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(wager_from_row).collect()
    }

    pub async fn pending_wagers_for_matchup(&self, matchup_id: &str) -> Result<Vec<Wager>, BookError> {
        let rows = sqlx::query(
            "SELECT * FROM wagers WHERE matchup_id = ?1 AND status = 'pending' ORDER BY placed_at, id",
        )
        .bind(matchup_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(wager_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Connection-level statements (used inside service transactions)
// ---------------------------------------------------------------------------

pub async fn participant_in(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Participant>, BookError> {
    let row = sqlx::query("SELECT * FROM participants WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(participant_from_row).transpose()
}

pub async fn current_line_in(
    conn: &mut SqliteConnection,
    matchup_id: &str,
) -> Result<Option<BettingLine>, BookError> {
    let payload: Option<String> = sqlx::query_scalar(
        "SELECT payload FROM betting_lines WHERE matchup_id = ?1 AND superseded = 0",
    )
    .bind(matchup_id)
    .fetch_optional(&mut *conn)
    .await?;
    payload.as_deref().map(line_from_payload).transpose()
}

pub async fn wager_in(conn: &mut SqliteConnection, id: &str) -> Result<Option<Wager>, BookError> {
    let row = sqlx::query("SELECT * FROM wagers WHERE id = ?1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(wager_from_row).transpose()
}

/// Compare-and-swap debit: succeeds only if the participant is active and
/// holds at least `cents`. Returns the new balance in cents.
pub async fn debit(
    conn: &mut SqliteConnection,
    participant_id: &str,
    cents: i64,
    now: DateTime<Utc>,
) -> Result<i64, BookError> {
    let new_balance: Option<i64> = sqlx::query_scalar(
        "UPDATE participants
         SET balance_cents = balance_cents - ?1, updated_at = ?2
         WHERE id = ?3 AND active = 1 AND balance_cents >= ?1
         RETURNING balance_cents",
    )
    .bind(cents)
    .bind(now)
    .bind(participant_id)
    .fetch_optional(&mut *conn)
    .await?;

    if let Some(balance) = new_balance {
        return Ok(balance);
    }

    match participant_in(conn, participant_id).await? {
        None => Err(BookError::UnknownParticipant(participant_id.to_string())),
        Some(p) if !p.active => Err(BookError::ParticipantInactive(participant_id.to_string())),
        Some(p) => Err(BookError::InsufficientBalance {
            stake: cents_to_units(cents),
            available: p.balance,
        }),
    }
}

/// Add `cents` to a participant's balance. Returns the new balance in cents.
pub async fn credit(
    conn: &mut SqliteConnection,
    participant_id: &str,
    cents: i64,
    now: DateTime<Utc>,
) -> Result<i64, BookError> {
    let new_balance: Option<i64> = sqlx::query_scalar(
        "UPDATE participants
         SET balance_cents = balance_cents + ?1, updated_at = ?2
         WHERE id = ?3
         RETURNING balance_cents",
    )
    .bind(cents)
    .bind(now)
    .bind(participant_id)
    .fetch_optional(&mut *conn)
    .await?;

    new_balance.ok_or_else(|| BookError::UnknownParticipant(participant_id.to_string()))
}

pub async fn append_transaction(
    conn: &mut SqliteConnection,
    participant_id: &str,
    amount_cents: i64,
    reason: TxReason,
    wager_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<i64, BookError> {
    let id = sqlx::query(
        "INSERT INTO ledger_transactions (participant_id, amount_cents, reason, wager_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(participant_id)
    .bind(amount_cents)
    .bind(reason.as_str())
    .bind(wager_id)
    .bind(now)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn insert_wager(conn: &mut SqliteConnection, wager: &Wager) -> Result<(), BookError> {
    let stake_cents = units_to_cents(wager.stake)?;
    sqlx::query(
        "INSERT INTO wagers (id, participant_id, matchup_id, line_id, week, bet_type, selection,
                             stake_cents, odds, line_value, status, payout_cents, placed_at, settled_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, NULL, ?12, NULL)",
    )
    .bind(&wager.id)
    .bind(&wager.participant_id)
    .bind(&wager.matchup_id)
    .bind(&wager.line_id)
    .bind(i64::from(wager.week))
    .bind(wager.bet_type.as_str())
    .bind(wager.selection.as_str())
    .bind(stake_cents)
    .bind(wager.odds)
    .bind(wager.line)
    .bind(wager.status.as_str())
    .bind(wager.placed_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Move a wager out of `pending`. Returns false if it was not pending
/// (already settled by someone else, or missing).
pub async fn mark_settled(
    conn: &mut SqliteConnection,
    wager_id: &str,
    status: WagerStatus,
    payout_cents: i64,
    now: DateTime<Utc>,
) -> Result<bool, BookError> {
    let updated = sqlx::query(
        "UPDATE wagers SET status = ?1, payout_cents = ?2, settled_at = ?3
         WHERE id = ?4 AND status = 'pending'",
    )
    .bind(status.as_str())
    .bind(payout_cents)
    .bind(now)
    .bind(wager_id)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(updated == 1)
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn participant_from_row(row: &SqliteRow) -> Result<Participant, BookError> {
    Ok(Participant {
        id: row.try_get("id")?,
        display_name: row.try_get("display_name")?,
        balance: cents_to_units(row.try_get("balance_cents")?),
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &SqliteRow) -> Result<LedgerTransaction, BookError> {
    let reason: String = row.try_get("reason")?;
    Ok(LedgerTransaction {
        id: row.try_get("id")?,
        participant_id: row.try_get("participant_id")?,
        amount: cents_to_units(row.try_get("amount_cents")?),
        reason: reason.parse()?,
        wager_id: row.try_get("wager_id")?,
        created_at: row.try_get("created_at")?,
    })
}

fn wager_from_row(row: &SqliteRow) -> Result<Wager, BookError> {
    let week: i64 = row.try_get("week")?;
    let bet_type: String = row.try_get("bet_type")?;
    let selection: String = row.try_get("selection")?;
    let status: String = row.try_get("status")?;
    let payout_cents: Option<i64> = row.try_get("payout_cents")?;

    Ok(Wager {
        id: row.try_get("id")?,
        participant_id: row.try_get("participant_id")?,
        matchup_id: row.try_get("matchup_id")?,
        line_id: row.try_get("line_id")?,
        week: u32::try_from(week).map_err(|_| BookError::Corrupt(format!("wager week {week}")))?,
        bet_type: bet_type.parse().map_err(|_| BookError::Corrupt(format!("bet type '{bet_type}'")))?,
        selection: selection
            .parse()
            .map_err(|_| BookError::Corrupt(format!("selection '{selection}'")))?,
        stake: cents_to_units(row.try_get("stake_cents")?),
        odds: row.try_get("odds")?,
        line: row.try_get("line_value")?,
        status: status.parse()?,
        payout: payout_cents.map(cents_to_units),
        placed_at: row.try_get("placed_at")?,
        settled_at: row.try_get("settled_at")?,
    })
}

fn line_from_payload(payload: &str) -> Result<BettingLine, BookError> {
    serde_json::from_str(payload).map_err(|e| BookError::Corrupt(format!("stored line: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
