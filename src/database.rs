use crate::{
    address::Address,
    error::{MarketError, Result},
    ledger::{AccountRecord, LedgerState},
    wallet::Signature,
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Row, SqlitePool,
};
use std::str::FromStr;

/// SQLite persistence for ledger snapshots.
#[derive(Clone)]
pub struct LedgerStore {
    pool: SqlitePool,
}

impl LedgerStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(
                SqliteConnectOptions::from_str(database_url)?
                    .create_if_missing(true)
                    .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal),
            )
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                address TEXT PRIMARY KEY,
                lamports INTEGER NOT NULL,
                owner TEXT,
                data BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS retired (
                address TEXT PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS processed (
                signature TEXT PRIMARY KEY,
                slot INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ledger_meta (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_accounts_owner ON accounts(owner);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Replace the stored snapshot in one SQL transaction.
    pub async fn save_snapshot(&self, state: &LedgerState) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM accounts").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM retired").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM processed").execute(&mut *tx).await?;

        for (address, record) in &state.accounts {
            sqlx::query(
                r#"
                INSERT INTO accounts (address, lamports, owner, data)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(address.to_string())
            .bind(to_sql_int(record.lamports)?)
            .bind(record.owner.map(|owner| owner.to_string()))
            .bind(&record.data)
            .execute(&mut *tx)
            .await?;
        }

        for address in &state.retired {
            sqlx::query("INSERT INTO retired (address) VALUES (?)")
                .bind(address.to_string())
                .execute(&mut *tx)
                .await?;
        }

        for (signature, slot) in &state.processed {
            sqlx::query("INSERT INTO processed (signature, slot) VALUES (?, ?)")
                .bind(signature.to_string())
                .bind(to_sql_int(*slot)?)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO ledger_meta (key, value) VALUES ('slot', ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(to_sql_int(state.slot)?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// The last saved snapshot, or `None` for a fresh database.
    pub async fn load_snapshot(&self) -> Result<Option<LedgerState>> {
        let slot_row = sqlx::query("SELECT value FROM ledger_meta WHERE key = 'slot'")
            .fetch_optional(&self.pool)
            .await?;
        let Some(slot_row) = slot_row else {
            return Ok(None);
        };

        let mut state = LedgerState {
            slot: from_sql_int(slot_row.get(0))?,
            ..LedgerState::default()
        };

        let rows = sqlx::query("SELECT address, lamports, owner, data FROM accounts")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let address = Address::from_str(&row.get::<String, _>(0))?;
            let owner = row
                .get::<Option<String>, _>(2)
                .map(|owner| Address::from_str(&owner))
                .transpose()?;
            state.accounts.insert(
                address,
                AccountRecord {
                    lamports: from_sql_int(row.get(1))?,
                    owner,
                    data: row.get(3),
                },
            );
        }

        let rows = sqlx::query("SELECT address FROM retired")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            state.retired.insert(Address::from_str(&row.get::<String, _>(0))?);
        }

        let rows = sqlx::query("SELECT signature, slot FROM processed")
            .fetch_all(&self.pool)
            .await?;
        for row in rows {
            let signature = Signature::from_str(&row.get::<String, _>(0))?;
            state.processed.insert(signature, from_sql_int(row.get(1))?);
        }

        Ok(Some(state))
    }
}

fn to_sql_int(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| {
        MarketError::Validation(format!("{} does not fit in an SQLite integer", value))
    })
}

fn from_sql_int(value: i64) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| MarketError::Validation(format!("Negative stored value {}", value)))
}
