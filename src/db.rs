use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{query, Row, Sqlite, SqlitePool, Transaction};

use crate::api::*;
use crate::marketplace::{Account, NewStake, Sale, BOOST_CAP, BOOST_UNIT, MAX_BOOSTS_PER_STAKE};
use crate::odds;

impl From<sqlx::Error> for MarketError {
    fn from(e: sqlx::Error) -> Self {
        MarketError::Storage(e.to_string())
    }
}

/// Storage behind the marketplace. Every mutating operation is atomic;
/// the multi-step ones (staking, boosting, trading) each run as one
/// transaction.
#[async_trait]
pub trait DB {
    async fn create_user(
        &self,
        username: &str,
        pw_digest: &str,
        opening_balance: Decimal,
    ) -> Result<UserId, MarketError>;
    async fn user_credentials(&self, username: &str) -> Result<(UserId, String), MarketError>;
    async fn get_user(&self, user: UserId) -> Result<Account, MarketError>;
    async fn create_session(&self, user: UserId, token: &str) -> Result<(), MarketError>;
    async fn session_user(&self, token: &str, cutoff: i64) -> Result<UserId, MarketError>;

    async fn credit(&self, user: UserId, amount: Decimal) -> Result<(), MarketError>;
    async fn debit(&self, user: UserId, amount: Decimal) -> Result<(), MarketError>;
    async fn transfer(&self, from: UserId, to: UserId, amount: Decimal)
        -> Result<(), MarketError>;
    async fn add_bolts(&self, user: UserId, count: i64) -> Result<(), MarketError>;
    async fn consume_bolts(&self, user: UserId, count: i64) -> Result<(), MarketError>;

    async fn create_stake(&self, stake: NewStake) -> Result<Stake, MarketError>;
    async fn get_stake(&self, stake: StakeId) -> Result<Stake, MarketError>;
    async fn boost_stake(&self, stake: StakeId, owner: UserId)
        -> Result<(Stake, i64), MarketError>;
    async fn open_stakes(&self, owner: UserId, today: NaiveDate)
        -> Result<Vec<Stake>, MarketError>;

    async fn create_listing(
        &self,
        stake: StakeId,
        seller: UserId,
        ask_price: Option<Decimal>,
        today: NaiveDate,
    ) -> Result<(Listing, Stake), MarketError>;
    async fn cancel_listing(
        &self,
        listing: ListingId,
        requester: UserId,
    ) -> Result<Listing, MarketError>;
    async fn buy_listing(
        &self,
        listing: ListingId,
        buyer: UserId,
        today: NaiveDate,
    ) -> Result<Sale, MarketError>;
    async fn active_listings(&self, now: i64) -> Result<Vec<(Listing, Stake)>, MarketError>;
}

/// Points live in the database as integer hundredths so that balance
/// guards stay plain integer comparisons.
fn to_cents(value: Decimal) -> Result<i64, MarketError> {
    (value * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| MarketError::Storage(format!("points out of range: {}", value)))
}
fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}
fn from_ts(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).unwrap()
}
fn parse<T: FromStr<Err = anyhow::Error>>(text: &str) -> Result<T, MarketError> {
    T::from_str(text).map_err(|e| MarketError::Storage(e.to_string()))
}

fn account_from_row(row: &SqliteRow) -> Result<Account, MarketError> {
    Ok(Account {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        balance: from_cents(row.try_get("balance")?),
        bolts: row.try_get("bolts")?,
        created_at: from_ts(row.try_get("created_at")?),
    })
}
fn stake_from_row(row: &SqliteRow) -> Result<Stake, MarketError> {
    let side: String = row.try_get("side")?;
    let status: String = row.try_get("status")?;
    let boost_count: i64 = row.try_get("boost_count")?;
    Ok(Stake {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        city: row.try_get("city")?,
        target_date: row.try_get("target_date")?,
        target_time: row.try_get("target_time")?,
        side: parse(&side)?,
        amount: from_cents(row.try_get("amount")?),
        base_odds: from_cents(row.try_get("base_odds")?),
        boost_count: boost_count as u32,
        boost_add: from_cents(row.try_get("boost_add")?),
        status: parse(&status)?,
        created_at: from_ts(row.try_get("created_at")?),
    })
}
fn listing_from_row(row: &SqliteRow) -> Result<Listing, MarketError> {
    let status: String = row.try_get("status")?;
    let resolved_at: Option<i64> = row.try_get("resolved_at")?;
    let sale_price: Option<i64> = row.try_get("sale_price")?;
    Ok(Listing {
        id: row.try_get("id")?,
        stake_id: row.try_get("stake_id")?,
        seller_id: row.try_get("seller_id")?,
        ask_price: from_cents(row.try_get("ask_price")?),
        status: parse(&status)?,
        created_at: from_ts(row.try_get("created_at")?),
        expires_at: from_ts(row.try_get("expires_at")?),
        resolved_at: resolved_at.map(from_ts),
        buyer_id: row.try_get("buyer_id")?,
        sale_price: sale_price.map(from_cents),
    })
}

/// Moves cents between two users or fails without any effect. Rows are
/// touched in ascending user id order so two opposite transfers can
/// never deadlock.
async fn transfer_tx(
    tx: &mut Transaction<'_, Sqlite>,
    from: UserId,
    to: UserId,
    cents: i64,
) -> Result<(), MarketError> {
    let mut legs = [(from, -cents), (to, cents)];
    legs.sort_by_key(|(user, _)| *user);
    for (user, delta) in legs {
        let updated = if delta < 0 {
            query("UPDATE users SET balance = balance + ? WHERE id = ? AND balance >= ?")
                .bind(delta)
                .bind(user)
                .bind(-delta)
                .execute(&mut **tx)
                .await?
        } else {
            query("UPDATE users SET balance = balance + ? WHERE id = ?")
                .bind(delta)
                .bind(user)
                .execute(&mut **tx)
                .await?
        };
        if updated.rows_affected() == 0 {
            let exists = query("SELECT id FROM users WHERE id = ?")
                .bind(user)
                .fetch_optional(&mut **tx)
                .await?;
            return Err(match exists {
                Some(_) => MarketError::InsufficientFunds,
                None => MarketError::NotFound,
            });
        }
    }
    Ok(())
}

pub struct SQLite {
    connection: SqlitePool,
}
impl SQLite {
    pub async fn new(db_conn: Option<String>) -> Self {
        let db_conn = db_conn.unwrap_or_else(|| "sqlite::memory:".to_string());
        let options = SqliteConnectOptions::from_str(&db_conn)
            .unwrap()
            .create_if_missing(true);
        // a single pooled connection so that every handle sees the same
        // in-memory database
        let connection = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        query(
            "CREATE TABLE IF NOT EXISTS users (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                username TEXT NOT NULL UNIQUE,\
                pw_digest TEXT NOT NULL,\
                balance INTEGER NOT NULL DEFAULT 0,\
                bolts INTEGER NOT NULL DEFAULT 0,\
                created_at INTEGER NOT NULL\
            )",
        )
        .execute(&connection)
        .await
        .unwrap();
        query(
            "CREATE TABLE IF NOT EXISTS sessions (\
                token TEXT PRIMARY KEY,\
                user_id INTEGER NOT NULL,\
                last_seen INTEGER NOT NULL\
            )",
        )
        .execute(&connection)
        .await
        .unwrap();
        query(
            "CREATE TABLE IF NOT EXISTS stakes (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                owner_id INTEGER NOT NULL,\
                city TEXT NOT NULL,\
                target_date TEXT NOT NULL,\
                target_time TEXT,\
                side TEXT NOT NULL,\
                amount INTEGER NOT NULL,\
                base_odds INTEGER NOT NULL,\
                boost_count INTEGER NOT NULL DEFAULT 0,\
                boost_add INTEGER NOT NULL DEFAULT 0,\
                status TEXT NOT NULL,\
                created_at INTEGER NOT NULL\
            )",
        )
        .execute(&connection)
        .await
        .unwrap();
        query(
            "CREATE TABLE IF NOT EXISTS listings (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                stake_id INTEGER NOT NULL,\
                seller_id INTEGER NOT NULL,\
                ask_price INTEGER NOT NULL,\
                status TEXT NOT NULL,\
                created_at INTEGER NOT NULL,\
                expires_at INTEGER NOT NULL,\
                resolved_at INTEGER,\
                buyer_id INTEGER,\
                sale_price INTEGER\
            )",
        )
        .execute(&connection)
        .await
        .unwrap();
        // the storage-level guarantee that a stake is on sale at most once
        query(
            "CREATE UNIQUE INDEX IF NOT EXISTS one_active_listing_per_stake \
             ON listings (stake_id) WHERE status = 'Active'",
        )
        .execute(&connection)
        .await
        .unwrap();
        Self { connection }
    }
}

#[async_trait]
impl DB for SQLite {
    async fn create_user(
        &self,
        username: &str,
        pw_digest: &str,
        opening_balance: Decimal,
    ) -> Result<UserId, MarketError> {
        let result = query(
            "INSERT INTO users (username, pw_digest, balance, bolts, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(username)
        .bind(pw_digest)
        .bind(to_cents(opening_balance)?)
        .bind(0_i64)
        .bind(Utc::now().timestamp())
        .execute(&self.connection)
        .await;
        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(sqlx::Error::Database(e))
                if matches!(e.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
            {
                Err(MarketError::UsernameTaken)
            }
            Err(e) => Err(e.into()),
        }
    }
    async fn user_credentials(&self, username: &str) -> Result<(UserId, String), MarketError> {
        let row = query("SELECT id, pw_digest FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.connection)
            .await?
            .ok_or(MarketError::NotFound)?;
        Ok((row.try_get("id")?, row.try_get("pw_digest")?))
    }
    async fn get_user(&self, user: UserId) -> Result<Account, MarketError> {
        let row = query("SELECT * FROM users WHERE id = ?")
            .bind(user)
            .fetch_optional(&self.connection)
            .await?
            .ok_or(MarketError::NotFound)?;
        account_from_row(&row)
    }
    async fn create_session(&self, user: UserId, token: &str) -> Result<(), MarketError> {
        query("INSERT INTO sessions (token, user_id, last_seen) VALUES (?, ?, ?)")
            .bind(token)
            .bind(user)
            .bind(Utc::now().timestamp())
            .execute(&self.connection)
            .await?;
        Ok(())
    }
    async fn session_user(&self, token: &str, cutoff: i64) -> Result<UserId, MarketError> {
        let row = query("SELECT user_id, last_seen FROM sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.connection)
            .await?
            .ok_or(MarketError::Unauthorized)?;
        let last_seen: i64 = row.try_get("last_seen")?;
        if last_seen < cutoff {
            return Err(MarketError::Unauthorized);
        }
        query("UPDATE sessions SET last_seen = ? WHERE token = ?")
            .bind(Utc::now().timestamp())
            .bind(token)
            .execute(&self.connection)
            .await?;
        Ok(row.try_get("user_id")?)
    }

    async fn credit(&self, user: UserId, amount: Decimal) -> Result<(), MarketError> {
        let updated = query("UPDATE users SET balance = balance + ? WHERE id = ?")
            .bind(to_cents(amount)?)
            .bind(user)
            .execute(&self.connection)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(MarketError::NotFound);
        }
        Ok(())
    }
    async fn debit(&self, user: UserId, amount: Decimal) -> Result<(), MarketError> {
        let cents = to_cents(amount)?;
        let updated = query("UPDATE users SET balance = balance - ? WHERE id = ? AND balance >= ?")
            .bind(cents)
            .bind(user)
            .bind(cents)
            .execute(&self.connection)
            .await?;
        if updated.rows_affected() == 0 {
            self.get_user(user).await?;
            return Err(MarketError::InsufficientFunds);
        }
        Ok(())
    }
    async fn transfer(
        &self,
        from: UserId,
        to: UserId,
        amount: Decimal,
    ) -> Result<(), MarketError> {
        let mut tx = self.connection.begin().await?;
        transfer_tx(&mut tx, from, to, to_cents(amount)?).await?;
        tx.commit().await?;
        Ok(())
    }
    async fn add_bolts(&self, user: UserId, count: i64) -> Result<(), MarketError> {
        let updated = query("UPDATE users SET bolts = bolts + ? WHERE id = ?")
            .bind(count)
            .bind(user)
            .execute(&self.connection)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(MarketError::NotFound);
        }
        Ok(())
    }
    async fn consume_bolts(&self, user: UserId, count: i64) -> Result<(), MarketError> {
        let updated = query("UPDATE users SET bolts = bolts - ? WHERE id = ? AND bolts >= ?")
            .bind(count)
            .bind(user)
            .bind(count)
            .execute(&self.connection)
            .await?;
        if updated.rows_affected() == 0 {
            self.get_user(user).await?;
            return Err(MarketError::InsufficientBoosts);
        }
        Ok(())
    }

    async fn create_stake(&self, stake: NewStake) -> Result<Stake, MarketError> {
        if stake.amount <= Decimal::ZERO {
            return Err(MarketError::InvalidAmount);
        }
        if stake.base_odds < Decimal::ONE {
            return Err(MarketError::InvalidOdds);
        }
        let amount = to_cents(stake.amount)?;
        let mut tx = self.connection.begin().await?;
        let opposite = query(
            "SELECT id FROM stakes WHERE owner_id = ? AND city = ? AND target_date = ? \
             AND side != ? AND status = 'Active' LIMIT 1",
        )
        .bind(stake.owner_id)
        .bind(&stake.city)
        .bind(stake.target_date)
        .bind(stake.side.to_string())
        .fetch_optional(&mut *tx)
        .await?;
        if opposite.is_some() {
            return Err(MarketError::OppositeSideExists);
        }
        let debited = query("UPDATE users SET balance = balance - ? WHERE id = ? AND balance >= ?")
            .bind(amount)
            .bind(stake.owner_id)
            .bind(amount)
            .execute(&mut *tx)
            .await?;
        if debited.rows_affected() == 0 {
            let exists = query("SELECT id FROM users WHERE id = ?")
                .bind(stake.owner_id)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match exists {
                Some(_) => MarketError::InsufficientFunds,
                None => MarketError::NotFound,
            });
        }
        let created = query(
            "INSERT INTO stakes (owner_id, city, target_date, target_time, side, amount, \
             base_odds, boost_count, boost_add, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)",
        )
        .bind(stake.owner_id)
        .bind(&stake.city)
        .bind(stake.target_date)
        .bind(stake.target_time.as_deref())
        .bind(stake.side.to_string())
        .bind(amount)
        .bind(to_cents(stake.base_odds)?)
        .bind(StakeStatus::Active.to_string())
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await?;
        let row = query("SELECT * FROM stakes WHERE id = ?")
            .bind(created.last_insert_rowid())
            .fetch_one(&mut *tx)
            .await?;
        let stake = stake_from_row(&row)?;
        tx.commit().await?;
        Ok(stake)
    }
    async fn get_stake(&self, stake: StakeId) -> Result<Stake, MarketError> {
        let row = query("SELECT * FROM stakes WHERE id = ?")
            .bind(stake)
            .fetch_optional(&self.connection)
            .await?
            .ok_or(MarketError::NotFound)?;
        stake_from_row(&row)
    }
    async fn boost_stake(
        &self,
        stake: StakeId,
        owner: UserId,
    ) -> Result<(Stake, i64), MarketError> {
        let mut tx = self.connection.begin().await?;
        let row = query("SELECT * FROM stakes WHERE id = ?")
            .bind(stake)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(MarketError::NotFound)?;
        let current = stake_from_row(&row)?;
        if current.owner_id != owner {
            return Err(MarketError::NotOwner);
        }
        if current.status != StakeStatus::Active {
            return Err(MarketError::NotActive);
        }
        if current.boost_add >= BOOST_CAP || current.boost_count >= MAX_BOOSTS_PER_STAKE {
            // the bolt is not consumed once the cap is reached
            return Err(MarketError::BoostCapReached);
        }
        let spent = query("UPDATE users SET bolts = bolts - 1 WHERE id = ? AND bolts >= 1")
            .bind(owner)
            .execute(&mut *tx)
            .await?;
        if spent.rows_affected() == 0 {
            return Err(MarketError::InsufficientBoosts);
        }
        let increment = BOOST_UNIT.min(BOOST_CAP - current.boost_add);
        query(
            "UPDATE stakes SET boost_count = boost_count + 1, boost_add = boost_add + ? \
             WHERE id = ?",
        )
        .bind(to_cents(increment)?)
        .bind(stake)
        .execute(&mut *tx)
        .await?;
        let row = query("SELECT * FROM stakes WHERE id = ?")
            .bind(stake)
            .fetch_one(&mut *tx)
            .await?;
        let boosted = stake_from_row(&row)?;
        let bolts: i64 = query("SELECT bolts FROM users WHERE id = ?")
            .bind(owner)
            .fetch_one(&mut *tx)
            .await?
            .try_get("bolts")?;
        tx.commit().await?;
        Ok((boosted, bolts))
    }
    async fn open_stakes(
        &self,
        owner: UserId,
        today: NaiveDate,
    ) -> Result<Vec<Stake>, MarketError> {
        let rows = query(
            "SELECT * FROM stakes s WHERE s.owner_id = ? AND s.status = 'Active' \
             AND s.target_date >= ? \
             AND NOT EXISTS (SELECT 1 FROM listings l WHERE l.stake_id = s.id AND l.status = 'Active') \
             ORDER BY s.target_date ASC, s.id ASC LIMIT 300",
        )
        .bind(owner)
        .bind(today)
        .fetch_all(&self.connection)
        .await?;
        rows.iter().map(stake_from_row).collect()
    }

    async fn create_listing(
        &self,
        stake: StakeId,
        seller: UserId,
        ask_price: Option<Decimal>,
        today: NaiveDate,
    ) -> Result<(Listing, Stake), MarketError> {
        let mut tx = self.connection.begin().await?;
        let row = query("SELECT * FROM stakes WHERE id = ?")
            .bind(stake)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(MarketError::NotFound)?;
        let stake = stake_from_row(&row)?;
        if stake.owner_id != seller {
            return Err(MarketError::NotOwner);
        }
        if stake.status != StakeStatus::Active {
            return Err(MarketError::NotActive);
        }
        if stake.target_date < today {
            return Err(MarketError::StakeExpired);
        }
        let ask = ask_price.unwrap_or(stake.amount);
        if ask < stake.amount {
            return Err(MarketError::PriceTooLow {
                min_price: stake.amount,
            });
        }
        let created = query(
            "INSERT INTO listings (stake_id, seller_id, ask_price, status, created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(stake.id)
        .bind(seller)
        .bind(to_cents(ask)?)
        .bind(ListingStatus::Active.to_string())
        .bind(Utc::now().timestamp())
        .bind(odds::end_of_day(stake.target_date).timestamp())
        .execute(&mut *tx)
        .await;
        let created = match created {
            Ok(done) => done,
            Err(sqlx::Error::Database(e))
                if matches!(e.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
            {
                return Err(MarketError::AlreadyListed)
            }
            Err(e) => return Err(e.into()),
        };
        let row = query("SELECT * FROM listings WHERE id = ?")
            .bind(created.last_insert_rowid())
            .fetch_one(&mut *tx)
            .await?;
        let listing = listing_from_row(&row)?;
        tx.commit().await?;
        Ok((listing, stake))
    }
    async fn cancel_listing(
        &self,
        listing: ListingId,
        requester: UserId,
    ) -> Result<Listing, MarketError> {
        let mut tx = self.connection.begin().await?;
        let row = query("SELECT * FROM listings WHERE id = ?")
            .bind(listing)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(MarketError::NotFound)?;
        let found = listing_from_row(&row)?;
        if found.seller_id != requester {
            return Err(MarketError::NotOwner);
        }
        let closed =
            query("UPDATE listings SET status = ?, resolved_at = ? WHERE id = ? AND status = ?")
                .bind(ListingStatus::Cancelled.to_string())
                .bind(Utc::now().timestamp())
                .bind(listing)
                .bind(ListingStatus::Active.to_string())
                .execute(&mut *tx)
                .await?;
        if closed.rows_affected() == 0 {
            return Err(MarketError::NotActive);
        }
        let row = query("SELECT * FROM listings WHERE id = ?")
            .bind(listing)
            .fetch_one(&mut *tx)
            .await?;
        let cancelled = listing_from_row(&row)?;
        tx.commit().await?;
        Ok(cancelled)
    }
    async fn buy_listing(
        &self,
        listing: ListingId,
        buyer: UserId,
        today: NaiveDate,
    ) -> Result<Sale, MarketError> {
        let mut tx = self.connection.begin().await?;
        let row = query("SELECT * FROM listings WHERE id = ?")
            .bind(listing)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(MarketError::NotFound)?;
        let open = listing_from_row(&row)?;
        if open.status != ListingStatus::Active {
            return Err(MarketError::NotActive);
        }
        if open.seller_id == buyer {
            return Err(MarketError::SelfTrade);
        }
        let row = query("SELECT * FROM stakes WHERE id = ?")
            .bind(open.stake_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(MarketError::NotFound)?;
        let stake = stake_from_row(&row)?;
        if stake.status != StakeStatus::Active {
            return Err(MarketError::NotActive);
        }
        if stake.target_date < today {
            return Err(MarketError::StakeExpired);
        }
        // the status flip decides races: of two simultaneous buyers only
        // one sees a row that is still Active
        let won = query(
            "UPDATE listings SET status = ?, resolved_at = ?, buyer_id = ?, sale_price = ask_price \
             WHERE id = ? AND status = ?",
        )
        .bind(ListingStatus::Sold.to_string())
        .bind(Utc::now().timestamp())
        .bind(buyer)
        .bind(listing)
        .bind(ListingStatus::Active.to_string())
        .execute(&mut *tx)
        .await?;
        if won.rows_affected() == 0 {
            return Err(MarketError::NotActive);
        }
        transfer_tx(&mut tx, buyer, open.seller_id, to_cents(open.ask_price)?).await?;
        let handed_over = query("UPDATE stakes SET owner_id = ? WHERE id = ? AND status = ?")
            .bind(buyer)
            .bind(open.stake_id)
            .bind(StakeStatus::Active.to_string())
            .execute(&mut *tx)
            .await?;
        if handed_over.rows_affected() == 0 {
            return Err(MarketError::NotActive);
        }
        let row = query("SELECT * FROM listings WHERE id = ?")
            .bind(listing)
            .fetch_one(&mut *tx)
            .await?;
        let sold = listing_from_row(&row)?;
        let row = query("SELECT * FROM stakes WHERE id = ?")
            .bind(open.stake_id)
            .fetch_one(&mut *tx)
            .await?;
        let stake = stake_from_row(&row)?;
        let balance: i64 = query("SELECT balance FROM users WHERE id = ?")
            .bind(buyer)
            .fetch_one(&mut *tx)
            .await?
            .try_get("balance")?;
        tx.commit().await?;
        Ok(Sale {
            listing: sold,
            stake,
            buyer_balance: from_cents(balance),
        })
    }
    async fn active_listings(&self, now: i64) -> Result<Vec<(Listing, Stake)>, MarketError> {
        let rows = query(
            "SELECT l.id AS listing_id, l.stake_id, l.seller_id, l.ask_price, \
             l.created_at AS listed_at, l.expires_at, \
             s.owner_id, s.city, s.target_date, s.target_time, s.side, s.amount, \
             s.base_odds, s.boost_count, s.boost_add, s.created_at AS staked_at \
             FROM listings l JOIN stakes s ON s.id = l.stake_id \
             WHERE l.status = 'Active' AND s.status = 'Active' AND l.expires_at >= ? \
             ORDER BY l.created_at DESC, l.id DESC LIMIT 500",
        )
        .bind(now)
        .fetch_all(&self.connection)
        .await?;
        let mut listings = vec![];
        for row in rows {
            let side: String = row.try_get("side")?;
            let boost_count: i64 = row.try_get("boost_count")?;
            let listing = Listing {
                id: row.try_get("listing_id")?,
                stake_id: row.try_get("stake_id")?,
                seller_id: row.try_get("seller_id")?,
                ask_price: from_cents(row.try_get("ask_price")?),
                status: ListingStatus::Active,
                created_at: from_ts(row.try_get("listed_at")?),
                expires_at: from_ts(row.try_get("expires_at")?),
                resolved_at: None,
                buyer_id: None,
                sale_price: None,
            };
            let stake = Stake {
                id: row.try_get("stake_id")?,
                owner_id: row.try_get("owner_id")?,
                city: row.try_get("city")?,
                target_date: row.try_get("target_date")?,
                target_time: row.try_get("target_time")?,
                side: parse(&side)?,
                amount: from_cents(row.try_get("amount")?),
                base_odds: from_cents(row.try_get("base_odds")?),
                boost_count: boost_count as u32,
                boost_add: from_cents(row.try_get("boost_add")?),
                status: StakeStatus::Active,
                created_at: from_ts(row.try_get("staked_at")?),
            };
            listings.push((listing, stake));
        }
        Ok(listings)
    }
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;

    async fn db() -> SQLite {
        SQLite::new(None).await
    }
    async fn user(db: &SQLite, name: &str) -> UserId {
        db.create_user(name, "salt$digest", dec!(100))
            .await
            .unwrap()
    }
    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }
    fn wager(owner: UserId, date: &str) -> NewStake {
        NewStake {
            owner_id: owner,
            city: "Paris".to_string(),
            target_date: day(date),
            target_time: Some("18:00".to_string()),
            side: Side::Rain,
            amount: dec!(12.34),
            base_odds: dec!(1.8),
        }
    }

    #[tokio::test]
    async fn debits_are_guarded_by_the_balance() {
        let db = db().await;
        let alice = user(&db, "alice").await;
        db.debit(alice, dec!(100)).await.unwrap();
        assert_eq!(db.get_user(alice).await.unwrap().balance, dec!(0));
        assert_eq!(
            db.debit(alice, dec!(0.01)).await,
            Err(MarketError::InsufficientFunds)
        );
        assert_eq!(db.debit(999, dec!(1)).await, Err(MarketError::NotFound));
        assert_eq!(db.credit(999, dec!(1)).await, Err(MarketError::NotFound));
        db.credit(alice, dec!(2.50)).await.unwrap();
        assert_eq!(db.get_user(alice).await.unwrap().balance, dec!(2.50));
    }

    #[tokio::test]
    async fn transfers_move_everything_or_nothing() {
        let db = db().await;
        let alice = user(&db, "alice").await;
        let bob = user(&db, "bob").await;
        db.transfer(alice, bob, dec!(40)).await.unwrap();
        assert_eq!(db.get_user(alice).await.unwrap().balance, dec!(60));
        assert_eq!(db.get_user(bob).await.unwrap().balance, dec!(140));
        assert_eq!(
            db.transfer(alice, bob, dec!(100)).await,
            Err(MarketError::InsufficientFunds)
        );
        assert_eq!(db.get_user(alice).await.unwrap().balance, dec!(60));
        assert_eq!(db.get_user(bob).await.unwrap().balance, dec!(140));
        // the reverse direction touches rows in the same id order
        db.transfer(bob, alice, dec!(140)).await.unwrap();
        assert_eq!(db.get_user(alice).await.unwrap().balance, dec!(200));
        assert_eq!(db.get_user(bob).await.unwrap().balance, dec!(0));
        assert_eq!(
            db.transfer(alice, 999, dec!(1)).await,
            Err(MarketError::NotFound)
        );
    }

    #[tokio::test]
    async fn bolts_have_their_own_inventory() {
        let db = db().await;
        let alice = user(&db, "alice").await;
        db.add_bolts(alice, 3).await.unwrap();
        db.consume_bolts(alice, 2).await.unwrap();
        assert_eq!(db.get_user(alice).await.unwrap().bolts, 1);
        assert_eq!(
            db.consume_bolts(alice, 2).await,
            Err(MarketError::InsufficientBoosts)
        );
    }

    #[tokio::test]
    async fn stakes_survive_storage_intact() {
        let db = db().await;
        let alice = user(&db, "alice").await;
        let created = db.create_stake(wager(alice, "2030-06-15")).await.unwrap();
        let read = db.get_stake(created.id).await.unwrap();
        assert_eq!(read.city, "Paris");
        assert_eq!(read.target_date, day("2030-06-15"));
        assert_eq!(read.target_time.as_deref(), Some("18:00"));
        assert_eq!(read.side, Side::Rain);
        assert_eq!(read.amount, dec!(12.34));
        assert_eq!(read.base_odds, dec!(1.8));
        assert_eq!(read.status, StakeStatus::Active);
        assert_eq!(read.total_odds(), dec!(1.8));
        // the amount was debited atomically with the insert
        assert_eq!(db.get_user(alice).await.unwrap().balance, dec!(87.66));
        assert_eq!(db.get_stake(999).await, Err(MarketError::NotFound));
    }

    #[tokio::test]
    async fn stake_rows_are_validated_before_writing() {
        let db = db().await;
        let alice = user(&db, "alice").await;
        let mut zero = wager(alice, "2030-06-15");
        zero.amount = dec!(0);
        assert_eq!(db.create_stake(zero).await, Err(MarketError::InvalidAmount));
        let mut poor_odds = wager(alice, "2030-06-15");
        poor_odds.base_odds = dec!(0.9);
        assert_eq!(
            db.create_stake(poor_odds).await,
            Err(MarketError::InvalidOdds)
        );
        // failed writes never debit
        assert_eq!(db.get_user(alice).await.unwrap().balance, dec!(100));
    }

    #[tokio::test]
    async fn the_active_index_allows_relisting_after_cancel() {
        let db = db().await;
        let alice = user(&db, "alice").await;
        let stake = db.create_stake(wager(alice, "2030-06-15")).await.unwrap();
        let today = day("2030-06-01");
        let (first, _) = db
            .create_listing(stake.id, alice, None, today)
            .await
            .unwrap();
        assert_eq!(
            db.create_listing(stake.id, alice, None, today).await,
            Err(MarketError::AlreadyListed)
        );
        db.cancel_listing(first.id, alice).await.unwrap();
        // with no Active row left the partial index lets a new one in
        let (second, _) = db
            .create_listing(stake.id, alice, Some(dec!(20)), today)
            .await
            .unwrap();
        assert_eq!(second.ask_price, dec!(20));
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn selling_hands_over_stake_points_and_metadata() {
        let db = db().await;
        let alice = user(&db, "alice").await;
        let bob = user(&db, "bob").await;
        let stake = db.create_stake(wager(alice, "2030-06-15")).await.unwrap();
        let today = day("2030-06-01");
        let (listing, _) = db
            .create_listing(stake.id, alice, Some(dec!(15)), today)
            .await
            .unwrap();
        let sale = db.buy_listing(listing.id, bob, today).await.unwrap();
        assert_eq!(sale.listing.status, ListingStatus::Sold);
        assert_eq!(sale.listing.buyer_id, Some(bob));
        assert_eq!(sale.listing.sale_price, Some(dec!(15)));
        assert!(sale.listing.resolved_at.is_some());
        assert_eq!(sale.stake.owner_id, bob);
        assert_eq!(sale.buyer_balance, dec!(85));
        assert_eq!(db.get_user(alice).await.unwrap().balance, dec!(102.66));
        // buying a stake whose day already passed is refused
        let stake = db.create_stake(wager(alice, "2030-07-01")).await.unwrap();
        let (listing, _) = db
            .create_listing(stake.id, alice, None, today)
            .await
            .unwrap();
        assert_eq!(
            db.buy_listing(listing.id, bob, day("2030-07-02")).await,
            Err(MarketError::StakeExpired)
        );
    }

    #[tokio::test]
    async fn expired_listings_drop_out_of_the_book() {
        let db = db().await;
        let alice = user(&db, "alice").await;
        let stake = db.create_stake(wager(alice, "2030-06-15")).await.unwrap();
        let (listing, _) = db
            .create_listing(stake.id, alice, None, day("2030-06-01"))
            .await
            .unwrap();
        let end = listing.expires_at.timestamp();
        assert_eq!(db.active_listings(end).await.unwrap().len(), 1);
        assert!(db.active_listings(end + 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sessions_expire_by_idleness() {
        let db = db().await;
        let alice = user(&db, "alice").await;
        db.create_session(alice, "token-one").await.unwrap();
        let now = Utc::now().timestamp();
        assert_eq!(db.session_user("token-one", now - 60).await, Ok(alice));
        assert_eq!(
            db.session_user("token-one", now + 60).await,
            Err(MarketError::Unauthorized)
        );
        assert_eq!(
            db.session_user("unknown", now - 60).await,
            Err(MarketError::Unauthorized)
        );
    }
}
