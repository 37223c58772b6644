use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use log::{debug, info};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sha2::{Digest, Sha256};

use crate::api::*;
use crate::db::DB;
use crate::odds;

/// Every fresh account starts with this many points.
pub const OPENING_BALANCE: Decimal = dec!(500.00);
/// Flat odds increase per boost bolt spent on a stake.
pub const BOOST_UNIT: Decimal = dec!(5.0);
pub const MAX_BOOSTS_PER_STAKE: u32 = 5;
pub const BOOST_CAP: Decimal = dec!(25.0);

const SESSION_IDLE_DAYS: i64 = 7;
const TOKEN_LENGTH: usize = 30;
const SALT_LENGTH: usize = 16;
const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_CITY_LENGTH: usize = 80;
const DEFAULT_CITY: &str = "Paris";
const MAX_POINTS: Decimal = dec!(1000000000);

/// A user row as the ledger sees it.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: UserId,
    pub username: String,
    pub balance: Points,
    pub bolts: i64,
    pub created_at: DateTime<Utc>,
}

/// Everything needed to persist a fresh stake. Validation happens before
/// this is built.
#[derive(Debug, Clone)]
pub struct NewStake {
    pub owner_id: UserId,
    pub city: String,
    pub target_date: NaiveDate,
    pub target_time: Option<String>,
    pub side: Side,
    pub amount: Points,
    pub base_odds: Decimal,
}

/// Outcome of a completed purchase, read back inside the same transaction
/// that settled it.
#[derive(Debug, Clone, PartialEq)]
pub struct Sale {
    pub listing: Listing,
    pub stake: Stake,
    pub buyer_balance: Points,
}

pub struct Marketplace {
    db: Arc<Box<dyn DB + Send + Sync>>,
    admins: HashSet<String>,
}
impl Marketplace {
    pub fn new(db: Box<dyn DB + Send + Sync>, admins: Vec<String>) -> Self {
        Self {
            db: Arc::new(db),
            admins: admins.into_iter().collect(),
        }
    }

    pub async fn register(&self, request: RegisterRequest) -> Result<UserId, MarketError> {
        let username = valid_username(&request.username)?;
        if request.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(MarketError::InvalidPassword);
        }
        let salt = random_string(SALT_LENGTH);
        let digest = hash_password(&request.password, &salt);
        let id = self
            .db
            .create_user(&username, &digest, OPENING_BALANCE)
            .await?;
        info!("Registered user {} as {}", username, id);
        Ok(id)
    }
    pub async fn login(&self, request: LoginRequest) -> Result<SessionToken, MarketError> {
        let (id, stored) = self
            .db
            .user_credentials(request.username.trim())
            .await
            .map_err(|e| match e {
                MarketError::NotFound => MarketError::Unauthorized,
                e => e,
            })?;
        if !verify_password(&request.password, &stored) {
            return Err(MarketError::Unauthorized);
        }
        let token = random_string(TOKEN_LENGTH);
        self.db.create_session(id, &token).await?;
        debug!("User {} logged in", id);
        Ok(token)
    }
    /// Resolves a session token to its user. Sessions idle for more than
    /// a week no longer count.
    pub async fn authenticate(&self, token: &str) -> Result<UserId, MarketError> {
        let cutoff = (Utc::now() - Duration::days(SESSION_IDLE_DAYS)).timestamp();
        self.db.session_user(token, cutoff).await
    }
    pub async fn me(&self, user: UserId) -> Result<MeResponse, MarketError> {
        let account = self.db.get_user(user).await?;
        Ok(MeResponse {
            user_id: account.id,
            role: self.role_of(&account.username),
            username: account.username,
            balance: account.balance,
            bolts: account.bolts,
        })
    }

    /// Places a stake: quotes the base odds for the target day and debits
    /// the amount, both or neither.
    pub async fn place_stake(
        &self,
        user: UserId,
        request: PlaceStakeRequest,
    ) -> Result<StakeView, MarketError> {
        let amount = valid_points(request.amount)?;
        let today = Utc::now().date_naive();
        let base_odds = odds::quote(today, request.target_date)?;
        let stake = self
            .db
            .create_stake(NewStake {
                owner_id: user,
                city: clean_city(request.city.as_deref()),
                target_date: request.target_date,
                target_time: clean_time(request.target_time.as_deref()),
                side: request.side,
                amount,
                base_odds,
            })
            .await?;
        info!(
            "User {} staked {} points on {} in {} for {}",
            user, stake.amount, stake.side, stake.city, stake.target_date
        );
        Ok(stake_view(&stake))
    }
    /// Spends one bolt to raise the stake's odds, until the boost cap.
    pub async fn boost(&self, user: UserId, stake: StakeId) -> Result<BoostResponse, MarketError> {
        let (stake, bolts_left) = self.db.boost_stake(stake, user).await?;
        debug!(
            "User {} boosted stake {} to x{}",
            user,
            stake.id,
            stake.total_odds()
        );
        Ok(BoostResponse {
            stake_id: stake.id,
            boost_count: stake.boost_count,
            boost_add: stake.boost_add,
            total_odds: stake.total_odds(),
            potential_gain: stake.potential_gain(),
            bolts_left,
        })
    }
    /// The caller's open stakes that could still be listed: active, not
    /// already on sale and not past their day.
    pub async fn my_bets(&self, user: UserId) -> Result<Vec<StakeView>, MarketError> {
        let today = Utc::now().date_naive();
        let stakes = self.db.open_stakes(user, today).await?;
        Ok(stakes.iter().map(stake_view).collect())
    }

    pub async fn listings(
        &self,
        user: UserId,
        query: ListingsQuery,
    ) -> Result<Vec<ListingView>, MarketError> {
        let now = Utc::now().timestamp();
        let rows = self.db.active_listings(now).await?;
        let listings = rows
            .iter()
            .filter(|(_, stake)| match &query.city {
                Some(city) => stake.city.eq_ignore_ascii_case(city.trim()),
                None => true,
            })
            .filter(|(_, stake)| query.side.map_or(true, |side| stake.side == side))
            .filter(|(_, stake)| query.date.map_or(true, |date| stake.target_date == date))
            .map(|(listing, stake)| listing_view(listing, stake, user))
            .collect();
        Ok(listings)
    }
    /// Puts a stake up for sale. The asking price defaults to the staked
    /// amount and may never go below it.
    pub async fn create_listing(
        &self,
        user: UserId,
        request: CreateListingRequest,
    ) -> Result<ListingView, MarketError> {
        let ask_price = request.ask_price.map(valid_points).transpose()?;
        let today = Utc::now().date_naive();
        let (listing, stake) = self
            .db
            .create_listing(request.stake_id, user, ask_price, today)
            .await?;
        info!(
            "User {} listed stake {} for {} points",
            user, stake.id, listing.ask_price
        );
        Ok(listing_view(&listing, &stake, user))
    }
    /// Settles a purchase: pays the seller, hands the stake to the buyer
    /// and closes the listing, all inside one transaction. Of two racing
    /// buyers exactly one comes out owning the stake.
    pub async fn buy_listing(
        &self,
        user: UserId,
        listing: ListingId,
    ) -> Result<BuyResponse, MarketError> {
        let today = Utc::now().date_naive();
        let sale = self.db.buy_listing(listing, user, today).await?;
        info!(
            "Listing {} sold: stake {} went from user {} to user {} for {} points",
            sale.listing.id,
            sale.stake.id,
            sale.listing.seller_id,
            user,
            sale.listing.sale_price.unwrap_or(sale.listing.ask_price)
        );
        Ok(BuyResponse {
            balance: sale.buyer_balance,
        })
    }
    pub async fn cancel_listing(
        &self,
        user: UserId,
        listing: ListingId,
    ) -> Result<(), MarketError> {
        let cancelled = self.db.cancel_listing(listing, user).await?;
        debug!("User {} cancelled listing {}", user, cancelled.id);
        Ok(())
    }

    /// Admin credit/debit of points and bolts, signed amounts. Returns the
    /// adjusted account.
    pub async fn adjust(
        &self,
        actor: UserId,
        request: AdjustRequest,
    ) -> Result<MeResponse, MarketError> {
        let me = self.me(actor).await?;
        if me.role != UserRole::Admin {
            return Err(MarketError::Forbidden);
        }
        self.db.get_user(request.user_id).await?;
        if let Some(points) = request.points {
            if points > Decimal::ZERO {
                self.db.credit(request.user_id, valid_points(points)?).await?;
            } else if points < Decimal::ZERO {
                self.db.debit(request.user_id, valid_points(-points)?).await?;
            }
        }
        if let Some(bolts) = request.bolts {
            if bolts > 0 {
                self.db.add_bolts(request.user_id, bolts).await?;
            } else if bolts < 0 {
                self.db.consume_bolts(request.user_id, -bolts).await?;
            }
        }
        info!(
            "Admin {} adjusted user {}: points {:?}, bolts {:?}",
            actor, request.user_id, request.points, request.bolts
        );
        self.me(request.user_id).await
    }

    fn role_of(&self, username: &str) -> UserRole {
        if self.admins.contains(username) {
            UserRole::Admin
        } else {
            UserRole::User
        }
    }
}

fn stake_view(stake: &Stake) -> StakeView {
    StakeView {
        id: stake.id,
        city: stake.city.clone(),
        target_date: stake.target_date,
        target_time: stake.target_time.clone(),
        date_label: odds::date_label(stake.target_date),
        side: stake.side,
        amount: stake.amount,
        base_odds: stake.base_odds,
        boosts_count: stake.boost_count,
        boosts_add: stake.boost_add,
        total_odds: stake.total_odds(),
        potential_gain: stake.potential_gain(),
        status: stake.status,
    }
}
fn listing_view(listing: &Listing, stake: &Stake, viewer: UserId) -> ListingView {
    ListingView {
        id: listing.id,
        stake_id: stake.id,
        seller_id: listing.seller_id,
        city: stake.city.clone(),
        target_date: stake.target_date,
        target_time: stake.target_time.clone(),
        date_label: odds::date_label(stake.target_date),
        side: stake.side,
        amount: stake.amount,
        base_odds: stake.base_odds,
        boosts_count: stake.boost_count,
        boosts_add: stake.boost_add,
        total_odds: stake.total_odds(),
        potential_gain: stake.potential_gain(),
        ask_price: listing.ask_price,
        created_at: listing.created_at,
        expires_at: listing.expires_at,
        is_mine: listing.seller_id == viewer,
    }
}

/// Rounds to two decimals and rejects non-positive or absurd amounts.
fn valid_points(value: Decimal) -> Result<Points, MarketError> {
    let value = value.round_dp(2);
    if value <= Decimal::ZERO || value > MAX_POINTS {
        return Err(MarketError::InvalidAmount);
    }
    Ok(value)
}
fn valid_username(raw: &str) -> Result<String, MarketError> {
    let name = raw.trim();
    let length = name.chars().count();
    let clean = name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-');
    if !(3..=40).contains(&length) || !clean {
        return Err(MarketError::InvalidUsername);
    }
    Ok(name.to_string())
}
fn clean_city(raw: Option<&str>) -> String {
    let city = raw.map(str::trim).unwrap_or("");
    if city.is_empty() {
        DEFAULT_CITY.to_string()
    } else {
        city.chars().take(MAX_CITY_LENGTH).collect()
    }
}
/// Normalizes "H:M" input to "HH:MM"; anything unparseable is dropped.
fn clean_time(raw: Option<&str>) -> Option<String> {
    let (hours, minutes) = raw?.trim().split_once(':')?;
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(format!("{:02}:{:02}", hours, minutes))
}

fn random_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}
fn hash_password(password: &str, salt: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", salt, password).as_bytes());
    format!("{}${}", salt, hex::encode(digest))
}
fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, _)) => hash_password(password, salt) == stored,
        None => false,
    }
}
