//! Bot listings: the off-chain record of a bot and its on-chain identity.

pub mod lifecycle;

pub use lifecycle::{LifecycleManager, LifecycleSettings, PublishData, PublishPayload, RegistryBotData};

use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{MarketError, Result};

pub type ListingId = u64;

/// Decimals of the settlement token (USDT); prices are kept in its smallest unit.
pub const PRICE_DECIMALS: u32 = 6;
const PRICE_SCALE: u64 = 10u64.pow(PRICE_DECIMALS);

pub const MAX_NAME_LEN: usize = 100;

/// Currency-denominated price held as an integer amount of the settlement
/// token's smallest unit, so "10.00" is stored as 10_000_000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Price(u64);

impl Price {
    pub fn from_token_units(units: u64) -> Self {
        Price(units)
    }

    /// Amount in the token's smallest unit, as submitted on-chain.
    pub fn token_units(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let invalid = || MarketError::Validation(format!("invalid price: {:?}", input));

        let (whole, frac) = match input.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (input, ""),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if frac.len() > PRICE_DECIMALS as usize {
            return Err(MarketError::Validation(format!(
                "price {} has more than {} decimal places",
                input, PRICE_DECIMALS
            )));
        }

        let whole: u64 = whole.parse().map_err(|_| invalid())?;
        let frac_units: u64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = PRICE_DECIMALS as usize);
            padded.parse().map_err(|_| invalid())?
        };

        whole
            .checked_mul(PRICE_SCALE)
            .and_then(|units| units.checked_add(frac_units))
            .map(Price)
            .ok_or_else(invalid)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / PRICE_SCALE;
        let frac = format!("{:0width$}", self.0 % PRICE_SCALE, width = PRICE_DECIMALS as usize);
        let trimmed = frac.trim_end_matches('0');
        if trimmed.len() < 2 {
            write!(f, "{}.{}", whole, &frac[..2])
        } else {
            write!(f, "{}.{}", whole, trimmed)
        }
    }
}

impl Serialize for Price {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct PriceVisitor;

        impl<'de> de::Visitor<'de> for PriceVisitor {
            type Value = Price;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative decimal price")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Price, E> {
                Price::parse(v).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Price, E> {
                v.checked_mul(PRICE_SCALE)
                    .map(Price)
                    .ok_or_else(|| E::custom("price out of range"))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Price, E> {
                u64::try_from(v)
                    .map_err(|_| E::custom("price must not be negative"))
                    .and_then(|v| self.visit_u64(v))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Price, E> {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("price must be a finite non-negative number"));
                }
                Price::parse(&v.to_string()).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(PriceVisitor)
    }
}

/// Lifecycle status of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListingStatus {
    Draft,
    PinnedPending,
    PinnedLocked,
    Published,
    PinFailed,
}

impl ListingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingStatus::Draft => "draft",
            ListingStatus::PinnedPending => "pinned-pending",
            ListingStatus::PinnedLocked => "pinned-locked",
            ListingStatus::Published => "published",
            ListingStatus::PinFailed => "pin-failed",
        }
    }
}

impl fmt::Display for ListingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub id: ListingId,
    /// Principal of the developer who created the listing
    pub owner: String,
    pub name: String,
    pub description: String,
    pub price: Price,
    pub trial_days: u32,
    pub status: ListingStatus,
    pub content_id: Option<String>,
    pub content_url: Option<String>,
    pub onchain_id: Option<u64>,
    pub transaction_hash: Option<String>,
    pub is_locked: bool,
    pub pin_requested_at: Option<DateTime<Utc>>,
    pub pinned_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped by the store on every write; conditional updates compare against it
    pub revision: u64,
}

impl Listing {
    pub fn new_draft(owner: &str, draft: ListingDraft, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            owner: owner.to_string(),
            name: draft.name,
            description: draft.description,
            price: draft.price,
            trial_days: draft.trial_days,
            status: ListingStatus::Draft,
            content_id: None,
            content_url: None,
            onchain_id: None,
            transaction_hash: None,
            is_locked: false,
            pin_requested_at: None,
            pinned_at: None,
            published_at: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    pub fn is_owned_by(&self, principal: &str) -> bool {
        self.owner == principal
    }

    /// Canonical document pinned to IPFS. The registry transaction must carry
    /// the same price and trial time, which is why they freeze once pinned.
    pub fn pin_document(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "description": self.description,
            "price": self.price.token_units().to_string(),
            "trial_time": self.trial_days,
            "created_by": self.owner,
        })
    }

    /// Check the status-dependent field requirements.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        match self.status {
            ListingStatus::Published => {
                if self.content_id.is_none() {
                    return Err(format!("published listing {} has no content id", self.id));
                }
                if self.onchain_id.is_none() {
                    return Err(format!("published listing {} has no on-chain id", self.id));
                }
                if self.transaction_hash.is_none() {
                    return Err(format!("published listing {} has no transaction hash", self.id));
                }
                if self.published_at.is_none() {
                    return Err(format!("published listing {} has no publish time", self.id));
                }
            }
            ListingStatus::PinnedLocked => {
                if self.content_id.is_none() || !self.is_locked {
                    return Err(format!("pinned listing {} is missing its pin lock", self.id));
                }
            }
            ListingStatus::PinnedPending => {
                if !self.is_locked || self.pin_requested_at.is_none() {
                    return Err(format!("pending listing {} is not claimed", self.id));
                }
            }
            ListingStatus::Draft | ListingStatus::PinFailed => {
                if self.is_locked {
                    return Err(format!("{} listing {} is locked", self.status, self.id));
                }
            }
        }
        Ok(())
    }
}

/// Fields supplied by the owner when creating a listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ListingDraft {
    pub name: String,
    pub description: String,
    pub price: Price,
    #[serde(default)]
    pub trial_days: u32,
}

impl ListingDraft {
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        validate_description(&self.description)?;
        validate_price(&self.price)
    }
}

/// Partial owner edit; absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingEdit {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Price>,
    pub trial_days: Option<u32>,
}

impl ListingEdit {
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(description) = &self.description {
            validate_description(description)?;
        }
        if let Some(price) = &self.price {
            validate_price(price)?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.price.is_none()
            && self.trial_days.is_none()
    }

    pub fn apply(&self, listing: &mut Listing) {
        if let Some(name) = &self.name {
            listing.name = name.trim().to_string();
        }
        if let Some(description) = &self.description {
            listing.description = description.clone();
        }
        if let Some(price) = self.price {
            listing.price = price;
        }
        if let Some(trial_days) = self.trial_days {
            listing.trial_days = trial_days;
        }
    }
}

fn validate_name(name: &str) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        return Err(MarketError::Validation("name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(MarketError::Validation(format!(
            "name must be at most {} characters",
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<()> {
    if description.trim().is_empty() {
        return Err(MarketError::Validation("description must not be empty".to_string()));
    }
    Ok(())
}

fn validate_price(price: &Price) -> Result<()> {
    if price.is_zero() {
        return Err(MarketError::Validation("price must be greater than zero".to_string()));
    }
    Ok(())
}
