use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use anyhow::bail;

use super::*;

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Rain => "RAIN",
            Self::Sun => "SUN",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "RAIN" => Ok(Self::Rain),
            "SUN" => Ok(Self::Sun),
            e => bail!("Couldn't deserialize to Side: {}", e),
        }
    }
}
impl Display for StakeStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Active => "Active",
            Self::Settled => "Settled",
            Self::Cancelled => "Cancelled",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for StakeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Active" => Ok(Self::Active),
            "Settled" => Ok(Self::Settled),
            "Cancelled" => Ok(Self::Cancelled),
            e => bail!("Couldn't deserialize to StakeStatus: {}", e),
        }
    }
}
impl Display for ListingStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Active => "Active",
            Self::Sold => "Sold",
            Self::Cancelled => "Cancelled",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for ListingStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Active" => Ok(Self::Active),
            "Sold" => Ok(Self::Sold),
            "Cancelled" => Ok(Self::Cancelled),
            e => bail!("Couldn't deserialize to ListingStatus: {}", e),
        }
    }
}
impl Display for UserRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::User => "User",
            Self::Admin => "Admin",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "User" => Ok(Self::User),
            "Admin" => Ok(Self::Admin),
            e => bail!("Couldn't deserialize to UserRole: {}", e),
        }
    }
}
impl Default for UserRole {
    fn default() -> Self {
        UserRole::User
    }
}
