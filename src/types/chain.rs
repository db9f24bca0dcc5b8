use diesel_derive_enum::DbEnum;
use serde_derive::{Deserialize, Serialize};
use strum_macros::Display;

/// Every chain the custody service holds deposit addresses on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, DbEnum, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
#[ExistingTypePath = "crate::schema::sql_types::ChainKind"]
pub enum Chain {
    Ethereum,
    Base,
    Arbitrum,
    Polygon,
    Bsc,
    Solana,
}

impl Chain {
    pub const ALL: [Chain; 6] = [
        Chain::Ethereum,
        Chain::Base,
        Chain::Arbitrum,
        Chain::Polygon,
        Chain::Bsc,
        Chain::Solana,
    ];

    pub fn is_evm(&self) -> bool {
        !matches!(self, Chain::Solana)
    }

    pub fn native_asset(&self) -> Asset {
        match self {
            Chain::Ethereum | Chain::Base | Chain::Arbitrum => Asset::Eth,
            Chain::Polygon => Asset::Pol,
            Chain::Bsc => Asset::Bnb,
            Chain::Solana => Asset::Sol,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, DbEnum, Display,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
#[ExistingTypePath = "crate::schema::sql_types::AssetKind"]
pub enum Asset {
    Eth,
    Bnb,
    Pol,
    Sol,
    Usdc,
    Usdt,
}

impl Asset {
    /// Stablecoins are valued by decimal shift only and never hit the price oracle.
    pub fn is_stablecoin(&self) -> bool {
        matches!(self, Asset::Usdc | Asset::Usdt)
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Asset::Eth | Asset::Bnb | Asset::Pol | Asset::Sol)
    }
}
