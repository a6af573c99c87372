use alloy_primitives::{Address, B256};
use anyhow::{Result, bail};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub token_address: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Approved,
    Pending,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    BuyProjectToken,
    SellProjectToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketType {
    Primary,
    Secondary,
}

macro_rules! stored_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl FromStr for $ty {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => bail!("Unknown {} value: {}", stringify!($ty), other),
                }
            }
        }
    };
}

stored_enum!(TransactionStatus {
    Approved => "APPROVED",
    Pending => "PENDING",
    Rejected => "REJECTED",
});

stored_enum!(TransactionType {
    BuyProjectToken => "BUY_PROJECT_TOKEN",
    SellProjectToken => "SELL_PROJECT_TOKEN",
});

stored_enum!(MarketType {
    Primary => "PRIMARY",
    Secondary => "SECONDARY",
});

/// A registered purchase. `id` is `None` until the row exists.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub id: Option<i64>,
    pub transaction_hash: B256,
    pub project_id: i64,
    pub project_token_address: Address,
    pub user_who_buys: Address,
    pub token_amount: f64,
    pub wusdt_amount: f64,
    pub token_price: f64,
    pub fees_wusdt: f64,
    pub status: TransactionStatus,
    pub transaction_type: TransactionType,
    pub market_type: MarketType,
    pub receipt_link: String,
    pub block_number: u64,
    pub block_timestamp: u64,
}
