//! Currency conversion used to normalize notification amounts.
//!
//! The notification layer only needs `convert(amount, from, to)`. Rates come
//! from a [`RatesProvider`]; [`NationalRates`] implements the BYN-based
//! official rate table the application is configured with.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Errors raised while building rate tables or parsing currency codes.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CurrencyError {
    #[error("No rate configured for {0}")]
    MissingRate(CurrencyCode),

    #[error("Rate for {0} must be positive, got {1}")]
    InvalidRate(CurrencyCode, Decimal),

    #[error("Unknown currency code: {0}")]
    UnknownCurrency(String),
}

/// Currencies the application stores amounts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CurrencyCode {
    #[serde(rename = "USD", alias = "usd")]
    Usd,
    #[serde(rename = "EUR", alias = "eur")]
    Eur,
    #[serde(rename = "BYN", alias = "byn")]
    Byn,
    #[serde(rename = "RUB", alias = "rub")]
    Rub,
}

impl CurrencyCode {
    pub const ALL: [CurrencyCode; 4] = [
        CurrencyCode::Usd,
        CurrencyCode::Eur,
        CurrencyCode::Byn,
        CurrencyCode::Rub,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CurrencyCode::Usd => "USD",
            CurrencyCode::Eur => "EUR",
            CurrencyCode::Byn => "BYN",
            CurrencyCode::Rub => "RUB",
        }
    }

    /// ISO 4217 minor unit exponent.
    pub fn exponent(&self) -> u32 {
        2
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CurrencyCode {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CurrencyCode::ALL
            .into_iter()
            .find(|code| code.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CurrencyError::UnknownCurrency(s.to_string()))
    }
}

/// Converts an amount between currencies.
pub trait CurrencyConverter: Send + Sync {
    fn convert(&self, amount: Decimal, from: CurrencyCode, to: CurrencyCode) -> Decimal;
}

/// Source of exchange rates: units of `to` per one unit of `from`.
pub trait RatesProvider: Send + Sync {
    fn get_rate(&self, from: CurrencyCode, to: CurrencyCode) -> Decimal;
}

/// Converter multiplying by the provider's rate and rounding to the target
/// currency's minor units (banker's rounding).
#[derive(Debug, Clone)]
pub struct RatesConverter<R> {
    rates: R,
}

impl<R: RatesProvider> RatesConverter<R> {
    pub fn new(rates: R) -> Self {
        Self { rates }
    }
}

impl<R: RatesProvider> CurrencyConverter for RatesConverter<R> {
    fn convert(&self, amount: Decimal, from: CurrencyCode, to: CurrencyCode) -> Decimal {
        let rate = self.rates.get_rate(from, to);
        amount.saturating_mul(rate).round_dp(to.exponent())
    }
}

/// Official rates quoted against BYN.
#[derive(Debug, Clone)]
pub struct NationalRates {
    to_byn: HashMap<CurrencyCode, Decimal>,
}

impl NationalRates {
    /// Build from BYN prices of one unit of every other currency.
    pub fn new(to_byn: HashMap<CurrencyCode, Decimal>) -> Result<Self, CurrencyError> {
        for code in CurrencyCode::ALL {
            if code == CurrencyCode::Byn {
                continue;
            }
            match to_byn.get(&code) {
                None => return Err(CurrencyError::MissingRate(code)),
                Some(rate) if *rate <= Decimal::ZERO => {
                    return Err(CurrencyError::InvalidRate(code, *rate))
                }
                Some(_) => {}
            }
        }
        Ok(Self { to_byn })
    }

    fn byn_price(&self, code: CurrencyCode) -> Decimal {
        if code == CurrencyCode::Byn {
            return Decimal::ONE;
        }
        // Presence and positivity checked in `new`.
        self.to_byn.get(&code).copied().unwrap_or(Decimal::ONE)
    }
}

impl RatesProvider for NationalRates {
    fn get_rate(&self, from: CurrencyCode, to: CurrencyCode) -> Decimal {
        if from == to {
            return Decimal::ONE;
        }
        if to == CurrencyCode::Byn {
            return self.byn_price(from);
        }
        if from == CurrencyCode::Byn {
            return Decimal::ONE / self.byn_price(to);
        }
        self.byn_price(from) / self.byn_price(to)
    }
}
