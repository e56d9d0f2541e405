//! Shared utilities for FortuneBlock contracts.
#![no_std]
#![allow(unexpected_cfgs)]

use soroban_sdk::contracterror;

/// Common error codes for shared arithmetic helpers.
#[contracterror]
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u32)]
pub enum Error {
    InvalidAmount = 1,
    InvalidFeeBps = 2,
    Overflow = 3,
}

/// Constant for basis points divisor.
pub const BASIS_POINTS_DIVISOR: u32 = 10_000;

/// Helper to calculate the platform fee on an amount, in basis points.
///
/// Rounds down, so `amount - calculate_fee(amount, bps)` never underpays
/// the recipient of the remainder.
pub fn calculate_fee(amount: i128, fee_bps: u32) -> Result<i128, Error> {
    if amount < 0 {
        return Err(Error::InvalidAmount);
    }
    if fee_bps > BASIS_POINTS_DIVISOR {
        return Err(Error::InvalidFeeBps);
    }
    amount
        .checked_mul(fee_bps as i128)
        .and_then(|v| v.checked_div(BASIS_POINTS_DIVISOR as i128))
        .ok_or(Error::Overflow)
}
