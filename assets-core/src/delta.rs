//! Signed-delta application
//!
//! A delta is applied to a copy of the stored record, field by field in
//! declaration order. The caller persists the returned value only if every
//! field succeeded, so a failing update never reaches storage.

use crate::error::{Error, Result};
use crate::types::{OperatorAllocation, StakerBalance, StakingAssetInfo};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Record that can absorb a signed delta
pub trait ApplyDelta: Sized {
    /// Per-field signed changes
    type Delta;

    /// New value, or the first failing field's error
    fn apply_delta(&self, delta: &Self::Delta) -> Result<Self>;
}

/// Signed change to a [`StakerBalance`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakerBalanceDelta {
    /// Change to `total_deposited`
    pub total_deposited: Decimal,
    /// Change to `withdrawable`
    pub withdrawable: Decimal,
    /// Change to `pending_undelegation`
    pub pending_undelegation: Decimal,
}

/// Signed change to an [`OperatorAllocation`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorAllocationDelta {
    /// Change to `total_amount`
    pub total_amount: Decimal,
    /// Change to `operator_amount`
    pub operator_amount: Decimal,
    /// Change to `pending_undelegation`
    pub pending_undelegation: Decimal,
    /// Change to `operator_unbonding`
    pub operator_unbonding: Decimal,
    /// Change to `total_share`
    pub total_share: Decimal,
    /// Change to `operator_share`
    pub operator_share: Decimal,
}

/// `a + b`, or `None` if the sum overflows or had to be rounded
pub fn exact_add(a: Decimal, b: Decimal) -> Option<Decimal> {
    let sum = a.checked_add(b)?;
    if sum.checked_sub(a)? == b && sum.checked_sub(b)? == a {
        Some(sum)
    } else {
        None
    }
}

/// Add `change` to `value`, refusing to go below zero
pub fn update_field(field: &'static str, value: &mut Decimal, change: Decimal) -> Result<()> {
    if change.is_zero() {
        return Ok(());
    }

    let next = exact_add(*value, change).ok_or_else(|| {
        Error::InvalidInput(format!(
            "{}: {} + {} is not exactly representable",
            field, value, change
        ))
    })?;

    if next < Decimal::ZERO {
        return Err(Error::InsufficientBalance(format!(
            "{}: available {}, requested {}",
            field, value, -change
        )));
    }

    *value = if next.is_zero() { Decimal::ZERO } else { next };
    Ok(())
}

impl ApplyDelta for StakerBalance {
    type Delta = StakerBalanceDelta;

    fn apply_delta(&self, delta: &StakerBalanceDelta) -> Result<Self> {
        let mut next = self.clone();
        update_field("total_deposited", &mut next.total_deposited, delta.total_deposited)?;
        update_field("withdrawable", &mut next.withdrawable, delta.withdrawable)?;
        update_field(
            "pending_undelegation",
            &mut next.pending_undelegation,
            delta.pending_undelegation,
        )?;
        Ok(next)
    }
}

impl ApplyDelta for OperatorAllocation {
    type Delta = OperatorAllocationDelta;

    fn apply_delta(&self, delta: &OperatorAllocationDelta) -> Result<Self> {
        let mut next = self.clone();
        update_field("total_amount", &mut next.total_amount, delta.total_amount)?;
        update_field("operator_amount", &mut next.operator_amount, delta.operator_amount)?;
        update_field(
            "pending_undelegation",
            &mut next.pending_undelegation,
            delta.pending_undelegation,
        )?;
        update_field(
            "operator_unbonding",
            &mut next.operator_unbonding,
            delta.operator_unbonding,
        )?;
        update_field("total_share", &mut next.total_share, delta.total_share)?;
        update_field("operator_share", &mut next.operator_share, delta.operator_share)?;

        next.check_bounds()?;
        Ok(next)
    }
}

impl OperatorAllocation {
    /// Sub-allocation bounds
    pub fn check_bounds(&self) -> Result<()> {
        if self.operator_amount > self.total_amount {
            return Err(Error::InvariantViolation(format!(
                "operator_amount {} exceeds total_amount {}",
                self.operator_amount, self.total_amount
            )));
        }
        if self.operator_unbonding > self.pending_undelegation {
            return Err(Error::InvariantViolation(format!(
                "operator_unbonding {} exceeds pending_undelegation {}",
                self.operator_unbonding, self.pending_undelegation
            )));
        }
        if self.operator_share > self.total_share {
            return Err(Error::InvariantViolation(format!(
                "operator_share {} exceeds total_share {}",
                self.operator_share, self.total_share
            )));
        }
        Ok(())
    }
}

impl ApplyDelta for StakingAssetInfo {
    type Delta = Decimal;

    fn apply_delta(&self, change: &Decimal) -> Result<Self> {
        let mut next = self.clone();
        update_field("staking_total_amount", &mut next.staking_total_amount, *change)?;

        if next.staking_total_amount > next.asset_basic_info.total_supply {
            return Err(Error::InvariantViolation(format!(
                "staking total {} exceeds supply cap {}",
                next.staking_total_amount, next.asset_basic_info.total_supply
            )));
        }
        Ok(next)
    }
}
