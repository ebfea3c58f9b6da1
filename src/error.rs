// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Error types for ledger operations and driver configuration.

use thiserror::Error;

/// Ledger and driver errors.
///
/// Insufficient funds is deliberately absent: blocking strategies wait for
/// funds, and the unsynchronized strategy reports a skipped transfer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Account index is not in `0..size`
    #[error("account {index} out of range (ledger has {size} accounts)")]
    AccountOutOfRange { index: usize, size: usize },

    /// Amount is zero or negative
    #[error("invalid amount (must be positive)")]
    InvalidAmount,

    /// Ledger constructed with no accounts
    #[error("ledger must have at least one account")]
    NoAccounts,

    /// Starting balance below zero
    #[error("initial balance must not be negative")]
    NegativeBalance,

    /// Starting balances sum past the largest representable amount
    #[error("total balance overflows")]
    BalanceOverflow,

    /// Waiting transfer observed a cancellation request
    #[error("transfer cancelled while waiting for funds")]
    Cancelled,

    /// Bounded wait expired before funds became sufficient
    #[error("timed out waiting for funds")]
    TimedOut,

    /// Unrecognised strategy name
    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),

    /// Unrecognised observer placement
    #[error("unknown observer placement '{0}'")]
    UnknownPlacement(String),

    /// Driver configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The OS refused to start a worker thread
    #[error("failed to spawn worker: {0}")]
    WorkerSpawn(String),
}

impl LedgerError {
    /// Returns `true` for errors raised by a violated call precondition.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            LedgerError::AccountOutOfRange { .. } | LedgerError::InvalidAmount
        )
    }
}

#[cfg(test)]
mod tests {
    use super::LedgerError;

    #[test]
    fn error_display_messages() {
        assert_eq!(
            LedgerError::AccountOutOfRange { index: 7, size: 4 }.to_string(),
            "account 7 out of range (ledger has 4 accounts)"
        );
        assert_eq!(
            LedgerError::InvalidAmount.to_string(),
            "invalid amount (must be positive)"
        );
        assert_eq!(
            LedgerError::NoAccounts.to_string(),
            "ledger must have at least one account"
        );
        assert_eq!(
            LedgerError::Cancelled.to_string(),
            "transfer cancelled while waiting for funds"
        );
        assert_eq!(LedgerError::TimedOut.to_string(), "timed out waiting for funds");
        assert_eq!(LedgerError::BalanceOverflow.to_string(), "total balance overflows");
        assert_eq!(
            LedgerError::UnknownStrategy("x".into()).to_string(),
            "unknown strategy 'x'"
        );
    }

    #[test]
    fn precondition_classification() {
        assert!(LedgerError::InvalidAmount.is_precondition());
        assert!(LedgerError::AccountOutOfRange { index: 1, size: 1 }.is_precondition());
        assert!(!LedgerError::Cancelled.is_precondition());
        assert!(!LedgerError::TimedOut.is_precondition());
    }
}
