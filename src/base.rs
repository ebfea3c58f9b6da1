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

//! Selector types shared by the ledger, the driver and the CLI.

use crate::LedgerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Synchronization discipline guarding a [`Ledger`](crate::Ledger).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// No mutual exclusion. Check-then-act races are left in on purpose.
    Unsynchronized,
    /// Monitor lock whose single wait set is shared with the entry queue.
    IntrinsicLock,
    /// Reentrant lock with a dedicated `sufficient_funds` condition.
    ExplicitLockCondition,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::Unsynchronized,
        StrategyKind::IntrinsicLock,
        StrategyKind::ExplicitLockCondition,
    ];

    /// Returns `true` if insufficient funds suspend the caller instead of
    /// skipping the transfer.
    pub fn is_blocking(self) -> bool {
        !matches!(self, StrategyKind::Unsynchronized)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::Unsynchronized => "unsynchronized",
            StrategyKind::IntrinsicLock => "intrinsic",
            StrategyKind::ExplicitLockCondition => "explicit",
        };
        f.write_str(name)
    }
}

impl FromStr for StrategyKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unsynchronized" | "unsync" | "none" => Ok(StrategyKind::Unsynchronized),
            "intrinsic" | "intrinsic-lock" | "monitor" => Ok(StrategyKind::IntrinsicLock),
            "explicit" | "explicit-lock" | "explicit-lock-condition" => {
                Ok(StrategyKind::ExplicitLockCondition)
            }
            other => Err(LedgerError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Where a ledger invokes its observer relative to the critical section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObserverPlacement {
    /// Inside the lock: every worker serializes on the observer's output.
    InsideLock,
    /// After the lock is released, from a snapshot taken inside it.
    #[default]
    OutsideLock,
}

impl fmt::Display for ObserverPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObserverPlacement::InsideLock => f.write_str("inside"),
            ObserverPlacement::OutsideLock => f.write_str("outside"),
        }
    }
}

impl FromStr for ObserverPlacement {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inside" | "inside-lock" => Ok(ObserverPlacement::InsideLock),
            "outside" | "outside-lock" => Ok(ObserverPlacement::OutsideLock),
            other => Err(LedgerError::UnknownPlacement(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_round_trips_through_display() {
        for kind in StrategyKind::ALL {
            assert_eq!(kind.to_string().parse::<StrategyKind>().unwrap(), kind);
        }
    }

    #[test]
    fn strategy_aliases_parse() {
        assert_eq!(
            " Monitor ".parse::<StrategyKind>().unwrap(),
            StrategyKind::IntrinsicLock
        );
        assert_eq!(
            "none".parse::<StrategyKind>().unwrap(),
            StrategyKind::Unsynchronized
        );
        assert_eq!(
            "bogus".parse::<StrategyKind>(),
            Err(LedgerError::UnknownStrategy("bogus".to_string()))
        );
    }

    #[test]
    fn only_unsynchronized_is_non_blocking() {
        assert!(!StrategyKind::Unsynchronized.is_blocking());
        assert!(StrategyKind::IntrinsicLock.is_blocking());
        assert!(StrategyKind::ExplicitLockCondition.is_blocking());
    }

    #[test]
    fn placement_defaults_outside() {
        assert_eq!(ObserverPlacement::default(), ObserverPlacement::OutsideLock);
        assert_eq!(
            "inside".parse::<ObserverPlacement>().unwrap(),
            ObserverPlacement::InsideLock
        );
        assert!("sideways".parse::<ObserverPlacement>().is_err());
    }
}
