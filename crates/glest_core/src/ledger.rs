//! Per-player resource accounts.
//!
//! Every debit is atomic: all resources are checked before any is
//! deducted. Every mutation is announced on the [`EventBus`] as a
//! [`GameEvent::ResourcesChanged`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::InsufficientResources;
use crate::events::{ChangeReason, EventBus, GameEvent, ResourceDelta};
use crate::PlayerId;

/// Resource name → amount. Used for costs, gains and balances.
pub type ResourceCost = BTreeMap<String, u32>;

/// Lifetime credit and debit totals for one player.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerTotals {
    /// Everything ever credited, refunds included.
    pub credited: BTreeMap<String, u64>,
    /// Everything ever debited.
    pub debited: BTreeMap<String, u64>,
}

impl LedgerTotals {
    /// Net flow for a resource (credited minus debited).
    #[must_use]
    pub fn net(&self, resource: &str) -> i64 {
        let credited = self.credited.get(resource).copied().unwrap_or(0);
        let debited = self.debited.get(resource).copied().unwrap_or(0);
        credited as i64 - debited as i64
    }
}

/// Resource accounts for every player.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceLedger {
    accounts: BTreeMap<PlayerId, ResourceCost>,
    totals: BTreeMap<PlayerId, LedgerTotals>,
}

impl ResourceLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an empty account. Opening an existing account is a no-op.
    pub fn open_account(&mut self, player: PlayerId) {
        self.accounts.entry(player).or_default();
        self.totals.entry(player).or_default();
    }

    /// Whether the player has an account.
    #[must_use]
    pub fn has_account(&self, player: PlayerId) -> bool {
        self.accounts.contains_key(&player)
    }

    /// Current amount of one resource.
    #[must_use]
    pub fn amount(&self, player: PlayerId, resource: &str) -> u32 {
        self.accounts
            .get(&player)
            .and_then(|a| a.get(resource))
            .copied()
            .unwrap_or(0)
    }

    /// Whether the player could pay `cost` right now.
    #[must_use]
    pub fn can_afford(&self, player: PlayerId, cost: &ResourceCost) -> bool {
        self.first_shortfall(player, cost).is_none()
    }

    fn first_shortfall(&self, player: PlayerId, cost: &ResourceCost) -> Option<InsufficientResources> {
        cost.iter().find_map(|(resource, &required)| {
            let available = self.amount(player, resource);
            (available < required).then(|| InsufficientResources {
                resource: resource.clone(),
                required,
                available,
            })
        })
    }

    /// Deduct `cost`, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns the first resource (in name order) the player is short of.
    /// Nothing is deducted in that case.
    pub fn debit(
        &mut self,
        player: PlayerId,
        cost: &ResourceCost,
        reason: ChangeReason,
        events: &mut EventBus,
    ) -> Result<(), InsufficientResources> {
        if let Some(shortfall) = self.first_shortfall(player, cost) {
            return Err(shortfall);
        }

        let mut delta = ResourceDelta::new();
        let account = self.accounts.entry(player).or_default();
        let totals = self.totals.entry(player).or_default();
        for (resource, &amount) in cost.iter().filter(|&(_, &a)| a > 0) {
            if let Some(balance) = account.get_mut(resource) {
                *balance -= amount;
            }
            *totals.debited.entry(resource.clone()).or_default() += u64::from(amount);
            delta.insert(resource.clone(), -i64::from(amount));
        }

        if !delta.is_empty() {
            events.emit(GameEvent::ResourcesChanged {
                player,
                delta,
                reason,
            });
        }
        Ok(())
    }

    /// Add `gain` to the player's account. Always succeeds.
    pub fn credit(
        &mut self,
        player: PlayerId,
        gain: &ResourceCost,
        reason: ChangeReason,
        events: &mut EventBus,
    ) {
        let mut delta = ResourceDelta::new();
        let account = self.accounts.entry(player).or_default();
        let totals = self.totals.entry(player).or_default();
        for (resource, &amount) in gain.iter().filter(|&(_, &a)| a > 0) {
            let balance = account.entry(resource.clone()).or_default();
            *balance = balance.saturating_add(amount);
            *totals.credited.entry(resource.clone()).or_default() += u64::from(amount);
            delta.insert(resource.clone(), i64::from(amount));
        }

        if !delta.is_empty() {
            events.emit(GameEvent::ResourcesChanged {
                player,
                delta,
                reason,
            });
        }
    }

    /// Immutable copy of the player's account.
    #[must_use]
    pub fn snapshot(&self, player: PlayerId) -> ResourceCost {
        self.accounts.get(&player).cloned().unwrap_or_default()
    }

    /// Lifetime totals for the player.
    #[must_use]
    pub fn totals(&self, player: PlayerId) -> LedgerTotals {
        self.totals.get(&player).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    fn cost(entries: &[(&str, u32)]) -> ResourceCost {
        entries.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    fn funded_ledger() -> (ResourceLedger, EventBus) {
        let mut ledger = ResourceLedger::new();
        let mut events = EventBus::new();
        ledger.open_account(1);
        ledger.credit(
            1,
            &cost(&[("gold", 100), ("wood", 50)]),
            ChangeReason::Initial,
            &mut events,
        );
        (ledger, events)
    }

    #[test]
    fn test_debit_is_all_or_nothing() {
        let (mut ledger, mut events) = funded_ledger();
        let err = ledger
            .debit(1, &cost(&[("gold", 75), ("energy", 1)]), ChangeReason::Production, &mut events)
            .unwrap_err();
        assert_eq!(err.resource, "energy");
        assert_eq!(err.required, 1);
        assert_eq!(err.available, 0);
        assert_eq!(ledger.amount(1, "gold"), 100);

        ledger
            .debit(1, &cost(&[("gold", 75)]), ChangeReason::Production, &mut events)
            .unwrap();
        assert_eq!(ledger.amount(1, "gold"), 25);
        assert_eq!(ledger.amount(1, "wood"), 50);
    }

    #[test]
    fn test_mutations_emit_resources_changed() {
        let (mut ledger, mut events) = funded_ledger();
        ledger
            .debit(1, &cost(&[("wood", 20)]), ChangeReason::Construction, &mut events)
            .unwrap();
        let flushed = events.flush();
        assert_eq!(flushed.len(), 2);
        assert!(flushed.iter().all(|e| e.kind() == EventKind::ResourcesChanged));
        match &flushed[1] {
            GameEvent::ResourcesChanged {
                player,
                delta,
                reason,
            } => {
                assert_eq!(*player, 1);
                assert_eq!(delta.get("wood"), Some(&-20));
                assert_eq!(*reason, ChangeReason::Construction);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_failed_debit_emits_nothing() {
        let (mut ledger, mut events) = funded_ledger();
        events.flush();
        assert!(ledger
            .debit(1, &cost(&[("gold", 500)]), ChangeReason::Production, &mut events)
            .is_err());
        assert!(events.flush().is_empty());
    }

    #[test]
    fn test_totals_track_net_flow() {
        let (mut ledger, mut events) = funded_ledger();
        ledger
            .debit(1, &cost(&[("gold", 30)]), ChangeReason::Production, &mut events)
            .unwrap();
        ledger.credit(1, &cost(&[("gold", 30)]), ChangeReason::Refund, &mut events);
        let totals = ledger.totals(1);
        assert_eq!(totals.net("gold"), 100);
        assert_eq!(ledger.snapshot(1), cost(&[("gold", 100), ("wood", 50)]));
    }

    #[test]
    fn test_unknown_player_cannot_afford() {
        let ledger = ResourceLedger::new();
        assert!(!ledger.can_afford(9, &cost(&[("gold", 1)])));
        assert!(ledger.can_afford(9, &ResourceCost::new()));
    }
}
