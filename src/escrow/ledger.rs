//! Escrow Ledger
//!
//! Keyed store of every record plus participant wallet balances, with
//! all-or-nothing transactions.
//!
//! ```text
//! ┌──────────────┐  execute(f)  ┌───────────────┐  validate  ┌─────────┐
//! │    Ledger    │ ───────────▶ │  Transaction  │ ─────────▶ │ commit  │
//! │ (committed)  │              │ (staged diff) │            │ + event │
//! └──────────────┘              └───────────────┘            └─────────┘
//!        ▲                              │ Err
//!        └──────────── unchanged ◀──────┘
//! ```
//!
//! A transaction only ever reads through to the committed ledger; writes
//! land in its own overlay. The overlay is checked for vault/record pairing,
//! the vault balance invariant, and lamport conservation before it is
//! applied in one step. Uses BTreeMap throughout for deterministic order.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::core::address::{Address, Identity};
use crate::core::amount::{self, Lamports};
use crate::core::hash::{compute_ledger_hash, LedgerHash};
use crate::escrow::error::{EscrowError, EscrowResult};
use crate::escrow::events::EscrowEvent;
use crate::escrow::journal::Journal;
use crate::escrow::state::{ConfigStore, MatchRecord, TreasuryAccount, Vault};

/// Outcome of a committed transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Journal sequence of the commit.
    pub sequence: u64,
    /// Events emitted.
    pub events: Vec<EscrowEvent>,
    /// Ledger state root after the commit.
    pub state_hash: LedgerHash,
}

// =============================================================================
// LEDGER
// =============================================================================

/// Committed escrow state.
#[derive(Clone, Debug, Default)]
pub struct Ledger {
    config: Option<ConfigStore>,
    treasury: Option<TreasuryAccount>,
    matches: BTreeMap<Address, MatchRecord>,
    vaults: BTreeMap<Address, Vault>,
    /// Addresses of matches that have been settled or cancelled.
    closed: BTreeSet<Address>,
    wallets: BTreeMap<Identity, Lamports>,
    journal: Journal,
}

impl Ledger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger seeded with genesis wallet balances.
    pub fn with_balances<I>(balances: I) -> Self
    where
        I: IntoIterator<Item = (Identity, Lamports)>,
    {
        let mut ledger = Self::new();
        for (identity, lamports) in balances {
            ledger.open_wallet(identity, lamports);
        }
        ledger
    }

    /// Genesis allocation. Adds to any existing balance.
    pub fn open_wallet(&mut self, identity: Identity, lamports: Lamports) {
        let balance = self.wallets.entry(identity).or_insert(0);
        *balance = balance.saturating_add(lamports);
    }

    /// Config store, if initialized.
    pub fn config(&self) -> Option<&ConfigStore> {
        self.config.as_ref()
    }

    /// Treasury, if initialized.
    pub fn treasury(&self) -> Option<&TreasuryAccount> {
        self.treasury.as_ref()
    }

    /// Live match record.
    pub fn match_record(&self, address: &Address) -> Option<&MatchRecord> {
        self.matches.get(address)
    }

    /// Live vault.
    pub fn vault(&self, address: &Address) -> Option<&Vault> {
        self.vaults.get(address)
    }

    /// Whether the match at `address` has been settled or cancelled.
    pub fn is_closed(&self, address: &Address) -> bool {
        self.closed.contains(address)
    }

    /// Live matches, in address order.
    pub fn matches(&self) -> impl Iterator<Item = (&Address, &MatchRecord)> {
        self.matches.iter()
    }

    /// Wallet balance of an identity.
    pub fn balance(&self, identity: &Identity) -> Lamports {
        self.wallets.get(identity).copied().unwrap_or(0)
    }

    /// Commit journal.
    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Every lamport the ledger holds: wallets, vaults, record rent, treasury.
    pub fn total_lamports(&self) -> u128 {
        let wallets: u128 = self.wallets.values().map(|v| *v as u128).sum();
        let vaults: u128 = self.vaults.values().map(|v| v.balance as u128).sum();
        let rent: u128 = self.matches.values().map(|m| m.rent as u128).sum();
        let treasury = self.treasury.as_ref().map_or(0, |t| t.balance as u128);
        wallets + vaults + rent + treasury
    }

    /// Deterministic state root.
    pub fn compute_hash(&self) -> LedgerHash {
        compute_ledger_hash(self.journal.len(), |hasher| {
            match &self.config {
                Some(config) => {
                    hasher.update_u8(1);
                    hasher.update_key(config.authority.as_bytes());
                    hasher.update_key(config.treasury.as_bytes());
                }
                None => hasher.update_u8(0),
            }
            match &self.treasury {
                Some(treasury) => {
                    hasher.update_u8(1);
                    treasury.hash_into(hasher);
                }
                None => hasher.update_u8(0),
            }

            hasher.update_u64(self.matches.len() as u64);
            for (address, record) in &self.matches {
                hasher.update_key(address.as_bytes());
                record.hash_into(hasher);
            }

            hasher.update_u64(self.vaults.len() as u64);
            for (address, vault) in &self.vaults {
                hasher.update_key(address.as_bytes());
                vault.hash_into(hasher);
            }

            hasher.update_u64(self.closed.len() as u64);
            for address in &self.closed {
                hasher.update_key(address.as_bytes());
            }

            hasher.update_u64(self.wallets.len() as u64);
            for (identity, balance) in &self.wallets {
                hasher.update_key(identity.as_bytes());
                hasher.update_u64(*balance);
            }
        })
    }

    /// Run `f` as one atomic transaction.
    ///
    /// On `Ok` every staged write and event is committed together and a
    /// receipt returned. On `Err` (from `f` or from commit validation)
    /// nothing changes.
    pub fn execute<T, F>(&mut self, f: F) -> EscrowResult<(T, Receipt)>
    where
        F: FnOnce(&mut Transaction<'_>) -> EscrowResult<T>,
    {
        let (value, changes) = {
            let mut tx = Transaction::new(self);
            let value = f(&mut tx)?;
            let changes = tx.into_changes();
            if let Err(e) = changes.validate(self) {
                warn!("Rejected transaction at commit: {}", e);
                return Err(e);
            }
            (value, changes)
        };

        let receipt = self.apply(changes);
        Ok((value, receipt))
    }

    fn apply(&mut self, changes: ChangeSet) -> Receipt {
        if let Some(config) = changes.config {
            self.config = config;
        }
        if let Some(treasury) = changes.treasury {
            self.treasury = treasury;
        }
        for (address, record) in changes.matches {
            match record {
                Some(record) => self.matches.insert(address, record),
                None => self.matches.remove(&address),
            };
        }
        for (address, vault) in changes.vaults {
            match vault {
                Some(vault) => self.vaults.insert(address, vault),
                None => self.vaults.remove(&address),
            };
        }
        self.closed.extend(changes.closed);
        self.wallets.extend(changes.wallets);

        let sequence = self.journal.append(changes.events.clone()).sequence;
        let state_hash = self.compute_hash();
        debug!("Committed transaction #{} ({} events)", sequence, changes.events.len());

        Receipt { sequence, events: changes.events, state_hash }
    }
}

// =============================================================================
// TRANSACTION
// =============================================================================

/// Staged writes of one transaction. `None` in a map means "deleted".
#[derive(Debug, Default)]
struct ChangeSet {
    config: Option<Option<ConfigStore>>,
    treasury: Option<Option<TreasuryAccount>>,
    matches: BTreeMap<Address, Option<MatchRecord>>,
    vaults: BTreeMap<Address, Option<Vault>>,
    closed: BTreeSet<Address>,
    wallets: BTreeMap<Identity, Lamports>,
    events: Vec<EscrowEvent>,
}

impl ChangeSet {
    /// Check the staged state against the committed base.
    fn validate(&self, base: &Ledger) -> EscrowResult<()> {
        let touched: BTreeSet<Address> = self
            .matches
            .keys()
            .copied()
            .chain(self.vaults.values().flatten().map(|v| v.match_address))
            .chain(
                self.vaults
                    .keys()
                    .filter_map(|addr| base.vaults.get(addr).map(|v| v.match_address)),
            )
            .collect();

        for match_address in &touched {
            let record = match self.matches.get(match_address) {
                Some(staged) => staged.as_ref(),
                None => base.matches.get(match_address),
            };
            match record {
                Some(record) => {
                    let vault = match self.vaults.get(&record.vault) {
                        Some(staged) => staged.as_ref(),
                        None => base.vaults.get(&record.vault),
                    };
                    let vault = vault.ok_or_else(|| {
                        EscrowError::InvariantViolation(format!("match {:?} has no vault", match_address))
                    })?;
                    if vault.match_address != *match_address {
                        return Err(EscrowError::InvariantViolation("vault bound to another match".into()));
                    }
                    if !record.players_consistent() {
                        return Err(EscrowError::InvariantViolation("status and players disagree".into()));
                    }
                    if vault.balance != record.expected_vault_balance()? {
                        return Err(EscrowError::InvariantViolation(format!(
                            "vault holds {} but {:?} requires {}",
                            vault.balance,
                            record.status,
                            record.expected_vault_balance()?
                        )));
                    }
                }
                None => {
                    let vault_alive = self
                        .vaults
                        .iter()
                        .filter_map(|(_, v)| v.as_ref())
                        .chain(base.vaults.iter().filter(|(addr, _)| !self.vaults.contains_key(*addr)).map(|(_, v)| v))
                        .any(|v| v.match_address == *match_address);
                    if vault_alive {
                        return Err(EscrowError::InvariantViolation(format!(
                            "vault outlives match {:?}",
                            match_address
                        )));
                    }
                }
            }
        }

        if self.lamport_delta(base) != 0 {
            return Err(EscrowError::InvariantViolation("lamports created or destroyed".into()));
        }
        Ok(())
    }

    /// Net lamports the change set would add to the ledger. Must be zero.
    fn lamport_delta(&self, base: &Ledger) -> i128 {
        let mut delta: i128 = 0;
        for (identity, balance) in &self.wallets {
            delta += *balance as i128 - base.balance(identity) as i128;
        }
        for (address, vault) in &self.vaults {
            let new = vault.as_ref().map_or(0, |v| v.balance as i128);
            let old = base.vaults.get(address).map_or(0, |v| v.balance as i128);
            delta += new - old;
        }
        for (address, record) in &self.matches {
            let new = record.as_ref().map_or(0, |m| m.rent as i128);
            let old = base.matches.get(address).map_or(0, |m| m.rent as i128);
            delta += new - old;
        }
        if let Some(treasury) = &self.treasury {
            let new = treasury.as_ref().map_or(0, |t| t.balance as i128);
            let old = base.treasury.as_ref().map_or(0, |t| t.balance as i128);
            delta += new - old;
        }
        delta
    }
}

/// Overlay of staged changes on top of the committed ledger.
pub struct Transaction<'a> {
    base: &'a Ledger,
    changes: ChangeSet,
}

impl<'a> Transaction<'a> {
    fn new(base: &'a Ledger) -> Self {
        Self { base, changes: ChangeSet::default() }
    }

    fn into_changes(self) -> ChangeSet {
        self.changes
    }

    // -------------------------------------------------------------------------
    // Reads (staged value first, then committed)
    // -------------------------------------------------------------------------

    /// Config store.
    pub fn config(&self) -> Option<ConfigStore> {
        match &self.changes.config {
            Some(staged) => staged.clone(),
            None => self.base.config.clone(),
        }
    }

    /// Config store, or `ConfigNotInitialized`.
    pub fn require_config(&self) -> EscrowResult<ConfigStore> {
        self.config().ok_or(EscrowError::ConfigNotInitialized)
    }

    /// Treasury account.
    pub fn treasury(&self) -> Option<TreasuryAccount> {
        match &self.changes.treasury {
            Some(staged) => staged.clone(),
            None => self.base.treasury.clone(),
        }
    }

    /// Match record.
    pub fn match_record(&self, address: &Address) -> Option<MatchRecord> {
        match self.changes.matches.get(address) {
            Some(staged) => staged.clone(),
            None => self.base.matches.get(address).cloned(),
        }
    }

    /// Vault.
    pub fn vault(&self, address: &Address) -> Option<Vault> {
        match self.changes.vaults.get(address) {
            Some(staged) => staged.clone(),
            None => self.base.vaults.get(address).cloned(),
        }
    }

    /// Whether the match has been closed (committed or staged).
    pub fn is_closed(&self, address: &Address) -> bool {
        self.changes.closed.contains(address) || self.base.closed.contains(address)
    }

    /// Wallet balance.
    pub fn balance(&self, identity: &Identity) -> Lamports {
        self.changes
            .wallets
            .get(identity)
            .copied()
            .unwrap_or_else(|| self.base.balance(identity))
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Stage the config store.
    pub fn put_config(&mut self, config: ConfigStore) {
        self.changes.config = Some(Some(config));
    }

    /// Stage the treasury.
    pub fn put_treasury(&mut self, treasury: TreasuryAccount) {
        self.changes.treasury = Some(Some(treasury));
    }

    /// Stage a match record.
    pub fn put_match(&mut self, address: Address, record: MatchRecord) {
        self.changes.matches.insert(address, Some(record));
    }

    /// Stage a vault.
    pub fn put_vault(&mut self, address: Address, vault: Vault) {
        self.changes.vaults.insert(address, Some(vault));
    }

    /// Delete a match record and its vault, tombstoning the address.
    pub fn close_match(&mut self, address: Address, vault: Address) {
        self.changes.matches.insert(address, None);
        self.changes.vaults.insert(vault, None);
        self.changes.closed.insert(address);
    }

    /// Remove lamports from a wallet.
    pub fn debit(&mut self, identity: &Identity, lamports: Lamports) -> EscrowResult<()> {
        let available = self.balance(identity);
        if available < lamports {
            return Err(EscrowError::InsufficientFunds { needed: lamports, available });
        }
        self.changes.wallets.insert(*identity, available - lamports);
        Ok(())
    }

    /// Add lamports to a wallet.
    pub fn credit(&mut self, identity: &Identity, lamports: Lamports) -> EscrowResult<()> {
        let balance = amount::add(self.balance(identity), lamports)?;
        self.changes.wallets.insert(*identity, balance);
        Ok(())
    }

    /// Add lamports to the treasury.
    pub fn credit_treasury(&mut self, lamports: Lamports) -> EscrowResult<()> {
        let mut treasury = self.treasury().ok_or(EscrowError::ConfigNotInitialized)?;
        treasury.balance = amount::add(treasury.balance, lamports)?;
        self.put_treasury(treasury);
        Ok(())
    }

    /// Record an event for this transaction.
    pub fn emit(&mut self, event: EscrowEvent) {
        self.changes.events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::address;

    const ALICE: Identity = Identity::new([1; 32]);
    const BOB: Identity = Identity::new([2; 32]);

    #[test]
    fn test_failed_transaction_leaves_ledger_unchanged() {
        let mut ledger = Ledger::with_balances([(ALICE, 100)]);
        let before = ledger.compute_hash();

        let result: EscrowResult<((), Receipt)> = ledger.execute(|tx| {
            tx.debit(&ALICE, 40)?;
            tx.credit(&BOB, 40)?;
            tx.debit(&ALICE, 100)?;
            Ok(())
        });

        assert!(matches!(result, Err(EscrowError::InsufficientFunds { needed: 100, available: 60 })));
        assert_eq!(ledger.balance(&ALICE), 100);
        assert_eq!(ledger.balance(&BOB), 0);
        assert_eq!(ledger.compute_hash(), before);
        assert!(ledger.journal().is_empty());
    }

    #[test]
    fn test_committed_transfer() {
        let mut ledger = Ledger::with_balances([(ALICE, 100)]);
        let ((), receipt) = ledger
            .execute(|tx| {
                tx.debit(&ALICE, 40)?;
                tx.credit(&BOB, 40)
            })
            .unwrap();

        assert_eq!(receipt.sequence, 1);
        assert_eq!(receipt.state_hash, ledger.compute_hash());
        assert_eq!(ledger.balance(&ALICE), 60);
        assert_eq!(ledger.balance(&BOB), 40);
        assert_eq!(ledger.total_lamports(), 100);
    }

    #[test]
    fn test_reads_see_staged_writes() {
        let mut ledger = Ledger::with_balances([(ALICE, 10)]);
        ledger
            .execute(|tx| {
                tx.debit(&ALICE, 3)?;
                assert_eq!(tx.balance(&ALICE), 7);
                tx.credit(&ALICE, 3)
            })
            .unwrap();
        assert_eq!(ledger.balance(&ALICE), 10);
    }

    #[test]
    fn test_minting_rejected_at_commit() {
        let mut ledger = Ledger::new();
        let result = ledger.execute(|tx| tx.credit(&ALICE, 5));
        assert!(matches!(result, Err(EscrowError::InvariantViolation(_))));
        assert_eq!(ledger.balance(&ALICE), 0);
    }

    #[test]
    fn test_record_without_vault_rejected() {
        let mut ledger = Ledger::new();
        let addr = address::match_address(1, "x", &ALICE);
        let record = MatchRecord {
            seed: 1,
            code: "x".into(),
            player_a: ALICE,
            player_b: None,
            bet_amount: 0,
            match_duration: 1,
            created_at: 0,
            status: crate::escrow::state::MatchStatus::Waiting,
            vault: address::vault_address(&addr),
            rent: 0,
        };

        let result = ledger.execute(|tx| {
            tx.put_match(addr, record.clone());
            Ok(())
        });
        assert!(matches!(result, Err(EscrowError::InvariantViolation(_))));
        assert!(ledger.match_record(&addr).is_none());
    }

    #[test]
    fn test_state_hash_tracks_balances() {
        let a = Ledger::with_balances([(ALICE, 1)]);
        let b = Ledger::with_balances([(ALICE, 2)]);
        assert_ne!(a.compute_hash(), b.compute_hash());
        assert_eq!(a.compute_hash(), Ledger::with_balances([(ALICE, 1)]).compute_hash());
    }
}
