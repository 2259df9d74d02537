//! The replicated state machine the agreement protocol orders
//! requests for: a minimal account ledger, executed in commit order by
//! every replica, whose content is what `bft::gc`'s stable-checkpoint
//! protocol actually needs to agree on.
//!
//! Grounded on `original_source/core/account.go`: accounts are keyed
//! by name, created lazily on first reference with the same starting
//! balance, and moved between by a plain withdraw/deposit pair per
//! transaction.

use crate::bft::collections::{self, HashMap};
use crate::bft::crypto::hash::{Context, Digest};
use crate::bft::dataset::Transaction;

/// A single account's balance.
#[derive(Debug, Clone, Copy)]
struct Account {
    balance: i64,
}

impl Account {
    /// Matches `original_source/core/account.go`'s `NewAccount`.
    const STARTING_BALANCE: i64 = 999_999_999;

    fn new() -> Self {
        Account { balance: Self::STARTING_BALANCE }
    }

    fn deposit(&mut self, amount: i64) {
        self.balance += amount;
    }

    fn withdraw(&mut self, amount: i64) {
        self.balance -= amount;
    }
}

/// The account ledger every replica executes committed batches
/// against, in commit order. Two correct replicas that have committed
/// the same sequence of batches always compute the same
/// `state_digest`, which is what makes it usable as the checkpoint
/// protocol's state fingerprint (§4.3): a single request's digest
/// binds that request to its agreement instance, but says nothing
/// about the cumulative state two replicas are claiming to agree on.
pub struct Service {
    accounts: HashMap<String, Account>,
}

impl Service {
    pub fn new() -> Self {
        Service { accounts: collections::hash_map() }
    }

    /// Applies one committed batch: each transaction withdraws from
    /// its sender and deposits into its receiver, lazily creating
    /// either account on first reference.
    pub fn execute(&mut self, txs: &[Transaction]) {
        for tx in txs {
            self.accounts
                .entry(tx.sender.clone())
                .or_insert_with(Account::new)
                .withdraw(tx.amount);
            self.accounts
                .entry(tx.receiver.clone())
                .or_insert_with(Account::new)
                .deposit(tx.amount);
        }
    }

    /// The current balance of a named account, or `None` if it has
    /// never been referenced by any executed transaction.
    pub fn balance_of(&self, account: &str) -> Option<i64> {
        self.accounts.get(account).map(|a| a.balance)
    }

    /// A deterministic fingerprint of the whole ledger. Account names
    /// are sorted before hashing so the underlying hash map's
    /// iteration order never affects the result.
    pub fn state_digest(&self) -> Digest {
        let mut entries: Vec<(&str, i64)> =
            self.accounts.iter().map(|(name, account)| (name.as_str(), account.balance)).collect();
        entries.sort_unstable_by_key(|(name, _)| *name);

        let mut ctx = Context::new();
        for (name, balance) in entries {
            ctx.update(name.as_bytes());
            ctx.update(&balance.to_be_bytes());
        }
        ctx.finish()
    }
}

impl Default for Service {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executing_a_transaction_moves_balance_between_accounts() {
        let mut service = Service::new();
        service.execute(&[Transaction::new("alice", "bob", 100)]);
        assert_eq!(service.balance_of("alice"), Some(Account::STARTING_BALANCE - 100));
        assert_eq!(service.balance_of("bob"), Some(Account::STARTING_BALANCE + 100));
    }

    #[test]
    fn unreferenced_accounts_have_no_balance() {
        let service = Service::new();
        assert_eq!(service.balance_of("nobody"), None);
    }

    #[test]
    fn same_final_state_hashes_identically_regardless_of_map_iteration_order() {
        let mut a = Service::new();
        a.execute(&[Transaction::new("alice", "bob", 10)]);
        a.execute(&[Transaction::new("carol", "dave", 5)]);

        let mut b = Service::new();
        b.execute(&[Transaction::new("carol", "dave", 5)]);
        b.execute(&[Transaction::new("alice", "bob", 10)]);

        assert_eq!(a.state_digest(), b.state_digest());
    }

    #[test]
    fn different_committed_history_yields_a_different_digest() {
        let mut a = Service::new();
        a.execute(&[Transaction::new("alice", "bob", 10)]);
        let mut b = Service::new();
        b.execute(&[Transaction::new("alice", "bob", 20)]);
        assert_ne!(a.state_digest(), b.state_digest());
    }
}
