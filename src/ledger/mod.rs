use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub type AccountId = String;
pub type TopicName = String;
pub type Amount = u64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient funds in account {account}: needed {needed}, available {available}")]
    InsufficientAccountFunds {
        account: AccountId,
        needed: Amount,
        available: Amount,
    },
    #[error("insufficient locked funds in account {account}")]
    InsufficientLockedFunds { account: AccountId },
    #[error("unknown account {account}")]
    UnknownAccount { account: AccountId },
    #[error("balance overflow crediting account {account}")]
    BalanceOverflow { account: AccountId },
}

/// External funds of one identity. `locked` is the sum of its escrow deposits.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccountBalance {
    pub available: Amount,
    pub locked: Amount,
}

impl AccountBalance {
    pub fn total(&self) -> Amount {
        self.available + self.locked
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Minted {
        to: AccountId,
        amount: Amount,
    },
    DepositLocked {
        account: AccountId,
        topic: TopicName,
        amount: Amount,
    },
    FeeSettled {
        from: AccountId,
        to: AccountId,
        topic: TopicName,
        amount: Amount,
    },
    Refunded {
        account: AccountId,
        topic: TopicName,
        amount: Amount,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JournalEntry {
    pub height: u64,
    #[serde(flatten)]
    pub event: LedgerEvent,
}

/// External accounts and the journal of every fund movement applied to them.
///
/// `supply` bounds every individual balance, so once minting has been
/// checked, transfers between accounts cannot overflow.
#[derive(Clone, Debug, Default)]
pub struct FundsLedger {
    accounts: BTreeMap<AccountId, AccountBalance>,
    journal: Vec<JournalEntry>,
    supply: Amount,
    height: u64,
}

impl FundsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn supply(&self) -> Amount {
        self.supply
    }

    /// Close the current call: entries recorded from now on belong to the next height.
    pub fn commit(&mut self) -> u64 {
        self.height += 1;
        self.height
    }

    pub fn account(&self, account: &str) -> AccountBalance {
        self.accounts.get(account).copied().unwrap_or_default()
    }

    pub fn accounts(&self) -> &BTreeMap<AccountId, AccountBalance> {
        &self.accounts
    }

    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    /// Bring new funds into existence (genesis allocations, top-ups).
    pub fn mint(&mut self, account: &AccountId, amount: Amount) -> Result<(), LedgerError> {
        let supply = self
            .supply
            .checked_add(amount)
            .ok_or_else(|| LedgerError::BalanceOverflow {
                account: account.clone(),
            })?;
        self.credit_account(account, amount)?;
        self.supply = supply;
        self.record(LedgerEvent::Minted {
            to: account.clone(),
            amount,
        });
        Ok(())
    }

    pub fn credit_account(
        &mut self,
        account: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let balance = self.accounts.entry(account.clone()).or_default();
        balance.available = balance.available.checked_add(amount).ok_or_else(|| {
            LedgerError::BalanceOverflow {
                account: account.clone(),
            }
        })?;
        Ok(())
    }

    pub fn debit_account(
        &mut self,
        account: &AccountId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        let balance = self
            .accounts
            .get_mut(account)
            .ok_or_else(|| LedgerError::UnknownAccount {
                account: account.clone(),
            })?;
        if balance.available < amount {
            return Err(LedgerError::InsufficientAccountFunds {
                account: account.clone(),
                needed: amount,
                available: balance.available,
            });
        }
        balance.available -= amount;
        Ok(())
    }

    /// Move `amount` of the account's available funds into its locked funds.
    pub fn lock(
        &mut self,
        account: &AccountId,
        topic: &str,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.debit_account(account, amount)?;
        // debit succeeded, so the entry exists
        if let Some(balance) = self.accounts.get_mut(account) {
            balance.locked += amount;
        }
        self.record(LedgerEvent::DepositLocked {
            account: account.clone(),
            topic: topic.to_string(),
            amount,
        });
        Ok(())
    }

    /// Pay `amount` out of `from`'s locked funds into `to`'s available funds.
    pub fn settle(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        topic: &str,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.take_locked(from, amount)?;
        self.credit_account(to, amount)?;
        if amount > 0 {
            self.record(LedgerEvent::FeeSettled {
                from: from.clone(),
                to: to.clone(),
                topic: topic.to_string(),
                amount,
            });
        }
        Ok(())
    }

    /// Return `amount` of the account's locked funds to its available funds.
    pub fn release(
        &mut self,
        account: &AccountId,
        topic: &str,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        self.take_locked(account, amount)?;
        self.credit_account(account, amount)?;
        self.record(LedgerEvent::Refunded {
            account: account.clone(),
            topic: topic.to_string(),
            amount,
        });
        Ok(())
    }

    fn take_locked(&mut self, account: &AccountId, amount: Amount) -> Result<(), LedgerError> {
        let balance = self
            .accounts
            .get_mut(account)
            .ok_or_else(|| LedgerError::UnknownAccount {
                account: account.clone(),
            })?;
        if balance.locked < amount {
            return Err(LedgerError::InsufficientLockedFunds {
                account: account.clone(),
            });
        }
        balance.locked -= amount;
        Ok(())
    }

    fn record(&mut self, event: LedgerEvent) {
        self.journal.push(JournalEntry {
            height: self.height + 1,
            event,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_settle_release_conserve_supply() {
        let mut ledger = FundsLedger::new();
        let sub = "subscriber".to_string();
        let publisher = "publisher".to_string();
        ledger.mint(&sub, 1_000).unwrap();
        ledger.mint(&publisher, 10).unwrap();

        ledger.lock(&sub, "news", 600).unwrap();
        assert_eq!(
            ledger.account(&sub),
            AccountBalance {
                available: 400,
                locked: 600
            }
        );

        ledger.settle(&sub, &publisher, "news", 50).unwrap();
        ledger.release(&sub, "news", 550).unwrap();

        assert_eq!(ledger.account(&sub).available, 950);
        assert_eq!(ledger.account(&sub).locked, 0);
        assert_eq!(ledger.account(&publisher).available, 60);
        let total: Amount = ledger.accounts().values().map(|b| b.total()).sum();
        assert_eq!(total, ledger.supply());
        assert_eq!(ledger.journal().len(), 5);
    }

    #[test]
    fn lock_beyond_available_changes_nothing() {
        let mut ledger = FundsLedger::new();
        let sub = "subscriber".to_string();
        ledger.mint(&sub, 100).unwrap();
        let err = ledger.lock(&sub, "news", 101).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientAccountFunds {
                account: sub.clone(),
                needed: 101,
                available: 100,
            }
        );
        assert_eq!(ledger.account(&sub).available, 100);
        assert_eq!(ledger.account(&sub).locked, 0);
        assert_eq!(ledger.journal().len(), 1);
    }

    #[test]
    fn unknown_account_cannot_lock() {
        let mut ledger = FundsLedger::new();
        let err = ledger.lock(&"ghost".to_string(), "news", 1).unwrap_err();
        assert!(matches!(err, LedgerError::UnknownAccount { .. }));
    }

    #[test]
    fn mint_rejects_supply_overflow() {
        let mut ledger = FundsLedger::new();
        ledger.mint(&"a".to_string(), Amount::MAX).unwrap();
        let err = ledger.mint(&"b".to_string(), 1).unwrap_err();
        assert!(matches!(err, LedgerError::BalanceOverflow { .. }));
        assert_eq!(ledger.account("b"), AccountBalance::default());
    }

    #[test]
    fn zero_fee_settlement_is_not_journaled() {
        let mut ledger = FundsLedger::new();
        let sub = "s".to_string();
        ledger.mint(&sub, 10).unwrap();
        ledger.lock(&sub, "t", 10).unwrap();
        ledger.settle(&sub, &"p".to_string(), "t", 0).unwrap();
        assert_eq!(ledger.journal().len(), 2);
    }

    #[test]
    fn journal_entries_carry_the_pending_height() {
        let mut ledger = FundsLedger::new();
        ledger.mint(&"a".to_string(), 5).unwrap();
        assert_eq!(ledger.commit(), 1);
        ledger.lock(&"a".to_string(), "t", 5).unwrap();
        let heights: Vec<u64> = ledger.journal().iter().map(|e| e.height).collect();
        assert_eq!(heights, vec![1, 2]);
    }
}
