//! Wallet collaborator rows: balances, changes, withdraw accounts and
//! withdrawals.
//!
//! Withdrawal creation is the one multi-row transaction in here: the wallet
//! row is reloaded inside the write transaction, the amount validated, the
//! withdraw row created, the balance decremented in-store, and the wallet
//! change inserted; all of it commits or none of it does.

use redb::ReadableTable;

use crate::models::{now_ts, Wallet, WalletChange, Withdraw, WithdrawAccount};

use super::db::{
    bump_seq, from_bytes, to_bytes, Store, StoreError, StoreResult, META, WALLETS, WALLET_CHANGES,
    WITHDRAWS, WITHDRAW_ACCOUNTS,
};

impl Store {
    /// Wallet row for a user, zero-balance default when absent.
    pub fn wallet(&self, user_id: u64) -> StoreResult<Wallet> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WALLETS)?;
        match table.get(user_id)? {
            Some(raw) => from_bytes(raw.value()),
            None => Ok(Wallet {
                user_id,
                balance: 0,
                total_income: 0,
            }),
        }
    }

    pub fn save_wallet(&self, wallet: &Wallet) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(WALLETS)?;
            table.insert(wallet.user_id, to_bytes(wallet)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Newest-first page of wallet changes with the pre-limit total.
    pub fn wallet_changes(
        &self,
        user_id: u64,
        offset: usize,
        limit: usize,
    ) -> StoreResult<(Vec<WalletChange>, usize)> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WALLET_CHANGES)?;
        let mut all = Vec::new();
        for entry in table.iter()? {
            let (_, raw) = entry?;
            let change: WalletChange = from_bytes(raw.value())?;
            if change.user_id == user_id {
                all.push(change);
            }
        }
        all.sort_by_key(|c| std::cmp::Reverse((c.created_at, c.id)));
        let total = all.len();
        let page = all.into_iter().skip(offset).take(limit).collect();
        Ok((page, total))
    }

    pub fn withdraw_accounts(&self, user_id: u64) -> StoreResult<Vec<WithdrawAccount>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WITHDRAW_ACCOUNTS)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (_, raw) = entry?;
            let account: WithdrawAccount = from_bytes(raw.value())?;
            if account.user_id == user_id {
                out.push(account);
            }
        }
        Ok(out)
    }

    pub fn create_withdraw_account(
        &self,
        user_id: u64,
        account_type: &str,
        account_no: &str,
        holder_name: &str,
    ) -> StoreResult<WithdrawAccount> {
        let write_txn = self.db.begin_write()?;
        let account = {
            let mut meta = write_txn.open_table(META)?;
            let id = bump_seq(&mut meta, "seq:withdraw_accounts")?;
            let account = WithdrawAccount {
                id,
                user_id,
                account_type: account_type.to_string(),
                account_no: account_no.to_string(),
                holder_name: holder_name.to_string(),
                created_at: now_ts(),
            };
            let mut table = write_txn.open_table(WITHDRAW_ACCOUNTS)?;
            table.insert(id, to_bytes(&account)?.as_slice())?;
            account
        };
        write_txn.commit()?;
        Ok(account)
    }

    pub fn withdraws(&self, user_id: u64) -> StoreResult<Vec<Withdraw>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WITHDRAWS)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (_, raw) = entry?;
            let withdraw: Withdraw = from_bytes(raw.value())?;
            if withdraw.user_id == user_id {
                out.push(withdraw);
            }
        }
        out.sort_by_key(|w| std::cmp::Reverse((w.created_at, w.id)));
        Ok(out)
    }

    /// Create a withdrawal atomically.
    pub fn create_withdraw(
        &self,
        user_id: u64,
        account_id: u64,
        amount: i64,
    ) -> StoreResult<Withdraw> {
        if amount <= 0 {
            return Err(StoreError::Conflict("amount must be positive".into()));
        }

        let write_txn = self.db.begin_write()?;
        let withdraw = {
            let accounts = write_txn.open_table(WITHDRAW_ACCOUNTS)?;
            let owns_account = match accounts.get(account_id)? {
                Some(raw) => from_bytes::<WithdrawAccount>(raw.value())?.user_id == user_id,
                None => false,
            };
            if !owns_account {
                return Err(StoreError::NotFound(format!(
                    "withdraw account {account_id}"
                )));
            }

            // Reload the wallet inside the transaction.
            let mut wallets = write_txn.open_table(WALLETS)?;
            let mut wallet: Wallet = match wallets.get(user_id)? {
                Some(raw) => from_bytes(raw.value())?,
                None => Wallet {
                    user_id,
                    balance: 0,
                    total_income: 0,
                },
            };
            if wallet.balance < amount {
                return Err(StoreError::Conflict("insufficient balance".into()));
            }

            let mut meta = write_txn.open_table(META)?;
            let id = bump_seq(&mut meta, "seq:withdraws")?;
            let now = now_ts();
            let withdraw = Withdraw {
                id,
                user_id,
                account_id,
                amount,
                status: "pending".to_string(),
                created_at: now,
            };
            let mut withdraws = write_txn.open_table(WITHDRAWS)?;
            withdraws.insert(id, to_bytes(&withdraw)?.as_slice())?;

            wallet.balance -= amount;
            wallets.insert(user_id, to_bytes(&wallet)?.as_slice())?;

            let change_id = bump_seq(&mut meta, "seq:wallet_changes")?;
            let change = WalletChange {
                id: change_id,
                user_id,
                amount: -amount,
                balance_after: wallet.balance,
                kind: "withdraw".to_string(),
                remark: Some(format!("withdraw #{id}")),
                created_at: now,
            };
            let mut changes = write_txn.open_table(WALLET_CHANGES)?;
            changes.insert(change_id, to_bytes(&change)?.as_slice())?;
            withdraw
        };
        write_txn.commit()?;
        Ok(withdraw)
    }

    /// Credit a wallet and record the change (used by invite/commission
    /// flows upstream; exercised here by tests and the withdraw flow).
    pub fn credit_wallet(&self, user_id: u64, amount: i64, kind: &str) -> StoreResult<Wallet> {
        let write_txn = self.db.begin_write()?;
        let wallet = {
            let mut wallets = write_txn.open_table(WALLETS)?;
            let mut wallet: Wallet = match wallets.get(user_id)? {
                Some(raw) => from_bytes(raw.value())?,
                None => Wallet {
                    user_id,
                    balance: 0,
                    total_income: 0,
                },
            };
            wallet.balance += amount;
            wallet.total_income += amount.max(0);
            wallets.insert(user_id, to_bytes(&wallet)?.as_slice())?;

            let mut meta = write_txn.open_table(META)?;
            let change_id = bump_seq(&mut meta, "seq:wallet_changes")?;
            let change = WalletChange {
                id: change_id,
                user_id,
                amount,
                balance_after: wallet.balance,
                kind: kind.to_string(),
                remark: None,
                created_at: now_ts(),
            };
            let mut changes = write_txn.open_table(WALLET_CHANGES)?;
            changes.insert(change_id, to_bytes(&change)?.as_slice())?;
            wallet
        };
        write_txn.commit()?;
        Ok(wallet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_store;

    #[test]
    fn withdraw_happy_path_moves_balance() {
        let (store, _dir) = open_store();
        store.credit_wallet(1, 10_000, "commission").unwrap();
        let account = store
            .create_withdraw_account(1, "bank", "62220000", "A. User")
            .unwrap();

        let withdraw = store.create_withdraw(1, account.id, 4_000).unwrap();
        assert_eq!(withdraw.amount, 4_000);
        assert_eq!(store.wallet(1).unwrap().balance, 6_000);

        let (changes, total) = store.wallet_changes(1, 0, 10).unwrap();
        assert_eq!(total, 2);
        assert_eq!(changes[0].amount, -4_000);
        assert_eq!(changes[0].balance_after, 6_000);
    }

    #[test]
    fn withdraw_rejects_overdraft_without_side_effects() {
        let (store, _dir) = open_store();
        store.credit_wallet(1, 100, "commission").unwrap();
        let account = store
            .create_withdraw_account(1, "bank", "62220000", "A. User")
            .unwrap();

        let err = store.create_withdraw(1, account.id, 4_000).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.wallet(1).unwrap().balance, 100);
        assert!(store.withdraws(1).unwrap().is_empty());
    }

    #[test]
    fn withdraw_requires_owned_account() {
        let (store, _dir) = open_store();
        store.credit_wallet(1, 10_000, "commission").unwrap();
        let foreign = store
            .create_withdraw_account(2, "bank", "62220000", "B. User")
            .unwrap();

        let err = store.create_withdraw(1, foreign.id, 100).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn changes_page_newest_first() {
        let (store, _dir) = open_store();
        for _ in 0..3 {
            store.credit_wallet(1, 10, "commission").unwrap();
        }
        let (page, total) = store.wallet_changes(1, 0, 2).unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert!(page[0].id > page[1].id);
    }
}
