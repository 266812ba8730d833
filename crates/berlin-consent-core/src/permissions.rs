// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Account-permission builder.
//!
//! The PSU's account selection on the SCA page arrives as three lists
//! (accounts, balances, transactions).  [`AccountPermissions`] folds them into
//! one account → permission-set map that [`ConsentStore::bind_account_mappings`]
//! turns into mapping rows.  The builder is a plain value: each step consumes
//! it and hands back the extended map.
//!
//! [`ConsentStore::bind_account_mappings`]: crate::storage::ConsentStore::bind_account_mappings

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::ConsentError;
use crate::types::{AccountReference, Permission};

/// Permissions selected per account.
///
/// Granting `balances` or `transactions` on an account also grants
/// `accounts` on it, since neither is reachable without listing the account.
///
/// # Examples
///
/// ```rust
/// use berlin_consent_core::permissions::AccountPermissions;
/// use berlin_consent_core::types::Permission;
///
/// let permissions = AccountPermissions::new()
///     .grant("iban:DE02:EUR".parse().unwrap(), Permission::Balances);
///
/// let granted: Vec<_> = permissions.iter().map(|(_, p)| p).collect();
/// assert_eq!(granted, vec![Permission::Accounts, Permission::Balances]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountPermissions(BTreeMap<AccountReference, BTreeSet<Permission>>);

impl AccountPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one permission on one account.
    pub fn grant(mut self, account: AccountReference, permission: Permission) -> Self {
        let entry = self.0.entry(account).or_default();
        if matches!(permission, Permission::Balances | Permission::Transactions) {
            entry.insert(Permission::Accounts);
        }
        entry.insert(permission);
        self
    }

    /// Add the same permission on every account in `accounts`.
    pub fn grant_all<I>(self, accounts: I, permission: Permission) -> Self
    where
        I: IntoIterator<Item = AccountReference>,
    {
        accounts
            .into_iter()
            .fold(self, |builder, account| builder.grant(account, permission))
    }

    /// Permissions for a payment consent: the debtor account with
    /// [`Permission::Default`].
    pub fn for_debtor(account: AccountReference) -> Self {
        Self::new().grant(account, Permission::Default)
    }

    /// Build from the raw `type:number[:currency]` strings of the three
    /// access lists.
    ///
    /// # Errors
    ///
    /// [`ConsentError::InvalidAccountReference`] for the first malformed
    /// reference.
    pub fn from_access(
        accounts: &[&str],
        balances: &[&str],
        transactions: &[&str],
    ) -> Result<Self, ConsentError> {
        let parse = |raw: &[&str]| -> Result<Vec<AccountReference>, ConsentError> {
            raw.iter().map(|reference| reference.parse()).collect()
        };
        Ok(Self::new()
            .grant_all(parse(accounts)?, Permission::Accounts)
            .grant_all(parse(balances)?, Permission::Balances)
            .grant_all(parse(transactions)?, Permission::Transactions))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of (account, permission) pairs, i.e. the mapping rows a bind
    /// will create.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    pub fn accounts(&self) -> impl Iterator<Item = &AccountReference> {
        self.0.keys()
    }

    /// Every (account, permission) pair in account order.
    pub fn iter(&self) -> impl Iterator<Item = (&AccountReference, Permission)> {
        self.0
            .iter()
            .flat_map(|(account, permissions)| permissions.iter().map(move |p| (account, *p)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(raw: &str) -> AccountReference {
        raw.parse().unwrap()
    }

    #[test]
    fn transactions_imply_accounts() {
        let permissions = AccountPermissions::from_access(&[], &[], &["iban:A"]).unwrap();
        let pairs: Vec<_> = permissions.iter().map(|(a, p)| (a.to_string(), p)).collect();
        assert_eq!(
            pairs,
            vec![
                ("iban:A".to_string(), Permission::Accounts),
                ("iban:A".to_string(), Permission::Transactions),
            ]
        );
    }

    #[test]
    fn overlapping_lists_merge_per_account() {
        let permissions =
            AccountPermissions::from_access(&["iban:A", "iban:B"], &["iban:A"], &["iban:A"])
                .unwrap();
        assert_eq!(permissions.accounts().count(), 2);
        assert_eq!(permissions.len(), 4);
    }

    #[test]
    fn debtor_account_uses_default_permission() {
        let permissions = AccountPermissions::for_debtor(account("iban:DE02:EUR"));
        assert_eq!(permissions.len(), 1);
        assert_eq!(permissions.iter().next().map(|(_, p)| p), Some(Permission::Default));
    }

    #[test]
    fn malformed_reference_is_rejected() {
        let err = AccountPermissions::from_access(&["not-a-reference"], &[], &[]).unwrap_err();
        assert!(matches!(err, ConsentError::InvalidAccountReference(_)));
    }
}
