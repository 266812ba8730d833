// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Shared data types used across the consent lifecycle engine.
//!
//! All entity types implement [`Clone`], [`Debug`], [`serde::Serialize`], and
//! [`serde::Deserialize`] so they can be persisted by any [`ConsentStore`]
//! backend and passed through request handlers as JSON without additional
//! conversion steps.
//!
//! [`ConsentStore`]: crate::storage::ConsentStore

use std::fmt;
use std::str::FromStr;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::error::ConsentError;

// ---------------------------------------------------------------------------
// Consent type
// ---------------------------------------------------------------------------

/// The Berlin Group service a consent was created for.
///
/// # Examples
///
/// ```rust
/// use berlin_consent_core::types::ConsentType;
///
/// assert!(ConsentType::BulkPayments.is_payment());
/// assert_eq!(ConsentType::FundsConfirmation.as_str(), "funds-confirmation");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsentType {
    /// Account information access (AIS).
    Accounts,
    /// Single payment initiation (PIS).
    Payments,
    /// Bulk payment initiation.
    BulkPayments,
    /// Standing order / periodic payment initiation.
    PeriodicPayments,
    /// Confirmation of funds (PIIS).
    FundsConfirmation,
}

impl ConsentType {
    /// Wire name of the consent type.
    pub fn as_str(self) -> &'static str {
        match self {
            ConsentType::Accounts          => "accounts",
            ConsentType::Payments          => "payments",
            ConsentType::BulkPayments      => "bulk-payments",
            ConsentType::PeriodicPayments  => "periodic-payments",
            ConsentType::FundsConfirmation => "funds-confirmation",
        }
    }

    /// Whether this consent's status is tracked with [`TransactionStatus`]
    /// codes rather than [`ConsentStatus`] values.
    pub fn is_payment(self) -> bool {
        matches!(
            self,
            ConsentType::Payments | ConsentType::BulkPayments | ConsentType::PeriodicPayments
        )
    }

    /// Status every freshly created consent of this type starts in.
    pub fn initial_status(self) -> Status {
        if self.is_payment() {
            Status::Transaction(TransactionStatus::Rcvd)
        } else {
            Status::Consent(ConsentStatus::Received)
        }
    }
}

impl fmt::Display for ConsentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Lifecycle status of account and funds-confirmation consents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConsentStatus {
    Received,
    Rejected,
    PartiallyAuthorised,
    Valid,
    RevokedByPsu,
    Expired,
    TerminatedByTpp,
}

impl ConsentStatus {
    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            ConsentStatus::Received            => "received",
            ConsentStatus::Rejected            => "rejected",
            ConsentStatus::PartiallyAuthorised => "partiallyAuthorised",
            ConsentStatus::Valid               => "valid",
            ConsentStatus::RevokedByPsu        => "revokedByPsu",
            ConsentStatus::Expired             => "expired",
            ConsentStatus::TerminatedByTpp     => "terminatedByTpp",
        }
    }
}

impl fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ISO 20022 transaction status codes used for payment consents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    /// Accepted customer profile.
    Accp,
    /// Accepted, settlement completed.
    Acsc,
    /// Accepted, settlement in process.
    Acsp,
    /// Accepted technical validation.
    Actc,
    /// Accepted with change.
    Acwc,
    /// Accepted without posting.
    Acwp,
    /// Received.
    Rcvd,
    /// Pending.
    Pdng,
    /// Rejected.
    Rjct,
    /// Revoked by the PSU.
    Revoked,
    /// Cancelled.
    Canc,
    /// Partially accepted technical correct (multi-level SCA outstanding).
    Patc,
}

impl TransactionStatus {
    /// Four-letter wire code of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Accp    => "ACCP",
            TransactionStatus::Acsc    => "ACSC",
            TransactionStatus::Acsp    => "ACSP",
            TransactionStatus::Actc    => "ACTC",
            TransactionStatus::Acwc    => "ACWC",
            TransactionStatus::Acwp    => "ACWP",
            TransactionStatus::Rcvd    => "RCVD",
            TransactionStatus::Pdng    => "PDNG",
            TransactionStatus::Rjct    => "RJCT",
            TransactionStatus::Revoked => "REVOKED",
            TransactionStatus::Canc    => "CANC",
            TransactionStatus::Patc    => "PATC",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The current status of a consent of any type.
///
/// Account and funds-confirmation consents carry a [`ConsentStatus`];
/// payment consents carry a [`TransactionStatus`].  The two families never
/// transition into each other.
///
/// Serialised untagged so the stored value is the bare wire name
/// (`"valid"`, `"ACTC"`).
///
/// # Examples
///
/// ```rust
/// use berlin_consent_core::types::{ConsentStatus, Status};
///
/// let status: Status = serde_json::from_str("\"partiallyAuthorised\"").unwrap();
/// assert_eq!(status, Status::Consent(ConsentStatus::PartiallyAuthorised));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Status {
    Consent(ConsentStatus),
    Transaction(TransactionStatus),
}

impl Status {
    /// Wire name of the wrapped status.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Consent(status)     => status.as_str(),
            Status::Transaction(status) => status.as_str(),
        }
    }
}

impl From<ConsentStatus> for Status {
    fn from(status: ConsentStatus) -> Self {
        Status::Consent(status)
    }
}

impl From<TransactionStatus> for Status {
    fn from(status: TransactionStatus) -> Self {
        Status::Transaction(status)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SCA status of a single authorisation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScaStatus {
    Received,
    PsuIdentified,
    PsuAuthenticated,
    ScaMethodSelected,
    Started,
    Unconfirmed,
    Finalised,
    Failed,
    Exempted,
}

impl ScaStatus {
    /// Wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            ScaStatus::Received          => "received",
            ScaStatus::PsuIdentified     => "psuIdentified",
            ScaStatus::PsuAuthenticated  => "psuAuthenticated",
            ScaStatus::ScaMethodSelected => "scaMethodSelected",
            ScaStatus::Started           => "started",
            ScaStatus::Unconfirmed       => "unconfirmed",
            ScaStatus::Finalised         => "finalised",
            ScaStatus::Failed            => "failed",
            ScaStatus::Exempted          => "exempted",
        }
    }

    /// Whether a PSU outcome has already been recorded on the authorisation.
    pub fn is_decided(self) -> bool {
        matches!(self, ScaStatus::Finalised | ScaStatus::Failed)
    }
}

impl fmt::Display for ScaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Authorisation
// ---------------------------------------------------------------------------

/// Distinguishes origination authorisations from payment cancellation
/// authorisations.  The two kinds are never aggregated together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorisationType {
    Authorisation,
    Cancellation,
}

impl AuthorisationType {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthorisationType::Authorisation => "authorisation",
            AuthorisationType::Cancellation  => "cancellation",
        }
    }
}

impl fmt::Display for AuthorisationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The PSU's verdict at the end of one SCA flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Approved,
    Denied,
}

impl Outcome {
    /// SCA status written to the authorisation for this outcome.
    pub fn sca_status(self) -> ScaStatus {
        match self {
            Outcome::Approved => ScaStatus::Finalised,
            Outcome::Denied   => ScaStatus::Failed,
        }
    }
}

/// One SCA attempt by one PSU against a consent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorisation {
    pub id: String,
    pub consent_id: String,
    pub auth_type: AuthorisationType,
    /// Bound once the PSU has identified themselves.
    pub user_id: Option<String>,
    pub status: ScaStatus,
    pub created_ms: u64,
    pub updated_ms: u64,
}

/// Aggregate verdict over all authorisations of one type on a consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateStatus {
    Rejected,
    FullyAuthorised,
    PartiallyAuthorised,
    /// No decisive outcome yet; multi-level SCA is still outstanding.
    Pending,
}

impl fmt::Display for AggregateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateStatus::Rejected            => "REJECTED",
            AggregateStatus::FullyAuthorised     => "FULLY_AUTHORISED",
            AggregateStatus::PartiallyAuthorised => "PARTIALLY_AUTHORISED",
            AggregateStatus::Pending             => "PENDING",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Access scope granted on a bound account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Accounts,
    Balances,
    Transactions,
    /// Used for payment consents, which bind the debtor account without an
    /// access method.
    Default,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Accounts     => "accounts",
            Permission::Balances     => "balances",
            Permission::Transactions => "transactions",
            Permission::Default      => "default",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An account reference in `type:number[:currency]` form, e.g.
/// `iban:DE89370400440532013000:EUR`.
///
/// # Examples
///
/// ```rust
/// use berlin_consent_core::types::AccountReference;
///
/// let account: AccountReference = "iban:DE89370400440532013000:EUR".parse().unwrap();
/// assert_eq!(account.kind, "iban");
/// assert_eq!(account.currency.as_deref(), Some("EUR"));
/// assert_eq!(account.to_string(), "iban:DE89370400440532013000:EUR");
///
/// assert!("DE89370400440532013000".parse::<AccountReference>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountReference {
    /// Reference scheme: `iban`, `bban`, `pan`, `maskedPan` or `msisdn`.
    pub kind: String,
    pub number: String,
    pub currency: Option<String>,
}

impl AccountReference {
    pub fn new(kind: impl Into<String>, number: impl Into<String>, currency: Option<&str>) -> Self {
        Self {
            kind: kind.into(),
            number: number.into(),
            currency: currency.map(str::to_owned),
        }
    }
}

impl FromStr for AccountReference {
    type Err = ConsentError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || ConsentError::InvalidAccountReference(raw.to_owned());
        let mut parts = raw.split(':').map(str::trim);
        let kind = parts.next().filter(|part| !part.is_empty()).ok_or_else(invalid)?;
        let number = parts.next().filter(|part| !part.is_empty()).ok_or_else(invalid)?;
        let currency = match parts.next() {
            Some(part) if part.is_empty() => return Err(invalid()),
            other => other,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self::new(kind, number, currency))
    }
}

impl TryFrom<String> for AccountReference {
    type Error = ConsentError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

impl From<AccountReference> for String {
    fn from(reference: AccountReference) -> Self {
        reference.to_string()
    }
}

impl fmt::Display for AccountReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.number)?;
        if let Some(currency) = &self.currency {
            write!(f, ":{currency}")?;
        }
        Ok(())
    }
}

/// A (consent, authorisation, account, permission) binding created when an
/// authorisation is approved with selected accounts.
///
/// Mappings are deactivated, never deleted, when the consent is rejected,
/// revoked, expired or superseded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMapping {
    pub id: String,
    pub consent_id: String,
    pub authorisation_id: String,
    pub account: AccountReference,
    pub permission: Permission,
    pub active: bool,
}

// ---------------------------------------------------------------------------
// Consent
// ---------------------------------------------------------------------------

/// A stored grant of access scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consent {
    pub id: String,
    /// The TPP that created the consent.
    pub client_id: String,
    pub consent_type: ConsentType,
    pub status: Status,
    pub created_ms: u64,
    pub updated_ms: u64,
    /// End of the validity period.  Only meaningful for accounts consents.
    pub valid_until_ms: Option<u64>,
    pub recurring_indicator: bool,
    /// Opaque consent receipt as submitted by the TPP.
    pub receipt: serde_json::Value,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// A consent together with every authorisation and account mapping it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedConsent {
    pub consent: Consent,
    pub authorisations: Vec<Authorisation>,
    pub mappings: Vec<AccountMapping>,
}

impl DetailedConsent {
    /// Identifiers of every mapping that is still active.
    pub fn active_mapping_ids(&self) -> Vec<String> {
        self.mappings
            .iter()
            .filter(|mapping| mapping.active)
            .map(|mapping| mapping.id.clone())
            .collect()
    }
}

/// Who ended a consent early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevokedBy {
    /// The customer revoked it, e.g. through the bank's self-care portal.
    Psu,
    /// The TPP deleted it through the consent API.
    Tpp,
}

impl RevokedBy {
    /// Terminal status a revocation moves an accounts consent to.
    pub fn consent_status(self) -> ConsentStatus {
        match self {
            RevokedBy::Psu => ConsentStatus::RevokedByPsu,
            RevokedBy::Tpp => ConsentStatus::TerminatedByTpp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_wire_names() {
        let valid = serde_json::to_string(&Status::Consent(ConsentStatus::Valid)).unwrap();
        assert_eq!(valid, "\"valid\"");

        let actc: Status = serde_json::from_str("\"ACTC\"").unwrap();
        assert_eq!(actc, Status::Transaction(TransactionStatus::Actc));
    }

    #[test]
    fn consent_type_uses_kebab_case() {
        let parsed: ConsentType = serde_json::from_str("\"periodic-payments\"").unwrap();
        assert_eq!(parsed, ConsentType::PeriodicPayments);
        assert_eq!(ConsentType::Accounts.initial_status().as_str(), "received");
        assert_eq!(ConsentType::Payments.initial_status().as_str(), "RCVD");
    }

    #[test]
    fn account_reference_without_currency() {
        let account: AccountReference = "bban:123456".parse().unwrap();
        assert_eq!(account.currency, None);
        assert_eq!(account.to_string(), "bban:123456");
    }

    #[test]
    fn account_reference_rejects_malformed_input() {
        for raw in ["", "iban", "iban:", ":123", "iban:1:EUR:extra", "iban:1:"] {
            assert!(raw.parse::<AccountReference>().is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn account_reference_serialises_as_string() {
        let account = AccountReference::new("iban", "DE02", Some("EUR"));
        let json = serde_json::to_string(&account).unwrap();
        assert_eq!(json, "\"iban:DE02:EUR\"");
        let back: AccountReference = serde_json::from_str(&json).unwrap();
        assert_eq!(back, account);
    }

    #[test]
    fn outcome_maps_to_decisive_sca_status() {
        assert_eq!(Outcome::Approved.sca_status(), ScaStatus::Finalised);
        assert_eq!(Outcome::Denied.sca_status(), ScaStatus::Failed);
        assert!(ScaStatus::Failed.is_decided());
        assert!(!ScaStatus::PsuAuthenticated.is_decided());
    }
}
