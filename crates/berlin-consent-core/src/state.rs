// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Consent and payment status state machines.
//!
//! ```text
//! received ──► partiallyAuthorised ──► valid ──► expired
//!     │                │                 ├────► revokedByPsu
//!     ├────────────────┴──► rejected     └────► terminatedByTpp
//!     └──────────────────────────────► valid
//!
//! RCVD ──► PATC ──► ACTC ──► ACSP ──► ACSC
//!   │        │        └────► CANC
//!   └────────┴──► RJCT
//! ```
//!
//! Re-applying the current status is accepted as a no-op on non-terminal
//! states so repeated `PARTIALLY_AUTHORISED` aggregates are harmless.

use crate::types::{AuthorisationType, ConsentStatus, Status, TransactionStatus};

impl ConsentStatus {
    /// Terminal statuses are absorbing: nothing ever moves a consent out.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConsentStatus::Rejected
                | ConsentStatus::Expired
                | ConsentStatus::RevokedByPsu
                | ConsentStatus::TerminatedByTpp
        )
    }

    /// Whether `self → next` is an edge of the consent state machine.
    pub fn can_transition_to(self, next: ConsentStatus) -> bool {
        use ConsentStatus::*;

        if self.is_terminal() {
            return false;
        }
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Received, PartiallyAuthorised | Valid | Rejected)
                | (PartiallyAuthorised, Valid | Rejected)
                | (Valid, Expired | RevokedByPsu | TerminatedByTpp)
        )
    }
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Rjct
                | TransactionStatus::Acsc
                | TransactionStatus::Canc
                | TransactionStatus::Revoked
        )
    }

    /// Whether `self → next` is an edge of the payment state machine.
    ///
    /// `ACCP` and `PDNG` behave like `ACTC` and `RCVD` respectively; the
    /// remaining accepted-with-* codes can only settle.
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;

        if self.is_terminal() {
            return false;
        }
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Rcvd | Pdng, Actc | Rjct | Patc)
                | (Patc, Actc | Rjct)
                | (Actc | Accp, Acsc | Acsp | Canc)
                | (Acsp | Acwc | Acwp, Acsc)
        )
    }
}

impl Status {
    /// Whether the wrapped status is absorbing.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use berlin_consent_core::types::{ConsentStatus, Status, TransactionStatus};
    ///
    /// assert!(Status::Consent(ConsentStatus::Expired).is_terminal());
    /// assert!(Status::Transaction(TransactionStatus::Canc).is_terminal());
    /// assert!(!Status::Transaction(TransactionStatus::Patc).is_terminal());
    /// ```
    pub fn is_terminal(self) -> bool {
        match self {
            Status::Consent(status)     => status.is_terminal(),
            Status::Transaction(status) => status.is_terminal(),
        }
    }

    /// Whether a new authorisation of `auth_type` may be started in this
    /// status.
    ///
    /// Origination SCA is only open while the consent is still being
    /// authorised; cancellation SCA only on an accepted payment.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use berlin_consent_core::types::{AuthorisationType, ConsentStatus, Status, TransactionStatus};
    ///
    /// let accepted = Status::Transaction(TransactionStatus::Actc);
    /// assert!(accepted.accepts_authorisation(AuthorisationType::Cancellation));
    /// assert!(!accepted.accepts_authorisation(AuthorisationType::Authorisation));
    /// assert!(!Status::Consent(ConsentStatus::Valid).accepts_authorisation(AuthorisationType::Authorisation));
    /// ```
    pub fn accepts_authorisation(self, auth_type: AuthorisationType) -> bool {
        use ConsentStatus::{PartiallyAuthorised, Received};
        use TransactionStatus::{Accp, Actc, Patc, Pdng, Rcvd};

        match (auth_type, self) {
            (AuthorisationType::Authorisation, Status::Consent(status)) => {
                matches!(status, Received | PartiallyAuthorised)
            }
            (AuthorisationType::Authorisation, Status::Transaction(status)) => {
                matches!(status, Rcvd | Pdng | Patc)
            }
            (AuthorisationType::Cancellation, Status::Transaction(status)) => matches!(status, Actc | Accp),
            (AuthorisationType::Cancellation, Status::Consent(_)) => false,
        }
    }

    /// Transitions never cross between the consent and payment families.
    pub fn can_transition_to(self, next: Status) -> bool {
        match (self, next) {
            (Status::Consent(from), Status::Consent(to))         => from.can_transition_to(to),
            (Status::Transaction(from), Status::Transaction(to)) => from.can_transition_to(to),
            _ => false,
        }
    }
}
