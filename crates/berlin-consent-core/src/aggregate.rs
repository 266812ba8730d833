// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Status aggregation across the authorisations of one consent.
//!
//! Rules are evaluated in priority order; the first match wins:
//!
//! 1. any authorisation `failed`        → [`AggregateStatus::Rejected`]
//! 2. every authorisation `finalised`   → [`AggregateStatus::FullyAuthorised`]
//! 3. at least one `finalised`          → [`AggregateStatus::PartiallyAuthorised`]
//! 4. otherwise                         → [`AggregateStatus::Pending`]
//!
//! A single failure therefore rejects the whole multi-party authorisation,
//! however many parties have already approved.

use crate::types::{AggregateStatus, Authorisation, AuthorisationType, ScaStatus};

/// Aggregate a set of authorisations that all share one
/// [`AuthorisationType`].
///
/// Pure: the same input always yields the same verdict.  An empty slice
/// yields [`AggregateStatus::Pending`].
///
/// # Examples
///
/// ```rust
/// use berlin_consent_core::aggregate::aggregate_statuses;
/// use berlin_consent_core::types::{AggregateStatus, ScaStatus};
///
/// use ScaStatus::*;
/// assert_eq!(aggregate_statuses([Finalised, Failed]), AggregateStatus::Rejected);
/// assert_eq!(aggregate_statuses([Finalised, Finalised]), AggregateStatus::FullyAuthorised);
/// assert_eq!(aggregate_statuses([Finalised, Received]), AggregateStatus::PartiallyAuthorised);
/// assert_eq!(aggregate_statuses([Received, Started]), AggregateStatus::Pending);
/// ```
pub fn aggregate_statuses<I>(statuses: I) -> AggregateStatus
where
    I: IntoIterator<Item = ScaStatus>,
{
    let mut total = 0usize;
    let mut finalised = 0usize;
    for status in statuses {
        total += 1;
        match status {
            ScaStatus::Failed => return AggregateStatus::Rejected,
            ScaStatus::Finalised => finalised += 1,
            _ => {}
        }
    }

    if total > 0 && finalised == total {
        AggregateStatus::FullyAuthorised
    } else if finalised > 0 {
        AggregateStatus::PartiallyAuthorised
    } else {
        AggregateStatus::Pending
    }
}

/// Aggregate the authorisations of `auth_type`, ignoring the others.
pub fn aggregate_status(
    authorisations: &[Authorisation],
    auth_type: AuthorisationType,
) -> AggregateStatus {
    aggregate_statuses(
        authorisations
            .iter()
            .filter(|auth| auth.auth_type == auth_type)
            .map(|auth| auth.status),
    )
}
