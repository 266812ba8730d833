// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 MuVeraAI Corporation

//! Request classification for the Berlin Group consent surface.
//!
//! [`RequestKind::parse`] turns an HTTP method and path into one variant of a
//! closed enum, once, at the edge.  Everything downstream matches on the
//! variant instead of re-inspecting path strings.
//!
//! Recognised paths (an optional `/v1`-style version prefix is skipped):
//!
//! ```text
//! /consents[/confirmation-of-funds]                 POST
//! /{payments|bulk-payments|periodic-payments}/{product}   POST
//!   …/{id}                                          GET, DELETE
//!   …/{id}/status                                   GET
//!   …/{id}/authorisations                           POST, GET
//!   …/{id}/authorisations/{authId}                  GET, PUT
//!   …/{id}/cancellation-authorisations[/{authId}]   payments only
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::ConsentError;
use crate::types::{AuthorisationType, ConsentType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl FromStr for Method {
    type Err = ConsentError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            other => Err(ConsentError::UnsupportedRequest(format!("method {other}"))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        })
    }
}

/// The resource an idempotency key is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElectedResource {
    /// Consent or payment initiation.
    Initiation(ConsentType),
    /// Explicit start of an authorisation.
    Authorisation,
    /// Explicit start of a payment cancellation authorisation.
    CancellationAuthorisation,
}

impl ElectedResource {
    pub fn as_str(self) -> &'static str {
        match self {
            ElectedResource::Initiation(consent_type) => consent_type.as_str(),
            ElectedResource::Authorisation => "authorisation",
            ElectedResource::CancellationAuthorisation => "cancellation-authorisation",
        }
    }
}

/// Every request shape the consent surface accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    CreateConsent {
        consent_type: ConsentType,
    },
    GetConsent {
        consent_type: ConsentType,
        consent_id: String,
    },
    GetConsentStatus {
        consent_type: ConsentType,
        consent_id: String,
    },
    DeleteConsent {
        consent_type: ConsentType,
        consent_id: String,
    },
    StartAuthorisation {
        consent_type: ConsentType,
        consent_id: String,
        auth_type: AuthorisationType,
    },
    ListAuthorisations {
        consent_type: ConsentType,
        consent_id: String,
        auth_type: AuthorisationType,
    },
    GetAuthorisation {
        consent_type: ConsentType,
        consent_id: String,
        auth_type: AuthorisationType,
        authorisation_id: String,
    },
    UpdateAuthorisation {
        consent_type: ConsentType,
        consent_id: String,
        auth_type: AuthorisationType,
        authorisation_id: String,
    },
}

impl RequestKind {
    /// Classify a request.
    ///
    /// # Errors
    ///
    /// [`ConsentError::UnsupportedRequest`] for any method and path pair
    /// outside the table in the module docs.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use berlin_consent_core::routing::{Method, RequestKind};
    /// use berlin_consent_core::types::{AuthorisationType, ConsentType};
    ///
    /// let kind = RequestKind::parse(
    ///     Method::Post,
    ///     "/v1/payments/sepa-credit-transfers/p-1/cancellation-authorisations",
    /// )
    /// .unwrap();
    /// assert_eq!(
    ///     kind,
    ///     RequestKind::StartAuthorisation {
    ///         consent_type: ConsentType::Payments,
    ///         consent_id: "p-1".into(),
    ///         auth_type: AuthorisationType::Cancellation,
    ///     }
    /// );
    /// assert!(RequestKind::parse(Method::Post, "/consents/c-1/cancellation-authorisations").is_err());
    /// ```
    pub fn parse(method: Method, path: &str) -> Result<Self, ConsentError> {
        let unsupported = || ConsentError::UnsupportedRequest(format!("{method} {path}"));

        let path = path.split('?').next().unwrap_or_default();
        let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.first().is_some_and(|s| is_version(s)) {
            segments.remove(0);
        }

        let (consent_type, rest) = match segments.as_slice() {
            ["consents", "confirmation-of-funds", rest @ ..] => (ConsentType::FundsConfirmation, rest),
            ["consents", rest @ ..] => (ConsentType::Accounts, rest),
            ["payments", _product, rest @ ..] => (ConsentType::Payments, rest),
            ["bulk-payments", _product, rest @ ..] => (ConsentType::BulkPayments, rest),
            ["periodic-payments", _product, rest @ ..] => (ConsentType::PeriodicPayments, rest),
            _ => return Err(unsupported()),
        };

        let auth_type = |segment: &str| match segment {
            "authorisations" => Some(AuthorisationType::Authorisation),
            "cancellation-authorisations" if consent_type.is_payment() => {
                Some(AuthorisationType::Cancellation)
            }
            _ => None,
        };

        let kind = match (method, rest) {
            (Method::Post, []) => RequestKind::CreateConsent { consent_type },
            (Method::Get, [id]) => RequestKind::GetConsent {
                consent_type,
                consent_id: (*id).to_owned(),
            },
            (Method::Delete, [id]) => RequestKind::DeleteConsent {
                consent_type,
                consent_id: (*id).to_owned(),
            },
            (Method::Get, [id, "status"]) => RequestKind::GetConsentStatus {
                consent_type,
                consent_id: (*id).to_owned(),
            },
            (Method::Post, [id, auths]) => RequestKind::StartAuthorisation {
                consent_type,
                consent_id: (*id).to_owned(),
                auth_type: auth_type(*auths).ok_or_else(unsupported)?,
            },
            (Method::Get, [id, auths]) => RequestKind::ListAuthorisations {
                consent_type,
                consent_id: (*id).to_owned(),
                auth_type: auth_type(*auths).ok_or_else(unsupported)?,
            },
            (Method::Get, [id, auths, auth_id]) => RequestKind::GetAuthorisation {
                consent_type,
                consent_id: (*id).to_owned(),
                auth_type: auth_type(*auths).ok_or_else(unsupported)?,
                authorisation_id: (*auth_id).to_owned(),
            },
            (Method::Put, [id, auths, auth_id]) => RequestKind::UpdateAuthorisation {
                consent_type,
                consent_id: (*id).to_owned(),
                auth_type: auth_type(*auths).ok_or_else(unsupported)?,
                authorisation_id: (*auth_id).to_owned(),
            },
            _ => return Err(unsupported()),
        };
        Ok(kind)
    }

    pub fn consent_type(&self) -> ConsentType {
        match self {
            RequestKind::CreateConsent { consent_type }
            | RequestKind::GetConsent { consent_type, .. }
            | RequestKind::GetConsentStatus { consent_type, .. }
            | RequestKind::DeleteConsent { consent_type, .. }
            | RequestKind::StartAuthorisation { consent_type, .. }
            | RequestKind::ListAuthorisations { consent_type, .. }
            | RequestKind::GetAuthorisation { consent_type, .. }
            | RequestKind::UpdateAuthorisation { consent_type, .. } => *consent_type,
        }
    }

    /// `None` only for [`RequestKind::CreateConsent`].
    pub fn consent_id(&self) -> Option<&str> {
        match self {
            RequestKind::CreateConsent { .. } => None,
            RequestKind::GetConsent { consent_id, .. }
            | RequestKind::GetConsentStatus { consent_id, .. }
            | RequestKind::DeleteConsent { consent_id, .. }
            | RequestKind::StartAuthorisation { consent_id, .. }
            | RequestKind::ListAuthorisations { consent_id, .. }
            | RequestKind::GetAuthorisation { consent_id, .. }
            | RequestKind::UpdateAuthorisation { consent_id, .. } => Some(consent_id),
        }
    }

    /// The resource an idempotency key is scoped to, for the POST writes
    /// that are deduplicated.  `None` for every other request.
    pub fn elected_resource(&self) -> Option<ElectedResource> {
        match self {
            RequestKind::CreateConsent { consent_type } => {
                Some(ElectedResource::Initiation(*consent_type))
            }
            RequestKind::StartAuthorisation { auth_type: AuthorisationType::Authorisation, .. } => {
                Some(ElectedResource::Authorisation)
            }
            RequestKind::StartAuthorisation { auth_type: AuthorisationType::Cancellation, .. } => {
                Some(ElectedResource::CancellationAuthorisation)
            }
            _ => None,
        }
    }

    pub fn is_idempotent_write(&self) -> bool {
        self.elected_resource().is_some()
    }
}

fn is_version(segment: &str) -> bool {
    segment.len() > 1
        && segment.starts_with('v')
        && segment[1..].bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(method: &str, path: &str) -> Result<RequestKind, ConsentError> {
        RequestKind::parse(method.parse()?, path)
    }

    #[test]
    fn consent_initiation_routes() {
        assert_eq!(
            parse("POST", "/consents").unwrap(),
            RequestKind::CreateConsent { consent_type: ConsentType::Accounts }
        );
        assert_eq!(
            parse("post", "/v2/consents/confirmation-of-funds/").unwrap(),
            RequestKind::CreateConsent { consent_type: ConsentType::FundsConfirmation }
        );
        assert_eq!(
            parse("POST", "/periodic-payments/sepa-credit-transfers?x=1").unwrap(),
            RequestKind::CreateConsent { consent_type: ConsentType::PeriodicPayments }
        );
    }

    #[test]
    fn consent_resource_routes() {
        let status = parse("GET", "/consents/c-1/status").unwrap();
        assert_eq!(status.consent_id(), Some("c-1"));
        assert!(matches!(status, RequestKind::GetConsentStatus { .. }));

        let delete = parse("DELETE", "/bulk-payments/sepa-credit-transfers/p-9").unwrap();
        assert_eq!(delete.consent_type(), ConsentType::BulkPayments);
        assert!(matches!(delete, RequestKind::DeleteConsent { .. }));
    }

    #[test]
    fn authorisation_routes() {
        let update = parse("PUT", "/consents/c-1/authorisations/a-1").unwrap();
        assert_eq!(
            update,
            RequestKind::UpdateAuthorisation {
                consent_type: ConsentType::Accounts,
                consent_id: "c-1".into(),
                auth_type: AuthorisationType::Authorisation,
                authorisation_id: "a-1".into(),
            }
        );
        let list = parse("GET", "/payments/instant/p-1/cancellation-authorisations").unwrap();
        assert!(matches!(
            list,
            RequestKind::ListAuthorisations { auth_type: AuthorisationType::Cancellation, .. }
        ));
    }

    #[test]
    fn unknown_shapes_are_unsupported() {
        for (method, path) in [
            ("GET", "/accounts"),
            ("GET", "/payments"),
            ("PUT", "/consents/c-1"),
            ("POST", "/consents/c-1/status"),
            ("GET", "/consents/c-1/authorisations/a-1/extra"),
            ("PATCH", "/consents"),
        ] {
            assert!(
                matches!(parse(method, path), Err(ConsentError::UnsupportedRequest(_))),
                "{method} {path} accepted"
            );
        }
    }

    #[test]
    fn only_post_writes_elect_a_resource() {
        let create = parse("POST", "/payments/sepa-credit-transfers").unwrap();
        assert_eq!(
            create.elected_resource(),
            Some(ElectedResource::Initiation(ConsentType::Payments))
        );
        let start = parse("POST", "/payments/x/p/cancellation-authorisations").unwrap();
        assert_eq!(start.elected_resource(), Some(ElectedResource::CancellationAuthorisation));
        assert!(!parse("GET", "/consents/c").unwrap().is_idempotent_write());
        assert!(!parse("PUT", "/consents/c/authorisations/a").unwrap().is_idempotent_write());
    }
}
