//! Capability checks at the HTTP boundary.
//!
//! The gateway identifies callers with the `x-user-id` and `x-user-role`
//! headers. [`authenticate`] turns them into a [`Principal`] once per request
//! and [`require`] checks the route's [`Capability`] against the principal's
//! role. Handlers only check that a learner acts on their own account.

use std::sync::Arc;

use axum::Extension;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use common::UserId;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Role asserted by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Instructor,
    Learner,
    /// Trusted internal caller without gateway headers.
    Service,
}

impl Role {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "instructor" => Some(Role::Instructor),
            "learner" => Some(Role::Learner),
            _ => None,
        }
    }

    fn capabilities(self) -> &'static [Capability] {
        use Capability::*;
        match self {
            Role::Admin | Role::Service => &[
                SubmitPayment,
                ViewWorkflow,
                ViewEnrollments,
                UpdateProgress,
                Reconcile,
            ],
            Role::Instructor => &[ViewWorkflow, ViewEnrollments, UpdateProgress],
            Role::Learner => &[SubmitPayment, ViewWorkflow, ViewEnrollments, UpdateProgress],
        }
    }
}

/// Actions guarded at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    SubmitPayment,
    ViewWorkflow,
    ViewEnrollments,
    UpdateProgress,
    Reconcile,
}

/// Authenticated caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Option<UserId>,
    pub role: Role,
}

impl Principal {
    pub fn service() -> Self {
        Self {
            user_id: None,
            role: Role::Service,
        }
    }

    /// Checks that the principal's role grants `capability`.
    pub fn require(&self, capability: Capability) -> Result<(), ApiError> {
        if self.role.capabilities().contains(&capability) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "{:?} may not {capability:?}",
                self.role
            )))
        }
    }

    /// Whether the principal may act on `subject`'s data. Learners are
    /// limited to themselves.
    pub fn may_act_on(&self, subject: &UserId) -> bool {
        self.role != Role::Learner || self.user_id.as_ref() == Some(subject)
    }

    /// Like [`may_act_on`](Self::may_act_on), as a 403 for handlers.
    pub fn ensure_subject(&self, subject: &UserId) -> Result<(), ApiError> {
        if self.may_act_on(subject) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "learners may only act on their own account, not {subject}"
            )))
        }
    }

    fn from_headers(headers: &HeaderMap, auth_required: bool) -> Result<Self, ApiError> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let (user_id, role) = (header(USER_ID_HEADER), header(USER_ROLE_HEADER));
        if user_id.is_none() && role.is_none() {
            return if auth_required {
                Err(ApiError::Unauthorized("missing identity headers".to_string()))
            } else {
                Ok(Self::service())
            };
        }

        let role = role
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_ROLE_HEADER}")))?;
        let role = Role::parse(role)
            .ok_or_else(|| ApiError::Unauthorized(format!("unknown role {role}")))?;
        let user_id = user_id.map(UserId::from);
        if role == Role::Learner && user_id.is_none() {
            return Err(ApiError::Unauthorized(format!("missing {USER_ID_HEADER}")));
        }

        Ok(Self { user_id, role })
    }
}

/// Gate configuration passed to [`authenticate`].
#[derive(Debug, Clone, Copy)]
pub struct AuthConfig {
    pub auth_required: bool,
}

/// Middleware resolving the request's [`Principal`] into its extensions.
pub async fn authenticate(
    State(config): State<Arc<AuthConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = Principal::from_headers(request.headers(), config.auth_required)?;
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Per-route middleware rejecting principals whose role lacks `capability`.
///
/// Runs inside [`authenticate`], which must wrap the route.
pub async fn require(
    State(capability): State<Capability>,
    Extension(principal): Extension<Principal>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    principal.require(capability)?;
    Ok(next.run(request).await)
}
