// Copyright 2025 Oxide Computer Company
//! Authorization interceptors
//!
//! Authentication itself happens upstream: some interceptor (registered with
//! [`crate::HttpEndpoint::register_interceptor`] or
//! [`crate::ServiceRoutes::register_interceptor`]) identifies the caller and
//! stores an [`AuthUser`] in the request's extensions.  The managers here
//! only inspect that user and either continue with the route or fail with
//! 401 (`NOT_SIGNED`) or 403 (`NOT_IN_ROLE`, `FORBIDDEN`).

use crate::error::ApplicationError;
use crate::handler::interceptor_fn;
use crate::handler::Interceptor;
use crate::handler::Next;
use crate::handler::RequestContext;

use http::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use std::sync::Arc;

pub const ADMIN_ROLE: &str = "admin";
const DEFAULT_ID_PARAM: &str = "user_id";

/// The signed-in caller.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct AuthUser {
    #[serde(alias = "id")]
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
    /// anything else known about the user
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl AuthUser {
    pub fn new(user_id: &str, roles: &[&str]) -> Self {
        AuthUser {
            user_id: user_id.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            properties: Map::new(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }
}

fn signed_user(rqctx: &RequestContext) -> Result<AuthUser, ApplicationError> {
    rqctx.extensions().get::<AuthUser>().cloned().ok_or_else(|| {
        ApplicationError::unauthorized(
            "NOT_SIGNED",
            "User must be signed in to perform this operation",
        )
        .with_correlation_id(rqctx.correlation_id())
    })
}

fn forbidden(
    rqctx: &RequestContext,
    code: &str,
    message: String,
) -> ApplicationError {
    ApplicationError::unauthorized(code, message)
        .with_status(StatusCode::FORBIDDEN)
        .with_correlation_id(rqctx.correlation_id())
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BasicAuthManager;

impl BasicAuthManager {
    /// Lets every request through.
    pub fn anybody(&self) -> Arc<dyn Interceptor> {
        interceptor_fn(|rqctx: RequestContext, next: Next| next.run(rqctx))
    }

    /// Requires a signed-in user.
    pub fn signed(&self) -> Arc<dyn Interceptor> {
        interceptor_fn(|rqctx: RequestContext, next: Next| async move {
            signed_user(&rqctx)?;
            next.run(rqctx).await
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RoleAuthManager;

impl RoleAuthManager {
    /// Requires a signed-in user holding at least one of `roles`.
    pub fn user_in_roles(&self, roles: &[&str]) -> Arc<dyn Interceptor> {
        let roles: Arc<[String]> = roles.iter().map(|r| r.to_string()).collect();
        interceptor_fn(move |rqctx: RequestContext, next: Next| {
            let roles = Arc::clone(&roles);
            async move {
                let user = signed_user(&rqctx)?;
                if !roles.iter().any(|role| user.has_role(role)) {
                    return Err(forbidden(
                        &rqctx,
                        "NOT_IN_ROLE",
                        format!(
                            "User must be {} to perform this operation",
                            roles.join(" or ")
                        ),
                    )
                    .with_details("roles", roles.to_vec()));
                }
                next.run(rqctx).await
            }
        })
    }

    pub fn user_in_role(&self, role: &str) -> Arc<dyn Interceptor> {
        self.user_in_roles(&[role])
    }

    pub fn admin(&self) -> Arc<dyn Interceptor> {
        self.user_in_role(ADMIN_ROLE)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OwnerAuthManager;

impl OwnerAuthManager {
    /// Requires the signed-in user to be the one named by request parameter
    /// `id_param` (query first, then path; `user_id` when empty).
    pub fn owner(&self, id_param: &str) -> Arc<dyn Interceptor> {
        owner_interceptor(id_param, false)
    }

    /// Like [`OwnerAuthManager::owner`], but admins are always allowed.
    pub fn owner_or_admin(&self, id_param: &str) -> Arc<dyn Interceptor> {
        owner_interceptor(id_param, true)
    }
}

fn owner_interceptor(id_param: &str, admin_allowed: bool) -> Arc<dyn Interceptor> {
    let id_param: Arc<str> = match id_param {
        "" => DEFAULT_ID_PARAM.into(),
        id_param => id_param.into(),
    };
    interceptor_fn(move |rqctx: RequestContext, next: Next| {
        let id_param = Arc::clone(&id_param);
        async move {
            let user = signed_user(&rqctx)?;
            let owner = rqctx.param(&id_param).unwrap_or_default();
            let allowed =
                user.user_id == owner || (admin_allowed && user.is_admin());
            if !allowed {
                return Err(forbidden(
                    &rqctx,
                    "FORBIDDEN",
                    "Only data owner can perform this operation".to_string(),
                ));
            }
            next.run(rqctx).await
        }
    })
}
