/**
 * DOMAIN LAYER - Auth Collaborator
 *
 * Credentials and the `assertAdminRole` contract (§6). The real
 * authorization policy is explicitly out of scope (§1): this module
 * only defines the narrow interface workflows call through, so a real
 * implementation (backed by whatever identity provider sits upstream)
 * can be swapped in without touching a single workflow.
 */

use uuid::Uuid;

use crate::error::{AppError, Result};

/// Who is performing the action, and under what scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    User,
    Admin,
    SuperAdmin,
    Driver,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub scope: Scope,
    pub admin_id: Option<Uuid>,
    pub email: Option<String>,
    pub driver_id: Option<Uuid>,
}

impl Credentials {
    pub fn user() -> Self {
        Self { scope: Scope::User, admin_id: None, email: None, driver_id: None }
    }

    pub fn admin(admin_id: Uuid) -> Self {
        Self { scope: Scope::Admin, admin_id: Some(admin_id), email: None, driver_id: None }
    }
}

/// Narrow external collaborator: raises when `credentials` may not
/// perform `action` for `company_id`. The policy itself (role tables,
/// per-company grants) lives outside this crate; this trait is only
/// the seam workflows call through.
#[async_trait::async_trait]
pub trait AdminRoleChecker: Send + Sync {
    async fn assert_admin_role(
        &self,
        credentials: &Credentials,
        action: &str,
        company_id: Uuid,
    ) -> Result<()>;
}

/// Default checker: permits superadmin unconditionally, and admin only
/// when scoped via `admin_id` (a real deployment would look the grant
/// up in a roles table — out of scope per §1).
pub struct AllowAdminChecker;

#[async_trait::async_trait]
impl AdminRoleChecker for AllowAdminChecker {
    async fn assert_admin_role(
        &self,
        credentials: &Credentials,
        action: &str,
        _company_id: Uuid,
    ) -> Result<()> {
        match credentials.scope {
            Scope::SuperAdmin => Ok(()),
            Scope::Admin if credentials.admin_id.is_some() => Ok(()),
            _ => Err(AppError::Forbidden).map_err(|e| {
                tracing::warn!("denied {} for scope {:?}", action, credentials.scope);
                e
            }),
        }
    }
}
