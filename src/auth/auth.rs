use crate::error::AppError;
use crate::model::role::Role;
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload};
use futures::future::{Ready, ready};
use uuid::Uuid;

/// Authenticated caller, inserted into request extensions by the auth
/// middleware.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: i64,
    pub email: String,
    pub role: Role,
    pub session_id: Uuid,
}

impl FromRequest for AuthUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthUser>()
                .cloned()
                .ok_or_else(|| AppError::unauthorized("Not authenticated")),
        )
    }
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("Admin only"))
        }
    }

    /// Employees may only touch their own records; admins touch any.
    pub fn can_access(&self, owner_id: i64) -> bool {
        self.is_admin() || self.user_id == owner_id
    }

    pub fn require_self_or_admin(&self, owner_id: i64) -> Result<(), AppError> {
        if self.can_access(owner_id) {
            Ok(())
        } else {
            Err(AppError::forbidden("Not allowed to access this record"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role) -> AuthUser {
        AuthUser {
            user_id: 7,
            email: "ana@embassy.example".into(),
            role,
            session_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn admin_checks() {
        assert!(user(Role::Admin).require_admin().is_ok());
        assert!(user(Role::Employee).require_admin().is_err());
    }

    #[test]
    fn ownership_checks() {
        let employee = user(Role::Employee);
        assert!(employee.require_self_or_admin(7).is_ok());
        assert!(employee.require_self_or_admin(8).is_err());
        assert!(user(Role::Admin).require_self_or_admin(8).is_ok());
    }
}
