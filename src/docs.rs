use crate::api::attendance::CheckInRequest;
use crate::api::compensatory::{CompensatoryRequest, UsageRequest};
use crate::api::email::TestEmailRequest;
use crate::api::users::{BalanceUpdate, ChangePassword, CreateUser, UserStatus};
use crate::api::vacation::VacationRequest;
use crate::model::attendance::AttendanceResponse;
use crate::model::compensatory::{Compensatory, HoursStatus, UsageStatus};
use crate::model::role::Role;
use crate::model::session::SessionResponse;
use crate::model::user::UserProfile;
use crate::model::vacation::{Vacation, VacationStatus};
use crate::models::{
    LoginReqDto, LoginResponse, PaginatedAttendance, PaginatedCompensatorys, PaginatedUsers,
    PaginatedVacations, ReasonPayload,
};
use crate::services::backup::{RestoreReport, RestoredTable};
use crate::services::storage::{BackupMetadata, BackupTrigger, StorageLocation, TableSummary};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Embassy HR API",
        version = "1.0.0",
        description = r#"
## Embassy HR

Staff self-service and administration for a small diplomatic mission.

### 🔹 Key Features
- **Vacations**
  - Request working days off, admins approve or reject, balances are debited on approval
- **Compensatory time**
  - Declare overtime, admins approve the hours, then request and approve their use
- **Attendance**
  - Daily check-in and check-out with worked hours
- **Users and sessions**
  - Admin user management, per-device sessions that can be revoked
- **Backups**
  - Snapshots to local disk and cloud storage, download and restore

### 🔐 Security
Log in at `/auth/login` to receive a **JWT Bearer** access token (also set as an
`hr_access` cookie). Admin-only operations answer **403** for employees.
Requests are rate limited per client IP and answer **429** with `Retry-After`.

### 📦 Response Format
- JSON-based RESTful responses, errors as `{ "message": "..." }`
- Pagination supported for list endpoints

---
Built with **Rust**, **Actix Web**, **SQLx**, and **Utoipa**.
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,

        crate::api::users::me,
        crate::api::users::change_password,
        crate::api::users::list_users,
        crate::api::users::create_user,
        crate::api::users::get_user,
        crate::api::users::update_user,
        crate::api::users::set_status,
        crate::api::users::set_balances,

        crate::api::sessions::list_sessions,
        crate::api::sessions::revoke_one,
        crate::api::sessions::revoke_others,
        crate::api::sessions::revoke_all_for_user,

        crate::api::vacation::create_vacation,
        crate::api::vacation::list_vacations,
        crate::api::vacation::get_vacation,
        crate::api::vacation::update_vacation,
        crate::api::vacation::cancel_vacation,
        crate::api::vacation::approve_vacation,
        crate::api::vacation::reject_vacation,

        crate::api::compensatory::create_compensatory,
        crate::api::compensatory::list_compensatorys,
        crate::api::compensatory::get_compensatory,
        crate::api::compensatory::delete_compensatory,
        crate::api::compensatory::approve_hours,
        crate::api::compensatory::reject_hours,
        crate::api::compensatory::request_usage,
        crate::api::compensatory::approve_usage,
        crate::api::compensatory::reject_usage,

        crate::api::attendance::check_in,
        crate::api::attendance::check_out,
        crate::api::attendance::list_attendance,

        crate::api::backup::list_backups,
        crate::api::backup::create_backup,
        crate::api::backup::delete_backup,
        crate::api::backup::restore_backup,
        crate::api::backup::download_backup,
        crate::api::backup::cron_backup,

        crate::api::email::send_test_email
    ),
    components(
        schemas(
            LoginReqDto,
            LoginResponse,
            Role,
            UserProfile,
            PaginatedUsers,
            CreateUser,
            ChangePassword,
            UserStatus,
            BalanceUpdate,
            SessionResponse,
            Vacation,
            VacationStatus,
            VacationRequest,
            PaginatedVacations,
            Compensatory,
            HoursStatus,
            UsageStatus,
            CompensatoryRequest,
            UsageRequest,
            PaginatedCompensatorys,
            AttendanceResponse,
            CheckInRequest,
            PaginatedAttendance,
            ReasonPayload,
            BackupMetadata,
            TableSummary,
            StorageLocation,
            BackupTrigger,
            RestoreReport,
            RestoredTable,
            TestEmailRequest
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login, token refresh and logout"),
        (name = "Users", description = "Profiles and user administration"),
        (name = "Sessions", description = "Device session management"),
        (name = "Vacations", description = "Vacation requests and approvals"),
        (name = "Compensatory", description = "Compensatory time and its usage"),
        (name = "Attendance", description = "Attendance management APIs"),
        (name = "Backups", description = "Database backup and restore"),
        (name = "Email", description = "Mail relay diagnostics"),
    )
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
        components.add_security_scheme(
            "cron_secret",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_documents_every_area() {
        let doc = ApiDoc::openapi();
        for path in [
            "/auth/login",
            "/api/vacations/{vacation_id}/approve",
            "/api/compensatorys/{compensatory_id}/approve-usage",
            "/api/backups/{backup_id}/restore",
            "/cron/backup",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let schemes = doc.components.unwrap().security_schemes;
        assert!(schemes.contains_key("bearer_auth"));
        assert!(schemes.contains_key("cron_secret"));
    }
}
