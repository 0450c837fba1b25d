use crate::api::activity::{
    ActivityListResponse, MonitorSettings, ReportActivity, ScreenshotAccepted, UploadScreenshot,
};
use crate::api::attendance::{AttendanceListResponse, CorrectAttendance, TodaySummary};
use crate::api::company::CompanyPayload;
use crate::api::dashboard::Dashboard;
use crate::api::leave::{ApplyLeave, LeaveBalance, LeaveListResponse, ReviewLeave};
use crate::api::payroll::{GeneratePayroll, GenerateSummary, PayrollListResponse, PayrollStats};
use crate::api::requests::{ApproveJoinRequest, CreateJoinRequest};
use crate::api::sessions::Heartbeat;
use crate::api::settings::UpdateWorkSettings;
use crate::api::users::{CreateUser, CreatedUser, UserListResponse};
use crate::auth::handlers::{ChangePassword, TokenPair};
use crate::model::activity_log::{ActivityKind, ActivityLog, ScreenCapture};
use crate::model::attendance::{Attendance, AttendanceStatus};
use crate::model::company::Company;
use crate::model::leave::{BalanceLine, Leave, LeaveType, ReviewStatus};
use crate::model::payroll::{Payroll, PayrollBreakdown, PayrollStatus};
use crate::model::role::Role;
use crate::model::user::User;
use crate::model::user_request::UserRequest;
use crate::model::user_session::{EndReason, UserSession};
use crate::model::work_settings::WorkSettings;
use crate::models::{LoginReqDto, LoginResponse, MessageResponse, RegisterReq};
use utoipa::Modify;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "WorkZen HRMS API",
        version = "1.0.0",
        description = r#"
## WorkZen: multi-tenant HR management

Every company is a tenant. Users register, then either create a company (becoming its **Admin**)
or ask to join an existing one. Admins and HR officers can also create accounts directly;
those users sign in with a generated **login id** and a temporary password.

### 🔹 Modules
- **Users**: company directory, roles, reporting managers
- **Attendance**: daily check-in/check-out, today's headcount, corrections
- **Leave**: paid, sick and unpaid leave with yearly allocations and review
- **Payroll**: monthly payslips computed from salary, working days and unpaid leave
- **Sessions & Monitoring**: heartbeats, idle timeout, activity log, screenshots
- **Dashboard**: one summary endpoint shaped by the caller's role

### 🔐 Roles
`ADMIN`, `HR_OFFICER`, `PAYROLL_OFFICER`, `MANAGER`, `EMPLOYEE`.
All endpoints except register, login, refresh and logout need a **Bearer** access token.

### 📦 Responses
JSON everywhere. Errors are `{"error": "..."}`. List endpoints take `page` and `per_page`.
"#,
    ),
    paths(
        crate::auth::handlers::register,
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,
        crate::auth::handlers::me,
        crate::auth::handlers::change_password,

        crate::api::company::create_company,
        crate::api::company::get_my_company,
        crate::api::company::update_my_company,

        crate::api::settings::get_work_settings,
        crate::api::settings::update_work_settings,

        crate::api::users::create_user,
        crate::api::users::list_users,
        crate::api::users::get_user,
        crate::api::users::update_user,
        crate::api::users::delete_user,

        crate::api::attendance::mark_attendance,
        crate::api::attendance::checkout,
        crate::api::attendance::my_attendance,
        crate::api::attendance::list_attendance,
        crate::api::attendance::today_attendance,
        crate::api::attendance::correct_attendance,

        crate::api::leave::apply_leave,
        crate::api::leave::list_leaves,
        crate::api::leave::get_leave,
        crate::api::leave::approve_leave,
        crate::api::leave::reject_leave,
        crate::api::leave::cancel_leave,
        crate::api::leave::my_balance,

        crate::api::payroll::generate_payroll,
        crate::api::payroll::list_payrolls,
        crate::api::payroll::my_payrolls,
        crate::api::payroll::get_payroll,
        crate::api::payroll::mark_paid,
        crate::api::payroll::stats,

        crate::api::requests::create_request,
        crate::api::requests::list_requests,
        crate::api::requests::approve_request,
        crate::api::requests::reject_request,

        crate::api::sessions::heartbeat,
        crate::api::sessions::my_sessions,
        crate::api::sessions::list_active_sessions,
        crate::api::sessions::terminate_session,

        crate::api::activity::report_activity,
        crate::api::activity::list_activity,
        crate::api::activity::upload_screenshot,
        crate::api::activity::latest_screenshot,
        crate::api::activity::monitor_settings,

        crate::api::dashboard::dashboard
    ),
    components(
        schemas(
            RegisterReq,
            LoginReqDto,
            LoginResponse,
            TokenPair,
            ChangePassword,
            MessageResponse,
            Role,
            User,
            CreateUser,
            CreatedUser,
            UserListResponse,
            Company,
            CompanyPayload,
            WorkSettings,
            UpdateWorkSettings,
            Attendance,
            AttendanceStatus,
            AttendanceListResponse,
            TodaySummary,
            CorrectAttendance,
            Leave,
            LeaveType,
            ReviewStatus,
            ApplyLeave,
            ReviewLeave,
            LeaveListResponse,
            LeaveBalance,
            BalanceLine,
            Payroll,
            PayrollStatus,
            PayrollBreakdown,
            GeneratePayroll,
            GenerateSummary,
            PayrollListResponse,
            PayrollStats,
            UserRequest,
            CreateJoinRequest,
            ApproveJoinRequest,
            UserSession,
            EndReason,
            Heartbeat,
            ActivityLog,
            ActivityKind,
            ReportActivity,
            ActivityListResponse,
            ScreenCapture,
            UploadScreenshot,
            ScreenshotAccepted,
            MonitorSettings,
            Dashboard
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Registration, login and token rotation"),
        (name = "Company", description = "Tenant profile"),
        (name = "Settings", description = "Per-company work rules"),
        (name = "Users", description = "Company directory and roles"),
        (name = "Attendance", description = "Check-in, check-out and corrections"),
        (name = "Leave", description = "Leave applications, review and balances"),
        (name = "Payroll", description = "Monthly payslips"),
        (name = "Requests", description = "Requests to join a company"),
        (name = "Sessions", description = "Login sessions and heartbeats"),
        (name = "Activity", description = "User activity log"),
        (name = "Monitor", description = "Screenshots and client monitoring settings"),
        (name = "Dashboard", description = "Role-shaped summary")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

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
    }
}
