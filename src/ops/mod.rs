//! Domain Operations
//!
//! Synchronous business logic run on the database thread. Every operation
//! takes the connection and the acting user, enforces access rules and
//! returns a serializable view or an `ApiError`.

pub mod accounts;
pub mod activity;
pub mod dashboard;
pub mod invitations;
pub mod join_requests;
pub mod notifications;
pub mod projects;
pub mod sheets;
pub mod tasks;
pub mod teams;

use rusqlite::Connection;

use crate::domain::access::{self, AccessFacts, ProjectAccess};
use crate::domain::settings::TeamSettings;
use crate::domain::TeamRole;
use crate::error::{ApiError, ApiResult};
use crate::store::projects::{self as project_store, Project};
use crate::store::teams::{self as team_store, Team};

/// A team together with the caller's active role in it.
#[derive(Debug, Clone)]
pub struct TeamContext {
    pub team: Team,
    pub role: TeamRole,
}

impl TeamContext {
    pub fn settings(&self) -> TeamSettings {
        TeamSettings::from_stored(&self.team.settings)
    }
}

pub fn load_team(conn: &Connection, team_id: &str) -> ApiResult<Team> {
    team_store::get_team(conn, team_id)?.ok_or(ApiError::NotFound("Team"))
}

/// Caller must be an active member of the team.
pub fn team_member(conn: &Connection, team_id: &str, user_id: &str) -> ApiResult<TeamContext> {
    let team = load_team(conn, team_id)?;
    let role = team_store::active_role(conn, team_id, user_id)?
        .ok_or_else(|| ApiError::forbidden("Not a member of this team"))?;
    Ok(TeamContext { team, role })
}

/// Caller must be the team's Owner or an Admin.
pub fn team_manager(conn: &Connection, team_id: &str, user_id: &str) -> ApiResult<TeamContext> {
    let ctx = team_member(conn, team_id, user_id)?;
    access::require_team_manager(ctx.role)?;
    Ok(ctx)
}

#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub project: Project,
    pub facts: AccessFacts,
    pub access: ProjectAccess,
}

impl ProjectContext {
    pub fn team_role(&self) -> TeamRole {
        // resolve_project_access only succeeds with an active team role
        self.facts.team_role.unwrap_or(TeamRole::Guest)
    }

    pub fn is_participant(&self) -> bool {
        access::is_participant(self.facts.team_role, self.facts.project_member)
    }
}

/// Load a project of `team_id` and resolve the caller's access to it.
pub fn project_access(
    conn: &Connection,
    team_id: &str,
    project_id: &str,
    user_id: &str,
) -> ApiResult<ProjectContext> {
    let project = project_store::get(conn, project_id)?
        .filter(|p| p.team == team_id)
        .ok_or(ApiError::NotFound("Project"))?;
    let facts = project_store::access_facts(conn, &project, user_id)?;
    let access = access::resolve_project_access(&facts)
        .ok_or_else(|| ApiError::forbidden("You don't have access to this project"))?;
    Ok(ProjectContext {
        project,
        facts,
        access,
    })
}

/// Project members and team managers only.
pub fn project_participant(
    conn: &Connection,
    team_id: &str,
    project_id: &str,
    user_id: &str,
) -> ApiResult<ProjectContext> {
    let ctx = project_access(conn, team_id, project_id, user_id)?;
    if !ctx.is_participant() {
        return Err(ApiError::forbidden("You are not a member of this project"));
    }
    Ok(ctx)
}

/// Trimmed, non-empty string or a field error.
pub fn required_text(field: &str, value: Option<&str>) -> ApiResult<String> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ApiError::field(field, "This field is required.")),
    }
}

/// Empty strings become `None`.
pub fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Fixtures shared by the operation tests.

    use rusqlite::Connection;

    use crate::auth::password::hash_password;
    use crate::db;
    use crate::domain::TeamRole;
    use crate::store::teams::{self as team_store, Team};
    use crate::store::users::{self, NewUser, User};

    pub fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::migrate(&conn).unwrap();
        conn
    }

    pub fn user(conn: &Connection, name: &str) -> User {
        let email = format!("{}@example.com", name);
        users::insert(
            conn,
            &NewUser {
                email: &email,
                username: name,
                password_hash: &hash_password("password123"),
                first_name: name,
                last_name: "Tester",
            },
        )
        .unwrap()
    }

    pub fn team(conn: &Connection, owner: &User) -> Team {
        let team = team_store::insert_team(conn, "Rocket", Some("ships"), &owner.id).unwrap();
        team_store::add_member(conn, &team.id, &owner.id, TeamRole::Owner).unwrap();
        team
    }

    pub fn join(conn: &Connection, team: &Team, user: &User, role: TeamRole) {
        team_store::add_member(conn, &team.id, &user.id, role).unwrap();
    }
}
