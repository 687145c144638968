use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use super::activity::record;
use super::notifications::{notify_team, notify_user, Broadcast};
use super::{load_team, project_access, project_participant, required_text, team_member};
use crate::domain::access::{can_create_project, level_for_assignee, Capabilities, ProjectAccess};
use crate::domain::{
    ActionType, AssigneeRole, PermissionLevel, ProjectMemberRole, ProjectStatus, TeamRole,
};
use crate::error::{ApiError, ApiResult};
use crate::store::projects::{
    self as store, AssigneeView, NewProject, Project, ProjectCounts, ProjectMemberView,
    ProjectPatch,
};
use crate::store::teams::{self as team_store, Team};
use crate::store::users::{self, User};
use crate::utils::dates::{deserialize_patch, deserialize_ts};
use crate::utils::pagination::{LinkPage, Page};

pub const PROJECT_PAGE_SIZE: i64 = 50;

#[derive(Debug, Serialize)]
pub struct ProjectView {
    #[serde(flatten)]
    pub project: Project,
    #[serde(flatten)]
    pub counts: ProjectCounts,
    pub assignees: Vec<AssigneeView>,
    pub members: Vec<ProjectMemberView>,
    pub access: Option<ProjectAccess>,
    pub permissions: Capabilities,
}

fn project_view(conn: &Connection, project: Project, user_id: &str) -> ApiResult<ProjectView> {
    let counts = store::counts(conn, &project.id, user_id)?;
    let assignees = store::list_assignees(conn, &project.id)?;
    let members = store::list_members(conn, &project.id)?;
    let facts = store::access_facts(conn, &project, user_id)?;
    let access = crate::domain::access::resolve_project_access(&facts);
    Ok(ProjectView {
        permissions: access.map(|a| a.capabilities()).unwrap_or_default(),
        project,
        counts,
        assignees,
        members,
        access,
    })
}

fn reload(conn: &Connection, project_id: &str, user_id: &str) -> ApiResult<ProjectView> {
    let project = store::get(conn, project_id)?.ok_or(ApiError::NotFound("Project"))?;
    project_view(conn, project, user_id)
}

fn actor(conn: &Connection, user_id: &str) -> ApiResult<User> {
    users::get(conn, user_id)?.ok_or(ApiError::Unauthorized)
}

/// Plain array, or a link-paginated envelope when a page was requested.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ProjectListing {
    All(Vec<ProjectView>),
    Paged(LinkPage<ProjectView>),
}

pub fn list_projects(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    page: Option<&str>,
) -> ApiResult<ProjectListing> {
    team_member(conn, team_id, user_id)?;
    let Some(raw_page) = page else {
        let views = store::list_for_team(conn, team_id, None)?
            .into_iter()
            .map(|p| project_view(conn, p, user_id))
            .collect::<ApiResult<Vec<_>>>()?;
        return Ok(ProjectListing::All(views));
    };

    let page = Page::parse(Some(raw_page), None, PROJECT_PAGE_SIZE);
    let total = store::count_for_team(conn, team_id)?;
    let views = store::list_for_team(conn, team_id, Some(page.limit_offset()))?
        .into_iter()
        .map(|p| project_view(conn, p, user_id))
        .collect::<ApiResult<Vec<_>>>()?;
    let base = format!("/api/teams/{}/projects", team_id);
    Ok(ProjectListing::Paged(LinkPage::new(views, total, page, &base)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ProjectInput {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_patch")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_ts")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_ts")]
    pub end_date: Option<DateTime<Utc>>,
    pub status: Option<ProjectStatus>,
    pub team: Option<String>,
    pub assignee_ids: Option<Vec<String>>,
    pub assignee_roles: Option<Vec<i64>>,
}

/// Pair ids with roles; a missing role means Contributor.
fn assignee_pairs(ids: &[String], roles: &[i64]) -> ApiResult<Vec<(String, AssigneeRole)>> {
    if !ids.is_empty() && !roles.is_empty() && ids.len() != roles.len() {
        return Err(ApiError::field(
            "assignee_ids",
            "Number of assignee_ids must match number of assignee_roles",
        ));
    }
    let roles = roles
        .iter()
        .map(|code| {
            AssigneeRole::from_code(*code).ok_or_else(|| {
                ApiError::field("assignee_roles", format!("{} is not a valid assignee role.", code))
            })
        })
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.clone(), roles.get(i).copied().unwrap_or(AssigneeRole::Contributor)))
        .collect())
}

fn check_dates(start: DateTime<Utc>, end: DateTime<Utc>) -> ApiResult<()> {
    if end < start {
        return Err(ApiError::field("end_date", "End date must be after start date."));
    }
    Ok(())
}

/// Put an active team member on the project as assignee with the matching
/// stored level. Returns false when the user is skipped.
fn attach_assignee(
    conn: &Connection,
    project: &Project,
    user_id: &str,
    role: AssigneeRole,
    assigned_by: &str,
) -> ApiResult<bool> {
    if team_store::active_role(conn, &project.team, user_id)?.is_none() {
        return Ok(false);
    }
    if store::member_role(conn, &project.id, user_id)?.is_none() {
        store::upsert_member(conn, &project.id, user_id, ProjectMemberRole::Contributor)?;
    }
    store::upsert_assignee(conn, &project.id, user_id, role, assigned_by)?;
    store::set_permission(conn, &project.id, user_id, level_for_assignee(role))?;
    Ok(true)
}

pub fn create_project(
    conn: &mut Connection,
    user_id: &str,
    team_id: &str,
    input: ProjectInput,
) -> ApiResult<ProjectView> {
    let ctx = team_member(conn, team_id, user_id)?;
    if !can_create_project(ctx.role, &ctx.settings()) {
        return Err(ApiError::forbidden(
            "Insufficient permissions to create projects in this team",
        ));
    }

    let name = required_text("name", input.name.as_deref())?;
    let start_date = input
        .start_date
        .ok_or_else(|| ApiError::field("start_date", "This field is required."))?;
    let end_date = input
        .end_date
        .ok_or_else(|| ApiError::field("end_date", "This field is required."))?;
    check_dates(start_date, end_date)?;
    let pairs = assignee_pairs(
        input.assignee_ids.as_deref().unwrap_or_default(),
        input.assignee_roles.as_deref().unwrap_or_default(),
    )?;
    let creator = actor(conn, user_id)?;
    let description = input.description.flatten();

    let tx = conn.transaction()?;
    let project = store::insert(
        &tx,
        &NewProject {
            team_id,
            name: &name,
            description: description.as_deref(),
            start_date,
            end_date,
            status: input.status.unwrap_or(ProjectStatus::Planning),
            created_by: user_id,
        },
    )?;

    store::upsert_member(&tx, &project.id, user_id, ProjectMemberRole::Manager)?;
    store::upsert_assignee(&tx, &project.id, user_id, AssigneeRole::Lead, user_id)?;
    store::set_permission(&tx, &project.id, user_id, PermissionLevel::Admin)?;

    for (assignee_id, role) in pairs.iter().filter(|(id, _)| id != user_id) {
        attach_assignee(&tx, &project, assignee_id, *role, user_id)?;
    }

    record(
        &tx,
        user_id,
        Some(team_id),
        Some(&project.id),
        ActionType::ProjectCreated,
        format!("Created project '{}'", project.name),
        json!({
            "project_id": project.id,
            "project_name": project.name,
            "team_id": team_id,
            "team_name": ctx.team.name,
        }),
    )?;
    let action_url = format!("/team/{}/project/{}", team_id, project.id);
    notify_team(
        &tx,
        team_id,
        user_id,
        &Broadcast {
            related_id: Some(&project.id),
            action_url: Some(&action_url),
            ..Broadcast::message(
                "🎯 New Project Created",
                &format!("{} created a new project: '{}'", creator.display_name(), project.name),
            )
        },
    )?;
    let view = project_view(&tx, project, user_id)?;
    tx.commit()?;

    info!("Project '{}' created in team {}", view.project.name, team_id);
    Ok(view)
}

pub fn project_detail(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
) -> ApiResult<ProjectView> {
    let ctx = project_access(conn, team_id, project_id, user_id)?;
    project_view(conn, ctx.project, user_id)
}

fn require(allowed: bool, what: &str) -> ApiResult<()> {
    if allowed {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!("No permission to edit {}", what)))
    }
}

/// Partial update. Every submitted field is checked against the caller's
/// capabilities before anything is written.
pub fn update_project(
    conn: &mut Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    input: ProjectInput,
) -> ApiResult<ProjectView> {
    let ctx = project_access(conn, team_id, project_id, user_id)?;
    let caps = ctx.access.capabilities();
    let project = &ctx.project;

    if input.name.is_some() {
        require(caps.edit_name, "name")?;
    }
    if input.description.is_some() {
        require(caps.edit_description, "description")?;
    }
    if input.start_date.is_some() || input.end_date.is_some() {
        require(caps.edit_dates, "dates")?;
    }
    if input.status.is_some() {
        require(caps.edit_status, "status")?;
    }
    let target_team = input
        .team
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty() && *t != project.team);
    if target_team.is_some() && !caps.transfer_project {
        return Err(ApiError::forbidden("No permission to transfer project"));
    }
    let assignees = match (&input.assignee_ids, &input.assignee_roles) {
        (Some(ids), Some(roles)) => {
            if !(caps.manage_members || caps.assign_tasks) {
                return Err(ApiError::forbidden("No permission to manage assignees"));
            }
            Some(assignee_pairs(ids, roles)?)
        }
        _ => None,
    };

    let name = match &input.name {
        Some(name) => Some(required_text("name", Some(name.as_str()))?),
        None => None,
    };
    check_dates(
        input.start_date.unwrap_or(project.start_date),
        input.end_date.unwrap_or(project.end_date),
    )?;

    let mut changed = Map::new();
    if let Some(name) = &name {
        changed.insert("name".into(), json!(name));
    }
    if let Some(description) = &input.description {
        changed.insert("description".into(), json!(description));
    }
    if let Some(start) = input.start_date {
        changed.insert("start_date".into(), json!(start));
    }
    if let Some(end) = input.end_date {
        changed.insert("end_date".into(), json!(end));
    }
    if let Some(status) = input.status {
        changed.insert("status".into(), json!(status.code()));
    }

    let tx = conn.transaction()?;
    store::update(
        &tx,
        &project.id,
        &ProjectPatch {
            name,
            description: input.description,
            start_date: input.start_date,
            end_date: input.end_date,
            status: input.status,
        },
    )?;

    if let Some(pairs) = assignees {
        let kept = sync_assignees(&tx, project, &pairs, user_id)?;
        changed.insert("assignees".into(), json!(kept));
    }

    record(
        &tx,
        user_id,
        Some(&project.team),
        Some(&project.id),
        ActionType::ProjectUpdated,
        format!("Updated project '{}'", project.name),
        json!({ "project_id": project.id, "changes": Value::Object(changed) }),
    )?;

    if let Some(target_team) = target_team {
        let target = load_team(&tx, target_team)?;
        let renamed = store::get(&tx, &project.id)?.ok_or(ApiError::NotFound("Project"))?;
        move_project(&tx, &renamed, &target, user_id)?;
    }

    let view = reload(&tx, &project.id, user_id)?;
    tx.commit()?;
    Ok(view)
}

/// Upsert listed assignees and drop everyone else except the creator.
/// Returns the user ids that ended up assigned.
fn sync_assignees(
    conn: &Connection,
    project: &Project,
    pairs: &[(String, AssigneeRole)],
    actor_id: &str,
) -> ApiResult<Vec<String>> {
    let mut kept = vec![project.created_by.clone()];
    for (user_id, role) in pairs {
        if *user_id == project.created_by || kept.contains(user_id) {
            continue;
        }
        if attach_assignee(conn, project, user_id, *role, actor_id)? {
            kept.push(user_id.clone());
        }
    }
    for existing in store::assignee_user_ids(conn, &project.id)? {
        if !kept.contains(&existing) {
            store::detach_user(conn, &project.id, &existing)?;
        }
    }
    Ok(kept)
}

pub fn delete_project(
    conn: &mut Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
) -> ApiResult<()> {
    let ctx = project_access(conn, team_id, project_id, user_id)?;
    let project = &ctx.project;
    if project.created_by != user_id && !ctx.access.capabilities().delete_project {
        return Err(ApiError::forbidden("Insufficient permissions"));
    }

    let tx = conn.transaction()?;
    record(
        &tx,
        user_id,
        Some(team_id),
        None,
        ActionType::ProjectDeleted,
        format!("Deleted project '{}'", project.name),
        json!({ "project_id": project.id, "project_name": project.name }),
    )?;
    store::delete(&tx, &project.id)?;
    tx.commit()?;
    info!("Project '{}' deleted by {}", project.name, user_id);
    Ok(())
}

// --- Project members ---

pub fn list_members(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
) -> ApiResult<Vec<ProjectMemberView>> {
    project_participant(conn, team_id, project_id, user_id)?;
    Ok(store::list_members(conn, project_id)?)
}

#[derive(Debug, Deserialize)]
pub struct AddMemberInput {
    pub email: Option<String>,
    pub role: Option<ProjectMemberRole>,
}

pub fn add_member(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    input: AddMemberInput,
) -> ApiResult<ProjectMemberView> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let is_project_manager =
        store::member_role(conn, project_id, user_id)? == Some(ProjectMemberRole::Manager);
    if !(is_project_manager || ctx.team_role().is_manager()) {
        return Err(ApiError::forbidden("Insufficient permissions to add members"));
    }

    let email = input
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::bad_request("Email is required"))?;
    let user = users::find_by_email(conn, email)?
        .ok_or_else(|| ApiError::bad_request("User with this email does not exist"))?;
    if team_store::active_role(conn, team_id, &user.id)?.is_none() {
        return Err(ApiError::bad_request("User is not a member of this team"));
    }
    if store::member_role(conn, project_id, &user.id)?.is_some() {
        return Err(ApiError::bad_request("User is already a member of this project"));
    }

    store::upsert_member(
        conn,
        project_id,
        &user.id,
        input.role.unwrap_or(ProjectMemberRole::Contributor),
    )?;
    store::list_members(conn, project_id)?
        .into_iter()
        .find(|m| m.user.id == user.id)
        .ok_or(ApiError::NotFound("Project member"))
}

#[derive(Debug, Serialize)]
pub struct FavoriteToggled {
    pub status: &'static str,
    pub is_favorite: bool,
    pub project_id: String,
}

pub fn toggle_favorite(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
) -> ApiResult<FavoriteToggled> {
    team_member(conn, team_id, user_id)?;
    let project = store::get(conn, project_id)?
        .filter(|p| p.team == team_id)
        .ok_or(ApiError::NotFound("Project"))?;
    let is_favorite = store::toggle_favorite(conn, &project.id, user_id)?;
    Ok(FavoriteToggled {
        status: "success",
        is_favorite,
        project_id: project.id,
    })
}

// --- Transfer ---

#[derive(Debug, Deserialize)]
pub struct TransferInput {
    pub target_team_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Transferred {
    pub message: String,
    pub project_id: String,
    pub new_team_id: String,
    pub new_team_name: String,
    pub removed_members: Vec<String>,
}

/// Move a project to another team, pruning members who are not in it.
pub fn transfer_project(
    conn: &mut Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    input: TransferInput,
) -> ApiResult<Transferred> {
    let source = team_member(conn, team_id, user_id)?;
    if !source.role.is_manager() {
        return Err(ApiError::forbidden(
            "Only team owners or admins can transfer projects",
        ));
    }
    let ctx = project_access(conn, team_id, project_id, user_id)?;
    let target_id = input
        .target_team_id
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::bad_request("Target team ID is required"))?;
    let target = load_team(conn, target_id)?;

    let tx = conn.transaction()?;
    let removed_members = move_project(&tx, &ctx.project, &target, user_id)?;
    tx.commit()?;

    Ok(Transferred {
        message: format!("Project transferred to {} successfully", target.name),
        project_id: ctx.project.id,
        new_team_id: target.id,
        new_team_name: target.name,
        removed_members,
    })
}

/// Shared by the transfer endpoint and a project update naming a new team.
/// Returns the user ids removed from the project.
fn move_project(
    conn: &Connection,
    project: &Project,
    target: &Team,
    actor_id: &str,
) -> ApiResult<Vec<String>> {
    if target.id == project.team {
        return Err(ApiError::bad_request("Project already belongs to this team"));
    }
    let target_role: TeamRole = team_store::active_role(conn, &target.id, actor_id)?
        .ok_or_else(|| ApiError::forbidden("You are not a member of the target team"))?;
    let target_settings = crate::domain::settings::TeamSettings::from_stored(&target.settings);
    if !can_create_project(target_role, &target_settings) {
        return Err(ApiError::forbidden(
            "You do not have permission to create/transfer projects in the target team",
        ));
    }
    if store::name_taken(conn, &target.id, &project.name)? {
        return Err(ApiError::bad_request(format!(
            "A project named \"{}\" already exists in {}",
            project.name, target.name
        )));
    }

    let source = load_team(conn, &project.team)?;
    let transferrer = actor(conn, actor_id)?;
    store::set_team(conn, &project.id, &target.id)?;

    let details = json!({
        "project_id": project.id,
        "project_name": project.name,
        "source_team_id": source.id,
        "source_team_name": source.name,
        "target_team_id": target.id,
        "target_team_name": target.name,
        "transferrer_id": transferrer.id,
        "transferrer_name": transferrer.full_name(),
        "timestamp": Utc::now(),
    });
    record(
        conn,
        actor_id,
        Some(&source.id),
        Some(&project.id),
        ActionType::ProjectTransferred,
        format!(
            "Transferred project '{}' from '{}' to '{}'",
            project.name, source.name, target.name
        ),
        details.clone(),
    )?;
    record(
        conn,
        actor_id,
        Some(&target.id),
        Some(&project.id),
        ActionType::ProjectTransferred,
        format!("Project '{}' transferred from '{}'", project.name, source.name),
        details,
    )?;

    let action_url = format!("/team/{}/project/{}", target.id, project.id);
    let by = transferrer.display_name();
    notify_team(
        conn,
        &source.id,
        actor_id,
        &Broadcast {
            related_id: Some(&project.id),
            action_url: Some(&action_url),
            ..Broadcast::message(
                "📤 Project Transferred Out",
                &format!(
                    "Project '{}' has been transferred to {} by {}",
                    project.name, target.name, by
                ),
            )
        },
    )?;
    notify_team(
        conn,
        &target.id,
        actor_id,
        &Broadcast {
            related_id: Some(&project.id),
            action_url: Some(&action_url),
            ..Broadcast::message(
                "📥 Project Transferred In",
                &format!(
                    "Project '{}' has been transferred from {} by {}",
                    project.name, source.name, by
                ),
            )
        },
    )?;

    let mut removed = Vec::new();
    let source_url = format!("/team/{}/projects", source.id);
    for member in store::list_members(conn, &project.id)? {
        if team_store::active_role(conn, &target.id, &member.user.id)?.is_some() {
            continue;
        }
        notify_user(
            conn,
            &member.user.id,
            &Broadcast {
                related_id: Some(&project.id),
                action_url: Some(&source_url),
                ..Broadcast::message(
                    "🚫 Project Access Changed",
                    &format!(
                        "You've lost access to project '{}' because it was transferred to {}",
                        project.name, target.name
                    ),
                )
            },
        )?;
        store::detach_user(conn, &project.id, &member.user.id)?;
        record(
            conn,
            actor_id,
            Some(&target.id),
            Some(&project.id),
            ActionType::MemberRemoved,
            format!(
                "Removed {} from project '{}' during team transfer",
                member.user.email, project.name
            ),
            json!({
                "project_id": project.id,
                "project_name": project.name,
                "removed_user_id": member.user.id,
                "removed_user_email": member.user.email,
                "reason": "User not in target team",
            }),
        )?;
        removed.push(member.user.id);
    }

    info!(
        "Project '{}' moved from team {} to {} ({} members removed)",
        project.name,
        source.id,
        target.id,
        removed.len()
    );
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testutil;
    use crate::store::activity::{self as activity_store, ActivityQuery};
    use crate::store::notifications as notes;
    use chrono::Duration;

    fn input(name: &str) -> ProjectInput {
        let start = Utc::now();
        ProjectInput {
            name: Some(name.to_string()),
            start_date: Some(start),
            end_date: Some(start + Duration::days(30)),
            ..ProjectInput::default()
        }
    }

    #[test]
    fn test_create_sets_up_creator_and_assignees() {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let dev = testutil::user(&conn, "dev");
        let outsider = testutil::user(&conn, "outsider");
        let team = testutil::team(&conn, &owner);
        testutil::join(&conn, &team, &dev, TeamRole::Member);

        let view = create_project(
            &mut conn,
            &owner.id,
            &team.id,
            ProjectInput {
                assignee_ids: Some(vec![dev.id.clone(), outsider.id.clone(), "missing".into()]),
                assignee_roles: Some(vec![2, 1, 3]),
                ..input("Launch")
            },
        )
        .unwrap();

        assert_eq!(view.project.status, ProjectStatus::Planning);
        assert_eq!(view.counts.assignee_count, 2);
        assert_eq!(view.counts.member_count, 2);
        assert_eq!(view.access.unwrap().level, PermissionLevel::Admin);

        let dev_facts = store::access_facts(&conn, &view.project, &dev.id).unwrap();
        assert_eq!(dev_facts.explicit, Some(PermissionLevel::EditAll));
        assert_eq!(dev_facts.assignee, Some(AssigneeRole::Manager));

        let inbox = notes::list_for_user(&conn, &dev.id, 10).unwrap();
        assert_eq!(inbox[0].title, "🎯 New Project Created");
        assert!(notes::list_for_user(&conn, &owner.id, 10).unwrap().is_empty());
    }

    #[test]
    fn test_create_validation() {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let member = testutil::user(&conn, "member");
        let team = testutil::team(&conn, &owner);
        testutil::join(&conn, &team, &member, TeamRole::Member);

        assert!(matches!(
            create_project(&mut conn, &member.id, &team.id, input("Nope")),
            Err(ApiError::Forbidden(_))
        ));
        team_store::set_settings(
            &conn,
            &team.id,
            &json!({ "permissions": { "members_can_create_projects": true } }),
        )
        .unwrap();
        assert!(create_project(&mut conn, &member.id, &team.id, input("Yes")).is_ok());

        let backwards = ProjectInput {
            end_date: Some(Utc::now() - Duration::days(3)),
            ..input("Backwards")
        };
        assert!(matches!(
            create_project(&mut conn, &owner.id, &team.id, backwards),
            Err(ApiError::Validation(e)) if e.contains_key("end_date")
        ));

        let mismatched = ProjectInput {
            assignee_ids: Some(vec!["a".into(), "b".into()]),
            assignee_roles: Some(vec![1]),
            ..input("Mismatch")
        };
        assert!(create_project(&mut conn, &owner.id, &team.id, mismatched).is_err());
    }

    #[test]
    fn test_update_checks_each_field() {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let viewer = testutil::user(&conn, "viewer");
        let team = testutil::team(&conn, &owner);
        testutil::join(&conn, &team, &viewer, TeamRole::Member);
        let project = create_project(&mut conn, &owner.id, &team.id, input("Alpha"))
            .unwrap()
            .project;

        let rename = || ProjectInput {
            name: Some("Beta".into()),
            ..ProjectInput::default()
        };
        assert!(matches!(
            update_project(&mut conn, &viewer.id, &team.id, &project.id, rename()),
            Err(ApiError::Forbidden(m)) if m == "No permission to edit name"
        ));

        let view = update_project(&mut conn, &owner.id, &team.id, &project.id, rename()).unwrap();
        assert_eq!(view.project.name, "Beta");

        let cleared = update_project(
            &mut conn,
            &owner.id,
            &team.id,
            &project.id,
            ProjectInput {
                description: Some(None),
                status: Some(ProjectStatus::Active),
                ..ProjectInput::default()
            },
        )
        .unwrap();
        assert_eq!(cleared.project.description, None);
        assert_eq!(cleared.project.status, ProjectStatus::Active);
    }

    #[test]
    fn test_assignee_sync_keeps_creator() {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let a = testutil::user(&conn, "a");
        let b = testutil::user(&conn, "b");
        let team = testutil::team(&conn, &owner);
        testutil::join(&conn, &team, &a, TeamRole::Member);
        testutil::join(&conn, &team, &b, TeamRole::Member);

        let project = create_project(
            &mut conn,
            &owner.id,
            &team.id,
            ProjectInput {
                assignee_ids: Some(vec![a.id.clone()]),
                assignee_roles: Some(vec![1]),
                ..input("Sync")
            },
        )
        .unwrap()
        .project;

        let view = update_project(
            &mut conn,
            &owner.id,
            &team.id,
            &project.id,
            ProjectInput {
                assignee_ids: Some(vec![b.id.clone()]),
                assignee_roles: Some(vec![3]),
                ..ProjectInput::default()
            },
        )
        .unwrap();

        let assigned: Vec<&str> = view.assignees.iter().map(|x| x.user.as_str()).collect();
        assert!(assigned.contains(&owner.id.as_str()));
        assert!(assigned.contains(&b.id.as_str()));
        assert!(!assigned.contains(&a.id.as_str()));

        let a_facts = store::access_facts(&conn, &view.project, &a.id).unwrap();
        assert!(!a_facts.project_member);
        assert_eq!(a_facts.explicit, None);
    }

    #[test]
    fn test_delete_and_membership() {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let member = testutil::user(&conn, "member");
        testutil::user(&conn, "friend");
        let team = testutil::team(&conn, &owner);
        testutil::join(&conn, &team, &member, TeamRole::Member);
        let project = create_project(&mut conn, &owner.id, &team.id, input("Gamma"))
            .unwrap()
            .project;

        assert!(matches!(
            list_members(&conn, &member.id, &team.id, &project.id),
            Err(ApiError::Forbidden(_))
        ));
        let add = |email: &str| AddMemberInput {
            email: Some(email.to_string()),
            role: None,
        };
        assert!(matches!(
            add_member(&conn, &owner.id, &team.id, &project.id, add("friend@example.com")),
            Err(ApiError::BadRequest(m)) if m == "User is not a member of this team"
        ));
        let added = add_member(&conn, &owner.id, &team.id, &project.id, add("member@example.com")).unwrap();
        assert_eq!(added.role, ProjectMemberRole::Contributor);
        assert!(add_member(&conn, &owner.id, &team.id, &project.id, add("member@example.com")).is_err());
        assert_eq!(list_members(&conn, &member.id, &team.id, &project.id).unwrap().len(), 2);

        assert!(matches!(
            delete_project(&mut conn, &member.id, &team.id, &project.id),
            Err(ApiError::Forbidden(_))
        ));
        delete_project(&mut conn, &owner.id, &team.id, &project.id).unwrap();
        assert!(store::get(&conn, &project.id).unwrap().is_none());

        let log = activity_store::query(
            &conn,
            &ActivityQuery {
                team_id: Some(&team.id),
                action_type: Some(ActionType::ProjectDeleted),
                ..ActivityQuery::default()
            },
        )
        .unwrap();
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_favorite_toggles() {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let team = testutil::team(&conn, &owner);
        let project = create_project(&mut conn, &owner.id, &team.id, input("Fav"))
            .unwrap()
            .project;
        assert!(toggle_favorite(&conn, &owner.id, &team.id, &project.id).unwrap().is_favorite);
        assert!(!toggle_favorite(&conn, &owner.id, &team.id, &project.id).unwrap().is_favorite);
    }

    #[test]
    fn test_list_paginates_only_on_request() {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let team = testutil::team(&conn, &owner);
        for name in ["one", "two", "three"] {
            create_project(&mut conn, &owner.id, &team.id, input(name)).unwrap();
        }
        match list_projects(&conn, &owner.id, &team.id, None).unwrap() {
            ProjectListing::All(all) => {
                assert_eq!(all.len(), 3);
                assert_eq!(all[0].project.name, "three");
            }
            other => panic!("expected plain listing, got {:?}", other),
        }
        match list_projects(&conn, &owner.id, &team.id, Some("1")).unwrap() {
            ProjectListing::Paged(page) => {
                assert_eq!(page.count, 3);
                assert!(page.next.is_none());
                assert!(page.previous.is_none());
            }
            other => panic!("expected paged listing, got {:?}", other),
        }
    }

    #[test]
    fn test_rename_with_team_change_checks_new_name() {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let source = testutil::team(&conn, &owner);
        let target = testutil::team(&conn, &owner);
        let draft = create_project(&mut conn, &owner.id, &source.id, input("Draft"))
            .unwrap()
            .project;
        create_project(&mut conn, &owner.id, &target.id, input("Taken")).unwrap();

        let clash = update_project(
            &mut conn,
            &owner.id,
            &source.id,
            &draft.id,
            ProjectInput {
                name: Some("Taken".into()),
                team: Some(target.id.clone()),
                ..ProjectInput::default()
            },
        );
        assert!(matches!(clash, Err(ApiError::BadRequest(_))));
        let unchanged = store::get(&conn, &draft.id).unwrap().unwrap();
        assert_eq!(unchanged.name, "Draft");
        assert_eq!(unchanged.team, source.id);

        let moved = update_project(
            &mut conn,
            &owner.id,
            &source.id,
            &draft.id,
            ProjectInput {
                name: Some("Fresh".into()),
                team: Some(target.id.clone()),
                ..ProjectInput::default()
            },
        )
        .unwrap();
        assert_eq!(moved.project.team, target.id);
        let log = activity_store::query(
            &conn,
            &ActivityQuery {
                team_id: Some(&target.id),
                action_type: Some(ActionType::ProjectTransferred),
                ..ActivityQuery::default()
            },
        )
        .unwrap();
        assert!(log[0].description.contains("'Fresh'"));
    }

    #[test]
    fn test_transfer_prunes_members_outside_target() {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let stay = testutil::user(&conn, "stay");
        let leave = testutil::user(&conn, "leave");
        let source = testutil::team(&conn, &owner);
        let target = testutil::team(&conn, &owner);
        testutil::join(&conn, &source, &stay, TeamRole::Member);
        testutil::join(&conn, &source, &leave, TeamRole::Member);
        testutil::join(&conn, &target, &stay, TeamRole::Member);

        let project = create_project(
            &mut conn,
            &owner.id,
            &source.id,
            ProjectInput {
                assignee_ids: Some(vec![stay.id.clone(), leave.id.clone()]),
                assignee_roles: Some(vec![1, 1]),
                ..input("Mover")
            },
        )
        .unwrap()
        .project;

        let missing = transfer_project(
            &mut conn,
            &owner.id,
            &source.id,
            &project.id,
            TransferInput { target_team_id: None },
        );
        assert!(matches!(missing, Err(ApiError::BadRequest(_))));

        let moved = transfer_project(
            &mut conn,
            &owner.id,
            &source.id,
            &project.id,
            TransferInput {
                target_team_id: Some(target.id.clone()),
            },
        )
        .unwrap();
        assert_eq!(moved.removed_members, vec![leave.id.clone()]);
        assert_eq!(store::get(&conn, &project.id).unwrap().unwrap().team, target.id);

        let lost = notes::for_related(&conn, &leave.id, &project.id).unwrap();
        assert!(lost.iter().any(|n| n.title == "🚫 Project Access Changed"));
        let arrived = notes::for_related(&conn, &stay.id, &project.id).unwrap();
        assert!(arrived.iter().any(|n| n.title == "📥 Project Transferred In"));

        for team in [&source, &target] {
            let log = activity_store::query(
                &conn,
                &ActivityQuery {
                    team_id: Some(&team.id),
                    action_type: Some(ActionType::ProjectTransferred),
                    ..ActivityQuery::default()
                },
            )
            .unwrap();
            assert_eq!(log.len(), 1);
        }

        // A second project with the same name cannot follow.
        create_project(&mut conn, &owner.id, &source.id, input("Mover")).unwrap();
        let clash_id = store::list_for_team(&conn, &source.id, None).unwrap()[0].id.clone();
        let clash = transfer_project(
            &mut conn,
            &owner.id,
            &source.id,
            &clash_id,
            TransferInput {
                target_team_id: Some(target.id.clone()),
            },
        );
        assert!(matches!(clash, Err(ApiError::BadRequest(m)) if m.contains("already exists")));
    }
}
