use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use super::activity::record;
use super::{load_team, optional_text, required_text, team_manager, team_member};
use crate::domain::access::{check_leave, check_member_removal, check_role_change};
use crate::domain::{ActionType, TeamRole};
use crate::error::{ApiError, ApiResult};
use crate::store::teams::{self as store, MemberFilter, MemberView, Team};
use crate::store::users;
use crate::utils::pagination::{Page, Paginated, DEFAULT_PAGE_SIZE};

#[derive(Debug, Serialize)]
pub struct TeamView {
    #[serde(flatten)]
    pub team: Team,
    pub created_by_name: String,
    pub members: Vec<MemberView>,
    pub member_count: i64,
    pub my_role: Option<TeamRole>,
}

fn team_view(conn: &Connection, team: Team, user_id: &str) -> ApiResult<TeamView> {
    let created_by_name = users::get(conn, &team.created_by)?
        .map(|u| u.full_name())
        .unwrap_or_default();
    let (members, member_count) =
        store::list_members(conn, &team.id, &MemberFilter::default(), None)?;
    let my_role = store::active_role(conn, &team.id, user_id)?;
    Ok(TeamView {
        team,
        created_by_name,
        members,
        member_count,
        my_role,
    })
}

pub fn list_teams(conn: &Connection, user_id: &str) -> ApiResult<Vec<TeamView>> {
    store::teams_for_user(conn, user_id)?
        .into_iter()
        .map(|team| team_view(conn, team, user_id))
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct TeamInput {
    pub name: Option<String>,
    pub description: Option<String>,
}

pub fn create_team(conn: &mut Connection, user_id: &str, input: TeamInput) -> ApiResult<TeamView> {
    let name = required_text("name", input.name.as_deref())?;
    let description = optional_text(input.description);

    let tx = conn.transaction()?;
    let team = store::insert_team(&tx, &name, description.as_deref(), user_id)?;
    store::add_member(&tx, &team.id, user_id, TeamRole::Owner)?;
    record(
        &tx,
        user_id,
        Some(&team.id),
        None,
        ActionType::TeamJoined,
        format!("Created team {}", team.name),
        json!({ "role": TeamRole::Owner.code() }),
    )?;
    let view = team_view(&tx, team, user_id)?;
    tx.commit()?;

    info!("Team '{}' created by {}", view.team.name, user_id);
    Ok(view)
}

pub fn team_detail(conn: &Connection, user_id: &str, team_id: &str) -> ApiResult<TeamView> {
    let ctx = team_member(conn, team_id, user_id)?;
    team_view(conn, ctx.team, user_id)
}

pub fn update_team(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    input: TeamInput,
) -> ApiResult<TeamView> {
    team_manager(conn, team_id, user_id)?;
    let name = match input.name {
        Some(name) => Some(required_text("name", Some(&name))?),
        None => None,
    };
    store::update_team(conn, team_id, name.as_deref(), input.description.as_deref())?;
    let team = load_team(conn, team_id)?;
    team_view(conn, team, user_id)
}

fn require_owner(conn: &Connection, team_id: &str, user_id: &str, msg: &str) -> ApiResult<Team> {
    let ctx = team_member(conn, team_id, user_id)?;
    if ctx.role != TeamRole::Owner {
        return Err(ApiError::forbidden(msg));
    }
    Ok(ctx.team)
}

pub fn delete_team(conn: &Connection, user_id: &str, team_id: &str) -> ApiResult<()> {
    let team = require_owner(conn, team_id, user_id, "Only owner can delete team")?;
    store::delete_team(conn, &team.id)?;
    info!("Team '{}' deleted by {}", team.name, user_id);
    Ok(())
}

/// Deletion guarded by retyping the team name.
pub fn delete_team_confirmed(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    confirmation_name: Option<&str>,
) -> ApiResult<()> {
    let team = require_owner(conn, team_id, user_id, "Only owner can delete team")?;
    if confirmation_name != Some(team.name.as_str()) {
        return Err(ApiError::bad_request("Team name does not match"));
    }
    delete_team(conn, user_id, team_id)
}

// --- Members ---

pub fn list_members(conn: &Connection, user_id: &str, team_id: &str) -> ApiResult<Vec<MemberView>> {
    team_member(conn, team_id, user_id)?;
    let (members, _) = store::list_members(conn, team_id, &MemberFilter::default(), None)?;
    Ok(members)
}

#[derive(Debug, Default, Deserialize)]
pub struct MemberQuery {
    pub q: Option<String>,
    pub role: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

/// Paged member listing with optional text and role filters. `role=all`
/// disables the role filter.
pub fn search_members(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    query: &MemberQuery,
) -> ApiResult<Paginated<MemberView>> {
    team_member(conn, team_id, user_id)?;
    let role = match query.role.as_deref().map(str::trim) {
        None | Some("") | Some("all") => None,
        Some(raw) => Some(
            TeamRole::parse(raw).ok_or_else(|| ApiError::bad_request("Invalid role filter"))?,
        ),
    };
    let page = Page::parse(
        query.page.as_deref(),
        query.page_size.as_deref(),
        DEFAULT_PAGE_SIZE,
    );
    let filter = MemberFilter {
        query: query.q.as_deref(),
        role,
    };
    let (members, total) = store::list_members(conn, team_id, &filter, Some(page.limit_offset()))?;
    Ok(Paginated::new(members, total, page))
}

fn load_member(conn: &Connection, team_id: &str, member_id: &str) -> ApiResult<store::Membership> {
    store::member_by_id(conn, team_id, member_id)?.ok_or(ApiError::NotFound("Member"))
}

fn user_label(conn: &Connection, user_id: &str) -> ApiResult<String> {
    Ok(users::get(conn, user_id)?
        .map(|u| u.display_name())
        .unwrap_or_else(|| user_id.to_string()))
}

pub fn remove_member(
    conn: &mut Connection,
    user_id: &str,
    team_id: &str,
    member_id: &str,
) -> ApiResult<()> {
    let ctx = team_member(conn, team_id, user_id)?;
    let target = load_member(conn, team_id, member_id)?;
    check_member_removal(ctx.role, target.role, target.user_id == user_id)?;

    let tx = conn.transaction()?;
    let label = user_label(&tx, &target.user_id)?;
    store::delete_member(&tx, &target.id)?;
    record(
        &tx,
        user_id,
        Some(team_id),
        None,
        ActionType::MemberRemoved,
        format!("Removed {} from the team", label),
        json!({ "user_id": target.user_id, "role": target.role.code() }),
    )?;
    tx.commit()?;
    info!("Member {} removed from team {}", target.user_id, team_id);
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct RoleInput {
    pub role: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct RoleChanged {
    pub message: String,
    pub new_role: TeamRole,
    pub new_role_display: &'static str,
}

/// Accepts the role as a number or a numeric string.
fn parse_role(raw: Option<&Value>) -> ApiResult<TeamRole> {
    let code = match raw {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => Some(
            s.trim()
                .parse::<i64>()
                .map_err(|_| ApiError::bad_request("Invalid role format"))?,
        ),
        _ => None,
    };
    code.and_then(TeamRole::from_code)
        .ok_or_else(|| ApiError::bad_request("Invalid role"))
}

pub fn update_member_role(
    conn: &mut Connection,
    user_id: &str,
    team_id: &str,
    member_id: &str,
    input: RoleInput,
) -> ApiResult<RoleChanged> {
    let ctx = team_member(conn, team_id, user_id)?;
    let target = load_member(conn, team_id, member_id)?;
    let new_role = parse_role(input.role.as_ref())?;
    check_role_change(ctx.role, target.role, new_role, target.user_id == user_id)?;

    let tx = conn.transaction()?;
    store::set_member_role(&tx, &target.id, new_role)?;
    let label = user_label(&tx, &target.user_id)?;
    record(
        &tx,
        user_id,
        Some(team_id),
        None,
        ActionType::MemberAdded,
        format!("Changed {}'s role to {}", label, new_role.label()),
        json!({
            "user_id": target.user_id,
            "old_role": target.role.code(),
            "new_role": new_role.code(),
        }),
    )?;
    tx.commit()?;

    Ok(RoleChanged {
        message: format!("Member role updated to {} successfully", new_role.label()),
        new_role,
        new_role_display: new_role.label(),
    })
}

/// The target becomes Owner, the caller drops to Admin and the team's
/// creator reference follows the new owner.
pub fn transfer_ownership(
    conn: &mut Connection,
    user_id: &str,
    team_id: &str,
    member_id: &str,
) -> ApiResult<()> {
    require_owner(conn, team_id, user_id, "Only owner can transfer ownership")?;
    let target = load_member(conn, team_id, member_id)?;
    if target.user_id == user_id {
        return Err(ApiError::bad_request("You already own this team"));
    }
    if !target.is_active {
        return Err(ApiError::bad_request(
            "Ownership can only be transferred to an active member",
        ));
    }
    let current = store::membership(conn, team_id, user_id)?.ok_or(ApiError::NotFound("Member"))?;

    let tx = conn.transaction()?;
    store::set_member_role(&tx, &current.id, TeamRole::Admin)?;
    store::set_member_role(&tx, &target.id, TeamRole::Owner)?;
    store::set_created_by(&tx, team_id, &target.user_id)?;
    let label = user_label(&tx, &target.user_id)?;
    record(
        &tx,
        user_id,
        Some(team_id),
        None,
        ActionType::MemberAdded,
        format!("Transferred ownership to {}", label),
        json!({ "previous_owner": user_id, "new_owner": target.user_id }),
    )?;
    tx.commit()?;

    info!("Ownership of team {} transferred to {}", team_id, target.user_id);
    Ok(())
}

pub fn leave_team(conn: &mut Connection, user_id: &str, team_id: &str) -> ApiResult<()> {
    load_team(conn, team_id)?;
    let membership = store::membership(conn, team_id, user_id)?
        .ok_or_else(|| ApiError::bad_request("Not a member of this team"))?;
    check_leave(membership.role)?;

    let tx = conn.transaction()?;
    store::delete_member(&tx, &membership.id)?;
    record(
        &tx,
        user_id,
        Some(team_id),
        None,
        ActionType::MemberRemoved,
        "Left the team".to_string(),
        json!({ "user_id": user_id, "left": true }),
    )?;
    tx.commit()?;
    Ok(())
}

// --- Settings ---

#[derive(Debug, Serialize)]
pub struct SettingsView {
    pub team_id: String,
    pub team_name: String,
    pub settings: Value,
}

pub fn get_settings(conn: &Connection, user_id: &str, team_id: &str) -> ApiResult<SettingsView> {
    let ctx = team_manager(conn, team_id, user_id)?;
    Ok(SettingsView {
        settings: ctx.settings().into_value(),
        team_id: ctx.team.id,
        team_name: ctx.team.name,
    })
}

/// Deep-merge submitted categories into the stored settings.
pub fn update_settings(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    patch: &Value,
) -> ApiResult<SettingsView> {
    let ctx = team_manager(conn, team_id, user_id)?;
    let patch = patch.get("settings").unwrap_or(patch);
    let mut settings = ctx.settings();
    settings.merge(patch)?;
    store::set_settings(conn, team_id, settings.overrides())?;
    info!("Settings of team {} updated by {}", team_id, user_id);
    Ok(SettingsView {
        settings: settings.into_value(),
        team_id: ctx.team.id,
        team_name: ctx.team.name,
    })
}

#[derive(Debug, Deserialize)]
pub struct SettingInput {
    pub path: Option<String>,
    pub value: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct SettingUpdated {
    pub path: String,
    pub value: Value,
    pub settings: Value,
}

pub fn update_setting(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    input: SettingInput,
) -> ApiResult<SettingUpdated> {
    let ctx = team_manager(conn, team_id, user_id)?;
    let path = required_text("path", input.path.as_deref())?;
    let value = input
        .value
        .ok_or_else(|| ApiError::field("value", "This field is required."))?;
    let mut settings = ctx.settings();
    settings.set(&path, value.clone())?;
    store::set_settings(conn, team_id, settings.overrides())?;
    Ok(SettingUpdated {
        path,
        value,
        settings: settings.into_value(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testutil;
    use crate::store::activity::{self as activity_store, ActivityQuery};

    fn member_id(conn: &Connection, team_id: &str, user_id: &str) -> String {
        store::membership(conn, team_id, user_id).unwrap().unwrap().id
    }

    #[test]
    fn test_create_team_makes_creator_owner() {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let view = create_team(
            &mut conn,
            &owner.id,
            TeamInput {
                name: Some("  Apollo ".into()),
                description: None,
            },
        )
        .unwrap();
        assert_eq!(view.team.name, "Apollo");
        assert_eq!(view.member_count, 1);
        assert_eq!(view.my_role, Some(TeamRole::Owner));
        assert_eq!(view.created_by_name, "owner Tester");

        let log = activity_store::query(
            &conn,
            &ActivityQuery {
                team_id: Some(&view.team.id),
                ..ActivityQuery::default()
            },
        )
        .unwrap();
        assert_eq!(log[0].action_type, ActionType::TeamJoined);

        let missing = create_team(&mut conn, &owner.id, TeamInput { name: None, description: None });
        assert!(matches!(missing, Err(ApiError::Validation(_))));
    }

    #[test]
    fn test_only_members_see_team_and_managers_edit() {
        let conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let member = testutil::user(&conn, "member");
        let stranger = testutil::user(&conn, "stranger");
        let team = testutil::team(&conn, &owner);
        testutil::join(&conn, &team, &member, TeamRole::Member);

        assert!(matches!(
            team_detail(&conn, &stranger.id, &team.id),
            Err(ApiError::Forbidden(_))
        ));
        let edit = TeamInput {
            name: Some("Renamed".into()),
            description: None,
        };
        assert!(matches!(
            update_team(&conn, &member.id, &team.id, edit),
            Err(ApiError::Forbidden(_))
        ));
        let updated = update_team(
            &conn,
            &owner.id,
            &team.id,
            TeamInput {
                name: Some("Renamed".into()),
                description: Some("new".into()),
            },
        )
        .unwrap();
        assert_eq!(updated.team.name, "Renamed");
        assert_eq!(updated.team.description.as_deref(), Some("new"));
    }

    #[test]
    fn test_confirmed_delete_requires_matching_name() {
        let conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let admin = testutil::user(&conn, "admin");
        let team = testutil::team(&conn, &owner);
        testutil::join(&conn, &team, &admin, TeamRole::Admin);

        assert!(matches!(
            delete_team(&conn, &admin.id, &team.id),
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            delete_team_confirmed(&conn, &owner.id, &team.id, Some("rocket")),
            Err(ApiError::BadRequest(_))
        ));
        delete_team_confirmed(&conn, &owner.id, &team.id, Some("Rocket")).unwrap();
        assert!(matches!(load_team(&conn, &team.id), Err(ApiError::NotFound(_))));
    }

    #[test]
    fn test_search_members_filters_and_pages() {
        let conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let team = testutil::team(&conn, &owner);
        for name in ["alice", "albert", "bob"] {
            let user = testutil::user(&conn, name);
            testutil::join(&conn, &team, &user, TeamRole::Member);
        }

        let result = search_members(
            &conn,
            &owner.id,
            &team.id,
            &MemberQuery {
                q: Some("AL".into()),
                ..MemberQuery::default()
            },
        )
        .unwrap();
        assert_eq!(result.total, 2);

        let paged = search_members(
            &conn,
            &owner.id,
            &team.id,
            &MemberQuery {
                role: Some("3".into()),
                page: Some("2".into()),
                page_size: Some("2".into()),
                ..MemberQuery::default()
            },
        )
        .unwrap();
        assert_eq!(paged.total, 3);
        assert_eq!(paged.results.len(), 1);
        assert!(paged.has_previous);
        assert!(!paged.has_next);

        let all = search_members(
            &conn,
            &owner.id,
            &team.id,
            &MemberQuery {
                role: Some("all".into()),
                ..MemberQuery::default()
            },
        )
        .unwrap();
        assert_eq!(all.total, 4);
    }

    #[test]
    fn test_role_changes_follow_hierarchy() {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let admin = testutil::user(&conn, "admin");
        let other_admin = testutil::user(&conn, "other");
        let member = testutil::user(&conn, "member");
        let team = testutil::team(&conn, &owner);
        testutil::join(&conn, &team, &admin, TeamRole::Admin);
        testutil::join(&conn, &team, &other_admin, TeamRole::Admin);
        testutil::join(&conn, &team, &member, TeamRole::Member);

        let member_row = member_id(&conn, &team.id, &member.id);
        let changed = update_member_role(
            &mut conn,
            &admin.id,
            &team.id,
            &member_row,
            RoleInput {
                role: Some(json!("4")),
            },
        )
        .unwrap();
        assert_eq!(changed.new_role, TeamRole::Guest);
        assert_eq!(changed.message, "Member role updated to Guest successfully");

        let other_row = member_id(&conn, &team.id, &other_admin.id);
        let denied = update_member_role(
            &mut conn,
            &admin.id,
            &team.id,
            &other_row,
            RoleInput { role: Some(json!(3)) },
        );
        assert!(matches!(denied, Err(ApiError::Forbidden(_))));

        let invalid = update_member_role(
            &mut conn,
            &owner.id,
            &team.id,
            &member_row,
            RoleInput {
                role: Some(json!("boss")),
            },
        );
        assert!(matches!(invalid, Err(ApiError::BadRequest(m)) if m == "Invalid role format"));
    }

    #[test]
    fn test_remove_and_leave() {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let admin = testutil::user(&conn, "admin");
        let member = testutil::user(&conn, "member");
        let team = testutil::team(&conn, &owner);
        testutil::join(&conn, &team, &admin, TeamRole::Admin);
        testutil::join(&conn, &team, &member, TeamRole::Member);

        let owner_row = member_id(&conn, &team.id, &owner.id);
        assert!(matches!(
            remove_member(&mut conn, &admin.id, &team.id, &owner_row),
            Err(ApiError::Forbidden(_))
        ));

        let member_row = member_id(&conn, &team.id, &member.id);
        remove_member(&mut conn, &admin.id, &team.id, &member_row).unwrap();
        assert!(store::membership(&conn, &team.id, &member.id).unwrap().is_none());

        assert!(matches!(
            leave_team(&mut conn, &owner.id, &team.id),
            Err(ApiError::BadRequest(_))
        ));
        leave_team(&mut conn, &admin.id, &team.id).unwrap();
        assert!(matches!(
            leave_team(&mut conn, &admin.id, &team.id),
            Err(ApiError::BadRequest(m)) if m == "Not a member of this team"
        ));

        let removed = activity_store::query(
            &conn,
            &ActivityQuery {
                team_id: Some(&team.id),
                action_type: Some(ActionType::MemberRemoved),
                ..ActivityQuery::default()
            },
        )
        .unwrap();
        assert_eq!(removed.len(), 2);
    }

    #[test]
    fn test_transfer_ownership_swaps_roles() {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let heir = testutil::user(&conn, "heir");
        let team = testutil::team(&conn, &owner);
        testutil::join(&conn, &team, &heir, TeamRole::Member);

        let heir_row = member_id(&conn, &team.id, &heir.id);
        assert!(matches!(
            transfer_ownership(&mut conn, &heir.id, &team.id, &heir_row),
            Err(ApiError::Forbidden(_))
        ));
        let own_row = member_id(&conn, &team.id, &owner.id);
        assert!(transfer_ownership(&mut conn, &owner.id, &team.id, &own_row).is_err());

        transfer_ownership(&mut conn, &owner.id, &team.id, &heir_row).unwrap();
        assert_eq!(
            store::active_role(&conn, &team.id, &heir.id).unwrap(),
            Some(TeamRole::Owner)
        );
        assert_eq!(
            store::active_role(&conn, &team.id, &owner.id).unwrap(),
            Some(TeamRole::Admin)
        );
        assert_eq!(load_team(&conn, &team.id).unwrap().created_by, heir.id);
    }

    #[test]
    fn test_settings_roundtrip_through_paths() {
        let conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let member = testutil::user(&conn, "member");
        let team = testutil::team(&conn, &owner);
        testutil::join(&conn, &team, &member, TeamRole::Member);

        assert!(matches!(
            get_settings(&conn, &member.id, &team.id),
            Err(ApiError::Forbidden(_))
        ));

        let view = update_settings(
            &conn,
            &owner.id,
            &team.id,
            &json!({ "settings": { "permissions": { "members_can_invite": true } } }),
        )
        .unwrap();
        assert_eq!(view.settings["permissions"]["members_can_invite"], json!(true));
        assert_eq!(view.settings["security"]["default_role"], json!(3));

        let updated = update_setting(
            &conn,
            &owner.id,
            &team.id,
            SettingInput {
                path: Some("security.default_role".into()),
                value: Some(json!(4)),
            },
        )
        .unwrap();
        assert_eq!(updated.settings["security"]["default_role"], json!(4));
        assert_eq!(updated.settings["permissions"]["members_can_invite"], json!(true));
        let stored = store::get_team(&conn, &team.id).unwrap().unwrap().settings;
        assert_eq!(
            stored,
            json!({
                "permissions": { "members_can_invite": true },
                "security": { "default_role": 4 },
            })
        );

        let bad = update_setting(
            &conn,
            &owner.id,
            &team.id,
            SettingInput {
                path: Some("security.default_role".into()),
                value: Some(json!(1)),
            },
        );
        assert!(bad.is_err());
    }
}
