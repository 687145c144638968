//! Access Control
//!
//! Pure permission rules. Callers load the facts (team role, stored level,
//! assignee role, project membership) and these functions decide; nothing
//! here touches the database, and computed access is never written back.

use serde::Serialize;

use super::settings::TeamSettings;
use super::{AssigneeRole, PermissionLevel, TeamRole};
use crate::error::{ApiError, ApiResult};

/// What a permission level lets a user do to a project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub edit_name: bool,
    pub edit_description: bool,
    pub edit_dates: bool,
    pub edit_status: bool,
    pub assign_tasks: bool,
    pub manage_members: bool,
    pub transfer_project: bool,
    pub delete_project: bool,
}

impl PermissionLevel {
    pub fn capabilities(self) -> Capabilities {
        let basic = Capabilities {
            edit_name: true,
            edit_description: true,
            edit_dates: true,
            edit_status: true,
            assign_tasks: true,
            ..Capabilities::default()
        };
        match self {
            PermissionLevel::ViewOnly => Capabilities::default(),
            PermissionLevel::EditBasic => basic,
            PermissionLevel::EditAll => Capabilities {
                manage_members: true,
                ..basic
            },
            PermissionLevel::Admin => Capabilities {
                manage_members: true,
                transfer_project: true,
                delete_project: true,
                ..basic
            },
        }
    }
}

/// Level stored for an assignee when they are put on a project.
pub fn level_for_assignee(role: AssigneeRole) -> PermissionLevel {
    match role {
        AssigneeRole::Lead => PermissionLevel::Admin,
        AssigneeRole::Manager => PermissionLevel::EditAll,
        AssigneeRole::Contributor => PermissionLevel::EditBasic,
    }
}

/// Where a resolved level came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessSource {
    TeamRole,
    Explicit,
    Assignee,
    ProjectMember,
    TeamMember,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AccessFacts {
    /// Active team membership of the caller in the project's team.
    pub team_role: Option<TeamRole>,
    pub explicit: Option<PermissionLevel>,
    pub assignee: Option<AssigneeRole>,
    pub project_member: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProjectAccess {
    pub level: PermissionLevel,
    pub source: AccessSource,
}

impl ProjectAccess {
    pub fn capabilities(&self) -> Capabilities {
        self.level.capabilities()
    }
}

/// Resolve the caller's effective level on a project.
///
/// Team membership gates everything: a stored row for someone who has left
/// the team grants nothing. Team managers always get `Admin`, then the stored
/// level wins, then the assignee role, then plain project membership.
pub fn resolve_project_access(facts: &AccessFacts) -> Option<ProjectAccess> {
    let team_role = facts.team_role?;

    let (level, source) = if team_role.is_manager() {
        (PermissionLevel::Admin, AccessSource::TeamRole)
    } else if let Some(level) = facts.explicit {
        (level, AccessSource::Explicit)
    } else if let Some(role) = facts.assignee {
        let level = match role {
            AssigneeRole::Lead | AssigneeRole::Manager => PermissionLevel::EditAll,
            AssigneeRole::Contributor => PermissionLevel::EditBasic,
        };
        (level, AccessSource::Assignee)
    } else if facts.project_member {
        (PermissionLevel::EditBasic, AccessSource::ProjectMember)
    } else {
        (PermissionLevel::ViewOnly, AccessSource::TeamMember)
    };

    Some(ProjectAccess { level, source })
}

/// Tasks, sheets and comments are open to project members and team managers.
pub fn is_participant(team_role: Option<TeamRole>, project_member: bool) -> bool {
    match team_role {
        Some(role) if role.is_manager() => true,
        Some(_) => project_member,
        None => false,
    }
}

pub fn can_create_project(role: TeamRole, settings: &TeamSettings) -> bool {
    match role {
        TeamRole::Owner | TeamRole::Admin => true,
        TeamRole::Member => settings.flag("permissions.members_can_create_projects"),
        TeamRole::Guest => false,
    }
}

pub fn can_invite(role: TeamRole, settings: &TeamSettings) -> bool {
    match role {
        TeamRole::Owner | TeamRole::Admin => true,
        TeamRole::Member => settings.flag("permissions.members_can_invite"),
        TeamRole::Guest => false,
    }
}

pub fn require_team_manager(role: TeamRole) -> ApiResult<()> {
    if role.is_manager() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Insufficient permissions"))
    }
}

pub fn check_role_change(
    actor: TeamRole,
    target: TeamRole,
    new_role: TeamRole,
    actor_is_target: bool,
) -> ApiResult<()> {
    require_team_manager(actor)?;
    if actor_is_target && target == TeamRole::Owner {
        return Err(ApiError::bad_request("Owners cannot change their own role"));
    }
    if new_role == TeamRole::Owner {
        if actor == TeamRole::Admin {
            return Err(ApiError::forbidden("Admins cannot assign Owner role"));
        }
        return Err(ApiError::bad_request(
            "Use ownership transfer to make someone the owner",
        ));
    }
    if actor == TeamRole::Admin && target == TeamRole::Owner {
        return Err(ApiError::forbidden("Admins cannot change the owner's role"));
    }
    if actor == TeamRole::Admin && target == TeamRole::Admin {
        return Err(ApiError::forbidden("Admins cannot change other admins roles"));
    }
    Ok(())
}

pub fn check_member_removal(
    actor: TeamRole,
    target: TeamRole,
    actor_is_target: bool,
) -> ApiResult<()> {
    require_team_manager(actor)?;
    if actor_is_target && target == TeamRole::Owner {
        return Err(ApiError::bad_request(
            "Owners cannot remove themselves. Transfer ownership first.",
        ));
    }
    if actor == TeamRole::Admin && target == TeamRole::Owner {
        return Err(ApiError::forbidden("Admins cannot remove the owner"));
    }
    if actor == TeamRole::Admin && target == TeamRole::Admin && !actor_is_target {
        return Err(ApiError::forbidden("Admins cannot remove other admins"));
    }
    Ok(())
}

pub fn check_leave(role: TeamRole) -> ApiResult<()> {
    if role == TeamRole::Owner {
        return Err(ApiError::bad_request(
            "Owner cannot leave team. Transfer ownership or delete team instead.",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn facts(team_role: Option<TeamRole>) -> AccessFacts {
        AccessFacts {
            team_role,
            ..AccessFacts::default()
        }
    }

    fn level(facts: AccessFacts) -> Option<PermissionLevel> {
        resolve_project_access(&facts).map(|a| a.level)
    }

    #[test]
    fn test_no_team_membership_means_no_access() {
        let stale = AccessFacts {
            team_role: None,
            explicit: Some(PermissionLevel::Admin),
            assignee: Some(AssigneeRole::Lead),
            project_member: true,
        };
        assert_eq!(resolve_project_access(&stale), None);
    }

    #[test]
    fn test_team_role_overrides_explicit_level() {
        let admin = AccessFacts {
            explicit: Some(PermissionLevel::ViewOnly),
            ..facts(Some(TeamRole::Admin))
        };
        let access = resolve_project_access(&admin).unwrap();
        assert_eq!(access.level, PermissionLevel::Admin);
        assert_eq!(access.source, AccessSource::TeamRole);
        assert_eq!(level(facts(Some(TeamRole::Owner))), Some(PermissionLevel::Admin));
    }

    #[test]
    fn test_explicit_level_beats_assignee_role() {
        let member = AccessFacts {
            explicit: Some(PermissionLevel::ViewOnly),
            assignee: Some(AssigneeRole::Lead),
            project_member: true,
            ..facts(Some(TeamRole::Member))
        };
        assert_eq!(level(member), Some(PermissionLevel::ViewOnly));
    }

    #[test]
    fn test_assignee_and_member_fallbacks() {
        let lead = AccessFacts {
            assignee: Some(AssigneeRole::Lead),
            ..facts(Some(TeamRole::Member))
        };
        assert_eq!(level(lead), Some(PermissionLevel::EditAll));

        let manager = AccessFacts {
            assignee: Some(AssigneeRole::Manager),
            ..facts(Some(TeamRole::Guest))
        };
        assert_eq!(level(manager), Some(PermissionLevel::EditAll));

        let contributor = AccessFacts {
            assignee: Some(AssigneeRole::Contributor),
            ..facts(Some(TeamRole::Member))
        };
        assert_eq!(level(contributor), Some(PermissionLevel::EditBasic));

        let member = AccessFacts {
            project_member: true,
            ..facts(Some(TeamRole::Member))
        };
        assert_eq!(level(member), Some(PermissionLevel::EditBasic));
        assert_eq!(level(facts(Some(TeamRole::Member))), Some(PermissionLevel::ViewOnly));
    }

    #[test]
    fn test_capabilities_by_level() {
        assert_eq!(PermissionLevel::ViewOnly.capabilities(), Capabilities::default());

        let basic = PermissionLevel::EditBasic.capabilities();
        assert!(basic.edit_name && basic.edit_dates && basic.assign_tasks);
        assert!(!basic.manage_members && !basic.delete_project);

        let all = PermissionLevel::EditAll.capabilities();
        assert!(all.manage_members);
        assert!(!all.transfer_project && !all.delete_project);

        let admin = PermissionLevel::Admin.capabilities();
        assert!(admin.transfer_project && admin.delete_project && admin.manage_members);
    }

    #[test]
    fn test_stored_level_for_assignees() {
        assert_eq!(level_for_assignee(AssigneeRole::Lead), PermissionLevel::Admin);
        assert_eq!(level_for_assignee(AssigneeRole::Manager), PermissionLevel::EditAll);
        assert_eq!(
            level_for_assignee(AssigneeRole::Contributor),
            PermissionLevel::EditBasic
        );
    }

    #[test]
    fn test_participation() {
        assert!(is_participant(Some(TeamRole::Admin), false));
        assert!(is_participant(Some(TeamRole::Member), true));
        assert!(!is_participant(Some(TeamRole::Member), false));
        assert!(!is_participant(None, true));
    }

    #[test]
    fn test_team_settings_gate_members() {
        let closed = TeamSettings::default();
        let open = TeamSettings::from_stored(&json!({
            "permissions": {"members_can_create_projects": true, "members_can_invite": true}
        }));

        assert!(can_create_project(TeamRole::Admin, &closed));
        assert!(!can_create_project(TeamRole::Member, &closed));
        assert!(can_create_project(TeamRole::Member, &open));
        assert!(!can_create_project(TeamRole::Guest, &open));

        assert!(can_invite(TeamRole::Owner, &closed));
        assert!(!can_invite(TeamRole::Member, &closed));
        assert!(can_invite(TeamRole::Member, &open));
        assert!(!can_invite(TeamRole::Guest, &open));
    }

    #[test]
    fn test_role_change_rules() {
        use TeamRole::*;
        assert!(check_role_change(Owner, Member, Admin, false).is_ok());
        assert!(check_role_change(Owner, Admin, Member, false).is_ok());
        assert!(check_role_change(Admin, Member, Guest, false).is_ok());

        assert!(matches!(
            check_role_change(Member, Guest, Member, false),
            Err(ApiError::Forbidden(_))
        ));
        assert!(matches!(
            check_role_change(Owner, Owner, Admin, true),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            check_role_change(Admin, Member, Owner, false),
            Err(ApiError::Forbidden(_))
        ));
        assert!(check_role_change(Admin, Admin, Member, false).is_err());
        assert!(matches!(
            check_role_change(Admin, Admin, Guest, true),
            Err(ApiError::Forbidden(_))
        ));
        assert!(check_role_change(Admin, Owner, Member, false).is_err());
        assert!(check_role_change(Owner, Member, Owner, false).is_err());
    }

    #[test]
    fn test_removal_and_leave_rules() {
        use TeamRole::*;
        assert!(check_member_removal(Owner, Admin, false).is_ok());
        assert!(check_member_removal(Admin, Member, false).is_ok());
        assert!(check_member_removal(Owner, Owner, true).is_err());
        assert!(check_member_removal(Admin, Owner, false).is_err());
        assert!(check_member_removal(Admin, Admin, false).is_err());
        assert!(check_member_removal(Member, Guest, false).is_err());

        assert!(check_leave(Owner).is_err());
        assert!(check_leave(Admin).is_ok());
        assert!(check_leave(Guest).is_ok());
    }
}
