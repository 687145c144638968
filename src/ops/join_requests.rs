use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::accounts::validated_email;
use super::activity::record;
use super::notifications::{notify_team_managers, notify_user, Broadcast};
use super::{load_team, optional_text, team_manager};
use crate::domain::{ActionType, JoinRequestStatus, NotificationType};
use crate::error::{ApiError, ApiResult};
use crate::store::join_requests::{self as store, JoinRequest};
use crate::store::teams as team_store;
use crate::store::users;

#[derive(Debug, Deserialize)]
pub struct JoinRequestInput {
    pub email: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JoinRequestCreated {
    pub message: &'static str,
    pub request_id: String,
    pub user_exists: bool,
}

/// Anyone may ask to join; team managers are told about it.
pub fn request_to_join(
    conn: &mut Connection,
    team_id: &str,
    input: JoinRequestInput,
) -> ApiResult<JoinRequestCreated> {
    let team = load_team(conn, team_id)?;
    let email = validated_email("email", input.email.as_deref())?;
    let user = users::find_by_email(conn, &email)?;

    if let Some(user) = &user {
        if team_store::active_role(conn, team_id, &user.id)?.is_some() {
            return Err(ApiError::bad_request("You are already a member of this team"));
        }
    }
    if store::pending_exists(conn, team_id, &email)? {
        return Err(ApiError::bad_request(
            "You already have a pending request to join this team",
        ));
    }

    let message = optional_text(input.message);
    let tx = conn.transaction()?;
    let request = store::insert(
        &tx,
        team_id,
        &email,
        user.as_ref().map(|u| u.id.as_str()),
        message.as_deref(),
    )?;
    let action_url = format!("/team/{}/join-requests", team.id);
    notify_team_managers(
        &tx,
        team_id,
        "",
        &Broadcast {
            kind: NotificationType::JoinRequest,
            title: "Join Request",
            message: &format!("{} wants to join {}", email, team.name),
            related_id: Some(&request.id),
            action_url: Some(&action_url),
        },
    )?;
    tx.commit()?;

    info!("Join request from {} for team {}", email, team_id);
    Ok(JoinRequestCreated {
        message: "Join request sent successfully",
        request_id: request.id,
        user_exists: user.is_some(),
    })
}

pub fn list_pending(conn: &Connection, user_id: &str, team_id: &str) -> ApiResult<Vec<JoinRequest>> {
    team_manager(conn, team_id, user_id)?;
    Ok(store::pending_for_team(conn, team_id)?)
}

fn pending_request(conn: &Connection, team_id: &str, request_id: &str) -> ApiResult<JoinRequest> {
    let request = store::get(conn, team_id, request_id)?.ok_or(ApiError::NotFound("Join request"))?;
    if request.status != JoinRequestStatus::Pending {
        return Err(ApiError::bad_request("This request has already been processed"));
    }
    Ok(request)
}

/// Admit the requester with the team's configured default role.
pub fn approve(
    conn: &mut Connection,
    user_id: &str,
    team_id: &str,
    request_id: &str,
) -> ApiResult<()> {
    let ctx = team_manager(conn, team_id, user_id)?;
    let request = pending_request(conn, team_id, request_id)?;
    let requester = users::find_by_email(conn, &request.email)?
        .ok_or_else(|| ApiError::bad_request("User not found"))?;
    let current = team_store::membership(conn, team_id, &requester.id)?;
    if current.is_some_and(|m| m.is_active) {
        // Joined some other way since asking; their role stands.
        store::mark_processed(conn, &request.id, JoinRequestStatus::Approved, user_id)?;
        info!("Join request {} closed, requester already a member", request.id);
        return Ok(());
    }
    let role = ctx.settings().default_role();

    let tx = conn.transaction()?;
    team_store::add_member(&tx, team_id, &requester.id, role)?;
    store::mark_processed(&tx, &request.id, JoinRequestStatus::Approved, user_id)?;
    record(
        &tx,
        &requester.id,
        Some(team_id),
        None,
        ActionType::TeamJoined,
        format!("Joined {} after a join request", ctx.team.name),
        json!({ "request_id": request.id, "approved_by": user_id, "role": role.code() }),
    )?;
    let action_url = format!("/team/{}", team_id);
    notify_user(
        &tx,
        &requester.id,
        &Broadcast {
            kind: NotificationType::JoinRequest,
            title: "Join Request Approved",
            message: &format!("Your request to join {} has been approved", ctx.team.name),
            related_id: Some(&request.id),
            action_url: Some(&action_url),
        },
    )?;
    tx.commit()?;

    info!("Join request {} approved by {}", request.id, user_id);
    Ok(())
}

pub fn reject(
    conn: &mut Connection,
    user_id: &str,
    team_id: &str,
    request_id: &str,
) -> ApiResult<()> {
    let ctx = team_manager(conn, team_id, user_id)?;
    let request = pending_request(conn, team_id, request_id)?;
    let requester = users::find_by_email(conn, &request.email)?;

    let tx = conn.transaction()?;
    store::mark_processed(&tx, &request.id, JoinRequestStatus::Rejected, user_id)?;
    if let Some(requester) = requester {
        notify_user(
            &tx,
            &requester.id,
            &Broadcast {
                kind: NotificationType::JoinRequest,
                title: "Join Request Declined",
                message: &format!("Your request to join {} has been declined", ctx.team.name),
                related_id: Some(&request.id),
                action_url: None,
            },
        )?;
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TeamRole;
    use crate::ops::testutil;
    use crate::store::notifications as notes;

    fn ask(conn: &mut Connection, team_id: &str, email: &str) -> ApiResult<JoinRequestCreated> {
        request_to_join(
            conn,
            team_id,
            JoinRequestInput {
                email: Some(email.to_string()),
                message: Some("let me in".into()),
            },
        )
    }

    #[test]
    fn test_request_notifies_managers_only() {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let admin = testutil::user(&conn, "admin");
        let member = testutil::user(&conn, "member");
        let team = testutil::team(&conn, &owner);
        testutil::join(&conn, &team, &admin, TeamRole::Admin);
        testutil::join(&conn, &team, &member, TeamRole::Member);

        let created = ask(&mut conn, &team.id, "hopeful@example.com").unwrap();
        assert!(!created.user_exists);

        for manager in [&owner, &admin] {
            let inbox = notes::for_related(&conn, &manager.id, &created.request_id).unwrap();
            assert_eq!(inbox.len(), 1);
            assert_eq!(inbox[0].message, "hopeful@example.com wants to join Rocket");
            assert_eq!(
                inbox[0].action_url.as_deref(),
                Some(format!("/team/{}/join-requests", team.id).as_str())
            );
        }
        assert!(notes::for_related(&conn, &member.id, &created.request_id)
            .unwrap()
            .is_empty());

        assert!(matches!(
            ask(&mut conn, &team.id, "HOPEFUL@example.com"),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            ask(&mut conn, &team.id, "member@example.com"),
            Err(ApiError::BadRequest(m)) if m == "You are already a member of this team"
        ));
    }

    #[test]
    fn test_approve_uses_default_role() {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let hopeful = testutil::user(&conn, "hopeful");
        let team = testutil::team(&conn, &owner);
        team_store::set_settings(&conn, &team.id, &json!({ "security": { "default_role": 4 } }))
            .unwrap();

        let created = ask(&mut conn, &team.id, "hopeful@example.com").unwrap();
        assert!(created.user_exists);
        assert_eq!(list_pending(&conn, &owner.id, &team.id).unwrap().len(), 1);
        assert!(matches!(
            list_pending(&conn, &hopeful.id, &team.id),
            Err(ApiError::Forbidden(_))
        ));

        approve(&mut conn, &owner.id, &team.id, &created.request_id).unwrap();
        assert_eq!(
            team_store::active_role(&conn, &team.id, &hopeful.id).unwrap(),
            Some(TeamRole::Guest)
        );
        let processed = store::get(&conn, &team.id, &created.request_id).unwrap().unwrap();
        assert_eq!(processed.status, JoinRequestStatus::Approved);
        assert_eq!(processed.processed_by.as_deref(), Some(owner.id.as_str()));
        assert!(processed.processed_at.is_some());

        assert!(matches!(
            approve(&mut conn, &owner.id, &team.id, &created.request_id),
            Err(ApiError::BadRequest(m)) if m == "This request has already been processed"
        ));
    }

    #[test]
    fn test_approve_keeps_role_of_existing_member() {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let bob = testutil::user(&conn, "bob");
        let team = testutil::team(&conn, &owner);

        let created = ask(&mut conn, &team.id, "bob@example.com").unwrap();
        testutil::join(&conn, &team, &bob, TeamRole::Admin);

        approve(&mut conn, &owner.id, &team.id, &created.request_id).unwrap();
        assert_eq!(
            team_store::active_role(&conn, &team.id, &bob.id).unwrap(),
            Some(TeamRole::Admin)
        );
        let processed = store::get(&conn, &team.id, &created.request_id).unwrap().unwrap();
        assert_eq!(processed.status, JoinRequestStatus::Approved);
        assert!(notes::for_related(&conn, &bob.id, &created.request_id).unwrap().is_empty());
    }

    #[test]
    fn test_approve_requires_registered_user_and_reject_records() {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let team = testutil::team(&conn, &owner);

        let ghost = ask(&mut conn, &team.id, "ghost@example.com").unwrap();
        assert!(matches!(
            approve(&mut conn, &owner.id, &team.id, &ghost.request_id),
            Err(ApiError::BadRequest(m)) if m == "User not found"
        ));

        reject(&mut conn, &owner.id, &team.id, &ghost.request_id).unwrap();
        let processed = store::get(&conn, &team.id, &ghost.request_id).unwrap().unwrap();
        assert_eq!(processed.status, JoinRequestStatus::Rejected);
        assert!(list_pending(&conn, &owner.id, &team.id).unwrap().is_empty());
    }
}
