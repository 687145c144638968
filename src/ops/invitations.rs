//! Invitation lifecycle
//!
//! Pending -> Accepted | Rejected | Expired. Expiry is applied lazily: the
//! first operation that touches a stale pending invitation persists the
//! Expired status and rewrites the related notifications before failing.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::accounts::validated_email;
use super::activity::record;
use super::team_member;
use crate::domain::access::can_invite;
use crate::domain::{ActionType, InvitationStatus, NotificationStatus, NotificationType, TeamRole};
use crate::error::{ApiError, ApiResult};
use crate::store::invitations::{self as store, Invitation, NewInvitation};
use crate::store::notifications::{self as notification_store, NewNotification};
use crate::store::teams as team_store;
use crate::store::users::{self, User};

pub const EXPIRED_MESSAGE: &str = "This invitation has expired";

#[derive(Debug, Deserialize)]
pub struct InviteInput {
    pub email: Option<String>,
    pub role: Option<TeamRole>,
}

/// A stored invitation plus what the caller needs to compose the email.
#[derive(Debug)]
pub struct CreatedInvitation {
    pub invitation: Invitation,
    pub inviter_name: String,
    pub user_exists: bool,
}

pub fn invite(
    conn: &mut Connection,
    user_id: &str,
    team_id: &str,
    input: InviteInput,
    now: DateTime<Utc>,
    ttl_days: i64,
) -> ApiResult<CreatedInvitation> {
    let ctx = team_member(conn, team_id, user_id)?;
    if !can_invite(ctx.role, &ctx.settings()) {
        return Err(ApiError::forbidden("Insufficient permissions to invite members"));
    }

    let email = validated_email("email", input.email.as_deref())?;
    let role = input.role.unwrap_or(TeamRole::Member);
    if role == TeamRole::Owner {
        return Err(ApiError::field("role", "The Owner role cannot be granted by invitation."));
    }

    if team_store::email_is_member(conn, team_id, &email)? {
        return Err(ApiError::bad_request("User is already a member of this team"));
    }
    if store::live_pending(conn, team_id, &email, now)?.is_some() {
        return Err(ApiError::bad_request(
            "An active invitation already exists for this email",
        ));
    }

    let inviter = users::get(conn, user_id)?.ok_or(ApiError::Unauthorized)?;
    let inviter_name = inviter.display_name();
    let invitee = users::find_by_email(conn, &email)?;
    let token = Uuid::new_v4().to_string();

    let tx = conn.transaction()?;
    let invitation = store::insert(
        &tx,
        &NewInvitation {
            email: &email,
            team_id,
            invited_by: user_id,
            token: &token,
            role,
            created_at: now,
            expires_at: now + Duration::days(ttl_days),
        },
    )?;

    if let Some(invitee) = &invitee {
        let action_url = format!("/invitation/accept/{}", invitation.token);
        notification_store::insert(
            &tx,
            &NewNotification {
                user_id: &invitee.id,
                kind: NotificationType::Invitation,
                status: NotificationStatus::Unread,
                title: "Team Invitation",
                message: &format!("{} invited you to join {}", inviter_name, ctx.team.name),
                related_id: Some(&invitation.id),
                action_url: Some(&action_url),
            },
        )?;
    }
    notification_store::insert(
        &tx,
        &NewNotification {
            user_id,
            kind: NotificationType::Invitation,
            status: NotificationStatus::Unread,
            title: "Invitation Sent",
            message: &format!("You invited {} to join {}", email, ctx.team.name),
            related_id: Some(&invitation.id),
            action_url: None,
        },
    )?;
    tx.commit()?;

    info!("Invitation to {} for team {} created by {}", email, team_id, user_id);
    Ok(CreatedInvitation {
        invitation,
        inviter_name,
        user_exists: invitee.is_some(),
    })
}

/// Rewrite the invitee's and the inviter's notification for this invitation
/// to reflect its final status. `actor` names whoever triggered the change.
pub fn sync_notifications(
    conn: &Connection,
    invitation: &Invitation,
    actor: Option<&User>,
) -> ApiResult<()> {
    let team = &invitation.team_name;
    let (invitee_title, invitee_message, inviter_title, inviter_message) = match invitation.status
    {
        InvitationStatus::Accepted | InvitationStatus::Rejected => {
            let accepted = invitation.status == InvitationStatus::Accepted;
            let who = actor
                .map(User::display_name)
                .unwrap_or_else(|| invitation.email.clone());
            if accepted {
                (
                    "🎉 Invitation Accepted",
                    format!("You've successfully joined {}", team),
                    "✅ Invitation Accepted",
                    format!("{} accepted your invitation to join {}", who, team),
                )
            } else {
                (
                    "❌ Invitation Declined",
                    format!("You've declined the invitation to join {}", team),
                    "❌ Invitation Declined",
                    format!("{} declined your invitation to join {}", who, team),
                )
            }
        }
        InvitationStatus::Expired => (
            "⏰ Invitation Expired",
            format!("The invitation to join {} has expired", team),
            "⏰ Invitation Expired",
            format!("Your invitation to {} for {} has expired", invitation.email, team),
        ),
        InvitationStatus::Pending => return Ok(()),
    };

    if let Some(invitee) = users::find_by_email(conn, &invitation.email)? {
        notification_store::upsert(
            conn,
            &NewNotification {
                user_id: &invitee.id,
                kind: NotificationType::Invitation,
                status: NotificationStatus::Read,
                title: invitee_title,
                message: &invitee_message,
                related_id: Some(&invitation.id),
                action_url: None,
            },
        )?;
    }

    let team_url = format!("/team/{}", invitation.team);
    notification_store::upsert(
        conn,
        &NewNotification {
            user_id: &invitation.invited_by,
            kind: NotificationType::Invitation,
            status: NotificationStatus::Read,
            title: inviter_title,
            message: &inviter_message,
            related_id: Some(&invitation.id),
            action_url: Some(&team_url),
        },
    )?;
    Ok(())
}

fn transition(
    conn: &Connection,
    invitation: &mut Invitation,
    status: InvitationStatus,
    actor: Option<&User>,
) -> ApiResult<()> {
    store::set_status(conn, &invitation.id, status)?;
    invitation.status = status;
    sync_notifications(conn, invitation, actor)
}

/// Persist the Expired status if a pending invitation is past its deadline.
/// Returns whether it expired.
fn expire_if_stale(
    conn: &Connection,
    invitation: &mut Invitation,
    now: DateTime<Utc>,
) -> ApiResult<bool> {
    if invitation.status != InvitationStatus::Pending || !invitation.is_expired(now) {
        return Ok(false);
    }
    transition(conn, invitation, InvitationStatus::Expired, None)?;
    info!("Invitation {} to {} expired", invitation.id, invitation.email);
    Ok(true)
}

fn pending_by_token(conn: &Connection, token: &str) -> ApiResult<Invitation> {
    store::by_token(conn, token)?
        .filter(|i| i.status == InvitationStatus::Pending)
        .ok_or(ApiError::NotFound("Invitation"))
}

fn addressed_to(invitation: &Invitation, user: &User) -> ApiResult<()> {
    if !invitation.email.eq_ignore_ascii_case(&user.email) {
        return Err(ApiError::forbidden("This invitation is not for your account"));
    }
    Ok(())
}

/// Add the user to the invitation's team. An existing active membership is
/// left untouched.
fn join_team(conn: &Connection, invitation: &Invitation, user: &User) -> ApiResult<bool> {
    let active = team_store::active_role(conn, &invitation.team, &user.id)?.is_some();
    if !active {
        team_store::add_member(conn, &invitation.team, &user.id, invitation.role)?;
        record(
            conn,
            &user.id,
            Some(&invitation.team),
            None,
            ActionType::TeamJoined,
            format!("Joined {} via invitation", invitation.team_name),
            json!({ "invitation_id": invitation.id, "role": invitation.role.code() }),
        )?;
    }
    Ok(!active)
}

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub message: &'static str,
    pub team_id: String,
    pub team_name: String,
}

pub fn accept(conn: &mut Connection, user: &User, token: &str, now: DateTime<Utc>) -> ApiResult<Accepted> {
    let mut invitation = pending_by_token(conn, token)?;
    addressed_to(&invitation, user)?;
    if expire_if_stale(conn, &mut invitation, now)? {
        return Err(ApiError::bad_request(EXPIRED_MESSAGE));
    }

    let tx = conn.transaction()?;
    join_team(&tx, &invitation, user)?;
    transition(&tx, &mut invitation, InvitationStatus::Accepted, Some(user))?;
    tx.commit()?;

    info!("{} accepted invitation to team {}", user.email, invitation.team);
    Ok(Accepted {
        message: "Successfully joined the team",
        team_id: invitation.team,
        team_name: invitation.team_name,
    })
}

pub fn reject(conn: &mut Connection, user: &User, token: &str, now: DateTime<Utc>) -> ApiResult<()> {
    let mut invitation = pending_by_token(conn, token)?;
    addressed_to(&invitation, user)?;
    if expire_if_stale(conn, &mut invitation, now)? {
        return Err(ApiError::bad_request(EXPIRED_MESSAGE));
    }

    let tx = conn.transaction()?;
    transition(&tx, &mut invitation, InvitationStatus::Rejected, Some(user))?;
    tx.commit()?;
    info!("{} declined invitation to team {}", user.email, invitation.team);
    Ok(())
}

/// Unexpired pending invitations addressed to `email`; stale ones are
/// expired on the way.
pub fn pending_for_email(
    conn: &Connection,
    email: &str,
    now: DateTime<Utc>,
) -> ApiResult<Vec<Invitation>> {
    let mut live = Vec::new();
    for mut invitation in store::pending_for_email(conn, email)? {
        if !expire_if_stale(conn, &mut invitation, now)? {
            live.push(invitation);
        }
    }
    Ok(live)
}

#[derive(Debug, Serialize)]
pub struct PendingCheck {
    pub pending_invitations: Vec<Invitation>,
    pub count: usize,
}

pub fn check_pending(conn: &Connection, email: Option<&str>, now: DateTime<Utc>) -> ApiResult<PendingCheck> {
    let email = email
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::bad_request("Email parameter required"))?;
    let pending_invitations = pending_for_email(conn, email, now)?;
    Ok(PendingCheck {
        count: pending_invitations.len(),
        pending_invitations,
    })
}

/// Details for the public landing page of an invitation link.
pub fn public_details(conn: &Connection, token: &str, now: DateTime<Utc>) -> ApiResult<Invitation> {
    let mut invitation = store::by_token(conn, token)?.ok_or(ApiError::NotFound("Invitation"))?;
    if invitation.status != InvitationStatus::Pending {
        return Err(ApiError::bad_request(
            "This invitation has already been processed",
        ));
    }
    if expire_if_stale(conn, &mut invitation, now)? {
        return Err(ApiError::bad_request(EXPIRED_MESSAGE));
    }
    Ok(invitation)
}

/// Result of following an accept link without a session.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum PublicAccept {
    AlreadyProcessed {
        success: bool,
        message: String,
        current_status: InvitationStatus,
        team_name: String,
    },
    Expired {
        success: bool,
        message: &'static str,
        action_required: &'static str,
    },
    Register {
        action_required: &'static str,
        message: &'static str,
        invitation_email: String,
        team_name: String,
        invited_by_name: String,
        token: String,
    },
    AlreadyMember {
        success: bool,
        message: &'static str,
        team_id: String,
        team_name: String,
        already_member: bool,
    },
    Joined {
        success: bool,
        message: &'static str,
        team_id: String,
        team_name: String,
        user_name: String,
    },
}

impl PublicAccept {
    pub fn is_failure(&self) -> bool {
        matches!(self, PublicAccept::Expired { .. })
    }
}

pub fn public_accept(conn: &mut Connection, token: &str, now: DateTime<Utc>) -> ApiResult<PublicAccept> {
    let mut invitation = store::by_token(conn, token)?.ok_or(ApiError::NotFound("Invitation"))?;

    if invitation.status != InvitationStatus::Pending {
        return Ok(PublicAccept::AlreadyProcessed {
            success: true,
            message: format!(
                "This invitation has already been {}",
                invitation.status.label().to_lowercase()
            ),
            current_status: invitation.status,
            team_name: invitation.team_name,
        });
    }
    if expire_if_stale(conn, &mut invitation, now)? {
        return Ok(PublicAccept::Expired {
            success: false,
            message: EXPIRED_MESSAGE,
            action_required: "expired",
        });
    }

    let Some(user) = users::find_by_email(conn, &invitation.email)? else {
        return Ok(PublicAccept::Register {
            action_required: "register",
            message: "Please create an account to accept this invitation",
            invited_by_name: invitation.inviter_display().to_string(),
            invitation_email: invitation.email,
            team_name: invitation.team_name,
            token: token.to_string(),
        });
    };

    let tx = conn.transaction()?;
    let joined = join_team(&tx, &invitation, &user)?;
    transition(&tx, &mut invitation, InvitationStatus::Accepted, Some(&user))?;
    tx.commit()?;

    if !joined {
        return Ok(PublicAccept::AlreadyMember {
            success: true,
            message: "You are already a member of this team!",
            team_id: invitation.team,
            team_name: invitation.team_name,
            already_member: true,
        });
    }
    info!("{} joined team {} from an invitation link", user.email, invitation.team);
    Ok(PublicAccept::Joined {
        success: true,
        message: "Successfully joined the team!",
        team_id: invitation.team,
        team_name: invitation.team_name,
        user_name: user.full_name(),
    })
}

pub fn public_reject(conn: &mut Connection, token: &str, now: DateTime<Utc>) -> ApiResult<()> {
    let mut invitation = pending_by_token(conn, token)?;
    if expire_if_stale(conn, &mut invitation, now)? {
        return Err(ApiError::bad_request(EXPIRED_MESSAGE));
    }
    let user = users::find_by_email(conn, &invitation.email)?;

    let tx = conn.transaction()?;
    transition(&tx, &mut invitation, InvitationStatus::Rejected, user.as_ref())?;
    tx.commit()?;
    Ok(())
}

/// Accepting every pending invitation at once was retired in favour of
/// explicit per-invitation acceptance.
pub fn accept_all_pending() -> ApiResult<()> {
    warn!("Rejected call to the retired bulk invitation endpoint");
    Err(ApiError::Gone(
        "This endpoint is deprecated. Please accept invitations individually through the notification system."
            .to_string(),
    ))
}
