use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use crate::domain::{NotificationStatus, NotificationType};
use crate::error::{ApiError, ApiResult};
use crate::store::notifications::{self as store, NewNotification, Notification};
use crate::store::{projects as project_store, teams as team_store};
use crate::utils::time_ago;

const LIST_LIMIT: i64 = 200;

#[derive(Debug, Serialize)]
pub struct NotificationView {
    #[serde(flatten)]
    pub notification: Notification,
    pub time_ago: String,
}

pub fn list(conn: &Connection, user_id: &str) -> ApiResult<Vec<NotificationView>> {
    let now = Utc::now();
    Ok(store::list_for_user(conn, user_id, LIST_LIMIT)?
        .into_iter()
        .map(|notification| NotificationView {
            time_ago: time_ago(notification.created_at, now),
            notification,
        })
        .collect())
}

pub fn unread_count(conn: &Connection, user_id: &str) -> ApiResult<i64> {
    Ok(store::unread_count(conn, user_id)?)
}

/// Someone else's notification is reported as missing.
fn owned(conn: &Connection, user_id: &str, id: &str) -> ApiResult<Notification> {
    store::get(conn, id)?
        .filter(|n| n.user_id == user_id)
        .ok_or(ApiError::NotFound("Notification"))
}

pub fn mark_read(conn: &Connection, user_id: &str, id: &str) -> ApiResult<()> {
    let notification = owned(conn, user_id, id)?;
    store::set_status(conn, &notification.id, NotificationStatus::Read)?;
    Ok(())
}

pub fn mark_all_read(conn: &Connection, user_id: &str) -> ApiResult<usize> {
    Ok(store::mark_all_read(conn, user_id)?)
}

pub fn delete(conn: &Connection, user_id: &str, id: &str) -> ApiResult<()> {
    let notification = owned(conn, user_id, id)?;
    store::delete(conn, &notification.id)?;
    Ok(())
}

/// Content of a fan-out message.
#[derive(Debug, Clone, Copy)]
pub struct Broadcast<'a> {
    pub kind: NotificationType,
    pub title: &'a str,
    pub message: &'a str,
    pub related_id: Option<&'a str>,
    pub action_url: Option<&'a str>,
}

impl<'a> Broadcast<'a> {
    pub fn message(title: &'a str, message: &'a str) -> Self {
        Self {
            kind: NotificationType::Message,
            title,
            message,
            related_id: None,
            action_url: None,
        }
    }
}

fn deliver(conn: &Connection, recipients: &[String], sender_id: &str, b: &Broadcast<'_>) -> ApiResult<usize> {
    let mut sent = 0;
    for user_id in recipients.iter().filter(|id| id.as_str() != sender_id) {
        store::insert(
            conn,
            &NewNotification {
                user_id,
                kind: b.kind,
                status: NotificationStatus::Unread,
                title: b.title,
                message: b.message,
                related_id: b.related_id,
                action_url: b.action_url,
            },
        )?;
        sent += 1;
    }
    debug!("Delivered '{}' to {} recipients", b.title, sent);
    Ok(sent)
}

pub fn notify_user(conn: &Connection, user_id: &str, b: &Broadcast<'_>) -> ApiResult<()> {
    deliver(conn, &[user_id.to_string()], "", b)?;
    Ok(())
}

/// Every active team member except the sender.
pub fn notify_team(conn: &Connection, team_id: &str, sender_id: &str, b: &Broadcast<'_>) -> ApiResult<usize> {
    let recipients = team_store::member_user_ids(conn, team_id, false)?;
    deliver(conn, &recipients, sender_id, b)
}

/// Active Owner/Admin members, excluding the sender.
pub fn notify_team_managers(
    conn: &Connection,
    team_id: &str,
    sender_id: &str,
    b: &Broadcast<'_>,
) -> ApiResult<usize> {
    let recipients = team_store::member_user_ids(conn, team_id, true)?;
    deliver(conn, &recipients, sender_id, b)
}

/// Every project member except the sender.
pub fn notify_project(
    conn: &Connection,
    project_id: &str,
    sender_id: &str,
    b: &Broadcast<'_>,
) -> ApiResult<usize> {
    let recipients = project_store::member_user_ids(conn, project_id)?;
    deliver(conn, &recipients, sender_id, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TeamRole;
    use crate::ops::testutil;

    #[test]
    fn test_fan_out_skips_sender_and_owner_only_access() {
        let conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let member = testutil::user(&conn, "member");
        let team = testutil::team(&conn, &owner);
        testutil::join(&conn, &team, &member, TeamRole::Member);

        let sent = notify_team(&conn, &team.id, &owner.id, &Broadcast::message("Hi", "Hello team")).unwrap();
        assert_eq!(sent, 1);
        assert!(list(&conn, &owner.id).unwrap().is_empty());

        let inbox = list(&conn, &member.id).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].time_ago, "Just now");
        assert_eq!(unread_count(&conn, &member.id).unwrap(), 1);

        let id = inbox[0].notification.id.clone();
        assert!(matches!(mark_read(&conn, &owner.id, &id), Err(ApiError::NotFound(_))));
        assert!(matches!(delete(&conn, &owner.id, &id), Err(ApiError::NotFound(_))));

        mark_read(&conn, &member.id, &id).unwrap();
        assert_eq!(unread_count(&conn, &member.id).unwrap(), 0);
        delete(&conn, &member.id, &id).unwrap();
        assert!(list(&conn, &member.id).unwrap().is_empty());
    }

    #[test]
    fn test_mark_all_read() {
        let conn = testutil::conn();
        let user = testutil::user(&conn, "reader");
        for _ in 0..3 {
            notify_user(&conn, &user.id, &Broadcast::message("t", "m")).unwrap();
        }
        assert_eq!(mark_all_read(&conn, &user.id).unwrap(), 3);
        assert_eq!(unread_count(&conn, &user.id).unwrap(), 0);
    }
}
