use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;

use super::{project_participant, team_member};
use crate::domain::ActionType;
use crate::error::{ApiError, ApiResult};
use crate::store::activity::{self as store, ActivityEntry, ActivityQuery, NewActivity};
use crate::store::teams as team_store;
use crate::utils::time_ago_short;

pub const DEFAULT_DAYS: i64 = 30;
pub const DEFAULT_RECENT_LIMIT: i64 = 10;

#[derive(Debug, Serialize)]
pub struct ActivityView {
    #[serde(flatten)]
    pub entry: ActivityEntry,
    pub time_ago: String,
}

fn views(entries: Vec<ActivityEntry>) -> Vec<ActivityView> {
    let now = Utc::now();
    entries
        .into_iter()
        .map(|entry| ActivityView {
            time_ago: time_ago_short(entry.created_at, now),
            entry,
        })
        .collect()
}

pub fn record(
    conn: &Connection,
    user_id: &str,
    team_id: Option<&str>,
    project_id: Option<&str>,
    action_type: ActionType,
    description: String,
    details: Value,
) -> ApiResult<()> {
    store::insert(
        conn,
        &NewActivity {
            user_id,
            team_id,
            project_id,
            action_type,
            description,
            details,
        },
    )?;
    Ok(())
}

/// Start of a look-back window of `days`; negative counts as zero.
fn window_start(days: Option<i64>) -> ApiResult<DateTime<Utc>> {
    let days = days.unwrap_or(DEFAULT_DAYS).max(0);
    Duration::try_days(days)
        .and_then(|span| Utc::now().checked_sub_signed(span))
        .ok_or_else(|| ApiError::bad_request("days is out of range"))
}

pub fn team_activity(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    action_type: Option<ActionType>,
    days: Option<i64>,
) -> ApiResult<Vec<ActivityView>> {
    team_member(conn, team_id, user_id)?;
    let since = window_start(days)?;
    let entries = store::query(
        conn,
        &ActivityQuery {
            team_id: Some(team_id),
            action_type,
            since: Some(since),
            ..ActivityQuery::default()
        },
    )?;
    Ok(views(entries))
}

pub fn project_activity(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    days: Option<i64>,
) -> ApiResult<Vec<ActivityView>> {
    project_participant(conn, team_id, project_id, user_id)?;
    let since = window_start(days)?;
    let entries = store::query(
        conn,
        &ActivityQuery {
            project_id: Some(project_id),
            since: Some(since),
            ..ActivityQuery::default()
        },
    )?;
    Ok(views(entries))
}

/// Latest entries across every team the caller belongs to. The path team
/// only gates access.
pub fn recent_activity(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    limit: Option<i64>,
) -> ApiResult<Vec<ActivityView>> {
    team_member(conn, team_id, user_id)?;
    let team_ids: Vec<String> = team_store::teams_for_user(conn, user_id)?
        .into_iter()
        .map(|t| t.id)
        .collect();
    let entries = store::query(
        conn,
        &ActivityQuery {
            team_ids: Some(&team_ids),
            limit: Some(limit.unwrap_or(DEFAULT_RECENT_LIMIT)),
            ..ActivityQuery::default()
        },
    )?;
    Ok(views(entries))
}
