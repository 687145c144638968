use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Deserialize;
use serde_json::{json, Map};

use super::activity::record;
use super::notifications::{notify_project, notify_user, Broadcast};
use super::{optional_text, project_participant, required_text, ProjectContext};
use crate::domain::{
    ActionType, NotificationType, ProjectMemberRole, SubtaskStatus, TaskPriority, TaskStatus,
};
use crate::error::{ApiError, ApiResult};
use crate::store::projects as project_store;
use crate::store::tasks::{
    self as store, Subtask, SubtaskFields, Task, TaskComment, TaskFields, TaskFilter,
};
use crate::store::teams as team_store;
use crate::store::users;
use crate::utils::dates::{deserialize_patch, deserialize_patch_ts};

#[derive(Debug, Default, Deserialize)]
pub struct TaskInput {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_patch")]
    pub description: Option<Option<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    #[serde(default, deserialize_with = "deserialize_patch_ts")]
    pub start_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "deserialize_patch_ts")]
    pub end_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "deserialize_patch_ts")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "deserialize_patch")]
    pub assignee: Option<Option<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskQuery {
    pub status: Option<String>,
    pub assignee: Option<String>,
}

/// Done stamps `completed_at` once; any other status clears it.
fn completion<S: PartialEq>(
    status: S,
    done: S,
    current: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if status == done {
        current.or(Some(now))
    } else {
        None
    }
}

/// Assignees must be active members of the project's team.
fn check_assignee(conn: &Connection, ctx: &ProjectContext, assignee: Option<&str>) -> ApiResult<()> {
    if let Some(user_id) = assignee {
        if team_store::active_role(conn, &ctx.project.team, user_id)?.is_none() {
            return Err(ApiError::field(
                "assignee",
                "Assignee must be an active member of this team.",
            ));
        }
    }
    Ok(())
}

/// Creator, project manager or team manager.
fn can_delete(conn: &Connection, ctx: &ProjectContext, created_by: &str, user_id: &str) -> ApiResult<bool> {
    if created_by == user_id || ctx.team_role().is_manager() {
        return Ok(true);
    }
    Ok(project_store::member_role(conn, &ctx.project.id, user_id)? == Some(ProjectMemberRole::Manager))
}

fn notify_assignee(
    conn: &Connection,
    ctx: &ProjectContext,
    task: &Task,
    actor_id: &str,
) -> ApiResult<()> {
    let Some(assignee) = task.assignee.as_deref().filter(|a| *a != actor_id) else {
        return Ok(());
    };
    let actor = users::get(conn, actor_id)?.ok_or(ApiError::Unauthorized)?;
    let action_url = format!("/team/{}/project/{}", ctx.project.team, ctx.project.id);
    notify_user(
        conn,
        assignee,
        &Broadcast {
            kind: NotificationType::TaskAssigned,
            title: "Task Assigned",
            message: &format!(
                "{} assigned you to '{}' in {}",
                actor.display_name(),
                task.title,
                ctx.project.name
            ),
            related_id: Some(&task.id),
            action_url: Some(&action_url),
        },
    )
}

fn load_task(conn: &Connection, ctx: &ProjectContext, task_id: &str) -> ApiResult<Task> {
    store::get_task(conn, task_id)?
        .filter(|t| t.project == ctx.project.id)
        .ok_or(ApiError::NotFound("Task"))
}

pub fn list_tasks(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    query: &TaskQuery,
) -> ApiResult<Vec<Task>> {
    project_participant(conn, team_id, project_id, user_id)?;
    let status = match query.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            TaskStatus::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("Invalid status: {}", raw)))?,
        ),
        None => None,
    };
    Ok(store::query_tasks(
        conn,
        &TaskFilter {
            project_id: Some(project_id),
            status,
            assignee: query.assignee.as_deref().filter(|a| !a.is_empty()),
            ..TaskFilter::default()
        },
    )?)
}

pub fn create_task(
    conn: &mut Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    input: TaskInput,
) -> ApiResult<Task> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let title = required_text("title", input.title.as_deref())?;
    let assignee = input.assignee.flatten().filter(|a| !a.is_empty());
    check_assignee(conn, &ctx, assignee.as_deref())?;

    let status = input.status.unwrap_or(TaskStatus::Backlog);
    let fields = TaskFields {
        title,
        description: optional_text(input.description.flatten()),
        status,
        priority: input.priority.unwrap_or(TaskPriority::Medium),
        start_date: input.start_date.flatten(),
        end_date: input.end_date.flatten(),
        due_date: input.due_date.flatten(),
        assignee,
        completed_at: completion(status, TaskStatus::Done, None, Utc::now()),
    };

    let tx = conn.transaction()?;
    let task = store::insert_task(&tx, project_id, user_id, &fields)?;
    record(
        &tx,
        user_id,
        Some(&ctx.project.team),
        Some(project_id),
        ActionType::TaskCreated,
        format!("Created task '{}'", task.title),
        json!({ "task_id": task.id, "task_title": task.title, "status": status.code() }),
    )?;
    notify_assignee(&tx, &ctx, &task, user_id)?;
    tx.commit()?;
    Ok(task)
}

pub fn task_detail(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    task_id: &str,
) -> ApiResult<Task> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    load_task(conn, &ctx, task_id)
}

pub fn update_task(
    conn: &mut Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    task_id: &str,
    input: TaskInput,
) -> ApiResult<Task> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let task = load_task(conn, &ctx, task_id)?;
    let mut fields = TaskFields::from(&task);
    let mut changes = Map::new();

    if let Some(title) = input.title.as_deref() {
        fields.title = required_text("title", Some(title))?;
        changes.insert("title".into(), json!(fields.title));
    }
    if let Some(description) = input.description {
        fields.description = optional_text(description);
        changes.insert("description".into(), json!(fields.description));
    }
    if let Some(status) = input.status {
        fields.status = status;
        changes.insert("status".into(), json!(status.code()));
    }
    if let Some(priority) = input.priority {
        fields.priority = priority;
        changes.insert("priority".into(), json!(priority.code()));
    }
    if let Some(start) = input.start_date {
        fields.start_date = start;
        changes.insert("start_date".into(), json!(start));
    }
    if let Some(end) = input.end_date {
        fields.end_date = end;
        changes.insert("end_date".into(), json!(end));
    }
    if let Some(due) = input.due_date {
        fields.due_date = due;
        changes.insert("due_date".into(), json!(due));
    }
    let mut reassigned = false;
    if let Some(assignee) = input.assignee {
        let assignee = assignee.filter(|a| !a.is_empty());
        check_assignee(conn, &ctx, assignee.as_deref())?;
        reassigned = assignee.is_some() && assignee != task.assignee;
        fields.assignee = assignee;
        changes.insert("assignee".into(), json!(fields.assignee));
    }
    fields.completed_at = completion(fields.status, TaskStatus::Done, task.completed_at, Utc::now());

    let tx = conn.transaction()?;
    store::update_task(&tx, &task.id, &fields)?;
    let updated = load_task(&tx, &ctx, &task.id)?;
    record(
        &tx,
        user_id,
        Some(&ctx.project.team),
        Some(project_id),
        ActionType::TaskUpdated,
        format!("Updated task '{}'", updated.title),
        json!({ "task_id": updated.id, "changes": changes }),
    )?;
    if reassigned {
        notify_assignee(&tx, &ctx, &updated, user_id)?;
    }
    tx.commit()?;
    Ok(updated)
}

pub fn delete_task(
    conn: &mut Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    task_id: &str,
) -> ApiResult<()> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let task = load_task(conn, &ctx, task_id)?;
    if !can_delete(conn, &ctx, &task.created_by, user_id)? {
        return Err(ApiError::forbidden("Insufficient permissions to delete task"));
    }

    let tx = conn.transaction()?;
    store::delete_task(&tx, &task.id)?;
    record(
        &tx,
        user_id,
        Some(&ctx.project.team),
        Some(project_id),
        ActionType::TaskDeleted,
        format!("Deleted task '{}'", task.title),
        json!({ "task_id": task.id, "task_title": task.title }),
    )?;
    tx.commit()?;
    Ok(())
}

// --- Subtasks ---

#[derive(Debug, Default, Deserialize)]
pub struct SubtaskInput {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "deserialize_patch")]
    pub description: Option<Option<String>>,
    pub status: Option<SubtaskStatus>,
    #[serde(default, deserialize_with = "deserialize_patch_ts")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "deserialize_patch")]
    pub assignee: Option<Option<String>>,
}

fn load_subtask(conn: &Connection, task: &Task, subtask_id: &str) -> ApiResult<Subtask> {
    store::get_subtask(conn, &task.id, subtask_id)?.ok_or(ApiError::NotFound("Subtask"))
}

pub fn list_subtasks(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    task_id: &str,
) -> ApiResult<Vec<Subtask>> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let task = load_task(conn, &ctx, task_id)?;
    Ok(store::list_subtasks(conn, &task.id)?)
}

pub fn create_subtask(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    task_id: &str,
    input: SubtaskInput,
) -> ApiResult<Subtask> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let task = load_task(conn, &ctx, task_id)?;
    let title = required_text("title", input.title.as_deref())?;
    let assignee = input.assignee.flatten().filter(|a| !a.is_empty());
    check_assignee(conn, &ctx, assignee.as_deref())?;

    let status = input.status.unwrap_or(SubtaskStatus::Pending);
    let fields = SubtaskFields {
        title,
        description: optional_text(input.description.flatten()),
        status,
        due_date: input.due_date.flatten(),
        assignee,
        completed_at: completion(status, SubtaskStatus::Completed, None, Utc::now()),
    };
    Ok(store::insert_subtask(conn, &task.id, user_id, &fields)?)
}

pub fn subtask_detail(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    task_id: &str,
    subtask_id: &str,
) -> ApiResult<Subtask> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let task = load_task(conn, &ctx, task_id)?;
    load_subtask(conn, &task, subtask_id)
}

pub fn update_subtask(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    task_id: &str,
    subtask_id: &str,
    input: SubtaskInput,
) -> ApiResult<Subtask> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let task = load_task(conn, &ctx, task_id)?;
    let subtask = load_subtask(conn, &task, subtask_id)?;
    let mut fields = SubtaskFields::from(&subtask);

    if let Some(title) = input.title.as_deref() {
        fields.title = required_text("title", Some(title))?;
    }
    if let Some(description) = input.description {
        fields.description = optional_text(description);
    }
    if let Some(status) = input.status {
        fields.status = status;
    }
    if let Some(due) = input.due_date {
        fields.due_date = due;
    }
    if let Some(assignee) = input.assignee {
        let assignee = assignee.filter(|a| !a.is_empty());
        check_assignee(conn, &ctx, assignee.as_deref())?;
        fields.assignee = assignee;
    }
    fields.completed_at = completion(
        fields.status,
        SubtaskStatus::Completed,
        subtask.completed_at,
        Utc::now(),
    );

    store::update_subtask(conn, &subtask.id, &fields)?;
    load_subtask(conn, &task, &subtask.id)
}

pub fn delete_subtask(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    task_id: &str,
    subtask_id: &str,
) -> ApiResult<()> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let task = load_task(conn, &ctx, task_id)?;
    let subtask = load_subtask(conn, &task, subtask_id)?;
    if !can_delete(conn, &ctx, &subtask.created_by, user_id)? {
        return Err(ApiError::forbidden("Insufficient permissions to delete subtask"));
    }
    store::delete_subtask(conn, &subtask.id)?;
    Ok(())
}

// --- Comments ---

#[derive(Debug, Deserialize)]
pub struct CommentInput {
    pub content: Option<String>,
}

pub fn list_comments(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    task_id: &str,
) -> ApiResult<Vec<TaskComment>> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let task = load_task(conn, &ctx, task_id)?;
    Ok(store::list_comments(conn, &task.id)?)
}

pub fn add_comment(
    conn: &Connection,
    user_id: &str,
    team_id: &str,
    project_id: &str,
    task_id: &str,
    input: CommentInput,
) -> ApiResult<TaskComment> {
    let ctx = project_participant(conn, team_id, project_id, user_id)?;
    let task = load_task(conn, &ctx, task_id)?;
    let content = required_text("content", input.content.as_deref())?;
    let comment = store::insert_comment(conn, &task.id, user_id, &content)?;
    let author = users::get(conn, user_id)?.ok_or(ApiError::Unauthorized)?;
    let action_url = format!("/team/{}/project/{}", ctx.project.team, ctx.project.id);
    notify_project(
        conn,
        &ctx.project.id,
        user_id,
        &Broadcast {
            related_id: Some(&task.id),
            action_url: Some(&action_url),
            ..Broadcast::message(
                "New Comment",
                &format!("{} commented on '{}'", author.display_name(), task.title),
            )
        },
    )?;
    Ok(comment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TeamRole;
    use crate::ops::projects::{create_project, ProjectInput};
    use crate::ops::testutil;
    use crate::store::notifications as notes;
    use crate::store::projects::Project;
    use crate::store::users::User;
    use chrono::Duration;

    struct Fixture {
        conn: Connection,
        owner: User,
        dev: User,
        team_id: String,
        project: Project,
    }

    fn fixture() -> Fixture {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let dev = testutil::user(&conn, "dev");
        let team = testutil::team(&conn, &owner);
        testutil::join(&conn, &team, &dev, TeamRole::Member);
        let start = Utc::now();
        let project = create_project(
            &mut conn,
            &owner.id,
            &team.id,
            ProjectInput {
                name: Some("Board".into()),
                start_date: Some(start),
                end_date: Some(start + Duration::days(10)),
                assignee_ids: Some(vec![dev.id.clone()]),
                assignee_roles: Some(vec![1]),
                ..ProjectInput::default()
            },
        )
        .unwrap()
        .project;
        Fixture {
            conn,
            owner,
            dev,
            team_id: team.id,
            project,
        }
    }

    fn titled(title: &str) -> TaskInput {
        TaskInput {
            title: Some(title.to_string()),
            ..TaskInput::default()
        }
    }

    #[test]
    fn test_create_defaults_and_assignment_notice() {
        let mut f = fixture();
        let task = create_task(
            &mut f.conn,
            &f.owner.id,
            &f.team_id,
            &f.project.id,
            TaskInput {
                assignee: Some(Some(f.dev.id.clone())),
                ..titled("Write docs")
            },
        )
        .unwrap();
        assert_eq!(task.status, TaskStatus::Backlog);
        assert_eq!(task.priority, TaskPriority::Medium);
        assert!(task.completed_at.is_none());

        let inbox = notes::for_related(&f.conn, &f.dev.id, &task.id).unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, NotificationType::TaskAssigned);
    }

    #[test]
    fn test_assignee_must_be_on_the_team() {
        let mut f = fixture();
        let stranger = testutil::user(&f.conn, "stranger");
        let result = create_task(
            &mut f.conn,
            &f.owner.id,
            &f.team_id,
            &f.project.id,
            TaskInput {
                assignee: Some(Some(stranger.id.clone())),
                ..titled("Nope")
            },
        );
        assert!(matches!(result, Err(ApiError::Validation(e)) if e.contains_key("assignee")));
    }

    #[test]
    fn test_completed_at_follows_done() {
        let mut f = fixture();
        let task = create_task(&mut f.conn, &f.dev.id, &f.team_id, &f.project.id, titled("Ship"))
            .unwrap();
        let status = |s| TaskInput {
            status: Some(s),
            ..TaskInput::default()
        };

        let done = update_task(&mut f.conn, &f.dev.id, &f.team_id, &f.project.id, &task.id, status(TaskStatus::Done))
            .unwrap();
        let stamped = done.completed_at.expect("completed_at set");

        let retitled = update_task(&mut f.conn, &f.dev.id, &f.team_id, &f.project.id, &task.id, titled("Ship it"))
            .unwrap();
        assert_eq!(retitled.completed_at, Some(stamped));

        let reopened = update_task(&mut f.conn, &f.dev.id, &f.team_id, &f.project.id, &task.id, status(TaskStatus::InProgress))
            .unwrap();
        assert!(reopened.completed_at.is_none());
    }

    #[test]
    fn test_filters_and_delete_rules() {
        let mut f = fixture();
        let mine = create_task(&mut f.conn, &f.owner.id, &f.team_id, &f.project.id, titled("Owner task"))
            .unwrap();
        create_task(
            &mut f.conn,
            &f.dev.id,
            &f.team_id,
            &f.project.id,
            TaskInput {
                status: Some(TaskStatus::Todo),
                assignee: Some(Some(f.dev.id.clone())),
                ..titled("Dev task")
            },
        )
        .unwrap();

        let todo = list_tasks(
            &f.conn,
            &f.dev.id,
            &f.team_id,
            &f.project.id,
            &TaskQuery {
                status: Some("2".into()),
                assignee: None,
            },
        )
        .unwrap();
        assert_eq!(todo.len(), 1);
        assert_eq!(todo[0].title, "Dev task");

        let query = TaskQuery {
            status: None,
            assignee: Some(f.dev.id.clone()),
        };
        assert_eq!(list_tasks(&f.conn, &f.dev.id, &f.team_id, &f.project.id, &query).unwrap().len(), 1);

        assert!(matches!(
            delete_task(&mut f.conn, &f.dev.id, &f.team_id, &f.project.id, &mine.id),
            Err(ApiError::Forbidden(_))
        ));
        delete_task(&mut f.conn, &f.owner.id, &f.team_id, &f.project.id, &mine.id).unwrap();
        assert!(matches!(
            task_detail(&f.conn, &f.owner.id, &f.team_id, &f.project.id, &mine.id),
            Err(ApiError::NotFound(_))
        ));
    }

    #[test]
    fn test_subtasks_and_comments() {
        let mut f = fixture();
        let task = create_task(&mut f.conn, &f.dev.id, &f.team_id, &f.project.id, titled("Parent"))
            .unwrap();
        let sub = create_subtask(
            &f.conn,
            &f.dev.id,
            &f.team_id,
            &f.project.id,
            &task.id,
            SubtaskInput {
                title: Some("Child".into()),
                ..SubtaskInput::default()
            },
        )
        .unwrap();
        assert_eq!(sub.status, SubtaskStatus::Pending);

        let done = update_subtask(
            &f.conn,
            &f.dev.id,
            &f.team_id,
            &f.project.id,
            &task.id,
            &sub.id,
            SubtaskInput {
                status: Some(SubtaskStatus::Completed),
                ..SubtaskInput::default()
            },
        )
        .unwrap();
        assert!(done.completed_at.is_some());
        assert_eq!(
            task_detail(&f.conn, &f.dev.id, &f.team_id, &f.project.id, &task.id)
                .unwrap()
                .subtask_count,
            1
        );

        for text in ["first", "second"] {
            add_comment(
                &f.conn,
                &f.dev.id,
                &f.team_id,
                &f.project.id,
                &task.id,
                CommentInput {
                    content: Some(text.into()),
                },
            )
            .unwrap();
        }
        let comments = list_comments(&f.conn, &f.owner.id, &f.team_id, &f.project.id, &task.id).unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].content, "first");
        let inbox = notes::for_related(&f.conn, &f.owner.id, &task.id).unwrap();
        assert_eq!(
            inbox.iter().filter(|n| n.kind == NotificationType::Message).count(),
            2
        );
        assert!(notes::for_related(&f.conn, &f.dev.id, &task.id)
            .unwrap()
            .iter()
            .all(|n| n.kind != NotificationType::Message));

        delete_subtask(&f.conn, &f.dev.id, &f.team_id, &f.project.id, &task.id, &sub.id).unwrap();
        assert!(list_subtasks(&f.conn, &f.dev.id, &f.team_id, &f.project.id, &task.id)
            .unwrap()
            .is_empty());
    }
}
