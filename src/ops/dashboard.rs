use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::Serialize;

use crate::domain::{ProjectStatus, TaskPriority, TaskStatus};
use crate::error::ApiResult;
use crate::store::projects::{self as project_store, Project};
use crate::store::tasks::{self as task_store, Task, TaskFilter, TaskOrder};
use crate::store::teams as team_store;
use crate::store::users::UserSummary;

const RECENT: i64 = 5;
const AVATARS: usize = 3;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_teams: i64,
    pub total_projects: i64,
    pub active_projects: i64,
    pub completed_tasks: i64,
    pub tasks_due_today: i64,
    pub team_members: i64,
}

#[derive(Debug, Serialize)]
pub struct DashboardProject {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub status: ProjectStatus,
    pub progress: i64,
    pub team_id: String,
    pub team_name: String,
    pub member_count: i64,
    pub task_count: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_by_name: String,
    pub team_members: Vec<UserSummary>,
}

#[derive(Debug, Serialize)]
pub struct DashboardTask {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
    pub project_name: String,
    pub project_id: String,
    pub team_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DashboardTeam {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub member_count: i64,
    pub project_count: i64,
    pub created_by: String,
}

#[derive(Debug, Serialize)]
pub struct Dashboard {
    pub stats: DashboardStats,
    pub recent_projects: Vec<DashboardProject>,
    pub due_tasks: Vec<DashboardTask>,
    pub recent_tasks: Vec<DashboardTask>,
    pub all_teams: Vec<DashboardTeam>,
}

/// Whole-percent share of Done tasks, 0 for an empty project.
pub fn progress(completed: i64, total: i64) -> i64 {
    if total > 0 {
        completed * 100 / total
    } else {
        0
    }
}

fn dashboard_project(conn: &Connection, project: Project, user_id: &str) -> ApiResult<DashboardProject> {
    let counts = project_store::counts(conn, &project.id, user_id)?;
    let team_members = project_store::list_assignees(conn, &project.id)?
        .into_iter()
        .take(AVATARS)
        .map(|a| a.user_details)
        .collect();
    Ok(DashboardProject {
        progress: progress(counts.completed_task_count, counts.task_count),
        member_count: counts.member_count,
        task_count: counts.task_count,
        id: project.id,
        name: project.name,
        description: project.description,
        status: project.status,
        team_id: project.team,
        team_name: project.team_name,
        start_date: project.start_date,
        end_date: project.end_date,
        created_by_name: project.created_by_name,
        team_members,
    })
}

/// Resolves each task's team through its project, caching lookups.
struct TeamLookup<'c> {
    conn: &'c Connection,
    cache: HashMap<String, Option<String>>,
}

impl TeamLookup<'_> {
    fn task(&mut self, task: Task) -> ApiResult<DashboardTask> {
        let team_id = match self.cache.get(&task.project) {
            Some(team) => team.clone(),
            None => {
                let team = project_store::get(self.conn, &task.project)?.map(|p| p.team);
                self.cache.insert(task.project.clone(), team.clone());
                team
            }
        };
        Ok(DashboardTask {
            id: task.id,
            title: task.title,
            status: task.status,
            priority: task.priority,
            due_date: task.due_date,
            project_name: task.project_name,
            project_id: task.project,
            team_id,
        })
    }
}

pub fn dashboard(conn: &Connection, user_id: &str, now: DateTime<Utc>) -> ApiResult<Dashboard> {
    let teams = team_store::teams_for_user(conn, user_id)?;

    let recent_projects = project_store::recent_for_user(conn, user_id, RECENT)?
        .into_iter()
        .map(|p| dashboard_project(conn, p, user_id))
        .collect::<ApiResult<Vec<_>>>()?;

    let completed = task_store::query_tasks(
        conn,
        &TaskFilter {
            assignee: Some(user_id),
            status: Some(TaskStatus::Done),
            ..TaskFilter::default()
        },
    )?;
    let due = task_store::query_tasks(
        conn,
        &TaskFilter {
            assignee: Some(user_id),
            not_status: Some(TaskStatus::Done),
            due_before: Some(now + Duration::days(1)),
            order: TaskOrder::DueSoonest,
            ..TaskFilter::default()
        },
    )?;
    let recent = task_store::query_tasks(
        conn,
        &TaskFilter {
            assignee: Some(user_id),
            order: TaskOrder::RecentlyUpdated,
            limit: Some(RECENT),
            ..TaskFilter::default()
        },
    )?;

    let stats = DashboardStats {
        total_teams: teams.len() as i64,
        total_projects: project_store::count_for_user(conn, user_id, None)?,
        active_projects: project_store::count_for_user(conn, user_id, Some(ProjectStatus::Active))?,
        completed_tasks: completed.len() as i64,
        tasks_due_today: due.len() as i64,
        team_members: team_store::teammate_count(conn, user_id)?,
    };

    let mut lookup = TeamLookup {
        conn,
        cache: HashMap::new(),
    };
    let due_tasks = due
        .into_iter()
        .take(RECENT as usize)
        .map(|t| lookup.task(t))
        .collect::<ApiResult<Vec<_>>>()?;
    let recent_tasks = recent
        .into_iter()
        .map(|t| lookup.task(t))
        .collect::<ApiResult<Vec<_>>>()?;

    let mut all_teams = teams
        .into_iter()
        .map(|team| {
            Ok(DashboardTeam {
                member_count: team_store::member_count(conn, &team.id)?,
                project_count: project_store::count_for_team(conn, &team.id)?,
                id: team.id,
                name: team.name,
                description: team.description,
                created_by: team.created_by,
            })
        })
        .collect::<ApiResult<Vec<_>>>()?;
    all_teams.sort_by(|a, b| {
        b.project_count
            .cmp(&a.project_count)
            .then_with(|| a.name.cmp(&b.name))
    });

    Ok(Dashboard {
        stats,
        recent_projects,
        due_tasks,
        recent_tasks,
        all_teams,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TeamRole;
    use crate::ops::projects::{create_project, update_project, ProjectInput};
    use crate::ops::tasks::{create_task, TaskInput};
    use crate::ops::testutil;

    #[test]
    fn test_progress() {
        assert_eq!(progress(0, 0), 0);
        assert_eq!(progress(1, 3), 33);
        assert_eq!(progress(4, 4), 100);
    }

    #[test]
    fn test_dashboard_aggregates() {
        let mut conn = testutil::conn();
        let owner = testutil::user(&conn, "owner");
        let mate = testutil::user(&conn, "mate");
        let team = testutil::team(&conn, &owner);
        testutil::join(&conn, &team, &mate, TeamRole::Member);
        let now = Utc::now();

        let project = create_project(
            &mut conn,
            &owner.id,
            &team.id,
            ProjectInput {
                name: Some("Dash".into()),
                start_date: Some(now),
                end_date: Some(now + Duration::days(3)),
                ..ProjectInput::default()
            },
        )
        .unwrap()
        .project;
        update_project(
            &mut conn,
            &owner.id,
            &team.id,
            &project.id,
            ProjectInput {
                status: Some(ProjectStatus::Active),
                ..ProjectInput::default()
            },
        )
        .unwrap();

        let task = |title: &str, status: TaskStatus, due: Option<DateTime<Utc>>| TaskInput {
            title: Some(title.to_string()),
            status: Some(status),
            due_date: Some(due),
            assignee: Some(Some(owner.id.clone())),
            ..TaskInput::default()
        };
        create_task(&mut conn, &owner.id, &team.id, &project.id, task("done", TaskStatus::Done, None)).unwrap();
        create_task(
            &mut conn,
            &owner.id,
            &team.id,
            &project.id,
            task("soon", TaskStatus::Todo, Some(now + Duration::hours(3))),
        )
        .unwrap();
        create_task(
            &mut conn,
            &owner.id,
            &team.id,
            &project.id,
            task("later", TaskStatus::Todo, Some(now + Duration::days(7))),
        )
        .unwrap();

        let board = dashboard(&conn, &owner.id, now).unwrap();
        assert_eq!(board.stats.total_teams, 1);
        assert_eq!(board.stats.total_projects, 1);
        assert_eq!(board.stats.active_projects, 1);
        assert_eq!(board.stats.completed_tasks, 1);
        assert_eq!(board.stats.tasks_due_today, 1);
        assert_eq!(board.stats.team_members, 2);

        assert_eq!(board.recent_projects[0].progress, 33);
        assert_eq!(board.due_tasks[0].title, "soon");
        assert_eq!(board.due_tasks[0].team_id.as_deref(), Some(team.id.as_str()));
        assert_eq!(board.recent_tasks.len(), 3);
        assert_eq!(board.all_teams[0].project_count, 1);
        assert_eq!(board.all_teams[0].member_count, 2);

        let json = serde_json::to_value(&board.stats).unwrap();
        assert_eq!(json["tasksDueToday"], 1);
    }
}
