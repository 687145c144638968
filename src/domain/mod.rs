//! Domain Vocabulary
//!
//! Integer-coded enums shared by storage, access control and the JSON API.
//! Codes are stable: they are persisted and they are what clients send.

pub mod access;
pub mod settings;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

macro_rules! coded_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident = $code:literal => $label:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "i64", into = "i64")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn code(self) -> i64 {
                match self {
                    $(Self::$variant => $code),+
                }
            }

            pub fn label(self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }

            pub fn from_code(code: i64) -> Option<Self> {
                match code {
                    $($code => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Parse a code coming from a query string.
            pub fn parse(raw: &str) -> Option<Self> {
                raw.trim().parse::<i64>().ok().and_then(Self::from_code)
            }
        }

        impl From<$name> for i64 {
            fn from(value: $name) -> i64 {
                value.code()
            }
        }

        impl TryFrom<i64> for $name {
            type Error = String;

            fn try_from(code: i64) -> Result<Self, Self::Error> {
                Self::from_code(code)
                    .ok_or_else(|| format!("{} is not a valid {}", code, stringify!($name)))
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.code()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let code = i64::column_result(value)?;
                Self::from_code(code).ok_or(FromSqlError::OutOfRange(code))
            }
        }
    };
}

coded_enum! {
    /// Role of a user inside a team.
    pub enum TeamRole {
        Owner = 1 => "Owner",
        Admin = 2 => "Admin",
        Member = 3 => "Member",
        Guest = 4 => "Guest",
    }
}

impl TeamRole {
    /// Owners and admins run the team.
    pub fn is_manager(self) -> bool {
        matches!(self, TeamRole::Owner | TeamRole::Admin)
    }
}

coded_enum! {
    pub enum InvitationStatus {
        Pending = 1 => "Pending",
        Accepted = 2 => "Accepted",
        Rejected = 3 => "Rejected",
        Expired = 4 => "Expired",
    }
}

coded_enum! {
    pub enum JoinRequestStatus {
        Pending = 1 => "Pending",
        Approved = 2 => "Approved",
        Rejected = 3 => "Rejected",
    }
}

coded_enum! {
    pub enum ProjectStatus {
        Planning = 1 => "Planning",
        Active = 2 => "Active",
        OnHold = 3 => "On Hold",
        Completed = 4 => "Completed",
        Cancelled = 5 => "Cancelled",
    }
}

coded_enum! {
    /// Role of an assignee on a project.
    pub enum AssigneeRole {
        Contributor = 1 => "Contributor",
        Manager = 2 => "Manager",
        Lead = 3 => "Lead",
    }
}

coded_enum! {
    pub enum ProjectMemberRole {
        Viewer = 1 => "Viewer",
        Contributor = 2 => "Contributor",
        Manager = 3 => "Manager",
    }
}

coded_enum! {
    /// Project permission levels, ordered from weakest to strongest.
    pub enum PermissionLevel {
        ViewOnly = 1 => "View Only",
        EditBasic = 2 => "Edit Basic Info",
        EditAll = 3 => "Edit All",
        Admin = 4 => "Admin",
    }
}

coded_enum! {
    pub enum TaskStatus {
        Backlog = 1 => "Backlog",
        Todo = 2 => "To Do",
        InProgress = 3 => "In Progress",
        InReview = 4 => "In Review",
        Done = 5 => "Done",
    }
}

coded_enum! {
    pub enum TaskPriority {
        Low = 1 => "Low",
        Medium = 2 => "Medium",
        High = 3 => "High",
        Urgent = 4 => "Urgent",
    }
}

coded_enum! {
    pub enum SubtaskStatus {
        Pending = 1 => "Pending",
        InProgress = 2 => "In Progress",
        Completed = 3 => "Completed",
    }
}

coded_enum! {
    pub enum NotificationType {
        Invitation = 1 => "Team Invitation",
        Mention = 2 => "Mention",
        TaskAssigned = 3 => "Task Assigned",
        Message = 4 => "New Message",
        JoinRequest = 5 => "Join Request",
    }
}

coded_enum! {
    pub enum NotificationStatus {
        Unread = 1 => "Unread",
        Read = 2 => "Read",
        Dismissed = 3 => "Dismissed",
    }
}

coded_enum! {
    pub enum ActionType {
        ProjectCreated = 1 => "Project Created",
        ProjectTransferred = 2 => "Project Transferred",
        ProjectUpdated = 3 => "Project Updated",
        ProjectDeleted = 4 => "Project Deleted",
        TaskCreated = 5 => "Task Created",
        TaskUpdated = 6 => "Task Updated",
        TaskDeleted = 7 => "Task Deleted",
        TeamJoined = 8 => "Team Joined",
        MemberAdded = 9 => "Member Added",
        MemberRemoved = 10 => "Member Removed",
    }
}

coded_enum! {
    pub enum SheetType {
        Spreadsheet = 1 => "Spreadsheet",
        Kanban = 2 => "Kanban Board",
        Table = 3 => "Data Table",
        Form = 4 => "Form",
    }
}

coded_enum! {
    pub enum ColumnType {
        Text = 1 => "Text",
        Number = 2 => "Number",
        Date = 3 => "Date",
        Select = 4 => "Dropdown",
        Checkbox = 5 => "Checkbox",
        Formula = 6 => "Formula",
        User = 7 => "User",
        Status = 8 => "Status",
    }
}
