//! Row types and SQL, one module per aggregate. Functions take a borrowed
//! connection so callers decide the transaction boundary.

pub mod activity;
pub mod invitations;
pub mod join_requests;
pub mod notifications;
pub mod projects;
pub mod sheets;
pub mod tasks;
pub mod teams;
pub mod users;
