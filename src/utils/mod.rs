//! Utils Module
pub mod dates;
pub mod pagination;

pub use dates::{time_ago, time_ago_short};
