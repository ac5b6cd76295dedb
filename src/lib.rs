//! Keeps a set of bare git mirrors up to date on per-mirror cron schedules.

pub mod daemon;
