//! Keeps an AI coding assistant's project "skill" files current while sessions run.
//!
//! The host application runs `skills hook` on every lifecycle event. The hook counts
//! prompts and tokens per session, decides when a configured threshold is crossed, and
//! makes sure exactly one background overseer per project picks the work up. The overseer
//! asks an external analysis capability what to write and commits the edits to the
//! project's skill directory.
//!
//! All coordination state lives in one SQLite database shared by every process, so
//! concurrent sessions and hooks coordinate through SQLite's own locking.
//!
//! # Modules
//!
//! - [`config`]: configuration loading from TOML files and environment variables
//! - [`db`]: state database initialization, schema and migrations
//! - [`state`]: session counters, trigger evaluation, the overseer lock and the run log
//! - [`hooks`]: host event handling
//! - [`overseer`]: the background worker and how it is launched
//! - [`analysis`]: the analysis capability interface
//! - [`skills`]: the on-disk skill store

pub mod analysis;
pub mod config;
pub mod db;
pub mod error;
pub mod hooks;
pub mod overseer;
pub mod skills;
pub mod state;
