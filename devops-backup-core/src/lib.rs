#![doc = "devops-backup-core: change detection, archiving and mirroring pipeline for devops-backup."]

//! This crate contains the platform-agnostic backup pipeline: it decides which units changed
//! since the last run, archives exactly those, and mirrors the archives to a remote store.
//! Clients for the hosted platform and the document store live in the binary crate and plug
//! in through the traits in [`contract`].
//!
//! # Usage
//! Build a [`config::PipelineConfig`], provide implementations of the [`contract`] traits and
//! call [`pipeline::run_backup`].

pub mod archive;
pub mod change_tracker;
pub mod config;
pub mod contract;
pub mod error;
pub mod mirror;
pub mod pipeline;
pub mod snapshot;
pub mod synchronise;
pub mod unit;

pub use error::{BackupError, Result};
