#![doc = "mailcloud-backup-core: core logic library for mailcloud-backup."]

//! This crate holds everything a backup run needs once configuration is
//! resolved: the cloud wire contract and its HTTP client, the directory
//! scanner with its compression step, and the pipeline that ties them
//! together. Reading configuration files and wiring up log sinks live in
//! the CLI crate.
//!
//! # Usage
//! Build a [`config::BackupConfig`], construct a [`cloud::MailCloudClient`]
//! and hand both to [`pipeline::upload_directory`].

pub mod cloud;
pub mod compress;
pub mod config;
pub mod contract;
pub mod mime;
pub mod pipeline;
pub mod receipt;
pub mod scanner;
