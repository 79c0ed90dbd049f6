//! Core library for arrtool: finds media files that have lost their shared
//! (hardlinked) on-disk copy, matches them against Sonarr/Radarr-style
//! catalog services, and replaces them under a persisted hourly search
//! ceiling.

pub mod catalog;
pub mod config;
pub mod executor;
pub mod matcher;
pub mod parse;
pub mod probe;
pub mod reconcile;
pub mod runtime;
pub mod throttle;
