//! Solvent: Staged, Resumable Problem Solving
//!
//! Decomposes research problems into sub-problems and answers each one through a fixed
//! pipeline of generation stages. Every stage persists its prompts and output as artifacts,
//! so an interrupted batch resumes where it stopped and a completed one reruns for free.

pub mod artifact;
pub mod cli;
pub mod config;
pub mod decompose;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod problem;
pub mod provider;
pub mod resolve;
pub mod scheduler;
