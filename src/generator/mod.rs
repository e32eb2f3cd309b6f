//! Asynchronous cloud generation pipeline.
//!
//! `Generator` drives the task lifecycle (queued, running, completed,
//! swapped), `Task` owns one sampling job and its cancellation handshake,
//! and `CloudList` adapts the written records for the depth sort.

mod cloud_list;
mod dispatch;
mod generator;
mod task;

pub use cloud_list::CloudList;
pub use generator::Generator;
pub use task::Task;
