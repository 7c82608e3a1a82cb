//! Imagine Dispatch: quota-aware scheduler for image-generation bots.

pub mod alert;
pub mod api;
pub mod captcha;
pub mod classifier;
pub mod config;
pub mod correlation;
pub mod error;
pub mod gateway;
pub mod queue;
pub mod store;
pub mod task;
pub mod tier;
pub mod worker;
