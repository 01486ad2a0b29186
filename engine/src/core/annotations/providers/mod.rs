//! Vision Providers
//!
//! - **dashscope.rs**: Qwen-VL through Alibaba Cloud DashScope (default)
//!
//! `MockVisionProvider` lives next to the trait in `provider.rs`.

pub mod dashscope;

pub use dashscope::{DashScopeConfig, DashScopeProvider};
