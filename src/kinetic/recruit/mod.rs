// SPDX-License-Identifier: MIT

//! Agent recruitment against an external HTTP endpoint

mod client;
mod config;
mod retry;

pub use client::{AgentRecruiter, RecruitPayload, Recruitment};
pub use config::RecruiterConfig;
pub use retry::RetryPolicy;
