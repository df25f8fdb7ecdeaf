// SPDX-License-Identifier: MIT

pub mod context;
pub mod error;
