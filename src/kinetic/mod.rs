// SPDX-License-Identifier: MIT

pub mod lifecycle;
pub mod plan;
pub mod recruit;
pub mod sidecar;
