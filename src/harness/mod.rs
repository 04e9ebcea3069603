//! Runtime harness executing the conveyor processes
//!
//! Provides the process lifecycle ([`Heart`], [`Module`], [`ModuleRunner`])
//! and the monitored store connections that tie connection failures into
//! job supervision.

mod heart;
mod module;
mod redis;

pub use self::redis::*;
pub use heart::*;
pub use module::*;
