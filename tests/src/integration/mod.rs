//! Integration flows across keystone crates.

pub mod choreography;
pub mod dispatch;
pub mod lifecycle;
