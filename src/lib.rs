//! Attendance aggregation and role-based access control for a campus
//! attendance tracker.
//!
//! - [`aggregate`]: percentages, trends and per-subject summaries with
//!   approved leave removed from the denominator
//! - [`auth`]: role-hierarchy path authorization
//! - [`store`]: storage traits and the in-process store
//! - [`db`]: Postgres-backed store

pub mod aggregate;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod leave;
pub mod models;
pub mod report;
pub mod store;

pub use aggregate::{attendance_percentage, AttendanceAggregator, BucketTally};
pub use auth::RoleAuthorizationGate;
pub use error::{AttendanceError, AttendanceResult, DenyReason};
pub use models::{
    AggregationScope, AttendanceRecord, AttendanceStatus, LeaveApplication, LeaveStatus,
    MarkSheet, Period, Role, Subject, TrendPoint,
};
pub use store::{AttendanceRecordStore, LeaveRecordStore, MemoryStore};
