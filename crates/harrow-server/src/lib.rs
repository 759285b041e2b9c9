//! Operator REST API: checkpoint and account management, bearer auth, OpenAPI docs.

pub mod auth;
pub mod dto;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod state;
