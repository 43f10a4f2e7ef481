//! Outbound collaborators: everything the service talks to over HTTP.

pub mod geocoding;
pub mod identity;
pub mod notification;
pub mod payment;
pub mod retry;
pub mod storage;
