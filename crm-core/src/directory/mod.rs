//! CRM users and clients.

pub mod clients;
pub mod users;
