//! RoomieSplit: shared-expense groups, settlements and running balances,
//! served as a JSON API over a document store and an identity provider.

pub mod auth;
pub mod balance;
pub mod config;
pub mod context;
pub mod error;
pub mod forms;
pub mod identity;
pub mod profiles;
pub mod routes;
pub mod schemas;
pub mod store;
pub mod validation;
pub mod views;
