//! Library exports for sessiongate, shared between the binary and tests.

pub mod api;
pub mod config;
pub mod error;
pub mod guard;
pub mod identity;
pub mod models;
pub mod navigation;
pub mod onboarding;
pub mod providers;
pub mod startup;
pub mod state;
pub mod storage;
pub mod token_store;
pub mod utils;
