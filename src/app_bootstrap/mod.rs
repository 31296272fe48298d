//! Process bootstrap helpers.

pub mod services;
