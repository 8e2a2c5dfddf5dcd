pub mod cli;
pub mod db;
pub mod error;
pub mod model;
pub mod normalization;
pub mod resolver;
pub mod schema;
pub mod stages;
pub mod tracing;

pub mod util {
    pub mod env;
}
