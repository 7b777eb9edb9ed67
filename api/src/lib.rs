pub mod app;
pub mod bootstrap;
pub mod clients;
pub mod config;
pub mod repositories;
pub mod state;
pub mod telemetry;

pub mod routes {
    pub mod collection;
    pub mod health;
}
