pub mod config;
pub mod database;
pub mod judge;
pub mod language;
pub mod queue;
pub mod routes;
pub mod sandbox;
pub mod verdict;
pub mod web_server;
pub mod worker;
