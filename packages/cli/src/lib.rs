// ABOUTME: Gateway process wiring: logging, Docker connection, recovery, reaper and HTTP server
// ABOUTME: Shared by the rce-gateway binary and its tests

pub mod config;
pub mod server;
