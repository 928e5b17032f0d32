// src/lib.rs

pub mod config;
pub mod llm;
pub mod repair;
pub mod server;
pub mod state;
pub mod stream;
pub mod tools;
pub mod validator;
