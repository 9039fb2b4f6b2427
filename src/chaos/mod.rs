// src/chaos/mod.rs
mod simulator;

pub use simulator::FailureSimulator;
