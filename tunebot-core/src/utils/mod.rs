// File: src/utils/mod.rs

pub mod time;
