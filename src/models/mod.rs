// src/models/mod.rs

pub mod order;
pub mod product;
pub mod saga;
pub mod user;
