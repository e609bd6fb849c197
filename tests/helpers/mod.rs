#![allow(dead_code)]

pub mod builders;
pub mod db;

pub use builders::{AssignmentBuilder, ItemBuilder};
pub use db::{TestDb, TestEngine, TestSnapshot};
