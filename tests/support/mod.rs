#![allow(dead_code)]

pub mod cluster;
pub mod fixtures;
pub mod logs;
