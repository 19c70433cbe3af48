pub mod domain;
pub mod repository;
pub mod tables;

#[cfg(test)]
pub mod memory;
