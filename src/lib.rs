//! Semantic book recommendations: embed book descriptions, index them, and
//! rank books by how close their description is to a free-text query.

pub mod books;
pub mod config;
pub mod interactions;
pub mod prepare;
pub mod semantic;
#[cfg(test)]
mod tests;
