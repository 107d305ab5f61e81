pub mod extract;
pub mod llm;
pub mod loader;
pub mod store;
pub mod utils;
pub mod vector;

#[cfg(test)]
pub mod testing;
