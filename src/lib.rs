pub mod config;
pub mod db;
pub mod electricity;
pub mod ingest;
pub mod model;
pub mod normalize;
pub mod scheduler;
pub mod summary;

#[cfg(test)]
mod test_support;
