pub mod answer;
pub mod config;
pub mod embedding;
