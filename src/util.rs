pub mod kmeans;
pub mod text;
