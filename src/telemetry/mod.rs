pub mod episode;
pub mod recorder;
pub mod summary;
