pub mod comparer;
pub mod encoder;
pub mod geometry;
