pub mod core;
pub mod figure;
pub mod indices;
pub mod marker;
pub mod tech;
