pub mod ancestry;
pub mod graph;
pub mod matrix;
pub mod pipeline;
pub mod solution;
pub mod solver;
