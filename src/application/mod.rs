//! Application services: the render pipeline and the diagram generator.

pub mod diagram;
pub mod error;
pub mod render;
