pub mod attendance;
pub mod core;
pub mod courses;
pub mod evaluation_types;
pub mod exports;
pub mod grades;
