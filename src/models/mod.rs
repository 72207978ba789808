pub mod document;
pub mod job;
pub mod settings;

pub use document::*;
pub use job::*;
pub use settings::*;
