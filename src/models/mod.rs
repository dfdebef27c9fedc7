pub mod pootle;
pub mod task;

pub use pootle::{Language, NewProject, Project, Store, TranslationProject, User};
pub use task::{BundleMeta, MetadataError, TaskLayout, TaskMetadata, TaskSource};
