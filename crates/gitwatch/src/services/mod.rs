pub mod commits;
pub mod repository;

pub use commits::CommitService;
pub use repository::RepositoryService;
