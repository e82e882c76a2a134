//! The file-storage service's tables.

mod repository_pool;
mod share_basic;
mod user_basic;
mod user_repository;

pub use repository_pool::RepositoryPool;
pub use share_basic::ShareBasic;
pub use user_basic::UserBasic;
pub use user_repository::UserRepository;
