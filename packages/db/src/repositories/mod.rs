//! Repository implementations for database operations.

mod directory_repo;
mod grain_state_repo;
mod human_repo;
mod membership_repo;
mod reminder_repo;
mod stream_repo;

pub use directory_repo::DirectoryRepository;
pub use grain_state_repo::GrainStateRepository;
pub use human_repo::SurrealHumanRepository;
pub use membership_repo::MembershipRepository;
pub use reminder_repo::ReminderRepository;
pub use stream_repo::StreamRepository;
