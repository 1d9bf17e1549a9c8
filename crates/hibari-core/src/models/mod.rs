mod account;
mod library;
mod list;
mod media;
mod review;

pub use account::ExternalAccount;
pub use library::{EntryStatus, LibraryEntry, MissedSync, Progress, SyncKind};
pub use list::MediaList;
pub use media::{Mapping, MappingSet, MediaRecord, MediaTitle, MediaType, Provider};
pub use review::Review;
