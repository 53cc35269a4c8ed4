//! A typed row store over a declared [`pantograph_node_contracts::Schema`]
//! and primary key, addressable by key and by equality/range search, with
//! pluggable backends and a multi-tenancy wrapper.

pub mod backends;
pub mod change;
pub mod error;
pub mod op;
pub mod prefix;
pub mod repository;

pub use backends::{FilesystemBackend, MemoryBackend, SqliteBackend};
pub use change::{ChangeEvent, ChangeSubscription, SubscribeOptions};
pub use error::{Error, Result};
pub use op::Op;
pub use prefix::PrefixedRepository;
pub use repository::{key_tuple, TabularRepository};
