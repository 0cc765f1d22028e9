pub mod catalog;
pub mod http_client;
pub mod in_memory;
pub mod sqlite_store;

pub use catalog::InMemoryCatalog;
pub use http_client::ReqwestHttp;
pub use in_memory::InMemoryStore;
pub use sqlite_store::SqliteStore;
