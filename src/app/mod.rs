pub mod backend;
pub mod batch;
pub mod errors;
pub mod factory;
pub mod local;
pub mod poller;
pub mod remote;

pub use backend::{FragmentSearchRequest, SearchBackend, SearchRequest};
pub use errors::AppError;
pub use factory::AppFactory;
pub use local::LocalBackend;
