mod http;
pub mod mock;
mod traits;

pub use http::{HttpService, DEFAULT_TRANSFER_TIMEOUT};
pub use traits::{FileTransfer, ServiceError};
