pub mod adapter;
pub mod signer;
pub mod transport;

pub use adapter::{ApiDescriptor, JsonApiAdapter};
pub use signer::CookieSigner;
pub use transport::ReqwestTransport;
