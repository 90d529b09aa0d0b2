//! Client core for the Helix recruiting-outreach assistant: conversation,
//! sequence draft and directory stores over the backend REST API, a server
//! push feed, and a direct-to-provider LLM fallback.

pub mod backend;
pub mod error;
pub mod intent;
pub mod models;
pub mod notify;
pub mod page;
pub mod realtime;
pub mod session;
pub mod settings;
pub mod shapes;
pub mod stores;
pub mod tools;
pub mod transport;

pub use error::{ClientError, ClientResult};
pub use page::{Page, Route};
pub use settings::AppConfig;
