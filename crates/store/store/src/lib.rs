pub mod error;
pub mod store;

pub use error::StoreError;
pub use store::{ApiKeyRecord, EncryptedWebhookSecrets, PlanStore, hash_api_key};
