mod seed;
mod store;

pub use seed::{ApiKeySeed, BusinessSeed, StoreSeed};
pub use store::{DEFAULT_SNAPSHOT_CAPACITY, MemoryPlanStore};
