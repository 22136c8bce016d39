mod temp_store;

pub use temp_store::{DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL, TempKeyStore};
