#![allow(dead_code)]

use contract_auth::auth::{SigningSecret, SqliteCredentialStore};
use contract_auth::clock::ManualClock;
use contract_auth::{AuthGateway, Config};
use std::sync::Arc;

pub const IDENTITY: &str = "a@x.com";
pub const SECRET: &str = "correct-horse";

pub struct Harness {
    pub gateway: AuthGateway,
    pub clock: Arc<ManualClock>,
    pub store: Arc<SqliteCredentialStore>,
}

impl Harness {
    pub fn add_user(&self, identity: &str, secret: &str, role: &str) -> String {
        self.store.create_user(identity, secret, role).unwrap()
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.password.hash_rounds = 16;
    config
}

pub fn harness() -> Harness {
    harness_with(test_config())
}

pub fn harness_with(config: Config) -> Harness {
    let clock = Arc::new(ManualClock::starting_now());
    let store = Arc::new(SqliteCredentialStore::open_in_memory(&config.password).unwrap());
    let gateway = AuthGateway::with_clock(
        &config,
        store.clone(),
        SigningSecret::generate(),
        clock.clone(),
    )
    .unwrap();
    Harness {
        gateway,
        clock,
        store,
    }
}
