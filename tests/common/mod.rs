// Each test binary uses a different subset of these helpers.
#![allow(dead_code, unused_imports)]

pub mod fixtures;
pub mod observers;

pub use fixtures::{
    cleanup_database, customer_form, get_database_url, init_tracing, reload_product, seed_product,
    seed_promo, setup_database,
};
pub use observers::{FailingNotifier, RecordingNotifier, TrackingObserver};
