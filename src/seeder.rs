//! One-shot seeding of the baseline dataset.
//!
//! Empties the store and inserts ids `0..record_count` in order, each with
//! a fresh random value. Runs to completion before any load starts; any
//! store error aborts the run.

use rand::Rng;
use tracing::info;

use crate::error::{StressError, StressResult};
use crate::store::RecordStore;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A progress line is logged every this many insertions.
pub const PROGRESS_EVERY: u64 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Records left after the initial delete
    pub initial: u64,
    pub inserted: u64,
    /// Ids that already existed and were left alone
    pub skipped: u64,
    /// Records present when seeding finished
    pub total: u64,
}

pub fn records_line(count: u64) -> String {
    format!("Records: {}", count)
}

pub fn exists_line(id: i64) -> String {
    format!("{} already exists", id)
}

pub fn inserted_line(inserted: u64) -> String {
    format!("Inserted {} records", inserted)
}

/// Random string of `len` characters from `A-Z0-9`.
pub fn random_value(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Seed `record_count` records with values of `value_length` characters.
pub async fn seed(
    store: &dyn RecordStore,
    record_count: u32,
    value_length: usize,
) -> StressResult<SeedReport> {
    seed_steps(store, record_count, value_length)
        .await
        .map_err(|e| match e {
            StressError::Seed(_) => e,
            other => StressError::Seed(other.to_string()),
        })
}

async fn seed_steps(
    store: &dyn RecordStore,
    record_count: u32,
    value_length: usize,
) -> StressResult<SeedReport> {
    let mut report = SeedReport::default();

    store.ensure_schema().await?;
    store.delete_all().await?;
    report.initial = store.count().await?;
    info!("{}", records_line(report.initial));

    for id in 0..i64::from(record_count) {
        let value = random_value(value_length);
        if !store.insert_if_absent(id, &value).await? {
            info!("{}", exists_line(id));
            report.skipped += 1;
            continue;
        }

        report.inserted += 1;
        if report.inserted % PROGRESS_EVERY == 0 {
            info!("{}", inserted_line(report.inserted));
        }
    }

    report.total = store.count().await?;
    info!("{}", records_line(report.total));
    Ok(report)
}
