//! Applies a decoded batch to the storage engine in one transaction.
//!
//! Failures are handled in two tiers. A rejected sample is counted and the
//! rest of the batch keeps going; under [`PartialFailurePolicy::Tolerate`]
//! the good samples are still committed. A failed commit fails the whole
//! request and nothing from the batch counts as stored.

use common::{AppendError, Appendable, Appender, Labels, SeriesRef, StorageResult};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::labels::normalize;
use crate::proto::WriteBatch;

/// What a rejected sample does to its transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PartialFailurePolicy {
    /// Count the rejection, keep appending, and commit the accepted samples.
    #[default]
    Tolerate,
    /// Roll back on the first rejection and fail the request.
    Reject,
}

/// Outcome of a committed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendResult {
    /// Samples the engine's `append` accepted.
    ///
    /// Includes re-sent identical samples the engine treats as no-ops and
    /// samples the engine may still drop at commit, so it can exceed the
    /// number of samples newly stored.
    pub appended: u64,
    /// Samples rejected by the engine.
    pub failed: u64,
    /// First rejection seen, kept for logging.
    pub first_error: Option<AppendError>,
}

/// Append transaction that is terminated exactly once.
///
/// `commit` and `rollback` consume the transaction. If it is dropped without
/// either, for instance while unwinding from a panic, it rolls back.
pub(crate) struct Transaction {
    appender: Option<Box<dyn Appender>>,
}

impl Transaction {
    pub(crate) fn begin(appendable: &dyn Appendable) -> Self {
        Self {
            appender: Some(appendable.appender()),
        }
    }

    pub(crate) fn append(
        &mut self,
        labels: &Labels,
        timestamp_ms: i64,
        value: f64,
    ) -> std::result::Result<SeriesRef, AppendError> {
        match self.appender.as_mut() {
            Some(appender) => appender.append(labels, timestamp_ms, value),
            None => unreachable!("appender is only taken by commit or rollback"),
        }
    }

    pub(crate) async fn commit(mut self) -> StorageResult<()> {
        match self.appender.take() {
            Some(appender) => appender.commit().await,
            None => Ok(()),
        }
    }

    pub(crate) fn rollback(mut self) {
        if let Some(appender) = self.appender.take() {
            appender.rollback();
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(appender) = self.appender.take() {
            tracing::warn!("append transaction dropped without commit, rolling back");
            appender.rollback();
        }
    }
}

/// Writes every sample of `batch` through a single transaction.
///
/// Returns [`Error::Commit`] if the engine fails to commit, and
/// [`Error::SampleRejected`] if `policy` is [`PartialFailurePolicy::Reject`]
/// and any sample is rejected.
pub async fn append_batch(
    appendable: &dyn Appendable,
    batch: WriteBatch,
    policy: PartialFailurePolicy,
) -> Result<AppendResult> {
    let mut txn = Transaction::begin(appendable);
    let mut result = AppendResult::default();

    for series in batch.timeseries {
        let labels = normalize(series.labels);
        for sample in series.samples {
            match txn.append(&labels, sample.timestamp, sample.value) {
                Ok(_) => result.appended += 1,
                Err(err) => {
                    tracing::debug!(
                        labels = %labels,
                        timestamp = sample.timestamp,
                        kind = err.kind(),
                        "sample rejected"
                    );
                    if policy == PartialFailurePolicy::Reject {
                        txn.rollback();
                        return Err(Error::SampleRejected(err));
                    }
                    result.failed += 1;
                    result.first_error.get_or_insert(err);
                }
            }
        }
    }

    txn.commit().await?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use common::{InMemoryStorage, StorageError};

    use super::*;
    use crate::proto::{Label, Sample, TimeSeries};

    #[derive(Default)]
    struct Calls {
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
    }

    /// Accepts every sample and fails or succeeds on commit as configured.
    struct ScriptedStorage {
        calls: Arc<Calls>,
        fail_commit: bool,
    }

    struct ScriptedAppender {
        calls: Arc<Calls>,
        fail_commit: bool,
    }

    impl Appendable for ScriptedStorage {
        fn appender(&self) -> Box<dyn Appender> {
            Box::new(ScriptedAppender {
                calls: self.calls.clone(),
                fail_commit: self.fail_commit,
            })
        }
    }

    #[async_trait]
    impl Appender for ScriptedAppender {
        fn append(
            &mut self,
            _labels: &Labels,
            _timestamp_ms: i64,
            _value: f64,
        ) -> std::result::Result<SeriesRef, AppendError> {
            Ok(1)
        }

        async fn commit(self: Box<Self>) -> StorageResult<()> {
            self.calls.commits.fetch_add(1, Ordering::SeqCst);
            if self.fail_commit {
                return Err(StorageError::Storage("disk full".to_string()));
            }
            Ok(())
        }

        fn rollback(self: Box<Self>) {
            self.calls.rollbacks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn series(name: &str, samples: &[(i64, f64)]) -> TimeSeries {
        TimeSeries {
            labels: vec![Label::new("__name__", name), Label::new("job", "test")],
            samples: samples.iter().map(|(t, v)| Sample::new(*t, *v)).collect(),
        }
    }

    fn labels(name: &str) -> Labels {
        Labels::from_pairs([("__name__", name), ("job", "test")])
    }

    #[tokio::test]
    async fn should_commit_all_samples_of_valid_batch() {
        // given
        let storage = InMemoryStorage::new();
        let batch = WriteBatch {
            timeseries: vec![series("a", &[(1, 1.0), (2, 2.0)]), series("b", &[(1, 3.0)])],
        };

        // when
        let result = append_batch(&storage, batch, PartialFailurePolicy::Tolerate)
            .await
            .unwrap();

        // then
        assert_eq!(result.appended, 3);
        assert_eq!(result.failed, 0);
        assert_eq!(storage.samples(&labels("a")), vec![(1, 1.0), (2, 2.0)]);
        assert_eq!(storage.samples(&labels("b")), vec![(1, 3.0)]);
    }

    #[tokio::test]
    async fn should_commit_good_samples_and_count_rejected_ones() {
        // given
        let storage = InMemoryStorage::new();
        let seed = WriteBatch {
            timeseries: vec![series("a", &[(100, 1.0)])],
        };
        append_batch(&storage, seed, PartialFailurePolicy::Tolerate)
            .await
            .unwrap();
        let batch = WriteBatch {
            timeseries: vec![
                series("a", &[(50, 9.0)]),
                series("b", &[(10, 1.0), (20, 2.0)]),
            ],
        };

        // when
        let result = append_batch(&storage, batch, PartialFailurePolicy::Tolerate)
            .await
            .unwrap();

        // then
        assert_eq!(result.appended, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.first_error, Some(AppendError::OutOfOrderSample));
        assert_eq!(storage.samples(&labels("a")), vec![(100, 1.0)]);
        assert_eq!(storage.samples(&labels("b")), vec![(10, 1.0), (20, 2.0)]);
    }

    #[tokio::test]
    async fn should_roll_back_on_first_rejection_when_policy_rejects() {
        // given
        let storage = InMemoryStorage::new();
        let batch = WriteBatch {
            timeseries: vec![
                series("b", &[(10, 1.0)]),
                series("a", &[(20, 1.0), (10, 1.0)]),
            ],
        };

        // when
        let err = append_batch(&storage, batch, PartialFailurePolicy::Reject)
            .await
            .unwrap_err();

        // then
        assert_eq!(err, Error::SampleRejected(AppendError::OutOfOrderSample));
        assert_eq!(storage.sample_count(), 0);
    }

    #[tokio::test]
    async fn should_count_resent_identical_sample_as_appended() {
        // given
        let storage = InMemoryStorage::new();
        let batch = WriteBatch {
            timeseries: vec![series("a", &[(10, 1.0)])],
        };
        append_batch(&storage, batch.clone(), PartialFailurePolicy::Tolerate)
            .await
            .unwrap();

        // when
        let result = append_batch(&storage, batch, PartialFailurePolicy::Tolerate)
            .await
            .unwrap();

        // then
        assert_eq!(result.appended, 1);
        assert_eq!(result.failed, 0);
        assert_eq!(storage.samples(&labels("a")), vec![(10, 1.0)]);
    }

    #[tokio::test]
    async fn should_fail_with_commit_error_when_commit_fails() {
        // given
        let calls = Arc::new(Calls::default());
        let storage = ScriptedStorage {
            calls: calls.clone(),
            fail_commit: true,
        };
        let batch = WriteBatch {
            timeseries: vec![series("a", &[(1, 1.0)])],
        };

        // when
        let err = append_batch(&storage, batch, PartialFailurePolicy::Tolerate)
            .await
            .unwrap_err();

        // then
        assert!(matches!(err, Error::Commit(_)));
        assert_eq!(calls.commits.load(Ordering::SeqCst), 1);
        assert_eq!(calls.rollbacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn should_terminate_transaction_exactly_once() {
        // given
        let calls = Arc::new(Calls::default());
        let storage = ScriptedStorage {
            calls: calls.clone(),
            fail_commit: false,
        };

        // when
        append_batch(&storage, WriteBatch::default(), PartialFailurePolicy::Tolerate)
            .await
            .unwrap();

        // then
        assert_eq!(calls.commits.load(Ordering::SeqCst), 1);
        assert_eq!(calls.rollbacks.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn should_roll_back_dropped_transaction() {
        // given
        let calls = Arc::new(Calls::default());
        let storage = ScriptedStorage {
            calls: calls.clone(),
            fail_commit: false,
        };

        // when
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut txn = Transaction::begin(&storage);
            txn.append(&labels("a"), 1, 1.0).unwrap();
            panic!("boom");
        }));

        // then
        assert!(outcome.is_err());
        assert_eq!(calls.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(calls.commits.load(Ordering::SeqCst), 0);
    }
}
