//! Train/evaluation split of record collections

use crate::error::PackError;
use crate::record::RawRecord;
use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Records divided into a training set and an evaluation set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetSplit {
    /// Training records
    pub train: Vec<RawRecord>,
    /// Evaluation records
    pub eval: Vec<RawRecord>,
}

/// Shuffle `records` with `seed` and hold out `eval_fraction` of them
///
/// The evaluation set gets `ceil(len * eval_fraction)` records, clamped so
/// that both sides keep at least one record whenever there are two or more.
///
/// # Errors
/// Fails with [`PackError::InvalidConfig`] unless `0 < eval_fraction < 1`.
pub fn train_test_split(
    mut records: Vec<RawRecord>,
    eval_fraction: f64,
    seed: u64,
) -> Result<DatasetSplit> {
    if !(eval_fraction > 0.0 && eval_fraction < 1.0) {
        return Err(PackError::InvalidConfig(format!(
            "eval_fraction must be in (0, 1), got {}",
            eval_fraction
        ))
        .into());
    }

    let mut rng = StdRng::seed_from_u64(seed);
    records.shuffle(&mut rng);

    let len = records.len();
    let mut eval_len = (len as f64 * eval_fraction).ceil() as usize;
    if len >= 2 {
        eval_len = eval_len.clamp(1, len - 1);
    } else {
        eval_len = 0;
    }

    let eval = records.split_off(len - eval_len);
    tracing::debug!(train = records.len(), eval = eval.len(), "split records");
    Ok(DatasetSplit {
        train: records,
        eval,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: usize) -> Vec<RawRecord> {
        (0..n)
            .map(|i| RawRecord::new().with("id", i.to_string()))
            .collect()
    }

    #[test]
    fn test_split_sizes() {
        let split = train_test_split(records(200), 0.25, 0).unwrap();
        assert_eq!(split.eval.len(), 50);
        assert_eq!(split.train.len(), 150);
    }

    #[test]
    fn test_split_keeps_both_sides() {
        let split = train_test_split(records(2), 0.9, 0).unwrap();
        assert_eq!(split.train.len(), 1);
        assert_eq!(split.eval.len(), 1);

        let split = train_test_split(records(1), 0.5, 0).unwrap();
        assert_eq!(split.train.len(), 1);
        assert!(split.eval.is_empty());
    }

    #[test]
    fn test_split_is_seeded_partition() {
        let a = train_test_split(records(50), 0.2, 42).unwrap();
        let b = train_test_split(records(50), 0.2, 42).unwrap();
        assert_eq!(a, b);

        let mut ids: Vec<String> = a
            .train
            .iter()
            .chain(a.eval.iter())
            .map(|r| r.get("id").unwrap().to_string())
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn test_split_rejects_bad_fraction() {
        for fraction in [0.0, 1.0, -0.1, f64::NAN] {
            assert!(train_test_split(records(10), fraction, 0).is_err());
        }
    }
}
