//! Selection of the next video to play.
//!
//! Selection is a pure function of the pool, the previously played file, the
//! policy and a random source, so it can be tested with a seeded RNG.

use crate::config::{SelectionConfig, SelectionPolicy};
use crate::media::{Bucket, BucketCounts, CandidatePool, MediaFile};
use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;

/// Share of draws that go to `safe` when `medium` is also available.
pub const SAFE_WEIGHT: f64 = 0.8;
/// Share of draws that go to `medium` when `safe` is also available.
pub const MEDIUM_WEIGHT: f64 = 0.2;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectError {
    #[error("no playable videos found on mounted USB storage")]
    NoCandidates,
}

/// How much of the draw each non-empty bucket receives.
///
/// `safe` and `medium` split 80/20 when both exist and absorb each other's
/// share otherwise; `risky` only gets picked when neither exists, and
/// `unclassified` only when nothing else does.
pub fn bucket_weights(counts: &BucketCounts) -> Vec<(Bucket, f64)> {
    match (counts.safe > 0, counts.medium > 0) {
        (true, true) => vec![(Bucket::Safe, SAFE_WEIGHT), (Bucket::Medium, MEDIUM_WEIGHT)],
        (true, false) => vec![(Bucket::Safe, 1.0)],
        (false, true) => vec![(Bucket::Medium, 1.0)],
        (false, false) if counts.risky > 0 => vec![(Bucket::Risky, 1.0)],
        (false, false) => vec![(Bucket::Unclassified, 1.0)],
    }
}

fn choose_weighted<'a, R: Rng + ?Sized>(
    files: &[&'a MediaFile],
    rng: &mut R,
) -> Option<&'a MediaFile> {
    let weights = bucket_weights(&BucketCounts::tally(files.iter().copied()));
    let (bucket, _) = weights.choose_weighted(rng, |(_, w)| *w).ok()?;
    let in_bucket: Vec<&MediaFile> = files
        .iter()
        .copied()
        .filter(|f| f.bucket == *bucket)
        .collect();
    in_bucket.choose(rng).copied()
}

/// Picks the next file.
///
/// With `avoid_repeat` and at least two files in the pool, `last` is removed
/// before any weighting, so the result never repeats it. A single-file pool
/// returns that file regardless.
pub fn select<R: Rng + ?Sized>(
    pool: &CandidatePool,
    last: Option<&MediaFile>,
    options: &SelectionConfig,
    rng: &mut R,
) -> Result<MediaFile, SelectError> {
    if pool.is_empty() {
        return Err(SelectError::NoCandidates);
    }

    let all: Vec<&MediaFile> = pool.files().iter().collect();
    let mut eligible: Vec<&MediaFile> = match last {
        Some(last) if options.avoid_repeat && all.len() >= 2 => {
            all.iter().copied().filter(|f| !f.same_file(last)).collect()
        }
        _ => all.clone(),
    };
    if eligible.is_empty() {
        eligible = all;
    }

    let chosen = match options.policy {
        SelectionPolicy::Uniform => eligible.choose(rng).copied(),
        SelectionPolicy::Weighted => choose_weighted(&eligible, rng),
    };

    chosen.cloned().ok_or(SelectError::NoCandidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::time::SystemTime;

    const DRAWS: usize = 10_000;

    fn file(name: &str, bucket: Bucket) -> MediaFile {
        MediaFile::new(format!("/media/usb/{}", name), 1, SystemTime::UNIX_EPOCH)
            .with_bucket(bucket)
    }

    fn weighted() -> SelectionConfig {
        SelectionConfig {
            policy: SelectionPolicy::Weighted,
            avoid_repeat: true,
        }
    }

    fn uniform() -> SelectionConfig {
        SelectionConfig {
            policy: SelectionPolicy::Uniform,
            avoid_repeat: true,
        }
    }

    fn bucket_fractions(pool: &CandidatePool, options: &SelectionConfig) -> HashMap<Bucket, f64> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut hits: HashMap<Bucket, usize> = HashMap::new();
        for _ in 0..DRAWS {
            let chosen = select(pool, None, options, &mut rng).unwrap();
            *hits.entry(chosen.bucket).or_default() += 1;
        }
        hits.into_iter()
            .map(|(b, n)| (b, n as f64 / DRAWS as f64))
            .collect()
    }

    #[test]
    fn test_empty_pool_is_no_candidates() {
        let mut rng = StdRng::seed_from_u64(1);
        let result = select(&CandidatePool::default(), None, &weighted(), &mut rng);
        assert_eq!(result, Err(SelectError::NoCandidates));
    }

    #[test]
    fn test_single_file_repeat_waived() {
        let only = file("only.mp4", Bucket::Safe);
        let pool = CandidatePool::new(vec![only.clone()]);
        let mut rng = StdRng::seed_from_u64(1);

        for options in [weighted(), uniform()] {
            let chosen = select(&pool, Some(&only), &options, &mut rng).unwrap();
            assert_eq!(chosen.path, only.path);
        }
    }

    #[test]
    fn test_weights_table() {
        let counts = |safe, medium, risky, unclassified| BucketCounts {
            safe,
            medium,
            risky,
            unclassified,
        };
        assert_eq!(
            bucket_weights(&counts(1, 1, 1, 1)),
            vec![(Bucket::Safe, 0.8), (Bucket::Medium, 0.2)]
        );
        assert_eq!(bucket_weights(&counts(1, 0, 1, 1)), vec![(Bucket::Safe, 1.0)]);
        assert_eq!(bucket_weights(&counts(0, 2, 1, 0)), vec![(Bucket::Medium, 1.0)]);
        assert_eq!(bucket_weights(&counts(0, 0, 3, 1)), vec![(Bucket::Risky, 1.0)]);
        assert_eq!(bucket_weights(&counts(0, 0, 0, 5)), vec![(Bucket::Unclassified, 1.0)]);
    }

    #[test]
    fn test_safe_and_risky_only_picks_safe() {
        let pool = CandidatePool::new(vec![
            file("s1.mp4", Bucket::Safe),
            file("s2.mp4", Bucket::Safe),
            file("r1.mkv", Bucket::Risky),
            file("r2.mkv", Bucket::Risky),
        ]);
        let fractions = bucket_fractions(&pool, &weighted());
        assert_eq!(fractions.get(&Bucket::Safe).copied(), Some(1.0));
        assert!(fractions.get(&Bucket::Risky).is_none());
    }

    #[test]
    fn test_all_buckets_split_eighty_twenty() {
        let pool = CandidatePool::new(vec![
            file("s1.mp4", Bucket::Safe),
            file("s2.mp4", Bucket::Safe),
            file("m1.mkv", Bucket::Medium),
            file("r1.mkv", Bucket::Risky),
            file("u1.mkv", Bucket::Unclassified),
        ]);
        let fractions = bucket_fractions(&pool, &weighted());
        let safe = fractions.get(&Bucket::Safe).copied().unwrap_or(0.0);
        let medium = fractions.get(&Bucket::Medium).copied().unwrap_or(0.0);

        assert!((safe - 0.8).abs() < 0.03, "safe fraction {}", safe);
        assert!((medium - 0.2).abs() < 0.03, "medium fraction {}", medium);
        assert!(fractions.get(&Bucket::Risky).is_none());
        assert!(fractions.get(&Bucket::Unclassified).is_none());
    }

    #[test]
    fn test_medium_absorbs_missing_safe() {
        let pool = CandidatePool::new(vec![
            file("m1.mkv", Bucket::Medium),
            file("r1.mkv", Bucket::Risky),
        ]);
        let fractions = bucket_fractions(&pool, &weighted());
        assert_eq!(fractions.get(&Bucket::Medium).copied(), Some(1.0));
    }

    #[test]
    fn test_risky_only_when_nothing_better() {
        let pool = CandidatePool::new(vec![
            file("r1.mkv", Bucket::Risky),
            file("u1.mkv", Bucket::Unclassified),
        ]);
        let fractions = bucket_fractions(&pool, &weighted());
        assert_eq!(fractions.get(&Bucket::Risky).copied(), Some(1.0));
    }

    #[test]
    fn test_all_unclassified_is_uniform() {
        let pool = CandidatePool::new(vec![
            file("a.mp4", Bucket::Unclassified),
            file("b.mp4", Bucket::Unclassified),
        ]);
        let mut rng = StdRng::seed_from_u64(3);
        let mut a_hits = 0;
        for _ in 0..DRAWS {
            let picked = select(&pool, None, &weighted(), &mut rng).unwrap();
            if picked.path == PathBuf::from("/media/usb/a.mp4") {
                a_hits += 1;
            }
        }
        let fraction = a_hits as f64 / DRAWS as f64;
        assert!((fraction - 0.5).abs() < 0.03, "a fraction {}", fraction);
    }

    #[test]
    fn test_uniform_policy_ignores_buckets() {
        let pool = CandidatePool::new(vec![
            file("s1.mp4", Bucket::Safe),
            file("r1.mkv", Bucket::Risky),
        ]);
        let fractions = bucket_fractions(&pool, &uniform());
        let risky = fractions.get(&Bucket::Risky).copied().unwrap_or(0.0);
        assert!((risky - 0.5).abs() < 0.03, "risky fraction {}", risky);
    }

    #[test]
    fn test_repeat_filter_applies_before_weighting() {
        let safe = file("s1.mp4", Bucket::Safe);
        let medium = file("m1.mkv", Bucket::Medium);
        let pool = CandidatePool::new(vec![safe.clone(), medium.clone()]);
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..200 {
            let chosen = select(&pool, Some(&safe), &weighted(), &mut rng).unwrap();
            assert_eq!(chosen.path, medium.path);
        }
    }

    #[test]
    fn test_repeat_allowed_when_disabled() {
        let a = file("a.mp4", Bucket::Safe);
        let pool = CandidatePool::new(vec![a.clone(), file("b.mp4", Bucket::Safe)]);
        let options = SelectionConfig {
            policy: SelectionPolicy::Uniform,
            avoid_repeat: false,
        };
        let mut rng = StdRng::seed_from_u64(5);
        let repeats = (0..DRAWS)
            .filter(|_| select(&pool, Some(&a), &options, &mut rng).unwrap().same_file(&a))
            .count();
        assert!(repeats > 0);
    }

    fn bucket_strategy() -> impl Strategy<Value = Bucket> {
        prop_oneof![
            Just(Bucket::Safe),
            Just(Bucket::Medium),
            Just(Bucket::Risky),
            Just(Bucket::Unclassified),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_never_repeats_last_with_two_or_more(
            buckets in prop::collection::vec(bucket_strategy(), 2..12),
            last_idx in any::<prop::sample::Index>(),
            seed in any::<u64>(),
            uniform_policy in proptest::bool::ANY,
        ) {
            let files: Vec<MediaFile> = buckets
                .iter()
                .enumerate()
                .map(|(i, b)| file(&format!("{}.mp4", i), *b))
                .collect();
            let last = files[last_idx.index(files.len())].clone();
            // a rescan produces a fresh instance with a possibly different bucket
            let last = last.with_bucket(Bucket::Unclassified);
            let pool = CandidatePool::new(files);
            let options = if uniform_policy { uniform() } else { weighted() };
            let mut rng = StdRng::seed_from_u64(seed);

            let mut previous = last;
            for _ in 0..20 {
                let chosen = select(&pool, Some(&previous), &options, &mut rng).unwrap();
                prop_assert!(!chosen.same_file(&previous));
                prop_assert!(pool.contains(&chosen.path));
                previous = chosen;
            }
        }
    }
}
