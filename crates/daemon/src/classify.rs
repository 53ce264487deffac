//! Classifier module for sorting videos into decode-confidence buckets.
//!
//! The Pi decodes h264 and sub-4K 8-bit hevc in hardware without trouble;
//! 4K hevc is borderline and 4K 10-bit hevc frequently stutters. Files are
//! bucketed accordingly so the selector can prefer the safe ones.

use crate::cache::ClassificationCache;
use crate::media::{Bucket, CandidatePool, MediaFile};
use crate::probe::{Prober, VideoStreamInfo};
use rand::seq::SliceRandom;
use tracing::{debug, info};

/// Largest dimension still considered "not 4K".
const MAX_NON_4K_DIMENSION: u32 = 1920;

/// Buckets a stream by codec, resolution and bit depth.
///
/// | codec       | 4K  | 10-bit | bucket |
/// |-------------|-----|--------|--------|
/// | h264        | no  | any    | safe   |
/// | hevc/h265   | no  | no     | safe   |
/// | hevc/h265   | yes | no     | medium |
/// | hevc/h265   | yes | yes    | risky  |
/// | other       |     |        | safe   |
pub fn classify_stream(stream: &VideoStreamInfo) -> Bucket {
    let codec = stream.codec_name.to_lowercase();
    let is_4k = stream.width.max(stream.height) > MAX_NON_4K_DIMENSION;
    let is_10bit = stream.pix_fmt.contains("10");
    let is_hevc = codec == "hevc" || codec == "h265";

    match (codec.as_str(), is_hevc, is_4k, is_10bit) {
        ("h264", _, false, _) => Bucket::Safe,
        (_, true, false, false) => Bucket::Safe,
        (_, true, true, false) => Bucket::Medium,
        (_, true, true, true) => Bucket::Risky,
        _ => Bucket::Safe,
    }
}

/// Assigns buckets to scanned files, consulting the cache first.
pub struct Classifier {
    prober: Box<dyn Prober>,
    cache: ClassificationCache,
    max_probes_per_scan: usize,
}

impl Classifier {
    pub fn new(
        prober: Box<dyn Prober>,
        cache: ClassificationCache,
        max_probes_per_scan: usize,
    ) -> Self {
        Self {
            prober,
            cache,
            max_probes_per_scan,
        }
    }

    /// Probes one file. Never fails: any probe error yields `Unclassified`.
    pub fn classify(&self, file: &MediaFile) -> Bucket {
        match self.prober.probe(&file.path) {
            Ok(stream) => classify_stream(&stream),
            Err(e) => {
                debug!("ffprobe failed for {}: {}. Leaving unclassified.", file.path.display(), e);
                Bucket::Unclassified
            }
        }
    }

    /// Buckets every file of a freshly scanned pool.
    ///
    /// Cached results are reused; at most `max_probes_per_scan` uncached files
    /// (chosen at random, 0 = no limit) are probed, the rest stay
    /// `Unclassified` until a later scan gets to them.
    pub fn classify_pool(&mut self, pool: CandidatePool) -> CandidatePool {
        let mut files = pool.into_files();
        let mut uncached = Vec::new();

        for (idx, file) in files.iter_mut().enumerate() {
            match self.cache.lookup(file) {
                Some(bucket) => file.bucket = bucket,
                None => {
                    file.bucket = Bucket::Unclassified;
                    uncached.push(idx);
                }
            }
        }

        info!(
            "Selection pool: cached={} uncached={}",
            files.len() - uncached.len(),
            uncached.len()
        );

        if self.max_probes_per_scan > 0 && uncached.len() > self.max_probes_per_scan {
            uncached.shuffle(&mut rand::thread_rng());
            uncached.truncate(self.max_probes_per_scan);
        }

        for idx in uncached {
            let bucket = self.classify(&files[idx]);
            debug!("Classified {} as {}", files[idx].path.display(), bucket);
            self.cache.insert(&files[idx], bucket);
            files[idx].bucket = bucket;
        }

        if let Err(e) = self.cache.save() {
            debug!("Failed to persist classification cache: {}", e);
        }

        let pool = CandidatePool::new(files);
        info!("Classification totals: {}", pool.counts());
        pool
    }

    pub fn cache(&self) -> &ClassificationCache {
        &self.cache
    }
}
