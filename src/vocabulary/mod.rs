//! Bag-of-features vocabulary: offline training and the persisted artifact.
//!
//! A vocabulary is a fixed set of descriptor centroids used downstream to
//! quantize arbitrary descriptors into discrete visual words. Training
//! accumulates every descriptor row seen across a recorded session, clusters
//! the accumulator with k-means, and imposes a deterministic order on the
//! resulting centroids before serialization.
//!
//! # Artifact format
//!
//! The artifact is a versioned YAML file named `voc_s<threshold>_g<groups>`
//! so the parameters that produced it stay visible. It carries the group
//! count, the detection threshold, the descriptor length, and the ordered
//! centroid list: everything needed to reconstruct the vocabulary exactly.

use std::cmp::Ordering;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use opencv::core::{self, Mat, TermCriteria};
use opencv::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Bumped whenever the artifact layout changes.
pub const VOCABULARY_FORMAT_VERSION: u32 = 1;

/// k-means iteration cap, matching the bag-of-words trainer defaults.
const KMEANS_MAX_ITERATIONS: i32 = 100;
const KMEANS_EPSILON: f64 = 1e-4;
const KMEANS_ATTEMPTS: i32 = 3;

/// Errors surfaced by vocabulary training.
#[derive(Debug)]
pub enum TrainError {
    /// Fewer descriptor rows were accumulated than the requested group
    /// count; clustering cannot produce more centroids than input points.
    InsufficientData { available: usize, requested: usize },
    /// The clustering backend failed.
    Backend(opencv::Error),
}

impl std::fmt::Display for TrainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainError::InsufficientData {
                available,
                requested,
            } => write!(
                f,
                "insufficient training data: {available} descriptors for {requested} groups"
            ),
            TrainError::Backend(e) => write!(f, "clustering failed: {e}"),
        }
    }
}

impl std::error::Error for TrainError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrainError::Backend(e) => Some(e),
            _ => None,
        }
    }
}

impl From<opencv::Error> for TrainError {
    fn from(e: opencv::Error) -> Self {
        TrainError::Backend(e)
    }
}

/// A trained, ordered bag-of-features vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub version: u32,
    /// Number of centroids (the configured group count).
    pub groups: usize,
    /// Detection threshold the training descriptors were extracted with.
    pub threshold: f64,
    /// Length of every centroid vector.
    pub descriptor_length: usize,
    /// Centroids in their canonical order.
    pub centroids: Vec<Vec<f32>>,
}

impl Vocabulary {
    /// Artifact file name encoding the parameters that built it.
    pub fn artifact_name(threshold: f64, groups: usize) -> String {
        format!("voc_s{threshold}_g{groups}.yaml")
    }

    /// Write the vocabulary into `dir`, creating it if needed.
    /// Returns the artifact path.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create vocabulary directory {}", dir.display()))?;
        let path = dir.join(Self::artifact_name(self.threshold, self.groups));
        let file = File::create(&path)
            .with_context(|| format!("failed to create vocabulary file {}", path.display()))?;
        serde_yaml::to_writer(file, self)
            .with_context(|| format!("failed to write vocabulary {}", path.display()))?;
        Ok(path)
    }

    /// Reconstruct a vocabulary from a saved artifact.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open vocabulary file {}", path.display()))?;
        let vocabulary: Vocabulary = serde_yaml::from_reader(file)
            .with_context(|| format!("failed to parse vocabulary {}", path.display()))?;
        Ok(vocabulary)
    }
}

/// Accumulates descriptors across a training pass, then clusters them.
pub struct VocabularyTrainer {
    groups: usize,
    threshold: f64,
    descriptors: Vec<Vec<f32>>,
}

impl VocabularyTrainer {
    pub fn new(groups: usize, threshold: f64) -> Self {
        Self {
            groups,
            threshold,
            descriptors: Vec::new(),
        }
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Append every row of a descriptor matrix (CV_32F) to the accumulator.
    ///
    /// Which frame a row came from is irrelevant from here on; an empty
    /// matrix (a frame with no keypoints) is a no-op.
    pub fn add_descriptors(&mut self, descriptors: &Mat) -> Result<(), TrainError> {
        for i in 0..descriptors.rows() {
            let mut row = Vec::with_capacity(descriptors.cols() as usize);
            for j in 0..descriptors.cols() {
                row.push(*descriptors.at_2d::<f32>(i, j)?);
            }
            self.descriptors.push(row);
        }
        Ok(())
    }

    /// Total descriptor rows accumulated so far.
    pub fn descriptor_count(&self) -> usize {
        self.descriptors.len()
    }

    /// Cluster the accumulator into the configured number of groups.
    ///
    /// Fails with [`TrainError::InsufficientData`] when fewer rows were
    /// accumulated than groups requested. Centroids are returned in a
    /// deterministic order: a stable lexicographic sort over their
    /// components.
    pub fn train(&self) -> Result<Vocabulary, TrainError> {
        if self.descriptors.len() < self.groups {
            return Err(TrainError::InsufficientData {
                available: self.descriptors.len(),
                requested: self.groups,
            });
        }

        info!(
            descriptors = self.descriptors.len(),
            groups = self.groups,
            "clustering training descriptors"
        );

        let data = Mat::from_slice_2d(&self.descriptors)?;
        let mut labels = Mat::default();
        let mut centers = Mat::default();
        let criteria = TermCriteria::new(
            core::TermCriteria_COUNT + core::TermCriteria_EPS,
            KMEANS_MAX_ITERATIONS,
            KMEANS_EPSILON,
        )?;
        core::kmeans(
            &data,
            self.groups as i32,
            &mut labels,
            criteria,
            KMEANS_ATTEMPTS,
            core::KMEANS_PP_CENTERS,
            &mut centers,
        )?;

        let mut centroids = Vec::with_capacity(centers.rows() as usize);
        for i in 0..centers.rows() {
            let mut row = Vec::with_capacity(centers.cols() as usize);
            for j in 0..centers.cols() {
                row.push(*centers.at_2d::<f32>(i, j)?);
            }
            centroids.push(row);
        }
        sort_centroids(&mut centroids);

        Ok(Vocabulary {
            version: VOCABULARY_FORMAT_VERSION,
            groups: self.groups,
            threshold: self.threshold,
            descriptor_length: centroids.first().map_or(0, Vec::len),
            centroids,
        })
    }
}

/// Canonical centroid order: stable lexicographic comparison over
/// components. `total_cmp` makes this a total order, so identical centroid
/// sets always serialize identically.
fn sort_centroids(centroids: &mut [Vec<f32>]) {
    centroids.sort_by(|a, b| {
        for (x, y) in a.iter().zip(b.iter()) {
            match x.total_cmp(y) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        a.len().cmp(&b.len())
    });
}
