pub mod quality;
pub mod similarity;
pub mod union_find;

pub use quality::{quality_differences, quality_score, QualityDifference};
pub use similarity::similarity;
pub use union_find::UnionFind;

use crate::model::{FileRecord, Signature};
use ahash::AHashMap;
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::path::PathBuf;
use tracing::debug;

/// Rows of the candidate matrix scored in parallel before their links are
/// folded into the union-find.
const ROWS_PER_BATCH: usize = 64;

/// How candidate pairs are chosen before scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum CandidateStrategy {
    /// Score every pair. Quadratic, exact.
    #[default]
    Exhaustive,
    /// Only score videos whose first-frame hash shares the top `bits` bits.
    /// Links between videos that land in different buckets are lost, e.g.
    /// when a re-encode flips one of the leading bits.
    FirstFramePrefix { bits: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupMember {
    pub path: PathBuf,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
    pub fps: f64,
    pub bitrate_kbps: f64,
    pub quality_score: f64,
    /// Score against the group's representative (1.0 for the representative).
    pub similarity: f64,
    /// How this member compares with the representative; empty for the
    /// representative itself and for copies of comparable quality.
    pub differences: Vec<QualityDifference>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkedPair {
    pub a: PathBuf,
    pub b: PathBuf,
    pub score: f64,
}

/// A connected component of the "similar" relation with at least two members.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateGroup {
    /// Sorted by path.
    pub members: Vec<GroupMember>,
    pub representative: PathBuf,
    /// The links that joined the group, one fewer than there are members.
    /// Each scored at or above the threshold. Sorted.
    pub pairs: Vec<LinkedPair>,
    /// Bytes freed by keeping only the representative.
    pub reclaimable_bytes: u64,
}

impl DuplicateGroup {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn representative_member(&self) -> Option<&GroupMember> {
        self.members.iter().find(|m| m.path == self.representative)
    }
}

type Entry = (FileRecord, Signature);
type Link = (usize, usize, f64);

/// Which later entries each entry is scored against. Indices refer to the
/// path-sorted view built by [`cluster`].
enum Candidates {
    All(usize),
    Buckets {
        members: Vec<Vec<usize>>,
        /// Bucket and position within it, for entries that have a first frame.
        slots: Vec<Option<(usize, usize)>>,
    },
}

impl Candidates {
    fn new(entries: &[&Entry], strategy: CandidateStrategy) -> Self {
        match strategy {
            CandidateStrategy::Exhaustive => Candidates::All(entries.len()),
            CandidateStrategy::FirstFramePrefix { bits } => {
                let shift = 64 - bits.clamp(1, 64);
                let mut bucket_of: AHashMap<u64, usize> = AHashMap::new();
                let mut members: Vec<Vec<usize>> = Vec::new();
                let mut slots = vec![None; entries.len()];
                for (i, (_, sig)) in entries.iter().enumerate() {
                    if let Some(&first) = sig.frame_hashes.first() {
                        let bucket = *bucket_of.entry(first >> shift).or_insert_with(|| {
                            members.push(Vec::new());
                            members.len() - 1
                        });
                        slots[i] = Some((bucket, members[bucket].len()));
                        members[bucket].push(i);
                    }
                }
                debug!(
                    "Bucketed {} signatures into {} buckets by {} leading bits",
                    entries.len(),
                    members.len(),
                    bits
                );
                Candidates::Buckets { members, slots }
            }
        }
    }

    fn for_each_after(&self, i: usize, mut f: impl FnMut(usize)) {
        match self {
            Candidates::All(n) => (i + 1..*n).for_each(f),
            Candidates::Buckets { members, slots } => {
                if let Some((bucket, pos)) = slots[i] {
                    for &j in &members[bucket][pos + 1..] {
                        f(j);
                    }
                }
            }
        }
    }
}

/// Group signatures into duplicate sets.
///
/// Two videos are linked when their score is at least `threshold`; groups are
/// the connected components of those links, so membership is transitive even
/// when the ends of a chain score below the threshold against each other.
///
/// Only the links that merge two components are kept. Pairs already joined
/// through earlier links are not scored again, so memory stays linear in the
/// number of entries even when every pair is similar.
pub fn cluster(
    entries: &[Entry],
    threshold: f64,
    strategy: CandidateStrategy,
) -> Vec<DuplicateGroup> {
    let mut sorted: Vec<&Entry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.path.cmp(&b.0.path));
    let n = sorted.len();

    let candidates = Candidates::new(&sorted, strategy);
    let mut uf = UnionFind::new(n);
    let mut spanning: Vec<Link> = Vec::new();

    for start in (0..n).step_by(ROWS_PER_BATCH) {
        let end = (start + ROWS_PER_BATCH).min(n);
        let roots: Vec<usize> = (0..n).map(|i| uf.find(i)).collect();

        let batch: Vec<Vec<Link>> = (start..end)
            .into_par_iter()
            .map(|i| {
                let mut links = Vec::new();
                candidates.for_each_after(i, |j| {
                    if roots[i] == roots[j] {
                        return;
                    }
                    let score = similarity(&sorted[i].1, &sorted[j].1);
                    if score >= threshold {
                        links.push((i, j, score));
                    }
                });
                links
            })
            .collect();

        for link in batch.into_iter().flatten() {
            if uf.union(link.0, link.1) {
                spanning.push(link);
            }
        }
    }
    debug!("{} joining links among {} signatures", spanning.len(), n);

    let mut components: AHashMap<usize, Vec<usize>> = AHashMap::new();
    for i in 0..n {
        let root = uf.find(i);
        components.entry(root).or_default().push(i);
    }

    let mut links_by_root: AHashMap<usize, Vec<Link>> = AHashMap::new();
    for link in spanning {
        let root = uf.find(link.0);
        links_by_root.entry(root).or_default().push(link);
    }

    let mut groups: Vec<DuplicateGroup> = components
        .into_iter()
        .filter(|(_, members)| members.len() > 1)
        .map(|(root, members)| {
            build_group(
                &sorted,
                members,
                links_by_root.remove(&root).unwrap_or_default(),
            )
        })
        .collect();

    groups.sort_by(|a, b| a.representative.cmp(&b.representative));
    groups
}

/// Larger frame area wins, then larger file, then the lexically first path.
fn representative_order(a: &Entry, b: &Entry) -> Ordering {
    b.1.pixel_count()
        .cmp(&a.1.pixel_count())
        .then_with(|| b.0.size.cmp(&a.0.size))
        .then_with(|| a.0.path.cmp(&b.0.path))
}

/// `members` are ascending indices into the path-sorted view.
fn build_group(sorted: &[&Entry], members: Vec<usize>, links: Vec<Link>) -> DuplicateGroup {
    let rep = members
        .iter()
        .copied()
        .min_by(|&a, &b| representative_order(sorted[a], sorted[b]))
        .unwrap_or(members[0]);
    let (rep_record, rep_sig) = sorted[rep];

    let members_out: Vec<GroupMember> = members
        .iter()
        .map(|&i| {
            let (record, sig) = sorted[i];
            let is_rep = i == rep;
            GroupMember {
                path: record.path.clone(),
                size: record.size,
                width: sig.width,
                height: sig.height,
                duration_secs: sig.duration_secs,
                fps: sig.fps,
                bitrate_kbps: sig.bitrate_kbps(),
                quality_score: quality_score(sig),
                similarity: if is_rep { 1.0 } else { similarity(sig, rep_sig) },
                differences: if is_rep {
                    Vec::new()
                } else {
                    quality_differences(rep_sig, sig)
                },
            }
        })
        .collect();

    let mut pairs: Vec<LinkedPair> = links
        .into_iter()
        .map(|(i, j, score)| LinkedPair {
            a: sorted[i].0.path.clone(),
            b: sorted[j].0.path.clone(),
            score,
        })
        .collect();
    pairs.sort_by(|x, y| (&x.a, &x.b).cmp(&(&y.a, &y.b)));

    let reclaimable_bytes = members
        .iter()
        .filter(|&&i| i != rep)
        .map(|&i| sorted[i].0.size)
        .sum();

    DuplicateGroup {
        members: members_out,
        representative: rep_record.path.clone(),
        pairs,
        reclaimable_bytes,
    }
}
