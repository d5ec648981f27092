//! Merge-pair extraction from patient links.
//!
//! Walks every record once, keeps only `replaced-by` links, reduces each link
//! reference to its last path segment and collects the resulting
//! (source, target) pairs into a deduplicated [`MergePairSet`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use futures_util::{pin_mut, Stream, StreamExt};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::record::{MergePair, Record};

/// Derive a target identifier from a link reference.
///
/// Takes the segment after the last `/`. Empty references and references
/// ending in `/` give the empty string.
///
/// # Example
///
/// ```
/// use fhirlink::extraction::target_id_from_reference;
///
/// assert_eq!(target_id_from_reference("Patient/B"), "B");
/// assert_eq!(target_id_from_reference("12345"), "12345");
/// assert_eq!(target_id_from_reference(""), "");
/// ```
pub fn target_id_from_reference(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or("")
}

/// Iteration order of a [`MergePairSet`], and therefore of the CSV rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairOrder {
    /// Lexicographic by (source, target).
    #[default]
    Sorted,
    /// Order in which pairs were first observed.
    FirstSeen,
}

impl FromStr for PairOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sorted" => Ok(PairOrder::Sorted),
            "first_seen" | "first-seen" => Ok(PairOrder::FirstSeen),
            other => Err(format!("unknown pair order '{}'", other)),
        }
    }
}

impl fmt::Display for PairOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairOrder::Sorted => write!(f, "sorted"),
            PairOrder::FirstSeen => write!(f, "first_seen"),
        }
    }
}

#[derive(Debug, Clone)]
enum PairStore {
    Sorted(BTreeSet<MergePair>),
    FirstSeen(IndexSet<MergePair>),
}

/// Set of merge pairs, unique by (source, target).
///
/// Equality compares members only, ignoring order.
#[derive(Debug, Clone)]
pub struct MergePairSet {
    store: PairStore,
}

impl MergePairSet {
    pub fn new(order: PairOrder) -> Self {
        let store = match order {
            PairOrder::Sorted => PairStore::Sorted(BTreeSet::new()),
            PairOrder::FirstSeen => PairStore::FirstSeen(IndexSet::new()),
        };
        Self { store }
    }

    /// Insert a pair if absent. Returns `false` when the pair was already present.
    pub fn insert(&mut self, pair: MergePair) -> bool {
        match &mut self.store {
            PairStore::Sorted(set) => set.insert(pair),
            PairStore::FirstSeen(set) => set.insert(pair),
        }
    }

    pub fn contains(&self, pair: &MergePair) -> bool {
        match &self.store {
            PairStore::Sorted(set) => set.contains(pair),
            PairStore::FirstSeen(set) => set.contains(pair),
        }
    }

    pub fn len(&self) -> usize {
        match &self.store {
            PairStore::Sorted(set) => set.len(),
            PairStore::FirstSeen(set) => set.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn order(&self) -> PairOrder {
        match &self.store {
            PairStore::Sorted(_) => PairOrder::Sorted,
            PairStore::FirstSeen(_) => PairOrder::FirstSeen,
        }
    }

    pub fn iter(&self) -> Iter<'_> {
        match &self.store {
            PairStore::Sorted(set) => Iter::Sorted(set.iter()),
            PairStore::FirstSeen(set) => Iter::FirstSeen(set.iter()),
        }
    }
}

impl PartialEq for MergePairSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|pair| other.contains(pair))
    }
}

impl Eq for MergePairSet {}

impl<'a> IntoIterator for &'a MergePairSet {
    type Item = &'a MergePair;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a [`MergePairSet`] in its configured order.
pub enum Iter<'a> {
    Sorted(std::collections::btree_set::Iter<'a, MergePair>),
    FirstSeen(indexmap::set::Iter<'a, MergePair>),
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a MergePair;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Iter::Sorted(it) => it.next(),
            Iter::FirstSeen(it) => it.next(),
        }
    }
}

/// Counters gathered while extracting, for run logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionStats {
    pub records_scanned: usize,
    pub links_selected: usize,
    pub duplicates_collapsed: usize,
    pub empty_targets: usize,
}

/// Result of one extraction pass.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub pairs: MergePairSet,
    pub stats: ExtractionStats,
}

/// Builds merge pairs from `replaced-by` links.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkExtractor {
    order: PairOrder,
}

impl LinkExtractor {
    pub fn new(order: PairOrder) -> Self {
        Self { order }
    }

    /// Extract pairs from an in-memory sequence of records.
    pub fn extract<I>(&self, records: I) -> Extraction
    where
        I: IntoIterator<Item = Record>,
    {
        let mut extraction = self.empty();
        for record in records {
            self.absorb(&record, &mut extraction);
        }
        extraction
    }

    /// Extract pairs from a lazily paginated record stream.
    ///
    /// The stream is consumed once, to completion. The first fetch error
    /// aborts the pass; malformed link data never does.
    pub async fn extract_stream<S>(&self, records: S) -> Result<Extraction, FetchError>
    where
        S: Stream<Item = Result<Record, FetchError>>,
    {
        pin_mut!(records);

        let mut extraction = self.empty();
        while let Some(record) = records.next().await {
            let record = record?;
            self.absorb(&record, &mut extraction);
        }
        Ok(extraction)
    }

    fn empty(&self) -> Extraction {
        Extraction {
            pairs: MergePairSet::new(self.order),
            stats: ExtractionStats::default(),
        }
    }

    fn absorb(&self, record: &Record, extraction: &mut Extraction) {
        extraction.stats.records_scanned += 1;

        for link in record.replaced_by_links() {
            extraction.stats.links_selected += 1;

            let target_id = target_id_from_reference(&link.target_reference);
            if target_id.is_empty() {
                extraction.stats.empty_targets += 1;
                tracing::debug!(
                    "Record {} has replaced-by link with empty target reference {:?}",
                    record.id,
                    link.target_reference
                );
            }

            let pair = MergePair::new(record.id.clone(), target_id);
            if !extraction.pairs.insert(pair) {
                extraction.stats.duplicates_collapsed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Link, LinkType};
    use futures_util::stream;

    fn pairs_of(extraction: &Extraction) -> Vec<(String, String)> {
        extraction
            .pairs
            .iter()
            .map(|p| (p.source_id.clone(), p.target_id.clone()))
            .collect()
    }

    #[test]
    fn test_target_id_from_reference() {
        assert_eq!(target_id_from_reference("Patient/B"), "B");
        assert_eq!(
            target_id_from_reference("https://fhir.example.org/Patient/a75e08fd-cf79-4396-934c-4b427e71156c"),
            "a75e08fd-cf79-4396-934c-4b427e71156c"
        );
        assert_eq!(target_id_from_reference("12345"), "12345");
        assert_eq!(target_id_from_reference(""), "");
        assert_eq!(target_id_from_reference("Patient/"), "");
        assert_eq!(target_id_from_reference("/"), "");
    }

    #[test]
    fn test_basic_scenario() {
        let records = vec![
            Record::new("A", vec![Link::replaced_by("Patient/B")]),
            Record::new("C", vec![]),
        ];

        let extraction = LinkExtractor::default().extract(records);

        assert_eq!(pairs_of(&extraction), vec![("A".to_string(), "B".to_string())]);
        assert_eq!(extraction.stats.records_scanned, 2);
        assert_eq!(extraction.stats.links_selected, 1);
    }

    #[test]
    fn test_other_link_types_ignored() {
        let records = vec![Record::new(
            "D000000001",
            vec![
                Link::new(LinkType::Replaces, "Patient/WDT0000000016"),
                Link::new(LinkType::SeeAlso, "Patient/S1"),
                Link::new(LinkType::Refer, "Patient/R1"),
                Link::new(LinkType::Unknown, "Patient/U1"),
            ],
        )];

        let extraction = LinkExtractor::default().extract(records);

        assert!(extraction.pairs.is_empty());
        assert_eq!(extraction.stats.links_selected, 0);
    }

    #[test]
    fn test_one_pair_per_replaced_by_link() {
        let records = vec![Record::new(
            "P",
            vec![
                Link::replaced_by("Patient/T1"),
                Link::new(LinkType::Replaces, "Patient/Old"),
                Link::replaced_by("Patient/T2"),
            ],
        )];

        let extraction = LinkExtractor::default().extract(records);

        assert_eq!(extraction.pairs.len(), 2);
        assert!(extraction.pairs.contains(&MergePair::new("P", "T1")));
        assert!(extraction.pairs.contains(&MergePair::new("P", "T2")));
    }

    #[test]
    fn test_duplicates_collapse() {
        let records = vec![
            Record::new("A", vec![Link::replaced_by("Patient/B"), Link::replaced_by("B")]),
            Record::new("A", vec![Link::replaced_by("Patient/B")]),
        ];

        let extraction = LinkExtractor::default().extract(records);

        assert_eq!(extraction.pairs.len(), 1);
        assert_eq!(extraction.stats.duplicates_collapsed, 2);
    }

    #[test]
    fn test_shared_target_not_collapsed() {
        let records = vec![
            Record::new("P1", vec![Link::replaced_by("X")]),
            Record::new("P2", vec![Link::replaced_by("X")]),
        ];

        let extraction = LinkExtractor::default().extract(records);

        assert_eq!(
            pairs_of(&extraction),
            vec![
                ("P1".to_string(), "X".to_string()),
                ("P2".to_string(), "X".to_string()),
            ]
        );
    }

    #[test]
    fn test_self_link_kept() {
        let records = vec![Record::new("A", vec![Link::replaced_by("Patient/A")])];

        let extraction = LinkExtractor::default().extract(records);

        assert!(extraction.pairs.contains(&MergePair::new("A", "A")));
    }

    #[test]
    fn test_empty_reference_tolerated() {
        let records = vec![
            Record::new("A", vec![Link::replaced_by("")]),
            Record::new("B", vec![Link::replaced_by("Patient/C")]),
        ];

        let extraction = LinkExtractor::default().extract(records);

        assert_eq!(extraction.pairs.len(), 2);
        assert!(extraction.pairs.contains(&MergePair::new("A", "")));
        assert!(extraction.pairs.contains(&MergePair::new("B", "C")));
        assert_eq!(extraction.stats.empty_targets, 1);
    }

    #[test]
    fn test_idempotent_across_runs() {
        let records = vec![
            Record::new("4be15074-a29b-45b0-a0f9-ebd8157266a9", vec![
                Link::replaced_by("Patient/a75e08fd-cf79-4396-934c-4b427e71156c"),
            ]),
            Record::new("2fab9a03-c932-4a05-a2ab-343193f72d9c", vec![Link::replaced_by("Patient/12345")]),
            Record::new("WDT0000000016", vec![Link::replaced_by("Patient/WDT000000001")]),
        ];

        let first = LinkExtractor::new(PairOrder::FirstSeen).extract(records.clone());
        let second = LinkExtractor::new(PairOrder::Sorted).extract(records);

        assert_eq!(first.pairs, second.pairs);
    }

    #[test]
    fn test_sorted_order() {
        let records = vec![
            Record::new("b", vec![Link::replaced_by("1")]),
            Record::new("a", vec![Link::replaced_by("2"), Link::replaced_by("1")]),
        ];

        let extraction = LinkExtractor::new(PairOrder::Sorted).extract(records);

        assert_eq!(
            pairs_of(&extraction),
            vec![
                ("a".to_string(), "1".to_string()),
                ("a".to_string(), "2".to_string()),
                ("b".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_first_seen_order() {
        let records = vec![
            Record::new("b", vec![Link::replaced_by("1")]),
            Record::new("a", vec![Link::replaced_by("2"), Link::replaced_by("1")]),
            Record::new("b", vec![Link::replaced_by("1")]),
        ];

        let extraction = LinkExtractor::new(PairOrder::FirstSeen).extract(records);

        assert_eq!(
            pairs_of(&extraction),
            vec![
                ("b".to_string(), "1".to_string()),
                ("a".to_string(), "2".to_string()),
                ("a".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn test_pair_order_from_str() {
        assert_eq!("sorted".parse::<PairOrder>(), Ok(PairOrder::Sorted));
        assert_eq!("First-Seen".parse::<PairOrder>(), Ok(PairOrder::FirstSeen));
        assert!("random".parse::<PairOrder>().is_err());
    }

    #[tokio::test]
    async fn test_extract_stream() {
        let records = stream::iter(vec![
            Ok(Record::new("A", vec![Link::replaced_by("Patient/B")])),
            Ok(Record::new("C", vec![])),
        ]);

        let extraction = LinkExtractor::default().extract_stream(records).await.unwrap();

        assert_eq!(pairs_of(&extraction), vec![("A".to_string(), "B".to_string())]);
    }

    #[tokio::test]
    async fn test_extract_stream_propagates_fetch_error() {
        let records = stream::iter(vec![
            Ok(Record::new("A", vec![Link::replaced_by("Patient/B")])),
            Err(FetchError::Source("page 2 unavailable".to_string())),
            Ok(Record::new("C", vec![Link::replaced_by("Patient/D")])),
        ]);

        let result = LinkExtractor::default().extract_stream(records).await;

        assert!(matches!(result, Err(FetchError::Source(_))));
    }
}
