//! Roll chunk-level matches up to ranked parent-document matches.

use std::{collections::HashMap, fmt, str::FromStr};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::document::{DocumentId, Match};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Lowest chunk score; documents sorted ascending.
    Min,
    /// Highest chunk score; documents sorted descending.
    Max,
    /// Mean chunk score, lowest-scoring chunk as representative; ascending.
    MeanMin,
    /// Mean chunk score, highest-scoring chunk as representative; descending.
    MeanMax,
}

impl Aggregation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::MeanMin => "mean_min",
            Self::MeanMax => "mean_max",
        }
    }

    fn picks_lowest(self) -> bool {
        matches!(self, Self::Min | Self::MeanMin)
    }

    fn uses_mean(self) -> bool {
        matches!(self, Self::MeanMin | Self::MeanMax)
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "mean_min" => Ok(Self::MeanMin),
            "mean_max" => Ok(Self::MeanMax),
            other => Err(format!(
                "unknown aggregation '{other}' (expected min, max, mean_min or mean_max)"
            )),
        }
    }
}

/// A parent document ranked by the scores of its matching chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentMatch {
    pub doc_id: DocumentId,
    pub score: f32,
    pub aggregation: Aggregation,
    /// Number of chunk matches that contributed.
    pub chunk_count: usize,
    /// The chosen chunk match, with its id replaced by the document id and
    /// its score by the aggregate.
    pub representative: Match,
}

/// Group matches by parent and aggregate each group into one document match.
///
/// # Examples
///
/// ```
/// use chunkscope::document::{Match, Tags};
/// use chunkscope::rank::{aggregate, Aggregation};
///
/// let m = |score| Match {
///     chunk_id: format!("c{score}"),
///     parent_id: "doc".to_string(),
///     text: String::new(),
///     score,
///     tags: Tags::new(),
/// };
/// let ranked = aggregate(&[m(0.9), m(0.5), m(0.7)], Aggregation::Min);
/// assert_eq!(ranked.len(), 1);
/// assert_eq!(ranked[0].score, 0.5);
/// assert_eq!(ranked[0].representative.chunk_id, "doc");
/// ```
pub fn aggregate(matches: &[Match], aggregation: Aggregation) -> Vec<DocumentMatch> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<&Match>> = HashMap::new();
    for m in matches {
        groups
            .entry(m.parent_id.as_str())
            .or_insert_with(|| {
                order.push(m.parent_id.as_str());
                Vec::new()
            })
            .push(m);
    }

    let mut ranked: Vec<DocumentMatch> = order
        .into_iter()
        .filter_map(|parent| {
            let group = groups.remove(parent)?;
            Some(aggregate_group(parent, &group, aggregation))
        })
        .collect();

    if aggregation.picks_lowest() {
        ranked.sort_by(|a, b| a.score.total_cmp(&b.score));
    } else {
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    }
    ranked
}

fn aggregate_group(parent: &str, group: &[&Match], aggregation: Aggregation) -> DocumentMatch {
    let mut best = group[0];
    for &m in &group[1..] {
        let better = if aggregation.picks_lowest() {
            m.score < best.score
        } else {
            m.score > best.score
        };
        if better {
            best = m;
        }
    }

    let score = if aggregation.uses_mean() {
        group.iter().map(|m| m.score).sum::<f32>() / group.len() as f32
    } else {
        best.score
    };

    let mut representative = best.clone();
    representative.chunk_id = parent.to_string();
    representative.score = score;

    DocumentMatch {
        doc_id: parent.to_string(),
        score,
        aggregation,
        chunk_count: group.len(),
        representative,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Tags;

    fn m(chunk: &str, parent: &str, score: f32) -> Match {
        Match {
            chunk_id: chunk.to_string(),
            parent_id: parent.to_string(),
            text: format!("text of {chunk}"),
            score,
            tags: Tags::new(),
        }
    }

    fn sample() -> Vec<Match> {
        vec![
            m("a1", "A", 0.9),
            m("b1", "B", 0.6),
            m("a2", "A", 0.5),
            m("a3", "A", 0.7),
            m("c1", "C", 0.8),
        ]
    }

    #[test]
    fn min_picks_lowest_and_sorts_ascending() {
        let ranked = aggregate(&sample(), Aggregation::Min);
        let ids: Vec<_> = ranked.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
        assert_eq!(ranked[0].score, 0.5);
        assert_eq!(ranked[0].representative.text, "text of a2");
        assert_eq!(ranked[0].representative.chunk_id, "A");
        assert_eq!(ranked[0].chunk_count, 3);
    }

    #[test]
    fn max_picks_highest_and_sorts_descending() {
        let ranked = aggregate(&sample(), Aggregation::Max);
        let ids: Vec<_> = ranked.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C", "B"]);
        assert_eq!(ranked[0].score, 0.9);
        assert_eq!(ranked[0].representative.text, "text of a1");
    }

    #[test]
    fn mean_min_averages_and_keeps_min_representative() {
        let ranked = aggregate(&sample(), Aggregation::MeanMin);
        let a = ranked.iter().find(|d| d.doc_id == "A").unwrap();
        assert!((a.score - 0.7).abs() < 1e-6);
        assert_eq!(a.representative.text, "text of a2");
        assert_eq!(a.aggregation, Aggregation::MeanMin);

        let ids: Vec<_> = ranked.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["B", "A", "C"]);
    }

    #[test]
    fn mean_max_sorts_descending() {
        let ranked = aggregate(&sample(), Aggregation::MeanMax);
        let ids: Vec<_> = ranked.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["C", "A", "B"]);
        assert_eq!(ranked[1].representative.text, "text of a1");
    }

    #[test]
    fn ties_keep_grouping_order() {
        let matches = vec![m("x", "X", 0.4), m("y", "Y", 0.4), m("z", "Z", 0.4)];
        for agg in [Aggregation::Min, Aggregation::Max, Aggregation::MeanMax] {
            let ids: Vec<_> = aggregate(&matches, agg)
                .into_iter()
                .map(|d| d.doc_id)
                .collect();
            assert_eq!(ids, vec!["X", "Y", "Z"]);
        }
    }

    #[test]
    fn empty_input() {
        assert!(aggregate(&[], Aggregation::Max).is_empty());
    }

    #[test]
    fn parse_names() {
        assert_eq!("mean-min".parse::<Aggregation>(), Ok(Aggregation::MeanMin));
        assert_eq!("MAX".parse::<Aggregation>(), Ok(Aggregation::Max));
        assert!("median".parse::<Aggregation>().is_err());
        assert_eq!(Aggregation::MeanMax.to_string(), "mean_max");
    }
}
