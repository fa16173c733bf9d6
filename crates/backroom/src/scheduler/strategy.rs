//! Endpoint selection strategies.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::error::ParseError;

const SCORE_EPSILON: f64 = 1e-9;

/// Rule used to pick an endpoint among the eligible ones.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Minimum latency.
    Fastest,
    /// Maximum declared accuracy, then reliability.
    MostAccurate,
    /// Minimum cost per unit.
    CostOptimized,
    /// Maximum `speed + accuracy - cost`, each min-max normalized over the
    /// candidates.
    #[default]
    LoadBalanced,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Fastest => "fastest",
            Strategy::MostAccurate => "most-accurate",
            Strategy::CostOptimized => "cost-optimized",
            Strategy::LoadBalanced => "load-balanced",
        }
    }

    /// Deterministically picks one endpoint. Ties go to the lowest current
    /// load, then to the lowest id.
    pub fn select<'a>(&self, candidates: &[&'a Endpoint]) -> Option<&'a Endpoint> {
        if candidates.is_empty() {
            return None;
        }

        match self {
            Strategy::Fastest => pick_best(candidates, |a, b| {
                b.latency_ms.total_cmp(&a.latency_ms)
            }),
            Strategy::MostAccurate => pick_best(candidates, |a, b| {
                a.accuracy
                    .total_cmp(&b.accuracy)
                    .then(a.reliability.total_cmp(&b.reliability))
            }),
            Strategy::CostOptimized => pick_best(candidates, |a, b| {
                b.cost_per_unit.total_cmp(&a.cost_per_unit)
            }),
            Strategy::LoadBalanced => {
                let scorer = CompositeScorer::new(candidates);
                pick_best(candidates, |a, b| scorer.bucket(a).cmp(&scorer.bucket(b)))
            }
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fastest" => Ok(Strategy::Fastest),
            "most-accurate" => Ok(Strategy::MostAccurate),
            "cost-optimized" => Ok(Strategy::CostOptimized),
            "load-balanced" => Ok(Strategy::LoadBalanced),
            other => Err(ParseError::InvalidStrategy(other.to_string())),
        }
    }
}

/// Returns the candidate that is greatest under `better`, breaking ties by
/// lowest load and then lowest id.
fn pick_best<'a, F>(candidates: &[&'a Endpoint], better: F) -> Option<&'a Endpoint>
where
    F: Fn(&Endpoint, &Endpoint) -> Ordering,
{
    candidates.iter().copied().max_by(|a, b| {
        better(a, b)
            .then_with(|| b.load.cmp(&a.load))
            .then_with(|| b.id.cmp(&a.id))
    })
}

struct Range {
    min: f64,
    max: f64,
}

impl Range {
    fn of<I: Iterator<Item = f64>>(values: I) -> Self {
        values.fold(
            Range {
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
            },
            |r, v| Range {
                min: r.min.min(v),
                max: r.max.max(v),
            },
        )
    }

    /// Position of `value` in the range, 0..=1. A degenerate range maps to `flat`.
    fn normalize(&self, value: f64, flat: f64) -> f64 {
        let span = self.max - self.min;
        if span.abs() < SCORE_EPSILON {
            flat
        } else {
            (value - self.min) / span
        }
    }
}

struct CompositeScorer {
    latency: Range,
    accuracy: Range,
    cost: Range,
}

impl CompositeScorer {
    fn new(candidates: &[&Endpoint]) -> Self {
        Self {
            latency: Range::of(candidates.iter().map(|e| e.latency_ms)),
            accuracy: Range::of(candidates.iter().map(|e| e.accuracy)),
            cost: Range::of(candidates.iter().map(|e| e.cost_per_unit)),
        }
    }

    fn score(&self, endpoint: &Endpoint) -> f64 {
        let speed = 1.0 - self.latency.normalize(endpoint.latency_ms, 0.0);
        let accuracy = self.accuracy.normalize(endpoint.accuracy, 1.0);
        let cost = self.cost.normalize(endpoint.cost_per_unit, 0.0);
        speed + accuracy - cost
    }

    /// The score rounded to `SCORE_EPSILON` steps, so near-equal scores
    /// compare equal and the order stays total.
    fn bucket(&self, endpoint: &Endpoint) -> i64 {
        (self.score(endpoint) / SCORE_EPSILON).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(id: &str, latency: f64, accuracy: f64, cost: f64) -> Endpoint {
        Endpoint::new(id, id, "provider", "region").with_performance(latency, accuracy, cost)
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!("fastest".parse::<Strategy>().unwrap(), Strategy::Fastest);
        assert_eq!(
            "most-accurate".parse::<Strategy>().unwrap(),
            Strategy::MostAccurate
        );
        assert_eq!(
            "round-robin".parse::<Strategy>(),
            Err(ParseError::InvalidStrategy("round-robin".to_string()))
        );
        assert_eq!(Strategy::default(), Strategy::LoadBalanced);
    }

    #[test]
    fn test_strategy_serde_names() {
        let json = serde_json::to_string(&Strategy::CostOptimized).unwrap();
        assert_eq!(json, "\"cost-optimized\"");
    }

    #[test]
    fn test_cost_optimized_picks_cheapest() {
        let a = endpoint("A", 100.0, 90.0, 0.03);
        let b = endpoint("B", 100.0, 90.0, 0.01);
        let c = endpoint("C", 100.0, 90.0, 0.05);
        let picked = Strategy::CostOptimized.select(&[&a, &b, &c]).unwrap();
        assert_eq!(picked.id, "B");
    }

    #[test]
    fn test_fastest_picks_lowest_latency() {
        let a = endpoint("A", 120.0, 90.0, 0.03);
        let b = endpoint("B", 85.0, 90.0, 0.03);
        let picked = Strategy::Fastest.select(&[&a, &b]).unwrap();
        assert_eq!(picked.id, "B");
    }

    #[test]
    fn test_most_accurate_picks_highest_accuracy() {
        let a = endpoint("A", 120.0, 95.0, 0.03);
        let b = endpoint("B", 150.0, 98.0, 0.075);
        let picked = Strategy::MostAccurate.select(&[&a, &b]).unwrap();
        assert_eq!(picked.id, "B");
    }

    #[test]
    fn test_ties_break_on_load_then_id() {
        let mut a = endpoint("A", 100.0, 90.0, 0.03);
        let mut b = endpoint("B", 100.0, 90.0, 0.03);
        a.load = 30;
        b.load = 10;
        assert_eq!(Strategy::Fastest.select(&[&a, &b]).unwrap().id, "B");

        b.load = 30;
        assert_eq!(Strategy::Fastest.select(&[&b, &a]).unwrap().id, "A");
    }

    #[test]
    fn test_load_balanced_composite() {
        // Fast, accurate and cheap dominates.
        let good = endpoint("good", 90.0, 95.0, 0.025);
        let slow = endpoint("slow", 200.0, 88.0, 0.05);
        let pricey = endpoint("pricey", 150.0, 98.0, 0.075);
        let picked = Strategy::LoadBalanced
            .select(&[&slow, &pricey, &good])
            .unwrap();
        assert_eq!(picked.id, "good");
    }

    #[test]
    fn test_load_balanced_ties_break_on_load() {
        let mut a = endpoint("a", 100.0, 90.0, 0.03);
        let b = endpoint("b", 100.0, 90.0, 0.03);
        a.load = 50;
        let picked = Strategy::LoadBalanced.select(&[&a, &b]).unwrap();
        assert_eq!(picked.id, "b");
    }

    #[test]
    fn test_load_balanced_near_ties_ignore_input_order() {
        // All three score 1.0 up to rounding noise.
        let a = endpoint("n1", 130.0, 83.0, 0.01);
        let b = endpoint("n2", 100.0, 80.0, 0.01);
        let c = endpoint("n3", 200.0, 90.0, 0.01);
        let orders: [[&Endpoint; 3]; 6] = [
            [&a, &b, &c],
            [&a, &c, &b],
            [&b, &a, &c],
            [&b, &c, &a],
            [&c, &a, &b],
            [&c, &b, &a],
        ];
        for order in orders {
            assert_eq!(Strategy::LoadBalanced.select(&order).unwrap().id, "n1");
        }
    }

    #[test]
    fn test_select_empty() {
        assert!(Strategy::Fastest.select(&[]).is_none());
    }
}
