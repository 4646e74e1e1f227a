//! Discovery control over local false-discovery values.
//!
//! Units are ranked by ascending local fdr (ties by unit id). The running
//! mean of the ranked values estimates the FDR of declaring every unit up to
//! that rank dynamic. At level `alpha` the discoveries are ranks `1..=r` for
//! the largest `r` whose running mean is `<= alpha`, so discovery sets are
//! nested across levels.

use std::collections::{HashMap, HashSet};

use crate::domain::PosteriorWeights;
use crate::error::FashError;

/// Anything that can hand the controller `(unit_id, local_fdr)` pairs.
///
/// FASH posteriors implement this; so does `ExternalLfdr` for values from a
/// competing method, which keeps the evaluation harness method-agnostic.
pub trait LocalFdrSource {
    fn method(&self) -> &str;
    fn local_fdr(&self) -> Vec<(String, f64)>;
}

impl LocalFdrSource for [PosteriorWeights] {
    fn method(&self) -> &str {
        "fash"
    }

    fn local_fdr(&self) -> Vec<(String, f64)> {
        self.iter()
            .map(|p| (p.unit_id.clone(), p.local_fdr()))
            .collect()
    }
}

/// Local fdr values computed elsewhere (e.g. a multivariate shrinkage fit).
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalLfdr {
    pub method: String,
    pub values: Vec<(String, f64)>,
}

impl LocalFdrSource for ExternalLfdr {
    fn method(&self) -> &str {
        &self.method
    }

    fn local_fdr(&self) -> Vec<(String, f64)> {
        self.values.clone()
    }
}

/// One ranked unit.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedUnit {
    /// 1-based rank.
    pub rank: usize,
    pub unit_id: String,
    pub local_fdr: f64,
    /// Running mean of local fdr over ranks `1..=rank`.
    pub cumulative_fdr: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoverySet {
    ranked: Vec<RankedUnit>,
    alpha: f64,
    cut: usize,
}

impl DiscoverySet {
    pub fn ranked(&self) -> &[RankedUnit] {
        &self.ranked
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Number of discoveries (the cut rank; 0 when nothing is declared).
    pub fn cut(&self) -> usize {
        self.cut
    }

    /// The full cumulative-FDR curve, aligned with `ranked()`.
    pub fn curve(&self) -> Vec<f64> {
        self.ranked.iter().map(|r| r.cumulative_fdr).collect()
    }

    pub fn discoveries(&self) -> &[RankedUnit] {
        &self.ranked[..self.cut]
    }

    pub fn is_discovery(&self, unit_id: &str) -> bool {
        self.discoveries().iter().any(|r| r.unit_id == unit_id)
    }

    /// Re-cut the same ranking at another level.
    pub fn cut_at(&self, alpha: f64) -> Result<DiscoverySet, FashError> {
        validate_alpha(alpha)?;
        Ok(DiscoverySet {
            ranked: self.ranked.clone(),
            alpha,
            cut: cut_rank(&self.ranked, alpha),
        })
    }
}

fn validate_alpha(alpha: f64) -> Result<(), FashError> {
    if !(alpha.is_finite() && (0.0..=1.0).contains(&alpha)) {
        return Err(FashError::config(format!(
            "alpha must be within [0, 1] (got {alpha})"
        )));
    }
    Ok(())
}

fn cut_rank(ranked: &[RankedUnit], alpha: f64) -> usize {
    ranked
        .iter()
        .rposition(|r| r.cumulative_fdr <= alpha)
        .map_or(0, |idx| idx + 1)
}

/// Rank units and cut at `alpha`.
pub fn discover(local_fdr: &[(String, f64)], alpha: f64) -> Result<DiscoverySet, FashError> {
    validate_alpha(alpha)?;
    if local_fdr.is_empty() {
        return Err(FashError::shape("no local fdr values to rank"));
    }

    let mut seen = HashSet::with_capacity(local_fdr.len());
    for (id, v) in local_fdr {
        if !seen.insert(id.as_str()) {
            return Err(FashError::shape(format!("duplicate unit id '{id}'")));
        }
        // Posterior normalization can overshoot 1 by a rounding error.
        if !(v.is_finite() && *v >= 0.0 && *v <= 1.0 + 1e-9) {
            return Err(FashError::shape(format!(
                "local fdr of unit '{id}' must be within [0, 1] (got {v})"
            )));
        }
    }

    let mut sorted: Vec<(&str, f64)> = local_fdr
        .iter()
        .map(|(id, v)| (id.as_str(), v.min(1.0)))
        .collect();
    sorted.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));

    let mut running = 0.0;
    let ranked: Vec<RankedUnit> = sorted
        .into_iter()
        .enumerate()
        .map(|(i, (id, v))| {
            running += v;
            RankedUnit {
                rank: i + 1,
                unit_id: id.to_string(),
                local_fdr: v,
                cumulative_fdr: running / (i + 1) as f64,
            }
        })
        .collect();

    let cut = cut_rank(&ranked, alpha);
    Ok(DiscoverySet { ranked, alpha, cut })
}

/// `discover` over any local-fdr source.
pub fn discover_from<S: LocalFdrSource + ?Sized>(
    source: &S,
    alpha: f64,
) -> Result<DiscoverySet, FashError> {
    discover(&source.local_fdr(), alpha)
}

/// Realized error rates of a discovery set against known labels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscoveryEvaluation {
    pub discoveries: usize,
    pub false_discoveries: usize,
    pub true_discoveries: usize,
    pub total_dynamic: usize,
    /// `false / discoveries`, 0 when nothing is discovered.
    pub fdr: f64,
    /// `true / total_dynamic`, 0 when no unit is dynamic.
    pub power: f64,
}

/// Compare discoveries with truth (`true` = dynamic).
///
/// Every ranked unit must have a label.
pub fn evaluate(
    set: &DiscoverySet,
    truth: &HashMap<String, bool>,
) -> Result<DiscoveryEvaluation, FashError> {
    let mut total_dynamic = 0;
    for r in set.ranked() {
        match truth.get(&r.unit_id) {
            Some(true) => total_dynamic += 1,
            Some(false) => {}
            None => {
                return Err(FashError::shape(format!(
                    "no truth label for unit '{}'",
                    r.unit_id
                )));
            }
        }
    }

    let true_discoveries = set
        .discoveries()
        .iter()
        .filter(|r| truth.get(&r.unit_id).copied().unwrap_or(false))
        .count();
    let discoveries = set.cut();
    let false_discoveries = discoveries - true_discoveries;

    let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };

    Ok(DiscoveryEvaluation {
        discoveries,
        false_discoveries,
        true_discoveries,
        total_dynamic,
        fdr: ratio(false_discoveries, discoveries),
        power: ratio(true_discoveries, total_dynamic),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;
    use rand::rngs::StdRng;

    fn pairs(v: &[(&str, f64)]) -> Vec<(String, f64)> {
        v.iter().map(|(id, x)| (id.to_string(), *x)).collect()
    }

    #[test]
    fn ranks_ascending_with_running_mean() {
        let set = discover(&pairs(&[("c", 0.9), ("a", 0.1), ("b", 0.0)]), 0.05).unwrap();
        let ids: Vec<&str> = set.ranked().iter().map(|r| r.unit_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        let curve = set.curve();
        assert!((curve[0] - 0.0).abs() < 1e-12);
        assert!((curve[1] - 0.05).abs() < 1e-12);
        assert!((curve[2] - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(set.cut(), 2);
        assert!(set.is_discovery("a"));
        assert!(!set.is_discovery("c"));
    }

    #[test]
    fn ties_are_broken_by_unit_id() {
        let set = discover(&pairs(&[("z", 0.2), ("m", 0.2), ("a", 0.2)]), 0.5).unwrap();
        let ids: Vec<&str> = set.ranked().iter().map(|r| r.unit_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "m", "z"]);
        assert_eq!(set.cut(), 3);
    }

    #[test]
    fn nothing_discovered_below_smallest_value() {
        let set = discover(&pairs(&[("a", 0.3), ("b", 0.4)]), 0.05).unwrap();
        assert_eq!(set.cut(), 0);
        assert!(set.discoveries().is_empty());
    }

    #[test]
    fn discovery_sets_are_nested_across_alpha() {
        let mut rng = StdRng::seed_from_u64(11);
        let values: Vec<(String, f64)> = (0..60)
            .map(|i| (format!("u{i:02}"), rng.gen_range(0.0..1.0_f64).powi(2)))
            .collect();
        let base = discover(&values, 0.0).unwrap();

        let mut prev = 0;
        for step in 0..=20 {
            let alpha = step as f64 / 20.0;
            let set = base.cut_at(alpha).unwrap();
            assert!(set.cut() >= prev, "cut shrank at alpha={alpha}");
            assert_eq!(&set.ranked()[..prev], &base.ranked()[..prev]);
            prev = set.cut();
        }
        assert_eq!(prev, values.len());
    }

    #[test]
    fn rejects_bad_inputs() {
        assert!(matches!(discover(&[], 0.05), Err(FashError::ShapeMismatch(_))));
        assert!(matches!(
            discover(&pairs(&[("a", 0.1)]), 1.5),
            Err(FashError::InvalidConfig(_))
        ));
        assert!(discover(&pairs(&[("a", f64::NAN)]), 0.05).is_err());
        assert!(discover(&pairs(&[("a", 0.1), ("a", 0.2)]), 0.05).is_err());
    }

    #[test]
    fn sources_feed_the_same_controller() {
        let posts = vec![
            PosteriorWeights {
                unit_id: "a".to_string(),
                probs: vec![0.01, 0.99],
            },
            PosteriorWeights {
                unit_id: "b".to_string(),
                probs: vec![0.9, 0.1],
            },
        ];
        let external = ExternalLfdr {
            method: "mash".to_string(),
            values: pairs(&[("a", 0.01), ("b", 0.9)]),
        };
        let from_posts = discover_from(posts.as_slice(), 0.05).unwrap();
        let from_external = discover_from(&external, 0.05).unwrap();
        assert_eq!(from_posts, from_external);
        assert_eq!(posts.as_slice().method(), "fash");
        assert_eq!(external.method(), "mash");
    }

    #[test]
    fn evaluation_counts_false_and_true_discoveries() {
        let set = discover(&pairs(&[("a", 0.0), ("b", 0.0), ("c", 0.1), ("d", 0.9)]), 0.05).unwrap();
        assert_eq!(set.cut(), 3);
        let truth: HashMap<String, bool> = [("a", true), ("b", false), ("c", true), ("d", true)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let eval = evaluate(&set, &truth).unwrap();
        assert_eq!(eval.discoveries, 3);
        assert_eq!(eval.false_discoveries, 1);
        assert_eq!(eval.true_discoveries, 2);
        assert!((eval.fdr - 1.0 / 3.0).abs() < 1e-12);
        assert!((eval.power - 2.0 / 3.0).abs() < 1e-12);

        let mut partial = truth.clone();
        partial.remove("d");
        assert!(evaluate(&set, &partial).is_err());
    }
}
