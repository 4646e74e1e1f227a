//! Terminal formatting.
//!
//! Kept apart from the numerical code so output changes stay local.

use crate::error::FashError;
use crate::fit::MixtureFit;
use crate::io::ingest::IngestedData;
use crate::report::discovery::{DiscoveryEvaluation, DiscoverySet, RankedUnit};

const MAX_LISTED_FAILURES: usize = 10;

/// Dataset section: what was read and what survived validation.
pub fn format_dataset(ingest: &IngestedData) -> String {
    let s = &ingest.stats;
    let mut out = String::new();
    out.push_str("=== fash - Functional Adaptive Shrinkage ===\n");
    out.push_str(&format!(
        "Rows: read={} used={} skipped={}\n",
        ingest.rows_read,
        ingest.rows_used,
        ingest.row_errors.len()
    ));
    out.push_str(&format!(
        "Units: n={} | obs/unit=[{}, {}] | time=[{:.3}, {:.3}]\n",
        s.n_units, s.min_obs, s.max_obs, s.time_min, s.time_max
    ));
    for e in ingest.row_errors.iter().take(MAX_LISTED_FAILURES) {
        let id = e.id.as_deref().unwrap_or("-");
        out.push_str(&format!("  line {:>5} ({id}): {}\n", e.line, e.message));
    }
    if ingest.row_errors.len() > MAX_LISTED_FAILURES {
        out.push_str(&format!(
            "  ... {} more row errors\n",
            ingest.row_errors.len() - MAX_LISTED_FAILURES
        ));
    }
    out
}

/// Optimizer diagnostics plus the fitted weights (pruned points marked).
pub fn format_mixture(fit: &MixtureFit, n_units: usize) -> String {
    let mut out = String::new();
    out.push_str("\nMixture fit:\n");
    out.push_str(&format!(
        "- units={} grid points={} iterations={} converged={}\n",
        n_units,
        fit.weights.len(),
        fit.iterations,
        fit.converged
    ));
    out.push_str(&format!("- log-likelihood: {:.6}\n", fit.log_likelihood));
    out.push_str(&format!(
        "- null weight (pi_0): {:.6}\n",
        fit.weights.null_weight()
    ));

    out.push_str(&format!("{:>4} {:>12} {:>12}\n", "j", "smoothness", "weight"));
    out.push_str(format!("{:-<4} {:-<12} {:-<12}\n", "", "", "").as_str());
    for (j, (s, w)) in fit
        .weights
        .grid()
        .values()
        .iter()
        .zip(fit.weights.weights())
        .enumerate()
    {
        let mark = if fit.pruned.contains(&j) { " (pruned)" } else { "" };
        out.push_str(&format!("{j:>4} {s:>12.5} {w:>12.6}{mark}\n"));
    }
    out
}

/// Units dropped at grid build and units with a degenerate likelihood row.
pub fn format_failures(dropped: &[FashError], degenerate: &[FashError]) -> String {
    if dropped.is_empty() && degenerate.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    if !dropped.is_empty() {
        out.push_str(&format!("\nDropped evaluations ({}):\n", dropped.len()));
        out.push_str(&list_errors(dropped));
    }
    if !degenerate.is_empty() {
        out.push_str(&format!("\nDegenerate units ({}):\n", degenerate.len()));
        out.push_str(&list_errors(degenerate));
    }
    out
}

fn list_errors(errors: &[FashError]) -> String {
    let mut out = String::new();
    for e in errors.iter().take(MAX_LISTED_FAILURES) {
        out.push_str(&format!("  {e}\n"));
    }
    if errors.len() > MAX_LISTED_FAILURES {
        out.push_str(&format!("  ... {} more\n", errors.len() - MAX_LISTED_FAILURES));
    }
    out
}

/// Discovery header plus the top-ranked units.
pub fn format_discoveries(set: &DiscoverySet, method: &str, top_n: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "\nDiscoveries ({method}): {} of {} units at alpha={}\n",
        set.cut(),
        set.ranked().len(),
        set.alpha()
    ));
    if let Some(last) = set.discoveries().last() {
        out.push_str(&format!(
            "Estimated FDR at cut: {:.6} (lfdr threshold {:.6})\n",
            last.cumulative_fdr, last.local_fdr
        ));
    }
    out.push('\n');
    out.push_str(&format!("Top {} by local fdr:\n", top_n.min(set.ranked().len())));
    out.push_str(&format_table(&set.ranked()[..top_n.min(set.ranked().len())], set.cut()));
    out
}

/// Realized error rates against known labels.
pub fn format_evaluation(eval: &DiscoveryEvaluation) -> String {
    format!(
        "\nAgainst truth: discoveries={} false={} true={} of {} dynamic | FDR={:.4} power={:.4}\n",
        eval.discoveries,
        eval.false_discoveries,
        eval.true_discoveries,
        eval.total_dynamic,
        eval.fdr,
        eval.power
    )
}

fn format_table(rows: &[RankedUnit], cut: usize) -> String {
    let mut out = String::new();
    out.push_str(
        format!(
            "{:>6} {:<24} {:>12} {:>14} {:<9}\n",
            "rank", "unit_id", "lfdr", "cum_fdr", "discovery"
        )
        .trim_end(),
    );
    out.push('\n');
    out.push_str(format!("{:-<6} {:-<24} {:-<12} {:-<14} {:-<9}\n", "", "", "", "", "").trim_end());
    out.push('\n');

    for r in rows {
        let flag = if r.rank <= cut { "*" } else { "" };
        out.push_str(
            format!(
                "{:>6} {:<24} {:>12.6} {:>14.6} {:<9}\n",
                r.rank,
                truncate(&r.unit_id, 24),
                r.local_fdr,
                r.cumulative_fdr,
                flag
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('.');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::discovery::discover;

    #[test]
    fn discovery_table_marks_the_cut() {
        let lfdr = vec![
            ("a".to_string(), 0.0),
            ("b".to_string(), 0.02),
            ("c".to_string(), 0.9),
        ];
        let set = discover(&lfdr, 0.05).unwrap();
        let text = format_discoveries(&set, "fash", 10);
        assert!(text.contains("2 of 3 units at alpha=0.05"));
        let rows: Vec<&str> = text.lines().filter(|l| l.trim_start().starts_with(char::is_numeric)).collect();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].ends_with('*'));
        assert!(rows[1].ends_with('*'));
        assert!(!rows[2].ends_with('*'));
    }

    #[test]
    fn truncate_marks_long_ids() {
        assert_eq!(truncate("abcdef", 4), "abc.");
        assert_eq!(truncate("abc", 4), "abc");
    }

    #[test]
    fn no_failures_prints_nothing() {
        assert!(format_failures(&[], &[]).is_empty());
    }
}
