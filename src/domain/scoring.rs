//! Per-symbol and per-group scoring.
//!
//! Every metric is computed over the full label space {Down, Neutral, Up};
//! an absent class keeps its all-zero row and column.

use serde::Serialize;

use super::decision::{Outcome, SkippedBar};
use super::label::Label;
use super::simulation::FoldRun;

/// Rows are the realized label, columns the predicted one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ConfusionMatrix([[u64; 3]; 3]);

impl ConfusionMatrix {
    pub fn record(&mut self, actual: Label, predicted: Label) {
        self.0[actual.index()][predicted.index()] += 1;
    }

    pub fn count(&self, actual: Label, predicted: Label) -> u64 {
        self.0[actual.index()][predicted.index()]
    }

    pub fn rows(&self) -> &[[u64; 3]; 3] {
        &self.0
    }

    pub fn total(&self) -> u64 {
        self.0.iter().flatten().sum()
    }

    pub fn correct(&self) -> u64 {
        (0..3).map(|i| self.0[i][i]).sum()
    }

    pub fn actual_count(&self, label: Label) -> u64 {
        self.0[label.index()].iter().sum()
    }

    pub fn predicted_count(&self, label: Label) -> u64 {
        self.0.iter().map(|row| row[label.index()]).sum()
    }

    pub fn merge(&mut self, other: &ConfusionMatrix) {
        for (row, other_row) in self.0.iter_mut().zip(other.0.iter()) {
            for (cell, other_cell) in row.iter_mut().zip(other_row.iter()) {
                *cell += other_cell;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub label: Label,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: u64,
}

impl ClassMetrics {
    fn compute(confusion: &ConfusionMatrix, label: Label) -> Self {
        let tp = confusion.count(label, label) as f64;
        let support = confusion.actual_count(label);
        let predicted = confusion.predicted_count(label);
        let precision = ratio(tp, predicted as f64);
        let recall = ratio(tp, support as f64);
        let f1 = ratio(2.0 * precision * recall, precision + recall);
        ClassMetrics {
            label,
            precision,
            recall,
            f1,
            support,
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Running totals that can be merged across folds and symbols.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tally {
    pub confusion: ConfusionMatrix,
    pub contribution_sum: f64,
    pub growth: f64,
}

impl Default for Tally {
    fn default() -> Self {
        Tally {
            confusion: ConfusionMatrix::default(),
            contribution_sum: 0.0,
            growth: 1.0,
        }
    }
}

impl Tally {
    pub fn record(&mut self, outcome: &Outcome) {
        self.confusion.record(outcome.actual, outcome.decision.predicted);
        let contribution = outcome.contribution();
        self.contribution_sum += contribution;
        self.growth *= 1.0 + contribution;
    }

    /// Pools counts and contribution sums. Growth stays with its own series:
    /// bars of different symbols overlap in time and do not compound.
    pub fn merge(&mut self, other: &Tally) {
        self.confusion.merge(&other.confusion);
        self.contribution_sum += other.contribution_sum;
    }

    pub fn score(&self) -> Score {
        let samples = self.confusion.total();
        let per_class: Vec<ClassMetrics> = Label::ALL
            .iter()
            .map(|&l| ClassMetrics::compute(&self.confusion, l))
            .collect();
        let macro_f1 = per_class.iter().map(|m| m.f1).sum::<f64>() / Label::ALL.len() as f64;
        Score {
            samples,
            confusion: self.confusion,
            per_class,
            macro_f1,
            hit_rate: ratio(self.confusion.correct() as f64, samples as f64),
            expected_return: ratio(self.contribution_sum, samples as f64),
            cumulative_return: self.growth - 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Score {
    pub samples: u64,
    pub confusion: ConfusionMatrix,
    pub per_class: Vec<ClassMetrics>,
    pub macro_f1: f64,
    pub hit_rate: f64,
    /// Mean signed contribution per scored bar.
    pub expected_return: f64,
    /// Contributions compounded in evaluation order. For a group, the mean of
    /// its members' cumulative returns.
    pub cumulative_return: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolResult {
    pub symbol: String,
    pub folds: usize,
    pub skipped: usize,
    pub unlabeled: usize,
    #[serde(flatten)]
    pub score: Score,
    pub skipped_bars: Vec<SkippedBar>,
    #[serde(skip)]
    pub tally: Tally,
}

/// Scores a bare outcome sequence.
pub fn aggregate<'a>(symbol: &str, outcomes: impl IntoIterator<Item = &'a Outcome>) -> SymbolResult {
    let mut tally = Tally::default();
    for outcome in outcomes {
        tally.record(outcome);
    }
    SymbolResult {
        symbol: symbol.to_string(),
        folds: 0,
        skipped: 0,
        unlabeled: 0,
        score: tally.score(),
        skipped_bars: Vec::new(),
        tally,
    }
}

/// Scores the completed folds of one symbol, in fold order.
pub fn aggregate_folds(symbol: &str, runs: &[FoldRun]) -> SymbolResult {
    let mut result = aggregate(symbol, runs.iter().flat_map(|r| r.outcomes.iter()));
    result.folds = runs.len();
    result.skipped = runs.iter().map(|r| r.skipped.len()).sum();
    result.unlabeled = runs.iter().map(|r| r.unlabeled).sum();
    result.skipped_bars = runs.iter().flat_map(|r| r.skipped.iter().cloned()).collect();
    result
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupResult {
    pub group: String,
    /// Members that produced a result, in group order.
    pub members: Vec<String>,
    /// Members excluded from the run.
    pub missing: Vec<String>,
    pub skipped: usize,
    #[serde(flatten)]
    pub score: Score,
}

/// Pools the tallies of the group's members; cumulative return is the
/// equal-weight mean over members.
pub fn aggregate_group(
    group: &str,
    symbol_results: &[SymbolResult],
    group_symbols: &[String],
) -> GroupResult {
    let mut tally = Tally::default();
    let mut members = Vec::new();
    let mut missing = Vec::new();
    let mut skipped = 0;
    let mut cumulative_sum = 0.0;
    for symbol in group_symbols {
        match symbol_results.iter().find(|r| &r.symbol == symbol) {
            Some(result) => {
                tally.merge(&result.tally);
                skipped += result.skipped;
                cumulative_sum += result.score.cumulative_return;
                members.push(symbol.clone());
            }
            None => missing.push(symbol.clone()),
        }
    }
    let mut score = tally.score();
    score.cumulative_return = ratio(cumulative_sum, members.len() as f64);
    GroupResult {
        group: group.to_string(),
        members,
        missing,
        skipped,
        score,
    }
}

fn select_best<'a, T>(
    items: &'a [T],
    min_samples: u64,
    key: impl Fn(&T) -> (&str, &Score),
) -> Option<&'a T> {
    items
        .iter()
        .filter(|item| key(*item).1.samples >= min_samples)
        .min_by(|a, b| {
            let (name_a, score_a) = key(*a);
            let (name_b, score_b) = key(*b);
            score_b
                .expected_return
                .total_cmp(&score_a.expected_return)
                .then_with(|| score_b.hit_rate.total_cmp(&score_a.hit_rate))
                .then_with(|| name_a.cmp(name_b))
        })
}

/// Highest expected return among symbols with at least `min_samples` scored
/// bars; ties go to the higher hit rate, then the smaller symbol.
pub fn select_best_symbol(results: &[SymbolResult], min_samples: u64) -> Option<&SymbolResult> {
    select_best(results, min_samples, |r| (r.symbol.as_str(), &r.score))
}

pub fn select_best_group(results: &[GroupResult], min_samples: u64) -> Option<&GroupResult> {
    select_best(results, min_samples, |r| (r.group.as_str(), &r.score))
}
