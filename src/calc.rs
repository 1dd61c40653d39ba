use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One raw grade cell. `Unset` means "not yet graded" and is distinct from a
/// scored zero; it sums as 0 but completeness checks can still see it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Option<f64>", into = "Option<f64>")]
pub enum Score {
    #[default]
    Unset,
    Marked(f64),
}

impl Score {
    pub fn or_zero(self) -> f64 {
        match self {
            Score::Unset => 0.0,
            Score::Marked(v) => v,
        }
    }

    pub fn is_set(self) -> bool {
        matches!(self, Score::Marked(_))
    }
}

impl From<Option<f64>> for Score {
    fn from(v: Option<f64>) -> Self {
        match v {
            // Non-finite input degrades to Unset rather than poisoning sums.
            Some(x) if x.is_finite() => Score::Marked(x),
            _ => Score::Unset,
        }
    }
}

impl From<Score> for Option<f64> {
    fn from(s: Score) -> Self {
        match s {
            Score::Unset => None,
            Score::Marked(v) => Some(v),
        }
    }
}

/// The six raw-entry slots of one subject for one student.
/// Semester and general totals are derived, never entered.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GradeRow {
    pub period1: Score,
    pub period2: Score,
    pub exam1: Score,
    pub period3: Score,
    pub period4: Score,
    pub exam2: Score,
}

impl GradeRow {
    pub fn sem1_total(&self) -> f64 {
        self.period1.or_zero() + self.period2.or_zero() + self.exam1.or_zero()
    }

    pub fn sem2_total(&self) -> f64 {
        self.period3.or_zero() + self.period4.or_zero() + self.exam2.or_zero()
    }

    pub fn general_total(&self) -> f64 {
        self.sem1_total() + self.sem2_total()
    }
}

/// Maximum attainable score per grading slot, defined by curriculum.
/// A max of 0 means "not evaluated in that slot". The semester/general maxima
/// are stored values, not derived at read time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubjectMaxima {
    pub period1: f64,
    pub period2: f64,
    pub exam1: f64,
    pub sem1_total: f64,
    pub period3: f64,
    pub period4: f64,
    pub exam2: f64,
    pub sem2_total: f64,
    pub general_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub name: String,
    pub maxima: SubjectMaxima,
}

/// Curriculum grouping: the subjects (with maxima) that apply to a set of
/// class levels. Static reference data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub category: String,
    pub levels: Vec<String>,
    pub subjects: Vec<Subject>,
}

/// The nine aggregate columns, summed across subjects.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Totals {
    pub period1: f64,
    pub period2: f64,
    pub exam1: f64,
    pub sem1_total: f64,
    pub period3: f64,
    pub period4: f64,
    pub exam2: f64,
    pub sem2_total: f64,
    pub general_total: f64,
}

impl Totals {
    pub fn column(&self, col: AggregateColumn) -> f64 {
        match col {
            AggregateColumn::Period1 => self.period1,
            AggregateColumn::Period2 => self.period2,
            AggregateColumn::Exam1 => self.exam1,
            AggregateColumn::Sem1Total => self.sem1_total,
            AggregateColumn::Period3 => self.period3,
            AggregateColumn::Period4 => self.period4,
            AggregateColumn::Exam2 => self.exam2,
            AggregateColumn::Sem2Total => self.sem2_total,
            AggregateColumn::GeneralTotal => self.general_total,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateColumn {
    Period1,
    Period2,
    Exam1,
    Sem1Total,
    Period3,
    Period4,
    Exam2,
    Sem2Total,
    GeneralTotal,
}

impl AggregateColumn {
    pub const ALL: [AggregateColumn; 9] = [
        AggregateColumn::Period1,
        AggregateColumn::Period2,
        AggregateColumn::Exam1,
        AggregateColumn::Sem1Total,
        AggregateColumn::Period3,
        AggregateColumn::Period4,
        AggregateColumn::Exam2,
        AggregateColumn::Sem2Total,
        AggregateColumn::GeneralTotal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AggregateColumn::Period1 => "period1",
            AggregateColumn::Period2 => "period2",
            AggregateColumn::Exam1 => "exam1",
            AggregateColumn::Sem1Total => "sem1Total",
            AggregateColumn::Period3 => "period3",
            AggregateColumn::Period4 => "period4",
            AggregateColumn::Exam2 => "exam2",
            AggregateColumn::Sem2Total => "sem2Total",
            AggregateColumn::GeneralTotal => "generalTotal",
        }
    }
}

/// The six raw-entry slots and their mapping into the nine-column maxima.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawSlot {
    Period1,
    Period2,
    Exam1,
    Period3,
    Period4,
    Exam2,
}

impl RawSlot {
    pub const ALL: [RawSlot; 6] = [
        RawSlot::Period1,
        RawSlot::Period2,
        RawSlot::Exam1,
        RawSlot::Period3,
        RawSlot::Period4,
        RawSlot::Exam2,
    ];

    pub fn key(self) -> &'static str {
        match self {
            RawSlot::Period1 => "period1",
            RawSlot::Period2 => "period2",
            RawSlot::Exam1 => "exam1",
            RawSlot::Period3 => "period3",
            RawSlot::Period4 => "period4",
            RawSlot::Exam2 => "exam2",
        }
    }

    pub fn bound(self, maxima: &SubjectMaxima) -> f64 {
        match self {
            RawSlot::Period1 => maxima.period1,
            RawSlot::Period2 => maxima.period2,
            RawSlot::Exam1 => maxima.exam1,
            RawSlot::Period3 => maxima.period3,
            RawSlot::Period4 => maxima.period4,
            RawSlot::Exam2 => maxima.exam2,
        }
    }

    pub fn get(self, row: &GradeRow) -> Score {
        match self {
            RawSlot::Period1 => row.period1,
            RawSlot::Period2 => row.period2,
            RawSlot::Exam1 => row.exam1,
            RawSlot::Period3 => row.period3,
            RawSlot::Period4 => row.period4,
            RawSlot::Exam2 => row.exam2,
        }
    }

    pub fn set(self, row: &mut GradeRow, score: Score) {
        match self {
            RawSlot::Period1 => row.period1 = score,
            RawSlot::Period2 => row.period2 = score,
            RawSlot::Exam1 => row.exam1 = score,
            RawSlot::Period3 => row.period3 = score,
            RawSlot::Period4 => row.period4 = score,
            RawSlot::Exam2 => row.exam2 = score,
        }
    }
}

/// A raw entry is acceptable when `0 <= value <= slot max`.
pub fn slot_value_in_bounds(maxima: &SubjectMaxima, slot: RawSlot, value: f64) -> bool {
    value.is_finite() && value >= 0.0 && value <= slot.bound(maxima)
}

/// Column-wise sums over all subject rows of one student.
/// Unset counts as 0; empty input yields all-zero totals.
pub fn compute_totals(rows: &[GradeRow]) -> Totals {
    let mut t = Totals::default();
    for row in rows {
        t.period1 += row.period1.or_zero();
        t.period2 += row.period2.or_zero();
        t.exam1 += row.exam1.or_zero();
        t.sem1_total += row.sem1_total();
        t.period3 += row.period3.or_zero();
        t.period4 += row.period4.or_zero();
        t.exam2 += row.exam2.or_zero();
        t.sem2_total += row.sem2_total();
        t.general_total += row.general_total();
    }
    t
}

/// Column-wise sums of subject maxima across every subject of every section.
/// Callers filter sections to the relevant class level first.
pub fn compute_max_totals(sections: &[Section]) -> Totals {
    let mut t = Totals::default();
    for section in sections {
        for subject in &section.subjects {
            let m = &subject.maxima;
            t.period1 += m.period1;
            t.period2 += m.period2;
            t.exam1 += m.exam1;
            t.sem1_total += m.sem1_total;
            t.period3 += m.period3;
            t.period4 += m.period4;
            t.exam2 += m.exam2;
            t.sem2_total += m.sem2_total;
            t.general_total += m.general_total;
        }
    }
    t
}

/// Percentage strings per column, 1 decimal, no `%` suffix.
/// A column with max <= 0 (or a non-finite total) renders as the literal "0"
/// so a partially graded sheet still produces a coherent card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Percentages {
    pub period1: String,
    pub period2: String,
    pub exam1: String,
    pub sem1_total: String,
    pub period3: String,
    pub period4: String,
    pub exam2: String,
    pub sem2_total: String,
    pub general_total: String,
}

fn percentage_of(total: f64, max: f64) -> String {
    if max <= 0.0 || !total.is_finite() {
        return "0".to_string();
    }
    format!("{:.1}", total / max * 100.0)
}

pub fn compute_percentages(totals: &Totals, max_totals: &Totals) -> Percentages {
    Percentages {
        period1: percentage_of(totals.period1, max_totals.period1),
        period2: percentage_of(totals.period2, max_totals.period2),
        exam1: percentage_of(totals.exam1, max_totals.exam1),
        sem1_total: percentage_of(totals.sem1_total, max_totals.sem1_total),
        period3: percentage_of(totals.period3, max_totals.period3),
        period4: percentage_of(totals.period4, max_totals.period4),
        exam2: percentage_of(totals.exam2, max_totals.exam2),
        sem2_total: percentage_of(totals.sem2_total, max_totals.sem2_total),
        general_total: percentage_of(totals.general_total, max_totals.general_total),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ranking {
    /// 1-based position; 0 means the target is not in the peer set.
    pub rank: usize,
    pub total: usize,
}

/// Strict ordinal ranking: stable sort by aggregate descending, position of
/// the target + 1. Tied students keep their insertion order and do NOT share
/// a rank. Callers pass peers as an ordered slice because the tie rule
/// depends on insertion order; a hash map would lose it.
pub fn compute_ranking(peers: &[(String, f64)], target: &str) -> Ranking {
    let mut order: Vec<(&str, f64)> = peers
        .iter()
        .map(|(id, v)| (id.as_str(), if v.is_finite() { *v } else { 0.0 }))
        .collect();
    order.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let rank = order
        .iter()
        .position(|(id, _)| *id == target)
        .map(|i| i + 1)
        .unwrap_or(0);

    Ranking {
        rank,
        total: peers.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(vals: [Option<f64>; 6]) -> GradeRow {
        GradeRow {
            period1: vals[0].into(),
            period2: vals[1].into(),
            exam1: vals[2].into(),
            period3: vals[3].into(),
            period4: vals[4].into(),
            exam2: vals[5].into(),
        }
    }

    #[test]
    fn empty_inputs_yield_zero_totals() {
        assert_eq!(compute_totals(&[]), Totals::default());
        assert_eq!(compute_max_totals(&[]), Totals::default());
    }

    #[test]
    fn totals_are_column_sums() {
        let rows = vec![
            row([
                Some(10.0),
                Some(8.0),
                Some(15.0),
                Some(12.0),
                Some(9.0),
                Some(14.0),
            ]),
            row([
                Some(5.0),
                Some(5.0),
                Some(10.0),
                Some(5.0),
                Some(5.0),
                Some(10.0),
            ]),
        ];
        let t = compute_totals(&rows);
        assert_eq!(t.period1, 15.0);
        assert_eq!(t.period2, 13.0);
        assert_eq!(t.exam1, 25.0);
        assert_eq!(t.sem1_total, 53.0);
        assert_eq!(t.period3, 17.0);
        assert_eq!(t.period4, 14.0);
        assert_eq!(t.exam2, 24.0);
        assert_eq!(t.sem2_total, 55.0);
        assert_eq!(t.general_total, 108.0);
    }

    #[test]
    fn unset_counts_as_zero_in_sums() {
        let rows = vec![row([Some(10.0), None, Some(5.0), None, None, None])];
        let t = compute_totals(&rows);
        assert_eq!(t.period1, 10.0);
        assert_eq!(t.period2, 0.0);
        assert_eq!(t.sem1_total, 15.0);
        assert_eq!(t.sem2_total, 0.0);
        assert_eq!(t.general_total, 15.0);
    }

    #[test]
    fn max_totals_sum_every_subject() {
        let subject = |p: f64| Subject {
            name: "subj".to_string(),
            maxima: SubjectMaxima {
                period1: p,
                period2: p,
                exam1: 2.0 * p,
                sem1_total: 4.0 * p,
                period3: p,
                period4: p,
                exam2: 2.0 * p,
                sem2_total: 4.0 * p,
                general_total: 8.0 * p,
            },
        };
        let sections = vec![
            Section {
                category: "Langues".to_string(),
                levels: vec!["1A".to_string()],
                subjects: vec![subject(10.0), subject(20.0)],
            },
            Section {
                category: "Sciences".to_string(),
                levels: vec!["1A".to_string()],
                subjects: vec![subject(40.0)],
            },
        ];
        let t = compute_max_totals(&sections);
        assert_eq!(t.period1, 70.0);
        assert_eq!(t.exam1, 140.0);
        assert_eq!(t.sem1_total, 280.0);
        assert_eq!(t.general_total, 560.0);
    }

    #[test]
    fn percentage_zero_max_is_literal_zero() {
        let totals = Totals {
            period1: 42.0,
            ..Totals::default()
        };
        let p = compute_percentages(&totals, &Totals::default());
        assert_eq!(p.period1, "0");
        assert_eq!(p.general_total, "0");
    }

    #[test]
    fn percentage_one_decimal() {
        let totals = Totals {
            period1: 15.0,
            ..Totals::default()
        };
        let max = Totals {
            period1: 20.0,
            ..Totals::default()
        };
        let p = compute_percentages(&totals, &max);
        assert_eq!(p.period1, "75.0");
    }

    #[test]
    fn ranking_ties_keep_insertion_order() {
        let peers = vec![
            ("A".to_string(), 90.0),
            ("B".to_string(), 80.0),
            ("C".to_string(), 90.0),
        ];
        // A sorts before C on the tie, so C is strictly second. No shared rank.
        assert_eq!(compute_ranking(&peers, "A"), Ranking { rank: 1, total: 3 });
        assert_eq!(compute_ranking(&peers, "C"), Ranking { rank: 2, total: 3 });
        assert_eq!(compute_ranking(&peers, "B"), Ranking { rank: 3, total: 3 });
    }

    #[test]
    fn ranking_absent_target_is_zero() {
        let peers = vec![("A".to_string(), 90.0), ("B".to_string(), 80.0)];
        assert_eq!(compute_ranking(&peers, "Z"), Ranking { rank: 0, total: 2 });
    }

    #[test]
    fn aggregation_is_idempotent() {
        let rows = vec![row([Some(3.0), Some(4.0), None, Some(5.0), None, None])];
        let a = compute_totals(&rows);
        let b = compute_totals(&rows);
        assert_eq!(a, b);

        let max = Totals {
            period1: 10.0,
            period2: 10.0,
            sem1_total: 30.0,
            ..Totals::default()
        };
        assert_eq!(compute_percentages(&a, &max), compute_percentages(&b, &max));

        let peers = vec![("A".to_string(), 7.0), ("B".to_string(), 12.0)];
        assert_eq!(compute_ranking(&peers, "A"), compute_ranking(&peers, "A"));
    }

    #[test]
    fn slot_bounds_use_raw_entry_maxima_only() {
        let maxima = SubjectMaxima {
            period1: 10.0,
            period2: 10.0,
            exam1: 20.0,
            sem1_total: 40.0,
            period3: 10.0,
            period4: 10.0,
            exam2: 20.0,
            sem2_total: 40.0,
            general_total: 80.0,
        };
        assert!(slot_value_in_bounds(&maxima, RawSlot::Period1, 0.0));
        assert!(slot_value_in_bounds(&maxima, RawSlot::Period1, 10.0));
        assert!(!slot_value_in_bounds(&maxima, RawSlot::Period1, 10.5));
        assert!(!slot_value_in_bounds(&maxima, RawSlot::Exam2, -1.0));
        assert!(slot_value_in_bounds(&maxima, RawSlot::Exam2, 20.0));
        assert!(!slot_value_in_bounds(&maxima, RawSlot::Exam2, f64::NAN));
    }

    #[test]
    fn score_serde_null_round_trip() {
        let r: GradeRow =
            serde_json::from_str(r#"{"period1": 7.5, "period2": null, "exam1": 12}"#)
                .expect("parse row");
        assert_eq!(r.period1, Score::Marked(7.5));
        assert!(r.period1.is_set());
        assert_eq!(r.period2, Score::Unset);
        assert_eq!(r.period3, Score::Unset);

        let back = serde_json::to_value(r).expect("serialize row");
        assert_eq!(back["period1"], serde_json::json!(7.5));
        assert!(back["period2"].is_null());
    }
}
