use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvaluationType {
    Participation,
    Homework,
    Exam,
    Project,
    Quiz,
}

impl EvaluationType {
    pub const ALL: [EvaluationType; 5] = [
        EvaluationType::Participation,
        EvaluationType::Homework,
        EvaluationType::Exam,
        EvaluationType::Project,
        EvaluationType::Quiz,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EvaluationType::Participation => "participation",
            EvaluationType::Homework => "homework",
            EvaluationType::Exam => "exam",
            EvaluationType::Project => "project",
            EvaluationType::Quiz => "quiz",
        }
    }

    pub fn parse(s: &str) -> Option<EvaluationType> {
        match s.trim().to_ascii_lowercase().as_str() {
            "participation" => Some(EvaluationType::Participation),
            "homework" => Some(EvaluationType::Homework),
            "exam" => Some(EvaluationType::Exam),
            "project" => Some(EvaluationType::Project),
            "quiz" => Some(EvaluationType::Quiz),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GradingError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl GradingError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: &str, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: Some(details),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CategoryWeights {
    pub participation: i64,
    pub homework: i64,
    pub exam: i64,
    pub project: i64,
    pub quiz: i64,
}

impl Default for CategoryWeights {
    fn default() -> Self {
        Self {
            participation: 20,
            homework: 40,
            exam: 40,
            project: 0,
            quiz: 0,
        }
    }
}

impl CategoryWeights {
    pub fn get(&self, t: EvaluationType) -> i64 {
        match t {
            EvaluationType::Participation => self.participation,
            EvaluationType::Homework => self.homework,
            EvaluationType::Exam => self.exam,
            EvaluationType::Project => self.project,
            EvaluationType::Quiz => self.quiz,
        }
    }

    fn set(&mut self, t: EvaluationType, w: i64) {
        match t {
            EvaluationType::Participation => self.participation = w,
            EvaluationType::Homework => self.homework = w,
            EvaluationType::Exam => self.exam = w,
            EvaluationType::Project => self.project = w,
            EvaluationType::Quiz => self.quiz = w,
        }
    }

    pub fn total(&self) -> i64 {
        self.participation + self.homework + self.exam + self.project + self.quiz
    }
}

/// Parse a weights object from request params. Absent categories count as 0;
/// every present value must be an integer (no floats, no strings).
pub fn parse_weights(raw: Option<&serde_json::Value>) -> Result<CategoryWeights, GradingError> {
    let Some(raw) = raw else {
        return Err(GradingError::new("invalid_weights", "missing weights"));
    };
    let Some(obj) = raw.as_object() else {
        return Err(GradingError::new(
            "invalid_weights",
            "weights must be an object",
        ));
    };

    let mut weights = CategoryWeights {
        participation: 0,
        homework: 0,
        exam: 0,
        project: 0,
        quiz: 0,
    };
    for t in EvaluationType::ALL {
        let Some(v) = obj.get(t.as_str()) else {
            continue;
        };
        if v.is_null() {
            continue;
        }
        let Some(n) = v.as_i64() else {
            return Err(GradingError::with_details(
                "invalid_weights",
                format!("weights.{} must be an integer", t.as_str()),
                serde_json::json!({ "category": t.as_str() }),
            ));
        };
        weights.set(t, n);
    }
    Ok(weights)
}

/// Write-time invariant for grading rules: each weight in [0,100], the five
/// summing to exactly 100. Rejection is hard; nothing is clamped or
/// renormalized at configuration time.
pub fn validate_weights(weights: &CategoryWeights) -> Result<(), GradingError> {
    for t in EvaluationType::ALL {
        let w = weights.get(t);
        if !(0..=100).contains(&w) {
            return Err(GradingError::with_details(
                "invalid_weights",
                format!("weights.{} must be between 0 and 100", t.as_str()),
                serde_json::json!({ "category": t.as_str(), "weight": w }),
            ));
        }
    }
    let total = weights.total();
    if total != 100 {
        return Err(GradingError::with_details(
            "invalid_weights",
            "grading weights must sum to 100",
            serde_json::json!({ "totalWeight": total }),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct EvaluationScore {
    pub evaluation_type: EvaluationType,
    pub score: i64,
}

/// Per-category arithmetic means. `None` means the category has no
/// evaluations, which is not the same as an average of zero: empty
/// categories drop out of the weighted sum, zero averages drag it down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CategoryAverages {
    pub participation: Option<f64>,
    pub homework: Option<f64>,
    pub exam: Option<f64>,
    pub project: Option<f64>,
    pub quiz: Option<f64>,
}

impl CategoryAverages {
    pub fn get(&self, t: EvaluationType) -> Option<f64> {
        match t {
            EvaluationType::Participation => self.participation,
            EvaluationType::Homework => self.homework,
            EvaluationType::Exam => self.exam,
            EvaluationType::Project => self.project,
            EvaluationType::Quiz => self.quiz,
        }
    }

    pub fn set(&mut self, t: EvaluationType, v: Option<f64>) {
        match t {
            EvaluationType::Participation => self.participation = v,
            EvaluationType::Homework => self.homework = v,
            EvaluationType::Exam => self.exam = v,
            EvaluationType::Project => self.project = v,
            EvaluationType::Quiz => self.quiz = v,
        }
    }
}

/// Full float precision is kept here; rounding happens once, on the
/// published final grade.
pub fn average_by_category(evaluations: &[EvaluationScore]) -> CategoryAverages {
    let mut sums: HashMap<EvaluationType, (f64, usize)> = HashMap::new();
    for e in evaluations {
        let entry = sums.entry(e.evaluation_type).or_insert((0.0, 0));
        entry.0 += e.score as f64;
        entry.1 += 1;
    }

    let mut averages = CategoryAverages::default();
    for t in EvaluationType::ALL {
        if let Some((sum, count)) = sums.get(&t) {
            if *count > 0 {
                averages.set(t, Some(sum / (*count as f64)));
            }
        }
    }
    averages
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CategoryLine {
    pub weight: i64,
    pub average: f64,
    pub contribution: f64,
}

/// Audit breakdown of a final grade. Only active categories appear; the
/// contribution is pre-normalization.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct GradeBreakdown {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participation: Option<CategoryLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homework: Option<CategoryLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exam: Option<CategoryLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<CategoryLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quiz: Option<CategoryLine>,
}

impl GradeBreakdown {
    fn set(&mut self, t: EvaluationType, line: CategoryLine) {
        match t {
            EvaluationType::Participation => self.participation = Some(line),
            EvaluationType::Homework => self.homework = Some(line),
            EvaluationType::Exam => self.exam = Some(line),
            EvaluationType::Project => self.project = Some(line),
            EvaluationType::Quiz => self.quiz = Some(line),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalGradeModel {
    pub final_grade: f64,
    pub breakdown: GradeBreakdown,
    pub total_weight: f64,
}

/// Two-decimal display rounding: `round(x * 100) / 100`.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Weighted final grade over per-category averages.
///
/// A category is active iff its weight is positive and it has an average.
/// Weight assigned to categories with no data is redistributed by rescaling
/// the weighted sum back to a 100-point basis, so a course whose exam
/// category (weight 40) has no exams yet is graded on the remaining 60
/// points as if they were the whole course. With no active category the
/// grade is 0, not NaN.
pub fn compute_final_grade(
    weights: &CategoryWeights,
    averages: &CategoryAverages,
) -> FinalGradeModel {
    let mut final_grade = 0.0_f64;
    let mut total_weight = 0.0_f64;
    let mut breakdown = GradeBreakdown::default();

    for t in EvaluationType::ALL {
        let weight = weights.get(t);
        if weight <= 0 {
            continue;
        }
        let Some(average) = averages.get(t) else {
            continue;
        };
        let contribution = (weight as f64 / 100.0) * average;
        final_grade += contribution;
        total_weight += weight as f64;
        breakdown.set(
            t,
            CategoryLine {
                weight,
                average,
                contribution,
            },
        );
    }

    if total_weight > 0.0 && total_weight != 100.0 {
        final_grade = (final_grade / total_weight) * 100.0;
    }

    FinalGradeModel {
        final_grade: round2(final_grade),
        breakdown,
        total_weight,
    }
}

/// Stored weights for a course, falling back to the system defaults when no
/// rules row exists yet. The bool reports whether the fallback was taken.
pub fn course_grading_rules(
    conn: &Connection,
    course_id: &str,
) -> Result<(CategoryWeights, bool), GradingError> {
    let row: Option<CategoryWeights> = conn
        .query_row(
            "SELECT participation_weight, homework_weight, exam_weight, project_weight, quiz_weight
             FROM course_grading_rules
             WHERE course_id = ?",
            [course_id],
            |r| {
                Ok(CategoryWeights {
                    participation: r.get(0)?,
                    homework: r.get(1)?,
                    exam: r.get(2)?,
                    project: r.get(3)?,
                    quiz: r.get(4)?,
                })
            },
        )
        .optional()
        .map_err(|e| GradingError::new("db_query_failed", e.to_string()))?;

    match row {
        Some(weights) => Ok((weights, false)),
        None => Ok((CategoryWeights::default(), true)),
    }
}

fn evaluation_scores(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> Result<Vec<EvaluationScore>, GradingError> {
    let mut stmt = conn
        .prepare(
            "SELECT evaluation_type, score
             FROM evaluations
             WHERE student_id = ? AND course_id = ?",
        )
        .map_err(|e| GradingError::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map((student_id, course_id), |r| {
            let kind: String = r.get(0)?;
            let score: i64 = r.get(1)?;
            Ok((kind, score))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| GradingError::new("db_query_failed", e.to_string()))?;

    Ok(rows
        .into_iter()
        .filter_map(|(kind, score)| {
            EvaluationType::parse(&kind).map(|evaluation_type| EvaluationScore {
                evaluation_type,
                score,
            })
        })
        .collect())
}

pub fn student_course_grade(
    conn: &Connection,
    student_id: &str,
    course_id: &str,
) -> Result<FinalGradeModel, GradingError> {
    let course_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| GradingError::new("db_query_failed", e.to_string()))?;
    if course_exists.is_none() {
        return Err(GradingError::new("not_found", "course not found"));
    }

    let (weights, _) = course_grading_rules(conn, course_id)?;
    let scores = evaluation_scores(conn, student_id, course_id)?;
    let averages = average_by_category(&scores);
    Ok(compute_final_grade(&weights, &averages))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseGradeRow {
    pub course_id: String,
    pub course_name: String,
    pub course_description: Option<String>,
    pub teacher_name: Option<String>,
    pub weights: CategoryWeights,
    pub averages: CategoryAverages,
    pub total_evaluations: i64,
    pub final_grade: f64,
}

#[derive(Debug, Clone)]
struct EnrolledCourse {
    id: String,
    name: String,
    description: Option<String>,
    teacher_name: Option<String>,
    weights: Option<CategoryWeights>,
}

/// Per-course grade summary across every course the student is enrolled in.
/// Every consumer of course grades (dashboard, gradesheet model, CSV
/// export) goes through here, so normalization behaves identically
/// everywhere.
pub fn student_course_grades(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<CourseGradeRow>, GradingError> {
    let mut courses_stmt = conn
        .prepare(
            "SELECT c.id, c.name, c.description, t.name,
                    cgr.participation_weight, cgr.homework_weight, cgr.exam_weight,
                    cgr.project_weight, cgr.quiz_weight
             FROM course_enrollments ce
             JOIN courses c ON c.id = ce.course_id
             LEFT JOIN users t ON t.id = c.teacher_id
             LEFT JOIN course_grading_rules cgr ON cgr.course_id = c.id
             WHERE ce.student_id = ?
             ORDER BY c.name",
        )
        .map_err(|e| GradingError::new("db_query_failed", e.to_string()))?;
    let courses: Vec<EnrolledCourse> = courses_stmt
        .query_map([student_id], |r| {
            let participation: Option<i64> = r.get(4)?;
            let weights = match participation {
                None => None,
                Some(participation) => Some(CategoryWeights {
                    participation,
                    homework: r.get(5)?,
                    exam: r.get(6)?,
                    project: r.get(7)?,
                    quiz: r.get(8)?,
                }),
            };
            Ok(EnrolledCourse {
                id: r.get(0)?,
                name: r.get(1)?,
                description: r.get(2)?,
                teacher_name: r.get(3)?,
                weights,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| GradingError::new("db_query_failed", e.to_string()))?;

    // One pass over the student's evaluations, bucketed per course.
    let mut scores_by_course: HashMap<String, Vec<EvaluationScore>> = HashMap::new();
    let mut scores_stmt = conn
        .prepare(
            "SELECT course_id, evaluation_type, score
             FROM evaluations
             WHERE student_id = ?",
        )
        .map_err(|e| GradingError::new("db_query_failed", e.to_string()))?;
    let score_rows = scores_stmt
        .query_map([student_id], |r| {
            let course_id: String = r.get(0)?;
            let kind: String = r.get(1)?;
            let score: i64 = r.get(2)?;
            Ok((course_id, kind, score))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| GradingError::new("db_query_failed", e.to_string()))?;
    for (course_id, kind, score) in score_rows {
        let Some(evaluation_type) = EvaluationType::parse(&kind) else {
            continue;
        };
        scores_by_course
            .entry(course_id)
            .or_default()
            .push(EvaluationScore {
                evaluation_type,
                score,
            });
    }

    let mut out = Vec::with_capacity(courses.len());
    for course in courses {
        let weights = course.weights.unwrap_or_default();
        let scores = scores_by_course.remove(&course.id).unwrap_or_default();
        let averages = average_by_category(&scores);
        let graded = compute_final_grade(&weights, &averages);
        out.push(CourseGradeRow {
            course_id: course.id,
            course_name: course.name,
            course_description: course.description,
            teacher_name: course.teacher_name,
            weights,
            averages,
            total_evaluations: scores.len() as i64,
            final_grade: graded.final_grade,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(participation: i64, homework: i64, exam: i64, project: i64, quiz: i64) -> CategoryWeights {
        CategoryWeights {
            participation,
            homework,
            exam,
            project,
            quiz,
        }
    }

    fn averages_of(pairs: &[(EvaluationType, f64)]) -> CategoryAverages {
        let mut a = CategoryAverages::default();
        for (t, v) in pairs {
            a.set(*t, Some(*v));
        }
        a
    }

    #[test]
    fn default_weights_sum_to_100() {
        let w = CategoryWeights::default();
        assert_eq!(w.participation, 20);
        assert_eq!(w.homework, 40);
        assert_eq!(w.exam, 40);
        assert_eq!(w.project, 0);
        assert_eq!(w.quiz, 0);
        assert!(validate_weights(&w).is_ok());
    }

    #[test]
    fn validate_rejects_sum_not_100() {
        let w = weights(20, 40, 30, 0, 0);
        let e = validate_weights(&w).expect_err("sum 90 must be rejected");
        assert_eq!(e.code, "invalid_weights");
        assert_eq!(
            e.details.and_then(|d| d.get("totalWeight").cloned()),
            Some(serde_json::json!(90))
        );
    }

    #[test]
    fn validate_rejects_out_of_range_weight() {
        assert!(validate_weights(&weights(101, -1, 0, 0, 0)).is_err());
        assert!(validate_weights(&weights(150, -50, 0, 0, 0)).is_err());
    }

    #[test]
    fn validate_accepts_any_quintuple_summing_to_100() {
        assert!(validate_weights(&weights(0, 0, 100, 0, 0)).is_ok());
        assert!(validate_weights(&weights(20, 20, 20, 20, 20)).is_ok());
        assert!(validate_weights(&weights(15, 35, 50, 0, 0)).is_ok());
    }

    #[test]
    fn parse_weights_treats_absent_categories_as_zero() {
        let raw = serde_json::json!({ "homework": 40, "exam": 60 });
        let w = parse_weights(Some(&raw)).expect("parse weights");
        assert_eq!(w, weights(0, 40, 60, 0, 0));
    }

    #[test]
    fn parse_weights_rejects_non_integer_and_missing_object() {
        let raw = serde_json::json!({ "homework": 40.5 });
        assert_eq!(
            parse_weights(Some(&raw)).expect_err("float weight").code,
            "invalid_weights"
        );
        assert_eq!(parse_weights(None).expect_err("missing").code, "invalid_weights");
        let raw = serde_json::json!("40");
        assert_eq!(
            parse_weights(Some(&raw)).expect_err("non-object").code,
            "invalid_weights"
        );
    }

    #[test]
    fn average_by_category_keeps_empty_categories_null() {
        let scores = [
            EvaluationScore {
                evaluation_type: EvaluationType::Homework,
                score: 80,
            },
            EvaluationScore {
                evaluation_type: EvaluationType::Homework,
                score: 90,
            },
            EvaluationScore {
                evaluation_type: EvaluationType::Quiz,
                score: 0,
            },
        ];
        let a = average_by_category(&scores);
        assert_eq!(a.homework, Some(85.0));
        // A scored zero averages to 0.0; an unscored category stays None.
        assert_eq!(a.quiz, Some(0.0));
        assert_eq!(a.exam, None);
        assert_eq!(a.participation, None);
        assert_eq!(a.project, None);
    }

    #[test]
    fn full_weights_full_data_is_the_plain_weighted_sum() {
        let w = CategoryWeights::default();
        let a = averages_of(&[
            (EvaluationType::Participation, 90.0),
            (EvaluationType::Homework, 80.0),
            (EvaluationType::Exam, 70.0),
        ]);
        let g = compute_final_grade(&w, &a);
        assert_eq!(g.final_grade, 78.0);
        assert_eq!(g.total_weight, 100.0);
        let hw = g.breakdown.homework.expect("homework line");
        assert_eq!(hw.weight, 40);
        assert_eq!(hw.average, 80.0);
        assert!((hw.contribution - 32.0).abs() < 1e-12);
    }

    #[test]
    fn normalization_is_identity_at_total_weight_100() {
        let w = weights(0, 50, 50, 0, 0);
        let a = averages_of(&[
            (EvaluationType::Homework, 60.0),
            (EvaluationType::Exam, 90.0),
        ]);
        let g = compute_final_grade(&w, &a);
        assert_eq!(g.total_weight, 100.0);
        assert_eq!(g.final_grade, 75.0);
    }

    #[test]
    fn missing_category_weight_is_rescaled_away() {
        // Exam weight 60 but no exam scored: homework's 40 points carry the
        // whole grade.
        let w = weights(0, 40, 60, 0, 0);
        let a = averages_of(&[(EvaluationType::Homework, 80.0)]);
        let g = compute_final_grade(&w, &a);
        assert_eq!(g.total_weight, 40.0);
        assert_eq!(g.final_grade, 80.0);
        let hw = g.breakdown.homework.expect("homework line");
        assert!((hw.contribution - 32.0).abs() < 1e-12);
        assert!(g.breakdown.exam.is_none());
    }

    #[test]
    fn zero_weight_category_never_contributes() {
        let w = weights(0, 40, 60, 0, 0);
        let with_quiz = {
            let mut a = averages_of(&[
                (EvaluationType::Homework, 70.0),
                (EvaluationType::Exam, 70.0),
            ]);
            a.set(EvaluationType::Quiz, Some(100.0));
            a
        };
        let without_quiz = averages_of(&[
            (EvaluationType::Homework, 70.0),
            (EvaluationType::Exam, 70.0),
        ]);
        let g1 = compute_final_grade(&w, &with_quiz);
        let g2 = compute_final_grade(&w, &without_quiz);
        assert_eq!(g1.final_grade, g2.final_grade);
        assert_eq!(g1.total_weight, g2.total_weight);
        assert!(g1.breakdown.quiz.is_none());
    }

    #[test]
    fn no_active_categories_yields_zero_not_nan() {
        let w = CategoryWeights::default();
        let g = compute_final_grade(&w, &CategoryAverages::default());
        assert_eq!(g.final_grade, 0.0);
        assert_eq!(g.total_weight, 0.0);
        assert!(g.breakdown.participation.is_none());
        assert!(g.breakdown.homework.is_none());
        assert!(g.breakdown.exam.is_none());
    }

    #[test]
    fn published_grade_is_rounded_to_two_decimals() {
        // 100% homework, three scores averaging 83.666..
        let w = weights(0, 100, 0, 0, 0);
        let scores = [
            EvaluationScore {
                evaluation_type: EvaluationType::Homework,
                score: 84,
            },
            EvaluationScore {
                evaluation_type: EvaluationType::Homework,
                score: 84,
            },
            EvaluationScore {
                evaluation_type: EvaluationType::Homework,
                score: 83,
            },
        ];
        let a = average_by_category(&scores);
        let g = compute_final_grade(&w, &a);
        assert_eq!(g.final_grade, 83.67);
        // The breakdown keeps the unrounded average for auditing.
        let hw = g.breakdown.homework.expect("homework line");
        assert!((hw.average - 251.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn rescale_applies_after_all_categories_are_folded() {
        // Two active categories out of three weighted ones: contributions
        // accumulate first, then a single rescale maps 70 weight to 100.
        let w = weights(10, 30, 60, 0, 0);
        let a = averages_of(&[
            (EvaluationType::Participation, 100.0),
            (EvaluationType::Homework, 50.0),
        ]);
        let g = compute_final_grade(&w, &a);
        assert_eq!(g.total_weight, 40.0);
        // (10 + 15) / 40 * 100
        assert_eq!(g.final_grade, 62.5);
    }
}
