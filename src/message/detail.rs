//! Share-page prose parsing.
//!
//! The share page renders each result field as a label line followed by one
//! or more value lines. Parsing happens in two stages: [`tokenize`] groups
//! lines under the label that precedes them, and [`ResultDetail::from_sections`]
//! maps recognised labels onto fields. Lines before the first label and
//! labels nobody asked for fall through without failing.

use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    ContestName,
    Rank,
    Performance,
    RatingChange,
    Grading,
    Highest,
}

impl Label {
    fn parse(line: &str) -> Option<Label> {
        match line {
            "Contest Name" => Some(Label::ContestName),
            "Rank" => Some(Label::Rank),
            "Performance" => Some(Label::Performance),
            "Rating Change" => Some(Label::RatingChange),
            "Grading" | "Highest Grading" => Some(Label::Grading),
            _ if line.contains("Highest") => Some(Label::Highest),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub label: Label,
    pub values: Vec<String>,
}

pub fn tokenize(text: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match Label::parse(line) {
            Some(label) => sections.push(Section {
                label,
                values: Vec::new(),
            }),
            None => {
                if let Some(current) = sections.last_mut() {
                    current.values.push(line.to_string());
                }
            }
        }
    }

    sections
}

/// Fields recovered from the share page. Everything is optional because the
/// page layout is not under our control.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultDetail {
    pub contest_name: Option<String>,
    pub rank: Option<String>,
    pub performance: Option<String>,
    pub old_rating: Option<String>,
    pub new_rating: Option<String>,
    pub rating_change: Option<String>,
    pub old_grade: Option<String>,
    pub new_grade: Option<String>,
    pub is_highest: bool,
}

impl ResultDetail {
    pub fn parse(text: &str) -> Self {
        Self::from_sections(&tokenize(text))
    }

    pub fn from_sections(sections: &[Section]) -> Self {
        let mut detail = ResultDetail::default();

        for section in sections {
            match section.label {
                Label::ContestName => {
                    detail.contest_name = section.values.first().cloned();
                }
                Label::Rank => {
                    detail.rank = section.values.first().cloned();
                }
                Label::Performance => {
                    detail.performance = section.values.first().cloned();
                }
                Label::RatingChange => {
                    let ratings = transition_values(&section.values);
                    detail.old_rating = ratings.first().cloned();
                    detail.new_rating = ratings.get(1).cloned();
                    detail.rating_change = section
                        .values
                        .iter()
                        .find_map(|v| change_marker(v).map(str::to_string));
                }
                Label::Grading => {
                    let grades = transition_values(&section.values);
                    detail.old_grade = grades.first().cloned();
                    detail.new_grade = grades.get(1).or(grades.first()).cloned();
                }
                Label::Highest => detail.is_highest = true,
            }
        }

        detail
    }

    /// The enhanced message needs at least the old/new/change triple.
    pub fn has_rating_line(&self) -> bool {
        self.old_rating.is_some() && self.new_rating.is_some() && self.change_value().is_some()
    }

    pub fn change_value(&self) -> Option<i32> {
        self.rating_change
            .as_deref()
            .and_then(|c| c.trim_start_matches('+').parse().ok())
    }

    pub fn grade_changed(&self) -> bool {
        match (&self.old_grade, &self.new_grade) {
            (Some(old), Some(new)) => old != new,
            _ => false,
        }
    }
}

fn is_arrow(value: &str) -> bool {
    matches!(value, "→" | "->" | "⇒" | "=>")
}

/// Values of a "before → after" block, minus arrows and the `(+N)` marker.
fn transition_values(values: &[String]) -> Vec<String> {
    values
        .iter()
        .filter(|v| !is_arrow(v) && change_marker(v).is_none())
        .cloned()
        .collect()
}

fn change_marker(value: &str) -> Option<&str> {
    static CHANGE: OnceLock<Regex> = OnceLock::new();
    let re = CHANGE.get_or_init(|| Regex::new(r"\(([+\-±]?\d+)\)").expect("valid change regex"));
    re.captures(value)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}
