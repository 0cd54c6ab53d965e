mod detail;
mod reminder;

pub use detail::ResultDetail;
pub use reminder::ReminderSlot;

use std::sync::OnceLock;

use clap::ValueEnum;
use regex::Regex;
use tracing::{debug, warn};

use crate::models::{ContestObservation, RatingDelta};

const SITE_TAG: &str = "#AtCoder";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Locale {
    Ja,
    En,
}

impl Locale {
    fn lang(&self) -> &'static str {
        match self {
            Locale::Ja => "ja",
            Locale::En => "en",
        }
    }

    /// "4219th" -> "4219位" in Japanese; English keeps its suffix.
    fn rank(&self, rank: &str) -> String {
        match self {
            Locale::Ja => {
                static ORDINAL: OnceLock<Regex> = OnceLock::new();
                let re = ORDINAL
                    .get_or_init(|| Regex::new(r"(\d+)(st|nd|rd|th)").expect("valid ordinal regex"));
                re.replace_all(rank, "${1}位").into_owned()
            }
            Locale::En => rank.to_string(),
        }
    }

    /// "8 Kyu" -> "8級", "1 Dan" -> "1段" in Japanese.
    fn grade(&self, grade: &str) -> String {
        match self {
            Locale::Ja => {
                static KYU: OnceLock<Regex> = OnceLock::new();
                static DAN: OnceLock<Regex> = OnceLock::new();
                let kyu = KYU.get_or_init(|| Regex::new(r"(\d+)\s*Kyu").expect("valid kyu regex"));
                let dan = DAN.get_or_init(|| Regex::new(r"(\d+)\s*Dan").expect("valid dan regex"));
                let grade = kyu.replace_all(grade, "${1}級");
                dan.replace_all(&grade, "${1}段").into_owned()
            }
            Locale::En => grade.to_string(),
        }
    }
}

/// `+51`, `-12`, or `±0`.
pub fn signed_delta(delta: i32) -> String {
    match delta {
        d if d > 0 => format!("+{}", d),
        d if d < 0 => d.to_string(),
        _ => "±0".to_string(),
    }
}

pub fn mood_emoji(delta: i32) -> &'static str {
    match delta {
        d if d > 0 => "🙂",
        d if d < 0 => "😞",
        _ => "😐",
    }
}

/// `#{title}（{ID}）` with parentheses removed from the title.
pub fn contest_hashtag(title: &str, contest_id: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '(' | ')' | '（' | '）'))
        .collect();
    let cleaned = cleaned.trim();
    let id = contest_id.to_uppercase();

    if cleaned.is_empty() {
        format!("#{}", id)
    } else {
        format!("#{}（{}）", cleaned, id)
    }
}

fn with_lang(url: &str, lang: &str) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}lang={}", url, sep, lang)
}

/// Turns rating changes and upcoming contests into chat text. Pure.
#[derive(Debug, Clone)]
pub struct MessageFormatter {
    user: String,
    locale: Locale,
    site_url: String,
}

impl MessageFormatter {
    pub fn new(user: impl Into<String>, locale: Locale, site_url: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            locale,
            site_url: site_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    /// Enhanced text when `detail` carries a usable rating line, baseline otherwise.
    pub fn format(
        &self,
        delta: &RatingDelta,
        contest: &ContestObservation,
        detail: Option<&str>,
    ) -> String {
        if let Some(text) = detail {
            let parsed = ResultDetail::parse(text);
            if parsed.has_rating_line() {
                debug!(contest_id = %contest.contest_id, "Using share page detail");
                return self.enhanced(&parsed, delta, contest);
            }
            warn!(
                contest_id = %contest.contest_id,
                "Share page text had no rating line, using baseline message"
            );
        }
        self.baseline(delta, contest)
    }

    pub fn baseline(&self, delta: &RatingDelta, contest: &ContestObservation) -> String {
        let change = signed_delta(delta.delta);
        let emoji = mood_emoji(delta.delta);

        let headline = match self.locale {
            Locale::Ja => format!(
                "{}さんの{}に参加しました！\nレーティング：{}→{} ({}) {}",
                self.user, contest.title, delta.old_rating, delta.new_rating, change, emoji
            ),
            Locale::En => format!(
                "{} -- {}->{} ({}) {}",
                self.user, delta.old_rating, delta.new_rating, change, emoji
            ),
        };

        format!(
            "{}\n{}",
            headline,
            self.footer(&contest.title, contest, delta.share_url.as_deref())
        )
    }

    fn enhanced(
        &self,
        detail: &ResultDetail,
        delta: &RatingDelta,
        contest: &ContestObservation,
    ) -> String {
        let name = detail.contest_name.as_deref().unwrap_or(&contest.title);
        let change = detail.change_value().unwrap_or(delta.delta);
        let emoji = mood_emoji(change);
        let change_text = signed_delta(change);
        let old = detail.old_rating.as_deref().unwrap_or_default();
        let new = detail.new_rating.as_deref().unwrap_or_default();
        let grade = detail
            .new_grade
            .as_deref()
            .filter(|_| detail.grade_changed())
            .map(|g| self.locale.grade(g));

        let mut lines = Vec::new();

        match self.locale {
            Locale::Ja => {
                match &detail.rank {
                    Some(rank) => lines.push(format!(
                        "{}さんの{}での成績：{}",
                        self.user,
                        name,
                        self.locale.rank(rank)
                    )),
                    None => lines.push(format!("{}さんの{}の結果", self.user, name)),
                }
                if let Some(perf) = &detail.performance {
                    lines.push(format!("パフォーマンス：{}相当", perf));
                }
                lines.push(format!("レーティング：{}→{} ({}) {}", old, new, change_text, emoji));
                match (detail.is_highest, grade) {
                    (true, Some(g)) => lines.push(format!("Highestを更新し{}になりました！", g)),
                    (true, None) => lines.push("Highestを更新しました！".to_string()),
                    (false, Some(g)) => lines.push(format!("{}になりました！", g)),
                    (false, None) => {}
                }
            }
            Locale::En => {
                match &detail.rank {
                    Some(rank) => lines.push(format!(
                        "{} placed {} in {}",
                        self.user,
                        self.locale.rank(rank),
                        name
                    )),
                    None => lines.push(format!("{}'s result in {}", self.user, name)),
                }
                if let Some(perf) = &detail.performance {
                    lines.push(format!("Performance: {}", perf));
                }
                lines.push(format!("Rating: {} -> {} ({}) {}", old, new, change_text, emoji));
                match (detail.is_highest, grade) {
                    (true, Some(g)) => lines.push(format!("New highest, now {}!", g)),
                    (true, None) => lines.push("New highest!".to_string()),
                    (false, Some(g)) => lines.push(format!("Now {}!", g)),
                    (false, None) => {}
                }
            }
        }

        lines.push(self.footer(name, contest, delta.share_url.as_deref()));
        lines.join("\n")
    }

    fn footer(&self, title: &str, contest: &ContestObservation, share_url: Option<&str>) -> String {
        let url = share_url
            .or(contest.share_url.as_deref())
            .map(str::to_string)
            .unwrap_or_else(|| self.contest_url(&contest.contest_id));

        format!(
            "{} {} {}",
            SITE_TAG,
            contest_hashtag(title, &contest.contest_id),
            with_lang(&url, self.locale.lang())
        )
    }

    pub fn contest_url(&self, contest_id: &str) -> String {
        format!("{}/contests/{}", self.site_url, contest_id)
    }
}
