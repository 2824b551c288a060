//! Locale-keyed sub-task titles for the evaluation plan.

use aig_core::subtask::plan_from_titles;
use aig_core::task::DEFAULT_LANGUAGE;
use aig_core::SubTask;

/// Locale used when the requested one has no titles.
pub const FALLBACK_LOCALE: &str = "en";

const PLAN_TITLES: &[(&str, &[&str])] = &[
    (
        "zh",
        &["初始化越狱环境", "执行模型安全评估", "生成模型安全报告"],
    ),
    (
        "en",
        &[
            "Pre-Jailbreak Parameter Parsing",
            "Jailbreaking",
            "Generating report",
        ],
    ),
];

/// Reduce a language tag to its primary subtag: `zh-CN`, `zh_cn` and `ZH`
/// all become `zh`.
pub fn normalize_language(lang: &str) -> String {
    let lang = lang.trim().to_lowercase().replace('-', "_");
    match lang.split_once('_') {
        Some((primary, _)) => primary.to_string(),
        None => lang,
    }
}

/// The locale whose titles are used for `lang`. Empty selects the default
/// language; anything without titles selects [`FALLBACK_LOCALE`].
pub fn resolve_locale(lang: &str) -> &'static str {
    let normalized = normalize_language(lang);
    let wanted = if normalized.is_empty() {
        DEFAULT_LANGUAGE
    } else {
        normalized.as_str()
    };
    PLAN_TITLES
        .iter()
        .find(|(locale, _)| *locale == wanted)
        .map(|(locale, _)| *locale)
        .unwrap_or(FALLBACK_LOCALE)
}

pub fn plan_titles(lang: &str) -> &'static [&'static str] {
    let locale = resolve_locale(lang);
    PLAN_TITLES
        .iter()
        .find(|(l, _)| *l == locale)
        .map(|(_, titles)| *titles)
        .unwrap_or(&[])
}

/// A fresh plan for `lang`: every step `Todo` at 0%.
pub fn build_plan(lang: &str) -> Vec<SubTask> {
    plan_from_titles(plan_titles(lang))
}
