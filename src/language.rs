use std::fmt;
use std::str::FromStr;

use crate::error::EvaluationError;

/// Languages the evaluator can run, each backed by one evaluator image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    Python2_7,
    Python3_10,
    Python3_12,
    CPlusPlus,
    Java,
    JavaScript,
    R,
    Go,
    Rust,
    TypeScript,
}

/// Wire names accepted for each language: the short key first, then the
/// fully qualified type name used by the grading service.
const NAMES: &[(Language, &[&str])] = &[
    (Language::Python, &["python"]),
    (
        Language::Python2_7,
        &["python2.7", "Coursemology::Polyglot::Language::Python::Python2Point7"],
    ),
    (
        Language::Python3_10,
        &["python3.10", "Coursemology::Polyglot::Language::Python::Python3Point10"],
    ),
    (
        Language::Python3_12,
        &["python3.12", "Coursemology::Polyglot::Language::Python::Python3Point12"],
    ),
    (
        Language::CPlusPlus,
        &["cpp", "c_cpp", "Coursemology::Polyglot::Language::CPlusPlus"],
    ),
    (
        Language::Java,
        &["java", "Coursemology::Polyglot::Language::Java::Java17"],
    ),
    (
        Language::JavaScript,
        &["javascript", "Coursemology::Polyglot::Language::JavaScript"],
    ),
    (Language::R, &["r", "Coursemology::Polyglot::Language::R::R4Point1"]),
    (
        Language::Go,
        &["go", "Coursemology::Polyglot::Language::Go::Go1Point16"],
    ),
    (
        Language::Rust,
        &["rust", "Coursemology::Polyglot::Language::Rust::Rust1Point68"],
    ),
    (
        Language::TypeScript,
        &["typescript", "Coursemology::Polyglot::Language::TypeScript::TypeScript5Point6"],
    ),
];

impl Language {
    /// Tag of the evaluator image for this language
    pub fn image_tag(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Python2_7 => "python:2.7",
            Self::Python3_10 => "python:3.10",
            Self::Python3_12 => "python:3.12",
            Self::CPlusPlus => "c_cpp",
            Self::Java => "java:17",
            Self::JavaScript => "javascript",
            Self::R => "r:4.1",
            Self::Go => "golang:1.16",
            Self::Rust => "rust:1.68",
            Self::TypeScript => "typescript:5.6",
        }
    }

    /// Image name without registry prefix, e.g. `evaluator-image-python:3.10`
    pub fn image(self) -> String {
        format!("evaluator-image-{}", self.image_tag())
    }

    fn short_name(self) -> &'static str {
        NAMES
            .iter()
            .find(|(language, _)| *language == self)
            .map(|(_, names)| names[0])
            .unwrap_or("unknown")
    }
}

impl FromStr for Language {
    type Err = EvaluationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        NAMES
            .iter()
            .find(|(_, names)| names.iter().any(|n| n.eq_ignore_ascii_case(trimmed)))
            .map(|(language, _)| *language)
            .ok_or_else(|| EvaluationError::UnsupportedLanguage(s.to_string()))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}
