//! Keyword routing of a turn to a tool lookup
//!
//! Plain case-insensitive substring membership. No I/O.


/// Vocabulary that marks a text turn as plant related
pub const LOOKUP_KEYWORDS: &[&str] = &[
    "planta",
    "jardim",
    "flor",
    "cultivar",
    "regar",
    "como cuidar",
];

/// Words after which the plant name usually follows
const QUERY_ANCHORS: &[&str] = &["planta", "plantar", "cultivar", "cuidar de", "flor", "regar"];

const MAX_QUERY_WORDS: usize = 3;

const PLANTING_MARKERS: &[&str] = &["plantar", "semear", "cultivar", "muda"];
const IDENTIFICATION_MARKERS: &[&str] = &["que planta", "qual planta", "identific", "nome"];

/// Which tool, if any, the turn should consult
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    ImageLookup,
    TextLookup,
    None,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::ImageLookup => "IMAGE_LOOKUP",
            Intent::TextLookup => "TEXT_LOOKUP",
            Intent::None => "NONE",
        }
    }
}

/// What kind of answer the user is after
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionShape {
    Planting,
    Identification,
    Care,
}

pub fn classify(prompt_text: &str, has_image: bool) -> Intent {
    if has_image {
        return Intent::ImageLookup;
    }
    let lower = prompt_text.to_lowercase();
    if LOOKUP_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        Intent::TextLookup
    } else {
        Intent::None
    }
}

pub fn question_shape(prompt_text: &str, has_image: bool) -> QuestionShape {
    let lower = prompt_text.to_lowercase();
    if PLANTING_MARKERS.iter().any(|m| lower.contains(m)) {
        QuestionShape::Planting
    } else if has_image || IDENTIFICATION_MARKERS.iter().any(|m| lower.contains(m)) {
        QuestionShape::Identification
    } else {
        QuestionShape::Care
    }
}

/// Pull the probable plant name out of a text turn.
///
/// Takes up to three words following the first anchor word (or two-word
/// anchor such as "cuidar de"). Falls back to the whole prompt.
pub fn plant_query(prompt_text: &str) -> String {
    let words: Vec<&str> = prompt_text.split_whitespace().collect();

    for (i, word) in words.iter().enumerate() {
        let single = word.to_lowercase();
        let pair = i
            .checked_sub(1)
            .map(|prev| format!("{} {single}", words[prev].to_lowercase()));

        let anchored = QUERY_ANCHORS
            .iter()
            .any(|anchor| single == *anchor || pair.as_deref() == Some(*anchor));
        if !anchored {
            continue;
        }

        let query = words
            .iter()
            .skip(i + 1)
            .take(MAX_QUERY_WORDS)
            .map(|w| strip_punctuation(w))
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !query.is_empty() {
            return query;
        }
    }

    prompt_text.trim().to_string()
}

fn strip_punctuation(word: &str) -> String {
    word.chars()
        .filter(|c| !matches!(c, '.' | ',' | '?' | '!' | ';' | ':'))
        .collect()
}
