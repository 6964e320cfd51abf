//! Segment map loader with auto-heal.
//!
//! Maps are often produced by hand or by language models and arrive slightly
//! broken. Loading runs a fixed sequence of pure stages and stops at the first
//! one that parses:
//!
//! 1. strict parse
//! 2. control characters replaced with spaces
//! 3. stray quotes inside `explanation_text` values escaped
//!
//! Anything still unparseable is a terminal error carrying the last parser
//! diagnostic. No broader structural repair is attempted.

use std::path::Path;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ModelError, ModelResult};
use crate::segment::SegmentRecord;

/// Stage that produced a successful parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealStage {
    Strict,
    ControlCharsReplaced,
    QuotesEscaped,
}

impl HealStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealStage::Strict => "strict",
            HealStage::ControlCharsReplaced => "control_chars_replaced",
            HealStage::QuotesEscaped => "quotes_escaped",
        }
    }
}

/// Parsed map plus the stage that made it parse.
#[derive(Debug, Clone)]
pub struct LoadedMap {
    pub records: Vec<SegmentRecord>,
    pub stage: HealStage,
}

fn narration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"("explanation_text"\s*:\s*")(.*?)("\s*[,}\]])"#)
            .expect("narration pattern is a valid regex")
    })
}

/// Stage 1.
pub fn parse_strict(text: &str) -> Result<Value, serde_json::Error> {
    serde_json::from_str(text)
}

/// Stage 2: C0 controls and DEL become spaces.
pub fn replace_control_chars(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_control() { ' ' } else { c })
        .collect()
}

/// Stage 3: escape unescaped `"` inside every `explanation_text` value.
pub fn escape_narration_quotes(text: &str) -> String {
    narration_pattern()
        .replace_all(text, |caps: &Captures<'_>| {
            format!("{}{}{}", &caps[1], escape_quotes(&caps[2]), &caps[3])
        })
        .into_owned()
}

fn escape_quotes(content: &str) -> String {
    let mut out = String::with_capacity(content.len() + 8);
    let mut backslashes = 0usize;
    for c in content.chars() {
        if c == '"' && backslashes % 2 == 0 {
            out.push('\\');
        }
        if c == '\\' {
            backslashes += 1;
        } else {
            backslashes = 0;
        }
        out.push(c);
    }
    out
}

/// Run the heal stages over raw map text.
pub fn heal_and_parse(text: &str) -> ModelResult<LoadedMap> {
    let (value, stage) = match parse_strict(text) {
        Ok(v) => (v, HealStage::Strict),
        Err(e) => {
            debug!(error = %e, "strict parse failed, replacing control characters");
            let cleaned = replace_control_chars(text);
            match parse_strict(&cleaned) {
                Ok(v) => (v, HealStage::ControlCharsReplaced),
                Err(e) => {
                    debug!(error = %e, "still unparseable, escaping narration quotes");
                    let escaped = escape_narration_quotes(&cleaned);
                    match parse_strict(&escaped) {
                        Ok(v) => (v, HealStage::QuotesEscaped),
                        Err(e) => return Err(ModelError::unrepairable(e.to_string())),
                    }
                }
            }
        }
    };

    if stage != HealStage::Strict {
        warn!(stage = stage.as_str(), "Segment map needed repair");
    }

    Ok(LoadedMap {
        records: into_records(value)?,
        stage,
    })
}

fn into_records(value: Value) -> ModelResult<Vec<SegmentRecord>> {
    let items = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(ModelError::MapShape(format!(
                "expected an object or array, found {}",
                kind(&other)
            )))
        }
    };

    Ok(items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value(item).unwrap_or_else(|e| {
                warn!(entry = i, error = %e, "Unreadable map entry");
                SegmentRecord::malformed(e.to_string())
            })
        })
        .collect())
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Read a map file from disk and heal it.
pub async fn load_segment_map(path: impl AsRef<Path>) -> ModelResult<LoadedMap> {
    let bytes = tokio::fs::read(path.as_ref()).await?;
    let text = String::from_utf8_lossy(&bytes);
    heal_and_parse(&text)
}
