//! Parsers of the data types seeded by [`AggregatorConfig::default_seed`].
//!
//! [`AggregatorConfig::default_seed`]: crate::config::AggregatorConfig::default_seed

use crate::models::{FieldKind, FieldValue};
use crate::parser::{Parser, Transform};

pub fn builtin_parsers() -> Vec<(&'static str, Parser)> {
    vec![
        ("cards", cards()),
        ("events", events()),
        ("items", items()),
        ("categories", categories()),
        ("links", links()),
    ]
}

fn cards() -> Parser {
    Parser::new()
        .require("id", FieldKind::Text)
        .require("name", FieldKind::Text)
        .require("title", FieldKind::Text)
        .require("rarity", FieldKind::Text)
        .require("type", FieldKind::Text)
        .field("cost", FieldKind::Number)
        .field("hp", FieldKind::Number)
        .field("attack", FieldKind::Number)
        .field("defense", FieldKind::Number)
        .require("leader_skill", FieldKind::Text)
        .require("super_attack", FieldKind::Text)
        .require("passive_skill", FieldKind::Text)
        .require("links", FieldKind::List)
        .require("categories", FieldKind::List)
        .field("release_date", FieldKind::Date)
        .transform("rarity", Transform::custom(upper_code))
        .transform("type", Transform::custom(upper_code))
        .transform("links", Transform::custom(name_list))
        .transform("categories", Transform::custom(name_list))
}

fn events() -> Parser {
    Parser::new()
        .require("id", FieldKind::Text)
        .require("name", FieldKind::Text)
        .require("description", FieldKind::Text)
        .field("start_date", FieldKind::Date)
        .field("end_date", FieldKind::Date)
        .require("rewards", FieldKind::List)
        .transform("rewards", Transform::custom(name_list))
}

fn items() -> Parser {
    Parser::new()
        .require("id", FieldKind::Text)
        .require("name", FieldKind::Text)
        .require("description", FieldKind::Text)
        .require("rarity", FieldKind::Text)
        .field("quantity", FieldKind::Number)
        .transform("rarity", Transform::custom(upper_code))
}

fn categories() -> Parser {
    Parser::new()
        .require("id", FieldKind::Text)
        .require("name", FieldKind::Text)
        .require("description", FieldKind::Text)
}

fn links() -> Parser {
    Parser::new()
        .require("id", FieldKind::Text)
        .require("name", FieldKind::Text)
        .require("effect", FieldKind::Text)
        .field("max_level", FieldKind::Number)
}

/// Short codes such as rarity (`lr`, `ur`) and type (`agl`, `Super TEQ`),
/// uppercased with inner whitespace collapsed.
fn upper_code(value: &FieldValue) -> Result<FieldValue, String> {
    match value {
        FieldValue::Text(s) => Ok(FieldValue::Text(
            s.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_uppercase(),
        )),
        other => Err(format!("expected text, got {:?}", other.kind())),
    }
}

/// Accepts either a list or a comma-separated string of names.
fn name_list(value: &FieldValue) -> Result<FieldValue, String> {
    match value {
        FieldValue::List(_) => Ok(value.clone()),
        FieldValue::Text(s) => Ok(FieldValue::List(
            s.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| FieldValue::Text(part.to_string()))
                .collect(),
        )),
        other => Err(format!("expected list or text, got {:?}", other.kind())),
    }
}
