//! Autocomplete: classifies the token under the cursor into the
//! `START → FIELD → OP → VALUE → END` state machine and returns typed
//! candidates.

use super::QueryIndex;
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Position {
	/// Cursor expects a field name (covers both START and mid-field typing).
	Field { prefix: String },
	/// Cursor is right at the delimiter boundary for `field`.
	Op { field: String },
	/// Cursor is inside the value text for `field`, after operator `op`.
	Value {
		field: String,
		op: char,
		partial: String,
	},
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Suggestion {
	pub display: String,
	pub insert_text: String,
	pub suggestion_type: String,
	pub section: String,
	pub description: Option<String>,
}

struct FieldSpec {
	name: &'static str,
	op: char,
	description: &'static str,
}

const FIELDS: &[FieldSpec] = &[
	FieldSpec {
		name: "inside",
		op: ':',
		description: "Descendants of the node at <path>",
	},
	FieldSpec {
		name: "type",
		op: ':',
		description: "Restrict by node type (VAULT or RECORD)",
	},
	FieldSpec {
		name: "tag",
		op: ':',
		description: "Node carries tag <t>",
	},
	FieldSpec {
		name: "meta.",
		op: '=',
		description: "Top-level metadata key equals or contains <v>",
	},
	FieldSpec {
		name: "rel",
		op: ':',
		description: "Node has outgoing relationship <REL> to <path>",
	},
	FieldSpec {
		name: "contains-rel",
		op: ':',
		description: "VAULT has a descendant matching rel:<REL>=<path>",
	},
	FieldSpec {
		name: "name",
		op: ':',
		description: "Substring match on node name",
	},
	FieldSpec {
		name: "path",
		op: ':',
		description: "Substring match on canonical path",
	},
];

/// Find the token text and the cursor's byte offset within it, stripping a
/// leading negation if present.
fn token_under_cursor(query_text: &str, cursor: usize) -> (String, usize) {
	let bytes = query_text.as_bytes();
	let is_boundary = |c: u8| c.is_ascii_whitespace() || c == b'(' || c == b')' || c == b'|';

	let mut start = cursor.min(bytes.len());
	while start > 0 && !is_boundary(bytes[start - 1]) {
		start -= 1;
	}
	let mut end = cursor.min(bytes.len());
	while end < bytes.len() && !is_boundary(bytes[end]) {
		end += 1;
	}

	let mut token_start = start;
	if token_start < bytes.len() && bytes[token_start] == b'-' {
		token_start += 1;
	}
	let rel_cursor = cursor.saturating_sub(token_start).min(end.saturating_sub(token_start));
	(query_text[token_start..end].to_string(), rel_cursor)
}

/// Classify the cursor position within `query_text` per the clause state
/// machine: `START → FIELD (letters) → OP (':' or '=') → VALUE → END`.
pub fn classify(query_text: &str, cursor: usize) -> Position {
	let (token, rel_cursor) = token_under_cursor(query_text, cursor);
	let local = &token[..rel_cursor.min(token.len())];

	match token.find(|c| c == ':' || c == '=' || c == '~') {
		Some(delim_pos) if rel_cursor > delim_pos => {
			let op = token.as_bytes()[delim_pos] as char;
			let field = token[..delim_pos].to_string();
			let value_text = &token[delim_pos + 1..rel_cursor.min(token.len())];
			Position::Value {
				field,
				op,
				partial: value_text.to_string(),
			}
		}
		Some(delim_pos) if rel_cursor == delim_pos => Position::Op {
			field: token[..delim_pos].to_string(),
		},
		_ => Position::Field {
			prefix: local.to_string(),
		},
	}
}

/// Stable-sort candidates by frequency descending, then lexicographically
///.
fn frequency_ranked(counts: HashMap<String, usize>) -> Vec<(String, usize)> {
	let mut entries: Vec<(String, usize)> = counts.into_iter().collect();
	entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
	entries
}

fn tag_frequencies(index: &QueryIndex) -> Vec<(String, usize)> {
	let mut counts: HashMap<String, usize> = HashMap::new();
	for node in index.nodes.values() {
		for tag in &node.tags {
			*counts.entry(tag.clone()).or_insert(0) += 1;
		}
	}
	frequency_ranked(counts)
}

fn relation_frequencies(index: &QueryIndex) -> Vec<(String, usize)> {
	let mut counts: HashMap<String, usize> = HashMap::new();
	for r in &index.relationships {
		*counts.entry(r.relation.clone()).or_insert(0) += 1;
	}
	frequency_ranked(counts)
}

fn matching_paths(index: &QueryIndex, prefix: &str) -> Vec<String> {
	let mut paths: Vec<String> = index
		.path_to_uuid
		.keys()
		.filter(|p| p.starts_with(prefix))
		.cloned()
		.collect();
	paths.sort();
	paths
}

/// Full set of suggestions for `(query_text, cursor)`.
pub fn suggest(index: &QueryIndex, query_text: &str, cursor: usize) -> Vec<Suggestion> {
	match classify(query_text, cursor) {
		Position::Field { prefix } => FIELDS
			.iter()
			.filter(|f| f.name.starts_with(prefix.as_str()))
			.map(|f| Suggestion {
				display: f.name.to_string(),
				insert_text: format!("{}{}", f.name, f.op),
				suggestion_type: "field".to_string(),
				section: "Fields".to_string(),
				description: Some(f.description.to_string()),
			})
			.collect(),
		Position::Op { field } => FIELDS
			.iter()
			.filter(|f| f.name == field)
			.map(|f| Suggestion {
				display: f.op.to_string(),
				insert_text: f.op.to_string(),
				suggestion_type: "operator".to_string(),
				section: "Operators".to_string(),
				description: None,
			})
			.collect(),
		Position::Value { field, partial, .. } => value_suggestions(index, &field, &partial),
	}
}

fn value_suggestions(index: &QueryIndex, field: &str, partial: &str) -> Vec<Suggestion> {
	match field {
		"tag" => tag_frequencies(index)
			.into_iter()
			.filter(|(t, _)| t.starts_with(partial))
			.map(|(t, freq)| Suggestion {
				display: t.clone(),
				insert_text: t,
				suggestion_type: "value".to_string(),
				section: "Tags".to_string(),
				description: Some(format!("used on {freq} node(s)")),
			})
			.collect(),
		"rel" | "contains-rel" => relation_frequencies(index)
			.into_iter()
			.filter(|(r, _)| r.starts_with(partial))
			.map(|(r, freq)| Suggestion {
				display: r.clone(),
				insert_text: r,
				suggestion_type: "value".to_string(),
				section: "Relations".to_string(),
				description: Some(format!("{freq} edge(s)")),
			})
			.collect(),
		"inside" | "path" => matching_paths(index, partial)
			.into_iter()
			.map(|p| Suggestion {
				display: p.clone(),
				insert_text: p,
				suggestion_type: "value".to_string(),
				section: "Paths".to_string(),
				description: None,
			})
			.collect(),
		"type" => ["VAULT", "RECORD"]
			.into_iter()
			.filter(|t| t.starts_with(partial))
			.map(|t| Suggestion {
				display: t.to_string(),
				insert_text: t.to_string(),
				suggestion_type: "value".to_string(),
				section: "Node types".to_string(),
				description: None,
			})
			.collect(),
		_ => Vec::new(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_field_position_at_start() {
		assert_eq!(
			classify("ty", 2),
			Position::Field {
				prefix: "ty".to_string()
			}
		);
	}

	#[test]
	fn classifies_op_position_right_after_field() {
		assert_eq!(
			classify("type", 4),
			Position::Op {
				field: "type".to_string()
			}
		);
	}

	#[test]
	fn classifies_value_position_after_delimiter() {
		assert_eq!(
			classify("type:REC", 8),
			Position::Value {
				field: "type".to_string(),
				op: ':',
				partial: "REC".to_string()
			}
		);
	}

	#[test]
	fn strips_negation_prefix_before_classifying() {
		assert_eq!(
			classify("-tag:man", 8),
			Position::Value {
				field: "tag".to_string(),
				op: ':',
				partial: "man".to_string()
			}
		);
	}

	#[test]
	fn classifies_second_token_after_whitespace() {
		// cursor at end, inside the second token "ty"
		assert_eq!(
			classify("tag:a ty", 8),
			Position::Field {
				prefix: "ty".to_string()
			}
		);
	}
}
