//! Recursive-descent parser: `Expr := Or`, `Or := And ('|' And)*`,
//! `And := Unary (WS Unary)*`, `Unary := '-'? Atom`, `Atom := Clause | '('
//! Expr ')'`.

use super::ast::{Clause, Expr};
use super::token::{tokenize, Token, TokenKind};
use crate::db::entities::node::NodeType;
use crate::error::{DlfiError, Result};
use serde_json::Value;

pub fn parse(query_text: &str) -> Result<Expr> {
	let tokens = tokenize(query_text);
	let mut parser = Parser { tokens: &tokens, pos: 0 };
	if parser.tokens.is_empty() {
		// The empty query yields the universe of nodes.
		return Ok(Expr::And(Vec::new()));
	}
	let expr = parser.parse_or()?;
	if parser.pos != parser.tokens.len() {
		let tok = &parser.tokens[parser.pos];
		return Err(DlfiError::QueryParseError {
			offset: tok.start,
			message: "unexpected trailing input".to_string(),
		});
	}
	Ok(expr)
}

struct Parser<'a> {
	tokens: &'a [Token],
	pos: usize,
}

impl<'a> Parser<'a> {
	fn peek(&self) -> Option<&Token> {
		self.tokens.get(self.pos)
	}

	fn error_here(&self, message: &str) -> DlfiError {
		let offset = self.peek().map(|t| t.start).unwrap_or_else(|| {
			self.tokens.last().map(|t| t.end).unwrap_or(0)
		});
		DlfiError::QueryParseError {
			offset,
			message: message.to_string(),
		}
	}

	fn parse_or(&mut self) -> Result<Expr> {
		let mut terms = vec![self.parse_and()?];
		while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Pipe)) {
			self.pos += 1;
			terms.push(self.parse_and()?);
		}
		Ok(if terms.len() == 1 {
			terms.into_iter().next().unwrap()
		} else {
			Expr::Or(terms)
		})
	}

	fn parse_and(&mut self) -> Result<Expr> {
		let mut terms = vec![self.parse_unary()?];
		while self.at_atom_start() {
			terms.push(self.parse_unary()?);
		}
		Ok(if terms.len() == 1 {
			terms.into_iter().next().unwrap()
		} else {
			Expr::And(terms)
		})
	}

	fn at_atom_start(&self) -> bool {
		matches!(
			self.peek().map(|t| &t.kind),
			Some(TokenKind::LParen) | Some(TokenKind::Minus) | Some(TokenKind::Word(_))
		)
	}

	fn parse_unary(&mut self) -> Result<Expr> {
		if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Minus)) {
			self.pos += 1;
			let inner = self.parse_atom()?;
			return Ok(Expr::Not(Box::new(inner)));
		}
		self.parse_atom()
	}

	fn parse_atom(&mut self) -> Result<Expr> {
		match self.peek().map(|t| t.kind.clone()) {
			Some(TokenKind::LParen) => {
				self.pos += 1;
				let inner = self.parse_or()?;
				match self.peek().map(|t| &t.kind) {
					Some(TokenKind::RParen) => {
						self.pos += 1;
						Ok(inner)
					}
					_ => Err(self.error_here("expected ')'")),
				}
			}
			Some(TokenKind::Word(word)) => {
				self.pos += 1;
				let offset = self.tokens[self.pos - 1].start;
				Ok(Expr::Clause(parse_clause(&word, offset)?))
			}
			_ => Err(self.error_here("expected a clause or '('")),
		}
	}
}

fn parse_clause(word: &str, offset: usize) -> Result<Clause> {
	let err = |message: &str| DlfiError::QueryParseError {
		offset,
		message: message.to_string(),
	};

	if let Some(rest) = word.strip_prefix("inside:") {
		return Ok(Clause::Inside(rest.to_string()));
	}
	if let Some(rest) = word.strip_prefix("type:") {
		return match rest {
			"VAULT" => Ok(Clause::Type(NodeType::Vault)),
			"RECORD" => Ok(Clause::Type(NodeType::Record)),
			_ => Err(err("type must be VAULT or RECORD")),
		};
	}
	if let Some(rest) = word.strip_prefix("tag:") {
		return Ok(Clause::Tag(rest.to_lowercase()));
	}
	if let Some(rest) = word.strip_prefix("contains-rel:") {
		let (relation, path) = split_once_eq(rest).ok_or_else(|| err("expected REL=path"))?;
		return Ok(Clause::ContainsRel(relation, path));
	}
	if let Some(rest) = word.strip_prefix("rel:") {
		let (relation, path) = split_once_eq(rest).ok_or_else(|| err("expected REL=path"))?;
		return Ok(Clause::Rel(relation, path));
	}
	if let Some(rest) = word.strip_prefix("name:") {
		return Ok(Clause::Name(rest.to_string()));
	}
	if let Some(rest) = word.strip_prefix("path:") {
		return Ok(Clause::Path(rest.to_string()));
	}
	if let Some(rest) = word.strip_prefix("meta.") {
		if let Some(idx) = rest.find(|c| c == '=' || c == '~') {
			let key = rest[..idx].to_string();
			let op = rest.as_bytes()[idx] as char;
			let value_text = &rest[idx + 1..];
			return if op == '=' {
				Ok(Clause::MetaEq(key, parse_literal(value_text)))
			} else {
				Ok(Clause::MetaSubstr(key, value_text.to_string()))
			};
		}
		return Err(err("expected '=' or '~' after meta.<key>"));
	}

	Err(err(&format!("unrecognized clause: {word}")))
}

fn split_once_eq(s: &str) -> Option<(String, String)> {
	let idx = s.find('=')?;
	Some((s[..idx].to_string(), s[idx + 1..].to_string()))
}

/// `meta.<k>=<v>` values: JSON-ish literals (`null`, `true`, `false`,
/// integers) fall back to a plain string.
fn parse_literal(text: &str) -> Value {
	match text {
		"null" => Value::Null,
		"true" => Value::Bool(true),
		"false" => Value::Bool(false),
		_ => {
			if let Ok(i) = text.parse::<i64>() {
				Value::Number(i.into())
			} else {
				Value::String(text.to_string())
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_query_is_universe() {
		assert_eq!(parse("").unwrap(), Expr::And(Vec::new()));
	}

	#[test]
	fn parses_simple_clause() {
		let expr = parse("type:RECORD").unwrap();
		assert_eq!(expr, Expr::Clause(Clause::Type(NodeType::Record)));
	}

	#[test]
	fn parses_and_of_two_clauses() {
		let expr = parse("tag:manga type:RECORD").unwrap();
		assert_eq!(
			expr,
			Expr::And(vec![
				Expr::Clause(Clause::Tag("manga".to_string())),
				Expr::Clause(Clause::Type(NodeType::Record)),
			])
		);
	}

	#[test]
	fn parses_or_of_and_groups() {
		let expr = parse("tag:a tag:b | tag:c").unwrap();
		assert_eq!(
			expr,
			Expr::Or(vec![
				Expr::And(vec![
					Expr::Clause(Clause::Tag("a".to_string())),
					Expr::Clause(Clause::Tag("b".to_string())),
				]),
				Expr::Clause(Clause::Tag("c".to_string())),
			])
		);
	}

	#[test]
	fn parses_negation_and_grouping() {
		let expr = parse("-(tag:a | tag:b)").unwrap();
		assert_eq!(
			expr,
			Expr::Not(Box::new(Expr::Or(vec![
				Expr::Clause(Clause::Tag("a".to_string())),
				Expr::Clause(Clause::Tag("b".to_string())),
			])))
		);
	}

	#[test]
	fn parses_meta_eq_and_substr() {
		assert_eq!(
			parse("meta.year=2005").unwrap(),
			Expr::Clause(Clause::MetaEq("year".to_string(), Value::Number(2005.into())))
		);
		assert_eq!(
			parse("meta.title~sci-fi").unwrap(),
			Expr::Clause(Clause::MetaSubstr("title".to_string(), "sci-fi".to_string()))
		);
	}

	#[test]
	fn parses_rel_and_contains_rel() {
		assert_eq!(
			parse("rel:AUTHOR=authors/jojo").unwrap(),
			Expr::Clause(Clause::Rel("AUTHOR".to_string(), "authors/jojo".to_string()))
		);
		assert_eq!(
			parse("contains-rel:AUTHOR=authors/jojo").unwrap(),
			Expr::Clause(Clause::ContainsRel(
				"AUTHOR".to_string(),
				"authors/jojo".to_string()
			))
		);
	}

	#[test]
	fn unrecognized_clause_errors_with_offset() {
		let err = parse("bogus:value").unwrap_err();
		assert!(matches!(err, DlfiError::QueryParseError { offset: 0, .. }));
	}

	#[test]
	fn unbalanced_parens_error() {
		assert!(parse("(tag:a").is_err());
	}
}
