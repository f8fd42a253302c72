//! Tokenizer for the query surface.

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenKind {
	LParen,
	RParen,
	Pipe,
	Minus,
	/// A clause or bareword, e.g. `type:RECORD`, `meta.author=Jojo`.
	Word(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
	pub kind: TokenKind,
	pub start: usize,
	pub end: usize,
}

/// Tokenize `input`. `-` is only recognized as negation at a position an
/// atom can start (start of input, after whitespace, `(`, or `|`);
/// elsewhere it's part of the surrounding word, so values like
/// `meta.title~sci-fi` tokenize as one word rather than splitting on the
/// hyphen.
pub fn tokenize(input: &str) -> Vec<Token> {
	let mut tokens = Vec::new();
	let chars: Vec<(usize, char)> = input.char_indices().collect();
	let mut i = 0;
	let mut expect_atom_start = true;

	while i < chars.len() {
		let (pos, c) = chars[i];
		if c.is_whitespace() {
			i += 1;
			expect_atom_start = true;
			continue;
		}
		match c {
			'(' => {
				tokens.push(Token {
					kind: TokenKind::LParen,
					start: pos,
					end: pos + 1,
				});
				i += 1;
				expect_atom_start = true;
			}
			')' => {
				tokens.push(Token {
					kind: TokenKind::RParen,
					start: pos,
					end: pos + 1,
				});
				i += 1;
				expect_atom_start = false;
			}
			'|' => {
				tokens.push(Token {
					kind: TokenKind::Pipe,
					start: pos,
					end: pos + 1,
				});
				i += 1;
				expect_atom_start = true;
			}
			'-' if expect_atom_start => {
				tokens.push(Token {
					kind: TokenKind::Minus,
					start: pos,
					end: pos + 1,
				});
				i += 1;
				// still expecting an atom start right after negation
			}
			_ => {
				let start = pos;
				let mut end = pos + c.len_utf8();
				i += 1;
				while i < chars.len() {
					let (p2, c2) = chars[i];
					if c2.is_whitespace() || matches!(c2, '(' | ')' | '|') {
						break;
					}
					end = p2 + c2.len_utf8();
					i += 1;
				}
				tokens.push(Token {
					kind: TokenKind::Word(input[start..end].to_string()),
					start,
					end,
				});
				expect_atom_start = false;
			}
		}
	}
	tokens
}

#[cfg(test)]
mod tests {
	use super::*;

	fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
		tokens.iter().map(|t| t.kind.clone()).collect()
	}

	#[test]
	fn tokenizes_simple_clause() {
		let tokens = tokenize("type:RECORD");
		assert_eq!(kinds(&tokens), vec![TokenKind::Word("type:RECORD".to_string())]);
	}

	#[test]
	fn tokenizes_negation_and_union() {
		let tokens = tokenize("tag:manga -tag:spoiler | type:VAULT");
		assert_eq!(
			kinds(&tokens),
			vec![
				TokenKind::Word("tag:manga".to_string()),
				TokenKind::Minus,
				TokenKind::Word("tag:spoiler".to_string()),
				TokenKind::Pipe,
				TokenKind::Word("type:VAULT".to_string()),
			]
		);
	}

	#[test]
	fn hyphen_inside_value_is_not_negation() {
		let tokens = tokenize("meta.title~sci-fi");
		assert_eq!(
			kinds(&tokens),
			vec![TokenKind::Word("meta.title~sci-fi".to_string())]
		);
	}

	#[test]
	fn parens_are_their_own_tokens() {
		let tokens = tokenize("(tag:a | tag:b)");
		assert_eq!(
			kinds(&tokens),
			vec![
				TokenKind::LParen,
				TokenKind::Word("tag:a".to_string()),
				TokenKind::Pipe,
				TokenKind::Word("tag:b".to_string()),
				TokenKind::RParen,
			]
		);
	}
}
