//! Parsed query AST.

use crate::db::entities::node::NodeType;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
	Or(Vec<Expr>),
	And(Vec<Expr>),
	Not(Box<Expr>),
	Clause(Clause),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Clause {
	/// `inside:<path>` — descendants of the node at `<path>`.
	Inside(String),
	/// `type:VAULT` / `type:RECORD`.
	Type(NodeType),
	/// `tag:<t>` — lowercase match.
	Tag(String),
	/// `meta.<k>=<v>`.
	MetaEq(String, Value),
	/// `meta.<k>~<substr>`.
	MetaSubstr(String, String),
	/// `rel:<RELATION>=<path>`.
	Rel(String, String),
	/// `contains-rel:<REL>=<path>`.
	ContainsRel(String, String),
	/// `name:<substr>`.
	Name(String),
	/// `path:<substr>`.
	Path(String),
}
