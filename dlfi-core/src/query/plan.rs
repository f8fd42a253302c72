//! Query planner: lowers each AST atom to a set of node uuids, then
//! combines bottom-up with set union/intersection/difference.

use super::ast::{Clause, Expr};
use super::QueryIndex;
use crate::path::NodeId;
use std::collections::HashSet;

pub fn eval(expr: &Expr, index: &QueryIndex) -> HashSet<NodeId> {
	match expr {
		Expr::Or(terms) => terms
			.iter()
			.fold(HashSet::new(), |mut acc, t| {
				acc.extend(eval(t, index));
				acc
			}),
		Expr::And(terms) => {
			let mut iter = terms.iter();
			let Some(first) = iter.next() else {
				return index.universe();
			};
			let mut acc = eval(first, index);
			for t in iter {
				let other = eval(t, index);
				acc.retain(|id| other.contains(id));
			}
			acc
		}
		Expr::Not(inner) => {
			let excluded = eval(inner, index);
			index
				.universe()
				.into_iter()
				.filter(|id| !excluded.contains(id))
				.collect()
		}
		Expr::Clause(clause) => eval_clause(clause, index),
	}
}

fn eval_clause(clause: &Clause, index: &QueryIndex) -> HashSet<NodeId> {
	match clause {
		Clause::Inside(path) => match index.path_to_uuid.get(path) {
			Some(&root) => index.descendants(root).into_iter().collect(),
			None => HashSet::new(),
		},
		Clause::Type(t) => index
			.nodes
			.values()
			.filter(|n| n.node_type == *t)
			.map(|n| n.uuid)
			.collect(),
		Clause::Tag(tag) => index
			.nodes
			.values()
			.filter(|n| n.tags.iter().any(|t| t == tag))
			.map(|n| n.uuid)
			.collect(),
		Clause::MetaEq(key, value) => index
			.nodes
			.values()
			.filter(|n| n.metadata.get(key) == Some(value))
			.map(|n| n.uuid)
			.collect(),
		Clause::MetaSubstr(key, substr) => index
			.nodes
			.values()
			.filter(|n| {
				n.metadata
					.get(key)
					.and_then(|v| v.as_str())
					.is_some_and(|s| s.contains(substr.as_str()))
			})
			.map(|n| n.uuid)
			.collect(),
		Clause::Rel(relation, path) => match index.path_to_uuid.get(path) {
			Some(&target) => index
				.relationships
				.iter()
				.filter(|r| &r.relation == relation && r.target == target)
				.map(|r| r.source)
				.collect(),
			None => HashSet::new(),
		},
		Clause::ContainsRel(relation, path) => {
			let rel_set = eval_clause(&Clause::Rel(relation.clone(), path.clone()), index);
			index
				.nodes
				.values()
				.filter(|n| n.node_type == crate::db::entities::node::NodeType::Vault)
				.filter(|n| {
					index
						.descendants(n.uuid)
						.into_iter()
						.any(|d| rel_set.contains(&d))
				})
				.map(|n| n.uuid)
				.collect()
		}
		Clause::Name(substr) => index
			.nodes
			.values()
			.filter(|n| n.name.contains(substr.as_str()))
			.map(|n| n.uuid)
			.collect(),
		Clause::Path(substr) => index
			.nodes
			.values()
			.filter(|n| n.path.contains(substr.as_str()))
			.map(|n| n.uuid)
			.collect(),
	}
}
