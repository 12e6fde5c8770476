//! Query state.
//!
//! A [`Registry`] is the plain value behind a [`Builder`](super::Builder).
//! It owns every clause and every binding bucket, so `Clone` yields a fully
//! independent copy: clause collections are copied element by element and
//! nested, sub, exists, join and union queries recurse into their own
//! registries. Raw expressions share their immutable text.

use std::fmt;
use std::sync::Arc;

use quarry_common::{Result, Value};

use super::builder::Builder;
use super::clause::Condition;
use super::join::JoinClause;
use super::types::{
    Aggregate, BindingCategory, ColumnRef, Distinct, IndexHint, LockMode, OrderItem, TableRef,
    Union,
};

/// Mutation applied to a builder right before it is compiled.
#[derive(Clone)]
pub struct BeforeQueryCallback(pub(crate) Arc<dyn Fn(Builder) -> Result<Builder> + Send + Sync>);

impl BeforeQueryCallback {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Builder) -> Result<Builder> + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    pub(crate) fn call(&self, builder: Builder) -> Result<Builder> {
        (self.0)(builder)
    }
}

impl fmt::Debug for BeforeQueryCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BeforeQueryCallback")
    }
}

/// Per-category binding lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    pub select: Vec<Value>,
    pub from: Vec<Value>,
    pub join: Vec<Value>,
    pub where_: Vec<Value>,
    pub group_by: Vec<Value>,
    pub having: Vec<Value>,
    pub order: Vec<Value>,
    pub union: Vec<Value>,
    pub union_order: Vec<Value>,
}

impl Bindings {
    pub fn get(&self, category: BindingCategory) -> &Vec<Value> {
        match category {
            BindingCategory::Select => &self.select,
            BindingCategory::From => &self.from,
            BindingCategory::Join => &self.join,
            BindingCategory::Where => &self.where_,
            BindingCategory::GroupBy => &self.group_by,
            BindingCategory::Having => &self.having,
            BindingCategory::Order => &self.order,
            BindingCategory::Union => &self.union,
            BindingCategory::UnionOrder => &self.union_order,
        }
    }

    pub fn get_mut(&mut self, category: BindingCategory) -> &mut Vec<Value> {
        match category {
            BindingCategory::Select => &mut self.select,
            BindingCategory::From => &mut self.from,
            BindingCategory::Join => &mut self.join,
            BindingCategory::Where => &mut self.where_,
            BindingCategory::GroupBy => &mut self.group_by,
            BindingCategory::Having => &mut self.having,
            BindingCategory::Order => &mut self.order,
            BindingCategory::Union => &mut self.union,
            BindingCategory::UnionOrder => &mut self.union_order,
        }
    }

    /// Concatenates the buckets in placeholder order.
    pub fn flatten(&self) -> Vec<Value> {
        self.flatten_except(&[])
    }

    /// Concatenates every bucket not listed in `skip`, in placeholder order.
    pub fn flatten_except(&self, skip: &[BindingCategory]) -> Vec<Value> {
        BindingCategory::ALL
            .iter()
            .filter(|category| !skip.contains(category))
            .flat_map(|category| self.get(*category).iter().cloned())
            .collect()
    }

    /// Appends every bucket of `other` to the matching bucket here.
    pub fn merge(&mut self, other: &Bindings) {
        for category in BindingCategory::ALL {
            self.get_mut(category).extend(other.get(category).iter().cloned());
        }
    }
}

/// Registry fields that [`Registry::clone_without`] can reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryField {
    Aggregate,
    Columns,
    Distinct,
    From,
    IndexHint,
    Joins,
    Wheres,
    Groups,
    Havings,
    Orders,
    Limit,
    Offset,
    Unions,
    UnionLimit,
    UnionOffset,
    UnionOrders,
    Lock,
    BeforeQueryCallbacks,
}

/// Full state of one query.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    pub aggregate: Option<Aggregate>,
    /// `None` compiles to `*`; distinct from an explicit empty list
    pub columns: Option<Vec<ColumnRef>>,
    pub distinct: Distinct,
    pub from: Option<TableRef>,
    pub index_hint: Option<IndexHint>,
    pub joins: Vec<JoinClause>,
    pub wheres: Vec<Condition>,
    pub groups: Vec<ColumnRef>,
    pub havings: Vec<Condition>,
    pub orders: Vec<OrderItem>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub unions: Vec<Union>,
    pub union_limit: Option<i64>,
    pub union_offset: Option<i64>,
    pub union_orders: Vec<OrderItem>,
    pub lock: LockMode,
    pub bindings: Bindings,
    pub before_query_callbacks: Vec<BeforeQueryCallback>,
}

impl Registry {
    /// Resets one field to the empty default for its type.
    pub fn reset(&mut self, field: RegistryField) {
        match field {
            RegistryField::Aggregate => self.aggregate = None,
            RegistryField::Columns => self.columns = None,
            RegistryField::Distinct => self.distinct = Distinct::None,
            RegistryField::From => self.from = None,
            RegistryField::IndexHint => self.index_hint = None,
            RegistryField::Joins => self.joins.clear(),
            RegistryField::Wheres => self.wheres.clear(),
            RegistryField::Groups => self.groups.clear(),
            RegistryField::Havings => self.havings.clear(),
            RegistryField::Orders => self.orders.clear(),
            RegistryField::Limit => self.limit = None,
            RegistryField::Offset => self.offset = None,
            RegistryField::Unions => self.unions.clear(),
            RegistryField::UnionLimit => self.union_limit = None,
            RegistryField::UnionOffset => self.union_offset = None,
            RegistryField::UnionOrders => self.union_orders.clear(),
            RegistryField::Lock => self.lock = LockMode::None,
            RegistryField::BeforeQueryCallbacks => self.before_query_callbacks.clear(),
        }
    }

    /// Copies the registry, resetting the listed fields.
    pub fn clone_without(&self, fields: &[RegistryField]) -> Registry {
        let mut clone = self.clone();
        for field in fields {
            clone.reset(*field);
        }
        clone
    }

    /// Copies the registry, emptying the listed binding buckets.
    pub fn clone_without_bindings(&self, categories: &[BindingCategory]) -> Registry {
        let mut clone = self.clone();
        for category in categories {
            clone.bindings.get_mut(*category).clear();
        }
        clone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::clause::Term;
    use crate::query::types::{Boolean, OrderDirection};

    fn sample() -> Registry {
        let mut registry = Registry {
            from: Some(TableRef::from("users")),
            limit: Some(10),
            ..Default::default()
        };
        registry.wheres.push(Condition::In {
            column: ColumnRef::from("id"),
            values: vec![Term::from(1), Term::from(2)],
            boolean: Boolean::And,
            not: false,
        });
        registry.bindings.where_.extend([Value::Int(1), Value::Int(2)]);
        registry.orders.push(OrderItem::Column {
            column: ColumnRef::from("name"),
            direction: OrderDirection::Asc,
        });
        registry
    }

    #[test]
    fn test_flatten_follows_category_order() {
        let mut bindings = Bindings::default();
        bindings.union_order.push(Value::from("u"));
        bindings.where_.push(Value::from("w"));
        bindings.select.push(Value::from("s"));
        bindings.having.push(Value::from("h"));

        assert_eq!(
            bindings.flatten(),
            vec![Value::from("s"), Value::from("w"), Value::from("h"), Value::from("u")]
        );
        assert_eq!(
            bindings.flatten_except(&[BindingCategory::Select]),
            vec![Value::from("w"), Value::from("h"), Value::from("u")]
        );
    }

    #[test]
    fn test_clone_is_independent() {
        let original = sample();
        let mut clone = original.clone();

        if let Condition::In { values, .. } = &mut clone.wheres[0] {
            values.push(Term::from(3));
        }
        clone.bindings.where_.push(Value::Int(3));
        clone.orders.clear();

        match &original.wheres[0] {
            Condition::In { values, .. } => assert_eq!(values.len(), 2),
            other => panic!("unexpected clause {other:?}"),
        }
        assert_eq!(original.bindings.where_.len(), 2);
        assert_eq!(original.orders.len(), 1);
    }

    #[test]
    fn test_clone_without_resets_fields() {
        let original = sample();
        let clone = original.clone_without(&[RegistryField::Orders, RegistryField::Limit]);

        assert!(clone.orders.is_empty());
        assert_eq!(clone.limit, None);
        assert_eq!(clone.wheres.len(), 1);
        assert_eq!(original.limit, Some(10));
    }

    #[test]
    fn test_clone_without_bindings_empties_buckets() {
        let original = sample();
        let clone = original.clone_without_bindings(&[BindingCategory::Where]);

        assert!(clone.bindings.where_.is_empty());
        assert_eq!(clone.wheres.len(), 1);
        assert_eq!(original.bindings.where_.len(), 2);
    }
}
