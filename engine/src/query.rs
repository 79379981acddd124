//! Single-use query pipelines.
//!
//! A query starts from a source (a full table scan, or an index range that
//! currently degenerates to one), optionally sets an order, and appends
//! operators. Each chaining call closes the stage it was called on and
//! returns a new stage; each stage can be chained or executed at most once.
//!
//! ```text
//!   Preparing --chain/prepare--> Closed
//!   Preparing --execute--------> Executing --exhausted/dropped--> Consumed
//! ```
//!
//! Execution snapshots the collection, reverses it for descending order,
//! then applies operators in the order they were chained.

use crate::{
    error::{ClosedReason, Result},
    store::DocumentStore,
    CollectionName, Document, Error,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

/// Scan order over storage (insertion) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    #[serde(alias = "asc")]
    Ascending,
    #[serde(alias = "desc")]
    Descending,
}

/// Lifecycle of one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Preparing,
    Closed,
    Executing,
    Consumed,
}

/// Comparison in an index range expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RangeOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// One bound of an index range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeExpr {
    pub op: RangeOp,
    pub field_path: String,
    pub value: Value,
}

/// Bounds over an index prefix.
///
/// Ranges are recorded with the query but not used to narrow the scan yet;
/// an index-range source reads the whole collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexRange {
    exprs: Vec<RangeExpr>,
}

impl IndexRange {
    /// An unbounded range.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, op: RangeOp, field_path: &str, value: Value) -> Self {
        self.exprs.push(RangeExpr {
            op,
            field_path: field_path.to_string(),
            value,
        });
        self
    }

    pub fn eq(self, field_path: &str, value: impl Into<Value>) -> Self {
        self.push(RangeOp::Eq, field_path, value.into())
    }

    pub fn gt(self, field_path: &str, value: impl Into<Value>) -> Self {
        self.push(RangeOp::Gt, field_path, value.into())
    }

    pub fn gte(self, field_path: &str, value: impl Into<Value>) -> Self {
        self.push(RangeOp::Gte, field_path, value.into())
    }

    pub fn lt(self, field_path: &str, value: impl Into<Value>) -> Self {
        self.push(RangeOp::Lt, field_path, value.into())
    }

    pub fn lte(self, field_path: &str, value: impl Into<Value>) -> Self {
        self.push(RangeOp::Lte, field_path, value.into())
    }

    /// The recorded bound expressions.
    pub fn exprs(&self) -> &[RangeExpr] {
        &self.exprs
    }
}

/// Where a pipeline reads its documents from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    FullTableScan {
        collection: CollectionName,
    },
    IndexRange {
        collection: CollectionName,
        index: String,
        range: IndexRange,
    },
}

impl Source {
    /// The collection being read.
    pub fn collection(&self) -> &str {
        match self {
            Source::FullTableScan { collection } | Source::IndexRange { collection, .. } => {
                collection
            }
        }
    }
}

type Predicate = Rc<dyn Fn(&Document) -> bool>;

/// A pipeline operator, applied in chain order after ordering.
#[derive(Clone)]
pub enum Operator {
    Filter(Predicate),
    Limit(usize),
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Filter(_) => f.write_str("Filter(..)"),
            Operator::Limit(n) => f.debug_tuple("Limit").field(n).finish(),
        }
    }
}

/// An inert, fully specified query.
///
/// Produced by [`Query::prepare`]; does nothing until executed against a
/// store. A plan can only be executed once since execution consumes it.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    source: Source,
    order: Option<Order>,
    operators: Vec<Operator>,
}

impl QueryPlan {
    fn full_scan(collection: CollectionName) -> Self {
        Self {
            source: Source::FullTableScan { collection },
            order: None,
            operators: Vec::new(),
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn order(&self) -> Option<Order> {
        self.order
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    /// Snapshot the source collection and return a cursor over the results.
    pub fn execute(self, store: &DocumentStore) -> Cursor {
        self.start(store, Rc::new(Cell::new(QueryPhase::Executing)))
    }

    fn start(self, store: &DocumentStore, phase: Rc<Cell<QueryPhase>>) -> Cursor {
        // Index ranges are not applied; every source scans the collection.
        let docs = store.scan(self.source.collection());
        let limits = vec![0; self.operators.len()];
        Cursor {
            phase,
            docs,
            descending: self.order == Some(Order::Descending),
            position: 0,
            operators: self.operators,
            limits,
        }
    }
}

/// One stage of a query pipeline.
pub struct Query<'s> {
    store: &'s DocumentStore,
    phase: Rc<Cell<QueryPhase>>,
    plan: RefCell<Option<QueryPlan>>,
}

impl fmt::Debug for Query<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("phase", &self.phase.get())
            .field("plan", &self.plan.borrow())
            .finish()
    }
}

impl<'s> Query<'s> {
    /// Start a full-table-scan pipeline over `collection`.
    pub fn new(store: &'s DocumentStore, collection: impl Into<CollectionName>) -> Self {
        Self::from_plan(store, QueryPlan::full_scan(collection.into()))
    }

    fn from_plan(store: &'s DocumentStore, plan: QueryPlan) -> Self {
        Self {
            store,
            phase: Rc::new(Cell::new(QueryPhase::Preparing)),
            plan: RefCell::new(Some(plan)),
        }
    }

    /// Current phase of this stage.
    pub fn phase(&self) -> QueryPhase {
        self.phase.get()
    }

    /// Close this stage and hand out its plan.
    fn take_plan(&self) -> Result<QueryPlan> {
        match self.phase.get() {
            QueryPhase::Preparing => {}
            QueryPhase::Closed => return Err(Error::AlreadyChained),
            QueryPhase::Executing | QueryPhase::Consumed => {
                return Err(Error::IterationAlreadyBegun)
            }
        }
        let plan = self
            .plan
            .borrow_mut()
            .take()
            .ok_or(Error::AlreadyChained)?;
        self.phase.set(QueryPhase::Closed);
        Ok(plan)
    }

    fn chain(&self, f: impl FnOnce(&mut QueryPlan) -> Result<()>) -> Result<Query<'s>> {
        let mut plan = self.take_plan()?;
        f(&mut plan)?;
        Ok(Self::from_plan(self.store, plan))
    }

    /// Read through an index range. Must be the first stage of the pipeline.
    pub fn with_index(&self, index: impl Into<String>, range: IndexRange) -> Result<Query<'s>> {
        let index = index.into();
        self.chain(|plan| {
            if plan.order.is_some() || !plan.operators.is_empty() {
                return Err(Error::InvalidQuery(
                    "with_index must be the first stage of a query".into(),
                ));
            }
            if let Source::IndexRange { .. } = plan.source {
                return Err(Error::InvalidQuery("index already selected".into()));
            }
            let collection = plan.source.collection().to_string();
            plan.source = Source::IndexRange {
                collection,
                index,
                range,
            };
            Ok(())
        })
    }

    /// Set the scan order. May be called at most once per pipeline.
    pub fn order(&self, order: Order) -> Result<Query<'s>> {
        self.chain(|plan| {
            if plan.order.is_some() {
                return Err(Error::OrderAlreadySet);
            }
            plan.order = Some(order);
            Ok(())
        })
    }

    /// Keep at most `n` documents.
    pub fn limit(&self, n: usize) -> Result<Query<'s>> {
        self.chain(|plan| {
            plan.operators.push(Operator::Limit(n));
            Ok(())
        })
    }

    /// Keep documents matching `predicate`.
    pub fn filter<F>(&self, predicate: F) -> Result<Query<'s>>
    where
        F: Fn(&Document) -> bool + 'static,
    {
        self.chain(|plan| {
            plan.operators.push(Operator::Filter(Rc::new(predicate)));
            Ok(())
        })
    }

    /// Close this stage and return its inert plan.
    pub fn prepare(&self) -> Result<QueryPlan> {
        self.take_plan()
    }

    /// Begin iteration.
    pub fn execute(&self) -> Result<Cursor> {
        match self.phase.get() {
            QueryPhase::Preparing => {}
            QueryPhase::Executing => return Err(Error::IterationAlreadyBegun),
            QueryPhase::Closed => return Err(Error::QueryClosed(ClosedReason::Chained)),
            QueryPhase::Consumed => return Err(Error::QueryClosed(ClosedReason::Consumed)),
        }
        let plan = self
            .plan
            .borrow_mut()
            .take()
            .ok_or(Error::QueryClosed(ClosedReason::Chained))?;
        self.phase.set(QueryPhase::Executing);
        Ok(plan.start(self.store, Rc::clone(&self.phase)))
    }

    /// Run the query to completion.
    pub fn collect(&self) -> Result<Vec<Document>> {
        self.execute()?.collect_remaining()
    }

    /// The first `n` results.
    pub fn take(&self, n: usize) -> Result<Vec<Document>> {
        self.limit(n)?.collect()
    }

    /// The first result, if any.
    pub fn first(&self) -> Result<Option<Document>> {
        Ok(self.take(1)?.into_iter().next())
    }

    /// The single result, if any; more than one is an error.
    pub fn unique(&self) -> Result<Option<Document>> {
        let collection = self
            .plan
            .borrow()
            .as_ref()
            .map(|plan| plan.source.collection().to_string())
            .unwrap_or_default();
        let mut results = self.take(2)?;
        if results.len() > 1 {
            return Err(Error::MultipleResults(collection));
        }
        Ok(results.pop())
    }
}

/// Lazy iteration over an executing query.
///
/// Dropping the cursor before it is exhausted marks the query consumed.
pub struct Cursor {
    phase: Rc<Cell<QueryPhase>>,
    docs: Rc<Vec<Document>>,
    descending: bool,
    position: usize,
    operators: Vec<Operator>,
    /// Documents passed so far, per operator slot (used by limits)
    limits: Vec<usize>,
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("phase", &self.phase.get())
            .field("position", &self.position)
            .field("len", &self.docs.len())
            .finish()
    }
}

enum Step {
    Emit,
    Skip,
    Exhausted,
}

impl Cursor {
    /// Produce the next document, or `None` once exhausted. Advancing again
    /// after exhaustion is an error.
    pub fn advance(&mut self) -> Result<Option<Document>> {
        if self.phase.get() != QueryPhase::Executing {
            return Err(Error::QueryClosed(ClosedReason::Consumed));
        }

        while self.position < self.docs.len() {
            let index = if self.descending {
                self.docs.len() - 1 - self.position
            } else {
                self.position
            };
            self.position += 1;

            match self.step(index) {
                Step::Emit => return Ok(Some(self.docs[index].clone())),
                Step::Skip => continue,
                Step::Exhausted => break,
            }
        }

        self.phase.set(QueryPhase::Consumed);
        Ok(None)
    }

    fn step(&mut self, index: usize) -> Step {
        let doc = &self.docs[index];
        for (slot, operator) in self.operators.iter().enumerate() {
            match operator {
                Operator::Filter(predicate) => {
                    if !predicate(doc) {
                        return Step::Skip;
                    }
                }
                Operator::Limit(n) => {
                    if self.limits[slot] >= *n {
                        return Step::Exhausted;
                    }
                    self.limits[slot] += 1;
                }
            }
        }
        Step::Emit
    }

    /// Drain every remaining document.
    pub fn collect_remaining(mut self) -> Result<Vec<Document>> {
        let mut out = Vec::new();
        while let Some(doc) = self.advance()? {
            out.push(doc);
        }
        Ok(out)
    }

    /// Whether the cursor can still produce documents.
    pub fn is_open(&self) -> bool {
        self.phase.get() == QueryPhase::Executing
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.phase.set(QueryPhase::Consumed);
    }
}
