//! Connection query planner
//!
//! Turns `first`/`last`/`after`/`before` into a bounded source query. The limit
//! sent to the source is always one more than the page size; the extra record
//! only tells the resolver whether another page exists.

use thiserror::Error;

use crate::config::ConnectionConfig;
use crate::cursor::{CursorCodec, CursorError, QueryFingerprint};
use crate::source::{Direction, KeyBounds, SourceQueryArgs};
use crate::types::{EntityType, WhereFilter};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("Cannot specify both 'first' and 'last'")]
    ConflictingPageArgs,

    #[error("'{arg}' must be non-negative, got {value}")]
    NegativePageSize { arg: &'static str, value: i64 },

    #[error("Requested page size {requested} exceeds the maximum of {max}")]
    PageSizeExceeded { requested: u32, max: u32 },

    #[error("Invalid '{arg}' cursor: {source}")]
    Cursor {
        arg: &'static str,
        #[source]
        source: CursorError,
    },

    #[error("Unknown filter '{0}'")]
    UnknownFilter(String),

    #[error("{child} connections cannot be resolved under a {parent}")]
    UnsupportedParent { child: EntityType, parent: EntityType },
}

/// Validated pagination arguments of a connection field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionArgs {
    pub first: Option<u32>,
    pub last: Option<u32>,
    pub after: Option<String>,
    pub before: Option<String>,
    pub filter: WhereFilter,
}

impl ConnectionArgs {
    pub fn first(n: u32) -> Self {
        Self {
            first: Some(n),
            ..Default::default()
        }
    }

    pub fn last(n: u32) -> Self {
        Self {
            last: Some(n),
            ..Default::default()
        }
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    pub fn before(mut self, cursor: impl Into<String>) -> Self {
        self.before = Some(cursor.into());
        self
    }

    pub fn filter(mut self, filter: WhereFilter) -> Self {
        self.filter = filter;
        self
    }
}

/// Bounded query for one connection resolution
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    direction: Direction,
    page_size: u32,
    bounds: KeyBounds,
    source_args: SourceQueryArgs,
    fingerprint: QueryFingerprint,
}

impl QueryPlan {
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Edges the client asked for
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Records requested from the source (`page_size + 1`)
    pub fn limit(&self) -> u32 {
        self.page_size.saturating_add(1)
    }

    pub fn bounds(&self) -> &KeyBounds {
        &self.bounds
    }

    pub fn source_args(&self) -> &SourceQueryArgs {
        &self.source_args
    }

    pub fn fingerprint(&self) -> &QueryFingerprint {
        &self.fingerprint
    }
}

pub struct QueryPlanner<'a> {
    config: &'a ConnectionConfig,
}

impl<'a> QueryPlanner<'a> {
    pub fn new(config: &'a ConnectionConfig) -> Self {
        Self { config }
    }

    pub fn plan(
        &self,
        args: &ConnectionArgs,
        source_args: SourceQueryArgs,
    ) -> Result<QueryPlan, PlanError> {
        if args.first.is_some() && args.last.is_some() {
            return Err(PlanError::ConflictingPageArgs);
        }

        let page_size = args
            .first
            .or(args.last)
            .unwrap_or(self.config.default_page_size);
        if page_size > self.config.max_page_size {
            return Err(PlanError::PageSizeExceeded {
                requested: page_size,
                max: self.config.max_page_size,
            });
        }

        // A bare `before` pages backward from the cursor
        let direction = if args.last.is_some() || (args.first.is_none() && args.before.is_some()) {
            Direction::Backward
        } else {
            Direction::Forward
        };

        let fingerprint = QueryFingerprint::new(
            source_args.entity_type,
            &source_args.ordering,
            &source_args.filter,
        );
        let decode = |arg: &'static str, cursor: &Option<String>| {
            cursor
                .as_deref()
                .map(|c| CursorCodec::decode(c, &fingerprint))
                .transpose()
                .map_err(|source| PlanError::Cursor { arg, source })
        };
        let bounds = KeyBounds {
            after: decode("after", &args.after)?,
            before: decode("before", &args.before)?,
        };

        tracing::debug!(
            entity = %source_args.entity_type,
            ?direction,
            page_size,
            bounded = !bounds.is_unbounded(),
            "Planned connection query"
        );

        Ok(QueryPlan {
            direction,
            page_size,
            bounds,
            source_args,
            fingerprint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KeyPart, OrderedKey, OrderingSpec, SortOrder};
    use assert_matches::assert_matches;

    fn source_args(status: &str) -> SourceQueryArgs {
        SourceQueryArgs {
            entity_type: EntityType::Post,
            filter: WhereFilter::new().with("status", status),
            ordering: OrderingSpec::by("date", SortOrder::Desc),
        }
    }

    fn cursor_for(id: i64, status: &str) -> String {
        let args = source_args(status);
        let fp = QueryFingerprint::new(args.entity_type, &args.ordering, &args.filter);
        CursorCodec::encode(
            &OrderedKey(vec![KeyPart::Text("2024-01-01".to_string()), KeyPart::Int(id)]),
            &fp,
        )
    }

    #[test]
    fn test_conflicting_page_args() {
        let config = ConnectionConfig::default();
        let args = ConnectionArgs {
            first: Some(5),
            last: Some(5),
            ..Default::default()
        };
        assert_eq!(
            QueryPlanner::new(&config).plan(&args, source_args("publish")),
            Err(PlanError::ConflictingPageArgs)
        );
    }

    #[test]
    fn test_page_size_exceeded_is_not_clamped() {
        let config = ConnectionConfig::default();
        let result = QueryPlanner::new(&config).plan(&ConnectionArgs::first(150), source_args("publish"));
        assert_eq!(
            result,
            Err(PlanError::PageSizeExceeded {
                requested: 150,
                max: 100
            })
        );
        let result = QueryPlanner::new(&config).plan(&ConnectionArgs::last(101), source_args("publish"));
        assert_matches!(result, Err(PlanError::PageSizeExceeded { .. }));
    }

    #[test]
    fn test_default_page_size_and_overfetch() {
        let config = ConnectionConfig::default();
        let plan = QueryPlanner::new(&config)
            .plan(&ConnectionArgs::default(), source_args("publish"))
            .unwrap();
        assert_eq!(plan.direction(), Direction::Forward);
        assert_eq!(plan.page_size(), 10);
        assert_eq!(plan.limit(), 11);
        assert!(plan.bounds().is_unbounded());
    }

    #[test]
    fn test_last_plans_backward() {
        let config = ConnectionConfig::default();
        let planner = QueryPlanner::new(&config);
        let plan = planner.plan(&ConnectionArgs::last(3), source_args("publish")).unwrap();
        assert_eq!(plan.direction(), Direction::Backward);
        assert_eq!(plan.limit(), 4);

        let bare_before = ConnectionArgs::default().before(cursor_for(8, "publish"));
        let plan = planner.plan(&bare_before, source_args("publish")).unwrap();
        assert_eq!(plan.direction(), Direction::Backward);
        assert_eq!(plan.page_size(), 10);
    }

    #[test]
    fn test_cursor_window_with_first() {
        let config = ConnectionConfig::default();
        let args = ConnectionArgs::first(2)
            .after(cursor_for(3, "publish"))
            .before(cursor_for(9, "publish"));
        let plan = QueryPlanner::new(&config).plan(&args, source_args("publish")).unwrap();
        assert_eq!(plan.direction(), Direction::Forward);
        assert_eq!(
            plan.bounds().after.as_ref().map(|k| k.0[1].clone()),
            Some(KeyPart::Int(3))
        );
        assert_eq!(
            plan.bounds().before.as_ref().map(|k| k.0[1].clone()),
            Some(KeyPart::Int(9))
        );
    }

    #[test]
    fn test_cursor_from_other_filter_fails_loud() {
        let config = ConnectionConfig::default();
        let args = ConnectionArgs::first(5).after(cursor_for(3, "draft"));
        let result = QueryPlanner::new(&config).plan(&args, source_args("publish"));
        assert_eq!(
            result,
            Err(PlanError::Cursor {
                arg: "after",
                source: CursorError::FingerprintMismatch
            })
        );

        let args = ConnectionArgs::first(5).before("garbage");
        let result = QueryPlanner::new(&config).plan(&args, source_args("publish"));
        assert_matches!(
            result,
            Err(PlanError::Cursor {
                arg: "before",
                source: CursorError::Malformed(_)
            })
        );
    }

    #[test]
    fn test_zero_page_size_is_allowed() {
        let config = ConnectionConfig::default();
        let plan = QueryPlanner::new(&config)
            .plan(&ConnectionArgs::first(0), source_args("publish"))
            .unwrap();
        assert_eq!(plan.page_size(), 0);
        assert_eq!(plan.limit(), 1);
    }
}
