//! Tool visibility filters.
//!
//! Filters compose left-to-right and may only remove tools, so pruning is
//! monotone: appending a filter never grows the visible set. The chain
//! gates `list_tools` responses only; invoking a hidden tool by name is
//! separately rejected by the permission middleware.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Local, Timelike};

use crate::{
    config::{BusinessHours, Config},
    registry::{EnvironmentClass, ToolDescriptor},
    session::Session,
};

/// Per-request inputs the filters consult.
pub struct FilterContext<'a> {
    pub session: Option<&'a Session>,
    /// Deployment environment, from `ENVIRONMENT`; "production" when
    /// unset (fail-safe).
    pub environment: &'a str,
    pub now: DateTime<Local>,
}

impl<'a> FilterContext<'a> {
    pub fn new(session: Option<&'a Session>, environment: &'a str) -> Self {
        Self {
            session,
            environment,
            now: Local::now(),
        }
    }
}

pub trait ToolFilter: Send + Sync {
    fn name(&self) -> &'static str;
    fn filter(&self, ctx: &FilterContext<'_>, tools: Vec<ToolDescriptor>) -> Vec<ToolDescriptor>;
}

/// Drops tools whose permission requirements the caller cannot meet.
/// Anonymous callers lose every restricted tool.
pub struct PermissionFilter;

impl ToolFilter for PermissionFilter {
    fn name(&self) -> &'static str {
        "permission"
    }

    fn filter(&self, ctx: &FilterContext<'_>, mut tools: Vec<ToolDescriptor>) -> Vec<ToolDescriptor> {
        tools.retain(|tool| {
            if tool.required_permissions.is_empty() {
                return true;
            }
            match ctx.session {
                Some(session) => tool.required_permissions.iter().any(|p| session.has(p)),
                None => false,
            }
        });
        tools
    }
}

/// Drops tools pinned to another environment.
pub struct EnvironmentFilter;

impl ToolFilter for EnvironmentFilter {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn filter(&self, ctx: &FilterContext<'_>, mut tools: Vec<ToolDescriptor>) -> Vec<ToolDescriptor> {
        tools.retain(|tool| match tool.environment {
            None => true,
            Some(EnvironmentClass::Development) => ctx.environment == "development",
            Some(EnvironmentClass::Production) => ctx.environment == "production",
        });
        tools
    }
}

/// Hides maintenance-class tools inside the business-hours window.
pub struct TimeWindowFilter {
    hours: BusinessHours,
}

impl TimeWindowFilter {
    pub fn new(hours: BusinessHours) -> Self {
        Self { hours }
    }

    fn in_window(&self, now: &DateTime<Local>) -> bool {
        let weekday = chrono::Datelike::weekday(now).number_from_monday();
        if !self.hours.weekdays.contains(&weekday) {
            return false;
        }
        let hour = now.hour();
        hour >= self.hours.start_hour && hour < self.hours.end_hour
    }
}

impl ToolFilter for TimeWindowFilter {
    fn name(&self) -> &'static str {
        "time_window"
    }

    fn filter(&self, ctx: &FilterContext<'_>, mut tools: Vec<ToolDescriptor>) -> Vec<ToolDescriptor> {
        if self.in_window(&ctx.now) {
            tools.retain(|tool| !tool.maintenance);
        }
        tools
    }
}

/// Drops tools whose mapped feature flag is off.
pub struct FeatureFlagFilter {
    flags: HashMap<String, bool>,
}

impl FeatureFlagFilter {
    pub fn new(flags: HashMap<String, bool>) -> Self {
        Self { flags }
    }
}

impl ToolFilter for FeatureFlagFilter {
    fn name(&self) -> &'static str {
        "feature_flag"
    }

    fn filter(&self, _ctx: &FilterContext<'_>, mut tools: Vec<ToolDescriptor>) -> Vec<ToolDescriptor> {
        tools.retain(|tool| self.flags.get(&tool.name).copied().unwrap_or(true));
        tools
    }
}

/// Per-session quota predicate supplied by the embedder.
pub type QuotaPredicate = Arc<dyn Fn(&Session, &ToolDescriptor) -> bool + Send + Sync>;

pub struct QuotaFilter {
    predicate: QuotaPredicate,
}

impl QuotaFilter {
    pub fn new(predicate: QuotaPredicate) -> Self {
        Self { predicate }
    }
}

impl ToolFilter for QuotaFilter {
    fn name(&self) -> &'static str {
        "quota"
    }

    fn filter(&self, ctx: &FilterContext<'_>, mut tools: Vec<ToolDescriptor>) -> Vec<ToolDescriptor> {
        if let Some(session) = ctx.session {
            tools.retain(|tool| (self.predicate)(session, tool));
        }
        tools
    }
}

/// Left-to-right composition of filters, built once at startup.
pub struct FilterChain {
    filters: Vec<Box<dyn ToolFilter>>,
}

impl FilterChain {
    pub fn new(filters: Vec<Box<dyn ToolFilter>>) -> Self {
        Self { filters }
    }

    /// The stock chain: permission, environment, time window (when
    /// enabled), feature flags, then the optional quota predicate.
    pub fn from_config(config: &Config, quota: Option<QuotaPredicate>) -> Self {
        let mut filters: Vec<Box<dyn ToolFilter>> =
            vec![Box::new(PermissionFilter), Box::new(EnvironmentFilter)];
        if config.enable_time_restrictions {
            filters.push(Box::new(TimeWindowFilter::new(config.business_hours.clone())));
        }
        filters.push(Box::new(FeatureFlagFilter::new(config.feature_flags.clone())));
        if let Some(predicate) = quota {
            filters.push(Box::new(QuotaFilter::new(predicate)));
        }
        Self::new(filters)
    }

    pub fn apply(&self, ctx: &FilterContext<'_>, tools: Vec<ToolDescriptor>) -> Vec<ToolDescriptor> {
        self.filters
            .iter()
            .fold(tools, |tools, filter| filter.filter(ctx, tools))
    }
}
